//! file/name — грамматика имён файлов CBM.
//!
//! live/sealed: pg_xlog_{seq}_{startHi:08X}{startLo:08X}_{endHi:08X}{endLo:08X}.cbm
//!   - у открытого на дозапись файла обе половины end нулевые;
//! merged:     pg_merged_xlog_{start}_{end}_{sec}-{usec}.cbm
//!   - артефакт для потребителя, в живой каталог не входит (stem не
//!     совпадает, разбором отбрасывается).

use crate::consts::{Lsn, CBM_FILE_EXT, CBM_FILE_STEM, INVALID_LSN, MERGED_FILE_STEM};

/// Разобранное имя файла CBM.
#[derive(Clone, Debug)]
pub struct CbmFileName {
    pub name: String,
    pub seq: u64,
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
}

pub fn format_cbm_name(seq: u64, start_lsn: Lsn, end_lsn: Lsn) -> String {
    format!(
        "{}{}_{:08X}{:08X}_{:08X}{:08X}{}",
        CBM_FILE_STEM,
        seq,
        (start_lsn >> 32) as u32,
        start_lsn as u32,
        (end_lsn >> 32) as u32,
        end_lsn as u32,
        CBM_FILE_EXT
    )
}

pub fn format_merged_name(start_lsn: Lsn, end_lsn: Lsn, sec: u64, usec: u32) -> String {
    format!(
        "{}{:08X}{:08X}_{:08X}{:08X}_{}-{}{}",
        MERGED_FILE_STEM,
        (start_lsn >> 32) as u32,
        start_lsn as u32,
        (end_lsn >> 32) as u32,
        end_lsn as u32,
        sec,
        usec,
        CBM_FILE_EXT
    )
}

/// Строгий разбор имени live/sealed файла. None для посторонних файлов
/// (merged-файлы, LOCK, временные) и для имён с несогласованными LSN.
pub fn parse_cbm_name(name: &str) -> Option<CbmFileName> {
    let rest = name.strip_prefix(CBM_FILE_STEM)?;
    let rest = rest.strip_suffix(CBM_FILE_EXT)?;

    let mut parts = rest.split('_');
    let seq_s = parts.next()?;
    let start_s = parts.next()?;
    let end_s = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    if seq_s.is_empty() || !seq_s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let seq = seq_s.parse::<u64>().ok()?;
    let start_lsn = parse_hex16(start_s)?;
    let end_lsn = parse_hex16(end_s)?;

    // start всегда валиден; end либо нулевой (открытый файл), либо > start
    if start_lsn == INVALID_LSN {
        return None;
    }
    if end_lsn != INVALID_LSN && end_lsn <= start_lsn {
        return None;
    }

    Some(CbmFileName {
        name: name.to_string(),
        seq,
        start_lsn,
        end_lsn,
    })
}

fn parse_hex16(s: &str) -> Option<Lsn> {
    if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}
