//! file/validate — восстановительная валидация хвоста файла CBM.
//!
//! Сканирует файл с хвоста к началу в поисках последней страницы, которая
//! одновременно CRC-валидна и is_last_in_batch: её batch_end_lsn — это
//! tracked LSN файла, конец этой страницы — валидный размер. Всё после неё
//! (недописанный батч, мусор после сбоя) на старте писателя усекается;
//! на merge-пути усечение запрещено, там битый хвост фатален ещё в
//! итераторе.

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{info, warn};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::consts::{Lsn, CBM_PAGE_SIZE, INVALID_LSN, OFF_END_LSN, OFF_IS_LAST};
use crate::page::page_verify_crc;
use crate::util::fmt_lsn;

/// Возвращает (tracked_lsn, размер после усечения). Если ни одной валидной
/// last-in-batch страницы нет (или файла нет/не открывается) —
/// (INVALID_LSN, 0).
pub fn validate_cbm_file(dir: &Path, name: &str, truncate_trailing: bool) -> Result<(Lsn, u64)> {
    let path = dir.join(name);

    let file_size = match std::fs::metadata(&path) {
        Ok(m) => m.len(),
        Err(e) => {
            info!("could not stat CBM file {}: {}", path.display(), e);
            return Ok((INVALID_LSN, 0));
        }
    };

    if file_size % CBM_PAGE_SIZE as u64 != 0 {
        warn!(
            "size ({}) of CBM file \"{}\" is not a multiple of page size, \
             which may imply file corruption",
            file_size, name
        );
    }

    let mut file = match std::fs::OpenOptions::new().read(true).write(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!(
                "could not open CBM file {} while validation: {}",
                path.display(),
                e
            );
            return Ok((INVALID_LSN, 0));
        }
    };

    let mut read_off = file_size - file_size % CBM_PAGE_SIZE as u64;
    let mut buf = [0u8; CBM_PAGE_SIZE];
    let mut found: Option<(Lsn, u64)> = None;

    while read_off > 0 {
        read_off -= CBM_PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(read_off))?;
        if let Err(e) = file.read_exact(&mut buf) {
            warn!(
                "failed reading CBM file \"{}\", page offset {}: {}",
                name, read_off, e
            );
            break;
        }
        if !page_verify_crc(&buf) {
            warn!(
                "corruption detected in CBM file \"{}\", page offset {}",
                name, read_off
            );
            continue;
        }
        if buf[OFF_IS_LAST] == 0 {
            // валидная, но не замыкающая батч — ищем предыдущий батч
            continue;
        }
        let tracked = LittleEndian::read_u64(&buf[OFF_END_LSN..OFF_END_LSN + 8]);
        found = Some((tracked, read_off + CBM_PAGE_SIZE as u64));
        break;
    }

    let (tracked, valid_size) = match found {
        Some(v) => v,
        None => return Ok((INVALID_LSN, 0)),
    };

    if valid_size < file_size && truncate_trailing {
        file.set_len(valid_size)
            .with_context(|| format!("failed to truncate CBM file \"{}\" to {}", name, valid_size))?;
        file.sync_all()?;
        info!(
            "truncated CBM file \"{}\" to length {}, tracked LSN {}",
            name,
            valid_size,
            fmt_lsn(tracked)
        );
    }

    Ok((tracked, valid_size))
}
