//! Утилиты: отображение/разбор LSN, wall clock для merged-имён,
//! durable rename (rename + fsync родительского каталога).

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::consts::Lsn;

/// LSN в каноническом виде "%08X/%08X" (hi/lo).
pub fn fmt_lsn(lsn: Lsn) -> String {
    format!("{:08X}/{:08X}", (lsn >> 32) as u32, lsn as u32)
}

/// Разбор LSN вида "hi/lo" (hex), как печатает fmt_lsn.
pub fn parse_lsn(s: &str) -> Result<Lsn> {
    let (hi, lo) = s
        .split_once('/')
        .ok_or_else(|| anyhow!("invalid LSN format (expected hi/lo): {}", s))?;
    let hi = u32::from_str_radix(hi.trim(), 16)
        .with_context(|| format!("invalid LSN high half: {}", s))?;
    let lo = u32::from_str_radix(lo.trim(), 16)
        .with_context(|| format!("invalid LSN low half: {}", s))?;
    Ok(((hi as u64) << 32) | lo as u64)
}

/// Секунды/микросекунды с эпохи (для имени merged-файла).
pub fn now_sec_usec() -> (u64, u32) {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (d.as_secs(), d.subsec_micros())
}

/// rename + фиксация в родительском каталоге. Без фиксации rename может
/// «откатиться» после сбоя питания, ломая цепочку имён файлов.
pub fn durable_rename(from: &Path, to: &Path) -> Result<()> {
    std::fs::rename(from, to)
        .with_context(|| format!("rename {} -> {}", from.display(), to.display()))?;
    let _ = fsync_parent_dir(to);
    Ok(())
}

// Best-effort fsync parent directory after rename/create (Unix only).
#[cfg(unix)]
pub fn fsync_parent_dir(p: &Path) -> std::io::Result<()> {
    use std::fs::File;
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}
#[cfg(not(unix))]
pub fn fsync_parent_dir(_p: &Path) -> std::io::Result<()> {
    Ok(())
}
