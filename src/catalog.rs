//! catalog — перечисление и выбор файлов CBM в каталоге.
//!
//! Каталог — единственный источник истины о цепочке: имена sealed-файлов
//! неизменяемы, у открытого файла end == 0 (трактуется как +∞ при выборе
//! по LSN-окну). Посторонние файлы (merged-артефакты, LOCK) отбрасываются
//! строгим разбором имени.

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::consts::{Lsn, CBM_DIR, INVALID_LSN};
use crate::file::name::{parse_cbm_name, CbmFileName};
use crate::file::validate::validate_cbm_file;
use crate::util::fmt_lsn;

pub fn cbm_dir_path(datadir: &Path) -> PathBuf {
    datadir.join(CBM_DIR)
}

/// Гарантировать существование каталога CBM. Сломанный объект с тем же
/// именем (не каталог) убирается; создание фиксируется fsync'ом родителя.
pub fn ensure_cbm_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        if dir.is_dir() {
            return Ok(());
        }
        std::fs::remove_file(dir)
            .with_context(|| format!("remove broken CBM dir entry {}", dir.display()))?;
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("could not create directory {}", dir.display()))?;
    let _ = crate::util::fsync_parent_dir(dir);
    info!(
        "created CBM file directory {}. This may be the first time CBM tracking \
         is enabled after installation or CBM track reset",
        dir.display()
    );
    Ok(())
}

fn scan_dir(dir: &Path) -> Result<Vec<CbmFileName>> {
    let rd = std::fs::read_dir(dir)
        .with_context(|| format!("could not open CBM file directory {}", dir.display()))?;
    let mut out = Vec::new();
    for ent in rd {
        let ent = ent?;
        let fname = ent.file_name();
        let fname = match fname.to_str() {
            Some(s) => s,
            None => continue,
        };
        if let Some(parsed) = parse_cbm_name(fname) {
            out.push(parsed);
        }
    }
    Ok(out)
}

/// Последний (по sequence) файл каталога. None, если файлов нет.
pub fn find_last_file(dir: &Path) -> Result<Option<CbmFileName>> {
    let mut last: Option<CbmFileName> = None;
    for f in scan_dir(dir)? {
        if last.as_ref().map(|l| f.seq > l.seq).unwrap_or(true) {
            last = Some(f);
        }
    }
    Ok(last)
}

/// Файлы, чей диапазон [start, end] (end == 0 -> +∞) пересекает
/// [start_lsn, end_lsn], отсортированные по sequence.
pub fn get_file_array(
    dir: &Path,
    start_lsn: Lsn,
    end_lsn: Lsn,
    missing_ok: bool,
) -> Result<Vec<CbmFileName>> {
    let mut files: Vec<CbmFileName> = scan_dir(dir)?
        .into_iter()
        .filter(|f| {
            let open_ended = f.end_lsn == INVALID_LSN;
            (f.start_lsn <= start_lsn && (start_lsn < f.end_lsn || open_ended))
                || (start_lsn <= f.start_lsn && !open_ended && f.end_lsn <= end_lsn)
                || (f.start_lsn < end_lsn && (end_lsn <= f.end_lsn || open_ended))
        })
        .collect();

    if files.is_empty() {
        if missing_ok {
            return Ok(files);
        }
        return Err(anyhow!(
            "could not find valid CBM file between {} and {}, which may be caused \
             by previous CBM switch-off, truncation, or corruption",
            fmt_lsn(start_lsn),
            fmt_lsn(end_lsn)
        ));
    }

    files.sort_by_key(|f| f.seq);
    Ok(files)
}

/// Валидация выбранного набора: первый файл покрывает стартовую точку,
/// хвост последнего дотягивает до конечной, между соседями нет разрывов.
pub fn validate_file_array(
    dir: &Path,
    files: &[CbmFileName],
    start_lsn: Lsn,
    end_lsn: Lsn,
) -> Result<()> {
    if start_lsn < files[0].start_lsn {
        return Err(anyhow!(
            "could not find valid CBM file that contains the merging start point {}",
            fmt_lsn(start_lsn)
        ));
    }

    let last = &files[files.len() - 1];
    let (tracked, _size) = validate_cbm_file(dir, &last.name, false)?;
    if tracked < end_lsn {
        return Err(anyhow!(
            "could not find valid CBM file that contains the merging end point {}",
            fmt_lsn(end_lsn)
        ));
    }

    for pair in files.windows(2) {
        if pair[0].end_lsn != pair[1].start_lsn {
            return Err(anyhow!(
                "there is a gap between CBM file \"{}\" and \"{}\", which may be \
                 caused by previous CBM switch-off, truncation, or corruption",
                pair[0].name,
                pair[1].name
            ));
        }
    }

    Ok(())
}

pub fn get_and_validate_file_array(
    dir: &Path,
    start_lsn: Lsn,
    end_lsn: Lsn,
) -> Result<Vec<CbmFileName>> {
    let files = get_file_array(dir, start_lsn, end_lsn, false)?;

    if log::log_enabled!(log::Level::Debug) {
        let list: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        debug!(
            "CBM file list for merging between {} and {}: {}",
            fmt_lsn(start_lsn),
            fmt_lsn(end_lsn),
            list.join(" ")
        );
    }

    validate_file_array(dir, &files, start_lsn, end_lsn)?;
    Ok(files)
}

/// Полная зачистка каталога CBM (деструктивная инконсистентность):
/// удаляются все файлы, отслеживание стартует заново.
pub fn remove_all_cbm_files(dir: &Path) -> Result<()> {
    let rd = std::fs::read_dir(dir)
        .with_context(|| format!("could not open CBM file directory {}", dir.display()))?;
    for ent in rd {
        let ent = ent?;
        if ent.file_type()?.is_file() {
            std::fs::remove_file(ent.path())
                .with_context(|| format!("could not remove file {}", ent.path().display()))?;
        }
    }
    info!("removed all CBM files in {}", dir.display());
    Ok(())
}

fn unlink_cbm_file(dir: &Path, name: &str) -> Result<()> {
    let path = dir.join(name);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow!("could not remove file {}: {}", path.display(), e)),
    }
}

/// Переработка: удалить файлы, чей tracked LSN <= target_lsn. Возвращает
/// безопасную границу — максимальный tracked LSN среди удалённых, иначе
/// минимальный start среди оставшихся, иначе сам target.
pub fn recycle_files(dir: &Path, target_lsn: Lsn) -> Result<Lsn> {
    let files = get_file_array(dir, INVALID_LSN, target_lsn, true)?;
    if files.is_empty() {
        return Ok(target_lsn);
    }

    let mut max_removed_tracked = INVALID_LSN;
    let mut min_kept_start = INVALID_LSN;

    for f in &files {
        let mut file_tracked = f.end_lsn;
        if file_tracked == INVALID_LSN {
            let (tracked, _size) = validate_cbm_file(dir, &f.name, false)?;
            file_tracked = tracked;
        }
        if file_tracked == INVALID_LSN {
            file_tracked = f.start_lsn;
        }

        if file_tracked <= target_lsn {
            unlink_cbm_file(dir, &f.name)?;
            info!(
                "recycled CBM file \"{}\", tracked LSN {}",
                f.name,
                fmt_lsn(file_tracked)
            );
            if max_removed_tracked < file_tracked {
                max_removed_tracked = file_tracked;
            }
        } else if min_kept_start == INVALID_LSN || f.start_lsn < min_kept_start {
            min_kept_start = f.start_lsn;
        }
    }

    Ok(if max_removed_tracked == INVALID_LSN {
        min_kept_start
    } else {
        max_removed_tracked
    })
}
