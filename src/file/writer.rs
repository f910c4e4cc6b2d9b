//! file/writer — append-only запись страниц CBM.
//!
//! Файл создаётся под именем (seq, start, 0); страницы пишутся по текущему
//! смещению; fsync делается на flush батча. По достижении порога размера
//! файл запечатывается durable rename'ом в имя с end LSN и открывается
//! следующий (seq+1, end, 0).

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts::{Lsn, CBM_PAGE_SIZE, INVALID_LSN};
use crate::file::name::{format_cbm_name, CbmFileName};
use crate::pagehash::PageHash;
use crate::util::{durable_rename, fmt_lsn, fsync_parent_dir};

pub struct CbmOutFile {
    file: File,
    dir: PathBuf,
    pub name: String,
    pub seq: u64,
    pub start_lsn: Lsn,
    pub size: u64,
}

impl CbmOutFile {
    /// Создать новый файл (seq, start, 0). Ошибка, если уже существует.
    pub fn create(dir: &Path, seq: u64, start_lsn: Lsn) -> Result<Self> {
        let name = format_cbm_name(seq, start_lsn, INVALID_LSN);
        let path = dir.join(&name);
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("create new CBM file {}", path.display()))?;
        let _ = fsync_parent_dir(&path);
        info!(
            "start next CBM file \"{}\", start LSN {}",
            name,
            fmt_lsn(start_lsn)
        );
        Ok(Self {
            file,
            dir: dir.to_path_buf(),
            name,
            seq,
            start_lsn,
            size: 0,
        })
    }

    /// Создать файл с явным именем (merged-вывод; в live-цепочку каталога
    /// такой файл не входит).
    pub fn create_named(dir: &Path, name: &str, start_lsn: Lsn) -> Result<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("could not create merge dest CBM file {}", path.display()))?;
        let _ = fsync_parent_dir(&path);
        Ok(Self {
            file,
            dir: dir.to_path_buf(),
            name: name.to_string(),
            seq: 0,
            start_lsn,
            size: 0,
        })
    }

    /// Открыть существующий открытый (end == 0) файл на дозапись.
    /// size — размер после валидации хвоста.
    pub fn open_existing(dir: &Path, meta: &CbmFileName, size: u64) -> Result<Self> {
        debug_assert_eq!(meta.end_lsn, INVALID_LSN);
        let path = dir.join(&meta.name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open CBM file {}", path.display()))?;
        info!("continue CBM file \"{}\", size {}", meta.name, size);
        Ok(Self {
            file,
            dir: dir.to_path_buf(),
            name: meta.name.clone(),
            seq: meta.seq,
            start_lsn: meta.start_lsn,
            size,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Записать страницу по текущему смещению (без fsync).
    pub fn write_page(&mut self, page: &[u8; CBM_PAGE_SIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.size))?;
        self.file.write_all(page).with_context(|| {
            format!(
                "could not write CBM file \"{}\", page offset {}",
                self.name, self.size
            )
        })?;
        self.size += CBM_PAGE_SIZE as u64;
        Ok(())
    }

    pub fn fsync(&self) -> Result<()> {
        self.file
            .sync_all()
            .with_context(|| format!("fsync CBM file \"{}\" failed", self.name))
    }

    /// Ротация: durable rename текущего файла в sealed-имя (end = end_lsn),
    /// затем открытие файла seq+1 со start = end_lsn.
    pub fn rotate(&mut self, end_lsn: Lsn) -> Result<()> {
        debug_assert!(self.start_lsn < end_lsn);
        let sealed = format_cbm_name(self.seq, self.start_lsn, end_lsn);
        durable_rename(&self.dir.join(&self.name), &self.dir.join(&sealed))
            .with_context(|| format!("rotate CBM file \"{}\"", self.name))?;
        info!("rotate CBM file \"{}\" -> \"{}\"", self.name, sealed);
        *self = CbmOutFile::create(&self.dir, self.seq + 1, end_lsn)?;
        Ok(())
    }
}

/// Общий flush хэша в выходной файл (писатель и merged-вывод): entries в
/// детерминированном порядке, страницы каждого по first_block (lifecycle
/// первыми); каждая страница штампуется окном батча [start_lsn, end_lsn],
/// последняя по файлу помечается is_last_in_batch; в конце fsync.
pub fn flush_hash(
    hash: &mut PageHash,
    out: &mut CbmOutFile,
    start_lsn: Lsn,
    end_lsn: Lsn,
) -> Result<()> {
    let mut remaining = hash.total_pages();
    for (_tag, pages) in hash.take_entries_sorted() {
        for mut page in pages {
            remaining -= 1;
            page.is_last = remaining == 0;
            page.start_lsn = start_lsn;
            page.end_lsn = end_lsn;
            debug!(
                "flush CBM page: {} first blkno {} page type {} truncate blkno {}",
                page.tag, page.first_block, page.page_type, page.trunc_block
            );
            let buf = page.encode();
            out.write_page(&buf)?;
            hash.recycle_page(page);
        }
    }
    out.fsync()?;
    Ok(())
}
