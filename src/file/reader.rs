//! file/reader — постраничный итератор по файлу CBM.
//!
//! Поведение:
//! - begin читает заголовок первой страницы и сверяет её batch_start_lsn
//!   со start LSN из имени файла;
//! - next проверяет CRC и инварианты цепочки: после last-in-batch страницы
//!   batch_start следующего батча равен batch_end предыдущего; внутри
//!   батча LSN-окно всех страниц совпадает;
//! - нулевое чтение на границе страницы — нормальный EOF; частичная
//!   страница — fatal (на merge-пути усечения нет).

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::consts::{
    Lsn, CBM_PAGE_HDR_SIZE, CBM_PAGE_SIZE, INVALID_LSN, OFF_END_LSN, OFF_START_LSN,
};
use crate::file::name::CbmFileName;
use crate::page::{page_verify_crc, CbmPage};
use crate::util::fmt_lsn;

#[derive(Debug)]
pub struct CbmPageIter {
    file: File,
    meta: CbmFileName,
    offset: u64,
    cur_start: Lsn,
    cur_end: Lsn,
    cur_is_last: bool,
}

impl CbmPageIter {
    /// Открыть файл и проверить стартовую точку цепочки.
    pub fn begin(dir: &Path, meta: &CbmFileName) -> Result<Self> {
        let path = dir.join(&meta.name);
        let mut file = OpenOptions::new()
            .read(true)
            .open(&path)
            .with_context(|| format!("open CBM file {} for merging", path.display()))?;

        let mut hdr = [0u8; CBM_PAGE_HDR_SIZE];
        file.read_exact(&mut hdr).with_context(|| {
            format!(
                "could not read the first page head of CBM file \"{}\"",
                meta.name
            )
        })?;

        let first_start = LittleEndian::read_u64(&hdr[OFF_START_LSN..OFF_START_LSN + 8]);
        if first_start != meta.start_lsn {
            return Err(anyhow!(
                "the first page start LSN {} of CBM file \"{}\" does not equal \
                 the file start LSN {}",
                fmt_lsn(first_start),
                meta.name,
                fmt_lsn(meta.start_lsn)
            ));
        }

        Ok(Self {
            file,
            meta: meta.clone(),
            offset: 0,
            cur_start: first_start,
            cur_end: LittleEndian::read_u64(&hdr[OFF_END_LSN..OFF_END_LSN + 8]),
            cur_is_last: false,
        })
    }

    /// Следующая страница; None на конце файла.
    pub fn next_page(&mut self) -> Result<Option<Box<CbmPage>>> {
        debug_assert_eq!(self.offset % CBM_PAGE_SIZE as u64, 0);

        let mut buf = [0u8; CBM_PAGE_SIZE];
        self.file.seek(SeekFrom::Start(self.offset))?;
        let n = read_full(&mut self.file, &mut buf)
            .with_context(|| format!("read CBM file \"{}\"", self.meta.name))?;
        if n == 0 {
            debug!(
                "reach end at page offset {} of CBM file \"{}\", stop reading",
                self.offset, self.meta.name
            );
            return Ok(None);
        }
        if n < CBM_PAGE_SIZE {
            return Err(anyhow!(
                "partial page read occurs at page offset {} of CBM file \"{}\"",
                self.offset,
                self.meta.name
            ));
        }

        if !page_verify_crc(&buf) {
            return Err(anyhow!(
                "corruption detected in CBM file \"{}\", page offset {}",
                self.meta.name,
                self.offset
            ));
        }

        let page = CbmPage::decode(&buf)?;

        let prev_start = self.cur_start;
        let prev_end = self.cur_end;
        let prev_is_last = self.cur_is_last;
        self.cur_start = page.start_lsn;
        self.cur_end = page.end_lsn;
        self.cur_is_last = page.is_last;

        if prev_is_last {
            if page.start_lsn != prev_end {
                return Err(anyhow!(
                    "LSN track gap detected in CBM file \"{}\", page offset {}: \
                     previous page batch end LSN is {}, current page batch start LSN is {}",
                    self.meta.name,
                    self.offset,
                    fmt_lsn(prev_end),
                    fmt_lsn(page.start_lsn)
                ));
            }
        } else if page.start_lsn != prev_start || page.end_lsn != prev_end {
            return Err(anyhow!(
                "inconsistent start/end LSN in one page batch for CBM file \"{}\" \
                 at page offset {}: previous page {}-{}, current page {}-{}",
                self.meta.name,
                self.offset,
                fmt_lsn(prev_start),
                fmt_lsn(prev_end),
                fmt_lsn(page.start_lsn),
                fmt_lsn(page.end_lsn)
            ));
        }

        self.offset += CBM_PAGE_SIZE as u64;
        Ok(Some(page))
    }

    /// LSN-окно последней прочитанной страницы.
    pub fn cur_end_lsn(&self) -> Lsn {
        self.cur_end
    }

    /// Проверка конца sealed-файла: последний прочитанный batch_end обязан
    /// совпасть с end LSN из имени файла.
    pub fn finish(&self) -> Result<()> {
        if self.meta.end_lsn != INVALID_LSN && self.cur_end != self.meta.end_lsn {
            return Err(anyhow!(
                "the last read page end LSN {} of CBM file \"{}\" does not equal \
                 the file end LSN {}",
                fmt_lsn(self.cur_end),
                self.meta.name,
                fmt_lsn(self.meta.end_lsn)
            ));
        }
        Ok(())
    }
}

/// Читать до заполнения буфера или EOF; вернуть число прочитанных байт.
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}
