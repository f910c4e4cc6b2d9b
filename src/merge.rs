//! merge — объединение битовых карт по произвольному LSN-окну.
//!
//! Каталог выбирает и валидирует покрывающую цепочку файлов; страницы
//! проигрываются строго в порядке батчей (lifecycle поздних батчей
//! побеждает ранние модификации), внутри батча порядок безразличен —
//! биты объединяются монотонным OR. Результат: merged-файл тем же
//! кодеком страниц либо in-memory массив изменённых блоков по объектам.

use anyhow::{anyhow, Result};
use log::debug;
use serde::Serialize;
use std::path::Path;

use crate::catalog::get_and_validate_file_array;
use crate::consts::{
    Lsn, CBM_BLOCKS_PER_PAGE, INVALID_BLOCK, INVALID_LSN, INVALID_OID, MAIN_FORK,
    PAGETYPE_DROP, PAGETYPE_TRUNCATE, VM_FORK,
};
use crate::file::name::{format_merged_name, CbmFileName};
use crate::file::reader::CbmPageIter;
use crate::file::writer::{flush_hash, CbmOutFile};
use crate::page::{CbmBitmapIter, CbmPage, PageTag};
use crate::pagehash::PageHash;
use crate::util::{fmt_lsn, now_sec_usec};

/// Изменения одного объекта в merged-результате.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CbmArrayEntry {
    pub tag: PageTag,
    /// Битовая маска PAGETYPE_*.
    pub change_kind: u8,
    /// Валиден при change_kind & TRUNCATE.
    pub truncate_block: u32,
    /// Изменённые блоки по возрастанию.
    pub blocks: Vec<u32>,
}

/// Merged-результат окна [start_lsn, end_lsn].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CbmArray {
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
    pub entries: Vec<CbmArrayEntry>,
}

/// Построить merged-файл; возвращает его имя (в каталоге CBM).
pub fn get_merged_file(dir: &Path, start_lsn: Lsn, end_lsn: Lsn) -> Result<String> {
    let (mut hash, merge_start, merge_end) = get_merged_hash(dir, start_lsn, end_lsn)?;
    hash.log_contents();

    let (sec, usec) = now_sec_usec();
    let name = format_merged_name(merge_start, merge_end, sec, usec);
    let mut out = CbmOutFile::create_named(dir, &name, merge_start)?;
    flush_hash(&mut hash, &mut out, merge_start, merge_end)?;
    Ok(name)
}

/// Построить merged-массив: по каждому объекту отсортированный список
/// изменённых блоков, вид изменения и точка усечения.
pub fn get_merged_array(dir: &Path, start_lsn: Lsn, end_lsn: Lsn) -> Result<CbmArray> {
    let (mut hash, merge_start, merge_end) = get_merged_hash(dir, start_lsn, end_lsn)?;
    hash.log_contents();

    Ok(CbmArray {
        start_lsn: merge_start,
        end_lsn: merge_end,
        entries: convert_hash_into_array(&mut hash),
    })
}

fn get_merged_hash(dir: &Path, start_lsn: Lsn, end_lsn: Lsn) -> Result<(PageHash, Lsn, Lsn)> {
    let files = get_and_validate_file_array(dir, start_lsn, end_lsn)?;
    let mut hash = PageHash::for_merge();
    let (merge_start, merge_end) =
        merge_file_array_into_hash(dir, &files, start_lsn, end_lsn, &mut hash)?;
    Ok((hash, merge_start, merge_end))
}

fn merge_file_array_into_hash(
    dir: &Path,
    files: &[CbmFileName],
    start_lsn: Lsn,
    end_lsn: Lsn,
    hash: &mut PageHash,
) -> Result<(Lsn, Lsn)> {
    let mut merge_start = INVALID_LSN;
    let mut merge_end = INVALID_LSN;

    for (i, f) in files.iter().enumerate() {
        debug!("start iterating through CBM file \"{}\"", f.name);
        let mut iter = CbmPageIter::begin(dir, f)?;

        while let Some(page) = iter.next_page()? {
            // батчи, целиком лежащие до окна, пропускаются
            if page.end_lsn <= start_lsn {
                continue;
            }

            merge_page_into_hash(&page, hash)?;

            if page.is_last {
                if merge_start == INVALID_LSN && page.start_lsn <= start_lsn {
                    merge_start = page.start_lsn;
                }
                if merge_end == INVALID_LSN && end_lsn <= page.end_lsn {
                    merge_end = page.end_lsn;
                }
            }

            if merge_end != INVALID_LSN {
                break;
            }
        }

        if merge_end == INVALID_LSN {
            iter.finish()?;
        }

        if i == 0 && merge_start == INVALID_LSN {
            return Err(anyhow!(
                "could not find merge start point {} in CBM files",
                fmt_lsn(start_lsn)
            ));
        }

        if i == files.len() - 1 && merge_end == INVALID_LSN {
            merge_end = iter.cur_end_lsn();
            if merge_end < end_lsn {
                return Err(anyhow!(
                    "could not find merge end point {} in CBM files, the last cbm page \
                     ends at {}",
                    fmt_lsn(end_lsn),
                    fmt_lsn(merge_end)
                ));
            }
        }
    }

    Ok((merge_start, merge_end))
}

/// Проиграть одну страницу файла в merged-хэш: dummy пропускается,
/// заголовок валидируется, drop/truncate применяются к накопленному
/// содержимому, затем страница вливается.
fn merge_page_into_hash(page: &CbmPage, hash: &mut PageHash) -> Result<()> {
    if page.tag.is_dummy() {
        debug_assert!(page.first_block == INVALID_BLOCK);
        debug_assert!(page.is_last);
        debug!(
            "reach a dummy page for LSN range {} to {}, skip",
            fmt_lsn(page.start_lsn),
            fmt_lsn(page.end_lsn)
        );
        return Ok(());
    }

    page.validate_header()?;

    if page.page_type & PAGETYPE_DROP != 0 {
        debug_assert!(page.first_block == INVALID_BLOCK);
        hash.remove(page.tag);
    }

    if page.page_type & PAGETYPE_TRUNCATE != 0 {
        debug_assert!(page.first_block == INVALID_BLOCK);
        debug_assert!(page.trunc_block != INVALID_BLOCK);

        if (page.tag.fork == MAIN_FORK || page.tag.fork == VM_FORK)
            && page.tag.rnode.rel != INVALID_OID
        {
            hash.truncate_tag(page.tag, page.trunc_block);
        }
    }

    hash.merge_page(page);
    Ok(())
}

fn convert_hash_into_array(hash: &mut PageHash) -> Vec<CbmArrayEntry> {
    let mut entries = Vec::new();

    for (tag, pages) in hash.take_entries_sorted() {
        let mut entry = CbmArrayEntry {
            tag,
            change_kind: 0,
            truncate_block: INVALID_BLOCK,
            blocks: Vec::new(),
        };

        for page in pages {
            entry.change_kind |= page.page_type;

            if page.first_block == INVALID_BLOCK {
                if page.page_type & PAGETYPE_TRUNCATE != 0 {
                    entry.truncate_block = page.trunc_block;
                }
                continue;
            }

            for blk in CbmBitmapIter::new(
                &page.bitmap,
                page.first_block,
                page.first_block + CBM_BLOCKS_PER_PAGE - 1,
            ) {
                entry.blocks.push(blk);
            }
        }

        entries.push(entry);
    }

    entries
}
