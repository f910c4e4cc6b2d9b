//! pagehash — in-memory индекс страниц CBM по (RelNode, fork).
//!
//! Каждый entry держит вектор страниц (голова = самая горячая, с
//! move-to-front при попадании); страницы различаются по first_block,
//! lifecycle-страницы живут под first_block = INVALID_BLOCK.
//!
//! Free-list: писатель возвращает отданные на диск страницы в пул и
//! переиспользует их; merge-хэш пул не ведёт (страницы просто
//! освобождаются). Пул ограничивается watermark'ом снаружи (release_arena).

use log::debug;
use std::collections::HashMap;

use crate::consts::{
    CBM_BLOCKS_PER_PAGE, FSM_FORK, INVALID_BLOCK, INVALID_OID, MAIN_FORK, MAX_FORK,
    PAGETYPE_TRUNCATE,
};
use crate::page::bitmap::{cbm_blkno_cmp, clear_bit, or_into, page_first_block, set_bit, test_bit};
use crate::page::{CbmPage, PageTag};

pub struct HashEntry {
    pub pages: Vec<Box<CbmPage>>,
}

pub struct PageHash {
    entries: HashMap<PageTag, HashEntry>,
    total_pages: u64,
    free: Vec<Box<CbmPage>>,
    recycle: bool,
}

impl PageHash {
    /// Хэш писателя: страницы после flush возвращаются в пул.
    pub fn for_writer() -> Self {
        Self::new(true)
    }

    /// Хэш merge: без пула, страницы освобождаются сразу.
    pub fn for_merge() -> Self {
        Self::new(false)
    }

    fn new(recycle: bool) -> Self {
        Self {
            entries: HashMap::new(),
            total_pages: 0,
            free: Vec::new(),
            recycle,
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    pub fn is_empty(&self) -> bool {
        self.total_pages == 0
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Сбросить всё: entries, счётчик, пул. Используется при превышении
    /// watermark'а free-list и при reset писателя.
    pub fn release_arena(&mut self) {
        self.entries.clear();
        self.total_pages = 0;
        self.free.clear();
    }

    /// Вернуть страницу в пул (или освободить, если пул не ведётся).
    pub fn recycle_page(&mut self, page: Box<CbmPage>) {
        if self.recycle {
            self.free.push(page);
        }
    }

    fn alloc_page(&mut self, tag: PageTag, first_block: u32) -> Box<CbmPage> {
        match self.free.pop() {
            Some(mut p) => {
                p.reset(tag, first_block);
                p
            }
            None => CbmPage::new(tag, first_block),
        }
    }

    /// Отметить изменение blk (или lifecycle-событие при blk == INVALID_BLOCK)
    /// для тега. Страница ищется по first_block с MRU-переупорядочиванием,
    /// при отсутствии создаётся и вставляется в голову.
    pub fn set_bitmap(&mut self, tag: PageTag, blk: u32, page_type: u8, trunc_blk: u32) {
        let first = if blk == INVALID_BLOCK {
            INVALID_BLOCK
        } else {
            page_first_block(blk)
        };

        if let Some(entry) = self.entries.get_mut(&tag) {
            if let Some(pos) = entry.pages.iter().position(|p| p.first_block == first) {
                let mut page = entry.pages.remove(pos);
                apply_bits(&mut page, blk, page_type, trunc_blk);
                entry.pages.insert(0, page);
                return;
            }
        }

        let mut page = self.alloc_page(tag, first);
        apply_bits(&mut page, blk, page_type, trunc_blk);
        debug!(
            "create new CBM page: {} first blkno {} page type {} truncate blkno {}",
            tag, first, page.page_type, page.trunc_block
        );
        self.entries
            .entry(tag)
            .or_insert_with(|| HashEntry { pages: Vec::new() })
            .pages
            .insert(0, page);
        self.total_pages += 1;
    }

    /// Влить прочитанную с диска страницу: найденная по (tag, first_block)
    /// страница объединяется (OR битов, union флагов, trunc_block от новой),
    /// иначе вставляется копия.
    pub fn merge_page(&mut self, src: &CbmPage) {
        let entry = self
            .entries
            .entry(src.tag)
            .or_insert_with(|| HashEntry { pages: Vec::new() });

        if let Some(pos) = entry
            .pages
            .iter()
            .position(|p| p.first_block == src.first_block)
        {
            let mut page = entry.pages.remove(pos);
            page.page_type |= src.page_type;
            if src.trunc_block != INVALID_BLOCK {
                debug_assert!(src.page_type & PAGETYPE_TRUNCATE != 0);
                page.trunc_block = src.trunc_block;
            }
            if src.first_block != INVALID_BLOCK {
                or_into(&mut page.bitmap, &src.bitmap);
            }
            entry.pages.insert(0, page);
            return;
        }

        entry.pages.insert(0, Box::new(src.clone()));
        self.total_pages += 1;
    }

    /// Удаление по scope тега: per-rel (плюс остальные форки при Main),
    /// db-wide или tablespace-wide.
    pub fn remove(&mut self, tag: PageTag) {
        debug_assert!(tag.rnode.spc != INVALID_OID);

        if tag.rnode.rel != INVALID_OID {
            self.remove_entry(tag, false);
            if tag.fork == MAIN_FORK {
                self.remove_rest_forks(tag);
            }
        } else if tag.rnode.db != INVALID_OID {
            self.remove_db(tag.rnode.spc, tag.rnode.db);
        } else {
            self.remove_tblspc(tag.rnode.spc);
        }
    }

    /// Освободить все страницы entry; сам entry опционально удаляется
    /// (остаётся пустым, когда прямо за remove последует вставка
    /// lifecycle-страницы того же тега).
    pub fn remove_entry(&mut self, tag: PageTag, remove_entry: bool) {
        let pages = match self.entries.get_mut(&tag) {
            Some(e) => std::mem::take(&mut e.pages),
            None => return,
        };
        if !pages.is_empty() {
            debug!("remove all cbm pages of {} ({} pages)", tag, pages.len());
        }
        self.total_pages -= pages.len() as u64;
        for p in pages {
            self.recycle_page(p);
        }
        if remove_entry {
            self.entries.remove(&tag);
        }
    }

    fn remove_rest_forks(&mut self, tag: PageTag) {
        for fork in FSM_FORK..=MAX_FORK {
            self.remove_entry(PageTag::new(tag.rnode, fork), true);
        }
    }

    pub fn remove_db(&mut self, spc: u32, db: u32) {
        debug_assert!(spc != INVALID_OID && db != INVALID_OID);
        let tags: Vec<PageTag> = self
            .entries
            .keys()
            .filter(|t| t.rnode.spc == spc && t.rnode.db == db)
            .copied()
            .collect();
        for tag in tags {
            self.remove_entry(tag, true);
        }
    }

    pub fn remove_tblspc(&mut self, spc: u32) {
        debug_assert!(spc != INVALID_OID);
        let tags: Vec<PageTag> = self
            .entries
            .keys()
            .filter(|t| t.rnode.spc == spc)
            .copied()
            .collect();
        for tag in tags {
            self.remove_entry(tag, true);
        }
    }

    /// Обрезка тега до trunc_blk блоков: страницы целиком выше границы
    /// выбрасываются; пограничная страница либо чистится по битам
    /// [trunc_blk, first + CBM_BLOCKS_PER_PAGE), если ниже границы остались
    /// выставленные биты, либо тоже выбрасывается.
    pub fn truncate_tag(&mut self, tag: PageTag, trunc_blk: u32) {
        let res_first = if trunc_blk == 0 {
            INVALID_BLOCK
        } else {
            page_first_block(trunc_blk - 1)
        };

        let pages = match self.entries.get_mut(&tag) {
            Some(e) => std::mem::take(&mut e.pages),
            None => return,
        };

        debug!(
            "truncate cbm pages of {} to {} blocks ({} pages before)",
            tag,
            trunc_blk,
            pages.len()
        );

        let mut kept: Vec<Box<CbmPage>> = Vec::with_capacity(pages.len());
        let mut dropped: Vec<Box<CbmPage>> = Vec::new();

        for mut page in pages {
            if page.first_block == INVALID_BLOCK {
                kept.push(page);
                continue;
            }
            match cbm_blkno_cmp(page.first_block, res_first) {
                std::cmp::Ordering::Less => kept.push(page),
                std::cmp::Ordering::Greater => dropped.push(page),
                std::cmp::Ordering::Equal => {
                    // пограничная страница: остались ли биты ниже границы?
                    let mut reserve = false;
                    for blk in page.first_block..trunc_blk {
                        if test_bit(&page.bitmap, blk) {
                            reserve = true;
                            break;
                        }
                    }
                    if reserve {
                        for blk in trunc_blk..page.first_block + CBM_BLOCKS_PER_PAGE {
                            clear_bit(&mut page.bitmap, blk);
                        }
                        kept.push(page);
                    } else {
                        dropped.push(page);
                    }
                }
            }
        }

        self.total_pages -= dropped.len() as u64;
        for p in dropped {
            self.recycle_page(p);
        }
        if let Some(e) = self.entries.get_mut(&tag) {
            e.pages = kept;
        }
    }

    /// Забрать все entries в детерминированном порядке (по тегу), страницы
    /// каждого — по first_block (lifecycle первыми). Пустые entries
    /// пропускаются. Хэш после вызова пуст (пул сохраняется).
    pub fn take_entries_sorted(&mut self) -> Vec<(PageTag, Vec<Box<CbmPage>>)> {
        let mut out: Vec<(PageTag, Vec<Box<CbmPage>>)> = self
            .entries
            .drain()
            .filter(|(_, e)| !e.pages.is_empty())
            .map(|(tag, mut e)| {
                e.pages
                    .sort_by(|a, b| cbm_blkno_cmp(a.first_block, b.first_block));
                (tag, e.pages)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        self.total_pages = 0;
        out
    }

    /// Отладочный дамп содержимого (перед flush/convert).
    pub fn log_contents(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        for (tag, entry) in self.entries.iter() {
            for p in entry.pages.iter() {
                debug!(
                    "CBM page: {} first blkno {} page type {} truncate blkno {}",
                    tag, p.first_block, p.page_type, p.trunc_block
                );
            }
        }
    }
}

/// Применить изменение к странице: union флагов, trunc_block при
/// TRUNCATE, бит блока при валидном blk.
fn apply_bits(page: &mut CbmPage, blk: u32, page_type: u8, trunc_blk: u32) {
    page.page_type |= page_type;
    if trunc_blk != INVALID_BLOCK {
        debug_assert!(page_type == PAGETYPE_TRUNCATE);
        page.trunc_block = trunc_blk;
    }
    if blk == INVALID_BLOCK {
        return;
    }
    set_bit(&mut page.bitmap, blk);
}
