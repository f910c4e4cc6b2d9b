//! page/header — заголовок страницы CBM и её in-memory представление.
//!
//! Кодек фиксированный (LE, смещения в consts.rs). Страница описывает
//! изменения одного (RelNode, fork) в LSN-окне одного батча:
//! - first_block валиден  -> битовая страница (page_type == MODIFY),
//!   бит i байта b покрывает блок first_block + 8*b + i;
//! - first_block невалиден -> lifecycle-страница (DROP/TRUNCATE/CREATE),
//!   битов нет, trunc_block валиден строго при TRUNCATE.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::fmt;

use crate::consts::{
    Lsn, CBM_BITMAP_BYTES, CBM_PAGE_HDR_SIZE, CBM_PAGE_SIZE, INVALID_BLOCK, INVALID_BUCKET,
    INVALID_FORK, INVALID_OID, OFF_BUCKET, OFF_DB, OFF_END_LSN, OFF_FIRST_BLOCK, OFF_FORK,
    OFF_IS_LAST, OFF_PAGE_TYPE, OFF_REL, OFF_SPC, OFF_START_LSN, OFF_TRUNC_BLOCK,
    PAGETYPE_CREATE, PAGETYPE_DROP, PAGETYPE_MODIFY, PAGETYPE_TRUNCATE,
};
use crate::page::checksum::page_update_crc;
use crate::util::fmt_lsn;

/// Физическая идентичность отношения: (tablespace, database, relation).
/// InvalidOid (0) в полях различает scope: per-rel / db-wide / tblspc-wide.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize)]
pub struct RelNode {
    pub spc: u32,
    pub db: u32,
    pub rel: u32,
    pub bucket: i32,
}

impl RelNode {
    pub const INVALID: RelNode = RelNode {
        spc: INVALID_OID,
        db: INVALID_OID,
        rel: INVALID_OID,
        bucket: INVALID_BUCKET,
    };

    pub fn new(spc: u32, db: u32, rel: u32) -> Self {
        Self {
            spc,
            db,
            rel,
            bucket: INVALID_BUCKET,
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.spc == INVALID_OID && self.db == INVALID_OID && self.rel == INVALID_OID
    }
}

impl fmt::Display for RelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.spc, self.db, self.rel)
    }
}

/// Первичный ключ page hash: (RelNode, fork).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize)]
pub struct PageTag {
    pub rnode: RelNode,
    pub fork: i32,
}

impl PageTag {
    /// Зарезервированный тег «окно распарсено, изменений нет».
    pub const DUMMY: PageTag = PageTag {
        rnode: RelNode::INVALID,
        fork: INVALID_FORK,
    };

    pub fn new(rnode: RelNode, fork: i32) -> Self {
        Self { rnode, fork }
    }

    pub fn is_dummy(&self) -> bool {
        *self == Self::DUMMY
    }
}

impl fmt::Display for PageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rel {} forknum {}", self.rnode, self.fork)
    }
}

/// Страница CBM в памяти. На диск уходит через encode(), с диска — decode().
#[derive(Clone, Debug)]
pub struct CbmPage {
    pub is_last: bool,
    pub page_type: u8,
    pub tag: PageTag,
    pub first_block: u32,
    pub trunc_block: u32,
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
    pub bitmap: [u8; CBM_BITMAP_BYTES],
}

impl CbmPage {
    pub fn new(tag: PageTag, first_block: u32) -> Box<CbmPage> {
        Box::new(CbmPage {
            is_last: false,
            page_type: 0,
            tag,
            first_block,
            trunc_block: INVALID_BLOCK,
            start_lsn: 0,
            end_lsn: 0,
            bitmap: [0u8; CBM_BITMAP_BYTES],
        })
    }

    /// Повторная инициализация страницы из free-list.
    pub fn reset(&mut self, tag: PageTag, first_block: u32) {
        self.is_last = false;
        self.page_type = 0;
        self.tag = tag;
        self.first_block = first_block;
        self.trunc_block = INVALID_BLOCK;
        self.start_lsn = 0;
        self.end_lsn = 0;
        self.bitmap.fill(0);
    }

    /// Сериализация в страничный буфер с расчётом CRC.
    pub fn encode(&self) -> [u8; CBM_PAGE_SIZE] {
        let mut buf = [0u8; CBM_PAGE_SIZE];
        buf[OFF_IS_LAST] = self.is_last as u8;
        buf[OFF_PAGE_TYPE] = self.page_type;
        LittleEndian::write_u32(&mut buf[OFF_SPC..OFF_SPC + 4], self.tag.rnode.spc);
        LittleEndian::write_u32(&mut buf[OFF_DB..OFF_DB + 4], self.tag.rnode.db);
        LittleEndian::write_u32(&mut buf[OFF_REL..OFF_REL + 4], self.tag.rnode.rel);
        LittleEndian::write_i32(&mut buf[OFF_BUCKET..OFF_BUCKET + 4], self.tag.rnode.bucket);
        LittleEndian::write_i32(&mut buf[OFF_FORK..OFF_FORK + 4], self.tag.fork);
        LittleEndian::write_u32(
            &mut buf[OFF_FIRST_BLOCK..OFF_FIRST_BLOCK + 4],
            self.first_block,
        );
        LittleEndian::write_u32(
            &mut buf[OFF_TRUNC_BLOCK..OFF_TRUNC_BLOCK + 4],
            self.trunc_block,
        );
        LittleEndian::write_u64(&mut buf[OFF_START_LSN..OFF_START_LSN + 8], self.start_lsn);
        LittleEndian::write_u64(&mut buf[OFF_END_LSN..OFF_END_LSN + 8], self.end_lsn);
        buf[CBM_PAGE_HDR_SIZE..].copy_from_slice(&self.bitmap);
        page_update_crc(&mut buf);
        buf
    }

    /// Десериализация страничного буфера. CRC и валидность заголовка
    /// проверяются отдельно (page_verify_crc / validate_header).
    pub fn decode(buf: &[u8]) -> Result<Box<CbmPage>> {
        if buf.len() != CBM_PAGE_SIZE {
            return Err(anyhow!(
                "CBM page buffer size {} != {}",
                buf.len(),
                CBM_PAGE_SIZE
            ));
        }
        let rnode = RelNode {
            spc: LittleEndian::read_u32(&buf[OFF_SPC..OFF_SPC + 4]),
            db: LittleEndian::read_u32(&buf[OFF_DB..OFF_DB + 4]),
            rel: LittleEndian::read_u32(&buf[OFF_REL..OFF_REL + 4]),
            bucket: LittleEndian::read_i32(&buf[OFF_BUCKET..OFF_BUCKET + 4]),
        };
        let mut page = CbmPage::new(
            PageTag::new(rnode, LittleEndian::read_i32(&buf[OFF_FORK..OFF_FORK + 4])),
            LittleEndian::read_u32(&buf[OFF_FIRST_BLOCK..OFF_FIRST_BLOCK + 4]),
        );
        page.is_last = buf[OFF_IS_LAST] != 0;
        page.page_type = buf[OFF_PAGE_TYPE];
        page.trunc_block = LittleEndian::read_u32(&buf[OFF_TRUNC_BLOCK..OFF_TRUNC_BLOCK + 4]);
        page.start_lsn = LittleEndian::read_u64(&buf[OFF_START_LSN..OFF_START_LSN + 8]);
        page.end_lsn = LittleEndian::read_u64(&buf[OFF_END_LSN..OFF_END_LSN + 8]);
        page.bitmap.copy_from_slice(&buf[CBM_PAGE_HDR_SIZE..]);
        Ok(page)
    }

    /// Проверка согласованности заголовка. Dummy-страницы проверяются
    /// вызывающей стороной до валидации (их RelNode намеренно невалиден).
    pub fn validate_header(&self) -> Result<()> {
        let first_valid = self.first_block != INVALID_BLOCK;
        let trunc_valid = self.trunc_block != INVALID_BLOCK;
        let lifecycle =
            self.page_type & (PAGETYPE_DROP | PAGETYPE_TRUNCATE | PAGETYPE_CREATE) != 0;

        let bad = self.end_lsn <= self.start_lsn
            || self.tag.rnode.is_invalid()
            || (first_valid && self.page_type != PAGETYPE_MODIFY)
            || (!first_valid && !lifecycle)
            || (trunc_valid && self.page_type & PAGETYPE_TRUNCATE == 0)
            || (!trunc_valid && self.page_type & PAGETYPE_TRUNCATE != 0);

        if bad {
            return Err(anyhow!(
                "invalid CBM page header: {} first blkno {} page type {} truncate blkno {} \
                 batch {}-{}",
                self.tag,
                self.first_block,
                self.page_type,
                self.trunc_block,
                fmt_lsn(self.start_lsn),
                fmt_lsn(self.end_lsn)
            ));
        }
        Ok(())
    }
}
