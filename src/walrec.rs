//! walrec — модель записей WAL на входе CBM.
//!
//! Внешний ридер WAL отдаёт уже распарсенные записи: resource manager id,
//! info-биты, полезную нагрузку и список block refs. Здесь:
//! - классификация записи в тегированную сумму RecordKind;
//! - LE-кодеки полезных нагрузок (encode-хелперы — для хоста и тестов,
//!   строящих поток записей);
//! - трейт источника записей WalSource и VecWalSource для replay.
//!
//! Layout нагрузок (LE):
//! - xact commit/abort (включая prepared): [nrels u32] затем nrels раз
//!   [spc u32][db u32][rel u32][bucket i32][fork i32];
//! - smgr create:   [spc][db][rel][bucket][fork i32];
//! - smgr truncate: [spc][db][rel][bucket][blkno u32];
//! - dbase create/drop: [spc u32][db u32];
//! - tblspc create/drop: [spc u32];
//! - relmap update: [spc u32][db u32];
//! - heap2 logical newpage: [type u8][pad u8*3][spc][db][rel][bucket]
//!   [attid i32][offset u64][block_size u64];
//! - heap insert/delete/update, heap2 multi-insert: [flags u8] ...

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{Lsn, INVALID_LSN};
use crate::page::RelNode;

// ---------- resource manager ids ----------

pub const RM_XLOG_ID: u8 = 0;
pub const RM_XACT_ID: u8 = 1;
pub const RM_SMGR_ID: u8 = 2;
pub const RM_DBASE_ID: u8 = 4;
pub const RM_TBLSPC_ID: u8 = 5;
pub const RM_RELMAP_ID: u8 = 7;
pub const RM_HEAP2_ID: u8 = 9;
pub const RM_HEAP_ID: u8 = 10;

// Низший ниббл info зарезервирован ридером WAL.
pub const XLR_INFO_MASK: u8 = 0x0F;

pub const XLOG_XACT_COMMIT: u8 = 0x00;
pub const XLOG_XACT_ABORT: u8 = 0x20;
pub const XLOG_XACT_COMMIT_PREPARED: u8 = 0x30;
pub const XLOG_XACT_ABORT_PREPARED: u8 = 0x40;

pub const XLOG_SMGR_CREATE: u8 = 0x10;
pub const XLOG_SMGR_TRUNCATE: u8 = 0x20;

pub const XLOG_DBASE_CREATE: u8 = 0x00;
pub const XLOG_DBASE_DROP: u8 = 0x10;

pub const XLOG_TBLSPC_CREATE: u8 = 0x00;
pub const XLOG_TBLSPC_RELATIVE_CREATE: u8 = 0x10;
pub const XLOG_TBLSPC_DROP: u8 = 0x20;

pub const XLOG_RELMAP_UPDATE: u8 = 0x00;

pub const XLOG_HEAP_OPMASK: u8 = 0x70;
pub const XLOG_HEAP_INIT_PAGE: u8 = 0x80;
pub const XLOG_HEAP_INSERT: u8 = 0x00;
pub const XLOG_HEAP_DELETE: u8 = 0x10;
pub const XLOG_HEAP_UPDATE: u8 = 0x20;

pub const XLOG_HEAP2_MULTI_INSERT: u8 = 0x40;
pub const XLOG_HEAP2_LOGICAL_NEWPAGE: u8 = 0x60;

// Флаги heap-записей (первый байт data)
pub const HEAP_INSERT_ALL_VISIBLE_CLEARED: u8 = 0x01;
pub const HEAP_DELETE_ALL_VISIBLE_CLEARED: u8 = 0x01;
pub const HEAP_UPDATE_OLD_ALL_VISIBLE_CLEARED: u8 = 0x01;
pub const HEAP_UPDATE_NEW_ALL_VISIBLE_CLEARED: u8 = 0x02;

// Тип нагрузки LOGICAL_NEWPAGE
pub const COLUMN_STORE: u8 = 1;

// ---------- записи ----------

/// Ссылка записи на физический блок.
#[derive(Clone, Copy, Debug)]
pub struct BlockRef {
    pub rnode: RelNode,
    pub fork: i32,
    pub block: u32,
}

/// Распарсенная запись WAL, как её отдаёт внешний ридер.
#[derive(Clone, Debug)]
pub struct WalRecord {
    /// Начало записи.
    pub start_lsn: Lsn,
    /// Конец записи == начало следующей (уже нормализован ридером
    /// относительно границ страниц сегмента).
    pub end_lsn: Lsn,
    pub rmid: u8,
    pub info: u8,
    pub data: Vec<u8>,
    pub blocks: Vec<BlockRef>,
}

impl WalRecord {
    /// info без зарезервированного ниббла ридера.
    pub fn rec_info(&self) -> u8 {
        self.info & !XLR_INFO_MASK
    }
}

/// Источник записей WAL.
pub trait WalSource {
    /// Прочитать запись, начинающуюся не раньше start_lsn;
    /// INVALID_LSN — следующую по потоку. None — записей больше нет
    /// (или хвост ещё не дописан).
    fn read_record(&mut self, start_lsn: Lsn) -> Result<Option<WalRecord>>;
}

/// Replay-источник поверх готового списка записей (инструменты и тесты).
pub struct VecWalSource {
    records: Vec<WalRecord>,
    pos: usize,
}

impl VecWalSource {
    pub fn new(records: Vec<WalRecord>) -> Self {
        Self { records, pos: 0 }
    }
}

impl WalSource for VecWalSource {
    fn read_record(&mut self, start_lsn: Lsn) -> Result<Option<WalRecord>> {
        if start_lsn != INVALID_LSN {
            self.pos = self
                .records
                .iter()
                .position(|r| r.start_lsn >= start_lsn)
                .unwrap_or(self.records.len());
        }
        let rec = self.records.get(self.pos).cloned();
        if rec.is_some() {
            self.pos += 1;
        }
        Ok(rec)
    }
}

// ---------- классификация ----------

/// Классы записей, различаемые экстрактором. Block refs записи идут
/// отдельным каналом (WalRecord::blocks) независимо от класса.
#[derive(Clone, Debug)]
pub enum RecordKind {
    /// Завершение транзакции (commit/abort, в т.ч. prepared) со списком
    /// физически удаляемых (RelNode, fork).
    XactEnd { dropped: Vec<(RelNode, i32)> },
    SmgrCreate {
        rnode: RelNode,
        fork: i32,
    },
    SmgrTruncate {
        rnode: RelNode,
        block: u32,
    },
    DbCreate {
        spc: u32,
        db: u32,
    },
    DbDrop {
        spc: u32,
        db: u32,
    },
    TblspcCreate {
        spc: u32,
    },
    TblspcDrop {
        spc: u32,
    },
    RelmapUpdate {
        spc: u32,
        db: u32,
    },
    /// Колоночное хранилище: логическая новая страница, диапазон
    /// [offset, offset + block_size) в CU-юнитах.
    ColumnNewPage {
        rnode: RelNode,
        attid: i32,
        offset: u64,
        block_size: u64,
    },
    Other,
}

pub fn classify(rec: &WalRecord) -> Result<RecordKind> {
    let info = rec.rec_info();
    match rec.rmid {
        RM_XACT_ID => match info {
            XLOG_XACT_COMMIT | XLOG_XACT_ABORT | XLOG_XACT_COMMIT_PREPARED
            | XLOG_XACT_ABORT_PREPARED => Ok(RecordKind::XactEnd {
                dropped: decode_xact_rels(&rec.data)?,
            }),
            _ => Ok(RecordKind::Other),
        },
        RM_SMGR_ID => match info {
            XLOG_SMGR_CREATE => {
                let (rnode, fork) = decode_smgr_create(&rec.data)?;
                Ok(RecordKind::SmgrCreate { rnode, fork })
            }
            XLOG_SMGR_TRUNCATE => {
                let (rnode, block) = decode_smgr_truncate(&rec.data)?;
                Ok(RecordKind::SmgrTruncate { rnode, block })
            }
            _ => Ok(RecordKind::Other),
        },
        RM_DBASE_ID => {
            let (spc, db) = decode_db_record(&rec.data)?;
            match info {
                XLOG_DBASE_CREATE => Ok(RecordKind::DbCreate { spc, db }),
                XLOG_DBASE_DROP => Ok(RecordKind::DbDrop { spc, db }),
                _ => Ok(RecordKind::Other),
            }
        }
        RM_TBLSPC_ID => {
            let spc = decode_tblspc_record(&rec.data)?;
            match info {
                XLOG_TBLSPC_CREATE | XLOG_TBLSPC_RELATIVE_CREATE => {
                    Ok(RecordKind::TblspcCreate { spc })
                }
                XLOG_TBLSPC_DROP => Ok(RecordKind::TblspcDrop { spc }),
                _ => Ok(RecordKind::Other),
            }
        }
        RM_RELMAP_ID if info == XLOG_RELMAP_UPDATE => {
            let (spc, db) = decode_db_record(&rec.data)?;
            Ok(RecordKind::RelmapUpdate { spc, db })
        }
        RM_HEAP2_ID if info & XLOG_HEAP_OPMASK == XLOG_HEAP2_LOGICAL_NEWPAGE => {
            decode_column_newpage(&rec.data)
        }
        _ => Ok(RecordKind::Other),
    }
}

/// Индексы block refs, для heap-блоков которых запись гасит бит
/// all-visible в карте видимости. Для update старый кортеж — block ref 1,
/// новый — block ref 0.
pub fn vm_cleared_block_refs(rec: &WalRecord) -> Vec<usize> {
    let flags = match rec.data.first() {
        Some(f) => *f,
        None => return Vec::new(),
    };
    let op = rec.rec_info() & XLOG_HEAP_OPMASK;
    match rec.rmid {
        RM_HEAP_ID => match op {
            XLOG_HEAP_INSERT if flags & HEAP_INSERT_ALL_VISIBLE_CLEARED != 0 => vec![0],
            XLOG_HEAP_DELETE if flags & HEAP_DELETE_ALL_VISIBLE_CLEARED != 0 => vec![0],
            XLOG_HEAP_UPDATE => {
                let mut refs = Vec::new();
                if flags & HEAP_UPDATE_OLD_ALL_VISIBLE_CLEARED != 0 {
                    refs.push(1);
                }
                if flags & HEAP_UPDATE_NEW_ALL_VISIBLE_CLEARED != 0 {
                    refs.push(0);
                }
                refs
            }
            _ => Vec::new(),
        },
        RM_HEAP2_ID => match op {
            XLOG_HEAP2_MULTI_INSERT if flags & HEAP_INSERT_ALL_VISIBLE_CLEARED != 0 => {
                vec![0]
            }
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

// ---------- кодеки нагрузок ----------

fn need(data: &[u8], len: usize) -> Result<()> {
    if data.len() < len {
        return Err(anyhow!(
            "WAL record payload too short: {} < {}",
            data.len(),
            len
        ));
    }
    Ok(())
}

fn read_rnode(data: &[u8], off: usize) -> RelNode {
    RelNode {
        spc: LittleEndian::read_u32(&data[off..off + 4]),
        db: LittleEndian::read_u32(&data[off + 4..off + 8]),
        rel: LittleEndian::read_u32(&data[off + 8..off + 12]),
        bucket: LittleEndian::read_i32(&data[off + 12..off + 16]),
    }
}

fn push_rnode(out: &mut Vec<u8>, rnode: RelNode) {
    let mut b = [0u8; 16];
    LittleEndian::write_u32(&mut b[0..4], rnode.spc);
    LittleEndian::write_u32(&mut b[4..8], rnode.db);
    LittleEndian::write_u32(&mut b[8..12], rnode.rel);
    LittleEndian::write_i32(&mut b[12..16], rnode.bucket);
    out.extend_from_slice(&b);
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    LittleEndian::write_u32(&mut b, v);
    out.extend_from_slice(&b);
}

fn push_i32(out: &mut Vec<u8>, v: i32) {
    let mut b = [0u8; 4];
    LittleEndian::write_i32(&mut b, v);
    out.extend_from_slice(&b);
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    let mut b = [0u8; 8];
    LittleEndian::write_u64(&mut b, v);
    out.extend_from_slice(&b);
}

pub fn encode_xact_rels(rels: &[(RelNode, i32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + rels.len() * 20);
    push_u32(&mut out, rels.len() as u32);
    for (rnode, fork) in rels {
        push_rnode(&mut out, *rnode);
        push_i32(&mut out, *fork);
    }
    out
}

fn decode_xact_rels(data: &[u8]) -> Result<Vec<(RelNode, i32)>> {
    need(data, 4)?;
    let nrels = LittleEndian::read_u32(&data[0..4]) as usize;
    need(data, 4 + nrels * 20)?;
    let mut rels = Vec::with_capacity(nrels);
    for i in 0..nrels {
        let off = 4 + i * 20;
        let rnode = read_rnode(data, off);
        let fork = LittleEndian::read_i32(&data[off + 16..off + 20]);
        rels.push((rnode, fork));
    }
    Ok(rels)
}

pub fn encode_smgr_create(rnode: RelNode, fork: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    push_rnode(&mut out, rnode);
    push_i32(&mut out, fork);
    out
}

fn decode_smgr_create(data: &[u8]) -> Result<(RelNode, i32)> {
    need(data, 20)?;
    Ok((read_rnode(data, 0), LittleEndian::read_i32(&data[16..20])))
}

pub fn encode_smgr_truncate(rnode: RelNode, blkno: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    push_rnode(&mut out, rnode);
    push_u32(&mut out, blkno);
    out
}

fn decode_smgr_truncate(data: &[u8]) -> Result<(RelNode, u32)> {
    need(data, 20)?;
    Ok((read_rnode(data, 0), LittleEndian::read_u32(&data[16..20])))
}

pub fn encode_db_record(spc: u32, db: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    push_u32(&mut out, spc);
    push_u32(&mut out, db);
    out
}

fn decode_db_record(data: &[u8]) -> Result<(u32, u32)> {
    need(data, 8)?;
    Ok((
        LittleEndian::read_u32(&data[0..4]),
        LittleEndian::read_u32(&data[4..8]),
    ))
}

pub fn encode_tblspc_record(spc: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    push_u32(&mut out, spc);
    out
}

fn decode_tblspc_record(data: &[u8]) -> Result<u32> {
    need(data, 4)?;
    Ok(LittleEndian::read_u32(&data[0..4]))
}

pub fn encode_relmap_update(spc: u32, db: u32) -> Vec<u8> {
    encode_db_record(spc, db)
}

pub fn encode_column_newpage(rnode: RelNode, attid: i32, offset: u64, block_size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(40);
    out.push(COLUMN_STORE);
    out.extend_from_slice(&[0u8; 3]);
    push_rnode(&mut out, rnode);
    push_i32(&mut out, attid);
    push_u64(&mut out, offset);
    push_u64(&mut out, block_size);
    out
}

fn decode_column_newpage(data: &[u8]) -> Result<RecordKind> {
    need(data, 40)?;
    if data[0] != COLUMN_STORE {
        // строчные logical newpage не несут CU-диапазона
        return Ok(RecordKind::Other);
    }
    Ok(RecordKind::ColumnNewPage {
        rnode: read_rnode(data, 4),
        attid: LittleEndian::read_i32(&data[20..24]),
        offset: LittleEndian::read_u64(&data[24..32]),
        block_size: LittleEndian::read_u64(&data[32..40]),
    })
}

pub fn encode_heap_flags(flags: u8) -> Vec<u8> {
    vec![flags]
}
