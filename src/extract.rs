//! extract — извлечение изменений блоков из записей WAL.
//!
//! Чистая функция над (запись, page hash): block refs дают MODIFY-биты,
//! классифицированные записи — lifecycle-страницы и scoped-очистки,
//! heap-записи с флагами all-visible-cleared — побочные биты в форке
//! карты видимости.

use anyhow::Result;
use log::debug;

use crate::consts::{
    COL_FORK_BASE, CU_UNIT_SIZE, FSM_FORK, FSM_SLOTS_PER_PAGE, INVALID_BLOCK, INVALID_FORK,
    INVALID_OID, MAIN_FORK, PAGETYPE_CREATE, PAGETYPE_DROP, PAGETYPE_MODIFY, PAGETYPE_TRUNCATE,
    VM_FORK, VM_HEAPBLOCKS_PER_PAGE,
};
use crate::page::{PageTag, RelNode};
use crate::pagehash::PageHash;
use crate::util::fmt_lsn;
use crate::walrec::{classify, vm_cleared_block_refs, RecordKind, WalRecord};

/// Обработать одну запись: все изменения блоков и жизненного цикла
/// регистрируются в hash.
pub fn track_change_block(rec: &WalRecord, hash: &mut PageHash) -> Result<()> {
    debug!(
        "extract WAL: cur {}; end {}; rmid {}; info {:#04x}",
        fmt_lsn(rec.start_lsn),
        fmt_lsn(rec.end_lsn),
        rec.rmid,
        rec.info
    );

    if !rec.blocks.is_empty() {
        track_rel_page_modification(rec, hash);
    }

    match classify(rec)? {
        RecordKind::ColumnNewPage {
            rnode,
            attid,
            offset,
            block_size,
        } => track_cu_block_modification(hash, rnode, attid, offset, block_size),
        RecordKind::XactEnd { dropped } => track_rel_storage_drop(hash, &dropped),
        RecordKind::SmgrCreate { rnode, fork } => {
            if fork > INVALID_FORK {
                register_block_change_extended(
                    hash,
                    rnode,
                    fork,
                    INVALID_BLOCK,
                    PAGETYPE_CREATE,
                    INVALID_BLOCK,
                );
            }
        }
        RecordKind::SmgrTruncate { rnode, block } => track_rel_storage_truncate(hash, rnode, block),
        RecordKind::DbCreate { spc, db } => {
            let rnode = RelNode::new(spc, db, INVALID_OID);
            register_block_change_extended(
                hash,
                rnode,
                MAIN_FORK,
                INVALID_BLOCK,
                PAGETYPE_CREATE,
                INVALID_BLOCK,
            );
        }
        RecordKind::DbDrop { spc, db } => {
            let rnode = RelNode::new(spc, db, INVALID_OID);
            register_block_change_extended(
                hash,
                rnode,
                MAIN_FORK,
                INVALID_BLOCK,
                PAGETYPE_DROP,
                INVALID_BLOCK,
            );
        }
        RecordKind::TblspcCreate { spc } => {
            let rnode = RelNode::new(spc, INVALID_OID, INVALID_OID);
            register_block_change_extended(
                hash,
                rnode,
                MAIN_FORK,
                INVALID_BLOCK,
                PAGETYPE_CREATE,
                INVALID_BLOCK,
            );
        }
        RecordKind::TblspcDrop { spc } => {
            let rnode = RelNode::new(spc, INVALID_OID, INVALID_OID);
            register_block_change_extended(
                hash,
                rnode,
                MAIN_FORK,
                INVALID_BLOCK,
                PAGETYPE_DROP,
                INVALID_BLOCK,
            );
        }
        RecordKind::RelmapUpdate { spc, db } => {
            // Намеренно грубо: изменение relmap трактуем как «всё, что
            // адресуется через него в этой БД, могло измениться» —
            // Truncate(0) на db-scope Main.
            let rnode = RelNode::new(spc, db, INVALID_OID);
            register_block_change_extended(
                hash,
                rnode,
                MAIN_FORK,
                INVALID_BLOCK,
                PAGETYPE_TRUNCATE,
                0,
            );
        }
        RecordKind::Other => {}
    }

    // Гашение бита VM трекается отдельно от block refs записи.
    track_vm_page_modification(rec, hash);

    Ok(())
}

fn track_rel_page_modification(rec: &WalRecord, hash: &mut PageHash) {
    for bref in &rec.blocks {
        // не блочно-адресуемые форки не трекаются
        if bref.fork <= INVALID_FORK {
            continue;
        }
        debug!(
            "block ref: rel {} forknum {} blkno {}",
            bref.rnode, bref.fork, bref.block
        );
        register_block_change(hash, bref.rnode, bref.fork, bref.block);
    }
}

fn track_cu_block_modification(
    hash: &mut PageHash,
    rnode: RelNode,
    attid: i32,
    offset: u64,
    block_size: u64,
) {
    debug_assert!(offset % CU_UNIT_SIZE == 0);
    debug_assert!(block_size % CU_UNIT_SIZE == 0);

    let fork = COL_FORK_BASE + attid;
    for blk in (offset / CU_UNIT_SIZE)..((offset + block_size) / CU_UNIT_SIZE) {
        register_block_change(hash, rnode, fork, blk as u32);
    }
}

fn track_rel_storage_drop(hash: &mut PageHash, dropped: &[(RelNode, i32)]) {
    for &(rnode, fork) in dropped {
        if fork <= INVALID_FORK {
            continue;
        }
        register_block_change_extended(
            hash,
            rnode,
            fork,
            INVALID_BLOCK,
            PAGETYPE_DROP,
            INVALID_BLOCK,
        );
    }
}

fn track_rel_storage_truncate(hash: &mut PageHash, rnode: RelNode, blkno: u32) {
    register_block_change_extended(hash, rnode, MAIN_FORK, INVALID_BLOCK, PAGETYPE_TRUNCATE, blkno);

    let fsm_trunc = fsm_truncate_block(blkno);
    register_block_change_extended(
        hash,
        rnode,
        FSM_FORK,
        INVALID_BLOCK,
        PAGETYPE_TRUNCATE,
        fsm_trunc,
    );

    let vm_trunc = vm_truncate_block(blkno);
    register_block_change_extended(
        hash,
        rnode,
        VM_FORK,
        INVALID_BLOCK,
        PAGETYPE_TRUNCATE,
        vm_trunc,
    );
}

/// Блок карты видимости, накрывающий heap-блок.
#[inline]
pub fn vm_truncate_block(heap_blk: u32) -> u32 {
    heap_blk / VM_HEAPBLOCKS_PER_PAGE
}

/// Листовой блок FSM, накрывающий heap-блок.
#[inline]
pub fn fsm_truncate_block(heap_blk: u32) -> u32 {
    heap_blk / FSM_SLOTS_PER_PAGE
}

fn track_vm_page_modification(rec: &WalRecord, hash: &mut PageHash) {
    let mut prev_heap_blk = INVALID_BLOCK;
    for idx in vm_cleared_block_refs(rec) {
        let bref = match rec.blocks.get(idx) {
            Some(b) => *b,
            None => continue,
        };
        if bref.block == prev_heap_blk {
            continue;
        }
        prev_heap_blk = bref.block;
        debug_assert!(!bref.rnode.is_invalid());
        register_block_change(hash, bref.rnode, VM_FORK, bref.block / VM_HEAPBLOCKS_PER_PAGE);
    }
}

pub fn register_block_change(hash: &mut PageHash, rnode: RelNode, fork: i32, blk: u32) {
    register_block_change_extended(hash, rnode, fork, blk, PAGETYPE_MODIFY, INVALID_BLOCK);
}

/// Общая точка регистрации: drop/truncate сперва применяются к уже
/// накопленному содержимому hash, затем вставляется страница события,
/// чтобы оно пережило merge.
pub fn register_block_change_extended(
    hash: &mut PageHash,
    rnode: RelNode,
    fork: i32,
    blk: u32,
    page_type: u8,
    trunc_blk: u32,
) {
    debug_assert!(
        (blk != INVALID_BLOCK && page_type == PAGETYPE_MODIFY)
            || (blk == INVALID_BLOCK
                && page_type & (PAGETYPE_DROP | PAGETYPE_TRUNCATE | PAGETYPE_CREATE) != 0)
    );
    debug_assert!((trunc_blk != INVALID_BLOCK) == (page_type == PAGETYPE_TRUNCATE));

    let tag = PageTag::new(rnode, fork);

    if page_type == PAGETYPE_DROP {
        hash.remove(tag);
    } else if page_type == PAGETYPE_TRUNCATE
        && (fork == MAIN_FORK || fork == VM_FORK)
        && rnode.rel != INVALID_OID
    {
        debug_assert!(trunc_blk != INVALID_BLOCK);
        hash.truncate_tag(tag, trunc_blk);
    }

    hash.set_bitmap(tag, blk, page_type, trunc_blk);
}
