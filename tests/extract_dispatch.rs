use QuiverCBM::consts::{
    COL_FORK_BASE, FSM_FORK, INIT_FORK, INVALID_BLOCK, MAIN_FORK, PAGETYPE_CREATE,
    PAGETYPE_DROP, PAGETYPE_MODIFY, PAGETYPE_TRUNCATE, VM_FORK, VM_HEAPBLOCKS_PER_PAGE,
};
use QuiverCBM::extract::{fsm_truncate_block, track_change_block, vm_truncate_block};
use QuiverCBM::page::bitmap::test_bit;
use QuiverCBM::page::{CbmPage, PageTag};
use QuiverCBM::pagehash::PageHash;
use QuiverCBM::walrec::{
    encode_column_newpage, encode_db_record, encode_heap_flags, encode_smgr_create,
    encode_smgr_truncate, encode_tblspc_record, encode_xact_rels, BlockRef, WalRecord,
    HEAP_INSERT_ALL_VISIBLE_CLEARED, HEAP_UPDATE_NEW_ALL_VISIBLE_CLEARED,
    HEAP_UPDATE_OLD_ALL_VISIBLE_CLEARED, RM_DBASE_ID, RM_HEAP2_ID, RM_HEAP_ID, RM_SMGR_ID,
    RM_TBLSPC_ID, RM_XACT_ID, XLOG_DBASE_DROP, XLOG_HEAP2_LOGICAL_NEWPAGE, XLOG_HEAP_INSERT,
    XLOG_HEAP_UPDATE, XLOG_SMGR_CREATE, XLOG_SMGR_TRUNCATE, XLOG_XACT_COMMIT,
};
use QuiverCBM::RelNode;

// ---------- helpers ----------

fn rel() -> RelNode {
    RelNode::new(1663, 16384, 24576)
}

fn rec(rmid: u8, info: u8, data: Vec<u8>, blocks: Vec<BlockRef>) -> WalRecord {
    WalRecord {
        start_lsn: 0x100,
        end_lsn: 0x180,
        rmid,
        info,
        data,
        blocks,
    }
}

fn bref(rnode: RelNode, fork: i32, block: u32) -> BlockRef {
    BlockRef { rnode, fork, block }
}

/// Снять содержимое hash в упорядоченный вид для проверок.
fn drain(hash: &mut PageHash) -> Vec<(PageTag, Vec<Box<CbmPage>>)> {
    hash.take_entries_sorted()
}

fn find<'a>(
    entries: &'a [(PageTag, Vec<Box<CbmPage>>)],
    tag: PageTag,
) -> &'a [Box<CbmPage>] {
    &entries
        .iter()
        .find(|(t, _)| *t == tag)
        .unwrap_or_else(|| panic!("no entry for {tag}"))
        .1
}

// ---------- tests ----------

#[test]
fn block_refs_register_modify_bits() {
    let mut hash = PageHash::for_writer();
    let r = rec(
        RM_HEAP_ID,
        XLOG_HEAP_INSERT,
        encode_heap_flags(0),
        vec![bref(rel(), MAIN_FORK, 42), bref(rel(), FSM_FORK, 7)],
    );
    track_change_block(&r, &mut hash).expect("track");

    let entries = drain(&mut hash);
    assert_eq!(entries.len(), 2);

    let main = find(&entries, PageTag::new(rel(), MAIN_FORK));
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].page_type, PAGETYPE_MODIFY);
    assert!(test_bit(&main[0].bitmap, 42));

    let fsm = find(&entries, PageTag::new(rel(), FSM_FORK));
    assert!(test_bit(&fsm[0].bitmap, 7));
}

#[test]
fn invalid_fork_refs_are_ignored() {
    let mut hash = PageHash::for_writer();
    let r = rec(
        RM_HEAP_ID,
        XLOG_HEAP_INSERT,
        encode_heap_flags(0),
        vec![bref(rel(), -1, 42)],
    );
    track_change_block(&r, &mut hash).expect("track");
    assert!(hash.is_empty(), "non-block-addressable forks are not tracked");
}

#[test]
fn insert_with_avc_flag_sets_vm_bit() {
    let mut hash = PageHash::for_writer();
    let heap_blk = VM_HEAPBLOCKS_PER_PAGE + 3; // второй блок VM
    let r = rec(
        RM_HEAP_ID,
        XLOG_HEAP_INSERT,
        encode_heap_flags(HEAP_INSERT_ALL_VISIBLE_CLEARED),
        vec![bref(rel(), MAIN_FORK, heap_blk)],
    );
    track_change_block(&r, &mut hash).expect("track");

    let entries = drain(&mut hash);
    let vm = find(&entries, PageTag::new(rel(), VM_FORK));
    assert!(
        test_bit(&vm[0].bitmap, 1),
        "VM bit must cover the heap block's map page"
    );
}

#[test]
fn update_with_both_avc_flags_sets_both_vm_bits() {
    let mut hash = PageHash::for_writer();
    // block ref 0 — новая страница кортежа, block ref 1 — старая
    let new_blk = 0;
    let old_blk = VM_HEAPBLOCKS_PER_PAGE; // другой блок VM
    let r = rec(
        RM_HEAP_ID,
        XLOG_HEAP_UPDATE,
        encode_heap_flags(
            HEAP_UPDATE_OLD_ALL_VISIBLE_CLEARED | HEAP_UPDATE_NEW_ALL_VISIBLE_CLEARED,
        ),
        vec![bref(rel(), MAIN_FORK, new_blk), bref(rel(), MAIN_FORK, old_blk)],
    );
    track_change_block(&r, &mut hash).expect("track");

    let entries = drain(&mut hash);
    let vm = find(&entries, PageTag::new(rel(), VM_FORK));
    assert!(test_bit(&vm[0].bitmap, 0), "new tuple's VM page");
    assert!(test_bit(&vm[0].bitmap, 1), "old tuple's VM page");
}

#[test]
fn smgr_create_emits_lifecycle_page() {
    let mut hash = PageHash::for_writer();
    let r = rec(
        RM_SMGR_ID,
        XLOG_SMGR_CREATE,
        encode_smgr_create(rel(), MAIN_FORK),
        Vec::new(),
    );
    track_change_block(&r, &mut hash).expect("track");

    let entries = drain(&mut hash);
    let main = find(&entries, PageTag::new(rel(), MAIN_FORK));
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].first_block, INVALID_BLOCK);
    assert_eq!(main[0].page_type, PAGETYPE_CREATE);
}

#[test]
fn smgr_truncate_derives_fsm_and_vm_points() {
    let mut hash = PageHash::for_writer();
    let trunc_blk = 200_000;
    let r = rec(
        RM_SMGR_ID,
        XLOG_SMGR_TRUNCATE,
        encode_smgr_truncate(rel(), trunc_blk),
        Vec::new(),
    );
    track_change_block(&r, &mut hash).expect("track");

    let entries = drain(&mut hash);

    let main = find(&entries, PageTag::new(rel(), MAIN_FORK));
    assert_eq!(main[0].page_type, PAGETYPE_TRUNCATE);
    assert_eq!(main[0].trunc_block, trunc_blk);

    let fsm = find(&entries, PageTag::new(rel(), FSM_FORK));
    assert_eq!(fsm[0].trunc_block, fsm_truncate_block(trunc_blk));

    let vm = find(&entries, PageTag::new(rel(), VM_FORK));
    assert_eq!(vm[0].trunc_block, vm_truncate_block(trunc_blk));
    assert_eq!(vm[0].trunc_block, trunc_blk / VM_HEAPBLOCKS_PER_PAGE);
}

#[test]
fn truncate_trims_accumulated_bits_in_place() {
    let mut hash = PageHash::for_writer();

    // накопленные модификации: биты 10 и 70000 (вторая страница)
    let r = rec(
        RM_HEAP_ID,
        XLOG_HEAP_INSERT,
        encode_heap_flags(0),
        vec![bref(rel(), MAIN_FORK, 10), bref(rel(), MAIN_FORK, 70_000)],
    );
    track_change_block(&r, &mut hash).expect("track bits");

    let r = rec(
        RM_SMGR_ID,
        XLOG_SMGR_TRUNCATE,
        encode_smgr_truncate(rel(), 20),
        Vec::new(),
    );
    track_change_block(&r, &mut hash).expect("track truncate");

    let entries = drain(&mut hash);
    let main = find(&entries, PageTag::new(rel(), MAIN_FORK));

    // lifecycle-страница + пограничная страница с уцелевшим битом 10;
    // страница с битом 70000 выброшена целиком
    assert_eq!(main.len(), 2);
    assert_eq!(main[0].first_block, INVALID_BLOCK, "lifecycle sorts first");
    assert_eq!(main[0].trunc_block, 20);
    assert_eq!(main[1].first_block, 0);
    assert!(test_bit(&main[1].bitmap, 10));
    assert!(!test_bit(&main[1].bitmap, 21));
}

#[test]
fn xact_drop_removes_sibling_forks() {
    let mut hash = PageHash::for_writer();

    // биты во всех форках отношения
    let r = rec(
        RM_HEAP_ID,
        XLOG_HEAP_INSERT,
        encode_heap_flags(0),
        vec![
            bref(rel(), MAIN_FORK, 1),
            bref(rel(), FSM_FORK, 2),
            bref(rel(), VM_FORK, 3),
            bref(rel(), INIT_FORK, 4),
        ],
    );
    track_change_block(&r, &mut hash).expect("track bits");

    let r = rec(
        RM_XACT_ID,
        XLOG_XACT_COMMIT,
        encode_xact_rels(&[(rel(), MAIN_FORK)]),
        Vec::new(),
    );
    track_change_block(&r, &mut hash).expect("track drop");

    let entries = drain(&mut hash);
    assert_eq!(entries.len(), 1, "drop of Main erases sibling fork entries");
    let main = find(&entries, PageTag::new(rel(), MAIN_FORK));
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].page_type, PAGETYPE_DROP);
    assert_eq!(main[0].first_block, INVALID_BLOCK);
}

#[test]
fn db_drop_purges_database_scope_only() {
    let mut hash = PageHash::for_writer();

    let other_db = RelNode::new(1663, 999, 111);
    let r = rec(
        RM_HEAP_ID,
        XLOG_HEAP_INSERT,
        encode_heap_flags(0),
        vec![
            bref(rel(), MAIN_FORK, 1),
            bref(RelNode::new(1663, 16384, 777), MAIN_FORK, 2),
            bref(other_db, MAIN_FORK, 3),
        ],
    );
    track_change_block(&r, &mut hash).expect("track bits");

    let r = rec(
        RM_DBASE_ID,
        XLOG_DBASE_DROP,
        encode_db_record(1663, 16384),
        Vec::new(),
    );
    track_change_block(&r, &mut hash).expect("track db drop");

    let entries = drain(&mut hash);
    // остаются: rel из другой БД и db-scope drop-страница
    assert_eq!(entries.len(), 2);
    let other = find(&entries, PageTag::new(other_db, MAIN_FORK));
    assert!(test_bit(&other[0].bitmap, 3));
    let scope = find(
        &entries,
        PageTag::new(RelNode::new(1663, 16384, 0), MAIN_FORK),
    );
    assert_eq!(scope[0].page_type, PAGETYPE_DROP);
}

#[test]
fn tblspc_create_registers_scope_entry() {
    let mut hash = PageHash::for_writer();
    let r = rec(
        RM_TBLSPC_ID,
        0x00, // XLOG_TBLSPC_CREATE
        encode_tblspc_record(1663),
        Vec::new(),
    );
    track_change_block(&r, &mut hash).expect("track");

    let entries = drain(&mut hash);
    let scope = find(&entries, PageTag::new(RelNode::new(1663, 0, 0), MAIN_FORK));
    assert_eq!(scope[0].page_type, PAGETYPE_CREATE);
}

#[test]
fn column_newpage_marks_cu_units() {
    let mut hash = PageHash::for_writer();
    let r = rec(
        RM_HEAP2_ID,
        XLOG_HEAP2_LOGICAL_NEWPAGE,
        encode_column_newpage(rel(), 2, 16, 24),
        Vec::new(),
    );
    track_change_block(&r, &mut hash).expect("track");

    let entries = drain(&mut hash);
    let col = find(&entries, PageTag::new(rel(), COL_FORK_BASE + 2));
    // юниты 2, 3, 4 (offset 16 / 8 .. (16 + 24) / 8)
    for blk in [2u32, 3, 4] {
        assert!(test_bit(&col[0].bitmap, blk), "unit {blk} must be set");
    }
    assert!(!test_bit(&col[0].bitmap, 1));
    assert!(!test_bit(&col[0].bitmap, 5));
}
