use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use QuiverCBM::catalog::cbm_dir_path;
use QuiverCBM::consts::{
    Lsn, FSM_FORK, INVALID_BLOCK, MAIN_FORK, PAGETYPE_DROP, PAGETYPE_MODIFY,
    PAGETYPE_TRUNCATE, VM_FORK,
};
use QuiverCBM::file::name::format_cbm_name;
use QuiverCBM::file::writer::{flush_hash, CbmOutFile};
use QuiverCBM::merge::get_merged_array;
use QuiverCBM::page::bitmap::test_bit;
use QuiverCBM::page::{page_verify_crc, CbmPage, PageTag};
use QuiverCBM::pagehash::PageHash;
use QuiverCBM::walrec::{
    encode_heap_flags, encode_smgr_truncate, encode_xact_rels, BlockRef, VecWalSource,
    WalRecord, RM_HEAP_ID, RM_SMGR_ID, RM_XACT_ID, RM_XLOG_ID, XLOG_HEAP_INSERT,
    XLOG_SMGR_TRUNCATE, XLOG_XACT_COMMIT,
};
use QuiverCBM::{CbmConfig, CbmEngine, CbmWriter, ControlData, RelNode};

// ---------- helpers ----------

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("qcbmtest-merge-{prefix}-{pid}-{t}-{id}"))
}

struct TestCtl {
    redo: Lsn,
}

impl ControlData for TestCtl {
    fn checkpoint_redo(&self) -> Lsn {
        self.redo
    }
    fn timeline(&self) -> u32 {
        1
    }
}

fn rel() -> RelNode {
    RelNode::new(1663, 16384, 24576)
}

fn heap_insert(start: Lsn, end: Lsn, blks: &[u32]) -> WalRecord {
    WalRecord {
        start_lsn: start,
        end_lsn: end,
        rmid: RM_HEAP_ID,
        info: XLOG_HEAP_INSERT,
        data: encode_heap_flags(0),
        blocks: blks
            .iter()
            .map(|&b| BlockRef {
                rnode: rel(),
                fork: MAIN_FORK,
                block: b,
            })
            .collect(),
    }
}

fn smgr_truncate(start: Lsn, end: Lsn, blk: u32) -> WalRecord {
    WalRecord {
        start_lsn: start,
        end_lsn: end,
        rmid: RM_SMGR_ID,
        info: XLOG_SMGR_TRUNCATE,
        data: encode_smgr_truncate(rel(), blk),
        blocks: Vec::new(),
    }
}

fn xact_drop(start: Lsn, end: Lsn) -> WalRecord {
    WalRecord {
        start_lsn: start,
        end_lsn: end,
        rmid: RM_XACT_ID,
        info: XLOG_XACT_COMMIT,
        data: encode_xact_rels(&[(rel(), MAIN_FORK)]),
        blocks: Vec::new(),
    }
}

fn noop(start: Lsn, end: Lsn) -> WalRecord {
    WalRecord {
        start_lsn: start,
        end_lsn: end,
        rmid: RM_XLOG_ID,
        info: 0,
        data: Vec::new(),
        blocks: Vec::new(),
    }
}

fn run_cycle(engine: &CbmEngine, writer: &mut CbmWriter, end: Lsn, recs: Vec<WalRecord>) {
    let ctl = TestCtl { redo: end };
    let mut src = VecWalSource::new(recs);
    writer.follow_xlog(&ctl, &mut src).expect("writer cycle");
    assert_eq!(engine.tracked_lsn(), end);
}

// ---------- tests ----------

#[test]
fn truncate_then_modify() {
    let root = unique_root("trunc-modify");
    std::fs::create_dir_all(&root).expect("create root");

    let engine = CbmEngine::new(&root, CbmConfig::default());
    let mut writer = engine.writer().expect("writer");
    writer.track_init(true, 0x100, None).expect("track init");

    run_cycle(&engine, &mut writer, 0x180, vec![heap_insert(0x100, 0x180, &[100])]);
    run_cycle(&engine, &mut writer, 0x200, vec![smgr_truncate(0x180, 0x200, 64)]);
    run_cycle(&engine, &mut writer, 0x280, vec![heap_insert(0x200, 0x280, &[80])]);

    let merged = engine.merged_array(0x100, 0x280).expect("merge");
    assert_eq!(merged.start_lsn, 0x100);
    assert_eq!(merged.end_lsn, 0x280);

    let main = merged
        .entries
        .iter()
        .find(|e| e.tag == PageTag::new(rel(), MAIN_FORK))
        .expect("main fork entry");
    assert_eq!(
        main.change_kind,
        PAGETYPE_TRUNCATE | PAGETYPE_MODIFY,
        "change kind must record the truncate"
    );
    assert_eq!(main.truncate_block, 64);
    assert_eq!(
        main.blocks,
        vec![80],
        "block 100 is dropped by the later truncate, block 80 survives"
    );

    // производные truncate-точки для FSM/VM
    let fsm = merged
        .entries
        .iter()
        .find(|e| e.tag == PageTag::new(rel(), FSM_FORK))
        .expect("fsm fork entry");
    assert_eq!(fsm.change_kind, PAGETYPE_TRUNCATE);
    assert!(fsm.blocks.is_empty());

    let vm = merged
        .entries
        .iter()
        .find(|e| e.tag == PageTag::new(rel(), VM_FORK))
        .expect("vm fork entry");
    assert_eq!(vm.change_kind, PAGETYPE_TRUNCATE);
    assert_eq!(vm.truncate_block, 0);
}

#[test]
fn drop_after_modify() {
    let root = unique_root("drop-modify");
    std::fs::create_dir_all(&root).expect("create root");

    let engine = CbmEngine::new(&root, CbmConfig::default());
    let mut writer = engine.writer().expect("writer");
    writer.track_init(true, 0x100, None).expect("track init");

    run_cycle(&engine, &mut writer, 0x180, vec![heap_insert(0x100, 0x180, &[5, 10])]);
    run_cycle(&engine, &mut writer, 0x200, vec![xact_drop(0x180, 0x200)]);

    let merged = engine.merged_array(0x100, 0x200).expect("merge");
    assert_eq!(merged.entries.len(), 1);
    let entry = &merged.entries[0];
    assert_eq!(entry.tag, PageTag::new(rel(), MAIN_FORK));
    assert_eq!(entry.change_kind, PAGETYPE_DROP);
    assert!(
        entry.blocks.is_empty(),
        "drop after modify must erase earlier block bits"
    );
}

#[test]
fn merge_is_idempotent() {
    let root = unique_root("idempotent");
    std::fs::create_dir_all(&root).expect("create root");

    let engine = CbmEngine::new(&root, CbmConfig::default());
    let mut writer = engine.writer().expect("writer");
    writer.track_init(true, 0x100, None).expect("track init");

    run_cycle(&engine, &mut writer, 0x180, vec![heap_insert(0x100, 0x180, &[1, 42, 7])]);
    run_cycle(&engine, &mut writer, 0x200, vec![smgr_truncate(0x180, 0x200, 40)]);

    let first = engine.merged_array(0x100, 0x200).expect("merge 1");
    let second = engine.merged_array(0x100, 0x200).expect("merge 2");
    assert_eq!(first, second, "repeated merges of the same window must agree");
}

#[test]
fn merge_subwindow_skips_earlier_batches() {
    let root = unique_root("subwindow");
    std::fs::create_dir_all(&root).expect("create root");

    let engine = CbmEngine::new(&root, CbmConfig::default());
    let mut writer = engine.writer().expect("writer");
    writer.track_init(true, 0x100, None).expect("track init");

    run_cycle(&engine, &mut writer, 0x180, vec![heap_insert(0x100, 0x180, &[1])]);
    run_cycle(&engine, &mut writer, 0x200, vec![heap_insert(0x180, 0x200, &[2])]);

    let merged = engine.merged_array(0x180, 0x200).expect("merge");
    assert_eq!(merged.start_lsn, 0x180);
    assert_eq!(merged.end_lsn, 0x200);
    assert_eq!(merged.entries.len(), 1);
    assert_eq!(merged.entries[0].blocks, vec![2]);
}

#[test]
fn dummy_batches_anchor_merge_endpoints() {
    let root = unique_root("dummy-merge");
    std::fs::create_dir_all(&root).expect("create root");

    let engine = CbmEngine::new(&root, CbmConfig::default());
    let mut writer = engine.writer().expect("writer");
    writer.track_init(true, 0x100, None).expect("track init");

    run_cycle(&engine, &mut writer, 0x180, vec![heap_insert(0x100, 0x180, &[1])]);
    run_cycle(&engine, &mut writer, 0x200, vec![noop(0x180, 0x200)]);

    let merged = engine.merged_array(0x100, 0x200).expect("merge");
    assert_eq!(merged.end_lsn, 0x200, "dummy batch closes the window");
    assert_eq!(merged.entries.len(), 1, "dummy pages carry no objects");
    assert_eq!(merged.entries[0].blocks, vec![1]);
}

#[test]
fn merged_file_roundtrip() {
    let root = unique_root("merged-file");
    std::fs::create_dir_all(&root).expect("create root");

    let engine = CbmEngine::new(&root, CbmConfig::default());
    let mut writer = engine.writer().expect("writer");
    writer.track_init(true, 0x100, None).expect("track init");

    run_cycle(&engine, &mut writer, 0x180, vec![heap_insert(0x100, 0x180, &[3])]);
    run_cycle(&engine, &mut writer, 0x200, vec![heap_insert(0x180, 0x200, &[9])]);

    let name = engine.merged_file(0x100, 0x200).expect("merged file");
    assert!(name.starts_with("pg_merged_xlog_"));

    let bytes = std::fs::read(cbm_dir_path(&root).join(&name)).expect("read merged");
    assert_eq!(bytes.len() % 4096, 0);
    let mut pages = Vec::new();
    for chunk in bytes.chunks(4096) {
        let mut buf = [0u8; 4096];
        buf.copy_from_slice(chunk);
        assert!(page_verify_crc(&buf));
        pages.push(CbmPage::decode(&buf).expect("decode"));
    }

    assert_eq!(pages.len(), 1);
    let page = &pages[0];
    assert_eq!(page.tag, PageTag::new(rel(), MAIN_FORK));
    assert_eq!(page.start_lsn, 0x100);
    assert_eq!(page.end_lsn, 0x200);
    assert!(page.is_last);
    assert!(test_bit(&page.bitmap, 3));
    assert!(test_bit(&page.bitmap, 9));

    // merged-артефакт не входит в живой каталог: merge повторяется
    let again = engine.merged_array(0x100, 0x200).expect("merge after merged file");
    assert_eq!(again.entries[0].blocks, vec![3, 9]);
}

#[test]
fn gap_between_files_is_fatal() {
    let root = unique_root("gap");
    let dir = cbm_dir_path(&root);
    std::fs::create_dir_all(&dir).expect("create dir");

    let tag = PageTag::new(rel(), MAIN_FORK);

    // файл 1: [0x100, 0x180]
    let mut hash = PageHash::for_writer();
    hash.set_bitmap(tag, 1, PAGETYPE_MODIFY, INVALID_BLOCK);
    let mut out = CbmOutFile::create(&dir, 1, 0x100).expect("file 1");
    flush_hash(&mut hash, &mut out, 0x100, 0x180).expect("flush 1");
    drop(out);
    std::fs::rename(
        dir.join(format_cbm_name(1, 0x100, 0)),
        dir.join(format_cbm_name(1, 0x100, 0x180)),
    )
    .expect("seal 1");

    // файл 2 начинается с 0x200: разрыв цепочки
    hash.set_bitmap(tag, 2, PAGETYPE_MODIFY, INVALID_BLOCK);
    let mut out = CbmOutFile::create(&dir, 2, 0x200).expect("file 2");
    flush_hash(&mut hash, &mut out, 0x200, 0x280).expect("flush 2");
    drop(out);
    std::fs::rename(
        dir.join(format_cbm_name(2, 0x200, 0)),
        dir.join(format_cbm_name(2, 0x200, 0x280)),
    )
    .expect("seal 2");

    let err = get_merged_array(&dir, 0x100, 0x280).expect_err("gap must be fatal");
    assert!(format!("{err:#}").contains("gap"), "unexpected error: {err:#}");
}

#[test]
fn uncovered_window_is_fatal() {
    let root = unique_root("uncovered");
    std::fs::create_dir_all(&root).expect("create root");

    let engine = CbmEngine::new(&root, CbmConfig::default());
    let mut writer = engine.writer().expect("writer");
    writer.track_init(true, 0x100, None).expect("track init");
    run_cycle(&engine, &mut writer, 0x180, vec![heap_insert(0x100, 0x180, &[1])]);

    // стартовая точка до первого файла
    let err = engine.merged_array(0x80, 0x180).expect_err("start not covered");
    assert!(format!("{err:#}").contains("start point"));

    // конечная точка дальше tracked LSN
    let err = engine.merged_array(0x100, 0x500).expect_err("end not covered");
    assert!(format!("{err:#}").contains("end point"));
}

#[test]
fn merged_file_name_is_not_a_chain_member() {
    let name = format_cbm_name(7, 0x100, 0x180);
    assert!(QuiverCBM::file::name::parse_cbm_name(&name).is_some());
    assert!(QuiverCBM::file::name::parse_cbm_name("pg_merged_xlog_0000000000000100_0000000000000180_10-20.cbm").is_none());
}
