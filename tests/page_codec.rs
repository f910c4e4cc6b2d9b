use byteorder::{ByteOrder, LittleEndian};

use QuiverCBM::consts::{
    CBM_BLOCKS_PER_PAGE, CBM_PAGE_SIZE, INVALID_BLOCK, OFF_PAGE_CRC, PAGETYPE_DROP,
    PAGETYPE_MODIFY, PAGETYPE_TRUNCATE,
};
use QuiverCBM::page::bitmap::{clear_bit, or_into, set_bit, test_bit};
use QuiverCBM::page::{cbm_blkno_cmp, page_first_block, CbmBitmapIter, CbmPage, PageTag, RelNode};
use QuiverCBM::page::checksum::{page_stored_crc, page_verify_crc};

fn tag() -> PageTag {
    PageTag::new(RelNode::new(1663, 16384, 24576), 0)
}

// ---------- tests ----------

#[test]
fn encode_decode_roundtrip() {
    let mut page = CbmPage::new(tag(), 0);
    page.page_type = PAGETYPE_MODIFY;
    page.is_last = true;
    page.start_lsn = 0x100;
    page.end_lsn = 0x180;
    set_bit(&mut page.bitmap, 42);
    set_bit(&mut page.bitmap, 31999);

    let buf = page.encode();
    assert!(page_verify_crc(&buf), "encoded page must carry valid CRC");

    let decoded = CbmPage::decode(&buf).expect("decode");
    assert_eq!(decoded.tag, page.tag);
    assert_eq!(decoded.first_block, 0);
    assert_eq!(decoded.page_type, PAGETYPE_MODIFY);
    assert!(decoded.is_last);
    assert_eq!(decoded.start_lsn, 0x100);
    assert_eq!(decoded.end_lsn, 0x180);
    assert!(test_bit(&decoded.bitmap, 42));
    assert!(test_bit(&decoded.bitmap, 31999));
    assert!(!test_bit(&decoded.bitmap, 41));

    // повторный encode даёт те же байты
    let buf2 = decoded.encode();
    assert_eq!(buf[..], buf2[..], "re-encode must be byte-identical");
}

#[test]
fn crc_detects_corruption() {
    let mut page = CbmPage::new(tag(), 0);
    page.page_type = PAGETYPE_MODIFY;
    page.start_lsn = 0x100;
    page.end_lsn = 0x180;
    set_bit(&mut page.bitmap, 7);

    let mut buf = page.encode();
    assert!(page_verify_crc(&buf));

    // порча одного байта payload'а
    buf[CBM_PAGE_SIZE - 1] ^= 0xFF;
    assert!(!page_verify_crc(&buf));
    buf[CBM_PAGE_SIZE - 1] ^= 0xFF;
    assert!(page_verify_crc(&buf));

    // порча самого поля CRC
    let stored = page_stored_crc(&buf);
    LittleEndian::write_u32(&mut buf[OFF_PAGE_CRC..OFF_PAGE_CRC + 4], stored ^ 1);
    assert!(!page_verify_crc(&buf));
}

#[test]
fn header_validation_rules() {
    // корректная битовая страница
    let mut ok = CbmPage::new(tag(), 0);
    ok.page_type = PAGETYPE_MODIFY;
    ok.start_lsn = 0x100;
    ok.end_lsn = 0x180;
    ok.validate_header().expect("valid modify page");

    // end <= start
    let mut bad = (*ok).clone();
    bad.end_lsn = bad.start_lsn;
    assert!(bad.validate_header().is_err(), "end <= start must fail");

    // невалидный RelNode
    let mut bad = (*ok).clone();
    bad.tag = PageTag::new(RelNode::new(0, 0, 0), 0);
    assert!(bad.validate_header().is_err(), "invalid relnode must fail");

    // валидный first_block при lifecycle-типе
    let mut bad = (*ok).clone();
    bad.page_type = PAGETYPE_DROP;
    assert!(
        bad.validate_header().is_err(),
        "bitmap page must be MODIFY only"
    );

    // невалидный first_block без lifecycle-флагов
    let mut bad = (*ok).clone();
    bad.first_block = INVALID_BLOCK;
    assert!(
        bad.validate_header().is_err(),
        "lifecycle page must carry a lifecycle flag"
    );

    // trunc_block без TRUNCATE
    let mut bad = (*ok).clone();
    bad.trunc_block = 10;
    assert!(bad.validate_header().is_err(), "stray trunc_block must fail");

    // TRUNCATE без trunc_block
    let mut bad = CbmPage::new(tag(), INVALID_BLOCK);
    bad.page_type = PAGETYPE_TRUNCATE;
    bad.start_lsn = 0x100;
    bad.end_lsn = 0x180;
    assert!(
        bad.validate_header().is_err(),
        "TRUNCATE without trunc_block must fail"
    );

    // корректная lifecycle-страница truncate
    bad.trunc_block = 64;
    bad.validate_header().expect("valid truncate page");
}

#[test]
fn bitmap_ops_and_iterator() {
    assert_eq!(page_first_block(0), 0);
    assert_eq!(page_first_block(42), 0);
    assert_eq!(page_first_block(CBM_BLOCKS_PER_PAGE), CBM_BLOCKS_PER_PAGE);
    assert_eq!(
        page_first_block(CBM_BLOCKS_PER_PAGE + 5),
        CBM_BLOCKS_PER_PAGE
    );

    let mut page = CbmPage::new(tag(), CBM_BLOCKS_PER_PAGE);
    // абсолютные номера второй страницы
    let base = CBM_BLOCKS_PER_PAGE;
    for blk in [base, base + 1, base + 8, base + 1000, base + CBM_BLOCKS_PER_PAGE - 1] {
        set_bit(&mut page.bitmap, blk);
    }
    assert!(test_bit(&page.bitmap, base + 8));
    clear_bit(&mut page.bitmap, base + 8);
    assert!(!test_bit(&page.bitmap, base + 8));

    let got: Vec<u32> =
        CbmBitmapIter::new(&page.bitmap, base, base + CBM_BLOCKS_PER_PAGE - 1).collect();
    assert_eq!(
        got,
        vec![base, base + 1, base + 1000, base + CBM_BLOCKS_PER_PAGE - 1]
    );
}

#[test]
fn blkno_cmp_orders_lifecycle_first() {
    use std::cmp::Ordering;
    assert_eq!(cbm_blkno_cmp(INVALID_BLOCK, 0), Ordering::Less);
    assert_eq!(cbm_blkno_cmp(0, INVALID_BLOCK), Ordering::Greater);
    assert_eq!(cbm_blkno_cmp(INVALID_BLOCK, INVALID_BLOCK), Ordering::Equal);
    assert_eq!(cbm_blkno_cmp(5, 7), Ordering::Less);
}

#[test]
fn bitmap_or_merge_randomized() {
    let mut rng = oorandom::Rand32::new(0xC0FFEE);

    let mut a = CbmPage::new(tag(), 0);
    let mut b = CbmPage::new(tag(), 0);
    let mut expected: Vec<u32> = Vec::new();

    for _ in 0..500 {
        let blk = rng.rand_range(0..CBM_BLOCKS_PER_PAGE);
        if rng.rand_range(0..2) == 0 {
            set_bit(&mut a.bitmap, blk);
        } else {
            set_bit(&mut b.bitmap, blk);
        }
        expected.push(blk);
    }
    expected.sort_unstable();
    expected.dedup();

    or_into(&mut a.bitmap, &b.bitmap);
    let got: Vec<u32> = CbmBitmapIter::new(&a.bitmap, 0, CBM_BLOCKS_PER_PAGE - 1).collect();
    assert_eq!(got, expected);
}
