// Общие типы позиций WAL
pub type Lsn = u64;
pub const INVALID_LSN: Lsn = 0;

// Каталог CBM внутри datadir
pub const CBM_DIR: &str = "pg_cbm";
pub const LOCK_FILE: &str = "LOCK";

// Имена файлов:
// live/sealed: pg_xlog_{seq}_{startHi:08X}{startLo:08X}_{endHi:08X}{endLo:08X}.cbm
//   (end == 0, пока файл открыт на дозапись)
// merged:     pg_merged_xlog_{startHi:08X}{startLo:08X}_{endHi:08X}{endLo:08X}_{sec}-{usec}.cbm
pub const CBM_FILE_STEM: &str = "pg_xlog_";
pub const MERGED_FILE_STEM: &str = "pg_merged_xlog_";
pub const CBM_FILE_EXT: &str = ".cbm";

// Страница CBM (v1)
//
// Layout заголовка (LE, natural alignment):
// [page_crc u32]
// [is_last_in_batch u8]
// [page_type u8]        -- битовая маска {MODIFY, CREATE, DROP, TRUNCATE}
// [pad u16]
// [spc u32][db u32][rel u32][bucket i32]
// [fork i32]
// [first_block u32]
// [trunc_block u32]
// [pad u32]
// [batch_start_lsn u64]
// [batch_end_lsn u64]
//
// CRC32C считается по page[OFF_IS_LAST..PAGE_SIZE] и хранится в page_crc.
pub const CBM_PAGE_SIZE: usize = 4096;

pub const OFF_PAGE_CRC: usize = 0;
pub const OFF_IS_LAST: usize = 4;
pub const OFF_PAGE_TYPE: usize = 5;
pub const OFF_SPC: usize = 8;
pub const OFF_DB: usize = 12;
pub const OFF_REL: usize = 16;
pub const OFF_BUCKET: usize = 20;
pub const OFF_FORK: usize = 24;
pub const OFF_FIRST_BLOCK: usize = 28;
pub const OFF_TRUNC_BLOCK: usize = 32;
pub const OFF_START_LSN: usize = 40;
pub const OFF_END_LSN: usize = 48;

pub const CBM_PAGE_HDR_SIZE: usize = 56; // уже MAXALIGN(8)

pub const CBM_BITMAP_BYTES: usize = CBM_PAGE_SIZE - CBM_PAGE_HDR_SIZE;
pub const CBM_BLOCKS_PER_PAGE: u32 = (CBM_BITMAP_BYTES * 8) as u32;

// Типы страниц (битовая маска)
pub const PAGETYPE_MODIFY: u8 = 0x01;
pub const PAGETYPE_CREATE: u8 = 0x02;
pub const PAGETYPE_DROP: u8 = 0x04;
pub const PAGETYPE_TRUNCATE: u8 = 0x08;

// Сентинелы идентификаторов
pub const INVALID_OID: u32 = 0;
pub const INVALID_BLOCK: u32 = u32::MAX;
pub const INVALID_BUCKET: i32 = -1;

// Форки отношения
pub const INVALID_FORK: i32 = -1;
pub const MAIN_FORK: i32 = 0;
pub const FSM_FORK: i32 = 1;
pub const VM_FORK: i32 = 2;
pub const INIT_FORK: i32 = 3;
pub const MAX_FORK: i32 = INIT_FORK;

// Колоночные форки: fork = COL_FORK_BASE + attid
pub const COL_FORK_BASE: i32 = 4;

// CU-юнит колоночного хранилища: offset/blockSize в записях
// "logical new page" кратны ему, биты ставятся по одному на юнит.
pub const CU_UNIT_SIZE: u64 = 8;

// Геометрия страниц отслеживаемой БД (8 KiB heap-страницы):
// один бит VM на heap-блок, листовые слоты FSM.
pub const VM_HEAPBLOCKS_PER_PAGE: u32 = 65344;
pub const FSM_SLOTS_PER_PAGE: u32 = 4067;

// Пороги по умолчанию (переопределяются через CbmConfig)
pub const DEFAULT_MAX_CBM_FILE_SIZE: u64 = 8 * 1024 * 1024;
pub const DEFAULT_MAX_FREE_PAGES: usize = 1024;
