//! page — страница CBM: заголовок + битовая карта + CRC32C.
//!
//! Разделение по подмодулям:
//! - header   — RelNode/PageTag/CbmPage, кодек заголовка, валидация;
//! - checksum — CRC32C по page[OFF_IS_LAST..];
//! - bitmap   — операции над битовой картой и итератор по выставленным битам.

pub mod bitmap;
pub mod checksum;
pub mod header;

pub use bitmap::{cbm_blkno_cmp, page_first_block, CbmBitmapIter};
pub use checksum::{page_crc, page_update_crc, page_verify_crc};
pub use header::{CbmPage, PageTag, RelNode};
