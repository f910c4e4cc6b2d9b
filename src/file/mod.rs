//! file — физический слой файлов CBM.
//!
//! Разделение по подмодулям:
//! - name     — грамматика имён (live/sealed/merged);
//! - writer   — append-only вывод страниц + ротация через durable rename;
//! - reader   — постраничный итератор с проверкой CRC и батч-цепочки;
//! - validate — восстановительная валидация хвоста (с опциональным
//!              усечением до последней валидной last-in-batch страницы).

pub mod name;
pub mod reader;
pub mod validate;
pub mod writer;

pub use name::{format_cbm_name, format_merged_name, parse_cbm_name, CbmFileName};
pub use reader::CbmPageIter;
pub use validate::validate_cbm_file;
pub use writer::{flush_hash, CbmOutFile};
