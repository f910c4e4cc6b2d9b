#![allow(non_snake_case)]

// Базовые модули
pub mod config;
pub mod consts;
pub mod lock;
pub mod util;

// Страница и in-memory hash
pub mod page; // src/page/{mod,header,checksum,bitmap}.rs
pub mod pagehash;

// Физический слой и каталог
pub mod catalog;
pub mod file; // src/file/{mod,name,writer,reader,validate}.rs

// Поток записей WAL и экстрактор
pub mod extract;
pub mod walrec;

// Писатель, merge, хэндл движка
pub mod engine;
pub mod merge;
pub mod writer;

// Удобные реэкспорты
pub use config::CbmConfig;
pub use consts::Lsn;
pub use engine::CbmEngine;
pub use merge::{CbmArray, CbmArrayEntry};
pub use page::{CbmPage, PageTag, RelNode};
pub use walrec::{BlockRef, RecordKind, VecWalSource, WalRecord, WalSource};
pub use writer::{CbmWriter, ControlData};
