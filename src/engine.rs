//! engine — хэндл движка CBM.
//!
//! Явная структура вместо глобального состояния: регистр tracked LSN,
//! parse lock (он же хранит pending force-цель), latch писателя и флаг
//! остановки. Хэндл шарится между хостом, писателем и читателями merge.

use anyhow::{anyhow, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::catalog::{cbm_dir_path, recycle_files};
use crate::config::CbmConfig;
use crate::consts::{Lsn, INVALID_LSN};
use crate::merge::{get_merged_array, get_merged_file, CbmArray};
use crate::util::fmt_lsn;
use crate::writer::CbmWriter;

/// Состояние под parse lock.
pub struct ParseState {
    /// Цель force-track; INVALID_LSN — не запрошена.
    pub pending_target: Lsn,
    /// Является ли цель границей записи WAL (обязательная точка останова).
    pub pending_is_rec_end: bool,
    /// Последняя завершённая force-цель (фактическая точка останова).
    pub latest_comp_target: Lsn,
    woken: bool,
}

pub struct CbmShared {
    tracked_lsn: AtomicU64,
    pub state: Mutex<ParseState>,
    latch: Condvar,
    pub shutdown: AtomicBool,
}

impl CbmShared {
    fn new() -> Self {
        Self {
            tracked_lsn: AtomicU64::new(INVALID_LSN),
            state: Mutex::new(ParseState {
                pending_target: INVALID_LSN,
                pending_is_rec_end: true,
                latest_comp_target: INVALID_LSN,
                woken: false,
            }),
            latch: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn tracked_lsn(&self) -> Lsn {
        self.tracked_lsn.load(Ordering::Acquire)
    }

    /// Публикуется писателем строго после fsync батча.
    pub fn set_tracked_lsn(&self, lsn: Lsn) {
        self.tracked_lsn.store(lsn, Ordering::Release);
    }

    /// Разбудить писателя (force-track, shutdown).
    pub fn wake(&self) {
        let mut st = self.state.lock().unwrap();
        st.woken = true;
        self.latch.notify_all();
    }

    /// Ожидание писателя между циклами: до пробуждения или таймаута.
    pub fn wait_latch(&self, timeout: Duration) {
        let mut st = self.state.lock().unwrap();
        if !st.woken {
            let (guard, _res) = self
                .latch
                .wait_timeout_while(st, timeout, |s| !s.woken)
                .unwrap();
            st = guard;
        }
        st.woken = false;
    }
}

/// Хэндл движка CBM для хоста.
pub struct CbmEngine {
    datadir: PathBuf,
    cbm_dir: PathBuf,
    cfg: CbmConfig,
    shared: Arc<CbmShared>,
}

impl CbmEngine {
    pub fn new(datadir: &Path, cfg: CbmConfig) -> Self {
        Self {
            datadir: datadir.to_path_buf(),
            cbm_dir: cbm_dir_path(datadir),
            cfg,
            shared: Arc::new(CbmShared::new()),
        }
    }

    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    pub fn cbm_dir(&self) -> &Path {
        &self.cbm_dir
    }

    pub fn config(&self) -> &CbmConfig {
        &self.cfg
    }

    pub fn shared(&self) -> Arc<CbmShared> {
        self.shared.clone()
    }

    pub fn tracked_lsn(&self) -> Lsn {
        self.shared.tracked_lsn()
    }

    /// Создать писателя, привязанного к этому хэндлу (берёт эксклюзивный
    /// LOCK в каталоге CBM).
    pub fn writer(&self) -> Result<CbmWriter> {
        CbmWriter::new(self)
    }

    pub fn request_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.wake();
    }

    /// Однократный force-track: добиться tracked LSN не меньше target_lsn.
    ///
    /// Публикует цель под parse lock (если другая ещё не опубликована),
    /// будит писателя и ждёт с шагом ~1 мс. Возвращает достигнутый tracked
    /// LSN; INVALID_LSN по таймауту. is_rec_end сообщает, обязана ли цель
    /// быть границей записи WAL.
    pub fn force_track_once(
        &self,
        target_lsn: Lsn,
        timeout_ms: i64,
        wait: bool,
        is_rec_end: bool,
    ) -> Result<Lsn> {
        if !self.cfg.enable_tracking {
            return Err(anyhow!(
                "could not force tracking cbm because cbm tracking function is not enabled"
            ));
        }
        if wait && timeout_ms < 0 {
            return Err(anyhow!("negative timeout for force track cbm"));
        }

        let mut end = self.shared.tracked_lsn();
        if target_lsn <= end {
            return Ok(end);
        }

        {
            let mut st = self.shared.state.lock().unwrap();
            end = self.shared.tracked_lsn();
            if target_lsn <= end {
                return Ok(end);
            }
            if st.pending_target == INVALID_LSN {
                st.pending_target = target_lsn;
                st.pending_is_rec_end = is_rec_end;
                debug!("published force CBM track target {}", fmt_lsn(target_lsn));
            }
            st.woken = true;
        }
        // будим вне guard'a, чтобы писатель сразу взял parse lock
        self.shared.latch.notify_all();

        let mut remaining = timeout_ms;
        loop {
            end = self.shared.tracked_lsn();
            if target_lsn <= end {
                break;
            }
            if !wait || remaining <= 0 {
                return Ok(INVALID_LSN);
            }
            std::thread::sleep(Duration::from_millis(1));
            remaining -= 1;
        }
        Ok(end)
    }

    /// Merged-файл по окну [start_lsn, end_lsn]; возвращает имя файла.
    pub fn merged_file(&self, start_lsn: Lsn, end_lsn: Lsn) -> Result<String> {
        get_merged_file(&self.cbm_dir, start_lsn, end_lsn)
    }

    /// Merged-массив по окну [start_lsn, end_lsn].
    pub fn merged_array(&self, start_lsn: Lsn, end_lsn: Lsn) -> Result<CbmArray> {
        get_merged_array(&self.cbm_dir, start_lsn, end_lsn)
    }

    /// Удалить файлы, полностью отработанные до target_lsn; вернуть
    /// безопасную границу.
    pub fn recycle(&self, target_lsn: Lsn) -> Result<Lsn> {
        recycle_files(&self.cbm_dir, target_lsn)
    }
}
