//! writer — цикл писателя CBM.
//!
//! Единственный поток-владелец живого page hash, открытого выходного
//! файла и free-list'а страниц. Один цикл (follow_xlog):
//! parse lock -> (reset?) -> окно парсинга из checkpoint redo и
//! force-цели -> экстрактор -> dummy при пустом окне -> flush + fsync
//! (+ ротация) -> публикация tracked LSN -> watermark free-list'а.

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{ensure_cbm_dir, find_last_file, remove_all_cbm_files};
use crate::config::CbmConfig;
use crate::consts::{
    Lsn, INVALID_BLOCK, INVALID_LSN, PAGETYPE_MODIFY,
};
use crate::engine::{CbmEngine, CbmShared};
use crate::extract::track_change_block;
use crate::file::name::{format_cbm_name, CbmFileName};
use crate::file::validate::validate_cbm_file;
use crate::file::writer::{flush_hash, CbmOutFile};
use crate::lock::{try_acquire_writer_lock, LockGuard};
use crate::page::PageTag;
use crate::pagehash::PageHash;
use crate::util::{durable_rename, fmt_lsn};
use crate::walrec::WalSource;

/// Данные control file, читаемые хостом под его собственным shared lock.
pub trait ControlData {
    /// redo LSN последнего чекпойнта.
    fn checkpoint_redo(&self) -> Lsn;
    /// Текущий timeline (диагностика; несколько timeline в одном потоке
    /// CBM не поддерживаются).
    fn timeline(&self) -> u32;
}

pub struct CbmWriter {
    cbm_dir: PathBuf,
    cfg: CbmConfig,
    shared: Arc<CbmShared>,
    out: Option<CbmOutFile>,
    start_lsn: Lsn,
    end_lsn: Lsn,
    hash: PageHash,
    needs_reset: bool,
    xlog_parse_failed: bool,
    first_cp_created: bool,
    _lock: LockGuard,
}

impl CbmWriter {
    pub fn new(engine: &CbmEngine) -> Result<Self> {
        ensure_cbm_dir(engine.cbm_dir())?;
        let lock = try_acquire_writer_lock(engine.cbm_dir())?;
        Ok(Self {
            cbm_dir: engine.cbm_dir().to_path_buf(),
            cfg: engine.config().clone(),
            shared: engine.shared(),
            out: None,
            start_lsn: INVALID_LSN,
            end_lsn: INVALID_LSN,
            hash: PageHash::for_writer(),
            needs_reset: false,
            xlog_parse_failed: false,
            first_cp_created: false,
            _lock: lock,
        })
    }

    /// Хост сигналит, что после восстановления создан первый чекпойнт:
    /// с этого момента end < start означает деструктивную
    /// инконсистентность, а не догоняющее восстановление.
    pub fn set_first_checkpoint_created(&mut self, created: bool) {
        self.first_cp_created = created;
    }

    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    /// Инициализация отслеживания: скан каталога, валидация хвоста
    /// последнего файла (с усечением), выбор стартовой точки и выходного
    /// файла. На старте процесса вызывается с startup_xlog = true и redo
    /// стартового чекпойнта; при reset внутри цикла — с control data.
    pub fn track_init(
        &mut self,
        startup_xlog: bool,
        startup_cp_redo: Lsn,
        ctl: Option<&dyn ControlData>,
    ) -> Result<()> {
        ensure_cbm_dir(&self.cbm_dir)?;

        let last = find_last_file(&self.cbm_dir)?;
        let from_scratch = last.is_none();

        let mut last_tracked = INVALID_LSN;
        let mut last_size = 0u64;

        if let Some(ref lastf) = last {
            info!(
                "last CBM file name \"{}\", seqnum {}, start LSN {}, end LSN {}",
                lastf.name,
                lastf.seq,
                fmt_lsn(lastf.start_lsn),
                fmt_lsn(lastf.end_lsn)
            );

            let (tracked, size) = validate_cbm_file(&self.cbm_dir, &lastf.name, true)?;
            info!(
                "last CBM file \"{}\": size {}, tracked LSN {}",
                lastf.name,
                size,
                fmt_lsn(tracked)
            );

            if tracked == INVALID_LSN {
                last_tracked = lastf.start_lsn;
            } else {
                debug_assert!(lastf.start_lsn < tracked);
                last_tracked = tracked;
            }
            last_size = size;
        }

        let track_start =
            self.init_track_start_lsn(startup_xlog, from_scratch, last_tracked, startup_cp_redo, ctl)?;

        self.init_start_file(from_scratch, track_start, last, last_tracked, last_size)?;

        self.start_lsn = track_start;
        self.end_lsn = track_start;
        Ok(())
    }

    fn init_track_start_lsn(
        &self,
        startup_xlog: bool,
        from_scratch: bool,
        last_tracked: Lsn,
        startup_cp_redo: Lsn,
        ctl: Option<&dyn ControlData>,
    ) -> Result<Lsn> {
        let track_start;

        if startup_xlog {
            debug_assert!(!self.xlog_parse_failed);
            track_start = if from_scratch {
                debug_assert!(last_tracked == INVALID_LSN);
                startup_cp_redo
            } else {
                last_tracked
            };
        } else {
            let ctl =
                ctl.ok_or_else(|| anyhow!("control data required for non-startup CBM track init"))?;
            let redo = ctl.checkpoint_redo();
            track_start = if from_scratch {
                redo
            } else if self.xlog_parse_failed && last_tracked < redo {
                redo
            } else {
                last_tracked
            };
            if last_tracked < track_start {
                warn!(
                    "last tracked LSN {} is smaller than CBM track start LSN {}. \
                     This may be caused by CBM file or xlog file corruption",
                    fmt_lsn(last_tracked),
                    fmt_lsn(track_start)
                );
            }
        }

        if track_start == INVALID_LSN {
            return Err(anyhow!("CBM track start LSN is invalid"));
        }
        self.shared.set_tracked_lsn(track_start);
        Ok(track_start)
    }

    /// Выбор выходного файла: продолжить последний, запечатать и начать
    /// следующий (файл полон либо его tracked LSN отстал от стартовой
    /// точки), пересоздать пустой, либо начать первый с нуля.
    fn init_start_file(
        &mut self,
        from_scratch: bool,
        track_start: Lsn,
        last: Option<CbmFileName>,
        last_tracked: Lsn,
        last_size: u64,
    ) -> Result<()> {
        let mut switch_file = false;
        if last_size >= self.cfg.max_file_size || (last_size != 0 && last_tracked < track_start) {
            switch_file = true;
        }

        let mut out_seq = match &last {
            None => 1,
            Some(l) => {
                if switch_file {
                    l.seq + 1
                } else {
                    l.seq
                }
            }
        };

        if let Some(ref lastf) = last {
            if switch_file {
                // запечатать прошлый файл его tracked LSN
                debug_assert!(lastf.start_lsn < last_tracked);
                let sealed = format_cbm_name(lastf.seq, lastf.start_lsn, last_tracked);
                if sealed != lastf.name {
                    durable_rename(&self.cbm_dir.join(&lastf.name), &self.cbm_dir.join(&sealed))?;
                }
            } else if last_size == 0 {
                // валидных батчей нет: пересоздаём файл под тем же seq
                switch_file = true;
                out_seq = lastf.seq;
                let path = self.cbm_dir.join(&lastf.name);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e)
                            .with_context(|| format!("could not remove file {}", path.display()))
                    }
                }
            } else {
                // возобновление: нормализовать имя в открытую форму (end = 0)
                let open_name = format_cbm_name(lastf.seq, lastf.start_lsn, INVALID_LSN);
                if open_name != lastf.name {
                    durable_rename(
                        &self.cbm_dir.join(&lastf.name),
                        &self.cbm_dir.join(&open_name),
                    )?;
                }
                let meta = CbmFileName {
                    name: open_name,
                    seq: lastf.seq,
                    start_lsn: lastf.start_lsn,
                    end_lsn: INVALID_LSN,
                };
                self.out = Some(CbmOutFile::open_existing(&self.cbm_dir, &meta, last_size)?);
                return Ok(());
            }
        }

        debug_assert!(from_scratch || switch_file);
        self.out = Some(CbmOutFile::create(&self.cbm_dir, out_seq, track_start)?);
        Ok(())
    }

    fn reset_state(&mut self) {
        if let Some(out) = self.out.take() {
            if let Err(e) = out.fsync() {
                warn!(
                    "fsync pending CBM file \"{}\" failed during reset: {}",
                    out.name, e
                );
            }
        }
        self.start_lsn = INVALID_LSN;
        self.end_lsn = INVALID_LSN;
        self.hash.release_arena();
    }

    /// Один цикл писателя. Ошибка оставляет needs_reset взведённым:
    /// следующий цикл сбросит transient-состояние и переинициализируется
    /// по каталогу.
    pub fn follow_xlog(&mut self, ctl: &dyn ControlData, src: &mut dyn WalSource) -> Result<()> {
        let shared = self.shared.clone();
        let mut st = shared.state.lock().unwrap(); // parse lock на весь цикл

        if self.needs_reset {
            self.reset_state();
            self.track_init(false, INVALID_LSN, Some(ctl))?;
            self.xlog_parse_failed = false;
        } else {
            self.needs_reset = true;
            let out = self
                .out
                .as_ref()
                .ok_or_else(|| anyhow!("CBM writer is not initialized (track_init not called)"))?;
            let path = out.path();
            if !path.exists() {
                return Err(anyhow!(
                    "failed to stat current cbm file {}",
                    path.display()
                ));
            }
        }

        let checkpoint_redo = ctl.checkpoint_redo();
        let timeline = ctl.timeline();

        let mut tmp_end = checkpoint_redo;
        let mut force_end = st.pending_target;
        let is_rec_end;
        if force_end != INVALID_LSN {
            if self.start_lsn < force_end {
                tmp_end = force_end;
                is_rec_end = st.pending_is_rec_end;
            } else {
                force_end = INVALID_LSN;
                is_rec_end = true;
                st.pending_target = INVALID_LSN;
                st.pending_is_rec_end = true;
            }
        } else {
            is_rec_end = true;
        }

        if tmp_end < self.start_lsn {
            if self.start_lsn == st.latest_comp_target {
                info!(
                    "the xlog LSN to be parsed {} is smaller than already tracked xlog LSN {}, \
                     due to previous force CBM track. Skip CBM track this time",
                    fmt_lsn(tmp_end),
                    fmt_lsn(self.start_lsn)
                );
                self.needs_reset = false;
                return Ok(());
            } else if !self.first_cp_created {
                info!(
                    "the xlog LSN to be parsed {} is smaller than already tracked xlog LSN {}. \
                     This may be caused by crash recovery or switchover/failover, before the \
                     first checkpoint following recovery has been created. Usually you can \
                     ignore this message; if xlog was modified manually, check that xlog \
                     records are consistent and uncorrupted",
                    fmt_lsn(tmp_end),
                    fmt_lsn(self.start_lsn)
                );
                self.needs_reset = false;
                return Ok(());
            } else {
                remove_all_cbm_files(&self.cbm_dir)?;
                return Err(anyhow!(
                    "the xlog LSN to be parsed {} is smaller than already tracked xlog LSN {} \
                     on timeline {}. This may be caused by xlog truncation, xlog corruption or \
                     PITR (multiple timelines in one CBM stream are not supported); inconsistent \
                     CBM files may have been created. All existing CBM files were removed and \
                     CBM tracking restarts from scratch",
                    fmt_lsn(tmp_end),
                    fmt_lsn(self.start_lsn),
                    timeline
                ));
            }
        } else if tmp_end == self.start_lsn {
            info!(
                "the xlog LSN to be parsed {} is equal to already tracked xlog LSN. \
                 Skip CBM track this time",
                fmt_lsn(tmp_end)
            );
            self.needs_reset = false;
            return Ok(());
        } else {
            info!(
                "do CBM track one time: {} -> {}",
                fmt_lsn(self.start_lsn),
                fmt_lsn(tmp_end)
            );
        }

        self.end_lsn = tmp_end;

        if self.parse_xlog(src, is_rec_end)? {
            info!(
                "found no valid xlog record from the already tracked xlog LSN {}. \
                 Skip CBM track this time",
                fmt_lsn(self.start_lsn)
            );
            self.needs_reset = false;
            return Ok(());
        }

        if self.hash.is_empty() {
            // пустое окно: dummy-страница держит LSN-цепочку без разрывов
            self.hash
                .set_bitmap(PageTag::DUMMY, INVALID_BLOCK, PAGETYPE_MODIFY, INVALID_BLOCK);
        }

        self.hash.log_contents();

        {
            let out = self
                .out
                .as_mut()
                .ok_or_else(|| anyhow!("CBM writer lost its output file"))?;
            flush_hash(&mut self.hash, out, self.start_lsn, self.end_lsn)?;
            if out.size >= self.cfg.max_file_size {
                out.rotate(self.end_lsn)?;
            }
        }

        // tracked LSN публикуется только после fsync
        self.start_lsn = self.end_lsn;
        shared.set_tracked_lsn(self.start_lsn);

        if force_end != INVALID_LSN {
            // фиксируем фактическую точку останова: при is_rec_end == false
            // цель могла не совпасть с границей записи
            debug_assert!(!is_rec_end || force_end == self.start_lsn);
            st.latest_comp_target = self.start_lsn;
            st.pending_target = INVALID_LSN;
            st.pending_is_rec_end = true;
        }

        if self.hash.free_len() > self.cfg.max_free_pages {
            self.hash.release_arena();
        }

        self.needs_reset = false;
        Ok(())
    }

    /// Прогнать экстрактор от start_lsn до end_lsn. true — ни одной записи
    /// прочитать не удалось (окно пропускается целиком).
    fn parse_xlog(&mut self, src: &mut dyn WalSource, is_rec_end: bool) -> Result<bool> {
        let mut start_point = self.start_lsn;
        let mut last_end = INVALID_LSN;

        loop {
            let rec = match src.read_record(start_point) {
                Ok(Some(r)) => r,
                other => {
                    let errmsg = match other {
                        Err(e) => format!(": {:#}", e),
                        _ => String::new(),
                    };
                    let errptr = if start_point == INVALID_LSN {
                        last_end
                    } else {
                        start_point
                    };

                    if !is_rec_end {
                        warn!(
                            "could not read WAL record at {}{}",
                            fmt_lsn(errptr),
                            errmsg
                        );
                        if start_point == INVALID_LSN {
                            info!(
                                "reach CBM parse end. The next xlog record starts at {}",
                                fmt_lsn(last_end)
                            );
                            self.end_lsn = last_end;
                            return Ok(false);
                        }
                        return Ok(true);
                    }

                    self.xlog_parse_failed = true;
                    return Err(anyhow!(
                        "could not read WAL record at {}{}",
                        fmt_lsn(errptr),
                        errmsg
                    ));
                }
            };

            track_change_block(&rec, &mut self.hash)?;
            last_end = rec.end_lsn;

            if self.end_lsn <= rec.end_lsn {
                info!(
                    "reach CBM parse end. The next xlog record starts at {}",
                    fmt_lsn(rec.end_lsn)
                );
                // при неграничной force-цели стартовая точка следующего
                // цикла обязана стать началом валидной записи
                if !is_rec_end {
                    self.end_lsn = rec.end_lsn;
                }
                return Ok(false);
            }

            start_point = INVALID_LSN;
        }
    }

    /// Цикл писателя до request_shutdown: follow_xlog + ожидание latch
    /// или интервала. Ошибки цикла логируются, состояние восстановится
    /// на следующей итерации через needs_reset.
    pub fn run(&mut self, ctl: &dyn ControlData, src: &mut dyn WalSource, interval: Duration) {
        while !self.shared.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.follow_xlog(ctl, src) {
                warn!("CBM writer cycle failed: {:#}", e);
            }
            if self.shared.shutdown.load(Ordering::Relaxed) {
                break;
            }
            self.shared.wait_latch(interval);
        }
    }
}
