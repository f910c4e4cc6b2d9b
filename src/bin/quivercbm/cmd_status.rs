use anyhow::Result;
use std::path::PathBuf;

use QuiverCBM::catalog::{cbm_dir_path, find_last_file, get_file_array};
use QuiverCBM::consts::INVALID_LSN;
use QuiverCBM::file::validate::validate_cbm_file;
use QuiverCBM::util::fmt_lsn;

pub fn exec(datadir: PathBuf) -> Result<()> {
    let dir = cbm_dir_path(&datadir);

    let files = get_file_array(&dir, INVALID_LSN, u64::MAX, true)?;
    if files.is_empty() {
        println!("no CBM files in {}", dir.display());
        return Ok(());
    }

    for f in &files {
        let state = if f.end_lsn == INVALID_LSN {
            "open"
        } else {
            "sealed"
        };
        println!(
            "{}  seq={} start={} end={} ({})",
            f.name,
            f.seq,
            fmt_lsn(f.start_lsn),
            fmt_lsn(f.end_lsn),
            state
        );
    }

    if let Some(last) = find_last_file(&dir)? {
        let (tracked, size) = validate_cbm_file(&dir, &last.name, false)?;
        println!(
            "last file: {} tracked={} valid_size={}",
            last.name,
            fmt_lsn(tracked),
            size
        );
    }

    Ok(())
}
