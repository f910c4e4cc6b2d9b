use anyhow::Result;
use std::path::PathBuf;

use QuiverCBM::catalog::{cbm_dir_path, recycle_files};
use QuiverCBM::util::{fmt_lsn, parse_lsn};

pub fn exec(datadir: PathBuf, target: String) -> Result<()> {
    let dir = cbm_dir_path(&datadir);
    let target_lsn = parse_lsn(&target)?;

    let boundary = recycle_files(&dir, target_lsn)?;
    println!("recycled up to {}", fmt_lsn(boundary));

    Ok(())
}
