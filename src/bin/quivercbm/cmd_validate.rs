use anyhow::{anyhow, Result};
use std::path::PathBuf;

use QuiverCBM::catalog::{cbm_dir_path, find_last_file};
use QuiverCBM::file::validate::validate_cbm_file;
use QuiverCBM::util::fmt_lsn;

pub fn exec(datadir: PathBuf, truncate: bool) -> Result<()> {
    let dir = cbm_dir_path(&datadir);

    let last = find_last_file(&dir)?
        .ok_or_else(|| anyhow!("no CBM files in {}", dir.display()))?;

    let (tracked, size) = validate_cbm_file(&dir, &last.name, truncate)?;
    println!(
        "{}: tracked={} valid_size={}{}",
        last.name,
        fmt_lsn(tracked),
        size,
        if truncate { " (truncated)" } else { "" }
    );

    Ok(())
}
