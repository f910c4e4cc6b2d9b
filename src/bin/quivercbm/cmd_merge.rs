use anyhow::Result;
use std::path::PathBuf;

use QuiverCBM::catalog::cbm_dir_path;
use QuiverCBM::merge::{get_merged_array, get_merged_file};
use QuiverCBM::util::parse_lsn;

pub fn exec(datadir: PathBuf, start: String, end: String, array: bool) -> Result<()> {
    let dir = cbm_dir_path(&datadir);
    let start_lsn = parse_lsn(&start)?;
    let end_lsn = parse_lsn(&end)?;

    if array {
        let merged = get_merged_array(&dir, start_lsn, end_lsn)?;
        println!("{}", serde_json::to_string_pretty(&merged)?);
    } else {
        let name = get_merged_file(&dir, start_lsn, end_lsn)?;
        println!("{}", dir.join(name).display());
    }

    Ok(())
}
