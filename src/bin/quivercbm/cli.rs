use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Операторский CLI поверх каталога CBM (merge/recycle/диагностика).
#[derive(Parser, Debug)]
#[command(name = "quivercbm", version, about = "QuiverCBM CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Print the CBM file chain and the tracked LSN of the last file
    ///
    /// Пример:
    ///   quivercbm status --datadir ./data
    Status {
        #[arg(long)]
        datadir: PathBuf,
    },

    /// Validate the tail of the last CBM file (optionally truncate it)
    Validate {
        #[arg(long)]
        datadir: PathBuf,
        /// Усечь хвост до последней валидной last-in-batch страницы
        #[arg(long, default_value_t = false)]
        truncate: bool,
    },

    /// Merge the [start, end] LSN window into a file or a JSON array
    ///
    /// LSN задаются в виде hi/lo (hex), например 0/1A2B3C.
    Merge {
        #[arg(long)]
        datadir: PathBuf,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        /// Вывести JSON-массив изменённых блоков вместо merged-файла
        #[arg(long, default_value_t = false)]
        array: bool,
    },

    /// Remove CBM files fully consumed up to the target LSN
    Recycle {
        #[arg(long)]
        datadir: PathBuf,
        /// LSN в виде hi/lo (hex)
        #[arg(long)]
        target: String,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Cli as Parser>::parse()
    }
}
