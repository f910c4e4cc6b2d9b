use anyhow::Result;
use env_logger::{Builder, Env};

mod cli;
mod cmd_merge;
mod cmd_recycle;
mod cmd_status;
mod cmd_validate;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug ./quivercbm ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Status { datadir } => cmd_status::exec(datadir),

        cli::Cmd::Validate { datadir, truncate } => cmd_validate::exec(datadir, truncate),

        cli::Cmd::Merge {
            datadir,
            start,
            end,
            array,
        } => cmd_merge::exec(datadir, start, end, array),

        cli::Cmd::Recycle { datadir, target } => cmd_recycle::exec(datadir, target),
    }
}
