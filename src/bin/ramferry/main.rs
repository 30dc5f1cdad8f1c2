use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod cmd_recv;
mod cmd_send;
mod cmd_status;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug ./ramferry ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Send {
            connect,
            channels,
            pages,
            page_size,
            block,
            seed,
            tls,
            uuid,
            sync_every,
        } => cmd_send::exec(
            connect, channels, pages, page_size, block, seed, tls, uuid, sync_every,
        ),

        cli::Cmd::Recv {
            listen,
            channels,
            pages,
            page_size,
            block,
            tls,
            uuid,
        } => cmd_recv::exec(listen, channels, pages, page_size, block, tls, uuid),

        cli::Cmd::Status => cmd_status::exec(),
    }
}
