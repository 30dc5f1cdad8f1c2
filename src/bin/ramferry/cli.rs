use clap::{Parser, Subcommand};

/// CLI демо-миграции: источник и приёмник RAM-блока.
#[derive(Parser, Debug)]
#[command(name = "ramferry", version, about = "Multi-channel RAM migration transport")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Migrate a generated RAM block to a receiver
    Send {
        /// Receiver address, host:port
        #[arg(long)]
        connect: String,
        /// Parallel channels (default from RF_CHANNELS / 2)
        #[arg(long)]
        channels: Option<usize>,
        /// Pages in the demo block
        #[arg(long, default_value_t = 1024)]
        pages: usize,
        /// Page size in bytes (default from RF_PAGE_SIZE / 4096)
        #[arg(long)]
        page_size: Option<usize>,
        /// RAM block name (must match the receiver)
        #[arg(long, default_value = "ram0")]
        block: String,
        /// Seed for the payload pattern (random if omitted)
        #[arg(long)]
        seed: Option<u64>,
        /// Upgrade channels to TLS (RF_TLS_* env configures certs)
        #[arg(long)]
        tls: bool,
        /// Session uuid, 32 hex chars (must match the receiver)
        #[arg(long)]
        uuid: Option<String>,
        /// Emit a sync barrier every N pages (0 = only the final one)
        #[arg(long, default_value_t = 0)]
        sync_every: usize,
    },
    /// Receive a migrated RAM block
    Recv {
        /// Listen address, host:port
        #[arg(long)]
        listen: String,
        /// Parallel channels (default from RF_CHANNELS / 2)
        #[arg(long)]
        channels: Option<usize>,
        /// Pages in the destination block (must match the sender)
        #[arg(long, default_value_t = 1024)]
        pages: usize,
        /// Page size in bytes (default from RF_PAGE_SIZE / 4096)
        #[arg(long)]
        page_size: Option<usize>,
        /// RAM block name (must match the sender)
        #[arg(long, default_value = "ram0")]
        block: String,
        /// Accept TLS channels (RF_TLS_SERVER_PFX env configures identity)
        #[arg(long)]
        tls: bool,
        /// Session uuid, 32 hex chars (must match the sender)
        #[arg(long)]
        uuid: Option<String>,
    },
    /// Print the metrics snapshot as JSON
    Status,
}
