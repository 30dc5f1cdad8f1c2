use std::net::TcpListener;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};

use RamFerry::channel::{accept_channel, tls_acceptor_from_env};
use RamFerry::config::FerryConfig;
use RamFerry::metrics;
use RamFerry::ram::{RamBlock, RamRegistry};
use RamFerry::recv::FerryReceiver;
use RamFerry::state::{MigrationState, MigrationStatus};
use RamFerry::util::parse_uuid;

pub fn exec(
    listen: String,
    channels: Option<usize>,
    pages: usize,
    page_size: Option<usize>,
    block_name: String,
    tls: bool,
    uuid: Option<String>,
) -> Result<()> {
    let mut cfg = FerryConfig::from_env();
    if let Some(n) = channels {
        cfg.channels = n;
    }
    if let Some(n) = page_size {
        cfg.page_size = n;
    }
    if let Some(u) = uuid {
        cfg.uuid = parse_uuid(&u)?;
    }
    cfg.tls = cfg.tls || tls;
    cfg.validate()?;

    let registry = RamRegistry::new();
    let block = RamBlock::new_anon(&block_name, pages * cfg.page_size, cfg.page_size)?;
    registry.insert(block.clone())?;

    let acceptor = if cfg.tls {
        let a = tls_acceptor_from_env()?;
        if a.is_none() {
            return Err(anyhow!("--tls requires RF_TLS_SERVER_PFX"));
        }
        a
    } else {
        None
    };

    let session = MigrationState::new();
    let mut receiver = FerryReceiver::setup(&cfg, registry, session.clone())?;

    let listener =
        TcpListener::bind(&listen).with_context(|| format!("bind listener at {}", listen))?;
    info!("listening on {} ({} channels expected)", listen, cfg.channels);

    while !receiver.all_channels_ready() {
        let (tcp, peer) = listener.accept().context("accept incoming channel")?;
        info!("incoming channel from {}", peer);
        let chan = match accept_channel(tcp, acceptor.as_ref()) {
            Ok(c) => c,
            Err(e) => {
                // TLS handshake сорвался — канал не считается; ждём следующий.
                warn!("channel from {} rejected: {:#}", peer, e);
                continue;
            }
        };
        receiver.register_channel(chan)?;
    }
    session.set_status(MigrationStatus::Active);
    info!("all {} channels registered", cfg.channels);

    // Демо-протокол: один барьер в конце переноса.
    receiver.sync();
    info!("sync barrier passed, watermark {}", receiver.watermark());

    receiver.shutdown();
    if let Some(err) = receiver.error_message() {
        return Err(anyhow!("migration failed: {}", err));
    }
    session.set_status(MigrationStatus::Completed);

    info!("block '{}': digest {:#018x}", block_name, block.digest());
    for st in receiver.channel_stats() {
        info!(
            "channel {}: {} packets, {} pages, {} bytes",
            st.id, st.packets, st.pages, st.bytes
        );
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&metrics::snapshot()).unwrap_or_default()
    );
    Ok(())
}
