use anyhow::{Context, Result};
use log::info;
use rand::{Rng, RngCore, SeedableRng};

use RamFerry::config::FerryConfig;
use RamFerry::metrics;
use RamFerry::ram::RamBlock;
use RamFerry::send::{tcp_connector, FerrySender};
use RamFerry::state::{MigrationState, MigrationStatus};
use RamFerry::util::parse_uuid;

#[allow(clippy::too_many_arguments)]
pub fn exec(
    connect: String,
    channels: Option<usize>,
    pages: usize,
    page_size: Option<usize>,
    block_name: String,
    seed: Option<u64>,
    tls: bool,
    uuid: Option<String>,
    sync_every: usize,
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

    // Демо-блок с детерминированным паттерном: по digest сверяем стороны.
    let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!("payload seed: {}", seed);
    let block = RamBlock::new_anon(&block_name, pages * cfg.page_size, cfg.page_size)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut page = vec![0u8; cfg.page_size];
    for i in 0..pages {
        rng.fill_bytes(&mut page);
        block.write_page((i * cfg.page_size) as u64, &page)?;
    }
    info!("block '{}': {} pages, digest {:#018x}", block_name, pages, block.digest());

    let session = MigrationState::new();
    let mut sender = FerrySender::setup(&cfg, session.clone(), tcp_connector(connect.clone(), cfg.tls))
        .with_context(|| format!("setup send side towards {}", connect))?;
    session.set_status(MigrationStatus::Active);

    for i in 0..pages {
        sender.enqueue_page(&block, (i * cfg.page_size) as u64)?;
        if sync_every > 0 && (i + 1) % sync_every == 0 {
            sender.sync()?;
        }
    }
    sender.sync()?;
    info!(
        "migration finished: {} packets, watermark {}",
        sender.packet_count(),
        sender.watermark()
    );
    for st in sender.channel_stats() {
        info!(
            "channel {}: {} packets, {} pages, {} bytes",
            st.id, st.packets, st.pages, st.bytes
        );
    }
    sender.shutdown();
    session.set_status(MigrationStatus::Completed);

    println!(
        "{}",
        serde_json::to_string_pretty(&metrics::snapshot()).unwrap_or_default()
    );
    Ok(())
}
