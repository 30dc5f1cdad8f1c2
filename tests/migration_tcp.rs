use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};

use RamFerry::channel::Channel;
use RamFerry::config::FerryConfig;
use RamFerry::ram::{RamBlock, RamRegistry};
use RamFerry::recv::FerryReceiver;
use RamFerry::send::{tcp_connector, FerrySender};
use RamFerry::state::MigrationState;

fn fill_block(block: &Arc<RamBlock>, pages: usize, seed: u64) {
    let mut rng = oorandom::Rand64::new(seed as u128);
    let ps = block.page_size();
    let mut page = vec![0u8; ps];
    for p in 0..pages {
        for chunk in page.chunks_mut(8) {
            let v = rng.rand_u64().to_le_bytes();
            chunk.copy_from_slice(&v[..chunk.len()]);
        }
        block.write_page((p * ps) as u64, &page).unwrap();
    }
}

/// Принимающая сторона в отдельном потоке: блоки по списку, `syncs` барьеров,
/// затем shutdown и digest'ы блоков.
fn start_receiver(
    cfg: FerryConfig,
    blocks: Vec<(String, usize)>,
    syncs: usize,
) -> (SocketAddr, thread::JoinHandle<Result<Vec<u64>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let t = thread::spawn(move || -> Result<Vec<u64>> {
        let registry = RamRegistry::new();
        let mut owned = Vec::new();
        for (name, pages) in &blocks {
            let b = RamBlock::new_anon(name, pages * cfg.page_size, cfg.page_size)?;
            registry.insert(b.clone())?;
            owned.push(b);
        }
        let session = MigrationState::new();
        let mut receiver = FerryReceiver::setup(&cfg, registry, session)?;
        while !receiver.all_channels_ready() {
            let (tcp, _) = listener.accept()?;
            receiver.register_channel(Channel::Plain(tcp))?;
        }
        for _ in 0..syncs {
            receiver.sync();
        }
        let watermark = receiver.watermark();
        receiver.shutdown();
        if let Some(e) = receiver.error_message() {
            return Err(anyhow!("recv failed: {}", e));
        }
        let mut out: Vec<u64> = owned.iter().map(|b| b.digest()).collect();
        out.push(watermark);
        Ok(out)
    });
    (addr, t)
}

#[test]
fn three_pages_one_packet_and_sync() -> Result<()> {
    // Сценарий: 2 канала, page_size 4096, offsets [0, 4096, 8192] одним
    // пакетом (ёмкость 128), затем барьер, который подтверждают оба канала.
    let cfg = FerryConfig::default().with_channels(2);
    let (addr, recv_t) = start_receiver(cfg.clone(), vec![("pc.ram".to_string(), 3)], 1);

    let block = RamBlock::new_anon("pc.ram", 3 * cfg.page_size, cfg.page_size)?;
    fill_block(&block, 3, 0xfeed);

    let session = MigrationState::new();
    let mut sender = FerrySender::setup(&cfg, session, tcp_connector(addr.to_string(), false))?;
    for off in [0u64, 4096, 8192] {
        sender.enqueue_page(&block, off)?;
    }
    sender.sync()?;

    // 1 data-пакет + 2 sync-пакета, глобальная нумерация без пропусков.
    assert_eq!(sender.packet_count(), 3);
    assert_eq!(sender.watermark(), 2);

    let stats = sender.channel_stats();
    let total_packets: u64 = stats.iter().map(|s| s.packets).sum();
    let total_pages: u64 = stats.iter().map(|s| s.pages).sum();
    assert_eq!(total_packets, 3);
    assert_eq!(total_pages, 3);
    // Каждый канал отправил свой SYNC.
    for s in &stats {
        assert!(s.packets >= 1, "channel {} sent nothing", s.id);
    }

    sender.shutdown();

    let mut out = recv_t.join().unwrap()?;
    let recv_watermark = out.pop().unwrap();
    assert_eq!(out[0], block.digest(), "destination content differs");
    assert_eq!(recv_watermark, 2);
    Ok(())
}

#[test]
fn many_packets_across_channels() -> Result<()> {
    // Маленькая ёмкость пакета заставляет раскидать поток по каналам.
    let cfg = FerryConfig::default()
        .with_channels(4)
        .with_packet_size(4 * 4096);
    let pages = 137usize;
    let (addr, recv_t) = start_receiver(cfg.clone(), vec![("ram0".to_string(), pages)], 1);

    let block = RamBlock::new_anon("ram0", pages * cfg.page_size, cfg.page_size)?;
    fill_block(&block, pages, 0xc0ffee);

    let session = MigrationState::new();
    let mut sender = FerrySender::setup(&cfg, session, tcp_connector(addr.to_string(), false))?;
    for p in 0..pages {
        sender.enqueue_page(&block, (p * cfg.page_size) as u64)?;
    }
    sender.sync()?;

    let stats = sender.channel_stats();
    let total_pages: u64 = stats.iter().map(|s| s.pages).sum();
    assert_eq!(total_pages, pages as u64);
    // 137 страниц при ёмкости 4: 34 полных пакета + хвост из одной страницы,
    // который уезжает flush'ем внутри sync, плюс 4 sync-пакета.
    assert_eq!(sender.packet_count(), 35 + 4);
    assert_eq!(sender.watermark(), sender.packet_count() - 1);

    sender.shutdown();

    let mut out = recv_t.join().unwrap()?;
    let recv_watermark = out.pop().unwrap();
    assert_eq!(out[0], block.digest(), "destination content differs");
    assert_eq!(recv_watermark, sender.watermark());
    Ok(())
}

#[test]
fn empty_migration_sync_only() -> Result<()> {
    // Без единой страницы барьер всё равно проходит по всем каналам.
    let cfg = FerryConfig::default().with_channels(3);
    let (addr, recv_t) = start_receiver(cfg.clone(), vec![("ram0".to_string(), 1)], 1);

    let session = MigrationState::new();
    let mut sender = FerrySender::setup(&cfg, session, tcp_connector(addr.to_string(), false))?;
    sender.sync()?;
    assert_eq!(sender.packet_count(), 3); // только sync-пакеты
    sender.shutdown();

    recv_t.join().unwrap()?;
    Ok(())
}
