use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use RamFerry::channel::Channel;
use RamFerry::config::FerryConfig;
use RamFerry::consts::FLAG_SYNC;
use RamFerry::ram::{RamBlock, RamRegistry};
use RamFerry::recv::FerryReceiver;
use RamFerry::send::{tcp_connector, FerrySender};
use RamFerry::state::MigrationState;
use RamFerry::wire::{header_len, InitFrame, PacketHeader};

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

fn sync_packet_bytes(capacity: usize, packet_num: u64) -> Vec<u8> {
    let hdr = PacketHeader {
        flags: FLAG_SYNC,
        pages_alloc: capacity as u32,
        normal_pages: 0,
        next_packet_size: 0,
        packet_num,
        ramblock: String::new(),
        offsets: Vec::new(),
    };
    let mut buf = vec![0u8; header_len(capacity)];
    hdr.encode_into(&mut buf).unwrap();
    buf
}

#[test]
fn barrier_waits_for_every_channel() -> Result<()> {
    // Рандеву руками: два сырых канала, SYNC уходит сначала только по
    // одному. sync() обязан вернуться лишь после SYNC от обоих.
    let cfg = FerryConfig::default().with_channels(2);
    let capacity = cfg.page_capacity();

    let registry = RamRegistry::new();
    registry.insert(RamBlock::new_anon("ram0", 4096, 4096)?)?;
    let session = MigrationState::new();
    let mut receiver = FerryReceiver::setup(&cfg, registry, session)?;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    use std::io::Write;
    let mut ch0 = TcpStream::connect(addr)?;
    let (s0, _) = listener.accept()?;
    ch0.write_all(&InitFrame { uuid: cfg.uuid, id: 0 }.encode())?;
    receiver.register_channel(Channel::Plain(s0))?;

    let mut ch1 = TcpStream::connect(addr)?;
    let (s1, _) = listener.accept()?;
    ch1.write_all(&InitFrame { uuid: cfg.uuid, id: 1 }.encode())?;
    receiver.register_channel(Channel::Plain(s1))?;
    assert!(receiver.all_channels_ready());

    let (tx, rx) = mpsc::channel();
    let recv_t = thread::spawn(move || -> Result<u64> {
        receiver.sync();
        tx.send(()).ok();
        let watermark = receiver.watermark();
        receiver.shutdown();
        Ok(watermark)
    });

    // SYNC только по каналу 0 — барьер обязан стоять.
    ch0.write_all(&sync_packet_bytes(capacity, 0))?;
    assert!(
        rx.recv_timeout(Duration::from_millis(300)).is_err(),
        "barrier must not pass with one channel pending"
    );

    // SYNC по каналу 1 — барьер проходит.
    ch1.write_all(&sync_packet_bytes(capacity, 1))?;
    rx.recv_timeout(Duration::from_secs(5))
        .map_err(|_| anyhow!("barrier did not complete after all channels synced"))?;

    let watermark = recv_t.join().unwrap()?;
    assert_eq!(watermark, 1);
    Ok(())
}

#[test]
fn two_rounds_with_mid_stream_barrier() -> Result<()> {
    // Перенос в два раунда с барьером между ними: после рандеву каналы
    // продолжают читать, второй раунд доезжает целиком.
    let cfg = FerryConfig::default()
        .with_channels(2)
        .with_packet_size(2 * 4096);
    let pages = 8usize;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let recv_cfg = cfg.clone();
    let recv_t = thread::spawn(move || -> Result<u64> {
        let registry = RamRegistry::new();
        let block = RamBlock::new_anon("ram0", pages * recv_cfg.page_size, recv_cfg.page_size)?;
        registry.insert(block.clone())?;
        let session = MigrationState::new();
        let mut receiver = FerryReceiver::setup(&recv_cfg, registry, session)?;
        while !receiver.all_channels_ready() {
            let (tcp, _) = listener.accept()?;
            receiver.register_channel(Channel::Plain(tcp))?;
        }
        receiver.sync();
        receiver.sync();
        receiver.shutdown();
        if let Some(e) = receiver.error_message() {
            return Err(anyhow!("recv failed: {}", e));
        }
        Ok(block.digest())
    });

    let block = RamBlock::new_anon("ram0", pages * cfg.page_size, cfg.page_size)?;
    fill_block(&block, pages, 0xbeef);

    let session = MigrationState::new();
    let mut sender = FerrySender::setup(&cfg, session, tcp_connector(addr.to_string(), false))?;
    for p in 0..pages / 2 {
        sender.enqueue_page(&block, (p * cfg.page_size) as u64)?;
    }
    sender.sync()?;
    for p in pages / 2..pages {
        sender.enqueue_page(&block, (p * cfg.page_size) as u64)?;
    }
    sender.sync()?;
    sender.shutdown();

    let digest = recv_t.join().unwrap()?;
    assert_eq!(digest, block.digest(), "destination content differs");
    Ok(())
}
