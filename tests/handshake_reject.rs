use std::io::Write;
use std::net::{TcpListener, TcpStream};

use anyhow::Result;
use byteorder::{BigEndian, ByteOrder};

use RamFerry::channel::Channel;
use RamFerry::config::FerryConfig;
use RamFerry::consts::{INIT_FRAME_SIZE, UUID_LEN};
use RamFerry::ram::{RamBlock, RamRegistry};
use RamFerry::recv::FerryReceiver;
use RamFerry::state::MigrationState;
use RamFerry::wire::InitFrame;

fn session_uuid() -> [u8; UUID_LEN] {
    let mut u = [0u8; UUID_LEN];
    for (i, b) in u.iter_mut().enumerate() {
        *b = 0x40 + i as u8;
    }
    u
}

fn fresh_receiver() -> Result<(FerryReceiver, TcpListener)> {
    let cfg = FerryConfig::default()
        .with_channels(2)
        .with_uuid(session_uuid());
    let registry = RamRegistry::new();
    registry.insert(RamBlock::new_anon("ram0", 4096, 4096)?)?;
    let session = MigrationState::new();
    let receiver = FerryReceiver::setup(&cfg, registry, session)?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok((receiver, listener))
}

/// Скормить приёмнику сырые байты handshake и вернуть результат регистрации.
fn feed_frame(receiver: &FerryReceiver, listener: &TcpListener, frame: &[u8]) -> Result<()> {
    let mut client = TcpStream::connect(listener.local_addr()?)?;
    client.write_all(frame)?;
    let (server, _) = listener.accept()?;
    receiver.register_channel(Channel::Plain(server))
}

#[test]
fn rejects_wrong_magic() -> Result<()> {
    let (mut receiver, listener) = fresh_receiver()?;
    let mut frame = InitFrame { uuid: session_uuid(), id: 0 }.encode();
    BigEndian::write_u32(&mut frame[0..4], 0xdead_beef);
    assert!(feed_frame(&receiver, &listener, &frame).is_err());
    assert!(!receiver.all_channels_ready());
    receiver.shutdown();
    Ok(())
}

#[test]
fn rejects_wrong_version() -> Result<()> {
    let (mut receiver, listener) = fresh_receiver()?;
    let mut frame = InitFrame { uuid: session_uuid(), id: 0 }.encode();
    BigEndian::write_u32(&mut frame[4..8], 2);
    assert!(feed_frame(&receiver, &listener, &frame).is_err());
    assert!(!receiver.all_channels_ready());
    receiver.shutdown();
    Ok(())
}

#[test]
fn rejects_foreign_uuid() -> Result<()> {
    let (mut receiver, listener) = fresh_receiver()?;
    let frame = InitFrame { uuid: [0u8; UUID_LEN], id: 0 }.encode();
    assert!(feed_frame(&receiver, &listener, &frame).is_err());
    assert!(!receiver.all_channels_ready());
    receiver.shutdown();
    Ok(())
}

#[test]
fn rejects_id_out_of_range() -> Result<()> {
    let (mut receiver, listener) = fresh_receiver()?;
    // channels = 2, допустимы только id 0 и 1.
    let frame = InitFrame { uuid: session_uuid(), id: 2 }.encode();
    assert!(feed_frame(&receiver, &listener, &frame).is_err());
    assert!(!receiver.all_channels_ready());
    receiver.shutdown();
    Ok(())
}

#[test]
fn rejects_duplicate_id() -> Result<()> {
    let (mut receiver, listener) = fresh_receiver()?;
    let frame = InitFrame { uuid: session_uuid(), id: 0 }.encode();
    feed_frame(&receiver, &listener, &frame)?;
    // Второй канал с тем же id фатален.
    assert!(feed_frame(&receiver, &listener, &frame).is_err());
    assert!(!receiver.all_channels_ready());
    receiver.shutdown();
    Ok(())
}

#[test]
fn rejects_truncated_frame() -> Result<()> {
    let (mut receiver, listener) = fresh_receiver()?;
    // Обрыв до конца кадра: отправляем половину и закрываем соединение.
    let frame = InitFrame { uuid: session_uuid(), id: 0 }.encode();
    let mut client = TcpStream::connect(listener.local_addr()?)?;
    client.write_all(&frame[..INIT_FRAME_SIZE / 2])?;
    drop(client);
    let (server, _) = listener.accept()?;
    assert!(receiver.register_channel(Channel::Plain(server)).is_err());
    assert!(!receiver.all_channels_ready());
    receiver.shutdown();
    Ok(())
}
