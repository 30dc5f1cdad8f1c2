//! Поток-воркер принимающего канала.
//!
//! Читает по одному заголовку за итерацию. Чистый EOF до первого байта —
//! нормальное завершение (peer закончил); ошибка декодирования или границ —
//! фатальна для всей миграции. SYNC-пакет замораживает воркера до отмашки
//! контроллера — так быстрый канал не убегает за точку синхронизации.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, error, trace};

use crate::channel::Channel;
use crate::consts::FLAG_SYNC;
use crate::metrics::{record_channel_error, record_packet_received, record_sync_received};
use crate::wire::{header_len, PacketHeader};

use super::{RecvSlot, RecvState};

pub(crate) fn run(shared: Arc<RecvState>, id: u8, mut chan: Channel) {
    let slot = &shared.slots[id as usize];
    debug!("ferryrecv_{} started", id);

    if let Err(e) = work(&shared, slot, &mut chan) {
        // После quit обрыв чтения — ожидаемый способ выхода, не сбой.
        if slot.quit.load(Ordering::SeqCst) {
            debug!("ferryrecv_{} stopped: {:#}", id, e);
        } else {
            error!("ferryrecv_{}: {:#}", id, e);
            record_channel_error();
            shared.terminate(Some(&e));
        }
    }

    debug!(
        "ferryrecv_{} exiting: {} packets, {} pages, {} bytes",
        id,
        slot.packets_recv.load(Ordering::Relaxed),
        slot.pages_recv.load(Ordering::Relaxed),
        slot.bytes_recv.load(Ordering::Relaxed),
    );
}

fn work(shared: &RecvState, slot: &RecvSlot, chan: &mut Channel) -> Result<()> {
    let hdr_len = header_len(shared.capacity);
    let mut buf = vec![0u8; hdr_len];

    loop {
        if slot.quit.load(Ordering::SeqCst) {
            return Ok(());
        }

        if !chan.read_exact_or_eof(&mut buf)? {
            // Peer закрыл канал между пакетами.
            return Ok(());
        }

        let hdr = PacketHeader::decode(&buf, shared.capacity)?;
        slot.packet_num.store(hdr.packet_num, Ordering::Relaxed);
        slot.packets_recv.fetch_add(1, Ordering::Relaxed);
        slot.bytes_recv.fetch_add(hdr_len as u64, Ordering::Relaxed);
        trace!(
            "ferryrecv_{}: packet {} ({} pages, flags {:#x})",
            slot.id,
            hdr.packet_num,
            hdr.normal_pages,
            hdr.flags
        );

        if hdr.normal_pages > 0 {
            let block = shared
                .registry
                .lookup_block(&hdr.ramblock)
                .ok_or_else(|| anyhow!("unknown ram block '{}'", hdr.ramblock))?;
            for &off in &hdr.offsets {
                if !block.page_in_bounds(off) {
                    return Err(anyhow!(
                        "page offset {} out of block '{}' (used_length {})",
                        off,
                        hdr.ramblock,
                        block.used_length()
                    ));
                }
            }

            shared.codec.recv_pages(
                chan,
                &block,
                &hdr.offsets,
                hdr.flags,
                hdr.next_packet_size,
                shared.page_size,
            )?;
            slot.pages_recv
                .fetch_add(hdr.normal_pages as u64, Ordering::Relaxed);
            slot.bytes_recv
                .fetch_add(hdr.next_packet_size as u64, Ordering::Relaxed);
            record_packet_received(
                hdr_len + hdr.next_packet_size as usize,
                hdr.normal_pages as usize,
            );
        } else {
            record_packet_received(hdr_len, 0);
        }

        if hdr.flags & FLAG_SYNC != 0 {
            record_sync_received();
            shared.sem_sync.post();
            // Рандеву: стоим, пока контроллер не отпустит все каналы.
            slot.sem_sync.wait();
        }
    }
}
