//! Поток-воркер отправляющего канала.
//!
//! Цикл: объявить готовность -> ждать пробуждения -> проверить exiting ->
//! job (приоритет) либо sync. Любая ошибка I/O фиксируется первым
//! победителем в exiting + сессию, после чего воркер будит контроллер и
//! завершается; join'ом занимается shutdown() на управляющем потоке.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, trace};

use crate::channel::Channel;
use crate::consts::{FLAG_SYNC, INIT_FRAME_SIZE};
use crate::metrics::{record_handshake_sent, record_packet_sent, record_sync_sent};
use crate::wire::{header_len, InitFrame, PacketHeader};

use super::{ChannelConnector, SendSlot, SendState};

pub(crate) fn run(shared: Arc<SendState>, id: u8, connector: ChannelConnector) {
    let slot = &shared.slots[id as usize];
    debug!("ferrysend_{} started", id);

    // Подключение (включая TLS handshake) идёт в этом потоке; контроллер в
    // setup() ждёт только факта завершения попытки.
    let chan = connector(id);
    shared.channels_created.post();
    let mut chan = match chan {
        Ok(c) => c,
        Err(e) => {
            let e = e.context(format!("ferrysend_{}: connect", id));
            error!("{:#}", e);
            shared.set_error(&e);
            kick_main(&shared, slot);
            return;
        }
    };
    chan.set_nodelay();

    match chan.shutdown_handle() {
        Ok(h) => *slot.shutdown.lock().unwrap() = Some(h),
        Err(e) => {
            error!("ferrysend_{}: {:#}", id, e);
            shared.set_error(&e);
            kick_main(&shared, slot);
            return;
        }
    }

    if let Err(e) = work(&shared, slot, &mut chan) {
        error!("ferrysend_{}: {:#}", id, e);
        shared.set_error(&e);
        kick_main(&shared, slot);
    }

    debug!(
        "ferrysend_{} exiting: {} packets, {} pages, {} bytes",
        id,
        slot.packets_sent.load(Ordering::Relaxed),
        slot.pages_sent.load(Ordering::Relaxed),
        slot.bytes_sent.load(Ordering::Relaxed),
    );
}

/// Контроллер может спать на channels_ready либо на sem_sync слота; после
/// сбоя будим оба, чтобы он увидел exiting.
fn kick_main(shared: &SendState, slot: &SendSlot) {
    slot.sem_sync.post();
    shared.channels_ready.post();
}

fn work(shared: &SendState, slot: &SendSlot, chan: &mut Channel) -> Result<()> {
    let frame = InitFrame {
        uuid: shared.uuid,
        id: slot.id,
    };
    chan.write_all_buf(&frame.encode())
        .context("send init frame")?;
    record_handshake_sent(INIT_FRAME_SIZE);

    let mut hdr_buf = vec![0u8; header_len(shared.capacity)];

    loop {
        // Готовность объявляется до ожидания: первая итерация рекламирует
        // канал сразу после handshake.
        shared.channels_ready.post();
        slot.sem.wait();

        if shared.should_exit() {
            return Ok(());
        }

        // Пара к store(Release) контроллера: после этой загрузки батч виден
        // полностью.
        if slot.pending_job.load(Ordering::Acquire) {
            let mut batch = slot.batch.lock().unwrap();
            assert!(!batch.is_empty(), "job flag set on an empty batch");

            let packet_num = shared.packet_num.fetch_add(1, Ordering::SeqCst);
            let pages = batch.len();
            let iov = shared.codec.send_prepare(
                &mut hdr_buf,
                &batch,
                shared.page_size,
                shared.capacity,
                packet_num,
            )?;
            let total: usize = iov.iter().map(|b| b.len()).sum();
            chan.writev_all(&iov)?;
            drop(iov);
            batch.reset();
            drop(batch);

            slot.packets_sent.fetch_add(1, Ordering::Relaxed);
            slot.pages_sent.fetch_add(pages as u64, Ordering::Relaxed);
            slot.bytes_sent.fetch_add(total as u64, Ordering::Relaxed);
            slot.last_packet_num.store(packet_num, Ordering::Relaxed);
            record_packet_sent(total, pages);
            trace!(
                "ferrysend_{}: packet {} ({} pages, {} bytes)",
                slot.id,
                packet_num,
                pages,
                total
            );

            // Возврат пустого батча публикуется до "я свободен".
            slot.pending_job.store(false, Ordering::Release);
        } else {
            // Не job — значит, запрошен sync. Оба флага одновременно
            // легальны (flush + sync подряд дают два пробуждения, job
            // обслуживается первым); нелегально проснуться без обоих.
            assert!(
                slot.pending_sync.load(Ordering::SeqCst),
                "woken without a pending job or sync"
            );
            let packet_num = shared.packet_num.fetch_add(1, Ordering::SeqCst);
            let hdr = PacketHeader {
                flags: FLAG_SYNC,
                pages_alloc: shared.capacity as u32,
                normal_pages: 0,
                next_packet_size: 0,
                packet_num,
                ramblock: String::new(),
                offsets: Vec::new(),
            };
            hdr.encode_into(&mut hdr_buf)?;
            chan.write_all_buf(&hdr_buf)?;

            slot.packets_sent.fetch_add(1, Ordering::Relaxed);
            slot.bytes_sent.fetch_add(hdr_buf.len() as u64, Ordering::Relaxed);
            slot.last_packet_num.store(packet_num, Ordering::Relaxed);
            record_sync_sent(hdr_buf.len());
            trace!("ferrysend_{}: sync packet {}", slot.id, packet_num);

            slot.pending_sync.store(false, Ordering::SeqCst);
            slot.sem_sync.post();
        }
    }
}
