//! recv — контроллер принимающей стороны.
//!
//! Входящие каналы регистрируются по id из handshake-кадра; каждый канал
//! обслуживает свой поток-воркер с циклом чтения. Барьер sync() — настоящее
//! рандеву: каждый воркер, получив SYNC-пакет, постит общий семафор и
//! замирает на своём, пока контроллер не отпустит все каналы разом.

pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};

use crate::channel::{Channel, ShutdownHandle};
use crate::codec::{codec_for, CompressionKind, PageCodec};
use crate::config::FerryConfig;
use crate::consts::{INIT_FRAME_SIZE, UUID_LEN};
use crate::metrics::{record_handshake_failure, ChannelStats};
use crate::ram::RamRegistry;
use crate::sem::Semaphore;
use crate::state::MigrationState;
use crate::wire::InitFrame;

pub(crate) struct RecvSlot {
    pub(crate) id: u8,
    pub(crate) quit: AtomicBool,
    // Барьерное "продолжай": контроллер отпускает канал после рандеву.
    pub(crate) sem_sync: Semaphore,
    pub(crate) shutdown: Mutex<Option<ShutdownHandle>>,
    // Слот занят каналом (повторная регистрация id — фатальная ошибка).
    pub(crate) taken: AtomicBool,
    pub(crate) packet_num: AtomicU64,
    pub(crate) packets_recv: AtomicU64,
    pub(crate) pages_recv: AtomicU64,
    pub(crate) bytes_recv: AtomicU64,
    pub(crate) thread: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct RecvState {
    pub(crate) slots: Vec<RecvSlot>,
    // Общий "канал увидел SYNC": по одному post на канал на барьер.
    pub(crate) sem_sync: Semaphore,
    pub(crate) created: AtomicUsize,
    pub(crate) watermark: AtomicU64,
    pub(crate) codec: &'static dyn PageCodec,
    pub(crate) registry: Arc<RamRegistry>,
    pub(crate) uuid: [u8; UUID_LEN],
    pub(crate) channels: usize,
    pub(crate) page_size: usize,
    pub(crate) capacity: usize,
    pub(crate) session: Arc<MigrationState>,
}

impl RecvState {
    /// Остановить все каналы приёма; с ошибкой — ещё и зафиксировать её
    /// (первая побеждает). Безопасно звать повторно и из воркеров.
    pub(crate) fn terminate(&self, err: Option<&anyhow::Error>) {
        if let Some(e) = err {
            self.session.set_error(format!("{:#}", e));
        }
        for slot in &self.slots {
            slot.quit.store(true, Ordering::SeqCst);
            if let Some(h) = slot.shutdown.lock().unwrap().as_ref() {
                h.shutdown();
            }
        }
    }
}

pub struct FerryReceiver {
    shared: Arc<RecvState>,
    shut_down: bool,
}

impl FerryReceiver {
    pub fn setup(
        cfg: &FerryConfig,
        registry: Arc<RamRegistry>,
        session: Arc<MigrationState>,
    ) -> Result<FerryReceiver> {
        cfg.validate()?;
        let capacity = cfg.page_capacity();

        let slots = (0..cfg.channels)
            .map(|i| RecvSlot {
                id: i as u8,
                quit: AtomicBool::new(false),
                sem_sync: Semaphore::new(0),
                shutdown: Mutex::new(None),
                taken: AtomicBool::new(false),
                packet_num: AtomicU64::new(0),
                packets_recv: AtomicU64::new(0),
                pages_recv: AtomicU64::new(0),
                bytes_recv: AtomicU64::new(0),
                thread: Mutex::new(None),
            })
            .collect();

        let shared = Arc::new(RecvState {
            slots,
            sem_sync: Semaphore::new(0),
            created: AtomicUsize::new(0),
            watermark: AtomicU64::new(0),
            codec: codec_for(CompressionKind::None),
            registry,
            uuid: cfg.uuid,
            channels: cfg.channels,
            page_size: cfg.page_size,
            capacity,
            session,
        });

        for slot in &shared.slots {
            shared.codec.recv_setup(slot.id)?;
        }

        info!("multifd recv setup: {}", cfg);
        Ok(FerryReceiver {
            shared,
            shut_down: false,
        })
    }

    /// Принять новый входящий канал: прочитать handshake, привязать к слоту
    /// по id, запустить воркера. Кривой handshake фатален для всей миграции.
    pub fn register_channel(&self, mut chan: Channel) -> Result<()> {
        let shared = &self.shared;

        let mut buf = [0u8; INIT_FRAME_SIZE];
        if let Err(e) = chan.read_all(&mut buf).context("read init frame") {
            record_handshake_failure();
            shared.terminate(Some(&e));
            return Err(e);
        }
        let id = match InitFrame::decode(&buf, &shared.uuid, shared.channels) {
            Ok(id) => id,
            Err(e) => {
                record_handshake_failure();
                shared.terminate(Some(&e));
                return Err(e);
            }
        };

        let slot = &shared.slots[id as usize];
        if slot.taken.swap(true, Ordering::SeqCst) {
            let e = anyhow!("multifd channel id {} already set up", id);
            record_handshake_failure();
            shared.terminate(Some(&e));
            return Err(e);
        }

        match chan.shutdown_handle() {
            Ok(h) => *slot.shutdown.lock().unwrap() = Some(h),
            Err(e) => {
                shared.terminate(Some(&e));
                return Err(e);
            }
        }

        let shared2 = shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("ferryrecv_{}", id))
            .spawn(move || worker::run(shared2, id, chan));
        let t = match spawned {
            Ok(t) => t,
            Err(e) => {
                let e = anyhow!("spawn ferryrecv_{}: {}", id, e);
                shared.terminate(Some(&e));
                return Err(e);
            }
        };
        *slot.thread.lock().unwrap() = Some(t);

        shared.created.fetch_add(1, Ordering::SeqCst);
        info!("multifd: new channel {} registered", id);
        Ok(())
    }

    pub fn all_channels_ready(&self) -> bool {
        self.shared.created.load(Ordering::SeqCst) == self.shared.channels
    }

    /// Барьер приёма: дождаться SYNC от каждого канала, поднять watermark,
    /// отпустить все каналы.
    pub fn sync(&self) {
        for _ in &self.shared.slots {
            self.shared.sem_sync.wait();
        }
        for slot in &self.shared.slots {
            let pn = slot.packet_num.load(Ordering::Relaxed);
            self.shared.watermark.fetch_max(pn, Ordering::SeqCst);
            slot.sem_sync.post();
        }
        debug!(
            "multifd recv sync complete, packet_num watermark {}",
            self.shared.watermark.load(Ordering::SeqCst)
        );
    }

    /// Остановить приём: пометить quit, оборвать I/O, разбудить застрявших в
    /// барьере воркеров, дождаться потоков. Повторный вызов — no-op.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.shared.terminate(None);
        for slot in &self.shared.slots {
            // Воркер мог замереть в барьерном рандеву — разбудим без вреда.
            slot.sem_sync.post();
            let t = slot.thread.lock().unwrap().take();
            if let Some(t) = t {
                let _ = t.join();
            }
        }
        debug!(
            "multifd recv shut down, watermark {}",
            self.shared.watermark.load(Ordering::SeqCst)
        );
    }

    pub fn watermark(&self) -> u64 {
        self.shared.watermark.load(Ordering::SeqCst)
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared.session.error_message()
    }

    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        self.shared
            .slots
            .iter()
            .map(|s| ChannelStats {
                id: s.id,
                packets: s.packets_recv.load(Ordering::Relaxed),
                pages: s.pages_recv.load(Ordering::Relaxed),
                bytes: s.bytes_recv.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl Drop for FerryReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
