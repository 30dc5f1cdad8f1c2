//! send — контроллер отправляющей стороны.
//!
//! API для потока миграции: enqueue_page/flush/sync/shutdown. Контроллер
//! однопоточный, но hand-off батча видят воркеры, поэтому:
//! - у контроллера и у каждого слота по долгоживущему PageBatch; при flush
//!   они обмениваются через mem::swap под мьютексом слота ("горячая
//!   картошка": ровно один владелец);
//! - публикация батча воркеру — pending_job со store(Release), парный
//!   load(Acquire) в воркере; это ключевая пара порядка всего hand-off'а;
//! - готовность каналов — счётный семафор channels_ready: воркер постит его
//!   перед каждым ожиданием работы, flush и sync его потребляют (sync
//!   конкурирует с flush за готовность — намеренный backpressure).

pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use log::{debug, info};

use crate::batch::PageBatch;
use crate::channel::{self, Channel, ShutdownHandle};
use crate::codec::{codec_for, CompressionKind, PageCodec};
use crate::config::FerryConfig;
use crate::consts::UUID_LEN;
use crate::metrics::{record_channel_error, ChannelStats};
use crate::ram::RamBlock;
use crate::sem::Semaphore;
use crate::state::MigrationState;

/// Фабрика каналов: вызывается в потоке воркера (включая TLS handshake).
pub type ChannelConnector = Arc<dyn Fn(u8) -> Result<Channel> + Send + Sync>;

/// Стандартный connector: TCP connect на addr (+ опциональный TLS-upgrade).
pub fn tcp_connector(addr: String, tls: bool) -> ChannelConnector {
    Arc::new(move |_id| channel::open_channel(&addr, tls))
}

pub(crate) struct SendSlot {
    pub(crate) id: u8,
    pub(crate) batch: Mutex<PageBatch>,
    // Два независимых флага; в одном цикле пробуждения job приоритетнее.
    pub(crate) pending_job: AtomicBool,
    pub(crate) pending_sync: AtomicBool,
    // Пробуждение воркера (job либо sync).
    pub(crate) sem: Semaphore,
    // Подтверждение sync этим каналом.
    pub(crate) sem_sync: Semaphore,
    pub(crate) shutdown: Mutex<Option<ShutdownHandle>>,
    pub(crate) packets_sent: AtomicU64,
    pub(crate) pages_sent: AtomicU64,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) last_packet_num: AtomicU64,
}

pub(crate) struct SendState {
    pub(crate) slots: Vec<SendSlot>,
    // Глобальная нумерация пакетов: fetch_add в момент отправки.
    pub(crate) packet_num: AtomicU64,
    pub(crate) watermark: AtomicU64,
    pub(crate) channels_ready: Semaphore,
    // Рандеву setup: после него каналы больше не создаются.
    pub(crate) channels_created: Semaphore,
    // Единственный сигнал отмены; монотонный false -> true.
    pub(crate) exiting: AtomicBool,
    pub(crate) codec: &'static dyn PageCodec,
    pub(crate) page_size: usize,
    pub(crate) capacity: usize,
    pub(crate) uuid: [u8; UUID_LEN],
    pub(crate) session: Arc<MigrationState>,
}

impl SendState {
    pub(crate) fn should_exit(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Зафиксировать сбой воркера. Первый победитель ставит exiting и пишет
    /// ошибку в сессию; остальные вызовы — no-op (teardown не задваивается).
    pub(crate) fn set_error(&self, err: &anyhow::Error) {
        if self.exiting.swap(true, Ordering::SeqCst) {
            return;
        }
        record_channel_error();
        self.session.set_error(format!("{:#}", err));
    }

    /// Разбудить всех и оборвать заблокированный I/O. Вызывается из
    /// shutdown(); безопасно звать повторно.
    pub(crate) fn terminate(&self) {
        self.exiting.store(true, Ordering::SeqCst);
        for slot in &self.slots {
            slot.sem.post();
            if let Some(h) = slot.shutdown.lock().unwrap().as_ref() {
                h.shutdown();
            }
        }
    }
}

pub struct FerrySender {
    shared: Arc<SendState>,
    current: PageBatch,
    // Round-robin по слотам; живёт между flush'ами, сбрасывается в setup.
    next_channel: usize,
    threads: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl FerrySender {
    /// Поднять отправляющую сторону: слоты, воркеры, рандеву создания
    /// каналов, per-channel setup кодека.
    pub fn setup(
        cfg: &FerryConfig,
        session: Arc<MigrationState>,
        connector: ChannelConnector,
    ) -> Result<FerrySender> {
        cfg.validate()?;
        let capacity = cfg.page_capacity();

        let slots = (0..cfg.channels)
            .map(|i| SendSlot {
                id: i as u8,
                batch: Mutex::new(PageBatch::new(capacity)),
                pending_job: AtomicBool::new(false),
                pending_sync: AtomicBool::new(false),
                sem: Semaphore::new(0),
                sem_sync: Semaphore::new(0),
                shutdown: Mutex::new(None),
                packets_sent: AtomicU64::new(0),
                pages_sent: AtomicU64::new(0),
                bytes_sent: AtomicU64::new(0),
                last_packet_num: AtomicU64::new(0),
            })
            .collect();

        let shared = Arc::new(SendState {
            slots,
            packet_num: AtomicU64::new(0),
            watermark: AtomicU64::new(0),
            channels_ready: Semaphore::new(0),
            channels_created: Semaphore::new(0),
            exiting: AtomicBool::new(false),
            codec: codec_for(CompressionKind::None),
            page_size: cfg.page_size,
            capacity,
            uuid: cfg.uuid,
            session,
        });

        info!("multifd send setup: {}", cfg);

        let mut sender = FerrySender {
            shared: shared.clone(),
            current: PageBatch::new(capacity),
            next_channel: 0,
            threads: Vec::with_capacity(cfg.channels),
            shut_down: false,
        };

        for i in 0..cfg.channels {
            let shared2 = shared.clone();
            let conn = connector.clone();
            let spawned = thread::Builder::new()
                .name(format!("ferrysend_{}", i))
                .spawn(move || worker::run(shared2, i as u8, conn));
            match spawned {
                Ok(t) => sender.threads.push(t),
                Err(e) => {
                    sender.shutdown();
                    return Err(anyhow!("spawn ferrysend_{}: {}", i, e));
                }
            }
        }

        // Точка рандеву: создание всех каналов стартовало (успешно или нет);
        // новых каналов после неё не будет.
        for _ in 0..cfg.channels {
            shared.channels_created.wait();
        }

        for slot in &shared.slots {
            if let Err(e) = shared.codec.send_setup(slot.id) {
                sender.shutdown();
                return Err(e);
            }
        }

        if shared.should_exit() {
            let msg = shared
                .session
                .error_message()
                .unwrap_or_else(|| "channel setup failed".to_string());
            sender.shutdown();
            return Err(anyhow!("multifd send setup failed: {}", msg));
        }

        Ok(sender)
    }

    fn exit_error(&self) -> anyhow::Error {
        match self.shared.session.error_message() {
            Some(msg) => anyhow!("multifd send is exiting: {}", msg),
            None => anyhow!("multifd send is exiting"),
        }
    }

    /// Добавить страницу в текущий батч. Полный батч или чужой блок сначала
    /// уходят flush'ем, затем страница кладётся в уже пустой батч.
    pub fn enqueue_page(&mut self, block: &Arc<RamBlock>, offset: u64) -> Result<()> {
        loop {
            if self.current.enqueue(block, offset) {
                return Ok(());
            }
            self.flush()?;
        }
    }

    /// Передать текущий батч свободному каналу (hand-off). Пустой батч —
    /// no-op. Блокируется до готовности хотя бы одного канала.
    pub fn flush(&mut self) -> Result<()> {
        if self.shared.should_exit() {
            return Err(self.exit_error());
        }
        if self.current.is_empty() {
            return Ok(());
        }

        // Ждём, пока хотя бы один канал объявит готовность.
        self.shared.channels_ready.wait();

        let n = self.shared.slots.len();
        self.next_channel %= n;
        let mut i = self.next_channel;
        let slot = loop {
            if self.shared.should_exit() {
                return Err(self.exit_error());
            }
            let s = &self.shared.slots[i];
            // Сбросить pending_job может только сам воркер, поэтому ложное
            // false здесь невозможно.
            if !s.pending_job.load(Ordering::Acquire) {
                self.next_channel = (i + 1) % n;
                break s;
            }
            i = (i + 1) % n;
        };

        {
            let mut slot_batch = slot.batch.lock().unwrap();
            debug_assert!(slot_batch.is_empty(), "idle slot owns a non-empty batch");
            std::mem::swap(&mut *slot_batch, &mut self.current);
        }
        // Публикация батча до выставления флага: пара к load(Acquire) воркера.
        slot.pending_job.store(true, Ordering::Release);
        slot.sem.post();
        Ok(())
    }

    /// Барьер: каждый канал отправляет SYNC-пакет и подтверждает его.
    /// Возвращается только после рандеву всех каналов.
    pub fn sync(&mut self) -> Result<()> {
        if !self.current.is_empty() {
            self.flush()?;
        }

        for slot in &self.shared.slots {
            if self.shared.should_exit() {
                return Err(self.exit_error());
            }
            // Кроме нас pending_sync никто не выставляет.
            let was = slot.pending_sync.swap(true, Ordering::SeqCst);
            assert!(!was, "sync already pending on channel {}", slot.id);
            slot.sem.post();
        }
        for slot in &self.shared.slots {
            if self.shared.should_exit() {
                return Err(self.exit_error());
            }
            self.shared.channels_ready.wait();
            slot.sem_sync.wait();
        }

        for slot in &self.shared.slots {
            let pn = slot.last_packet_num.load(Ordering::Relaxed);
            self.shared.watermark.fetch_max(pn, Ordering::SeqCst);
        }
        debug!(
            "multifd send sync complete, packet_num watermark {}",
            self.shared.watermark.load(Ordering::SeqCst)
        );
        Ok(())
    }

    /// Остановить транспорт: разбудить воркеров, оборвать I/O, дождаться
    /// потоков. Повторный вызов — no-op.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.shared.terminate();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
        debug!(
            "multifd send shut down: {} packets total",
            self.shared.packet_num.load(Ordering::SeqCst)
        );
    }

    pub fn is_exiting(&self) -> bool {
        self.shared.should_exit()
    }

    /// Следующий неназначенный глобальный номер пакета (== количеству
    /// отправленных).
    pub fn packet_count(&self) -> u64 {
        self.shared.packet_num.load(Ordering::SeqCst)
    }

    /// Максимальный номер пакета, подтверждённый барьером.
    pub fn watermark(&self) -> u64 {
        self.shared.watermark.load(Ordering::SeqCst)
    }

    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        self.shared
            .slots
            .iter()
            .map(|s| ChannelStats {
                id: s.id,
                packets: s.packets_sent.load(Ordering::Relaxed),
                pages: s.pages_sent.load(Ordering::Relaxed),
                bytes: s.bytes_sent.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl Drop for FerrySender {
    fn drop(&mut self) {
        self.shutdown();
    }
}
