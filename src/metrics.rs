//! Lightweight global metrics for the transport.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Send path (bytes/packets/pages/sync-пакеты)
//! - Recv path
//! - Handshake / channel errors
//!
//! Снимок (MetricsSnapshot) сериализуется в JSON для `ramferry status` и
//! отдаётся Prometheus-экспортёром (ramferry_metrics).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Send path -----
static SEND_BYTES: AtomicU64 = AtomicU64::new(0);
static SEND_PACKETS: AtomicU64 = AtomicU64::new(0);
static SEND_PAGES: AtomicU64 = AtomicU64::new(0);
static SEND_SYNCS: AtomicU64 = AtomicU64::new(0);

// ----- Recv path -----
static RECV_BYTES: AtomicU64 = AtomicU64::new(0);
static RECV_PACKETS: AtomicU64 = AtomicU64::new(0);
static RECV_PAGES: AtomicU64 = AtomicU64::new(0);
static RECV_SYNCS: AtomicU64 = AtomicU64::new(0);

// ----- Failures -----
static HANDSHAKE_FAILURES: AtomicU64 = AtomicU64::new(0);
static CHANNEL_ERRORS: AtomicU64 = AtomicU64::new(0);

/// Счётчики одного канала (слота); читаются в любой момент, точны после join.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStats {
    pub id: u8,
    pub packets: u64,
    pub pages: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    // Send path
    pub send_bytes: u64,
    pub send_packets: u64,
    pub send_pages: u64,
    pub send_syncs: u64,

    // Recv path
    pub recv_bytes: u64,
    pub recv_packets: u64,
    pub recv_pages: u64,
    pub recv_syncs: u64,

    // Failures
    pub handshake_failures: u64,
    pub channel_errors: u64,
}

impl MetricsSnapshot {
    pub fn avg_pages_per_packet(&self) -> f64 {
        let data_packets = self.send_packets.saturating_sub(self.send_syncs);
        if data_packets == 0 {
            0.0
        } else {
            self.send_pages as f64 / data_packets as f64
        }
    }
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        send_bytes: SEND_BYTES.load(Ordering::Relaxed),
        send_packets: SEND_PACKETS.load(Ordering::Relaxed),
        send_pages: SEND_PAGES.load(Ordering::Relaxed),
        send_syncs: SEND_SYNCS.load(Ordering::Relaxed),
        recv_bytes: RECV_BYTES.load(Ordering::Relaxed),
        recv_packets: RECV_PACKETS.load(Ordering::Relaxed),
        recv_pages: RECV_PAGES.load(Ordering::Relaxed),
        recv_syncs: RECV_SYNCS.load(Ordering::Relaxed),
        handshake_failures: HANDSHAKE_FAILURES.load(Ordering::Relaxed),
        channel_errors: CHANNEL_ERRORS.load(Ordering::Relaxed),
    }
}

// ----- Recorders (send) -----
pub fn record_packet_sent(bytes: usize, pages: usize) {
    SEND_PACKETS.fetch_add(1, Ordering::Relaxed);
    SEND_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
    SEND_PAGES.fetch_add(pages as u64, Ordering::Relaxed);
}

pub fn record_sync_sent(bytes: usize) {
    SEND_PACKETS.fetch_add(1, Ordering::Relaxed);
    SEND_SYNCS.fetch_add(1, Ordering::Relaxed);
    SEND_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub fn record_handshake_sent(bytes: usize) {
    SEND_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
}

// ----- Recorders (recv) -----
pub fn record_packet_received(bytes: usize, pages: usize) {
    RECV_PACKETS.fetch_add(1, Ordering::Relaxed);
    RECV_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
    RECV_PAGES.fetch_add(pages as u64, Ordering::Relaxed);
}

pub fn record_sync_received() {
    RECV_SYNCS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (failures) -----
pub fn record_handshake_failure() {
    HANDSHAKE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_channel_error() {
    CHANNEL_ERRORS.fetch_add(1, Ordering::Relaxed);
}
