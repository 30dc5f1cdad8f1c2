//! Минимальная state machine сессии миграции: статус + первый зафиксированный
//! сбой. Транспорт только репортит сюда ошибки и переводит сессию в Failed;
//! остальными переходами владеет вызывающая сторона.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MigrationStatus {
    Setup = 0,
    Active = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl MigrationStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => MigrationStatus::Setup,
            1 => MigrationStatus::Active,
            2 => MigrationStatus::Completed,
            4 => MigrationStatus::Cancelled,
            _ => MigrationStatus::Failed,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationStatus::Setup => "setup",
            MigrationStatus::Active => "active",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

pub struct MigrationState {
    status: AtomicU8,
    // Первый сбой побеждает; последующие только логируются вызывающим.
    error: Mutex<Option<String>>,
}

impl MigrationState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: AtomicU8::new(MigrationStatus::Setup as u8),
            error: Mutex::new(None),
        })
    }

    pub fn status(&self) -> MigrationStatus {
        MigrationStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn set_status(&self, st: MigrationStatus) {
        self.status.store(st as u8, Ordering::SeqCst);
    }

    /// Зафиксировать ошибку (первая побеждает) и перевести активную/строящуюся
    /// сессию в Failed. Возвращает true, если именно этот вызов записал ошибку.
    pub fn set_error(&self, msg: String) -> bool {
        let mut g = self.error.lock().unwrap();
        let first = g.is_none();
        if first {
            *g = Some(msg);
        }
        drop(g);
        match self.status() {
            MigrationStatus::Setup | MigrationStatus::Active => {
                self.set_status(MigrationStatus::Failed);
            }
            _ => {}
        }
        first
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }
}
