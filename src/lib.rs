#![allow(non_snake_case)]

// Базовые модули
pub mod consts;
pub mod config;
pub mod metrics;
pub mod state;
pub mod util;

// Примитивы
pub mod sem;    // src/sem.rs — счётный семафор (Mutex + Condvar)
pub mod ram;    // src/ram.rs — блоки гостевой памяти + реестр
pub mod batch;  // src/batch.rs — батч страниц одного блока

// Протокол
pub mod wire;    // src/wire/{mod,init,packet}.rs — побайтовые кодеки
pub mod channel; // src/channel/mod.rs — TCP/TLS канал, shutdown-ручка
pub mod codec;   // src/codec/{mod,nocomp}.rs — стратегия упаковки страниц

// Транспорт
pub mod send; // src/send/{mod,worker}.rs — контроллер + воркеры отправки
pub mod recv; // src/recv/{mod,worker}.rs — контроллер + воркеры приёма

// Удобные реэкспорты
pub use batch::PageBatch;
pub use channel::Channel;
pub use config::FerryConfig;
pub use ram::{RamBlock, RamRegistry};
pub use recv::FerryReceiver;
pub use send::{tcp_connector, ChannelConnector, FerrySender};
pub use state::{MigrationState, MigrationStatus};
pub use wire::{InitFrame, PacketHeader};
