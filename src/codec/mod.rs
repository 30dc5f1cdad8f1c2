//! codec — стратегия покадровой упаковки страниц.
//!
//! Таблица операций, в которую втыкается метод сжатия: подготовка пакета на
//! отправителе и чтение payload на получателе. Реализован только NoComp;
//! биты zlib/zstd в протоколе зарезервированы (см. consts).

pub mod nocomp;

use std::sync::Arc;

use anyhow::Result;

use crate::batch::PageBatch;
use crate::channel::Channel;
use crate::ram::RamBlock;

pub use nocomp::NoComp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionKind {
    None,
}

pub trait PageCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Биты селектора кодека в поле flags пакета.
    fn flag(&self) -> u32;

    fn send_setup(&self, _channel_id: u8) -> Result<()> {
        Ok(())
    }

    /// Сериализовать батч: заполнить hdr_buf и вернуть iovec для одной
    /// векторной записи (заголовок + payload страниц).
    fn send_prepare<'a>(
        &self,
        hdr_buf: &'a mut [u8],
        batch: &'a PageBatch,
        page_size: usize,
        capacity: usize,
        packet_num: u64,
    ) -> Result<Vec<&'a [u8]>>;

    fn recv_setup(&self, _channel_id: u8) -> Result<()> {
        Ok(())
    }

    /// Прочитать payload пакета прямо в память блока по уже проверенным
    /// offsets (одно векторное чтение на пакет).
    fn recv_pages(
        &self,
        chan: &mut Channel,
        block: &Arc<RamBlock>,
        offsets: &[u64],
        flags: u32,
        next_packet_size: u32,
        page_size: usize,
    ) -> Result<()>;

    fn recv_cleanup(&self, _channel_id: u8) {}
}

static NOCOMP_CODEC: NoComp = NoComp;

pub fn codec_for(kind: CompressionKind) -> &'static dyn PageCodec {
    match kind {
        CompressionKind::None => &NOCOMP_CODEC,
    }
}
