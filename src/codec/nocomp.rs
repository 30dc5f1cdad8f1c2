//! Кодек без сжатия: payload пакета — сырые страницы как есть.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::batch::PageBatch;
use crate::channel::Channel;
use crate::consts::{FLAG_COMPRESSION_MASK, FLAG_NOCOMP};
use crate::ram::RamBlock;
use crate::wire::PacketHeader;

use super::PageCodec;

pub struct NoComp;

impl PageCodec for NoComp {
    fn name(&self) -> &'static str {
        "nocomp"
    }

    fn flag(&self) -> u32 {
        FLAG_NOCOMP
    }

    fn send_prepare<'a>(
        &self,
        hdr_buf: &'a mut [u8],
        batch: &'a PageBatch,
        page_size: usize,
        capacity: usize,
        packet_num: u64,
    ) -> Result<Vec<&'a [u8]>> {
        let block = batch
            .block()
            .ok_or_else(|| anyhow!("send_prepare on an empty batch"))?;
        if block.page_size() != page_size {
            return Err(anyhow!(
                "block '{}' page size {} != transport page size {}",
                block.name(),
                block.page_size(),
                page_size
            ));
        }
        let n = batch.len();
        let hdr = PacketHeader {
            flags: self.flag(),
            pages_alloc: capacity as u32,
            normal_pages: n as u32,
            next_packet_size: (n * page_size) as u32,
            packet_num,
            ramblock: block.name().to_string(),
            offsets: batch.offsets().to_vec(),
        };
        hdr.encode_into(&mut *hdr_buf)?;
        let hdr_slice: &'a [u8] = hdr_buf;

        let mut iov: Vec<&'a [u8]> = Vec::with_capacity(n + 1);
        iov.push(hdr_slice);
        for &off in batch.offsets() {
            // SAFETY: страницы батча никто не пишет, пока слот владеет им.
            iov.push(unsafe { block.page_slice(off) });
        }
        Ok(iov)
    }

    fn recv_pages(
        &self,
        chan: &mut Channel,
        block: &Arc<RamBlock>,
        offsets: &[u64],
        flags: u32,
        next_packet_size: u32,
        page_size: usize,
    ) -> Result<()> {
        let comp = flags & FLAG_COMPRESSION_MASK;
        if comp != FLAG_NOCOMP {
            return Err(anyhow!(
                "packet compression flags {:#x}, expected {:#x} (nocomp)",
                comp,
                FLAG_NOCOMP
            ));
        }
        if block.page_size() != page_size {
            return Err(anyhow!(
                "block '{}' page size {} != transport page size {}",
                block.name(),
                block.page_size(),
                page_size
            ));
        }
        let expected = (offsets.len() * page_size) as u32;
        if next_packet_size != expected {
            return Err(anyhow!(
                "next_packet_size {} != {} ({} pages of {})",
                next_packet_size,
                expected,
                offsets.len(),
                page_size
            ));
        }
        // Дубликат offset внутри пакета дал бы два &mut на одну страницу.
        for (i, a) in offsets.iter().enumerate() {
            if offsets[..i].contains(a) {
                return Err(anyhow!("duplicate page offset {} within one packet", a));
            }
        }

        // SAFETY: offsets проверены по границам и различны; единственный
        // писатель каждой страницы на время чтения — этот поток.
        let mut pages: Vec<&mut [u8]> = offsets
            .iter()
            .map(|&off| unsafe { block.page_slice_mut(off) })
            .collect();
        chan.readv_all(&mut pages)
    }
}
