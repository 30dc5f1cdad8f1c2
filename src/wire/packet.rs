//! Заголовок пакета страниц.
//!
//! Формат (320 байт + offsets, BE):
//!   [magic u32][version u32][flags u32][pages_alloc u32][normal_pages u32]
//!   [next_packet_size u32][packet_num u64][reserved 32]
//!   [ramblock_name 256, NUL-padded][offsets pages_alloc * u64]
//!
//! Обе стороны размечают буфер заголовка от СВОЕЙ настроенной ёмкости;
//! получатель отвергает pages_alloc больше неё до чтения чего-либо ещё.

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ByteOrder};

use crate::consts::{
    MULTIFD_MAGIC, MULTIFD_VERSION, PACKET_HDR_SIZE, PKT_OFF_FLAGS, PKT_OFF_MAGIC,
    PKT_OFF_NEXT_PACKET_SIZE, PKT_OFF_NORMAL_PAGES, PKT_OFF_PACKET_NUM, PKT_OFF_PAGES_ALLOC,
    PKT_OFF_RAMBLOCK_NAME, PKT_OFF_VERSION, RAMBLOCK_NAME_LEN,
};

/// Полная длина заголовка на проводе при данной ёмкости.
#[inline]
pub fn header_len(pages_alloc: usize) -> usize {
    PACKET_HDR_SIZE + 8 * pages_alloc
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: u32,
    pub pages_alloc: u32,
    pub normal_pages: u32,
    pub next_packet_size: u32,
    pub packet_num: u64,
    /// Пустая строка для sync-only пакетов (normal_pages == 0).
    pub ramblock: String,
    /// Декодировано normal_pages значений; при encode длина должна совпадать
    /// с normal_pages.
    pub offsets: Vec<u64>,
}

impl PacketHeader {
    /// Закодировать в buf длиной ровно header_len(pages_alloc).
    /// Хвост массива offsets за normal_pages остаётся нулевым.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        let alloc = self.pages_alloc as usize;
        if buf.len() != header_len(alloc) {
            return Err(anyhow!(
                "packet header buffer {} != expected {}",
                buf.len(),
                header_len(alloc)
            ));
        }
        if self.offsets.len() != self.normal_pages as usize {
            return Err(anyhow!(
                "offsets length {} != normal_pages {}",
                self.offsets.len(),
                self.normal_pages
            ));
        }
        if self.normal_pages > self.pages_alloc {
            return Err(anyhow!(
                "normal_pages {} exceeds pages_alloc {}",
                self.normal_pages,
                self.pages_alloc
            ));
        }
        if self.ramblock.len() >= RAMBLOCK_NAME_LEN {
            return Err(anyhow!(
                "ram block name '{}' does not fit the {}-byte wire field",
                self.ramblock,
                RAMBLOCK_NAME_LEN
            ));
        }

        // Буфер переиспользуется между пакетами — занулить целиком.
        buf.fill(0);
        BigEndian::write_u32(&mut buf[PKT_OFF_MAGIC..PKT_OFF_MAGIC + 4], MULTIFD_MAGIC);
        BigEndian::write_u32(
            &mut buf[PKT_OFF_VERSION..PKT_OFF_VERSION + 4],
            MULTIFD_VERSION,
        );
        BigEndian::write_u32(&mut buf[PKT_OFF_FLAGS..PKT_OFF_FLAGS + 4], self.flags);
        BigEndian::write_u32(
            &mut buf[PKT_OFF_PAGES_ALLOC..PKT_OFF_PAGES_ALLOC + 4],
            self.pages_alloc,
        );
        BigEndian::write_u32(
            &mut buf[PKT_OFF_NORMAL_PAGES..PKT_OFF_NORMAL_PAGES + 4],
            self.normal_pages,
        );
        BigEndian::write_u32(
            &mut buf[PKT_OFF_NEXT_PACKET_SIZE..PKT_OFF_NEXT_PACKET_SIZE + 4],
            self.next_packet_size,
        );
        BigEndian::write_u64(
            &mut buf[PKT_OFF_PACKET_NUM..PKT_OFF_PACKET_NUM + 8],
            self.packet_num,
        );
        buf[PKT_OFF_RAMBLOCK_NAME..PKT_OFF_RAMBLOCK_NAME + self.ramblock.len()]
            .copy_from_slice(self.ramblock.as_bytes());
        for (i, off) in self.offsets.iter().enumerate() {
            let at = PACKET_HDR_SIZE + 8 * i;
            BigEndian::write_u64(&mut buf[at..at + 8], *off);
        }
        Ok(())
    }

    /// Разобрать заголовок, принятый стороной с ёмкостью own_capacity.
    pub fn decode(buf: &[u8], own_capacity: usize) -> Result<PacketHeader> {
        if buf.len() < PACKET_HDR_SIZE {
            return Err(anyhow!(
                "short packet header: {} bytes (need at least {})",
                buf.len(),
                PACKET_HDR_SIZE
            ));
        }
        let magic = BigEndian::read_u32(&buf[PKT_OFF_MAGIC..PKT_OFF_MAGIC + 4]);
        if magic != MULTIFD_MAGIC {
            return Err(anyhow!(
                "packet magic {:#x}, expected {:#x}",
                magic,
                MULTIFD_MAGIC
            ));
        }
        let version = BigEndian::read_u32(&buf[PKT_OFF_VERSION..PKT_OFF_VERSION + 4]);
        if version != MULTIFD_VERSION {
            return Err(anyhow!(
                "packet version {}, expected {}",
                version,
                MULTIFD_VERSION
            ));
        }
        let flags = BigEndian::read_u32(&buf[PKT_OFF_FLAGS..PKT_OFF_FLAGS + 4]);
        let pages_alloc = BigEndian::read_u32(&buf[PKT_OFF_PAGES_ALLOC..PKT_OFF_PAGES_ALLOC + 4]);
        if pages_alloc as usize > own_capacity {
            return Err(anyhow!(
                "packet pages_alloc {} exceeds configured capacity {}",
                pages_alloc,
                own_capacity
            ));
        }
        let normal_pages =
            BigEndian::read_u32(&buf[PKT_OFF_NORMAL_PAGES..PKT_OFF_NORMAL_PAGES + 4]);
        if normal_pages > pages_alloc {
            return Err(anyhow!(
                "packet normal_pages {} exceeds pages_alloc {}",
                normal_pages,
                pages_alloc
            ));
        }
        let next_packet_size =
            BigEndian::read_u32(&buf[PKT_OFF_NEXT_PACKET_SIZE..PKT_OFF_NEXT_PACKET_SIZE + 4]);
        let packet_num = BigEndian::read_u64(&buf[PKT_OFF_PACKET_NUM..PKT_OFF_PACKET_NUM + 8]);

        // Имя блока терминируем защитно, даже если отправитель прислал 256
        // байт без NUL: обрезка по фиксированной ширине до использования.
        let name_field = &buf[PKT_OFF_RAMBLOCK_NAME..PKT_OFF_RAMBLOCK_NAME + RAMBLOCK_NAME_LEN];
        let name_end = name_field
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(RAMBLOCK_NAME_LEN - 1);
        let ramblock = String::from_utf8_lossy(&name_field[..name_end]).into_owned();

        let mut offsets = Vec::with_capacity(normal_pages as usize);
        if normal_pages > 0 {
            let need = header_len(pages_alloc as usize);
            if buf.len() < need {
                return Err(anyhow!(
                    "packet header truncated: {} bytes, need {} for pages_alloc {}",
                    buf.len(),
                    need,
                    pages_alloc
                ));
            }
            for i in 0..normal_pages as usize {
                let at = PACKET_HDR_SIZE + 8 * i;
                offsets.push(BigEndian::read_u64(&buf[at..at + 8]));
            }
        }

        Ok(PacketHeader {
            flags,
            pages_alloc,
            normal_pages,
            next_packet_size,
            packet_num,
            ramblock,
            offsets,
        })
    }
}
