//! Handshake-кадр канала: отправляется один раз сразу после подключения.
//!
//! Формат (64 байта, BE):
//!   [magic u32][version u32][uuid 16][id u8][reserved 7][reserved 32]

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ByteOrder};

use crate::consts::{
    INIT_FRAME_SIZE, INIT_OFF_ID, INIT_OFF_MAGIC, INIT_OFF_UUID, INIT_OFF_VERSION, MULTIFD_MAGIC,
    MULTIFD_VERSION, UUID_LEN,
};
use crate::util::format_uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitFrame {
    pub uuid: [u8; UUID_LEN],
    pub id: u8,
}

impl InitFrame {
    pub fn encode(&self) -> [u8; INIT_FRAME_SIZE] {
        let mut buf = [0u8; INIT_FRAME_SIZE];
        BigEndian::write_u32(&mut buf[INIT_OFF_MAGIC..INIT_OFF_MAGIC + 4], MULTIFD_MAGIC);
        BigEndian::write_u32(
            &mut buf[INIT_OFF_VERSION..INIT_OFF_VERSION + 4],
            MULTIFD_VERSION,
        );
        buf[INIT_OFF_UUID..INIT_OFF_UUID + UUID_LEN].copy_from_slice(&self.uuid);
        buf[INIT_OFF_ID] = self.id;
        buf
    }

    /// Разобрать и провалидировать handshake на принимающей стороне.
    /// Возвращает id канала; любая ошибка фатальна для всей миграции.
    pub fn decode(buf: &[u8], expected_uuid: &[u8; UUID_LEN], channels: usize) -> Result<u8> {
        if buf.len() < INIT_FRAME_SIZE {
            return Err(anyhow!(
                "short init frame: {} bytes (need {})",
                buf.len(),
                INIT_FRAME_SIZE
            ));
        }
        let magic = BigEndian::read_u32(&buf[INIT_OFF_MAGIC..INIT_OFF_MAGIC + 4]);
        if magic != MULTIFD_MAGIC {
            return Err(anyhow!(
                "init frame magic {:#x}, expected {:#x}",
                magic,
                MULTIFD_MAGIC
            ));
        }
        let version = BigEndian::read_u32(&buf[INIT_OFF_VERSION..INIT_OFF_VERSION + 4]);
        if version != MULTIFD_VERSION {
            return Err(anyhow!(
                "init frame version {}, expected {}",
                version,
                MULTIFD_VERSION
            ));
        }
        let mut uuid = [0u8; UUID_LEN];
        uuid.copy_from_slice(&buf[INIT_OFF_UUID..INIT_OFF_UUID + UUID_LEN]);
        let id = buf[INIT_OFF_ID];
        if uuid != *expected_uuid {
            return Err(anyhow!(
                "init frame uuid '{}' does not match session uuid '{}' (channel {})",
                format_uuid(&uuid),
                format_uuid(expected_uuid),
                id
            ));
        }
        if (id as usize) >= channels {
            return Err(anyhow!(
                "init frame channel id {} is out of range (channels {})",
                id,
                channels
            ));
        }
        Ok(id)
    }
}
