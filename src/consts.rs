//! Общие константы wire-протокола (init frame, packet header, флаги).

// -------- Protocol identity --------
pub const MULTIFD_MAGIC: u32 = 0x1122_3344;
pub const MULTIFD_VERSION: u32 = 1;

// -------- Packet flags (u32 bitset) --------
// Бит 0 — sync barrier. Биты 1.. — селектор кодека страниц.
pub const FLAG_SYNC: u32 = 1 << 0;
pub const FLAG_NOCOMP: u32 = 0 << 1;
// Зарезервировано под будущие кодеки (zlib/zstd в протоколе-источнике).
pub const FLAG_ZLIB: u32 = 1 << 1;
pub const FLAG_ZSTD: u32 = 2 << 1;
pub const FLAG_COMPRESSION_MASK: u32 = 7 << 1;

// -------- Init frame (однократно на канал, sender -> receiver) --------
// Layout (64 байта, все integers BE):
// [magic u32][version u32][uuid 16][id u8][reserved 7][reserved 32]
pub const INIT_FRAME_SIZE: usize = 64;
pub const INIT_OFF_MAGIC: usize = 0;
pub const INIT_OFF_VERSION: usize = 4;
pub const INIT_OFF_UUID: usize = 8;
pub const INIT_OFF_ID: usize = 24;

pub const UUID_LEN: usize = 16;

// -------- Packet header --------
// Layout (320 байт + offsets, все integers BE):
// [magic u32][version u32][flags u32][pages_alloc u32][normal_pages u32]
// [next_packet_size u32][packet_num u64][reserved 32]
// [ramblock_name 256, NUL-padded]
// затем offsets: pages_alloc * u64 (значимы первые normal_pages).
pub const PACKET_HDR_SIZE: usize = 320;
pub const PKT_OFF_MAGIC: usize = 0;
pub const PKT_OFF_VERSION: usize = 4;
pub const PKT_OFF_FLAGS: usize = 8;
pub const PKT_OFF_PAGES_ALLOC: usize = 12;
pub const PKT_OFF_NORMAL_PAGES: usize = 16;
pub const PKT_OFF_NEXT_PACKET_SIZE: usize = 20;
pub const PKT_OFF_PACKET_NUM: usize = 24;
pub const PKT_OFF_RAMBLOCK_NAME: usize = 64;
pub const RAMBLOCK_NAME_LEN: usize = 256;

// -------- Defaults --------
// Бюджет полезной нагрузки одного пакета; ёмкость батча = packet_size / page_size.
pub const DEFAULT_PACKET_SIZE: usize = 512 * 1024;
pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_CHANNELS: usize = 2;
