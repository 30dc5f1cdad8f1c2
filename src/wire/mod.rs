//! wire — побайтовые кодеки протокола (без I/O).
//!
//! - init: 64-байтовый handshake-кадр канала.
//! - packet: заголовок пакета страниц.
//!
//! Все multi-byte целые — big-endian. Любое расхождение magic/version/границ
//! репортится ошибкой; молчаливых обрезаний нет.

pub mod init;
pub mod packet;

pub use init::InitFrame;
pub use packet::{header_len, PacketHeader};
