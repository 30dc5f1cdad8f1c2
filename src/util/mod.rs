//! util — общие утилиты (вынесено из разных модулей).
//!
//! Содержит:
//! - now_secs(): текущее Unix-время в секундах (u32, saturating).
//! - env_bool()/env_usize(): разбор ENV-переменных.
//! - decode_hex()/parse_uuid()/format_uuid(): работа с session UUID.

use anyhow::{anyhow, Result};

use crate::consts::UUID_LEN;

/// Текущее Unix-время в секундах, обрезанное к u32 (saturating).
#[inline]
pub fn now_secs() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs()).min(u32::MAX as u64) as u32
}

/// Прочитать ENV-переменную булева вида ("1|true|yes|on").
pub fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| s.to_ascii_lowercase())
        .map(|s| s == "1" || s == "true" || s == "yes" || s == "on")
        .unwrap_or(false)
}

/// Прочитать ENV-переменную как usize (0 если не задана/ошибка).
pub fn env_usize(name: &str) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(0)
}

/// Разбор hex-строки в байты (чётная длина).
pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err(anyhow!("hex string must have even length"));
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for i in (0..bytes.len()).step_by(2) {
        let h = (bytes[i] as char)
            .to_digit(16)
            .ok_or_else(|| anyhow!("invalid hex at pos {}", i))?;
        let l = (bytes[i + 1] as char)
            .to_digit(16)
            .ok_or_else(|| anyhow!("invalid hex at pos {}", i + 1))?;
        out.push(((h << 4) | l) as u8);
    }
    Ok(out)
}

/// Session UUID из hex-строки (ровно 32 hex-символа, допускаются дефисы).
pub fn parse_uuid(s: &str) -> Result<[u8; UUID_LEN]> {
    let compact: String = s.chars().filter(|c| *c != '-').collect();
    let bytes = decode_hex(&compact)?;
    if bytes.len() != UUID_LEN {
        return Err(anyhow!(
            "uuid must be {} bytes ({} hex chars), got {} bytes",
            UUID_LEN,
            UUID_LEN * 2,
            bytes.len()
        ));
    }
    let mut out = [0u8; UUID_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// UUID в каноническом виде для логов/ошибок.
pub fn format_uuid(uuid: &[u8; UUID_LEN]) -> String {
    let h = |r: std::ops::Range<usize>| -> String {
        uuid[r].iter().map(|b| format!("{:02x}", b)).collect()
    };
    format!(
        "{}-{}-{}-{}-{}",
        h(0..4),
        h(4..6),
        h(6..8),
        h(8..10),
        h(10..16)
    )
}
