//! Centralized configuration and builder for the multifd transport.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - FerryConfig::from_env() reads the RF_* env vars; the builder overrides.
//! - Both sides of a migration must agree on page_size / packet_size /
//!   channels / uuid; validate() enforces local consistency only.
//!
//! ENV:
//! - RF_CHANNELS      — number of parallel channels (default 2)
//! - RF_PAGE_SIZE     — page size in bytes, power of two (default 4096)
//! - RF_PACKET_SIZE   — payload budget of one packet (default 524288)
//! - RF_UUID          — session uuid, 32 hex chars (default zeros)
//! - RF_TLS           — upgrade channels to TLS (0|1)
//!
//! TLS details (CA file, PFX identity, SNI) are read by the channel layer
//! from RF_TLS_* at connect/accept time, see channel::tls.

use std::fmt;

use anyhow::{anyhow, Result};

use crate::consts::{DEFAULT_CHANNELS, DEFAULT_PACKET_SIZE, DEFAULT_PAGE_SIZE, UUID_LEN};
use crate::util::{env_bool, env_usize, parse_uuid};

/// Top-level configuration, shared by the send and recv sides.
#[derive(Clone, Debug)]
pub struct FerryConfig {
    /// Number of parallel channels (worker threads). Env: RF_CHANNELS.
    pub channels: usize,

    /// Guest page size in bytes. Env: RF_PAGE_SIZE.
    pub page_size: usize,

    /// Payload budget of one packet; batch capacity = packet_size / page_size.
    /// Env: RF_PACKET_SIZE.
    pub packet_size: usize,

    /// Session uuid; the receiver rejects channels with a foreign uuid.
    /// Env: RF_UUID.
    pub uuid: [u8; UUID_LEN],

    /// Upgrade every channel to TLS. Env: RF_TLS.
    pub tls: bool,
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS,
            page_size: DEFAULT_PAGE_SIZE,
            packet_size: DEFAULT_PACKET_SIZE,
            uuid: [0u8; UUID_LEN],
            tls: false,
        }
    }
}

impl FerryConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        let n = env_usize("RF_CHANNELS");
        if n > 0 {
            cfg.channels = n;
        }
        let n = env_usize("RF_PAGE_SIZE");
        if n > 0 {
            cfg.page_size = n;
        }
        let n = env_usize("RF_PACKET_SIZE");
        if n > 0 {
            cfg.packet_size = n;
        }
        if let Ok(v) = std::env::var("RF_UUID") {
            if let Ok(u) = parse_uuid(&v) {
                cfg.uuid = u;
            }
        }
        cfg.tls = env_bool("RF_TLS");

        cfg
    }

    /// Batch/packet page capacity derived from the two size tunables.
    pub fn page_capacity(&self) -> usize {
        self.packet_size / self.page_size
    }

    /// Check internal consistency; both controllers call this in setup().
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > u8::MAX as usize {
            return Err(anyhow!(
                "channels must be in 1..=255, got {}",
                self.channels
            ));
        }
        if self.page_size < 1024 || !self.page_size.is_power_of_two() {
            return Err(anyhow!(
                "page_size must be a power of two >= 1024, got {}",
                self.page_size
            ));
        }
        if self.packet_size == 0 || self.packet_size % self.page_size != 0 {
            return Err(anyhow!(
                "packet_size ({}) must be a non-zero multiple of page_size ({})",
                self.packet_size,
                self.page_size
            ));
        }
        Ok(())
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_channels(mut self, n: usize) -> Self {
        self.channels = n;
        self
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n;
        self
    }

    pub fn with_packet_size(mut self, n: usize) -> Self {
        self.packet_size = n;
        self
    }

    pub fn with_uuid(mut self, uuid: [u8; UUID_LEN]) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_tls(mut self, on: bool) -> Self {
        self.tls = on;
        self
    }
}

impl fmt::Display for FerryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FerryConfig {{ channels: {}, page_size: {}, packet_size: {}, capacity: {}, tls: {} }}",
            self.channels,
            self.page_size,
            self.packet_size,
            self.page_capacity(),
            self.tls,
        )
    }
}
