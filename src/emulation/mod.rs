//! Network-condition emulation
//!
//! A session may carry an optional network overlay affecting subsequent
//! resource loads. The overlay is absent until set, retrievable only while
//! set, and cleared by deletion. Conditions can be given explicitly or by a
//! named profile from a compile-time table.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Network-condition overlay for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConditions {
    /// Additional round-trip latency in milliseconds
    pub latency: u64,
    /// Download throughput in bytes per second
    pub download_throughput: u64,
    /// Upload throughput in bytes per second
    pub upload_throughput: u64,
    /// When true, all resource loads fail
    #[serde(default)]
    pub offline: bool,
}

/// Named profiles: (latency ms, download B/s, upload B/s, offline)
static NETWORK_PROFILES: phf::Map<&'static str, (u64, u64, u64, bool)> = phf::phf_map! {
    "GPRS" => (500, 50 * 1024, 20 * 1024, false),
    "Regular2G" => (300, 250 * 1024, 50 * 1024, false),
    "Good2G" => (150, 450 * 1024, 150 * 1024, false),
    "Regular3G" => (100, 750 * 1024, 250 * 1024, false),
    "Good3G" => (40, 1536 * 1024, 768 * 1024, false),
    "Regular4G" => (20, 4096 * 1024, 3072 * 1024, false),
    "DSL" => (5, 2048 * 1024, 2048 * 1024, false),
    "WiFi" => (2, 30720 * 1024, 15360 * 1024, false),
    "Offline" => (0, 0, 0, true),
};

impl NetworkConditions {
    /// Look up a named profile
    pub fn from_profile(name: &str) -> Result<Self> {
        NETWORK_PROFILES
            .get(name)
            .map(|&(latency, download, upload, offline)| Self {
                latency,
                download_throughput: download,
                upload_throughput: upload,
                offline,
            })
            .ok_or_else(|| Error::unknown(format!("network profile '{}' not found", name)))
    }
}

/// Error returned when conditions are retrieved while unset
pub fn conditions_not_set() -> Error {
    Error::unknown("network conditions must be set before it can be retrieved")
}
