// Shared domain types used across transports, helpers and the UI

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stop flag shared with a background reader thread
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Which of the two serial adapters a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Bootloader,
    Repl,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Bootloader => write!(f, "bootloader"),
            TransportKind::Repl => write!(f, "REPL"),
        }
    }
}

/// Chip details reported by the bootloader handshake
#[derive(Debug, Clone, PartialEq)]
pub struct ChipInfo {
    pub chip: String,
    pub revision: Option<String>,
    pub flash_size: String,
    pub mac_address: Option<String>,
}

impl ChipInfo {
    /// True when `family` names this chip, ignoring case and punctuation
    /// ("ESP32-S2" and "esp32s2" are the same family).
    pub fn matches_family(&self, family: &str) -> bool {
        normalize_family(&self.chip) == normalize_family(family)
    }
}

pub fn normalize_family(family: &str) -> String {
    family
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A serial port the user can pick
#[derive(Debug, Clone, PartialEq)]
pub struct SerialPortEntry {
    pub name: String,
    pub description: String,
}

impl std::fmt::Display for SerialPortEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.description)
        }
    }
}
