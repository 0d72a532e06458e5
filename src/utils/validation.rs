/// Validation utilities for picked drives and the credentials form
use std::path::Path;

use crate::error::InstallerError;

/// File present at the root of a UF2 bootloader drive
pub const BOOT_DRIVE_MARKER: &str = "INFO_UF2.TXT";
/// File present at the root of the CIRCUITPY drive
pub const CIRCUITPY_DRIVE_MARKER: &str = "boot_out.txt";

/// Which managed volume a picked directory should be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveKind {
    Boot,
    CircuitPy,
}

impl DriveKind {
    pub fn marker(&self) -> &'static str {
        match self {
            DriveKind::Boot => BOOT_DRIVE_MARKER,
            DriveKind::CircuitPy => CIRCUITPY_DRIVE_MARKER,
        }
    }
}

/// Accept `dir` only if it carries the marker file of `kind`
pub fn validate_drive(dir: &Path, kind: DriveKind) -> Result<(), InstallerError> {
    let marker = kind.marker();
    if dir.join(marker).is_file() {
        Ok(())
    } else {
        Err(InstallerError::InvalidVolume {
            marker: marker.to_string(),
        })
    }
}

/// SSIDs are 1 to 32 bytes
pub fn is_valid_ssid(ssid: &str) -> bool {
    !ssid.is_empty() && ssid.len() <= 32
}

/// WPA passphrases are 8 to 63 characters; an empty one means an open network
pub fn is_valid_wifi_password(password: &str) -> bool {
    password.is_empty() || (8..=63).contains(&password.chars().count())
}

/// Port numbers for the web workflow
pub fn parse_port(port: &str) -> Option<i64> {
    let trimmed = port.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<u16>()
        .ok()
        .filter(|p| *p > 0)
        .map(i64::from)
}
