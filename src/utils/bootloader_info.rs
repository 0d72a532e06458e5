use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tracing::debug;

/// Image inside the bootloader archive that gets flashed and scanned
pub const BOOTLOADER_IMAGE: &str = "combined.bin";

// Volume label of the UF2 drive, e.g. "FTHRS2BOOT"
static DRIVE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)([A-Z0-9]{2,8}BOOT)\x00").unwrap());

// USB string descriptor (bDescriptorType 0x03) holding the product name in UTF-16LE
static PORT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u)\x03((?:[\x20-\x7E]\x00){3,64})").unwrap());

/// Labels recovered from a bootloader image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootloaderInfo {
    /// Name of the drive the board shows in bootloader mode
    pub drive_label: Option<String>,
    /// Name of the serial port the bootloader enumerates as
    pub port_label: Option<String>,
}

impl BootloaderInfo {
    pub fn extract(image: &[u8]) -> Self {
        let drive_label = DRIVE_LABEL
            .captures(image)
            .and_then(|caps| caps.get(1))
            .map(|m| strip_nul(m.as_bytes()))
            .filter(|s| !s.is_empty());

        let port_label = PORT_LABEL
            .captures(image)
            .and_then(|caps| caps.get(1))
            .map(|m| strip_nul(m.as_bytes()))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        debug!(
            "Bootloader labels: drive={:?}, port={:?}",
            drive_label, port_label
        );

        Self {
            drive_label,
            port_label,
        }
    }

    /// Drive name to tell the user to pick, with a generic fallback
    pub fn drive_name(&self) -> &str {
        self.drive_label.as_deref().unwrap_or("...BOOT")
    }
}

fn strip_nul(bytes: &[u8]) -> String {
    let filtered: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0).collect();
    String::from_utf8_lossy(&filtered).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16_descriptor(text: &str) -> Vec<u8> {
        let mut out = vec![(2 + text.len() * 2) as u8, 0x03];
        for b in text.bytes() {
            out.push(b);
            out.push(0);
        }
        out
    }

    #[test]
    fn test_extracts_both_labels() {
        let mut image = vec![0xFFu8; 64];
        image.extend_from_slice(b"\x00\x00FTHRS2BOOT\x00\x00");
        image.extend_from_slice(&[0x12, 0x34]);
        image.extend_from_slice(&utf16_descriptor("Feather ESP32-S2"));
        image.extend_from_slice(&[0xFF; 16]);

        let info = BootloaderInfo::extract(&image);
        assert_eq!(info.drive_label.as_deref(), Some("FTHRS2BOOT"));
        assert_eq!(info.port_label.as_deref(), Some("Feather ESP32-S2"));
        assert_eq!(info.drive_name(), "FTHRS2BOOT");
    }

    #[test]
    fn test_missing_labels() {
        let info = BootloaderInfo::extract(&[0u8; 128]);
        assert_eq!(info, BootloaderInfo::default());
        assert_eq!(info.drive_name(), "...BOOT");
    }
}
