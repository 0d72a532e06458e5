//! Installer error taxonomy and the single path that turns errors into
//! text safe to show in a dialog.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Connectivity(String),

    #[error("This board is an {expected}, but the connected chip reports {found}. Check that you selected the right board.")]
    ChipMismatch { expected: String, found: String },

    #[error("The baud rate can only be changed while disconnected.")]
    BaudRateLocked,

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Could not find {member} inside {archive}")]
    MemberNotFound { member: String, archive: String },

    #[error("The selected folder is missing {marker}. Select the correct drive.")]
    InvalidVolume { marker: String },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Board catalog error: {0}")]
    Catalog(String),
}

/// How a failure is handled once it reaches the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Picker dismissed; never shown
    UserCancelled,
    /// Shown, and the active transport is torn down
    Connectivity,
    /// Shown, the flow stops where it is
    Data,
}

impl InstallerError {
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            InstallerError::Cancelled => ErrorCategory::UserCancelled,
            InstallerError::Connectivity(_) | InstallerError::ChipMismatch { .. } => {
                ErrorCategory::Connectivity
            }
            InstallerError::BaudRateLocked
            | InstallerError::Download(_)
            | InstallerError::MemberNotFound { .. }
            | InstallerError::InvalidVolume { .. }
            | InstallerError::Settings(_)
            | InstallerError::Catalog(_) => ErrorCategory::Data,
        }
    }

    /// Classify an error coming out of a helper that returns `anyhow::Error`.
    pub fn category_of(error: &anyhow::Error) -> ErrorCategory {
        match error.downcast_ref::<InstallerError>() {
            Some(e) => e.category(),
            None => ErrorCategory::Data,
        }
    }
}

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Coerce an arbitrary message to plain text: markup is dropped and control
/// characters other than newlines and tabs are removed.
pub fn to_plain_text(message: &str) -> String {
    let stripped = MARKUP.replace_all(message, "");
    stripped
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_strips_markup_and_controls() {
        assert_eq!(
            to_plain_text("<b>Port busy</b>\u{1b}[31m\nretry"),
            "Port busy[31m\nretry"
        );
        assert_eq!(to_plain_text("  plain  "), "plain");
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            InstallerError::Cancelled.category(),
            ErrorCategory::UserCancelled
        );
        assert_eq!(
            InstallerError::ChipMismatch {
                expected: "ESP32-S2".into(),
                found: "esp32".into()
            }
            .category(),
            ErrorCategory::Connectivity
        );
        // A refused baud change keeps the connection
        assert_eq!(InstallerError::BaudRateLocked.category(), ErrorCategory::Data);
        let wrapped = anyhow::Error::new(InstallerError::MemberNotFound {
            member: "combined.bin".into(),
            archive: "boot.zip".into(),
        });
        assert_eq!(InstallerError::category_of(&wrapped), ErrorCategory::Data);
        assert_eq!(
            InstallerError::category_of(&anyhow::anyhow!("socket closed")),
            ErrorCategory::Data
        );
    }
}
