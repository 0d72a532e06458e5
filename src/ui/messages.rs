use std::path::PathBuf;

use crate::error::{ErrorCategory, InstallerError, to_plain_text};
use crate::models::{ChipInfo, SerialPortEntry};
use crate::ui::dialogs::ActionId;
use crate::utils::bootloader_info::BootloaderInfo;
use crate::utils::repo::BoardCatalog;
use crate::utils::settings::Settings;
use crate::utils::tracker::Progress;
use crate::utils::validation::DriveKind;

/// A failed step, already reduced to displayable text
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        Self {
            category: InstallerError::category_of(&error),
            message: to_plain_text(&format!("{:#}", error)),
        }
    }
}

impl From<InstallerError> for Failure {
    fn from(error: InstallerError) -> Self {
        Self {
            category: error.category(),
            message: to_plain_text(&error.to_string()),
        }
    }
}

/// Progress events streamed out of long running steps
#[derive(Debug, Clone)]
pub enum WorkEvent {
    Progress(Progress),
    Log(String),
}

/// Credentials form inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Ssid,
    Password,
    WebApiPassword,
    WebApiPort,
}

#[derive(Debug, Clone)]
pub enum Message {
    CatalogLoaded(Result<BoardCatalog, Failure>),
    OpenInstaller,
    CloseDialog,
    Action(ActionId),

    PortsListed(Result<Vec<SerialPortEntry>, Failure>),
    BootloaderConnected(Result<ChipInfo, Failure>),
    ReplConnected(Result<(), Failure>),
    ConnectionReleased,
    BaudRateSelected(u32),

    Work(WorkEvent),
    EraseFinished(Result<(), Failure>),
    FlashFinished(Result<Option<BootloaderInfo>, Failure>),
    BootloaderLabels(Option<BootloaderInfo>),
    CopyFinished(Result<PathBuf, Failure>),

    DrivePicked(DriveKind, Option<PathBuf>),

    FormChanged(CredentialField, String),
    SettingsLoaded(Result<Settings, Failure>),
    SettingsSaved(Result<Option<String>, Failure>),
}
