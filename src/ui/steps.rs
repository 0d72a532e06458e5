//! Installer steps: what each flow step shows and the work it starts.

use std::future::Future;
use std::path::{Path, PathBuf};

use iced::Task;
use iced::task::{self, Sipper};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::InstallerError;
use crate::models::{ChipInfo, SerialPortEntry, TransportKind};
use crate::transport::bootloader::{self, BootloaderTransport};
use crate::transport::{Connection, ReplTransport, SharedConnection};
use crate::ui::application::CircuitPythonInstaller;
use crate::ui::dialogs::{DialogData, DialogId, PredicateId};
use crate::ui::flow::FlowDescriptor;
use crate::ui::messages::{Failure, Message, WorkEvent};
use crate::utils::bootloader_info::{BOOTLOADER_IMAGE, BootloaderInfo};
use crate::utils::download::{Downloader, filename_from_url};
use crate::utils::settings::{
    DEFAULT_WEB_API_PORT, SettingValue, Settings, SettingsCodec, SettingsSource, WEB_API_PASSWORD_KEY,
    WEB_API_PORT_KEY, WIFI_PASSWORD_KEY, WIFI_SSID_KEY,
};
use crate::utils::tracker::Progress;
use crate::utils::validation::{DriveKind, is_valid_ssid, is_valid_wifi_password, parse_port};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepId {
    Welcome,
    SerialConnect,
    Confirm,
    EraseAll,
    FlashBootloader,
    FlashBin,
    SelectBootDrive,
    CopyUf2,
    SelectCpyDrive,
    ReplConnect,
    Credentials,
    Success,
}

/// Flows offered in the menu, in display order
pub fn installer_flows() -> Vec<FlowDescriptor<StepId>> {
    use StepId::*;

    vec![
        FlowDescriptor::new(
            "Full CircuitPython [version] Install",
            vec![
                Welcome,
                SerialConnect,
                Confirm,
                EraseAll,
                FlashBootloader,
                SelectBootDrive,
                CopyUf2,
                SelectCpyDrive,
                Credentials,
                Success,
            ],
            PredicateId::HasBootloaderAndUf2,
        ),
        FlowDescriptor::new(
            "Upgrade/Install CircuitPython [version] Bin Only",
            vec![
                Welcome,
                SerialConnect,
                Confirm,
                EraseAll,
                FlashBin,
                ReplConnect,
                Credentials,
                Success,
            ],
            PredicateId::HasBin,
        ),
        FlowDescriptor::new(
            "Upgrade CircuitPython [version] UF2 Only",
            vec![
                Welcome,
                SelectBootDrive,
                CopyUf2,
                SelectCpyDrive,
                Credentials,
                Success,
            ],
            PredicateId::HasUf2,
        ),
        FlowDescriptor::new(
            "Install Bootloader Only",
            vec![
                Welcome,
                SerialConnect,
                Confirm,
                EraseAll,
                FlashBootloader,
                Success,
            ],
            PredicateId::HasBootloader,
        ),
        FlowDescriptor::new(
            "Update WiFi credentials",
            vec![ReplConnect, Credentials, Success],
            PredicateId::Always,
        ),
    ]
}

/// Text fields of the credentials dialog
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialsForm {
    pub ssid: String,
    pub password: String,
    pub web_api_password: String,
    pub web_api_port: String,
}

impl Default for CredentialsForm {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            web_api_password: String::new(),
            web_api_port: DEFAULT_WEB_API_PORT.to_string(),
        }
    }
}

impl CredentialsForm {
    pub fn from_settings(settings: &Settings) -> Self {
        let text = |key: &str| {
            settings
                .get(key)
                .and_then(SettingValue::as_text)
                .unwrap_or_default()
                .to_string()
        };
        let port = settings
            .get(WEB_API_PORT_KEY)
            .and_then(SettingValue::as_integer)
            .unwrap_or(DEFAULT_WEB_API_PORT);

        Self {
            ssid: text(WIFI_SSID_KEY),
            password: text(WIFI_PASSWORD_KEY),
            web_api_password: text(WEB_API_PASSWORD_KEY),
            web_api_port: port.to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_ssid(&self.ssid)
            && is_valid_wifi_password(&self.password)
            && parse_port(&self.web_api_port).is_some()
    }

    /// Write the form into `settings`, keeping every other key
    pub fn apply(&self, settings: &mut Settings) {
        settings.insert(WIFI_SSID_KEY.to_string(), self.ssid.as_str().into());
        settings.insert(WIFI_PASSWORD_KEY.to_string(), self.password.as_str().into());
        if self.web_api_password.is_empty() {
            settings.remove(WEB_API_PASSWORD_KEY);
        } else {
            settings.insert(
                WEB_API_PASSWORD_KEY.to_string(),
                self.web_api_password.as_str().into(),
            );
        }
        let port = parse_port(&self.web_api_port).unwrap_or(DEFAULT_WEB_API_PORT);
        settings.insert(WEB_API_PORT_KEY.to_string(), port.into());
    }
}

/// Senders handed to a running step
#[derive(Clone)]
pub struct Reporter {
    pub progress: mpsc::UnboundedSender<Progress>,
    pub log: mpsc::UnboundedSender<String>,
}

impl Reporter {
    pub fn log(&self, line: impl Into<String>) {
        let _ = self.log.send(line.into());
    }
}

/// Run `work`, streaming its progress and log lines as [`WorkEvent`]s
pub fn with_progress<T, F, Fut>(work: F) -> impl Sipper<anyhow::Result<T>, WorkEvent> + Send + 'static
where
    T: Send + 'static,
    F: FnOnce(Reporter) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    task::sipper(async move |mut sipper| -> anyhow::Result<T> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (log_tx, mut log_rx) = mpsc::unbounded_channel();

        let work = work(Reporter {
            progress: progress_tx,
            log: log_tx,
        });
        tokio::pin!(work);

        // The senders can outlive the work; a transport may keep the log one
        let result = loop {
            tokio::select! {
                biased;
                Some(progress) = progress_rx.recv() => sipper.send(WorkEvent::Progress(progress)).await,
                Some(line) = log_rx.recv() => sipper.send(WorkEvent::Log(line)).await,
                result = &mut work => break result,
            }
        };

        while let Ok(progress) = progress_rx.try_recv() {
            sipper.send(WorkEvent::Progress(progress)).await;
        }
        while let Ok(line) = log_rx.try_recv() {
            sipper.send(WorkEvent::Log(line)).await;
        }
        result
    })
}

fn not_connected() -> InstallerError {
    InstallerError::connectivity("The board is not connected. Go back and connect it again.")
}

pub async fn list_ports() -> anyhow::Result<Vec<SerialPortEntry>> {
    tokio::task::spawn_blocking(bootloader::available_ports)
        .await
        .map_err(|e| anyhow::anyhow!("Join error: {}", e))?
}

/// Open the bootloader on `port` and check the chip belongs to `family`
pub async fn connect_bootloader(
    connection: SharedConnection,
    port: String,
    baud_rate: u32,
    family: String,
    reporter: Reporter,
) -> anyhow::Result<ChipInfo> {
    let mut owner = connection.lock().await;
    let active = owner
        .acquire(TransportKind::Bootloader, || async {
            let mut transport = BootloaderTransport::new(baud_rate);
            transport.connect(&port, Some(reporter.log.clone())).await?;
            anyhow::Ok(Connection::Bootloader(transport))
        })
        .await?;

    let chip = active
        .as_bootloader()
        .and_then(BootloaderTransport::chip)
        .cloned()
        .ok_or_else(not_connected)?;

    if !chip.matches_family(&family) {
        return Err(InstallerError::ChipMismatch {
            expected: family,
            found: chip.chip,
        }
        .into());
    }
    Ok(chip)
}

pub async fn connect_repl(connection: SharedConnection, port: String) -> anyhow::Result<()> {
    let mut owner = connection.lock().await;
    owner
        .acquire(TransportKind::Repl, || async {
            anyhow::Ok(Connection::Repl(ReplTransport::connect(&port)?))
        })
        .await?;
    Ok(())
}

pub async fn erase(connection: SharedConnection, reporter: Reporter) -> anyhow::Result<()> {
    let mut owner = connection.lock().await;
    let bootloader = owner
        .active_mut()
        .and_then(Connection::as_bootloader_mut)
        .ok_or_else(not_connected)?;
    bootloader.set_log_sink(Some(reporter.log.clone()));
    bootloader.erase_flash().await
}

/// Download an image and write it at offset 0. Bootloader archives are
/// also scanned for the labels of the drive the bootloader will show, and
/// leave the cache once their image is out.
pub async fn flash_image(
    connection: SharedConnection,
    downloader: Downloader,
    url: String,
    member: Option<&'static str>,
    reporter: Reporter,
) -> anyhow::Result<Option<BootloaderInfo>> {
    reporter.log(format!("Downloading {}", url));
    let file = downloader
        .download_and_extract(&url, member, member.is_some(), Some(&reporter.progress))
        .await?;
    let labels = member.map(|_| BootloaderInfo::extract(&file.data));
    if member.is_some() {
        downloader.evict(&filename_from_url(&url));
    }

    let mut owner = connection.lock().await;
    let bootloader = owner
        .active_mut()
        .and_then(Connection::as_bootloader_mut)
        .ok_or_else(not_connected)?;
    bootloader.set_log_sink(Some(reporter.log.clone()));
    bootloader
        .write_image(0, file.data, Some(reporter.progress.clone()))
        .await?;
    Ok(labels)
}

pub async fn copy_uf2(
    downloader: Downloader,
    url: String,
    drive: PathBuf,
    reporter: Reporter,
) -> anyhow::Result<PathBuf> {
    reporter.log(format!("Downloading {}", url));
    let copied = downloader
        .download_and_copy(
            &url,
            None,
            &drive,
            Some(&reporter.progress),
            Some(&reporter.progress),
        )
        .await?;
    reporter.log(format!("Copied {}", copied.display()));
    Ok(copied)
}

/// Read the board's settings through the REPL when it is held, otherwise
/// from the CIRCUITPY drive. With neither the settings start out empty.
pub async fn read_settings(connection: SharedConnection, drive: Option<PathBuf>) -> anyhow::Result<Settings> {
    let mut owner = connection.lock().await;
    if let Some(client) = owner
        .active_mut()
        .and_then(Connection::as_repl_mut)
        .and_then(ReplTransport::client)
    {
        return SettingsCodec::read(SettingsSource::Repl(client)).await;
    }
    drop(owner);

    match drive {
        Some(dir) => SettingsCodec::read(SettingsSource::Directory(&dir)).await,
        None => {
            info!("No CIRCUITPY drive or REPL connection, starting with empty settings");
            Ok(Settings::new())
        }
    }
}

pub async fn save_settings(
    connection: SharedConnection,
    drive: Option<PathBuf>,
    settings: Settings,
) -> anyhow::Result<Option<String>> {
    let mut owner = connection.lock().await;
    if let Some(client) = owner
        .active_mut()
        .and_then(Connection::as_repl_mut)
        .and_then(ReplTransport::client)
    {
        return SettingsCodec::write(SettingsSource::Repl(client), &settings).await;
    }
    drop(owner);

    let dir = drive.ok_or_else(|| InstallerError::Settings("No CIRCUITPY drive selected".to_string()))?;
    SettingsCodec::write(SettingsSource::Directory(&dir), &settings).await
}

/// Learn the boot drive name without flashing anything. With `keep` the
/// archive stays cached for the flash step that follows.
pub async fn peek_bootloader_labels(
    downloader: Downloader,
    url: String,
    keep: bool,
) -> Option<BootloaderInfo> {
    match downloader
        .download_and_extract(&url, Some(BOOTLOADER_IMAGE), keep, None)
        .await
    {
        Ok(file) => Some(BootloaderInfo::extract(&file.data)),
        Err(e) => {
            debug!("Could not read bootloader labels: {:#}", e);
            None
        }
    }
}

pub async fn pick_drive(title: String) -> Option<PathBuf> {
    rfd::AsyncFileDialog::new()
        .set_title(title)
        .pick_folder()
        .await
        .map(|handle| handle.path().to_path_buf())
}

pub async fn release(connection: SharedConnection) {
    connection.lock().await.release().await;
}

fn describe_drive(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl CircuitPythonInstaller {
    /// Show the dialog of `step` and start its work, if any
    pub(crate) fn invoke_step(&mut self, step: StepId) -> Task<Message> {
        self.busy = false;
        self.progress = None;

        match step {
            StepId::Welcome => {
                let data = DialogData::new()
                    .with("version", self.version_text())
                    .with("board", self.board_name());
                self.show(DialogId::Welcome, data, false);
                Task::none()
            }
            StepId::SerialConnect => {
                self.port_purpose = TransportKind::Bootloader;
                self.show(DialogId::SerialConnect, DialogData::new(), false);
                Task::none()
            }
            StepId::Confirm => {
                let Some(chip) = self.chip.clone() else {
                    return self.fail(not_connected().into());
                };
                let data = DialogData::new()
                    .with("chip", chip.chip)
                    .with("revision", chip.revision.unwrap_or_else(|| "unknown".to_string()))
                    .with("flash_size", chip.flash_size)
                    .with("mac", chip.mac_address.unwrap_or_else(|| "unknown".to_string()));
                self.show(DialogId::Confirm, data, false);

                // Fetch the bootloader while the user reads the confirmation
                let flashes_bootloader = self
                    .engine
                    .flow()
                    .is_some_and(|flow| flow.steps.contains(&StepId::FlashBootloader));
                match self.board.as_ref().and_then(|b| b.bootloader_url.clone()) {
                    Some(url) if flashes_bootloader => Task::perform(
                        peek_bootloader_labels(self.downloader.clone(), url, true),
                        Message::BootloaderLabels,
                    ),
                    _ => Task::none(),
                }
            }
            StepId::EraseAll => {
                self.log.clear();
                self.show(DialogId::Erase, DialogData::new().with("status", ""), false);
                Task::none()
            }
            StepId::FlashBootloader => {
                let Some(url) = self.board.as_ref().and_then(|b| b.bootloader_url.clone()) else {
                    return self.fail(InstallerError::Download("This board has no bootloader image".to_string()).into());
                };
                self.start_flash("bootloader", url, Some(BOOTLOADER_IMAGE))
            }
            StepId::FlashBin => {
                let Some(url) = self.board.as_ref().and_then(|b| b.bin_url.clone()) else {
                    return self.fail(InstallerError::Download("This release has no bin image".to_string()).into());
                };
                let image = format!("CircuitPython {}", self.version_text());
                self.start_flash(&image, url, None)
            }
            StepId::SelectBootDrive => {
                let data = DialogData::new()
                    .with("drive", self.boot_labels.drive_name())
                    .with("notice", "");
                self.show(DialogId::SelectBootDrive, data, false);

                // The board reboots into the UF2 bootloader; the serial port goes away
                let mut tasks = vec![Task::perform(release(self.connection.clone()), |_| {
                    Message::ConnectionReleased
                })];
                if self.boot_labels.drive_label.is_none() {
                    if let Some(url) = self.board.as_ref().and_then(|b| b.bootloader_url.clone()) {
                        tasks.push(Task::perform(
                            peek_bootloader_labels(self.downloader.clone(), url, false),
                            Message::BootloaderLabels,
                        ));
                    }
                }
                Task::batch(tasks)
            }
            StepId::CopyUf2 => {
                let (Some(url), Some(drive)) = (
                    self.board.as_ref().and_then(|b| b.uf2_url.clone()),
                    self.boot_drive.clone(),
                ) else {
                    return self.fail(InstallerError::Download("Nothing to copy: no UF2 image or boot drive".to_string()).into());
                };

                self.busy = true;
                self.log.clear();
                let data = DialogData::new()
                    .with("status", format!("Copying CircuitPython to {}", describe_drive(&drive)));
                self.show(DialogId::Copy, data, false);

                Task::sip(
                    with_progress({
                        let downloader = self.downloader.clone();
                        move |reporter| copy_uf2(downloader, url, drive, reporter)
                    }),
                    Message::Work,
                    |result| Message::CopyFinished(result.map_err(Failure::from)),
                )
            }
            StepId::SelectCpyDrive => {
                self.show(DialogId::SelectCpyDrive, DialogData::new().with("notice", ""), false);
                Task::none()
            }
            StepId::ReplConnect => {
                self.port_purpose = TransportKind::Repl;
                self.show(DialogId::ReplConnect, DialogData::new(), false);
                Task::none()
            }
            StepId::Credentials => {
                self.busy = true;
                self.show(
                    DialogId::Credentials,
                    DialogData::new().with("status", "Reading the current settings..."),
                    false,
                );
                Task::perform(
                    read_settings(self.connection.clone(), self.circuitpy_drive.clone()),
                    |result| Message::SettingsLoaded(result.map_err(Failure::from)),
                )
            }
            StepId::Success => {
                let mut message = match self.engine.flow().map(|f| f.enabled) {
                    Some(PredicateId::HasBootloader) => format!(
                        "The bootloader is installed on your {}.",
                        self.board_name()
                    ),
                    Some(PredicateId::Always) => "The WiFi settings have been updated.".to_string(),
                    _ => format!(
                        "CircuitPython {} is installed on your {}.",
                        self.version_text(),
                        self.board_name()
                    ),
                };
                if let Some(address) = &self.device_address {
                    message.push_str(&format!(
                        "\n\nThe board joined the network at {}. Open http://{}:{}/ to use the web workflow.",
                        address,
                        address,
                        parse_port(&self.form.web_api_port).unwrap_or(DEFAULT_WEB_API_PORT)
                    ));
                }
                info!("Flow finished: {}", message);
                self.show(DialogId::Success, DialogData::new().with("message", message), false);
                Task::none()
            }
        }
    }

    fn start_flash(&mut self, image: &str, url: String, member: Option<&'static str>) -> Task<Message> {
        self.busy = true;
        self.log.clear();
        let data = DialogData::new()
            .with("image", format!("Installing {}", image))
            .with("status", "Downloading...");
        self.show(DialogId::Flash, data, false);

        let connection = self.connection.clone();
        let downloader = self.downloader.clone();
        Task::sip(
            with_progress(move |reporter| flash_image(connection, downloader, url, member, reporter)),
            Message::Work,
            |result| Message::FlashFinished(result.map_err(Failure::from)),
        )
    }

    pub(crate) fn start_erase(&mut self) -> Task<Message> {
        self.busy = true;
        self.refresh_dialog();
        let connection = self.connection.clone();
        Task::sip(
            with_progress(move |reporter| erase(connection, reporter)),
            Message::Work,
            |result| Message::EraseFinished(result.map_err(Failure::from)),
        )
    }

    pub(crate) fn start_connect(&mut self, port: SerialPortEntry) -> Task<Message> {
        self.busy = true;
        self.log.clear();
        let connection = self.connection.clone();

        match self.port_purpose {
            TransportKind::Bootloader => {
                self.show(DialogId::SerialConnect, DialogData::new(), false);
                let baud_rate = self.config.flash_baud_rate;
                let family = self
                    .board
                    .as_ref()
                    .map(|b| b.chip_family.clone())
                    .unwrap_or_default();
                Task::sip(
                    with_progress(move |reporter| {
                        connect_bootloader(connection, port.name, baud_rate, family, reporter)
                    }),
                    Message::Work,
                    |result| Message::BootloaderConnected(result.map_err(Failure::from)),
                )
            }
            TransportKind::Repl => {
                self.show(DialogId::ReplConnect, DialogData::new(), false);
                Task::perform(connect_repl(connection, port.name), |result| {
                    Message::ReplConnected(result.map_err(Failure::from))
                })
            }
        }
    }

    pub(crate) fn start_save(&mut self) -> Task<Message> {
        if !self.form.is_valid() {
            warn!("Refusing to save invalid credentials");
            return Task::none();
        }
        self.busy = true;
        self.form.apply(&mut self.settings);
        self.dialogs
            .update_body(DialogId::Credentials, &[("status", "Saving...".to_string())]);
        self.refresh_dialog();

        Task::perform(
            save_settings(
                self.connection.clone(),
                self.circuitpy_drive.clone(),
                self.settings.clone(),
            ),
            |result| Message::SettingsSaved(result.map_err(Failure::from)),
        )
    }

    pub(crate) fn start_pick(&mut self, kind: DriveKind) -> Task<Message> {
        let title = match kind {
            DriveKind::Boot => format!("Select the {} drive", self.boot_labels.drive_name()),
            DriveKind::CircuitPy => "Select the CIRCUITPY drive".to_string(),
        };
        Task::perform(pick_drive(title), move |path| Message::DrivePicked(kind, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flows_match_their_purpose() {
        let flows = installer_flows();
        assert_eq!(flows.len(), 5);
        assert_eq!(flows[0].steps.len(), 10);
        assert_eq!(flows[0].steps.last(), Some(&StepId::Success));
        assert!(flows[1].steps.contains(&StepId::FlashBin));
        assert!(!flows[2].steps.contains(&StepId::SerialConnect));
        assert_eq!(
            flows[4].steps,
            vec![StepId::ReplConnect, StepId::Credentials, StepId::Success]
        );
        assert_eq!(
            flows[2].render_label(Some("9.0.0")),
            "Upgrade CircuitPython 9.0.0 UF2 Only"
        );
    }

    #[test]
    fn test_credentials_form_keeps_other_keys() {
        let mut settings = Settings::from([
            ("CIRCUITPY_PYSTACK_SIZE".to_string(), SettingValue::Integer(4000)),
            (WIFI_SSID_KEY.to_string(), "old".into()),
        ]);
        let mut form = CredentialsForm::from_settings(&settings);
        assert_eq!(form.ssid, "old");
        assert_eq!(form.web_api_port, "80");

        form.ssid = "home".to_string();
        form.password = "password123".to_string();
        form.web_api_port = "8080".to_string();
        assert!(form.is_valid());
        form.apply(&mut settings);

        assert_eq!(settings[WIFI_SSID_KEY].as_text(), Some("home"));
        assert_eq!(settings[WEB_API_PORT_KEY].as_integer(), Some(8080));
        assert_eq!(settings["CIRCUITPY_PYSTACK_SIZE"].as_integer(), Some(4000));
        assert!(!settings.contains_key(WEB_API_PASSWORD_KEY));
    }

    #[test]
    fn test_credentials_form_validation() {
        let mut form = CredentialsForm::default();
        assert!(!form.is_valid());
        form.ssid = "home".to_string();
        assert!(form.is_valid());
        form.web_api_port = "http".to_string();
        assert!(!form.is_valid());
    }

    #[tokio::test]
    async fn test_settings_fall_back_to_drive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.toml"),
            "CIRCUITPY_WIFI_SSID = \"home\"\n",
        )
        .unwrap();

        let connection = SharedConnection::default();
        let settings = read_settings(connection.clone(), Some(dir.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(settings[WIFI_SSID_KEY].as_text(), Some("home"));

        assert!(read_settings(connection.clone(), None).await.unwrap().is_empty());
        assert!(save_settings(connection, None, settings).await.is_err());
    }

    #[tokio::test]
    async fn test_operations_need_a_bootloader() {
        let connection = SharedConnection::default();
        let (progress, _p) = mpsc::unbounded_channel();
        let (log, _l) = mpsc::unbounded_channel();
        let err = erase(connection, Reporter { progress, log }).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstallerError>(),
            Some(InstallerError::Connectivity(_))
        ));
    }

    fn bootloader_archive() -> Vec<u8> {
        use std::io::Write;

        let mut image = vec![0xFFu8; 32];
        image.extend_from_slice(b"\x00FTHRS2BOOT\x00");
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file(BOOTLOADER_IMAGE, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&image).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_prefetched_bootloader_is_evicted_once_flashed() {
        // Nothing listens on this port; every byte must come from the cache
        let url = "http://127.0.0.1:9/bootloaders/feather_s2.zip".to_string();
        let downloader = Downloader::new();
        downloader.cache_insert("feather_s2.zip", bootloader_archive());

        let labels = peek_bootloader_labels(downloader.clone(), url.clone(), true)
            .await
            .unwrap();
        assert_eq!(labels.drive_name(), "FTHRS2BOOT");
        assert!(downloader.cached("feather_s2.zip").is_some());

        let (progress, _p) = mpsc::unbounded_channel();
        let (log, _l) = mpsc::unbounded_channel();
        let result = flash_image(
            SharedConnection::default(),
            downloader.clone(),
            url,
            Some(BOOTLOADER_IMAGE),
            Reporter { progress, log },
        )
        .await;
        assert!(result.is_err());
        assert!(downloader.cached("feather_s2.zip").is_none());
    }

    #[tokio::test]
    async fn test_peek_without_keep_leaves_cache_alone() {
        let downloader = Downloader::new();
        let labels = peek_bootloader_labels(downloader.clone(), "http://127.0.0.1:9/boot.zip".to_string(), false).await;
        assert!(labels.is_none());
        assert!(downloader.cached("boot.zip").is_none());
    }

    #[tokio::test]
    async fn test_events_sent_as_work_finishes_are_delivered() {
        // Stands in for a transport that keeps the log sender
        let (keep_tx, keep_rx) = std::sync::mpsc::channel();

        let mut running = with_progress(move |reporter: Reporter| async move {
            let _ = reporter.progress.send(Progress::new(10, Some(10)));
            reporter.log("Hash of data verified");
            let _ = keep_tx.send(reporter.log.clone());
            Ok(7)
        })
        .pin();

        let mut events = Vec::new();
        while let Some(event) = running.sip().await {
            events.push(event);
        }
        assert_eq!(running.await.unwrap(), 7);

        assert!(events.iter().any(|e| matches!(e, WorkEvent::Progress(p) if p.percent == Some(100.0))));
        assert!(events.iter().any(|e| matches!(e, WorkEvent::Log(line) if line == "Hash of data verified")));
        drop(keep_rx);
    }
}
