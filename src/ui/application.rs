use std::path::PathBuf;

use iced::Task;
use tracing::{debug, error, info, warn};

use crate::config::InstallerConfig;
use crate::error::{ErrorCategory, InstallerError};
use crate::models::{ChipInfo, SerialPortEntry, TransportKind};
use crate::transport::{Connection, SharedConnection, Transport};
use crate::ui::dialogs::{
    ActionId, ButtonSpec, DialogData, DialogFacts, DialogId, DialogRegistry, PredicateId, PredicateTable,
    UpdateId,
};
use crate::ui::flow::{Advance, FlowDescriptor, FlowEngine};
use crate::ui::messages::{CredentialField, Failure, Message, WorkEvent};
use crate::ui::steps::{self, CredentialsForm, StepId, installer_flows};
use crate::utils::bootloader_info::BootloaderInfo;
use crate::utils::download::Downloader;
use crate::utils::repo::{BoardEntry, BoardRepo, ResolvedBoard, download_catalog};
use crate::utils::settings::Settings;
use crate::utils::tracker::Progress;
use crate::utils::validation::{DriveKind, validate_drive};

/// Lines of device output kept for the progress dialogs
const LOG_TAIL: usize = 200;

pub struct CircuitPythonInstaller {
    pub(crate) config: InstallerConfig,
    pub(crate) repo: BoardRepo,
    pub(crate) is_loading_catalog: bool,
    pub(crate) boards: Vec<BoardEntry>,
    pub(crate) board: Option<ResolvedBoard>,
    pub(crate) flows: Vec<FlowDescriptor<StepId>>,
    pub(crate) engine: FlowEngine<StepId>,
    pub(crate) dialogs: DialogRegistry,
    pub(crate) predicates: PredicateTable,
    pub(crate) connection: SharedConnection,
    pub(crate) downloader: Downloader,
    pub(crate) ports: Vec<SerialPortEntry>,
    pub(crate) port_purpose: TransportKind,
    pub(crate) chip: Option<ChipInfo>,
    pub(crate) boot_labels: BootloaderInfo,
    pub(crate) boot_drive: Option<PathBuf>,
    pub(crate) circuitpy_drive: Option<PathBuf>,
    pub(crate) busy: bool,
    pub(crate) progress: Option<Progress>,
    pub(crate) log: Vec<String>,
    pub(crate) form: CredentialsForm,
    pub(crate) settings: Settings,
    pub(crate) device_address: Option<String>,
}

impl CircuitPythonInstaller {
    pub fn new(config: InstallerConfig) -> (Self, Task<Message>) {
        let mut installer = Self {
            repo: BoardRepo::new(config.catalog_url.clone()),
            config,
            is_loading_catalog: true,
            boards: Vec::new(),
            board: None,
            flows: installer_flows(),
            engine: FlowEngine::new(),
            dialogs: DialogRegistry::default(),
            predicates: PredicateTable::new(),
            connection: SharedConnection::default(),
            downloader: Downloader::new(),
            ports: Vec::new(),
            port_purpose: TransportKind::Bootloader,
            chip: None,
            boot_labels: BootloaderInfo::default(),
            boot_drive: None,
            circuitpy_drive: None,
            busy: false,
            progress: None,
            log: Vec::new(),
            form: CredentialsForm::default(),
            settings: Settings::new(),
            device_address: None,
        };

        let task = installer.load_catalog();
        (installer, task)
    }

    fn load_catalog(&mut self) -> Task<Message> {
        self.is_loading_catalog = true;
        let url = self.repo.catalog_url().to_string();
        Task::perform(async move { download_catalog(&url).await }, |result| {
            Message::CatalogLoaded(result.map_err(Failure::from))
        })
    }

    pub fn title(&self) -> String {
        match &self.board {
            Some(board) => format!("CircuitPython Installer - {}", board.name),
            None => String::from("CircuitPython Installer"),
        }
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::CatalogLoaded(Ok(catalog)) => {
                self.is_loading_catalog = false;
                self.repo.set_catalog(catalog);
                self.boards = self.repo.boards(&self.config);
                info!("Board catalog loaded, {} boards offered", self.boards.len());
                self.open_installer()
            }
            Message::CatalogLoaded(Err(failure)) => {
                self.is_loading_catalog = false;
                self.fail(failure)
            }
            Message::OpenInstaller => self.open_installer(),
            Message::CloseDialog => {
                if self.dialogs.current_id() == Some(DialogId::PortSelect) {
                    // Back to the step that asked for a port
                    self.busy = false;
                    return match self.engine.current_step() {
                        Some(step) => self.invoke_step(step),
                        None => Task::none(),
                    };
                }
                self.close_installer()
            }
            Message::Action(action) => self.handle_action(action),
            Message::PortsListed(Ok(ports)) => {
                self.ports = ports;
                self.show_ports();
                Task::none()
            }
            Message::BootloaderConnected(Ok(chip)) => {
                info!("Connected to {} on the bootloader", chip.chip);
                self.chip = Some(chip);
                self.busy = false;
                let moved = self.engine.next(|step| step);
                self.move_flow(moved)
            }
            Message::ReplConnected(Ok(())) => {
                self.busy = false;
                let moved = self.engine.next(|step| step);
                self.move_flow(moved)
            }
            Message::ConnectionReleased => {
                debug!("Serial connection released");
                Task::none()
            }
            Message::BaudRateSelected(rate) => self.select_baud_rate(rate),
            Message::Work(WorkEvent::Progress(progress)) => {
                self.progress = Some(progress);
                Task::none()
            }
            Message::Work(WorkEvent::Log(line)) => {
                self.log.push(line);
                if self.log.len() > LOG_TAIL {
                    let excess = self.log.len() - LOG_TAIL;
                    self.log.drain(..excess);
                }
                Task::none()
            }
            Message::EraseFinished(Ok(())) | Message::CopyFinished(Ok(_)) => {
                self.busy = false;
                let moved = self.engine.next(|step| step);
                self.move_flow(moved)
            }
            Message::FlashFinished(Ok(labels)) => {
                if let Some(labels) = labels {
                    self.boot_labels = labels;
                }
                self.busy = false;
                let moved = self.engine.next(|step| step);
                self.move_flow(moved)
            }
            Message::BootloaderLabels(labels) => {
                if let Some(labels) = labels {
                    self.boot_labels = labels;
                    self.dialogs.update_body(
                        DialogId::SelectBootDrive,
                        &[
                            ("drive", self.boot_labels.drive_name().to_string()),
                            ("notice", String::new()),
                        ],
                    );
                    self.refresh_dialog();
                }
                Task::none()
            }
            Message::DrivePicked(kind, None) => {
                debug!("{:?} drive picker dismissed", kind);
                Task::none()
            }
            Message::DrivePicked(kind, Some(path)) => self.drive_picked(kind, path),
            Message::FormChanged(field, value) => {
                match field {
                    CredentialField::Ssid => self.form.ssid = value,
                    CredentialField::Password => self.form.password = value,
                    CredentialField::WebApiPassword => self.form.web_api_password = value,
                    CredentialField::WebApiPort => self.form.web_api_port = value,
                }
                self.refresh_dialog();
                Task::none()
            }
            Message::SettingsLoaded(Ok(settings)) => {
                self.form = CredentialsForm::from_settings(&settings);
                self.settings = settings;
                self.busy = false;
                self.dialogs
                    .update_body(DialogId::Credentials, &[("status", String::new())]);
                self.refresh_dialog();
                Task::none()
            }
            Message::SettingsSaved(Ok(address)) => {
                self.device_address = address;
                self.busy = false;
                let moved = self.engine.next(|step| step);
                self.move_flow(moved)
            }
            Message::PortsListed(Err(failure))
            | Message::BootloaderConnected(Err(failure))
            | Message::ReplConnected(Err(failure))
            | Message::EraseFinished(Err(failure))
            | Message::FlashFinished(Err(failure))
            | Message::CopyFinished(Err(failure))
            | Message::SettingsLoaded(Err(failure))
            | Message::SettingsSaved(Err(failure)) => self.fail(failure),
        }
    }

    fn handle_action(&mut self, action: ActionId) -> Task<Message> {
        debug!("Dialog action {:?}", action);
        match action {
            ActionId::SelectBoard(index) => self.select_board(index),
            ActionId::ChangeBoard => {
                self.show_board_select();
                Task::none()
            }
            ActionId::StartFlow(index) => {
                let Some(flow) = self.flows.get(index).cloned() else {
                    return Task::none();
                };
                self.reset_flow_state();
                let moved = self.engine.run(flow, |step| step);
                self.move_flow(moved)
            }
            ActionId::ChoosePort | ActionId::RefreshPorts => Task::perform(steps::list_ports(), |result| {
                Message::PortsListed(result.map_err(Failure::from))
            }),
            ActionId::SelectPort(index) => match self.ports.get(index).cloned() {
                Some(port) => self.start_connect(port),
                None => Task::none(),
            },
            ActionId::Next => {
                let moved = self.engine.next(|step| step);
                self.move_flow(moved)
            }
            ActionId::Previous => {
                let moved = self.engine.previous(|step| step);
                self.move_flow(moved)
            }
            ActionId::Erase => self.start_erase(),
            ActionId::PickDrive => match self.engine.current_step() {
                Some(StepId::SelectBootDrive) => self.start_pick(DriveKind::Boot),
                Some(StepId::SelectCpyDrive) => self.start_pick(DriveKind::CircuitPy),
                _ => Task::none(),
            },
            ActionId::SaveCredentials => self.start_save(),
            ActionId::Close => self.close_installer(),
        }
    }

    /// Run the step the engine moved to
    fn move_flow(&mut self, moved: Advance<StepId>) -> Task<Message> {
        match moved {
            Ok(Some(step)) => self.invoke_step(step),
            Ok(None) => Task::none(),
            Err(e) => {
                warn!("{}", e);
                self.dialogs.close();
                Task::none()
            }
        }
    }

    fn open_installer(&mut self) -> Task<Message> {
        if self.repo.catalog().is_none() {
            if self.is_loading_catalog {
                return Task::none();
            }
            return self.load_catalog();
        }
        if self.board.is_some() {
            self.show_menu();
            return Task::none();
        }

        match self.boards.len() {
            0 => self.fail(
                InstallerError::Catalog("None of the requested boards are in the catalog".to_string()).into(),
            ),
            1 => self.select_board(0),
            _ => {
                self.show_board_select();
                Task::none()
            }
        }
    }

    fn select_board(&mut self, index: usize) -> Task<Message> {
        let Some(entry) = self.boards.get(index) else {
            return Task::none();
        };

        match self.repo.resolve(&entry.id, &self.config) {
            Ok(board) => {
                info!(
                    "Selected {} ({}), release {}",
                    board.name,
                    board.chip_family,
                    board.version().unwrap_or("none")
                );
                self.board = Some(board);
                self.boot_labels = BootloaderInfo::default();
                self.downloader = Downloader::new();
                self.show_menu();
                Task::none()
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn show_board_select(&mut self) {
        let buttons = self
            .boards
            .iter()
            .enumerate()
            .map(|(i, board)| ButtonSpec::new(board.to_string(), ActionId::SelectBoard(i)))
            .collect();
        self.show(DialogId::BoardSelect, DialogData::new().with_buttons(buttons), true);
    }

    fn show_menu(&mut self) {
        let buttons = self
            .flows
            .iter()
            .enumerate()
            .map(|(i, flow)| {
                ButtonSpec::new(flow.label, ActionId::StartFlow(i))
                    .enabled_when(flow.enabled)
                    .updated_by(UpdateId::InsertVersion)
            })
            .collect();
        let board = match &self.board {
            Some(board) => match board.version() {
                Some(version) => format!("{}, CircuitPython {}", board.name, version),
                None => board.name.clone(),
            },
            None => String::new(),
        };
        let data = DialogData::new().with("board", board).with_buttons(buttons);
        self.show(DialogId::Menu, data, false);
    }

    fn show_ports(&mut self) {
        let hint = if self.ports.is_empty() {
            "No serial ports found. Check the USB cable and press Refresh.".to_string()
        } else if self.port_purpose == TransportKind::Bootloader {
            match &self.boot_labels.port_label {
                Some(label) => format!(
                    "Pick the port of the board in bootloader mode. It may be listed as {}.",
                    label
                ),
                None => "Pick the port of the board in bootloader mode.".to_string(),
            }
        } else {
            "Pick the port of the board running CircuitPython.".to_string()
        };
        let buttons = self
            .ports
            .iter()
            .enumerate()
            .map(|(i, port)| {
                ButtonSpec::new(port.to_string(), ActionId::SelectPort(i)).enabled_when(PredicateId::Idle)
            })
            .collect();
        self.show(
            DialogId::PortSelect,
            DialogData::new().with("hint", hint).with_buttons(buttons),
            true,
        );
    }

    fn drive_picked(&mut self, kind: DriveKind, path: PathBuf) -> Task<Message> {
        match validate_drive(&path, kind) {
            Ok(()) => {
                info!("Using {:?} as the {:?} drive", path, kind);
                match kind {
                    DriveKind::Boot => self.boot_drive = Some(path),
                    DriveKind::CircuitPy => self.circuitpy_drive = Some(path),
                }
                let moved = self.engine.next(|step| step);
                self.move_flow(moved)
            }
            Err(e) => {
                warn!("Rejected {:?}: {}", path, e);
                let notice = e.to_string();
                match kind {
                    DriveKind::Boot => self.dialogs.update_body(
                        DialogId::SelectBootDrive,
                        &[
                            ("drive", self.boot_labels.drive_name().to_string()),
                            ("notice", notice),
                        ],
                    ),
                    DriveKind::CircuitPy => self
                        .dialogs
                        .update_body(DialogId::SelectCpyDrive, &[("notice", notice)]),
                }
                Task::none()
            }
        }
    }

    fn reset_flow_state(&mut self) {
        self.chip = None;
        self.boot_drive = None;
        self.circuitpy_drive = None;
        self.device_address = None;
        self.progress = None;
        self.log.clear();
        self.form = CredentialsForm::default();
        self.settings = Settings::new();
    }

    fn close_installer(&mut self) -> Task<Message> {
        self.dialogs.close();
        self.engine.stop();
        self.busy = false;
        self.release_connection()
    }

    /// Drop the held connection. A free owner is emptied right away and only
    /// the teardown runs in the background; a busy one is released once the
    /// running step lets go of it.
    fn release_connection(&mut self) -> Task<Message> {
        match self.connection.try_lock() {
            Ok(mut owner) => match owner.take() {
                Some(mut transport) => Task::perform(
                    async move { transport.disconnect().await },
                    |_| Message::ConnectionReleased,
                ),
                None => Task::none(),
            },
            Err(_) => Task::perform(steps::release(self.connection.clone()), |_| {
                Message::ConnectionReleased
            }),
        }
    }

    /// Change the flashing baud rate. Refused while a bootloader connection
    /// is open or being opened.
    fn select_baud_rate(&mut self, rate: u32) -> Task<Message> {
        let result = match self.connection.try_lock() {
            Ok(mut owner) => match owner.active_mut().and_then(Connection::as_bootloader_mut) {
                Some(bootloader) => bootloader.set_baud_rate(rate),
                None => Ok(()),
            },
            Err(_) => Err(InstallerError::BaudRateLocked),
        };

        match result {
            Ok(()) => {
                info!("Flashing at {} baud", rate);
                self.config.flash_baud_rate = rate;
                Task::none()
            }
            Err(e) => self.fail(e.into()),
        }
    }

    pub(crate) fn facts(&self) -> DialogFacts {
        let board = self.board.as_ref();
        DialogFacts {
            version: board.and_then(|b| b.version()).map(str::to_string),
            drive_name: self.boot_labels.drive_name().to_string(),
            has_bootloader: board.is_some_and(|b| b.bootloader_url.is_some()),
            has_uf2: board.is_some_and(|b| b.uf2_url.is_some()),
            has_bin: board.is_some_and(|b| b.bin_url.is_some()),
            busy: self.busy,
            credentials_valid: self.form.is_valid(),
        }
    }

    pub(crate) fn show(&mut self, id: DialogId, data: DialogData, reload: bool) {
        let facts = self.facts();
        self.dialogs.show(id, data, reload, &self.predicates, &facts);
    }

    pub(crate) fn refresh_dialog(&mut self) {
        let facts = self.facts();
        self.dialogs.refresh(&self.predicates, &facts);
    }

    /// Surface a failed step. Cancellations stay silent, connectivity
    /// failures also drop the serial connection.
    pub(crate) fn fail(&mut self, failure: Failure) -> Task<Message> {
        self.busy = false;
        match failure.category {
            ErrorCategory::UserCancelled => {
                debug!("Cancelled: {}", failure.message);
                self.refresh_dialog();
                Task::none()
            }
            ErrorCategory::Connectivity => {
                error!("Connection failure: {}", failure.message);
                self.show(DialogId::Error, DialogData::new().with("message", failure.message), false);
                self.release_connection()
            }
            ErrorCategory::Data => {
                error!("{}", failure.message);
                self.show(DialogId::Error, DialogData::new().with("message", failure.message), false);
                Task::none()
            }
        }
    }

    pub(crate) fn version_text(&self) -> String {
        self.board
            .as_ref()
            .and_then(|b| b.version())
            .unwrap_or_default()
            .to_string()
    }

    pub(crate) fn board_name(&self) -> String {
        self.board
            .as_ref()
            .map(|b| b.name.clone())
            .unwrap_or_else(|| "board".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::bootloader::BootloaderTransport;
    use crate::transport::repl::tests::client_with;
    use crate::transport::ReplTransport;
    use crate::utils::repo::BoardCatalog;

    const CATALOG: &str = r#"{
        "feather_s2": {
            "chipfamily": "ESP32-S2",
            "name": "Feather ESP32-S2",
            "bootloader": "https://downloads.circuitpython.org/bootloaders/feather_s2.zip",
            "releases": [
                {
                    "version": "8.2.0",
                    "uf2file": "https://downloads.circuitpython.org/bin/feather_s2/en_US/feather_s2-8.2.0.uf2",
                    "binfile": "https://downloads.circuitpython.org/bin/feather_s2/en_US/feather_s2-8.2.0.bin"
                }
            ]
        }
    }"#;

    fn installer() -> CircuitPythonInstaller {
        let (mut installer, _) = CircuitPythonInstaller::new(InstallerConfig::default());
        let catalog = BoardCatalog::from_json(CATALOG).unwrap();
        let _ = installer.update(Message::CatalogLoaded(Ok(catalog)));
        installer
    }

    fn current(installer: &CircuitPythonInstaller) -> Option<DialogId> {
        installer.dialogs.current_id()
    }

    #[test]
    fn test_single_board_goes_straight_to_menu() {
        let installer = installer();
        assert_eq!(current(&installer), Some(DialogId::Menu));
        assert_eq!(installer.title(), "CircuitPython Installer - Feather ESP32-S2");

        let menu = installer.dialogs.current().unwrap();
        assert_eq!(menu.buttons[1].label, "Full CircuitPython 8.2.0 Install");
        assert!(menu.buttons.iter().all(|b| b.enabled));
    }

    #[test]
    fn test_drive_without_marker_keeps_cursor() {
        let mut installer = installer();
        // UF2 only: Welcome, SelectBootDrive, CopyUf2, ...
        let _ = installer.update(Message::Action(ActionId::StartFlow(2)));
        assert_eq!(current(&installer), Some(DialogId::Welcome));
        let _ = installer.update(Message::Action(ActionId::Next));
        assert_eq!(current(&installer), Some(DialogId::SelectBootDrive));
        assert_eq!(installer.engine.cursor(), 1);

        let drive = tempfile::tempdir().unwrap();
        let _ = installer.update(Message::DrivePicked(
            DriveKind::Boot,
            Some(drive.path().to_path_buf()),
        ));
        assert_eq!(installer.engine.cursor(), 1);
        assert_eq!(current(&installer), Some(DialogId::SelectBootDrive));
        assert!(installer.dialogs.current().unwrap().body.contains("INFO_UF2.TXT"));
        assert!(installer.boot_drive.is_none());

        // Dismissing the picker changes nothing
        let _ = installer.update(Message::DrivePicked(DriveKind::Boot, None));
        assert_eq!(installer.engine.cursor(), 1);

        std::fs::write(drive.path().join("INFO_UF2.TXT"), "UF2 Bootloader").unwrap();
        let _ = installer.update(Message::DrivePicked(
            DriveKind::Boot,
            Some(drive.path().to_path_buf()),
        ));
        assert_eq!(installer.engine.cursor(), 2);
        assert_eq!(current(&installer), Some(DialogId::Copy));
        assert!(installer.busy);
    }

    #[test]
    fn test_connectivity_failure_shows_error_without_advancing() {
        let mut installer = installer();
        let _ = installer.update(Message::Action(ActionId::StartFlow(3)));
        let _ = installer.update(Message::Action(ActionId::Next));
        assert_eq!(current(&installer), Some(DialogId::SerialConnect));

        let failure = Failure::from(InstallerError::ChipMismatch {
            expected: "ESP32-S2".to_string(),
            found: "<i>ESP32-C3</i>".to_string(),
        });
        let _ = installer.update(Message::BootloaderConnected(Err(failure)));
        assert_eq!(current(&installer), Some(DialogId::Error));
        assert_eq!(installer.engine.cursor(), 1);

        let body = &installer.dialogs.current().unwrap().body;
        assert!(body.contains("ESP32-C3"));
        assert!(!body.contains("<i>"));

        let _ = installer.update(Message::Action(ActionId::Close));
        assert!(installer.dialogs.current().is_none());
        assert!(installer.engine.flow().is_none());
    }

    #[test]
    fn test_cancellation_is_silent() {
        let mut installer = installer();
        let _ = installer.update(Message::Action(ActionId::StartFlow(4)));
        assert_eq!(current(&installer), Some(DialogId::ReplConnect));

        let _ = installer.update(Message::ReplConnected(Err(InstallerError::Cancelled.into())));
        assert_eq!(current(&installer), Some(DialogId::ReplConnect));
    }

    #[test]
    fn test_credentials_save_enabled_by_form() {
        let mut installer = installer();
        let _ = installer.update(Message::Action(ActionId::StartFlow(4)));
        let _ = installer.update(Message::ReplConnected(Ok(())));
        assert_eq!(current(&installer), Some(DialogId::Credentials));
        let _ = installer.update(Message::SettingsLoaded(Ok(Settings::new())));

        let save = |installer: &CircuitPythonInstaller| {
            installer
                .dialogs
                .current()
                .unwrap()
                .buttons
                .iter()
                .find(|b| b.action == ActionId::SaveCredentials)
                .map(|b| b.enabled)
        };
        assert_eq!(save(&installer), Some(false));

        let _ = installer.update(Message::FormChanged(CredentialField::Ssid, "home".to_string()));
        assert_eq!(save(&installer), Some(true));

        let _ = installer.update(Message::SettingsSaved(Ok(Some("192.168.1.42".to_string()))));
        assert_eq!(current(&installer), Some(DialogId::Success));
        assert!(installer.dialogs.current().unwrap().body.contains("http://192.168.1.42:80/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repl_timeout_releases_the_connection() {
        let mut installer = installer();
        let _ = installer.update(Message::Action(ActionId::StartFlow(4)));

        let (client, _writer, _tx) = client_with(vec![]);
        installer
            .connection
            .lock()
            .await
            .acquire(TransportKind::Repl, || async {
                anyhow::Ok(Connection::Repl(ReplTransport::detached(client)))
            })
            .await
            .unwrap();

        let result = steps::read_settings(installer.connection.clone(), None).await;
        let failure = Failure::from(result.unwrap_err());
        assert_eq!(failure.category, ErrorCategory::Connectivity);

        let _ = installer.update(Message::SettingsLoaded(Err(failure)));
        assert_eq!(current(&installer), Some(DialogId::Error));
        assert!(installer.connection.lock().await.active().is_none());
    }

    #[test]
    fn test_baud_rate_follows_selection_while_disconnected() {
        let mut installer = installer();
        let _ = installer.update(Message::Action(ActionId::StartFlow(3)));
        let _ = installer.update(Message::Action(ActionId::Next));
        assert_eq!(current(&installer), Some(DialogId::SerialConnect));

        let _ = installer.update(Message::BaudRateSelected(115_200));
        assert_eq!(installer.config.flash_baud_rate, 115_200);
        assert_eq!(current(&installer), Some(DialogId::SerialConnect));
    }

    #[tokio::test]
    async fn test_baud_rate_change_refused_while_connected() {
        let mut installer = installer();
        let before = installer.config.flash_baud_rate;
        let _ = installer.update(Message::Action(ActionId::StartFlow(3)));
        let _ = installer.update(Message::Action(ActionId::Next));
        installer
            .connection
            .lock()
            .await
            .acquire(TransportKind::Bootloader, || async move {
                anyhow::Ok(Connection::Bootloader(BootloaderTransport::connected(before)))
            })
            .await
            .unwrap();

        let _ = installer.update(Message::BaudRateSelected(115_200));
        assert_eq!(current(&installer), Some(DialogId::Error));
        assert_eq!(installer.config.flash_baud_rate, before);
        assert!(installer.dialogs.current().unwrap().body.contains("baud rate"));

        // The connection stays open
        let owner = installer.connection.lock().await;
        assert!(owner.holds(TransportKind::Bootloader));
        assert_eq!(
            owner
                .active()
                .and_then(Connection::as_bootloader)
                .map(BootloaderTransport::baud_rate),
            Some(before)
        );
    }

    #[test]
    fn test_baud_rate_change_refused_while_connecting() {
        let mut installer = installer();
        let before = installer.config.flash_baud_rate;
        let connection = installer.connection.clone();
        let _held = connection.try_lock().unwrap();

        let _ = installer.update(Message::BaudRateSelected(230_400));
        assert_eq!(current(&installer), Some(DialogId::Error));
        assert_eq!(installer.config.flash_baud_rate, before);
    }

    #[test]
    fn test_port_hint_names_the_bootloader_port() {
        let mut installer = installer();
        installer.boot_labels.port_label = Some("ESP32-S2 Feather".to_string());
        let _ = installer.update(Message::Action(ActionId::StartFlow(3)));
        let _ = installer.update(Message::Action(ActionId::Next));

        let port = SerialPortEntry {
            name: "/dev/ttyACM0".to_string(),
            description: String::new(),
        };
        let _ = installer.update(Message::PortsListed(Ok(vec![port])));
        assert_eq!(current(&installer), Some(DialogId::PortSelect));
        assert!(installer
            .dialogs
            .current()
            .unwrap()
            .body
            .contains("It may be listed as ESP32-S2 Feather."));
    }
}
