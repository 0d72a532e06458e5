use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use espflash::connection::{Connection, ResetAfterOperation, ResetBeforeOperation};
use espflash::flasher::Flasher;
use espflash::image_format::Segment;
use espflash::target::ProgressCallbacks;
use serialport::SerialPortType;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::InstallerError;
use crate::models::{ChipInfo, ConnectionState, SerialPortEntry, TransportKind};
use crate::transport::owner::Transport;
use crate::utils::tracker::Progress;

/// Baud rate of the ROM bootloader handshake
pub const ROM_BAUD_RATE: u32 = 115_200;
/// How long teardown waits for an in-flight flash operation to let go
pub const LOCK_RELEASE_WAIT: Duration = Duration::from_secs(1);

const OPEN_TIMEOUT: Duration = Duration::from_millis(3000);

/// Serial ports the user can pick from
pub fn available_ports() -> anyhow::Result<Vec<SerialPortEntry>> {
    let ports = serialport::available_ports()
        .map_err(|e| InstallerError::connectivity(format!("Failed to enumerate serial ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match &p.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .clone()
                    .or_else(|| usb.manufacturer.clone())
                    .unwrap_or_default(),
                _ => String::new(),
            };
            SerialPortEntry {
                name: p.port_name,
                description,
            }
        })
        .collect())
}

/// Forwards flash progress to the UI and status lines to the log sink
struct FlashProgress {
    total: usize,
    progress: Option<mpsc::UnboundedSender<Progress>>,
    log: Option<mpsc::UnboundedSender<String>>,
}

impl FlashProgress {
    fn log(&self, line: String) {
        debug!("{}", line);
        if let Some(log) = &self.log {
            let _ = log.send(line);
        }
    }
}

impl ProgressCallbacks for FlashProgress {
    fn init(&mut self, addr: u32, total: usize) {
        self.total = total;
        self.log(format!("Writing {} bytes at 0x{:x}", total, addr));
    }

    fn update(&mut self, current: usize) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(Progress::new(current as u64, Some(self.total as u64)));
        }
    }

    fn verifying(&mut self) {
        self.log("Verifying...".to_string());
    }

    fn finish(&mut self, skipped: bool) {
        if skipped {
            self.log("Flash contents already up to date, skipped".to_string());
        } else {
            self.log("Write complete".to_string());
        }
    }
}

/// Connection to the chip's ROM bootloader through espflash
pub struct BootloaderTransport {
    port_name: Option<String>,
    baud_rate: u32,
    state: ConnectionState,
    flasher: Arc<Mutex<Option<Flasher>>>,
    chip: Option<ChipInfo>,
    log: Option<mpsc::UnboundedSender<String>>,
}

impl BootloaderTransport {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            port_name: None,
            baud_rate,
            state: ConnectionState::Disconnected,
            flasher: Arc::new(Mutex::new(None)),
            chip: None,
            log: None,
        }
    }

    /// Adapter that reports itself connected without a port behind it
    #[cfg(test)]
    pub(crate) fn connected(baud_rate: u32) -> Self {
        Self {
            state: ConnectionState::Connected,
            ..Self::new(baud_rate)
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn chip(&self) -> Option<&ChipInfo> {
        self.chip.as_ref()
    }

    /// Change the flashing baud rate. Only allowed while disconnected; the
    /// rate is left alone otherwise.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), InstallerError> {
        if self.state != ConnectionState::Disconnected {
            warn!("Refusing to change baud rate while {}", self.state);
            return Err(InstallerError::BaudRateLocked);
        }
        self.baud_rate = baud_rate;
        Ok(())
    }

    /// Route status lines of later operations to `log`
    pub fn set_log_sink(&mut self, log: Option<mpsc::UnboundedSender<String>>) {
        self.log = log;
    }

    fn log_line(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        if let Some(log) = &self.log {
            let _ = log.send(line);
        }
    }

    /// Open `port_name`, sync with the ROM bootloader and identify the chip
    pub async fn connect(
        &mut self,
        port_name: &str,
        log: Option<mpsc::UnboundedSender<String>>,
    ) -> anyhow::Result<ChipInfo> {
        if self.state == ConnectionState::Connected {
            if let Some(chip) = &self.chip {
                return Ok(chip.clone());
            }
        }

        self.log = log;
        self.state = ConnectionState::Connecting;
        self.log_line(format!("Connecting to {}...", port_name));

        match self.open_flasher(port_name).await {
            Ok((flasher, chip)) => {
                *self.flasher.lock().await = Some(flasher);
                self.port_name = Some(port_name.to_string());
                self.chip = Some(chip.clone());
                self.state = ConnectionState::Connected;
                self.log_line(format!(
                    "Connected to {} (revision {}, {} flash)",
                    chip.chip,
                    chip.revision.as_deref().unwrap_or("unknown"),
                    chip.flash_size
                ));
                Ok(chip)
            }
            Err(e) => {
                error!("Bootloader connection on {} failed: {}", port_name, e);
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open_flasher(&self, port_name: &str) -> anyhow::Result<(Flasher, ChipInfo)> {
        let ports = serialport::available_ports()
            .map_err(|e| InstallerError::connectivity(format!("Failed to enumerate serial ports: {}", e)))?;

        let port_info = ports
            .iter()
            .find(|p| p.port_name == port_name)
            .ok_or_else(|| InstallerError::connectivity(format!("Port {} is no longer available", port_name)))?
            .clone();

        let usb_info = match &port_info.port_type {
            SerialPortType::UsbPort(info) => info.clone(),
            _ => serialport::UsbPortInfo {
                vid: 0,
                pid: 0,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        };

        let serial_port = serialport::new(port_name, ROM_BAUD_RATE)
            .timeout(OPEN_TIMEOUT)
            .open_native()
            .map_err(|e| {
                InstallerError::connectivity(format!(
                    "Failed to open {}: {}. The port may be in use by another program.",
                    port_name, e
                ))
            })?;

        let connection = Connection::new(
            serial_port,
            usb_info,
            ResetAfterOperation::HardReset,
            ResetBeforeOperation::DefaultReset,
            ROM_BAUD_RATE,
        );

        let baud_rate = self.baud_rate;
        let port = port_name.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<(Flasher, ChipInfo)> {
            let mut flasher = Flasher::connect(connection, true, true, false, None, Some(baud_rate))
                .map_err(|e| {
                    InstallerError::connectivity(format!(
                        "Could not talk to the bootloader on {}: {}. Hold BOOT and press RESET to enter bootloader mode.",
                        port, e
                    ))
                })?;

            let info = flasher
                .device_info()
                .map_err(|e| InstallerError::connectivity(format!("Failed to read chip details: {}", e)))?;

            let chip = ChipInfo {
                chip: info.chip.to_string(),
                revision: info
                    .revision
                    .map(|(major, minor)| format!("{}.{}", major, minor)),
                flash_size: info.flash_size.to_string(),
                mac_address: info.mac_address.map(|mac| mac.to_string().to_uppercase()),
            };

            Ok((flasher, chip))
        })
        .await
        .map_err(|e| anyhow::anyhow!("Join error: {}", e))?
    }

    /// Erase the whole flash chip
    pub async fn erase_flash(&self) -> anyhow::Result<()> {
        let mut guard = self.flasher.clone().lock_owned().await;
        self.log_line("Erasing flash, this can take a while...");

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let flasher = guard
                .as_mut()
                .ok_or_else(|| InstallerError::connectivity("The bootloader is not connected"))?;
            flasher
                .erase_flash()
                .map_err(|e| InstallerError::connectivity(format!("Failed to erase flash: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("Join error: {}", e))??;

        self.log_line("Flash erased");
        Ok(())
    }

    /// Write `data` to flash at `offset`
    pub async fn write_image(
        &self,
        offset: u32,
        data: Vec<u8>,
        progress: Option<mpsc::UnboundedSender<Progress>>,
    ) -> anyhow::Result<()> {
        if data.is_empty() {
            return Err(InstallerError::Download("The image is empty".to_string()).into());
        }

        let mut guard = self.flasher.clone().lock_owned().await;
        let mut callbacks = FlashProgress {
            total: data.len(),
            progress,
            log: self.log.clone(),
        };

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let flasher = guard
                .as_mut()
                .ok_or_else(|| InstallerError::connectivity("The bootloader is not connected"))?;
            let segments = [Segment {
                addr: offset,
                data: Cow::Owned(data),
            }];
            flasher
                .write_bins_to_flash(&segments, &mut callbacks)
                .map_err(|e| InstallerError::connectivity(format!("Failed to write flash: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("Join error: {}", e))?
    }

    /// Drop the flasher and the port. Waits at most `LOCK_RELEASE_WAIT` for
    /// an operation still holding the device.
    pub async fn close(&mut self) {
        match tokio::time::timeout(LOCK_RELEASE_WAIT, self.flasher.lock()).await {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    debug!("Bootloader connection closed");
                }
            }
            Err(_) => warn!(
                "Bootloader still busy after {:?}, abandoning it",
                LOCK_RELEASE_WAIT
            ),
        }

        self.flasher = Arc::new(Mutex::new(None));
        self.port_name = None;
        self.chip = None;
        self.state = ConnectionState::Disconnected;
    }
}

impl Transport for BootloaderTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Bootloader
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    async fn disconnect(&mut self) {
        self.close().await;
    }
}
