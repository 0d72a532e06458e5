//! Serial REPL adapter.
//!
//! A blocking reader thread pushes raw byte chunks from the port into a
//! bounded channel; [`ReplClient`] consumes that channel and speaks the raw
//! REPL protocol (Ctrl-A to enter, code followed by Ctrl-D, `OK`, stdout,
//! Ctrl-D, stderr, Ctrl-D, `>`).

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::InstallerError;
use crate::models::{CancelToken, ConnectionState, TransportKind};
use crate::transport::owner::Transport;

pub const REPL_BAUD_RATE: u32 = 115_200;
pub const CHANNEL_CAPACITY: usize = 64;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const PROMPT_TIMEOUT: Duration = Duration::from_secs(2);
const EXEC_TIMEOUT: Duration = Duration::from_secs(10);

const CTRL_A: u8 = 0x01;
const CTRL_B: u8 = 0x02;
const CTRL_D: u8 = 0x04;
const INTERRUPT: &[u8] = b"\r\x03\x03";
const RAW_REPL_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";

pub const IP_POLL_INTERVAL: Duration = Duration::from_millis(300);
pub const IP_WAIT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Output of a statement run through the raw REPL
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ReplOutput {
    pub fn is_error(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// Raw REPL client fed by the reader channel
pub struct ReplClient {
    writer: Box<dyn Write + Send>,
    rx: mpsc::Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    // Set when a read timed out; the late reply may still arrive
    stale: bool,
}

impl ReplClient {
    pub fn new(writer: Box<dyn Write + Send>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            writer,
            rx,
            buffer: Vec::new(),
            stale: false,
        }
    }

    /// Throw away anything left over from an exchange that timed out
    fn discard_stale(&mut self) {
        if !self.stale {
            return;
        }
        let mut dropped = self.buffer.len();
        self.buffer.clear();
        while let Ok(chunk) = self.rx.try_recv() {
            dropped += chunk.len();
        }
        if dropped > 0 {
            debug!("Discarded {} stale bytes from the board", dropped);
        }
        self.stale = false;
    }

    fn send(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.writer
            .write_all(bytes)
            .and_then(|_| self.writer.flush())
            .map_err(|e| InstallerError::connectivity(format!("Lost connection to the board: {}", e)))?;
        Ok(())
    }

    /// Wait for `pattern`, returning everything received before it. Bytes up
    /// to and including the pattern are consumed.
    async fn read_until(&mut self, pattern: &[u8], timeout: Duration) -> anyhow::Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(pos) = find(&self.buffer, pattern) {
                let mut consumed: Vec<u8> = self.buffer.drain(..pos + pattern.len()).collect();
                consumed.truncate(pos);
                return Ok(consumed);
            }

            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) => {
                    return Err(InstallerError::connectivity("The serial connection was closed").into());
                }
                Err(_) => {
                    self.stale = true;
                    return Err(InstallerError::connectivity(format!(
                        "Timed out waiting for {:?} from the board",
                        String::from_utf8_lossy(pattern)
                    ))
                    .into());
                }
            }
        }
    }

    /// Stop whatever program is running on the board
    pub fn interrupt(&mut self) -> anyhow::Result<()> {
        self.send(INTERRUPT)
    }

    /// Run `code` through the raw REPL and collect its output
    pub async fn execute(&mut self, code: &str) -> anyhow::Result<ReplOutput> {
        self.discard_stale();
        self.interrupt()?;
        self.send(&[CTRL_A])?;
        self.read_until(RAW_REPL_BANNER, PROMPT_TIMEOUT).await?;

        self.send(code.as_bytes())?;
        self.send(&[CTRL_D])?;
        self.read_until(b"OK", PROMPT_TIMEOUT).await?;

        let stdout = self.read_until(&[CTRL_D], EXEC_TIMEOUT).await?;
        let stderr = self.read_until(&[CTRL_D], PROMPT_TIMEOUT).await?;
        self.read_until(b">", PROMPT_TIMEOUT).await?;
        self.send(&[CTRL_B])?;

        let output = ReplOutput {
            stdout: normalize_newlines(&stdout),
            stderr: normalize_newlines(&stderr),
        };
        if output.is_error() {
            debug!("REPL statement failed: {}", output.stderr.trim());
        }
        Ok(output)
    }

    /// Soft reboot from the friendly prompt
    pub fn soft_restart(&mut self) -> anyhow::Result<()> {
        info!("Soft restarting the board");
        self.send(INTERRUPT)?;
        self.send(&[CTRL_B])?;
        self.send(&[CTRL_D])
    }

    /// Current IPv4 address of the board's WiFi radio, if it has one
    pub async fn ipv4_address(&mut self) -> anyhow::Result<Option<String>> {
        let output = self
            .execute("import wifi\nprint(wifi.radio.ipv4_address)")
            .await?;
        if output.is_error() {
            return Ok(None);
        }
        let address = output.stdout.trim();
        if address.is_empty() || address == "None" {
            Ok(None)
        } else {
            Ok(Some(address.to_string()))
        }
    }

    /// Poll for an address every `interval` until one shows up or `timeout`
    /// expires. Expiry abandons the wait and returns `None`.
    pub async fn wait_for_ip_address(
        &mut self,
        interval: Duration,
        timeout: Duration,
    ) -> Option<String> {
        let poll = async {
            loop {
                match self.ipv4_address().await {
                    Ok(Some(address)) => return address,
                    Ok(None) => {}
                    Err(e) => debug!("Board not ready yet: {}", e),
                }
                tokio::time::sleep(interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(address) => Some(address),
            Err(_) => {
                warn!("No IP address after {:?}", timeout);
                None
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn normalize_newlines(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace("\r\n", "\n")
}

/// Copy bytes from `reader` into `tx` until cancelled or the port goes away.
/// Logs its own teardown once.
pub fn read_loop<R: Read>(mut reader: R, tx: mpsc::Sender<Vec<u8>>, cancel: CancelToken, port_name: &str) {
    let mut buf = [0u8; 1024];

    let reason = loop {
        if cancel.is_cancelled() {
            break "cancelled";
        }
        match reader.read(&mut buf) {
            Ok(0) => break "port closed",
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break "client dropped";
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
            Err(e) => {
                warn!("Serial read on {} failed: {}", port_name, e);
                break "read error";
            }
        }
    };

    info!("REPL read loop on {} stopped ({})", port_name, reason);
}

struct PortWriter(Box<dyn SerialPort>);

impl Write for PortWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Serial connection to the board's interactive interpreter
pub struct ReplTransport {
    port_name: String,
    state: ConnectionState,
    port: Option<Box<dyn SerialPort>>,
    client: Option<ReplClient>,
    cancel: CancelToken,
}

impl ReplTransport {
    /// Open `port_name` and start the reader thread
    pub fn connect(port_name: &str) -> anyhow::Result<Self> {
        info!("Opening REPL on {} at {} baud", port_name, REPL_BAUD_RATE);

        let port = serialport::new(port_name, REPL_BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                InstallerError::connectivity(format!(
                    "Could not open {}: {}. Close any other program using the port and try again.",
                    port_name, e
                ))
            })?;

        let reader = port
            .try_clone()
            .map_err(|e| InstallerError::connectivity(format!("Could not read from {}: {}", port_name, e)))?;
        let writer = port
            .try_clone()
            .map_err(|e| InstallerError::connectivity(format!("Could not write to {}: {}", port_name, e)))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancelToken::new();
        let loop_cancel = cancel.clone();
        let loop_port = port_name.to_string();
        std::thread::Builder::new()
            .name("repl-reader".to_string())
            .spawn(move || read_loop(reader, tx, loop_cancel, &loop_port))
            .map_err(|e| anyhow::anyhow!("Failed to start the serial reader: {}", e))?;

        Ok(Self {
            port_name: port_name.to_string(),
            state: ConnectionState::Connected,
            port: Some(port),
            client: Some(ReplClient::new(Box::new(PortWriter(writer)), rx)),
            cancel,
        })
    }

    /// Transport around an already running client with no port behind it
    #[cfg(test)]
    pub(crate) fn detached(client: ReplClient) -> Self {
        Self {
            port_name: "test".to_string(),
            state: ConnectionState::Connected,
            port: None,
            client: Some(client),
            cancel: CancelToken::new(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn client(&mut self) -> Option<&mut ReplClient> {
        self.client.as_mut()
    }

    /// Stop the reader, drop the writer and close the port. Each step is
    /// attempted on its own; nothing here fails.
    pub fn close(&mut self) {
        self.cancel.cancel();

        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.writer.flush() {
                warn!("Flushing REPL writer on {} failed: {}", self.port_name, e);
            }
        }

        if let Some(port) = self.port.take() {
            if let Err(e) = port.clear(serialport::ClearBuffer::All) {
                warn!("Clearing {} failed: {}", self.port_name, e);
            }
        }

        self.state = ConnectionState::Disconnected;
        debug!("REPL on {} disconnected", self.port_name);
    }
}

impl Transport for ReplTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Repl
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    async fn disconnect(&mut self) {
        self.close();
    }
}

impl Drop for ReplTransport {
    fn drop(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.close();
        }
    }
}
