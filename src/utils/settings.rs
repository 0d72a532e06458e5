use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::InstallerError;
use crate::transport::repl::{IP_POLL_INTERVAL, IP_WAIT_TIMEOUT, ReplClient};

/// Settings file at the root of the CIRCUITPY drive
pub const SETTINGS_FILE: &str = "settings.toml";

pub const WIFI_SSID_KEY: &str = "CIRCUITPY_WIFI_SSID";
pub const WIFI_PASSWORD_KEY: &str = "CIRCUITPY_WIFI_PASSWORD";
pub const WEB_API_PASSWORD_KEY: &str = "CIRCUITPY_WEB_API_PASSWORD";
pub const WEB_API_PORT_KEY: &str = "CIRCUITPY_WEB_API_PORT";
pub const DEFAULT_WEB_API_PORT: i64 = 80;

/// A value CircuitPython reads from settings.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SettingValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Integer(value)
    }
}

pub type Settings = BTreeMap<String, SettingValue>;

/// Parse settings.toml content. Values CircuitPython cannot read (booleans,
/// arrays, tables, dates) are dropped with a warning.
pub fn parse_settings(content: &str) -> anyhow::Result<Settings> {
    let table: toml::Table = toml::from_str(content)
        .map_err(|e| InstallerError::Settings(format!("{} is not valid TOML: {}", SETTINGS_FILE, e)))?;

    let mut settings = Settings::new();
    for (key, value) in table {
        let value = match value {
            toml::Value::Integer(i) => SettingValue::Integer(i),
            toml::Value::Float(f) => SettingValue::Float(f),
            toml::Value::String(s) => SettingValue::Text(s),
            other => {
                warn!("Skipping unsupported {} value for {}", other.type_str(), key);
                continue;
            }
        };
        settings.insert(key, value);
    }
    Ok(settings)
}

pub fn encode_settings(settings: &Settings) -> anyhow::Result<String> {
    toml::to_string(settings)
        .map_err(|e| InstallerError::Settings(format!("Failed to encode settings: {}", e)).into())
}

/// One `KEY = value` line, quoted as TOML requires
fn encode_line(key: &str, value: &SettingValue) -> anyhow::Result<String> {
    let single = Settings::from([(key.to_string(), value.clone())]);
    encode_settings(&single)
}

/// Single quoted Python string literal
fn python_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Statements that rewrite the settings file from the board itself
pub fn repl_write_script(settings: &Settings) -> anyhow::Result<Vec<String>> {
    let mut statements = vec![
        "import storage\nstorage.remount('/', False)".to_string(),
        format!("f = open('/{}', 'w')", SETTINGS_FILE),
    ];
    for (key, value) in settings {
        statements.push(format!("f.write({})", python_literal(&encode_line(key, value)?)));
    }
    statements.push("f.close()".to_string());
    Ok(statements)
}

fn repl_read_script() -> String {
    format!(
        "try:\n    with open('/{}') as f:\n        print(f.read())\nexcept OSError:\n    pass",
        SETTINGS_FILE
    )
}

/// Where the settings file lives
pub enum SettingsSource<'a> {
    /// Read and written by running statements on the board
    Repl(&'a mut ReplClient),
    /// The mounted CIRCUITPY directory
    Directory(&'a Path),
}

pub struct SettingsCodec;

impl SettingsCodec {
    /// Current settings; a missing file reads as empty
    pub async fn read(source: SettingsSource<'_>) -> anyhow::Result<Settings> {
        match source {
            SettingsSource::Repl(client) => {
                let output = client.execute(&repl_read_script()).await?;
                if output.is_error() {
                    return Err(InstallerError::Settings(format!(
                        "Reading {} failed: {}",
                        SETTINGS_FILE,
                        output.stderr.trim()
                    ))
                    .into());
                }
                if output.stdout.trim().is_empty() {
                    info!("No {} on the board yet", SETTINGS_FILE);
                    return Ok(Settings::new());
                }
                parse_settings(&output.stdout)
            }
            SettingsSource::Directory(dir) => {
                let path = dir.join(SETTINGS_FILE);
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => parse_settings(&content),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        info!("No {} in {}", SETTINGS_FILE, dir.display());
                        Ok(Settings::new())
                    }
                    Err(e) => Err(InstallerError::Settings(format!(
                        "Failed to read {}: {}",
                        path.display(),
                        e
                    ))
                    .into()),
                }
            }
        }
    }

    /// Replace the settings file. Through the REPL the board is restarted
    /// afterwards and its address returned once it joins the network.
    pub async fn write(source: SettingsSource<'_>, settings: &Settings) -> anyhow::Result<Option<String>> {
        match source {
            SettingsSource::Repl(client) => {
                for statement in repl_write_script(settings)? {
                    let output = client.execute(&statement).await?;
                    if output.is_error() {
                        return Err(InstallerError::Settings(format!(
                            "The board refused to write {}: {}",
                            SETTINGS_FILE,
                            output.stderr.trim()
                        ))
                        .into());
                    }
                }
                debug!("Wrote {} keys to {} over the REPL", settings.len(), SETTINGS_FILE);

                client.soft_restart()?;
                Ok(client.wait_for_ip_address(IP_POLL_INTERVAL, IP_WAIT_TIMEOUT).await)
            }
            SettingsSource::Directory(dir) => {
                let path = dir.join(SETTINGS_FILE);
                tokio::fs::write(&path, encode_settings(settings)?)
                    .await
                    .map_err(|e| {
                        InstallerError::Settings(format!("Failed to write {}: {}", path.display(), e))
                    })?;
                info!("Wrote {}", path.display());
                Ok(None)
            }
        }
    }
}
