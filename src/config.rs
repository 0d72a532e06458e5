use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

/// Host the board catalog points release files at
pub const CANONICAL_DOWNLOAD_HOST: &str = "https://downloads.circuitpython.org/";
/// Mirror serving the same files
pub const MIRROR_DOWNLOAD_HOST: &str = "https://adafruit-circuit-python.s3.amazonaws.com/";

pub const DEFAULT_CATALOG_URL: &str =
    "https://raw.githubusercontent.com/adafruit/circuitpython-org/main/_data/installer.json";
pub const DEFAULT_FLASH_BAUD_RATE: u32 = 921_600;
/// Rates offered for flashing
pub const FLASH_BAUD_RATES: &[u32] = &[115_200, 230_400, 460_800, 921_600];
pub const CONFIG_FILE_NAME: &str = "installer.toml";

/// Rewrite a URL on the canonical download host to the mirror host.
/// Other URLs pass through untouched.
pub fn rewrite_host(url: &str) -> String {
    match url.strip_prefix(CANONICAL_DOWNLOAD_HOST) {
        Some(rest) => format!("{}{}", MIRROR_DOWNLOAD_HOST, rest),
        None => url.to_string(),
    }
}

/// Installer attributes: which boards to offer, which release to install and
/// per-purpose image overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    #[serde(deserialize_with = "deserialize_boards")]
    pub boards: Vec<String>,
    pub version: Option<String>,
    pub chip_family: Option<String>,
    pub board_name: Option<String>,
    pub bootloader_url: Option<String>,
    pub uf2_url: Option<String>,
    pub bin_url: Option<String>,
    pub catalog_url: String,
    /// Pick the newest release (pre-releases included) instead of the first one
    pub default_latest: bool,
    pub flash_baud_rate: u32,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            boards: Vec::new(),
            version: None,
            chip_family: None,
            board_name: None,
            bootloader_url: None,
            uf2_url: None,
            bin_url: None,
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            default_latest: false,
            flash_baud_rate: DEFAULT_FLASH_BAUD_RATE,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoardList {
    Csv(String),
    List(Vec<String>),
}

fn deserialize_boards<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match BoardList::deserialize(deserializer)? {
        BoardList::Csv(csv) => parse_board_list(&csv),
        BoardList::List(list) => list
            .into_iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect(),
    })
}

/// Split a comma separated board list, dropping blanks
pub fn parse_board_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Command line flags; each one overrides the matching config file value
#[derive(Parser, Debug, Default)]
#[command(author, about = "Install CircuitPython on a board over USB")]
pub struct CliArgs {
    /// Comma separated list of board ids to offer
    #[arg(long)]
    pub boards: Option<String>,

    /// Release version to install instead of the default one
    #[arg(long)]
    pub version: Option<String>,

    #[arg(long)]
    pub chip_family: Option<String>,

    #[arg(long)]
    pub board_name: Option<String>,

    #[arg(long)]
    pub bootloader_url: Option<String>,

    #[arg(long)]
    pub uf2_url: Option<String>,

    #[arg(long)]
    pub bin_url: Option<String>,

    #[arg(long)]
    pub catalog_url: Option<String>,

    /// Default to the newest release, including pre-releases
    #[arg(long)]
    pub latest: bool,

    #[arg(long)]
    pub baud_rate: Option<u32>,

    /// Config file to read instead of the one in the user config directory
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl InstallerConfig {
    /// Location of the config file in the user's config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "circuitpython", "circuitpython-installer")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Parse a config file. URL overrides are normalized.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: InstallerConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse installer config: {}", e))?;
        Ok(config.normalized())
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!("No installer config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {:?}: {}", path, e))?;
        info!("Loaded installer config from {:?}", path);
        Self::from_toml_str(&content)
    }

    /// Config file (explicit or default location) with CLI overrides applied
    pub fn load(args: &CliArgs) -> anyhow::Result<Self> {
        let base = match args.config.as_ref().cloned().or_else(Self::default_path) {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        Ok(base.with_overrides(args))
    }

    pub fn with_overrides(mut self, args: &CliArgs) -> Self {
        if let Some(boards) = &args.boards {
            self.boards = parse_board_list(boards);
        }
        if args.version.is_some() {
            self.version = args.version.clone();
        }
        if args.chip_family.is_some() {
            self.chip_family = args.chip_family.clone();
        }
        if args.board_name.is_some() {
            self.board_name = args.board_name.clone();
        }
        if args.bootloader_url.is_some() {
            self.bootloader_url = args.bootloader_url.clone();
        }
        if args.uf2_url.is_some() {
            self.uf2_url = args.uf2_url.clone();
        }
        if args.bin_url.is_some() {
            self.bin_url = args.bin_url.clone();
        }
        if let Some(url) = &args.catalog_url {
            self.catalog_url = url.clone();
        }
        if args.latest {
            self.default_latest = true;
        }
        if let Some(rate) = args.baud_rate {
            self.flash_baud_rate = rate;
        }
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        for url in [
            &mut self.bootloader_url,
            &mut self.uf2_url,
            &mut self.bin_url,
        ] {
            *url = url
                .take()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .map(|u| rewrite_host(&u));
        }
        self.version = self
            .version
            .take()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self
    }
}
