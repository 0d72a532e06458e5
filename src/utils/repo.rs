use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{InstallerConfig, rewrite_host};
use crate::error::InstallerError;
use crate::utils::release::sort_releases;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReleaseInfo {
    pub version: String,
    #[serde(default)]
    pub uf2file: Option<String>,
    #[serde(default)]
    pub binfile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BoardDefinition {
    #[serde(rename = "chipfamily")]
    pub chip_family: String,
    pub name: String,
    #[serde(default)]
    pub bootloader: Option<String>,
    #[serde(default)]
    pub releases: Vec<ReleaseInfo>,
}

/// Board catalog keyed by board id, in catalog order
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct BoardCatalog {
    pub boards: IndexMap<String, BoardDefinition>,
}

impl BoardCatalog {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| InstallerError::Catalog(format!("Failed to parse catalog: {}", e)).into())
    }
}

/// Everything the installer needs to know about the board being installed
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBoard {
    pub board_id: String,
    pub chip_family: String,
    pub name: String,
    pub bootloader_url: Option<String>,
    pub release: Option<ReleaseInfo>,
    pub uf2_url: Option<String>,
    pub bin_url: Option<String>,
}

impl ResolvedBoard {
    pub fn version(&self) -> Option<&str> {
        self.release.as_ref().map(|r| r.version.as_str())
    }
}

/// A board offered for selection
#[derive(Debug, Clone, PartialEq)]
pub struct BoardEntry {
    pub id: String,
    pub name: String,
}

impl std::fmt::Display for BoardEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub struct BoardRepo {
    catalog_url: String,
    catalog: Option<BoardCatalog>,
}

impl BoardRepo {
    pub fn new(catalog_url: impl Into<String>) -> Self {
        Self {
            catalog_url: catalog_url.into(),
            catalog: None,
        }
    }

    pub fn with_catalog(catalog: BoardCatalog) -> Self {
        Self {
            catalog_url: String::new(),
            catalog: Some(catalog),
        }
    }

    pub fn catalog_url(&self) -> &str {
        &self.catalog_url
    }

    pub fn catalog(&self) -> Option<&BoardCatalog> {
        self.catalog.as_ref()
    }

    pub fn set_catalog(&mut self, catalog: BoardCatalog) {
        self.catalog = Some(catalog);
    }

    /// Boards to offer: the configured ids present in the catalog, or every
    /// catalog entry when none are configured.
    pub fn boards(&self, config: &InstallerConfig) -> Vec<BoardEntry> {
        let Some(catalog) = &self.catalog else {
            return Vec::new();
        };

        if config.boards.is_empty() {
            return catalog
                .boards
                .iter()
                .map(|(id, board)| BoardEntry {
                    id: id.clone(),
                    name: board.name.clone(),
                })
                .collect();
        }

        config
            .boards
            .iter()
            .filter_map(|id| match catalog.boards.get(id) {
                Some(board) => Some(BoardEntry {
                    id: id.clone(),
                    name: board.name.clone(),
                }),
                None => {
                    warn!("Board {} is not in the catalog, skipping", id);
                    None
                }
            })
            .collect()
    }

    /// Resolve chip family, name and image URLs for `board_id`.
    ///
    /// Configuration overrides win over catalog values. With a pinned version
    /// the release must match it exactly; otherwise the first release of the
    /// sorted list is used, or the last one when `default_latest` is set.
    pub fn resolve(
        &self,
        board_id: &str,
        config: &InstallerConfig,
    ) -> Result<ResolvedBoard, InstallerError> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| InstallerError::Catalog("Board catalog is not loaded".to_string()))?;
        let board = catalog.boards.get(board_id).ok_or_else(|| {
            InstallerError::Catalog(format!("Board {} is not in the catalog", board_id))
        })?;

        let chip_family = config
            .chip_family
            .clone()
            .unwrap_or_else(|| board.chip_family.clone());
        let name = config
            .board_name
            .clone()
            .unwrap_or_else(|| board.name.clone());
        let bootloader_url = config
            .bootloader_url
            .clone()
            .or_else(|| board.bootloader.as_deref().map(rewrite_host));

        let mut releases = board.releases.clone();
        sort_releases(&mut releases);

        let release = match &config.version {
            Some(version) => {
                let found = releases.iter().find(|r| &r.version == version).cloned();
                if found.is_none() {
                    warn!("Requested version {} not found for {}", version, board_id);
                }
                found
            }
            None if config.default_latest => releases.last().cloned(),
            None => releases.first().cloned(),
        };

        let uf2_url = config.uf2_url.clone().or_else(|| {
            release
                .as_ref()
                .and_then(|r| r.uf2file.as_deref())
                .map(rewrite_host)
        });
        let bin_url = config.bin_url.clone().or_else(|| {
            release
                .as_ref()
                .and_then(|r| r.binfile.as_deref())
                .map(rewrite_host)
        });

        debug!(
            "Resolved {}: chip={}, release={:?}",
            board_id,
            chip_family,
            release.as_ref().map(|r| &r.version)
        );

        Ok(ResolvedBoard {
            board_id: board_id.to_string(),
            chip_family,
            name,
            bootloader_url,
            release,
            uf2_url,
            bin_url,
        })
    }
}

/// Fetch and parse the board catalog
pub async fn download_catalog(url: &str) -> anyhow::Result<BoardCatalog> {
    info!("Fetching board catalog from {}", url);

    let response = reqwest::get(url)
        .await
        .map_err(|e| InstallerError::Catalog(format!("Failed to fetch board catalog: {}", e)))?;

    if !response.status().is_success() {
        return Err(InstallerError::Catalog(format!(
            "Failed to fetch board catalog, status: {}",
            response.status()
        ))
        .into());
    }

    let catalog: BoardCatalog = response
        .json()
        .await
        .map_err(|e| InstallerError::Catalog(format!("Failed to parse board catalog: {}", e)))?;

    info!("Board catalog lists {} boards", catalog.boards.len());
    Ok(catalog)
}
