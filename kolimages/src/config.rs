//! Configuration de la fabrique d'images

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_IMAGE_CACHE_BUDGET: u64 = 64 * 1024 * 1024;
const DEFAULT_PIXMAP_CACHE_BUDGET: u64 = 16 * 1024 * 1024;

/// Emplacement faisant autorité quand une image existe à la fois dans le
/// répertoire de données et dans le répertoire local du document.
///
/// La préférence ne décide que de l'ordre de promotion, jamais de
/// l'existence : une image trouvée uniquement dans l'emplacement non
/// préféré reste valide, mais le document est marqué modifié pour qu'elle
/// migre au prochain enregistrement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferredStore {
    #[default]
    DataDir,
    LocalDir,
}

/// Cible d'écriture pour [`crate::ImageFactory::write_cached_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreId {
    Data,
    Local,
    Temp,
}

/// Paramètres de la fabrique d'images.
///
/// Les budgets de cache sont exprimés en octets de pixels décodés, pas en
/// nombre d'images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Répertoire de données de l'application (images persistantes).
    pub data_dir: PathBuf,
    /// Répertoire local "à côté du document", s'il y a un document ouvert.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
    /// Emplacement préféré pour la promotion des images.
    #[serde(default)]
    pub preferred: PreferredStore,
    /// Budget du cache d'images décodées.
    #[serde(default = "default_image_budget")]
    pub image_cache_budget: u64,
    /// Budget du cache de pixmaps rendus.
    #[serde(default = "default_pixmap_budget")]
    pub pixmap_cache_budget: u64,
}

impl FactoryConfig {
    /// Configuration par défaut pour un répertoire de données donné.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            local_dir: None,
            preferred: PreferredStore::default(),
            image_cache_budget: DEFAULT_IMAGE_CACHE_BUDGET,
            pixmap_cache_budget: DEFAULT_PIXMAP_CACHE_BUDGET,
        }
    }

    /// Charge une configuration YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Enregistre la configuration en YAML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("cannot write config file {}", path.display()))?;
        Ok(())
    }
}

fn default_image_budget() -> u64 {
    DEFAULT_IMAGE_CACHE_BUDGET
}

fn default_pixmap_budget() -> u64 {
    DEFAULT_PIXMAP_CACHE_BUDGET
}

/// Dérive le répertoire local associé à un document : `<nom>_files/` à côté
/// du fichier du document.
pub fn local_directory_for_document(document: &Path) -> PathBuf {
    let stem = document
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    document.with_file_name(format!("{}_files", stem))
}
