//! Stores adossés à un répertoire du système de fichiers
//!
//! Un [`DirectoryStore`] est un dossier plat où le nom de fichier est
//! l'identifiant de l'image. Un [`TempStore`] applique les mêmes règles dans
//! un répertoire de brouillon propre au processus, purgeable et recréable.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::RwLock;

use crate::image::{format_from_id, Image};
use crate::store::ImageStore;

/// Store répertoire : `root/<id>` pour chaque image.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Crée une vue sur `root`. Le répertoire n'est créé qu'à la première
    /// écriture.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chemin du fichier correspondant à un identifiant.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

#[async_trait]
impl ImageStore for DirectoryStore {
    async fn has(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.path_for(id)).await.unwrap_or(false)
    }

    async fn fetch(&self, id: &str) -> Option<Image> {
        let path = self.path_for(id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("cannot read image file {}: {}", path.display(), e);
                return None;
            }
        };

        // L'identifiant demandé fait foi : il n'est jamais recalculé depuis
        // le contenu, pour que nom de fichier et id restent cohérents même
        // si un ré-encodage donnerait un autre hachage.
        let format = format_from_id(id);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || Image::from_bytes(&data, &format, &id))
            .await
            .ok()
            .flatten()
    }

    async fn put(&self, image: &Image) -> bool {
        if image.link_only() {
            tracing::warn!("refusing to store link-only image {}", image.id());
            return false;
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            tracing::warn!(
                "cannot create image directory {}: {}",
                self.root.display(),
                e
            );
            return false;
        }
        let data = image.encoded_bytes();
        if data.is_empty() {
            tracing::warn!("no encoded data for image {}", image.id());
            return false;
        }
        let path = self.path_for(image.id());
        match tokio::fs::write(&path, &data).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("cannot write image file {}: {}", path.display(), e);
                false
            }
        }
    }

    async fn remove(&self, id: &str) -> bool {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("cannot remove image file {}: {}", path.display(), e);
                false
            }
        }
    }
}

/// Store de brouillon dans un répertoire temporaire de session.
///
/// Le répertoire physique vit le temps de la session : il est supprimé au
/// drop, et [`TempStore::purge`] le remplace par un répertoire neuf. Les
/// chemins retenus avant une purge sont invalidés.
#[derive(Debug)]
pub struct TempStore {
    dir: RwLock<TempDir>,
}

impl TempStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: RwLock::new(scratch_dir()?),
        })
    }

    /// Chemin actuel du répertoire de brouillon.
    pub async fn root(&self) -> PathBuf {
        self.dir.read().await.path().to_path_buf()
    }

    /// Supprime le répertoire physique et en recrée un vide.
    pub async fn purge(&self) -> Result<()> {
        let fresh = scratch_dir()?;
        let old = {
            let mut guard = self.dir.write().await;
            std::mem::replace(&mut *guard, fresh)
        };
        old.close()?;
        tracing::debug!("temporary image directory purged");
        Ok(())
    }

    async fn view(&self) -> DirectoryStore {
        DirectoryStore::new(self.dir.read().await.path())
    }
}

#[async_trait]
impl ImageStore for TempStore {
    async fn has(&self, id: &str) -> bool {
        self.view().await.has(id).await
    }

    async fn fetch(&self, id: &str) -> Option<Image> {
        self.view().await.fetch(id).await
    }

    async fn put(&self, image: &Image) -> bool {
        self.view().await.put(image).await
    }

    async fn remove(&self, id: &str) -> bool {
        self.view().await.remove(id).await
    }
}

fn scratch_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("kolekto_images_").tempdir()?)
}
