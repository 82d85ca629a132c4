//! Store en lecture seule sur l'archive zip d'un document
//!
//! Le format de document sur disque est une archive zip dont l'entrée
//! `images/` contient un fichier par image, nommé par son identifiant.
//! Le store indexe ces noms à l'ouverture puis consomme les entrées au fil
//! des lectures : le handle du zip est relâché dès que tout a été lu, et
//! immédiatement si l'archive n'a pas d'entrée `images/` ou est corrompue
//! (le store devient inerte, jamais fatal).

use async_trait::async_trait;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tokio::sync::Mutex;
use zip::ZipArchive;

use crate::image::{format_from_id, Image};
use crate::store::ImageStore;

const IMAGES_DIR: &str = "images/";

struct ArchiveInner {
    /// Handle du zip, tenu tant qu'il reste des entrées non lues.
    zip: Option<ZipArchive<std::fs::File>>,
    /// Identifiants indexés pas encore consommés.
    remaining: HashSet<String>,
}

/// Vue en lecture seule sur les images d'une archive de document.
///
/// Chaque identifiant n'est lisible qu'une fois : l'entrée est retirée de
/// l'ensemble de travail que l'extraction réussisse ou non.
pub struct ArchiveStore {
    inner: Mutex<ArchiveInner>,
}

impl ArchiveStore {
    /// Ouvre une archive et indexe ses entrées `images/`.
    ///
    /// Une archive illisible ou sans entrée `images/` donne un store inerte
    /// dont le handle est relâché sur-le-champ.
    pub fn open(path: &Path) -> Self {
        let inner = match index_archive(path) {
            Ok(inner) => inner,
            Err(e) => {
                tracing::warn!("cannot open image archive {}: {}", path.display(), e);
                ArchiveInner {
                    zip: None,
                    remaining: HashSet::new(),
                }
            }
        };
        tracing::debug!(
            "image archive {} opened with {} entries",
            path.display(),
            inner.remaining.len()
        );
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Indique si le handle du zip est encore tenu.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.zip.is_some()
    }

    /// Nombre d'entrées indexées pas encore lues.
    pub async fn remaining(&self) -> usize {
        self.inner.lock().await.remaining.len()
    }
}

#[async_trait]
impl ImageStore for ArchiveStore {
    async fn has(&self, id: &str) -> bool {
        self.inner.lock().await.remaining.contains(id)
    }

    async fn fetch(&self, id: &str) -> Option<Image> {
        let data = {
            let mut inner = self.inner.lock().await;
            if !inner.remaining.remove(id) {
                return None;
            }
            // l'entrée est consommée, que l'extraction réussisse ou non
            let data = inner.zip.as_mut().and_then(|zip| read_entry(zip, id));
            if inner.remaining.is_empty() {
                inner.zip = None;
                tracing::debug!("image archive exhausted, closing handle");
            }
            data?
        };

        let format = format_from_id(id);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || Image::from_bytes(&data, &format, &id))
            .await
            .ok()
            .flatten()
    }

    async fn put(&self, _image: &Image) -> bool {
        tracing::debug!("image archive store is read-only");
        false
    }

    async fn remove(&self, _id: &str) -> bool {
        tracing::debug!("image archive store is read-only");
        false
    }
}

fn index_archive(path: &Path) -> anyhow::Result<ArchiveInner> {
    let file = std::fs::File::open(path)?;
    let zip = ZipArchive::new(file)?;

    let mut has_images_dir = false;
    let mut remaining = HashSet::new();
    for name in zip.file_names() {
        if let Some(child) = name.strip_prefix(IMAGES_DIR) {
            has_images_dir = true;
            if !child.is_empty() && !child.contains('/') {
                remaining.insert(child.to_string());
            }
        }
    }

    // Sans entrée images/ (ou sans enfant à lire), rien à garder ouvert
    if !has_images_dir || remaining.is_empty() {
        return Ok(ArchiveInner {
            zip: None,
            remaining: HashSet::new(),
        });
    }

    Ok(ArchiveInner {
        zip: Some(zip),
        remaining,
    })
}

fn read_entry(zip: &mut ZipArchive<std::fs::File>, id: &str) -> Option<Vec<u8>> {
    let name = format!("{}{}", IMAGES_DIR, id);
    let mut entry = match zip.by_name(&name) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!("missing archive entry {}: {}", name, e);
            return None;
        }
    };
    let mut data = Vec::with_capacity(entry.size() as usize);
    match entry.read_to_end(&mut data) {
        Ok(_) => Some(data),
        Err(e) => {
            tracing::warn!("cannot extract archive entry {}: {}", name, e);
            None
        }
    }
}
