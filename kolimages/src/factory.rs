//! Fabrique d'images : caches, résolution et déduplication
//!
//! [`ImageFactory`] est le seul point d'entrée du code applicatif : import,
//! export et UI passent par `add_image_*`, `image_by_id`, `pixmap`,
//! `write_cached_image` et `remove_image`. La fabrique distribue vers les
//! stores (répertoire de données, répertoire local du document, répertoire
//! temporaire) et vers le document via [`ImageSource`] pour les
//! dépaquetages différés.
//!
//! ## Tables
//!
//! * cache d'images décodées, borné en octets de pixels ;
//! * cache de pixmaps rendus, borné en octets (`largeur × hauteur × 4`) ;
//! * table `pending` : images vivantes uniquement en mémoire, pas encore
//!   confirmées durables dans un store — c'est l'unique propriétaire d'une
//!   image trop grosse pour le cache ;
//! * `release_set` : identifiants (et seulement eux) d'images surdimensionnées
//!   en attente de confirmation de durabilité avant d'être libérées.
//!
//! Toutes les tables sont derrière un verrou : chaque point d'entrée public
//! les mute. Un identifiant donné n'est résolu qu'une fois à la fois, les
//! appels concurrents attendent l'issue de la résolution en vol.

use anyhow::Result;
use image::DynamicImage;
use kolcache::CostCache;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::config::{FactoryConfig, PreferredStore, StoreId};
use crate::directory::{DirectoryStore, TempStore};
use crate::fetch::{HttpFetcher, RemoteFetcher};
use crate::image::{clean_id, detect_format, Image};
use crate::info::ImageInfo;
use crate::source::ImageSource;
use crate::store::ImageStore;

/// Raster RVBA rendu à une taille donnée, prêt pour l'affichage.
pub type Pixmap = image::RgbaImage;

struct Tables {
    image_cache: CostCache<String, Arc<Image>>,
    pixmap_cache: CostCache<String, Arc<Pixmap>>,
    pending: HashMap<String, Arc<Image>>,
    release_set: HashSet<String>,
    info_cache: HashMap<String, ImageInfo>,
}

/// Orchestrateur du stockage et du cache d'images.
///
/// Objet de contexte explicite, construit une fois au démarrage et passé
/// par référence (`Arc<ImageFactory>`) à tout consommateur. La fin de
/// session passe par [`ImageFactory::clear`] puis le drop (qui emporte le
/// répertoire temporaire).
pub struct ImageFactory {
    preferred: PreferredStore,
    data_store: DirectoryStore,
    local_store: RwLock<Option<DirectoryStore>>,
    temp_store: TempStore,
    fetcher: Arc<dyn RemoteFetcher>,
    source: RwLock<Option<Arc<dyn ImageSource>>>,
    tables: Mutex<Tables>,
    /// Identifiants en cours de résolution distante.
    in_flight: Mutex<HashSet<String>>,
}

impl ImageFactory {
    /// Crée une fabrique avec le fetcher HTTP par défaut.
    pub fn new(config: FactoryConfig) -> Result<Self> {
        Self::with_fetcher(config, Arc::new(HttpFetcher::new()))
    }

    /// Crée une fabrique avec un fetcher fourni (tests, proxys).
    pub fn with_fetcher(config: FactoryConfig, fetcher: Arc<dyn RemoteFetcher>) -> Result<Self> {
        Ok(Self {
            preferred: config.preferred,
            data_store: DirectoryStore::new(&config.data_dir),
            local_store: RwLock::new(config.local_dir.as_deref().map(DirectoryStore::new)),
            temp_store: TempStore::new()?,
            fetcher,
            source: RwLock::new(None),
            tables: Mutex::new(Tables {
                image_cache: CostCache::new(config.image_cache_budget),
                pixmap_cache: CostCache::new(config.pixmap_cache_budget),
                pending: HashMap::new(),
                release_set: HashSet::new(),
                info_cache: HashMap::new(),
            }),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Branche (ou débranche) le document propriétaire de la collection.
    pub async fn set_document(&self, source: Option<Arc<dyn ImageSource>>) {
        *self.source.write().await = source;
    }

    /// Change le répertoire local "à côté du document" (changement d'URL du
    /// document ouvert).
    pub async fn set_local_directory(&self, dir: Option<&Path>) {
        *self.local_store.write().await = dir.map(DirectoryStore::new);
    }

    /// Chemin actuel du répertoire temporaire de session.
    pub async fn temp_directory(&self) -> PathBuf {
        self.temp_store.root().await
    }

    /// Ajoute des octets fraîchement ingérés ; l'identifiant est calculé par
    /// hachage du contenu, ce qui rend l'ingestion idempotente : le même
    /// contenu ajouté deux fois rend l'exemplaire déjà présent.
    pub async fn add_image_from_bytes(&self, data: &[u8], format: &str) -> Option<Arc<Image>> {
        let data = data.to_vec();
        let format = format.to_string();
        let image =
            tokio::task::spawn_blocking(move || Image::from_bytes_hashed(&data, &format))
                .await
                .ok()
                .flatten()?;
        self.adopt_or_existing(image).await
    }

    /// Ajoute des octets avec un identifiant fourni par l'appelant
    /// (rechargement d'un store déjà vérifié, dépaquetage du document).
    ///
    /// L'identifiant est nettoyé des caractères réservés puis utilisé tel
    /// quel, sans revalidation contre le contenu.
    pub async fn add_image_with_id(
        &self,
        data: &[u8],
        format: &str,
        id: &str,
    ) -> Option<Arc<Image>> {
        let id = clean_id(id);
        if id.is_empty() {
            return None;
        }
        if let Some(existing) = self.cached_or_pending(&id).await {
            return Some(existing);
        }
        let data = data.to_vec();
        let format = format.to_string();
        let image = tokio::task::spawn_blocking(move || Image::from_bytes(&data, &format, &id))
            .await
            .ok()
            .flatten()?;
        Some(self.adopt(image).await)
    }

    /// Ajoute un bitmap en mémoire (import, glisser-déposer).
    pub async fn add_image_from_bitmap(
        &self,
        bitmap: &DynamicImage,
        format: &str,
    ) -> Option<Arc<Image>> {
        let bitmap = bitmap.clone();
        let format = format.to_string();
        let image = tokio::task::spawn_blocking(move || Image::from_bitmap(bitmap, &format))
            .await
            .ok()
            .flatten()?;
        self.adopt_or_existing(image).await
    }

    /// Ajoute une image depuis une URL (http, https ou file).
    ///
    /// Avec `link_only`, seuls l'URL (qui devient l'identifiant) et les
    /// métadonnées sont retenues : les octets ne seront jamais écrits dans
    /// un store, et seront re-récupérés à la demande.
    pub async fn add_image_from_url(
        &self,
        url: &Url,
        quiet: bool,
        link_only: bool,
    ) -> Option<Arc<Image>> {
        if link_only {
            let id = url.to_string();
            if let Some(existing) = self.cached_or_pending(&id).await {
                return Some(existing);
            }
            return self.fetch_linked(url, quiet).await;
        }

        let data = self.fetcher.fetch(url, quiet).await.ok()?;
        let format = detect_format(&data);
        let image =
            tokio::task::spawn_blocking(move || Image::from_bytes_hashed(&data, &format))
                .await
                .ok()
                .flatten()?;
        self.adopt_or_existing(image).await
    }

    /// Résout un identifiant en image.
    ///
    /// Ordre de consultation : cache décodé, table pending, re-récupération
    /// des images liées, répertoire temporaire, dépaquetage différé par le
    /// document, puis les deux répertoires persistants dans l'ordre de
    /// préférence. Un hit dans le répertoire non préféré marque le document
    /// modifié pour que l'image migre au prochain enregistrement.
    pub async fn image_by_id(&self, id: &str) -> Option<Arc<Image>> {
        if id.is_empty() {
            return None;
        }

        // Un id qu'on vient de demander ne doit pas être libéré dans le dos
        // de l'appelant
        {
            let mut tables = self.tables.lock().await;
            tables.release_set.remove(id);
        }
        self.release_images().await;

        let link_only = {
            let mut tables = self.tables.lock().await;
            if let Some(image) = tables.image_cache.get(&id.to_string()) {
                return Some(image.clone());
            }
            if let Some(image) = tables.pending.get(id) {
                return Some(image.clone());
            }
            tables
                .info_cache
                .get(id)
                .map(|info| info.link_only)
                .unwrap_or(false)
        };

        // Image liée, ou id qui se lit comme une URL absolue même sans
        // métadonnées en cache
        let as_url = Url::parse(id)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https" | "file"));
        if link_only || as_url.is_some() {
            let url = as_url.or_else(|| Url::parse(id).ok())?;
            return self.fetch_linked(&url, true).await;
        }

        if let Some(image) = self.temp_store.fetch(id).await {
            let image = Arc::new(image);
            self.cache_or_hold(image.clone()).await;
            return Some(image);
        }

        // Dépaquetage différé par le document : en cas de succès l'image est
        // réapparue dans les tables ; on en gare une copie dans le
        // répertoire temporaire pour court-circuiter ce détour la prochaine
        // fois
        let source = self.source.read().await.clone();
        if let Some(source) = source {
            if source.load_image(id).await {
                let hit = {
                    let mut tables = self.tables.lock().await;
                    match tables.image_cache.get(&id.to_string()) {
                        Some(image) => Some(image.clone()),
                        None => tables.pending.get(id).cloned(),
                    }
                };
                if let Some(image) = hit {
                    if !self.temp_store.put(image.as_ref()).await {
                        tracing::warn!(
                            "cannot stage document image {} in the temporary directory",
                            id
                        );
                    }
                    return Some(image);
                }
            }
        }

        let local = self.local_store.read().await.clone();
        let stores: [(Option<&DirectoryStore>, bool); 2] = match self.preferred {
            PreferredStore::DataDir => [(Some(&self.data_store), true), (local.as_ref(), false)],
            PreferredStore::LocalDir => [(local.as_ref(), true), (Some(&self.data_store), false)],
        };
        for (store, is_preferred) in stores {
            let Some(store) = store else { continue };
            if let Some(image) = store.fetch(id).await {
                let image = Arc::new(image);
                self.cache_or_hold(image.clone()).await;
                if !is_preferred {
                    tracing::debug!("image {} found in the non-preferred directory", id);
                    if let Some(source) = self.source.read().await.clone() {
                        source.mark_modified();
                    }
                }
                return Some(image);
            }
        }

        tracing::debug!("image not found: {}", id);
        None
    }

    /// Rend le pixmap de l'image à la taille demandée (jamais agrandi).
    ///
    /// La clé de cache est `id|largeur|hauteur`. En cas de dépassement de
    /// budget, le pixmap est rendu sans être mis en cache.
    pub async fn pixmap(&self, id: &str, width: u32, height: u32) -> Option<Arc<Pixmap>> {
        let key = format!("{}|{}|{}", id, width, height);
        {
            let mut tables = self.tables.lock().await;
            if let Some(pixmap) = tables.pixmap_cache.get(&key) {
                return Some(pixmap.clone());
            }
        }

        let image = self.image_by_id(id).await?;
        let rendered =
            tokio::task::spawn_blocking(move || image.scaled(width, height).to_rgba8())
                .await
                .ok()?;
        let rendered = Arc::new(rendered);

        let cost = u64::from(rendered.width()) * u64::from(rendered.height()) * 4;
        let mut tables = self.tables.lock().await;
        if !tables.pixmap_cache.insert(key, rendered.clone(), cost) {
            tracing::debug!("pixmap {}x{} for {} not cached", width, height, id);
        }
        Some(rendered)
    }

    /// Indique si l'image est résidente en mémoire (cache ou pending).
    pub async fn has_image(&self, id: &str) -> bool {
        let tables = self.tables.lock().await;
        tables.image_cache.contains(&id.to_string()) || tables.pending.contains_key(id)
    }

    /// Métadonnées d'une image, sans décodage si elles sont déjà connues.
    pub async fn image_info(&self, id: &str) -> Option<ImageInfo> {
        {
            let tables = self.tables.lock().await;
            if let Some(info) = tables.info_cache.get(id) {
                return Some(info.clone());
            }
        }
        // métadonnées inconnues : il faut résoudre l'image pour les rebâtir
        let image = self.image_by_id(id).await?;
        let info = ImageInfo::from(image.as_ref());
        let mut tables = self.tables.lock().await;
        tables.info_cache.insert(id.to_string(), info.clone());
        Some(info)
    }

    /// Mémorise des métadonnées connues sans décodage (lecture d'un
    /// document : dimensions et format sont dans le XML).
    pub async fn cache_image_info(&self, info: ImageInfo) {
        let mut tables = self.tables.lock().await;
        tables.info_cache.insert(info.id.clone(), info);
    }

    /// Écrit l'image dans le store cible si elle n'y est pas déjà (ou si
    /// `force`).
    ///
    /// Après une écriture réussie, l'image migre de la table pending vers le
    /// cache décodé ; si elle reste trop grosse pour le cache, elle est
    /// simplement lâchée — elle est désormais récupérable depuis le disque.
    /// En cas d'échec d'écriture, l'exemplaire en mémoire est conservé.
    pub async fn write_cached_image(&self, id: &str, target: StoreId, force: bool) -> bool {
        if id.is_empty() {
            return false;
        }
        if let Some(info) = self.peek_info(id).await {
            if info.link_only {
                return false;
            }
        }

        let exists = self.store_has(target, id).await;
        let mut success = !force && exists;
        if force || !exists {
            let Some(image) = self.image_by_id(id).await else {
                tracing::warn!("cannot write unknown image {}", id);
                return false;
            };
            success = self.store_put(target, image.as_ref()).await;
            if !success {
                tracing::warn!(
                    "cannot write image {} to the {:?} directory; keeping it in memory",
                    id,
                    target
                );
            }
        }

        if success {
            let mut tables = self.tables.lock().await;
            if let Some(image) = tables.pending.remove(id) {
                tables.release_set.remove(id);
                let cost = image.byte_size();
                if !tables.image_cache.insert(id.to_string(), image, cost) {
                    // toujours trop grosse pour le cache : récupérable
                    // depuis le disque, inutile de la retenir
                    tracing::debug!("image {} stays uncached after write-back", id);
                }
            }
        }
        success
    }

    /// Retire une image des tables mémoire, et des stores si demandé.
    pub async fn remove_image(&self, id: &str, delete_from_disk: bool) {
        {
            let mut tables = self.tables.lock().await;
            tables.image_cache.remove(&id.to_string());
            tables.pending.remove(id);
            tables.release_set.remove(id);
            tables.info_cache.remove(id);
            // les pixmaps dérivés expirent d'eux-mêmes via le LRU
        }
        if delete_from_disk {
            self.data_store.remove(id).await;
            if let Some(local) = self.local_store.read().await.clone() {
                local.remove(id).await;
            }
            self.temp_store.remove(id).await;
        }
    }

    /// Balayage de libération : chaque image surdimensionnée dont la
    /// présence est confirmée dans l'un des répertoires sur disque est
    /// lâchée de la table pending (rechargeable à la demande).
    ///
    /// C'est ce mécanisme qui empêche le cas "trop grosse pour le cache" de
    /// devenir une fuite mémoire, tout en garantissant qu'un exemplaire
    /// durable existe avant la libération.
    pub async fn release_images(&self) {
        let candidates: Vec<String> = {
            let tables = self.tables.lock().await;
            tables.release_set.iter().cloned().collect()
        };
        if candidates.is_empty() {
            return;
        }

        for id in candidates {
            let durable = self.data_store.has(&id).await
                || match self.local_store.read().await.as_ref() {
                    Some(local) => local.has(&id).await,
                    None => false,
                }
                || self.temp_store.has(&id).await;
            if !durable {
                continue;
            }
            let mut tables = self.tables.lock().await;
            // l'id a pu être redemandé entre-temps : on ne lâche que s'il
            // est toujours candidat à la libération
            if tables.release_set.remove(&id) {
                tables.pending.remove(&id);
                tracing::debug!("released oversized image {}", id);
            }
        }
    }

    /// Réinitialise l'état de session (fermeture du document).
    pub async fn clear(&self, purge_temp: bool) {
        {
            let mut tables = self.tables.lock().await;
            tables.image_cache.clear();
            tables.pixmap_cache.clear();
            tables.pending.clear();
            tables.release_set.clear();
            tables.info_cache.clear();
        }
        if purge_temp {
            if let Err(e) = self.temp_store.purge().await {
                tracing::warn!("cannot purge temporary image directory: {}", e);
            }
        }
    }

    /// Récupération d'une image liée, avec au plus une résolution en vol
    /// par identifiant : les appels concurrents attendent l'issue puis
    /// relisent les tables.
    async fn fetch_linked(&self, url: &Url, quiet: bool) -> Option<Arc<Image>> {
        let id = url.to_string();
        loop {
            {
                let mut in_flight = self.in_flight.lock().await;
                if !in_flight.contains(&id) {
                    in_flight.insert(id.clone());
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Some(existing) = self.cached_or_pending(&id).await {
                return Some(existing);
            }
        }

        let fetched = match self.fetcher.fetch(url, quiet).await {
            Ok(data) => {
                let id_owned = id.clone();
                tokio::task::spawn_blocking(move || Image::from_bytes_linked(&data, &id_owned))
                    .await
                    .ok()
                    .flatten()
            }
            Err(_) => None,
        };

        let adopted = match fetched {
            Some(image) => Some(self.adopt(image).await),
            None => None,
        };
        self.in_flight.lock().await.remove(&id);
        adopted
    }

    /// Insère une image fraîche dans la table pending et mémorise ses
    /// métadonnées. Les images liées n'iront jamais plus loin que pending.
    async fn adopt(&self, image: Image) -> Arc<Image> {
        let image = Arc::new(image);
        let mut tables = self.tables.lock().await;
        tables
            .info_cache
            .insert(image.id().to_string(), ImageInfo::from(image.as_ref()));
        tables.pending.insert(image.id().to_string(), image.clone());
        image
    }

    /// Déduplication d'ingestion : si un exemplaire non nul du même id vit
    /// déjà en mémoire, il est rendu et la nouvelle image est jetée.
    async fn adopt_or_existing(&self, image: Image) -> Option<Arc<Image>> {
        if let Some(existing) = self.cached_or_pending(image.id()).await {
            return Some(existing);
        }
        Some(self.adopt(image).await)
    }

    async fn cached_or_pending(&self, id: &str) -> Option<Arc<Image>> {
        let mut tables = self.tables.lock().await;
        if let Some(image) = tables.image_cache.get(&id.to_string()) {
            return Some(image.clone());
        }
        tables.pending.get(id).cloned()
    }

    async fn peek_info(&self, id: &str) -> Option<ImageInfo> {
        self.tables.lock().await.info_cache.get(id).cloned()
    }

    /// Insertion dans le cache décodé ; en cas de refus (budget), l'image
    /// reste vivante dans pending et son id rejoint le release set.
    async fn cache_or_hold(&self, image: Arc<Image>) {
        let mut tables = self.tables.lock().await;
        let id = image.id().to_string();
        tables
            .info_cache
            .entry(id.clone())
            .or_insert_with(|| ImageInfo::from(image.as_ref()));
        let cost = image.byte_size();
        if tables.image_cache.insert(id.clone(), image.clone(), cost) {
            // le cache devient l'unique table propriétaire
            tables.pending.remove(&id);
        } else {
            tables.pending.insert(id.clone(), image);
            tables.release_set.insert(id);
        }
    }

    async fn store_has(&self, target: StoreId, id: &str) -> bool {
        match target {
            StoreId::Data => self.data_store.has(id).await,
            StoreId::Local => match self.local_store.read().await.clone() {
                Some(local) => local.has(id).await,
                None => false,
            },
            StoreId::Temp => self.temp_store.has(id).await,
        }
    }

    async fn store_put(&self, target: StoreId, image: &Image) -> bool {
        match target {
            StoreId::Data => self.data_store.put(image).await,
            StoreId::Local => match self.local_store.read().await.clone() {
                Some(local) => local.put(image).await,
                None => {
                    tracing::warn!("no local image directory configured");
                    false
                }
            },
            StoreId::Temp => self.temp_store.put(image).await,
        }
    }
}
