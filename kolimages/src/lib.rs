//! # kolimages - Stockage et cache d'images pour Kolekto
//!
//! Chaque fiche d'une collection Kolekto peut embarquer une ou plusieurs
//! images (couvertures, scans). Un document peut en contenir des milliers :
//! cette crate évite de charger tous les bitmaps en mémoire, déduplique les
//! octets identiques, et gère la même image logique présente dans plusieurs
//! emplacements (répertoire de données de l'application, répertoire à côté
//! du document, répertoire temporaire de session, archive zip du document).
//!
//! ## Architecture
//!
//! ```text
//! kolimages
//!     ├── image.rs     - Entité Image (bitmap décodé + identité)
//!     ├── info.rs      - Métadonnées sans décodage (ImageInfo)
//!     ├── store.rs     - Trait ImageStore (has/fetch/put/remove)
//!     ├── directory.rs - Stores répertoire et répertoire temporaire
//!     ├── archive.rs   - Store en lecture seule sur une archive zip
//!     ├── fetch.rs     - Collaborateur de récupération réseau/fichier
//!     ├── source.rs    - Collaborateur document (dépaquetage différé)
//!     ├── config.rs    - Configuration de la fabrique
//!     └── factory.rs   - ImageFactory (caches, résolution, dédup)
//! ```
//!
//! Les caches en mémoire (images décodées, pixmaps rendus) sont bornés en
//! octets par [`kolcache::CostCache`]. Le code applicatif ne parle qu'à
//! [`ImageFactory`] ; la fabrique distribue vers les stores et vers le
//! document via le trait [`ImageSource`].
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use kolimages::{FactoryConfig, ImageFactory};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let factory = ImageFactory::new(FactoryConfig::new("./images"))?;
//! let image = factory.add_image_from_bytes(&std::fs::read("cover.png")?, "PNG").await;
//! if let Some(image) = image {
//!     let _pixmap = factory.pixmap(image.id(), 128, 128).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod directory;
pub mod factory;
pub mod fetch;
pub mod image;
pub mod info;
pub mod source;
pub mod store;

pub use archive::ArchiveStore;
pub use config::{local_directory_for_document, FactoryConfig, PreferredStore, StoreId};
pub use directory::{DirectoryStore, TempStore};
pub use factory::{ImageFactory, Pixmap};
pub use fetch::{FetchError, HttpFetcher, RemoteFetcher};
pub use image::{clean_id, Image};
pub use info::ImageInfo;
pub use source::ImageSource;
pub use store::ImageStore;
