//! Trait commun des stores d'images
//!
//! Les stores sont purs vis-à-vis de l'état mémoire : la politique de cache
//! appartient à la fabrique, pas aux stores. Les échecs d'entrée/sortie sont
//! journalisés et rendus comme `false`/`None`, jamais propagés.

use async_trait::async_trait;

use crate::image::Image;

/// Capacités d'un emplacement de stockage d'images.
///
/// Le nom de fichier (ou d'entrée d'archive) d'une image est son
/// identifiant ; voir [`crate::clean_id`] pour les caractères admis.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Indique si l'identifiant est présent dans ce store.
    async fn has(&self, id: &str) -> bool;

    /// Charge et décode l'image, `None` si absente ou indéchiffrable.
    async fn fetch(&self, id: &str) -> Option<Image>;

    /// Écrit l'image encodée. `false` en cas d'échec (journalisé) ou si le
    /// store est en lecture seule.
    async fn put(&self, image: &Image) -> bool;

    /// Supprime l'image. Un fichier déjà absent n'est pas une erreur.
    async fn remove(&self, id: &str) -> bool;
}
