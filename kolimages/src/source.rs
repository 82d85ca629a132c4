//! Collaborateur document
//!
//! Le document possède la collection ouverte ; la fabrique ne le connaît
//! qu'à travers ce trait, ce qui évite toute dépendance circulaire entre le
//! cache et le document.

use async_trait::async_trait;

/// Interface que le propriétaire de la collection ouverte fournit à la
/// fabrique d'images.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Tente un dépaquetage différé de l'image `id` (typiquement depuis
    /// l'archive du document). En cas de succès, l'image est redevenue
    /// disponible par la résolution normale.
    async fn load_image(&self, id: &str) -> bool;

    /// Signale que le document devra être réécrit : une de ses images doit
    /// migrer vers l'emplacement préféré au prochain enregistrement.
    fn mark_modified(&self);
}
