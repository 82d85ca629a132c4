//! Métadonnées d'image sans décodage

use serde::{Deserialize, Serialize};

use crate::image::Image;

/// Fiche de métadonnées d'une image : tout ce qu'il faut savoir
/// (dimensions, format, image liée ou non) sans décoder les pixels.
///
/// Si `link_only` est vrai, aucun octet n'est jamais persisté dans un store
/// pour cet identifiant : seule l'URL source (qui sert d'id) est conservée.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub link_only: bool,
}

impl ImageInfo {
    pub fn new(id: &str, format: &str, width: u32, height: u32, link_only: bool) -> Self {
        Self {
            id: id.to_string(),
            format: format.to_string(),
            width,
            height,
            link_only,
        }
    }
}

impl From<&Image> for ImageInfo {
    fn from(image: &Image) -> Self {
        Self {
            id: image.id().to_string(),
            format: image.format().to_string(),
            width: image.width(),
            height: image.height(),
            link_only: image.link_only(),
        }
    }
}
