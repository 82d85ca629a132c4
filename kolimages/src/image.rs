//! Module de l'entité Image
//!
//! Une [`Image`] est une valeur immuable après construction : un bitmap
//! décodé, son format d'encodage et un identifiant dérivé du contenu.
//! L'identifiant est soit le MD5 hexadécimal des octets encodés suivi de
//! l'extension en minuscules (`d41d8cd9....png`), soit l'URL source littérale
//! pour une image liée (jamais persistée).
//!
//! Une image dont une dimension est inférieure à 2 pixels est considérée
//! comme nulle : certains services distants renvoient des pixels 1×1 en
//! guise d'absence de couverture. Tous les constructeurs retournent `None`
//! dans ce cas.

use bytes::Bytes;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use md5::{Digest, Md5};
use once_cell::sync::OnceCell;

/// Caractères retirés d'un identifiant : l'id sert aussi de nom de fichier
/// dans les répertoires de stockage.
const RESERVED_ID_CHARS: &[char] = &[
    '/', '@', '<', '>', '#', '"', '&', '%', '?', '=', '{', '}', '|', '^', '~', '[', ']', '\'',
    '`', '\\', ':', '+',
];

/// Retire d'une chaîne les caractères réservés du système de fichiers.
pub fn clean_id(id: &str) -> String {
    id.chars()
        .filter(|c| !RESERVED_ID_CHARS.contains(c))
        .collect()
}

/// Une image décodée et son identité.
///
/// La valeur possède exclusivement ses pixels ; les conteneurs de la
/// fabrique la partagent via `Arc<Image>`. Deux images sont égales si et
/// seulement si leurs identifiants le sont — les pixels ne sont jamais
/// comparés.
#[derive(Debug)]
pub struct Image {
    id: String,
    format: String,
    bitmap: DynamicImage,
    link_only: bool,
    /// Tampon ré-encodé, calculé paresseusement par [`Image::encoded_bytes`].
    encoded: OnceCell<Bytes>,
}

impl Image {
    /// Décode des octets avec un identifiant fourni par l'appelant.
    ///
    /// L'identifiant est une frontière de confiance : il n'est pas recalculé
    /// ni validé contre le contenu. Ce constructeur sert aux rechargements
    /// depuis un store déjà vérifié (répertoire, archive), où le nom de
    /// fichier fait foi.
    pub fn from_bytes(data: &[u8], format: &str, id: &str) -> Option<Image> {
        let bitmap = decode(data, id)?;
        Some(Image {
            id: id.to_string(),
            format: format.to_ascii_uppercase(),
            bitmap,
            link_only: false,
            encoded: OnceCell::new(),
        })
    }

    /// Décode des octets fraîchement ingérés et calcule l'identifiant par
    /// hachage du contenu encodé.
    pub fn from_bytes_hashed(data: &[u8], format: &str) -> Option<Image> {
        let format = format.to_ascii_uppercase();
        let id = hashed_id(data, &format);
        let bitmap = decode(data, &id)?;
        Some(Image {
            id,
            format,
            bitmap,
            link_only: false,
            encoded: OnceCell::new(),
        })
    }

    /// Décode des octets récupérés depuis une URL pour une image liée.
    ///
    /// L'identifiant est l'URL source littérale ; les octets ne seront
    /// jamais écrits dans un store.
    pub fn from_bytes_linked(data: &[u8], url: &str) -> Option<Image> {
        let format = detect_format(data);
        let bitmap = decode(data, url)?;
        Some(Image {
            id: url.to_string(),
            format,
            bitmap,
            link_only: true,
            encoded: OnceCell::new(),
        })
    }

    /// Construit une image depuis un bitmap en mémoire (import, presse-papier).
    ///
    /// Le bitmap est encodé vers `format` pour calculer l'identifiant ; le
    /// tampon encodé est conservé.
    pub fn from_bitmap(bitmap: DynamicImage, format: &str) -> Option<Image> {
        if bitmap.width() < 2 || bitmap.height() < 2 {
            tracing::debug!(
                "null-sized bitmap ({}x{})",
                bitmap.width(),
                bitmap.height()
            );
            return None;
        }
        let mut image = Image {
            id: String::new(),
            format: format.to_ascii_uppercase(),
            bitmap,
            link_only: false,
            encoded: OnceCell::new(),
        };
        let data = image.encoded_bytes();
        if data.is_empty() {
            return None;
        }
        image.id = hashed_id(&data, &image.format);
        Some(image)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Format d'encodage, en majuscules (ex: "PNG", "JPEG").
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn link_only(&self) -> bool {
        self.link_only
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    pub fn bitmap(&self) -> &DynamicImage {
        &self.bitmap
    }

    /// Taille des pixels bruts, utilisée comme coût d'insertion en cache.
    pub fn byte_size(&self) -> u64 {
        self.bitmap.as_bytes().len() as u64
    }

    /// Ré-encode les pixels vers `format`, avec repli sur PNG si le format
    /// n'est pas supporté en écriture. Le tampon est calculé une seule fois.
    ///
    /// Un échec d'encodage donne un tampon vide, jamais une erreur.
    pub fn encoded_bytes(&self) -> Bytes {
        self.encoded.get_or_init(|| Bytes::from(self.encode())).clone()
    }

    /// Copie réduite tenant dans `width`×`height`, proportions conservées.
    /// Ne grossit jamais l'image.
    pub fn scaled(&self, width: u32, height: u32) -> DynamicImage {
        let width = width.max(1);
        let height = height.max(1);
        if self.bitmap.width() <= width && self.bitmap.height() <= height {
            return self.bitmap.clone();
        }
        self.bitmap.resize(width, height, FilterType::Lanczos3)
    }

    fn output_format(&self) -> ImageFormat {
        ImageFormat::from_extension(self.format.to_ascii_lowercase())
            .filter(|f| f.can_write())
            .unwrap_or(ImageFormat::Png)
    }

    fn encode(&self) -> Vec<u8> {
        let format = self.output_format();
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        // l'encodeur JPEG refuse le canal alpha
        let result = if format == ImageFormat::Jpeg && self.bitmap.color().has_alpha() {
            DynamicImage::ImageRgb8(self.bitmap.to_rgb8()).write_to(&mut cursor, format)
        } else {
            self.bitmap.write_to(&mut cursor, format)
        };
        match result {
            Ok(()) => buffer,
            Err(e) => {
                tracing::warn!("cannot encode image {} as {}: {}", self.id, self.format, e);
                Vec::new()
            }
        }
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Image {}

fn decode(data: &[u8], id: &str) -> Option<DynamicImage> {
    let bitmap = match image::load_from_memory(data) {
        Ok(bitmap) => bitmap,
        Err(e) => {
            tracing::debug!("image decode failed for {}: {}", id, e);
            return None;
        }
    };
    if bitmap.width() < 2 || bitmap.height() < 2 {
        tracing::debug!(
            "null-sized image {} ({}x{})",
            id,
            bitmap.width(),
            bitmap.height()
        );
        return None;
    }
    Some(bitmap)
}

/// Identifiant de contenu : MD5 hexadécimal des octets encodés, suivi de
/// l'extension en minuscules.
fn hashed_id(data: &[u8], format: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!(
        "{}.{}",
        hex::encode(hasher.finalize()),
        format.to_ascii_lowercase()
    )
}

/// Devine le format d'après les octets (magic number), "PNG" par défaut.
pub(crate) fn detect_format(data: &[u8]) -> String {
    match image::guess_format(data) {
        Ok(format) => format_name(format).to_string(),
        Err(_) => "PNG".to_string(),
    }
}

/// Déduit le format de l'extension d'un identifiant, "PNG" par défaut.
pub(crate) fn format_from_id(id: &str) -> String {
    match id.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_uppercase(),
        _ => "PNG".to_string(),
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "PNG",
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Gif => "GIF",
        ImageFormat::Bmp => "BMP",
        ImageFormat::Tiff => "TIFF",
        ImageFormat::WebP => "WEBP",
        ImageFormat::Ico => "ICO",
        _ => "PNG",
    }
}
