use image::{ImageBuffer, Rgba};
use kolimages::{clean_id, Image};
use md5::{Digest, Md5};

/// Crée une image de test simple encodée en PNG
fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 255, 255])
        }
    });

    let mut buffer = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut buffer),
        image::ImageFormat::Png,
    )
    .unwrap();
    buffer
}

#[test]
fn test_hashed_id_is_md5_of_bytes() {
    let data = create_test_png(64, 64);
    let image = Image::from_bytes_hashed(&data, "PNG").unwrap();

    let expected = format!("{}.png", hex::encode(Md5::digest(&data)));
    assert_eq!(image.id(), expected);
    assert_eq!(image.format(), "PNG");
    assert_eq!((image.width(), image.height()), (64, 64));
    assert!(!image.link_only());
}

#[test]
fn test_one_pixel_image_is_null() {
    // Certains services renvoient un pixel 1×1 en guise d'absence
    let data = create_test_png(1, 1);
    assert!(Image::from_bytes_hashed(&data, "PNG").is_none());
    assert!(Image::from_bytes(&data, "PNG", "placeholder.png").is_none());

    let tall = create_test_png(1, 50);
    assert!(Image::from_bytes_hashed(&tall, "PNG").is_none());
}

#[test]
fn test_garbage_bytes_are_null() {
    assert!(Image::from_bytes_hashed(b"not an image at all", "PNG").is_none());
}

#[test]
fn test_trusted_id_kept_as_given() {
    let data = create_test_png(16, 16);
    let image = Image::from_bytes(&data, "PNG", "abcdef.png").unwrap();
    assert_eq!(image.id(), "abcdef.png");
}

#[test]
fn test_equality_by_id_only() {
    let a = Image::from_bytes(&create_test_png(16, 16), "PNG", "same.png").unwrap();
    let b = Image::from_bytes(&create_test_png(32, 32), "PNG", "same.png").unwrap();
    let c = Image::from_bytes(&create_test_png(16, 16), "PNG", "other.png").unwrap();

    // jamais de comparaison de pixels
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_scaled_fits_and_never_upscales() {
    let image = Image::from_bytes_hashed(&create_test_png(64, 32), "PNG").unwrap();

    let down = image.scaled(32, 32);
    assert!(down.width() <= 32 && down.height() <= 32);
    // proportions 2:1 conservées
    assert_eq!(down.width(), 32);
    assert_eq!(down.height(), 16);

    let same = image.scaled(500, 500);
    assert_eq!((same.width(), same.height()), (64, 32));
}

#[test]
fn test_encoded_bytes_roundtrip() {
    let image = Image::from_bytes_hashed(&create_test_png(24, 24), "PNG").unwrap();
    let encoded = image.encoded_bytes();
    assert!(!encoded.is_empty());

    let reloaded = Image::from_bytes(&encoded, "PNG", image.id()).unwrap();
    assert_eq!((reloaded.width(), reloaded.height()), (24, 24));
}

#[test]
fn test_unwritable_format_falls_back_to_png() {
    let image = Image::from_bytes(&create_test_png(16, 16), "XYZ", "weird.xyz").unwrap();
    let encoded = image.encoded_bytes();
    assert_eq!(
        image::guess_format(&encoded).unwrap(),
        image::ImageFormat::Png
    );
}

#[test]
fn test_jpeg_encoding_drops_alpha() {
    let image = Image::from_bytes(&create_test_png(16, 16), "JPEG", "photo.jpeg").unwrap();
    let encoded = image.encoded_bytes();
    assert_eq!(
        image::guess_format(&encoded).unwrap(),
        image::ImageFormat::Jpeg
    );
}

#[test]
fn test_from_bitmap_computes_id() {
    let data = create_test_png(20, 20);
    let bitmap = image::load_from_memory(&data).unwrap();
    let image = Image::from_bitmap(bitmap, "png").unwrap();

    assert!(image.id().ends_with(".png"));
    assert_eq!(image.format(), "PNG");
    // même bitmap, même identifiant
    let again = Image::from_bitmap(image.bitmap().clone(), "png").unwrap();
    assert_eq!(image.id(), again.id());
}

#[test]
fn test_linked_image_keeps_url_as_id() {
    let data = create_test_png(16, 16);
    let image = Image::from_bytes_linked(&data, "http://example.com/cover.png").unwrap();

    assert_eq!(image.id(), "http://example.com/cover.png");
    assert!(image.link_only());
    assert_eq!(image.format(), "PNG");
}

#[test]
fn test_clean_id_strips_reserved_chars() {
    assert_eq!(clean_id("a/b:c?d.png"), "abcd.png");
    assert_eq!(clean_id("plain.jpeg"), "plain.jpeg");
    assert_eq!(clean_id("<>#\"&%?={}|^~[]'`\\:+@"), "");
}
