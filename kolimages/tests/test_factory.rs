use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageBuffer, Rgba};
use kolimages::{
    ArchiveStore, FactoryConfig, FetchError, ImageFactory, ImageSource, ImageStore, RemoteFetcher,
    StoreId,
};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use url::Url;

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

/// Fetcher de test servant des réponses préparées, sans réseau
struct MockFetcher {
    responses: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    fn with(url: &str, data: Vec<u8>) -> Arc<Self> {
        let mut responses = HashMap::new();
        responses.insert(url.to_string(), data);
        Arc::new(Self {
            responses,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RemoteFetcher for MockFetcher {
    async fn fetch(&self, locator: &Url, _quiet: bool) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.get(locator.as_str()) {
            Some(data) => Ok(Bytes::from(data.clone())),
            None => Err(FetchError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such fixture",
            ))),
        }
    }
}

/// Document de test : dépaquetage différé depuis une archive, compteur de
/// signaux de modification
struct MockDocument {
    factory: Mutex<Weak<ImageFactory>>,
    archive: Option<ArchiveStore>,
    modified: AtomicUsize,
}

impl MockDocument {
    fn new(archive: Option<ArchiveStore>) -> Arc<Self> {
        Arc::new(Self {
            factory: Mutex::new(Weak::new()),
            archive,
            modified: AtomicUsize::new(0),
        })
    }

    fn attach(self: &Arc<Self>, factory: &Arc<ImageFactory>) {
        *self.factory.lock().unwrap() = Arc::downgrade(factory);
    }

    fn modified_count(&self) -> usize {
        self.modified.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for MockDocument {
    async fn load_image(&self, id: &str) -> bool {
        let factory = {
            let guard = self.factory.lock().unwrap();
            guard.upgrade()
        };
        let Some(factory) = factory else { return false };
        let Some(archive) = &self.archive else { return false };
        let Some(image) = archive.fetch(id).await else { return false };
        factory
            .add_image_with_id(&image.encoded_bytes(), image.format(), id)
            .await
            .is_some()
    }

    fn mark_modified(&self) {
        self.modified.fetch_add(1, Ordering::SeqCst);
    }
}

fn write_archive(path: &Path, images: &[(&str, Vec<u8>)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    writer.add_directory("images/", options).unwrap();
    for (id, data) in images {
        writer
            .start_file(format!("images/{}", id), options)
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

#[tokio::test]
async fn test_adding_same_bytes_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ImageFactory::new(FactoryConfig::new(dir.path().join("data"))).unwrap();

    let data = create_test_png(64, 64);
    let first = factory.add_image_from_bytes(&data, "PNG").await.unwrap();
    let second = factory.add_image_from_bytes(&data, "PNG").await.unwrap();

    assert_eq!(first.id(), second.id());
    // le second ajout rend l'exemplaire déjà présent
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_add_resolve_pixmap_remove_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ImageFactory::new(FactoryConfig::new(dir.path().join("data"))).unwrap();

    let data = create_test_png(64, 64);
    let expected_id = format!("{}.png", hex::encode(Md5::digest(&data)));

    let image = factory.add_image_from_bytes(&data, "PNG").await.unwrap();
    assert_eq!(image.id(), expected_id);

    let resolved = factory.image_by_id(&expected_id).await.unwrap();
    assert_eq!((resolved.width(), resolved.height()), (64, 64));

    let pixmap = factory.pixmap(&expected_id, 32, 32).await.unwrap();
    assert_eq!((pixmap.width(), pixmap.height()), (32, 32));

    factory.remove_image(&expected_id, true).await;
    assert!(factory.image_by_id(&expected_id).await.is_none());
}

#[tokio::test]
async fn test_temp_store_wins_over_persistent_store() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();

    // même identifiant, contenus discernables : 32×32 côté persistant,
    // 64×64 côté temporaire
    std::fs::write(data_dir.join("custom.png"), create_test_png(32, 32)).unwrap();

    let factory = ImageFactory::new(FactoryConfig::new(&data_dir)).unwrap();
    tokio::fs::write(
        factory.temp_directory().await.join("custom.png"),
        create_test_png(64, 64),
    )
    .await
    .unwrap();

    let image = factory.image_by_id("custom.png").await.unwrap();
    assert_eq!((image.width(), image.height()), (64, 64));
}

#[tokio::test]
async fn test_fallback_store_hit_marks_document_modified() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let local_dir = dir.path().join("local");
    std::fs::create_dir_all(&local_dir).unwrap();
    std::fs::write(local_dir.join("cover.png"), create_test_png(32, 32)).unwrap();

    // préférence par défaut : répertoire de données ; l'image n'existe que
    // dans le répertoire local
    let mut config = FactoryConfig::new(&data_dir);
    config.local_dir = Some(local_dir);
    let factory = Arc::new(ImageFactory::new(config).unwrap());

    let doc = MockDocument::new(None);
    doc.attach(&factory);
    factory.set_document(Some(doc.clone())).await;

    let image = factory.image_by_id("cover.png").await.unwrap();
    assert_eq!((image.width(), image.height()), (32, 32));
    assert_eq!(doc.modified_count(), 1);

    // résolutions suivantes depuis le cache : pas de second signal
    factory.image_by_id("cover.png").await.unwrap();
    assert_eq!(doc.modified_count(), 1);
}

#[tokio::test]
async fn test_preferred_store_hit_does_not_mark_modified() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("cover.png"), create_test_png(32, 32)).unwrap();

    let factory = Arc::new(ImageFactory::new(FactoryConfig::new(&data_dir)).unwrap());
    let doc = MockDocument::new(None);
    doc.attach(&factory);
    factory.set_document(Some(doc.clone())).await;

    assert!(factory.image_by_id("cover.png").await.is_some());
    assert_eq!(doc.modified_count(), 0);
}

#[tokio::test]
async fn test_preference_never_decides_existence() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("cover.png"), create_test_png(32, 32)).unwrap();

    // préférence locale, mais aucun répertoire local configuré : l'image du
    // répertoire de données reste trouvée, avec signal de migration
    let mut config = FactoryConfig::new(&data_dir);
    config.preferred = kolimages::PreferredStore::LocalDir;
    let factory = Arc::new(ImageFactory::new(config).unwrap());
    let doc = MockDocument::new(None);
    doc.attach(&factory);
    factory.set_document(Some(doc.clone())).await;

    assert!(factory.image_by_id("cover.png").await.is_some());
    assert_eq!(doc.modified_count(), 1);
}

#[tokio::test]
async fn test_oversized_image_survives_cache_pressure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = FactoryConfig::new(dir.path().join("data"));
    // 64×64 en RVBA = 16 Kio de pixels : ne tiendra jamais dans 8 Kio
    config.image_cache_budget = 8 * 1024;
    let factory = ImageFactory::new(config).unwrap();

    let big = factory
        .add_image_from_bytes(&create_test_png(64, 64), "PNG")
        .await
        .unwrap();
    let big_id = big.id().to_string();
    drop(big);
    assert!(factory.has_image(&big_id).await);

    // écriture dans le répertoire temporaire : l'image quitte pending,
    // trop grosse pour le cache elle est lâchée — le disque fait foi
    assert!(factory.write_cached_image(&big_id, StoreId::Temp, false).await);
    assert!(!factory.has_image(&big_id).await);

    // toujours résolvable ; la copie relue repasse par pending + release set
    let resolved = factory.image_by_id(&big_id).await.unwrap();
    assert_eq!((resolved.width(), resolved.height()), (64, 64));
    drop(resolved);
    assert!(factory.has_image(&big_id).await);

    // la résolution d'un autre id déclenche le balayage de libération :
    // l'image surdimensionnée, confirmée durable, est libérée de la mémoire
    // sans cesser d'être résolvable
    let small = factory
        .add_image_from_bytes(&create_test_png(16, 16), "PNG")
        .await
        .unwrap();
    let small_id = small.id().to_string();
    factory.image_by_id(&small_id).await.unwrap();

    assert!(!factory.has_image(&big_id).await);
    assert!(factory.image_by_id(&big_id).await.is_some());
}

#[tokio::test]
async fn test_link_only_image_is_refetched_not_stored() {
    let url = "http://covers.example.com/b/123.png";
    let fetcher = MockFetcher::with(url, create_test_png(48, 48));

    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let factory =
        ImageFactory::with_fetcher(FactoryConfig::new(&data_dir), fetcher.clone()).unwrap();

    let parsed = Url::parse(url).unwrap();
    let image = factory
        .add_image_from_url(&parsed, true, true)
        .await
        .unwrap();
    assert_eq!(image.id(), url);
    assert!(image.link_only());

    let info = factory.image_info(url).await.unwrap();
    assert!(info.link_only);

    // jamais écrite dans un store : l'écriture est refusée et le répertoire
    // de données n'est même pas créé
    assert!(!factory.write_cached_image(url, StoreId::Data, false).await);
    assert!(!data_dir.exists());

    // hors de la mémoire, elle est re-récupérée depuis sa source
    factory.remove_image(url, false).await;
    assert!(!factory.has_image(url).await);
    let refetched = factory.image_by_id(url).await.unwrap();
    assert_eq!((refetched.width(), refetched.height()), (48, 48));
    assert!(fetcher.calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_document_delayed_unpack_is_staged_in_temp() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("doc.zip");
    write_archive(&archive_path, &[("deep.png", create_test_png(40, 40))]);

    let factory =
        Arc::new(ImageFactory::new(FactoryConfig::new(dir.path().join("data"))).unwrap());
    let doc = MockDocument::new(Some(ArchiveStore::open(&archive_path)));
    doc.attach(&factory);
    factory.set_document(Some(doc.clone())).await;

    let image = factory.image_by_id("deep.png").await.unwrap();
    assert_eq!((image.width(), image.height()), (40, 40));

    // une copie a été garée dans le répertoire temporaire pour
    // court-circuiter le dépaquetage la prochaine fois
    let staged = factory.temp_directory().await.join("deep.png");
    assert!(tokio::fs::try_exists(&staged).await.unwrap());
}

#[tokio::test]
async fn test_pixmap_is_cached_and_never_upscaled() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ImageFactory::new(FactoryConfig::new(dir.path().join("data"))).unwrap();

    let image = factory
        .add_image_from_bytes(&create_test_png(64, 64), "PNG")
        .await
        .unwrap();
    let id = image.id().to_string();

    // jamais agrandi
    let full = factory.pixmap(&id, 128, 128).await.unwrap();
    assert_eq!((full.width(), full.height()), (64, 64));

    let first = factory.pixmap(&id, 32, 32).await.unwrap();
    let second = factory.pixmap(&id, 32, 32).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_failed_write_keeps_memory_copy() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ImageFactory::new(FactoryConfig::new(dir.path().join("data"))).unwrap();

    let image = factory
        .add_image_from_bytes(&create_test_png(24, 24), "PNG")
        .await
        .unwrap();
    let id = image.id().to_string();

    // pas de répertoire local configuré : l'écriture échoue, l'exemplaire
    // en mémoire n'est pas perdu
    assert!(!factory.write_cached_image(&id, StoreId::Local, false).await);
    assert!(factory.has_image(&id).await);
}

#[tokio::test]
async fn test_clear_resets_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ImageFactory::new(FactoryConfig::new(dir.path().join("data"))).unwrap();

    let image = factory
        .add_image_from_bytes(&create_test_png(24, 24), "PNG")
        .await
        .unwrap();
    let id = image.id().to_string();
    assert!(factory.write_cached_image(&id, StoreId::Temp, false).await);
    let old_temp = factory.temp_directory().await;

    factory.clear(true).await;

    assert!(!factory.has_image(&id).await);
    assert!(!old_temp.exists());
    assert!(factory.image_by_id(&id).await.is_none());
}
