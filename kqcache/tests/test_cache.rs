//! Tests d'intégration du cache single-flight

use async_trait::async_trait;
use kqcache::{
    CacheStatus, Error, Fetcher, MediaCache, MediaInfo, MediaStream, NullCache, OnceCache, Result,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Fetcher de test servant des flux préparés à l'avance
///
/// Chaque appel à `open` consomme le prochain résultat de la file et
/// incrémente le compteur d'ouvertures.
struct StubFetcher {
    streams: Mutex<VecDeque<Result<MediaStream>>>,
    opened: AtomicUsize,
}

impl StubFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(VecDeque::new()),
            opened: AtomicUsize::new(0),
        })
    }

    fn push_stream(&self, stream: MediaStream) {
        self.streams.lock().unwrap().push_back(Ok(stream));
    }

    fn push_error(&self, message: &str) {
        self.streams
            .lock()
            .unwrap()
            .push_back(Err(Error::Fetch(message.to_string())));
    }

    fn push_data(&self, data: &[u8]) {
        self.push_stream(Box::pin(std::io::Cursor::new(data.to_vec())));
    }

    /// Flux dont l'écrivain reste aux mains du test
    fn push_duplex(&self) -> tokio::io::DuplexStream {
        let (writer, reader) = tokio::io::duplex(64);
        self.push_stream(Box::pin(reader));
        writer
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn probe(&self, _url: &str) -> Result<MediaInfo> {
        unimplemented!("not used by these tests")
    }

    async fn open(&self, _url: &str) -> Result<MediaStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Fetch("no stream prepared".to_string())))
    }
}

/// Attend que l'entrée atteigne l'état voulu, avec un délai de garde
async fn wait_for_status(cache: &MediaCache, url: &str, wanted: Option<CacheStatus>) {
    for _ in 0..200 {
        if cache.status(url) == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for {:?}, last seen {:?}",
        wanted,
        cache.status(url)
    );
}

#[tokio::test]
async fn test_download_materializes_file() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::new();
    fetcher.push_data(b"some media bytes");

    let cache = MediaCache::new(dir.path(), fetcher.clone(), 8).unwrap();
    let token = CancellationToken::new();

    cache.cache(&token, "http://example.com/a").await;
    wait_for_status(&cache, "http://example.com/a", Some(CacheStatus::Available)).await;

    let path = cache.get_or_cancel("http://example.com/a").await.unwrap();
    let content = tokio::fs::read(&path).await.unwrap();
    assert_eq!(content, b"some media bytes");
    assert_eq!(fetcher.opened(), 1);
}

#[tokio::test]
async fn test_cache_is_single_flight() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::new();
    let mut writer = fetcher.push_duplex();

    let cache = MediaCache::new(dir.path(), fetcher.clone(), 8).unwrap();
    let token = CancellationToken::new();

    cache.cache(&token, "http://example.com/a").await;
    wait_for_status(
        &cache,
        "http://example.com/a",
        Some(CacheStatus::Downloading),
    )
    .await;

    // Un second cache() sur la même URL ne planifie rien de plus
    cache.cache(&token, "http://example.com/a").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.opened(), 1);

    writer.write_all(b"data").await.unwrap();
    drop(writer);
    wait_for_status(&cache, "http://example.com/a", Some(CacheStatus::Available)).await;
    assert_eq!(fetcher.opened(), 1);
}

#[tokio::test]
async fn test_get_or_cancel_untracked_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::new();
    let cache = MediaCache::new(dir.path(), fetcher.clone(), 8).unwrap();

    assert!(cache.get_or_cancel("http://example.com/a").await.is_none());
    assert_eq!(fetcher.opened(), 0);
    assert_eq!(cache.status("http://example.com/a"), None);
}

#[tokio::test]
async fn test_get_or_cancel_aborts_download() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::new();
    let mut writer = fetcher.push_duplex();

    let cache = MediaCache::new(dir.path(), fetcher.clone(), 8).unwrap();
    let token = CancellationToken::new();
    let url = "http://example.com/a";

    cache.cache(&token, url).await;
    wait_for_status(&cache, url, Some(CacheStatus::Downloading)).await;
    writer.write_all(b"partial").await.unwrap();

    assert!(cache.get_or_cancel(url).await.is_none());
    wait_for_status(&cache, url, None).await;

    // Ni artefact final ni fichier temporaire orphelin
    assert!(!cache.media_path(url).exists());
    let mut dir_entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    assert!(dir_entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn test_fetch_failure_is_durable_until_clear() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::new();
    fetcher.push_error("no such video");

    let cache = MediaCache::new(dir.path(), fetcher.clone(), 8).unwrap();
    let token = CancellationToken::new();
    let url = "http://example.com/a";

    cache.cache(&token, url).await;
    wait_for_status(&cache, url, Some(CacheStatus::Failed)).await;

    // L'échec ne déclenche pas de nouvelle tentative
    cache.cache(&token, url).await;
    assert!(cache.get_or_cancel(url).await.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.status(url), Some(CacheStatus::Failed));
    assert_eq!(fetcher.opened(), 1);

    // clear rend l'URL éligible à un nouveau téléchargement
    cache.clear(url).await.unwrap();
    assert_eq!(cache.status(url), None);

    fetcher.push_data(b"retry succeeded");
    cache.cache(&token, url).await;
    wait_for_status(&cache, url, Some(CacheStatus::Available)).await;
    assert_eq!(fetcher.opened(), 2);
}

#[tokio::test]
async fn test_clear_removes_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::new();
    fetcher.push_data(b"bytes");

    let cache = MediaCache::new(dir.path(), fetcher.clone(), 8).unwrap();
    let token = CancellationToken::new();
    let url = "http://example.com/a";

    cache.cache(&token, url).await;
    wait_for_status(&cache, url, Some(CacheStatus::Available)).await;
    let path = cache.media_path(url);
    assert!(path.exists());

    cache.clear(url).await.unwrap();
    assert!(!path.exists());
    assert_eq!(cache.status(url), None);

    // clear d'une URL inconnue est sans effet
    cache.clear(url).await.unwrap();
}

#[tokio::test]
async fn test_pending_job_cancelled_before_pickup() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::new();
    let mut writer = fetcher.push_duplex();

    let cache = MediaCache::new(dir.path(), fetcher.clone(), 8).unwrap();
    let token = CancellationToken::new();

    // Le worker est occupé sur la première URL, la seconde attend en file
    cache.cache(&token, "http://example.com/busy").await;
    wait_for_status(
        &cache,
        "http://example.com/busy",
        Some(CacheStatus::Downloading),
    )
    .await;
    cache.cache(&token, "http://example.com/queued").await;
    assert_eq!(
        cache.status("http://example.com/queued"),
        Some(CacheStatus::Pending)
    );

    // Annulation avant que le worker ne serve le job
    assert!(cache
        .get_or_cancel("http://example.com/queued")
        .await
        .is_none());

    writer.write_all(b"done").await.unwrap();
    drop(writer);
    wait_for_status(
        &cache,
        "http://example.com/busy",
        Some(CacheStatus::Available),
    )
    .await;
    wait_for_status(&cache, "http://example.com/queued", None).await;

    // Le job annulé n'a jamais ouvert de flux
    assert_eq!(fetcher.opened(), 1);
}

#[tokio::test]
async fn test_parent_token_cancels_entry() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::new();
    let mut writer = fetcher.push_duplex();

    let cache = MediaCache::new(dir.path(), fetcher.clone(), 8).unwrap();
    let token = CancellationToken::new();
    let url = "http://example.com/a";

    cache.cache(&token, url).await;
    wait_for_status(&cache, url, Some(CacheStatus::Downloading)).await;
    writer.write_all(b"partial").await.unwrap();

    token.cancel();
    wait_for_status(&cache, url, None).await;
    assert!(!cache.media_path(url).exists());
}

#[tokio::test]
async fn test_null_cache_never_serves() {
    let cache = NullCache;
    let token = CancellationToken::new();

    cache.cache(&token, "http://example.com/a").await;
    assert!(cache.get_or_cancel("http://example.com/a").await.is_none());
    cache.clear("http://example.com/a").await.unwrap();
}
