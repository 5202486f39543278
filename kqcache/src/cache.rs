//! Cache média single-flight
//!
//! Au plus une matérialisation en vol par URL. Tous les téléchargements
//! passent par une file de jobs bornée consommée par un unique worker, ce
//! qui sérialise les accès au fetcher externe et borne la consommation de
//! ressources. L'artefact final n'apparaît sous son nom définitif que par
//! renommage atomique : un chemin retourné par `get_or_cancel` est toujours
//! un fichier complet.

use crate::fetcher::Fetcher;
use crate::{Error, OnceCache, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Taille des tranches copiées entre deux contrôles d'annulation
const CHUNK_SIZE: usize = 64 * 1024;

/// États d'une entrée du cache
///
/// `absent → Pending → Downloading → Available` ; une annulation pendant
/// Pending ou Downloading ramène à absent ; un échec non provoqué passe en
/// `Failed`, durable jusqu'à un `clear` explicite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Pending,
    Downloading,
    Available,
    Failed,
}

struct CacheEntry {
    status: CacheStatus,
    token: CancellationToken,
}

struct CacheJob {
    url: String,
    token: CancellationToken,
}

/// Cache de téléchargement sur disque
///
/// Conçu pour être utilisé derrière un `Arc<MediaCache>` ; la table des
/// entrées est protégée par son propre Mutex, distinct du verrou de la file
/// de demandes.
pub struct MediaCache {
    dir: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
    jobs: mpsc::Sender<CacheJob>,
}

impl MediaCache {
    /// Crée le cache et démarre son worker unique
    ///
    /// # Arguments
    ///
    /// * `dir` - Répertoire de stockage (créé si absent), propriété
    ///   exclusive du cache
    /// * `fetcher` - Collaborateur fournissant les flux média
    /// * `job_capacity` - Capacité de la file de jobs (contre-pression au
    ///   delà)
    pub fn new(
        dir: impl AsRef<Path>,
        fetcher: Arc<dyn Fetcher>,
        job_capacity: usize,
    ) -> Result<Arc<Self>> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (tx, rx) = mpsc::channel(job_capacity);
        let cache = Arc::new(Self {
            dir,
            entries: Mutex::new(HashMap::new()),
            jobs: tx,
        });

        let worker = cache.clone();
        tokio::spawn(async move {
            debug!("cache worker started");
            worker.run_worker(fetcher, rx).await;
        });

        Ok(cache)
    }

    /// Clé primaire dérivée de l'URL source (16 octets de SHA-256, en hexa)
    pub fn pk_for_url(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    /// Chemin de l'artefact final pour une URL
    pub fn media_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.media", Self::pk_for_url(url)))
    }

    fn temp_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.part-{}",
            Self::pk_for_url(url),
            uuid::Uuid::new_v4()
        ))
    }

    /// État courant d'une entrée (`None` si l'URL n'est pas suivie)
    pub fn status(&self, url: &str) -> Option<CacheStatus> {
        self.entries.lock().unwrap().get(url).map(|e| e.status)
    }

    fn set_status_on_existing(&self, url: &str, status: CacheStatus) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(url) {
            entry.status = status;
        }
    }

    fn remove_entry(&self, url: &str) {
        self.entries.lock().unwrap().remove(url);
    }

    async fn run_worker(&self, fetcher: Arc<dyn Fetcher>, mut rx: mpsc::Receiver<CacheJob>) {
        while let Some(job) = rx.recv().await {
            // Job annulé avant d'être servi : aucune E/S
            if job.token.is_cancelled() {
                debug!(url = %job.url, "skipping cancelled download");
                self.remove_entry(&job.url);
                continue;
            }

            self.set_status_on_existing(&job.url, CacheStatus::Downloading);

            match self.download(fetcher.as_ref(), &job).await {
                Ok(()) => {
                    info!(url = %job.url, "download complete");
                    self.set_status_on_existing(&job.url, CacheStatus::Available);
                }
                Err(Error::Cancelled) => {
                    // L'URL redevient éligible à un nouveau cache()
                    info!(url = %job.url, "download cancelled");
                    self.remove_entry(&job.url);
                }
                Err(e) => {
                    warn!(url = %job.url, "download failed: {}", e);
                    self.set_status_on_existing(&job.url, CacheStatus::Failed);
                }
            }
        }
    }

    async fn download(&self, fetcher: &dyn Fetcher, job: &CacheJob) -> Result<()> {
        let mut stream = fetcher.open(&job.url).await?;
        let temp = self.temp_path(&job.url);

        let result = self
            .write_stream(&mut stream, &temp, &self.media_path(&job.url), &job.token)
            .await;

        if result.is_err() {
            // Jamais de fichier partiel sous le nom final ni orphelin .part
            let _ = tokio::fs::remove_file(&temp).await;
        }
        result
    }

    async fn write_stream(
        &self,
        stream: &mut crate::fetcher::MediaStream,
        temp: &Path,
        final_path: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut file = tokio::fs::File::create(temp).await?;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            // L'annulation est observée entre deux tranches, pas
            // préemptivement : la latence est bornée par CHUNK_SIZE
            let n = tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                read = stream.read(&mut buf) => {
                    read.map_err(|e| Error::Fetch(format!("stream read failed: {}", e)))?
                }
            };

            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
        }

        file.flush().await?;
        drop(file);

        // Renommage atomique : le nom final n'expose jamais un transfert
        // incomplet
        tokio::fs::rename(temp, final_path).await?;
        Ok(())
    }
}

#[async_trait]
impl OnceCache for MediaCache {
    async fn cache(&self, parent: &CancellationToken, url: &str) {
        let token = {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(url) {
                debug!(url, "already tracked, nothing to do");
                return;
            }

            let token = parent.child_token();
            entries.insert(
                url.to_string(),
                CacheEntry {
                    status: CacheStatus::Pending,
                    token: token.clone(),
                },
            );
            token
        };

        debug!(url, "queuing download");

        // Envoi hors du verrou : la contre-pression de la file de jobs peut
        // bloquer l'appelant
        let job = CacheJob {
            url: url.to_string(),
            token,
        };
        if self.jobs.send(job).await.is_err() {
            warn!(url, "cache worker is gone, dropping entry");
            self.remove_entry(url);
        }
    }

    async fn get_or_cancel(&self, url: &str) -> Option<PathBuf> {
        let entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get(url) {
            if entry.status == CacheStatus::Available {
                return Some(self.media_path(url));
            }

            debug!(url, "cancelling in-flight download");
            entry.token.cancel();
        }

        None
    }

    // Un clear qui croise le renommage final du worker peut laisser un
    // artefact renommé juste après la suppression, sans entrée pour le
    // suivre ; il ne disparaît qu'à un clear ultérieur de la même URL.
    async fn clear(&self, url: &str) -> Result<()> {
        debug!(url, "clearing cache entry");

        if let Some(entry) = self.entries.lock().unwrap().remove(url) {
            entry.token.cancel();
        }

        match tokio::fs::remove_file(self.media_path(url)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
