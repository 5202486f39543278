//! Boucle de lecture : consommateur unique de la file

use kqcache::OnceCache;
use kqqueue::Queue;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lecteur vidéo externe consommant la tête de file
///
/// Une seule instance tourne par processus : `Queue::shift` est conçu
/// pour un consommateur unique.
pub struct Player {
    program: String,
    queue: Arc<Queue>,
    cache: Arc<dyn OnceCache>,
}

impl Player {
    pub fn new(program: String, queue: Arc<Queue>, cache: Arc<dyn OnceCache>) -> Self {
        Self {
            program,
            queue,
            cache,
        }
    }

    /// Boucle principale : shift, lecture, libération du cache
    ///
    /// Se termine à l'annulation du token. Les erreurs de lecture d'un
    /// titre sont journalisées et la boucle passe au suivant.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("player loop started");
        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("player loop stopping");
                    return;
                }
                item = self.queue.shift() => match item {
                    Ok(item) => item,
                    Err(e) => {
                        error!("failed to shift queue: {}", e);
                        continue;
                    }
                },
            };

            info!(title = %item.title, requester = %item.requester.name, "now playing");

            // Artefact local si le téléchargement est terminé, sinon
            // annulation et lecture directe de la source
            let source = match self.cache.get_or_cancel(&item.url).await {
                Some(path) => path.to_string_lossy().into_owned(),
                None => item.url.clone(),
            };

            if let Err(e) = self.play(&source, &shutdown).await {
                warn!(title = %item.title, "playback failed: {}", e);
            }

            if let Err(e) = self.cache.clear(&item.url).await {
                warn!(url = %item.url, "failed to clear cache entry: {}", e);
            }
        }
    }

    async fn play(&self, source: &str, shutdown: &CancellationToken) -> std::io::Result<()> {
        let mut child = Command::new(&self.program)
            .arg("--fullscreen")
            .arg(source)
            .kill_on_drop(true)
            .spawn()?;

        tokio::select! {
            _ = shutdown.cancelled() => {
                child.kill().await?;
            }
            status = child.wait() => {
                let status = status?;
                if !status.success() {
                    warn!(program = %self.program, "player exited with {}", status);
                }
            }
        }
        Ok(())
    }
}
