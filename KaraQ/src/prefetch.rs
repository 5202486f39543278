//! Préchargement du cache piloté par les évènements de la file

use async_trait::async_trait;
use kqcache::OnceCache;
use kqqueue::{EventSink, QueueEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sink qui déclenche le téléchargement de chaque demande insérée
///
/// Le téléchargement est lancé dans une tâche détachée : `publish` est
/// appelé sous le verrou de la file et ne doit pas attendre la file de
/// jobs du cache. La consommation (lecture puis libération) appartient à
/// la boucle de lecture, pas à ce sink.
pub struct CachePrefetch {
    cache: Arc<dyn OnceCache>,
    token: CancellationToken,
}

impl CachePrefetch {
    pub fn new(cache: Arc<dyn OnceCache>, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self { cache, token })
    }
}

#[async_trait]
impl EventSink for CachePrefetch {
    async fn publish(&self, event: QueueEvent) {
        if let QueueEvent::ItemAppended(item) = event {
            let cache = self.cache.clone();
            let token = self.token.clone();
            tokio::spawn(async move {
                cache.cache(&token, &item.url).await;
            });
        }
    }
}
