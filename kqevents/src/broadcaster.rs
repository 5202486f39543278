//! Diffusion des évènements de la file aux observateurs
//!
//! Chaque abonné dispose de son propre canal borné. Un envoi ne perd
//! jamais d'évènement : quand le tampon d'un abonné est plein, l'émetteur
//! attend, et la contre-pression remonte jusqu'à la mutation de la file.
//!
//! Le protocole d'abonnement garantit qu'un observateur voit chaque
//! élément exactement une fois : l'instantané initial est capturé et
//! l'abonné enregistré pendant que le verrou partagé de la file est
//! détenu, donc aucune mutation ne peut s'intercaler entre les deux.

use async_trait::async_trait;
use kqqueue::{EventSink, Queue, QueueEvent, Result, Viewer};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

struct Subscriber {
    id: Uuid,
    viewer: Viewer,
    tx: mpsc::Sender<QueueEvent>,
}

/// Table des abonnés, partagée entre le diffuseur et ses abonnements
struct Registry {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Registry {
    /// Retire un abonné et, si c'était la dernière connexion de son
    /// identité, annonce le départ aux abonnés restants.
    ///
    /// Appelé depuis `Drop`, donc sans blocage : la notification de départ
    /// est en meilleur effort si un tampon est saturé.
    fn remove(&self, id: Uuid) {
        let departed = {
            let mut subscribers = self.subscribers.lock().unwrap();
            let Some(pos) = subscribers.iter().position(|s| s.id == id) else {
                return;
            };
            let sub = subscribers.remove(pos);
            debug!(viewer = %sub.viewer.name, count = subscribers.len(), "viewer unsubscribed");

            if subscribers.iter().any(|s| s.viewer.id == sub.viewer.id) {
                return;
            }
            sub.viewer
        };

        let subscribers = self.subscribers.lock().unwrap();
        for sub in subscribers.iter() {
            if sub
                .tx
                .try_send(QueueEvent::PresenceLeft(departed.clone()))
                .is_err()
            {
                warn!(viewer = %sub.viewer.name, "subscriber buffer full, presence event dropped");
            }
        }
    }

    async fn broadcast_except(&self, skip: Uuid, event: QueueEvent) {
        let targets: Vec<(Uuid, mpsc::Sender<QueueEvent>)> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers
                .iter()
                .filter(|s| s.id != skip)
                .map(|s| (s.id, s.tx.clone()))
                .collect()
        };

        let mut gone = Vec::new();
        for (id, tx) in targets {
            // Tampon plein : on attend, la contre-pression remonte à
            // l'émetteur de la mutation
            if tx.send(event.clone()).await.is_err() {
                gone.push(id);
            }
        }

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap();
            subscribers.retain(|s| !gone.contains(&s.id));
        }
    }
}

/// Diffuseur d'évènements, à enregistrer comme sink de la file
pub struct Broadcaster {
    buffer: usize,
    registry: Arc<Registry>,
}

/// Abonnement actif d'un observateur
///
/// Détruire l'abonnement désinscrit l'observateur et, pour la dernière
/// connexion d'une identité, notifie son départ aux abonnés restants.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<QueueEvent>,
    registry: Arc<Registry>,
}

impl Subscription {
    /// Prochain évènement, `None` une fois le diffuseur disparu
    pub async fn recv(&mut self) -> Option<QueueEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

impl Broadcaster {
    /// Crée un diffuseur dont chaque abonné a un tampon de `buffer`
    /// évènements (au moins 1, pour loger l'instantané initial)
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer: buffer.max(1),
            registry: Arc::new(Registry {
                subscribers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Abonne un observateur avec le protocole instantané-puis-flux
    ///
    /// L'instantané de la file est le premier évènement reçu par
    /// l'abonnement ; tout évènement ultérieur porte une mutation
    /// strictement postérieure à l'instantané. La première connexion d'une
    /// identité (et elle seule) est annoncée par un `PresenceJoined`.
    pub async fn subscribe(&self, queue: &Queue, viewer: Viewer) -> Result<Subscription> {
        let (items, guard) = queue.snapshot().await?;

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);

        // Inscription sous le verrou partagé de la file : aucune mutation
        // ne peut être ni perdue ni dupliquée vis-à-vis de l'instantané
        let first_of_identity = {
            let mut subscribers = self.registry.subscribers.lock().unwrap();
            let already_present = subscribers.iter().any(|s| s.viewer.id == viewer.id);
            subscribers.push(Subscriber {
                id,
                viewer: viewer.clone(),
                tx: tx.clone(),
            });
            debug!(viewer = %viewer.name, count = subscribers.len(), "viewer subscribed");
            !already_present
        };

        // Le canal vient d'être créé, l'instantané y tient toujours
        let _ = tx.try_send(QueueEvent::Snapshot(items));

        if first_of_identity {
            self.registry
                .broadcast_except(id, QueueEvent::PresenceJoined(viewer))
                .await;
        }

        drop(guard);

        Ok(Subscription {
            id,
            rx,
            registry: self.registry.clone(),
        })
    }

    /// Nombre d'identités actuellement connectées (les connexions
    /// multiples d'une même identité comptent pour une)
    pub fn presence(&self) -> usize {
        self.connected().len()
    }

    /// Identités actuellement connectées, dédupliquées
    pub fn connected(&self) -> Vec<Viewer> {
        let subscribers = self.registry.subscribers.lock().unwrap();
        let mut viewers: Vec<Viewer> = Vec::new();
        for sub in subscribers.iter() {
            if !viewers.iter().any(|v| v.id == sub.viewer.id) {
                viewers.push(sub.viewer.clone());
            }
        }
        viewers
    }
}

#[async_trait]
impl EventSink for Broadcaster {
    async fn publish(&self, event: QueueEvent) {
        self.registry.broadcast_except(Uuid::nil(), event).await;
    }
}
