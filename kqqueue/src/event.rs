//! Évènements de mutation de la file

use crate::item::QueueItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identité d'un observateur connecté (pour le comptage de présence)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewer {
    pub id: String,
    pub name: String,
}

/// Évènement diffusé aux observateurs
///
/// `Snapshot` n'est émis qu'à l'abonnement ; les autres variantes sont
/// incrémentales.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    Snapshot(Vec<QueueItem>),
    ItemAppended(QueueItem),
    ItemRemoved { id: i64 },
    PresenceJoined(Viewer),
    PresenceLeft(Viewer),
}

/// Récepteur d'évènements de la file
///
/// `publish` est appelé pendant que le verrou exclusif de la file est
/// détenu : l'ordre des évènements correspond à l'ordre des mutations.
/// Une implémentation ne doit jamais rappeler la file depuis `publish`.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: QueueEvent);
}
