//! Types de données de la file d'attente

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identité du demandeur, fournie par la couche d'authentification externe
///
/// Le cœur fait confiance à ces champs sans les revalider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: String,
    pub name: String,
    /// Les demandeurs privilégiés ne sont pas soumis au quota
    pub admin: bool,
}

/// Demande à insérer (champs fournis par l'appelant, identité et position
/// assignées par la file)
#[derive(Debug, Clone)]
pub struct NewItem {
    pub requester: Requester,
    pub title: String,
    pub url: String,
    pub lyrics_url: Option<String>,
    pub duration: Duration,
}

/// Entrée de la file
///
/// Une entrée n'est jamais supprimée du journal persistant : elle est
/// seulement exclue de la vue active une fois révoquée ou consommée.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub requester: Requester,
    pub title: String,
    pub url: String,
    pub lyrics_url: Option<String>,
    pub duration: Duration,
    /// Position 1-based parmi les entrées actives (dense, ascendante)
    pub position: u32,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub dequeued_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Une entrée est active tant qu'elle n'est ni révoquée ni consommée
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none() && self.dequeued_at.is_none()
    }
}
