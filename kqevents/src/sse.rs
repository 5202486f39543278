//! Exposition SSE du flux d'évènements
//!
//! Le premier évènement de chaque connexion est l'instantané complet de
//! la file (`queue`), suivi des mutations incrémentales. La fermeture de
//! la connexion désinscrit l'observateur.

use crate::Broadcaster;
use axum::{
    Router,
    extract::{Query, State},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use kqqueue::{Queue, QueueEvent, Viewer};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// État partagé des handlers SSE
#[derive(Clone)]
pub struct EventsState {
    pub queue: Arc<Queue>,
    pub broadcaster: Arc<Broadcaster>,
}

/// Query params pour /events
#[derive(Debug, Deserialize)]
pub struct ViewerQuery {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Nom du message SSE associé à un évènement
pub fn event_name(event: &QueueEvent) -> &'static str {
    match event {
        QueueEvent::Snapshot(_) => "queue",
        QueueEvent::ItemAppended(_) => "append",
        QueueEvent::ItemRemoved { .. } => "remove",
        QueueEvent::PresenceJoined(_) => "presence-join",
        QueueEvent::PresenceLeft(_) => "presence-leave",
    }
}

/// Charge utile du message SSE
///
/// Le nom du message porte déjà le type : la donnée est la charge nue de
/// chaque variante, jamais l'enum étiquetée. Un retrait transporte le
/// seul identifiant, un ajout l'élément, la présence l'identité, et
/// l'instantané la liste ordonnée complète.
pub fn event_payload(event: &QueueEvent) -> serde_json::Result<String> {
    match event {
        QueueEvent::Snapshot(items) => serde_json::to_string(items),
        QueueEvent::ItemAppended(item) => serde_json::to_string(item),
        QueueEvent::ItemRemoved { id } => serde_json::to_string(id),
        QueueEvent::PresenceJoined(viewer) | QueueEvent::PresenceLeft(viewer) => {
            serde_json::to_string(viewer)
        }
    }
}

/// Handler SSE du flux d'évènements de la file
pub async fn queue_events(
    State(state): State<EventsState>,
    Query(params): Query<ViewerQuery>,
) -> impl IntoResponse {
    let viewer = Viewer {
        id: params.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: params.name.unwrap_or_else(|| "anonymous".to_string()),
    };

    let stream = async_stream::stream! {
        let mut subscription = match state.broadcaster.subscribe(&state.queue, viewer).await {
            Ok(s) => s,
            Err(e) => {
                warn!("subscription failed: {}", e);
                return;
            }
        };

        // L'abonnement vit dans le flux : la déconnexion du client le
        // détruit et désinscrit l'observateur
        while let Some(event) = subscription.recv().await {
            let json = match event_payload(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to encode event payload: {}", e);
                    continue;
                }
            };
            yield Ok::<_, axum::Error>(Event::default().event(event_name(&event)).data(json));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Crée le router du flux d'évènements
pub fn create_events_router(state: EventsState) -> Router {
    Router::new().route("/events", get(queue_events)).with_state(state)
}
