//! # kqqueue - File d'attente ordonnée de demandes avec contrôle d'admission
//!
//! Cette crate fournit le magasin ordonné des demandes en attente :
//! - Positions denses 1-based parmi les entrées actives
//! - Quota par demandeur, contrôle et insertion atomiques
//! - Consommateur unique bloquant sur [`Queue::shift`]
//! - Journal persistant SQLite (les entrées ne sont jamais supprimées)
//! - Émission d'évènements sous le verrou de mutation, et protocole
//!   snapshot-puis-abonnement via [`Queue::snapshot`]
//!
//! # Exemple d'utilisation
//!
//! ```no_run
//! use kqqueue::{NewItem, Queue, Requester, SqliteStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> kqqueue::Result<()> {
//! let store = Arc::new(SqliteStore::open(std::path::Path::new("queue.sqlite"))?);
//! let queue = Arc::new(Queue::new(store, 1));
//!
//! let item = queue
//!     .push(NewItem {
//!         requester: Requester {
//!             id: "u1".into(),
//!             name: "Alice".into(),
//!             admin: false,
//!         },
//!         title: "Some song".into(),
//!         url: "https://example.com/v".into(),
//!         lyrics_url: None,
//!         duration: Duration::from_secs(240),
//!     })
//!     .await?;
//! assert_eq!(item.position, 1);
//!
//! let head = queue.shift().await?;
//! assert_eq!(head.id, item.id);
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod item;
mod persistence;
mod queue;

// Réexports publics
pub use error::{Error, Result};
pub use event::{EventSink, QueueEvent, Viewer};
pub use item::{NewItem, QueueItem, Requester};
pub use persistence::{QueueStore, SqliteStore};
pub use queue::{Queue, QueueReadGuard};
