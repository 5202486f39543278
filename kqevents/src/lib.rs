//! # Diffusion d'évènements aux observateurs
//!
//! Cette crate relie la file de demandes à ses observateurs. Le
//! [`Broadcaster`] s'enregistre comme sink d'évènements de la file et
//! retransmet chaque mutation à tous les abonnés, chacun derrière un
//! canal borné sans perte. L'abonnement suit le protocole
//! instantané-puis-flux : l'état complet d'abord, puis uniquement des
//! mutations postérieures.
//!
//! Avec la feature `server`, le module [`sse`] expose le flux en
//! Server-Sent Events via axum.

mod broadcaster;
#[cfg(feature = "server")]
pub mod sse;

pub use broadcaster::{Broadcaster, Subscription};
