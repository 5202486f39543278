//! # Cache de téléchargement single-flight
//!
//! Cette crate matérialise localement des médias distants, avec au plus un
//! téléchargement en vol par URL. Le contrat [`OnceCache`] sépare
//! l'intention (mettre en cache) de la consommation (obtenir le chemin de
//! l'artefact, ou annuler le transfert en cours) :
//!
//! * [`OnceCache::cache`] enregistre une URL et planifie son
//!   téléchargement, idempotent tant que l'entrée est suivie ;
//! * [`OnceCache::get_or_cancel`] retourne le chemin d'un artefact complet,
//!   ou annule le transfert en cours et laisse l'appelant lire la source en
//!   direct ;
//! * [`OnceCache::clear`] oublie l'entrée et supprime l'artefact.
//!
//! [`MediaCache`] est l'implémentation sur disque ; [`NullCache`] désactive
//! le cache sans changer le code appelant. L'accès au média distant passe
//! par le contrat [`Fetcher`], dont [`YtDlpFetcher`] est l'implémentation
//! de production.

mod cache;
mod error;
mod fetcher;

pub use cache::{CacheStatus, MediaCache};
pub use error::{Error, Result};
pub use fetcher::{Fetcher, MediaInfo, MediaStream, YtDlpFetcher};

use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Contrat d'un cache à matérialisation unique
///
/// Toutes les implémentations garantissent qu'une URL donnée n'a jamais
/// plus d'un téléchargement en vol.
#[async_trait]
pub trait OnceCache: Send + Sync {
    /// Enregistre une URL et planifie son téléchargement
    ///
    /// Sans effet si l'URL est déjà suivie, quel que soit son état. Le
    /// token fourni devient le parent du token de l'entrée : son
    /// annulation annule le téléchargement. Peut bloquer si la file de
    /// jobs est pleine.
    async fn cache(&self, parent: &CancellationToken, url: &str);

    /// Chemin de l'artefact complet, ou annulation du transfert en cours
    ///
    /// Retourne `None` pour une URL inconnue ou dont le téléchargement
    /// n'est pas terminé ; dans ce dernier cas le transfert est annulé et
    /// l'appelant est censé lire la source directement.
    async fn get_or_cancel(&self, url: &str) -> Option<PathBuf>;

    /// Oublie l'entrée et supprime l'artefact éventuel
    ///
    /// Annule tout transfert en vol. L'absence d'artefact n'est pas une
    /// erreur.
    async fn clear(&self, url: &str) -> Result<()>;
}

/// Implémentation inerte, pour fonctionner sans cache
///
/// `get_or_cancel` retourne toujours `None` : l'appelant lit la source en
/// direct.
pub struct NullCache;

#[async_trait]
impl OnceCache for NullCache {
    async fn cache(&self, _parent: &CancellationToken, _url: &str) {}

    async fn get_or_cancel(&self, _url: &str) -> Option<PathBuf> {
        None
    }

    async fn clear(&self, _url: &str) -> Result<()> {
        Ok(())
    }
}
