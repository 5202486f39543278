//! Types d'erreurs pour kqcache

/// Erreurs du cache média
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Téléchargement interrompu à la demande de l'appelant. L'entrée est
    /// retirée du cache, jamais marquée en échec.
    #[error("Download cancelled")]
    Cancelled,

    /// Échec du collaborateur de récupération (distinct d'une annulation)
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Type Result spécialisé pour kqcache
pub type Result<T> = std::result::Result<T, Error>;
