//! Types d'erreurs pour kqqueue

/// Erreurs de la file d'attente
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Quota atteint pour un demandeur non privilégié. Résultat attendu,
    /// pas une panne.
    #[error("Queue limit reached for requester")]
    QuotaExceeded,

    #[error("No active queue item with id {0}")]
    NotFound(i64),

    #[error("Operation reserved to admin requesters")]
    NotAdmin,

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Type Result spécialisé pour kqqueue
pub type Result<T> = std::result::Result<T, Error>;
