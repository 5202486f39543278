//! File d'attente ordonnée avec contrôle d'admission
//!
//! Toutes les mutations passent par un verrou exclusif unique : le contrôle
//! de quota et l'insertion sont atomiques, et les évènements sont émis dans
//! l'ordre des mutations, verrou tenu. Le consommateur unique bloque sur
//! [`Queue::shift`] tant que la file est vide.

use crate::event::{EventSink, QueueEvent};
use crate::item::{NewItem, QueueItem, Requester};
use crate::persistence::QueueStore;
use crate::{Error, Result};
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::{Notify, OwnedRwLockReadGuard, RwLock};
use tracing::debug;

/// File d'attente partagée
pub struct Queue {
    store: Arc<dyn QueueStore>,
    user_limit: usize,
    /// Verrou sérialisant mutations et snapshots (le store lui-même n'est
    /// appelé que sous ce verrou)
    lock: Arc<RwLock<()>>,
    notify: Notify,
    sinks: StdRwLock<Vec<Arc<dyn EventSink>>>,
}

/// Jeton de lecture retourné par [`Queue::snapshot`]
///
/// Les mutations de la file sont exclues tant que ce jeton est vivant :
/// l'appelant peut s'enregistrer auprès du diffuseur avant de le relâcher,
/// sans risquer de perdre ou dupliquer un évènement.
pub struct QueueReadGuard {
    _guard: OwnedRwLockReadGuard<()>,
}

impl Queue {
    /// Crée une file au-dessus d'un stockage
    ///
    /// `user_limit` est le nombre maximal d'entrées actives simultanées pour
    /// un demandeur non privilégié.
    pub fn new(store: Arc<dyn QueueStore>, user_limit: usize) -> Self {
        Self {
            store,
            user_limit,
            lock: Arc::new(RwLock::new(())),
            notify: Notify::new(),
            sinks: StdRwLock::new(Vec::new()),
        }
    }

    /// Enregistre un récepteur d'évènements
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().unwrap().push(sink);
    }

    async fn emit(&self, event: QueueEvent) {
        let sinks: Vec<_> = self.sinks.read().unwrap().clone();
        for sink in sinks {
            sink.publish(event.clone()).await;
        }
    }

    /// Ajoute une demande en queue de file
    ///
    /// Le contrôle de quota et l'insertion sont atomiques sous le verrou
    /// exclusif. `Error::QuotaExceeded` est un résultat attendu pour un
    /// demandeur non privilégié ayant déjà `user_limit` entrées actives.
    pub async fn push(&self, new: NewItem) -> Result<QueueItem> {
        let _guard = self.lock.write().await;

        if !new.requester.admin {
            let count = self.store.count_active_for(&new.requester.id)?;
            if count as usize >= self.user_limit {
                debug!(requester = %new.requester.id, "queue limit reached");
                return Err(Error::QuotaExceeded);
            }
        }

        let item = self.store.insert_active(&new)?;
        debug!(id = item.id, position = item.position, title = %item.title, "queued");

        self.emit(QueueEvent::ItemAppended(item.clone())).await;
        self.notify.notify_one();
        Ok(item)
    }

    /// Retire et retourne la tête de file, en bloquant tant qu'elle est vide
    ///
    /// Les positions des entrées restantes sont décrémentées atomiquement ;
    /// l'évènement de retrait est émis avant le retour.
    pub async fn shift(&self) -> Result<QueueItem> {
        loop {
            // Armer la notification avant de regarder la file : un push entre
            // le relâchement du verrou et l'attente reste visible.
            let notified = self.notify.notified();
            {
                let _guard = self.lock.write().await;
                if let Some(item) = self.store.shift_head()? {
                    debug!(id = item.id, title = %item.title, "dequeued");
                    self.emit(QueueEvent::ItemRemoved { id: item.id }).await;
                    return Ok(item);
                }
            }
            notified.await;
        }
    }

    /// Révoque une entrée active
    ///
    /// Retourne `false` si l'id est inconnu ou déjà inactif : rien à faire,
    /// mais pas un succès silencieux non plus.
    pub async fn revoke(&self, id: i64) -> Result<bool> {
        let _guard = self.lock.write().await;
        match self.store.revoke(id)? {
            Some(item) => {
                debug!(id = item.id, "revoked");
                self.emit(QueueEvent::ItemRemoved { id: item.id }).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Réordonne une entrée (opération administrative)
    ///
    /// Les entrées intermédiaires sont décalées pour préserver la densité
    /// des positions. Aucun évènement dédié : les observateurs se
    /// resynchronisent par snapshot.
    pub async fn move_item(
        &self,
        requester: &Requester,
        id: i64,
        new_position: u32,
    ) -> Result<QueueItem> {
        if !requester.admin {
            return Err(Error::NotAdmin);
        }
        let _guard = self.lock.write().await;
        self.store.move_to(id, new_position)
    }

    /// Vue ordonnée des entrées actives (aucun verrou conservé au retour)
    pub async fn list(&self) -> Result<Vec<QueueItem>> {
        let _guard = self.lock.read().await;
        self.store.list_active()
    }

    /// Copie des entrées actives, verrou de lecture conservé
    ///
    /// Le verrou n'est relâché qu'au drop du [`QueueReadGuard`] retourné :
    /// c'est le mécanisme snapshot-puis-abonnement du diffuseur.
    pub async fn snapshot(&self) -> Result<(Vec<QueueItem>, QueueReadGuard)> {
        let guard = self.lock.clone().read_owned().await;
        let items = self.store.list_active()?;
        Ok((items, QueueReadGuard { _guard: guard }))
    }

    /// Dernière entrée consommée ("now playing")
    pub async fn last_dequeued(&self) -> Result<Option<QueueItem>> {
        let _guard = self.lock.read().await;
        self.store.last_dequeued()
    }
}
