//! Persistance SQLite de la file d'attente
//!
//! Une seule stratégie de stockage : un journal SQLite dont les entrées ne
//! sont jamais supprimées, seulement marquées révoquées ou consommées. Les
//! opérations multi-étapes (shift, revoke, move) sont transactionnelles.

use crate::item::{NewItem, QueueItem, Requester};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ACTIVE: &str = "revoked_at IS NULL AND dequeued_at IS NULL";

/// Interface de stockage de la file
///
/// Les implémentations sont appelées sous le verrou exclusif de la file :
/// elles n'ont pas à sérialiser les appels entre eux, seulement à garantir
/// l'atomicité interne de chaque opération.
pub trait QueueStore: Send + Sync {
    /// Insère une entrée active en queue de file (id et position assignés)
    fn insert_active(&self, item: &NewItem) -> Result<QueueItem>;

    /// Nombre d'entrées actives pour un demandeur
    fn count_active_for(&self, requester_id: &str) -> Result<u32>;

    /// Retire la tête de file : marque consommée et décale les positions
    /// restantes, atomiquement
    fn shift_head(&self) -> Result<Option<QueueItem>>;

    /// Marque une entrée active révoquée et referme le trou de position.
    /// `None` si l'id est inconnu ou déjà inactif.
    fn revoke(&self, id: i64) -> Result<Option<QueueItem>>;

    /// Déplace une entrée active vers une nouvelle position en décalant les
    /// entrées intermédiaires
    fn move_to(&self, id: i64, new_position: u32) -> Result<QueueItem>;

    /// Entrées actives, ordonnées par position
    fn list_active(&self) -> Result<Vec<QueueItem>>;

    /// Dernière entrée consommée par shift
    fn last_dequeued(&self) -> Result<Option<QueueItem>>;
}

/// Stockage SQLite (une base pour toute la file)
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Ouvre (et initialise si besoin) la base
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                requester_id TEXT NOT NULL,
                requester_name TEXT NOT NULL,
                requester_admin INTEGER NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                lyrics_url TEXT,
                duration_secs INTEGER NOT NULL,
                position INTEGER,
                created_at INTEGER NOT NULL,
                revoked_at INTEGER,
                dequeued_at INTEGER
            )",
            [],
        )
        .map_err(|e| Error::Storage(format!("Failed to create items table: {}", e)))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_requester ON items(requester_id)",
            [],
        )
        .map_err(|e| Error::Storage(format!("Failed to create index: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn fetch_active(tx: &Transaction<'_>, id: i64) -> Result<Option<QueueItem>> {
        let mut stmt = tx
            .prepare(&format!(
                "SELECT {} FROM items WHERE id = ?1 AND {}",
                COLUMNS, ACTIVE
            ))
            .map_err(|e| Error::Storage(format!("Failed to prepare statement: {}", e)))?;

        match stmt.query_row(params![id], row_to_item) {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to load item: {}", e))),
        }
    }
}

const COLUMNS: &str = "id, requester_id, requester_name, requester_admin, title, url, \
                       lyrics_url, duration_secs, position, created_at, revoked_at, dequeued_at";

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    let duration_secs: i64 = row.get(7)?;
    let position: Option<i64> = row.get(8)?;
    let created_at: i64 = row.get(9)?;
    let revoked_at: Option<i64> = row.get(10)?;
    let dequeued_at: Option<i64> = row.get(11)?;

    Ok(QueueItem {
        id: row.get(0)?,
        requester: Requester {
            id: row.get(1)?,
            name: row.get(2)?,
            admin: row.get(3)?,
        },
        title: row.get(4)?,
        url: row.get(5)?,
        lyrics_url: row.get(6)?,
        duration: Duration::from_secs(duration_secs as u64),
        position: position.unwrap_or(0) as u32,
        created_at: DateTime::from_timestamp_nanos(created_at),
        revoked_at: revoked_at.map(DateTime::from_timestamp_nanos),
        dequeued_at: dequeued_at.map(DateTime::from_timestamp_nanos),
    })
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

impl QueueStore for SqliteStore {
    fn insert_active(&self, item: &NewItem) -> Result<QueueItem> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to start transaction: {}", e)))?;

        let next_position: i64 = tx
            .query_row(
                &format!(
                    "SELECT COALESCE(MAX(position), 0) + 1 FROM items WHERE {}",
                    ACTIVE
                ),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to compute position: {}", e)))?;

        let created_at = now_nanos();
        tx.execute(
            "INSERT INTO items (requester_id, requester_name, requester_admin, title, url,
                                lyrics_url, duration_secs, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.requester.id,
                item.requester.name,
                item.requester.admin,
                item.title,
                item.url,
                item.lyrics_url,
                item.duration.as_secs() as i64,
                next_position,
                created_at,
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to insert item: {}", e)))?;

        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))?;

        Ok(QueueItem {
            id,
            requester: item.requester.clone(),
            title: item.title.clone(),
            url: item.url.clone(),
            lyrics_url: item.lyrics_url.clone(),
            duration: item.duration,
            position: next_position as u32,
            created_at: DateTime::from_timestamp_nanos(created_at),
            revoked_at: None,
            dequeued_at: None,
        })
    }

    fn count_active_for(&self, requester_id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM items WHERE requester_id = ?1 AND {}",
                    ACTIVE
                ),
                params![requester_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to count items: {}", e)))?;
        Ok(count as u32)
    }

    fn shift_head(&self) -> Result<Option<QueueItem>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to start transaction: {}", e)))?;

        let head = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM items WHERE {} ORDER BY position ASC LIMIT 1",
                    COLUMNS, ACTIVE
                ))
                .map_err(|e| Error::Storage(format!("Failed to prepare statement: {}", e)))?;

            match stmt.query_row([], row_to_item) {
                Ok(item) => item,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(Error::Storage(format!("Failed to load head: {}", e))),
            }
        };

        let dequeued_at = now_nanos();
        tx.execute(
            "UPDATE items SET dequeued_at = ?1, position = NULL WHERE id = ?2",
            params![dequeued_at, head.id],
        )
        .map_err(|e| Error::Storage(format!("Failed to mark dequeued: {}", e)))?;

        tx.execute(
            &format!("UPDATE items SET position = position - 1 WHERE {}", ACTIVE),
            [],
        )
        .map_err(|e| Error::Storage(format!("Failed to shift positions: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))?;

        Ok(Some(QueueItem {
            position: 0,
            dequeued_at: Some(DateTime::from_timestamp_nanos(dequeued_at)),
            ..head
        }))
    }

    fn revoke(&self, id: i64) -> Result<Option<QueueItem>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to start transaction: {}", e)))?;

        let Some(item) = Self::fetch_active(&tx, id)? else {
            return Ok(None);
        };

        let revoked_at = now_nanos();
        tx.execute(
            "UPDATE items SET revoked_at = ?1, position = NULL WHERE id = ?2",
            params![revoked_at, id],
        )
        .map_err(|e| Error::Storage(format!("Failed to mark revoked: {}", e)))?;

        tx.execute(
            &format!(
                "UPDATE items SET position = position - 1 WHERE {} AND position > ?1",
                ACTIVE
            ),
            params![item.position as i64],
        )
        .map_err(|e| Error::Storage(format!("Failed to shift positions: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))?;

        Ok(Some(QueueItem {
            position: 0,
            revoked_at: Some(DateTime::from_timestamp_nanos(revoked_at)),
            ..item
        }))
    }

    fn move_to(&self, id: i64, new_position: u32) -> Result<QueueItem> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to start transaction: {}", e)))?;

        let item = Self::fetch_active(&tx, id)?.ok_or(Error::NotFound(id))?;

        let active_count: i64 = tx
            .query_row(
                &format!("SELECT COUNT(*) FROM items WHERE {}", ACTIVE),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to count items: {}", e)))?;

        // La position cible reste dans [1, nombre d'actifs]
        let new_position = new_position.clamp(1, active_count as u32);
        let old_position = item.position;

        if new_position > old_position {
            tx.execute(
                &format!(
                    "UPDATE items SET position = position - 1
                     WHERE {} AND position > ?1 AND position <= ?2",
                    ACTIVE
                ),
                params![old_position as i64, new_position as i64],
            )
            .map_err(|e| Error::Storage(format!("Failed to shift positions: {}", e)))?;
        } else if new_position < old_position {
            tx.execute(
                &format!(
                    "UPDATE items SET position = position + 1
                     WHERE {} AND position >= ?1 AND position < ?2",
                    ACTIVE
                ),
                params![new_position as i64, old_position as i64],
            )
            .map_err(|e| Error::Storage(format!("Failed to shift positions: {}", e)))?;
        }

        tx.execute(
            "UPDATE items SET position = ?1 WHERE id = ?2",
            params![new_position as i64, id],
        )
        .map_err(|e| Error::Storage(format!("Failed to move item: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))?;

        Ok(QueueItem {
            position: new_position,
            ..item
        })
    }

    fn list_active(&self) -> Result<Vec<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM items WHERE {} ORDER BY position ASC",
                COLUMNS, ACTIVE
            ))
            .map_err(|e| Error::Storage(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map([], row_to_item)
            .map_err(|e| Error::Storage(format!("Failed to query items: {}", e)))?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(|e| Error::Storage(format!("Failed to read item: {}", e)))?);
        }
        Ok(items)
    }

    fn last_dequeued(&self) -> Result<Option<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM items WHERE dequeued_at IS NOT NULL
                 ORDER BY dequeued_at DESC, id DESC LIMIT 1",
                COLUMNS
            ))
            .map_err(|e| Error::Storage(format!("Failed to prepare statement: {}", e)))?;

        match stmt.query_row([], row_to_item) {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to load item: {}", e))),
        }
    }
}
