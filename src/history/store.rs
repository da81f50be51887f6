use anyhow::{Context, Result};
use log::warn;
use rusqlite::Connection;

use crate::db::{
    prefs::{get_value, put_value},
    Database, HISTORY_NAMESPACE,
};

use super::model::{CompletedFast, HistorySummary};

const KEY_FASTS: &str = "fasts";

/// Log of finished fasts, kept as one serialized collection.
///
/// Every mutation is a read-modify-write of the whole collection inside a
/// single write transaction.
#[derive(Clone)]
pub struct HistoryStore {
    db: Database,
}

impl HistoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, fast: CompletedFast) -> Result<()> {
        self.mutate(move |fasts| {
            fasts.push(fast);
        })
        .await
    }

    /// Stored order. Use [`HistoryStore::all_by_end_desc`] for display.
    pub async fn all(&self) -> Result<Vec<CompletedFast>> {
        self.db.execute(|conn| load_fasts(conn)).await
    }

    pub async fn all_by_end_desc(&self) -> Result<Vec<CompletedFast>> {
        let mut fasts = self.all().await?;
        fasts.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        Ok(fasts)
    }

    pub async fn by_id(&self, id: &str) -> Result<Option<CompletedFast>> {
        let id = id.to_string();
        let fasts = self.all().await?;
        Ok(fasts.into_iter().find(|fast| fast.id == id))
    }

    /// Replaces the fast with the same id. No-op when the id is absent.
    pub async fn update(&self, fast: CompletedFast) -> Result<()> {
        self.mutate(move |fasts| {
            if let Some(existing) = fasts.iter_mut().find(|existing| existing.id == fast.id) {
                *existing = fast;
            }
        })
        .await
    }

    /// Sets or clears the note of a stored fast. Returns whether it existed.
    pub async fn update_note(&self, id: &str, note: Option<String>) -> Result<bool> {
        let id = id.to_string();
        let note = note.filter(|text| !text.trim().is_empty());
        self.db
            .transact(move |tx| {
                let mut fasts = load_fasts(tx)?;
                let Some(fast) = fasts.iter_mut().find(|fast| fast.id == id) else {
                    return Ok(false);
                };
                fast.note = note;
                store_fasts(tx, &fasts)?;
                Ok(true)
            })
            .await
    }

    /// No-op when the id is absent.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.mutate(move |fasts| fasts.retain(|fast| fast.id != id))
            .await
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.mutate(|fasts| fasts.clear()).await
    }

    pub async fn summary(&self) -> Result<HistorySummary> {
        let fasts = self.all().await?;
        Ok(HistorySummary::from_fasts(&fasts))
    }

    async fn mutate<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<CompletedFast>) + Send + 'static,
    {
        self.db
            .transact(move |tx| {
                let mut fasts = load_fasts(tx)?;
                update(&mut fasts);
                store_fasts(tx, &fasts)
            })
            .await
    }
}

/// A collection that fails to decode is treated as empty.
fn load_fasts(conn: &Connection) -> Result<Vec<CompletedFast>> {
    let Some(raw) = get_value(conn, HISTORY_NAMESPACE, KEY_FASTS)? else {
        return Ok(Vec::new());
    };

    match serde_json::from_str(&raw) {
        Ok(fasts) => Ok(fasts),
        Err(err) => {
            warn!("Discarding malformed fasting history ({} bytes): {err}", raw.len());
            Ok(Vec::new())
        }
    }
}

fn store_fasts(conn: &Connection, fasts: &[CompletedFast]) -> Result<()> {
    let serialized =
        serde_json::to_string(fasts).context("failed to serialize fasting history")?;
    put_value(conn, HISTORY_NAMESPACE, KEY_FASTS, &serialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fasting::FastingState;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> HistoryStore {
        let db = Database::new(dir.path().join("history.sqlite3")).unwrap();
        HistoryStore::new(db)
    }

    fn fast(start: i64, end: i64) -> CompletedFast {
        CompletedFast::new(start, end, FastingState::EarlyFast)
    }

    #[tokio::test]
    async fn delete_all_then_save_leaves_one() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for i in 0..3 {
            store.save(fast(i, i + 100)).await.unwrap();
        }
        assert_eq!(store.all().await.unwrap().len(), 3);

        store.delete_all().await.unwrap();
        assert!(store.all().await.unwrap().is_empty());

        store.save(fast(0, 1)).await.unwrap();
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lookup_update_and_delete_by_id() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = fast(0, 10);
        let second = fast(20, 30);
        store.save(first.clone()).await.unwrap();
        store.save(second.clone()).await.unwrap();

        assert_eq!(store.by_id(&first.id).await.unwrap(), Some(first.clone()));
        assert_eq!(store.by_id("missing").await.unwrap(), None);

        let mut edited = second.clone();
        edited.note = Some("felt great".into());
        store.update(edited.clone()).await.unwrap();
        assert_eq!(store.by_id(&second.id).await.unwrap(), Some(edited));

        // Unknown ids are ignored.
        store.update(fast(1, 2)).await.unwrap();
        store.delete("missing").await.unwrap();
        assert_eq!(store.all().await.unwrap().len(), 2);

        store.delete(&first.id).await.unwrap();
        let remaining = store.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
    }

    #[tokio::test]
    async fn update_note_only_touches_note() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let original = fast(0, 500);
        store.save(original.clone()).await.unwrap();

        assert!(store
            .update_note(&original.id, Some("broke it with coffee".into()))
            .await
            .unwrap());
        let stored = store.by_id(&original.id).await.unwrap().unwrap();
        assert_eq!(stored.note.as_deref(), Some("broke it with coffee"));
        assert_eq!(stored.duration, original.duration);

        assert!(store.update_note(&original.id, Some("  ".into())).await.unwrap());
        assert_eq!(store.by_id(&original.id).await.unwrap().unwrap().note, None);

        assert!(!store.update_note("missing", None).await.unwrap());
    }

    #[tokio::test]
    async fn display_order_is_end_time_descending() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(fast(0, 200)).await.unwrap();
        store.save(fast(0, 900)).await.unwrap();
        store.save(fast(0, 500)).await.unwrap();

        let ends: Vec<i64> = store
            .all_by_end_desc()
            .await
            .unwrap()
            .iter()
            .map(|fast| fast.end_time)
            .collect();
        assert_eq!(ends, vec![900, 500, 200]);
    }

    #[tokio::test]
    async fn malformed_collection_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .db
            .execute(|conn| put_value(conn, HISTORY_NAMESPACE, KEY_FASTS, "{not json"))
            .await
            .unwrap();

        assert!(store.all().await.unwrap().is_empty());

        store.save(fast(0, 1)).await.unwrap();
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn summary_reflects_saved_fasts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(fast(0, 100)).await.unwrap();
        store.save(fast(0, 300)).await.unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total_fasts, 2);
        assert_eq!(summary.longest_duration_ms, 300);
    }
}
