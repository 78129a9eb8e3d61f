//! Resume positions per (source, stream).
//!
//! Durable mode writes through [`Storage::compare_and_set_cursor`]. Ephemeral
//! mode reads the durable value once and keeps advances in memory; dry runs
//! use it so they never move a persisted cursor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use pulsecheck_core::{Cursor, Source, Storage};

use crate::error::PipelineError;

const MAX_CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    Durable,
    Ephemeral,
}

pub struct CursorStore {
    storage: Arc<dyn Storage>,
    mode: CursorMode,
    overlay: Mutex<HashMap<(Source, String), Cursor>>,
}

impl CursorStore {
    #[must_use]
    pub fn durable(storage: Arc<dyn Storage>) -> Self {
        Self::new(storage, CursorMode::Durable)
    }

    #[must_use]
    pub fn ephemeral(storage: Arc<dyn Storage>) -> Self {
        Self::new(storage, CursorMode::Ephemeral)
    }

    fn new(storage: Arc<dyn Storage>, mode: CursorMode) -> Self {
        Self {
            storage,
            mode,
            overlay: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    fn overlay_get(&self, source: Source, stream_id: &str) -> Option<Cursor> {
        self.overlay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(source, stream_id.to_owned()))
            .cloned()
    }

    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if the backend read fails.
    pub async fn get(
        &self,
        source: Source,
        stream_id: &str,
    ) -> Result<Option<Cursor>, PipelineError> {
        if self.mode == CursorMode::Ephemeral {
            if let Some(cursor) = self.overlay_get(source, stream_id) {
                return Ok(Some(cursor));
            }
        }
        Ok(self.storage.get_cursor(source, stream_id).await?)
    }

    /// Move the cursor for (`source`, `stream_id`) to `new`.
    ///
    /// `new` must dominate the stored value; re-storing an equal value is a
    /// no-op. A concurrent advance between read and write is re-checked
    /// against the fresh value.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StaleCursor`] (leaving the stored value
    /// unchanged) if `new` does not dominate it, or
    /// [`PipelineError::Storage`] on backend failure.
    pub async fn advance(
        &self,
        source: Source,
        stream_id: &str,
        new: &Cursor,
    ) -> Result<(), PipelineError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(source, stream_id).await?;
            if let Some(current) = &current {
                if !new.dominates(current) {
                    return Err(PipelineError::StaleCursor {
                        platform: source,
                        stream_id: stream_id.to_owned(),
                        stored: current.to_string(),
                        proposed: new.to_string(),
                    });
                }
                if current == new {
                    return Ok(());
                }
            }

            match self.mode {
                CursorMode::Ephemeral => {
                    let mut overlay = self.overlay.lock().unwrap_or_else(PoisonError::into_inner);
                    let key = (source, stream_id.to_owned());
                    // Another task may have advanced the overlay since `get`.
                    if overlay.get(&key).is_some_and(|c| Some(c) != current.as_ref()) {
                        continue;
                    }
                    overlay.insert(key, new.clone());
                    return Ok(());
                }
                CursorMode::Durable => {
                    if self
                        .storage
                        .compare_and_set_cursor(source, stream_id, current.as_ref(), new)
                        .await?
                    {
                        tracing::debug!(
                            source = %source,
                            stream_id,
                            cursor = %new,
                            "cursor advanced"
                        );
                        return Ok(());
                    }
                    tracing::debug!(
                        source = %source,
                        stream_id,
                        "cursor changed concurrently, re-checking"
                    );
                }
            }
        }

        let stored = self
            .get(source, stream_id)
            .await?
            .map_or_else(|| "none".to_owned(), |c| c.to_string());
        Err(PipelineError::StaleCursor {
            platform: source,
            stream_id: stream_id.to_owned(),
            stored,
            proposed: new.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;

    #[tokio::test]
    async fn advance_from_absent_then_forward() {
        let storage = Arc::new(MemoryStorage::default());
        let store = CursorStore::durable(storage.clone());

        store
            .advance(Source::Discord, "c", &Cursor::HighWatermark { id: 5 })
            .await
            .unwrap();
        store
            .advance(Source::Discord, "c", &Cursor::HighWatermark { id: 9 })
            .await
            .unwrap();

        assert_eq!(
            storage.get_cursor(Source::Discord, "c").await.unwrap(),
            Some(Cursor::HighWatermark { id: 9 })
        );
    }

    #[tokio::test]
    async fn backwards_advance_is_stale_and_leaves_value() {
        let storage = Arc::new(MemoryStorage::default());
        let store = CursorStore::durable(storage.clone());
        store
            .advance(Source::X, "me", &Cursor::HighWatermark { id: 10 })
            .await
            .unwrap();

        let err = store
            .advance(Source::X, "me", &Cursor::HighWatermark { id: 3 })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::StaleCursor { .. }));
        assert_eq!(
            store.get(Source::X, "me").await.unwrap(),
            Some(Cursor::HighWatermark { id: 10 })
        );
    }

    #[tokio::test]
    async fn equal_advance_is_a_no_op() {
        let storage = Arc::new(MemoryStorage::default());
        let store = CursorStore::durable(storage);
        let c = Cursor::HighWatermark { id: 4 };
        store.advance(Source::X, "me", &c).await.unwrap();
        store.advance(Source::X, "me", &c).await.unwrap();
    }

    #[tokio::test]
    async fn ephemeral_advances_never_reach_storage() {
        let storage = Arc::new(MemoryStorage::default());
        CursorStore::durable(storage.clone())
            .advance(Source::Discord, "c", &Cursor::HighWatermark { id: 1 })
            .await
            .unwrap();

        let store = CursorStore::ephemeral(storage.clone());
        store
            .advance(Source::Discord, "c", &Cursor::HighWatermark { id: 50 })
            .await
            .unwrap();

        assert_eq!(
            store.get(Source::Discord, "c").await.unwrap(),
            Some(Cursor::HighWatermark { id: 50 })
        );
        assert_eq!(
            storage.get_cursor(Source::Discord, "c").await.unwrap(),
            Some(Cursor::HighWatermark { id: 1 })
        );
    }

    #[tokio::test]
    async fn mismatched_kind_is_stale() {
        let storage = Arc::new(MemoryStorage::default());
        let store = CursorStore::durable(storage);
        store
            .advance(Source::Bluesky, "h", &Cursor::RecentIds {
                ids: vec!["a".into()],
                seen: 1,
            })
            .await
            .unwrap();

        let err = store
            .advance(Source::Bluesky, "h", &Cursor::HighWatermark { id: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StaleCursor { .. }));
    }
}
