use std::sync::Arc;

use super::models::StreamCursor;
use super::store::StatusStore;
use crate::error::AppResult;

/// Per `(provider, stream_key)` stream watermarks
pub struct StreamCursors {
    store: Arc<dyn StatusStore>,
}

impl StreamCursors {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    pub async fn get_cursor(&self, provider: &str, stream_key: &str) -> AppResult<Option<String>> {
        Ok(self
            .store
            .find_cursor(provider, stream_key)
            .await?
            .and_then(|record| record.cursor))
    }

    pub async fn upsert_cursor(
        &self,
        provider: &str,
        stream_key: &str,
        cursor: &str,
    ) -> AppResult<StreamCursor> {
        self.store.upsert_cursor(provider, stream_key, cursor).await
    }
}
