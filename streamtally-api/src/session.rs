use std::sync::Arc;

use streamtally_core::query::{QueryHandle, QueryManager};
use streamtally_core::sink::ResultTable;
use streamtally_core::QueryResult;

use crate::stream::StreamReader;

/// The entry point for building streaming queries.
///
/// A session owns its own [`QueryManager`]; queries and memory tables started
/// through one session are invisible to every other session. Dropping the
/// session stops its queries.
pub struct StreamingSession {
    name: String,
    pub(crate) manager: Arc<QueryManager>,
}

impl StreamingSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manager: Arc::new(QueryManager::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Begin describing a streaming input.
    pub fn read_stream(&self) -> StreamReader<'_> {
        StreamReader::new(self)
    }

    /// The latest published contents of the memory table `name`.
    pub fn table(&self, name: &str) -> QueryResult<Arc<ResultTable>> {
        self.manager.table(name)
    }

    /// Queries that are still running.
    pub fn active(&self) -> Vec<QueryHandle> {
        self.manager.active()
    }

    /// The underlying manager, for serving the admin endpoint.
    pub fn manager(&self) -> Arc<QueryManager> {
        Arc::clone(&self.manager)
    }

    pub fn stop_all(&self) {
        self.manager.stop_all();
    }

    /// Forget stopped and failed queries; see [`QueryManager::remove_terminated`].
    pub fn reset_terminated(&self) -> usize {
        self.manager.remove_terminated()
    }
}
