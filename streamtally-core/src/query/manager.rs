use super::scheduler::{Recovery, Scheduler};
use super::*;

/// Optional runtime overrides for [`QueryManager::start_with`].
#[derive(Default, Clone)]
pub struct QueryRuntime {
    sink: Option<Arc<dyn Sink>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl QueryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write to `sink` instead of the sink named in the configuration.
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Checkpoint into `store` instead of the configured location.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }
}

#[derive(Default)]
struct Registry {
    queries: BTreeMap<QueryId, QueryHandle>,
    tables: BTreeMap<String, MemorySink>,
}

/// Starts queries and keeps track of them.
///
/// The manager is an ordinary value: every session owns its own, and nothing
/// about a query is global.
#[derive(Default)]
pub struct QueryManager {
    registry: Mutex<Registry>,
}

impl QueryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `config` and start its scheduler over `source`.
    pub fn start(&self, config: QueryConfig, source: Arc<dyn Source>) -> QueryResult<QueryHandle> {
        self.start_with(config, source, QueryRuntime::default())
    }

    pub fn start_with(
        &self,
        config: QueryConfig,
        source: Arc<dyn Source>,
        runtime: QueryRuntime,
    ) -> QueryResult<QueryHandle> {
        let plan = config.compile()?;

        // Hold the registry for the whole start so two queries cannot race
        // for the same name or table.
        let mut registry = self.registry();
        if let Some(name) = &config.name {
            if registry
                .queries
                .values()
                .any(|q| q.is_active() && q.name() == Some(name.as_str()))
            {
                return Err(QueryError::config(format!(
                    "a query named '{name}' is already active"
                )));
            }
        }

        let mut table = None;
        let sink: Arc<dyn Sink> = match (runtime.sink, &config.sink) {
            (Some(sink), _) => sink,
            (None, SinkTarget::Memory { table: name }) => {
                let writer_active = registry.queries.values().any(|q| {
                    q.is_active() && q.table_name() == Some(name.as_str())
                });
                if writer_active {
                    return Err(QueryError::config(format!(
                        "memory table '{name}' is already written by an active query"
                    )));
                }
                let sink = MemorySink::new(name.clone());
                table = Some(sink.clone());
                Arc::new(sink)
            }
            (None, SinkTarget::Console) => Arc::new(ConsoleSink::new()),
        };
        if !sink.supports(config.output_mode) {
            return Err(QueryError::config(format!(
                "sink {} does not support {} output",
                sink.describe(),
                config.output_mode
            )));
        }

        let checkpoints: Option<Arc<dyn CheckpointStore>> = match (
            runtime.checkpoint_store,
            &config.checkpoint_location,
        ) {
            (Some(store), _) => Some(store),
            (None, Some(path)) => Some(Arc::new(
                FsCheckpointStore::new(path).map_err(QueryError::from_checkpoint)?,
            )),
            (None, None) => None,
        };

        let mut store = StateStore::new(plan.kind);
        let mut recovery = None;
        if let Some(checkpoints) = &checkpoints {
            if let Some(checkpoint) = checkpoints.latest().map_err(QueryError::from_checkpoint)? {
                tracing::info!(
                    name = ?config.name,
                    batch_id = checkpoint.batch_id,
                    state_rows = checkpoint.state.len(),
                    "restoring query from checkpoint"
                );
                store.restore(checkpoint.state)?;
                recovery = Some(Recovery {
                    cursor: checkpoint.cursor,
                    watermark: checkpoint.watermark,
                    finalized_through: checkpoint.finalized_through,
                });
            }
        }

        let id = QueryId::new();
        let cursor = recovery
            .as_ref()
            .map(|r| r.cursor.clone())
            .unwrap_or_default();
        let shared = Arc::new(QueryShared::new(id, config.name.clone(), store, cursor));
        if let Some(recovery) = &recovery {
            let watermark = recovery.watermark.watermark;
            shared.update(|p| {
                p.status.watermark = (watermark != crate::types::EVENT_TIME_MIN).then_some(watermark);
            });
        }

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let scheduler = Scheduler::new(
            Arc::clone(&shared),
            Arc::clone(&source),
            sink,
            plan,
            control_rx,
            checkpoints,
            recovery,
        );
        let thread = std::thread::Builder::new()
            .name(format!("query-{}", config.name.as_deref().unwrap_or("anon")))
            .spawn(move || scheduler.run())
            .map_err(|e| QueryError::config(format!("failed to spawn scheduler thread: {e}")))?;

        let handle = QueryHandle::new(shared, control_tx, source, table.clone(), thread);
        if let Some(table) = table {
            registry.tables.insert(table.name().to_string(), table);
        }
        registry.queries.insert(id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, id: QueryId) -> Option<QueryHandle> {
        self.registry().queries.get(&id).cloned()
    }

    /// Look a query up by id or, failing that, by name, preferring an active one.
    pub fn find(&self, id_or_name: &str) -> Option<QueryHandle> {
        let registry = self.registry();
        if let Ok(id) = id_or_name.parse::<QueryId>() {
            if let Some(handle) = registry.queries.get(&id) {
                return Some(handle.clone());
            }
        }
        registry
            .queries
            .values()
            .filter(|q| q.name() == Some(id_or_name))
            .max_by_key(|q| q.is_active())
            .cloned()
    }

    /// Every query started by this manager, running or not.
    pub fn queries(&self) -> Vec<QueryHandle> {
        self.registry().queries.values().cloned().collect()
    }

    pub fn active(&self) -> Vec<QueryHandle> {
        self.registry()
            .queries
            .values()
            .filter(|q| q.is_active())
            .cloned()
            .collect()
    }

    /// The current contents of memory table `name`, also after its query stopped.
    pub fn table(&self, name: &str) -> QueryResult<Arc<ResultTable>> {
        self.registry()
            .tables
            .get(name)
            .map(MemorySink::table)
            .ok_or_else(|| QueryError::NotFound(format!("table '{name}'")))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.registry().tables.keys().cloned().collect()
    }

    /// Forget every stopped or failed query and return how many were removed.
    ///
    /// Memory tables stay readable; handles held elsewhere keep working.
    pub fn remove_terminated(&self) -> usize {
        let mut registry = self.registry();
        let before = registry.queries.len();
        registry.queries.retain(|_, q| q.is_active());
        let removed = before - registry.queries.len();
        if removed > 0 {
            tracing::debug!(removed, "removed terminated queries");
        }
        removed
    }

    /// Stop every active query and wait for all of them.
    pub fn stop_all(&self) {
        for handle in self.active() {
            handle.stop();
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for QueryManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
