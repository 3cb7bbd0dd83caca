use super::*;

/// Scheduler control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    /// Finish at the next phase boundary and exit.
    Stop,
    /// Run a cycle now instead of waiting for the next tick.
    Trigger,
}

/// Mutable view of a query shared by its scheduler and its handles.
pub(crate) struct Progress {
    pub status: QueryStatus,
    pub cursor: BatchCursor,
    pub recent: VecDeque<QueryProgress>,
    pub error: Option<QueryError>,
}

/// State shared between the scheduler thread and every [`QueryHandle`].
pub(crate) struct QueryShared {
    pub id: QueryId,
    pub name: Option<String>,
    pub store: RwLock<StateStore>,
    progress: Mutex<Progress>,
    changed: Condvar,
}

impl QueryShared {
    pub fn new(id: QueryId, name: Option<String>, store: StateStore, cursor: BatchCursor) -> Self {
        let mut status = QueryStatus::new(id, name.clone());
        status.last_cursor = CursorPosition::from(&cursor);
        Self {
            id,
            name,
            store: RwLock::new(store),
            progress: Mutex::new(Progress {
                status,
                cursor,
                recent: VecDeque::with_capacity(PROGRESS_HISTORY),
                error: None,
            }),
            changed: Condvar::new(),
        }
    }

    // A panic while holding the lock cannot leave these plain values torn.
    pub fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` and wake every waiter.
    pub fn update<R>(&self, f: impl FnOnce(&mut Progress) -> R) -> R {
        let result = f(&mut self.lock());
        self.changed.notify_all();
        result
    }

    /// Block until `done` holds or `timeout` elapses; returns whether it holds.
    pub fn wait_until(
        &self,
        timeout: Option<Duration>,
        mut done: impl FnMut(&Progress) -> bool,
    ) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock();
        loop {
            if done(&guard) {
                return true;
            }
            guard = match deadline {
                None => self
                    .changed
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.changed
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    pub fn store(&self) -> std::sync::RwLockReadGuard<'_, StateStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }
}

struct HandleInner {
    shared: Arc<QueryShared>,
    control: Sender<Control>,
    source: Arc<dyn Source>,
    table: Option<MemorySink>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Control and observation of one running (or finished) query.
///
/// Cloning yields another handle to the same query.
#[derive(Clone)]
pub struct QueryHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("id", &self.inner.shared.id)
            .field("name", &self.inner.shared.name)
            .finish()
    }
}

impl QueryHandle {
    pub(crate) fn new(
        shared: Arc<QueryShared>,
        control: Sender<Control>,
        source: Arc<dyn Source>,
        table: Option<MemorySink>,
        thread: JoinHandle<()>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                shared,
                control,
                source,
                table,
                thread: Mutex::new(Some(thread)),
            }),
        }
    }

    pub fn id(&self) -> QueryId {
        self.inner.shared.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.shared.name.as_deref()
    }

    pub fn status(&self) -> QueryStatus {
        self.inner.shared.lock().status.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.shared.lock().status.is_active()
    }

    /// The error that failed the query, if it failed.
    pub fn error(&self) -> Option<QueryError> {
        self.inner.shared.lock().error.clone()
    }

    pub fn last_progress(&self) -> Option<QueryProgress> {
        self.inner.shared.lock().recent.back().cloned()
    }

    /// Up to the last hundred progress reports, oldest first.
    pub fn recent_progress(&self) -> Vec<QueryProgress> {
        self.inner.shared.lock().recent.iter().cloned().collect()
    }

    /// Consistent copy of the aggregation state.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.shared.store().snapshot()
    }

    pub fn table_name(&self) -> Option<&str> {
        self.inner.table.as_ref().map(MemorySink::name)
    }

    /// The memory table this query writes, if it writes one.
    pub fn table(&self) -> Option<Arc<ResultTable>> {
        self.inner.table.as_ref().map(MemorySink::table)
    }

    /// Ask the scheduler to run a cycle now.
    pub fn trigger(&self) {
        let _ = self.inner.control.send(Control::Trigger);
    }

    /// Stop the query and wait for its scheduler to exit.
    ///
    /// A cycle in its merge or emit phase completes first; the state store
    /// stays readable afterwards. Stopping a finished query is a no-op.
    pub fn stop(&self) {
        let _ = self.inner.control.send(Control::Stop);
        let thread = self
            .inner
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!(query_id = %self.id(), "scheduler thread panicked");
                self.inner.shared.update(|p| {
                    if p.status.is_active() {
                        p.status.state = QueryState::Failed;
                        p.status.phase = CyclePhase::Stopped;
                        p.status.message = "scheduler thread panicked".to_string();
                    }
                });
            }
        }
    }

    /// Wait for the query to stop or fail.
    ///
    /// Returns `Ok(true)` once stopped, `Ok(false)` on timeout, and the
    /// query's error if it failed.
    pub fn await_termination(&self, timeout: Option<Duration>) -> QueryResult<bool> {
        let terminated = self
            .inner
            .shared
            .wait_until(timeout, |p| !p.status.is_active());
        if !terminated {
            return Ok(false);
        }
        match self.error() {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }

    /// Block until every unit the source offers right now has been committed.
    ///
    /// Returns early if the query stops; returns the query's error if it fails.
    pub fn process_all_available(&self) -> QueryResult<()> {
        let shared = &self.inner.shared;
        let (cursor, active) = {
            let progress = shared.lock();
            (progress.cursor.clone(), progress.status.is_active())
        };
        if !active {
            return self.error().map_or(Ok(()), Err);
        }
        let pending = self
            .inner
            .source
            .list_new_units(&cursor, None)
            .map_err(QueryError::from_source)?;
        self.trigger();
        shared.wait_until(None, |p| {
            !p.status.is_active() || pending.iter().all(|unit| p.cursor.contains(unit))
        });
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
