use super::*;

/// Grouping key plus window: the identity of one result row.
///
/// Ordered by group value, then window start and end, which gives snapshots
/// and result tables a deterministic order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    pub key: String,
    pub window: TimeWindow,
}

impl AggregationKey {
    pub fn new(key: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            key: key.into(),
            window,
        }
    }
}

impl std::fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.key, self.window)
    }
}

/// Point-in-time, ordered copy of a store.
pub type Snapshot = BTreeMap<AggregationKey, Accumulator>;

/// Contributions of one micro-batch, pre-combined per key.
#[derive(Debug, Clone)]
pub struct BatchDelta {
    kind: AggregateKind,
    entries: AHashMap<AggregationKey, Accumulator>,
}

impl BatchDelta {
    pub fn new(kind: AggregateKind) -> Self {
        Self {
            kind,
            entries: AHashMap::new(),
        }
    }

    pub fn add(&mut self, key: AggregationKey, value: Accumulator) -> QueryResult<()> {
        check_kind(self.kind, &value)?;
        match self.entries.get_mut(&key) {
            Some(existing) => *existing = existing.merge(&value)?,
            None => {
                self.entries.insert(key, value);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Post-merge values of every key a batch touches, computed without
/// mutating the store. Applied with [`StateStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct StagedMerge {
    values: BTreeMap<AggregationKey, Accumulator>,
    changed: Vec<AggregationKey>,
}

impl StagedMerge {
    /// Keys whose value differs from the committed one, in key order.
    pub fn changed(&self) -> &[AggregationKey] {
        &self.changed
    }

    /// The staged value for `key`, if the batch touched it.
    pub fn get(&self, key: &AggregationKey) -> Option<&Accumulator> {
        self.values.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = (&AggregationKey, &Accumulator)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Mutable mapping `(key, window) -> accumulator` for a single aggregate kind.
#[derive(Debug, Clone)]
pub struct StateStore {
    kind: AggregateKind,
    entries: AHashMap<AggregationKey, Accumulator>,
}

impl StateStore {
    pub fn new(kind: AggregateKind) -> Self {
        Self {
            kind,
            entries: AHashMap::new(),
        }
    }

    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &AggregationKey) -> Option<&Accumulator> {
        self.entries.get(key)
    }

    /// Combine `delta` into the value stored under `key`.
    pub fn merge(&mut self, key: AggregationKey, delta: Accumulator) -> QueryResult<()> {
        check_kind(self.kind, &delta)?;
        let current = self
            .entries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Accumulator::identity(self.kind));
        let merged = current.merge(&delta)?;
        self.entries.insert(key, merged);
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Evict every key matching `predicate`; returns how many were removed.
    pub fn drop_where(&mut self, mut predicate: impl FnMut(&AggregationKey) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        before - self.entries.len()
    }

    /// Compute the result of merging `delta` without applying it.
    pub fn stage(&self, delta: BatchDelta) -> QueryResult<StagedMerge> {
        if delta.kind != self.kind {
            return Err(QueryError::config(format!(
                "batch of {} contributions staged against a {} store",
                delta.kind, self.kind
            )));
        }
        let mut staged = StagedMerge::default();
        for (key, contribution) in delta.entries {
            let previous = self.entries.get(&key);
            let merged = previous
                .cloned()
                .unwrap_or_else(|| Accumulator::identity(self.kind))
                .merge(&contribution)?;
            if previous != Some(&merged) {
                staged.changed.push(key.clone());
            }
            staged.values.insert(key, merged);
        }
        staged.changed.sort();
        Ok(staged)
    }

    pub fn commit(&mut self, staged: StagedMerge) {
        self.entries.extend(staged.values);
    }

    /// The snapshot the store would have after committing `staged`.
    pub fn preview(&self, staged: &StagedMerge) -> Snapshot {
        let mut snapshot = self.snapshot();
        for (key, value) in staged.values() {
            snapshot.insert(key.clone(), value.clone());
        }
        snapshot
    }

    /// Replace the contents with a previously taken snapshot.
    pub fn restore(&mut self, snapshot: Snapshot) -> QueryResult<()> {
        if let Some(value) = snapshot.values().find(|v| v.kind() != self.kind) {
            return Err(QueryError::config(format!(
                "snapshot holds {} values but the query aggregates with {}",
                value.kind(),
                self.kind
            )));
        }
        self.entries = snapshot.into_iter().collect();
        Ok(())
    }
}

fn check_kind(expected: AggregateKind, value: &Accumulator) -> QueryResult<()> {
    if value.kind() == expected {
        Ok(())
    } else {
        Err(QueryError::config(format!(
            "expected a {expected} contribution, got {}",
            value.kind()
        )))
    }
}
