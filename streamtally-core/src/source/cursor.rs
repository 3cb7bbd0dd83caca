use super::*;

/// Records which units are already reflected in committed state.
///
/// `batch_id` is the id the next committed batch will carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCursor {
    pub batch_id: BatchId,
    pub last_unit: Option<UnitId>,
    pub seen: BTreeSet<UnitId>,
}

impl BatchCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, unit: &UnitId) -> bool {
        self.seen.contains(unit)
    }

    /// Record `units` as committed under the current batch id, then move to the next id.
    pub fn advance(&mut self, units: &[UnitId]) {
        for unit in units {
            self.seen.insert(unit.clone());
        }
        if let Some(last) = units.last() {
            self.last_unit = Some(last.clone());
        }
        self.batch_id += 1;
    }
}
