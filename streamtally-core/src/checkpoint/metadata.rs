use super::*;

/// Everything a query needs to resume after a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryCheckpoint {
    pub batch_id: BatchId,
    pub cursor: BatchCursor,
    pub watermark: WatermarkState,
    /// Append mode has emitted every window ending at or before this time.
    pub finalized_through: EventTime,
    pub state: Snapshot,
    /// Wall-clock time the checkpoint was taken, in epoch millis.
    pub timestamp: i64,
}

impl QueryCheckpoint {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("serialize query checkpoint failed")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("deserialize query checkpoint failed")
    }
}
