/// Settings of a validation session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SyncConfig {
    /// Tags are never allocated past this. Running out ends the session.
    pub tag_limit: u64,

    /// Drop replay-only state and unreferenced usage records of finished batches.
    pub trim_batches: bool,

    /// Check accesses of other queues not ordered by semaphores or fences.
    pub detect_cross_queue_races: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            tag_limit: u64::MAX,
            trim_batches: true,
            detect_cross_queue_races: true,
        }
    }
}
