use {
    super::batch::QueueBatchContext,
    std::sync::Arc,
    syncval_core::QueueId,
};

/// Submission state of one queue.
#[derive(Clone, Debug)]
pub struct QueueSyncState {
    id: QueueId,
    last_batch: Option<Arc<QueueBatchContext>>,
    submit_count: u64,
}

impl QueueSyncState {
    /// Create queue with nothing submitted.
    pub fn new(id: QueueId) -> Self {
        QueueSyncState {
            id,
            last_batch: None,
            submit_count: 0,
        }
    }

    /// Get id of the queue.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Batch every new batch of the queue follows.
    pub fn last_batch(&self) -> Option<&Arc<QueueBatchContext>> {
        self.last_batch.as_ref()
    }

    /// Batch for modification. Clones it if shared.
    pub fn last_batch_mut(&mut self) -> Option<&mut QueueBatchContext> {
        self.last_batch.as_mut().map(Arc::make_mut)
    }

    /// Replace the last batch.
    pub fn set_last_batch(&mut self, batch: Arc<QueueBatchContext>) {
        self.last_batch = Some(batch);
    }

    /// Index the next submission gets.
    pub fn submit_index(&self) -> u64 {
        self.submit_count
    }

    /// Count a finished submission.
    pub fn finish_submit(&mut self) {
        self.submit_count += 1;
    }
}
