use {
    super::batch::QueueBatchContext,
    fxhash::FxHashMap,
    std::sync::Arc,
    syncval_core::{SemaphoreId, SyncExecScope},
};

/// Pending binary semaphore signal.
#[derive(Clone, Debug)]
pub struct Signal {
    /// Batch the signal was submitted after.
    pub batch: Arc<QueueBatchContext>,

    /// First synchronization scope of the signal.
    pub first_scope: SyncExecScope,
}

impl Signal {
    /// Signal of everything `batch` did at `stages`.
    pub fn new(batch: Arc<QueueBatchContext>, first_scope: SyncExecScope) -> Self {
        Signal { batch, first_scope }
    }
}

/// Signals not consumed by a wait yet.
#[derive(Debug, Default)]
pub struct SignaledSemaphores {
    signals: FxHashMap<SemaphoreId, Signal>,
}

impl SignaledSemaphores {
    /// Create empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending signal of a semaphore.
    pub fn get(&self, semaphore: SemaphoreId) -> Option<&Signal> {
        self.signals.get(&semaphore)
    }

    /// Every pending signal.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Signal> {
        self.signals.values_mut()
    }

    /// Number of pending signals.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Check if no signal is pending.
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Record a signal made outside of a queue submission.
    pub fn insert(&mut self, semaphore: SemaphoreId, signal: Signal) {
        if self.signals.insert(semaphore, signal).is_some() {
            log::debug!("{} signaled again before any wait", semaphore);
        }
    }

    /// Apply changes collected by an overlay.
    pub fn apply(&mut self, changes: FxHashMap<SemaphoreId, Option<Signal>>) {
        for (semaphore, change) in changes {
            match change {
                Some(signal) => {
                    self.signals.insert(semaphore, signal);
                }
                None => {
                    self.signals.remove(&semaphore);
                }
            }
        }
    }

    /// Forget a destroyed semaphore.
    pub fn remove(&mut self, semaphore: SemaphoreId) -> Option<Signal> {
        self.signals.remove(&semaphore)
    }
}

/// Signals and waits of one submission on top of the committed table.
///
/// Batches later in the submission see signals of earlier ones.
/// Nothing changes in the parent until the submission validates completely.
#[derive(Debug)]
pub struct SemaphoreOverlay<'a> {
    parent: &'a SignaledSemaphores,
    changes: FxHashMap<SemaphoreId, Option<Signal>>,
}

impl<'a> SemaphoreOverlay<'a> {
    /// Create empty overlay.
    pub fn new(parent: &'a SignaledSemaphores) -> Self {
        SemaphoreOverlay {
            parent,
            changes: FxHashMap::default(),
        }
    }

    /// Pending signal as seen by the submission.
    pub fn get(&self, semaphore: SemaphoreId) -> Option<&Signal> {
        match self.changes.get(&semaphore) {
            Some(change) => change.as_ref(),
            None => self.parent.get(semaphore),
        }
    }

    /// Record a signal.
    pub fn signal(&mut self, semaphore: SemaphoreId, signal: Signal) {
        if self.get(semaphore).is_some() {
            log::debug!("{} signaled again before any wait", semaphore);
        }
        self.changes.insert(semaphore, Some(signal));
    }

    /// Consume the pending signal of a semaphore.
    ///
    /// Only binary semaphores are tracked. A wait without a pending signal
    /// establishes no ordering.
    pub fn take(&mut self, semaphore: SemaphoreId) -> Option<Signal> {
        let signal = self.get(semaphore).cloned();
        if signal.is_none() {
            log::debug!("Wait on {} has no pending binary signal", semaphore);
        }
        self.changes.insert(semaphore, None);
        signal
    }

    /// Changes to apply to the parent.
    pub fn into_changes(self) -> FxHashMap<SemaphoreId, Option<Signal>> {
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncval_core::PipelineStageFlags;

    fn signal() -> Signal {
        Signal::new(
            Arc::new(QueueBatchContext::new(None, 0, 0)),
            SyncExecScope::source(PipelineStageFlags::ALL_COMMANDS),
        )
    }

    #[test]
    fn overlay_commits_only_when_applied() {
        let mut semaphores = SignaledSemaphores::new();
        let mut overlay = SemaphoreOverlay::new(&semaphores);
        overlay.signal(SemaphoreId(1), signal());
        assert!(overlay.get(SemaphoreId(1)).is_some());
        let changes = overlay.into_changes();
        assert!(semaphores.is_empty());

        semaphores.apply(changes);
        assert_eq!(semaphores.len(), 1);

        let mut overlay = SemaphoreOverlay::new(&semaphores);
        assert!(overlay.take(SemaphoreId(1)).is_some());
        assert!(overlay.take(SemaphoreId(1)).is_none());
        let changes = overlay.into_changes();
        semaphores.apply(changes);
        assert!(semaphores.is_empty());
    }

    #[test]
    fn wait_without_signal_gives_nothing() {
        let semaphores = SignaledSemaphores::new();
        let mut overlay = SemaphoreOverlay::new(&semaphores);
        assert!(overlay.take(SemaphoreId(7)).is_none());
    }
}
