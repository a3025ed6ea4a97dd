use {
    super::present::AcquiredImage,
    crate::tag::ResourceUsageTag,
    syncval_core::{QueueId, StageAccess},
};

/// What a signaled fence proves complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceSyncState {
    /// Queue the fence was submitted to. `None` for acquire fences.
    pub queue: Option<QueueId>,

    /// Every access of the queue tagged before this is complete.
    pub tag: ResourceUsageTag,

    /// Image whose acquisition the fence signals.
    pub acquired: Option<AcquiredImage>,
}

impl FenceSyncState {
    /// Fence of a queue submission.
    pub fn submitted(queue: QueueId, tag: ResourceUsageTag) -> Self {
        FenceSyncState {
            queue: Some(queue),
            tag,
            acquired: None,
        }
    }

    /// Fence of an image acquisition.
    pub fn acquired(image: AcquiredImage) -> Self {
        FenceSyncState {
            queue: None,
            tag: image.acquire_tag.next(),
            acquired: Some(image),
        }
    }

    /// Check if waiting on the fence completes the access.
    pub fn completes(&self, queue: Option<QueueId>, tag: ResourceUsageTag, usage: StageAccess) -> bool {
        match &self.acquired {
            Some(image) => image.completes(tag, usage),
            None => queue.is_some() && queue == self.queue && tag < self.tag,
        }
    }
}
