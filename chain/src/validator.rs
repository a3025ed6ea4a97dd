//! Device-wide validation of queue operations.

use {
    crate::{
        command::CommandBufferAccessContext,
        config::SyncConfig,
        error::{Report, SyncError},
        resource::ImageInfo,
        schedule::{
            AcquiredImage, FenceSyncState, PresentedImage, QueueBatchContext, QueueSyncState,
            SemaphoreOverlay, Signal, SignaledSemaphores,
        },
        tag::{ResourceUsageTag, TagAllocator},
    },
    fxhash::FxHashMap,
    parking_lot::Mutex,
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    syncval_core::{
        FenceId, NamedHandle, PipelineStageFlags, QueueId, SemaphoreId, StageAccess, SwapchainId,
        SyncExecScope,
    },
    thread_profiler::profile_scope,
};

/// Semaphore a batch waits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreWait {
    /// The semaphore.
    pub semaphore: SemaphoreId,

    /// Stages that wait.
    pub stages: PipelineStageFlags,
}

/// Semaphore a batch signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreSignal {
    /// The semaphore.
    pub semaphore: SemaphoreId,

    /// Stages that signal.
    pub stages: PipelineStageFlags,
}

impl SemaphoreSignal {
    /// Signal after every command of the batch.
    pub fn new(semaphore: SemaphoreId) -> Self {
        SemaphoreSignal {
            semaphore,
            stages: PipelineStageFlags::ALL_COMMANDS,
        }
    }
}

/// One batch of a queue submission.
#[derive(Clone, Debug, Default)]
pub struct SubmitBatch<'a> {
    /// Semaphores waited on before the batch.
    pub waits: Vec<SemaphoreWait>,

    /// Command buffers in submission order.
    pub command_buffers: Vec<&'a CommandBufferAccessContext>,

    /// Semaphores signaled after the batch.
    pub signals: Vec<SemaphoreSignal>,
}

/// Queue submission.
#[derive(Clone, Debug, Default)]
pub struct SubmitInfo<'a> {
    /// Batches in submission order.
    pub batches: Vec<SubmitBatch<'a>>,

    /// Fence signaled when every batch completes.
    pub fence: Option<FenceId>,
}

/// Swapchain image to present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentImage {
    /// Swapchain.
    pub swapchain: SwapchainId,

    /// Index of the image in the swapchain.
    pub index: u32,

    /// The image.
    pub image: ImageInfo,
}

/// Queue present operation.
#[derive(Clone, Debug, Default)]
pub struct PresentInfo {
    /// Semaphores waited on before presenting.
    pub waits: Vec<SemaphoreId>,

    /// Images to present.
    pub images: Vec<PresentImage>,
}

#[derive(Debug, Default)]
struct DeviceState {
    queues: FxHashMap<QueueId, QueueSyncState>,
    semaphores: SignaledSemaphores,
    fences: FxHashMap<FenceId, FenceSyncState>,
    presented: FxHashMap<(SwapchainId, u32), PresentedImage>,
}

impl DeviceState {
    fn queue(&self, queue: QueueId) -> Result<&QueueSyncState, SyncError> {
        self.queues.get(&queue).ok_or(SyncError::UnknownQueue(queue))
    }

    fn queue_mut(&mut self, queue: QueueId) -> Result<&mut QueueSyncState, SyncError> {
        self.queues.get_mut(&queue).ok_or(SyncError::UnknownQueue(queue))
    }

    /// Remove completed accesses from every batch still referenced.
    fn apply_wait(&mut self, completed: &dyn Fn(Option<QueueId>, ResourceUsageTag, StageAccess) -> bool) {
        for queue in self.queues.values_mut() {
            if let Some(batch) = queue.last_batch_mut() {
                batch.apply_wait(completed);
            }
        }
        for signal in self.semaphores.iter_mut() {
            Arc::make_mut(&mut signal.batch).apply_wait(completed);
        }
        for presented in self.presented.values_mut() {
            Arc::make_mut(&mut presented.batch).apply_wait(completed);
        }
    }
}

/// Validator of one device.
///
/// Command buffers are recorded independently, each by its owner.
/// Queue operations go through the validator, which keeps the state shared
/// between queues behind a lock.
#[derive(Debug)]
pub struct SyncValidator {
    config: SyncConfig,
    tags: TagAllocator,
    state: Mutex<DeviceState>,
    lost: AtomicBool,
}

impl SyncValidator {
    /// Create validator with its own tag sequence.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_tags(config, TagAllocator::new(config.tag_limit))
    }

    /// Create validator drawing tags from `tags`.
    pub fn with_tags(config: SyncConfig, tags: TagAllocator) -> Self {
        SyncValidator {
            config,
            tags,
            state: Mutex::new(DeviceState::default()),
            lost: AtomicBool::new(false),
        }
    }

    /// Session settings.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Tag sequence of the session.
    pub fn tags(&self) -> &TagAllocator {
        &self.tags
    }

    /// Check if the session ended because tags ran out.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn check_lost(&self) -> Result<(), SyncError> {
        if self.is_lost() {
            Err(SyncError::SessionLost)
        } else {
            Ok(())
        }
    }

    fn exhausted<T>(&self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        if let Err(err @ SyncError::TagsExhausted { .. }) = &result {
            log::error!("Synchronization validation stopped: {}", err);
            self.lost.store(true, Ordering::Release);
        }
        result
    }

    /// Start tracking a queue.
    pub fn register_queue(&self, queue: QueueId) {
        self.state
            .lock()
            .queues
            .entry(queue)
            .or_insert_with(|| QueueSyncState::new(queue));
    }

    /// Batch the next submission to `queue` follows.
    pub fn last_batch(&self, queue: QueueId) -> Result<Option<Arc<QueueBatchContext>>, SyncError> {
        Ok(self.state.lock().queue(queue)?.last_batch().cloned())
    }

    /// Validate a submission against everything submitted before it.
    ///
    /// Nothing is committed if an error is returned.
    pub fn queue_submit(&self, queue: QueueId, submit: &SubmitInfo<'_>) -> Result<Vec<Report>, SyncError> {
        profile_scope!("queue_submit");
        self.check_lost()?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let queue_state = state.queue(queue)?;
        let submit_index = queue_state.submit_index();
        let mut prev = queue_state.last_batch().cloned();

        let others: Vec<Arc<QueueBatchContext>> = if self.config.detect_cross_queue_races {
            state
                .queues
                .values()
                .filter(|other| other.id() != queue)
                .filter_map(|other| other.last_batch().cloned())
                .collect()
        } else {
            Vec::new()
        };

        let mut overlay = SemaphoreOverlay::new(&state.semaphores);
        let mut reports = Vec::new();
        for (batch_index, submitted) in submit.batches.iter().enumerate() {
            let waits: Vec<(Signal, SyncExecScope)> = submitted
                .waits
                .iter()
                .filter_map(|wait| {
                    overlay
                        .take(wait.semaphore)
                        .map(|signal| (signal, SyncExecScope::destination(wait.stages)))
                })
                .collect();

            let mut batch = QueueBatchContext::new(Some(queue), submit_index, batch_index as u32);
            batch.setup(prev.as_ref(), &waits);
            batch.add_async_batches(&others);
            reports.extend(self.exhausted(batch.replay(&submitted.command_buffers, &self.tags))?);
            batch.finish(self.config.trim_batches);

            let batch = Arc::new(batch);
            for signal in &submitted.signals {
                overlay.signal(
                    signal.semaphore,
                    Signal::new(batch.clone(), SyncExecScope::source(signal.stages)),
                );
            }
            prev = Some(batch);
        }

        let changes = overlay.into_changes();
        state.semaphores.apply(changes);
        let queue_state = state.queue_mut(queue)?;
        if let Some(batch) = prev {
            queue_state.set_last_batch(batch);
        }
        queue_state.finish_submit();
        if let Some(fence) = submit.fence {
            state
                .fences
                .insert(fence, FenceSyncState::submitted(queue, self.tags.peek()));
        }

        log::debug!(
            "Submit {} to {}: {} batches, {} reports",
            submit_index,
            queue,
            submit.batches.len(),
            reports.len()
        );
        Ok(reports)
    }

    /// Validate handing images to the presentation engine.
    pub fn queue_present(&self, queue: QueueId, present: &PresentInfo) -> Result<Vec<Report>, SyncError> {
        profile_scope!("queue_present");
        self.check_lost()?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let queue_state = state.queue(queue)?;
        let submit_index = queue_state.submit_index();
        let prev = queue_state.last_batch().cloned();

        let mut overlay = SemaphoreOverlay::new(&state.semaphores);
        let waits: Vec<(Signal, SyncExecScope)> = present
            .waits
            .iter()
            .filter_map(|&semaphore| {
                overlay.take(semaphore).map(|signal| {
                    (
                        signal,
                        SyncExecScope::destination(PipelineStageFlags::PRESENT_ENGINE),
                    )
                })
            })
            .collect();
        let changes = overlay.into_changes();

        let images: Vec<(NamedHandle, ImageInfo)> = present
            .images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                (
                    NamedHandle::indexed("pSwapchains", index as u32, image.swapchain),
                    image.image,
                )
            })
            .collect();

        let mut batch = QueueBatchContext::new(Some(queue), submit_index, 0);
        batch.setup(prev.as_ref(), &waits);
        let reports = self.exhausted(batch.record_image_operation(
            "vkQueuePresentKHR",
            &images,
            StageAccess::PRESENTED,
            &self.tags,
            true,
        ))?;
        batch.finish(self.config.trim_batches);
        let start = batch.tags().start;
        let batch = Arc::new(batch);

        state.semaphores.apply(changes);
        for (offset, image) in present.images.iter().enumerate() {
            state.presented.insert(
                (image.swapchain, image.index),
                PresentedImage {
                    batch: batch.clone(),
                    image: image.image,
                    tag: start.offset(offset as u64),
                    swapchain: image.swapchain,
                    index: image.index,
                },
            );
        }
        let queue_state = state.queue_mut(queue)?;
        queue_state.set_last_batch(batch);
        queue_state.finish_submit();
        Ok(reports)
    }

    /// Record the presentation engine handing an image back.
    /// Returns the tag of the acquire read.
    pub fn acquire_next_image(
        &self,
        swapchain: SwapchainId,
        index: u32,
        image: &ImageInfo,
        semaphore: Option<SemaphoreId>,
        fence: Option<FenceId>,
    ) -> Result<ResourceUsageTag, SyncError> {
        self.check_lost()?;

        let mut state = self.state.lock();
        let presented = state.presented.remove(&(swapchain, index));

        let mut batch = QueueBatchContext::new(None, 0, 0);
        match &presented {
            Some(presented) => batch.setup(Some(&presented.batch), &[]),
            None => log::debug!("{} image {} acquired before any present", swapchain, index),
        }
        self.exhausted(batch.record_image_operation(
            "vkAcquireNextImageKHR",
            &[(NamedHandle::new("swapchain", swapchain), *image)],
            StageAccess::PRESENT_ACQUIRE_READ,
            &self.tags,
            false,
        ))?;
        batch.finish(self.config.trim_batches);
        let acquire_tag = batch.tags().start;
        let batch = Arc::new(batch);

        if let Some(semaphore) = semaphore {
            state.semaphores.insert(
                semaphore,
                Signal::new(batch, SyncExecScope::source(PipelineStageFlags::PRESENT_ENGINE)),
            );
        }
        if let Some(fence) = fence {
            let acquired = AcquiredImage {
                swapchain,
                index,
                image: image.id,
                present_tag: presented.map(|presented| presented.tag),
                acquire_tag,
            };
            state.fences.insert(fence, FenceSyncState::acquired(acquired));
        }
        Ok(acquire_tag)
    }

    /// Retire every access the fences prove complete.
    pub fn wait_for_fences(&self, fences: &[FenceId]) -> Result<(), SyncError> {
        profile_scope!("wait_for_fences");
        self.check_lost()?;

        let mut state = self.state.lock();
        for fence in fences {
            match state.fences.remove(fence) {
                Some(fence_state) => state.apply_wait(
                    &|queue: Option<QueueId>, tag: ResourceUsageTag, usage: StageAccess| {
                        fence_state.completes(queue, tag, usage)
                    },
                ),
                None => log::debug!("Wait on {} proves nothing", fence),
            }
        }
        Ok(())
    }

    /// Retire every access submitted to `queue`.
    pub fn queue_wait_idle(&self, queue: QueueId) -> Result<(), SyncError> {
        self.check_lost()?;
        let mut state = self.state.lock();
        state.queue(queue)?;
        let fence = FenceSyncState::submitted(queue, self.tags.peek());
        state.apply_wait(&|queue: Option<QueueId>, tag: ResourceUsageTag, usage: StageAccess| {
            fence.completes(queue, tag, usage)
        });
        Ok(())
    }

    /// Retire every access submitted to any queue.
    pub fn device_wait_idle(&self) -> Result<(), SyncError> {
        self.check_lost()?;
        let end = self.tags.peek();
        self.state
            .lock()
            .apply_wait(&|queue: Option<QueueId>, tag: ResourceUsageTag, _: StageAccess| {
                queue.is_some() && tag < end
            });
        Ok(())
    }

    /// Forget a destroyed semaphore.
    pub fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        self.state.lock().semaphores.remove(semaphore);
    }

    /// Forget a destroyed fence.
    pub fn destroy_fence(&self, fence: FenceId) {
        self.state.lock().fences.remove(&fence);
    }

    /// Forget every presented image of a destroyed swapchain.
    pub fn destroy_swapchain(&self, swapchain: SwapchainId) {
        self.state
            .lock()
            .presented
            .retain(|&(presented, _), _| presented != swapchain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command::ResourceAccess, resource::BufferInfo};
    use syncval_core::{hal::queue::QueueFamilyId, AccessFlags, BufferId, CommandBufferId};

    fn fill(id: u64) -> CommandBufferAccessContext {
        let buffer = BufferInfo {
            id: BufferId(1),
            size: 64,
        };
        let write = StageAccess::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE);
        let mut cb = CommandBufferAccessContext::new(CommandBufferId(id));
        let access = ResourceAccess::buffer("dstBuffer", &buffer, 0, None, write).unwrap();
        cb.record_command("vkCmdFillBuffer", &[access]).unwrap();
        cb
    }

    fn submit<'a>(command_buffers: Vec<&'a CommandBufferAccessContext>, fence: Option<FenceId>) -> SubmitInfo<'a> {
        SubmitInfo {
            batches: vec![SubmitBatch {
                command_buffers,
                ..SubmitBatch::default()
            }],
            fence,
        }
    }

    #[test]
    fn unknown_queue_is_rejected() {
        let validator = SyncValidator::new(SyncConfig::default());
        let queue = QueueId::new(QueueFamilyId(0), 0);
        assert_eq!(
            validator.queue_submit(queue, &SubmitInfo::default()).err(),
            Some(SyncError::UnknownQueue(queue))
        );
    }

    #[test]
    fn fence_wait_retires_prior_submission() {
        let validator = SyncValidator::new(SyncConfig::default());
        let queue = QueueId::new(QueueFamilyId(0), 0);
        validator.register_queue(queue);
        let cb = fill(1);

        assert!(validator.queue_submit(queue, &submit(vec![&cb], Some(FenceId(1)))).unwrap().is_empty());
        assert_eq!(validator.queue_submit(queue, &submit(vec![&cb], None)).unwrap().len(), 1);

        validator.wait_for_fences(&[FenceId(1)]).unwrap();
        // the fence only covers the first submission
        assert_eq!(validator.queue_submit(queue, &submit(vec![&cb], None)).unwrap().len(), 1);

        validator.queue_wait_idle(queue).unwrap();
        assert!(validator.queue_submit(queue, &submit(vec![&cb], None)).unwrap().is_empty());
    }

    #[test]
    fn exhausted_tags_lose_the_session() {
        let validator = SyncValidator::new(SyncConfig {
            tag_limit: 2,
            ..SyncConfig::default()
        });
        let queue = QueueId::new(QueueFamilyId(0), 0);
        validator.register_queue(queue);
        let cb = fill(1);

        assert!(validator.queue_submit(queue, &submit(vec![&cb], None)).is_ok());
        assert_eq!(
            validator.queue_submit(queue, &submit(vec![&cb], None)).err(),
            Some(SyncError::TagsExhausted {
                requested: 1,
                next: 2
            })
        );
        assert!(validator.is_lost());
        assert_eq!(validator.device_wait_idle().err(), Some(SyncError::SessionLost));
    }
}
