use {
    super::semaphore::Signal,
    crate::{
        access::SemaphoreScope,
        command::CommandBufferAccessContext,
        context::{AccessContext, AsyncContext, AsyncReference, BarrierAction},
        error::{BatchLocation, Report, SyncError},
        events::SyncEventsContext,
        replay::{ExecutionContext, ReplayState},
        resource::ImageInfo,
        tag::{
            AccessLog, BatchAccessLog, BatchRecord, ResourceUsageRecord, ResourceUsageTag,
            TagAllocator, TagRange,
        },
    },
    fxhash::FxHashMap,
    std::sync::Arc,
    syncval_core::{NamedHandle, OrderingBarrier, QueueId, StageAccess, SyncExecScope, SyncOrdering},
    thread_profiler::profile_scope,
};

/// Position of a batch in the queue timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueBatch {
    /// Submitting queue. `None` for the presentation engine.
    pub queue: Option<QueueId>,

    /// Index of the submission on its queue.
    pub submit_index: u64,

    /// Index of the batch within the submission.
    pub batch_index: u32,
}

impl QueueBatch {
    /// Where a command buffer log of this batch is spliced.
    pub fn record(&self, cb_index: u32, bias: u64) -> BatchRecord {
        BatchRecord {
            queue: self.queue,
            submit_index: self.submit_index,
            batch_index: self.batch_index,
            cb_index,
            bias,
        }
    }

    /// Location of reports raised by this batch.
    pub fn location(&self, cb_index: Option<u32>) -> BatchLocation {
        BatchLocation {
            queue: self.queue,
            submit_index: self.submit_index,
            batch_index: self.batch_index,
            cb_index,
        }
    }
}

/// Access state of the device timeline right after a batch.
///
/// Built from the predecessors of the batch, then the command buffers of the batch
/// are replayed on top of it. Finished batches are shared behind `Arc`
/// by queues, semaphore signals and presented images.
#[derive(Clone, Debug)]
pub struct QueueBatchContext {
    batch: QueueBatch,
    tags: TagRange,
    access_context: Arc<AccessContext>,
    events: SyncEventsContext,
    batch_log: BatchAccessLog,
    sync_tags: FxHashMap<QueueId, ResourceUsageTag>,
}

impl QueueBatchContext {
    /// Create batch with no predecessors.
    pub fn new(queue: Option<QueueId>, submit_index: u64, batch_index: u32) -> Self {
        QueueBatchContext {
            batch: QueueBatch {
                queue,
                submit_index,
                batch_index,
            },
            tags: ResourceUsageTag::INVALID..ResourceUsageTag::INVALID,
            access_context: Arc::new(AccessContext::new()),
            events: SyncEventsContext::new(),
            batch_log: BatchAccessLog::new(),
            sync_tags: FxHashMap::default(),
        }
    }

    /// Position of the batch.
    pub fn batch(&self) -> QueueBatch {
        self.batch
    }

    /// Queue of the batch.
    pub fn queue(&self) -> Option<QueueId> {
        self.batch.queue
    }

    /// Tags reserved for the batch.
    pub fn tags(&self) -> &TagRange {
        &self.tags
    }

    /// Resolved access state.
    pub fn access_context(&self) -> &AccessContext {
        &self.access_context
    }

    /// Event states of the queue.
    pub fn events(&self) -> &SyncEventsContext {
        &self.events
    }

    /// Usage log of every tag the access state refers to.
    pub fn batch_log(&self) -> &BatchAccessLog {
        &self.batch_log
    }

    /// Accesses of `queue` tagged before this are predecessors of the batch.
    pub fn sync_tag(&self, queue: QueueId) -> ResourceUsageTag {
        self.sync_tags
            .get(&queue)
            .copied()
            .unwrap_or(ResourceUsageTag::INVALID)
    }

    fn import(&mut self, predecessor: &QueueBatchContext) {
        self.batch_log.import(&predecessor.batch_log);
        for (&queue, &tag) in &predecessor.sync_tags {
            let synced = self.sync_tags.entry(queue).or_insert(tag);
            *synced = (*synced).max(tag);
        }
        if let Some(queue) = predecessor.batch.queue {
            let synced = self.sync_tags.entry(queue).or_insert(predecessor.tags.end);
            *synced = (*synced).max(predecessor.tags.end);
        }
    }

    /// Resolve predecessors: the previous batch of the queue and the batches
    /// signaling the semaphores waited on with their second scopes.
    ///
    /// A batch reached through a semaphore is resolved once with the semaphore applied.
    pub fn setup(&mut self, prev: Option<&Arc<QueueBatchContext>>, waits: &[(Signal, SyncExecScope)]) {
        profile_scope!("queue_batch_setup");

        for (signal, wait) in waits {
            let mut context = (*signal.batch.access_context).clone();
            context.apply_semaphore(
                &SemaphoreScope {
                    queue: signal.batch.queue(),
                    exec: signal.first_scope,
                },
                &SemaphoreScope {
                    queue: self.batch.queue,
                    exec: *wait,
                },
            );
            Arc::make_mut(&mut self.access_context).resolve_from_context(&context, &BarrierAction::none());
            self.import(&signal.batch);
            log::trace!(
                "{:?} waits for batch {:?} at {:?}",
                self.batch,
                signal.batch.batch,
                wait.mask_param
            );
        }

        if let Some(prev) = prev {
            let waited = waits.iter().any(|(signal, _)| Arc::ptr_eq(&signal.batch, prev));
            if !waited {
                Arc::make_mut(&mut self.access_context)
                    .resolve_from_context(&prev.access_context, &BarrierAction::none());
            }
            if prev.batch.queue == self.batch.queue {
                self.events = prev.events.clone();
            }
            self.import(prev);
        }
    }

    /// Check accesses of `others` not ordered before this batch as running concurrently.
    /// Only accesses of each batch's own queue after the last synchronized tag count.
    pub fn add_async_batches<'a>(&mut self, others: impl IntoIterator<Item = &'a Arc<QueueBatchContext>>) {
        for other in others {
            let queue = match other.batch.queue {
                Some(queue) if Some(queue) != self.batch.queue => queue,
                _ => continue,
            };
            let start = self.sync_tag(queue);
            if start >= other.tags.end {
                continue;
            }
            log::trace!("{:?} races with {} since {}", self.batch, queue, start);
            Arc::make_mut(&mut self.access_context).add_async(AsyncReference {
                context: AsyncContext::Shared(other.access_context.clone()),
                start_tag: start,
                queue: Some(queue),
            });
        }
    }

    fn execution(&mut self) -> ExecutionContext {
        let context = std::mem::replace(&mut self.access_context, Arc::new(AccessContext::new()));
        let context = Arc::try_unwrap(context).unwrap_or_else(|shared| (*shared).clone());
        let events = std::mem::replace(&mut self.events, SyncEventsContext::new());
        ExecutionContext::new(context, events, self.batch.queue)
    }

    fn restore(&mut self, exec: ExecutionContext) -> Result<(), SyncError> {
        let (context, events) = exec.into_parts()?;
        self.access_context = Arc::new(context);
        self.events = events;
        Ok(())
    }

    /// Reserve tags for the command buffers and replay them in order.
    pub fn replay(
        &mut self,
        command_buffers: &[&CommandBufferAccessContext],
        tags: &TagAllocator,
    ) -> Result<Vec<Report>, SyncError> {
        profile_scope!("queue_batch_replay");

        let count = command_buffers
            .iter()
            .map(|command_buffer| command_buffer.access_log().len() as u64)
            .sum();
        self.tags = tags.reserve(count)?;

        let mut exec = self.execution();
        let mut bias = self.tags.start.0;
        let mut reports = Vec::new();
        for (cb_index, command_buffer) in command_buffers.iter().enumerate() {
            let cb_index = cb_index as u32;
            self.batch_log
                .insert(self.batch.record(cb_index, bias), command_buffer.access_log().clone());

            let replay = ReplayState::new(command_buffer, bias, "vkQueueSubmit");
            let location = self.batch.location(Some(cb_index));
            let found = replay.validate_first_use(&mut exec, &self.batch_log)?;
            reports.extend(found.into_iter().map(|report| report.at(location)));

            let recorded = command_buffer.access_context()?;
            exec.current_context_mut()?
                .resolve_later(recorded, bias, self.batch.queue);
            log::debug!(
                "Replayed {} into {:?} at {}",
                command_buffer.id(),
                self.batch,
                bias
            );
            bias += command_buffer.access_log().len() as u64;
        }

        self.restore(exec)?;
        Ok(reports)
    }

    /// Record one access of the presentation engine per image, each under its own tag.
    /// With `detect` set the accesses are checked against the batch state first.
    pub fn record_image_operation(
        &mut self,
        command: &'static str,
        images: &[(NamedHandle, ImageInfo)],
        usage: StageAccess,
        tags: &TagAllocator,
        detect: bool,
    ) -> Result<Vec<Report>, SyncError> {
        self.tags = tags.reserve(images.len() as u64)?;

        let mut log = AccessLog::new();
        for (handle, image) in images {
            let handles = [*handle, NamedHandle::new("image", image.id)];
            log.append(ResourceUsageRecord::queue_operation(command, &handles));
        }
        self.batch_log
            .insert(self.batch.record(0, self.tags.start.0), Arc::new(log));

        let mut exec = self.execution();
        let mut reports = Vec::new();
        for (index, (handle, image)) in images.iter().enumerate() {
            let ranges = image.subresource_ranges(&image.full_range())?;
            let tag = self.tags.start.offset(index as u64);
            if detect {
                for range in &ranges {
                    let hazard = exec.contexts().detect_hazard(
                        exec.root(),
                        image.key(),
                        range.clone(),
                        usage,
                        &OrderingBarrier::default(),
                        self.batch.queue,
                    )?;
                    if let Some(hazard) = hazard {
                        reports.push(
                            Report::from_hazard(command, handle, usage, &hazard, &self.batch_log)
                                .at(self.batch.location(None)),
                        );
                        break;
                    }
                }
            }
            let context = exec.current_context_mut()?;
            for range in ranges {
                context.update_access(image.key(), range, usage, SyncOrdering::None, tag, None);
            }
        }

        self.restore(exec)?;
        Ok(reports)
    }

    /// Drop references to concurrent batches and, with `trim`, replay-only state
    /// and usage records no access refers to.
    pub fn finish(&mut self, trim: bool) {
        if let Some(queue) = self.batch.queue {
            self.sync_tags.insert(queue, self.tags.end);
        }
        let context = Arc::make_mut(&mut self.access_context);
        context.clear_async();
        if trim {
            context.trim();
            let mut used = Vec::new();
            context.collect_tags(&mut used);
            self.events.collect_tags(&mut used);
            used.sort();
            used.dedup();
            self.batch_log.trim(&used);
        }
    }

    /// Forget accesses known to be complete.
    pub fn apply_wait(&mut self, completed: &dyn Fn(Option<QueueId>, ResourceUsageTag, StageAccess) -> bool) {
        Arc::make_mut(&mut self.access_context).apply_wait(|queue, tag, usage| completed(queue, tag, usage));
    }
}
