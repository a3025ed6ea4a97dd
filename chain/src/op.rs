//! Synchronization commands, validated and recorded once
//! and replayed onto every context the command buffer executes in.

use {
    crate::{
        access::BarrierScope,
        context::AccessContext,
        error::{Report, SyncError},
        events::{EventCommand, EventMisuse, IgnoreReason, SyncEventState},
        render_pass::{
            AttachmentView, RecordMode, RenderPassAccessContext, RenderPassInfo, RenderingInfo,
        },
        replay::ExecutionContext,
        resource::{BufferInfo, ImageInfo, ImageSubresourceRange, Ranges},
        tag::{ResourceUsageTag, SubcommandType, UsageFormatter},
    },
    smallvec::SmallVec,
    std::{ops::Range, sync::Arc},
    syncval_core::{
        hal::{self, image::Layout},
        AccessFlags, EventId, NamedHandle, PipelineStageFlags, ResourceKey, StageAccess,
        SyncBarrier, SyncExecScope,
    },
};

/// Buffer memory barrier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferBarrier {
    /// Buffer.
    pub buffer: BufferInfo,

    /// Start of the range.
    pub offset: u64,

    /// Size of the range. `None` for the rest of the buffer.
    pub size: Option<u64>,

    /// Access scopes.
    pub accesses: Range<AccessFlags>,
}

/// Image memory barrier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Image.
    pub image: ImageInfo,

    /// Subresources.
    pub range: ImageSubresourceRange,

    /// Access scopes.
    pub accesses: Range<AccessFlags>,

    /// Layout transition. Equal layouts mean no transition.
    pub layouts: Range<Layout>,
}

/// Parameters of a pipeline barrier or wait.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierSet {
    /// Source and destination stage masks.
    pub stages: Range<PipelineStageFlags>,

    /// Global memory barriers.
    pub memory: Vec<Range<AccessFlags>>,

    /// Buffer memory barriers.
    pub buffers: Vec<BufferBarrier>,

    /// Image memory barriers.
    pub images: Vec<ImageBarrier>,
}

#[derive(Clone, Debug)]
struct BufferBarrierRange {
    key: ResourceKey,
    range: Range<u64>,
    barrier: SyncBarrier,
}

#[derive(Clone, Debug)]
struct ImageBarrierRanges {
    key: ResourceKey,
    index: u32,
    ranges: Ranges,
    barrier: SyncBarrier,
    layouts: Range<Layout>,
}

impl ImageBarrierRanges {
    fn layout_transition(&self) -> bool {
        self.layouts.start != self.layouts.end
    }
}

/// Barrier set with scopes expanded and ranges projected.
#[derive(Clone, Debug)]
pub struct SyncBarriers {
    src: SyncExecScope,
    dst: SyncExecScope,
    memory: Vec<SyncBarrier>,
    buffers: Vec<BufferBarrierRange>,
    images: Vec<ImageBarrierRanges>,
}

impl SyncBarriers {
    /// Expand scopes and project buffer and image ranges.
    pub fn new(set: &BarrierSet) -> Result<Self, SyncError> {
        let src = SyncExecScope::source(set.stages.start);
        let dst = SyncExecScope::destination(set.stages.end);
        let barrier = |accesses: &Range<AccessFlags>| {
            SyncBarrier::new(src, accesses.start, dst, accesses.end)
        };

        let mut memory: Vec<_> = set.memory.iter().map(barrier).collect();
        if memory.is_empty() {
            memory.push(SyncBarrier::execution(src, dst));
        }

        let buffers = set
            .buffers
            .iter()
            .map(|buffer| {
                Ok(BufferBarrierRange {
                    key: buffer.buffer.key(),
                    range: buffer.buffer.range(buffer.offset, buffer.size)?,
                    barrier: barrier(&buffer.accesses),
                })
            })
            .collect::<Result<Vec<_>, SyncError>>()?;

        let images = set
            .images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                Ok(ImageBarrierRanges {
                    key: image.image.key(),
                    index: index as u32,
                    ranges: image.image.subresource_ranges(&image.range)?,
                    barrier: barrier(&image.accesses),
                    layouts: image.layouts.clone(),
                })
            })
            .collect::<Result<Vec<_>, SyncError>>()?;

        Ok(SyncBarriers {
            src,
            dst,
            memory,
            buffers,
            images,
        })
    }

    /// Source scope.
    pub fn src(&self) -> &SyncExecScope {
        &self.src
    }

    /// Destination scope.
    pub fn dst(&self) -> &SyncExecScope {
        &self.dst
    }

    fn handles(&self) -> SmallVec<[NamedHandle; 2]> {
        self.buffers
            .iter()
            .enumerate()
            .map(|(index, buffer)| {
                NamedHandle::indexed("pBufferMemoryBarriers", index as u32, buffer.key)
            })
            .chain(
                self.images
                    .iter()
                    .map(|image| NamedHandle::indexed("pImageMemoryBarriers", image.index, image.key)),
            )
            .collect()
    }

    /// Make every barrier pending on `context`. Takes effect with `apply_pending`.
    fn apply(&self, context: &mut AccessContext, scope: &BarrierScope, restrict: Option<&SyncExecScope>) {
        let restricted = |barrier: &SyncBarrier| match restrict {
            Some(first_scope) => {
                let mut barrier = *barrier;
                barrier.src_exec_scope.exec_scope &= first_scope.exec_scope;
                barrier.src_access_scope = barrier.src_access_scope & first_scope.valid_accesses;
                barrier
            }
            None => *barrier,
        };

        for barrier in &self.memory {
            context.apply_barrier(&restricted(barrier), scope);
        }
        for buffer in &self.buffers {
            context.apply_barrier_range(
                buffer.key,
                buffer.range.clone(),
                &restricted(&buffer.barrier),
                scope,
                false,
            );
        }
        for image in &self.images {
            let barrier = restricted(&image.barrier);
            for range in &image.ranges {
                context.apply_barrier_range(
                    image.key,
                    range.clone(),
                    &barrier,
                    scope,
                    image.layout_transition(),
                );
            }
        }
    }

    /// Check image layout transitions against the current context.
    fn validate_transitions(
        &self,
        exec: &ExecutionContext,
        formatter: &dyn UsageFormatter,
        command: &'static str,
        event_scope: Option<(&SyncExecScope, ResourceUsageTag)>,
    ) -> Result<Vec<Report>, SyncError> {
        let mut reports = Vec::new();
        for image in self.images.iter().filter(|image| image.layout_transition()) {
            let (src_exec, src_access, event_tag) = match event_scope {
                Some((first_scope, tag)) => (
                    image.barrier.src_exec_scope.exec_scope & first_scope.exec_scope,
                    image.barrier.src_access_scope & first_scope.valid_accesses,
                    Some(tag),
                ),
                None => (
                    image.barrier.src_exec_scope.exec_scope,
                    image.barrier.src_access_scope,
                    None,
                ),
            };
            for range in &image.ranges {
                let hazard = exec.contexts.detect_barrier_hazard(
                    exec.current(),
                    image.key,
                    range.clone(),
                    exec.queue,
                    src_exec,
                    &src_access,
                    event_tag,
                )?;
                if let Some(hazard) = hazard {
                    reports.push(Report::from_hazard(
                        command,
                        format_args!(
                            "{} image barrier {} (old_layout: {:?}, new_layout: {:?})",
                            image.key, image.index, image.layouts.start, image.layouts.end
                        ),
                        StageAccess::LAYOUT_TRANSITION,
                        &hazard,
                        formatter,
                    ));
                    break;
                }
            }
        }
        Ok(reports)
    }
}

/// Render pass instance parameters.
#[derive(Clone, Debug)]
pub struct BeginRenderPass {
    /// Render pass.
    pub info: Arc<RenderPassInfo>,

    /// Views bound to the attachments. `None` for attachments not tracked.
    pub views: Vec<Option<AttachmentView>>,

    /// Render area.
    pub render_area: hal::pso::Rect,
}

impl BeginRenderPass {
    fn instance(&self, exec: &ExecutionContext) -> Result<RenderPassAccessContext, SyncError> {
        RenderPassAccessContext::new(self.info.clone(), &self.views, self.render_area, exec.root)
    }
}

fn check_instance(op: &SyncOp, render_pass: &RenderPassAccessContext) -> Result<(), SyncError> {
    let dynamic = render_pass.info().is_dynamic();
    match op {
        SyncOp::NextSubpass | SyncOp::EndRenderPass if dynamic => Err(SyncError::InvalidRenderPass {
            reason: "dynamic rendering instance is continued by a render pass command",
        }),
        SyncOp::EndRendering if !dynamic => Err(SyncError::InvalidRenderPass {
            reason: "render pass instance is ended by vkCmdEndRendering",
        }),
        _ => Ok(()),
    }
}

/// Synchronization command.
#[derive(Clone, Debug)]
pub enum SyncOp {
    /// `vkCmdPipelineBarrier`.
    PipelineBarrier(SyncBarriers),

    /// `vkCmdWaitEvents`.
    WaitEvents {
        /// Waited events.
        events: SmallVec<[EventId; 2]>,
        /// Barriers applied to the scope of each event.
        barriers: SyncBarriers,
    },

    /// `vkCmdSetEvent`.
    SetEvent {
        /// Event.
        event: EventId,
        /// First synchronization scope.
        src: SyncExecScope,
    },

    /// `vkCmdResetEvent`.
    ResetEvent {
        /// Event.
        event: EventId,
        /// Stages the reset waits for.
        src: SyncExecScope,
    },

    /// `vkCmdBeginRenderPass`.
    BeginRenderPass(BeginRenderPass),

    /// `vkCmdNextSubpass`.
    NextSubpass,

    /// `vkCmdEndRenderPass`.
    EndRenderPass,

    /// `vkCmdBeginRendering`. The implicit render pass has a single subpass.
    BeginRendering(BeginRenderPass),

    /// `vkCmdEndRendering`.
    EndRendering,
}

impl SyncOp {
    /// Pipeline barrier.
    pub fn pipeline_barrier(set: &BarrierSet) -> Result<Self, SyncError> {
        Ok(SyncOp::PipelineBarrier(SyncBarriers::new(set)?))
    }

    /// Wait on events.
    pub fn wait_events(events: &[EventId], set: &BarrierSet) -> Result<Self, SyncError> {
        Ok(SyncOp::WaitEvents {
            events: events.iter().copied().collect(),
            barriers: SyncBarriers::new(set)?,
        })
    }

    /// Set event after `stages`.
    pub fn set_event(event: EventId, stages: PipelineStageFlags) -> Self {
        SyncOp::SetEvent {
            event,
            src: SyncExecScope::source(stages),
        }
    }

    /// Reset event after `stages`.
    pub fn reset_event(event: EventId, stages: PipelineStageFlags) -> Self {
        SyncOp::ResetEvent {
            event,
            src: SyncExecScope::source(stages),
        }
    }

    /// Begin render pass instance.
    pub fn begin_render_pass(
        info: Arc<RenderPassInfo>,
        views: Vec<Option<AttachmentView>>,
        render_area: hal::pso::Rect,
    ) -> Self {
        SyncOp::BeginRenderPass(BeginRenderPass {
            info,
            views,
            render_area,
        })
    }

    /// Begin dynamic rendering instance.
    pub fn begin_rendering(rendering: &RenderingInfo) -> Result<Self, SyncError> {
        let (info, views) = RenderPassInfo::rendering(rendering)?;
        Ok(SyncOp::BeginRendering(BeginRenderPass {
            info: Arc::new(info),
            views,
            render_area: rendering.render_area,
        }))
    }

    /// Command name used in usage records and reports.
    pub fn command(&self) -> &'static str {
        match self {
            SyncOp::PipelineBarrier(_) => "vkCmdPipelineBarrier",
            SyncOp::WaitEvents { .. } => "vkCmdWaitEvents",
            SyncOp::SetEvent { .. } => "vkCmdSetEvent",
            SyncOp::ResetEvent { .. } => "vkCmdResetEvent",
            SyncOp::BeginRenderPass(_) => "vkCmdBeginRenderPass",
            SyncOp::NextSubpass => "vkCmdNextSubpass",
            SyncOp::EndRenderPass => "vkCmdEndRenderPass",
            SyncOp::BeginRendering(_) => "vkCmdBeginRendering",
            SyncOp::EndRendering => "vkCmdEndRendering",
        }
    }

    /// Usage records the command takes, in order.
    /// The record at `tag_index()` is the tag of the command itself.
    pub fn subcommands(&self) -> &'static [SubcommandType] {
        match self {
            SyncOp::BeginRenderPass(_) | SyncOp::BeginRendering(_) => {
                &[SubcommandType::SubpassTransition, SubcommandType::LoadOp]
            }
            SyncOp::NextSubpass => &[
                SubcommandType::StoreOp,
                SubcommandType::SubpassTransition,
                SubcommandType::LoadOp,
            ],
            SyncOp::EndRenderPass | SyncOp::EndRendering => {
                &[SubcommandType::StoreOp, SubcommandType::SubpassTransition]
            }
            _ => &[SubcommandType::None],
        }
    }

    /// Index of the command's own tag among `subcommands()`.
    pub fn tag_index(&self) -> usize {
        match self {
            SyncOp::NextSubpass | SyncOp::EndRenderPass | SyncOp::EndRendering => 1,
            _ => 0,
        }
    }

    /// Handles named in usage records.
    pub fn handles(&self) -> SmallVec<[NamedHandle; 2]> {
        match self {
            SyncOp::PipelineBarrier(barriers) => barriers.handles(),
            SyncOp::WaitEvents { events, barriers } => events
                .iter()
                .enumerate()
                .map(|(index, &event)| NamedHandle::indexed("pEvents", index as u32, event))
                .chain(barriers.handles())
                .collect(),
            SyncOp::SetEvent { event, .. } | SyncOp::ResetEvent { event, .. } => {
                smallvec::smallvec![NamedHandle::new("event", *event)]
            }
            SyncOp::BeginRenderPass(begin) => begin
                .info
                .id()
                .map(|id| NamedHandle::new("renderPass", id))
                .into_iter()
                .collect(),
            SyncOp::BeginRendering(begin) => begin
                .views
                .iter()
                .enumerate()
                .filter_map(|(index, view)| {
                    view.as_ref()
                        .map(|view| NamedHandle::indexed("pAttachments", index as u32, view.image.id))
                })
                .collect(),
            SyncOp::NextSubpass | SyncOp::EndRenderPass | SyncOp::EndRendering => SmallVec::new(),
        }
    }

    /// Check the command against the state it is about to act on.
    ///
    /// When replaying, `base` is the first tag of the replayed command buffer.
    /// Event commands recorded at or after it were validated when recorded.
    pub fn validate(
        &self,
        exec: &ExecutionContext,
        formatter: &dyn UsageFormatter,
        base: Option<ResourceUsageTag>,
    ) -> Result<Vec<Report>, SyncError> {
        let command = self.command();
        let replayed = |state: &SyncEventState| base.map_or(false, |base| state.last_command_tag >= base);

        match self {
            SyncOp::PipelineBarrier(barriers) => {
                barriers.validate_transitions(exec, formatter, command, None)
            }
            SyncOp::WaitEvents { events, barriers } => {
                let first_event = match events.first() {
                    Some(&event) => event,
                    None => return Ok(Vec::new()),
                };
                let mut reports = Vec::new();
                let src_mask = barriers.src.mask_param;
                if src_mask.contains(PipelineStageFlags::HOST) {
                    reports.push(Report::from_event(command, first_event, EventMisuse::HostStage, None));
                }

                let mut event_stages = PipelineStageFlags::empty();
                let mut scoped = false;
                for &event in events {
                    let state = match exec.events.get(event) {
                        Some(state) if !replayed(state) => state,
                        _ => continue,
                    };
                    let prior_tag = Some(state.last_command_tag);
                    match state.ignored_by_wait(src_mask) {
                        Some(IgnoreReason::ResetWaitRace) => reports.push(Report::from_event(
                            command,
                            event,
                            EventMisuse::ResetWaitRace,
                            prior_tag,
                        )),
                        Some(IgnoreReason::SetRace(prior)) => reports.push(Report::from_event(
                            command,
                            event,
                            EventMisuse::SetRace { prior },
                            prior_tag,
                        )),
                        Some(IgnoreReason::MissingStageBits(missing)) => {
                            reports.push(Report::from_event(
                                command,
                                event,
                                EventMisuse::MissingStageBits { missing },
                                prior_tag,
                            ))
                        }
                        Some(IgnoreReason::MissingSetEvent) => {
                            log::debug!("{} waits on {} with no set in known history", command, event);
                        }
                        None => {
                            if let Some(first_scope) = &state.first_scope {
                                scoped = true;
                                event_stages |= first_scope.exec.mask_param;
                                reports.extend(barriers.validate_transitions(
                                    exec,
                                    formatter,
                                    command,
                                    Some((&first_scope.exec, first_scope.tag)),
                                )?);
                            }
                        }
                    }
                }

                let extra = src_mask - PipelineStageFlags::HOST - event_stages;
                if scoped && !extra.is_empty() {
                    reports.push(Report::from_event(
                        command,
                        first_event,
                        EventMisuse::ExtraStageBits { extra },
                        None,
                    ));
                }
                Ok(reports)
            }
            SyncOp::SetEvent { event, src } | SyncOp::ResetEvent { event, src } => {
                let state = match exec.events.get(*event) {
                    Some(state) if !replayed(state) => state,
                    _ => return Ok(Vec::new()),
                };
                let prior = match state.last_command {
                    Some(prior) => prior,
                    None => return Ok(Vec::new()),
                };
                let reset = match self {
                    SyncOp::ResetEvent { .. } => true,
                    _ => false,
                };
                if reset && prior == EventCommand::Reset {
                    return Ok(Vec::new());
                }
                if state.has_barrier(src.mask_param, src.exec_scope) {
                    return Ok(Vec::new());
                }
                let current = if reset {
                    EventCommand::Reset
                } else {
                    EventCommand::Set
                };
                Ok(vec![Report::from_event(
                    command,
                    *event,
                    EventMisuse::MissingBarrier {
                        command: current,
                        prior,
                    },
                    Some(state.last_command_tag),
                )])
            }
            SyncOp::BeginRenderPass(begin) | SyncOp::BeginRendering(begin) => {
                if exec.render_pass.is_some() {
                    return Err(SyncError::RenderPassActive);
                }
                begin
                    .instance(exec)?
                    .validate_begin(&exec.contexts, exec.queue, formatter, command)
            }
            SyncOp::NextSubpass => {
                let render_pass = exec.render_pass.as_ref().ok_or(SyncError::RenderPassNotActive)?;
                check_instance(self, render_pass)?;
                render_pass.validate_next(&exec.contexts, exec.queue, formatter, command)
            }
            SyncOp::EndRenderPass | SyncOp::EndRendering => {
                let render_pass = exec.render_pass.as_ref().ok_or(SyncError::RenderPassNotActive)?;
                check_instance(self, render_pass)?;
                render_pass.validate_end(&exec.contexts, exec.queue, formatter, command)
            }
        }
    }

    /// Apply the command to the context it is recorded into.
    pub fn record(&self, exec: &mut ExecutionContext, tag: ResourceUsageTag) -> Result<(), SyncError> {
        log::trace!("Record {} at {}", self.command(), tag);
        self.apply(exec, tag, RecordMode::Record)
    }

    /// Apply the command to a context the recording command buffer executes in.
    /// `tag` is the command's tag moved into the target sequence.
    pub fn replay_record(
        &self,
        exec: &mut ExecutionContext,
        tag: ResourceUsageTag,
    ) -> Result<(), SyncError> {
        log::trace!("Replay {} at {}", self.command(), tag);
        self.apply(exec, tag, RecordMode::Replay)
    }

    fn apply(
        &self,
        exec: &mut ExecutionContext,
        tag: ResourceUsageTag,
        mode: RecordMode,
    ) -> Result<(), SyncError> {
        let queue = exec.queue;
        match self {
            SyncOp::PipelineBarrier(barriers) => {
                let current = exec.current();
                let context = exec.contexts.get_mut(current)?;
                barriers.apply(context, &BarrierScope::queue(queue), None);
                context.apply_pending(tag, queue);
                exec.events.apply_barrier(&barriers.src, &barriers.dst, tag);
            }
            SyncOp::WaitEvents { events, barriers } => {
                let current = exec.current();
                let context = exec.contexts.get_mut(current)?;
                for &event in events {
                    let state = exec.events.get_or_insert(event);
                    if state.ignored_by_wait(barriers.src.mask_param).is_some() {
                        state.record_wait(None, tag);
                        continue;
                    }
                    if let Some(first_scope) = state.first_scope {
                        let scope = BarrierScope {
                            queue,
                            before: Some(first_scope.tag),
                        };
                        barriers.apply(context, &scope, Some(&first_scope.exec));
                    }
                    state.record_wait(Some(&barriers.dst), tag);
                }
                context.apply_pending(tag, queue);
            }
            SyncOp::SetEvent { event, src } => {
                exec.events.get_or_insert(*event).record_set(src, tag);
            }
            SyncOp::ResetEvent { event, .. } => {
                exec.events.get_or_insert(*event).record_reset(tag);
            }
            SyncOp::BeginRenderPass(begin) | SyncOp::BeginRendering(begin) => {
                if exec.render_pass.is_some() {
                    return Err(SyncError::RenderPassActive);
                }
                let mut render_pass = begin.instance(exec)?;
                render_pass.record_begin(&mut exec.contexts, queue, tag, mode)?;
                exec.render_pass = Some(render_pass);
            }
            SyncOp::NextSubpass => {
                let render_pass = exec
                    .render_pass
                    .as_mut()
                    .ok_or(SyncError::RenderPassNotActive)?;
                check_instance(self, render_pass)?;
                render_pass.record_next(&mut exec.contexts, queue, tag, mode)?;
            }
            SyncOp::EndRenderPass | SyncOp::EndRendering => {
                check_instance(
                    self,
                    exec.render_pass.as_ref().ok_or(SyncError::RenderPassNotActive)?,
                )?;
                let mut render_pass = exec
                    .render_pass
                    .take()
                    .ok_or(SyncError::RenderPassNotActive)?;
                render_pass.record_end(&mut exec.contexts, queue, tag, mode)?;
                match mode {
                    RecordMode::Record => exec.render_passes.push(render_pass),
                    RecordMode::Replay => render_pass.release(&mut exec.contexts)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HazardKind, ReportKind};
    use syncval_core::{BufferId, ImageId, SyncOrdering};

    struct Tags;

    impl UsageFormatter for Tags {
        fn format_usage(&self, tag: ResourceUsageTag) -> String {
            format!("tag: {}", tag)
        }
    }

    fn image() -> ImageInfo {
        ImageInfo {
            id: ImageId(2),
            extent: hal::image::Extent {
                width: 4,
                height: 4,
                depth: 1,
            },
            levels: 1,
            layers: 1,
            aspects: hal::format::Aspects::COLOR,
            texel_size: 4,
        }
    }

    fn transfer_write() -> StageAccess {
        StageAccess::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE)
    }

    fn transition(src: PipelineStageFlags, src_access: AccessFlags) -> BarrierSet {
        let image = image();
        BarrierSet {
            stages: src..PipelineStageFlags::FRAGMENT_SHADER,
            memory: Vec::new(),
            buffers: Vec::new(),
            images: vec![ImageBarrier {
                range: image.full_range(),
                image,
                accesses: src_access..AccessFlags::SHADER_READ,
                layouts: Layout::TransferDstOptimal..Layout::ShaderReadOnlyOptimal,
            }],
        }
    }

    fn written() -> ExecutionContext {
        let mut exec = ExecutionContext::new(AccessContext::new(), Default::default(), None);
        let root = exec.root;
        exec.contexts
            .get_mut(root)
            .unwrap()
            .update_access(image().key(), 0..64, transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        exec
    }

    #[test]
    fn missing_memory_barrier_becomes_execution_barrier() {
        let set = BarrierSet {
            stages: PipelineStageFlags::TRANSFER..PipelineStageFlags::COMPUTE_SHADER,
            memory: Vec::new(),
            buffers: vec![BufferBarrier {
                buffer: BufferInfo {
                    id: BufferId(1),
                    size: 256,
                },
                offset: 64,
                size: None,
                accesses: AccessFlags::TRANSFER_WRITE..AccessFlags::SHADER_READ,
            }],
            images: Vec::new(),
        };
        let barriers = SyncBarriers::new(&set).unwrap();
        assert_eq!(barriers.memory.len(), 1);
        assert!(barriers.memory[0].src_access_scope.is_empty());
        assert_eq!(barriers.buffers[0].range, 64..256);
    }

    #[test]
    fn transition_after_unsynchronized_write_is_reported() {
        let exec = written();
        let op = SyncOp::pipeline_barrier(&transition(
            PipelineStageFlags::COMPUTE_SHADER,
            AccessFlags::SHADER_WRITE,
        ))
        .unwrap();
        let reports = op.validate(&exec, &Tags, None).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].hazard(), Some(HazardKind::WriteAfterWrite));
        assert_eq!(reports[0].prior_tag, Some(ResourceUsageTag(1)));
    }

    #[test]
    fn transition_becomes_write_at_barrier_tag() {
        let mut exec = written();
        let op = SyncOp::pipeline_barrier(&transition(
            PipelineStageFlags::TRANSFER,
            AccessFlags::TRANSFER_WRITE,
        ))
        .unwrap();
        assert!(op.validate(&exec, &Tags, None).unwrap().is_empty());
        op.record(&mut exec, ResourceUsageTag(2)).unwrap();

        let root = exec.contexts.get(exec.root).unwrap();
        let state = root.map(image().key()).unwrap().get(&0).unwrap();
        assert_eq!(state.last_write().unwrap().tag, ResourceUsageTag(2));
        assert_eq!(state.last_write().unwrap().access, StageAccess::LAYOUT_TRANSITION);
    }

    #[test]
    fn wait_applies_only_to_accesses_before_set() {
        let mut exec = written();
        SyncOp::set_event(EventId(9), PipelineStageFlags::TRANSFER)
            .record(&mut exec, ResourceUsageTag(2))
            .unwrap();
        let root = exec.root;
        exec.contexts
            .get_mut(root)
            .unwrap()
            .update_access(image().key(), 0..64, transfer_write(), SyncOrdering::None, ResourceUsageTag(3), None);

        let wait = SyncOp::wait_events(
            &[EventId(9)],
            &transition(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE),
        )
        .unwrap();
        let reports = wait.validate(&exec, &Tags, None).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].prior_tag, Some(ResourceUsageTag(3)));
    }

    #[test]
    fn set_after_set_without_barrier_is_reported() {
        let mut exec = written();
        let set = SyncOp::set_event(EventId(4), PipelineStageFlags::TRANSFER);
        assert!(set.validate(&exec, &Tags, None).unwrap().is_empty());
        set.record(&mut exec, ResourceUsageTag(2)).unwrap();

        let reports = set.validate(&exec, &Tags, None).unwrap();
        assert_eq!(reports.len(), 1);
        match reports[0].kind {
            ReportKind::Event(EventMisuse::MissingBarrier { command, prior }) => {
                assert_eq!(command, EventCommand::Set);
                assert_eq!(prior, EventCommand::Set);
            }
            ref other => panic!("unexpected {:?}", other),
        }
        // already validated when recorded
        assert!(set
            .validate(&exec, &Tags, Some(ResourceUsageTag(2)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn wait_without_set_is_not_a_hazard() {
        let exec = written();
        let wait = SyncOp::wait_events(
            &[EventId(5)],
            &transition(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE),
        )
        .unwrap();
        let reports = wait.validate(&exec, &Tags, None).unwrap();
        assert!(reports.is_empty());
    }
}
