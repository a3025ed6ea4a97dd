//! Access tracking of one command buffer.

use {
    crate::{
        context::AccessContext,
        error::{Report, SyncError},
        events::SyncEventsContext,
        op::SyncOp,
        render_pass::{AttachmentAccess, DrawAttachments},
        replay::{ExecutionContext, ReplayState},
        resource::{BufferInfo, ImageInfo, ImageRegion, ImageSubresourceRange, Ranges},
        tag::{AccessLog, ResourceUsageRecord, ResourceUsageTag, StampedTag, SubcommandType},
    },
    smallvec::{smallvec, SmallVec},
    std::sync::Arc,
    syncval_core::{
        hal::{command::AttachmentClear, pso::ClearRect},
        CommandBufferId, NamedHandle, ResourceKey, StageAccess, SyncOrdering,
    },
};

/// Access a command makes to one resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceAccess {
    /// Resource with the role it plays in the command.
    pub handle: NamedHandle,

    /// Resource memory.
    pub key: ResourceKey,

    /// Linear ranges accessed.
    pub ranges: Ranges,

    /// The access.
    pub usage: StageAccess,

    /// Implicit ordering with prior accesses.
    pub ordering: SyncOrdering,
}

fn skipped<T>(name: &'static str, result: Result<T, SyncError>) -> Result<T, SyncError> {
    result.map_err(|err| {
        log::warn!("Access to {} is skipped: {}", name, err);
        err
    })
}

fn attachment_access(index: usize, attachment: AttachmentAccess) -> ResourceAccess {
    ResourceAccess {
        handle: NamedHandle::indexed("pAttachments", index as u32, attachment.key),
        key: attachment.key,
        ranges: attachment.ranges,
        usage: attachment.usage,
        ordering: attachment.ordering,
    }
}

impl ResourceAccess {
    /// Access to `size` bytes of a buffer at `offset`, or to the rest of it.
    pub fn buffer(
        name: &'static str,
        buffer: &BufferInfo,
        offset: u64,
        size: Option<u64>,
        usage: StageAccess,
    ) -> Result<Self, SyncError> {
        let range = skipped(name, buffer.range(offset, size))?;
        Ok(ResourceAccess {
            handle: NamedHandle::new(name, buffer.id),
            key: buffer.key(),
            ranges: smallvec![range],
            usage,
            ordering: SyncOrdering::None,
        })
    }

    /// Access to whole subresources of an image.
    pub fn image(
        name: &'static str,
        image: &ImageInfo,
        range: &ImageSubresourceRange,
        usage: StageAccess,
    ) -> Result<Self, SyncError> {
        Ok(ResourceAccess {
            handle: NamedHandle::new(name, image.id),
            key: image.key(),
            ranges: skipped(name, image.subresource_ranges(range))?,
            usage,
            ordering: SyncOrdering::None,
        })
    }

    /// Access to a texel region of image subresources.
    pub fn image_region(
        name: &'static str,
        image: &ImageInfo,
        range: &ImageSubresourceRange,
        region: &ImageRegion,
        usage: StageAccess,
    ) -> Result<Self, SyncError> {
        Ok(ResourceAccess {
            handle: NamedHandle::new(name, image.id),
            key: image.key(),
            ranges: skipped(name, image.region_ranges(range, region))?,
            usage,
            ordering: SyncOrdering::None,
        })
    }

    /// Same access with implicit ordering.
    pub fn ordered(mut self, ordering: SyncOrdering) -> Self {
        self.ordering = ordering;
        self
    }
}

/// Sync op with the tag it was recorded at.
#[derive(Clone, Debug)]
pub struct RecordedSyncOp {
    /// Tag of the command.
    pub tag: ResourceUsageTag,

    /// The command.
    pub op: SyncOp,
}

/// Accesses, sync ops and usage log of a command buffer.
///
/// Tags are indices into the usage log. They restart from 0 on reset,
/// which bumps the reset count stamped into usage records.
#[derive(Debug)]
pub struct CommandBufferAccessContext {
    id: CommandBufferId,
    reset_count: u32,
    exec: ExecutionContext,
    access_log: Arc<AccessLog>,
    sync_ops: Vec<RecordedSyncOp>,
    command_count: u32,
    subcommand_count: u32,
}

impl CommandBufferAccessContext {
    /// Create empty command buffer context.
    pub fn new(id: CommandBufferId) -> Self {
        CommandBufferAccessContext {
            id,
            reset_count: 0,
            exec: ExecutionContext::new(AccessContext::new(), SyncEventsContext::new(), None),
            access_log: Arc::new(AccessLog::new()),
            sync_ops: Vec::new(),
            command_count: 0,
            subcommand_count: 0,
        }
    }

    /// Command buffer identity.
    pub fn id(&self) -> CommandBufferId {
        self.id
    }

    /// Number of resets so far.
    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }

    /// Recorded contexts and event states.
    pub fn exec(&self) -> &ExecutionContext {
        &self.exec
    }

    /// Context of commands outside of render passes.
    pub fn access_context(&self) -> Result<&AccessContext, SyncError> {
        self.exec.root_context()
    }

    /// Usage log.
    pub fn access_log(&self) -> &Arc<AccessLog> {
        &self.access_log
    }

    /// Recorded sync ops in recording order.
    pub fn sync_ops(&self) -> &[RecordedSyncOp] {
        &self.sync_ops
    }

    /// Forget everything recorded. Tags issued before are no longer resolvable.
    pub fn reset(&mut self) {
        self.reset_count = self.reset_count.wrapping_add(1);
        self.exec = ExecutionContext::new(AccessContext::new(), SyncEventsContext::new(), None);
        self.access_log = Arc::new(AccessLog::new());
        self.sync_ops.clear();
        self.command_count = 0;
        self.subcommand_count = 0;
        log::debug!("Reset {} to generation {}", self.id, self.reset_count);
    }

    /// Tag stamped with the current reset generation.
    pub fn stamp(&self, tag: ResourceUsageTag) -> StampedTag {
        StampedTag {
            tag,
            generation: self.reset_count,
        }
    }

    /// Usage record of a stamped tag. `None` if it was issued before the last reset.
    pub fn usage_record(&self, stamped: StampedTag) -> Option<&ResourceUsageRecord> {
        if stamped.generation != self.reset_count {
            return None;
        }
        self.access_log.get(stamped.tag)
    }

    fn append(
        &mut self,
        command: &'static str,
        sub_command_type: SubcommandType,
        handles: &[NamedHandle],
    ) -> ResourceUsageTag {
        let record = ResourceUsageRecord {
            command,
            seq_num: self.command_count,
            sub_command_type,
            sub_command: self.subcommand_count,
            command_buffer: Some(self.id),
            reset_count: self.reset_count,
            handles: handles.iter().cloned().collect(),
        };
        Arc::make_mut(&mut self.access_log).append(record)
    }

    /// Tag of a new command.
    pub fn next_command_tag(&mut self, command: &'static str, handles: &[NamedHandle]) -> ResourceUsageTag {
        self.command_count += 1;
        self.subcommand_count = 0;
        self.append(command, SubcommandType::None, handles)
    }

    /// Tag of a new part of the last command.
    pub fn next_subcommand_tag(
        &mut self,
        command: &'static str,
        sub_command_type: SubcommandType,
        handles: &[NamedHandle],
    ) -> ResourceUsageTag {
        self.subcommand_count += 1;
        self.append(command, sub_command_type, handles)
    }

    fn detect_hazards(&self, command: &'static str, accesses: &[ResourceAccess]) -> Result<Vec<Report>, SyncError> {
        let current = self.exec.current();
        let mut reports = Vec::new();
        for access in accesses {
            let ordering = access.ordering.barrier();
            for range in &access.ranges {
                let hazard = self.exec.contexts.detect_hazard(
                    current,
                    access.key,
                    range.clone(),
                    access.usage,
                    &ordering,
                    None,
                )?;
                if let Some(hazard) = hazard {
                    reports.push(Report::from_hazard(
                        command,
                        access.handle,
                        access.usage,
                        &hazard,
                        &*self.access_log,
                    ));
                    break;
                }
            }
        }
        Ok(reports)
    }

    /// Validate and record a command accessing resources.
    pub fn record_command(
        &mut self,
        command: &'static str,
        accesses: &[ResourceAccess],
    ) -> Result<Vec<Report>, SyncError> {
        let reports = self.detect_hazards(command, accesses)?;
        let handles: SmallVec<[NamedHandle; 2]> = accesses.iter().map(|access| access.handle).collect();
        let tag = self.next_command_tag(command, &handles);

        let context = self.exec.current_context_mut()?;
        for access in accesses {
            for range in &access.ranges {
                log::trace!("{} {} {:?} at {}", command, access.handle, range, tag);
                context.update_access(access.key, range.clone(), access.usage, access.ordering, tag, None);
            }
        }
        Ok(reports)
    }

    /// Validate and record a draw in the current subpass.
    /// Attachment accesses are derived from the subpass description.
    pub fn record_draw(
        &mut self,
        command: &'static str,
        draw: &DrawAttachments,
        accesses: &[ResourceAccess],
    ) -> Result<Vec<Report>, SyncError> {
        let render_pass = self.exec.render_pass().ok_or(SyncError::RenderPassNotActive)?;
        let mut all = accesses.to_vec();
        all.extend(
            render_pass
                .draw_accesses(draw)
                .into_iter()
                .map(|attachment| attachment_access(attachment.attachment, attachment)),
        );
        self.record_command(command, &all)
    }

    /// Validate and record `vkCmdClearAttachments` in the current subpass.
    /// Each clear writes its attachment within every rect.
    pub fn record_clear_attachments(
        &mut self,
        clears: &[AttachmentClear],
        rects: &[ClearRect],
    ) -> Result<Vec<Report>, SyncError> {
        let render_pass = self.exec.render_pass().ok_or(SyncError::RenderPassNotActive)?;
        let mut accesses = Vec::new();
        for (index, clear) in clears.iter().enumerate() {
            for rect in rects {
                let cleared = skipped("pAttachments", render_pass.clear_accesses(clear, rect))?;
                accesses.extend(
                    cleared
                        .into_iter()
                        .map(|attachment| attachment_access(index, attachment)),
                );
            }
        }
        self.record_command("vkCmdClearAttachments", &accesses)
    }

    /// Validate and record a synchronization command.
    pub fn record_sync_op(&mut self, op: SyncOp) -> Result<Vec<Report>, SyncError> {
        let reports = op.validate(&self.exec, &*self.access_log, None)?;

        let command = op.command();
        let handles = op.handles();
        let mut tag = ResourceUsageTag::INVALID;
        self.command_count += 1;
        self.subcommand_count = 0;
        for (index, &sub_command_type) in op.subcommands().iter().enumerate() {
            let subtag = self.append(command, sub_command_type, &handles);
            self.subcommand_count += 1;
            if index == op.tag_index() {
                tag = subtag;
            }
        }

        op.record(&mut self.exec, tag)?;
        self.sync_ops.push(RecordedSyncOp { tag, op });
        Ok(reports)
    }

    /// Replay secondary command buffers into the current context.
    pub fn execute_commands(
        &mut self,
        secondaries: &[&CommandBufferAccessContext],
    ) -> Result<Vec<Report>, SyncError> {
        let handles: SmallVec<[NamedHandle; 2]> = secondaries
            .iter()
            .enumerate()
            .map(|(index, secondary)| NamedHandle::indexed("pCommandBuffers", index as u32, secondary.id))
            .collect();
        self.next_command_tag("vkCmdExecuteCommands", &handles);

        let mut reports = Vec::new();
        for secondary in secondaries {
            let bias = Arc::make_mut(&mut self.access_log).import(&secondary.access_log);
            let replay = ReplayState::new(secondary, bias, "vkCmdExecuteCommands");
            reports.extend(replay.validate_first_use(&mut self.exec, &*self.access_log)?);

            let recorded = secondary.access_context()?;
            self.exec.current_context_mut()?.resolve_later(recorded, bias, None);
            self.sync_ops.extend(secondary.sync_ops.iter().map(|recorded| RecordedSyncOp {
                tag: recorded.tag.offset(bias),
                op: recorded.op.clone(),
            }));
            log::debug!("{} executed {} at {}", self.id, secondary.id, bias);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HazardKind;
    use syncval_core::{AccessFlags, BufferId, PipelineStageFlags};

    fn buffer() -> BufferInfo {
        BufferInfo {
            id: BufferId(1),
            size: 256,
        }
    }

    fn transfer_write() -> StageAccess {
        StageAccess::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE)
    }

    fn transfer_read() -> StageAccess {
        StageAccess::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_READ)
    }

    #[test]
    fn tags_increase_in_recording_order() {
        let mut cb = CommandBufferAccessContext::new(CommandBufferId(1));
        let mut last = None;
        for offset in 0..8 {
            let access = ResourceAccess::buffer("dstBuffer", &buffer(), offset * 16, Some(16), transfer_write()).unwrap();
            cb.record_command("vkCmdFillBuffer", &[access]).unwrap();
            let tag = ResourceUsageTag(cb.access_log().len() as u64 - 1);
            assert!(last.map_or(true, |last| last < tag));
            last = Some(tag);
        }
    }

    #[test]
    fn malformed_access_is_rejected() {
        assert!(ResourceAccess::buffer("dstBuffer", &buffer(), 250, Some(16), transfer_write()).is_err());
    }

    #[test]
    fn reset_invalidates_old_tags() {
        let mut cb = CommandBufferAccessContext::new(CommandBufferId(1));
        let access = ResourceAccess::buffer("dstBuffer", &buffer(), 0, None, transfer_write()).unwrap();
        cb.record_command("vkCmdFillBuffer", &[access.clone()]).unwrap();
        let old = cb.stamp(ResourceUsageTag(0));
        assert!(cb.usage_record(old).is_some());

        cb.reset();
        assert!(cb.usage_record(old).is_none());
        assert!(cb.access_context().unwrap().is_empty());

        let reports = cb.record_command("vkCmdFillBuffer", &[access]).unwrap();
        assert!(reports.is_empty());
        let new = cb.stamp(ResourceUsageTag(0));
        assert_ne!(old, new);
        assert_eq!(cb.usage_record(new).unwrap().reset_count, 1);
    }

    #[test]
    fn secondary_first_use_is_checked_against_primary() {
        let mut primary = CommandBufferAccessContext::new(CommandBufferId(1));
        let write = ResourceAccess::buffer("dstBuffer", &buffer(), 0, Some(64), transfer_write()).unwrap();
        primary.record_command("vkCmdFillBuffer", &[write]).unwrap();

        let mut secondary = CommandBufferAccessContext::new(CommandBufferId(2));
        let read = ResourceAccess::buffer("srcBuffer", &buffer(), 32, Some(64), transfer_read()).unwrap();
        assert!(secondary.record_command("vkCmdCopyBuffer", &[read]).unwrap().is_empty());

        let reports = primary.execute_commands(&[&secondary]).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].hazard(), Some(HazardKind::ReadAfterWrite));
        assert_eq!(reports[0].prior_tag, Some(ResourceUsageTag(0)));

        // the secondary's read is now part of the primary
        let state = primary.access_context().unwrap().map(buffer().key()).unwrap().get(&40).unwrap();
        assert_eq!(state.last_reads()[0].tag, ResourceUsageTag(2));
    }
}
