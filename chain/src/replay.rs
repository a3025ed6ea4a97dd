//! Contexts sync ops act on and replay of recorded command buffers.

use {
    crate::{
        command::CommandBufferAccessContext,
        context::{AccessContext, ContextArena, ContextHandle},
        error::{Report, SyncError},
        events::SyncEventsContext,
        op::SyncOp,
        render_pass::RenderPassAccessContext,
        tag::{ResourceUsageTag, TagRange, UsageFormatter},
    },
    syncval_core::QueueId,
    thread_profiler::profile_scope,
};

/// Access contexts and event states of one recording or execution scope.
#[derive(Debug)]
pub struct ExecutionContext {
    pub(crate) contexts: ContextArena,
    pub(crate) root: ContextHandle,
    pub(crate) render_pass: Option<RenderPassAccessContext>,
    pub(crate) render_passes: Vec<RenderPassAccessContext>,
    pub(crate) events: SyncEventsContext,
    pub(crate) queue: Option<QueueId>,
}

impl ExecutionContext {
    /// Create scope on top of `context`. `queue` is `None` while recording.
    pub fn new(context: AccessContext, events: SyncEventsContext, queue: Option<QueueId>) -> Self {
        let mut contexts = ContextArena::new();
        let root = contexts.insert(context);
        ExecutionContext {
            contexts,
            root,
            render_pass: None,
            render_passes: Vec::new(),
            events,
            queue,
        }
    }

    /// Queue the scope executes on.
    pub fn queue(&self) -> Option<QueueId> {
        self.queue
    }

    /// Arena of every context of the scope.
    pub fn contexts(&self) -> &ContextArena {
        &self.contexts
    }

    /// Context of commands outside of render passes.
    pub fn root(&self) -> ContextHandle {
        self.root
    }

    /// Context new accesses go to: the current subpass or the root.
    pub fn current(&self) -> ContextHandle {
        self.render_pass
            .as_ref()
            .and_then(|render_pass| render_pass.current_context())
            .unwrap_or(self.root)
    }

    /// Context of commands outside of render passes.
    pub fn root_context(&self) -> Result<&AccessContext, SyncError> {
        self.contexts.get(self.root)
    }

    /// Context new accesses go to.
    pub fn current_context(&self) -> Result<&AccessContext, SyncError> {
        self.contexts.get(self.current())
    }

    /// Context new accesses go to, for modification.
    pub fn current_context_mut(&mut self) -> Result<&mut AccessContext, SyncError> {
        let current = self.current();
        self.contexts.get_mut(current)
    }

    /// Active render pass instance.
    pub fn render_pass(&self) -> Option<&RenderPassAccessContext> {
        self.render_pass.as_ref()
    }

    /// Render pass instance by the order it began in, finished or active.
    pub fn recorded_render_pass(&self, index: usize) -> Option<&RenderPassAccessContext> {
        if index < self.render_passes.len() {
            self.render_passes.get(index)
        } else if index == self.render_passes.len() {
            self.render_pass.as_ref()
        } else {
            None
        }
    }

    /// Event states.
    pub fn events(&self) -> &SyncEventsContext {
        &self.events
    }

    /// Drop render pass instances and take the root context and event states.
    pub fn into_parts(mut self) -> Result<(AccessContext, SyncEventsContext), SyncError> {
        let context = self.contexts.remove(self.root)?;
        Ok((context, self.events))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordedScope {
    Root,
    Subpass { render_pass: usize, subpass: usize },
}

/// Replay of a recorded command buffer onto the scope it executes in.
#[derive(Debug)]
pub struct ReplayState<'a> {
    recorded: &'a CommandBufferAccessContext,
    bias: u64,
    command: &'static str,
}

impl<'a> ReplayState<'a> {
    /// Replay `recorded` whose tags are moved by `bias` in the target sequence.
    /// `command` names the submission or execution in reports.
    pub fn new(recorded: &'a CommandBufferAccessContext, bias: u64, command: &'static str) -> Self {
        ReplayState {
            recorded,
            bias,
            command,
        }
    }

    fn recorded_context(&self, scope: RecordedScope) -> Result<&'a AccessContext, SyncError> {
        let exec = self.recorded.exec();
        match scope {
            RecordedScope::Root => exec.root_context(),
            RecordedScope::Subpass {
                render_pass,
                subpass,
            } => {
                let handle = exec
                    .recorded_render_pass(render_pass)
                    .and_then(|instance| instance.subpass_context(subpass))
                    .ok_or(SyncError::RenderPassNotActive)?;
                exec.contexts().get(handle)
            }
        }
    }

    fn validate_window(
        &self,
        exec: &ExecutionContext,
        scope: RecordedScope,
        tags: TagRange,
        formatter: &dyn UsageFormatter,
    ) -> Result<Vec<Report>, SyncError> {
        if tags.start >= tags.end {
            return Ok(Vec::new());
        }
        let recorded = self.recorded_context(scope)?;
        let hazards =
            exec.contexts
                .detect_first_use_hazards(exec.current(), recorded, &tags, exec.queue)?;
        Ok(hazards
            .into_iter()
            .map(|found| {
                Report::from_hazard(
                    self.command,
                    format_args!(
                        "{} [{}, {}) recorded by {}",
                        found.key,
                        found.range.start,
                        found.range.end,
                        formatter.format_usage(found.recorded.tag.offset(self.bias))
                    ),
                    found.recorded.usage,
                    &found.hazard,
                    formatter,
                )
            })
            .collect())
    }

    /// Check first accesses and sync ops of the recorded command buffer against `exec`,
    /// replaying each sync op after the accesses recorded before it.
    pub fn validate_first_use(
        &self,
        exec: &mut ExecutionContext,
        formatter: &dyn UsageFormatter,
    ) -> Result<Vec<Report>, SyncError> {
        profile_scope!("validate_first_use");

        let base = ResourceUsageTag(self.bias);
        let mut reports = Vec::new();
        let mut scope = RecordedScope::Root;
        let mut render_passes = 0;
        let mut start = ResourceUsageTag(0);

        for recorded in self.recorded.sync_ops() {
            // Subcommands of render pass ops are validated by the op itself.
            let first = ResourceUsageTag(recorded.tag.0.saturating_sub(recorded.op.tag_index() as u64));
            reports.extend(self.validate_window(exec, scope, start..first, formatter)?);
            reports.extend(recorded.op.validate(exec, formatter, Some(base))?);
            recorded.op.replay_record(exec, recorded.tag.offset(self.bias))?;
            start = first.offset(recorded.op.subcommands().len() as u64);

            scope = match (&recorded.op, scope) {
                (SyncOp::BeginRenderPass(_), _) | (SyncOp::BeginRendering(_), _) => {
                    render_passes += 1;
                    RecordedScope::Subpass {
                        render_pass: render_passes - 1,
                        subpass: 0,
                    }
                }
                (
                    SyncOp::NextSubpass,
                    RecordedScope::Subpass {
                        render_pass,
                        subpass,
                    },
                ) => RecordedScope::Subpass {
                    render_pass,
                    subpass: subpass + 1,
                },
                (SyncOp::EndRenderPass, _) | (SyncOp::EndRendering, _) => RecordedScope::Root,
                (_, scope) => scope,
            };
        }

        let end = self.recorded.access_log().next_tag();
        reports.extend(self.validate_window(exec, scope, start..end, formatter)?);
        Ok(reports)
    }
}
