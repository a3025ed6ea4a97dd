//! Event state tracked between set, reset and wait commands.

use {
    crate::tag::ResourceUsageTag,
    fxhash::FxHashMap,
    std::fmt,
    syncval_core::{EventId, PipelineStageFlags, SyncExecScope},
};

/// Event command kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCommand {
    /// `vkCmdSetEvent`.
    Set,
    /// `vkCmdResetEvent`.
    Reset,
    /// `vkCmdWaitEvents`.
    Wait,
}

impl EventCommand {
    /// Command name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            EventCommand::Set => "vkCmdSetEvent",
            EventCommand::Reset => "vkCmdResetEvent",
            EventCommand::Wait => "vkCmdWaitEvents",
        }
    }
}

impl fmt::Display for EventCommand {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.name())
    }
}

/// Inconsistent use of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventMisuse {
    /// Set or reset follows another event command with no execution barrier between them.
    MissingBarrier {
        /// Command being validated.
        command: EventCommand,
        /// Prior command on the event.
        prior: EventCommand,
    },
    /// Wait follows a reset with no execution barrier between them.
    ResetWaitRace,
    /// Wait on an event set twice without synchronization. The wait is ignored.
    SetRace {
        /// Command the unsynchronized set followed.
        prior: EventCommand,
    },
    /// Stages of the set are missing from the wait source stages. The wait is ignored.
    MissingStageBits {
        /// Stages missing.
        missing: PipelineStageFlags,
    },
    /// Wait source stages include stages no waited event was set with.
    ExtraStageBits {
        /// Stages in excess.
        extra: PipelineStageFlags,
    },
    /// Wait source stages include the host stage, which cannot be validated.
    HostStage,
}

impl EventMisuse {
    /// Name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            EventMisuse::MissingBarrier { .. } => "EVENT_MISSING_BARRIER",
            EventMisuse::ResetWaitRace => "EVENT_RESET_WAIT_RACE",
            EventMisuse::SetRace { .. } => "EVENT_SET_RACE",
            EventMisuse::MissingStageBits { .. } => "EVENT_MISSING_STAGE_BITS",
            EventMisuse::ExtraStageBits { .. } => "EVENT_EXTRA_STAGE_BITS",
            EventMisuse::HostStage => "EVENT_HOST_STAGE",
        }
    }
}

impl fmt::Display for EventMisuse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventMisuse::MissingBarrier { command, prior } => write!(
                fmt,
                "{} operation following {} without intervening execution barrier is a race condition",
                command, prior
            ),
            EventMisuse::ResetWaitRace => write!(
                fmt,
                "vkCmdWaitEvents operation following vkCmdResetEvent without intervening execution barrier may cause race condition, wait is ignored"
            ),
            EventMisuse::SetRace { prior } => write!(
                fmt,
                "vkCmdSetEvent following {} without synchronization leaves the first synchronization scope undefined, wait is ignored",
                prior
            ),
            EventMisuse::MissingStageBits { missing } => write!(
                fmt,
                "event stageMask includes {:?} not present in srcStageMask, wait is ignored",
                missing
            ),
            EventMisuse::ExtraStageBits { extra } => write!(
                fmt,
                "srcStageMask contains {:?} not present in any waited event stageMask",
                extra
            ),
            EventMisuse::HostStage => write!(
                fmt,
                "srcStageMask includes HOST, unsupported by synchronization validation"
            ),
        }
    }
}

/// First synchronization scope captured by a set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventScope {
    /// Stages of the set.
    pub exec: SyncExecScope,

    /// Tag of the set. Only accesses tagged before it are in the scope.
    pub tag: ResourceUsageTag,
}

/// Why a wait has no effect on an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Reset precedes the wait without a barrier.
    ResetWaitRace,
    /// Set raced with a prior command.
    SetRace(EventCommand),
    /// Wait source stages miss stages of the set.
    MissingStageBits(PipelineStageFlags),
    /// Event was not set in the known history.
    MissingSetEvent,
}

/// State of one event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncEventState {
    /// Last command on the event.
    pub last_command: Option<EventCommand>,

    /// Tag of the last command.
    pub last_command_tag: ResourceUsageTag,

    /// Command an unsynchronized set followed.
    pub unsynchronized_set: Option<EventCommand>,

    /// Stages the last command is ordered before.
    pub barriers: PipelineStageFlags,

    /// Scope captured by the last synchronized set.
    pub first_scope: Option<EventScope>,
}

impl SyncEventState {
    /// Check if the last event command is ordered before a command of `exec_scope`.
    pub fn has_barrier(&self, mask_param: PipelineStageFlags, exec_scope: PipelineStageFlags) -> bool {
        self.last_command.is_none()
            || mask_param.contains(PipelineStageFlags::ALL_COMMANDS)
            || self.barriers.intersects(exec_scope)
            || self.barriers.contains(PipelineStageFlags::ALL_COMMANDS)
    }

    /// Check if a wait with `src_mask` is ignored for this event.
    pub fn ignored_by_wait(&self, src_mask: PipelineStageFlags) -> Option<IgnoreReason> {
        if self.last_command == Some(EventCommand::Reset)
            && !self.has_barrier(PipelineStageFlags::empty(), PipelineStageFlags::empty())
        {
            Some(IgnoreReason::ResetWaitRace)
        } else if let Some(prior) = self.unsynchronized_set {
            Some(IgnoreReason::SetRace(prior))
        } else if let Some(scope) = &self.first_scope {
            let missing = scope.exec.mask_param - src_mask;
            if missing.is_empty() {
                None
            } else {
                Some(IgnoreReason::MissingStageBits(missing))
            }
        } else {
            Some(IgnoreReason::MissingSetEvent)
        }
    }

    /// Forget the scope of the last set.
    pub fn reset_first_scope(&mut self) {
        self.first_scope = None;
    }

    /// Record a set.
    pub fn record_set(&mut self, src: &SyncExecScope, tag: ResourceUsageTag) {
        if !self.has_barrier(src.mask_param, src.exec_scope) {
            self.unsynchronized_set = self.last_command;
            self.reset_first_scope();
        } else if self.first_scope.is_none() {
            self.first_scope = Some(EventScope { exec: *src, tag });
            self.unsynchronized_set = None;
        }
        self.last_command = Some(EventCommand::Set);
        self.last_command_tag = tag;
        self.barriers = PipelineStageFlags::empty();
    }

    /// Record a reset.
    pub fn record_reset(&mut self, tag: ResourceUsageTag) {
        self.reset_first_scope();
        self.unsynchronized_set = None;
        self.last_command = Some(EventCommand::Reset);
        self.last_command_tag = tag;
        self.barriers = PipelineStageFlags::empty();
    }

    /// Record a wait. `dst` is the wait's second scope, `None` when the wait was ignored.
    pub fn record_wait(&mut self, dst: Option<&SyncExecScope>, tag: ResourceUsageTag) {
        self.last_command = Some(EventCommand::Wait);
        self.last_command_tag = tag;
        self.barriers = match dst {
            Some(dst) => {
                (dst.mask_param & PipelineStageFlags::ALL_COMMANDS) | dst.exec_scope
            }
            None => PipelineStageFlags::empty(),
        };
    }
}

/// Event states of a command buffer or queue batch.
#[derive(Clone, Debug, Default)]
pub struct SyncEventsContext {
    map: FxHashMap<EventId, SyncEventState>,
}

impl SyncEventsContext {
    /// Create empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get state of an event.
    pub fn get(&self, event: EventId) -> Option<&SyncEventState> {
        self.map.get(&event)
    }

    /// Get state of an event, creating it on first use.
    pub fn get_or_insert(&mut self, event: EventId) -> &mut SyncEventState {
        self.map.entry(event).or_default()
    }

    /// Propagate an execution barrier recorded at `tag` to event commands before it.
    pub fn apply_barrier(&mut self, src: &SyncExecScope, dst: &SyncExecScope, tag: ResourceUsageTag) {
        let all_commands = src.mask_param.contains(PipelineStageFlags::ALL_COMMANDS);
        for state in self.map.values_mut() {
            if (state.barriers.intersects(src.exec_scope) || all_commands)
                && state.last_command_tag <= tag
            {
                state.barriers |= dst.exec_scope;
                state.barriers |= dst.mask_param & PipelineStageFlags::ALL_COMMANDS;
            }
        }
    }

    /// Push every tag referenced by event states.
    pub fn collect_tags(&self, tags: &mut Vec<ResourceUsageTag>) {
        for state in self.map.values() {
            tags.push(state.last_command_tag);
            tags.extend(state.first_scope.iter().map(|scope| scope.tag));
        }
    }

    /// Forget every event.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}
