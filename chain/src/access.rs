//! Access history of a memory range and the hazard decision function.

use {
    crate::{error::HazardKind, tag::ResourceUsageTag},
    smallvec::SmallVec,
    syncval_core::{
        AccessFlags, AccessScope, OrderingBarrier, PipelineStageFlags, QueueId, StageAccess,
        SyncBarrier, SyncExecScope, SyncOrdering,
    },
};

/// Most recent write of a range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteState {
    /// The write.
    pub access: StageAccess,

    /// Accesses the write is made visible to by barriers.
    pub barriers: AccessScope,

    /// Stages the write is ordered before by barriers.
    pub dependency_chain: PipelineStageFlags,

    /// Tag of the write.
    pub tag: ResourceUsageTag,

    /// Queue that performed the write. `None` until submitted.
    pub queue: Option<QueueId>,
}

impl WriteState {
    fn in_chain(&self, src_exec: PipelineStageFlags) -> bool {
        self.dependency_chain.intersects(src_exec)
    }

    fn in_source_scope_or_chain(
        &self,
        queue: Option<QueueId>,
        src_exec: PipelineStageFlags,
        src_access: &AccessScope,
    ) -> bool {
        self.in_chain(src_exec) || (self.queue == queue && src_access.contains(self.access))
    }
}

/// Most recent read of a range at one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadState {
    /// The read. Its stage is a single bit.
    pub access: StageAccess,

    /// Stages the read is ordered before by barriers.
    pub barriers: PipelineStageFlags,

    /// Tag of the read.
    pub tag: ResourceUsageTag,

    /// Queue that performed the read. `None` until submitted.
    pub queue: Option<QueueId>,

    pending_dep_chain: PipelineStageFlags,
}

impl ReadState {
    fn new(access: StageAccess, tag: ResourceUsageTag, queue: Option<QueueId>) -> Self {
        ReadState {
            access,
            barriers: PipelineStageFlags::empty(),
            tag,
            queue,
            pending_dep_chain: PipelineStageFlags::empty(),
        }
    }

    /// The read stage counts only for barriers on its own queue.
    fn in_scope_or_chain(&self, queue: Option<QueueId>, exec_scope: PipelineStageFlags) -> bool {
        let own = if self.queue == queue {
            self.access.stage
        } else {
            PipelineStageFlags::empty()
        };
        exec_scope.intersects(own | self.barriers)
    }
}

/// Access recorded before the first write of a scope.
/// Replay checks these against the state the scope is executed on top of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FirstAccess {
    /// Tag of the access.
    pub tag: ResourceUsageTag,

    /// The access.
    pub usage: StageAccess,

    /// Ordering the access was recorded with.
    pub ordering: SyncOrdering,
}

/// Conflict found in one access state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateHazard {
    /// Kind of conflict.
    pub kind: HazardKind,

    /// Prior access conflicting with the checked one.
    pub prior: StageAccess,

    /// Tag of the prior access.
    pub tag: ResourceUsageTag,

    /// Queue of the prior access.
    pub queue: Option<QueueId>,
}

/// Which accesses a barrier applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierScope {
    /// Queue executing the barrier.
    pub queue: Option<QueueId>,

    /// Only accesses tagged before this are affected. Set for event waits.
    pub before: Option<ResourceUsageTag>,
}

impl BarrierScope {
    /// Barrier affecting every prior access.
    pub fn queue(queue: Option<QueueId>) -> Self {
        BarrierScope {
            queue,
            before: None,
        }
    }

    fn includes(&self, tag: ResourceUsageTag) -> bool {
        self.before.map_or(true, |before| tag < before)
    }
}

/// One side of a semaphore operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreScope {
    /// Queue signaling or waiting.
    pub queue: Option<QueueId>,

    /// Stages of the operation.
    pub exec: SyncExecScope,
}

/// Access history of a memory range.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceAccessState {
    write: Option<WriteState>,
    reads: SmallVec<[ReadState; 3]>,
    read_stages: PipelineStageFlags,
    read_execution_barriers: PipelineStageFlags,
    input_attachment_read: bool,

    pending_write_barriers: AccessScope,
    pending_write_dep_chain: PipelineStageFlags,
    pending_layout_transition: bool,

    first_accesses: SmallVec<[FirstAccess; 3]>,
    first_read_stages: PipelineStageFlags,
}

fn hazard_kind(base: HazardKind, usage: StageAccess, prior: StageAccess) -> HazardKind {
    if usage.access == AccessFlags::PRESENTED {
        match base {
            HazardKind::WriteAfterRead => HazardKind::PresentAfterRead,
            HazardKind::WriteAfterWrite => HazardKind::PresentAfterWrite,
            other => other,
        }
    } else if prior.access == AccessFlags::PRESENTED {
        match base {
            HazardKind::ReadAfterWrite => HazardKind::ReadAfterPresent,
            HazardKind::WriteAfterWrite => HazardKind::WriteAfterPresent,
            other => other,
        }
    } else {
        base
    }
}

impl ResourceAccessState {
    /// Most recent write.
    pub fn last_write(&self) -> Option<&WriteState> {
        self.write.as_ref()
    }

    /// Reads since the most recent write, one per stage.
    pub fn last_reads(&self) -> &[ReadState] {
        &self.reads
    }

    /// Accesses up to and including the first write.
    pub fn first_accesses(&self) -> &[FirstAccess] {
        &self.first_accesses
    }

    /// Check if no access is recorded.
    pub fn is_empty(&self) -> bool {
        self.write.is_none()
            && self.reads.is_empty()
            && self.first_accesses.is_empty()
            && !self.pending_layout_transition
    }

    fn write_tag(&self) -> Option<ResourceUsageTag> {
        self.write.as_ref().map(|write| write.tag)
    }

    fn hazard(
        &self,
        base: HazardKind,
        usage: StageAccess,
        prior: StageAccess,
        tag: ResourceUsageTag,
        queue: Option<QueueId>,
    ) -> StateHazard {
        StateHazard {
            kind: hazard_kind(base, usage, prior),
            prior,
            tag,
            queue,
        }
    }

    fn ordered_stages(&self, ordering: &OrderingBarrier) -> PipelineStageFlags {
        let mut ordered = self.read_stages & ordering.exec_scope;
        let input_attachment_ordering = ordering.access_scope.contains(StageAccess::new(
            PipelineStageFlags::FRAGMENT_SHADER,
            AccessFlags::INPUT_ATTACHMENT_READ,
        ));
        if input_attachment_ordering && self.input_attachment_read {
            ordered |= PipelineStageFlags::FRAGMENT_SHADER;
        }
        ordered
    }

    /// Check `usage` against the recorded history.
    pub fn detect_hazard(
        &self,
        usage: StageAccess,
        ordering: SyncOrdering,
        queue: Option<QueueId>,
    ) -> Option<StateHazard> {
        self.detect_ordered_hazard(usage, &ordering.barrier(), queue)
    }

    /// Check `usage` against the recorded history,
    /// treating accesses in `ordering` as implicitly ordered.
    ///
    /// Layout transitions are checked as barriers with `ordering` as the source scope.
    pub fn detect_ordered_hazard(
        &self,
        usage: StageAccess,
        ordering: &OrderingBarrier,
        queue: Option<QueueId>,
    ) -> Option<StateHazard> {
        if usage.access == AccessFlags::LAYOUT_TRANSITION {
            return self.detect_barrier_hazard(queue, ordering.exec_scope, &ordering.access_scope);
        }

        let last_write_is_ordered = self
            .write
            .as_ref()
            .map_or(false, |write| ordering.access_scope.contains(write.access));

        if usage.is_read() {
            let write = self.write.as_ref()?;
            let mut is_raw = !self.read_execution_barriers.intersects(usage.stage)
                && !write.barriers.contains(usage);
            if is_raw {
                let input_attachment_ordering = ordering.access_scope.contains(StageAccess::new(
                    PipelineStageFlags::FRAGMENT_SHADER,
                    AccessFlags::INPUT_ATTACHMENT_READ,
                ));
                let usage_is_ordered = (input_attachment_ordering
                    && usage.access == AccessFlags::INPUT_ATTACHMENT_READ)
                    || usage.stage.intersects(ordering.exec_scope);
                if usage_is_ordered {
                    let most_recent_is_ordered =
                        last_write_is_ordered || !self.ordered_stages(ordering).is_empty();
                    is_raw = !most_recent_is_ordered;
                }
            }
            if is_raw {
                return Some(self.hazard(
                    HazardKind::ReadAfterWrite,
                    usage,
                    write.access,
                    write.tag,
                    write.queue,
                ));
            }
            return None;
        }

        let usage_write_is_ordered = ordering.access_scope.contains(usage);
        if !self.reads.is_empty() {
            let ordered_stages = if usage_write_is_ordered {
                self.ordered_stages(ordering)
            } else {
                PipelineStageFlags::empty()
            };
            if !ordered_stages.contains(self.read_stages) {
                for read in &self.reads {
                    if read.access.stage.intersects(ordered_stages) {
                        continue;
                    }
                    if !read.barriers.contains(usage.stage) {
                        return Some(self.hazard(
                            HazardKind::WriteAfterRead,
                            usage,
                            read.access,
                            read.tag,
                            read.queue,
                        ));
                    }
                }
            }
        } else if let Some(write) = &self.write {
            if !(last_write_is_ordered && usage_write_is_ordered) && !write.barriers.contains(usage)
            {
                return Some(self.hazard(
                    HazardKind::WriteAfterWrite,
                    usage,
                    write.access,
                    write.tag,
                    write.queue,
                ));
            }
        }
        None
    }

    /// Check an image layout transition performed by a barrier with the given source scope.
    pub fn detect_barrier_hazard(
        &self,
        queue: Option<QueueId>,
        src_exec: PipelineStageFlags,
        src_access: &AccessScope,
    ) -> Option<StateHazard> {
        let usage = StageAccess::LAYOUT_TRANSITION;
        if !self.reads.is_empty() {
            return self
                .reads
                .iter()
                .find(|read| !read.in_scope_or_chain(queue, src_exec))
                .map(|read| {
                    self.hazard(
                        HazardKind::WriteAfterRead,
                        usage,
                        read.access,
                        read.tag,
                        read.queue,
                    )
                });
        }

        let write = self.write.as_ref()?;
        let unordered = if write.access.access == AccessFlags::LAYOUT_TRANSITION {
            // Transitions on one queue are ordered with each other.
            write.queue != queue && !write.in_chain(src_exec)
        } else {
            !write.in_source_scope_or_chain(queue, src_exec, src_access)
        };

        if unordered {
            Some(self.hazard(
                HazardKind::WriteAfterWrite,
                usage,
                write.access,
                write.tag,
                write.queue,
            ))
        } else {
            None
        }
    }

    /// Check a layout transition of an event wait.
    /// Accesses at or after the set tagged `before` cannot be in its first scope.
    pub fn detect_event_barrier_hazard(
        &self,
        queue: Option<QueueId>,
        src_exec: PipelineStageFlags,
        src_access: &AccessScope,
        before: ResourceUsageTag,
    ) -> Option<StateHazard> {
        let usage = StageAccess::LAYOUT_TRANSITION;
        if let Some(write) = self.write.as_ref().filter(|write| write.tag >= before) {
            return Some(self.hazard(
                HazardKind::WriteAfterWrite,
                usage,
                write.access,
                write.tag,
                write.queue,
            ));
        }
        if let Some(read) = self.reads.iter().find(|read| read.tag >= before) {
            return Some(self.hazard(
                HazardKind::WriteAfterRead,
                usage,
                read.access,
                read.tag,
                read.queue,
            ));
        }
        self.detect_barrier_hazard(queue, src_exec, src_access)
    }

    /// Check `usage` against accesses of a scope running concurrently.
    ///
    /// Only accesses tagged at or after `start` count, and only those of `queue` if given.
    pub fn detect_async_hazard(
        &self,
        usage: StageAccess,
        start: ResourceUsageTag,
        queue: Option<QueueId>,
    ) -> Option<StateHazard> {
        let counts = |tag: ResourceUsageTag, by: Option<QueueId>| {
            tag >= start && queue.map_or(true, |queue| by == Some(queue))
        };

        if let Some(write) = self.write.as_ref().filter(|write| counts(write.tag, write.queue)) {
            let kind = if usage.is_read() {
                HazardKind::ReadRacingWrite
            } else {
                HazardKind::WriteRacingWrite
            };
            return Some(self.hazard(kind, usage, write.access, write.tag, write.queue));
        }

        if usage.is_read() {
            return None;
        }

        self.reads
            .iter()
            .find(|read| counts(read.tag, read.queue))
            .map(|read| {
                self.hazard(
                    HazardKind::WriteRacingRead,
                    usage,
                    read.access,
                    read.tag,
                    read.queue,
                )
            })
    }

    /// Record an access.
    pub fn update(
        &mut self,
        usage: StageAccess,
        ordering: SyncOrdering,
        tag: ResourceUsageTag,
        queue: Option<QueueId>,
    ) {
        if usage.is_read() {
            let read = ReadState::new(usage, tag, queue);
            self.add_read(read);
            self.recompute_read_barriers();
        } else {
            self.set_write(usage, tag, queue);
        }
        self.update_first(tag, usage, ordering);
    }

    fn add_read(&mut self, read: ReadState) {
        let stage = read.access.stage;
        if self.read_stages.intersects(stage) {
            if let Some(existing) = self.reads.iter_mut().find(|r| r.access.stage == stage) {
                *existing = read;
            }
        } else {
            self.reads.push(read);
            self.read_stages |= stage;
        }
        if stage == PipelineStageFlags::FRAGMENT_SHADER {
            self.input_attachment_read = read.access.access == AccessFlags::INPUT_ATTACHMENT_READ;
        }
    }

    fn recompute_read_barriers(&mut self) {
        self.read_execution_barriers = self
            .reads
            .iter()
            .fold(PipelineStageFlags::empty(), |acc, read| acc | read.barriers);
    }

    fn set_write(&mut self, usage: StageAccess, tag: ResourceUsageTag, queue: Option<QueueId>) {
        self.reads.clear();
        self.read_stages = PipelineStageFlags::empty();
        self.read_execution_barriers = PipelineStageFlags::empty();
        self.input_attachment_read = false;
        self.write = Some(WriteState {
            access: usage,
            barriers: AccessScope::empty(),
            dependency_chain: PipelineStageFlags::empty(),
            tag,
            queue,
        });
    }

    fn update_first(&mut self, tag: ResourceUsageTag, usage: StageAccess, ordering: SyncOrdering) {
        let open = self
            .first_accesses
            .last()
            .map_or(true, |first| first.usage.is_read());
        if !open {
            return;
        }
        let stage = if usage.is_read() {
            usage.stage
        } else {
            PipelineStageFlags::empty()
        };
        if stage.intersects(self.first_read_stages) {
            return;
        }
        self.first_read_stages |= stage;
        if !self.read_execution_barriers.intersects(stage) {
            self.first_accesses.push(FirstAccess {
                tag,
                usage,
                ordering,
            });
        }
    }

    /// Apply a barrier. Takes effect with `apply_pending_barriers`,
    /// so every barrier of one command sees the same prior state.
    pub fn apply_barrier(
        &mut self,
        barrier: &SyncBarrier,
        scope: &BarrierScope,
        layout_transition: bool,
    ) {
        let src_exec = barrier.src_exec_scope.exec_scope;
        let write_in_scope = self.write.as_ref().map_or(false, |write| {
            scope.includes(write.tag)
                && write.in_source_scope_or_chain(scope.queue, src_exec, &barrier.src_access_scope)
        });

        if layout_transition || write_in_scope {
            self.pending_write_barriers |= barrier.dst_access_scope;
            self.pending_write_dep_chain |= barrier.dst_exec_scope.exec_scope;
        }
        self.pending_layout_transition |= layout_transition;

        if !self.pending_layout_transition {
            for read in &mut self.reads {
                if scope.includes(read.tag) && read.in_scope_or_chain(scope.queue, src_exec) {
                    read.pending_dep_chain |= barrier.dst_exec_scope.exec_scope;
                }
            }
        }
    }

    /// Apply barriers collected by `apply_barrier`.
    /// A pending layout transition becomes a write tagged `tag`.
    pub fn apply_pending_barriers(&mut self, tag: ResourceUsageTag, queue: Option<QueueId>) {
        if self.pending_layout_transition {
            self.set_write(StageAccess::LAYOUT_TRANSITION, tag, queue);
            self.update_first(tag, StageAccess::LAYOUT_TRANSITION, SyncOrdering::None);
            self.pending_layout_transition = false;
        }

        for read in &mut self.reads {
            read.barriers |= read.pending_dep_chain;
            read.pending_dep_chain = PipelineStageFlags::empty();
        }
        self.recompute_read_barriers();

        if let Some(write) = &mut self.write {
            write.dependency_chain |= self.pending_write_dep_chain;
            write.barriers |= self.pending_write_barriers;
        }
        self.pending_write_dep_chain = PipelineStageFlags::empty();
        self.pending_write_barriers = AccessScope::empty();
    }

    /// Merge state of a concurrently reached predecessor.
    ///
    /// The later write wins. With equal writes barriers and reads are merged,
    /// so merging the same state twice changes nothing.
    pub fn resolve(&mut self, other: &ResourceAccessState) {
        let firsts = std::mem::replace(&mut self.first_accesses, SmallVec::new());
        let first_read_stages = self.first_read_stages;

        if self.write_tag() < other.write_tag() {
            *self = other.clone();
        } else if self.write_tag() == other.write_tag() {
            if let (Some(write), Some(other_write)) = (&mut self.write, &other.write) {
                write.barriers |= other_write.barriers;
                write.dependency_chain |= other_write.dependency_chain;
            }
            self.pending_write_barriers |= other.pending_write_barriers;
            self.pending_write_dep_chain |= other.pending_write_dep_chain;
            self.pending_layout_transition |= other.pending_layout_transition;

            for other_read in &other.reads {
                match self
                    .reads
                    .iter_mut()
                    .find(|read| read.access.stage == other_read.access.stage)
                {
                    Some(read) if read.tag < other_read.tag => {
                        *read = *other_read;
                        if read.access.stage == PipelineStageFlags::FRAGMENT_SHADER {
                            self.input_attachment_read = other.input_attachment_read;
                        }
                    }
                    Some(read) if read.tag == other_read.tag => {
                        read.barriers |= other_read.barriers;
                        read.pending_dep_chain |= other_read.pending_dep_chain;
                    }
                    Some(_) => {}
                    None => {
                        self.reads.push(*other_read);
                        self.read_stages |= other_read.access.stage;
                        if other_read.access.stage == PipelineStageFlags::FRAGMENT_SHADER {
                            self.input_attachment_read = other.input_attachment_read;
                        }
                    }
                }
            }
            self.recompute_read_barriers();
        }

        self.merge_first_accesses(firsts, first_read_stages, &other.first_accesses);
    }

    fn merge_first_accesses(
        &mut self,
        mine: SmallVec<[FirstAccess; 3]>,
        first_read_stages: PipelineStageFlags,
        theirs: &[FirstAccess],
    ) {
        if mine.as_slice() == theirs || theirs.is_empty() {
            self.first_accesses = mine;
            self.first_read_stages = first_read_stages;
            return;
        }

        let mut all: SmallVec<[FirstAccess; 6]> = mine.iter().chain(theirs).copied().collect();
        all.sort_by_key(|first| first.tag);
        all.dedup();
        self.first_accesses.clear();
        self.first_read_stages = PipelineStageFlags::empty();
        self.append_first_accesses(&all);
    }

    fn append_first_accesses(&mut self, later: &[FirstAccess]) {
        for first in later {
            if self
                .first_accesses
                .last()
                .map_or(false, |last| !last.usage.is_read())
            {
                break;
            }
            if first.usage.is_read() {
                if first.usage.stage.intersects(self.first_read_stages) {
                    continue;
                }
                self.first_read_stages |= first.usage.stage;
            }
            self.first_accesses.push(*first);
        }
    }

    /// Append state recorded strictly after this one, such as an executed command buffer.
    pub fn resolve_later(&mut self, later: &ResourceAccessState) {
        let firsts = std::mem::replace(&mut self.first_accesses, SmallVec::new());
        let first_read_stages = self.first_read_stages;

        if later.write.is_some() {
            *self = later.clone();
        } else {
            for read in &later.reads {
                self.add_read(*read);
            }
            self.recompute_read_barriers();
        }

        self.first_accesses = firsts;
        self.first_read_stages = first_read_stages;
        self.append_first_accesses(&later.first_accesses);
    }

    /// Move every tag by `bias` and attribute the accesses to `queue`.
    pub fn offset(&mut self, bias: u64, queue: Option<QueueId>) {
        if let Some(write) = &mut self.write {
            write.tag = write.tag.offset(bias);
            write.queue = queue;
        }
        for read in &mut self.reads {
            read.tag = read.tag.offset(bias);
            read.queue = queue;
        }
        for first in &mut self.first_accesses {
            first.tag = first.tag.offset(bias);
        }
    }

    /// Order accesses in the first scope of `signal` before the second scope of `wait`.
    /// Accesses outside the first scope lose every barrier.
    pub fn apply_semaphore(&mut self, signal: &SemaphoreScope, wait: &SemaphoreScope) {
        for read in &mut self.reads {
            read.barriers = if read.in_scope_or_chain(signal.queue, signal.exec.exec_scope) {
                wait.exec.exec_scope
            } else {
                PipelineStageFlags::empty()
            };
        }
        self.recompute_read_barriers();

        if let Some(write) = &mut self.write {
            if write.in_source_scope_or_chain(
                signal.queue,
                signal.exec.exec_scope,
                &signal.exec.valid_accesses,
            ) {
                write.barriers = wait.exec.valid_accesses;
                write.dependency_chain = wait.exec.exec_scope;
            } else {
                write.barriers = AccessScope::empty();
                write.dependency_chain = PipelineStageFlags::empty();
            }
        }
    }

    /// Forget accesses known to be complete.
    /// Returns `true` if nothing is left.
    pub fn apply_wait(
        &mut self,
        completed: impl Fn(Option<QueueId>, ResourceUsageTag, StageAccess) -> bool,
    ) -> bool {
        self.reads
            .retain(|read| !completed(read.queue, read.tag, read.access));
        self.read_stages = self
            .reads
            .iter()
            .fold(PipelineStageFlags::empty(), |acc, read| acc | read.access.stage);
        if !self.read_stages.contains(PipelineStageFlags::FRAGMENT_SHADER) {
            self.input_attachment_read = false;
        }
        self.recompute_read_barriers();

        if self
            .write
            .as_ref()
            .map_or(false, |write| completed(write.queue, write.tag, write.access))
        {
            self.write = None;
        }
        self.write.is_none() && self.reads.is_empty()
    }

    /// Drop replay-only information.
    pub fn trim(&mut self) {
        self.first_accesses.clear();
        self.first_read_stages = PipelineStageFlags::empty();
    }

    /// Push every tag referenced by this state.
    pub fn collect_tags(&self, tags: &mut Vec<ResourceUsageTag>) {
        tags.extend(self.write.iter().map(|write| write.tag));
        tags.extend(self.reads.iter().map(|read| read.tag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_write() -> StageAccess {
        StageAccess::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE)
    }

    fn transfer_read() -> StageAccess {
        StageAccess::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_READ)
    }

    fn shader_read() -> StageAccess {
        StageAccess::new(PipelineStageFlags::FRAGMENT_SHADER, AccessFlags::SHADER_READ)
    }

    fn color_write() -> StageAccess {
        StageAccess::new(
            PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
    }

    fn barrier(
        src: PipelineStageFlags,
        src_access: AccessFlags,
        dst: PipelineStageFlags,
        dst_access: AccessFlags,
    ) -> SyncBarrier {
        SyncBarrier::new(
            SyncExecScope::source(src),
            src_access,
            SyncExecScope::destination(dst),
            dst_access,
        )
    }

    fn apply(state: &mut ResourceAccessState, barrier: &SyncBarrier, tag: u64) {
        state.apply_barrier(barrier, &BarrierScope::queue(None), false);
        state.apply_pending_barriers(ResourceUsageTag(tag), None);
    }

    #[test]
    fn read_after_unsynchronized_write() {
        let mut state = ResourceAccessState::default();
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(5), None);
        let hazard = state
            .detect_hazard(shader_read(), SyncOrdering::None, None)
            .unwrap();
        assert_eq!(hazard.kind, HazardKind::ReadAfterWrite);
        assert_eq!(hazard.tag, ResourceUsageTag(5));
        assert_eq!(hazard.prior, transfer_write());
    }

    #[test]
    fn reads_do_not_conflict() {
        let mut state = ResourceAccessState::default();
        state.update(transfer_read(), SyncOrdering::None, ResourceUsageTag(1), None);
        assert_eq!(state.detect_hazard(shader_read(), SyncOrdering::None, None), None);
    }

    #[test]
    fn write_after_read_and_write_after_write() {
        let mut state = ResourceAccessState::default();
        state.update(transfer_read(), SyncOrdering::None, ResourceUsageTag(1), None);
        assert_eq!(
            state
                .detect_hazard(transfer_write(), SyncOrdering::None, None)
                .map(|h| h.kind),
            Some(HazardKind::WriteAfterRead)
        );

        let mut state = ResourceAccessState::default();
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        assert_eq!(
            state
                .detect_hazard(transfer_write(), SyncOrdering::None, None)
                .map(|h| h.kind),
            Some(HazardKind::WriteAfterWrite)
        );
    }

    #[test]
    fn memory_barrier_makes_write_visible() {
        let mut state = ResourceAccessState::default();
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        apply(
            &mut state,
            &barrier(
                PipelineStageFlags::TRANSFER,
                AccessFlags::TRANSFER_WRITE,
                PipelineStageFlags::FRAGMENT_SHADER,
                AccessFlags::SHADER_READ,
            ),
            2,
        );
        assert_eq!(state.detect_hazard(shader_read(), SyncOrdering::None, None), None);
        // Visibility is limited to the destination access scope.
        assert!(state
            .detect_hazard(transfer_write(), SyncOrdering::None, None)
            .is_some());
    }

    #[test]
    fn execution_barrier_orders_read_before_write() {
        let mut state = ResourceAccessState::default();
        state.update(shader_read(), SyncOrdering::None, ResourceUsageTag(1), None);
        apply(
            &mut state,
            &SyncBarrier::execution(
                SyncExecScope::source(PipelineStageFlags::FRAGMENT_SHADER),
                SyncExecScope::destination(PipelineStageFlags::TRANSFER),
            ),
            2,
        );
        assert_eq!(state.detect_hazard(transfer_write(), SyncOrdering::None, None), None);
    }

    #[test]
    fn barriers_chain() {
        let mut state = ResourceAccessState::default();
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        apply(
            &mut state,
            &barrier(
                PipelineStageFlags::TRANSFER,
                AccessFlags::TRANSFER_WRITE,
                PipelineStageFlags::COMPUTE_SHADER,
                AccessFlags::empty(),
            ),
            2,
        );
        apply(
            &mut state,
            &barrier(
                PipelineStageFlags::COMPUTE_SHADER,
                AccessFlags::empty(),
                PipelineStageFlags::FRAGMENT_SHADER,
                AccessFlags::SHADER_READ,
            ),
            3,
        );
        assert_eq!(state.detect_hazard(shader_read(), SyncOrdering::None, None), None);
    }

    #[test]
    fn raster_order_allows_successive_attachment_writes() {
        let mut state = ResourceAccessState::default();
        state.update(color_write(), SyncOrdering::ColorAttachment, ResourceUsageTag(1), None);
        assert_eq!(
            state.detect_hazard(color_write(), SyncOrdering::ColorAttachment, None),
            None
        );
        assert!(state
            .detect_hazard(color_write(), SyncOrdering::None, None)
            .is_some());
    }

    #[test]
    fn layout_transition_becomes_write() {
        let mut state = ResourceAccessState::default();
        state.update(shader_read(), SyncOrdering::None, ResourceUsageTag(1), None);
        let transition = barrier(
            PipelineStageFlags::FRAGMENT_SHADER,
            AccessFlags::empty(),
            PipelineStageFlags::TRANSFER,
            AccessFlags::TRANSFER_WRITE,
        );
        assert_eq!(
            state.detect_barrier_hazard(
                None,
                transition.src_exec_scope.exec_scope,
                &transition.src_access_scope
            ),
            None
        );
        state.apply_barrier(&transition, &BarrierScope::queue(None), true);
        state.apply_pending_barriers(ResourceUsageTag(2), None);

        let write = state.last_write().unwrap();
        assert_eq!(write.access, StageAccess::LAYOUT_TRANSITION);
        assert_eq!(write.tag, ResourceUsageTag(2));
        assert!(state.last_reads().is_empty());
        assert_eq!(state.detect_hazard(transfer_write(), SyncOrdering::None, None), None);
        assert!(state
            .detect_hazard(shader_read(), SyncOrdering::None, None)
            .is_some());
    }

    #[test]
    fn layout_transition_after_unordered_write() {
        let mut state = ResourceAccessState::default();
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        let src = SyncExecScope::source(PipelineStageFlags::TOP_OF_PIPE);
        let hazard = state
            .detect_barrier_hazard(None, src.exec_scope, &AccessScope::empty())
            .unwrap();
        assert_eq!(hazard.kind, HazardKind::WriteAfterWrite);
    }

    #[test]
    fn event_scope_skips_later_accesses() {
        let mut state = ResourceAccessState::default();
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(4), None);
        let scope = BarrierScope {
            queue: None,
            before: Some(ResourceUsageTag(3)),
        };
        state.apply_barrier(
            &barrier(
                PipelineStageFlags::TRANSFER,
                AccessFlags::TRANSFER_WRITE,
                PipelineStageFlags::FRAGMENT_SHADER,
                AccessFlags::SHADER_READ,
            ),
            &scope,
            false,
        );
        state.apply_pending_barriers(ResourceUsageTag(5), None);
        assert!(state
            .detect_hazard(shader_read(), SyncOrdering::None, None)
            .is_some());
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut source = ResourceAccessState::default();
        source.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(3), None);
        source.update(shader_read(), SyncOrdering::None, ResourceUsageTag(4), None);

        let mut once = ResourceAccessState::default();
        once.resolve(&source);
        let mut twice = once.clone();
        twice.resolve(&source);
        assert_eq!(once, twice);
        assert_eq!(once.last_reads().len(), 1);
    }

    #[test]
    fn later_write_wins_resolution() {
        let mut older = ResourceAccessState::default();
        older.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        let mut newer = ResourceAccessState::default();
        newer.update(color_write(), SyncOrdering::None, ResourceUsageTag(9), None);

        let mut state = older.clone();
        state.resolve(&newer);
        assert_eq!(state.last_write().unwrap().tag, ResourceUsageTag(9));

        let mut state = newer.clone();
        state.resolve(&older);
        assert_eq!(state.last_write().unwrap().tag, ResourceUsageTag(9));
    }

    #[test]
    fn later_reads_append_to_prior_write() {
        let mut prior = ResourceAccessState::default();
        prior.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        let mut later = ResourceAccessState::default();
        later.update(shader_read(), SyncOrdering::None, ResourceUsageTag(0), None);
        later.offset(10, None);

        prior.resolve_later(&later);
        assert_eq!(prior.last_write().unwrap().tag, ResourceUsageTag(1));
        assert_eq!(prior.last_reads()[0].tag, ResourceUsageTag(10));
    }

    #[test]
    fn semaphore_orders_first_scope() {
        let queue = Some(QueueId::new(syncval_core::hal::queue::QueueFamilyId(0), 0));
        let mut state = ResourceAccessState::default();
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(1), queue);

        let signal = SemaphoreScope {
            queue,
            exec: SyncExecScope::source(PipelineStageFlags::ALL_COMMANDS),
        };
        let wait = SemaphoreScope {
            queue: None,
            exec: SyncExecScope::destination(PipelineStageFlags::ALL_COMMANDS),
        };
        state.apply_semaphore(&signal, &wait);
        assert_eq!(state.detect_hazard(shader_read(), SyncOrdering::None, None), None);
        assert_eq!(state.detect_hazard(transfer_write(), SyncOrdering::None, None), None);
    }

    #[test]
    fn async_hazards_respect_start_tag() {
        let mut state = ResourceAccessState::default();
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(7), None);
        assert_eq!(
            state
                .detect_async_hazard(shader_read(), ResourceUsageTag(5), None)
                .map(|h| h.kind),
            Some(HazardKind::ReadRacingWrite)
        );
        assert_eq!(
            state.detect_async_hazard(shader_read(), ResourceUsageTag(8), None),
            None
        );
    }

    #[test]
    fn first_accesses_stop_at_write() {
        let mut state = ResourceAccessState::default();
        state.update(shader_read(), SyncOrdering::None, ResourceUsageTag(1), None);
        state.update(shader_read(), SyncOrdering::None, ResourceUsageTag(2), None);
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(3), None);
        state.update(transfer_read(), SyncOrdering::None, ResourceUsageTag(4), None);
        let tags: Vec<_> = state.first_accesses().iter().map(|f| f.tag.0).collect();
        assert_eq!(tags, vec![1, 3]);
    }

    #[test]
    fn completed_accesses_are_forgotten() {
        let queue = Some(QueueId::new(syncval_core::hal::queue::QueueFamilyId(1), 0));
        let mut state = ResourceAccessState::default();
        state.update(transfer_write(), SyncOrdering::None, ResourceUsageTag(3), queue);
        assert!(!state.apply_wait(|q, tag, _| q == queue && tag.0 <= 2));
        assert!(state.apply_wait(|q, tag, _| q == queue && tag.0 <= 3));
    }
}
