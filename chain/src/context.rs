//! Access state maps of a recording scope and the arena owning them.

use {
    crate::{
        access::{BarrierScope, FirstAccess, ResourceAccessState, SemaphoreScope, StateHazard},
        error::SyncError,
        range_map::RangeMapExt,
        tag::{ResourceUsageTag, TagRange},
    },
    fxhash::FxHashMap,
    rangemap::RangeMap,
    slotmap::{new_key_type, SlotMap},
    smallvec::SmallVec,
    std::{ops::Range, sync::Arc},
    syncval_core::{
        AccessScope, OrderingBarrier, PipelineStageFlags, QueueId, ResourceKey, StageAccess,
        SyncBarrier, SyncExecScope, SyncOrdering,
    },
};

/// Access states of one resource.
pub type AccessStateMap = RangeMap<u64, ResourceAccessState>;

new_key_type! {
    /// Generation checked reference to a context in a `ContextArena`.
    pub struct ContextHandle;
}

/// Owner of the access contexts of a command buffer or queue batch.
///
/// Handles of removed contexts stay invalid even when their slot is reused.
#[derive(Debug, Default)]
pub struct ContextArena {
    contexts: SlotMap<ContextHandle, AccessContext>,
}

impl ContextArena {
    /// Create empty arena.
    pub fn new() -> Self {
        ContextArena {
            contexts: SlotMap::with_key(),
        }
    }

    /// Take ownership of a context.
    pub fn insert(&mut self, context: AccessContext) -> ContextHandle {
        self.contexts.insert(context)
    }

    /// Get context.
    pub fn get(&self, handle: ContextHandle) -> Result<&AccessContext, SyncError> {
        self.contexts.get(handle).ok_or(SyncError::StaleContext)
    }

    /// Get context for modification.
    pub fn get_mut(&mut self, handle: ContextHandle) -> Result<&mut AccessContext, SyncError> {
        self.contexts.get_mut(handle).ok_or(SyncError::StaleContext)
    }

    /// Get one context for modification and another one for reading.
    pub fn pair_mut(
        &mut self,
        target: ContextHandle,
        source: ContextHandle,
    ) -> Result<(&mut AccessContext, &AccessContext), SyncError> {
        match self.contexts.get_disjoint_mut([target, source]) {
            Some([target, source]) => Ok((target, source)),
            None => Err(SyncError::StaleContext),
        }
    }

    /// Remove context, invalidating its handle.
    pub fn remove(&mut self, handle: ContextHandle) -> Result<AccessContext, SyncError> {
        self.contexts.remove(handle).ok_or(SyncError::StaleContext)
    }

    /// Remove every context, invalidating all handles.
    pub fn clear(&mut self) {
        self.contexts.clear();
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Check if there are no live contexts.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    fn async_context<'a>(&'a self, reference: &'a AsyncReference) -> Result<&'a AccessContext, SyncError> {
        match &reference.context {
            AsyncContext::Sibling(handle) => self.get(*handle),
            AsyncContext::Shared(context) => Ok(&**context),
        }
    }

    /// Check `usage` against the context and every context running concurrently with it.
    pub fn detect_hazard(
        &self,
        handle: ContextHandle,
        key: ResourceKey,
        range: Range<u64>,
        usage: StageAccess,
        ordering: &OrderingBarrier,
        queue: Option<QueueId>,
    ) -> Result<Option<StateHazard>, SyncError> {
        self.detect_hazard_in(self.get(handle)?, key, range, usage, ordering, queue)
    }

    /// Same as `detect_hazard` for a context outside of the arena.
    /// Its async references are looked up in the arena.
    pub fn detect_hazard_in(
        &self,
        context: &AccessContext,
        key: ResourceKey,
        range: Range<u64>,
        usage: StageAccess,
        ordering: &OrderingBarrier,
        queue: Option<QueueId>,
    ) -> Result<Option<StateHazard>, SyncError> {
        if let Some(hazard) = context.detect_hazard(key, range.clone(), usage, ordering, queue) {
            return Ok(Some(hazard));
        }
        self.detect_async_hazard(context, key, range, usage)
    }

    fn detect_async_hazard(
        &self,
        context: &AccessContext,
        key: ResourceKey,
        range: Range<u64>,
        usage: StageAccess,
    ) -> Result<Option<StateHazard>, SyncError> {
        for reference in &context.async_refs {
            let other = self.async_context(reference)?;
            let hazard = other.detect_async_hazard(key, range.clone(), usage, reference);
            if hazard.is_some() {
                return Ok(hazard);
            }
        }
        Ok(None)
    }

    /// Check a layout transition against the context and every concurrent context.
    pub fn detect_barrier_hazard(
        &self,
        handle: ContextHandle,
        key: ResourceKey,
        range: Range<u64>,
        queue: Option<QueueId>,
        src_exec: PipelineStageFlags,
        src_access: &AccessScope,
        event_tag: Option<ResourceUsageTag>,
    ) -> Result<Option<StateHazard>, SyncError> {
        let context = self.get(handle)?;
        let hazard =
            context.detect_barrier_hazard(key, range.clone(), queue, src_exec, src_access, event_tag);
        if hazard.is_some() {
            return Ok(hazard);
        }
        self.detect_async_hazard(context, key, range, StageAccess::LAYOUT_TRANSITION)
    }

    /// Check first accesses `recorded` made within `tags` against the context.
    ///
    /// Reports at most one hazard per resource.
    pub fn detect_first_use_hazards(
        &self,
        handle: ContextHandle,
        recorded: &AccessContext,
        tags: &TagRange,
        queue: Option<QueueId>,
    ) -> Result<Vec<FirstUseHazard>, SyncError> {
        let mut keys: Vec<ResourceKey> = recorded.maps.keys().copied().collect();
        keys.sort();

        let mut hazards = Vec::new();
        'keys: for key in keys {
            let map = match recorded.maps.get(&key) {
                Some(map) => map,
                None => continue,
            };
            for (range, state) in map.iter() {
                for first in state.first_accesses() {
                    if first.tag < tags.start {
                        continue;
                    }
                    if first.tag >= tags.end {
                        break;
                    }
                    let ordering = first.ordering.barrier();
                    let hazard =
                        self.detect_hazard(handle, key, range.clone(), first.usage, &ordering, queue)?;
                    if let Some(hazard) = hazard {
                        hazards.push(FirstUseHazard {
                            key,
                            range: range.clone(),
                            recorded: *first,
                            hazard,
                        });
                        continue 'keys;
                    }
                }
            }
        }
        Ok(hazards)
    }
}

/// First access of a recorded scope conflicting with the state it is replayed onto.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirstUseHazard {
    /// Resource.
    pub key: ResourceKey,

    /// Conflicting range.
    pub range: Range<u64>,

    /// The recorded access, with its recording-time tag.
    pub recorded: FirstAccess,

    /// The conflict.
    pub hazard: StateHazard,
}

/// Context running concurrently with another one.
#[derive(Clone, Debug)]
pub enum AsyncContext {
    /// Context in the same arena, like a subpass without dependency path.
    Sibling(ContextHandle),
    /// Context of another queue batch.
    Shared(Arc<AccessContext>),
}

/// Reference to a concurrently running context.
#[derive(Clone, Debug)]
pub struct AsyncReference {
    /// The context.
    pub context: AsyncContext,

    /// Only accesses tagged at or after this race.
    pub start_tag: ResourceUsageTag,

    /// Only accesses of this queue race, if set.
    pub queue: Option<QueueId>,
}

/// Context the state of another context flows into, with barriers between them.
#[derive(Clone, Debug)]
pub struct TrackBack {
    /// Prior context.
    pub source: ContextHandle,

    /// Barriers applied to state taken from `source`.
    pub barriers: Vec<SyncBarrier>,
}

impl TrackBack {
    /// Combined first scopes of all barriers.
    pub fn source_scope(&self) -> (PipelineStageFlags, AccessScope) {
        self.barriers.iter().fold(
            (PipelineStageFlags::empty(), AccessScope::empty()),
            |(exec, access), barrier| {
                (
                    exec | barrier.src_exec_scope.exec_scope,
                    access | barrier.src_access_scope,
                )
            },
        )
    }
}

/// Transformation applied to states taken from another context.
#[derive(Clone, Copy, Debug)]
pub struct BarrierAction<'a> {
    /// Barriers to apply independently of each other.
    pub barriers: &'a [SyncBarrier],

    /// Accesses the barriers apply to.
    pub scope: BarrierScope,

    /// The barriers transition image layout.
    pub layout_transition: bool,

    /// Tag of the layout transition.
    pub tag: ResourceUsageTag,
}

impl<'a> BarrierAction<'a> {
    /// Take states as they are.
    pub fn none() -> Self {
        BarrierAction {
            barriers: &[],
            scope: BarrierScope::queue(None),
            layout_transition: false,
            tag: ResourceUsageTag::INVALID,
        }
    }

    /// Apply `barriers` with no layout transition.
    pub fn barriers(barriers: &'a [SyncBarrier]) -> Self {
        BarrierAction {
            barriers,
            ..BarrierAction::none()
        }
    }

    /// Apply to one state.
    pub fn apply(&self, state: &mut ResourceAccessState) {
        if self.barriers.is_empty() {
            if self.layout_transition {
                let empty = SyncExecScope::source(PipelineStageFlags::empty());
                state.apply_barrier(&SyncBarrier::execution(empty, empty), &self.scope, true);
                state.apply_pending_barriers(self.tag, self.scope.queue);
            }
            return;
        }
        for barrier in self.barriers {
            state.apply_barrier(barrier, &self.scope, self.layout_transition);
        }
        state.apply_pending_barriers(self.tag, self.scope.queue);
    }
}

/// Access states of every resource touched by a scope:
/// a command buffer, a subpass or a queue batch.
#[derive(Clone, Debug, Default)]
pub struct AccessContext {
    maps: FxHashMap<ResourceKey, AccessStateMap>,
    prev: SmallVec<[TrackBack; 2]>,
    src_external: Option<TrackBack>,
    dst_external: Vec<SyncBarrier>,
    async_refs: Vec<AsyncReference>,
}

fn infill_default(_: Range<u64>) -> Option<ResourceAccessState> {
    Some(ResourceAccessState::default())
}

impl AccessContext {
    /// Create empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Access states of one resource.
    pub fn map(&self, key: ResourceKey) -> Option<&AccessStateMap> {
        self.maps.get(&key)
    }

    /// Resources with recorded states.
    pub fn keys(&self) -> impl Iterator<Item = ResourceKey> + '_ {
        self.maps.keys().copied()
    }

    /// Check if no state is recorded.
    pub fn is_empty(&self) -> bool {
        self.maps.values().all(|map| map.is_empty())
    }

    /// Prior contexts this one took state from.
    pub fn prev(&self) -> &[TrackBack] {
        &self.prev
    }

    /// Record a prior context.
    pub fn add_prev(&mut self, track_back: TrackBack) {
        self.prev.push(track_back);
    }

    /// Prior context outside of the render pass.
    pub fn src_external(&self) -> Option<&TrackBack> {
        self.src_external.as_ref()
    }

    /// Set prior context outside of the render pass.
    pub fn set_src_external(&mut self, track_back: TrackBack) {
        self.src_external = Some(track_back);
    }

    /// Barriers applied when this context is resolved out of the render pass.
    pub fn dst_external(&self) -> &[SyncBarrier] {
        &self.dst_external
    }

    /// Set barriers applied when this context is resolved out of the render pass.
    pub fn set_dst_external(&mut self, barriers: Vec<SyncBarrier>) {
        self.dst_external = barriers;
    }

    /// Concurrently running contexts.
    pub fn async_refs(&self) -> &[AsyncReference] {
        &self.async_refs
    }

    /// Add a concurrently running context.
    pub fn add_async(&mut self, reference: AsyncReference) {
        self.async_refs.push(reference);
    }

    /// Forget concurrently running contexts.
    pub fn clear_async(&mut self) {
        self.async_refs.clear();
    }

    /// Find the first state of `range` conflicting with `usage`.
    pub fn detect_hazard(
        &self,
        key: ResourceKey,
        range: Range<u64>,
        usage: StageAccess,
        ordering: &OrderingBarrier,
        queue: Option<QueueId>,
    ) -> Option<StateHazard> {
        let map = self.maps.get(&key).filter(|_| range.start < range.end)?;
        map.overlapping(&range)
            .find_map(|(_, state)| state.detect_ordered_hazard(usage, ordering, queue))
    }

    /// Find the first state of `range` racing with `usage`.
    pub fn detect_async_hazard(
        &self,
        key: ResourceKey,
        range: Range<u64>,
        usage: StageAccess,
        reference: &AsyncReference,
    ) -> Option<StateHazard> {
        let map = self.maps.get(&key).filter(|_| range.start < range.end)?;
        map.overlapping(&range).find_map(|(_, state)| {
            state.detect_async_hazard(usage, reference.start_tag, reference.queue)
        })
    }

    /// Find the first state of `range` a layout transition with the given source scope
    /// is not ordered after.
    pub fn detect_barrier_hazard(
        &self,
        key: ResourceKey,
        range: Range<u64>,
        queue: Option<QueueId>,
        src_exec: PipelineStageFlags,
        src_access: &AccessScope,
        event_tag: Option<ResourceUsageTag>,
    ) -> Option<StateHazard> {
        let map = self.maps.get(&key).filter(|_| range.start < range.end)?;
        map.overlapping(&range).find_map(|(_, state)| match event_tag {
            Some(before) => state.detect_event_barrier_hazard(queue, src_exec, src_access, before),
            None => state.detect_barrier_hazard(queue, src_exec, src_access),
        })
    }

    /// Record an access of every byte of `range`.
    pub fn update_access(
        &mut self,
        key: ResourceKey,
        range: Range<u64>,
        usage: StageAccess,
        ordering: SyncOrdering,
        tag: ResourceUsageTag,
        queue: Option<QueueId>,
    ) {
        self.maps.entry(key).or_default().update_range(
            range,
            infill_default,
            |_, state| state.update(usage, ordering, tag, queue),
        );
    }

    /// Apply barrier to states of `range`. Layout transitions also create missing states.
    /// Takes effect with `apply_pending`.
    pub fn apply_barrier_range(
        &mut self,
        key: ResourceKey,
        range: Range<u64>,
        barrier: &SyncBarrier,
        scope: &BarrierScope,
        layout_transition: bool,
    ) {
        let infill = |_: Range<u64>| {
            if layout_transition {
                Some(ResourceAccessState::default())
            } else {
                None
            }
        };
        self.maps.entry(key).or_default().update_range(range, infill, |_, state| {
            state.apply_barrier(barrier, scope, layout_transition)
        });
    }

    /// Apply barrier to every state. Takes effect with `apply_pending`.
    pub fn apply_barrier(&mut self, barrier: &SyncBarrier, scope: &BarrierScope) {
        for map in self.maps.values_mut() {
            map.update_each(|_, state| state.apply_barrier(barrier, scope, false));
        }
    }

    /// Apply every pending barrier.
    pub fn apply_pending(&mut self, tag: ResourceUsageTag, queue: Option<QueueId>) {
        for map in self.maps.values_mut() {
            map.update_each(|_, state| state.apply_pending_barriers(tag, queue));
        }
    }

    /// Merge states of a concurrently reached context after applying `action` to them.
    pub fn resolve_from_context(&mut self, from: &AccessContext, action: &BarrierAction<'_>) {
        for (&key, from_map) in &from.maps {
            let target = self.maps.entry(key).or_default();
            for (range, state) in from_map.iter() {
                let mut state = state.clone();
                action.apply(&mut state);
                target.update_range(range.clone(), infill_default, |_, mine| mine.resolve(&state));
            }
        }
    }

    /// Merge states of `range` of a concurrently reached context after applying `action`.
    /// Layout transitions also apply to bytes `from` has no state for.
    pub fn resolve_range_from_context(
        &mut self,
        from: &AccessContext,
        key: ResourceKey,
        range: Range<u64>,
        action: &BarrierAction<'_>,
    ) {
        if range.start >= range.end {
            return;
        }
        let mut pieces: Vec<(Range<u64>, ResourceAccessState)> = Vec::new();
        let mut cursor = range.start;
        if let Some(from_map) = from.maps.get(&key) {
            for (piece, state) in from_map.overlapping(&range) {
                let piece = piece.start.max(range.start)..piece.end.min(range.end);
                if action.layout_transition && piece.start > cursor {
                    pieces.push((cursor..piece.start, ResourceAccessState::default()));
                }
                cursor = piece.end;
                pieces.push((piece, state.clone()));
            }
        }
        if action.layout_transition && cursor < range.end {
            pieces.push((cursor..range.end, ResourceAccessState::default()));
        }

        let target = self.maps.entry(key).or_default();
        for (piece, mut state) in pieces {
            action.apply(&mut state);
            target.update_range(piece, infill_default, |_, mine| mine.resolve(&state));
        }
    }

    /// Append states recorded after this context,
    /// moving their tags by `bias` and attributing them to `queue`.
    pub fn resolve_later(&mut self, later: &AccessContext, bias: u64, queue: Option<QueueId>) {
        for (&key, later_map) in &later.maps {
            let target = self.maps.entry(key).or_default();
            for (range, state) in later_map.iter() {
                let mut state = state.clone();
                state.offset(bias, queue);
                target.update_range(range.clone(), infill_default, |_, mine| {
                    mine.resolve_later(&state)
                });
            }
        }
    }

    /// Forget states of `range`.
    pub fn erase_range(&mut self, key: ResourceKey, range: Range<u64>) {
        if range.start >= range.end {
            return;
        }
        if let Some(map) = self.maps.get_mut(&key) {
            map.remove(range);
        }
    }

    /// Apply a semaphore signal-wait pair to every state.
    pub fn apply_semaphore(&mut self, signal: &SemaphoreScope, wait: &SemaphoreScope) {
        for map in self.maps.values_mut() {
            map.update_each(|_, state| state.apply_semaphore(signal, wait));
        }
    }

    /// Forget accesses known to be complete.
    pub fn apply_wait(
        &mut self,
        completed: impl Fn(Option<QueueId>, ResourceUsageTag, StageAccess) -> bool,
    ) {
        for map in self.maps.values_mut() {
            map.retain_each(|_, state| !state.apply_wait(&completed));
        }
        self.maps.retain(|_, map| !map.is_empty());
    }

    /// Drop replay-only information and merge equal neighbours.
    pub fn trim(&mut self) {
        for map in self.maps.values_mut() {
            map.update_each(|_, state| state.trim());
            map.retain_each(|_, state| !state.is_empty());
        }
        self.maps.retain(|_, map| !map.is_empty());
    }

    /// Push every tag referenced by states.
    pub fn collect_tags(&self, tags: &mut Vec<ResourceUsageTag>) {
        for map in self.maps.values() {
            for (_, state) in map.iter() {
                state.collect_tags(tags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncval_core::{AccessFlags, BufferId};

    const BUFFER: ResourceKey = ResourceKey::Buffer(BufferId(1));

    fn transfer_write() -> StageAccess {
        StageAccess::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE)
    }

    fn shader_read() -> StageAccess {
        StageAccess::new(PipelineStageFlags::COMPUTE_SHADER, AccessFlags::SHADER_READ)
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut arena = ContextArena::new();
        let first = arena.insert(AccessContext::new());
        arena.remove(first).unwrap();
        let second = arena.insert(AccessContext::new());
        assert_ne!(first, second);
        assert_eq!(arena.get(first).err(), Some(SyncError::StaleContext));
        assert!(arena.get(second).is_ok());

        arena.clear();
        assert_eq!(arena.get(second).err(), Some(SyncError::StaleContext));
        assert!(arena.is_empty());
    }

    #[test]
    fn pair_mut_borrows_two_contexts() {
        let mut arena = ContextArena::new();
        let a = arena.insert(AccessContext::new());
        let b = arena.insert(AccessContext::new());
        arena
            .get_mut(b)
            .unwrap()
            .update_access(BUFFER, 0..16, transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        let (target, source) = arena.pair_mut(a, b).unwrap();
        target.resolve_from_context(source, &BarrierAction::none());
        assert!(arena.get(a).unwrap().map(BUFFER).is_some());
        assert!(arena.pair_mut(a, a).is_err());
    }

    #[test]
    fn pair_mut_rejects_removed_context() {
        let mut arena = ContextArena::new();
        let a = arena.insert(AccessContext::new());
        let b = arena.insert(AccessContext::new());
        arena.remove(b).unwrap();
        assert_eq!(arena.pair_mut(a, b).err(), Some(SyncError::StaleContext));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn range_resolve_keeps_outside_bytes() {
        let mut from = AccessContext::new();
        from.update_access(BUFFER, 0..64, transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        let mut context = AccessContext::new();
        context.resolve_range_from_context(&from, BUFFER, 16..32, &BarrierAction::none());

        let ranges: Vec<Range<u64>> = context
            .map(BUFFER)
            .unwrap()
            .iter()
            .map(|(range, _)| range.clone())
            .collect();
        assert_eq!(ranges, vec![16..32]);
        assert_eq!(
            context.detect_hazard(BUFFER, 0..16, shader_read(), &OrderingBarrier::default(), None),
            None
        );
    }

    #[test]
    fn partial_overlap_read_after_write() {
        let mut context = AccessContext::new();
        context.update_access(BUFFER, 0..64, transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        let ordering = OrderingBarrier::default();
        let hazard = context
            .detect_hazard(BUFFER, 32..96, shader_read(), &ordering, None)
            .unwrap();
        assert_eq!(hazard.tag, ResourceUsageTag(1));
        assert_eq!(
            context.detect_hazard(BUFFER, 64..96, shader_read(), &ordering, None),
            None
        );
    }

    #[test]
    fn resolve_applies_barriers_to_copies() {
        let mut prior = AccessContext::new();
        prior.update_access(BUFFER, 0..64, transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        let barriers = [SyncBarrier::new(
            SyncExecScope::source(PipelineStageFlags::TRANSFER),
            AccessFlags::TRANSFER_WRITE,
            SyncExecScope::destination(PipelineStageFlags::COMPUTE_SHADER),
            AccessFlags::SHADER_READ,
        )];
        let mut next = AccessContext::new();
        next.resolve_from_context(&prior, &BarrierAction::barriers(&barriers));

        let ordering = OrderingBarrier::default();
        assert_eq!(next.detect_hazard(BUFFER, 0..64, shader_read(), &ordering, None), None);
        assert!(prior
            .detect_hazard(BUFFER, 0..64, shader_read(), &ordering, None)
            .is_some());
    }

    #[test]
    fn async_sibling_races() {
        let mut arena = ContextArena::new();
        let mut sibling = AccessContext::new();
        sibling.update_access(BUFFER, 0..8, transfer_write(), SyncOrdering::None, ResourceUsageTag(5), None);
        let sibling = arena.insert(sibling);

        let mut context = AccessContext::new();
        context.add_async(AsyncReference {
            context: AsyncContext::Sibling(sibling),
            start_tag: ResourceUsageTag(3),
            queue: None,
        });
        let handle = arena.insert(context);

        let hazard = arena
            .detect_hazard(handle, BUFFER, 0..8, shader_read(), &OrderingBarrier::default(), None)
            .unwrap()
            .unwrap();
        assert!(hazard.kind.is_race());
    }

    #[test]
    fn trim_consolidates_equal_states() {
        let mut context = AccessContext::new();
        context.update_access(BUFFER, 0..8, transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        context.update_access(BUFFER, 8..16, transfer_write(), SyncOrdering::None, ResourceUsageTag(1), None);
        context.trim();
        assert_eq!(context.map(BUFFER).unwrap().iter().count(), 1);

        let mut tags = Vec::new();
        context.collect_tags(&mut tags);
        assert_eq!(tags, vec![ResourceUsageTag(1)]);
    }
}
