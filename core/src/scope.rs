//! Execution and access scopes of synchronization commands.

use {
    crate::{access::AccessFlags, stage::PipelineStageFlags},
    std::{
        fmt,
        ops::{BitAnd, BitOr, BitOrAssign},
    },
};

const STAGE_SLOTS: usize = 32;

/// Single access performed at single stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StageAccess {
    /// Stage bit. Empty for layout transitions which belong to no stage.
    pub stage: PipelineStageFlags,

    /// Access bit.
    pub access: AccessFlags,
}

impl StageAccess {
    /// Create new stage access pair.
    pub const fn new(stage: PipelineStageFlags, access: AccessFlags) -> Self {
        StageAccess { stage, access }
    }

    /// Image layout transition.
    pub const LAYOUT_TRANSITION: StageAccess =
        StageAccess::new(PipelineStageFlags::empty(), AccessFlags::LAYOUT_TRANSITION);

    /// Image handed to the presentation engine.
    pub const PRESENTED: StageAccess =
        StageAccess::new(PipelineStageFlags::PRESENT_ENGINE, AccessFlags::PRESENTED);

    /// Image released by the presentation engine.
    pub const PRESENT_ACQUIRE_READ: StageAccess = StageAccess::new(
        PipelineStageFlags::PRESENT_ENGINE,
        AccessFlags::PRESENT_ACQUIRE_READ,
    );

    /// Check if this access is a read.
    pub fn is_read(&self) -> bool {
        self.access.is_read()
    }

    /// Check if this access is a write.
    pub fn is_write(&self) -> bool {
        self.access.is_write()
    }
}

impl fmt::Display for StageAccess {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stage.is_empty() {
            write!(fmt, "{:?}", self.access)
        } else {
            write!(fmt, "{:?}:{:?}", self.stage, self.access)
        }
    }
}

/// Set of stage-access pairs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessScope {
    stages: [AccessFlags; STAGE_SLOTS],
}

impl Default for AccessScope {
    fn default() -> Self {
        AccessScope {
            stages: [AccessFlags::empty(); STAGE_SLOTS],
        }
    }
}

impl fmt::Debug for AccessScope {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_map()
            .entries(
                self.stages
                    .iter()
                    .enumerate()
                    .filter(|(_, access)| !access.is_empty())
                    .map(|(index, access)| {
                        (PipelineStageFlags::from_bits_truncate(1 << index), access)
                    }),
            )
            .finish()
    }
}

impl AccessScope {
    /// Scope with no accesses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every access bit at every stage in `stages`.
    pub fn new(stages: PipelineStageFlags, access: AccessFlags) -> Self {
        let access = access.expand();
        let mut scope = AccessScope::default();
        if access.is_empty() {
            return scope;
        }
        for stage in stages.iter_bits() {
            scope.stages[stage.index()] |= access;
        }
        scope
    }

    /// Check if the scope has no accesses.
    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(|access| access.is_empty())
    }

    /// Check if the pair is in this scope.
    pub fn contains(&self, usage: StageAccess) -> bool {
        if usage.stage.is_empty() {
            return false;
        }
        self.stages
            .get(usage.stage.index())
            .map_or(false, |access| access.contains(usage.access))
    }

    /// Check if any pair is in both scopes.
    pub fn intersects(&self, other: &AccessScope) -> bool {
        self.stages
            .iter()
            .zip(other.stages.iter())
            .any(|(a, b)| a.intersects(*b))
    }

    /// Add a pair to this scope.
    pub fn insert(&mut self, usage: StageAccess) {
        if !usage.stage.is_empty() {
            self.stages[usage.stage.index()] |= usage.access;
        }
    }
}

impl BitOr for AccessScope {
    type Output = AccessScope;

    fn bitor(mut self, rhs: AccessScope) -> AccessScope {
        self |= rhs;
        self
    }
}

impl BitOrAssign for AccessScope {
    fn bitor_assign(&mut self, rhs: AccessScope) {
        for (a, b) in self.stages.iter_mut().zip(rhs.stages.iter()) {
            *a |= *b;
        }
    }
}

impl BitAnd for AccessScope {
    type Output = AccessScope;

    fn bitand(mut self, rhs: AccessScope) -> AccessScope {
        for (a, b) in self.stages.iter_mut().zip(rhs.stages.iter()) {
            *a &= *b;
        }
        self
    }
}

/// Execution scope of one side of a synchronization command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncExecScope {
    /// Stages as passed by the caller.
    pub mask_param: PipelineStageFlags,

    /// Stages after meta-stage and logical-order expansion.
    pub exec_scope: PipelineStageFlags,

    /// Every access performed by the stages of `exec_scope`.
    pub valid_accesses: AccessScope,
}

impl SyncExecScope {
    /// First synchronization scope.
    pub fn source(stages: PipelineStageFlags) -> Self {
        Self::with_exec_scope(stages, stages.logically_earlier())
    }

    /// Second synchronization scope.
    pub fn destination(stages: PipelineStageFlags) -> Self {
        Self::with_exec_scope(stages, stages.logically_later())
    }

    fn with_exec_scope(mask_param: PipelineStageFlags, exec_scope: PipelineStageFlags) -> Self {
        SyncExecScope {
            mask_param,
            exec_scope,
            valid_accesses: AccessScope::new(
                exec_scope,
                AccessFlags::all_reads()
                    | AccessFlags::all_writes()
                    | AccessFlags::PRESENTED
                    | AccessFlags::PRESENT_ACQUIRE_READ,
            ),
        }
    }
}

/// Barrier expressed as two synchronization scopes and two access scopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncBarrier {
    /// First execution scope.
    pub src_exec_scope: SyncExecScope,

    /// Accesses made available.
    pub src_access_scope: AccessScope,

    /// Second execution scope.
    pub dst_exec_scope: SyncExecScope,

    /// Accesses the memory is made visible to.
    pub dst_access_scope: AccessScope,
}

impl SyncBarrier {
    /// Memory barrier between two scopes.
    pub fn new(
        src: SyncExecScope,
        src_access: AccessFlags,
        dst: SyncExecScope,
        dst_access: AccessFlags,
    ) -> Self {
        SyncBarrier {
            src_access_scope: AccessScope::new(src.exec_scope, src_access),
            dst_access_scope: AccessScope::new(dst.exec_scope, dst_access),
            src_exec_scope: src,
            dst_exec_scope: dst,
        }
    }

    /// Execution-only barrier.
    pub fn execution(src: SyncExecScope, dst: SyncExecScope) -> Self {
        SyncBarrier {
            src_exec_scope: src,
            src_access_scope: AccessScope::empty(),
            dst_exec_scope: dst,
            dst_access_scope: AccessScope::empty(),
        }
    }
}

/// Implicit ordering guarantees of an access.
///
/// Attachment accesses of successive draws within a subpass happen in rasterization
/// order and are not hazards against each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncOrdering {
    /// No implicit ordering.
    None,

    /// Ordered with color attachment accesses.
    ColorAttachment,

    /// Ordered with depth-stencil attachment accesses.
    DepthStencilAttachment,

    /// Ordered with all attachment accesses, input attachments included.
    Raster,
}

impl Default for SyncOrdering {
    fn default() -> Self {
        SyncOrdering::None
    }
}

/// Scopes implied by `SyncOrdering`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderingBarrier {
    /// Stages ordered with the access.
    pub exec_scope: PipelineStageFlags,

    /// Accesses ordered with the access.
    pub access_scope: AccessScope,
}

impl OrderingBarrier {
    /// Ordering of a barrier source scope.
    /// Layout transitions are checked against it.
    pub fn from_source(exec_scope: PipelineStageFlags, access_scope: AccessScope) -> Self {
        OrderingBarrier {
            exec_scope,
            access_scope,
        }
    }
}

impl SyncOrdering {
    /// Get scopes of this ordering rule.
    pub fn barrier(self) -> OrderingBarrier {
        let color = || {
            AccessScope::new(
                PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
        };
        let depth_stages =
            PipelineStageFlags::EARLY_FRAGMENT_TESTS | PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let depth = || {
            AccessScope::new(
                depth_stages,
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
        };

        match self {
            SyncOrdering::None => OrderingBarrier::default(),
            SyncOrdering::ColorAttachment => OrderingBarrier {
                exec_scope: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                access_scope: color(),
            },
            SyncOrdering::DepthStencilAttachment => OrderingBarrier {
                exec_scope: depth_stages,
                access_scope: depth(),
            },
            SyncOrdering::Raster => OrderingBarrier {
                exec_scope: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | depth_stages,
                access_scope: color()
                    | depth()
                    | AccessScope::new(
                        PipelineStageFlags::FRAGMENT_SHADER,
                        AccessFlags::INPUT_ATTACHMENT_READ,
                    ),
            },
        }
    }
}
