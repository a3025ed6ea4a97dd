//! Render pass description, subpass dependency graph and
//! the access contexts of a render pass instance.

use {
    crate::{
        access::BarrierScope,
        context::{
            AccessContext, AsyncContext, AsyncReference, BarrierAction, ContextArena,
            ContextHandle, TrackBack,
        },
        error::{Report, SyncError},
        resource::{ImageInfo, ImageRegion, ImageSubresourceRange, Ranges},
        tag::{ResourceUsageTag, UsageFormatter},
    },
    std::{fmt, sync::Arc},
    syncval_core::{
        hal::{
            self,
            format::Aspects,
            image::Layout,
            command::AttachmentClear,
            pass::{
                Attachment, AttachmentId, AttachmentLoadOp, AttachmentOps, AttachmentRef,
                SubpassDependency,
            },
            pso::ClearRect,
        },
        AccessFlags, PipelineStageFlags, QueueId, RenderPassId, ResourceKey, StageAccess,
        SyncBarrier, SyncExecScope, SyncOrdering,
    },
};

/// Attachments a subpass uses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubpassInfo {
    /// Color attachments.
    pub colors: Vec<AttachmentRef>,

    /// Depth-stencil attachment.
    pub depth_stencil: Option<AttachmentRef>,

    /// Input attachments.
    pub inputs: Vec<AttachmentRef>,

    /// Resolve attachments, one per color attachment or none.
    pub resolves: Vec<AttachmentRef>,

    /// Attachments preserved through this subpass.
    pub preserves: Vec<AttachmentId>,
}

impl<'a> From<&hal::pass::SubpassDesc<'a>> for SubpassInfo {
    fn from(desc: &hal::pass::SubpassDesc<'a>) -> Self {
        SubpassInfo {
            colors: desc.colors.to_vec(),
            depth_stencil: desc.depth_stencil.cloned(),
            inputs: desc.inputs.to_vec(),
            resolves: desc.resolves.to_vec(),
            preserves: desc.preserves.to_vec(),
        }
    }
}

impl SubpassInfo {
    fn references(&self) -> impl Iterator<Item = &AttachmentRef> {
        self.colors
            .iter()
            .chain(&self.resolves)
            .chain(&self.depth_stencil)
            .chain(&self.inputs)
    }
}

/// Dependencies of one subpass.
#[derive(Clone, Debug, Default)]
pub struct SubpassDependencies {
    /// Prior subpasses with barriers from each.
    pub prev: Vec<(usize, Vec<SyncBarrier>)>,

    /// Barriers from commands before the render pass.
    pub from_external: Vec<SyncBarrier>,

    /// Barriers to commands after the render pass.
    pub to_external: Vec<SyncBarrier>,

    /// Prior subpasses with no dependency path to this one.
    pub async_subpasses: Vec<usize>,
}

/// Image layout transition of an attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Subpass the attachment was last used in. `None` for commands before the render pass.
    pub prev_pass: Option<usize>,

    /// Attachment.
    pub attachment: AttachmentId,

    /// Layout before the transition.
    pub old_layout: Layout,

    /// Layout after the transition.
    pub new_layout: Layout,
}

/// Render pass with its dependency graph.
#[derive(Clone, Debug)]
pub struct RenderPassInfo {
    id: Option<RenderPassId>,
    attachments: Vec<Attachment>,
    resolve_only: Vec<bool>,
    subpasses: Vec<SubpassInfo>,
    dependencies: Vec<SubpassDependencies>,
    transitions: Vec<Vec<Transition>>,
    first_use: Vec<Option<usize>>,
    last_use: Vec<Option<usize>>,
}

fn dependency_barrier(dependency: &SubpassDependency) -> SyncBarrier {
    SyncBarrier::new(
        SyncExecScope::source(dependency.stages.start.into()),
        dependency.accesses.start.into(),
        SyncExecScope::destination(dependency.stages.end.into()),
        dependency.accesses.end.into(),
    )
}

fn implicit_from_external() -> SyncBarrier {
    SyncBarrier::new(
        SyncExecScope::source(PipelineStageFlags::TOP_OF_PIPE),
        AccessFlags::empty(),
        SyncExecScope::destination(PipelineStageFlags::ALL_COMMANDS),
        AccessFlags::COLOR_ATTACHMENT_READ
            | AccessFlags::COLOR_ATTACHMENT_WRITE
            | AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
    )
}

fn implicit_to_external() -> SyncBarrier {
    SyncBarrier::new(
        SyncExecScope::source(PipelineStageFlags::ALL_COMMANDS),
        AccessFlags::COLOR_ATTACHMENT_WRITE | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        SyncExecScope::destination(PipelineStageFlags::BOTTOM_OF_PIPE),
        AccessFlags::empty(),
    )
}

impl RenderPassInfo {
    /// Build render pass and compute its dependency graph and layout transitions.
    pub fn new(
        id: RenderPassId,
        attachments: Vec<Attachment>,
        subpasses: Vec<SubpassInfo>,
        dependencies: &[SubpassDependency],
    ) -> Result<Self, SyncError> {
        if subpasses.is_empty() {
            return Err(SyncError::InvalidRenderPass {
                reason: "render pass has no subpasses",
            });
        }
        let resolve_only = vec![false; attachments.len()];
        for subpass in &subpasses {
            if subpass
                .references()
                .map(|&(attachment, _)| attachment)
                .chain(subpass.preserves.iter().copied())
                .any(|attachment| attachment >= attachments.len())
            {
                return Err(SyncError::InvalidRenderPass {
                    reason: "attachment index out of bounds",
                });
            }
            if !subpass.resolves.is_empty() && subpass.resolves.len() != subpass.colors.len() {
                return Err(SyncError::InvalidRenderPass {
                    reason: "resolve attachment count differs from color attachment count",
                });
            }
        }

        let count = subpasses.len();
        let mut graph = vec![SubpassDependencies::default(); count];
        for dependency in dependencies {
            let src = dependency.passes.start.map(|pass| pass as usize);
            let dst = dependency.passes.end.map(|pass| pass as usize);
            let barrier = dependency_barrier(dependency);
            match (src, dst) {
                (Some(src), _) if src >= count => {
                    return Err(SyncError::InvalidRenderPass {
                        reason: "dependency source subpass out of bounds",
                    })
                }
                (_, Some(dst)) if dst >= count => {
                    return Err(SyncError::InvalidRenderPass {
                        reason: "dependency destination subpass out of bounds",
                    })
                }
                (Some(src), Some(dst)) if src > dst => {
                    return Err(SyncError::InvalidRenderPass {
                        reason: "dependency goes backwards",
                    })
                }
                (Some(src), Some(dst)) if src == dst => {
                    // Self dependencies only allow pipeline barriers within the subpass.
                }
                (Some(src), Some(dst)) => {
                    let prev = &mut graph[dst].prev;
                    match prev.iter_mut().find(|(pass, _)| *pass == src) {
                        Some((_, barriers)) => barriers.push(barrier),
                        None => prev.push((src, vec![barrier])),
                    }
                }
                (None, Some(dst)) => graph[dst].from_external.push(barrier),
                (Some(src), None) => graph[src].to_external.push(barrier),
                (None, None) => {
                    return Err(SyncError::InvalidRenderPass {
                        reason: "dependency between external scopes",
                    })
                }
            }
        }

        // Prior subpasses reachable through dependencies.
        let mut reachable = vec![vec![false; count]; count];
        for pass in 0..count {
            for &(prev, _) in &graph[pass].prev {
                reachable[pass][prev] = true;
                for earlier in 0..prev {
                    if reachable[prev][earlier] {
                        reachable[pass][earlier] = true;
                    }
                }
            }
        }
        for pass in 0..count {
            let deps = &mut graph[pass];
            deps.async_subpasses = (0..pass).filter(|&prior| !reachable[pass][prior]).collect();
            if deps.from_external.is_empty() {
                deps.from_external.push(implicit_from_external());
            }
            if deps.to_external.is_empty() {
                deps.to_external.push(implicit_to_external());
            }
        }

        let mut layouts: Vec<Layout> = attachments
            .iter()
            .map(|attachment| attachment.layouts.start)
            .collect();
        let mut first_use = vec![None; attachments.len()];
        let mut last_use: Vec<Option<usize>> = vec![None; attachments.len()];
        let mut transitions = vec![Vec::new(); count + 1];
        for (pass, subpass) in subpasses.iter().enumerate() {
            for &(attachment, layout) in subpass.references() {
                if layouts[attachment] != layout {
                    transitions[pass].push(Transition {
                        prev_pass: last_use[attachment],
                        attachment,
                        old_layout: layouts[attachment],
                        new_layout: layout,
                    });
                    layouts[attachment] = layout;
                }
                first_use[attachment].get_or_insert(pass);
                last_use[attachment] = Some(pass);
            }
        }
        for (attachment, description) in attachments.iter().enumerate() {
            if layouts[attachment] != description.layouts.end {
                transitions[count].push(Transition {
                    prev_pass: last_use[attachment],
                    attachment,
                    old_layout: layouts[attachment],
                    new_layout: description.layouts.end,
                });
            }
        }

        Ok(RenderPassInfo {
            id: Some(id),
            attachments,
            resolve_only,
            subpasses,
            dependencies: graph,
            transitions,
            first_use,
            last_use,
        })
    }

    /// Single subpass render pass of a dynamic rendering instance
    /// and the views bound to its attachments.
    ///
    /// Attachments keep their layout throughout. Resolve targets are only
    /// written by the resolve at the end of rendering.
    pub fn rendering(
        rendering: &RenderingInfo,
    ) -> Result<(Self, Vec<Option<AttachmentView>>), SyncError> {
        let mut attachments = Vec::new();
        let mut views = Vec::new();
        let mut resolve_only = Vec::new();
        let mut push = |view: Option<&AttachmentView>,
                        layout: Layout,
                        ops: AttachmentOps,
                        stencil_ops: AttachmentOps,
                        resolve: bool|
         -> AttachmentRef {
            attachments.push(Attachment {
                format: None,
                samples: 1,
                ops,
                stencil_ops,
                layouts: layout..layout,
            });
            views.push(view.cloned());
            resolve_only.push(resolve);
            (attachments.len() - 1, layout)
        };

        let mut subpass = SubpassInfo::default();
        for color in &rendering.colors {
            subpass.colors.push(push(
                Some(&color.view),
                color.layout,
                color.ops,
                AttachmentOps::DONT_CARE,
                false,
            ));
        }
        if rendering.colors.iter().any(|color| color.resolve.is_some()) {
            for color in &rendering.colors {
                let (view, layout) = match &color.resolve {
                    Some((view, layout)) => (Some(view), *layout),
                    None => (None, color.layout),
                };
                subpass.resolves.push(push(
                    view,
                    layout,
                    AttachmentOps::DONT_CARE,
                    AttachmentOps::DONT_CARE,
                    true,
                ));
            }
        }
        if let Some(depth_stencil) = &rendering.depth_stencil {
            subpass.depth_stencil = Some(push(
                Some(&depth_stencil.view),
                depth_stencil.layout,
                depth_stencil.ops,
                depth_stencil.stencil_ops,
                false,
            ));
        }

        let mut info = RenderPassInfo::new(RenderPassId(0), attachments, vec![subpass], &[])?;
        info.id = None;
        info.resolve_only = resolve_only;
        Ok((info, views))
    }

    /// Render pass identity. `None` for dynamic rendering.
    pub fn id(&self) -> Option<RenderPassId> {
        self.id
    }

    /// Check if this is the implicit render pass of a dynamic rendering instance.
    pub fn is_dynamic(&self) -> bool {
        self.id.is_none()
    }

    /// Number of subpasses.
    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }

    /// Attachments.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Subpass.
    pub fn subpass(&self, subpass: usize) -> Option<&SubpassInfo> {
        self.subpasses.get(subpass)
    }

    /// Dependencies of a subpass.
    pub fn dependencies(&self, subpass: usize) -> Option<&SubpassDependencies> {
        self.dependencies.get(subpass)
    }

    /// Layout transitions at the start of a subpass.
    /// Index `subpass_count()` holds the final transitions.
    pub fn transitions(&self, subpass: usize) -> &[Transition] {
        self.transitions
            .get(subpass)
            .map_or(&[][..], |transitions| &transitions[..])
    }

    fn prev_barriers(&self, subpass: usize, prev: Option<usize>) -> &[SyncBarrier] {
        let deps = match self.dependencies.get(subpass) {
            Some(deps) => deps,
            None => return &[],
        };
        match prev {
            None => &deps.from_external[..],
            Some(prev) => deps
                .prev
                .iter()
                .find(|(pass, _)| *pass == prev)
                .map_or(&[][..], |(_, barriers)| &barriers[..]),
        }
    }
}

/// Image subresources an attachment is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentView {
    /// Image.
    pub image: ImageInfo,

    /// Subresources of the view.
    pub range: ImageSubresourceRange,
}

/// Attachment of a dynamic rendering instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderingAttachment {
    /// Bound view.
    pub view: AttachmentView,

    /// Layout of the view while rendering.
    pub layout: Layout,

    /// Load and store operations. Of the depth aspect for depth-stencil attachments.
    pub ops: AttachmentOps,

    /// Load and store operations of the stencil aspect.
    pub stencil_ops: AttachmentOps,

    /// View the color attachment is resolved into at the end of rendering, with its layout.
    pub resolve: Option<(AttachmentView, Layout)>,
}

/// Parameters of `vkCmdBeginRendering`.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderingInfo {
    /// Color attachments.
    pub colors: Vec<RenderingAttachment>,

    /// Depth-stencil attachment.
    pub depth_stencil: Option<RenderingAttachment>,

    /// Render area.
    pub render_area: hal::pso::Rect,
}

#[derive(Clone, Debug)]
struct AttachmentRanges {
    key: ResourceKey,
    view: Ranges,
    color: Ranges,
    depth: Ranges,
    stencil: Ranges,
}

fn rect_region(rect: &hal::pso::Rect) -> Option<ImageRegion> {
    if rect.x < 0 || rect.y < 0 || rect.w <= 0 || rect.h <= 0 {
        return None;
    }
    Some(ImageRegion {
        offset: hal::image::Offset {
            x: i32::from(rect.x),
            y: i32::from(rect.y),
            z: 0,
        },
        extent: hal::image::Extent {
            width: rect.w as u32,
            height: rect.h as u32,
            depth: 1,
        },
    })
}

impl AttachmentRanges {
    fn new(view: &AttachmentView, area: &ImageRegion) -> Result<Self, SyncError> {
        let aspect_ranges = |aspect: Aspects| -> Result<Ranges, SyncError> {
            if !view.range.aspects.contains(aspect) {
                return Ok(Ranges::new());
            }
            let range = ImageSubresourceRange {
                aspects: aspect,
                ..view.range.clone()
            };
            view.image.region_ranges(&range, area)
        };
        Ok(AttachmentRanges {
            key: view.image.key(),
            view: view.image.subresource_ranges(&view.range)?,
            color: aspect_ranges(Aspects::COLOR)?,
            depth: aspect_ranges(Aspects::DEPTH)?,
            stencil: aspect_ranges(Aspects::STENCIL)?,
        })
    }

    fn render_area(&self) -> impl Iterator<Item = &std::ops::Range<u64>> {
        self.color.iter().chain(&self.depth).chain(&self.stencil)
    }
}

/// Attachment accesses of a draw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawAttachments {
    /// Color attachments are written.
    pub color_write: bool,

    /// Depth is tested.
    pub depth_test: bool,

    /// Depth is written.
    pub depth_write: bool,

    /// Stencil is tested and may be written.
    pub stencil_test: bool,

    /// Input attachments are read by the fragment shader.
    pub input_attachments: bool,
}

/// Single attachment access of a render pass operation.
#[derive(Clone, Debug)]
pub struct AttachmentAccess {
    /// Attachment.
    pub attachment: AttachmentId,

    /// Image memory.
    pub key: ResourceKey,

    /// Ranges accessed.
    pub ranges: Ranges,

    /// The access.
    pub usage: StageAccess,

    /// Implicit ordering of the access.
    pub ordering: SyncOrdering,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttachmentOp {
    Load,
    Store,
    Resolve,
}

impl fmt::Display for AttachmentOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            AttachmentOp::Load => "load",
            AttachmentOp::Store => "store",
            AttachmentOp::Resolve => "resolve",
        })
    }
}

const COLOR_READ: StageAccess = StageAccess::new(
    PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    AccessFlags::COLOR_ATTACHMENT_READ,
);
const COLOR_WRITE: StageAccess = StageAccess::new(
    PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    AccessFlags::COLOR_ATTACHMENT_WRITE,
);
const DEPTH_STENCIL_LOAD_READ: StageAccess = StageAccess::new(
    PipelineStageFlags::EARLY_FRAGMENT_TESTS,
    AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
);
const DEPTH_STENCIL_LOAD_WRITE: StageAccess = StageAccess::new(
    PipelineStageFlags::EARLY_FRAGMENT_TESTS,
    AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
);
const DEPTH_STENCIL_STORE: StageAccess = StageAccess::new(
    PipelineStageFlags::LATE_FRAGMENT_TESTS,
    AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
);
const INPUT_READ: StageAccess = StageAccess::new(
    PipelineStageFlags::FRAGMENT_SHADER,
    AccessFlags::INPUT_ATTACHMENT_READ,
);

/// Whether a render pass operation is recorded into a command buffer
/// or replayed onto a queue batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordMode {
    /// Record every attachment access.
    Record,
    /// Apply layout transitions and dependencies only.
    /// Attachment accesses come with the recorded contexts.
    Replay,
}

/// Access contexts of a render pass instance, one per subpass entered so far.
#[derive(Debug)]
pub struct RenderPassAccessContext {
    info: Arc<RenderPassInfo>,
    views: Vec<Option<AttachmentView>>,
    attachments: Vec<Option<AttachmentRanges>>,
    external: ContextHandle,
    subpasses: Vec<ContextHandle>,
    subpass_start: Vec<ResourceUsageTag>,
}

impl RenderPassAccessContext {
    /// Create render pass instance on top of `external`.
    /// Nothing is recorded until `record_begin`.
    pub fn new(
        info: Arc<RenderPassInfo>,
        views: &[Option<AttachmentView>],
        render_area: hal::pso::Rect,
        external: ContextHandle,
    ) -> Result<Self, SyncError> {
        if views.len() != info.attachments.len() {
            return Err(SyncError::InvalidRenderPass {
                reason: "attachment view count differs from attachment count",
            });
        }
        let area = rect_region(&render_area).ok_or(SyncError::InvalidRenderPass {
            reason: "render area is empty or negative",
        })?;
        let attachments = views
            .iter()
            .map(|view| view.as_ref().map(|view| AttachmentRanges::new(view, &area)).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RenderPassAccessContext {
            info,
            views: views.to_vec(),
            attachments,
            external,
            subpasses: Vec::new(),
            subpass_start: Vec::new(),
        })
    }

    /// Render pass.
    pub fn info(&self) -> &RenderPassInfo {
        &self.info
    }

    /// Context of commands around the render pass.
    pub fn external(&self) -> ContextHandle {
        self.external
    }

    /// Index of the current subpass.
    pub fn current_subpass(&self) -> Option<usize> {
        self.subpasses.len().checked_sub(1)
    }

    /// Context of the current subpass.
    pub fn current_context(&self) -> Option<ContextHandle> {
        self.subpasses.last().copied()
    }

    /// Context of a subpass entered so far.
    pub fn subpass_context(&self, subpass: usize) -> Option<ContextHandle> {
        self.subpasses.get(subpass).copied()
    }

    fn current(&self) -> Result<(usize, ContextHandle), SyncError> {
        match (self.current_subpass(), self.current_context()) {
            (Some(subpass), Some(handle)) => Ok((subpass, handle)),
            _ => Err(SyncError::RenderPassNotActive),
        }
    }

    fn source_context<'a>(
        &self,
        contexts: &'a ContextArena,
        prev_pass: Option<usize>,
    ) -> Result<&'a AccessContext, SyncError> {
        match prev_pass {
            None => contexts.get(self.external),
            Some(pass) => contexts.get(
                self.subpass_context(pass)
                    .ok_or(SyncError::RenderPassNotActive)?,
            ),
        }
    }

    /// Build the context of `subpass`: state of prior subpasses and of external commands
    /// with dependency barriers applied, then layout transitions tagged `tag`.
    fn build_subpass_context(
        &self,
        contexts: &ContextArena,
        subpass: usize,
        queue: Option<QueueId>,
        tag: ResourceUsageTag,
    ) -> Result<AccessContext, SyncError> {
        let deps = self
            .info
            .dependencies(subpass)
            .ok_or(SyncError::InvalidRenderPass {
                reason: "subpass index out of bounds",
            })?;
        let mut context = AccessContext::new();
        let scope = BarrierScope::queue(queue);

        for (prev, barriers) in &deps.prev {
            let source = self
                .subpass_context(*prev)
                .ok_or(SyncError::RenderPassNotActive)?;
            context.resolve_from_context(
                contexts.get(source)?,
                &BarrierAction {
                    barriers,
                    scope,
                    ..BarrierAction::none()
                },
            );
            context.add_prev(TrackBack {
                source,
                barriers: barriers.clone(),
            });
        }

        let external = contexts.get(self.external)?;
        context.resolve_from_context(
            external,
            &BarrierAction {
                barriers: &deps.from_external,
                scope,
                ..BarrierAction::none()
            },
        );
        context.set_src_external(TrackBack {
            source: self.external,
            barriers: deps.from_external.clone(),
        });
        context.set_dst_external(deps.to_external.clone());

        for &prior in &deps.async_subpasses {
            if let (Some(handle), Some(&start_tag)) =
                (self.subpass_context(prior), self.subpass_start.get(prior))
            {
                context.add_async(AsyncReference {
                    context: AsyncContext::Sibling(handle),
                    start_tag,
                    queue: None,
                });
            }
        }
        for reference in external.async_refs() {
            context.add_async(reference.clone());
        }

        for transition in self.info.transitions(subpass) {
            let ranges = match &self.attachments[transition.attachment] {
                Some(ranges) => ranges,
                None => continue,
            };
            let source = self.source_context(contexts, transition.prev_pass)?;
            let action = BarrierAction {
                barriers: self.info.prev_barriers(subpass, transition.prev_pass),
                scope,
                layout_transition: true,
                tag,
            };
            for range in &ranges.view {
                context.erase_range(ranges.key, range.clone());
                context.resolve_range_from_context(source, ranges.key, range.clone(), &action);
            }
        }

        Ok(context)
    }

    fn load_accesses(&self, subpass: usize) -> Vec<AttachmentAccess> {
        let mut accesses = Vec::new();
        for (attachment, ranges) in self.attachments.iter().enumerate() {
            let ranges = match ranges {
                Some(ranges)
                    if self.info.first_use[attachment] == Some(subpass)
                        && !self.info.resolve_only[attachment] =>
                {
                    ranges
                }
                _ => continue,
            };
            let description = &self.info.attachments[attachment];
            let depth_stencil = |load: AttachmentLoadOp| match load {
                AttachmentLoadOp::Load => DEPTH_STENCIL_LOAD_READ,
                _ => DEPTH_STENCIL_LOAD_WRITE,
            };
            let color_usage = match description.ops.load {
                AttachmentLoadOp::Load => COLOR_READ,
                _ => COLOR_WRITE,
            };
            let aspects = [
                (&ranges.color, color_usage, SyncOrdering::ColorAttachment),
                (
                    &ranges.depth,
                    depth_stencil(description.ops.load),
                    SyncOrdering::DepthStencilAttachment,
                ),
                (
                    &ranges.stencil,
                    depth_stencil(description.stencil_ops.load),
                    SyncOrdering::DepthStencilAttachment,
                ),
            ];
            for (aspect_ranges, usage, ordering) in aspects.iter() {
                if !aspect_ranges.is_empty() {
                    accesses.push(AttachmentAccess {
                        attachment,
                        key: ranges.key,
                        ranges: (*aspect_ranges).clone(),
                        usage: *usage,
                        ordering: *ordering,
                    });
                }
            }
        }
        accesses
    }

    fn store_accesses(&self, subpass: usize) -> Vec<AttachmentAccess> {
        let mut accesses = Vec::new();
        for (attachment, ranges) in self.attachments.iter().enumerate() {
            let ranges = match ranges {
                Some(ranges)
                    if self.info.last_use[attachment] == Some(subpass)
                        && !self.info.resolve_only[attachment] =>
                {
                    ranges
                }
                _ => continue,
            };
            let aspects = [
                (&ranges.color, COLOR_WRITE),
                (&ranges.depth, DEPTH_STENCIL_STORE),
                (&ranges.stencil, DEPTH_STENCIL_STORE),
            ];
            for (aspect_ranges, usage) in aspects.iter() {
                if !aspect_ranges.is_empty() {
                    accesses.push(AttachmentAccess {
                        attachment,
                        key: ranges.key,
                        ranges: (*aspect_ranges).clone(),
                        usage: *usage,
                        ordering: SyncOrdering::Raster,
                    });
                }
            }
        }
        accesses
    }

    fn resolve_accesses(&self, subpass: usize) -> Vec<AttachmentAccess> {
        let mut accesses = Vec::new();
        let info = match self.info.subpass(subpass) {
            Some(info) => info,
            None => return accesses,
        };
        for (&(src, _), &(dst, _)) in info.colors.iter().zip(&info.resolves) {
            let (src_ranges, dst_ranges) = match (&self.attachments[src], &self.attachments[dst]) {
                (Some(src), Some(dst)) => (src, dst),
                _ => continue,
            };
            accesses.push(AttachmentAccess {
                attachment: src,
                key: src_ranges.key,
                ranges: src_ranges.color.clone(),
                usage: COLOR_READ,
                ordering: SyncOrdering::ColorAttachment,
            });
            accesses.push(AttachmentAccess {
                attachment: dst,
                key: dst_ranges.key,
                ranges: dst_ranges.color.clone(),
                usage: COLOR_WRITE,
                ordering: SyncOrdering::ColorAttachment,
            });
        }
        accesses
    }

    /// Attachment accesses of a draw in the current subpass.
    pub fn draw_accesses(&self, draw: &DrawAttachments) -> Vec<AttachmentAccess> {
        let mut accesses = Vec::new();
        let info = match self.current_subpass().and_then(|subpass| self.info.subpass(subpass)) {
            Some(info) => info,
            None => return accesses,
        };
        let mut push = |attachment: AttachmentId, ranges: &Ranges, usage, ordering| {
            if let Some(attachment_ranges) = &self.attachments[attachment] {
                if !ranges.is_empty() {
                    accesses.push(AttachmentAccess {
                        attachment,
                        key: attachment_ranges.key,
                        ranges: ranges.clone(),
                        usage,
                        ordering,
                    });
                }
            }
        };

        if draw.color_write {
            for &(attachment, _) in &info.colors {
                if let Some(ranges) = &self.attachments[attachment] {
                    push(attachment, &ranges.color, COLOR_WRITE, SyncOrdering::ColorAttachment);
                }
            }
        }
        if let Some(&(attachment, _)) = info.depth_stencil.as_ref() {
            if let Some(ranges) = &self.attachments[attachment] {
                if draw.depth_write {
                    push(
                        attachment,
                        &ranges.depth,
                        DEPTH_STENCIL_STORE,
                        SyncOrdering::DepthStencilAttachment,
                    );
                } else if draw.depth_test {
                    push(
                        attachment,
                        &ranges.depth,
                        DEPTH_STENCIL_LOAD_READ,
                        SyncOrdering::DepthStencilAttachment,
                    );
                }
                if draw.stencil_test {
                    push(
                        attachment,
                        &ranges.stencil,
                        DEPTH_STENCIL_STORE,
                        SyncOrdering::DepthStencilAttachment,
                    );
                }
            }
        }
        if draw.input_attachments {
            for &(attachment, _) in &info.inputs {
                if let Some(ranges) = &self.attachments[attachment] {
                    let area: Ranges = ranges.render_area().cloned().collect();
                    push(attachment, &area, INPUT_READ, SyncOrdering::Raster);
                }
            }
        }
        accesses
    }

    /// Attachment accesses of clearing one attachment of the current subpass
    /// within `rect`. Empty when the attachment is unused or the rect misses its layers.
    pub fn clear_accesses(
        &self,
        clear: &AttachmentClear,
        rect: &ClearRect,
    ) -> Result<Vec<AttachmentAccess>, SyncError> {
        let (subpass, _) = self.current()?;
        let info = self.info.subpass(subpass).ok_or(SyncError::RenderPassNotActive)?;
        let (reference, aspects) = match *clear {
            AttachmentClear::Color { index, .. } => (info.colors.get(index), Aspects::COLOR),
            AttachmentClear::DepthStencil { depth, stencil } => {
                let mut aspects = Aspects::empty();
                if depth.is_some() {
                    aspects |= Aspects::DEPTH;
                }
                if stencil.is_some() {
                    aspects |= Aspects::STENCIL;
                }
                (info.depth_stencil.as_ref(), aspects)
            }
        };
        let attachment = match reference {
            Some(&(attachment, _)) => attachment,
            None => return Ok(Vec::new()),
        };
        let view = match self.views.get(attachment) {
            Some(Some(view)) => view,
            _ => return Ok(Vec::new()),
        };

        // Layers of the rect are relative to the view.
        let base = view.range.layers.start;
        let layers = base.saturating_add(u32::from(rect.layers.start))
            ..base.saturating_add(u32::from(rect.layers.end)).min(view.range.layers.end);
        if layers.start >= layers.end {
            return Ok(Vec::new());
        }
        let region = rect_region(&rect.rect).ok_or(SyncError::InvalidImageRegion {
            image: view.image.id,
        })?;

        let mut accesses = Vec::new();
        for &aspect in &[Aspects::COLOR, Aspects::DEPTH, Aspects::STENCIL] {
            if !(aspects & view.range.aspects).contains(aspect) {
                continue;
            }
            let (usage, ordering) = if aspect == Aspects::COLOR {
                (COLOR_WRITE, SyncOrdering::ColorAttachment)
            } else {
                (DEPTH_STENCIL_STORE, SyncOrdering::DepthStencilAttachment)
            };
            let range = ImageSubresourceRange {
                aspects: aspect,
                levels: view.range.levels.clone(),
                layers: layers.clone(),
            };
            accesses.push(AttachmentAccess {
                attachment,
                key: view.image.key(),
                ranges: view.image.region_ranges(&range, &region)?,
                usage,
                ordering,
            });
        }
        Ok(accesses)
    }

    fn validate_accesses(
        &self,
        contexts: &ContextArena,
        context: &AccessContext,
        accesses: &[AttachmentAccess],
        op: AttachmentOp,
        subpass: usize,
        queue: Option<QueueId>,
        formatter: &dyn UsageFormatter,
        command: &'static str,
    ) -> Result<Vec<Report>, SyncError> {
        let mut reports = Vec::new();
        for access in accesses {
            for range in &access.ranges {
                let hazard = contexts.detect_hazard_in(
                    context,
                    access.key,
                    range.clone(),
                    access.usage,
                    &access.ordering.barrier(),
                    queue,
                )?;
                if let Some(hazard) = hazard {
                    reports.push(Report::from_hazard(
                        command,
                        format_args!(
                            "{} in subpass {} for attachment {} {} operation",
                            access.key, subpass, access.attachment, op
                        ),
                        access.usage,
                        &hazard,
                        formatter,
                    ));
                    break;
                }
            }
        }
        Ok(reports)
    }

    fn validate_transitions(
        &self,
        contexts: &ContextArena,
        transitions: &[Transition],
        barriers: impl Fn(&Transition) -> Vec<SyncBarrier>,
        proxy: Option<(usize, &AccessContext)>,
        queue: Option<QueueId>,
        formatter: &dyn UsageFormatter,
        command: &'static str,
    ) -> Result<Vec<Report>, SyncError> {
        let mut reports = Vec::new();
        for transition in transitions {
            let ranges = match &self.attachments[transition.attachment] {
                Some(ranges) => ranges,
                None => continue,
            };
            let source = match proxy {
                Some((pass, context)) if transition.prev_pass == Some(pass) => context,
                _ => self.source_context(contexts, transition.prev_pass)?,
            };
            let track_back = TrackBack {
                source: self.external,
                barriers: barriers(transition),
            };
            let (src_exec, src_access) = track_back.source_scope();
            for range in &ranges.view {
                let hazard = source.detect_barrier_hazard(
                    ranges.key,
                    range.clone(),
                    queue,
                    src_exec,
                    &src_access,
                    None,
                );
                if let Some(hazard) = hazard {
                    let prev = match transition.prev_pass {
                        Some(pass) => format!("subpass {}", pass),
                        None => "external".to_owned(),
                    };
                    reports.push(Report::from_hazard(
                        command,
                        format_args!(
                            "{} attachment {} image layout transition from {} (old_layout: {:?}, new_layout: {:?})",
                            ranges.key,
                            transition.attachment,
                            prev,
                            transition.old_layout,
                            transition.new_layout
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

    /// Current subpass context with resolve and store operations applied.
    fn store_resolve_proxy(
        &self,
        contexts: &ContextArena,
        subpass: usize,
        handle: ContextHandle,
        queue: Option<QueueId>,
    ) -> Result<AccessContext, SyncError> {
        let mut proxy = contexts.get(handle)?.clone();
        for access in self
            .resolve_accesses(subpass)
            .iter()
            .chain(&self.store_accesses(subpass))
        {
            for range in &access.ranges {
                proxy.update_access(
                    access.key,
                    range.clone(),
                    access.usage,
                    access.ordering,
                    ResourceUsageTag::INVALID,
                    queue,
                );
            }
        }
        Ok(proxy)
    }

    fn validate_enter(
        &self,
        contexts: &ContextArena,
        subpass: usize,
        proxy: Option<(usize, &AccessContext)>,
        queue: Option<QueueId>,
        formatter: &dyn UsageFormatter,
        command: &'static str,
    ) -> Result<Vec<Report>, SyncError> {
        let info = &self.info;
        let reports = self.validate_transitions(
            contexts,
            info.transitions(subpass),
            |transition| info.prev_barriers(subpass, transition.prev_pass).to_vec(),
            proxy,
            queue,
            formatter,
            command,
        )?;
        if !reports.is_empty() {
            return Ok(reports);
        }

        let temp = self.build_subpass_context(contexts, subpass, queue, ResourceUsageTag::INVALID)?;
        self.validate_accesses(
            contexts,
            &temp,
            &self.load_accesses(subpass),
            AttachmentOp::Load,
            subpass,
            queue,
            formatter,
            command,
        )
    }

    fn validate_leave(
        &self,
        contexts: &ContextArena,
        queue: Option<QueueId>,
        formatter: &dyn UsageFormatter,
        command: &'static str,
    ) -> Result<(usize, AccessContext, Vec<Report>), SyncError> {
        let (subpass, handle) = self.current()?;
        let current = contexts.get(handle)?;
        let mut reports = self.validate_accesses(
            contexts,
            current,
            &self.resolve_accesses(subpass),
            AttachmentOp::Resolve,
            subpass,
            queue,
            formatter,
            command,
        )?;
        reports.extend(self.validate_accesses(
            contexts,
            current,
            &self.store_accesses(subpass),
            AttachmentOp::Store,
            subpass,
            queue,
            formatter,
            command,
        )?);
        let proxy = self.store_resolve_proxy(contexts, subpass, handle, queue)?;
        Ok((subpass, proxy, reports))
    }

    /// Validate layout transitions and load operations of the first subpass.
    pub fn validate_begin(
        &self,
        contexts: &ContextArena,
        queue: Option<QueueId>,
        formatter: &dyn UsageFormatter,
        command: &'static str,
    ) -> Result<Vec<Report>, SyncError> {
        self.validate_enter(contexts, 0, None, queue, formatter, command)
    }

    /// Validate resolve and store operations of the current subpass,
    /// then layout transitions and load operations of the next one.
    pub fn validate_next(
        &self,
        contexts: &ContextArena,
        queue: Option<QueueId>,
        formatter: &dyn UsageFormatter,
        command: &'static str,
    ) -> Result<Vec<Report>, SyncError> {
        let (subpass, proxy, mut reports) = self.validate_leave(contexts, queue, formatter, command)?;
        let next = subpass + 1;
        if next >= self.info.subpass_count() {
            return Ok(reports);
        }
        reports.extend(self.validate_enter(
            contexts,
            next,
            Some((subpass, &proxy)),
            queue,
            formatter,
            command,
        )?);
        Ok(reports)
    }

    /// Validate resolve and store operations of the last subpass and final layout transitions.
    pub fn validate_end(
        &self,
        contexts: &ContextArena,
        queue: Option<QueueId>,
        formatter: &dyn UsageFormatter,
        command: &'static str,
    ) -> Result<Vec<Report>, SyncError> {
        let (subpass, proxy, mut reports) = self.validate_leave(contexts, queue, formatter, command)?;
        let info = &self.info;
        let final_transitions: Vec<Transition> = info
            .transitions(info.subpass_count())
            .iter()
            .filter(|transition| transition.prev_pass.is_some())
            .copied()
            .collect();
        reports.extend(self.validate_transitions(
            contexts,
            &final_transitions,
            |transition| {
                transition
                    .prev_pass
                    .and_then(|pass| info.dependencies(pass))
                    .map_or_else(Vec::new, |deps| deps.to_external.clone())
            },
            Some((subpass, &proxy)),
            queue,
            formatter,
            command,
        )?);
        Ok(reports)
    }

    fn record_accesses(
        contexts: &mut ContextArena,
        handle: ContextHandle,
        accesses: &[AttachmentAccess],
        tag: ResourceUsageTag,
        queue: Option<QueueId>,
    ) -> Result<(), SyncError> {
        let context = contexts.get_mut(handle)?;
        for access in accesses {
            for range in &access.ranges {
                context.update_access(
                    access.key,
                    range.clone(),
                    access.usage,
                    access.ordering,
                    tag,
                    queue,
                );
            }
        }
        Ok(())
    }

    fn enter(
        &mut self,
        contexts: &mut ContextArena,
        subpass: usize,
        queue: Option<QueueId>,
        barrier_tag: ResourceUsageTag,
        load_tag: Option<ResourceUsageTag>,
    ) -> Result<(), SyncError> {
        let context = self.build_subpass_context(contexts, subpass, queue, barrier_tag)?;
        let handle = contexts.insert(context);
        self.subpasses.push(handle);
        self.subpass_start.push(barrier_tag);
        if let Some(load_tag) = load_tag {
            let loads = self.load_accesses(subpass);
            Self::record_accesses(contexts, handle, &loads, load_tag, queue)?;
        }
        Ok(())
    }

    fn leave(
        &self,
        contexts: &mut ContextArena,
        queue: Option<QueueId>,
        store_tag: Option<ResourceUsageTag>,
    ) -> Result<usize, SyncError> {
        let (subpass, handle) = self.current()?;
        if let Some(store_tag) = store_tag {
            let resolves = self.resolve_accesses(subpass);
            Self::record_accesses(contexts, handle, &resolves, store_tag, queue)?;
            let stores = self.store_accesses(subpass);
            Self::record_accesses(contexts, handle, &stores, store_tag, queue)?;
        }
        Ok(subpass)
    }

    /// Enter the first subpass.
    /// Load operations are recorded when `load_tag` is given.
    pub fn record_begin(
        &mut self,
        contexts: &mut ContextArena,
        queue: Option<QueueId>,
        barrier_tag: ResourceUsageTag,
        mode: RecordMode,
    ) -> Result<(), SyncError> {
        if !self.subpasses.is_empty() {
            return Err(SyncError::RenderPassActive);
        }
        let load_tag = match mode {
            RecordMode::Record => Some(barrier_tag.next()),
            RecordMode::Replay => None,
        };
        self.enter(contexts, 0, queue, barrier_tag, load_tag)
    }

    /// Leave the current subpass and enter the next one.
    ///
    /// Resolve and store operations are tagged one before `barrier_tag`,
    /// load operations one after it.
    pub fn record_next(
        &mut self,
        contexts: &mut ContextArena,
        queue: Option<QueueId>,
        barrier_tag: ResourceUsageTag,
        mode: RecordMode,
    ) -> Result<(), SyncError> {
        let (store_tag, load_tag) = match mode {
            RecordMode::Record => (
                Some(ResourceUsageTag(barrier_tag.0.saturating_sub(1))),
                Some(barrier_tag.next()),
            ),
            RecordMode::Replay => (None, None),
        };
        let subpass = self.leave(contexts, queue, store_tag)?;
        let next = subpass + 1;
        if next >= self.info.subpass_count() {
            return Err(SyncError::InvalidRenderPass {
                reason: "no subpass after the current one",
            });
        }
        self.enter(contexts, next, queue, barrier_tag, load_tag)
    }

    /// Leave the last subpass, resolve every subpass context into the external one
    /// and apply final layout transitions.
    pub fn record_end(
        &mut self,
        contexts: &mut ContextArena,
        queue: Option<QueueId>,
        barrier_tag: ResourceUsageTag,
        mode: RecordMode,
    ) -> Result<(), SyncError> {
        let store_tag = match mode {
            RecordMode::Record => Some(ResourceUsageTag(barrier_tag.0.saturating_sub(1))),
            RecordMode::Replay => None,
        };
        self.leave(contexts, queue, store_tag)?;
        let scope = BarrierScope::queue(queue);

        for (subpass, &handle) in self.subpasses.iter().enumerate() {
            let to_external = self
                .info
                .dependencies(subpass)
                .map_or(&[][..], |deps| &deps.to_external[..]);
            let (external, context) = contexts.pair_mut(self.external, handle)?;
            external.resolve_from_context(
                context,
                &BarrierAction {
                    barriers: to_external,
                    scope,
                    ..BarrierAction::none()
                },
            );
        }

        let external = contexts.get_mut(self.external)?;
        let count = self.info.subpass_count();
        for transition in self.info.transitions(count) {
            let (prev, ranges) = match (transition.prev_pass, &self.attachments[transition.attachment]) {
                (Some(prev), Some(ranges)) => (prev, ranges),
                _ => {
                    log::debug!(
                        "Final transition of unused attachment {} of {} is not tracked",
                        transition.attachment,
                        self.info
                            .id
                            .map_or_else(|| "dynamic rendering".to_owned(), |id| id.to_string())
                    );
                    continue;
                }
            };
            let barriers = self
                .info
                .dependencies(prev)
                .map_or(&[][..], |deps| &deps.to_external[..]);
            for range in &ranges.view {
                for barrier in barriers {
                    external.apply_barrier_range(ranges.key, range.clone(), barrier, &scope, true);
                }
            }
        }
        external.apply_pending(barrier_tag, queue);
        Ok(())
    }

    /// Drop subpass contexts from the arena.
    pub fn release(self, contexts: &mut ContextArena) -> Result<(), SyncError> {
        for handle in self.subpasses {
            contexts.remove(handle)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncval_core::{hal::pass::AttachmentOps, ImageId};

    fn color_attachment() -> Attachment {
        Attachment {
            format: Some(hal::format::Format::Rgba8Unorm),
            samples: 1,
            ops: AttachmentOps::new(AttachmentLoadOp::Clear, hal::pass::AttachmentStoreOp::Store),
            stencil_ops: AttachmentOps::DONT_CARE,
            layouts: Layout::Undefined..Layout::ShaderReadOnlyOptimal,
        }
    }

    fn color_subpass(attachment: AttachmentId) -> SubpassInfo {
        SubpassInfo {
            colors: vec![(attachment, Layout::ColorAttachmentOptimal)],
            ..SubpassInfo::default()
        }
    }

    fn input_subpass(attachment: AttachmentId) -> SubpassInfo {
        SubpassInfo {
            inputs: vec![(attachment, Layout::ShaderReadOnlyOptimal)],
            ..SubpassInfo::default()
        }
    }

    #[test]
    fn implicit_external_dependencies_are_added() {
        let info = RenderPassInfo::new(
            RenderPassId(1),
            vec![color_attachment()],
            vec![color_subpass(0)],
            &[],
        )
        .unwrap();
        let deps = info.dependencies(0).unwrap();
        assert_eq!(deps.from_external, vec![implicit_from_external()]);
        assert_eq!(deps.to_external, vec![implicit_to_external()]);
    }

    #[test]
    fn subpasses_without_path_are_async() {
        let info = RenderPassInfo::new(
            RenderPassId(1),
            vec![color_attachment(), color_attachment()],
            vec![color_subpass(0), color_subpass(1)],
            &[],
        )
        .unwrap();
        assert_eq!(info.dependencies(1).unwrap().async_subpasses, vec![0]);
    }

    #[test]
    fn transitions_follow_layouts() {
        let dependency = SubpassDependency {
            passes: Some(0)..Some(1),
            stages: hal::pso::PipelineStage::COLOR_ATTACHMENT_OUTPUT
                ..hal::pso::PipelineStage::FRAGMENT_SHADER,
            accesses: hal::image::Access::COLOR_ATTACHMENT_WRITE
                ..hal::image::Access::INPUT_ATTACHMENT_READ,
            flags: hal::memory::Dependencies::BY_REGION,
        };
        let info = RenderPassInfo::new(
            RenderPassId(1),
            vec![color_attachment()],
            vec![color_subpass(0), input_subpass(0)],
            &[dependency],
        )
        .unwrap();

        assert!(info.dependencies(1).unwrap().async_subpasses.is_empty());
        let first = info.transitions(0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].prev_pass, None);
        let second = info.transitions(1);
        assert_eq!(second[0].prev_pass, Some(0));
        assert_eq!(second[0].new_layout, Layout::ShaderReadOnlyOptimal);
        // final layout matches the last use
        assert!(info.transitions(2).is_empty());
    }

    #[test]
    fn backward_dependency_is_rejected() {
        let dependency = SubpassDependency {
            passes: Some(1)..Some(0),
            stages: hal::pso::PipelineStage::TOP_OF_PIPE..hal::pso::PipelineStage::BOTTOM_OF_PIPE,
            accesses: hal::image::Access::empty()..hal::image::Access::empty(),
            flags: hal::memory::Dependencies::empty(),
        };
        let result = RenderPassInfo::new(
            RenderPassId(1),
            vec![color_attachment()],
            vec![color_subpass(0), color_subpass(0)],
            &[dependency],
        );
        assert!(result.is_err());
    }

    #[test]
    fn load_and_store_cover_render_area() {
        let info = Arc::new(
            RenderPassInfo::new(
                RenderPassId(1),
                vec![color_attachment()],
                vec![color_subpass(0)],
                &[],
            )
            .unwrap(),
        );
        let image = ImageInfo {
            id: ImageId(3),
            extent: hal::image::Extent {
                width: 4,
                height: 4,
                depth: 1,
            },
            levels: 1,
            layers: 1,
            aspects: Aspects::COLOR,
            texel_size: 4,
        };
        let view = AttachmentView {
            range: image.full_range(),
            image,
        };
        let mut contexts = ContextArena::new();
        let external = contexts.insert(AccessContext::new());
        let mut rp = RenderPassAccessContext::new(
            info,
            &[Some(view)],
            hal::pso::Rect {
                x: 0,
                y: 0,
                w: 2,
                h: 4,
            },
            external,
        )
        .unwrap();

        let loads = rp.load_accesses(0);
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].usage, COLOR_WRITE);
        assert_eq!(loads[0].ranges.len(), 4);

        rp.record_begin(&mut contexts, None, ResourceUsageTag(1), RecordMode::Record)
            .unwrap();
        rp.record_end(&mut contexts, None, ResourceUsageTag(4), RecordMode::Record)
            .unwrap();
        let map = contexts.get(external).unwrap().map(ResourceKey::Image(ImageId(3))).unwrap();
        // final transition covers the whole image
        assert_eq!(map.get(&60).unwrap().last_write().unwrap().tag, ResourceUsageTag(4));
    }
}
