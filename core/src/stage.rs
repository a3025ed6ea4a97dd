//! Pipeline stages and their logical ordering.

use crate::hal;

bitflags::bitflags! {
    /// Pipeline stage flags with Vulkan bit values.
    ///
    /// `PRESENT_ENGINE` is not a device stage. It stands for the presentation engine
    /// which reads presented images and hands acquired ones back.
    #[derive(Default)]
    pub struct PipelineStageFlags: u32 {
        /// Pseudo-stage that comes before any operations.
        const TOP_OF_PIPE = 0x0000_0001;
        /// Indirect buffer reading stage.
        const DRAW_INDIRECT = 0x0000_0002;
        /// Vertex input consuming stage.
        const VERTEX_INPUT = 0x0000_0004;
        /// Vertex shader execution stage.
        const VERTEX_SHADER = 0x0000_0008;
        /// Tessellation control shader execution stage.
        const TESSELLATION_CONTROL_SHADER = 0x0000_0010;
        /// Tessellation evaluation shader execution stage.
        const TESSELLATION_EVALUATION_SHADER = 0x0000_0020;
        /// Geometry shader execution stage.
        const GEOMETRY_SHADER = 0x0000_0040;
        /// Fragment shader execution stage.
        const FRAGMENT_SHADER = 0x0000_0080;
        /// First fragment depth-testing stage.
        const EARLY_FRAGMENT_TESTS = 0x0000_0100;
        /// Last fragment depth-testing stage.
        const LATE_FRAGMENT_TESTS = 0x0000_0200;
        /// Color attachment writing stage.
        const COLOR_ATTACHMENT_OUTPUT = 0x0000_0400;
        /// Compute shader execution stage.
        const COMPUTE_SHADER = 0x0000_0800;
        /// Transfer operation execution stage.
        const TRANSFER = 0x0000_1000;
        /// Pseudo-stage that comes after all operations.
        const BOTTOM_OF_PIPE = 0x0000_2000;
        /// Host access pseudo-stage.
        const HOST = 0x0000_4000;
        /// All graphics pipeline stages.
        const ALL_GRAPHICS = 0x0000_8000;
        /// All stages of all pipelines.
        const ALL_COMMANDS = 0x0001_0000;
        /// Presentation engine pseudo-stage.
        const PRESENT_ENGINE = 0x8000_0000;
    }
}

impl From<hal::pso::PipelineStage> for PipelineStageFlags {
    fn from(stages: hal::pso::PipelineStage) -> Self {
        PipelineStageFlags::from_bits_truncate(stages.bits())
    }
}

impl PipelineStageFlags {
    /// Iterate over single-bit stages set in this mask.
    pub fn iter_bits(self) -> impl Iterator<Item = PipelineStageFlags> {
        let bits = self.bits();
        (0..32)
            .map(|index| 1u32 << index)
            .filter(move |bit| bits & bit != 0)
            .map(PipelineStageFlags::from_bits_truncate)
    }

    /// Index of the lowest stage bit set.
    /// Used to address per-stage tables.
    pub fn index(self) -> usize {
        self.bits().trailing_zeros() as usize
    }

    /// Replace meta stages with the stages they stand for.
    pub fn expand_meta(self) -> Self {
        let mut stages = self;
        if stages.contains(PipelineStageFlags::ALL_COMMANDS) {
            stages |= all_device_stages();
        }
        if stages.contains(PipelineStageFlags::ALL_GRAPHICS) {
            stages |= GraphicsPipelineStage::ALL
                .iter()
                .fold(PipelineStageFlags::empty(), |acc, &stage| acc | stage.into());
        }
        stages - (PipelineStageFlags::ALL_COMMANDS | PipelineStageFlags::ALL_GRAPHICS)
    }

    /// Stages that complete no later than those in `self`.
    ///
    /// Source execution scopes are widened this way.
    pub fn logically_earlier(self) -> Self {
        let stages = self.expand_meta();
        if stages.contains(PipelineStageFlags::BOTTOM_OF_PIPE) {
            return stages | all_device_stages();
        }
        stages
            | extend_through(stages, &GraphicsPipelineStage::ALL, Direction::Earlier)
            | extend_through(stages, &ComputePipelineStage::ALL, Direction::Earlier)
            | extend_through(stages, &TransferPipelineStage::ALL, Direction::Earlier)
    }

    /// Stages that start no earlier than those in `self`.
    ///
    /// Destination execution scopes are widened this way.
    pub fn logically_later(self) -> Self {
        let stages = self.expand_meta();
        if stages.contains(PipelineStageFlags::TOP_OF_PIPE) {
            return stages | all_device_stages();
        }
        stages
            | extend_through(stages, &GraphicsPipelineStage::ALL, Direction::Later)
            | extend_through(stages, &ComputePipelineStage::ALL, Direction::Later)
            | extend_through(stages, &TransferPipelineStage::ALL, Direction::Later)
    }
}

/// Every stage a queue can execute, host included.
pub fn all_device_stages() -> PipelineStageFlags {
    PipelineStageFlags::TOP_OF_PIPE
        | PipelineStageFlags::DRAW_INDIRECT
        | PipelineStageFlags::VERTEX_INPUT
        | PipelineStageFlags::VERTEX_SHADER
        | PipelineStageFlags::TESSELLATION_CONTROL_SHADER
        | PipelineStageFlags::TESSELLATION_EVALUATION_SHADER
        | PipelineStageFlags::GEOMETRY_SHADER
        | PipelineStageFlags::FRAGMENT_SHADER
        | PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | PipelineStageFlags::LATE_FRAGMENT_TESTS
        | PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | PipelineStageFlags::COMPUTE_SHADER
        | PipelineStageFlags::TRANSFER
        | PipelineStageFlags::BOTTOM_OF_PIPE
        | PipelineStageFlags::HOST
}

#[derive(Clone, Copy)]
enum Direction {
    Earlier,
    Later,
}

fn extend_through<S>(stages: PipelineStageFlags, pipeline: &[S], direction: Direction) -> PipelineStageFlags
where
    S: Copy + Into<PipelineStageFlags>,
{
    let flags = pipeline.iter().map(|&stage| stage.into());
    let mut result = PipelineStageFlags::empty();
    match direction {
        Direction::Earlier => {
            let mut prefix = PipelineStageFlags::empty();
            for stage in flags {
                prefix |= stage;
                if stages.contains(stage) {
                    result |= prefix;
                }
            }
        }
        Direction::Later => {
            let mut suffix = PipelineStageFlags::empty();
            for stage in flags.rev() {
                suffix |= stage;
                if stages.contains(stage) {
                    result |= suffix;
                }
            }
        }
    }
    result
}

/// Graphics pipeline stage.
#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq)]
pub enum GraphicsPipelineStage {
    /// Pseudo-stage that comes before any operations.
    TopOfPipe,

    /// Indirect buffer reading stage.
    DrawIndirect,

    /// Vertex input consuming stage.
    VertexInput,

    /// Vertex shader execution stage.
    VertexShader,

    /// Tessellation control shader execution stage.
    TessellationControlShader,

    /// Tessellation evaluation shader execution stage.
    TessellationEvaluationShader,

    /// Geometry shader execution stage.
    GeometryShader,

    /// First fragment depth-testing stage.
    EarlyFragmentTests,

    /// Fragment shader execution stage.
    FragmentShader,

    /// Last fragment depth-testing stage.
    LateFragmentTests,

    /// Color attachment writing stage.
    ColorAttachmentOutput,

    /// Pseudo-stage that comes after all operations.
    BottomOfPipe,
}

impl GraphicsPipelineStage {
    /// Stages in logical order.
    pub const ALL: [GraphicsPipelineStage; 12] = [
        GraphicsPipelineStage::TopOfPipe,
        GraphicsPipelineStage::DrawIndirect,
        GraphicsPipelineStage::VertexInput,
        GraphicsPipelineStage::VertexShader,
        GraphicsPipelineStage::TessellationControlShader,
        GraphicsPipelineStage::TessellationEvaluationShader,
        GraphicsPipelineStage::GeometryShader,
        GraphicsPipelineStage::EarlyFragmentTests,
        GraphicsPipelineStage::FragmentShader,
        GraphicsPipelineStage::LateFragmentTests,
        GraphicsPipelineStage::ColorAttachmentOutput,
        GraphicsPipelineStage::BottomOfPipe,
    ];
}

impl From<GraphicsPipelineStage> for PipelineStageFlags {
    fn from(stage: GraphicsPipelineStage) -> Self {
        match stage {
            GraphicsPipelineStage::TopOfPipe => Self::TOP_OF_PIPE,
            GraphicsPipelineStage::DrawIndirect => Self::DRAW_INDIRECT,
            GraphicsPipelineStage::VertexInput => Self::VERTEX_INPUT,
            GraphicsPipelineStage::VertexShader => Self::VERTEX_SHADER,
            GraphicsPipelineStage::TessellationControlShader => Self::TESSELLATION_CONTROL_SHADER,
            GraphicsPipelineStage::TessellationEvaluationShader => {
                Self::TESSELLATION_EVALUATION_SHADER
            }
            GraphicsPipelineStage::GeometryShader => Self::GEOMETRY_SHADER,
            GraphicsPipelineStage::EarlyFragmentTests => Self::EARLY_FRAGMENT_TESTS,
            GraphicsPipelineStage::FragmentShader => Self::FRAGMENT_SHADER,
            GraphicsPipelineStage::LateFragmentTests => Self::LATE_FRAGMENT_TESTS,
            GraphicsPipelineStage::ColorAttachmentOutput => Self::COLOR_ATTACHMENT_OUTPUT,
            GraphicsPipelineStage::BottomOfPipe => Self::BOTTOM_OF_PIPE,
        }
    }
}

/// Compute pipeline stage.
#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq)]
pub enum ComputePipelineStage {
    /// Pseudo-stage that comes before any operations.
    TopOfPipe,

    /// Indirect buffer reading stage.
    DrawIndirect,

    /// Compute shader execution stage.
    ComputeShader,

    /// Pseudo-stage that comes after all operations.
    BottomOfPipe,
}

impl ComputePipelineStage {
    /// Stages in logical order.
    pub const ALL: [ComputePipelineStage; 4] = [
        ComputePipelineStage::TopOfPipe,
        ComputePipelineStage::DrawIndirect,
        ComputePipelineStage::ComputeShader,
        ComputePipelineStage::BottomOfPipe,
    ];
}

impl From<ComputePipelineStage> for PipelineStageFlags {
    fn from(stage: ComputePipelineStage) -> Self {
        match stage {
            ComputePipelineStage::TopOfPipe => Self::TOP_OF_PIPE,
            ComputePipelineStage::DrawIndirect => Self::DRAW_INDIRECT,
            ComputePipelineStage::ComputeShader => Self::COMPUTE_SHADER,
            ComputePipelineStage::BottomOfPipe => Self::BOTTOM_OF_PIPE,
        }
    }
}

/// Transfer pipeline stage.
#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq)]
pub enum TransferPipelineStage {
    /// Pseudo-stage that comes before any operations.
    TopOfPipe,

    /// Transfer operation execution stage.
    Transfer,

    /// Pseudo-stage that comes after all operations.
    BottomOfPipe,
}

impl TransferPipelineStage {
    /// Stages in logical order.
    pub const ALL: [TransferPipelineStage; 3] = [
        TransferPipelineStage::TopOfPipe,
        TransferPipelineStage::Transfer,
        TransferPipelineStage::BottomOfPipe,
    ];
}

impl From<TransferPipelineStage> for PipelineStageFlags {
    fn from(stage: TransferPipelineStage) -> Self {
        match stage {
            TransferPipelineStage::TopOfPipe => Self::TOP_OF_PIPE,
            TransferPipelineStage::Transfer => Self::TRANSFER,
            TransferPipelineStage::BottomOfPipe => Self::BOTTOM_OF_PIPE,
        }
    }
}
