//! Scenarios spanning command buffers, render passes and queues.

mod command_buffer;
mod queue;

use {
    crate::{
        command::{CommandBufferAccessContext, ResourceAccess},
        resource::{BufferInfo, ImageInfo},
    },
    syncval_core::{
        hal::{self, queue::QueueFamilyId},
        AccessFlags, BufferId, ImageId, PipelineStageFlags, QueueId, StageAccess,
    },
};

fn init_logger() {
    let _ = simple_logger::init_with_level(log::Level::Debug);
}

fn queue(family: usize) -> QueueId {
    QueueId::new(QueueFamilyId(family), 0)
}

fn buffer(id: u64) -> BufferInfo {
    BufferInfo {
        id: BufferId(id),
        size: 256,
    }
}

fn image(id: u64) -> ImageInfo {
    ImageInfo {
        id: ImageId(id),
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

const TRANSFER_WRITE: StageAccess =
    StageAccess::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE);
const TRANSFER_READ: StageAccess =
    StageAccess::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_READ);
const COMPUTE_READ: StageAccess =
    StageAccess::new(PipelineStageFlags::COMPUTE_SHADER, AccessFlags::SHADER_READ);

fn write_buffer(cb: &mut CommandBufferAccessContext, buffer: &BufferInfo, offset: u64, size: u64) -> usize {
    let access = ResourceAccess::buffer("dstBuffer", buffer, offset, Some(size), TRANSFER_WRITE).unwrap();
    cb.record_command("vkCmdFillBuffer", &[access]).unwrap().len()
}
