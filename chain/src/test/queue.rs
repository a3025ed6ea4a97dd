use {
    super::*,
    crate::{
        config::SyncConfig,
        error::HazardKind,
        op::{BarrierSet, SyncOp},
        render_pass::{AttachmentView, RenderPassInfo, SubpassInfo},
        resource::ImageSubresourceRange,
        validator::{
            PresentImage, PresentInfo, SemaphoreSignal, SemaphoreWait, SubmitBatch, SubmitInfo,
            SyncValidator,
        },
    },
    std::sync::Arc,
    syncval_core::{
        hal::{
            image::Layout,
            pass::{Attachment, AttachmentLoadOp, AttachmentOps, AttachmentStoreOp},
        },
        CommandBufferId, RenderPassId, SemaphoreId, SwapchainId,
    },
};

fn fill(id: u64) -> CommandBufferAccessContext {
    let mut cb = CommandBufferAccessContext::new(CommandBufferId(id));
    write_buffer(&mut cb, &buffer(1), 0, 64);
    cb
}

fn clear_image(id: u64) -> CommandBufferAccessContext {
    let mut cb = CommandBufferAccessContext::new(CommandBufferId(id));
    let range = image(1).full_range();
    let access = ResourceAccess::image("image", &image(1), &range, TRANSFER_WRITE).unwrap();
    assert!(cb.record_command("vkCmdClearColorImage", &[access]).unwrap().is_empty());
    cb
}

fn batch<'a>(
    waits: Vec<SemaphoreWait>,
    command_buffers: Vec<&'a CommandBufferAccessContext>,
    signals: Vec<SemaphoreSignal>,
) -> SubmitInfo<'a> {
    SubmitInfo {
        batches: vec![SubmitBatch {
            waits,
            command_buffers,
            signals,
        }],
        fence: None,
    }
}

fn transfer_wait(semaphore: SemaphoreId) -> SemaphoreWait {
    SemaphoreWait {
        semaphore,
        stages: PipelineStageFlags::TRANSFER,
    }
}

fn two_queues() -> (SyncValidator, QueueId, QueueId) {
    let validator = SyncValidator::new(SyncConfig::default());
    let (a, b) = (queue(0), queue(1));
    validator.register_queue(a);
    validator.register_queue(b);
    (validator, a, b)
}

fn present(image_index: u32, waits: Vec<SemaphoreId>) -> PresentInfo {
    PresentInfo {
        waits,
        images: vec![PresentImage {
            swapchain: SwapchainId(1),
            index: image_index,
            image: image(1),
        }],
    }
}

#[test]
fn semaphore_orders_queues() {
    init_logger();
    let (validator, a, b) = two_queues();
    let (first, second) = (fill(1), fill(2));
    let semaphore = SemaphoreId(1);

    let reports = validator
        .queue_submit(a, &batch(Vec::new(), vec![&first], vec![SemaphoreSignal::new(semaphore)]))
        .unwrap();
    assert!(reports.is_empty());
    let reports = validator
        .queue_submit(b, &batch(vec![transfer_wait(semaphore)], vec![&second], Vec::new()))
        .unwrap();
    assert!(reports.is_empty());
}

#[test]
fn unsynchronized_queues_race() {
    init_logger();
    let (validator, a, b) = two_queues();
    let (first, second) = (fill(1), fill(2));

    assert!(validator
        .queue_submit(a, &batch(Vec::new(), vec![&first], Vec::new()))
        .unwrap()
        .is_empty());
    let reports = validator
        .queue_submit(b, &batch(Vec::new(), vec![&second], Vec::new()))
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].hazard(), Some(HazardKind::WriteRacingWrite));
    assert_eq!(reports[0].batch.and_then(|location| location.queue), Some(b));
}

#[test]
fn races_can_be_disabled() {
    let validator = SyncValidator::new(SyncConfig {
        detect_cross_queue_races: false,
        ..SyncConfig::default()
    });
    let (a, b) = (queue(0), queue(1));
    validator.register_queue(a);
    validator.register_queue(b);
    let (first, second) = (fill(1), fill(2));

    validator
        .queue_submit(a, &batch(Vec::new(), vec![&first], Vec::new()))
        .unwrap();
    assert!(validator
        .queue_submit(b, &batch(Vec::new(), vec![&second], Vec::new()))
        .unwrap()
        .is_empty());
}

#[test]
fn acquire_render_present() {
    init_logger();
    let validator = SyncValidator::new(SyncConfig::default());
    let graphics = queue(0);
    validator.register_queue(graphics);
    let (acquired, rendered) = (SemaphoreId(1), SemaphoreId(2));

    validator
        .acquire_next_image(SwapchainId(1), 0, &image(1), Some(acquired), None)
        .unwrap();
    let cb = clear_image(1);
    let reports = validator
        .queue_submit(
            graphics,
            &batch(vec![transfer_wait(acquired)], vec![&cb], vec![SemaphoreSignal::new(rendered)]),
        )
        .unwrap();
    assert!(reports.is_empty());

    let reports = validator.queue_present(graphics, &present(0, vec![rendered])).unwrap();
    assert!(reports.is_empty());
}

#[test]
fn present_without_wait_is_reported() {
    init_logger();
    let validator = SyncValidator::new(SyncConfig::default());
    let graphics = queue(0);
    validator.register_queue(graphics);

    let cb = clear_image(1);
    validator
        .queue_submit(graphics, &batch(Vec::new(), vec![&cb], Vec::new()))
        .unwrap();
    let reports = validator.queue_present(graphics, &present(0, Vec::new())).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].hazard(), Some(HazardKind::PresentAfterWrite));
    assert!(reports[0].message.contains("vkCmdClearColorImage"));
}

fn submit_batches<'a>(batches: Vec<SubmitBatch<'a>>) -> SubmitInfo<'a> {
    SubmitInfo {
        batches,
        fence: None,
    }
}

fn only<'a>(command_buffer: &'a CommandBufferAccessContext) -> SubmitBatch<'a> {
    SubmitBatch {
        waits: Vec::new(),
        command_buffers: vec![command_buffer],
        signals: Vec::new(),
    }
}

fn cleared_color_pass(id: u64) -> CommandBufferAccessContext {
    let attachment = Attachment {
        format: Some(hal::format::Format::Rgba8Unorm),
        samples: 1,
        ops: AttachmentOps::new(AttachmentLoadOp::Clear, AttachmentStoreOp::Store),
        stencil_ops: AttachmentOps::DONT_CARE,
        layouts: Layout::Undefined..Layout::ShaderReadOnlyOptimal,
    };
    let subpass = SubpassInfo {
        colors: vec![(0, Layout::ColorAttachmentOptimal)],
        ..SubpassInfo::default()
    };
    let info = Arc::new(RenderPassInfo::new(RenderPassId(1), vec![attachment], vec![subpass], &[]).unwrap());
    let view = AttachmentView {
        image: image(1),
        range: ImageSubresourceRange {
            aspects: hal::format::Aspects::COLOR,
            levels: 0..1,
            layers: 0..1,
        },
    };
    let area = hal::pso::Rect {
        x: 0,
        y: 0,
        w: 4,
        h: 4,
    };

    let mut cb = CommandBufferAccessContext::new(CommandBufferId(id));
    assert!(cb
        .record_sync_op(SyncOp::begin_render_pass(info, vec![Some(view)], area))
        .unwrap()
        .is_empty());
    assert!(cb.record_sync_op(SyncOp::EndRenderPass).unwrap().is_empty());
    cb
}

#[test]
fn barrier_in_later_batch_orders_earlier_batch() {
    init_logger();
    let validator = SyncValidator::new(SyncConfig::default());
    let compute = queue(0);
    validator.register_queue(compute);

    let write = fill(1);
    let mut read = CommandBufferAccessContext::new(CommandBufferId(2));
    let set = BarrierSet {
        stages: PipelineStageFlags::TRANSFER..PipelineStageFlags::COMPUTE_SHADER,
        memory: vec![AccessFlags::TRANSFER_WRITE..AccessFlags::SHADER_READ],
        buffers: Vec::new(),
        images: Vec::new(),
    };
    read.record_sync_op(SyncOp::pipeline_barrier(&set).unwrap()).unwrap();
    let access = ResourceAccess::buffer("buffer", &buffer(1), 0, Some(16), COMPUTE_READ).unwrap();
    assert!(read.record_command("vkCmdDispatch", &[access]).unwrap().is_empty());

    let reports = validator
        .queue_submit(compute, &submit_batches(vec![only(&write), only(&read)]))
        .unwrap();
    assert!(reports.is_empty());

    // nothing orders the next write after the compute read
    let mut overwrite = CommandBufferAccessContext::new(CommandBufferId(3));
    write_buffer(&mut overwrite, &buffer(1), 0, 16);
    let reports = validator
        .queue_submit(compute, &submit_batches(vec![only(&overwrite)]))
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].hazard(), Some(HazardKind::WriteAfterRead));
}

#[test]
fn resubmitted_render_pass_transitions_after_store() {
    init_logger();
    let validator = SyncValidator::new(SyncConfig::default());
    let graphics = queue(0);
    validator.register_queue(graphics);
    let cb = cleared_color_pass(1);

    let reports = validator
        .queue_submit(graphics, &submit_batches(vec![only(&cb)]))
        .unwrap();
    assert!(reports.is_empty());

    let reports = validator
        .queue_submit(graphics, &submit_batches(vec![only(&cb)]))
        .unwrap();
    assert!(!reports.is_empty());
    assert_eq!(reports[0].hazard(), Some(HazardKind::WriteAfterWrite));
}

#[test]
fn signal_from_last_batch_covers_whole_submission() {
    init_logger();
    let (validator, a, b) = two_queues();
    let semaphore = SemaphoreId(1);
    let (first, third) = (fill(1), fill(3));
    let mut second = CommandBufferAccessContext::new(CommandBufferId(2));
    write_buffer(&mut second, &buffer(2), 0, 64);

    let reports = validator
        .queue_submit(
            a,
            &submit_batches(vec![
                only(&first),
                SubmitBatch {
                    waits: Vec::new(),
                    command_buffers: vec![&second],
                    signals: vec![SemaphoreSignal::new(semaphore)],
                },
            ]),
        )
        .unwrap();
    assert!(reports.is_empty());

    let reports = validator
        .queue_submit(
            b,
            &submit_batches(vec![SubmitBatch {
                waits: vec![transfer_wait(semaphore)],
                command_buffers: vec![&third],
                signals: Vec::new(),
            }]),
        )
        .unwrap();
    assert!(reports.is_empty());
}
