//! Frame loop tests against the in-memory device.

use std::time::Duration;

use framepipe_renderer::{
    CompositionMode, DrawState, FrameConfig, FrameError, FrameOutcome, FramePhase, FramePipeline,
    SkipReason, select_surface_format,
};
use framepipe_rhi::mock::{GpuEvent, MockGpu, pack_color};
use framepipe_rhi::vk::{self, Handle};
use framepipe_rhi::QueueKind;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const CLEAR: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

fn draw_state(color_format: vk::Format) -> DrawState {
    DrawState {
        pipeline: vk::Pipeline::from_raw(1),
        color_format,
        vertex_buffer: vk::Buffer::from_raw(2),
        vertex_offset: 0,
        index_buffer: vk::Buffer::from_raw(3),
        index_type: vk::IndexType::UINT16,
        index_count: 6,
    }
}

fn config(composition: CompositionMode) -> FrameConfig {
    FrameConfig {
        composition,
        clear_color: CLEAR,
        ..FrameConfig::default()
    }
}

fn direct(gpu: &MockGpu) -> FramePipeline<'_, MockGpu> {
    let config = config(CompositionMode::Direct);
    let format = select_surface_format(gpu, &config).unwrap().format;
    FramePipeline::create(gpu, config, draw_state(format)).unwrap()
}

fn blit(gpu: &MockGpu, color_format: vk::Format) -> FramePipeline<'_, MockGpu> {
    FramePipeline::create(gpu, config(CompositionMode::Blit), draw_state(color_format)).unwrap()
}

fn presented_slot(outcome: FrameOutcome) -> usize {
    match outcome {
        FrameOutcome::Presented { slot, .. } => slot,
        other => panic!("expected a presented frame, got {other:?}"),
    }
}

fn fence_waits(gpu: &MockGpu) -> Vec<bool> {
    gpu.events()
        .into_iter()
        .filter_map(|e| match e {
            GpuEvent::FenceWait { blocked, .. } => Some(blocked),
            _ => None,
        })
        .collect()
}

fn assert_no_violations(gpu: &MockGpu) {
    let violations = gpu.violations();
    assert!(violations.is_empty(), "{:?}", violations);
}

fn assert_all_released(gpu: &MockGpu) {
    assert_eq!(gpu.live_semaphores(), 0);
    assert_eq!(gpu.live_fences(), 0);
    assert_eq!(gpu.live_command_buffers(), 0);
    assert_eq!(gpu.live_offscreen_images(), 0);
    assert_eq!(gpu.live_views(), 0);
    assert_eq!(gpu.live_framebuffers(), 0);
    assert_eq!(gpu.live_render_passes(), 0);
    assert_eq!(gpu.live_swapchains(), 0);
}

#[test]
fn test_five_frames_cycle_two_slots() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);

    let slots: Vec<usize> = (0..5)
        .map(|_| presented_slot(pipeline.render_frame().unwrap()))
        .collect();

    assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    assert_eq!(fence_waits(&gpu), vec![false, false, true, true, true]);
    assert_eq!(pipeline.frames_presented(), 5);
    assert_eq!(pipeline.frame_index(), 1);
    assert_eq!(pipeline.phase(), FramePhase::Idle);
    assert_no_violations(&gpu);
}

#[test]
fn test_three_frames_in_flight_block_from_fourth_frame() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let config = FrameConfig {
        frames_in_flight: 3,
        ..config(CompositionMode::Direct)
    };
    let format = select_surface_format(&gpu, &config).unwrap().format;
    let mut pipeline = FramePipeline::create(&gpu, config, draw_state(format)).unwrap();

    let slots: Vec<usize> = (0..5)
        .map(|_| presented_slot(pipeline.render_frame().unwrap()))
        .collect();

    assert_eq!(slots, vec![0, 1, 2, 0, 1]);
    assert_eq!(fence_waits(&gpu), vec![false, false, false, true, true]);
    assert_no_violations(&gpu);
}

#[test]
fn test_slot_fence_is_waited_before_recording() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    for _ in 0..6 {
        pipeline.render_frame().unwrap();
    }

    let slots: Vec<(vk::Fence, vk::CommandBuffer)> = (0..2)
        .map(|i| {
            let slot = pipeline.synchronizer().slot(i).unwrap();
            (slot.in_flight_fence(), slot.command_buffer())
        })
        .collect();

    let mut waited = [false; 2];
    let mut recordings = 0;
    for event in gpu.events() {
        match event {
            GpuEvent::FenceWait { fence, .. } => {
                if let Some(i) = slots.iter().position(|&(f, _)| f == fence) {
                    waited[i] = true;
                }
            }
            GpuEvent::CommandBufferBegin(cmd) => {
                let i = slots.iter().position(|&(_, c)| c == cmd).unwrap();
                assert!(waited[i], "slot {} recorded before its fence wait", i);
                waited[i] = false;
                recordings += 1;
            }
            _ => {}
        }
    }
    assert_eq!(recordings, 6);
}

#[test]
fn test_direct_submission_chain() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    gpu.clear_events();

    let image_index = match pipeline.render_frame().unwrap() {
        FrameOutcome::Presented { image_index, .. } => image_index,
        other => panic!("unexpected {other:?}"),
    };

    let slot = *pipeline.synchronizer().slot(0).unwrap();
    let present_ready = pipeline.surface().present_ready(image_index).unwrap();
    let events = gpu.events();

    let submits: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            GpuEvent::Submit {
                queue,
                wait_semaphores,
                signal_semaphores,
                fence,
                ..
            } => Some((*queue, wait_semaphores.clone(), signal_semaphores.clone(), *fence)),
            _ => None,
        })
        .collect();
    assert_eq!(
        submits,
        vec![(
            QueueKind::Graphics,
            vec![slot.image_available()],
            vec![present_ready],
            slot.in_flight_fence()
        )]
    );

    assert!(events.contains(&GpuEvent::Present {
        image_index,
        wait_semaphores: vec![present_ready],
    }));
}

#[test]
fn test_acquired_images_rotate_through_the_ring() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);

    let indices: Vec<u32> = (0..5)
        .map(|_| match pipeline.render_frame().unwrap() {
            FrameOutcome::Presented { image_index, .. } => image_index,
            other => panic!("unexpected {other:?}"),
        })
        .collect();

    assert_eq!(pipeline.surface().image_count(), 3);
    assert_eq!(indices, vec![0, 1, 2, 0, 1]);
    assert!((0..3).all(|i| !pipeline.surface().is_borrowed(i)));
    assert_no_violations(&gpu);
}

#[test]
fn test_three_slots_over_a_two_image_ring() {
    let gpu = MockGpu::new(WIDTH, HEIGHT)
        .with_image_count(2, 2)
        .with_present_modes(&[vk::PresentModeKHR::FIFO]);
    let config = FrameConfig {
        frames_in_flight: 3,
        ..config(CompositionMode::Direct)
    };
    let format = select_surface_format(&gpu, &config).unwrap().format;
    let mut pipeline = FramePipeline::create(&gpu, config, draw_state(format)).unwrap();

    assert_eq!(pipeline.surface().image_count(), 2);
    assert_eq!(pipeline.surface().present_mode(), vk::PresentModeKHR::FIFO);

    let frames: Vec<(usize, u32)> = (0..5)
        .map(|_| match pipeline.render_frame().unwrap() {
            FrameOutcome::Presented {
                slot, image_index, ..
            } => (slot, image_index),
            other => panic!("unexpected {other:?}"),
        })
        .collect();

    assert_eq!(frames, vec![(0, 0), (1, 1), (2, 0), (0, 1), (1, 0)]);
    assert_eq!(pipeline.composition().targets().len(), 2);
    assert_no_violations(&gpu);
}

#[test]
fn test_direct_frames_present_the_clear_color() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    pipeline.render_frame().unwrap();
    pipeline.render_frame().unwrap();

    let frames = gpu.presented_frames();
    assert_eq!(frames.len(), 2);
    for frame in frames {
        assert_eq!(
            frame.extent,
            vk::Extent2D {
                width: WIDTH,
                height: HEIGHT
            }
        );
        assert!(frame.pixels.iter().all(|&p| p == pack_color(CLEAR)));
    }
}

#[test]
fn test_resize_between_frames_retries_on_same_slot() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 0);
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 1);

    gpu.set_window_extent(100, 80);
    pipeline.notify_resize().unwrap();

    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::SurfaceRebuilt)
    );
    assert_eq!(pipeline.frame_index(), 0);
    assert_eq!(pipeline.frames_presented(), 2);

    let resized = vk::Extent2D {
        width: 100,
        height: 80,
    };
    match pipeline.render_frame().unwrap() {
        FrameOutcome::Presented { slot, extent, .. } => {
            assert_eq!(slot, 0);
            assert_eq!(extent, resized);
        }
        other => panic!("unexpected {other:?}"),
    }

    let last = gpu.presented_frames().pop().unwrap();
    assert_eq!(last.extent, resized);
    assert_eq!(last.pixels.len(), 100 * 80);
    assert!(last.pixels.iter().all(|&p| p == pack_color(CLEAR)));

    assert_eq!(pipeline.extent(), resized);
    assert_eq!(gpu.live_swapchains(), 1);
    assert_eq!(gpu.live_views(), 3);
    assert_eq!(gpu.live_framebuffers(), 3);
    assert_no_violations(&gpu);
}

#[test]
fn test_window_resize_without_notification_is_detected() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    pipeline.render_frame().unwrap();

    gpu.set_window_extent(32, 32);

    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::SurfaceRebuilt)
    );
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 1);
    assert_no_violations(&gpu);
}

#[test]
fn test_out_of_date_acquire_rebuilds() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);

    gpu.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::SurfaceRebuilt)
    );
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 0);
    assert_no_violations(&gpu);
}

#[test]
fn test_stale_present_does_not_advance() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);

    gpu.push_present_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::PresentStale)
    );
    assert_eq!(pipeline.frame_index(), 0);
    assert_eq!(pipeline.frames_presented(), 0);

    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::SurfaceRebuilt)
    );
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 0);
    assert_eq!(pipeline.frame_index(), 1);
    assert_no_violations(&gpu);
}

#[test]
fn test_suboptimal_acquire_presents_then_rebuilds() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);

    gpu.push_acquire_result(vk::Result::SUBOPTIMAL_KHR);
    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::PresentStale)
    );
    assert_eq!(gpu.presented_frames().len(), 1);

    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::SurfaceRebuilt)
    );
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 0);
    assert_no_violations(&gpu);
}

#[test]
fn test_rebuild_twice_leaks_nothing() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    pipeline.render_frame().unwrap();

    let semaphores = gpu.live_semaphores();
    let views = gpu.live_views();
    let framebuffers = gpu.live_framebuffers();

    pipeline.rebuild_targets().unwrap();
    let first: Vec<_> = pipeline.surface().images().to_vec();
    pipeline.rebuild_targets().unwrap();

    assert_eq!(gpu.live_swapchains(), 1);
    assert_eq!(gpu.live_semaphores(), semaphores);
    assert_eq!(gpu.live_views(), views);
    assert_eq!(gpu.live_framebuffers(), framebuffers);
    assert_eq!(pipeline.composition().targets().len(), 3);
    assert_ne!(pipeline.surface().images(), first.as_slice());

    presented_slot(pipeline.render_frame().unwrap());
    assert_no_violations(&gpu);
}

#[test]
fn test_minimized_window_skips_without_touching_the_device() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    pipeline.render_frame().unwrap();

    gpu.set_window_extent(0, 0);
    gpu.clear_events();
    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::Minimized)
    );
    assert!(gpu.events().is_empty());
    assert_eq!(pipeline.frame_index(), 1);

    gpu.set_window_extent(WIDTH, HEIGHT);
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 1);
    assert_no_violations(&gpu);
}

#[test]
fn test_blit_mode_converts_offscreen_onto_presentable_images() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = blit(&gpu, vk::Format::R8G8B8A8_UNORM);

    assert_eq!(pipeline.composition().offscreen_images().len(), 2);
    assert_eq!(gpu.live_offscreen_images(), 2);

    for _ in 0..3 {
        presented_slot(pipeline.render_frame().unwrap());
    }

    let frames = gpu.presented_frames();
    assert_eq!(frames.len(), 3);
    for frame in frames {
        assert!(frame.pixels.iter().all(|&p| p == pack_color(CLEAR)));
    }
    assert_no_violations(&gpu);
}

#[test]
fn test_blit_mode_submission_chain() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let config = config(CompositionMode::Blit);
    let format = select_surface_format(&gpu, &config).unwrap().format;
    let mut pipeline = FramePipeline::create(&gpu, config, draw_state(format)).unwrap();
    gpu.clear_events();

    let image_index = match pipeline.render_frame().unwrap() {
        FrameOutcome::Presented { image_index, .. } => image_index,
        other => panic!("unexpected {other:?}"),
    };

    let slot = *pipeline.synchronizer().slot(0).unwrap();
    let present_ready = pipeline.surface().present_ready(image_index).unwrap();
    let submits: Vec<_> = gpu
        .events()
        .into_iter()
        .filter_map(|e| match e {
            GpuEvent::Submit {
                queue,
                wait_semaphores,
                signal_semaphores,
                fence,
                ..
            } => Some((queue, wait_semaphores, signal_semaphores, fence)),
            _ => None,
        })
        .collect();

    assert_eq!(
        submits,
        vec![
            (
                QueueKind::Graphics,
                Vec::<vk::Semaphore>::new(),
                vec![slot.render_done()],
                vk::Fence::null()
            ),
            (
                QueueKind::Transfer,
                vec![slot.image_available(), slot.render_done()],
                vec![present_ready],
                slot.in_flight_fence()
            ),
        ]
    );
    assert_no_violations(&gpu);
}

#[test]
fn test_format_conversion_needs_a_graphics_capable_transfer_queue() {
    let gpu = MockGpu::new(WIDTH, HEIGHT).with_transfer_queue_flags(vk::QueueFlags::TRANSFER);

    let result = FramePipeline::create(
        &gpu,
        config(CompositionMode::Blit),
        draw_state(vk::Format::R8G8B8A8_UNORM),
    );
    assert!(matches!(result, Err(FrameError::Configuration(_))));
    assert_all_released(&gpu);
}

#[test]
fn test_transfer_only_queue_copies_same_format_frames() {
    let gpu = MockGpu::new(WIDTH, HEIGHT).with_transfer_queue_flags(vk::QueueFlags::TRANSFER);
    let config = config(CompositionMode::Blit);
    let format = select_surface_format(&gpu, &config).unwrap().format;
    let mut pipeline = FramePipeline::create(&gpu, config, draw_state(format)).unwrap();

    for _ in 0..3 {
        presented_slot(pipeline.render_frame().unwrap());
    }

    let frames = gpu.presented_frames();
    assert_eq!(frames.len(), 3);
    assert!(frames[2].pixels.iter().all(|&p| p == pack_color(CLEAR)));
    assert_no_violations(&gpu);
}

#[test]
fn test_blit_barriers_start_at_the_transfer_wait_stage() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = blit(&gpu, vk::Format::R8G8B8A8_UNORM);
    presented_slot(pipeline.render_frame().unwrap());

    let transfer = pipeline
        .synchronizer()
        .slot(0)
        .unwrap()
        .transfer_command_buffer()
        .unwrap();
    let stages = gpu.barrier_stages(transfer);
    assert_eq!(stages.len(), 3);
    for (src_stage, dst_stage) in &stages[..2] {
        assert_eq!(*src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(*dst_stage, vk::PipelineStageFlags::TRANSFER);
    }
}

#[test]
fn test_blit_copy_reproduces_rendered_image() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let config = config(CompositionMode::Blit);
    let format = select_surface_format(&gpu, &config).unwrap().format;
    let mut pipeline = FramePipeline::create(&gpu, config, draw_state(format)).unwrap();

    pipeline.render_frame().unwrap();

    let source = pipeline.composition().offscreen_images()[0];
    let frame = gpu.presented_frames().pop().unwrap();
    assert_eq!(Some(frame.pixels), gpu.image_pixels(source));
    assert_no_violations(&gpu);
}

#[test]
fn test_blit_targets_follow_surface_resize() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = blit(&gpu, vk::Format::R8G8B8A8_UNORM);
    pipeline.render_frame().unwrap();

    gpu.set_window_extent(80, 40);
    pipeline.notify_resize().unwrap();
    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::SurfaceRebuilt)
    );

    let resized = vk::Extent2D {
        width: 80,
        height: 40,
    };
    assert_eq!(pipeline.composition().render_extent(), resized);
    assert_eq!(gpu.live_offscreen_images(), 2);

    presented_slot(pipeline.render_frame().unwrap());
    assert_eq!(gpu.presented_frames().pop().unwrap().extent, resized);
    assert_no_violations(&gpu);
}

#[test]
fn test_fixed_offscreen_extent_survives_resize_then_mismatches() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let config = FrameConfig {
        offscreen_extent: Some([WIDTH, HEIGHT]),
        ..config(CompositionMode::Blit)
    };
    let mut pipeline =
        FramePipeline::create(&gpu, config, draw_state(vk::Format::R8G8B8A8_UNORM)).unwrap();
    presented_slot(pipeline.render_frame().unwrap());

    let offscreen = pipeline.composition().offscreen_images().to_vec();
    gpu.set_window_extent(100, 80);
    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::SurfaceRebuilt)
    );
    assert_eq!(pipeline.composition().offscreen_images(), offscreen.as_slice());

    assert!(matches!(
        pipeline.render_frame(),
        Err(FrameError::Configuration(_))
    ));
    assert_eq!(pipeline.phase(), FramePhase::Terminated);
    assert!(matches!(
        pipeline.render_frame(),
        Err(FrameError::Terminated)
    ));

    pipeline.shutdown().unwrap();
    assert_all_released(&gpu);
}

#[test]
fn test_out_of_memory_submit_is_retried_once() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);

    gpu.push_submit_result(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 0);
    assert_eq!(pipeline.frames_presented(), 1);
    assert_no_violations(&gpu);
}

#[test]
fn test_repeated_out_of_memory_abandons_the_frame_and_recovers() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    let abandoned = *pipeline.synchronizer().current();

    gpu.push_submit_result(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    gpu.push_submit_result(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    match pipeline.render_frame() {
        Err(FrameError::TransientSubmitFailure { queue, result }) => {
            assert_eq!(queue, QueueKind::Graphics);
            assert_eq!(result, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        }
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(pipeline.phase(), FramePhase::Idle);
    assert_eq!(pipeline.frame_index(), 0);
    assert!(pipeline.surface().is_invalidated());
    let renewed = *pipeline.synchronizer().current();
    assert_ne!(renewed.in_flight_fence(), abandoned.in_flight_fence());
    assert_ne!(renewed.image_available(), abandoned.image_available());

    assert_eq!(
        pipeline.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::SurfaceRebuilt)
    );
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 0);
    assert_eq!(presented_slot(pipeline.render_frame().unwrap()), 1);
    assert_eq!(pipeline.frames_presented(), 2);
    assert!(pipeline.notify_resize().is_ok());
    assert_no_violations(&gpu);

    pipeline.shutdown().unwrap();
    assert_all_released(&gpu);
}

#[test]
fn test_other_submit_failures_still_terminate() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);

    gpu.push_submit_result(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    gpu.push_submit_result(vk::Result::ERROR_INITIALIZATION_FAILED);
    assert!(matches!(pipeline.render_frame(), Err(FrameError::Rhi(_))));
    assert_eq!(pipeline.phase(), FramePhase::Terminated);
    assert!(matches!(
        pipeline.notify_resize(),
        Err(FrameError::Terminated)
    ));

    pipeline.shutdown().unwrap();
    assert_all_released(&gpu);
}

#[test]
fn test_device_loss_terminates() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    pipeline.render_frame().unwrap();
    pipeline.render_frame().unwrap();

    gpu.lose_device();
    assert!(matches!(pipeline.render_frame(), Err(FrameError::DeviceLost)));
    assert_eq!(pipeline.phase(), FramePhase::Terminated);

    assert!(matches!(pipeline.shutdown(), Err(FrameError::DeviceLost)));
    assert_all_released(&gpu);
}

#[test]
fn test_stalled_gpu_times_out() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let config = FrameConfig {
        fence_timeout_ms: 50,
        ..config(CompositionMode::Direct)
    };
    let format = select_surface_format(&gpu, &config).unwrap().format;
    let mut pipeline = FramePipeline::create(&gpu, config, draw_state(format)).unwrap();
    pipeline.render_frame().unwrap();
    pipeline.render_frame().unwrap();

    gpu.set_stalled(true);
    match pipeline.render_frame() {
        Err(FrameError::FenceTimeout { slot, timeout }) => {
            assert_eq!(slot, 0);
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("unexpected {other:?}"),
    }

    gpu.set_stalled(false);
    pipeline.shutdown().unwrap();
    assert_all_released(&gpu);
}

#[test]
fn test_create_rejects_bad_configuration() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let srgb = draw_state(vk::Format::B8G8R8A8_SRGB);

    let too_many = FrameConfig {
        frames_in_flight: 4,
        ..FrameConfig::default()
    };
    assert!(matches!(
        FramePipeline::create(&gpu, too_many, srgb),
        Err(FrameError::Configuration(_))
    ));

    let null_pipeline = DrawState {
        pipeline: vk::Pipeline::null(),
        ..srgb
    };
    assert!(matches!(
        FramePipeline::create(&gpu, FrameConfig::default(), null_pipeline),
        Err(FrameError::Configuration(_))
    ));

    let wrong_format = draw_state(vk::Format::R8G8B8A8_UNORM);
    assert!(matches!(
        FramePipeline::create(&gpu, FrameConfig::default(), wrong_format),
        Err(FrameError::Configuration(_))
    ));

    assert_all_released(&gpu);
}

#[test]
fn test_create_rejects_zero_sized_surface() {
    let gpu = MockGpu::new(0, 0);
    let result = FramePipeline::create(
        &gpu,
        FrameConfig::default(),
        draw_state(vk::Format::B8G8R8A8_SRGB),
    );
    assert!(matches!(result, Err(FrameError::Configuration(_))));
    assert_all_released(&gpu);
}

#[test]
fn test_create_rejects_unsupported_presentable_usage() {
    let gpu = MockGpu::new(WIDTH, HEIGHT).with_supported_usage(vk::ImageUsageFlags::TRANSFER_DST);
    let result = FramePipeline::create(
        &gpu,
        FrameConfig::default(),
        draw_state(vk::Format::B8G8R8A8_SRGB),
    );
    assert!(matches!(result, Err(FrameError::Configuration(_))));

    // Blit mode only copies into presentable images.
    let pipeline = FramePipeline::create(
        &gpu,
        config(CompositionMode::Blit),
        draw_state(vk::Format::R8G8B8A8_UNORM),
    );
    assert!(pipeline.is_ok());
}

#[test]
fn test_shutdown_is_idempotent_and_releases_everything() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = blit(&gpu, vk::Format::R8G8B8A8_UNORM);
    for _ in 0..3 {
        pipeline.render_frame().unwrap();
    }

    pipeline.shutdown().unwrap();
    pipeline.shutdown().unwrap();

    assert_eq!(pipeline.phase(), FramePhase::Terminated);
    assert!(matches!(
        pipeline.render_frame(),
        Err(FrameError::Terminated)
    ));
    assert_all_released(&gpu);
    assert_no_violations(&gpu);
}

#[test]
fn test_drop_releases_everything() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    {
        let mut pipeline = direct(&gpu);
        pipeline.render_frame().unwrap();
        pipeline.render_frame().unwrap();
    }
    assert!(gpu.events().contains(&GpuEvent::WaitIdle));
    assert_all_released(&gpu);
    assert_no_violations(&gpu);
}

#[test]
fn test_idle_wait_precedes_rebuild() {
    let gpu = MockGpu::new(WIDTH, HEIGHT);
    let mut pipeline = direct(&gpu);
    pipeline.render_frame().unwrap();
    gpu.clear_events();

    pipeline.notify_resize().unwrap();
    pipeline.render_frame().unwrap();

    let events = gpu.events();
    let idle = events
        .iter()
        .position(|e| *e == GpuEvent::WaitIdle)
        .unwrap();
    let created = events
        .iter()
        .position(|e| matches!(e, GpuEvent::SwapchainCreated { .. }))
        .unwrap();
    assert!(idle < created);
}
