use ash::vk;
use pretty_assertions::assert_eq;

use super::harness::{make_renderer, Event};
use crate::backend::{AttachmentClear, SubmitKind};
use crate::state::{ClearOptions, PrimitiveType, Rect, Vec4, Viewport};

/// End-to-end: clear the backbuffer red, present. Exactly one render
/// pass, one clear inside it, one blit into the acquired swapchain
/// image, and the frame fence armed at submission.
#[test]
fn clear_then_present_records_one_pass_one_clear_one_blit() {
    let mut renderer = make_renderer(1280, 720);

    renderer
        .clear(
            ClearOptions::TARGET,
            Vec4 {
                x: 1.0,
                y: 0.0,
                z: 0.0,
                w: 1.0,
            },
            0.0,
            0,
        )
        .unwrap();
    renderer.swap_buffers(None, None).unwrap();

    let backend = renderer.backend();
    assert_eq!(backend.count(|e| matches!(e, Event::BeginRenderPass)), 1);
    assert_eq!(
        backend.count(|e| matches!(e, Event::ClearAttachments { .. })),
        1
    );
    assert_eq!(backend.count(|e| matches!(e, Event::Blit { .. })), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::Present(_))), 1);

    // The clear carries the requested color.
    let clear = backend
        .events
        .iter()
        .find_map(|e| match e {
            Event::ClearAttachments { clears } => Some(clears.clone()),
            _ => None,
        })
        .unwrap();
    assert!(clear.contains(&AttachmentClear::Color {
        attachment: 0,
        value: [1.0, 0.0, 0.0, 1.0],
    }));

    // Ordering: pass begins, clear lands inside it, the pass ends
    // before the blit, and the frame is submitted before present.
    let begin = backend.position(|e| matches!(e, Event::BeginRenderPass)).unwrap();
    let clear = backend
        .position(|e| matches!(e, Event::ClearAttachments { .. }))
        .unwrap();
    let end = backend.position(|e| matches!(e, Event::EndRenderPass)).unwrap();
    let blit = backend.position(|e| matches!(e, Event::Blit { .. })).unwrap();
    let submit = backend
        .position(|e| matches!(e, Event::Submit { kind: SubmitKind::Frame, .. }))
        .unwrap();
    let present = backend.position(|e| matches!(e, Event::Present(_))).unwrap();
    assert!(begin < clear && clear < end && end < blit && blit < submit && submit < present);
}

#[test]
fn present_path_issues_the_four_expected_transitions() {
    let mut renderer = make_renderer(1280, 720);
    renderer.swap_buffers(None, None).unwrap();

    let barriers: Vec<(vk::ImageLayout, vk::ImageLayout)> = renderer
        .backend()
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Barrier { old, new } => Some((*old, *new)),
            _ => None,
        })
        .collect();

    assert_eq!(
        barriers,
        vec![
            (
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL
            ),
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            ),
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR
            ),
            (
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            ),
        ]
    );
}

#[test]
fn begin_frame_is_idempotent_within_a_frame() {
    let mut renderer = make_renderer(1280, 720);

    renderer.begin_frame().unwrap();
    renderer.begin_frame().unwrap();
    renderer.begin_frame().unwrap();

    let backend = renderer.backend();
    assert_eq!(backend.count(|e| matches!(e, Event::WaitFence)), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::AcquireImage(_))), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::ResetCommandPool)), 1);
}

#[test]
fn present_reopens_the_frame_machine() {
    let mut renderer = make_renderer(1280, 720);

    renderer.swap_buffers(None, None).unwrap();
    renderer.swap_buffers(None, None).unwrap();

    let backend = renderer.backend();
    assert_eq!(backend.count(|e| matches!(e, Event::WaitFence)), 2);
    assert_eq!(backend.count(|e| matches!(e, Event::Present(_))), 2);
    // Swapchain images rotate frame to frame.
    assert!(backend.events.contains(&Event::AcquireImage(0)));
    assert!(backend.events.contains(&Event::AcquireImage(1)));
}

#[test]
fn clears_between_passes_are_deferred_until_the_pass_begins() {
    let mut renderer = make_renderer(1280, 720);

    renderer
        .clear(
            ClearOptions::TARGET | ClearOptions::DEPTH_BUFFER,
            Vec4::default(),
            1.0,
            0,
        )
        .unwrap();
    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::ClearAttachments { .. })),
        0
    );

    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    let backend = renderer.backend();
    let begin = backend.position(|e| matches!(e, Event::BeginRenderPass)).unwrap();
    let clear = backend
        .position(|e| matches!(e, Event::ClearAttachments { .. }))
        .unwrap();
    let draw = backend.position(|e| matches!(e, Event::Draw { .. })).unwrap();
    assert!(begin < clear && clear < draw);

    // The deferred depth clear targets the depth aspect as well.
    let clears = backend
        .events
        .iter()
        .find_map(|e| match e {
            Event::ClearAttachments { clears } => Some(clears.clone()),
            _ => None,
        })
        .unwrap();
    assert!(clears
        .iter()
        .any(|c| matches!(c, AttachmentClear::DepthStencil { depth: Some(_), .. })));
}

#[test]
fn mid_pass_clear_is_recorded_immediately() {
    let mut renderer = make_renderer(1280, 720);
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    renderer
        .clear(ClearOptions::TARGET, Vec4::default(), 0.0, 0)
        .unwrap();

    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::ClearAttachments { .. })),
        1
    );
    // No second pass was opened for it.
    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::BeginRenderPass)),
        1
    );
}

#[test]
fn viewport_changes_mid_pass_reissue_dynamic_state() {
    let mut renderer = make_renderer(1280, 720);
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();
    let before = renderer.backend().count(|e| matches!(e, Event::SetViewport));

    renderer.set_viewport(Viewport {
        x: 10,
        y: 10,
        w: 100,
        h: 100,
        min_depth: 0.0,
        max_depth: 1.0,
    });
    // Same value again: no redundant command.
    renderer.set_viewport(Viewport {
        x: 10,
        y: 10,
        w: 100,
        h: 100,
        min_depth: 0.0,
        max_depth: 1.0,
    });

    assert_eq!(
        renderer.backend().count(|e| matches!(e, Event::SetViewport)),
        before + 1
    );
}

#[test]
fn scissor_rect_respects_the_enable_flag() {
    let mut renderer = make_renderer(1280, 720);
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    let before = renderer.backend().count(|e| matches!(e, Event::SetScissor));
    renderer.set_scissor_rect(Rect {
        x: 5,
        y: 5,
        w: 50,
        h: 50,
    });
    assert_eq!(
        renderer.backend().count(|e| matches!(e, Event::SetScissor)),
        before + 1
    );
}

#[test]
fn user_draws_share_a_growing_scratch_buffer() {
    let mut renderer = make_renderer(1280, 720);
    let triangle: [[f32; 3]; 3] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
    ];
    let bytes: &[u8] = bytemuck::cast_slice(&triangle);

    renderer
        .draw_user_primitives(PrimitiveType::TriangleList, bytes, 0, 1, 12)
        .unwrap();
    renderer
        .draw_user_primitives(PrimitiveType::TriangleList, bytes, 0, 1, 12)
        .unwrap();

    // Consecutive user draws append into the same scratch buffer so the
    // GPU can still read the first region.
    let bind_offsets: Vec<u64> = renderer
        .backend()
        .events
        .iter()
        .filter_map(|e| match e {
            Event::BindVertexBuffer { slot: 0, offset, .. } => Some(*offset),
            _ => None,
        })
        .collect();
    assert_eq!(bind_offsets, vec![0, 36]);
    assert_eq!(renderer.backend().count(|e| matches!(e, Event::Draw { .. })), 2);
}

#[test]
fn command_buffers_are_reused_across_frames() {
    let mut renderer = make_renderer(1280, 720);

    renderer.swap_buffers(None, None).unwrap();
    let allocated_first = renderer
        .backend()
        .count(|e| matches!(e, Event::AllocateCommandBuffer(_)));

    renderer.swap_buffers(None, None).unwrap();
    let allocated_second = renderer
        .backend()
        .count(|e| matches!(e, Event::AllocateCommandBuffer(_)));

    // The pool reset returns the old command buffers; nothing new is
    // allocated for an identical second frame.
    assert_eq!(allocated_first, allocated_second);
}
