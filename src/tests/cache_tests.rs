use pretty_assertions::assert_eq;

use super::harness::{make_renderer, make_renderer_no_depth, Event};
use crate::renderer::RenderTargetBinding;
use crate::state::{
    Color, DepthFormat, PrimitiveType, SamplerState, SurfaceFormat,
};

#[test]
fn two_identical_draws_miss_the_pipeline_cache_once() {
    let mut renderer = make_renderer(1280, 720);

    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    let stats = renderer.pipeline_cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::CreatePipeline(_))),
        1
    );
    // The second draw reuses the bound pipeline outright.
    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::BindPipeline(_))),
        1
    );
}

#[test]
fn topology_change_rebuilds_the_pipeline() {
    let mut renderer = make_renderer(1280, 720);

    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();
    renderer
        .draw_primitives(PrimitiveType::LineList, 0, 1)
        .unwrap();
    // Back to a topology the cache has seen: a hit, but a fresh bind.
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    let stats = renderer.pipeline_cache_stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::CreatePipeline(_))),
        2
    );
    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::BindPipeline(_))),
        3
    );
}

#[test]
fn dynamic_state_changes_never_miss_the_cache() {
    let mut renderer = make_renderer(1280, 720);

    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    renderer.set_blend_factor(Color {
        r: 128,
        g: 0,
        b: 0,
        a: 255,
    });
    renderer.set_reference_stencil(7);

    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    assert_eq!(renderer.pipeline_cache_stats().misses, 1);
    // The changes went out as command-buffer state instead.
    assert!(renderer
        .backend()
        .events
        .contains(&Event::SetStencilReference(7)));
    assert!(renderer
        .backend()
        .count(|e| matches!(e, Event::SetBlendConstants(_)))
        >= 2);
}

#[test]
fn render_target_switch_with_same_attachment_count_gets_its_own_framebuffer() {
    let mut renderer = make_renderer_no_depth(256, 256);
    let target = renderer
        .create_texture_2d(SurfaceFormat::Color, 256, 256, 1, true)
        .unwrap();

    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    renderer
        .set_render_targets(
            Some(&[RenderTargetBinding { texture: target }]),
            DepthFormat::None,
        )
        .unwrap();
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    renderer.set_render_targets(None, DepthFormat::None).unwrap();
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    // One attachment in all three passes, same formats: one render
    // pass object, but the framebuffer is keyed on the actual image
    // views and must not be reused across the switch.
    assert_eq!(renderer.render_pass_cache_stats().misses, 1);
    assert_eq!(renderer.framebuffer_cache_stats().misses, 2);
    assert_eq!(renderer.framebuffer_cache_stats().hits, 1);
    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::CreateFramebuffer(_))),
        2
    );
}

#[test]
fn sampler_cache_is_keyed_on_sampler_affecting_state() {
    let mut renderer = make_renderer(1280, 720);
    let texture = renderer
        .create_texture_2d(SurfaceFormat::Color, 64, 64, 1, false)
        .unwrap();

    let state = SamplerState::default();
    renderer.verify_sampler(0, Some(texture), &state).unwrap();
    renderer.verify_sampler(1, Some(texture), &state).unwrap();

    let mut biased = state;
    biased.mip_map_level_of_detail_bias = 0.75;
    renderer.verify_sampler(2, Some(texture), &biased).unwrap();

    assert_eq!(renderer.sampler_cache_stats().misses, 2);
    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::CreateSampler(_))),
        2
    );
}

#[test]
fn static_blend_change_rebuilds_pipeline_on_next_draw() {
    let mut renderer = make_renderer(1280, 720);
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    let mut blend = crate::state::BlendState::default();
    blend.color_source_blend = crate::state::Blend::SourceAlpha;
    blend.color_destination_blend = crate::state::Blend::InverseSourceAlpha;
    renderer.set_blend_state(&blend);

    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    assert_eq!(renderer.pipeline_cache_stats().misses, 2);
}
