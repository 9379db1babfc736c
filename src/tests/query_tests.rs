use pretty_assertions::assert_eq;

use super::harness::{make_renderer, Event};
use crate::state::PrimitiveType;

#[test]
fn sequential_acquires_are_pairwise_distinct_and_pools_double() {
    let mut renderer = make_renderer(1280, 720);

    let handles: Vec<_> = (0..10).map(|_| renderer.create_query().unwrap()).collect();

    for (i, a) in handles.iter().enumerate() {
        for b in handles.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }

    // 10 queries exhaust the initial pool of 8; the second pool doubles.
    let capacities: Vec<u32> = renderer
        .backend()
        .events
        .iter()
        .filter_map(|e| match e {
            Event::CreateQueryPool { capacity } => Some(*capacity),
            _ => None,
        })
        .collect();
    assert_eq!(capacities, vec![8, 16]);
}

#[test]
fn released_index_is_reused_lifo() {
    let mut renderer = make_renderer(1280, 720);

    let first = renderer.create_query().unwrap();
    let _second = renderer.create_query().unwrap();

    renderer.dispose_query(first).unwrap();
    let reused = renderer.create_query().unwrap();

    assert_eq!(reused, first);
}

#[test]
fn query_brackets_run_between_passes() {
    let mut renderer = make_renderer(1280, 720);
    let query = renderer.create_query().unwrap();

    // Open a pass, then begin the query: the pass has to end first.
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();
    renderer.query_begin(query).unwrap();
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();
    renderer.query_end(query).unwrap();

    let backend = renderer.backend();
    let end_pass = backend.position(|e| matches!(e, Event::EndRenderPass)).unwrap();
    let begin_query = backend.position(|e| matches!(e, Event::BeginQuery { .. })).unwrap();
    assert!(end_pass < begin_query);
    assert_eq!(backend.count(|e| matches!(e, Event::BeginQuery { .. })), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::EndQuery { .. })), 1);
}

#[test]
fn disposal_resets_the_query_slot() {
    let mut renderer = make_renderer(1280, 720);
    let query = renderer.create_query().unwrap();
    let index = {
        // The initial pool reset covers all 8 slots; per-slot resets
        // follow disposals.
        renderer
            .backend()
            .count(|e| matches!(e, Event::ResetQueryPool { .. }))
    };
    assert_eq!(index, 1);

    renderer.dispose_query(query).unwrap();
    assert_eq!(
        renderer
            .backend()
            .count(|e| matches!(e, Event::ResetQueryPool { count: 1, .. })),
        1
    );
}

#[test]
fn results_poll_without_blocking() {
    let mut renderer = make_renderer(1280, 720);
    let query = renderer.create_query().unwrap();

    assert!(!renderer.query_complete(query).unwrap());
    assert_eq!(renderer.query_pixel_count(query).unwrap(), 0);

    // Simulate the GPU finishing the query.
    let location = renderer.query_location(query);
    renderer.backend_mut().query_results.insert(location, 1234);

    assert!(renderer.query_complete(query).unwrap());
    assert_eq!(renderer.query_pixel_count(query).unwrap(), 1234);
}
