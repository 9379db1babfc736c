use std::cell::RefCell;
use std::rc::Rc;

use ash::vk;
use ash::vk::Handle;
use pretty_assertions::assert_eq;

use super::harness::{make_renderer, Event};
use crate::backend::DescriptorWrite;
use crate::effect::{ShaderEffect, UniformBinding, UniformRegion};
use crate::state::PrimitiveType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Begin,
    BeginPass(u32),
    CommitChanges,
    EndPass,
    End,
}

struct ScriptedEffect {
    calls: Rc<RefCell<Vec<Call>>>,
    technique: u32,
    uniforms: Rc<RefCell<UniformBinding>>,
}

impl ShaderEffect for ScriptedEffect {
    fn begin(&mut self) -> u32 {
        self.calls.borrow_mut().push(Call::Begin);
        1
    }

    fn begin_pass(&mut self, pass: u32) {
        self.calls.borrow_mut().push(Call::BeginPass(pass));
    }

    fn commit_changes(&mut self) {
        self.calls.borrow_mut().push(Call::CommitChanges);
    }

    fn end_pass(&mut self) {
        self.calls.borrow_mut().push(Call::EndPass);
    }

    fn end(&mut self) {
        self.calls.borrow_mut().push(Call::End);
    }

    fn technique(&self) -> u32 {
        self.technique
    }

    fn uniform_buffers(&self) -> UniformBinding {
        *self.uniforms.borrow()
    }
}

fn scripted(
    technique: u32,
) -> (
    Box<ScriptedEffect>,
    Rc<RefCell<Vec<Call>>>,
    Rc<RefCell<UniformBinding>>,
) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let uniforms = Rc::new(RefCell::new(UniformBinding::default()));
    (
        Box::new(ScriptedEffect {
            calls: calls.clone(),
            technique,
            uniforms: uniforms.clone(),
        }),
        calls,
        uniforms,
    )
}

#[test]
fn reapplying_the_same_pass_only_commits_changes() {
    let mut renderer = make_renderer(1280, 720);
    let (effect, calls, _) = scripted(1);
    let id = renderer.create_effect(effect);

    renderer.apply_effect(id, 0).unwrap();
    renderer.apply_effect(id, 0).unwrap();

    assert_eq!(
        calls.borrow().as_slice(),
        &[Call::Begin, Call::BeginPass(0), Call::CommitChanges]
    );
}

#[test]
fn switching_passes_cycles_end_and_begin() {
    let mut renderer = make_renderer(1280, 720);
    let (effect, calls, _) = scripted(1);
    let id = renderer.create_effect(effect);

    renderer.apply_effect(id, 0).unwrap();
    renderer.apply_effect(id, 1).unwrap();

    assert_eq!(
        calls.borrow().as_slice(),
        &[
            Call::Begin,
            Call::BeginPass(0),
            Call::EndPass,
            Call::BeginPass(1)
        ]
    );
}

#[test]
fn switching_effects_unwinds_the_previous_one() {
    let mut renderer = make_renderer(1280, 720);
    let (first, first_calls, _) = scripted(1);
    let (second, second_calls, _) = scripted(1);
    let first_id = renderer.create_effect(first);
    let second_id = renderer.create_effect(second);

    renderer.apply_effect(first_id, 0).unwrap();
    renderer.apply_effect(second_id, 0).unwrap();

    assert_eq!(
        first_calls.borrow().as_slice(),
        &[Call::Begin, Call::BeginPass(0), Call::EndPass, Call::End]
    );
    assert_eq!(
        second_calls.borrow().as_slice(),
        &[Call::Begin, Call::BeginPass(0)]
    );
}

#[test]
fn stale_uniform_regions_are_rewritten_in_one_batch() {
    let mut renderer = make_renderer(1280, 720);
    let (effect, _, uniforms) = scripted(1);
    let id = renderer.create_effect(effect);
    renderer.apply_effect(id, 0).unwrap();

    let region = UniformRegion {
        buffer: vk::Buffer::from_raw(0x51),
        offset: 256,
        range: 128,
    };
    uniforms.borrow_mut().vertex = Some(region);
    uniforms.borrow_mut().fragment = Some(UniformRegion {
        buffer: vk::Buffer::from_raw(0x52),
        offset: 0,
        range: 64,
    });

    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();

    // Both stages went out in a single batched update.
    let updates: Vec<_> = renderer
        .backend()
        .events
        .iter()
        .filter_map(|e| match e {
            Event::UpdateDescriptors { writes, .. } => Some(writes.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].len(), 2);
    assert!(updates[0].iter().any(|w| matches!(
        w,
        DescriptorWrite::VertexUniform { offset: 256, .. }
    )));

    // Unchanged regions on the next draw: no redundant update.
    renderer
        .draw_primitives(PrimitiveType::TriangleList, 0, 1)
        .unwrap();
    let updates_after: usize = renderer
        .backend()
        .count(|e| matches!(e, Event::UpdateDescriptors { .. }));
    assert_eq!(updates_after, 1);
}

#[test]
fn restore_pass_brackets_the_effect() {
    let mut renderer = make_renderer(1280, 720);
    let (effect, calls, _) = scripted(1);
    let id = renderer.create_effect(effect);

    renderer.begin_pass_restore(id).unwrap();
    renderer.end_pass_restore(id).unwrap();

    assert_eq!(
        calls.borrow().as_slice(),
        &[Call::Begin, Call::BeginPass(0), Call::EndPass, Call::End]
    );
}
