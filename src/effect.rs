//! Interface to the external shader-reflection collaborator.
//!
//! Shader compilation and reflection live outside this crate. What the
//! core needs from an effect is the begin/commit/end pass protocol and,
//! on every draw, the uniform-buffer regions currently live so it can
//! tell whether its descriptor bindings went stale.

use ash::vk;

use crate::error::GpuError;

/// The uniform-buffer regions an effect currently sources its constants
/// from. `None` means the stage binds no uniforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UniformBinding {
    pub vertex: Option<UniformRegion>,
    pub fragment: Option<UniformRegion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformRegion {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub range: u64,
}

/// Shader-stage state provider. Implemented outside this crate by the
/// shader-reflection component.
pub trait ShaderEffect {
    /// Start applying the effect. Returns the technique's pass count.
    fn begin(&mut self) -> u32;
    fn begin_pass(&mut self, pass: u32);
    /// Re-upload parameters changed since the pass began.
    fn commit_changes(&mut self);
    fn end_pass(&mut self);
    fn end(&mut self);
    /// Identity of the currently selected technique, used to detect
    /// technique switches between applications.
    fn technique(&self) -> u32;
    /// The uniform-buffer regions live for the next draw.
    fn uniform_buffers(&self) -> UniformBinding;
}

/// Stable handle to a registered effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

struct Slot {
    generation: u32,
    effect: Option<Box<dyn ShaderEffect>>,
}

#[derive(Default)]
pub(crate) struct EffectRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl EffectRegistry {
    pub fn register(&mut self, effect: Box<dyn ShaderEffect>) -> EffectId {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].effect = Some(effect);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    effect: Some(effect),
                });
                (self.slots.len() - 1) as u32
            }
        };
        EffectId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    pub fn remove(&mut self, id: EffectId) -> Result<Box<dyn ShaderEffect>, GpuError> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or(GpuError::UnknownEffect)?;
        let effect = slot.effect.take().ok_or(GpuError::UnknownEffect)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(effect)
    }

    pub fn get_mut(&mut self, id: EffectId) -> Result<&mut (dyn ShaderEffect + 'static), GpuError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.effect.as_deref_mut())
            .ok_or(GpuError::UnknownEffect)
    }
}
