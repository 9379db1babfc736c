//! Monotonic object caches for pipelines, render passes, framebuffers
//! and samplers.
//!
//! All four follow the same contract: a hit returns the stored handle
//! with no side effects; a miss builds the creation info from current
//! render state, creates the object through the backend and inserts it.
//! Nothing is ever evicted; the renderer explores a bounded set of
//! state combinations per run.
//!
//! Keys identify creation parameters completely: render-pass and
//! framebuffer keys carry per-attachment formats and view identities
//! (not just counts), and the state hashes inside [`PipelineKey`] are
//! 128 bits wide.

use std::hash::Hash;

use ash::vk;
use hashbrown::HashMap;

use crate::error::GpuError;
use crate::state::PrimitiveType;
use crate::state_hash::StateHash;
use crate::{MAX_RENDERTARGET_BINDINGS, MAX_TOTAL_ATTACHMENTS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Hash-keyed object cache with hit/miss accounting.
pub struct Cache<K, V> {
    map: HashMap<K, V>,
    stats: CacheStats,
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            stats: CacheStats::default(),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash,
    V: Copy,
{
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Fetch the cached object for `key`, creating it on first miss.
    ///
    /// A failed creation is not inserted; the next fetch with the same
    /// key retries.
    pub fn get_or_create_with<F>(&mut self, key: K, create: F) -> Result<V, GpuError>
    where
        F: FnOnce() -> Result<V, GpuError>,
    {
        if let Some(value) = self.map.get(&key) {
            self.stats.hits += 1;
            return Ok(*value);
        }
        self.stats.misses += 1;
        let value = create()?;
        self.map.insert(key, value);
        Ok(value)
    }
}

/// Static pipeline identity. Two draws with an identical key must
/// produce bit-identical pipeline behavior; the compatible render pass
/// is part of the key because pipelines are compiled against a specific
/// attachment layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub blend: StateHash,
    pub rasterizer: StateHash,
    pub depth_stencil: StateHash,
    pub primitive_type: PrimitiveType,
    pub sample_mask: u32,
    pub render_pass: vk::RenderPass,
}

/// Attachment-layout identity of a render pass: the format and sample
/// count of every attachment, not merely how many there are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassKey {
    pub color_formats: [Option<vk::Format>; MAX_RENDERTARGET_BINDINGS],
    pub depth_format: Option<vk::Format>,
    pub sample_count: u8,
}

/// A framebuffer is only valid for the exact image views it was created
/// with, so those views are the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub render_pass: vk::RenderPass,
    pub attachments: [Option<vk::ImageView>; MAX_TOTAL_ATTACHMENTS],
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey(pub StateHash);

/// The four process-lifetime object caches.
#[derive(Default)]
pub struct ObjectCaches {
    pub pipelines: Cache<PipelineKey, vk::Pipeline>,
    pub render_passes: Cache<RenderPassKey, vk::RenderPass>,
    pub framebuffers: Cache<FramebufferKey, vk::Framebuffer>,
    pub samplers: Cache<SamplerKey, vk::Sampler>,
}
