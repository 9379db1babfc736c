//! Image layout transitions as a table-driven barrier state machine.
//!
//! The blit-based present path moves images through a number of layout
//! pairs (attachment ⇄ transfer-src/dst ⇄ present); keeping the access
//! and stage mask derivation in two tables keyed on the old and new
//! layout isolates those combinations from the call sites.

use ash::vk;
use tracing::error;

use crate::backend::{GpuBackend, ImageBarrier};
use crate::error::GpuError;

/// Access/stage masks for one side of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

fn source_masks(old: vk::ImageLayout) -> Option<(vk::AccessFlags, vk::PipelineStageFlags)> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;
    match old {
        L::UNDEFINED | L::PREINITIALIZED => Some((
            A::HOST_WRITE | A::TRANSFER_WRITE,
            S::HOST | S::TRANSFER,
        )),
        L::COLOR_ATTACHMENT_OPTIMAL => {
            Some((A::COLOR_ATTACHMENT_WRITE, S::COLOR_ATTACHMENT_OUTPUT))
        }
        L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => Some((
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
        )),
        L::TRANSFER_SRC_OPTIMAL => Some((A::TRANSFER_READ, S::TRANSFER)),
        L::TRANSFER_DST_OPTIMAL => Some((A::TRANSFER_WRITE, S::TRANSFER)),
        L::SHADER_READ_ONLY_OPTIMAL => Some((A::SHADER_READ, S::FRAGMENT_SHADER)),
        L::PRESENT_SRC_KHR | L::SHARED_PRESENT_KHR => Some((A::TRANSFER_WRITE, S::TRANSFER)),
        _ => None,
    }
}

fn target_masks(new: vk::ImageLayout) -> Option<(vk::AccessFlags, vk::PipelineStageFlags)> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;
    match new {
        L::TRANSFER_DST_OPTIMAL => Some((A::TRANSFER_WRITE, S::TRANSFER)),
        L::TRANSFER_SRC_OPTIMAL => Some((A::TRANSFER_READ, S::TRANSFER)),
        L::COLOR_ATTACHMENT_OPTIMAL => {
            Some((A::COLOR_ATTACHMENT_WRITE, S::COLOR_ATTACHMENT_OUTPUT))
        }
        L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => Some((
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::LATE_FRAGMENT_TESTS,
        )),
        L::SHADER_READ_ONLY_OPTIMAL => Some((A::SHADER_READ, S::FRAGMENT_SHADER)),
        L::PRESENT_SRC_KHR => Some((A::COLOR_ATTACHMENT_WRITE, S::COLOR_ATTACHMENT_OUTPUT)),
        _ => None,
    }
}

/// Derive the barrier masks for an `old → new` transition.
///
/// Unsupported layouts are a hard error; the caller must not issue any
/// barrier in that case.
pub fn barrier_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<BarrierMasks, GpuError> {
    let (src_access, src_stage) = source_masks(old).ok_or_else(|| {
        error!(?old, "invalid old layout for image layout transition");
        GpuError::UnsupportedSourceLayout(old)
    })?;
    let (dst_access, dst_stage) = target_masks(new).ok_or_else(|| {
        error!(?new, "invalid new layout for image layout transition");
        GpuError::UnsupportedTargetLayout(new)
    })?;
    Ok(BarrierMasks {
        src_access,
        src_stage,
        dst_access,
        dst_stage,
    })
}

/// Record a layout transition for a single subresource (mip 0, layer 0).
///
/// No-op when `old == new`. Exactly one barrier is issued otherwise, or
/// none at all if either layout is unsupported.
pub fn transition<B: GpuBackend>(
    backend: &mut B,
    cb: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<(), GpuError> {
    if old == new {
        return Ok(());
    }
    let masks = barrier_masks(old, new)?;
    backend.cmd_pipeline_barrier(
        cb,
        &ImageBarrier {
            image,
            aspect,
            old_layout: old,
            new_layout: new,
            src_access: masks.src_access,
            dst_access: masks.dst_access,
            src_stage: masks.src_stage,
            dst_stage: masks.dst_stage,
        },
    );
    Ok(())
}
