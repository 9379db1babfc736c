use ash::vk;
use thiserror::Error;

use crate::buffer::BufferId;
use crate::texture::TextureId;

/// Human-readable description for a Vulkan result code.
///
/// Static lookup covering the codes the driver surface can actually
/// return to us; anything else is reported as unknown rather than
/// guessed at.
pub fn vk_result_description(result: vk::Result) -> &'static str {
    match result {
        vk::Result::SUCCESS => "success",
        vk::Result::NOT_READY => "not ready",
        vk::Result::TIMEOUT => "timeout",
        vk::Result::EVENT_SET => "event set",
        vk::Result::EVENT_RESET => "event reset",
        vk::Result::INCOMPLETE => "incomplete",
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => "out of host memory",
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => "out of device memory",
        vk::Result::ERROR_INITIALIZATION_FAILED => "initialization failed",
        vk::Result::ERROR_DEVICE_LOST => "device lost",
        vk::Result::ERROR_MEMORY_MAP_FAILED => "memory map failed",
        vk::Result::ERROR_LAYER_NOT_PRESENT => "layer not present",
        vk::Result::ERROR_EXTENSION_NOT_PRESENT => "extension not present",
        vk::Result::ERROR_FEATURE_NOT_PRESENT => "feature not present",
        vk::Result::ERROR_INCOMPATIBLE_DRIVER => "incompatible driver",
        vk::Result::ERROR_TOO_MANY_OBJECTS => "too many objects",
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED => "format not supported",
        vk::Result::ERROR_FRAGMENTED_POOL => "fragmented pool",
        vk::Result::ERROR_OUT_OF_POOL_MEMORY => "out of pool memory",
        vk::Result::ERROR_INVALID_EXTERNAL_HANDLE => "invalid external handle",
        vk::Result::ERROR_SURFACE_LOST_KHR => "surface lost",
        vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => "native window in use",
        vk::Result::SUBOPTIMAL_KHR => "swapchain suboptimal",
        vk::Result::ERROR_OUT_OF_DATE_KHR => "swapchain out of date",
        vk::Result::ERROR_VALIDATION_FAILED_EXT => "validation failed",
        _ => "unrecognized result code",
    }
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("{call} failed: {result:?} ({})", vk_result_description(*.result))]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no suitable host-visible memory type for buffer allocation")]
    NoSuitableMemoryType,

    #[error("{0:?} is an invalid old layout for an image layout transition")]
    UnsupportedSourceLayout(vk::ImageLayout),

    #[error("{0:?} is an invalid new layout for an image layout transition")]
    UnsupportedTargetLayout(vk::ImageLayout),

    #[error("unknown or disposed buffer handle {0:?}")]
    UnknownBuffer(BufferId),

    #[error("unknown or disposed texture handle {0:?}")]
    UnknownTexture(TextureId),

    #[error("unknown or disposed effect handle")]
    UnknownEffect,

    #[error("unknown query handle (pool {pool}, index {index})")]
    UnknownQuery { pool: u32, index: u32 },
}

impl GpuError {
    pub(crate) fn vulkan(call: &'static str, result: vk::Result) -> Self {
        GpuError::Vulkan { call, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_errors_render_call_and_description() {
        let err = GpuError::vulkan("vkCreateGraphicsPipelines", vk::Result::ERROR_DEVICE_LOST);
        let text = err.to_string();
        assert!(text.contains("vkCreateGraphicsPipelines"));
        assert!(text.contains("device lost"));
    }

    #[test]
    fn unknown_codes_do_not_panic() {
        assert_eq!(
            vk_result_description(vk::Result::from_raw(-9999)),
            "unrecognized result code"
        );
    }
}
