//! [`GpuBackend`] implementation over a ready `ash` device.
//!
//! Bring-up (instance, device, swapchain, descriptor layout, sync
//! objects) happens outside this crate and hands its results in through
//! [`VulkanBackendInfo`]. Shader stages and vertex input layouts are the
//! shader-reflection component's concern; pipelines created here carry
//! the static state the core manages and the pipeline layout it was
//! given.
//!
//! Every driver call's result code is checked and translated through
//! [`vk_result_description`] before being propagated.
//!
//! [`vk_result_description`]: crate::error::vk_result_description

use ash::extensions::khr::Swapchain;
use ash::vk;
use hashbrown::HashMap;
use tracing::error;

use crate::backend::{
    AttachmentClear, DescriptorWrite, FramebufferDescriptor, GpuBackend, GpuImage,
    ImageDescriptor, ImageBarrier, PipelineDescriptor, RenderPassDescriptor, SamplerDescriptor,
    SubmitKind, SwapchainInfo,
};
use crate::error::GpuError;
use crate::state::Rect;

/// Descriptor-set binding layout the external reflection component
/// established: uniforms first, then one combined image sampler per
/// texture slot.
const BINDING_VERTEX_UNIFORM: u32 = 0;
const BINDING_FRAGMENT_UNIFORM: u32 = 1;
const BINDING_TEXTURE_BASE: u32 = 2;

/// Everything bring-up hands the backend.
pub struct VulkanBackendInfo {
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub command_pool: vk::CommandPool,
    pub pipeline_layout: vk::PipelineLayout,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    pub swapchain_loader: Swapchain,
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_extent: vk::Extent2D,
    pub swapchain_format: vk::Format,

    /// One descriptor set per swapchain image.
    pub descriptor_sets: Vec<vk::DescriptorSet>,

    pub frame_fence: vk::Fence,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

struct BufferAllocation {
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    size: u64,
}

struct ImageAllocation {
    memory: vk::DeviceMemory,
}

pub struct VulkanBackend {
    info: VulkanBackendInfo,
    buffer_allocations: HashMap<vk::Buffer, BufferAllocation>,
    image_allocations: HashMap<vk::Image, ImageAllocation>,
}

fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..properties.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && properties.memory_types[i as usize]
                .property_flags
                .contains(flags)
    })
}

fn vk_rect_offsets(rect: Rect) -> [vk::Offset3D; 2] {
    [
        vk::Offset3D {
            x: rect.x,
            y: rect.y,
            z: 0,
        },
        vk::Offset3D {
            x: rect.x + rect.w,
            y: rect.y + rect.h,
            z: 1,
        },
    ]
}

impl VulkanBackend {
    pub fn new(info: VulkanBackendInfo) -> Self {
        Self {
            info,
            buffer_allocations: HashMap::new(),
            image_allocations: HashMap::new(),
        }
    }

    fn device(&self) -> &ash::Device {
        &self.info.device
    }

    fn allocate_bound_memory(
        &mut self,
        requirements: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory, GpuError> {
        let type_index = find_memory_type(
            &self.info.memory_properties,
            requirements.memory_type_bits,
            flags,
        )
        .ok_or(GpuError::NoSuitableMemoryType)?;
        let alloc_info = vk::MemoryAllocateInfo {
            allocation_size: requirements.size,
            memory_type_index: type_index,
            ..Default::default()
        };
        unsafe {
            self.device()
                .allocate_memory(&alloc_info, None)
                .map_err(|result| GpuError::vulkan("vkAllocateMemory", result))
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> Result<vk::Pipeline, GpuError> {
        // Viewport/scissor counts only; the values are dynamic state set
        // on the command buffer each pass.
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            topology: desc.topology,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let rasterization = vk::PipelineRasterizationStateCreateInfo {
            depth_clamp_enable: vk::FALSE,
            rasterizer_discard_enable: vk::FALSE,
            polygon_mode: desc.polygon_mode,
            cull_mode: desc.cull_mode,
            front_face: desc.front_face,
            depth_bias_enable: vk::TRUE,
            line_width: 1.0,
            ..Default::default()
        };

        let sample_mask = [desc.sample_mask, desc.sample_mask];
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            rasterization_samples: desc.sample_count,
            sample_shading_enable: vk::FALSE,
            min_sample_shading: 1.0,
            p_sample_mask: sample_mask.as_ptr(),
            alpha_to_coverage_enable: vk::FALSE,
            alpha_to_one_enable: vk::FALSE,
            ..Default::default()
        };

        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            logic_op_enable: vk::FALSE,
            logic_op: vk::LogicOp::COPY,
            attachment_count: desc.blend_attachments.len() as u32,
            p_attachments: desc.blend_attachments.as_ptr(),
            ..Default::default()
        };

        let depth_stencil = desc.depth_stencil.as_ref().map(|ds| {
            vk::PipelineDepthStencilStateCreateInfo {
                depth_test_enable: vk::Bool32::from(ds.depth_test_enable),
                depth_write_enable: vk::Bool32::from(ds.depth_write_enable),
                depth_compare_op: ds.depth_compare_op,
                depth_bounds_test_enable: vk::FALSE,
                stencil_test_enable: vk::Bool32::from(ds.stencil_test_enable),
                front: ds.front,
                back: ds.back,
                ..Default::default()
            }
        });

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::BLEND_CONSTANTS,
            vk::DynamicState::STENCIL_REFERENCE,
            vk::DynamicState::DEPTH_BIAS,
        ];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            dynamic_state_count: dynamic_states.len() as u32,
            p_dynamic_states: dynamic_states.as_ptr(),
            ..Default::default()
        };

        let create_info = vk::GraphicsPipelineCreateInfo {
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &rasterization,
            p_multisample_state: &multisample,
            p_depth_stencil_state: depth_stencil
                .as_ref()
                .map_or(std::ptr::null(), |ds| ds as *const _),
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: self.info.pipeline_layout,
            render_pass: desc.render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = unsafe {
            self.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| {
                    error!(?result, "vkCreateGraphicsPipelines failed");
                    GpuError::vulkan("vkCreateGraphicsPipelines", result)
                })?
        };
        Ok(pipelines[0])
    }

    fn create_render_pass(
        &mut self,
        desc: &RenderPassDescriptor,
    ) -> Result<vk::RenderPass, GpuError> {
        let mut attachments = Vec::new();
        let mut color_refs = Vec::new();

        for (i, format) in desc.color_formats.iter().enumerate() {
            attachments.push(vk::AttachmentDescription {
                format: *format,
                samples: desc.sample_count,
                load_op: vk::AttachmentLoadOp::DONT_CARE,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
            color_refs.push(vk::AttachmentReference {
                attachment: i as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
        }

        let depth_ref = desc.depth_format.map(|format| {
            attachments.push(vk::AttachmentDescription {
                format,
                samples: desc.sample_count,
                load_op: vk::AttachmentLoadOp::DONT_CARE,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
            vk::AttachmentReference {
                attachment: (attachments.len() - 1) as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: color_refs.len() as u32,
            p_color_attachments: color_refs.as_ptr(),
            p_depth_stencil_attachment: depth_ref
                .as_ref()
                .map_or(std::ptr::null(), |r| r as *const _),
            ..Default::default()
        };

        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        };

        let create_info = vk::RenderPassCreateInfo {
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };

        unsafe {
            self.device()
                .create_render_pass(&create_info, None)
                .map_err(|result| {
                    error!(?result, "vkCreateRenderPass failed");
                    GpuError::vulkan("vkCreateRenderPass", result)
                })
        }
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> Result<vk::Framebuffer, GpuError> {
        let create_info = vk::FramebufferCreateInfo {
            render_pass: desc.render_pass,
            attachment_count: desc.attachments.len() as u32,
            p_attachments: desc.attachments.as_ptr(),
            width: desc.width,
            height: desc.height,
            layers: 1,
            ..Default::default()
        };
        unsafe {
            self.device()
                .create_framebuffer(&create_info, None)
                .map_err(|result| {
                    error!(?result, "vkCreateFramebuffer failed");
                    GpuError::vulkan("vkCreateFramebuffer", result)
                })
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<vk::Sampler, GpuError> {
        let create_info = vk::SamplerCreateInfo {
            mag_filter: desc.mag_filter,
            min_filter: desc.min_filter,
            mipmap_mode: desc.mipmap_mode,
            address_mode_u: desc.address_u,
            address_mode_v: desc.address_v,
            address_mode_w: desc.address_w,
            mip_lod_bias: desc.mip_lod_bias,
            anisotropy_enable: vk::Bool32::from(desc.max_anisotropy > 0.0),
            max_anisotropy: desc.max_anisotropy.max(1.0),
            compare_enable: vk::FALSE,
            min_lod: 0.0,
            max_lod: desc.max_lod,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
            unnormalized_coordinates: vk::FALSE,
            ..Default::default()
        };
        unsafe {
            self.device()
                .create_sampler(&create_info, None)
                .map_err(|result| GpuError::vulkan("vkCreateSampler", result))
        }
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<vk::Buffer, GpuError> {
        let create_info = vk::BufferCreateInfo {
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe {
            self.device()
                .create_buffer(&create_info, None)
                .map_err(|result| GpuError::vulkan("vkCreateBuffer", result))?
        };

        let requirements = unsafe { self.device().get_buffer_memory_requirements(buffer) };
        let memory = self.allocate_bound_memory(
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let mapped = unsafe {
            self.device()
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(|result| GpuError::vulkan("vkBindBufferMemory", result))?;
            self.device()
                .map_memory(memory, 0, requirements.size, vk::MemoryMapFlags::empty())
                .map_err(|result| GpuError::vulkan("vkMapMemory", result))? as *mut u8
        };

        self.buffer_allocations.insert(
            buffer,
            BufferAllocation {
                memory,
                mapped,
                size,
            },
        );
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        if let Some(allocation) = self.buffer_allocations.remove(&buffer) {
            unsafe {
                self.device().destroy_buffer(buffer, None);
                self.device().unmap_memory(allocation.memory);
                self.device().free_memory(allocation.memory, None);
            }
        }
    }

    fn write_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let Some(allocation) = self.buffer_allocations.get(&buffer) else {
            return Err(GpuError::vulkan(
                "write_buffer",
                vk::Result::ERROR_MEMORY_MAP_FAILED,
            ));
        };
        debug_assert!(offset + data.len() as u64 <= allocation.size);
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                allocation.mapped.add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    fn create_image(&mut self, desc: &ImageDescriptor) -> Result<GpuImage, GpuError> {
        let create_info = vk::ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe {
            self.device()
                .create_image(&create_info, None)
                .map_err(|result| GpuError::vulkan("vkCreateImage", result))?
        };

        let requirements = unsafe { self.device().get_image_memory_requirements(image) };
        let memory =
            self.allocate_bound_memory(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        unsafe {
            self.device()
                .bind_image_memory(image, memory, 0)
                .map_err(|result| GpuError::vulkan("vkBindImageMemory", result))?;
        }

        let view_info = vk::ImageViewCreateInfo {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: desc.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = unsafe {
            self.device()
                .create_image_view(&view_info, None)
                .map_err(|result| GpuError::vulkan("vkCreateImageView", result))?
        };

        self.image_allocations
            .insert(image, ImageAllocation { memory });
        Ok(GpuImage {
            image,
            view,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
        })
    }

    fn destroy_image(&mut self, image: GpuImage) {
        unsafe {
            self.device().destroy_image_view(image.view, None);
            self.device().destroy_image(image.image, None);
        }
        if let Some(allocation) = self.image_allocations.remove(&image.image) {
            unsafe {
                self.device().free_memory(allocation.memory, None);
            }
        }
    }

    fn create_query_pool(&mut self, query_count: u32) -> Result<vk::QueryPool, GpuError> {
        let create_info = vk::QueryPoolCreateInfo {
            query_type: vk::QueryType::OCCLUSION,
            query_count,
            ..Default::default()
        };
        unsafe {
            self.device()
                .create_query_pool(&create_info, None)
                .map_err(|result| {
                    error!(?result, "vkCreateQueryPool failed");
                    GpuError::vulkan("vkCreateQueryPool", result)
                })
        }
    }

    fn destroy_query_pool(&mut self, pool: vk::QueryPool) {
        unsafe {
            self.device().destroy_query_pool(pool, None);
        }
    }

    fn get_query_result(
        &mut self,
        pool: vk::QueryPool,
        index: u32,
    ) -> Result<Option<u32>, GpuError> {
        let mut results = [0u32; 1];
        let status = unsafe {
            self.device().get_query_pool_results(
                pool,
                index,
                1,
                &mut results,
                vk::QueryResultFlags::empty(),
            )
        };
        match status {
            Ok(()) => Ok(Some(results[0])),
            Err(vk::Result::NOT_READY) => Ok(None),
            Err(result) => Err(GpuError::vulkan("vkGetQueryPoolResults", result)),
        }
    }

    fn allocate_command_buffer(&mut self) -> Result<vk::CommandBuffer, GpuError> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            command_pool: self.info.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffers = unsafe {
            self.device()
                .allocate_command_buffers(&alloc_info)
                .map_err(|result| GpuError::vulkan("vkAllocateCommandBuffers", result))?
        };
        Ok(buffers[0])
    }

    fn begin_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), GpuError> {
        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe {
            self.device()
                .begin_command_buffer(cb, &begin_info)
                .map_err(|result| GpuError::vulkan("vkBeginCommandBuffer", result))
        }
    }

    fn end_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), GpuError> {
        unsafe {
            self.device()
                .end_command_buffer(cb)
                .map_err(|result| GpuError::vulkan("vkEndCommandBuffer", result))
        }
    }

    fn reset_command_pool(&mut self) -> Result<(), GpuError> {
        unsafe {
            self.device()
                .reset_command_pool(
                    self.info.command_pool,
                    vk::CommandPoolResetFlags::RELEASE_RESOURCES,
                )
                .map_err(|result| GpuError::vulkan("vkResetCommandPool", result))
        }
    }

    fn cmd_begin_render_pass(
        &mut self,
        cb: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
    ) {
        let begin_info = vk::RenderPassBeginInfo {
            render_pass,
            framebuffer,
            render_area,
            ..Default::default()
        };
        unsafe {
            self.device()
                .cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&mut self, cb: vk::CommandBuffer) {
        unsafe {
            self.device().cmd_end_render_pass(cb);
        }
    }

    fn cmd_bind_pipeline(&mut self, cb: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device()
                .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn cmd_set_viewport(&mut self, cb: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe {
            self.device().cmd_set_viewport(cb, 0, &[viewport]);
        }
    }

    fn cmd_set_scissor(&mut self, cb: vk::CommandBuffer, rect: vk::Rect2D) {
        unsafe {
            self.device().cmd_set_scissor(cb, 0, &[rect]);
        }
    }

    fn cmd_set_blend_constants(&mut self, cb: vk::CommandBuffer, constants: [f32; 4]) {
        unsafe {
            self.device().cmd_set_blend_constants(cb, &constants);
        }
    }

    fn cmd_set_depth_bias(&mut self, cb: vk::CommandBuffer, constant: f32, slope: f32) {
        unsafe {
            self.device().cmd_set_depth_bias(cb, constant, 0.0, slope);
        }
    }

    fn cmd_set_stencil_reference(&mut self, cb: vk::CommandBuffer, reference: u32) {
        unsafe {
            self.device()
                .cmd_set_stencil_reference(cb, vk::StencilFaceFlags::FRONT_AND_BACK, reference);
        }
    }

    fn cmd_bind_vertex_buffer(
        &mut self,
        cb: vk::CommandBuffer,
        slot: u32,
        buffer: vk::Buffer,
        offset: u64,
    ) {
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(cb, slot, &[buffer], &[offset]);
        }
    }

    fn cmd_bind_index_buffer(
        &mut self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device().cmd_bind_index_buffer(cb, buffer, offset, index_type);
        }
    }

    fn cmd_bind_descriptor_sets(&mut self, cb: vk::CommandBuffer, image_index: u32) {
        let set = self.info.descriptor_sets[image_index as usize];
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                self.info.pipeline_layout,
                0,
                &[set],
                &[],
            );
        }
    }

    fn cmd_draw(
        &mut self,
        cb: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device()
                .cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    fn cmd_draw_indexed(
        &mut self,
        cb: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw_indexed(
                cb,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn cmd_clear_attachments(
        &mut self,
        cb: vk::CommandBuffer,
        clears: &[AttachmentClear],
        rect: vk::Rect2D,
    ) {
        let attachments: Vec<vk::ClearAttachment> = clears
            .iter()
            .map(|clear| match *clear {
                AttachmentClear::Color { attachment, value } => vk::ClearAttachment {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    color_attachment: attachment,
                    clear_value: vk::ClearValue {
                        color: vk::ClearColorValue { float32: value },
                    },
                },
                AttachmentClear::DepthStencil { depth, stencil } => {
                    let mut aspect = vk::ImageAspectFlags::empty();
                    if depth.is_some() {
                        aspect |= vk::ImageAspectFlags::DEPTH;
                    }
                    if stencil.is_some() {
                        aspect |= vk::ImageAspectFlags::STENCIL;
                    }
                    vk::ClearAttachment {
                        aspect_mask: aspect,
                        color_attachment: 0,
                        clear_value: vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: depth.unwrap_or(0.0),
                                stencil: stencil.unwrap_or(0),
                            },
                        },
                    }
                }
            })
            .collect();

        let clear_rect = vk::ClearRect {
            rect,
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.device()
                .cmd_clear_attachments(cb, &attachments, &[clear_rect]);
        }
    }

    fn cmd_pipeline_barrier(&mut self, cb: vk::CommandBuffer, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier {
            src_access_mask: barrier.src_access,
            dst_access_mask: barrier.dst_access,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: barrier.image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: barrier.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe {
            self.device().cmd_pipeline_barrier(
                cb,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
    }

    fn cmd_blit_image(
        &mut self,
        cb: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_rect: Rect,
        dst_rect: Rect,
        filter: vk::Filter,
    ) {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageBlit {
            src_subresource: subresource,
            src_offsets: vk_rect_offsets(src_rect),
            dst_subresource: subresource,
            dst_offsets: vk_rect_offsets(dst_rect),
        };
        unsafe {
            self.device().cmd_blit_image(
                cb,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                filter,
            );
        }
    }

    fn cmd_begin_query(&mut self, cb: vk::CommandBuffer, pool: vk::QueryPool, index: u32) {
        unsafe {
            self.device()
                .cmd_begin_query(cb, pool, index, vk::QueryControlFlags::PRECISE);
        }
    }

    fn cmd_end_query(&mut self, cb: vk::CommandBuffer, pool: vk::QueryPool, index: u32) {
        unsafe {
            self.device().cmd_end_query(cb, pool, index);
        }
    }

    fn cmd_reset_query_pool(
        &mut self,
        cb: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    ) {
        unsafe {
            self.device().cmd_reset_query_pool(cb, pool, first, count);
        }
    }

    fn update_descriptors(&mut self, image_index: u32, writes: &[DescriptorWrite]) {
        let set = self.info.descriptor_sets[image_index as usize];

        // Info arrays are pre-sized so the pointers handed to the driver
        // stay stable while the writes are assembled.
        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        let mut vk_writes = Vec::with_capacity(writes.len());

        for write in writes {
            match *write {
                DescriptorWrite::VertexUniform {
                    buffer,
                    offset,
                    range,
                }
                | DescriptorWrite::FragmentUniform {
                    buffer,
                    offset,
                    range,
                } => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer,
                        offset,
                        range,
                    });
                    let binding = if matches!(write, DescriptorWrite::VertexUniform { .. }) {
                        BINDING_VERTEX_UNIFORM
                    } else {
                        BINDING_FRAGMENT_UNIFORM
                    };
                    vk_writes.push(vk::WriteDescriptorSet {
                        dst_set: set,
                        dst_binding: binding,
                        dst_array_element: 0,
                        descriptor_count: 1,
                        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                        p_buffer_info: &buffer_infos[buffer_infos.len() - 1],
                        ..Default::default()
                    });
                }
                DescriptorWrite::TextureSampler { slot, view, sampler } => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                    vk_writes.push(vk::WriteDescriptorSet {
                        dst_set: set,
                        dst_binding: BINDING_TEXTURE_BASE + slot,
                        dst_array_element: 0,
                        descriptor_count: 1,
                        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        p_image_info: &image_infos[image_infos.len() - 1],
                        ..Default::default()
                    });
                }
            }
        }

        unsafe {
            self.device().update_descriptor_sets(&vk_writes, &[]);
        }
    }

    fn wait_for_frame_fence(&mut self) -> Result<(), GpuError> {
        unsafe {
            self.device()
                .wait_for_fences(&[self.info.frame_fence], true, u64::MAX)
                .map_err(|result| GpuError::vulkan("vkWaitForFences", result))
        }
    }

    fn reset_frame_fence(&mut self) -> Result<(), GpuError> {
        unsafe {
            self.device()
                .reset_fences(&[self.info.frame_fence])
                .map_err(|result| GpuError::vulkan("vkResetFences", result))
        }
    }

    fn acquire_next_image(&mut self) -> Result<u32, GpuError> {
        let acquired = unsafe {
            self.info.swapchain_loader.acquire_next_image(
                self.info.swapchain,
                u64::MAX,
                self.info.image_available,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, _suboptimal)) => Ok(index),
            Err(result) => Err(GpuError::vulkan("vkAcquireNextImageKHR", result)),
        }
    }

    fn submit(
        &mut self,
        command_buffers: &[vk::CommandBuffer],
        kind: SubmitKind,
    ) -> Result<(), GpuError> {
        let wait_semaphores = [self.info.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.info.render_finished];

        let (submit_info, fence) = match kind {
            SubmitKind::Frame => (
                vk::SubmitInfo {
                    wait_semaphore_count: 1,
                    p_wait_semaphores: wait_semaphores.as_ptr(),
                    p_wait_dst_stage_mask: wait_stages.as_ptr(),
                    command_buffer_count: command_buffers.len() as u32,
                    p_command_buffers: command_buffers.as_ptr(),
                    signal_semaphore_count: 1,
                    p_signal_semaphores: signal_semaphores.as_ptr(),
                    ..Default::default()
                },
                self.info.frame_fence,
            ),
            SubmitKind::Immediate => (
                vk::SubmitInfo {
                    command_buffer_count: command_buffers.len() as u32,
                    p_command_buffers: command_buffers.as_ptr(),
                    ..Default::default()
                },
                vk::Fence::null(),
            ),
        };

        let result = unsafe {
            self.device()
                .queue_submit(self.info.queue, &[submit_info], fence)
        };
        result.map_err(|result| {
            error!(?result, "vkQueueSubmit failed");
            GpuError::vulkan("vkQueueSubmit", result)
        })
    }

    fn present(&mut self, image_index: u32) -> Result<(), GpuError> {
        let wait_semaphores = [self.info.render_finished];
        let swapchains = [self.info.swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR {
            wait_semaphore_count: 1,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        let result = unsafe {
            self.info
                .swapchain_loader
                .queue_present(self.info.queue, &present_info)
        };
        match result {
            Ok(_suboptimal) => Ok(()),
            Err(result) => {
                error!(?result, "vkQueuePresentKHR failed");
                Err(GpuError::vulkan("vkQueuePresentKHR", result))
            }
        }
    }

    fn queue_wait_idle(&mut self) -> Result<(), GpuError> {
        unsafe {
            self.device().queue_wait_idle(self.info.queue).map_err(|result| {
                error!(?result, "vkQueueWaitIdle failed");
                GpuError::vulkan("vkQueueWaitIdle", result)
            })
        }
    }

    fn swapchain_info(&self) -> SwapchainInfo {
        SwapchainInfo {
            images: self.info.swapchain_images.clone(),
            extent: self.info.swapchain_extent,
            format: self.info.swapchain_format,
        }
    }
}
