//! Recording stand-in for the driver, plus renderer construction
//! helpers shared by the scenario tests.

use ash::vk;
use ash::vk::Handle;
use hashbrown::HashMap;

use crate::backend::{
    AttachmentClear, DescriptorWrite, FramebufferDescriptor, GpuBackend, GpuImage,
    ImageDescriptor, ImageBarrier, PipelineDescriptor, RenderPassDescriptor, SamplerDescriptor,
    SubmitKind, SwapchainInfo,
};
use crate::error::GpuError;
use crate::renderer::{PresentationParameters, Renderer};
use crate::state::{DepthFormat, Rect, SurfaceFormat};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreatePipeline(vk::Pipeline),
    CreateRenderPass(vk::RenderPass),
    CreateFramebuffer(vk::Framebuffer),
    CreateSampler(vk::Sampler),
    CreateBuffer { handle: vk::Buffer, size: u64 },
    DestroyBuffer(vk::Buffer),
    WriteBuffer { buffer: vk::Buffer, offset: u64, len: u64 },
    CreateImage,
    DestroyImage,
    CreateQueryPool { capacity: u32 },
    DestroyQueryPool,
    AllocateCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    ResetCommandPool,
    BeginRenderPass,
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    SetViewport,
    SetScissor,
    SetBlendConstants([f32; 4]),
    SetDepthBias,
    SetStencilReference(u32),
    BindVertexBuffer { slot: u32, buffer: vk::Buffer, offset: u64 },
    BindIndexBuffer { buffer: vk::Buffer, offset: u64 },
    BindDescriptorSets { image: u32 },
    Draw { vertices: u32, instances: u32, first_vertex: u32 },
    DrawIndexed { indices: u32, instances: u32, first_index: u32, vertex_offset: i32 },
    ClearAttachments { clears: Vec<AttachmentClear> },
    Barrier { old: vk::ImageLayout, new: vk::ImageLayout },
    Blit { src_rect: Rect, dst_rect: Rect },
    BeginQuery { index: u32 },
    EndQuery { index: u32 },
    ResetQueryPool { first: u32, count: u32 },
    UpdateDescriptors { image: u32, writes: Vec<DescriptorWrite> },
    WaitFence,
    ResetFence,
    AcquireImage(u32),
    Submit { kind: SubmitKind, command_buffers: usize },
    Present(u32),
    QueueWaitIdle,
}

pub struct RecordingBackend {
    pub events: Vec<Event>,
    next_handle: u64,
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    next_image: u32,
    pub query_results: HashMap<(vk::QueryPool, u32), u32>,
}

impl RecordingBackend {
    pub fn new(image_count: u32, width: u32, height: u32) -> Self {
        let mut backend = Self {
            events: Vec::new(),
            next_handle: 1,
            images: Vec::new(),
            extent: vk::Extent2D { width, height },
            next_image: 0,
            query_results: HashMap::new(),
        };
        backend.images = (0..image_count)
            .map(|_| vk::Image::from_raw(backend.bump()))
            .collect();
        backend
    }

    fn bump(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }

    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.iter().position(predicate)
    }
}

impl GpuBackend for RecordingBackend {
    fn create_pipeline(&mut self, _desc: &PipelineDescriptor) -> Result<vk::Pipeline, GpuError> {
        let pipeline = vk::Pipeline::from_raw(self.bump());
        self.events.push(Event::CreatePipeline(pipeline));
        Ok(pipeline)
    }

    fn create_render_pass(
        &mut self,
        _desc: &RenderPassDescriptor,
    ) -> Result<vk::RenderPass, GpuError> {
        let render_pass = vk::RenderPass::from_raw(self.bump());
        self.events.push(Event::CreateRenderPass(render_pass));
        Ok(render_pass)
    }

    fn create_framebuffer(
        &mut self,
        _desc: &FramebufferDescriptor,
    ) -> Result<vk::Framebuffer, GpuError> {
        let framebuffer = vk::Framebuffer::from_raw(self.bump());
        self.events.push(Event::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> Result<vk::Sampler, GpuError> {
        let sampler = vk::Sampler::from_raw(self.bump());
        self.events.push(Event::CreateSampler(sampler));
        Ok(sampler)
    }

    fn create_buffer(
        &mut self,
        size: u64,
        _usage: vk::BufferUsageFlags,
    ) -> Result<vk::Buffer, GpuError> {
        let handle = vk::Buffer::from_raw(self.bump());
        self.events.push(Event::CreateBuffer { handle, size });
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        self.events.push(Event::DestroyBuffer(buffer));
    }

    fn write_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GpuError> {
        self.events.push(Event::WriteBuffer {
            buffer,
            offset,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn create_image(&mut self, desc: &ImageDescriptor) -> Result<GpuImage, GpuError> {
        self.events.push(Event::CreateImage);
        Ok(GpuImage {
            image: vk::Image::from_raw(self.bump()),
            view: vk::ImageView::from_raw(self.bump()),
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
        })
    }

    fn destroy_image(&mut self, _image: GpuImage) {
        self.events.push(Event::DestroyImage);
    }

    fn create_query_pool(&mut self, query_count: u32) -> Result<vk::QueryPool, GpuError> {
        let pool = vk::QueryPool::from_raw(self.bump());
        self.events.push(Event::CreateQueryPool {
            capacity: query_count,
        });
        Ok(pool)
    }

    fn destroy_query_pool(&mut self, _pool: vk::QueryPool) {
        self.events.push(Event::DestroyQueryPool);
    }

    fn get_query_result(
        &mut self,
        pool: vk::QueryPool,
        index: u32,
    ) -> Result<Option<u32>, GpuError> {
        Ok(self.query_results.get(&(pool, index)).copied())
    }

    fn allocate_command_buffer(&mut self) -> Result<vk::CommandBuffer, GpuError> {
        let cb = vk::CommandBuffer::from_raw(self.bump());
        self.events.push(Event::AllocateCommandBuffer(cb));
        Ok(cb)
    }

    fn begin_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), GpuError> {
        self.events.push(Event::BeginCommandBuffer(cb));
        Ok(())
    }

    fn end_command_buffer(&mut self, cb: vk::CommandBuffer) -> Result<(), GpuError> {
        self.events.push(Event::EndCommandBuffer(cb));
        Ok(())
    }

    fn reset_command_pool(&mut self) -> Result<(), GpuError> {
        self.events.push(Event::ResetCommandPool);
        Ok(())
    }

    fn cmd_begin_render_pass(
        &mut self,
        _cb: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        _framebuffer: vk::Framebuffer,
        _render_area: vk::Rect2D,
    ) {
        self.events.push(Event::BeginRenderPass);
    }

    fn cmd_end_render_pass(&mut self, _cb: vk::CommandBuffer) {
        self.events.push(Event::EndRenderPass);
    }

    fn cmd_bind_pipeline(&mut self, _cb: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.events.push(Event::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&mut self, _cb: vk::CommandBuffer, _viewport: vk::Viewport) {
        self.events.push(Event::SetViewport);
    }

    fn cmd_set_scissor(&mut self, _cb: vk::CommandBuffer, _rect: vk::Rect2D) {
        self.events.push(Event::SetScissor);
    }

    fn cmd_set_blend_constants(&mut self, _cb: vk::CommandBuffer, constants: [f32; 4]) {
        self.events.push(Event::SetBlendConstants(constants));
    }

    fn cmd_set_depth_bias(&mut self, _cb: vk::CommandBuffer, _constant: f32, _slope: f32) {
        self.events.push(Event::SetDepthBias);
    }

    fn cmd_set_stencil_reference(&mut self, _cb: vk::CommandBuffer, reference: u32) {
        self.events.push(Event::SetStencilReference(reference));
    }

    fn cmd_bind_vertex_buffer(
        &mut self,
        _cb: vk::CommandBuffer,
        slot: u32,
        buffer: vk::Buffer,
        offset: u64,
    ) {
        self.events.push(Event::BindVertexBuffer { slot, buffer, offset });
    }

    fn cmd_bind_index_buffer(
        &mut self,
        _cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        _index_type: vk::IndexType,
    ) {
        self.events.push(Event::BindIndexBuffer { buffer, offset });
    }

    fn cmd_bind_descriptor_sets(&mut self, _cb: vk::CommandBuffer, image_index: u32) {
        self.events.push(Event::BindDescriptorSets { image: image_index });
    }

    fn cmd_draw(
        &mut self,
        _cb: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        _first_instance: u32,
    ) {
        self.events.push(Event::Draw {
            vertices: vertex_count,
            instances: instance_count,
            first_vertex,
        });
    }

    fn cmd_draw_indexed(
        &mut self,
        _cb: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.events.push(Event::DrawIndexed {
            indices: index_count,
            instances: instance_count,
            first_index,
            vertex_offset,
        });
    }

    fn cmd_clear_attachments(
        &mut self,
        _cb: vk::CommandBuffer,
        clears: &[AttachmentClear],
        _rect: vk::Rect2D,
    ) {
        self.events.push(Event::ClearAttachments {
            clears: clears.to_vec(),
        });
    }

    fn cmd_pipeline_barrier(&mut self, _cb: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.events.push(Event::Barrier {
            old: barrier.old_layout,
            new: barrier.new_layout,
        });
    }

    fn cmd_blit_image(
        &mut self,
        _cb: vk::CommandBuffer,
        _src: vk::Image,
        _dst: vk::Image,
        src_rect: Rect,
        dst_rect: Rect,
        _filter: vk::Filter,
    ) {
        self.events.push(Event::Blit { src_rect, dst_rect });
    }

    fn cmd_begin_query(&mut self, _cb: vk::CommandBuffer, _pool: vk::QueryPool, index: u32) {
        self.events.push(Event::BeginQuery { index });
    }

    fn cmd_end_query(&mut self, _cb: vk::CommandBuffer, _pool: vk::QueryPool, index: u32) {
        self.events.push(Event::EndQuery { index });
    }

    fn cmd_reset_query_pool(
        &mut self,
        _cb: vk::CommandBuffer,
        _pool: vk::QueryPool,
        first: u32,
        count: u32,
    ) {
        self.events.push(Event::ResetQueryPool { first, count });
    }

    fn update_descriptors(&mut self, image_index: u32, writes: &[DescriptorWrite]) {
        self.events.push(Event::UpdateDescriptors {
            image: image_index,
            writes: writes.to_vec(),
        });
    }

    fn wait_for_frame_fence(&mut self) -> Result<(), GpuError> {
        self.events.push(Event::WaitFence);
        Ok(())
    }

    fn reset_frame_fence(&mut self) -> Result<(), GpuError> {
        self.events.push(Event::ResetFence);
        Ok(())
    }

    fn acquire_next_image(&mut self) -> Result<u32, GpuError> {
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.images.len() as u32;
        self.events.push(Event::AcquireImage(index));
        Ok(index)
    }

    fn submit(
        &mut self,
        command_buffers: &[vk::CommandBuffer],
        kind: SubmitKind,
    ) -> Result<(), GpuError> {
        self.events.push(Event::Submit {
            kind,
            command_buffers: command_buffers.len(),
        });
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<(), GpuError> {
        self.events.push(Event::Present(image_index));
        Ok(())
    }

    fn queue_wait_idle(&mut self) -> Result<(), GpuError> {
        self.events.push(Event::QueueWaitIdle);
        Ok(())
    }

    fn swapchain_info(&self) -> SwapchainInfo {
        SwapchainInfo {
            images: self.images.clone(),
            extent: self.extent,
            format: vk::Format::B8G8R8A8_UNORM,
        }
    }
}

pub fn make_renderer(width: u32, height: u32) -> Renderer<RecordingBackend> {
    let backend = RecordingBackend::new(3, width, height);
    Renderer::new(
        backend,
        PresentationParameters {
            backbuffer_width: width,
            backbuffer_height: height,
            backbuffer_format: SurfaceFormat::Color,
            depth_format: DepthFormat::Depth24Stencil8,
            multi_sample_count: 1,
        },
    )
    .expect("renderer construction against the recording backend")
}

pub fn make_renderer_no_depth(width: u32, height: u32) -> Renderer<RecordingBackend> {
    let backend = RecordingBackend::new(3, width, height);
    Renderer::new(
        backend,
        PresentationParameters {
            backbuffer_width: width,
            backbuffer_height: height,
            backbuffer_format: SurfaceFormat::Color,
            depth_format: DepthFormat::None,
            multi_sample_count: 1,
        },
    )
    .expect("renderer construction against the recording backend")
}
