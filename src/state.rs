//! Retained-mode render state values.
//!
//! These are the XNA-style value types mutated through [`Renderer`] setters
//! and consumed by the state hasher and the object caches. They are plain
//! `Copy` data: the renderer keeps exactly one snapshot of each and never
//! hands out references into it.
//!
//! [`Renderer`]: crate::Renderer

use ash::vk;
use bitflags::bitflags;

/// 8-bit RGBA color, XNA layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };

    /// Normalized float components, used for blend constants.
    pub fn to_float4(self) -> [f32; 4] {
        [
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
            f32::from(self.a) / 255.0,
        ]
    }
}

/// Normalized RGBA color used for clears.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    pub(crate) fn to_vk(self) -> vk::Viewport {
        vk::Viewport {
            x: self.x as f32,
            y: self.y as f32,
            width: self.w as f32,
            height: self.h as f32,
            min_depth: self.min_depth,
            max_depth: self.max_depth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrimitiveType {
    TriangleList,
    TriangleStrip,
    LineList,
    LineStrip,
    PointList,
}

impl PrimitiveType {
    pub(crate) fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Self::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Self::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Self::LineList => vk::PrimitiveTopology::LINE_LIST,
            Self::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Self::PointList => vk::PrimitiveTopology::POINT_LIST,
        }
    }

    /// Number of vertices consumed by `primitive_count` primitives.
    pub fn vertex_count(self, primitive_count: u32) -> u32 {
        match self {
            Self::TriangleList => primitive_count * 3,
            Self::TriangleStrip => primitive_count + 2,
            Self::LineList => primitive_count * 2,
            Self::LineStrip => primitive_count + 1,
            Self::PointList => primitive_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Blend {
    One,
    Zero,
    SourceColor,
    InverseSourceColor,
    SourceAlpha,
    InverseSourceAlpha,
    DestinationColor,
    InverseDestinationColor,
    DestinationAlpha,
    InverseDestinationAlpha,
    BlendFactor,
    InverseBlendFactor,
    SourceAlphaSaturation,
}

impl Blend {
    pub(crate) fn to_vk(self) -> vk::BlendFactor {
        match self {
            Self::One => vk::BlendFactor::ONE,
            Self::Zero => vk::BlendFactor::ZERO,
            Self::SourceColor => vk::BlendFactor::SRC_COLOR,
            Self::InverseSourceColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            Self::SourceAlpha => vk::BlendFactor::SRC_ALPHA,
            Self::InverseSourceAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            Self::DestinationColor => vk::BlendFactor::DST_COLOR,
            Self::InverseDestinationColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            Self::DestinationAlpha => vk::BlendFactor::DST_ALPHA,
            Self::InverseDestinationAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            Self::BlendFactor => vk::BlendFactor::CONSTANT_COLOR,
            Self::InverseBlendFactor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
            Self::SourceAlphaSaturation => vk::BlendFactor::SRC_ALPHA_SATURATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlendFunction {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendFunction {
    pub(crate) fn to_vk(self) -> vk::BlendOp {
        match self {
            Self::Add => vk::BlendOp::ADD,
            Self::Subtract => vk::BlendOp::SUBTRACT,
            Self::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            Self::Min => vk::BlendOp::MIN,
            Self::Max => vk::BlendOp::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompareFunction {
    Always,
    Never,
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
    NotEqual,
}

impl CompareFunction {
    pub(crate) fn to_vk(self) -> vk::CompareOp {
        match self {
            Self::Always => vk::CompareOp::ALWAYS,
            Self::Never => vk::CompareOp::NEVER,
            Self::Less => vk::CompareOp::LESS,
            Self::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
            Self::Equal => vk::CompareOp::EQUAL,
            Self::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
            Self::Greater => vk::CompareOp::GREATER,
            Self::NotEqual => vk::CompareOp::NOT_EQUAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
    Increment,
    Decrement,
    IncrementSaturation,
    DecrementSaturation,
    Invert,
}

impl StencilOperation {
    pub(crate) fn to_vk(self) -> vk::StencilOp {
        match self {
            Self::Keep => vk::StencilOp::KEEP,
            Self::Zero => vk::StencilOp::ZERO,
            Self::Replace => vk::StencilOp::REPLACE,
            Self::Increment => vk::StencilOp::INCREMENT_AND_WRAP,
            Self::Decrement => vk::StencilOp::DECREMENT_AND_WRAP,
            Self::IncrementSaturation => vk::StencilOp::INCREMENT_AND_CLAMP,
            Self::DecrementSaturation => vk::StencilOp::DECREMENT_AND_CLAMP,
            Self::Invert => vk::StencilOp::INVERT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CullMode {
    None,
    CullClockwiseFace,
    CullCounterClockwiseFace,
}

impl CullMode {
    pub(crate) fn to_vk(self) -> vk::CullModeFlags {
        match self {
            Self::None => vk::CullModeFlags::NONE,
            Self::CullClockwiseFace => vk::CullModeFlags::FRONT,
            Self::CullCounterClockwiseFace => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FillMode {
    Solid,
    WireFrame,
}

impl FillMode {
    pub(crate) fn to_vk(self) -> vk::PolygonMode {
        match self {
            Self::Solid => vk::PolygonMode::FILL,
            Self::WireFrame => vk::PolygonMode::LINE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TextureAddressMode {
    Wrap,
    Clamp,
    Mirror,
}

impl TextureAddressMode {
    pub(crate) fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            Self::Wrap => vk::SamplerAddressMode::REPEAT,
            Self::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            Self::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TextureFilter {
    Linear,
    Point,
    Anisotropic,
    LinearMipPoint,
    PointMipLinear,
    MinLinearMagPointMipLinear,
    MinLinearMagPointMipPoint,
    MinPointMagLinearMipLinear,
    MinPointMagLinearMipPoint,
}

impl TextureFilter {
    /// (mag, min, mipmap mode) for the sampler create info.
    pub(crate) fn to_vk(self) -> (vk::Filter, vk::Filter, vk::SamplerMipmapMode) {
        use vk::Filter as F;
        use vk::SamplerMipmapMode as M;
        match self {
            Self::Linear => (F::LINEAR, F::LINEAR, M::LINEAR),
            Self::Point => (F::NEAREST, F::NEAREST, M::NEAREST),
            Self::Anisotropic => (F::LINEAR, F::LINEAR, M::LINEAR),
            Self::LinearMipPoint => (F::LINEAR, F::LINEAR, M::NEAREST),
            Self::PointMipLinear => (F::NEAREST, F::NEAREST, M::LINEAR),
            Self::MinLinearMagPointMipLinear => (F::NEAREST, F::LINEAR, M::LINEAR),
            Self::MinLinearMagPointMipPoint => (F::NEAREST, F::LINEAR, M::NEAREST),
            Self::MinPointMagLinearMipLinear => (F::LINEAR, F::NEAREST, M::LINEAR),
            Self::MinPointMagLinearMipPoint => (F::LINEAR, F::NEAREST, M::NEAREST),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndexElementSize {
    SixteenBits,
    ThirtyTwoBits,
}

impl IndexElementSize {
    pub fn byte_size(self) -> u32 {
        match self {
            Self::SixteenBits => 2,
            Self::ThirtyTwoBits => 4,
        }
    }

    pub(crate) fn to_vk(self) -> vk::IndexType {
        match self {
            Self::SixteenBits => vk::IndexType::UINT16,
            Self::ThirtyTwoBits => vk::IndexType::UINT32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DepthFormat {
    None,
    Depth16,
    Depth24,
    Depth24Stencil8,
}

impl DepthFormat {
    pub(crate) fn to_vk(self) -> Option<vk::Format> {
        match self {
            Self::None => None,
            Self::Depth16 => Some(vk::Format::D16_UNORM),
            Self::Depth24 => Some(vk::Format::X8_D24_UNORM_PACK32),
            Self::Depth24Stencil8 => Some(vk::Format::D24_UNORM_S8_UINT),
        }
    }

    /// Scale applied to application depth-bias values so a bias of 1 maps to
    /// one representable depth increment of the attached format.
    pub(crate) fn bias_scale(self) -> f32 {
        match self {
            Self::None => 0.0,
            Self::Depth16 => ((1 << 16) - 1) as f32,
            Self::Depth24 | Self::Depth24Stencil8 => ((1 << 24) - 1) as f32,
        }
    }
}

/// Subset of XNA surface formats the core itself touches. Full-format
/// translation lives with bring-up, outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SurfaceFormat {
    Color,
    Bgra32,
    Rgba64,
    Single,
}

impl SurfaceFormat {
    pub(crate) fn to_vk(self) -> vk::Format {
        match self {
            Self::Color => vk::Format::R8G8B8A8_UNORM,
            Self::Bgra32 => vk::Format::B8G8R8A8_UNORM,
            Self::Rgba64 => vk::Format::R16G16B16A16_UNORM,
            Self::Single => vk::Format::R32_SFLOAT,
        }
    }
}

/// Policy for writes into dynamic buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetDataOptions {
    /// Overwrite in place. Unsafe if the GPU may still read the old
    /// contents this frame; forces a full pipeline stall in that case.
    None,
    /// Advance the write cursor to a fresh region, growing the backing
    /// store as needed. The allocation-amortized fast path.
    Discard,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearOptions: u32 {
        const TARGET = 1;
        const DEPTH_BUFFER = 2;
        const STENCIL = 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteChannels: u8 {
        const RED = 1;
        const GREEN = 2;
        const BLUE = 4;
        const ALPHA = 8;
    }
}

impl ColorWriteChannels {
    pub(crate) fn to_vk(self) -> vk::ColorComponentFlags {
        let mut flags = vk::ColorComponentFlags::empty();
        if self.contains(Self::RED) {
            flags |= vk::ColorComponentFlags::R;
        }
        if self.contains(Self::GREEN) {
            flags |= vk::ColorComponentFlags::G;
        }
        if self.contains(Self::BLUE) {
            flags |= vk::ColorComponentFlags::B;
        }
        if self.contains(Self::ALPHA) {
            flags |= vk::ColorComponentFlags::A;
        }
        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub color_source_blend: Blend,
    pub color_destination_blend: Blend,
    pub color_blend_function: BlendFunction,
    pub alpha_source_blend: Blend,
    pub alpha_destination_blend: Blend,
    pub alpha_blend_function: BlendFunction,
    pub color_write_enable: ColorWriteChannels,
    pub color_write_enable1: ColorWriteChannels,
    pub color_write_enable2: ColorWriteChannels,
    pub color_write_enable3: ColorWriteChannels,
    /// Constant blend color. Dynamic pipeline state; excluded from the
    /// blend state hash.
    pub blend_factor: Color,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            color_source_blend: Blend::One,
            color_destination_blend: Blend::Zero,
            color_blend_function: BlendFunction::Add,
            alpha_source_blend: Blend::One,
            alpha_destination_blend: Blend::Zero,
            alpha_blend_function: BlendFunction::Add,
            color_write_enable: ColorWriteChannels::all(),
            color_write_enable1: ColorWriteChannels::all(),
            color_write_enable2: ColorWriteChannels::all(),
            color_write_enable3: ColorWriteChannels::all(),
            blend_factor: Color::WHITE,
        }
    }
}

impl BlendState {
    pub(crate) fn write_mask(&self, attachment: usize) -> ColorWriteChannels {
        match attachment {
            0 => self.color_write_enable,
            1 => self.color_write_enable1,
            2 => self.color_write_enable2,
            _ => self.color_write_enable3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub cull_mode: CullMode,
    pub fill_mode: FillMode,
    /// Pre-scaled constant depth bias. Dynamic pipeline state; excluded
    /// from the rasterizer state hash.
    pub depth_bias: f32,
    /// Slope-scaled depth bias. Dynamic pipeline state.
    pub slope_scale_depth_bias: f32,
    pub scissor_test_enable: bool,
    /// Rasterization sample count (1, 2, 4, 8, ...).
    pub multi_sample_anti_alias: u8,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::CullCounterClockwiseFace,
            fill_mode: FillMode::Solid,
            depth_bias: 0.0,
            slope_scale_depth_bias: 0.0,
            scissor_test_enable: false,
            multi_sample_anti_alias: 1,
        }
    }
}

pub(crate) fn sample_count_to_vk(samples: u8) -> vk::SampleCountFlags {
    match samples {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        _ => vk::SampleCountFlags::TYPE_64,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_buffer_enable: bool,
    pub depth_buffer_write_enable: bool,
    pub depth_buffer_function: CompareFunction,
    pub stencil_enable: bool,
    pub stencil_mask: u32,
    pub stencil_write_mask: u32,
    pub stencil_fail: StencilOperation,
    pub stencil_depth_buffer_fail: StencilOperation,
    pub stencil_pass: StencilOperation,
    pub stencil_function: CompareFunction,
    pub two_sided_stencil_mode: bool,
    pub ccw_stencil_fail: StencilOperation,
    pub ccw_stencil_depth_buffer_fail: StencilOperation,
    pub ccw_stencil_pass: StencilOperation,
    pub ccw_stencil_function: CompareFunction,
    /// Stencil reference. Dynamic pipeline state; excluded from the
    /// depth-stencil state hash.
    pub reference_stencil: u32,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_buffer_enable: true,
            depth_buffer_write_enable: true,
            depth_buffer_function: CompareFunction::LessEqual,
            stencil_enable: false,
            stencil_mask: u32::MAX,
            stencil_write_mask: u32::MAX,
            stencil_fail: StencilOperation::Keep,
            stencil_depth_buffer_fail: StencilOperation::Keep,
            stencil_pass: StencilOperation::Keep,
            stencil_function: CompareFunction::Always,
            two_sided_stencil_mode: false,
            ccw_stencil_fail: StencilOperation::Keep,
            ccw_stencil_depth_buffer_fail: StencilOperation::Keep,
            ccw_stencil_pass: StencilOperation::Keep,
            ccw_stencil_function: CompareFunction::Always,
            reference_stencil: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerState {
    pub address_u: TextureAddressMode,
    pub address_v: TextureAddressMode,
    pub address_w: TextureAddressMode,
    pub filter: TextureFilter,
    pub max_anisotropy: u8,
    pub max_mip_level: u32,
    pub mip_map_level_of_detail_bias: f32,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            address_u: TextureAddressMode::Wrap,
            address_v: TextureAddressMode::Wrap,
            address_w: TextureAddressMode::Wrap,
            filter: TextureFilter::Linear,
            max_anisotropy: 4,
            max_mip_level: 0,
            mip_map_level_of_detail_bias: 0.0,
        }
    }
}
