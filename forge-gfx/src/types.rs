//! Plain value types shared by the buffer/image/pipeline APIs — Vulkan
//! enums and small descriptor structs carried over almost 1:1 from the
//! original `Graphics.h` (noted there as "1-1 vulkan"), translated into
//! Rust enums/bitflags instead of C++ scoped enums with bitmask operator
//! overloads.

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Vertex,
    Index,
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Content is uploaded once through a staging buffer and never
    /// written again from the CPU.
    Immutable,
    /// Content may be rewritten every frame; backed by host-visible
    /// mapped memory when available, a persistent staging buffer
    /// otherwise.
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerFilterMode {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerWrapMode {
    #[default]
    Repeat,
    ClampToEdge,
    ClampToBorder,
    MirroredRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerBorderColor {
    #[default]
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u32 {
        const VERTEX = 0x1;
        const TESSELLATION_CONTROL = 0x2;
        const TESSELLATION_EVALUATION = 0x4;
        const GEOMETRY = 0x8;
        const FRAGMENT = 0x10;
        const COMPUTE = 0x20;
        const ALL_GRAPHICS = 0x1f;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> ash::vk::PrimitiveTopology {
        use ash::vk::PrimitiveTopology as Vk;
        match self {
            Self::PointList => Vk::POINT_LIST,
            Self::LineList => Vk::LINE_LIST,
            Self::LineStrip => Vk::LINE_STRIP,
            Self::TriangleList => Vk::TRIANGLE_LIST,
            Self::TriangleStrip => Vk::TRIANGLE_STRIP,
            Self::TriangleFan => Vk::TRIANGLE_FAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> ash::vk::CompareOp {
        use ash::vk::CompareOp as Vk;
        match self {
            Self::Never => Vk::NEVER,
            Self::Less => Vk::LESS,
            Self::Equal => Vk::EQUAL,
            Self::LessOrEqual => Vk::LESS_OR_EQUAL,
            Self::Greater => Vk::GREATER,
            Self::NotEqual => Vk::NOT_EQUAL,
            Self::GreaterOrEqual => Vk::GREATER_OR_EQUAL,
            Self::Always => Vk::ALWAYS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy)]
pub struct RasterizerDesc {
    pub depth_clamp_enable: bool,
    pub polygon_line: bool,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias_enable: bool,
    pub depth_bias_constant_factor: f32,
    pub depth_bias_slope_factor: f32,
    pub line_width: f32,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            depth_clamp_enable: false,
            polygon_line: false,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            depth_bias_enable: false,
            depth_bias_constant_factor: 0.0,
            depth_bias_slope_factor: 0.0,
            line_width: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlendAttachmentDesc {
    pub enable: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
}

impl BlendAttachmentDesc {
    /// Opaque one/zero blending — the default attachment state the
    /// pipeline builder falls back to when the caller supplies none.
    pub const fn opaque() -> Self {
        Self {
            enable: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
        }
    }

    pub const fn alpha_blending() -> Self {
        Self {
            enable: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
            alpha_op: BlendOp::Add,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlendDesc {
    pub attachments: Vec<BlendAttachmentDesc>,
    pub blend_constants: [f32; 4],
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilDesc {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareOp,
    pub stencil_test_enable: bool,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: CompareOp::LessOrEqual,
            stencil_test_enable: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VertexInputAttributeDesc {
    pub semantic: String,
    pub semantic_index: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    R32Float,
    R32G32Float,
    R32G32B32Float,
    R32G32B32A32Float,
    R8G8B8A8Unorm,
}

#[derive(Debug, Clone, Copy)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexBufferBindingDesc {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Debug, Clone)]
pub struct PushConstantDesc {
    pub name: String,
    pub stages: ShaderStage,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    SamplerState,
    SampledImage,
}

#[derive(Debug, Clone)]
pub struct DescriptorBindingDesc {
    pub name: String,
    pub ty: DescriptorType,
    pub array_count: u32,
    pub stages: ShaderStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}
