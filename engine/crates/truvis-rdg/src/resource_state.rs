//! 资源状态定义
//!
//! 封装 Vulkan 的 pipeline stage、access mask 和 image layout，
//! 以及 Pass 对每个资源的访问记录（binding、descriptor 类型、读写方式、attachment 操作）。

use std::fmt;

use ash::vk;

/// 图像资源状态
///
/// 描述图像在某个 Pass 中的使用方式，用于自动计算 barrier。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgImageState {
    /// Pipeline stage
    pub stage: vk::PipelineStageFlags2,
    /// Access mask
    pub access: vk::AccessFlags2,
    /// Image layout
    pub layout: vk::ImageLayout,
}

impl Default for RgImageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl RgImageState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// 未定义状态（初始状态或不关心内容）
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    /// 颜色附件输出
    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// 颜色附件读写（load op 为 LOAD，或 blend）
    pub const COLOR_ATTACHMENT_READ_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// 深度附件读写（深度测试总是会读）
    pub const DEPTH_ATTACHMENT_READ_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    /// 着色器只读采样（片段着色器）
    pub const SHADER_READ_FRAGMENT: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 着色器只读采样（计算着色器）
    pub const SHADER_READ_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 存储图像写入（计算着色器）
    pub const STORAGE_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
    );

    /// 呈现（swapchain image）
    pub const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);

    // ============ 辅助方法 ============

    /// 写操作的 access flags
    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
    );

    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    /// 用于 barrier src 的 access（读操作不需要 make available）
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & Self::WRITE_ACCESS
    }

    /// 同一个 Pass 内多处使用同一图像时合并 stage/access
    #[inline]
    pub(crate) fn merged(self, other: Self) -> Self {
        Self::new(self.stage | other.stage, self.access | other.access, self.layout)
    }
}

/// 缓冲区资源状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgBufferState {
    /// Pipeline stage
    pub stage: vk::PipelineStageFlags2,
    /// Access mask
    pub access: vk::AccessFlags2,
}

impl Default for RgBufferState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl RgBufferState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    pub const UNDEFINED: Self = Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE);

    /// Uniform 缓冲区读取（计算着色器）
    pub const UNIFORM_COMPUTE: Self =
        Self::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::UNIFORM_READ);

    /// 存储缓冲区读写（计算着色器）
    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
    );

    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw()
            | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
    );

    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }

    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & Self::WRITE_ACCESS
    }

    #[inline]
    pub(crate) fn merged(self, other: Self) -> Self {
        Self::new(self.stage | other.stage, self.access | other.access)
    }
}

/// Pass 对资源的读写方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgAccessType {
    ReadOnly,
    /// 只写，包括不 load 旧内容的 attachment
    WriteOnly,
    ReadWrite,
}

impl RgAccessType {
    #[inline]
    pub fn reads(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    #[inline]
    pub fn writes(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// 以 descriptor 形式绑定时的类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgDescriptorKind {
    /// 采样纹理
    Sampled,
    /// 存储图像
    Storage,
    Uniform,
    StorageBuffer,
    AccelerationStructure,
}

impl RgDescriptorKind {
    #[inline]
    pub fn is_texture_kind(self) -> bool {
        matches!(self, Self::Sampled | Self::Storage)
    }

    #[inline]
    pub fn is_buffer_kind(self) -> bool {
        matches!(self, Self::Uniform | Self::StorageBuffer | Self::AccelerationStructure)
    }

    /// 该类型的 descriptor 是否允许 shader 写入
    #[inline]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Storage | Self::StorageBuffer)
    }

    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::Sampled => vk::DescriptorType::SAMPLED_IMAGE,
            Self::Storage => vk::DescriptorType::STORAGE_IMAGE,
            Self::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }

    fn read_access(self) -> vk::AccessFlags2 {
        match self {
            Self::Sampled => vk::AccessFlags2::SHADER_SAMPLED_READ,
            Self::Storage | Self::StorageBuffer => vk::AccessFlags2::SHADER_STORAGE_READ,
            Self::Uniform => vk::AccessFlags2::UNIFORM_READ,
            Self::AccelerationStructure => vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        }
    }

    fn write_access(self) -> vk::AccessFlags2 {
        if self.is_writable() { vk::AccessFlags2::SHADER_STORAGE_WRITE } else { vk::AccessFlags2::NONE }
    }

    fn access_mask(self, access_type: RgAccessType) -> vk::AccessFlags2 {
        let mut access = vk::AccessFlags2::NONE;
        if access_type.reads() {
            access |= self.read_access();
        }
        if access_type.writes() {
            access |= self.write_access();
        }
        access
    }

    /// 以该 descriptor 访问纹理时需要的状态
    pub fn texture_state(self, access_type: RgAccessType, stage: vk::PipelineStageFlags2) -> RgImageState {
        let layout = match self {
            Self::Sampled => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            _ => vk::ImageLayout::GENERAL,
        };
        RgImageState::new(stage, self.access_mask(access_type), layout)
    }

    /// 以该 descriptor 访问缓冲区时需要的状态
    pub fn buffer_state(self, access_type: RgAccessType, stage: vk::PipelineStageFlags2) -> RgBufferState {
        RgBufferState::new(stage, self.access_mask(access_type))
    }
}

/// 资源在 Pass 中的绑定位置
///
/// Pass 的状态表以 `(资源, 绑定位置)` 为键。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RgBindingPoint {
    Descriptor { set: u32, binding: u32 },
    ColorAttachment(u32),
    DepthStencil,
}

impl RgBindingPoint {
    #[inline]
    pub fn descriptor(set: u32, binding: u32) -> Self {
        Self::Descriptor { set, binding }
    }

    #[inline]
    pub fn is_attachment(&self) -> bool {
        !matches!(self, Self::Descriptor { .. })
    }
}

impl fmt::Display for RgBindingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Descriptor { set, binding } => write!(f, "set {set} binding {binding}"),
            Self::ColorAttachment(slot) => write!(f, "color attachment {slot}"),
            Self::DepthStencil => write!(f, "depth-stencil attachment"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RgClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Attachment 的 load/store 策略以及 Pass 结束后的 layout
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgAttachmentOps {
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: Option<RgClearValue>,
    /// Pass 结束后资源所处的 layout，`None` 表示保持 attachment layout
    pub final_layout: Option<vk::ImageLayout>,
}

impl RgAttachmentOps {
    /// 清除后写入
    pub fn clear(clear_value: RgClearValue) -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: Some(clear_value),
            final_layout: None,
        }
    }

    /// 保留旧内容继续写入
    pub fn load() -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: None,
            final_layout: None,
        }
    }

    /// 不关心旧内容
    pub fn dont_care() -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: None,
            final_layout: None,
        }
    }

    #[inline]
    pub fn with_store_op(mut self, store_op: vk::AttachmentStoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    #[inline]
    pub fn with_final_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.final_layout = Some(layout);
        self
    }

    #[inline]
    pub fn access_type(&self) -> RgAccessType {
        if self.load_op == vk::AttachmentLoadOp::LOAD { RgAccessType::ReadWrite } else { RgAccessType::WriteOnly }
    }
}

/// Pass 对一个纹理的访问记录
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgTextureAccess {
    pub binding: RgBindingPoint,
    /// attachment 为 `None`
    pub descriptor: Option<RgDescriptorKind>,
    pub access_type: RgAccessType,
    /// Pass 执行期间要求的状态
    pub state: RgImageState,
    /// Pass 结束后的 layout；只有 attachment 可能与 `state.layout` 不同
    pub final_layout: vk::ImageLayout,
    pub attachment: Option<RgAttachmentOps>,
}

impl RgTextureAccess {
    pub fn descriptor(
        binding: RgBindingPoint,
        kind: RgDescriptorKind,
        access_type: RgAccessType,
        stage: vk::PipelineStageFlags2,
    ) -> Self {
        let state = kind.texture_state(access_type, stage);
        Self {
            binding,
            descriptor: Some(kind),
            access_type,
            state,
            final_layout: state.layout,
            attachment: None,
        }
    }

    pub fn color_attachment(slot: u32, ops: RgAttachmentOps) -> Self {
        let access_type = ops.access_type();
        let state = match access_type {
            RgAccessType::ReadWrite => RgImageState::COLOR_ATTACHMENT_READ_WRITE,
            _ => RgImageState::COLOR_ATTACHMENT_WRITE,
        };
        Self {
            binding: RgBindingPoint::ColorAttachment(slot),
            descriptor: None,
            access_type,
            state,
            final_layout: ops.final_layout.unwrap_or(state.layout),
            attachment: Some(ops),
        }
    }

    pub fn depth_stencil_attachment(ops: RgAttachmentOps) -> Self {
        let state = RgImageState::DEPTH_ATTACHMENT_READ_WRITE;
        Self {
            binding: RgBindingPoint::DepthStencil,
            descriptor: None,
            access_type: ops.access_type(),
            state,
            final_layout: ops.final_layout.unwrap_or(state.layout),
            attachment: Some(ops),
        }
    }

    /// Pass 结束后资源留下的状态
    #[inline]
    pub fn state_after(&self) -> RgImageState {
        RgImageState::new(self.state.stage, self.state.access, self.final_layout)
    }
}

/// Pass 对一个缓冲区的访问记录
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBufferAccess {
    pub binding: RgBindingPoint,
    pub descriptor: RgDescriptorKind,
    pub access_type: RgAccessType,
    pub state: RgBufferState,
    /// 访问的字节范围
    pub offset: vk::DeviceSize,
    /// `vk::WHOLE_SIZE` 表示到缓冲区末尾
    pub size: vk::DeviceSize,
}

impl RgBufferAccess {
    pub fn new(
        binding: RgBindingPoint,
        kind: RgDescriptorKind,
        access_type: RgAccessType,
        stage: vk::PipelineStageFlags2,
        range: std::ops::Range<vk::DeviceSize>,
    ) -> Self {
        Self {
            binding,
            descriptor: kind,
            access_type,
            state: kind.buffer_state(access_type, stage),
            offset: range.start,
            size: if range.end == vk::WHOLE_SIZE { vk::WHOLE_SIZE } else { range.end.saturating_sub(range.start) },
        }
    }

    /// 整个缓冲区
    pub fn whole(
        binding: RgBindingPoint,
        kind: RgDescriptorKind,
        access_type: RgAccessType,
        stage: vk::PipelineStageFlags2,
    ) -> Self {
        Self {
            binding,
            descriptor: kind,
            access_type,
            state: kind.buffer_state(access_type, stage),
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }
}
