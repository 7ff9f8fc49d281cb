//! 外部协作者接口
//!
//! RenderGraph 自身不调用任何 Vulkan 函数，GPU 对象的创建、descriptor/pipeline 的获取
//! 以及命令录制都通过这里的 trait 交给渲染后端。

use ash::vk;

use crate::buffer_resource::RgBufferDesc;
use crate::error::RdgResult;
use crate::pass::{RgProgramHandle, RgQueue};
use crate::render_target::RgRenderTargetConfig;
use crate::resource_handle::RgResourceHandle;
use crate::resource_state::RgDescriptorKind;
use crate::texture_resource::RgTextureDesc;

/// GPU 资源分配器
///
/// `create_*` 在 execute 开始时为缺少 backing 的描述调用；`destroy_*` 在池释放槽位时调用，
/// 导入的对象不会经过这里。
pub trait RgResourceAllocator {
    fn create_texture(&mut self, handle: RgResourceHandle, desc: &RgTextureDesc) -> RdgResult<vk::Image>;

    fn destroy_texture(&mut self, handle: RgResourceHandle, image: vk::Image, desc: &RgTextureDesc);

    fn create_buffer(&mut self, handle: RgResourceHandle, desc: &RgBufferDesc) -> RdgResult<vk::Buffer>;

    fn destroy_buffer(&mut self, handle: RgResourceHandle, buffer: vk::Buffer, desc: &RgBufferDesc);
}

/// 已经解析到 GPU 对象的资源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgResolvedResource {
    Image {
        handle: RgResourceHandle,
        image: vk::Image,
        layout: vk::ImageLayout,
    },
    Buffer {
        handle: RgResourceHandle,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgDescriptorBinding {
    pub set: u32,
    pub binding: u32,
    pub kind: RgDescriptorKind,
    pub resource: RgResolvedResource,
}

pub struct RgDescriptorRequest<'r> {
    pub pass_name: &'r str,
    pub program: Option<RgProgramHandle>,
    pub bind_point: vk::PipelineBindPoint,
    /// 按 `(set, binding)` 排序
    pub bindings: &'r [RgDescriptorBinding],
}

/// Descriptor set 提供者，缓存与回收由实现方负责
pub trait RgDescriptorProvider {
    fn acquire_descriptor_set(&mut self, request: &RgDescriptorRequest<'_>) -> RdgResult<vk::DescriptorSet>;
}

pub struct RgPipelineRequest<'r> {
    pub pass_name: &'r str,
    pub program: RgProgramHandle,
    pub bind_point: vk::PipelineBindPoint,
    /// 只有 render pass 非空
    pub color_formats: &'r [vk::Format],
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
}

/// Pipeline 提供者，磁盘缓存等由实现方负责
pub trait RgPipelineProvider {
    fn acquire_pipeline(&mut self, request: &RgPipelineRequest<'_>) -> RdgResult<vk::Pipeline>;
}

/// 开始动态渲染需要的信息
pub struct RgRenderingInfo<'r> {
    pub targets: &'r RgRenderTargetConfig,
    /// 与 `targets.colors` 一一对应
    pub color_images: &'r [vk::Image],
    pub depth_image: Option<vk::Image>,
}

/// 命令录制上下文
pub trait RgCommandEncoder {
    fn command_buffer(&self) -> vk::CommandBuffer;

    /// 调试标签（debug utils label / profiler zone）
    fn begin_scope(&mut self, name: &str, kind: &'static str, queue: RgQueue);

    fn end_scope(&mut self);

    fn pipeline_barrier(
        &mut self,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    );

    fn begin_rendering(&mut self, info: &RgRenderingInfo<'_>);

    fn end_rendering(&mut self);

    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);

    fn bind_descriptor_set(&mut self, bind_point: vk::PipelineBindPoint, descriptor_set: vk::DescriptorSet);
}

/// 执行一帧需要的全部后端能力
pub trait RgBackend: RgResourceAllocator + RgDescriptorProvider + RgPipelineProvider + RgCommandEncoder {}

impl<T> RgBackend for T where T: RgResourceAllocator + RgDescriptorProvider + RgPipelineProvider + RgCommandEncoder {}
