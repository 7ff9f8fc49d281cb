//! Truvis RenderGraph - 声明式渲染图
//!
//! 调用方每帧声明 Pass 以及它们读写的纹理、缓冲区，RenderGraph 负责：
//! 推导 Pass 之间的依赖、剔除对输出没有贡献的 Pass、计算每个 Pass 之前需要的 barrier，
//! 最后按拓扑顺序把命令录制交给后端。
//!
//! # 核心概念
//!
//! - **RgResourceHandle**: 资源句柄，引用资源池中的描述，跨帧有效直到被销毁
//! - **RgResourcePool**: 固定容量的描述池，槽位用代数识别旧句柄
//! - **RgResourceContext**: 持有纹理池和缓冲区池，跨帧存在
//! - **RenderGraphBuilder**: 每帧创建，用于声明 Pass
//! - **CompiledGraph**: 编译结果，包含执行顺序、预计算的 barriers 和 attachment 分组
//! - **RgBackend**: 后端接口，负责 GPU 对象、descriptor/pipeline 和命令录制
//!
//! # 使用示例
//!
//! ```ignore
//! use truvis_rdg::*;
//!
//! let mut resources = RgResourceContext::new(&RdgConfig::default());
//! let hdr = resources.create_texture(RgTextureDesc::new_2d(
//!     "hdr",
//!     1920,
//!     1080,
//!     vk::Format::R16G16B16A16_SFLOAT,
//!     vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
//! ))?;
//!
//! // 每帧
//! let mut builder = RenderGraphBuilder::new(&mut resources);
//! builder
//!     .add_render_pass("forward")
//!     .color(0, hdr, RgAttachmentOps::clear(RgClearValue::Color([0.0; 4])))
//!     .program(forward_program)
//!     .execute(|ctx| { /* draw */ })
//!     .finish();
//! builder
//!     .add_compute_pass("tonemap")
//!     .read_texture(hdr, RgBindingPoint::descriptor(0, 0), RgDescriptorKind::Sampled, vk::PipelineStageFlags2::COMPUTE_SHADER)
//!     .write_texture(swapchain, RgBindingPoint::descriptor(0, 1), RgDescriptorKind::Storage, vk::PipelineStageFlags2::COMPUTE_SHADER)
//!     .execute(|ctx| { /* dispatch */ })
//!     .finish();
//! builder.register_external(swapchain);
//!
//! let stats = builder.compile()?.execute(&mut backend)?;
//! ```
//!
//! # 模块结构
//!
//! - `resource_handle` / `resource_pool`: 句柄与描述池
//! - `texture_resource` / `buffer_resource`: 资源描述
//! - `resource_state`: 资源状态（stage/access/layout）与访问声明
//! - `dag`: 依赖图、环检测、拓扑排序
//! - `pass` / `pass_builder`: Pass 节点和流式构建器
//! - `graph_builder`: 每帧构建器和编译
//! - `barrier` / `render_target`: 编译产物
//! - `executor`: 执行
//! - `backend`: 后端接口

mod backend;
mod barrier;
mod buffer_resource;
mod config;
mod dag;
mod error;
mod executor;
mod graph_builder;
mod pass;
mod pass_builder;
mod render_target;
mod resource_context;
mod resource_handle;
mod resource_pool;
mod resource_state;
mod texture_resource;

pub use ash::vk;

// Re-exports
pub use backend::{
    RgBackend, RgCommandEncoder, RgDescriptorBinding, RgDescriptorProvider, RgDescriptorRequest, RgPipelineProvider,
    RgPipelineRequest, RgRenderingInfo, RgResolvedResource, RgResourceAllocator,
};
pub use barrier::{RgBufferBarrierDesc, RgImageBarrierDesc, RgPassBarriers};
pub use buffer_resource::RgBufferDesc;
pub use config::RdgConfig;
pub use dag::{RgDag, RgDagNode, RgEdge, RgEdgeId, RgEdgeKind, RgNodeId, RgPassId};
pub use error::{RdgError, RdgResult};
pub use executor::{CompiledGraph, RgExecuteStats};
pub use graph_builder::RenderGraphBuilder;
pub use pass::{
    RgPassCallback, RgPassContext, RgPassKind, RgPassNode, RgProgramHandle, RgQueue, RgRayTracingPassData,
    RgRenderPassData,
};
pub use pass_builder::{RgComputePassBuilder, RgRayTracingPassBuilder, RgRenderPassBuilder};
pub use render_target::{RgAttachmentTarget, RgRenderTargetConfig};
pub use resource_context::RgResourceContext;
pub use resource_handle::{RgResourceHandle, RgResourceKind};
pub use resource_pool::{RgOwnership, RgProducerRef, RgResourceDesc, RgResourcePool};
pub use resource_state::{
    RgAccessType, RgAttachmentOps, RgBindingPoint, RgBufferAccess, RgBufferState, RgClearValue, RgDescriptorKind,
    RgImageState, RgTextureAccess,
};
pub use texture_resource::RgTextureDesc;
