//! Pass 定义
//!
//! `RgPassNode` 是 DAG 的节点负载：Pass 类型、对每个资源的访问记录和执行回调。
//! `RgPassContext` 是执行回调拿到的上下文。

use std::collections::BTreeMap;

use ash::vk;
use indexmap::IndexMap;

use crate::backend::RgCommandEncoder;
use crate::dag::RgPassId;
use crate::render_target::RgRenderTargetConfig;
use crate::resource_context::RgResourceContext;
use crate::resource_handle::RgResourceHandle;
use crate::resource_state::{RgBindingPoint, RgBufferAccess, RgTextureAccess};
use crate::texture_resource::RgTextureDesc;

/// 调用方持有的 shader program 引用，RenderGraph 只负责转交给 pipeline provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgProgramHandle(pub u64);

/// Pass 提交的队列
///
/// 只是一个标记，执行顺序始终是拓扑顺序。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RgQueue {
    #[default]
    Main,
    AsyncCompute,
}

#[derive(Clone, Debug, Default)]
pub struct RgRenderPassData {
    /// slot -> 纹理，按 slot 排序
    pub colors: BTreeMap<u32, RgResourceHandle>,
    pub depth_stencil: Option<RgResourceHandle>,
}

#[derive(Clone, Debug, Default)]
pub struct RgRayTracingPassData {
    pub acceleration_structures: Vec<RgResourceHandle>,
}

#[derive(Clone, Debug)]
pub enum RgPassKind {
    Render(RgRenderPassData),
    Compute,
    RayTracing(RgRayTracingPassData),
}

impl RgPassKind {
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        match self {
            Self::Render(_) => vk::PipelineBindPoint::GRAPHICS,
            Self::Compute => vk::PipelineBindPoint::COMPUTE,
            Self::RayTracing(_) => vk::PipelineBindPoint::RAY_TRACING_KHR,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Render(_) => "render",
            Self::Compute => "compute",
            Self::RayTracing(_) => "ray-tracing",
        }
    }
}

/// 同一个 `(资源, binding)` 被声明为不同 descriptor 类型
#[derive(Clone, Debug)]
pub(crate) struct RgStateConflict {
    pub resource: RgResourceHandle,
    pub binding: RgBindingPoint,
    pub first: String,
    pub second: String,
}

/// Pass 执行回调
pub type RgPassCallback<'a> = Box<dyn FnMut(&mut RgPassContext<'_>) + 'a>;

/// Pass 节点数据
pub struct RgPassNode<'a> {
    pub name: String,
    pub kind: RgPassKind,
    pub program: Option<RgProgramHandle>,
    pub queue: RgQueue,
    /// 即使没有输出被使用也保留
    pub never_cull: bool,

    /// 插入顺序即声明顺序
    pub(crate) textures: IndexMap<(RgResourceHandle, RgBindingPoint), RgTextureAccess>,
    pub(crate) buffers: IndexMap<(RgResourceHandle, RgBindingPoint), RgBufferAccess>,
    pub(crate) conflicts: Vec<RgStateConflict>,
    pub(crate) execute: Option<RgPassCallback<'a>>,
}

// new & init
impl<'a> RgPassNode<'a> {
    pub fn new(name: impl Into<String>, kind: RgPassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            program: None,
            queue: RgQueue::Main,
            never_cull: false,
            textures: IndexMap::new(),
            buffers: IndexMap::new(),
            conflicts: Vec::new(),
            execute: None,
        }
    }
}

// 记录资源访问
impl<'a> RgPassNode<'a> {
    /// 同一个 key 后声明的覆盖先声明的；descriptor 类型不同时记为冲突
    pub(crate) fn record_texture(&mut self, handle: RgResourceHandle, access: RgTextureAccess) {
        let key = (handle, access.binding);
        if let Some(prev) = self.textures.get(&key) {
            if prev.descriptor != access.descriptor {
                self.conflicts.push(RgStateConflict {
                    resource: handle,
                    binding: access.binding,
                    first: format!("{:?}", prev.descriptor),
                    second: format!("{:?}", access.descriptor),
                });
            }
        }
        self.textures.insert(key, access);
    }

    pub(crate) fn record_buffer(&mut self, handle: RgResourceHandle, access: RgBufferAccess) {
        let key = (handle, access.binding);
        if let Some(prev) = self.buffers.get(&key) {
            if prev.descriptor != access.descriptor {
                self.conflicts.push(RgStateConflict {
                    resource: handle,
                    binding: access.binding,
                    first: format!("{:?}", prev.descriptor),
                    second: format!("{:?}", access.descriptor),
                });
            }
        }
        self.buffers.insert(key, access);
    }

    /// 去掉某个 binding 上的旧纹理（attachment slot 被重新指定时）
    pub(crate) fn remove_texture(&mut self, handle: RgResourceHandle, binding: RgBindingPoint) {
        self.textures.shift_remove(&(handle, binding));
    }
}

// getters
impl<'a> RgPassNode<'a> {
    pub fn texture_accesses(&self) -> impl Iterator<Item = (RgResourceHandle, &RgTextureAccess)> {
        self.textures.iter().map(|((handle, _), access)| (*handle, access))
    }

    pub fn buffer_accesses(&self) -> impl Iterator<Item = (RgResourceHandle, &RgBufferAccess)> {
        self.buffers.iter().map(|((handle, _), access)| (*handle, access))
    }

    #[inline]
    pub fn texture_access(&self, handle: RgResourceHandle, binding: RgBindingPoint) -> Option<&RgTextureAccess> {
        self.textures.get(&(handle, binding))
    }

    #[inline]
    pub fn buffer_access(&self, handle: RgResourceHandle, binding: RgBindingPoint) -> Option<&RgBufferAccess> {
        self.buffers.get(&(handle, binding))
    }

    #[inline]
    pub fn is_render(&self) -> bool {
        matches!(self.kind, RgPassKind::Render(_))
    }
}

/// Pass 执行时的上下文
pub struct RgPassContext<'c> {
    /// 原始命令缓冲区
    pub cmd: vk::CommandBuffer,
    pub encoder: &'c mut dyn RgCommandEncoder,
    pub pass_id: RgPassId,
    pub name: &'c str,
    pub queue: RgQueue,
    pub pipeline: Option<vk::Pipeline>,
    pub descriptor_set: Option<vk::DescriptorSet>,
    /// 只有 render pass 有
    pub render_targets: Option<&'c RgRenderTargetConfig>,

    pub(crate) resources: &'c RgResourceContext,
}

impl<'c> RgPassContext<'c> {
    /// 纹理对应的 `vk::Image`
    #[inline]
    pub fn get_image(&self, handle: RgResourceHandle) -> Option<vk::Image> {
        self.resources.textures.get(handle).ok().and_then(|desc| desc.backing())
    }

    #[inline]
    pub fn get_buffer(&self, handle: RgResourceHandle) -> Option<vk::Buffer> {
        self.resources.buffers.get(handle).ok().and_then(|desc| desc.backing())
    }

    #[inline]
    pub fn texture_desc(&self, handle: RgResourceHandle) -> Option<&RgTextureDesc> {
        self.resources.textures.get(handle).ok()
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.resources.frame_index()
    }
}
