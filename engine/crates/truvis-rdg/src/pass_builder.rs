//! Pass 构建器
//!
//! 三种 Pass 各有一个按值链式调用的构建器，`finish()` 时把节点插入图中。
//! 构建器只负责组装访问记录，不做校验，也不调用 GPU。
//!
//! ```ignore
//! let lighting = graph
//!     .add_compute_pass("lighting")
//!     .read_texture(gbuffer, RgBindingPoint::descriptor(0, 0), RgDescriptorKind::Sampled, COMPUTE_SHADER)
//!     .write_texture(hdr, RgBindingPoint::descriptor(0, 1), RgDescriptorKind::Storage, COMPUTE_SHADER)
//!     .program(lighting_program)
//!     .execute(|ctx| { /* dispatch */ })
//!     .finish();
//! ```

use std::ops::Range;

use ash::vk;

use crate::dag::RgPassId;
use crate::graph_builder::RenderGraphBuilder;
use crate::pass::{RgPassContext, RgPassKind, RgPassNode, RgProgramHandle, RgQueue};
use crate::resource_handle::RgResourceHandle;
use crate::resource_state::{
    RgAccessType, RgAttachmentOps, RgBindingPoint, RgBufferAccess, RgDescriptorKind, RgTextureAccess,
};

/// 三种构建器共用的方法
macro_rules! impl_common_pass_methods {
    ($builder:ident) => {
        impl<'g, 'a> $builder<'g, 'a> {
            /// 以 descriptor 形式读取纹理
            pub fn read_texture(
                self,
                texture: RgResourceHandle,
                binding: RgBindingPoint,
                kind: RgDescriptorKind,
                stage: vk::PipelineStageFlags2,
            ) -> Self {
                self.texture(texture, binding, kind, RgAccessType::ReadOnly, stage)
            }

            pub fn write_texture(
                self,
                texture: RgResourceHandle,
                binding: RgBindingPoint,
                kind: RgDescriptorKind,
                stage: vk::PipelineStageFlags2,
            ) -> Self {
                self.texture(texture, binding, kind, RgAccessType::WriteOnly, stage)
            }

            /// 常用于累积操作（如 RT 累积、后处理）
            pub fn read_write_texture(
                self,
                texture: RgResourceHandle,
                binding: RgBindingPoint,
                kind: RgDescriptorKind,
                stage: vk::PipelineStageFlags2,
            ) -> Self {
                self.texture(texture, binding, kind, RgAccessType::ReadWrite, stage)
            }

            /// `range` 为 `0..vk::WHOLE_SIZE` 时表示整个缓冲区
            pub fn read_buffer(
                self,
                buffer: RgResourceHandle,
                binding: RgBindingPoint,
                kind: RgDescriptorKind,
                stage: vk::PipelineStageFlags2,
                range: Range<vk::DeviceSize>,
            ) -> Self {
                self.buffer(buffer, binding, kind, RgAccessType::ReadOnly, stage, range)
            }

            pub fn write_buffer(
                self,
                buffer: RgResourceHandle,
                binding: RgBindingPoint,
                kind: RgDescriptorKind,
                stage: vk::PipelineStageFlags2,
                range: Range<vk::DeviceSize>,
            ) -> Self {
                self.buffer(buffer, binding, kind, RgAccessType::WriteOnly, stage, range)
            }

            pub fn read_write_buffer(
                self,
                buffer: RgResourceHandle,
                binding: RgBindingPoint,
                kind: RgDescriptorKind,
                stage: vk::PipelineStageFlags2,
                range: Range<vk::DeviceSize>,
            ) -> Self {
                self.buffer(buffer, binding, kind, RgAccessType::ReadWrite, stage, range)
            }

            #[inline]
            pub fn program(mut self, program: RgProgramHandle) -> Self {
                self.node.program = Some(program);
                self
            }

            /// 执行回调，在命令缓冲区录制期间调用
            pub fn execute(mut self, callback: impl FnMut(&mut RgPassContext<'_>) + 'a) -> Self {
                self.node.execute = Some(Box::new(callback));
                self
            }

            /// 不参与剔除
            #[inline]
            pub fn never_cull(mut self) -> Self {
                self.node.never_cull = true;
                self
            }

            /// 把 Pass 插入图中
            pub fn finish(self) -> RgPassId {
                self.graph.insert_pass(self.node)
            }

            fn texture(
                mut self,
                texture: RgResourceHandle,
                binding: RgBindingPoint,
                kind: RgDescriptorKind,
                access_type: RgAccessType,
                stage: vk::PipelineStageFlags2,
            ) -> Self {
                self.node.record_texture(texture, RgTextureAccess::descriptor(binding, kind, access_type, stage));
                self
            }

            fn buffer(
                mut self,
                buffer: RgResourceHandle,
                binding: RgBindingPoint,
                kind: RgDescriptorKind,
                access_type: RgAccessType,
                stage: vk::PipelineStageFlags2,
                range: Range<vk::DeviceSize>,
            ) -> Self {
                self.node.record_buffer(buffer, RgBufferAccess::new(binding, kind, access_type, stage, range));
                self
            }
        }
    };
}

/// 光栅化 Pass 构建器
pub struct RgRenderPassBuilder<'g, 'a> {
    graph: &'g mut RenderGraphBuilder<'a>,
    node: RgPassNode<'a>,
}

/// 计算 Pass 构建器
pub struct RgComputePassBuilder<'g, 'a> {
    graph: &'g mut RenderGraphBuilder<'a>,
    node: RgPassNode<'a>,
}

/// 光线追踪 Pass 构建器
pub struct RgRayTracingPassBuilder<'g, 'a> {
    graph: &'g mut RenderGraphBuilder<'a>,
    node: RgPassNode<'a>,
}

impl_common_pass_methods!(RgRenderPassBuilder);
impl_common_pass_methods!(RgComputePassBuilder);
impl_common_pass_methods!(RgRayTracingPassBuilder);

impl<'g, 'a> RgRenderPassBuilder<'g, 'a> {
    pub(crate) fn new(graph: &'g mut RenderGraphBuilder<'a>, name: String) -> Self {
        Self {
            graph,
            node: RgPassNode::new(name, RgPassKind::Render(Default::default())),
        }
    }

    /// 颜色附件，同一 slot 后指定的纹理替换先指定的
    pub fn color(mut self, slot: u32, texture: RgResourceHandle, ops: RgAttachmentOps) -> Self {
        let binding = RgBindingPoint::ColorAttachment(slot);
        let mut replaced = None;
        if let RgPassKind::Render(data) = &mut self.node.kind {
            replaced = data.colors.insert(slot, texture).filter(|prev| *prev != texture);
        }
        if let Some(prev) = replaced {
            self.node.remove_texture(prev, binding);
        }
        self.node.record_texture(texture, RgTextureAccess::color_attachment(slot, ops));
        self
    }

    pub fn depth_stencil(mut self, texture: RgResourceHandle, ops: RgAttachmentOps) -> Self {
        let mut replaced = None;
        if let RgPassKind::Render(data) = &mut self.node.kind {
            replaced = data.depth_stencil.replace(texture).filter(|prev| *prev != texture);
        }
        if let Some(prev) = replaced {
            self.node.remove_texture(prev, RgBindingPoint::DepthStencil);
        }
        self.node.record_texture(texture, RgTextureAccess::depth_stencil_attachment(ops));
        self
    }
}

impl<'g, 'a> RgComputePassBuilder<'g, 'a> {
    pub(crate) fn new(graph: &'g mut RenderGraphBuilder<'a>, name: String) -> Self {
        Self {
            graph,
            node: RgPassNode::new(name, RgPassKind::Compute),
        }
    }

    /// 标记为 async compute，执行顺序不变
    #[inline]
    pub fn async_compute(mut self) -> Self {
        self.node.queue = RgQueue::AsyncCompute;
        self
    }
}

impl<'g, 'a> RgRayTracingPassBuilder<'g, 'a> {
    pub(crate) fn new(graph: &'g mut RenderGraphBuilder<'a>, name: String) -> Self {
        Self {
            graph,
            node: RgPassNode::new(name, RgPassKind::RayTracing(Default::default())),
        }
    }

    /// 只读绑定加速结构（以缓冲区形式管理）
    pub fn acceleration_structure(
        mut self,
        binding: RgBindingPoint,
        buffer: RgResourceHandle,
        stage: vk::PipelineStageFlags2,
    ) -> Self {
        self.node.record_buffer(
            buffer,
            RgBufferAccess::whole(binding, RgDescriptorKind::AccelerationStructure, RgAccessType::ReadOnly, stage),
        );
        if let RgPassKind::RayTracing(data) = &mut self.node.kind {
            if !data.acceleration_structures.contains(&buffer) {
                data.acceleration_structures.push(buffer);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_resource::RgBufferDesc;
    use crate::config::RdgConfig;
    use crate::resource_context::RgResourceContext;
    use crate::resource_state::RgClearValue;
    use crate::texture_resource::RgTextureDesc;

    fn context() -> RgResourceContext {
        RgResourceContext::new(&RdgConfig {
            texture_pool_capacity: 8,
            buffer_pool_capacity: 8,
            ..Default::default()
        })
    }

    fn color(ctx: &mut RgResourceContext, name: &str) -> RgResourceHandle {
        ctx.create_texture(RgTextureDesc::new_2d(
            name,
            64,
            64,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        ))
        .unwrap()
    }

    #[test]
    fn test_color_slot_replaced() {
        let mut ctx = context();
        let first = color(&mut ctx, "first");
        let second = color(&mut ctx, "second");

        let mut graph = RenderGraphBuilder::new(&mut ctx);
        let id = graph
            .add_render_pass("draw")
            .color(0, first, RgAttachmentOps::load())
            .color(0, second, RgAttachmentOps::clear(RgClearValue::Color([0.0; 4])))
            .finish();

        let pass = graph.pass(id).unwrap();
        assert!(pass.texture_access(first, RgBindingPoint::ColorAttachment(0)).is_none());
        assert!(pass.texture_access(second, RgBindingPoint::ColorAttachment(0)).is_some());
        let RgPassKind::Render(data) = &pass.kind else {
            panic!("expected a render pass");
        };
        assert_eq!(data.colors.get(&0), Some(&second));
    }

    #[test]
    fn test_compute_and_ray_tracing_options() {
        let mut ctx = context();
        let tlas = ctx
            .create_buffer(RgBufferDesc::new(
                "tlas",
                4096,
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            ))
            .unwrap();

        let mut graph = RenderGraphBuilder::new(&mut ctx);
        let compute = graph.add_compute_pass("cull").async_compute().never_cull().program(RgProgramHandle(3)).finish();
        let rt = graph
            .add_ray_tracing_pass("trace")
            .acceleration_structure(
                RgBindingPoint::descriptor(0, 0),
                tlas,
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            )
            .finish();

        let compute = graph.pass(compute).unwrap();
        assert_eq!(compute.queue, RgQueue::AsyncCompute);
        assert!(compute.never_cull);
        assert_eq!(compute.program, Some(RgProgramHandle(3)));

        let rt = graph.pass(rt).unwrap();
        let access = rt.buffer_access(tlas, RgBindingPoint::descriptor(0, 0)).unwrap();
        assert_eq!(access.descriptor, RgDescriptorKind::AccelerationStructure);
        assert_eq!(access.size, vk::WHOLE_SIZE);
        let RgPassKind::RayTracing(data) = &rt.kind else {
            panic!("expected a ray tracing pass");
        };
        assert_eq!(data.acceleration_structures, vec![tlas]);
    }
}
