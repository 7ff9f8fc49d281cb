//! 编译结果与执行
//!
//! `CompiledGraph` 保存执行顺序、预计算的 barriers 和 attachment 分组，
//! `execute` 按拓扑顺序把它们交给后端录制。

use ash::vk;
use itertools::Itertools;

use crate::backend::{
    RgBackend, RgCommandEncoder, RgDescriptorBinding, RgDescriptorRequest, RgPipelineRequest, RgRenderingInfo,
    RgResolvedResource,
};
use crate::barrier::RgPassBarriers;
use crate::dag::{RgEdge, RgPassId};
use crate::error::{RdgError, RdgResult};
use crate::pass::{RgPassContext, RgPassNode};
use crate::render_target::RgRenderTargetConfig;
use crate::resource_context::RgResourceContext;
use crate::resource_handle::{RgResourceHandle, RgResourceKind};
use crate::resource_state::RgBindingPoint;

/// 一次执行的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgExecuteStats {
    pub executed_passes: usize,
    pub culled_passes: usize,
    /// 包括 Pass 结束后的 layout 转换
    pub image_barriers: usize,
    pub buffer_barriers: usize,
}

/// 编译后的渲染图
///
/// 所有按 Pass 索引的数组都以 `RgPassId::index()` 为下标，被剔除的 Pass 对应空条目。
pub struct CompiledGraph<'a> {
    pub(crate) resources: &'a mut RgResourceContext,
    pub(crate) passes: Vec<RgPassNode<'a>>,
    pub(crate) edges: Vec<RgEdge>,
    /// 拓扑顺序，只包含未被剔除的 Pass
    pub(crate) schedule: Vec<RgPassId>,
    pub(crate) culled: Vec<RgPassId>,
    pub(crate) barriers: Vec<RgPassBarriers>,
    /// Pass 结束后（end rendering 之后）的 layout 转换
    pub(crate) post_barriers: Vec<RgPassBarriers>,
    pub(crate) render_targets: Vec<Option<RgRenderTargetConfig>>,
    /// 被调度的 Pass 用到的资源以及外部注册的资源，执行前需要有 backing
    pub(crate) used_resources: Vec<RgResourceHandle>,
    pub(crate) frame_index: u64,
}

// getters
impl<'a> CompiledGraph<'a> {
    #[inline]
    pub fn schedule(&self) -> &[RgPassId] {
        &self.schedule
    }

    #[inline]
    pub fn culled(&self) -> &[RgPassId] {
        &self.culled
    }

    /// 执行顺序上的 Pass 名称
    pub fn scheduled_pass_names(&self) -> Vec<&str> {
        self.schedule.iter().map(|id| self.passes[id.index()].name.as_str()).collect()
    }

    #[inline]
    pub fn edges(&self) -> &[RgEdge] {
        &self.edges
    }

    #[inline]
    pub fn pass(&self, id: RgPassId) -> Option<&RgPassNode<'a>> {
        self.passes.get(id.index())
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Pass 执行前的 barriers；`id` 越界时 panic
    #[inline]
    pub fn barriers(&self, id: RgPassId) -> &RgPassBarriers {
        &self.barriers[id.index()]
    }

    #[inline]
    pub fn post_barriers(&self, id: RgPassId) -> &RgPassBarriers {
        &self.post_barriers[id.index()]
    }

    #[inline]
    pub fn render_targets(&self, id: RgPassId) -> Option<&RgRenderTargetConfig> {
        self.render_targets.get(id.index()).and_then(Option::as_ref)
    }

    #[inline]
    pub fn used_resources(&self) -> &[RgResourceHandle] {
        &self.used_resources
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

// execute
impl<'a> CompiledGraph<'a> {
    /// 执行渲染图
    ///
    /// 先为本帧用到但缺少 backing 的描述创建 GPU 对象，然后按拓扑顺序录制每个 Pass：
    /// scope、barriers、begin rendering、pipeline、descriptor set、回调、end rendering。
    pub fn execute<B: RgBackend>(self, backend: &mut B) -> RdgResult<RgExecuteStats> {
        profiling::scope!("CompiledGraph::execute");

        let Self {
            resources,
            mut passes,
            schedule,
            culled,
            barriers,
            post_barriers,
            render_targets,
            used_resources,
            frame_index,
            ..
        } = self;

        Self::materialize(resources, &used_resources, backend)?;
        let resources: &RgResourceContext = resources;

        let mut stats = RgExecuteStats {
            culled_passes: culled.len(),
            ..Default::default()
        };
        let cmd = backend.command_buffer();

        for &id in &schedule {
            let pass = &mut passes[id.index()];
            profiling::scope!("rg_pass", pass.name.as_str());

            backend.begin_scope(&pass.name, pass.kind.label(), pass.queue);
            Self::record_barriers(backend, resources, &barriers[id.index()], &mut stats)?;

            let targets = render_targets[id.index()].as_ref();
            if let Some(targets) = targets {
                let color_images = targets
                    .colors
                    .iter()
                    .map(|(_, target)| Self::resolve_image(resources, target.texture))
                    .collect::<RdgResult<Vec<_>>>()?;
                let depth_image = targets
                    .depth_stencil
                    .as_ref()
                    .map(|target| Self::resolve_image(resources, target.texture))
                    .transpose()?;
                backend.begin_rendering(&RgRenderingInfo {
                    targets,
                    color_images: &color_images,
                    depth_image,
                });
            }

            let bind_point = pass.kind.bind_point();
            let pipeline = match pass.program {
                Some(program) => {
                    let color_formats = targets.map(|t| t.color_formats()).unwrap_or_default();
                    let samples = targets
                        .and_then(|t| t.colors.first().map(|(_, c)| c.samples).or(t.depth_stencil.as_ref().map(|d| d.samples)))
                        .unwrap_or(vk::SampleCountFlags::TYPE_1);
                    let pipeline = backend.acquire_pipeline(&RgPipelineRequest {
                        pass_name: &pass.name,
                        program,
                        bind_point,
                        color_formats: &color_formats,
                        depth_format: targets.and_then(|t| t.depth_format()),
                        samples,
                    })?;
                    backend.bind_pipeline(bind_point, pipeline);
                    Some(pipeline)
                }
                None => None,
            };

            let bindings = Self::resolve_bindings(pass, resources)?;
            let descriptor_set = if bindings.is_empty() {
                None
            } else {
                let descriptor_set = backend.acquire_descriptor_set(&RgDescriptorRequest {
                    pass_name: &pass.name,
                    program: pass.program,
                    bind_point,
                    bindings: &bindings,
                })?;
                backend.bind_descriptor_set(bind_point, descriptor_set);
                Some(descriptor_set)
            };

            if let Some(callback) = pass.execute.as_mut() {
                let mut ctx = RgPassContext {
                    cmd,
                    encoder: &mut *backend,
                    pass_id: id,
                    name: &pass.name,
                    queue: pass.queue,
                    pipeline,
                    descriptor_set,
                    render_targets: targets,
                    resources,
                };
                callback(&mut ctx);
            } else {
                log::trace!("pass \"{}\" has no execute callback", pass.name);
            }

            if targets.is_some() {
                backend.end_rendering();
            }
            Self::record_barriers(backend, resources, &post_barriers[id.index()], &mut stats)?;
            backend.end_scope();

            stats.executed_passes += 1;
        }

        log::trace!("render graph frame {} executed: {:?}", frame_index, stats);
        Ok(stats)
    }

    /// 为 `handles` 中缺少 backing 的描述创建 GPU 对象，只被剔除的 Pass 使用的资源保持原样
    fn materialize<B: RgBackend>(
        resources: &mut RgResourceContext,
        handles: &[RgResourceHandle],
        backend: &mut B,
    ) -> RdgResult<()> {
        profiling::scope!("CompiledGraph::materialize");

        let mut created = 0;
        for &handle in handles {
            match handle.kind() {
                RgResourceKind::Texture => {
                    let desc = resources.textures.get_mut(handle)?;
                    if desc.backing.is_none() {
                        desc.backing = Some(backend.create_texture(handle, &*desc)?);
                        created += 1;
                    }
                }
                RgResourceKind::Buffer => {
                    let desc = resources.buffers.get_mut(handle)?;
                    if desc.backing.is_none() {
                        desc.backing = Some(backend.create_buffer(handle, &*desc)?);
                        created += 1;
                    }
                }
                RgResourceKind::Undefined => {}
            }
        }
        if created > 0 {
            log::debug!("materialized {} render graph resources", created);
        }
        Ok(())
    }

    fn resolve_image(resources: &RgResourceContext, handle: RgResourceHandle) -> RdgResult<vk::Image> {
        let desc = resources.textures.get(handle)?;
        desc.backing()
            .ok_or_else(|| RdgError::Backend(format!("texture \"{}\" has no backing image", desc.name)))
    }

    fn resolve_buffer(resources: &RgResourceContext, handle: RgResourceHandle) -> RdgResult<vk::Buffer> {
        let desc = resources.buffers.get(handle)?;
        desc.backing()
            .ok_or_else(|| RdgError::Backend(format!("buffer \"{}\" has no backing buffer", desc.name)))
    }

    fn record_barriers(
        encoder: &mut dyn RgCommandEncoder,
        resources: &RgResourceContext,
        barriers: &RgPassBarriers,
        stats: &mut RgExecuteStats,
    ) -> RdgResult<()> {
        if !barriers.has_barriers() {
            return Ok(());
        }

        let image_barriers = barriers
            .image_barriers
            .iter()
            .map(|desc| Self::resolve_image(resources, desc.resource).map(|image| desc.to_vk_barrier(image)))
            .collect::<RdgResult<Vec<_>>>()?;
        let buffer_barriers = barriers
            .buffer_barriers
            .iter()
            .map(|desc| Self::resolve_buffer(resources, desc.resource).map(|buffer| desc.to_vk_barrier(buffer)))
            .collect::<RdgResult<Vec<_>>>()?;

        encoder.pipeline_barrier(&image_barriers, &buffer_barriers);
        stats.image_barriers += image_barriers.len();
        stats.buffer_barriers += buffer_barriers.len();
        Ok(())
    }

    /// 收集 descriptor 绑定，按 `(set, binding)` 排序；attachment 不在其中
    fn resolve_bindings(pass: &RgPassNode<'_>, resources: &RgResourceContext) -> RdgResult<Vec<RgDescriptorBinding>> {
        let mut bindings = Vec::new();

        for (handle, access) in pass.texture_accesses() {
            let (RgBindingPoint::Descriptor { set, binding }, Some(kind)) = (access.binding, access.descriptor) else {
                continue;
            };
            bindings.push(RgDescriptorBinding {
                set,
                binding,
                kind,
                resource: RgResolvedResource::Image {
                    handle,
                    image: Self::resolve_image(resources, handle)?,
                    layout: access.state.layout,
                },
            });
        }

        for (handle, access) in pass.buffer_accesses() {
            let RgBindingPoint::Descriptor { set, binding } = access.binding else {
                continue;
            };
            bindings.push(RgDescriptorBinding {
                set,
                binding,
                kind: access.descriptor,
                resource: RgResolvedResource::Buffer {
                    handle,
                    buffer: Self::resolve_buffer(resources, handle)?,
                    offset: access.offset,
                    size: access.size,
                },
            });
        }

        bindings.sort_by_key(|b| (b.set, b.binding));
        Ok(bindings)
    }
}

// 调试方法
impl CompiledGraph<'_> {
    /// 以 debug 级别输出执行计划
    ///
    /// 包括执行顺序、被剔除的 Pass、每个 Pass 的资源访问和 barrier 详情。
    pub fn log_execution_plan(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }

        let texture_name = |handle: RgResourceHandle| {
            self.resources.textures.get(handle).map(|d| d.name.as_str()).unwrap_or("<unknown>")
        };
        let buffer_name = |handle: RgResourceHandle| {
            self.resources.buffers.get(handle).map(|d| d.name.as_str()).unwrap_or("<unknown>")
        };

        log::debug!("╔══════════════════════════════════════════════════════════════════╗");
        log::debug!("║              RenderGraph Execution Plan (frame {})", self.frame_index);
        log::debug!("╠══════════════════════════════════════════════════════════════════╣");
        log::debug!(
            "║ Total Passes: {}  |  Execution Order: [{}]",
            self.passes.len(),
            self.scheduled_pass_names().iter().join(" → ")
        );
        if !self.culled.is_empty() {
            log::debug!(
                "║ Culled: [{}]",
                self.culled.iter().map(|id| self.passes[id.index()].name.as_str()).join(", ")
            );
        }
        log::debug!("╚══════════════════════════════════════════════════════════════════╝");

        for (order, id) in self.schedule.iter().enumerate() {
            let pass = &self.passes[id.index()];
            let barriers = &self.barriers[id.index()];

            log::debug!("┌─────────────────────────────────────────────────────────────────┐");
            log::debug!(
                "│ [{}/{}] {} Pass: \"{}\" ({:?})",
                order + 1,
                self.schedule.len(),
                pass.kind.label(),
                pass.name,
                pass.queue
            );
            log::debug!("├─────────────────────────────────────────────────────────────────┤");

            for (handle, access) in pass.texture_accesses() {
                log::debug!(
                    "│   {:?} \"{}\" at {} @ {:?} (stage: {}, access: {})",
                    access.access_type,
                    texture_name(handle),
                    access.binding,
                    access.state.layout,
                    Self::format_pipeline_stage(access.state.stage),
                    Self::format_access_flags(access.state.access)
                );
            }
            for (handle, access) in pass.buffer_accesses() {
                log::debug!(
                    "│   {:?} \"{}\" at {} (stage: {}, access: {})",
                    access.access_type,
                    buffer_name(handle),
                    access.binding,
                    Self::format_pipeline_stage(access.state.stage),
                    Self::format_access_flags(access.state.access)
                );
            }

            if barriers.has_barriers() {
                log::debug!("├─────────────────────────────────────────────────────────────────┤");
                log::debug!(
                    "│ Barriers: {} image, {} buffer",
                    barriers.image_barrier_count(),
                    barriers.buffer_barrier_count()
                );
                for barrier in &barriers.image_barriers {
                    let layout_change = if barrier.src_state.layout != barrier.dst_state.layout {
                        format!("{:?} → {:?}", barrier.src_state.layout, barrier.dst_state.layout)
                    } else {
                        format!("{:?} (no layout change)", barrier.src_state.layout)
                    };
                    log::debug!("│   Image \"{}\": {}", texture_name(barrier.resource), layout_change);
                    log::debug!(
                        "│       Stage:  {} → {}",
                        Self::format_pipeline_stage(barrier.src_state.stage),
                        Self::format_pipeline_stage(barrier.dst_state.stage)
                    );
                    log::debug!(
                        "│       Access: {} → {}",
                        Self::format_access_flags(barrier.src_state.src_access()),
                        Self::format_access_flags(barrier.dst_state.access)
                    );
                    log::debug!("│       Aspect: {:?}", barrier.aspect());
                }
                for barrier in &barriers.buffer_barriers {
                    log::debug!("│   Buffer \"{}\":", buffer_name(barrier.resource));
                    log::debug!(
                        "│       Stage:  {} → {}",
                        Self::format_pipeline_stage(barrier.src_state.stage),
                        Self::format_pipeline_stage(barrier.dst_state.stage)
                    );
                    log::debug!(
                        "│       Access: {} → {}",
                        Self::format_access_flags(barrier.src_state.src_access()),
                        Self::format_access_flags(barrier.dst_state.access)
                    );
                }
            } else {
                log::debug!("│ No barriers required");
            }

            for barrier in &self.post_barriers[id.index()].image_barriers {
                log::debug!(
                    "│ After pass: \"{}\" {:?} → {:?}",
                    texture_name(barrier.resource),
                    barrier.src_state.layout,
                    barrier.dst_state.layout
                );
            }

            log::debug!("└─────────────────────────────────────────────────────────────────┘");
        }
    }

    /// 格式化 PipelineStageFlags2 为可读字符串
    fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
        const NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
            (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
            (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
            (vk::PipelineStageFlags2::VERTEX_INPUT, "VERTEX_INPUT"),
            (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
            (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
            (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
            (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
            (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
            (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
            (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
            (vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR, "RAY_TRACING_SHADER"),
            (vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR, "ACCEL_STRUCT_BUILD"),
            (vk::PipelineStageFlags2::ALL_GRAPHICS, "ALL_GRAPHICS"),
            (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
        ];

        let stages = NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect_vec();
        if stages.is_empty() { format!("{:?}", stage) } else { stages.join(" | ") }
    }

    /// 格式化 AccessFlags2 为可读字符串
    fn format_access_flags(access: vk::AccessFlags2) -> String {
        if access == vk::AccessFlags2::NONE {
            return "NONE".to_string();
        }

        const NAMES: &[(vk::AccessFlags2, &str)] = &[
            (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_CMD_READ"),
            (vk::AccessFlags2::INDEX_READ, "INDEX_READ"),
            (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_ATTR_READ"),
            (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
            (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
            (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
            (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
            (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
            (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
            (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
            (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
            (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
            (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
            (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
            (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
            (vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR, "ACCEL_STRUCT_READ"),
            (vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR, "ACCEL_STRUCT_WRITE"),
        ];

        let flags = NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect_vec();
        if flags.is_empty() { format!("{:?}", access) } else { flags.join(" | ") }
    }
}
