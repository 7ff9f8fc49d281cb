//! RenderGraph 构建与编译
//!
//! # 使用流程
//!
//! 1. 每帧创建 builder: `RenderGraphBuilder::new(&mut ctx)`
//! 2. 添加 Pass: `builder.add_compute_pass("name")...finish()`
//! 3. 标记需要保留的输出: `builder.register_external(handle)`
//! 4. 编译: `builder.compile()?`
//! 5. 执行: `compiled.execute(&mut backend)?`
//!
//! # 生命周期
//!
//! `'a` 是 Pass 回调可以借用的外部资源的生命周期，同时也是资源上下文被借用的时长。

use std::collections::{HashMap, HashSet};

use ash::vk;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::barrier::{RgBufferBarrierDesc, RgImageBarrierDesc, RgPassBarriers};
use crate::dag::{RgDag, RgEdgeKind, RgPassId};
use crate::error::{RdgError, RdgResult};
use crate::executor::CompiledGraph;
use crate::pass::{RgPassKind, RgPassNode};
use crate::pass_builder::{RgComputePassBuilder, RgRayTracingPassBuilder, RgRenderPassBuilder};
use crate::render_target::RgRenderTargetConfig;
use crate::resource_context::RgResourceContext;
use crate::resource_handle::{RgResourceHandle, RgResourceKind};
use crate::resource_pool::RgProducerRef;
use crate::resource_state::{RgBindingPoint, RgBufferState, RgImageState};

/// 一个 Pass 对某个纹理的所有绑定合并后的使用情况
#[derive(Clone, Copy, Debug)]
struct RgImageUsage {
    /// Pass 执行期间要求的状态
    required: RgImageState,
    /// Pass 结束后的状态
    after: RgImageState,
    binding: RgBindingPoint,
    reads: bool,
    writes: bool,
    attachment: bool,
}

#[derive(Clone, Copy, Debug)]
struct RgBufferUsage {
    required: RgBufferState,
    reads: bool,
    writes: bool,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
}

#[derive(Default)]
struct RgPassUsage {
    images: IndexMap<RgResourceHandle, RgImageUsage>,
    buffers: IndexMap<RgResourceHandle, RgBufferUsage>,
}

/// RenderGraph 构建器
pub struct RenderGraphBuilder<'a> {
    resources: &'a mut RgResourceContext,
    dag: RgDag<RgPassNode<'a>>,
    /// 最终输出，剔除时的根
    externals: Vec<RgResourceHandle>,
    frame_index: u64,
}

// new & init
impl<'a> RenderGraphBuilder<'a> {
    /// 开始新的一帧
    pub fn new(resources: &'a mut RgResourceContext) -> Self {
        resources.frame_index += 1;
        let frame_index = resources.frame_index;
        log::trace!("begin render graph frame {}", frame_index);
        Self {
            resources,
            dag: RgDag::new(),
            externals: Vec::new(),
            frame_index,
        }
    }

    /// 丢弃已添加的 Pass 和外部输出，资源描述不受影响
    pub fn clear(&mut self) {
        self.dag.clear();
        self.externals.clear();
    }
}

// 添加 Pass
impl<'a> RenderGraphBuilder<'a> {
    pub fn add_render_pass(&mut self, name: impl Into<String>) -> RgRenderPassBuilder<'_, 'a> {
        RgRenderPassBuilder::new(self, name.into())
    }

    pub fn add_compute_pass(&mut self, name: impl Into<String>) -> RgComputePassBuilder<'_, 'a> {
        RgComputePassBuilder::new(self, name.into())
    }

    pub fn add_ray_tracing_pass(&mut self, name: impl Into<String>) -> RgRayTracingPassBuilder<'_, 'a> {
        RgRayTracingPassBuilder::new(self, name.into())
    }

    pub(crate) fn insert_pass(&mut self, node: RgPassNode<'a>) -> RgPassId {
        let never_cull = node.never_cull;
        let id = self.dag.add_node(node);
        if let Some(dag_node) = self.dag.node_mut(id) {
            dag_node.cullable = !never_cull;
        }
        id
    }

    /// 显式依赖：`before` 必须先于 `after` 执行
    ///
    /// 立即做环检测。
    pub fn add_dependency(&mut self, before: RgPassId, after: RgPassId) -> RdgResult<()> {
        self.dag.create_edge(before, after, RgEdgeKind::General).map_err(|err| {
            log::error!(
                "explicit dependency \"{}\" -> \"{}\" rejected: {}",
                self.pass_name(before),
                self.pass_name(after),
                err
            );
            err
        })?;
        Ok(())
    }

    /// 标记为帧的最终输出；最后写入它的 Pass 及其所有上游会被保留
    pub fn register_external(&mut self, handle: RgResourceHandle) {
        if !self.externals.contains(&handle) {
            self.externals.push(handle);
        }
    }
}

// getters
impl<'a> RenderGraphBuilder<'a> {
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.dag.node_count()
    }

    pub fn pass(&self, id: RgPassId) -> Option<&RgPassNode<'a>> {
        self.dag.node(id).map(|node| &node.payload)
    }

    /// 创建资源仍然可以在构建期间进行
    #[inline]
    pub fn resources(&mut self) -> &mut RgResourceContext {
        self.resources
    }

    fn pass_name(&self, id: RgPassId) -> &str {
        self.pass(id).map(|p| p.name.as_str()).unwrap_or("<unknown>")
    }
}

// compile
impl<'a> RenderGraphBuilder<'a> {
    /// 编译渲染图
    ///
    /// 校验、依赖分析、拓扑排序、剔除、barrier 计算、attachment 分组，最后把资源的
    /// 最终状态写回描述池。编译后不能再修改图。
    pub fn compile(self) -> RdgResult<CompiledGraph<'a>> {
        profiling::scope!("RenderGraphBuilder::compile");

        let Self {
            resources,
            mut dag,
            externals,
            frame_index,
        } = self;

        // 0. 校验
        let mut usages = Vec::with_capacity(dag.node_count());
        for node in dag.nodes() {
            Self::validate_pass(&node.payload, resources)?;
            usages.push(Self::collect_usage(&node.payload)?);
        }
        for &handle in &externals {
            Self::check_handle(resources, handle)?;
        }

        // 1. 依赖边
        let (last_writers, data_edges) = Self::derive_edges(&mut dag, &usages)?;
        let order = dag.topological_sort()?;

        // 2. 剔除：只沿 producer -> consumer 和显式依赖回溯，WAR/WAW 边只约束顺序
        let roots = externals
            .iter()
            .filter_map(|handle| last_writers.get(handle).copied())
            .chain(dag.nodes().iter().filter(|node| !node.cullable).map(|node| node.id))
            .collect_vec();
        let live = dag.reachable_backwards_by(roots, |edge| {
            edge.kind == RgEdgeKind::General || data_edges.contains(&(edge.from, edge.to))
        });
        let (schedule, culled): (Vec<RgPassId>, Vec<RgPassId>) = order.into_iter().partition(|id| live.contains(id));
        for id in &culled {
            log::debug!("cull pass \"{}\": none of its outputs reach a registered resource", dag.nodes()[id.index()].payload.name);
        }

        // 3. barrier
        let mut barriers = vec![RgPassBarriers::new(); dag.node_count()];
        let mut post_barriers = vec![RgPassBarriers::new(); dag.node_count()];
        let mut image_states: IndexMap<RgResourceHandle, RgImageState> = IndexMap::new();
        let mut buffer_states: IndexMap<RgResourceHandle, RgBufferState> = IndexMap::new();
        let mut producers: HashMap<RgResourceHandle, RgPassId> = HashMap::new();

        for &id in &schedule {
            let pass = &dag.nodes()[id.index()].payload;
            let usage = &usages[id.index()];

            for (&handle, image) in &usage.images {
                let desc = resources.textures.get(handle)?;
                let current = match image_states.get(&handle) {
                    Some(state) => *state,
                    None => desc.final_state().unwrap_or_else(|| {
                        if image.reads && resources.config.warn_on_uninitialized_read {
                            log::warn!("pass \"{}\" reads texture \"{}\" which was never written", pass.name, desc.name);
                        }
                        RgImageState::UNDEFINED
                    }),
                };

                let barrier = RgImageBarrierDesc::new(handle, current, image.required)
                    .with_subresource_range(desc.full_subresource_range());
                let tracked = if barriers[id.index()].add_image_barrier(barrier) {
                    image.after
                } else {
                    // 只读到只读：累积 reader 的 stage，后续写入需要等待它们
                    current.merged(image.required)
                };

                // attachment 的结束 layout 与渲染 layout 不同时，在 Pass 结束后转换
                let tracked = if tracked.layout != image.required.layout {
                    let dst = RgImageState::new(
                        vk::PipelineStageFlags2::ALL_COMMANDS,
                        vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
                        tracked.layout,
                    );
                    post_barriers[id.index()].add_image_barrier(
                        RgImageBarrierDesc::new(handle, image.required, dst)
                            .with_subresource_range(desc.full_subresource_range()),
                    );
                    RgImageState::new(image.required.stage, vk::AccessFlags2::NONE, tracked.layout)
                } else {
                    tracked
                };

                image_states.insert(handle, tracked);
                if image.writes {
                    producers.insert(handle, id);
                }
            }

            for (&handle, buffer) in &usage.buffers {
                let desc = resources.buffers.get(handle)?;
                let current = match buffer_states.get(&handle) {
                    Some(state) => *state,
                    None => desc.final_state().unwrap_or_else(|| {
                        if buffer.reads && resources.config.warn_on_uninitialized_read {
                            log::warn!("pass \"{}\" reads buffer \"{}\" which was never written", pass.name, desc.name);
                        }
                        RgBufferState::UNDEFINED
                    }),
                };

                let barrier = RgBufferBarrierDesc::new(handle, current, buffer.required)
                    .with_range(buffer.offset, buffer.size);
                let tracked = if barriers[id.index()].add_buffer_barrier(barrier) {
                    buffer.required
                } else {
                    current.merged(buffer.required)
                };

                buffer_states.insert(handle, tracked);
                if buffer.writes {
                    producers.insert(handle, id);
                }
            }
        }

        // attachment 分组
        let mut render_targets: Vec<Option<RgRenderTargetConfig>> = vec![None; dag.node_count()];
        for &id in &schedule {
            let pass = &dag.nodes()[id.index()].payload;
            if let RgPassKind::Render(data) = &pass.kind {
                render_targets[id.index()] = Some(RgRenderTargetConfig::build(pass, data, &resources.textures)?);
            }
        }

        // 4. 状态写回
        for (&handle, &state) in &image_states {
            resources.textures.get_mut(handle)?.final_state = Some(state);
        }
        for (&handle, &state) in &buffer_states {
            resources.buffers.get_mut(handle)?.final_state = Some(state);
        }
        for (&handle, &pass) in &producers {
            let producer = Some(RgProducerRef {
                frame: frame_index,
                pass,
            });
            match handle.kind() {
                RgResourceKind::Texture => resources.textures.get_mut(handle)?.last_producer = producer,
                RgResourceKind::Buffer => resources.buffers.get_mut(handle)?.last_producer = producer,
                RgResourceKind::Undefined => {}
            }
        }

        log::debug!(
            "render graph frame {} compiled: {} passes scheduled, {} culled, {} edges",
            frame_index,
            schedule.len(),
            culled.len(),
            dag.edge_count()
        );

        let used_resources = image_states
            .keys()
            .chain(buffer_states.keys())
            .chain(externals.iter())
            .copied()
            .unique()
            .collect_vec();

        let log_plan = resources.config.log_execution_plan;
        let edges = dag.edges().to_vec();
        let compiled = CompiledGraph {
            resources,
            passes: dag.into_nodes().into_iter().map(|node| node.payload).collect(),
            edges,
            schedule,
            culled,
            barriers,
            post_barriers,
            render_targets,
            used_resources,
            frame_index,
        };
        if log_plan {
            compiled.log_execution_plan();
        }
        Ok(compiled)
    }

    fn check_handle(resources: &RgResourceContext, handle: RgResourceHandle) -> RdgResult<()> {
        match handle.kind() {
            RgResourceKind::Texture => resources.textures.get(handle).map(|_| ()),
            RgResourceKind::Buffer => resources.buffers.get(handle).map(|_| ()),
            RgResourceKind::Undefined => Err(RdgError::InvalidHandle(handle)),
        }
    }

    /// 句柄、descriptor 类型以及读写方式是否合法
    fn validate_pass(pass: &RgPassNode<'_>, resources: &RgResourceContext) -> RdgResult<()> {
        if let Some(conflict) = pass.conflicts.first() {
            log::error!(
                "pass \"{}\": {:?} declared at {} as both {} and {}",
                pass.name,
                conflict.resource,
                conflict.binding,
                conflict.first,
                conflict.second
            );
            return Err(RdgError::ConflictingResourceState {
                pass: pass.name.clone(),
                resource: conflict.resource,
                binding: conflict.binding.to_string(),
                first: conflict.first.clone(),
                second: conflict.second.clone(),
            });
        }

        let invalid = |reason: String| -> RdgResult<()> {
            log::error!("pass \"{}\": {}", pass.name, reason);
            Err(RdgError::InvalidAccess {
                pass: pass.name.clone(),
                reason,
            })
        };

        for (handle, access) in pass.texture_accesses() {
            let desc = resources.textures.get(handle)?;
            if let Some(kind) = access.descriptor {
                if !kind.is_texture_kind() {
                    return invalid(format!("texture \"{}\" bound at {} as {:?}", desc.name, access.binding, kind));
                }
                if access.access_type.writes() && !kind.is_writable() {
                    return invalid(format!("texture \"{}\" is written through a {:?} binding", desc.name, kind));
                }
            }
        }

        for (handle, access) in pass.buffer_accesses() {
            let desc = resources.buffers.get(handle)?;
            if !access.descriptor.is_buffer_kind() {
                return invalid(format!(
                    "buffer \"{}\" bound at {} as {:?}",
                    desc.name, access.binding, access.descriptor
                ));
            }
            if access.access_type.writes() && !access.descriptor.is_writable() {
                return invalid(format!(
                    "buffer \"{}\" is written through a {:?} binding",
                    desc.name, access.descriptor
                ));
            }
            if access.size != vk::WHOLE_SIZE && access.offset.saturating_add(access.size) > desc.size {
                return invalid(format!(
                    "buffer \"{}\" range {}..{} exceeds its size {}",
                    desc.name,
                    access.offset,
                    access.offset.saturating_add(access.size),
                    desc.size
                ));
            }
        }

        Ok(())
    }

    /// 把同一资源在 Pass 内的多个绑定合并成一条使用记录
    fn collect_usage(pass: &RgPassNode<'_>) -> RdgResult<RgPassUsage> {
        let mut usage = RgPassUsage::default();

        for (handle, access) in pass.texture_accesses() {
            let Some(prev) = usage.images.get_mut(&handle) else {
                usage.images.insert(
                    handle,
                    RgImageUsage {
                        required: access.state,
                        after: access.state_after(),
                        binding: access.binding,
                        reads: access.access_type.reads(),
                        writes: access.access_type.writes(),
                        attachment: access.binding.is_attachment(),
                    },
                );
                continue;
            };

            if prev.required.layout != access.state.layout {
                log::error!(
                    "pass \"{}\" needs {:?} in two layouts: {:?} at {} and {:?} at {}",
                    pass.name,
                    handle,
                    prev.required.layout,
                    prev.binding,
                    access.state.layout,
                    access.binding
                );
                return Err(RdgError::ConflictingResourceState {
                    pass: pass.name.clone(),
                    resource: handle,
                    binding: format!("{} and {}", prev.binding, access.binding),
                    first: format!("{:?}", prev.required.layout),
                    second: format!("{:?}", access.state.layout),
                });
            }

            let after_layout =
                if access.final_layout != access.state.layout { access.final_layout } else { prev.after.layout };
            prev.required = prev.required.merged(access.state);
            prev.after = RgImageState::new(prev.required.stage, prev.required.access, after_layout);
            prev.reads |= access.access_type.reads();
            prev.writes |= access.access_type.writes();
            prev.attachment |= access.binding.is_attachment();
        }

        for (handle, access) in pass.buffer_accesses() {
            let Some(prev) = usage.buffers.get_mut(&handle) else {
                usage.buffers.insert(
                    handle,
                    RgBufferUsage {
                        required: access.state,
                        reads: access.access_type.reads(),
                        writes: access.access_type.writes(),
                        offset: access.offset,
                        size: access.size,
                    },
                );
                continue;
            };

            prev.required = prev.required.merged(access.state);
            prev.reads |= access.access_type.reads();
            prev.writes |= access.access_type.writes();
            if (prev.offset, prev.size) != (access.offset, access.size) {
                prev.offset = 0;
                prev.size = vk::WHOLE_SIZE;
            }
        }

        Ok(usage)
    }

    /// 按声明顺序建立 RAW / WAW / WAR 边
    ///
    /// 返回每个资源在本帧的最后写入者，以及其中承载数据流（RAW）的 `(from, to)` 对
    fn derive_edges(
        dag: &mut RgDag<RgPassNode<'a>>,
        usages: &[RgPassUsage],
    ) -> RdgResult<(HashMap<RgResourceHandle, RgPassId>, HashSet<(RgPassId, RgPassId)>)> {
        let mut last_writers: HashMap<RgResourceHandle, RgPassId> = HashMap::new();
        let mut data_edges: HashSet<(RgPassId, RgPassId)> = HashSet::new();
        let mut readers_since_write: HashMap<RgResourceHandle, Vec<RgPassId>> = HashMap::new();

        let accesses = |usage: &RgPassUsage| {
            let images = usage.images.iter().map(|(handle, image)| {
                let kind = if image.attachment { RgEdgeKind::Attachment } else { RgEdgeKind::Texture };
                (*handle, image.reads, image.writes, kind)
            });
            let buffers =
                usage.buffers.iter().map(|(handle, buffer)| (*handle, buffer.reads, buffer.writes, RgEdgeKind::Buffer));
            images.chain(buffers).collect_vec()
        };

        for (index, usage) in usages.iter().enumerate() {
            let pass = dag.nodes()[index].id;

            for (handle, reads, writes, kind) in accesses(usage) {
                let mut edges = Vec::new();
                let last_writer = last_writers.get(&handle).copied().filter(|writer| *writer != pass);

                // RAW / WAW
                if let Some(writer) = last_writer {
                    if reads {
                        data_edges.insert((writer, pass));
                    }
                    if reads || writes {
                        edges.push(writer);
                    }
                }
                // WAR
                if writes {
                    if let Some(readers) = readers_since_write.get(&handle) {
                        edges.extend(readers.iter().copied().filter(|reader| *reader != pass));
                    }
                }

                for from in edges {
                    if let Err(err) = dag.create_edge(from, pass, kind) {
                        log::error!(
                            "dependency \"{}\" -> \"{}\" on {:?} contradicts an explicit dependency",
                            dag.nodes()[from.index()].payload.name,
                            dag.nodes()[pass.index()].payload.name,
                            handle
                        );
                        return Err(err);
                    }
                }

                if writes {
                    last_writers.insert(handle, pass);
                    readers_since_write.remove(&handle);
                } else if reads {
                    readers_since_write.entry(handle).or_default().push(pass);
                }
            }
        }

        Ok((last_writers, data_edges))
    }
}
