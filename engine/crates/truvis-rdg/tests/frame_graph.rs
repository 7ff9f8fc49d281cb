//! 多帧场景测试：资源池、剔除、跨帧状态以及执行顺序

use std::cell::RefCell;

use truvis_rdg::vk::{self, Handle};
use truvis_rdg::*;

const COMPUTE: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::COMPUTE_SHADER;

/// 只记录调用的后端
#[derive(Default)]
struct RecordingBackend {
    events: Vec<String>,
    next_object: u64,
    destroyed_images: Vec<vk::Image>,
    descriptor_requests: Vec<Vec<(u32, u32)>>,
}

impl RecordingBackend {
    fn next_raw(&mut self) -> u64 {
        self.next_object += 1;
        0x1000 + self.next_object
    }
}

impl RgResourceAllocator for RecordingBackend {
    fn create_texture(&mut self, _handle: RgResourceHandle, desc: &RgTextureDesc) -> RdgResult<vk::Image> {
        self.events.push(format!("create_texture {}", desc.name));
        Ok(vk::Image::from_raw(self.next_raw()))
    }

    fn destroy_texture(&mut self, _handle: RgResourceHandle, image: vk::Image, _desc: &RgTextureDesc) {
        self.destroyed_images.push(image);
    }

    fn create_buffer(&mut self, _handle: RgResourceHandle, desc: &RgBufferDesc) -> RdgResult<vk::Buffer> {
        self.events.push(format!("create_buffer {}", desc.name));
        Ok(vk::Buffer::from_raw(self.next_raw()))
    }

    fn destroy_buffer(&mut self, _handle: RgResourceHandle, _buffer: vk::Buffer, _desc: &RgBufferDesc) {}
}

impl RgDescriptorProvider for RecordingBackend {
    fn acquire_descriptor_set(&mut self, request: &RgDescriptorRequest<'_>) -> RdgResult<vk::DescriptorSet> {
        self.events.push(format!("descriptor_set {}", request.pass_name));
        self.descriptor_requests.push(request.bindings.iter().map(|b| (b.set, b.binding)).collect());
        Ok(vk::DescriptorSet::from_raw(self.next_raw()))
    }
}

impl RgPipelineProvider for RecordingBackend {
    fn acquire_pipeline(&mut self, request: &RgPipelineRequest<'_>) -> RdgResult<vk::Pipeline> {
        self.events.push(format!("pipeline {} colors={}", request.pass_name, request.color_formats.len()));
        Ok(vk::Pipeline::from_raw(self.next_raw()))
    }
}

impl RgCommandEncoder for RecordingBackend {
    fn command_buffer(&self) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(7)
    }

    fn begin_scope(&mut self, name: &str, kind: &'static str, _queue: RgQueue) {
        self.events.push(format!("begin {} {}", kind, name));
    }

    fn end_scope(&mut self) {
        self.events.push("end".to_string());
    }

    fn pipeline_barrier(
        &mut self,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    ) {
        self.events.push(format!("barrier {} {}", image_barriers.len(), buffer_barriers.len()));
    }

    fn begin_rendering(&mut self, info: &RgRenderingInfo<'_>) {
        self.events.push(format!("begin_rendering {}", info.color_images.len()));
    }

    fn end_rendering(&mut self) {
        self.events.push("end_rendering".to_string());
    }

    fn bind_pipeline(&mut self, _bind_point: vk::PipelineBindPoint, _pipeline: vk::Pipeline) {
        self.events.push("bind_pipeline".to_string());
    }

    fn bind_descriptor_set(&mut self, _bind_point: vk::PipelineBindPoint, _descriptor_set: vk::DescriptorSet) {
        self.events.push("bind_descriptor_set".to_string());
    }
}

fn context(texture_slots: usize) -> RgResourceContext {
    truvis_crate_tools::init_log::init_test_log();
    RgResourceContext::new(&RdgConfig {
        texture_pool_capacity: texture_slots,
        buffer_pool_capacity: 16,
        ..Default::default()
    })
}

fn storage_texture(name: &str) -> RgTextureDesc {
    RgTextureDesc::new_2d(
        name,
        128,
        128,
        vk::Format::R16G16B16A16_SFLOAT,
        vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
    )
}

fn color_texture(name: &str) -> RgTextureDesc {
    RgTextureDesc::new_2d(
        name,
        128,
        128,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
    )
}

fn binding(index: u32) -> RgBindingPoint {
    RgBindingPoint::descriptor(0, index)
}

#[test]
fn texture_pool_exhausts_and_reuses_slots() {
    let mut ctx = context(4);
    let mut backend = RecordingBackend::default();

    let handles = (0..4).map(|i| ctx.create_texture(storage_texture(&format!("t{i}"))).unwrap()).collect::<Vec<_>>();
    assert!(matches!(
        ctx.create_texture(storage_texture("overflow")),
        Err(RdgError::PoolExhausted {
            kind: RgResourceKind::Texture,
            capacity: 4
        })
    ));

    ctx.destroy(handles[0], &mut backend).unwrap();
    ctx.destroy(handles[3], &mut backend).unwrap();

    let a = ctx.create_texture(storage_texture("a")).unwrap();
    let b = ctx.create_texture(storage_texture("b")).unwrap();
    let mut reused = vec![a.index(), b.index()];
    reused.sort();
    assert_eq!(reused, vec![handles[0].index(), handles[3].index()]);
    assert!(ctx.create_texture(storage_texture("c")).is_err());

    // 从未 materialize 的描述没有 backing，不会交给 allocator
    assert!(backend.destroyed_images.is_empty());
}

/// A -> B -> C，全部作用在同一个纹理上
fn declare_chain(graph: &mut RenderGraphBuilder<'_>, tex: RgResourceHandle) -> (RgPassId, RgPassId, RgPassId) {
    let a = graph.add_compute_pass("A").write_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE).finish();
    let b = graph
        .add_compute_pass("B")
        .read_write_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .finish();
    let c = graph
        .add_compute_pass("C")
        .read_write_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .finish();
    (a, b, c)
}

#[test]
fn chain_culls_or_keeps_based_on_external_registration() {
    let mut ctx = context(8);
    let tex = ctx.create_texture(storage_texture("accum")).unwrap();

    {
        let mut graph = RenderGraphBuilder::new(&mut ctx);
        declare_chain(&mut graph, tex);
        graph.register_external(tex);
        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.scheduled_pass_names(), vec!["A", "B", "C"]);
        assert!(compiled.culled().is_empty());
    }

    {
        let mut graph = RenderGraphBuilder::new(&mut ctx);
        let (a, b, c) = declare_chain(&mut graph, tex);
        let compiled = graph.compile().unwrap();
        assert!(compiled.schedule().is_empty());
        assert_eq!(compiled.culled(), &[a, b, c]);
    }
}

#[test]
fn unread_output_is_culled_and_never_executed() {
    let mut ctx = context(8);
    let mut backend = RecordingBackend::default();
    let scratch = ctx.create_texture(storage_texture("scratch")).unwrap();
    let output = ctx.create_texture(storage_texture("output")).unwrap();
    let executed = RefCell::new(Vec::new());

    let mut graph = RenderGraphBuilder::new(&mut ctx);
    let unused = graph
        .add_compute_pass("unused")
        .write_texture(scratch, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .execute(|ctx| executed.borrow_mut().push(ctx.name.to_string()))
        .finish();
    let kept = graph
        .add_compute_pass("kept")
        .write_texture(output, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .execute(|ctx| executed.borrow_mut().push(ctx.name.to_string()))
        .finish();
    graph.register_external(output);

    let compiled = graph.compile().unwrap();
    assert_eq!(compiled.schedule(), &[kept]);
    assert_eq!(compiled.culled(), &[unused]);

    let stats = compiled.execute(&mut backend).unwrap();
    assert_eq!(stats.executed_passes, 1);
    assert_eq!(stats.culled_passes, 1);
    assert_eq!(*executed.borrow(), vec!["kept".to_string()]);

    // 只被剔除的 Pass 使用的资源不会创建 GPU 对象
    assert!(backend.events.contains(&"create_texture output".to_string()));
    assert!(!backend.events.iter().any(|e| e == "create_texture scratch"));
    assert!(ctx.textures[scratch].backing().is_none());
}

#[test]
fn reader_of_overwritten_resource_is_culled() {
    let mut ctx = context(8);
    let mut backend = RecordingBackend::default();
    let tex = ctx.create_texture(storage_texture("t")).unwrap();
    let side = ctx.create_texture(storage_texture("x")).unwrap();
    let executed = RefCell::new(Vec::new());

    let mut graph = RenderGraphBuilder::new(&mut ctx);
    let a = graph
        .add_compute_pass("A")
        .write_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .execute(|ctx| executed.borrow_mut().push(ctx.name.to_string()))
        .finish();
    let p = graph
        .add_compute_pass("P")
        .read_texture(tex, binding(0), RgDescriptorKind::Sampled, COMPUTE)
        .write_texture(side, binding(1), RgDescriptorKind::Storage, COMPUTE)
        .execute(|ctx| executed.borrow_mut().push(ctx.name.to_string()))
        .finish();
    graph
        .add_compute_pass("C")
        .write_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .execute(|ctx| executed.borrow_mut().push(ctx.name.to_string()))
        .finish();
    graph.register_external(tex);

    let compiled = graph.compile().unwrap();
    assert_eq!(compiled.scheduled_pass_names(), vec!["C"]);
    assert_eq!(compiled.culled(), &[a, p]);

    compiled.execute(&mut backend).unwrap();
    assert_eq!(*executed.borrow(), vec!["C".to_string()]);
    assert!(ctx.textures[side].backing().is_none());
}

#[test]
fn writer_overwritten_before_any_read_is_culled() {
    let mut ctx = context(8);
    let tex = ctx.create_texture(storage_texture("t")).unwrap();
    let output = ctx.create_texture(storage_texture("out")).unwrap();

    let mut graph = RenderGraphBuilder::new(&mut ctx);
    let first = graph
        .add_compute_pass("W1")
        .write_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .finish();
    let second = graph
        .add_compute_pass("W2")
        .write_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .finish();
    graph
        .add_compute_pass("R")
        .read_texture(tex, binding(0), RgDescriptorKind::Sampled, COMPUTE)
        .write_texture(output, binding(1), RgDescriptorKind::Storage, COMPUTE)
        .finish();
    graph.register_external(output);

    let compiled = graph.compile().unwrap();
    assert_eq!(compiled.scheduled_pass_names(), vec!["W2", "R"]);
    assert_eq!(compiled.culled(), &[first]);
    assert!(compiled.edges().iter().any(|e| e.from == first && e.to == second));
}

#[test]
fn explicit_dependency_keeps_setup_pass_alive() {
    let mut ctx = context(8);
    let scratch = ctx.create_texture(storage_texture("scratch")).unwrap();
    let output = ctx.create_texture(storage_texture("out")).unwrap();

    let mut graph = RenderGraphBuilder::new(&mut ctx);
    let setup = graph
        .add_compute_pass("setup")
        .write_texture(scratch, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .finish();
    let live = graph
        .add_compute_pass("live")
        .write_texture(output, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .finish();
    graph.add_dependency(setup, live).unwrap();
    graph.register_external(output);

    let compiled = graph.compile().unwrap();
    assert_eq!(compiled.schedule(), &[setup, live]);
    assert!(compiled.culled().is_empty());
    assert!(compiled.used_resources().contains(&scratch));
}

#[test]
fn final_state_carries_over_to_next_frame() {
    let mut ctx = context(8);
    let mut backend = RecordingBackend::default();
    let color = ctx.create_texture(color_texture("scene")).unwrap();
    let output = ctx.create_texture(storage_texture("post")).unwrap();

    // 第一帧：作为颜色附件写入
    {
        let mut graph = RenderGraphBuilder::new(&mut ctx);
        let draw = graph
            .add_render_pass("draw")
            .color(0, color, RgAttachmentOps::clear(RgClearValue::Color([0.0, 0.0, 0.0, 1.0])))
            .finish();
        graph.register_external(color);

        let compiled = graph.compile().unwrap();
        let barrier = &compiled.barriers(draw).image_barriers[0];
        assert_eq!(barrier.src_state.layout, vk::ImageLayout::UNDEFINED);
        compiled.execute(&mut backend).unwrap();
    }
    assert_eq!(
        ctx.textures[color].final_state().unwrap().layout,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    );
    assert_eq!(ctx.textures[color].last_producer().unwrap().frame, 1);

    // 第二帧：第一次访问是采样
    {
        let mut graph = RenderGraphBuilder::new(&mut ctx);
        let post = graph
            .add_compute_pass("post")
            .read_texture(color, binding(0), RgDescriptorKind::Sampled, COMPUTE)
            .write_texture(output, binding(1), RgDescriptorKind::Storage, COMPUTE)
            .finish();
        graph.register_external(output);

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.frame_index(), 2);
        let barrier = compiled.barriers(post).image_barriers.iter().find(|b| b.resource == color).unwrap();
        assert_eq!(barrier.src_state.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.src_state.src_access(), vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(barrier.dst_state.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}

#[test]
fn destroyed_handle_is_rejected() {
    let mut ctx = context(8);
    let mut backend = RecordingBackend::default();
    let tex = ctx.create_texture(storage_texture("transient")).unwrap();

    ctx.destroy(tex, &mut backend).unwrap();
    assert!(matches!(ctx.destroy(tex, &mut backend), Err(RdgError::InvalidHandle(_))));
    assert!(!ctx.is_valid(tex));

    let mut graph = RenderGraphBuilder::new(&mut ctx);
    graph
        .add_compute_pass("stale")
        .write_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .never_cull()
        .finish();
    assert!(matches!(graph.compile(), Err(RdgError::InvalidHandle(_))));
}

#[test]
fn materialized_texture_is_released_on_destroy() {
    let mut ctx = context(8);
    let mut backend = RecordingBackend::default();
    let tex = ctx.create_texture(storage_texture("history")).unwrap();

    {
        let mut graph = RenderGraphBuilder::new(&mut ctx);
        graph.add_compute_pass("fill").write_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE).finish();
        graph.register_external(tex);
        graph.compile().unwrap().execute(&mut backend).unwrap();
    }

    let image = ctx.textures[tex].backing().unwrap();
    ctx.destroy(tex, &mut backend).unwrap();
    assert_eq!(backend.destroyed_images, vec![image]);
}

#[test]
fn conflicting_declarations_fail_compile() {
    let mut ctx = context(8);
    let tex = ctx.create_texture(storage_texture("gbuffer")).unwrap();

    let mut graph = RenderGraphBuilder::new(&mut ctx);
    graph
        .add_compute_pass("confused")
        .read_texture(tex, binding(0), RgDescriptorKind::Sampled, COMPUTE)
        .read_texture(tex, binding(0), RgDescriptorKind::Storage, COMPUTE)
        .never_cull()
        .finish();

    match graph.compile() {
        Err(RdgError::ConflictingResourceState { pass, resource, .. }) => {
            assert_eq!(pass, "confused");
            assert_eq!(resource, tex);
        }
        other => panic!("expected conflicting state, got {:?}", other.map(|c| c.scheduled_pass_names().len())),
    }
}

#[test]
fn explicit_dependency_cycle_is_rejected() {
    let mut ctx = context(8);

    let mut graph = RenderGraphBuilder::new(&mut ctx);
    let a = graph.add_compute_pass("a").never_cull().finish();
    let b = graph.add_compute_pass("b").never_cull().finish();
    let c = graph.add_compute_pass("c").never_cull().finish();

    graph.add_dependency(a, b).unwrap();
    graph.add_dependency(b, c).unwrap();
    assert!(matches!(graph.add_dependency(c, a), Err(RdgError::CycleDetected { .. })));

    // 被拒绝的边不会留下
    let compiled = graph.compile().unwrap();
    assert_eq!(compiled.edges().len(), 2);
    assert_eq!(compiled.schedule(), &[a, b, c]);
}

#[test]
fn execute_records_passes_in_order() {
    let mut ctx = context(8);
    let mut backend = RecordingBackend::default();
    let scene = ctx.create_texture(color_texture("scene")).unwrap();
    let depth = ctx
        .create_texture(RgTextureDesc::new_2d(
            "depth",
            128,
            128,
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ))
        .unwrap();
    let output = ctx.create_texture(storage_texture("output")).unwrap();
    let params = ctx.create_buffer(RgBufferDesc::new("params", 256, vk::BufferUsageFlags::UNIFORM_BUFFER)).unwrap();

    let seen = RefCell::new(Vec::new());

    let mut graph = RenderGraphBuilder::new(&mut ctx);
    graph
        .add_render_pass("forward")
        .color(0, scene, RgAttachmentOps::clear(RgClearValue::Color([0.0; 4])))
        .depth_stencil(depth, RgAttachmentOps::clear(RgClearValue::DepthStencil { depth: 1.0, stencil: 0 }))
        .program(RgProgramHandle(1))
        .execute(|ctx| {
            let targets = ctx.render_targets.unwrap();
            assert_eq!(targets.extent, vk::Extent2D { width: 128, height: 128 });
            assert!(ctx.pipeline.is_some());
            assert!(ctx.get_image(scene).is_some());
            seen.borrow_mut().push(ctx.name.to_string());
        })
        .finish();
    graph
        .add_compute_pass("tonemap")
        .write_texture(output, binding(1), RgDescriptorKind::Storage, COMPUTE)
        .read_texture(scene, binding(0), RgDescriptorKind::Sampled, COMPUTE)
        .read_buffer(params, RgBindingPoint::descriptor(1, 0), RgDescriptorKind::Uniform, COMPUTE, 0..vk::WHOLE_SIZE)
        .program(RgProgramHandle(2))
        .execute(|ctx| {
            assert!(ctx.render_targets.is_none());
            assert!(ctx.descriptor_set.is_some());
            assert!(ctx.get_buffer(params).is_some());
            seen.borrow_mut().push(ctx.name.to_string());
        })
        .finish();
    graph.register_external(output);

    let stats = graph.compile().unwrap().execute(&mut backend).unwrap();
    assert_eq!(stats.executed_passes, 2);
    assert_eq!(stats.culled_passes, 0);
    assert_eq!(*seen.borrow(), vec!["forward".to_string(), "tonemap".to_string()]);

    // descriptor 绑定按 (set, binding) 排序，attachment 不参与
    assert_eq!(backend.descriptor_requests, vec![vec![(0, 0), (0, 1), (1, 0)]]);

    let recorded = backend.events.iter().filter(|e| !e.starts_with("create_")).cloned().collect::<Vec<_>>();
    assert_eq!(
        recorded,
        vec![
            "begin render forward",
            "barrier 2 0",
            "begin_rendering 1",
            "pipeline forward colors=1",
            "bind_pipeline",
            "end_rendering",
            "end",
            "begin compute tonemap",
            "barrier 2 0",
            "pipeline tonemap colors=0",
            "bind_pipeline",
            "descriptor_set tonemap",
            "bind_descriptor_set",
            "end",
        ]
    );
    assert_eq!(backend.events.iter().filter(|e| e.starts_with("create_")).count(), 4);
}
