use ash::vk;

use crate::backend::RgResourceAllocator;
use crate::buffer_resource::RgBufferDesc;
use crate::config::RdgConfig;
use crate::error::{RdgError, RdgResult};
use crate::resource_handle::{RgResourceHandle, RgResourceKind};
use crate::resource_pool::{RgOwnership, RgResourcePool};
use crate::resource_state::{RgBufferState, RgImageState};
use crate::texture_resource::RgTextureDesc;

/// RenderGraph 的跨帧上下文
///
/// 持有纹理/缓冲区描述池和帧计数器，每帧借给 `RenderGraphBuilder` 使用。
pub struct RgResourceContext {
    pub textures: RgResourcePool<RgTextureDesc>,
    pub buffers: RgResourcePool<RgBufferDesc>,
    pub(crate) frame_index: u64,
    pub(crate) config: RdgConfig,
}

// new & init
impl RgResourceContext {
    pub fn new(config: &RdgConfig) -> Self {
        log::info!(
            "create render graph context: {} texture slots, {} buffer slots",
            config.texture_pool_capacity,
            config.buffer_pool_capacity
        );
        Self {
            textures: RgResourcePool::new(config.texture_pool_capacity),
            buffers: RgResourcePool::new(config.buffer_pool_capacity),
            frame_index: 0,
            config: config.clone(),
        }
    }
}

// create & destroy
impl RgResourceContext {
    /// 创建由 RenderGraph 管理的纹理，GPU 对象在首次 execute 时创建
    pub fn create_texture(&mut self, desc: RgTextureDesc) -> RdgResult<RgResourceHandle> {
        let handle = self.textures.alloc()?;
        self.textures[handle] = desc;
        Ok(handle)
    }

    pub fn create_buffer(&mut self, desc: RgBufferDesc) -> RdgResult<RgResourceHandle> {
        let handle = self.buffers.alloc()?;
        self.buffers[handle] = desc;
        Ok(handle)
    }

    /// 导入外部纹理（例如 swapchain image）
    ///
    /// `initial_state` 作为第一帧的源状态；池不会销毁导入的对象。
    pub fn import_texture(
        &mut self,
        mut desc: RgTextureDesc,
        image: vk::Image,
        initial_state: RgImageState,
    ) -> RdgResult<RgResourceHandle> {
        desc.backing = Some(image);
        desc.ownership = RgOwnership::Imported;
        desc.final_state = Some(initial_state);
        self.create_texture(desc)
    }

    pub fn import_buffer(
        &mut self,
        mut desc: RgBufferDesc,
        buffer: vk::Buffer,
        initial_state: RgBufferState,
    ) -> RdgResult<RgResourceHandle> {
        desc.backing = Some(buffer);
        desc.ownership = RgOwnership::Imported;
        desc.final_state = Some(initial_state);
        self.create_buffer(desc)
    }

    /// 重新指定导入纹理的 backing（swapchain 每帧的 image 不同）
    pub fn update_imported_texture(
        &mut self,
        handle: RgResourceHandle,
        image: vk::Image,
        state: RgImageState,
    ) -> RdgResult<()> {
        let desc = self.textures.get_mut(handle)?;
        if desc.ownership != RgOwnership::Imported {
            return Err(RdgError::InvalidHandle(handle));
        }
        desc.backing = Some(image);
        desc.final_state = Some(state);
        Ok(())
    }

    /// 释放纹理或缓冲区，按句柄类别分派
    pub fn destroy(&mut self, handle: RgResourceHandle, allocator: &mut dyn RgResourceAllocator) -> RdgResult<()> {
        match handle.kind() {
            RgResourceKind::Texture => self.textures.destroy(handle, allocator),
            RgResourceKind::Buffer => self.buffers.destroy(handle, allocator),
            RgResourceKind::Undefined => Err(RdgError::InvalidHandle(handle)),
        }
    }
}

// getters
impl RgResourceContext {
    /// 已经开始构建的帧数
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn config(&self) -> &RdgConfig {
        &self.config
    }

    /// 句柄是否指向某个池中仍然存活的描述
    pub fn is_valid(&self, handle: RgResourceHandle) -> bool {
        match handle.kind() {
            RgResourceKind::Texture => self.textures.is_valid(handle),
            RgResourceKind::Buffer => self.buffers.is_valid(handle),
            RgResourceKind::Undefined => false,
        }
    }
}
