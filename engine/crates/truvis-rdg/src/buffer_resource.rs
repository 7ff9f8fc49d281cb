use ash::vk;

use crate::backend::RgResourceAllocator;
use crate::resource_handle::{RgResourceHandle, RgResourceKind};
use crate::resource_pool::{RgOwnership, RgProducerRef, RgResourceDesc};
use crate::resource_state::RgBufferState;

/// 缓冲区资源描述
#[derive(Clone, Debug)]
pub struct RgBufferDesc {
    /// 调试名称
    pub name: String,
    /// 缓冲区大小（字节）
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,

    pub(crate) last_producer: Option<RgProducerRef>,
    pub(crate) final_state: Option<RgBufferState>,
    pub(crate) backing: Option<vk::Buffer>,
    pub(crate) ownership: RgOwnership,
    pub(crate) next: Option<RgResourceHandle>,
}

impl Default for RgBufferDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: 0,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            last_producer: None,
            final_state: None,
            backing: None,
            ownership: RgOwnership::Owned,
            next: None,
        }
    }
}

// new & init
impl RgBufferDesc {
    #[inline]
    pub fn new(name: impl Into<String>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            name: name.into(),
            size,
            usage,
            ..Default::default()
        }
    }
}

// getters
impl RgBufferDesc {
    #[inline]
    pub fn last_producer(&self) -> Option<RgProducerRef> {
        self.last_producer
    }

    #[inline]
    pub fn final_state(&self) -> Option<RgBufferState> {
        self.final_state
    }

    #[inline]
    pub fn backing(&self) -> Option<vk::Buffer> {
        self.backing
    }

    #[inline]
    pub fn ownership(&self) -> RgOwnership {
        self.ownership
    }

    #[inline]
    pub fn next(&self) -> Option<RgResourceHandle> {
        self.next
    }
}

impl RgResourceDesc for RgBufferDesc {
    const KIND: RgResourceKind = RgResourceKind::Buffer;

    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> Option<RgResourceHandle> {
        self.next
    }

    fn set_next(&mut self, next: Option<RgResourceHandle>) {
        self.next = next;
    }

    fn duplicate(&self) -> Self {
        Self::new(self.name.clone(), self.size, self.usage)
    }

    fn release(&mut self, handle: RgResourceHandle, allocator: &mut dyn RgResourceAllocator) {
        if let Some(buffer) = self.backing.take() {
            match self.ownership {
                RgOwnership::Owned => allocator.destroy_buffer(handle, buffer, self),
                RgOwnership::Imported => {
                    log::trace!("skip releasing imported buffer \"{}\"", self.name);
                }
            }
        }
    }
}
