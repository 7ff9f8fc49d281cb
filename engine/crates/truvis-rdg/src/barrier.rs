//! Barrier 自动计算
//!
//! 根据资源状态转换生成 `vk::ImageMemoryBarrier2` 和 `vk::BufferMemoryBarrier2`。

use ash::vk;

use crate::resource_handle::RgResourceHandle;
use crate::resource_state::{RgBufferState, RgImageState};

/// 图像 Barrier 描述
#[derive(Clone, Debug)]
pub struct RgImageBarrierDesc {
    pub resource: RgResourceHandle,
    pub src_state: RgImageState,
    pub dst_state: RgImageState,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl RgImageBarrierDesc {
    pub fn new(resource: RgResourceHandle, src_state: RgImageState, dst_state: RgImageState) -> Self {
        Self {
            resource,
            src_state,
            dst_state,
            subresource_range: vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(vk::REMAINING_MIP_LEVELS)
                .layer_count(vk::REMAINING_ARRAY_LAYERS),
        }
    }

    pub fn with_subresource_range(mut self, range: vk::ImageSubresourceRange) -> Self {
        self.subresource_range = range;
        self
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.subresource_range.aspect_mask
    }

    /// 检查是否需要 barrier
    ///
    /// 只读到只读且 layout 不变时可以跳过
    pub fn needs_barrier(&self) -> bool {
        if self.src_state.layout != self.dst_state.layout {
            return true;
        }
        self.src_state.is_write() || self.dst_state.is_write()
    }

    pub fn to_vk_barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.src_state.stage)
            .src_access_mask(self.src_state.src_access())
            .dst_stage_mask(self.dst_state.stage)
            .dst_access_mask(self.dst_state.access)
            .old_layout(self.src_state.layout)
            .new_layout(self.dst_state.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(self.subresource_range)
    }
}

/// 缓冲区 Barrier 描述
#[derive(Clone, Debug)]
pub struct RgBufferBarrierDesc {
    pub resource: RgResourceHandle,
    pub src_state: RgBufferState,
    pub dst_state: RgBufferState,
    pub offset: vk::DeviceSize,
    /// `WHOLE_SIZE` 表示整个缓冲区
    pub size: vk::DeviceSize,
}

impl RgBufferBarrierDesc {
    pub fn new(resource: RgResourceHandle, src_state: RgBufferState, dst_state: RgBufferState) -> Self {
        Self {
            resource,
            src_state,
            dst_state,
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }

    pub fn with_range(mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn needs_barrier(&self) -> bool {
        self.src_state.is_write() || self.dst_state.is_write()
    }

    pub fn to_vk_barrier(&self, buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2::default()
            .src_stage_mask(self.src_state.stage)
            .src_access_mask(self.src_state.src_access())
            .dst_stage_mask(self.dst_state.stage)
            .dst_access_mask(self.dst_state.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(self.offset)
            .size(self.size)
    }
}

/// Pass 执行前需要的 Barrier 集合
#[derive(Clone, Debug, Default)]
pub struct RgPassBarriers {
    pub image_barriers: Vec<RgImageBarrierDesc>,
    pub buffer_barriers: Vec<RgBufferBarrierDesc>,
}

impl RgPassBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不需要的 barrier 直接丢弃，返回是否加入
    pub fn add_image_barrier(&mut self, barrier: RgImageBarrierDesc) -> bool {
        let needed = barrier.needs_barrier();
        if needed {
            self.image_barriers.push(barrier);
        }
        needed
    }

    pub fn add_buffer_barrier(&mut self, barrier: RgBufferBarrierDesc) -> bool {
        let needed = barrier.needs_barrier();
        if needed {
            self.buffer_barriers.push(barrier);
        }
        needed
    }

    pub fn has_barriers(&self) -> bool {
        !self.image_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }

    pub fn image_barrier_count(&self) -> usize {
        self.image_barriers.len()
    }

    pub fn buffer_barrier_count(&self) -> usize {
        self.buffer_barriers.len()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::resource_handle::RgResourceKind;

    fn handle() -> RgResourceHandle {
        RgResourceHandle::new(0, RgResourceKind::Texture, 0)
    }

    #[test]
    fn test_image_barrier_layout_change() {
        let barrier = RgImageBarrierDesc::new(handle(), RgImageState::UNDEFINED, RgImageState::COLOR_ATTACHMENT_WRITE);
        assert!(barrier.needs_barrier());
    }

    #[test]
    fn test_image_barrier_read_to_read() {
        // 两者都是 SHADER_READ_ONLY_OPTIMAL
        let barrier =
            RgImageBarrierDesc::new(handle(), RgImageState::SHADER_READ_FRAGMENT, RgImageState::SHADER_READ_COMPUTE);
        assert!(!barrier.needs_barrier());

        let mut barriers = RgPassBarriers::new();
        assert!(!barriers.add_image_barrier(barrier));
        assert!(!barriers.has_barriers());
    }

    #[test]
    fn test_image_barrier_write_to_read() {
        let barrier =
            RgImageBarrierDesc::new(handle(), RgImageState::STORAGE_WRITE_COMPUTE, RgImageState::SHADER_READ_FRAGMENT);
        assert!(barrier.needs_barrier());

        let vk_barrier = barrier.to_vk_barrier(vk::Image::from_raw(9));
        assert_eq!(vk_barrier.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(vk_barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(vk_barrier.src_access_mask, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(vk_barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn test_read_to_write_is_execution_only() {
        let barrier = RgBufferBarrierDesc::new(
            RgResourceHandle::new(1, RgResourceKind::Buffer, 0),
            RgBufferState::UNIFORM_COMPUTE,
            RgBufferState::STORAGE_READ_WRITE_COMPUTE,
        );
        assert!(barrier.needs_barrier());
        let vk_barrier = barrier.to_vk_barrier(vk::Buffer::from_raw(3));
        assert_eq!(vk_barrier.src_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(vk_barrier.size, vk::WHOLE_SIZE);
    }
}
