//! 资源描述池
//!
//! 固定容量的槽位数组 + LIFO 空闲链表。池独占所有描述，外部只持有
//! `RgResourceHandle`。槽位释放时代数递增，旧句柄随之失效。

use std::ops::{Index, IndexMut};

use crate::backend::RgResourceAllocator;
use crate::dag::RgPassId;
use crate::error::{RdgError, RdgResult};
use crate::resource_handle::{RgResourceHandle, RgResourceKind};

/// 资源最近一次被写入的位置：帧号 + 该帧 DAG 中的 Pass id
///
/// 只是一个 arena 索引，不持有 Pass。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgProducerRef {
    pub frame: u64,
    pub pass: RgPassId,
}

/// GPU 对象的所有权
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RgOwnership {
    /// 由 RenderGraph 通过 allocator 创建和销毁
    #[default]
    Owned,
    /// 由调用方创建，池只记录，不销毁
    Imported,
}

/// 可以放进 `RgResourcePool` 的描述类型
pub trait RgResourceDesc: Default {
    const KIND: RgResourceKind;

    fn name(&self) -> &str;

    fn next(&self) -> Option<RgResourceHandle>;

    fn set_next(&mut self, next: Option<RgResourceHandle>);

    /// 复制创建参数，不复制运行时状态
    fn duplicate(&self) -> Self;

    /// 通过 allocator 释放 backing 对象（导入的对象只解除引用）
    fn release(&mut self, handle: RgResourceHandle, allocator: &mut dyn RgResourceAllocator);
}

struct RgPoolSlot<D> {
    /// `None` 表示空闲
    desc: Option<D>,
    generation: u32,
    /// 多缓冲链中非首个元素，只能随链头一起销毁
    chained: bool,
}

impl<D> Default for RgPoolSlot<D> {
    fn default() -> Self {
        Self {
            desc: None,
            generation: 0,
            chained: false,
        }
    }
}

pub struct RgResourcePool<D: RgResourceDesc> {
    /// 按需增长，长度不会超过 `capacity`
    slots: Vec<RgPoolSlot<D>>,
    free_list: Vec<u32>,
    capacity: usize,
}

// new & init
impl<D: RgResourceDesc> RgResourcePool<D> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(i32::MAX as usize);
        Self {
            slots: Vec::new(),
            // 倒序压栈，保证先分配低索引
            free_list: (0..capacity as u32).rev().collect(),
            capacity,
        }
    }
}

// alloc & destroy
impl<D: RgResourceDesc> RgResourcePool<D> {
    /// 分配一个槽位，内容为默认描述
    pub fn alloc(&mut self) -> RdgResult<RgResourceHandle> {
        let index = self.free_list.pop().ok_or(RdgError::PoolExhausted {
            kind: D::KIND,
            capacity: self.capacity,
        })?;

        let slot_index = index as usize;
        if slot_index >= self.slots.len() {
            self.slots.resize_with(slot_index + 1, RgPoolSlot::default);
        }

        let slot = &mut self.slots[slot_index];
        slot.desc = Some(D::default());
        slot.chained = false;
        Ok(RgResourceHandle::new(index, D::KIND, slot.generation))
    }

    /// 释放句柄及其 `next` 链上的所有槽位
    ///
    /// 每个槽位的 backing 对象都会交给 allocator 释放（导入的对象除外）。
    pub fn destroy(&mut self, handle: RgResourceHandle, allocator: &mut dyn RgResourceAllocator) -> RdgResult<()> {
        let head = self.slot_index(handle)?;
        if self.slots[head].chained {
            log::error!("{:?} is a chained buffer, destroy the chain head instead", handle);
            return Err(RdgError::InvalidHandle(handle));
        }

        let mut current = Some((head, handle));
        while let Some((index, slot_handle)) = current {
            let slot = &mut self.slots[index];
            let Some(mut desc) = slot.desc.take() else {
                break;
            };
            desc.release(slot_handle, allocator);
            slot.generation = slot.generation.wrapping_add(1);
            slot.chained = false;
            self.free_list.push(index as u32);

            current = match desc.next() {
                Some(next) => match self.slot_index(next) {
                    Ok(next_index) => Some((next_index, next)),
                    Err(err) => {
                        log::warn!("broken chain after {:?} \"{}\": {}", slot_handle, desc.name(), err);
                        None
                    }
                },
                None => None,
            };
        }

        Ok(())
    }

    /// 在 `head` 的链尾追加一个同参数的描述，返回新句柄；`head` 必须是链头
    pub fn append_to_chain(&mut self, head: RgResourceHandle) -> RdgResult<RgResourceHandle> {
        let mut tail = head;
        let mut tail_index = self.slot_index(head)?;
        if self.slots[tail_index].chained {
            log::error!("{:?} is a chained buffer, append to the chain head instead", head);
            return Err(RdgError::InvalidHandle(head));
        }
        while let Some(next) = self.get(tail)?.next() {
            tail = next;
            tail_index = self.slot_index(next)?;
        }

        let desc = self.get(head)?.duplicate();
        let handle = self.alloc()?;
        let slot = &mut self.slots[handle.index as usize];
        slot.desc = Some(desc);
        slot.chained = true;

        if let Some(tail_desc) = self.slots[tail_index].desc.as_mut() {
            tail_desc.set_next(Some(handle));
        }
        Ok(handle)
    }

    /// 从 `head` 开始的整条链
    pub fn chain(&self, head: RgResourceHandle) -> RdgResult<Vec<RgResourceHandle>> {
        let mut handles = vec![head];
        let mut current = self.get(head)?.next();
        while let Some(handle) = current {
            handles.push(handle);
            current = self.get(handle)?.next();
        }
        Ok(handles)
    }
}

// getters
impl<D: RgResourceDesc> RgResourcePool<D> {
    fn slot_index(&self, handle: RgResourceHandle) -> RdgResult<usize> {
        if !handle.is_valid() {
            return Err(RdgError::InvalidHandle(handle));
        }
        if handle.kind() != D::KIND {
            return Err(RdgError::HandleKindMismatch {
                handle,
                expected: D::KIND,
            });
        }

        let index = handle.index as usize;
        match self.slots.get(index) {
            Some(slot) if slot.desc.is_some() && slot.generation == handle.generation() => Ok(index),
            _ => Err(RdgError::InvalidHandle(handle)),
        }
    }

    #[inline]
    pub fn is_valid(&self, handle: RgResourceHandle) -> bool {
        self.slot_index(handle).is_ok()
    }

    pub fn get(&self, handle: RgResourceHandle) -> RdgResult<&D> {
        let index = self.slot_index(handle)?;
        self.slots[index].desc.as_ref().ok_or(RdgError::InvalidHandle(handle))
    }

    pub fn get_mut(&mut self, handle: RgResourceHandle) -> RdgResult<&mut D> {
        let index = self.slot_index(handle)?;
        self.slots[index].desc.as_mut().ok_or(RdgError::InvalidHandle(handle))
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    #[inline]
    pub fn allocated_count(&self) -> usize {
        self.capacity - self.free_list.len()
    }

    /// 迭代所有已分配的描述
    pub fn iter(&self) -> impl Iterator<Item = (RgResourceHandle, &D)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.desc
                .as_ref()
                .map(|desc| (RgResourceHandle::new(index as u32, D::KIND, slot.generation), desc))
        })
    }
}

impl<D: RgResourceDesc> Index<RgResourceHandle> for RgResourcePool<D> {
    type Output = D;

    /// 句柄失效时 panic
    fn index(&self, handle: RgResourceHandle) -> &Self::Output {
        match self.get(handle) {
            Ok(desc) => desc,
            Err(err) => panic!("{}", err),
        }
    }
}

impl<D: RgResourceDesc> IndexMut<RgResourceHandle> for RgResourcePool<D> {
    fn index_mut(&mut self, handle: RgResourceHandle) -> &mut Self::Output {
        match self.get_mut(handle) {
            Ok(desc) => desc,
            Err(err) => panic!("{}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use ash::vk::Handle;

    use super::*;
    use crate::buffer_resource::RgBufferDesc;
    use crate::texture_resource::RgTextureDesc;

    #[derive(Default)]
    struct CountingAllocator {
        destroyed_textures: Vec<vk::Image>,
    }

    impl RgResourceAllocator for CountingAllocator {
        fn create_texture(&mut self, handle: RgResourceHandle, _desc: &RgTextureDesc) -> RdgResult<vk::Image> {
            Ok(vk::Image::from_raw(handle.index() as u64 + 1))
        }

        fn destroy_texture(&mut self, _handle: RgResourceHandle, image: vk::Image, _desc: &RgTextureDesc) {
            self.destroyed_textures.push(image);
        }

        fn create_buffer(&mut self, handle: RgResourceHandle, _desc: &RgBufferDesc) -> RdgResult<vk::Buffer> {
            Ok(vk::Buffer::from_raw(handle.index() as u64 + 1))
        }

        fn destroy_buffer(&mut self, _handle: RgResourceHandle, _buffer: vk::Buffer, _desc: &RgBufferDesc) {}
    }

    #[test]
    fn test_exhaust_and_reuse() {
        let mut pool = RgResourcePool::<RgTextureDesc>::new(4);
        let mut allocator = CountingAllocator::default();

        let handles: Vec<_> = (0..4).map(|_| pool.alloc().unwrap()).collect();
        assert_eq!(handles.iter().map(|h| h.index()).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(matches!(pool.alloc(), Err(RdgError::PoolExhausted { capacity: 4, .. })));

        pool.destroy(handles[1], &mut allocator).unwrap();
        pool.destroy(handles[2], &mut allocator).unwrap();
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.iter().map(|(h, _)| h).collect::<Vec<_>>(), vec![handles[0], handles[3]]);

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let mut reused = vec![a.index(), b.index()];
        reused.sort();
        assert_eq!(reused, vec![1, 2]);
        assert!(pool.alloc().is_err());

        // 旧句柄与新句柄索引相同，但代数不同
        assert!(!pool.is_valid(handles[1]));
        assert!(pool.is_valid(handles[0]));
    }

    #[test]
    fn test_alloc_destroy_restores_free_list() {
        let mut pool = RgResourcePool::<RgBufferDesc>::new(8);
        let mut allocator = CountingAllocator::default();
        let _keep = pool.alloc().unwrap();
        let before = pool.free_list.clone();

        let handle = pool.alloc().unwrap();
        pool.destroy(handle, &mut allocator).unwrap();

        assert_eq!(pool.free_list, before);
        assert!(!pool.is_valid(handle));
        assert!(matches!(pool.destroy(handle, &mut allocator), Err(RdgError::InvalidHandle(_))));
        assert_eq!(pool.free_list, before);
    }

    #[test]
    fn test_kind_mismatch() {
        let mut textures = RgResourcePool::<RgTextureDesc>::new(2);
        let buffers = RgResourcePool::<RgBufferDesc>::new(2);
        let handle = textures.alloc().unwrap();

        assert!(matches!(buffers.get(handle), Err(RdgError::HandleKindMismatch { .. })));
        assert!(matches!(textures.get(RgResourceHandle::INVALID), Err(RdgError::InvalidHandle(_))));
    }

    #[test]
    fn test_chain_destroy_releases_every_backing() {
        let mut pool = RgResourcePool::<RgTextureDesc>::new(8);
        let mut allocator = CountingAllocator::default();

        let head = pool.alloc().unwrap();
        pool[head] = RgTextureDesc::new_2d(
            "history",
            64,
            64,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::STORAGE,
        );
        let second = pool.append_to_chain(head).unwrap();
        let third = pool.append_to_chain(head).unwrap();
        assert_eq!(pool.chain(head).unwrap(), vec![head, second, third]);
        assert_eq!(pool[third].name, "history");

        for handle in [head, second, third] {
            pool[handle].backing = Some(vk::Image::from_raw(100 + handle.index() as u64));
        }

        // 链上的成员不能单独销毁，也不能作为链头追加
        assert!(pool.destroy(second, &mut allocator).is_err());
        assert!(matches!(pool.append_to_chain(second), Err(RdgError::InvalidHandle(h)) if h == second));
        assert_eq!(pool.chain(head).unwrap().len(), 3);
        assert_eq!(pool.allocated_count(), 3);

        pool.destroy(head, &mut allocator).unwrap();
        assert_eq!(allocator.destroyed_textures.len(), 3);
        assert_eq!(pool.allocated_count(), 0);
        assert!(!pool.is_valid(third));
    }

    #[test]
    fn test_imported_backing_not_destroyed() {
        let mut pool = RgResourcePool::<RgTextureDesc>::new(2);
        let mut allocator = CountingAllocator::default();

        let handle = pool.alloc().unwrap();
        pool[handle].backing = Some(vk::Image::from_raw(7));
        pool[handle].ownership = RgOwnership::Imported;
        pool.destroy(handle, &mut allocator).unwrap();

        assert!(allocator.destroyed_textures.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_index_stale_handle_panics() {
        let mut pool = RgResourcePool::<RgTextureDesc>::new(2);
        let mut allocator = CountingAllocator::default();
        let handle = pool.alloc().unwrap();
        pool.destroy(handle, &mut allocator).unwrap();
        let _ = &pool[handle];
    }
}
