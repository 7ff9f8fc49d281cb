use ash::vk;

use crate::backend::RgResourceAllocator;
use crate::resource_handle::{RgResourceHandle, RgResourceKind};
use crate::resource_pool::{RgOwnership, RgProducerRef, RgResourceDesc};
use crate::resource_state::RgImageState;

/// 纹理资源描述
///
/// 前半部分是创建 `vk::Image` 所需的信息，由调用方填写；
/// 后半部分是运行时状态，只由 compile（producer / final state）和 execute（backing）修改。
#[derive(Clone, Debug)]
pub struct RgTextureDesc {
    /// 调试名称
    pub name: String,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub image_type: vk::ImageType,
    pub usage: vk::ImageUsageFlags,
    /// barrier 使用的 aspect，由 format 推断
    pub aspect: vk::ImageAspectFlags,
    pub samples: vk::SampleCountFlags,
    pub mip_levels: u32,
    pub array_layers: u32,

    // ============ 运行时状态 ============
    pub(crate) last_producer: Option<RgProducerRef>,
    pub(crate) final_state: Option<RgImageState>,
    pub(crate) backing: Option<vk::Image>,
    pub(crate) ownership: RgOwnership,
    pub(crate) next: Option<RgResourceHandle>,
}

impl Default for RgTextureDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent3D::default(),
            image_type: vk::ImageType::TYPE_2D,
            usage: vk::ImageUsageFlags::empty(),
            aspect: vk::ImageAspectFlags::COLOR,
            samples: vk::SampleCountFlags::TYPE_1,
            mip_levels: 1,
            array_layers: 1,
            last_producer: None,
            final_state: None,
            backing: None,
            ownership: RgOwnership::Owned,
            next: None,
        }
    }
}

// new & builder
impl RgTextureDesc {
    /// 创建 2D 纹理描述
    pub fn new_2d(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            name: name.into(),
            format,
            extent: vk::Extent3D { width, height, depth: 1 },
            usage,
            aspect: Self::infer_aspect(format),
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    #[inline]
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    /// 从格式推断 aspect
    pub fn infer_aspect(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }
            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

// getters
impl RgTextureDesc {
    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    /// 整个图像的 subresource range
    #[inline]
    pub fn full_subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect)
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(0)
            .layer_count(self.array_layers)
    }

    /// 最近一次写入该纹理的 Pass
    #[inline]
    pub fn last_producer(&self) -> Option<RgProducerRef> {
        self.last_producer
    }

    /// 上一次编译结束时的状态
    #[inline]
    pub fn final_state(&self) -> Option<RgImageState> {
        self.final_state
    }

    #[inline]
    pub fn backing(&self) -> Option<vk::Image> {
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

impl RgResourceDesc for RgTextureDesc {
    const KIND: RgResourceKind = RgResourceKind::Texture;

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
        Self {
            name: self.name.clone(),
            format: self.format,
            extent: self.extent,
            image_type: self.image_type,
            usage: self.usage,
            aspect: self.aspect,
            samples: self.samples,
            mip_levels: self.mip_levels,
            array_layers: self.array_layers,
            ..Default::default()
        }
    }

    fn release(&mut self, handle: RgResourceHandle, allocator: &mut dyn RgResourceAllocator) {
        if let Some(image) = self.backing.take() {
            match self.ownership {
                RgOwnership::Owned => allocator.destroy_texture(handle, image, self),
                RgOwnership::Imported => {
                    log::trace!("skip releasing imported texture \"{}\"", self.name);
                }
            }
        }
    }
}
