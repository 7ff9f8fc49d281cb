use ash::vk;

use crate::error::{RdgError, RdgResult};
use crate::pass::RgPassNode;
use crate::pass::RgRenderPassData;
use crate::resource_handle::RgResourceHandle;
use crate::resource_pool::RgResourcePool;
use crate::resource_state::{RgAttachmentOps, RgBindingPoint, RgClearValue};
use crate::texture_resource::RgTextureDesc;

/// 单个 attachment 的编译结果
#[derive(Clone, Debug, PartialEq)]
pub struct RgAttachmentTarget {
    pub texture: RgResourceHandle,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    /// 渲染期间的 layout
    pub layout: vk::ImageLayout,
    pub ops: RgAttachmentOps,
}

/// Render pass 的 attachment 分组
///
/// 颜色附件按 slot 排序。
#[derive(Clone, Debug, PartialEq)]
pub struct RgRenderTargetConfig {
    pub extent: vk::Extent2D,
    /// `(slot, target)`
    pub colors: Vec<(u32, RgAttachmentTarget)>,
    pub depth_stencil: Option<RgAttachmentTarget>,
}

impl RgRenderTargetConfig {
    pub(crate) fn build(
        pass: &RgPassNode<'_>,
        data: &RgRenderPassData,
        textures: &RgResourcePool<RgTextureDesc>,
    ) -> RdgResult<Self> {
        let mut extent: Option<vk::Extent2D> = None;
        let mut check_extent = |desc: &RgTextureDesc| -> RdgResult<()> {
            let current = desc.extent_2d();
            match extent {
                Some(expected) if expected != current => {
                    log::error!(
                        "pass \"{}\": attachment \"{}\" is {}x{}, expected {}x{}",
                        pass.name,
                        desc.name,
                        current.width,
                        current.height,
                        expected.width,
                        expected.height
                    );
                    Err(RdgError::AttachmentExtentMismatch {
                        pass: pass.name.clone(),
                    })
                }
                _ => {
                    extent = Some(current);
                    Ok(())
                }
            }
        };

        let mut colors = Vec::with_capacity(data.colors.len());
        for (&slot, &texture) in &data.colors {
            let desc = textures.get(texture)?;
            check_extent(desc)?;
            let target = Self::target(pass, texture, RgBindingPoint::ColorAttachment(slot), desc)?;
            colors.push((slot, target));
        }

        let depth_stencil = match data.depth_stencil {
            Some(texture) => {
                let desc = textures.get(texture)?;
                check_extent(desc)?;
                Some(Self::target(pass, texture, RgBindingPoint::DepthStencil, desc)?)
            }
            None => None,
        };

        Ok(Self {
            extent: extent.unwrap_or_default(),
            colors,
            depth_stencil,
        })
    }

    fn target(
        pass: &RgPassNode<'_>,
        texture: RgResourceHandle,
        binding: RgBindingPoint,
        desc: &RgTextureDesc,
    ) -> RdgResult<RgAttachmentTarget> {
        let access = pass.texture_access(texture, binding);
        let Some((state, ops)) = access.and_then(|a| a.attachment.map(|ops| (a.state, ops))) else {
            return Err(RdgError::InvalidAccess {
                pass: pass.name.clone(),
                reason: format!("{:?} is listed as {} but has no attachment record", texture, binding),
            });
        };
        Ok(RgAttachmentTarget {
            texture,
            format: desc.format,
            samples: desc.samples,
            layout: state.layout,
            ops,
        })
    }
}

// getters
impl RgRenderTargetConfig {
    pub fn color_formats(&self) -> Vec<vk::Format> {
        self.colors.iter().map(|(_, target)| target.format).collect()
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_stencil.as_ref().map(|target| target.format)
    }

    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.extent,
        }
    }
}

impl RgClearValue {
    pub fn to_vk(&self) -> vk::ClearValue {
        match *self {
            Self::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            Self::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}
