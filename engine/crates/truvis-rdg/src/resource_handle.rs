//! RenderGraph 资源句柄定义
//!
//! 句柄只引用资源池中的 *描述*（尚未创建的 GPU 对象的元数据），
//! 不拥有任何东西。描述由 `RgResourcePool` 独占。

use std::fmt;

/// 句柄引用的资源类别
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum RgResourceKind {
    #[default]
    Undefined,
    Texture,
    Buffer,
}

/// 资源描述句柄：`(index, kind)`，外加槽位代数
///
/// - `index == -1` 或 `kind == Undefined` 表示无效句柄
/// - `generation` 在槽位释放时递增，用于识别指向已复用槽位的旧句柄
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RgResourceHandle {
    pub(crate) index: i32,
    pub(crate) kind: RgResourceKind,
    pub(crate) generation: u32,
}

impl Default for RgResourceHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl RgResourceHandle {
    pub const INVALID: Self = Self {
        index: -1,
        kind: RgResourceKind::Undefined,
        generation: 0,
    };

    #[inline]
    pub(crate) fn new(index: u32, kind: RgResourceKind, generation: u32) -> Self {
        Self {
            index: index as i32,
            kind,
            generation,
        }
    }

    /// 槽位索引，无效句柄返回 -1
    #[inline]
    pub fn index(&self) -> i32 {
        self.index
    }

    #[inline]
    pub fn kind(&self) -> RgResourceKind {
        self.kind
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// 只检查句柄本身的形态；是否仍被池分配需要询问 `RgResourcePool::is_valid`
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.index >= 0 && self.kind != RgResourceKind::Undefined
    }

    #[inline]
    pub fn is_texture(&self) -> bool {
        self.is_valid() && self.kind == RgResourceKind::Texture
    }

    #[inline]
    pub fn is_buffer(&self) -> bool {
        self.is_valid() && self.kind == RgResourceKind::Buffer
    }
}

impl fmt::Debug for RgResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RgResourceKind::Texture => write!(f, "RgTexture({}.g{})", self.index, self.generation),
            RgResourceKind::Buffer => write!(f, "RgBuffer({}.g{})", self.index, self.generation),
            RgResourceKind::Undefined => write!(f, "RgInvalid({})", self.index),
        }
    }
}
