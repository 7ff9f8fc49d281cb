//! RenderGraph 错误定义
//!
//! 所有错误都意味着当前帧无法渲染，调用方不应尝试在同一帧内恢复。

use thiserror::Error;

use crate::dag::RgNodeId;
use crate::resource_handle::{RgResourceHandle, RgResourceKind};

#[derive(Error, Debug)]
pub enum RdgError {
    // ============ 配置错误 ============
    #[error("{kind:?} pool exhausted ({capacity} slots), probably a resource leak")]
    PoolExhausted { kind: RgResourceKind, capacity: usize },

    #[error("invalid or stale handle {0:?}")]
    InvalidHandle(RgResourceHandle),

    #[error("handle {handle:?} is not a {expected:?} handle")]
    HandleKindMismatch {
        handle: RgResourceHandle,
        expected: RgResourceKind,
    },

    #[error("pass \"{pass}\" declares {resource:?} at {binding} with conflicting states: {first} vs {second}")]
    ConflictingResourceState {
        pass: String,
        resource: RgResourceHandle,
        binding: String,
        first: String,
        second: String,
    },

    #[error("pass \"{pass}\": {reason}")]
    InvalidAccess { pass: String, reason: String },

    #[error("render pass \"{pass}\" has attachments with mismatched extents")]
    AttachmentExtentMismatch { pass: String },

    // ============ 图结构错误 ============
    #[error("edge {from:?} -> {to:?} would create a cycle")]
    CycleDetected { from: RgNodeId, to: RgNodeId },

    #[error("node {0:?} does not belong to this graph")]
    UnknownNode(RgNodeId),

    #[error("topological sort reached {sorted} of {total} nodes, graph is corrupted")]
    GraphCorrupted { sorted: usize, total: usize },

    // ============ 外部协作者 ============
    #[error("backend failure: {0}")]
    Backend(String),

    // ============ 配置文件 ============
    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type RdgResult<T> = Result<T, RdgError>;
