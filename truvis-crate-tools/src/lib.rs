//! Truvis 工具集
//!
//! 目前只提供日志初始化：带颜色的 `env_logger` 格式，
//! 供 RenderGraph 的测试和上层程序共用。

pub mod init_log;
