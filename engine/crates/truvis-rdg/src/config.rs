use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RdgResult;

/// RenderGraph 配置
///
/// 可以直接构造，也可以从 TOML 加载，缺失的字段使用默认值：
///
/// ```toml
/// texture_pool_capacity = 4096
/// log_execution_plan = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdgConfig {
    /// 纹理描述池的槽位数
    pub texture_pool_capacity: usize,
    /// 缓冲区描述池的槽位数
    pub buffer_pool_capacity: usize,
    /// 编译完成后以 debug 级别输出执行计划
    pub log_execution_plan: bool,
    /// 读取一个从未被写入过的资源时输出警告
    pub warn_on_uninitialized_read: bool,
}

impl Default for RdgConfig {
    fn default() -> Self {
        Self {
            texture_pool_capacity: Self::DEFAULT_POOL_CAPACITY,
            buffer_pool_capacity: Self::DEFAULT_POOL_CAPACITY,
            log_execution_plan: false,
            warn_on_uninitialized_read: true,
        }
    }
}

impl RdgConfig {
    /// 池耗尽意味着泄漏，而不是正常负载
    pub const DEFAULT_POOL_CAPACITY: usize = 16 * 1024;

    pub fn from_toml_str(content: &str) -> RdgResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> RdgResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        log::info!("loaded render graph config from {:?}: {:?}", path.as_ref(), config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RdgError;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RdgConfig::from_toml_str("texture_pool_capacity = 64\nlog_execution_plan = true\n").unwrap();

        assert_eq!(config.texture_pool_capacity, 64);
        assert_eq!(config.buffer_pool_capacity, RdgConfig::DEFAULT_POOL_CAPACITY);
        assert!(config.log_execution_plan);
        assert!(config.warn_on_uninitialized_read);
    }

    #[test]
    fn test_malformed_toml() {
        let err = RdgConfig::from_toml_str("texture_pool_capacity = \"many\"").unwrap_err();
        assert!(matches!(err, RdgError::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = RdgConfig::from_file("/nonexistent/truvis-rdg.toml").unwrap_err();
        assert!(matches!(err, RdgError::ConfigIo(_)));
    }
}
