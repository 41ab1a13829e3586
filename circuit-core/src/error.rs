/// 统一的错误处理类型
///
/// 中间件、控制器和缓存后端都返回 anyhow::Result，
/// 路由器在边界处再把它们归类为 HTTP 失败。
///
/// # 示例
///
/// ```rust,ignore
/// use anyhow::{Context, Result};
///
/// fn load(&self, key: &str) -> Result<String> {
///     self.entries.get(key)
///         .cloned()
///         .ok_or_else(|| anyhow::anyhow!("entry missing"))
///         .context(format!("Failed to load '{}'", key))
/// }
/// ```
pub use anyhow::Result;

use thiserror::Error;

/// 基础设施层错误
#[derive(Debug, Error)]
pub enum CoreError {
    /// 日志系统初始化失败（通常是重复初始化）
    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    /// 配置文件读取或解析失败
    #[error("Failed to load configuration from {source_name}: {message}")]
    ConfigLoad {
        source_name: String,
        message: String,
    },

    /// 服务未注册
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// 服务已注册，但类型与请求的不一致
    #[error("Service '{name}' is not of type {expected}")]
    ServiceTypeMismatch {
        name: String,
        expected: &'static str,
    },
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
