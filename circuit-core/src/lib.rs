// circuit-core: Circuit 路由框架的基础设施
//
// 为调度引擎提供外部协作能力：
// - 分层配置（TOML 文件、环境变量、内存配置源）
// - 日志系统初始化
// - 服务查找（控制器构造参数自动装配的后端）
// - 键值缓存（路由表快照的存储后端）

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod service;

// 重新导出常用类型
pub use cache::{KeyValueCache, MemoryCache};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use constants::*;
pub use error::{CoreError, CoreResult, Result};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use service::{Service, ServiceLookup, ServiceRegistry};

// 导出 async_trait，供实现 KeyValueCache 的下游使用
pub use async_trait;

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::cache::{KeyValueCache, MemoryCache};
    pub use crate::config::{
        ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
        TomlPropertySource,
    };
    pub use crate::error::{CoreError, CoreResult, Result};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use crate::service::{Service, ServiceLookup, ServiceRegistry};
    pub use anyhow::{anyhow, Context};
}
