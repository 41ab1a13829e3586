//! 框架配置常量定义
//!
//! 定义所有框架使用的配置键名称

// ==================== Server 配置 ====================

/// 服务器监听地址
pub const SERVER_HOST: &str = "server.host";

/// 服务器监听端口
pub const SERVER_PORT: &str = "server.port";

/// 请求体大小上限（字节）
pub const SERVER_BODY_LIMIT: &str = "server.body-limit";

// ==================== Router 配置 ====================

/// 路由表快照在缓存中的有效期（秒）
pub const ROUTER_CACHE_TTL: &str = "router.cache-ttl";

/// 路由表快照的缓存键
pub const ROUTER_CACHE_KEY: &str = "router.cache-key";

/// 路由匹配前执行的命名中间件列表
pub const ROUTER_PREROUTE_MIDDLEWARE: &str = "router.preroute-middleware";

// ==================== Logging 配置 ====================

/// 日志级别
pub const LOGGING_LEVEL: &str = "logging.level";

/// 日志格式
pub const LOGGING_FORMAT: &str = "logging.format";

/// 自定义过滤器
pub const LOGGING_FILTER: &str = "logging.filter";
