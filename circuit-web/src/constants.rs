//! 调度引擎常量定义

use std::time::Duration;

/// 路由表快照的结构版本，结构变化时递增，旧快照会被视为未命中
pub const SNAPSHOT_VERSION: u32 = 1;

/// 路由表快照的默认缓存键（带版本号）
pub const DEFAULT_CACHE_KEY: &str = "routes_v1";

/// 路由表快照默认有效期
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// `Class@method` 中省略方法名时使用的方法
pub const DEFAULT_CONTROLLER_METHOD: &str = "index";

/// 控制器方法第一个参数叫这个名字时，不参与参数绑定
pub const REQUEST_PARAMETER_NAME: &str = "request";

/// 可调用处理器在上下文标签中的方法名
pub const CALLABLE_METHOD_NAME: &str = "__invoke";

/// 请求 ID 响应头
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 默认请求体大小上限（2 MiB）
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// 失败发生在路由器自身（匹配阶段或没有活动组件）时的上下文标签
pub const ROUTER_CONTEXT_LABEL: &str = "Router";
