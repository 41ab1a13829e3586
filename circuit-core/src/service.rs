//! 服务查找
//!
//! 控制器构造参数按参数名从这里自动装配

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// 容器中保存的服务实例
pub type Service = Arc<dyn Any + Send + Sync>;

/// 服务查找 trait - 依赖注入容器对路由器暴露的最小接口
pub trait ServiceLookup: Send + Sync {
    /// 是否注册了指定名称的服务
    fn has(&self, name: &str) -> bool;

    /// 按名称获取服务
    fn get(&self, name: &str) -> Option<Service>;
}

impl<'a> dyn ServiceLookup + 'a {
    /// 按名称获取服务并向下转型
    pub fn get_typed<T: Any + Send + Sync>(&self, name: &str) -> CoreResult<Arc<T>> {
        let service = self
            .get(name)
            .ok_or_else(|| CoreError::ServiceNotFound(name.to_string()))?;

        service
            .downcast::<T>()
            .map_err(|_| CoreError::ServiceTypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }
}

/// 基于内存表的服务注册表
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册服务，同名服务会被替换
    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, service: T) {
        self.register_arc(name, Arc::new(service));
    }

    /// 注册已经共享的服务实例
    pub fn register_arc(&self, name: impl Into<String>, service: Service) {
        let name = name.into();
        if self.services.write().insert(name.clone(), service).is_some() {
            tracing::warn!(service = %name, "Service replaced");
        } else {
            tracing::debug!(service = %name, "Service registered");
        }
    }

    /// 构建器风格注册
    pub fn with<T: Any + Send + Sync>(self, name: impl Into<String>, service: T) -> Self {
        self.register(name, service);
        self
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// 获取所有服务名称
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ServiceLookup for ServiceRegistry {
    fn has(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Service> {
        self.services.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Database {
        url: String,
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ServiceRegistry::new().with(
            "database",
            Database {
                url: "postgres://localhost".to_string(),
            },
        );

        assert!(registry.has("database"));
        assert!(!registry.has("mailer"));
        assert_eq!(registry.names(), vec!["database".to_string()]);

        let lookup: &dyn ServiceLookup = &registry;
        let db = lookup.get_typed::<Database>("database").unwrap();
        assert_eq!(db.url, "postgres://localhost");
    }

    #[test]
    fn test_typed_lookup_errors() {
        let registry = ServiceRegistry::new().with("answer", 42_u32);
        let lookup: &dyn ServiceLookup = &registry;

        assert!(matches!(
            lookup.get_typed::<u32>("missing"),
            Err(CoreError::ServiceNotFound(_))
        ));
        assert!(matches!(
            lookup.get_typed::<String>("answer"),
            Err(CoreError::ServiceTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_replace_keeps_single_entry() {
        let registry = ServiceRegistry::new();
        registry.register("clock", 1_u8);
        registry.register("clock", 2_u8);
        assert_eq!(registry.len(), 1);
    }
}
