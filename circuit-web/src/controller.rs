//! 控制器支持
//!
//! `Class@method` 形式的路由目标在这里按名称解析：
//! 控制器定义记录构造参数名和每个方法的参数表，
//! 实例在每次调度时由工厂函数用装配好的构造参数创建

use crate::binder::{BoundArgs, CapturedArgs};
use crate::request::Request;
use crate::response::HandlerOutput;
use async_trait::async_trait;
use circuit_core::{CoreError, Service, ServiceLookup};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 控制器 trait
#[async_trait]
pub trait Controller: Send + Sync {
    /// 调用指定方法，`args` 与该方法声明的参数表对应
    async fn call(
        &self,
        method: &str,
        request: &mut Request,
        args: BoundArgs,
    ) -> anyhow::Result<HandlerOutput>;
}

/// 控制器构造参数，按参数名排列
#[derive(Clone, Default)]
pub struct ConstructorArgs {
    values: Vec<(String, Option<Service>)>,
}

impl ConstructorArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(values: Vec<(String, Option<Service>)>) -> Self {
        Self { values }
    }

    /// 设置参数，已存在时替换
    pub fn insert(&mut self, name: impl Into<String>, service: Service) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = Some(service),
            None => self.values.push((name, Some(service))),
        }
    }

    /// 按名称取出并向下转型
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, service)| service.clone())
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// 同 `get`，缺失或类型不符时返回错误
    pub fn require<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, CoreError> {
        let service = self
            .values
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, service)| service.clone())
            .ok_or_else(|| CoreError::ServiceNotFound(name.to_string()))?;

        service
            .downcast::<T>()
            .map_err(|_| CoreError::ServiceTypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ConstructorArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.values
                    .iter()
                    .map(|(name, service)| (name, service.is_some())),
            )
            .finish()
    }
}

/// 控制器工厂
pub type ControllerFactory =
    Arc<dyn Fn(&ConstructorArgs) -> anyhow::Result<Arc<dyn Controller>> + Send + Sync>;

/// 控制器定义
#[derive(Clone)]
pub struct ControllerDefinition {
    name: String,
    constructor_params: Vec<String>,
    methods: HashMap<String, Vec<String>>,
    factory: ControllerFactory,
}

impl ControllerDefinition {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ConstructorArgs) -> anyhow::Result<Arc<dyn Controller>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            constructor_params: Vec::new(),
            methods: HashMap::new(),
            factory: Arc::new(factory),
        }
    }

    /// 声明构造参数名
    pub fn constructor<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constructor_params = params.into_iter().map(Into::into).collect();
        self
    }

    /// 声明方法及其参数表
    pub fn method<I, S>(mut self, name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods
            .insert(name.into(), params.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constructor_params(&self) -> &[String] {
        &self.constructor_params
    }

    pub fn params_for(&self, method: &str) -> Option<&[String]> {
        self.methods.get(method).map(Vec::as_slice)
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn instantiate(&self, args: &ConstructorArgs) -> anyhow::Result<Arc<dyn Controller>> {
        (self.factory)(args)
    }
}

impl fmt::Debug for ControllerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerDefinition")
            .field("name", &self.name)
            .field("constructor_params", &self.constructor_params)
            .field("methods", &self.methods)
            .finish()
    }
}

/// 控制器注册信息
///
/// 用于编译期自动发现控制器
pub struct ControllerRegistration {
    /// 控制器注册名
    pub name: &'static str,

    /// 构建控制器定义
    pub definition: fn() -> ControllerDefinition,
}

// 使用 inventory 收集所有控制器
inventory::collect!(ControllerRegistration);

/// 获取所有编译期注册的控制器
pub fn get_all_controllers() -> impl Iterator<Item = &'static ControllerRegistration> {
    inventory::iter::<ControllerRegistration>.into_iter()
}

/// 控制器注册表
#[derive(Debug, Default, Clone)]
pub struct ControllerRegistry {
    definitions: HashMap<String, Arc<ControllerDefinition>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 收集所有通过 `inventory::submit!` 注册的控制器
    pub fn from_inventory() -> Self {
        let mut registry = Self::new();
        for registration in get_all_controllers() {
            let definition = (registration.definition)();
            tracing::debug!(
                controller = registration.name,
                methods = definition.methods.len(),
                "Discovered controller"
            );
            registry.register(definition);
        }
        registry
    }

    pub fn register(&mut self, definition: ControllerDefinition) {
        let name = definition.name.clone();
        if self
            .definitions
            .insert(name.clone(), Arc::new(definition))
            .is_some()
        {
            tracing::warn!(controller = %name, "Controller definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ControllerDefinition>> {
        self.definitions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// 路由匹配成功后放进请求属性包的调度信息
///
/// 路由中间件可以读取和修改它，最终调度时被取出消费
#[derive(Clone)]
pub struct ControllerParams {
    /// 匹配到的路由模式
    pub route: String,
    /// 控制器注册名，可调用目标为其名称
    pub class_name: String,
    pub method: String,
    /// 捕获的路由参数
    pub args: CapturedArgs,
    /// 控制器声明的构造参数名
    pub constructor_params: Vec<String>,
    /// 实例化控制器时使用的构造参数
    pub constructor_args: ConstructorArgs,
    /// 装配时使用的服务容器
    pub services: Option<Arc<dyn ServiceLookup>>,
}

impl fmt::Debug for ControllerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerParams")
            .field("route", &self.route)
            .field("class_name", &self.class_name)
            .field("method", &self.method)
            .field("args", &self.args)
            .field("constructor_args", &self.constructor_args)
            .field("services", &self.services.is_some())
            .finish()
    }
}
