//! 参数绑定
//!
//! 把路由匹配捕获的参数映射到处理器声明的参数表上：
//! 先按名称绑定，剩下的值按捕获顺序填入仍然空着的位置

use crate::constants::REQUEST_PARAMETER_NAME;
use crate::exception::HttpError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 捕获参数的键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgKey {
    Name(String),
    Index(usize),
}

/// 路由匹配捕获的参数，保持捕获顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedArgs {
    entries: Vec<(ArgKey, Value)>,
}

impl CapturedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个具名参数
    pub fn named(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push_named(name, value);
        self
    }

    /// 追加一个位置参数
    pub fn positional(mut self, value: Value) -> Self {
        self.push_positional(value);
        self
    }

    pub fn push_named(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((ArgKey::Name(name.into()), value));
    }

    pub fn push_positional(&mut self, value: Value) {
        let index = self
            .entries
            .iter()
            .filter(|(key, _)| matches!(key, ArgKey::Index(_)))
            .count();
        self.entries.push((ArgKey::Index(index), value));
    }

    /// 按名称查找
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find_map(|(key, value)| match key {
            ArgKey::Name(n) if n == name => Some(value),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ArgKey, Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for CapturedArgs {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut args = CapturedArgs::new();
        for (name, value) in iter {
            args.push_named(name, Value::String(value));
        }
        args
    }
}

/// 参数解引用钩子，绑定后的每个值都会经过它
pub trait ParameterDereferencer: Send + Sync {
    fn dereference(&self, param: &str, value: Value) -> anyhow::Result<Value>;
}

/// 绑定结果：与声明参数表一一对应，未绑定的位置为 `None`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    names: Vec<String>,
    values: Vec<Option<Value>>,
}

impl BoundArgs {
    /// 不经过参数表，直接按捕获顺序排列
    pub fn positional(captured: CapturedArgs) -> Self {
        let (names, values): (Vec<String>, Vec<Option<Value>>) = captured
            .entries
            .into_iter()
            .map(|(key, value)| {
                let name = match key {
                    ArgKey::Name(name) => name,
                    ArgKey::Index(index) => index.to_string(),
                };
                (name, Some(value))
            })
            .unzip();
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 按位置获取
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// 按参数名获取
    pub fn by_name(&self, name: &str) -> Option<&Value> {
        let index = self.names.iter().position(|n| n == name)?;
        self.get(index)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Option<Value>> {
        self.values
    }

    /// 取出参数并转换类型，缺失或无法转换时返回 400
    ///
    /// 路径参数都是字符串，`"42"` 这样的值也能转换成数字
    pub fn value<T: DeserializeOwned>(&self, name: &str) -> Result<T, HttpError> {
        let value = self
            .by_name(name)
            .ok_or_else(|| HttpError::bad_request(format!("Missing parameter '{}'", name)))?;

        if let Ok(parsed) = serde_json::from_value::<T>(value.clone()) {
            return Ok(parsed);
        }
        if let Value::String(text) = value {
            if let Ok(parsed) = serde_json::from_str::<T>(text) {
                return Ok(parsed);
            }
        }
        Err(HttpError::bad_request(format!(
            "Invalid value for parameter '{}'",
            name
        )))
    }
}

/// 绑定参数
///
/// 声明表第一个参数名为 `request` 时会被跳过，请求对象由调用方另行传入
pub fn bind(
    declared: &[String],
    captured: CapturedArgs,
    dereferencer: Option<&dyn ParameterDereferencer>,
) -> anyhow::Result<BoundArgs> {
    let params = match declared.first() {
        Some(first) if first == REQUEST_PARAMETER_NAME => &declared[1..],
        _ => declared,
    };

    let mut pool: Vec<Option<(ArgKey, Value)>> = captured.entries.into_iter().map(Some).collect();
    let mut slots: Vec<Option<Value>> = vec![None; params.len()];

    // 按名称
    for (slot, name) in slots.iter_mut().zip(params) {
        let hit = pool.iter().position(|entry| {
            matches!(entry, Some((ArgKey::Name(key), _)) if key == name)
        });
        if let Some(position) = hit {
            *slot = pool[position].take().map(|(_, value)| value);
        }
    }

    // 剩余值按顺序填空位
    let mut leftovers = pool.into_iter().flatten().map(|(_, value)| value);
    for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
        match leftovers.next() {
            Some(value) => *slot = Some(value),
            None => break,
        }
    }

    if let Some(dereferencer) = dereferencer {
        for (slot, name) in slots.iter_mut().zip(params) {
            if let Some(value) = slot.take() {
                *slot = Some(dereferencer.dereference(name, value)?);
            }
        }
    }

    Ok(BoundArgs {
        names: params.to_vec(),
        values: slots,
    })
}
