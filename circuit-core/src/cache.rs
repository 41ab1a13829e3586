//! 键值缓存
//!
//! 路由表快照以字符串形式保存在这里。并发写入不加锁：
//! 两个进程同时构建路由表只会导致重复构建，快照内容是确定的

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// 缓存后端 trait
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// 读取缓存，未命中或已过期返回 `None`
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// 写入缓存
    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;
}

/// 进程内缓存
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的条目数
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清空所有条目
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
            Some(_) => true,
            None => false,
        };
        // 过期条目顺手清理
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }
}
