//! 内存文件锁：串行化同一相册/账本的读-改-写。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

/// Manages asynchronous mutexes keyed by data-file path.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    /// 创建新的锁管理器实例。
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 在给定超时时间内获取路径锁，超时返回 Err。
    pub async fn lock_path_with_timeout(
        &self,
        path: &Path,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, ()> {
        let lock = self.entry(&normalize_lock_key(path)).await;
        time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| ())
    }

    /// 按键排序后依次加锁，避免两个跨相册操作互相等待。
    pub async fn lock_pair_with_timeout(
        &self,
        first: &Path,
        second: &Path,
        timeout: Duration,
    ) -> Result<Vec<OwnedMutexGuard<()>>, ()> {
        let mut keys = vec![normalize_lock_key(first), normalize_lock_key(second)];
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self.entry(&key).await;
            let guard = time::timeout(timeout, lock.lock_owned())
                .await
                .map_err(|_| ())?;
            guards.push(guard);
        }
        Ok(guards)
    }

    /// 移除当前无人持有的锁条目，返回移除数量。
    pub async fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        before - locks.len()
    }

    async fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn normalize_lock_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
