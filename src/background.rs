//! 定时回收站清理与空闲锁回收。

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LOCK_PRUNE_INTERVAL_SECS;
use crate::document::DocumentStore;
use crate::error::StoreResult;
use crate::storage::Storage;
use crate::trash::TrashManager;

/// 启动后台任务；`sweep_interval` 为零时只保留读取触发的清理。
pub fn spawn_background_tasks(
    storage: Arc<Storage>,
    docs: Arc<DocumentStore>,
    trash: Arc<TrashManager>,
    sweep_interval: Duration,
) {
    if !sweep_interval.is_zero() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                if let Err(err) = sweep_all_users(&storage, &trash, Utc::now().timestamp()).await {
                    warn!(error = %err, "scheduled trash sweep failed");
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(LOCK_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let pruned = docs.prune_idle_locks().await;
            debug!(pruned, "idle file locks pruned");
        }
    });
}

/// 对每个用户执行一次过期清理，单个用户失败不影响其他用户。
pub async fn sweep_all_users(
    storage: &Storage,
    trash: &TrashManager,
    now: i64,
) -> StoreResult<usize> {
    let mut total = 0;
    for user in storage.list_users().await? {
        match trash.sweep_expired(&user, now).await {
            Ok(purged) => total += purged.len(),
            Err(err) => warn!(user = %user, error = %err, "trash sweep failed"),
        }
    }
    if total > 0 {
        info!(purged = total, "scheduled trash sweep");
    }
    Ok(total)
}
