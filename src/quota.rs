//! 配额：等级 → 空间上限 / 回收站保留天数，以及每用户已用空间账本。
//!
//! 所有容量单位均为 KB。

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::document::DocumentStore;
use crate::error::{StoreError, StoreResult};
use crate::model::UserRecord;
use crate::storage::Storage;

/// 无上限的哨兵值。
pub const UNLIMITED_KB: u64 = u64::MAX;
/// 等级 1 的空间：2 GiB。
pub const BASE_SPACE_KB: u64 = 2 * 1024 * 1024;
pub const SPACE_TABLE_LEVELS: u32 = 10;

#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    /// 下标 0 对应等级 1；超出表长的等级为无上限。
    space_table: Vec<u64>,
    /// (最低等级, 保留天数)，按等级升序。
    retention_tiers: Vec<(i64, u32)>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            space_table: (0..SPACE_TABLE_LEVELS)
                .map(|shift| BASE_SPACE_KB << shift)
                .collect(),
            retention_tiers: vec![(1, 5), (4, 10), (7, 20), (10, 30)],
        }
    }
}

impl QuotaPolicy {
    #[cfg(test)]
    pub fn new(space_table: Vec<u64>, mut retention_tiers: Vec<(i64, u32)>) -> Self {
        retention_tiers.sort_by_key(|(level, _)| *level);
        Self {
            space_table,
            retention_tiers,
        }
    }

    pub fn max_space_kb(&self, level: i64) -> u64 {
        let index = (level.max(1) - 1) as usize;
        self.space_table.get(index).copied().unwrap_or(UNLIMITED_KB)
    }

    pub fn retention_days(&self, level: i64) -> u32 {
        let level = level.max(1);
        self.retention_tiers
            .iter()
            .rev()
            .find(|(min_level, _)| level >= *min_level)
            .or_else(|| self.retention_tiers.first())
            .map(|(_, days)| *days)
            .unwrap_or(0)
    }
}

/// 单个等级的空间与保留期，用于对外展示等级表。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelTier {
    pub level: i64,
    /// None 表示无上限。
    pub limit_kb: Option<u64>,
    pub retention_days: u32,
}

impl QuotaPolicy {
    /// 从等级 1 到首个无上限等级的完整表。
    pub fn tiers(&self) -> Vec<LevelTier> {
        (1..=self.space_table.len() as i64 + 1)
            .map(|level| {
                let limit_kb = self.max_space_kb(level);
                LevelTier {
                    level,
                    limit_kb: (limit_kb != UNLIMITED_KB).then_some(limit_kb),
                    retention_days: self.retention_days(level),
                }
            })
            .collect()
    }
}

/// 容量检查：`used + incoming == limit` 允许，超出 1 即拒绝。
pub fn check_capacity(used_kb: f64, incoming_kb: f64, limit_kb: u64) -> StoreResult<()> {
    if limit_kb == UNLIMITED_KB {
        return Ok(());
    }
    if used_kb + incoming_kb > limit_kb as f64 {
        return Err(StoreError::CapacityExceeded {
            used_kb,
            requested_kb: incoming_kb,
            limit_kb,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub level: i64,
    pub used_space_kb: f64,
    pub limit_kb: u64,
    pub unlimited: bool,
    pub retention_days: u32,
}

#[derive(Debug)]
pub struct QuotaTracker {
    storage: Arc<Storage>,
    docs: Arc<DocumentStore>,
    policy: QuotaPolicy,
    default_level: i64,
}

impl QuotaTracker {
    pub fn new(
        storage: Arc<Storage>,
        docs: Arc<DocumentStore>,
        policy: QuotaPolicy,
        default_level: i64,
    ) -> Self {
        Self {
            storage,
            docs,
            policy,
            default_level: default_level.max(1),
        }
    }

    pub async fn status(&self, user: &str) -> StoreResult<QuotaStatus> {
        let path = self.storage.resolve_ledger(user).await?;
        let record = self
            .docs
            .load::<UserRecord>(&path)
            .await?
            .unwrap_or_else(|| UserRecord::new(self.default_level));
        Ok(self.status_of(&record))
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// 在账本锁内检查容量并预扣，返回预扣后的已用空间。
    ///
    /// 调用方在后续写入失败时须用 `debit` 退回。
    pub async fn reserve(&self, user: &str, incoming_kb: f64) -> StoreResult<f64> {
        validate_delta(incoming_kb)?;
        let policy = &self.policy;
        let used = self
            .modify(user, |record| {
                check_capacity(
                    record.used_space_kb,
                    incoming_kb,
                    policy.max_space_kb(record.level),
                )?;
                record.used_space_kb += incoming_kb;
                Ok(record.used_space_kb)
            })
            .await?;
        debug!(user, incoming_kb, used, "quota reserved");
        Ok(used)
    }

    pub async fn credit(&self, user: &str, delta_kb: f64) -> StoreResult<f64> {
        validate_delta(delta_kb)?;
        let used = self
            .modify(user, |record| {
                record.used_space_kb += delta_kb;
                Ok(record.used_space_kb)
            })
            .await?;
        debug!(user, delta_kb, used, "quota credited");
        Ok(used)
    }

    /// 扣减已用空间，最低为 0。
    pub async fn debit(&self, user: &str, delta_kb: f64) -> StoreResult<f64> {
        validate_delta(delta_kb)?;
        let used = self
            .modify(user, |record| {
                record.used_space_kb = (record.used_space_kb - delta_kb).max(0.0);
                Ok(record.used_space_kb)
            })
            .await?;
        debug!(user, delta_kb, used, "quota debited");
        Ok(used)
    }

    /// 等级归积分/会员模块所有，这里只提供管理入口。
    pub async fn set_level(&self, user: &str, level: i64) -> StoreResult<QuotaStatus> {
        if level < 1 {
            return Err(StoreError::InvalidInput(format!("level must be >= 1, got {level}")));
        }
        let record = self
            .modify(user, |record| {
                record.level = level;
                Ok(record.clone())
            })
            .await?;
        info!(user, level, "user level changed");
        Ok(self.status_of(&record))
    }

    async fn modify<R>(
        &self,
        user: &str,
        apply: impl FnOnce(&mut UserRecord) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let path = self.storage.resolve_ledger(user).await?;
        let default_level = self.default_level;
        self.docs
            .update(&path, || UserRecord::new(default_level), apply)
            .await
    }

    fn status_of(&self, record: &UserRecord) -> QuotaStatus {
        let limit_kb = self.policy.max_space_kb(record.level);
        QuotaStatus {
            level: record.level,
            used_space_kb: record.used_space_kb,
            limit_kb,
            unlimited: limit_kb == UNLIMITED_KB,
            retention_days: self.policy.retention_days(record.level),
        }
    }
}

fn validate_delta(delta_kb: f64) -> StoreResult<()> {
    if !delta_kb.is_finite() || delta_kb < 0.0 {
        return Err(StoreError::InvalidInput(format!(
            "invalid size delta {delta_kb}"
        )));
    }
    Ok(())
}
