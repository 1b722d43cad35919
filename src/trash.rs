//! 回收站：记录来源、按等级保留期惰性清理、还原到原相册。
//!
//! 配额策略：照片在回收站中仍占用配额。移入回收站与还原都不改动账本，
//! 只有被清理（过期、手动清除、清空）时才扣减。

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::album::outcome;
use crate::document::{AlbumDoc, DocumentStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{AlbumMeta, BatchOutcome, Photo, TrashEntry};
use crate::quota::{QuotaTracker, check_capacity};
use crate::storage::{AlbumPaths, Storage, TRASH_ALBUM, validate_name};

#[derive(Debug, Clone, Serialize)]
pub struct TrashItem {
    #[serde(flatten)]
    pub entry: TrashEntry,
    /// 过期时间；缺少删除时间的旧条目为 None。
    pub expire_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrashListing {
    pub album: AlbumMeta,
    pub retention_days: u32,
    pub purged: usize,
    pub entries: Vec<TrashItem>,
}

#[derive(Debug)]
pub struct TrashManager {
    storage: Arc<Storage>,
    docs: Arc<DocumentStore>,
    quota: Arc<QuotaTracker>,
}

impl TrashManager {
    pub fn new(storage: Arc<Storage>, docs: Arc<DocumentStore>, quota: Arc<QuotaTracker>) -> Self {
        Self {
            storage,
            docs,
            quota,
        }
    }

    /// 从相册移入回收站；首次进入时记录 `trash_time` 与 `original_album`。
    pub async fn move_to_trash(
        &self,
        user: &str,
        from: &str,
        urls: &[String],
        now: i64,
    ) -> StoreResult<BatchOutcome> {
        if from == TRASH_ALBUM {
            return Err(StoreError::InvalidInput("photos are already in trash".into()));
        }
        let source = self.storage.resolve_album(user, from).await?;
        let trash = self.storage.resolve_trash(user).await?;

        let (count, missing, merged) = {
            let _guards = self.docs.lock_pair(&source.dir, &trash.dir).await?;
            let mut source_doc: AlbumDoc<Photo> = self
                .docs
                .read_album(&source.name, &source.list, &source.meta)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("album {from}")))?;
            let (taken, missing) = source_doc.take(urls);
            let count = taken.len();
            let mut merged = Vec::new();
            if !taken.is_empty() {
                let mut trash_doc = self.read(&trash, now).await?;
                for photo in taken {
                    match trash_doc.find_mut(&photo.url) {
                        // 已在回收站中：保留最初的来源信息，这一份副本直接删除
                        Some(existing) => {
                            existing.stamp(from, now);
                            merged.push(TrashEntry::from_photo(photo));
                        }
                        None => {
                            let mut entry = TrashEntry::from_photo(photo);
                            entry.stamp(from, now);
                            trash_doc.items.push(entry);
                        }
                    }
                }
                self.write(&trash, &mut trash_doc).await?;
                self.docs
                    .write_album(&source.list, &source.meta, &mut source_doc)
                    .await?;
            }
            (count, missing, merged)
        };
        self.debit(user, &merged).await?;
        info!(user, from, count, merged = merged.len(), "photos moved to trash");
        Ok(outcome(count, missing, from))
    }

    /// 清理过期条目并扣减配额：`now > trash_time + 保留天数 * 86400`。
    pub async fn sweep_expired(&self, user: &str, now: i64) -> StoreResult<Vec<TrashEntry>> {
        let status = self.quota.status(user).await?;
        let trash = self.storage.resolve_trash(user).await?;
        let purged = {
            let _guard = self.docs.lock(&trash.dir).await?;
            let Some(mut doc) = self
                .docs
                .read_album::<TrashEntry>(TRASH_ALBUM, &trash.list, &trash.meta)
                .await?
            else {
                return Ok(Vec::new());
            };
            let (expired, kept): (Vec<_>, Vec<_>) = doc
                .items
                .into_iter()
                .partition(|entry| entry.is_expired(now, status.retention_days));
            doc.items = kept;
            if !expired.is_empty() {
                self.write(&trash, &mut doc).await?;
            }
            expired
        };

        if !purged.is_empty() {
            let freed: f64 = purged.iter().map(|entry| entry.photo.size_kb).sum();
            self.quota.debit(user, freed).await?;
            info!(
                user,
                count = purged.len(),
                freed_kb = freed,
                retention_days = status.retention_days,
                "expired trash purged"
            );
        }
        Ok(purged)
    }

    /// 先清理再列出，保证不会展示已过期的条目。
    pub async fn list(&self, user: &str, now: i64) -> StoreResult<TrashListing> {
        let purged = self.sweep_expired(user, now).await?.len();
        let retention_days = self.quota.status(user).await?.retention_days;
        let trash = self.storage.resolve_trash(user).await?;
        let _guard = self.docs.lock(&trash.dir).await?;
        let doc = self.read(&trash, now).await?;
        let entries = doc
            .items
            .into_iter()
            .map(|entry| TrashItem {
                expire_time: entry.expire_time(retention_days),
                entry,
            })
            .collect();
        Ok(TrashListing {
            album: doc.meta,
            retention_days,
            purged,
            entries,
        })
    }

    /// 按 url 还原到各自的原相册（必要时重建相册）。
    pub async fn restore(
        &self,
        user: &str,
        urls: &[String],
        now: i64,
    ) -> StoreResult<BatchOutcome> {
        self.sweep_expired(user, now).await?;
        let status = self.quota.status(user).await?;
        let trash = self.storage.resolve_trash(user).await?;
        let mut result = BatchOutcome::default();

        // 先按原相册分组，再逐组加锁搬移
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        {
            let _guard = self.docs.lock(&trash.dir).await?;
            let doc = self.read(&trash, now).await?;
            let mut index: HashMap<String, usize> = HashMap::new();
            for url in urls {
                let Some(entry) = doc.items.iter().find(|entry| &entry.photo.url == url) else {
                    result.fail(url, StoreError::NotFound(format!("photo {url} in trash")).reason());
                    continue;
                };
                let Some(album) = entry.provenance() else {
                    warn!(user, url = %url, "trash entry has no original album");
                    result.fail(url, StoreError::MissingProvenance { url: url.clone() }.reason());
                    continue;
                };
                if let Err(err) = validate_name(album) {
                    warn!(user, url = %url, album, "trash entry has invalid original album");
                    result.fail(url, err.reason());
                    continue;
                }
                if album == TRASH_ALBUM {
                    result.fail(url, StoreError::MissingProvenance { url: url.clone() }.reason());
                    continue;
                }
                // 回收站中的照片已计入配额，只要求还原后仍在上限内
                let size = entry.photo.size_kb;
                let used_without = (status.used_space_kb - size).max(0.0);
                if let Err(err) = check_capacity(used_without, size, status.limit_kb) {
                    result.fail(url, err.reason());
                    continue;
                }
                let slot = *index.entry(album.to_string()).or_insert_with(|| {
                    groups.push((album.to_string(), Vec::new()));
                    groups.len() - 1
                });
                groups[slot].1.push(url.clone());
            }
        }

        for (album, group) in groups {
            match self.restore_group(user, &trash, &album, &group, now).await {
                Ok((restored, missing, merged)) => {
                    result.succeeded += restored;
                    if let Err(err) = self.debit(user, &merged).await {
                        warn!(user, album = %album, error = %err, "quota debit for merged photos failed");
                    }
                    for url in missing {
                        let reason = StoreError::NotFound(format!("photo {url} in trash")).reason();
                        result.fail(url, reason);
                    }
                }
                Err(err) => {
                    for url in group {
                        result.fail(url, err.reason());
                    }
                }
            }
        }
        info!(
            user,
            restored = result.succeeded,
            failed = result.failed.len(),
            "trash restore"
        );
        Ok(result)
    }

    async fn restore_group(
        &self,
        user: &str,
        trash: &AlbumPaths,
        album: &str,
        urls: &[String],
        now: i64,
    ) -> StoreResult<(usize, Vec<String>, Vec<TrashEntry>)> {
        let target = self.storage.resolve_album(user, album).await?;
        let _guards = self.docs.lock_pair(&target.dir, &trash.dir).await?;
        let mut trash_doc = self.read(trash, now).await?;
        let (taken, missing) = trash_doc.take(urls);
        let count = taken.len();
        if taken.is_empty() {
            return Ok((0, missing, Vec::new()));
        }
        let mut target_doc: AlbumDoc<Photo> = self
            .docs
            .read_album(&target.name, &target.list, &target.meta)
            .await?
            .unwrap_or_else(|| AlbumDoc::new(album, now));
        let mut merged = Vec::new();
        for entry in taken {
            // 原相册已有同一 url：回收站中的这一份直接删除
            if target_doc.contains(&entry.photo.url) {
                merged.push(entry);
            } else {
                target_doc.items.push(entry.into_photo());
            }
        }
        self.docs
            .write_album(&target.list, &target.meta, &mut target_doc)
            .await?;
        self.write(trash, &mut trash_doc).await?;
        info!(user, album, count, merged = merged.len(), "photos restored");
        Ok((count, missing, merged))
    }

    /// 从回收站永久删除指定照片。
    pub async fn batch_purge(
        &self,
        user: &str,
        urls: &[String],
        now: i64,
    ) -> StoreResult<BatchOutcome> {
        self.sweep_expired(user, now).await?;
        let trash = self.storage.resolve_trash(user).await?;
        let (purged, missing) = {
            let _guard = self.docs.lock(&trash.dir).await?;
            let mut doc = self.read(&trash, now).await?;
            let (purged, missing) = doc.take(urls);
            if !purged.is_empty() {
                self.write(&trash, &mut doc).await?;
            }
            (purged, missing)
        };
        let count = purged.len();
        self.debit(user, &purged).await?;
        info!(user, count, "trash entries purged");
        Ok(outcome(count, missing, TRASH_ALBUM))
    }

    /// 清空回收站。
    pub async fn empty(&self, user: &str, now: i64) -> StoreResult<BatchOutcome> {
        let expired = self.sweep_expired(user, now).await?.len();
        let trash = self.storage.resolve_trash(user).await?;
        let purged = {
            let _guard = self.docs.lock(&trash.dir).await?;
            let mut doc = self.read(&trash, now).await?;
            let purged = std::mem::take(&mut doc.items);
            if !purged.is_empty() {
                self.write(&trash, &mut doc).await?;
            }
            purged
        };
        self.debit(user, &purged).await?;
        info!(user, count = purged.len(), expired, "trash emptied");
        Ok(outcome(purged.len(), Vec::new(), TRASH_ALBUM))
    }

    async fn debit(&self, user: &str, purged: &[TrashEntry]) -> StoreResult<()> {
        if purged.is_empty() {
            return Ok(());
        }
        let freed: f64 = purged.iter().map(|entry| entry.photo.size_kb).sum();
        self.quota.debit(user, freed).await?;
        Ok(())
    }

    /// 读取回收站；不存在时返回空回收站（首次写入时落盘）。
    async fn read(&self, trash: &AlbumPaths, now: i64) -> StoreResult<AlbumDoc<TrashEntry>> {
        Ok(self
            .docs
            .read_album(TRASH_ALBUM, &trash.list, &trash.meta)
            .await?
            .unwrap_or_else(|| AlbumDoc::new(TRASH_ALBUM, now)))
    }

    async fn write(&self, trash: &AlbumPaths, doc: &mut AlbumDoc<TrashEntry>) -> StoreResult<()> {
        self.docs.write_album(&trash.list, &trash.meta, doc).await
    }
}
