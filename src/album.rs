//! 相册存储：单个相册的照片列表与元数据的增删改查。

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::document::{AlbumDoc, DocumentStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{AlbumMeta, BatchOutcome, NewPhoto, Photo};
use crate::quota::QuotaTracker;
use crate::storage::{AlbumPaths, Storage, TRASH_ALBUM};

#[derive(Debug, Clone, Serialize)]
pub struct AlbumListing {
    pub album: AlbumMeta,
    /// 插入顺序，排序由展示层负责。
    pub photos: Vec<Photo>,
}

#[derive(Debug)]
pub struct AlbumStore {
    storage: Arc<Storage>,
    docs: Arc<DocumentStore>,
    quota: Arc<QuotaTracker>,
}

impl AlbumStore {
    pub fn new(storage: Arc<Storage>, docs: Arc<DocumentStore>, quota: Arc<QuotaTracker>) -> Self {
        Self {
            storage,
            docs,
            quota,
        }
    }

    /// 追加一张已上传到图床的照片；先在账本中预扣容量，追加失败时退回。
    pub async fn upload(
        &self,
        user: &str,
        album: &str,
        upload: NewPhoto,
        now: i64,
    ) -> StoreResult<Photo> {
        let paths = self.resolve(user, album).await?;
        upload.validate().map_err(StoreError::InvalidInput)?;
        let size_kb = upload.size_kb;
        self.quota.reserve(user, size_kb).await?;

        let photo = match self.append(&paths, upload, now).await {
            Ok(photo) => photo,
            Err(err) => {
                if let Err(refund) = self.quota.debit(user, size_kb).await {
                    warn!(user, size_kb, error = %refund, "quota refund failed");
                }
                return Err(err);
            }
        };
        info!(user, album, url = %photo.url, size_kb, "photo uploaded");
        Ok(photo)
    }

    async fn append(&self, paths: &AlbumPaths, upload: NewPhoto, now: i64) -> StoreResult<Photo> {
        let _guard = self.docs.lock(&paths.dir).await?;
        let mut doc = self
            .read(paths)
            .await?
            .unwrap_or_else(|| AlbumDoc::new(&paths.name, now));
        let photo = upload.into_photo(now);
        if doc.contains(&photo.url) {
            return Err(StoreError::InvalidInput(format!(
                "photo already in album: {}",
                photo.url
            )));
        }
        doc.items.push(photo.clone());
        doc.meta.last_upload_time = now;
        self.write(paths, &mut doc).await?;
        Ok(photo)
    }

    /// 按 url 改名，缺省扩展名时沿用原扩展名。
    pub async fn rename(
        &self,
        user: &str,
        album: &str,
        url: &str,
        new_name: &str,
    ) -> StoreResult<Photo> {
        if new_name.trim().is_empty() {
            return Err(StoreError::InvalidInput("new name is required".into()));
        }
        let photo = self
            .modify_photo(user, album, url, |photo| photo.rename(new_name))
            .await?;
        info!(user, album, url, name = %photo.name, "photo renamed");
        Ok(photo)
    }

    /// 设置备注；空字符串表示无备注。
    pub async fn set_remark(
        &self,
        user: &str,
        album: &str,
        url: &str,
        remark: &str,
    ) -> StoreResult<Photo> {
        let photo = self
            .modify_photo(user, album, url, |photo| photo.remark = remark.trim().to_string())
            .await?;
        info!(user, album, url, "photo remark updated");
        Ok(photo)
    }

    pub async fn list(&self, user: &str, album: &str) -> StoreResult<AlbumListing> {
        let paths = self.resolve(user, album).await?;
        let _guard = self.docs.lock(&paths.dir).await?;
        let doc = self
            .read(&paths)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("album {album}")))?;
        Ok(AlbumListing {
            album: doc.meta,
            photos: doc.items,
        })
    }

    /// 列出用户的全部相册元数据（不含回收站），按名称排序。
    pub async fn list_albums(&self, user: &str) -> StoreResult<Vec<AlbumMeta>> {
        let mut albums = Vec::new();
        for name in self.storage.list_album_names(user).await? {
            if name == TRASH_ALBUM {
                continue;
            }
            let paths = self.storage.resolve_album(user, &name).await?;
            let _guard = self.docs.lock(&paths.dir).await?;
            if let Some(doc) = self.read(&paths).await? {
                albums.push(doc.meta);
            }
        }
        Ok(albums)
    }

    pub async fn set_album_remark(
        &self,
        user: &str,
        album: &str,
        remark: &str,
    ) -> StoreResult<AlbumMeta> {
        let paths = self.resolve(user, album).await?;
        let _guard = self.docs.lock(&paths.dir).await?;
        let mut doc = self
            .read(&paths)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("album {album}")))?;
        doc.meta.remark = remark.trim().to_string();
        self.write(&paths, &mut doc).await?;
        info!(user, album, "album remark updated");
        Ok(doc.meta)
    }

    /// 永久删除，不经过回收站；按删除总量扣减配额。
    pub async fn batch_remove(
        &self,
        user: &str,
        album: &str,
        urls: &[String],
    ) -> StoreResult<BatchOutcome> {
        let paths = self.resolve(user, album).await?;
        let (removed, missing) = {
            let _guard = self.docs.lock(&paths.dir).await?;
            let mut doc = self
                .read(&paths)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("album {album}")))?;
            let (removed, missing) = doc.take(urls);
            if !removed.is_empty() {
                self.write(&paths, &mut doc).await?;
            }
            (removed, missing)
        };

        let freed: f64 = removed.iter().map(|photo| photo.size_kb).sum();
        if !removed.is_empty() {
            self.quota.debit(user, freed).await?;
        }
        info!(user, album, count = removed.len(), freed_kb = freed, "photos deleted");
        Ok(outcome(removed.len(), missing, "album"))
    }

    /// 同一用户的相册间移动；目标相册不存在时自动创建，与目标重复的副本扣减配额。
    pub async fn batch_move(
        &self,
        user: &str,
        from: &str,
        to: &str,
        urls: &[String],
        now: i64,
    ) -> StoreResult<BatchOutcome> {
        if from == to {
            return Err(StoreError::InvalidInput(
                "source and destination album are the same".into(),
            ));
        }
        let source = self.resolve(user, from).await?;
        let target = self.resolve(user, to).await?;

        let (count, missing, merged_kb) = {
            let _guards = self.docs.lock_pair(&source.dir, &target.dir).await?;
            let mut source_doc = self
                .read(&source)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("album {from}")))?;
            let (moved, missing) = source_doc.take(urls);
            let count = moved.len();
            let mut merged_kb = 0.0;
            if !moved.is_empty() {
                let mut target_doc = self
                    .read(&target)
                    .await?
                    .unwrap_or_else(|| AlbumDoc::new(to, now));
                for photo in moved {
                    // 目标已有同一 url：合并为一份，多出的副本按删除处理
                    if target_doc.contains(&photo.url) {
                        merged_kb += photo.size_kb;
                    } else {
                        target_doc.items.push(photo);
                    }
                }
                // 先写目标再写源，中途失败只会留下重复而不会丢失
                self.write(&target, &mut target_doc).await?;
                self.write(&source, &mut source_doc).await?;
            }
            (count, missing, merged_kb)
        };
        if merged_kb > 0.0 {
            self.quota.debit(user, merged_kb).await?;
        }
        info!(user, from, to, count, merged_kb, "photos moved");
        Ok(outcome(count, missing, from))
    }

    async fn modify_photo(
        &self,
        user: &str,
        album: &str,
        url: &str,
        apply: impl FnOnce(&mut Photo),
    ) -> StoreResult<Photo> {
        let paths = self.resolve(user, album).await?;
        let _guard = self.docs.lock(&paths.dir).await?;
        let mut doc = self
            .read(&paths)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("album {album}")))?;
        let photo = doc
            .find_mut(url)
            .ok_or_else(|| StoreError::NotFound(format!("photo {url} in album {album}")))?;
        apply(photo);
        let updated = photo.clone();
        self.write(&paths, &mut doc).await?;
        Ok(updated)
    }

    /// 普通相册操作不允许触碰回收站。
    async fn resolve(&self, user: &str, album: &str) -> StoreResult<AlbumPaths> {
        if album == TRASH_ALBUM {
            return Err(StoreError::InvalidInput(format!(
                "album name {TRASH_ALBUM} is reserved"
            )));
        }
        self.storage.resolve_album(user, album).await
    }

    async fn read(&self, paths: &AlbumPaths) -> StoreResult<Option<AlbumDoc<Photo>>> {
        self.docs
            .read_album(&paths.name, &paths.list, &paths.meta)
            .await
    }

    async fn write(&self, paths: &AlbumPaths, doc: &mut AlbumDoc<Photo>) -> StoreResult<()> {
        self.docs.write_album(&paths.list, &paths.meta, doc).await
    }
}

/// 未命中的 url 记为失败条目。
pub(crate) fn outcome(succeeded: usize, missing: Vec<String>, album: &str) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        succeeded,
        failed: Vec::new(),
    };
    for url in missing {
        let reason = StoreError::NotFound(format!("photo {url} in {album}")).reason();
        outcome.fail(url, reason);
    }
    outcome
}
