//! JSON 文档存储：加锁的读-改-写，写入走原子替换。
//!
//! 相册与账本都只通过这里落盘，换成嵌入式数据库时只需替换本模块。

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::ErrorKind;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::atomic::AtomicFile;
use crate::error::{StoreError, StoreResult};
use crate::locking::LockManager;
use crate::model::{AlbumMeta, ListEntry, Photo, TrashEntry, UserRecord, validate_list};

/// 可持久化的文档，加载后必须通过校验。
pub trait Document: Serialize + DeserializeOwned {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl Document for Vec<Photo> {
    fn validate(&self) -> Result<(), String> {
        validate_list(self)
    }
}

impl Document for Vec<TrashEntry> {
    fn validate(&self) -> Result<(), String> {
        validate_list(self)
    }
}

impl Document for AlbumMeta {
    fn validate(&self) -> Result<(), String> {
        if self.album_name.trim().is_empty() {
            return Err("album_name is empty".into());
        }
        if !self.used_space_kb.is_finite() || self.used_space_kb < 0.0 {
            return Err(format!("invalid used_space_kb {}", self.used_space_kb));
        }
        Ok(())
    }
}

impl Document for UserRecord {
    fn validate(&self) -> Result<(), String> {
        if !self.used_space_kb.is_finite() || self.used_space_kb < 0.0 {
            return Err(format!("invalid used_space_kb {}", self.used_space_kb));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct DocumentStore {
    locks: LockManager,
    lock_wait: Duration,
}

impl DocumentStore {
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            locks: LockManager::new(),
            lock_wait,
        }
    }

    /// 获取单个锁键（相册目录或账本文件）的独占锁。
    pub async fn lock(&self, key: &Path) -> StoreResult<OwnedMutexGuard<()>> {
        self.locks
            .lock_path_with_timeout(key, self.lock_wait)
            .await
            .map_err(|_| StoreError::Busy(key.display().to_string()))
    }

    /// 同时锁住两个键，用于跨相册移动。
    pub async fn lock_pair(
        &self,
        first: &Path,
        second: &Path,
    ) -> StoreResult<Vec<OwnedMutexGuard<()>>> {
        self.locks
            .lock_pair_with_timeout(first, second, self.lock_wait)
            .await
            .map_err(|_| {
                StoreError::Busy(format!("{} / {}", first.display(), second.display()))
            })
    }

    pub async fn prune_idle_locks(&self) -> usize {
        self.locks.prune_idle().await
    }

    /// 读取并校验文档；文件不存在时返回 None。调用方负责持锁。
    pub async fn read<T: Document>(&self, path: &Path) -> StoreResult<Option<T>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::persistence(path, "load", err)),
        };
        let document: T = serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::persistence(path, "decode", err))?;
        document
            .validate()
            .map_err(|reason| StoreError::persistence(path, "validate", reason))?;
        Ok(Some(document))
    }

    /// 原子写入文档，必要时创建父目录。调用方负责持锁。
    pub async fn write<T: Document>(&self, path: &Path, document: &T) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::persistence(parent, "mkdir", err))?;
        }
        let contents = serde_json::to_vec_pretty(document)
            .map_err(|err| StoreError::persistence(path, "encode", err))?;
        AtomicFile::write(path, &contents).await?;
        debug!(path = %path.display(), bytes = contents.len(), "document saved");
        Ok(())
    }

    /// 加锁读取。
    pub async fn load<T: Document>(&self, path: &Path) -> StoreResult<Option<T>> {
        let _guard = self.lock(path).await?;
        self.read(path).await
    }

    /// 加锁的读-改-写；闭包返回错误时不落盘。
    pub async fn update<T, R, F>(&self, path: &Path, init: impl FnOnce() -> T, apply: F) -> StoreResult<R>
    where
        T: Document,
        F: FnOnce(&mut T) -> StoreResult<R>,
    {
        let _guard = self.lock(path).await?;
        let mut document = match self.read(path).await? {
            Some(document) => document,
            None => init(),
        };
        let result = apply(&mut document)?;
        self.write(path, &document).await?;
        Ok(result)
    }
}

/// 内存中的一个相册：元数据加有序列表。
#[derive(Debug, Clone)]
pub struct AlbumDoc<T> {
    pub meta: AlbumMeta,
    pub items: Vec<T>,
}

impl<T: ListEntry> AlbumDoc<T> {
    pub fn new(name: &str, now: i64) -> Self {
        Self {
            meta: AlbumMeta::new(name, now),
            items: Vec::new(),
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.items.iter().any(|item| item.url() == url)
    }

    pub fn find_mut(&mut self, url: &str) -> Option<&mut T> {
        self.items.iter_mut().find(|item| item.url() == url)
    }

    /// 按 url 取出条目，保持剩余顺序；返回取出的条目与未命中的 url。
    pub fn take(&mut self, urls: &[String]) -> (Vec<T>, Vec<String>) {
        let mut taken = Vec::new();
        let mut missing = Vec::new();
        for url in urls {
            match self.items.iter().position(|item| item.url() == url) {
                Some(index) => taken.push(self.items.remove(index)),
                None => missing.push(url.clone()),
            }
        }
        (taken, missing)
    }

    pub fn recompute(&mut self) {
        self.meta.recompute(&self.items);
    }
}

impl DocumentStore {
    /// 读取相册（列表 + 元数据），调用方须持有相册目录锁。
    ///
    /// 只有元数据缺失时按列表补建；只有列表缺失视为空相册。
    pub async fn read_album<T>(
        &self,
        name: &str,
        list_path: &Path,
        meta_path: &Path,
    ) -> StoreResult<Option<AlbumDoc<T>>>
    where
        T: ListEntry,
        Vec<T>: Document,
    {
        let items: Option<Vec<T>> = self.read(list_path).await?;
        let meta: Option<AlbumMeta> = self.read(meta_path).await?;
        let mut doc = match (meta, items) {
            (None, None) => return Ok(None),
            (Some(meta), items) => AlbumDoc {
                meta,
                items: items.unwrap_or_default(),
            },
            (None, Some(items)) => {
                let times = items.iter().map(|item| item.upload_time());
                let mut meta = AlbumMeta::new(name, times.clone().min().unwrap_or_default());
                meta.last_upload_time = times.max().unwrap_or_default();
                AlbumDoc { meta, items }
            }
        };
        if doc.meta.album_name != name {
            return Err(StoreError::persistence(
                meta_path,
                "validate",
                format!("album_name {} does not match {name}", doc.meta.album_name),
            ));
        }
        doc.recompute();
        Ok(Some(doc))
    }

    /// 重算元数据后先写列表再写元数据，调用方须持有相册目录锁。
    pub async fn write_album<T>(
        &self,
        list_path: &Path,
        meta_path: &Path,
        doc: &mut AlbumDoc<T>,
    ) -> StoreResult<()>
    where
        T: ListEntry,
        Vec<T>: Document,
    {
        doc.recompute();
        self.write(list_path, &doc.items).await?;
        self.write(meta_path, &doc.meta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn photo(url: &str, size_kb: f64) -> Photo {
        Photo {
            url: url.into(),
            size_kb,
            upload_time: 1,
            size: "1*1".into(),
            name: format!("{url}.png"),
            remark: String::new(),
            tags: Vec::new(),
        }
    }

    fn store() -> DocumentStore {
        DocumentStore::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn update_creates_missing_document() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("u").join("user.json");
        let docs = store();

        let used = docs
            .update(&path, || UserRecord::new(1), |record: &mut UserRecord| {
                record.used_space_kb += 10.0;
                Ok(record.used_space_kb)
            })
            .await
            .expect("update");
        assert_eq!(used, 10.0);

        let loaded: UserRecord = docs.load(&path).await.expect("load").expect("exists");
        assert_eq!(loaded.used_space_kb, 10.0);
    }

    #[tokio::test]
    async fn failed_update_does_not_write() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("user.json");
        let docs = store();

        let result = docs
            .update(&path, || UserRecord::new(1), |_: &mut UserRecord| {
                Err::<(), _>(StoreError::InvalidInput("nope".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_and_invalid_documents_are_rejected() {
        let temp = tempdir().expect("tempdir");
        let docs = store();

        let garbage = temp.path().join("garbage.json");
        std::fs::write(&garbage, b"{not json").expect("write");
        let result = docs.read::<Vec<Photo>>(&garbage).await;
        assert!(matches!(
            result,
            Err(StoreError::Persistence { op: "decode", .. })
        ));

        let empty_url = temp.path().join("ls.json");
        let list = vec![photo("", 1.0)];
        std::fs::write(&empty_url, serde_json::to_vec(&list).expect("encode")).expect("write");
        let result = docs.read::<Vec<Photo>>(&empty_url).await;
        assert!(matches!(
            result,
            Err(StoreError::Persistence { op: "validate", .. })
        ));
    }

    #[tokio::test]
    async fn update_waits_for_lock_then_reports_busy() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("user.json");
        let docs = store();
        let _held = docs.lock(&path).await.expect("lock");

        let result = docs
            .update(&path, || UserRecord::new(1), |_: &mut UserRecord| Ok(()))
            .await;
        assert!(matches!(result, Err(StoreError::Busy(_))));
    }

    #[tokio::test]
    async fn album_round_trip_recomputes_metadata() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("albums").join("a");
        let (list, meta) = (dir.join("ls.json"), dir.join("p.json"));
        let docs = store();

        let mut doc = AlbumDoc::<Photo>::new("a", 5);
        doc.items.push(photo("x", 1.5));
        doc.items.push(photo("y", 2.0));
        doc.meta.image_count = 42;
        docs.write_album(&list, &meta, &mut doc).await.expect("write");

        let loaded = docs
            .read_album::<Photo>("a", &list, &meta)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(loaded.meta.image_count, 2);
        assert_eq!(loaded.meta.used_space_kb, 3.5);
        assert_eq!(loaded.meta.create_time, 5);
        assert_eq!(loaded.items[0].url, "x");

        assert!(
            docs.read_album::<Photo>("b", &dir.join("none"), &dir.join("none2"))
                .await
                .expect("read")
                .is_none()
        );
    }

    #[tokio::test]
    async fn album_name_mismatch_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("a");
        let (list, meta) = (dir.join("ls.json"), dir.join("p.json"));
        let docs = store();
        let mut doc = AlbumDoc::<Photo>::new("other", 1);
        docs.write_album(&list, &meta, &mut doc).await.expect("write");

        let result = docs.read_album::<Photo>("a", &list, &meta).await;
        assert!(matches!(
            result,
            Err(StoreError::Persistence { op: "validate", .. })
        ));
    }

    #[test]
    fn take_preserves_order_and_reports_missing() {
        let mut doc = AlbumDoc::<Photo>::new("a", 1);
        doc.items = vec![photo("a", 1.0), photo("b", 1.0), photo("c", 1.0)];
        let (taken, missing) = doc.take(&["c".to_string(), "z".to_string(), "a".to_string()]);
        assert_eq!(
            taken.iter().map(|p| p.url.as_str()).collect::<Vec<_>>(),
            vec!["c", "a"]
        );
        assert_eq!(missing, vec!["z".to_string()]);
        assert_eq!(doc.items.len(), 1);
        assert_eq!(doc.items[0].url, "b");
    }
}
