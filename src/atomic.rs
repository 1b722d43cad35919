//! 临时写入与原子替换的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// 可用于原子替换的临时文件封装。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件。
    pub async fn new(target: &Path) -> StoreResult<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| StoreError::InvalidInput("invalid target path".into()))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "doc".into());
        let temp_name = format!(".{base}.tmp.{}", Uuid::new_v4());
        let temp_path = parent.join(temp_name);
        let file = File::create(&temp_path)
            .await
            .map_err(|err| StoreError::persistence(&temp_path, "create", err))?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    /// 一次性写入完整内容并替换目标文件。
    pub async fn write(target: &Path, contents: &[u8]) -> StoreResult<()> {
        let mut atomic = Self::new(target).await?;
        if let Err(err) = atomic.file.write_all(contents).await {
            let temp_path = atomic.temp_path.clone();
            atomic.cleanup().await;
            return Err(StoreError::persistence(&temp_path, "write", err));
        }
        atomic.finalize().await
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步并原子替换目标文件。
    pub async fn finalize(self) -> StoreResult<()> {
        if let Err(err) = self.file.sync_all().await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(StoreError::persistence(&self.temp_path, "sync", err));
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    fs::rename(&self.temp_path, &self.target)
                        .await
                        .map_err(|err| StoreError::persistence(&self.target, "rename", err))?;
                } else {
                    let _ = fs::remove_file(&self.temp_path).await;
                    return Err(StoreError::persistence(&self.target, "rename", err));
                }
            }
            #[cfg(not(windows))]
            {
                let _ = fs::remove_file(&self.temp_path).await;
                return Err(StoreError::persistence(&self.target, "rename", err));
            }
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(())
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_replaces_target_and_leaves_no_temp_files() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("ls.json");
        std::fs::write(&target, b"old").expect("seed");

        AtomicFile::write(&target, b"[]").await.expect("atomic write");

        assert_eq!(std::fs::read(&target).expect("read"), b"[]");
        let leftovers = std::fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp."))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn write_into_missing_directory_fails_as_persistence() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("missing").join("p.json");
        let result = AtomicFile::write(&target, b"{}").await;
        assert!(matches!(
            result,
            Err(StoreError::Persistence { op: "create", .. })
        ));
    }
}
