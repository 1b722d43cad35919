//! 每用户目录布局与标识符校验。
//!
//! ```text
//! <root>/<user>/user.json               配额账本
//! <root>/<user>/albums/<album>/ls.json  照片列表
//! <root>/<user>/albums/<album>/p.json   相册元数据
//! <root>/<user>/albums/trash/...        回收站
//! ```

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

use crate::error::{StoreError, StoreResult};

pub const ALBUMS_DIR: &str = "albums";
pub const TRASH_ALBUM: &str = "trash";
pub const LIST_FILE: &str = "ls.json";
pub const META_FILE: &str = "p.json";
pub const LEDGER_FILE: &str = "user.json";
pub const MAX_NAME_LEN: usize = 128;

const FORBIDDEN_CHARS: &[char] = &['/', '\\', '*', '?', '[', ']', '{', '}'];

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

/// 单个相册的文件位置；`dir` 同时作为该相册的锁键。
#[derive(Clone, Debug)]
pub struct AlbumPaths {
    pub name: String,
    pub dir: PathBuf,
    pub list: PathBuf,
    pub meta: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 解析相册目录，拒绝未净化的名称与符号链接。
    pub async fn resolve_album(&self, user: &str, album: &str) -> StoreResult<AlbumPaths> {
        validate_name(user)?;
        validate_name(album)?;
        let dir = self.resolve(&[user, ALBUMS_DIR, album])?;
        self.ensure_no_symlink_components(&dir).await?;
        Ok(AlbumPaths {
            name: album.to_string(),
            list: dir.join(LIST_FILE),
            meta: dir.join(META_FILE),
            dir,
        })
    }

    /// 回收站即保留名 `trash` 的相册。
    pub async fn resolve_trash(&self, user: &str) -> StoreResult<AlbumPaths> {
        self.resolve_album(user, TRASH_ALBUM).await
    }

    pub async fn resolve_ledger(&self, user: &str) -> StoreResult<PathBuf> {
        validate_name(user)?;
        let path = self.resolve(&[user, LEDGER_FILE])?;
        self.ensure_no_symlink_components(&path).await?;
        Ok(path)
    }

    /// 列出已有数据目录的用户。
    pub async fn list_users(&self) -> StoreResult<Vec<String>> {
        self.list_subdirs(&self.root).await
    }

    /// 列出用户的相册目录名（含回收站）。
    pub async fn list_album_names(&self, user: &str) -> StoreResult<Vec<String>> {
        validate_name(user)?;
        let dir = self.resolve(&[user, ALBUMS_DIR])?;
        self.list_subdirs(&dir).await
    }

    async fn list_subdirs(&self, dir: &Path) -> StoreResult<Vec<String>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::persistence(dir, "read_dir", err)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::persistence(dir, "read_dir", err))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|err| StoreError::persistence(&entry.path(), "stat", err))?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn resolve(&self, segments: &[&str]) -> StoreResult<PathBuf> {
        let mut normalized = PathBuf::new();
        for segment in segments {
            for component in Path::new(segment).components() {
                match component {
                    Component::Normal(part) => normalized.push(part),
                    Component::CurDir
                    | Component::ParentDir
                    | Component::RootDir
                    | Component::Prefix(_) => {
                        return Err(StoreError::InvalidInput(format!(
                            "invalid path segment: {segment}"
                        )));
                    }
                }
            }
        }
        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> StoreResult<()> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StoreError::InvalidInput("path escapes data root".into()))?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StoreError::InvalidInput(format!(
                            "symlink in data path: {}",
                            current.display()
                        )));
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StoreError::InvalidInput(format!(
                            "not a directory: {}",
                            current.display()
                        )));
                    }
                }
                // 相册与账本均为惰性创建
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(StoreError::persistence(&current, "stat", err)),
            }
        }

        Ok(())
    }
}

/// 去除路径分隔符、通配符与控制字符（HTTP 层在进入存储前调用）。
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !FORBIDDEN_CHARS.contains(ch) && !ch.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// 存储层只接受已净化的名称。
pub fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidInput("name is required".into()));
    }
    if name == "." || name == ".." {
        return Err(StoreError::InvalidInput(format!("reserved name: {name}")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StoreError::InvalidInput("name too long".into()));
    }
    if name.trim() != name
        || name
            .chars()
            .any(|ch| FORBIDDEN_CHARS.contains(&ch) || ch.is_control())
    {
        return Err(StoreError::InvalidInput(format!("unsanitized name: {name}")));
    }
    Ok(())
}

/// 由邮箱推导用户目录键，例如 `Me@Example.com` → `me_example.com`。
pub fn user_key(email: &str) -> StoreResult<String> {
    let key: String = email
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| match ch {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => ch,
            _ => '_',
        })
        .collect();
    validate_name(&key)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_strips_separators_and_globs() {
        assert_eq!(sanitize_name(" ../hol*iday?/[2024] "), "..holiday2024");
        assert_eq!(sanitize_name("a\\b{c}\n"), "abc");
    }

    #[test]
    fn validate_rejects_unsanitized_names() {
        assert!(validate_name("holiday").is_ok());
        assert!(validate_name("假期 2024").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "x*", "q?", "[x]", " pad", "tab\t"] {
            assert!(
                matches!(validate_name(bad), Err(StoreError::InvalidInput(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn user_key_is_directory_safe() {
        assert_eq!(user_key("Me@Example.com").expect("key"), "me_example.com");
        assert!(user_key("   ").is_err());
    }

    #[tokio::test]
    async fn resolve_album_layout() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());
        let paths = storage
            .resolve_album("me_example.com", "holiday")
            .await
            .expect("resolve");
        assert_eq!(
            paths.list,
            temp.path().join("me_example.com/albums/holiday/ls.json")
        );
        assert_eq!(
            paths.meta,
            temp.path().join("me_example.com/albums/holiday/p.json")
        );
        let ledger = storage.resolve_ledger("me_example.com").await.expect("ledger");
        assert_eq!(ledger, temp.path().join("me_example.com/user.json"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_album_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(root.join("u/albums")).expect("create root");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).expect("create outside dir");
        symlink(&outside, root.join("u/albums/linked")).expect("symlink");

        let storage = Storage::new(root);
        let result = storage.resolve_album("u", "linked").await;
        assert!(matches!(result, Err(StoreError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn list_users_and_albums_skips_files() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        std::fs::create_dir_all(root.join("bob/albums/b")).expect("mkdir");
        std::fs::create_dir_all(root.join("bob/albums/a")).expect("mkdir");
        std::fs::create_dir_all(root.join("alice")).expect("mkdir");
        std::fs::write(root.join("stray.txt"), b"x").expect("write");

        let storage = Storage::new(root);
        assert_eq!(
            storage.list_users().await.expect("users"),
            vec!["alice".to_string(), "bob".to_string()]
        );
        assert_eq!(
            storage.list_album_names("bob").await.expect("albums"),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(storage.list_album_names("alice").await.expect("none").is_empty());
    }
}
