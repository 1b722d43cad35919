//! 持久化记录类型：照片、回收站条目、相册元数据与用户账本。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// 一张外部托管图片的引用，`url` 为列表内主键。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub url: String,
    pub size_kb: f64,
    pub upload_time: i64,
    /// 像素尺寸，形如 `"1920*1080"`。
    pub size: String,
    pub name: String,
    pub remark: String,
    pub tags: Vec<String>,
}

/// 回收站中的照片：首次进入回收站时记录来源相册与删除时间。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashEntry {
    #[serde(flatten)]
    pub photo: Photo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trash_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_album: Option<String>,
}

/// 相册元数据（`p.json`），计数与容量始终由列表重算。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumMeta {
    pub album_name: String,
    pub create_time: i64,
    pub last_upload_time: i64,
    pub image_count: u64,
    pub used_space_kb: f64,
    pub remark: String,
}

/// 用户配额账本（`user.json`），其他协作方写入的字段原样保留。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub level: i64,
    pub used_space_kb: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 上传请求携带的照片信息，字节已由外部图床保存。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPhoto {
    pub url: String,
    pub size_kb: f64,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub url: String,
    pub reason: String,
}

/// 批量操作结果：逐条统计成功与失败，不因单条失败中断整批。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn fail(&mut self, url: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(BatchFailure {
            url: url.into(),
            reason: reason.into(),
        });
    }
}

/// 相册/回收站列表条目的公共视图。
pub trait ListEntry {
    fn url(&self) -> &str;
    fn size_kb(&self) -> f64;
    fn upload_time(&self) -> i64;

    fn validate(&self) -> Result<(), String> {
        if self.url().trim().is_empty() {
            return Err("photo url is empty".into());
        }
        let size = self.size_kb();
        if !size.is_finite() || size < 0.0 {
            return Err(format!("invalid size_kb {size} for {}", self.url()));
        }
        Ok(())
    }
}

impl ListEntry for Photo {
    fn url(&self) -> &str {
        &self.url
    }

    fn size_kb(&self) -> f64 {
        self.size_kb
    }

    fn upload_time(&self) -> i64 {
        self.upload_time
    }
}

impl ListEntry for TrashEntry {
    fn url(&self) -> &str {
        &self.photo.url
    }

    fn size_kb(&self) -> f64 {
        self.photo.size_kb
    }

    fn upload_time(&self) -> i64 {
        self.photo.upload_time
    }

    fn validate(&self) -> Result<(), String> {
        self.photo.validate()
    }
}

/// 校验整份列表：逐条校验且 url 不可重复。
pub fn validate_list<T: ListEntry>(items: &[T]) -> Result<(), String> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        item.validate()?;
        if !seen.insert(item.url()) {
            return Err(format!("duplicate url {}", item.url()));
        }
    }
    Ok(())
}

impl Photo {
    /// 改名；新名称不带扩展名时沿用原扩展名。
    pub fn rename(&mut self, new_name: &str) {
        let new_name = new_name.trim();
        self.name = match (extension(new_name), extension(&self.name)) {
            (None, Some(ext)) => format!("{new_name}.{ext}"),
            _ => new_name.to_string(),
        };
    }
}

fn extension(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains(char::is_whitespace) {
        return None;
    }
    Some(ext)
}

impl NewPhoto {
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url is required".into());
        }
        if !self.size_kb.is_finite() || self.size_kb <= 0.0 {
            return Err("size_kb must be greater than 0".into());
        }
        if !self.size.is_empty() && !is_dimensions(&self.size) {
            return Err(format!("size must look like W*H, got {}", self.size));
        }
        Ok(())
    }

    pub fn into_photo(self, now: i64) -> Photo {
        let name = match self.name.map(|name| name.trim().to_string()) {
            Some(name) if !name.is_empty() => name,
            _ => default_name(&self.url),
        };
        Photo {
            url: self.url.trim().to_string(),
            size_kb: self.size_kb,
            upload_time: now,
            size: self.size,
            name,
            remark: self.remark,
            tags: self.tags,
        }
    }
}

fn is_dimensions(value: &str) -> bool {
    let Some((width, height)) = value.split_once('*') else {
        return false;
    };
    [width, height]
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit()))
}

/// 取 URL 最后一段（去掉查询串）作为默认文件名。
fn default_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("photo")
        .to_string()
}

impl TrashEntry {
    pub fn from_photo(photo: Photo) -> Self {
        Self {
            photo,
            trash_time: None,
            original_album: None,
        }
    }

    /// 记录来源信息；已存在的字段不会被覆盖。
    pub fn stamp(&mut self, album: &str, now: i64) {
        if self.trash_time.is_none() {
            self.trash_time = Some(now);
        }
        if self.provenance().is_none() {
            self.original_album = Some(album.to_string());
        }
    }

    pub fn provenance(&self) -> Option<&str> {
        self.original_album
            .as_deref()
            .filter(|album| !album.trim().is_empty())
    }

    pub fn expire_time(&self, retention_days: u32) -> Option<i64> {
        self.trash_time
            .map(|trashed| trashed.saturating_add(i64::from(retention_days) * 86_400))
    }

    /// 严格大于过期时间才算过期；没有删除时间的条目永不过期。
    pub fn is_expired(&self, now: i64, retention_days: u32) -> bool {
        self.expire_time(retention_days)
            .is_some_and(|expire| now > expire)
    }

    /// 去掉回收站字段，还原为普通照片。
    pub fn into_photo(self) -> Photo {
        self.photo
    }
}

impl AlbumMeta {
    pub fn new(album_name: &str, now: i64) -> Self {
        Self {
            album_name: album_name.to_string(),
            create_time: now,
            last_upload_time: now,
            image_count: 0,
            used_space_kb: 0.0,
            remark: String::new(),
        }
    }

    /// 按列表全量重算计数与容量。
    pub fn recompute<T: ListEntry>(&mut self, items: &[T]) {
        self.image_count = items.len() as u64;
        // 空列表求和得到 -0.0，从 0.0 起累加
        self.used_space_kb = items.iter().fold(0.0, |acc, item| acc + item.size_kb());
    }
}

impl UserRecord {
    pub fn new(level: i64) -> Self {
        Self {
            level,
            used_space_kb: 0.0,
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(url: &str, name: &str, size_kb: f64) -> Photo {
        Photo {
            url: url.into(),
            size_kb,
            upload_time: 1,
            size: "10*10".into(),
            name: name.into(),
            remark: String::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn rename_keeps_extension_when_omitted() {
        let mut p = photo("u", "sunset.png", 1.0);
        p.rename("newName");
        assert_eq!(p.name, "newName.png");

        p.rename("other.jpg");
        assert_eq!(p.name, "other.jpg");

        let mut bare = photo("u", "README", 1.0);
        bare.rename("notes");
        assert_eq!(bare.name, "notes");

        let mut dotted = photo("u", "a.jpeg", 1.0);
        dotted.rename(".hidden");
        assert_eq!(dotted.name, ".hidden.jpeg");
    }

    #[test]
    fn stamp_is_idempotent() {
        let mut entry = TrashEntry::from_photo(photo("u", "a.png", 1.0));
        entry.stamp("holiday", 100);
        entry.stamp("other", 200);
        assert_eq!(entry.trash_time, Some(100));
        assert_eq!(entry.original_album.as_deref(), Some("holiday"));
    }

    #[test]
    fn expiry_uses_strict_comparison() {
        let mut entry = TrashEntry::from_photo(photo("u", "a.png", 1.0));
        entry.stamp("a", 1_000);
        let boundary = 1_000 + 5 * 86_400;
        assert!(!entry.is_expired(boundary, 5));
        assert!(entry.is_expired(boundary + 1, 5));

        let legacy = TrashEntry::from_photo(photo("u", "a.png", 1.0));
        assert!(!legacy.is_expired(i64::MAX, 5));
    }

    #[test]
    fn expiry_saturates_on_far_future_trash_time() {
        let mut entry = TrashEntry::from_photo(photo("u", "a.png", 1.0));
        entry.stamp("a", i64::MAX - 10);
        assert_eq!(entry.expire_time(30), Some(i64::MAX));
        assert!(!entry.is_expired(i64::MAX, 30));
        assert!(!entry.is_expired(0, 30));
    }

    #[test]
    fn trash_fields_are_flattened_and_optional() {
        let mut entry = TrashEntry::from_photo(photo("http://img/x.png", "x.png", 3.5));
        let plain = serde_json::to_value(&entry).expect("serialize");
        assert!(plain.get("trash_time").is_none());
        assert_eq!(plain["url"], "http://img/x.png");

        entry.stamp("holiday", 42);
        let stamped = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(stamped["trash_time"], 42);
        assert_eq!(stamped["original_album"], "holiday");

        let back: TrashEntry = serde_json::from_value(stamped).expect("deserialize");
        assert_eq!(back, entry);
        assert_eq!(back.into_photo().name, "x.png");
    }

    #[test]
    fn photo_rejects_missing_fields() {
        let missing_remark = serde_json::json!({
            "url": "u", "size_kb": 1, "upload_time": 1, "size": "1*1", "name": "n", "tags": []
        });
        assert!(serde_json::from_value::<Photo>(missing_remark).is_err());
    }

    #[test]
    fn list_validation_rejects_duplicates_and_bad_sizes() {
        let ok = vec![photo("a", "a", 1.0), photo("b", "b", 2.0)];
        assert!(validate_list(&ok).is_ok());
        let dup = vec![photo("a", "a", 1.0), photo("a", "b", 2.0)];
        assert!(validate_list(&dup).is_err());
        let negative = vec![photo("a", "a", -1.0)];
        assert!(validate_list(&negative).is_err());
        let empty_url = vec![photo(" ", "a", 1.0)];
        assert!(validate_list(&empty_url).is_err());
    }

    #[test]
    fn new_photo_validation_and_defaults() {
        let upload = NewPhoto {
            url: "https://img.example.com/p/sunset.png?x=1".into(),
            size_kb: 100.0,
            size: "1920*1080".into(),
            ..NewPhoto::default()
        };
        assert!(upload.validate().is_ok());
        let photo = upload.into_photo(7);
        assert_eq!(photo.name, "sunset.png");
        assert_eq!(photo.upload_time, 7);
        assert_eq!(photo.remark, "");

        let zero = NewPhoto {
            url: "u".into(),
            size_kb: 0.0,
            ..NewPhoto::default()
        };
        assert!(zero.validate().is_err());
        let bad_size = NewPhoto {
            url: "u".into(),
            size_kb: 1.0,
            size: "1920x1080".into(),
            ..NewPhoto::default()
        };
        assert!(bad_size.validate().is_err());
    }

    #[test]
    fn user_record_preserves_foreign_fields() {
        let raw = serde_json::json!({"level": 3, "used_space_kb": 12.5, "points": 40});
        let mut record: UserRecord = serde_json::from_value(raw).expect("deserialize");
        record.used_space_kb += 1.0;
        let out = serde_json::to_value(&record).expect("serialize");
        assert_eq!(out["points"], 40);
        assert_eq!(out["used_space_kb"], 13.5);
    }

    #[test]
    fn recompute_counts_and_sums() {
        let mut meta = AlbumMeta::new("a", 1);
        meta.image_count = 99;
        meta.recompute(&[photo("a", "a", 1.5), photo("b", "b", 2.5)]);
        assert_eq!(meta.image_count, 2);
        assert_eq!(meta.used_space_kb, 4.0);

        meta.recompute::<Photo>(&[]);
        assert_eq!(meta.image_count, 0);
        assert!(meta.used_space_kb.is_sign_positive());
        let raw = serde_json::to_string(&meta).expect("serialize");
        assert!(raw.contains("\"used_space_kb\":0.0"), "{raw}");
    }
}
