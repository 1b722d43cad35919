//! 相册、回收站与配额的 JSON 接口。
//!
//! 认证在前置网关完成，这里只负责净化参数并转发到存储核心。

use axum::extract::{Extension, Json, Path};
use axum::response::Json as JsonResponse;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::album::{AlbumListing, AlbumStore};
use crate::error::ApiError;
use crate::model::{AlbumMeta, BatchOutcome, NewPhoto, Photo};
use crate::quota::{QuotaStatus, QuotaTracker};
use crate::storage::{sanitize_name, user_key};
use crate::trash::{TrashListing, TrashManager};

#[derive(Deserialize)]
pub(crate) struct RenameRequest {
    url: String,
    name: String,
}

#[derive(Deserialize)]
pub(crate) struct PhotoRemarkRequest {
    url: String,
    #[serde(default)]
    remark: String,
}

#[derive(Deserialize)]
pub(crate) struct AlbumRemarkRequest {
    #[serde(default)]
    remark: String,
}

#[derive(Deserialize)]
pub(crate) struct UrlsRequest {
    urls: Vec<String>,
}

#[derive(Deserialize)]
pub(crate) struct MoveRequest {
    to: String,
    urls: Vec<String>,
}

#[derive(Deserialize)]
pub(crate) struct LevelRequest {
    level: i64,
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// 路径中的用户既可以是邮箱也可以是已推导的目录键，统一换算为目录键。
fn user_param(user: &str) -> Result<String, ApiError> {
    Ok(user_key(user)?)
}

fn album_param(raw: &str) -> Result<String, ApiError> {
    let album = sanitize_name(raw);
    if album.is_empty() {
        return Err(ApiError::BadRequest("album name is required".into()));
    }
    Ok(album)
}

fn url_list(urls: Vec<String>) -> Result<Vec<String>, ApiError> {
    let urls: Vec<String> = urls
        .into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect();
    if urls.is_empty() {
        return Err(ApiError::BadRequest("urls is required".into()));
    }
    Ok(urls)
}

/// 查询配额与保留期。
pub async fn get_quota(
    Path(user): Path<String>,
    Extension(quota): Extension<Arc<QuotaTracker>>,
) -> Result<JsonResponse<QuotaStatus>, ApiError> {
    let status = quota.status(&user_param(&user)?).await?;
    Ok(JsonResponse(status))
}

/// 管理入口：修改用户等级。
pub async fn set_level(
    Path(user): Path<String>,
    Extension(quota): Extension<Arc<QuotaTracker>>,
    Json(payload): Json<LevelRequest>,
) -> Result<JsonResponse<QuotaStatus>, ApiError> {
    let status = quota.set_level(&user_param(&user)?, payload.level).await?;
    Ok(JsonResponse(status))
}

pub async fn list_albums(
    Path(user): Path<String>,
    Extension(albums): Extension<Arc<AlbumStore>>,
) -> Result<JsonResponse<Vec<AlbumMeta>>, ApiError> {
    let metas = albums.list_albums(&user_param(&user)?).await?;
    debug!(user = %user, count = metas.len(), "list albums");
    Ok(JsonResponse(metas))
}

pub async fn list_album(
    Path((user, album)): Path<(String, String)>,
    Extension(albums): Extension<Arc<AlbumStore>>,
) -> Result<JsonResponse<AlbumListing>, ApiError> {
    let album = album_param(&album)?;
    let listing = albums.list(&user_param(&user)?, &album).await?;
    debug!(user = %user, album = %album, count = listing.photos.len(), "list album");
    Ok(JsonResponse(listing))
}

/// 登记一张已上传到图床的照片。
pub async fn upload_photo(
    Path((user, album)): Path<(String, String)>,
    Extension(albums): Extension<Arc<AlbumStore>>,
    Json(payload): Json<NewPhoto>,
) -> Result<JsonResponse<Photo>, ApiError> {
    let album = album_param(&album)?;
    let photo = albums
        .upload(&user_param(&user)?, &album, payload, now_secs())
        .await?;
    Ok(JsonResponse(photo))
}

pub async fn rename_photo(
    Path((user, album)): Path<(String, String)>,
    Extension(albums): Extension<Arc<AlbumStore>>,
    Json(payload): Json<RenameRequest>,
) -> Result<JsonResponse<Photo>, ApiError> {
    let album = album_param(&album)?;
    let photo = albums
        .rename(&user_param(&user)?, &album, payload.url.trim(), &payload.name)
        .await?;
    Ok(JsonResponse(photo))
}

pub async fn set_photo_remark(
    Path((user, album)): Path<(String, String)>,
    Extension(albums): Extension<Arc<AlbumStore>>,
    Json(payload): Json<PhotoRemarkRequest>,
) -> Result<JsonResponse<Photo>, ApiError> {
    let album = album_param(&album)?;
    let photo = albums
        .set_remark(&user_param(&user)?, &album, payload.url.trim(), &payload.remark)
        .await?;
    Ok(JsonResponse(photo))
}

pub async fn set_album_remark(
    Path((user, album)): Path<(String, String)>,
    Extension(albums): Extension<Arc<AlbumStore>>,
    Json(payload): Json<AlbumRemarkRequest>,
) -> Result<JsonResponse<AlbumMeta>, ApiError> {
    let album = album_param(&album)?;
    let meta = albums
        .set_album_remark(&user_param(&user)?, &album, &payload.remark)
        .await?;
    Ok(JsonResponse(meta))
}

/// 永久删除（不进回收站）。
pub async fn delete_photos(
    Path((user, album)): Path<(String, String)>,
    Extension(albums): Extension<Arc<AlbumStore>>,
    Json(payload): Json<UrlsRequest>,
) -> Result<JsonResponse<BatchOutcome>, ApiError> {
    let album = album_param(&album)?;
    let urls = url_list(payload.urls)?;
    let outcome = albums.batch_remove(&user_param(&user)?, &album, &urls).await?;
    Ok(JsonResponse(outcome))
}

pub async fn move_photos(
    Path((user, album)): Path<(String, String)>,
    Extension(albums): Extension<Arc<AlbumStore>>,
    Json(payload): Json<MoveRequest>,
) -> Result<JsonResponse<BatchOutcome>, ApiError> {
    let from = album_param(&album)?;
    let to = album_param(&payload.to)?;
    let urls = url_list(payload.urls)?;
    let outcome = albums
        .batch_move(&user_param(&user)?, &from, &to, &urls, now_secs())
        .await?;
    Ok(JsonResponse(outcome))
}

pub async fn trash_photos(
    Path((user, album)): Path<(String, String)>,
    Extension(trash): Extension<Arc<TrashManager>>,
    Json(payload): Json<UrlsRequest>,
) -> Result<JsonResponse<BatchOutcome>, ApiError> {
    let album = album_param(&album)?;
    let urls = url_list(payload.urls)?;
    let outcome = trash
        .move_to_trash(&user_param(&user)?, &album, &urls, now_secs())
        .await?;
    Ok(JsonResponse(outcome))
}

/// 列出回收站（读取前先清理过期条目）。
pub async fn list_trash(
    Path(user): Path<String>,
    Extension(trash): Extension<Arc<TrashManager>>,
) -> Result<JsonResponse<TrashListing>, ApiError> {
    let listing = trash.list(&user_param(&user)?, now_secs()).await?;
    Ok(JsonResponse(listing))
}

pub async fn restore_photos(
    Path(user): Path<String>,
    Extension(trash): Extension<Arc<TrashManager>>,
    Json(payload): Json<UrlsRequest>,
) -> Result<JsonResponse<BatchOutcome>, ApiError> {
    let urls = url_list(payload.urls)?;
    let outcome = trash.restore(&user_param(&user)?, &urls, now_secs()).await?;
    Ok(JsonResponse(outcome))
}

pub async fn purge_photos(
    Path(user): Path<String>,
    Extension(trash): Extension<Arc<TrashManager>>,
    Json(payload): Json<UrlsRequest>,
) -> Result<JsonResponse<BatchOutcome>, ApiError> {
    let urls = url_list(payload.urls)?;
    let outcome = trash.batch_purge(&user_param(&user)?, &urls, now_secs()).await?;
    Ok(JsonResponse(outcome))
}

pub async fn empty_trash(
    Path(user): Path<String>,
    Extension(trash): Extension<Arc<TrashManager>>,
) -> Result<JsonResponse<BatchOutcome>, ApiError> {
    let outcome = trash.empty(&user_param(&user)?, now_secs()).await?;
    Ok(JsonResponse(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::album::tests::{fixture, new_photo};

    fn trash_for(f: &crate::album::tests::Fixture) -> Arc<TrashManager> {
        Arc::new(TrashManager::new(
            f.storage.clone(),
            f.docs.clone(),
            f.quota.clone(),
        ))
    }

    fn albums_for(f: &crate::album::tests::Fixture) -> Arc<AlbumStore> {
        Arc::new(AlbumStore::new(
            f.storage.clone(),
            f.docs.clone(),
            f.quota.clone(),
        ))
    }

    #[tokio::test]
    async fn upload_sanitizes_album_name() {
        let f = fixture();
        let albums = albums_for(&f);
        let JsonResponse(photo) = upload_photo(
            Path(("alice".to_string(), "../hol*iday".to_string())),
            Extension(albums.clone()),
            Json(new_photo("https://img/a.png", 5.0)),
        )
        .await
        .unwrap_or_else(|_| panic!("upload failed"));
        assert_eq!(photo.size_kb, 5.0);

        let JsonResponse(listing) = list_album(
            Path(("alice".to_string(), "..holiday".to_string())),
            Extension(albums),
        )
        .await
        .unwrap_or_else(|_| panic!("list failed"));
        assert_eq!(listing.album.album_name, "..holiday");
        assert_eq!(listing.album.image_count, 1);
    }

    #[tokio::test]
    async fn email_and_derived_key_address_the_same_ledger() {
        let f = fixture();
        set_level(
            Path("Me@Example.com".to_string()),
            Extension(f.quota.clone()),
            Json(LevelRequest { level: 4 }),
        )
        .await
        .unwrap_or_else(|_| panic!("set level failed"));

        let JsonResponse(status) = get_quota(
            Path("me_example.com".to_string()),
            Extension(f.quota.clone()),
        )
        .await
        .unwrap_or_else(|_| panic!("quota failed"));
        assert_eq!(status.level, 4);
        assert_eq!(status.retention_days, 10);
        assert!(f._temp.path().join("data/me_example.com/user.json").exists());
    }

    #[tokio::test]
    async fn unusable_user_key_is_rejected() {
        let f = fixture();
        for raw in ["   ", ".", ".."] {
            let result = get_quota(Path(raw.to_string()), Extension(f.quota.clone())).await;
            assert!(matches!(result, Err(ApiError::BadRequest(_))), "{raw:?}");
        }
        let JsonResponse(status) = get_quota(Path("../etc".to_string()), Extension(f.quota.clone()))
            .await
            .unwrap_or_else(|_| panic!("quota failed"));
        assert_eq!(status.level, 1);
        assert!(!f._temp.path().join("etc").exists());
    }

    #[tokio::test]
    async fn empty_url_list_is_rejected() {
        let f = fixture();
        let result = trash_photos(
            Path(("alice".to_string(), "A".to_string())),
            Extension(trash_for(&f)),
            Json(UrlsRequest {
                urls: vec!["  ".to_string()],
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn over_quota_upload_maps_to_capacity_response() {
        let f = fixture();
        let result = upload_photo(
            Path(("alice".to_string(), "A".to_string())),
            Extension(albums_for(&f)),
            Json(new_photo("big", 2_097_153.0)),
        )
        .await;
        match result {
            Err(ApiError::CapacityExceeded(body)) => {
                assert_eq!(body.used_kb, 0.0);
                assert_eq!(body.requested_kb, 2_097_153.0);
                assert_eq!(body.limit_kb, 2_097_152);
            }
            _ => panic!("expected capacity error"),
        }
    }

    #[tokio::test]
    async fn trash_and_restore_through_handlers() {
        let f = fixture();
        let albums = albums_for(&f);
        let trash = trash_for(&f);
        for url in ["a", "b"] {
            upload_photo(
                Path(("alice".to_string(), "A".to_string())),
                Extension(albums.clone()),
                Json(new_photo(url, 1.0)),
            )
            .await
            .unwrap_or_else(|_| panic!("upload failed"));
        }

        let JsonResponse(outcome) = trash_photos(
            Path(("alice".to_string(), "A".to_string())),
            Extension(trash.clone()),
            Json(UrlsRequest {
                urls: vec!["a".into(), "missing".into()],
            }),
        )
        .await
        .unwrap_or_else(|_| panic!("trash failed"));
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed.len(), 1);

        let JsonResponse(listing) = list_trash(Path("alice".to_string()), Extension(trash.clone()))
            .await
            .unwrap_or_else(|_| panic!("list trash failed"));
        assert_eq!(listing.entries.len(), 1);

        let JsonResponse(restored) = restore_photos(
            Path("alice".to_string()),
            Extension(trash),
            Json(UrlsRequest {
                urls: vec!["a".into()],
            }),
        )
        .await
        .unwrap_or_else(|_| panic!("restore failed"));
        assert_eq!(restored.succeeded, 1);

        let JsonResponse(listing) = list_album(
            Path(("alice".to_string(), "A".to_string())),
            Extension(albums),
        )
        .await
        .unwrap_or_else(|_| panic!("list failed"));
        assert_eq!(listing.album.image_count, 2);
    }

    #[tokio::test]
    async fn move_requires_destination() {
        let f = fixture();
        let result = move_photos(
            Path(("alice".to_string(), "A".to_string())),
            Extension(albums_for(&f)),
            Json(MoveRequest {
                to: "/*".to_string(),
                urls: vec!["x".into()],
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
