//! 存储层错误分类与 API 错误转换。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::error;

/// 相册/回收站/配额核心返回的错误。
#[derive(Debug)]
pub enum StoreError {
    /// 新增或还原会超出配额。
    CapacityExceeded {
        used_kb: f64,
        requested_kb: f64,
        limit_kb: u64,
    },
    NotFound(String),
    /// 回收站条目缺少 `original_album`，无法还原。
    MissingProvenance { url: String },
    /// 列表、元数据或配额文件读写失败。
    Persistence {
        path: String,
        op: &'static str,
        reason: String,
    },
    InvalidInput(String),
    /// 等待文件锁超时，调用方可稍后重试。
    Busy(String),
}

impl StoreError {
    /// 构造持久化错误并记录完整上下文。
    pub fn persistence(path: &Path, op: &'static str, reason: impl fmt::Display) -> Self {
        let path = path.display().to_string();
        let reason = reason.to_string();
        error!(path = %path, op, reason = %reason, "persistence failure");
        StoreError::Persistence { path, op, reason }
    }

    /// 批量操作中单条失败时展示给用户的原因。
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::CapacityExceeded {
                used_kb,
                requested_kb,
                limit_kb,
            } => write!(
                f,
                "capacity exceeded: used {used_kb} KB + requested {requested_kb} KB > limit {limit_kb} KB"
            ),
            StoreError::NotFound(what) => write!(f, "not found: {what}"),
            StoreError::MissingProvenance { url } => {
                write!(f, "trash entry has no original album: {url}")
            }
            StoreError::Persistence { path, op, reason } => {
                write!(f, "{op} failed for {path}: {reason}")
            }
            StoreError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            StoreError::Busy(key) => write!(f, "resource busy: {key}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapacityBody {
    pub error: &'static str,
    pub used_kb: f64,
    pub requested_kb: f64,
    pub limit_kb: u64,
    pub message: String,
}

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    Conflict(String),
    Unprocessable(String),
    CapacityExceeded(CapacityBody),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response()
            }
            ApiError::CapacityExceeded(body) => {
                (StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response()
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        let message = error.to_string();
        match error {
            StoreError::CapacityExceeded {
                used_kb,
                requested_kb,
                limit_kb,
            } => ApiError::CapacityExceeded(CapacityBody {
                error: "capacity_exceeded",
                used_kb,
                requested_kb,
                limit_kb,
                message,
            }),
            StoreError::NotFound(_) => ApiError::NotFound(message),
            StoreError::MissingProvenance { .. } => ApiError::Unprocessable(message),
            StoreError::InvalidInput(_) => ApiError::BadRequest(message),
            StoreError::Busy(_) => ApiError::Conflict(message),
            // 路径等细节已记录到日志，不返回给客户端
            StoreError::Persistence { op, .. } => ApiError::Internal(format!("存储{op}失败")),
        }
    }
}
