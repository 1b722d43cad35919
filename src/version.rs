//! 服务信息：构建版本与当前生效的等级表。

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::quota::{LevelTier, QuotaTracker};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    version: &'static str,
    commit: &'static str,
    build_time: &'static str,
    build_env: String,
}

/// 客户端据此展示升级后的空间与回收站保留期。
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    name: &'static str,
    build: BuildInfo,
    levels: Vec<LevelTier>,
}

fn build_info() -> BuildInfo {
    BuildInfo {
        version: crate::build::PKG_VERSION,
        commit: crate::build::SHORT_COMMIT,
        build_time: crate::build::BUILD_TIME,
        build_env: format!(
            "{},{}",
            crate::build::RUST_VERSION,
            crate::build::RUST_CHANNEL
        ),
    }
}

pub async fn get_service_info(
    Extension(quota): Extension<Arc<QuotaTracker>>,
) -> Result<JsonResponse<ServiceInfo>, ApiError> {
    Ok(JsonResponse(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        build: build_info(),
        levels: quota.policy().tiers(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::album::tests::fixture;

    #[tokio::test]
    async fn service_info_lists_level_table() {
        let f = fixture();
        let JsonResponse(info) = get_service_info(Extension(f.quota.clone()))
            .await
            .unwrap_or_else(|_| panic!("service info failed"));
        assert_eq!(info.build.version, env!("CARGO_PKG_VERSION"));

        let value = serde_json::to_value(&info).expect("json");
        assert_eq!(value["levels"][0]["limitKb"], 2_097_152);
        assert_eq!(value["levels"][10]["limitKb"], serde_json::Value::Null);
        assert_eq!(value["levels"][6]["retentionDays"], 20);
        assert!(value["build"]["buildTime"].is_string());
    }
}
