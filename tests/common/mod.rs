use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notestream::backend::http::HttpBackend;
use notestream::quota::QuotaLimits;
use notestream::session::{ControllerSettings, StreamController};
use notestream::storage::SqliteStore;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_store() -> (SqliteStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("history.db");
    let store = SqliteStore::new_with_path(db_path).expect("failed to create sqlite store with path");
    (store, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// `data:` frame carrying one content delta
#[allow(dead_code)]
pub fn content_frame(delta: &str) -> String {
    format!(
        "data: {}\n",
        serde_json::json!({"event": "content", "data": {"content": delta}})
    )
}

/// `data:` frame completing the turn
#[allow(dead_code)]
pub fn complete_frame(title: &str, prompt_tokens: u64, completion_tokens: u64) -> String {
    format!(
        "data: {}\n",
        serde_json::json!({
            "event": "complete",
            "data": {
                "chat_title": title,
                "token_usage": {
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                    "total_tokens": prompt_tokens + completion_tokens,
                }
            }
        })
    )
}

/// Controller talking to `endpoint` with a store in a fresh tempdir
#[allow(dead_code)]
pub fn http_controller(
    endpoint: &str,
    limits: QuotaLimits,
) -> (StreamController, SqliteStore, TempDir) {
    let (store, tmp) = create_temp_store();
    let store = store.with_quota(limits);
    let backend = HttpBackend::new(
        url::Url::parse(endpoint).expect("valid url"),
        HashMap::new(),
        Duration::from_secs(5),
    )
    .expect("http backend");
    let controller = StreamController::new(
        Arc::new(backend),
        Arc::new(store.clone()),
        ControllerSettings::new("ada").with_idle_timeout(Duration::from_secs(5)),
    );
    (controller, store, tmp)
}
