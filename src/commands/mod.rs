/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `ask`: ask a single question and print the streamed answer
- `chat`: interactive chat mode
- `history`: list, show and delete stored conversations

The helpers below wire the library components (HTTP backend, SQLite
store, stream controller) from a loaded [`Config`].
*/

use crate::backend::http::HttpBackend;
use crate::commands::render::TranscriptPrinter;
use crate::config::Config;
use crate::error::{NotestreamError, Result};
use crate::quota::QuotaLimits;
use crate::session::{ControllerSettings, StreamController, TurnOutcome};
use crate::storage::SqliteStore;
use std::sync::Arc;
use std::time::Duration;

pub mod ask;
pub mod chat;
pub mod history;
pub mod render;
pub mod special_commands;

/// Open the conversation store described by the configuration
///
/// Uses `storage.path` when set, otherwise the default data directory
/// (honoring `NOTESTREAM_HISTORY_DB`). The account's token budget is
/// enforced by the returned store.
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    let store = match &config.storage.path {
        Some(path) => SqliteStore::new_with_path(path)?,
        None => SqliteStore::new()?,
    };
    Ok(store.with_quota(QuotaLimits {
        max_total_tokens: config.account.max_total_tokens,
    }))
}

/// Build a stream controller talking to the configured backend
///
/// # Errors
///
/// Returns an error if the endpoint is invalid, the HTTP client cannot be
/// built, or the store cannot be opened.
pub fn build_controller(config: &Config) -> Result<StreamController> {
    let backend = HttpBackend::new(
        config.endpoint_url()?,
        config.backend.headers.clone(),
        Duration::from_secs(config.backend.request_timeout_seconds),
    )?;
    let store = open_store(config)?;

    tracing::debug!(endpoint = %backend.endpoint(), db = %store.db_path().display(), "Controller ready");
    Ok(StreamController::new(
        Arc::new(backend),
        Arc::new(store),
        ControllerSettings::from_config(config),
    ))
}

/// Submit one turn and echo the answer to stdout as it streams.
///
/// Ctrl-C while streaming cancels the turn; the partial answer stays in
/// the transcript.
pub async fn stream_turn(
    controller: &StreamController,
    conversation_id: &str,
    text: &str,
) -> Result<TurnOutcome> {
    let transcript = controller
        .transcript(conversation_id)
        .ok_or_else(|| NotestreamError::UnknownConversation(conversation_id.to_string()))?;
    let mut updates = transcript.subscribe();
    let mut printer = TranscriptPrinter::starting_after(&updates.borrow_and_update());
    let mut stdout = std::io::stdout();

    let submit = controller.submit(conversation_id, text);
    tokio::pin!(submit);
    let mut cancelled = false;

    let result = loop {
        tokio::select! {
            result = &mut submit => break result,
            Ok(()) = updates.changed() => {
                let snapshot = updates.borrow_and_update().clone();
                printer.render(&snapshot, &mut stdout)?;
            }
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = controller.cancel(conversation_id);
            }
        }
    };

    printer.render(&transcript.snapshot(), &mut stdout)?;
    result
}
