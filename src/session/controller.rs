//! Stream session controller
//!
//! [`StreamController`] is the only component that starts or stops a decode
//! pipeline. Each conversation has one slot; `submit` claims it, pumps the
//! backend body through decoder, parser and assembler, persists the turn and
//! releases the slot. `cancel` releases the slot immediately, and any frame
//! still in flight for the cancelled session is discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{ByteStream, QaBackend, SubmitRequest};
use crate::config::Plan;
use crate::error::{NotestreamError, Result};
use crate::session::{ControllerSettings, IdleReason, SessionState, TurnOutcome};
use crate::storage::ConversationStore;
use crate::stream::{parse_frame, FrameDecoder, StreamEvent, TokenUsage};
use crate::transcript::{
    Finalization, Message, MessageId, Role, Transcript, TranscriptAssembler, TranscriptHandle,
};

/// First assistant message of every new conversation
pub const GREETING: &str = "Hello! How can I help you with your notes?";

/// Title of a conversation before the backend names it
pub const DEFAULT_TITLE: &str = "New Chat";

#[derive(Debug, Clone)]
struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ConversationEntry {
    transcript: TranscriptHandle,
    state: SessionState,
    active: Option<ActiveSession>,
    blocked: Option<String>,
}

impl ConversationEntry {
    fn new(transcript: TranscriptHandle) -> Self {
        Self {
            transcript,
            state: SessionState::Idle(IdleReason::New),
            active: None,
            blocked: None,
        }
    }

    fn is_current(&self, session: Uuid) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.id == session && !a.cancel.is_cancelled())
    }

    fn release(&mut self, reason: IdleReason) {
        self.active = None;
        self.state = SessionState::Idle(reason);
    }
}

type SessionTable = Arc<Mutex<HashMap<String, ConversationEntry>>>;

fn lock_table(table: &SessionTable) -> MutexGuard<'_, HashMap<String, ConversationEntry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the slot as cancelled if `submit` is dropped mid-turn
struct SessionGuard {
    table: SessionTable,
    conversation_id: String,
    session: Uuid,
    armed: bool,
}

impl SessionGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut table = lock_table(&self.table);
        if let Some(entry) = table.get_mut(&self.conversation_id) {
            if entry.active.as_ref().is_some_and(|a| a.id == self.session) {
                if let Some(active) = entry.active.take() {
                    active.cancel.cancel();
                }
                entry.transcript.update(|t| t.close_open().is_some());
                entry.release(IdleReason::Cancelled);
                tracing::debug!(
                    conversation = %self.conversation_id,
                    "Turn dropped before completion; session released"
                );
            }
        }
    }
}

enum Step {
    Continue,
    Failed(String),
    Cancelled,
}

/// Per-turn state that lives in the pumping task
struct Turn {
    conversation_id: String,
    session: Uuid,
    cancel: CancellationToken,
    query: String,
    assembler: TranscriptAssembler,
    finalizations: Vec<Finalization>,
}

/// Owner of every conversation's stream session
///
/// Clones share the same session table.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use notestream::backend::http::HttpBackend;
/// use notestream::session::{ControllerSettings, StreamController, TurnOutcome};
/// use notestream::storage::SqliteStore;
///
/// # async fn run() -> anyhow::Result<()> {
/// let backend = HttpBackend::new(
///     "http://127.0.0.1:8001/api/stream".parse()?,
///     Default::default(),
///     std::time::Duration::from_secs(10),
/// )?;
/// let controller = StreamController::new(
///     Arc::new(backend),
///     Arc::new(SqliteStore::new()?),
///     ControllerSettings::new("ada"),
/// );
///
/// let id = controller.open_conversation(None).await?;
/// if let TurnOutcome::Completed { .. } = controller.submit(&id, "What is osmosis?").await? {
///     let transcript = controller.transcript(&id).unwrap().snapshot();
///     println!("{}", transcript.last().unwrap().content);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StreamController {
    backend: Arc<dyn QaBackend>,
    store: Arc<dyn ConversationStore>,
    settings: ControllerSettings,
    conversations: SessionTable,
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("backend", &self.backend)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl StreamController {
    /// Creates a controller with no known conversations
    pub fn new(
        backend: Arc<dyn QaBackend>,
        store: Arc<dyn ConversationStore>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            backend,
            store,
            settings,
            conversations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Settings in effect
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// The conversation store
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConversationEntry>> {
        lock_table(&self.conversations)
    }

    /// Make a conversation known with an empty transcript.
    ///
    /// Returns the existing handle if the conversation is already known.
    pub fn register(&self, conversation_id: &str) -> TranscriptHandle {
        self.lock()
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationEntry::new(TranscriptHandle::new()))
            .transcript
            .clone()
    }

    /// Create a conversation in the store and greet the user.
    ///
    /// # Returns
    ///
    /// The new conversation id
    pub async fn open_conversation(&self, title: Option<&str>) -> Result<String> {
        let id = self
            .store
            .create_conversation(title.unwrap_or(DEFAULT_TITLE))
            .await?;

        if let Err(e) = self
            .store
            .append_message(&id, Role::Assistant, GREETING, 0)
            .await
        {
            tracing::warn!(conversation = %id, "Failed to persist greeting: {:#}", e);
        }

        let transcript = TranscriptHandle::with_transcript(Transcript::from_messages(vec![
            Message::assistant(GREETING),
        ]));
        self.lock()
            .insert(id.clone(), ConversationEntry::new(transcript));

        tracing::info!(conversation = %id, "Opened conversation");
        Ok(id)
    }

    /// Replace the local transcript with the stored messages.
    ///
    /// Accepts a full id or a unique prefix.
    ///
    /// # Returns
    ///
    /// The full conversation id
    ///
    /// # Errors
    ///
    /// `UnknownConversation` if the store has no match, `SessionBusy` if a
    /// turn is in flight for it.
    pub async fn load_conversation(&self, id: &str) -> Result<String> {
        let summary = self
            .store
            .find_conversation(id)
            .await?
            .ok_or_else(|| NotestreamError::UnknownConversation(id.to_string()))?;
        let messages = self.store.load_messages(&summary.id).await?;
        let transcript = Transcript::from_messages(messages);

        let mut table = self.lock();
        match table.get_mut(&summary.id) {
            Some(entry) if entry.state.is_active() => {
                return Err(NotestreamError::SessionBusy(summary.id.clone()).into());
            }
            Some(entry) => entry.transcript.replace(transcript),
            None => {
                table.insert(
                    summary.id.clone(),
                    ConversationEntry::new(TranscriptHandle::with_transcript(transcript)),
                );
            }
        }

        tracing::debug!(conversation = %summary.id, messages = summary.message_count, "Loaded conversation");
        Ok(summary.id)
    }

    /// Shared transcript of a known conversation
    pub fn transcript(&self, conversation_id: &str) -> Option<TranscriptHandle> {
        self.lock()
            .get(conversation_id)
            .map(|e| e.transcript.clone())
    }

    /// Session state of a known conversation
    pub fn state(&self, conversation_id: &str) -> Option<SessionState> {
        self.lock().get(conversation_id).map(|e| e.state)
    }

    /// True once a quota failure has blocked the conversation
    pub fn is_blocked(&self, conversation_id: &str) -> bool {
        self.lock()
            .get(conversation_id)
            .is_some_and(|e| e.blocked.is_some())
    }

    /// Cancel the conversation's in-flight turn.
    ///
    /// The open assistant message keeps its partial content and is closed.
    /// Frames of the cancelled session that arrive later are dropped.
    ///
    /// # Returns
    ///
    /// True if a turn was cancelled
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let mut table = self.lock();
        let Some(entry) = table.get_mut(conversation_id) else {
            return false;
        };
        let Some(active) = entry.active.take() else {
            return false;
        };

        active.cancel.cancel();
        entry.transcript.update(|t| t.close_open().is_some());
        entry.release(IdleReason::Cancelled);
        tracing::info!(conversation = %conversation_id, session = %active.id, "Cancelled turn");
        true
    }

    /// Cancel any in-flight turn and forget the conversation locally
    pub fn close_conversation(&self, conversation_id: &str) {
        self.cancel(conversation_id);
        self.lock().remove(conversation_id);
    }

    fn precheck(&self, conversation_id: &str) -> Result<()> {
        let table = self.lock();
        let entry = table
            .get(conversation_id)
            .ok_or_else(|| NotestreamError::UnknownConversation(conversation_id.to_string()))?;
        if let Some(reason) = &entry.blocked {
            return Err(NotestreamError::QuotaExceeded(reason.clone()).into());
        }
        if entry.state.is_active() {
            return Err(NotestreamError::SessionBusy(conversation_id.to_string()).into());
        }
        Ok(())
    }

    fn block(&self, conversation_id: &str, reason: &str) {
        if let Some(entry) = self.lock().get_mut(conversation_id) {
            entry.blocked = Some(reason.to_string());
        }
    }

    fn reserve(&self, conversation_id: &str, query: &str) -> Result<(Uuid, CancellationToken)> {
        let mut table = self.lock();
        let entry = table
            .get_mut(conversation_id)
            .ok_or_else(|| NotestreamError::UnknownConversation(conversation_id.to_string()))?;
        if entry.state.is_active() {
            return Err(NotestreamError::SessionBusy(conversation_id.to_string()).into());
        }

        let session = ActiveSession {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        };
        entry.active = Some(session.clone());
        entry.state = SessionState::Sending;
        entry.transcript.push(Message::user(query));

        Ok((session.id, session.cancel))
    }

    /// Submit one user turn and stream the reply into the transcript.
    ///
    /// Exactly one backend request is sent per accepted call. The returned
    /// future resolves once the turn is finished, failed or cancelled.
    ///
    /// # Errors
    ///
    /// Rejections before any side effect: `EmptyQuery`,
    /// `UnknownConversation`, `SessionBusy`, `QuotaExceeded` (blocked
    /// conversation or exhausted budget). After a completed stream,
    /// `QuotaExceeded` if recording its usage went over the limit; the
    /// conversation is blocked from then on.
    pub async fn submit(&self, conversation_id: &str, text: &str) -> Result<TurnOutcome> {
        let query = text.trim();
        if query.is_empty() {
            return Err(NotestreamError::EmptyQuery.into());
        }

        self.precheck(conversation_id)?;

        if self.settings.plan != Plan::Pro {
            if let Err(e) = self.store.check_quota(&self.settings.identity).await {
                if NotestreamError::is_quota_exceeded(&e) {
                    self.block(conversation_id, &e.to_string());
                    return Err(e);
                }
                tracing::warn!(conversation = %conversation_id, "Quota check failed: {:#}", e);
            }
        }

        let (session, cancel) = self.reserve(conversation_id, query)?;
        let mut guard = SessionGuard {
            table: Arc::clone(&self.conversations),
            conversation_id: conversation_id.to_string(),
            session,
            armed: true,
        };

        let turn = Turn {
            conversation_id: conversation_id.to_string(),
            session,
            cancel,
            query: query.to_string(),
            assembler: TranscriptAssembler::new(),
            finalizations: Vec::new(),
        };

        let span = tracing::info_span!("turn", conversation = %conversation_id, session = %session);
        let result = self.run_turn(turn).instrument(span).await;
        guard.disarm();
        result
    }

    async fn run_turn(&self, mut turn: Turn) -> Result<TurnOutcome> {
        let request = SubmitRequest {
            user_id: self.settings.identity.clone(),
            query: turn.query.clone(),
            chat_id: turn.conversation_id.clone(),
        };

        let idle = self.settings.idle_timeout;
        let response = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
            response = tokio::time::timeout(idle, self.backend.submit(&request)) => response,
        };

        let body = match response {
            Ok(Ok(body)) => body,
            Err(_) => {
                let e = NotestreamError::Timeout {
                    seconds: idle.as_secs(),
                };
                tracing::warn!("No response from backend: {}", e);
                return Ok(self.fail_turn(&mut turn, &e.to_string()));
            }
            Ok(Err(e)) => {
                tracing::warn!("Backend request failed: {:#}", e);
                return Ok(self.fail_turn(&mut turn, &e.to_string()));
            }
        };

        if !self.set_state(&turn, SessionState::Streaming) {
            return Ok(TurnOutcome::Cancelled);
        }
        tracing::debug!("Streaming response");

        match self.pump(&mut turn, body).await {
            Step::Continue => {}
            Step::Failed(reason) => return Ok(TurnOutcome::Failed { reason }),
            Step::Cancelled => return Ok(TurnOutcome::Cancelled),
        }

        if !self.set_state(&turn, SessionState::Finalizing) {
            return Ok(TurnOutcome::Cancelled);
        }
        self.finalize(&mut turn).await
    }

    /// Pull chunks until the body ends, the turn fails or it is cancelled
    async fn pump(&self, turn: &mut Turn, mut body: ByteStream) -> Step {
        let mut decoder = FrameDecoder::new();
        let idle = self.settings.idle_timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = turn.cancel.cancelled() => return Step::Cancelled,
                next = tokio::time::timeout(idle, body.next()) => next,
            };

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!("Response body failed: {:#}", e);
                    return self.step_failure(turn, &e.to_string());
                }
                Err(_) => {
                    let e = NotestreamError::Timeout {
                        seconds: idle.as_secs(),
                    };
                    tracing::warn!("{}", e);
                    return self.step_failure(turn, &e.to_string());
                }
            };

            for frame in decoder.feed(&chunk) {
                match self.apply_frame(turn, &frame) {
                    Step::Continue => {}
                    other => return other,
                }
            }
        }

        if let Some(frame) = decoder.flush() {
            return self.apply_frame(turn, &frame);
        }
        Step::Continue
    }

    fn step_failure(&self, turn: &mut Turn, reason: &str) -> Step {
        match self.fail_turn(turn, reason) {
            TurnOutcome::Failed { reason } => Step::Failed(reason),
            _ => Step::Cancelled,
        }
    }

    /// Parse one frame and apply it, unless the session is no longer current
    fn apply_frame(&self, turn: &mut Turn, frame: &str) -> Step {
        let Some(event) = parse_frame(frame) else {
            return Step::Continue;
        };
        tracing::trace!(kind = event.kind(), "Applying stream event");

        let failure = match &event {
            StreamEvent::Error { message } => Some(message.clone()),
            _ => None,
        };
        let changed = !matches!(event, StreamEvent::Ignored { .. });

        let mut table = self.lock();
        let Some(entry) = table.get_mut(&turn.conversation_id) else {
            return Step::Cancelled;
        };
        if !entry.is_current(turn.session) {
            tracing::debug!("Dropping {} event from a cancelled session", event.kind());
            return Step::Cancelled;
        }

        let assembler = &mut turn.assembler;
        let mut effects = Vec::new();
        entry.transcript.update(|t| {
            effects = assembler.apply(t, event);
            changed
        });
        turn.finalizations.extend(effects);

        match failure {
            Some(message) => {
                tracing::warn!("Backend reported an error: {}", message);
                entry.release(IdleReason::Failed);
                Step::Failed(message)
            }
            None => Step::Continue,
        }
    }

    /// Close the turn with a failure notice and release the slot
    fn fail_turn(&self, turn: &mut Turn, reason: &str) -> TurnOutcome {
        let mut table = self.lock();
        let Some(entry) = table.get_mut(&turn.conversation_id) else {
            return TurnOutcome::Cancelled;
        };
        if !entry.is_current(turn.session) {
            return TurnOutcome::Cancelled;
        }

        let assembler = &mut turn.assembler;
        entry.transcript.update(|t| {
            assembler.fail(t, reason);
            true
        });
        entry.release(IdleReason::Failed);

        TurnOutcome::Failed {
            reason: reason.to_string(),
        }
    }

    fn set_state(&self, turn: &Turn, state: SessionState) -> bool {
        let mut table = self.lock();
        match table.get_mut(&turn.conversation_id) {
            Some(entry) if entry.is_current(turn.session) => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }

    /// Close the reply, persist the turn once and release the slot
    async fn finalize(&self, turn: &mut Turn) -> Result<TurnOutcome> {
        let replies: Vec<String> = {
            let mut table = self.lock();
            let Some(entry) = table.get_mut(&turn.conversation_id) else {
                return Ok(TurnOutcome::Cancelled);
            };
            if !entry.is_current(turn.session) {
                return Ok(TurnOutcome::Cancelled);
            }
            let assembler = &mut turn.assembler;
            entry
                .transcript
                .update(|t| assembler.close(t).is_some());

            let snapshot = entry.transcript.snapshot();
            turn.assembler
                .produced()
                .iter()
                .filter_map(|id: &MessageId| snapshot.get(id).map(|m| m.content.clone()))
                .collect()
        };

        let mut title = None;
        let mut usage: Option<TokenUsage> = None;
        for effect in turn.finalizations.drain(..) {
            match effect {
                Finalization::UpdateTitle(t) => title = Some(t),
                Finalization::RecordUsage(u) => usage = Some(u),
            }
        }

        let store = &self.store;
        let conversation_id = turn.conversation_id.as_str();

        if let Err(e) = store
            .append_message(conversation_id, Role::User, &turn.query, 0)
            .await
        {
            tracing::warn!("Failed to persist user message: {:#}", e);
        }

        let tokens_used = usage.map(|u| u.total_tokens).unwrap_or(0);
        let last = replies.len().saturating_sub(1);
        for (i, reply) in replies.iter().enumerate() {
            let tokens = if i == last { tokens_used } else { 0 };
            if let Err(e) = store
                .append_message(conversation_id, Role::Assistant, reply, tokens)
                .await
            {
                tracing::warn!("Failed to persist assistant message: {:#}", e);
            }
        }

        if let Some(title) = &title {
            if let Err(e) = store.update_title(conversation_id, title).await {
                tracing::warn!("Failed to persist title: {:#}", e);
            }
        }

        let mut quota_error = None;
        match (&usage, self.settings.plan) {
            (Some(u), Plan::Free) => {
                if let Err(e) = store
                    .record_token_usage(&self.settings.identity, u)
                    .await
                {
                    if NotestreamError::is_quota_exceeded(&e) {
                        quota_error = Some(e);
                    } else {
                        tracing::warn!("Failed to record token usage: {:#}", e);
                    }
                }
            }
            (Some(_), Plan::Pro) => tracing::debug!("Pro plan; usage not recorded"),
            (None, _) => {}
        }

        {
            let mut table = self.lock();
            if let Some(entry) = table.get_mut(conversation_id) {
                if let Some(e) = &quota_error {
                    entry.blocked = Some(e.to_string());
                }
                if entry.active.as_ref().is_some_and(|a| a.id == turn.session) {
                    entry.release(IdleReason::Succeeded);
                }
            }
        }

        if let Some(e) = quota_error {
            tracing::warn!("Conversation blocked: {}", e);
            return Err(e);
        }

        tracing::info!(replies = replies.len(), "Turn completed");
        Ok(TurnOutcome::Completed { title, usage })
    }
}
