//! Conversation state behind one chat window.
//!
//! Each transition is split into a `begin_*` step that validates and records
//! the user's intent, and a `finish_*` step that applies the outcome of the
//! action call. Callers that share a session between tasks hold their lock
//! only around those steps, never across the call itself.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::{Actions, ChatReply, ConnectOutcome};
use crate::constants;
use crate::Message;

/// How long a failure banner stays visible.
pub const BANNER_TTL: Duration = Duration::from_secs(5);

/// Sessions untouched for this long are dropped from a [`SessionStore`].
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    AwaitingReply,
    Idle,
}

#[derive(Debug, Clone)]
pub struct ErrorBanner {
    pub text: String,
    pub raised_at: Instant,
}

impl ErrorBanner {
    pub fn is_visible(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.raised_at) < BANNER_TTL
    }
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    messages: Vec<Message>,
    phase: Phase,
    handle: Option<String>,
    social_data: Option<Value>,
    banner: Option<ErrorBanner>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            phase: Phase::Disconnected,
            handle: None,
            social_data: None,
            banner: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn social_data(&self) -> Option<&Value> {
        self.social_data.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.phase,
            Phase::Connected | Phase::AwaitingReply | Phase::Idle
        )
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.phase == Phase::AwaitingReply
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == Phase::Connecting
    }

    /// The banner text, if one was raised less than [`BANNER_TTL`] before `now`.
    pub fn banner(&self, now: Instant) -> Option<&str> {
        self.banner
            .as_ref()
            .filter(|banner| banner.is_visible(now))
            .map(|banner| banner.text.as_str())
    }

    pub fn clear_expired_banner(&mut self, now: Instant) {
        if self.banner.as_ref().is_some_and(|b| !b.is_visible(now)) {
            self.banner = None;
        }
    }

    /// Returns the handle to process, or `None` when nothing should happen.
    pub fn begin_connect(&mut self, handle: &str) -> Option<String> {
        let handle = handle.trim();
        if handle.is_empty() || self.phase != Phase::Disconnected {
            return None;
        }
        self.phase = Phase::Connecting;
        Some(handle.to_string())
    }

    pub fn finish_connect(&mut self, handle: String, result: Result<ConnectOutcome>, now: Instant) {
        match result {
            Ok(outcome) => {
                let lead = outcome
                    .message
                    .as_deref()
                    .unwrap_or(constants::CONNECTED_FALLBACK);
                self.messages.push(Message::assistant(format!(
                    "{} {}",
                    lead,
                    constants::CONNECTED_SUFFIX
                )));
                info!(%handle, "Instagram handle connected");
                self.handle = Some(handle);
                self.social_data = Some(outcome.data);
                self.banner = None;
                self.phase = Phase::Connected;
            }
            Err(e) => {
                warn!(%handle, "Failed to process Instagram data: {:#}", e);
                self.messages
                    .push(Message::assistant(constants::CONNECT_FAILED_REPLY));
                self.banner = Some(ErrorBanner {
                    text: constants::CONNECT_FAILED_BANNER.to_string(),
                    raised_at: now,
                });
                self.phase = Phase::Disconnected;
            }
        }
    }

    /// Continue without a handle.
    pub fn skip(&mut self) {
        if self.phase == Phase::Disconnected {
            self.phase = Phase::Connected;
        }
    }

    /// Go back to the connect screen. History is kept.
    pub fn reset(&mut self) {
        if self.phase == Phase::Connecting || self.phase == Phase::AwaitingReply {
            return;
        }
        self.handle = None;
        self.social_data = None;
        self.banner = None;
        self.phase = Phase::Disconnected;
    }

    /// Records the user's message and returns the query to send, or `None`
    /// when the input is blank, the session is not connected, or a reply is
    /// still pending.
    pub fn begin_submit(&mut self, input: &str) -> Option<String> {
        let query = input.trim();
        if query.is_empty() || !self.is_connected() || self.is_awaiting_reply() {
            return None;
        }
        self.messages.push(Message::user(query));
        self.phase = Phase::AwaitingReply;
        Some(query.to_string())
    }

    pub fn finish_submit(&mut self, result: Result<ChatReply>) {
        let content = match result {
            Ok(reply) => reply.response,
            Err(e) => {
                warn!("Chat reply failed: {:#}", e);
                constants::CHAT_FAILED_REPLY.to_string()
            }
        };
        self.messages.push(Message::assistant(content));
        self.phase = Phase::Idle;
    }

    /// Runs a full connect transition. Returns whether the session is now connected.
    pub async fn connect<A: Actions + ?Sized>(&mut self, actions: &A, handle: &str) -> bool {
        let Some(handle) = self.begin_connect(handle) else {
            return false;
        };
        let result = actions.process_identity(&handle).await;
        self.finish_connect(handle, result, Instant::now());
        self.is_connected()
    }

    /// Runs a full submit transition. Returns the assistant's reply, if a
    /// submission happened.
    pub async fn submit<A: Actions + ?Sized>(&mut self, actions: &A, input: &str) -> Option<&str> {
        let query = self.begin_submit(input)?;
        let result = actions.chat_reply(&query, self.social_data.as_ref()).await;
        self.finish_submit(result);
        self.messages.last().map(|m| m.content.as_str())
    }
}

#[derive(Debug)]
struct StoredSession {
    session: ChatSession,
    touched: Instant,
}

/// Chat sessions keyed by id. A session only exists once something has
/// changed it; looking one up never creates it.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<Uuid, StoredSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get_mut(&mut self, id: &Uuid, now: Instant) -> Option<&mut ChatSession> {
        self.sessions.get_mut(id).map(|stored| {
            stored.touched = now;
            &mut stored.session
        })
    }

    /// The session for `id`, created empty if absent. Idle sessions are
    /// swept first.
    pub fn get_or_create(&mut self, id: Uuid, now: Instant) -> &mut ChatSession {
        if !self.sessions.contains_key(&id) {
            self.sweep_idle(now);
            info!(%id, "Started chat session");
        }
        let stored = self.sessions.entry(id).or_insert_with(|| StoredSession {
            session: ChatSession::new(),
            touched: now,
        });
        stored.touched = now;
        &mut stored.session
    }

    /// Drops sessions untouched for [`SESSION_IDLE_TTL`]. Returns how many went.
    pub fn sweep_idle(&mut self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, stored| now.saturating_duration_since(stored.touched) < SESSION_IDLE_TTL);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            debug!(dropped, remaining = self.sessions.len(), "Dropped idle chat sessions");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedActions {
        fail: bool,
        connects: AtomicUsize,
        replies: AtomicUsize,
    }

    #[async_trait]
    impl Actions for ScriptedActions {
        async fn process_identity(&self, handle: &str) -> Result<ConnectOutcome> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("Backend request to /process_data failed with status 500");
            }
            Ok(ConnectOutcome::from_backend(json!({
                "message": format!("Data processed successfully for Instagram ID {}.", handle)
            })))
        }

        async fn chat_reply(&self, query: &str, _social_data: Option<&Value>) -> Result<ChatReply> {
            self.replies.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("Backend request to /process_query failed with status 500");
            }
            Ok(ChatReply::from_backend(json!({"message": format!("echo: {}", query)})))
        }
    }

    #[tokio::test]
    async fn test_connect_with_handle() {
        let actions = ScriptedActions::default();
        let mut session = ChatSession::new();

        assert!(session.connect(&actions, "natgeo").await);
        assert_eq!(session.phase(), Phase::Connected);
        assert_eq!(session.handle(), Some("natgeo"));
        assert_eq!(session.messages().len(), 1);
        assert_eq!(
            session.messages()[0].content,
            "Data processed successfully for Instagram ID natgeo. You can now ask specific questions about your content!"
        );
        assert!(session.social_data().is_some());
    }

    #[tokio::test]
    async fn test_empty_handle_does_nothing() {
        let actions = ScriptedActions::default();
        let mut session = ChatSession::new();

        assert!(!session.connect(&actions, "").await);
        assert!(!session.connect(&actions, "   ").await);
        assert_eq!(actions.connects.load(Ordering::SeqCst), 0);
        assert_eq!(session.phase(), Phase::Disconnected);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_raises_banner_that_expires() {
        let actions = ScriptedActions {
            fail: true,
            ..Default::default()
        };
        let mut session = ChatSession::new();

        assert!(!session.connect(&actions, "natgeo").await);
        assert_eq!(session.phase(), Phase::Disconnected);
        assert_eq!(
            session.messages().last().unwrap().content,
            constants::CONNECT_FAILED_REPLY
        );

        let raised_at = session.banner.as_ref().unwrap().raised_at;
        assert_eq!(
            session.banner(raised_at + Duration::from_secs(4)),
            Some(constants::CONNECT_FAILED_BANNER)
        );
        assert_eq!(session.banner(raised_at + BANNER_TTL), None);

        session.clear_expired_banner(raised_at + Duration::from_secs(1));
        assert!(session.banner.is_some());
        session.clear_expired_banner(raised_at + Duration::from_secs(6));
        assert!(session.banner.is_none());
    }

    #[tokio::test]
    async fn test_submit_appends_user_then_assistant() {
        let actions = ScriptedActions::default();
        let mut session = ChatSession::new();
        session.skip();

        let reply = session.submit(&actions, "  best time to post?  ").await;
        assert_eq!(reply, Some("echo: best time to post?"));
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0], Message::user("best time to post?"));
        assert_eq!(session.messages()[1].role, Role::Assistant);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_failed_submit_appends_apology() {
        let actions = ScriptedActions {
            fail: true,
            ..Default::default()
        };
        let mut session = ChatSession::new();
        session.skip();

        session.submit(&actions, "hello").await;
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].content, constants::CHAT_FAILED_REPLY);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn test_submit_rejected_while_awaiting_reply() {
        let mut session = ChatSession::new();
        session.skip();

        assert_eq!(session.begin_submit("first"), Some("first".to_string()));
        assert_eq!(session.begin_submit("second"), None);
        assert_eq!(session.messages().len(), 1);

        session.finish_submit(Ok(ChatReply::from_backend(json!({"message": "ok"}))));
        assert_eq!(session.begin_submit("second"), Some("second".to_string()));
    }

    #[test]
    fn test_submit_requires_connection() {
        let mut session = ChatSession::new();
        assert_eq!(session.begin_submit("hello"), None);
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_connect_ignored_once_connected() {
        let mut session = ChatSession::new();
        assert!(session.begin_connect("natgeo").is_some());
        assert!(session.is_connecting());
        assert_eq!(session.begin_connect("natgeo"), None);
    }

    #[tokio::test]
    async fn test_reset_keeps_history() {
        let actions = ScriptedActions::default();
        let mut session = ChatSession::new();
        session.connect(&actions, "natgeo").await;
        session.submit(&actions, "hi").await;

        session.reset();
        assert_eq!(session.phase(), Phase::Disconnected);
        assert!(session.handle().is_none());
        assert!(session.social_data().is_none());
        assert_eq!(session.messages().len(), 3);
    }

    #[test]
    fn test_store_creates_sessions_on_demand() {
        let mut store = SessionStore::new();
        let id = Uuid::new_v4();
        let now = Instant::now();

        assert!(store.get_mut(&id, now).is_none());
        assert!(store.is_empty());

        store.get_or_create(id, now).skip();
        assert_eq!(store.len(), 1);
        assert!(store.get_mut(&id, now).unwrap().is_connected());
    }

    #[test]
    fn test_store_sweeps_idle_sessions() {
        let mut store = SessionStore::new();
        let start = Instant::now();
        let stale = Uuid::new_v4();
        let active = Uuid::new_v4();
        store.get_or_create(stale, start);
        store.get_or_create(active, start);

        let later = start + SESSION_IDLE_TTL - Duration::from_secs(1);
        store.get_mut(&active, later);

        let after_ttl = start + SESSION_IDLE_TTL;
        let newcomer = Uuid::new_v4();
        store.get_or_create(newcomer, after_ttl);

        assert_eq!(store.len(), 2);
        assert!(store.get_mut(&stale, after_ttl).is_none());
        assert!(store.get_mut(&active, after_ttl).is_some());
        assert!(store.get_mut(&newcomer, after_ttl).is_some());
    }
}
