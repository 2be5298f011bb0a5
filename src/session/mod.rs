mod state;

pub use state::{ derive_title, Notice, SessionState, MAX_NOTICES, TITLE_ELLIPSIS, TITLE_MAX_CHARS };

use chrono::Utc;
use log::{ debug, info, warn };
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{ self, UnboundedReceiver, UnboundedSender };
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::chat::{ ChatHistorySummary, ChatId, Message, MessageId, Section };
use crate::remote::{ ClientError, CompletionClient, HistoryClient };

pub const API_ERROR_FALLBACK: &str =
    "An error occurred while processing the request. Check the API key settings.";
pub const NETWORK_ERROR_FALLBACK: &str = "Could not reach the server. Please try again later.";

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    /// Pause between the first reply of an unsaved conversation and its save.
    pub save_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            save_delay: DEFAULT_SAVE_DELAY,
        }
    }
}

/// Results of background work, fed back into the controller.
#[derive(Debug)]
pub enum SessionEvent {
    CompletionFinished {
        generation: u64,
        trigger: MessageId,
        result: Result<String, ClientError>,
    },
    SaveDue {
        generation: u64,
    },
    SaveFinished {
        generation: u64,
        result: Result<ChatId, ClientError>,
    },
    HistoryLoaded(Result<Vec<ChatHistorySummary>, ClientError>),
    ChatLoaded {
        request: u64,
        id: ChatId,
        result: Result<Vec<Message>, ClientError>,
    },
}

/// The text to show for a finished completion call, and whether it was an
/// actual reply rather than an error stand-in.
pub fn reply_content(result: Result<String, ClientError>) -> (String, bool) {
    match result {
        Ok(message) => (message, true),
        Err(ClientError::Api { message: Some(text), .. }) => (text, false),
        Err(e) if e.is_transport() => (NETWORK_ERROR_FALLBACK.to_string(), false),
        Err(_) => (API_ERROR_FALLBACK.to_string(), false),
    }
}

/// Owns one session's state and coordinates the remote collaborators.
///
/// Operations never wait on the network. Each remote call runs on its own
/// task and reports back as a [`SessionEvent`]; the owner pulls events with
/// [`next_event`](Self::next_event) and hands them to [`apply`](Self::apply),
/// so all state changes happen on the owning task.
///
/// Work tied to the visible conversation (completions, the deferred save,
/// saves in flight) runs under a conversation-scoped cancellation token that
/// is replaced whenever another conversation takes its place. Everything is
/// cancelled when the controller is dropped.
pub struct SessionController {
    id: String,
    state: SessionState,
    completion: Arc<dyn CompletionClient>,
    history: Arc<dyn HistoryClient>,
    options: SessionOptions,
    events_tx: UnboundedSender<SessionEvent>,
    events_rx: UnboundedReceiver<SessionEvent>,
    lifetime: CancellationToken,
    conversation: CancellationToken,
    generation: u64,
    load_request: u64,
    save_scheduled: bool,
    saving: bool,
}

impl SessionController {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        history: Arc<dyn HistoryClient>,
        options: SessionOptions
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let lifetime = CancellationToken::new();
        let conversation = lifetime.child_token();
        Self {
            id: Uuid::new_v4().to_string(),
            state: SessionState::default(),
            completion,
            history,
            options,
            events_tx,
            events_rx,
            lifetime,
            conversation,
            generation: 0,
            load_request: 0,
            save_scheduled: false,
            saving: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn save_pending(&self) -> bool {
        self.save_scheduled || self.saving
    }

    fn spawn_scoped<F>(&self, token: CancellationToken, work: F)
        where F: Future<Output = SessionEvent> + Send + 'static
    {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                event = work => {
                    let _ = tx.send(event);
                }
            }
        });
    }

    fn renew_conversation_scope(&mut self) {
        self.conversation.cancel();
        self.conversation = self.lifetime.child_token();
        self.generation += 1;
        self.save_scheduled = false;
        self.saving = false;
    }

    pub fn navigate(&mut self, section: Section) {
        self.state.section = section;
    }

    pub fn toggle_sidebar(&mut self) {
        self.state.sidebar_open = !self.state.sidebar_open;
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.state.input = text.into();
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        self.state.dismiss_notice(id)
    }

    /// Sends `text` as the next user turn. Returns false when nothing was
    /// sent: blank text, or a send is still outstanding.
    pub fn send_message(&mut self, text: &str) -> bool {
        let Some((trigger, messages)) = self.state.begin_send(text, Utc::now()) else {
            debug!("Session {}: send ignored (blank or already loading)", self.id);
            return false;
        };
        info!("Session {}: sending conversation of {} messages", self.id, messages.len());

        let client = Arc::clone(&self.completion);
        let model = self.options.model.clone();
        let generation = self.generation;
        self.spawn_scoped(self.conversation.clone(), async move {
            let result = client.complete(&messages, &model).await;
            SessionEvent::CompletionFinished { generation, trigger, result }
        });
        true
    }

    /// Sends whatever is in the input buffer.
    pub fn send_input(&mut self) -> bool {
        let text = self.state.input.clone();
        self.send_message(&text)
    }

    pub fn load_history(&mut self) {
        let client = Arc::clone(&self.history);
        self.spawn_scoped(self.lifetime.clone(), async move {
            SessionEvent::HistoryLoaded(client.list_chats().await)
        });
    }

    /// Fetches a stored chat to replace the visible conversation. Only the
    /// most recent request counts; a new chat in the meantime voids it.
    pub fn load_chat(&mut self, id: ChatId) {
        info!("Session {}: loading chat {}", self.id, id);
        self.load_request += 1;
        let request = self.load_request;
        let client = Arc::clone(&self.history);
        self.spawn_scoped(self.lifetime.clone(), async move {
            let result = client.fetch_chat(&id).await;
            SessionEvent::ChatLoaded { request, id, result }
        });
    }

    /// Persists the current conversation. Returns false without touching the
    /// network when there is nothing to save or a save is already running.
    pub fn save_current_chat(&mut self) -> bool {
        let Some(title) = self.state.conversation_title() else {
            debug!("Session {}: nothing to save", self.id);
            return false;
        };
        if self.saving {
            debug!("Session {}: save already in flight", self.id);
            return false;
        }
        self.saving = true;

        let messages = self.state.wire_messages();
        let client = Arc::clone(&self.history);
        let generation = self.generation;
        info!("Session {}: saving '{}' ({} messages)", self.id, title, messages.len());
        self.spawn_scoped(self.conversation.clone(), async move {
            let result = client.save_chat(&title, &messages).await;
            SessionEvent::SaveFinished { generation, result }
        });
        true
    }

    pub fn start_new_chat(&mut self) {
        info!("Session {}: starting a new chat", self.id);
        self.load_request += 1;
        self.renew_conversation_scope();
        self.state.reset_conversation();
    }

    fn schedule_save(&mut self) {
        if self.save_pending() {
            return;
        }
        self.save_scheduled = true;
        let delay = self.options.save_delay;
        let generation = self.generation;
        debug!("Session {}: save scheduled in {:?}", self.id, delay);
        self.spawn_scoped(self.conversation.clone(), async move {
            tokio::time::sleep(delay).await;
            SessionEvent::SaveDue { generation }
        });
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Waits for one background result and applies it.
    pub async fn process_next_event(&mut self) -> bool {
        match self.next_event().await {
            Some(event) => {
                self.apply(event);
                true
            }
            None => false,
        }
    }

    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::CompletionFinished { generation, trigger, result } => {
                if generation != self.generation {
                    debug!("Session {}: dropping reply for a replaced conversation", self.id);
                    return;
                }
                if let Err(e) = &result {
                    warn!("Session {}: completion failed: {}", self.id, e);
                }
                let (content, replied) = reply_content(result);
                self.state.finish_send(&trigger, content, Utc::now());
                if replied && self.state.current_chat_id.is_none() {
                    self.schedule_save();
                }
            }
            SessionEvent::SaveDue { generation } => {
                if generation != self.generation {
                    return;
                }
                self.save_scheduled = false;
                if self.state.current_chat_id.is_some() {
                    debug!("Session {}: chat already saved, skipping deferred save", self.id);
                    return;
                }
                self.save_current_chat();
            }
            SessionEvent::SaveFinished { generation, result } => {
                if generation != self.generation {
                    debug!("Session {}: dropping save result for a replaced conversation", self.id);
                    return;
                }
                self.saving = false;
                match result {
                    Ok(chat_id) => {
                        info!("Session {}: conversation saved as chat {}", self.id, chat_id);
                        self.state.current_chat_id = Some(chat_id);
                        self.load_history();
                    }
                    Err(e) => {
                        warn!("Session {}: failed to save chat: {}", self.id, e);
                        self.state.push_notice(format!("Could not save the conversation: {}", e));
                    }
                }
            }
            SessionEvent::HistoryLoaded(result) => {
                match result {
                    Ok(chats) => {
                        debug!("Session {}: history holds {} chats", self.id, chats.len());
                        self.state.history = chats;
                    }
                    Err(e) => {
                        warn!("Session {}: failed to load chat history: {}", self.id, e);
                        self.state.push_notice(format!("Could not load chat history: {}", e));
                    }
                }
            }
            SessionEvent::ChatLoaded { request, id, result } => {
                if request != self.load_request {
                    debug!("Session {}: dropping superseded load of chat {}", self.id, id);
                    return;
                }
                match result {
                    Ok(messages) => {
                        self.renew_conversation_scope();
                        self.state.replace_conversation(id, messages);
                    }
                    Err(e) => {
                        warn!("Session {}: failed to load chat {}: {}", self.id, id, e);
                        self.state.push_notice(format!("Could not open chat {}: {}", id, e));
                    }
                }
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use crate::models::chat::{ Role, WireMessage };

    fn decode_error() -> ClientError {
        ClientError::Decode(serde_json::from_str::<serde_json::Value>("{").unwrap_err())
    }

    #[derive(Default)]
    struct ScriptedCompletion {
        replies: Mutex<VecDeque<Result<String, ClientError>>>,
        calls: Mutex<Vec<(Vec<WireMessage>, String)>>,
    }

    impl ScriptedCompletion {
        fn with(replies: Vec<Result<String, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn complete(
            &self,
            messages: &[WireMessage],
            model: &str
        ) -> Result<String, ClientError> {
            self.calls.lock().unwrap().push((messages.to_vec(), model.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    #[derive(Default)]
    struct MemoryHistory {
        saves: AtomicUsize,
        lists: AtomicUsize,
        fail_list: bool,
        saved_titles: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HistoryClient for MemoryHistory {
        async fn list_chats(&self) -> Result<Vec<ChatHistorySummary>, ClientError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            if self.fail_list {
                return Err(ClientError::Api { status: 500, message: Some("db down".into()) });
            }
            Ok(vec![ChatHistorySummary {
                id: ChatId::new("1"),
                title: "saved".into(),
                last_message: "bye".into(),
                date: DateTime::<Utc>::UNIX_EPOCH,
            }])
        }

        async fn fetch_chat(&self, _id: &ChatId) -> Result<Vec<Message>, ClientError> {
            Ok(vec![Message {
                id: MessageId::from("10".to_string()),
                content: "stored question".into(),
                role: Role::User,
                timestamp: DateTime::<Utc>::UNIX_EPOCH,
            }])
        }

        async fn save_chat(
            &self,
            title: &str,
            _messages: &[WireMessage]
        ) -> Result<ChatId, ClientError> {
            let n = self.saves.fetch_add(1, Ordering::SeqCst);
            self.saved_titles.lock().unwrap().push(title.to_string());
            Ok(ChatId::new(format!("{}", 100 + n)))
        }
    }

    fn controller(
        completion: Arc<ScriptedCompletion>,
        history: Arc<MemoryHistory>
    ) -> SessionController {
        SessionController::new(completion, history, SessionOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn reply_is_appended_and_loading_cleared() {
        let completion = ScriptedCompletion::with(vec![Ok("hello".into())]);
        let mut session = controller(completion.clone(), Arc::default());

        session.set_input("hi");
        assert!(session.send_input());
        assert!(session.state().loading);
        assert_eq!(session.state().input, "");

        assert!(session.process_next_event().await);
        let state = session.state();
        assert!(!state.loading);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].role, Role::Assistant);
        assert_eq!(state.messages[1].content, "hello");

        let calls = completion.calls.lock().unwrap();
        assert_eq!(calls[0].1, DEFAULT_MODEL);
        assert_eq!(calls[0].0, vec![WireMessage { role: Role::User, content: "hi".into() }]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_send_while_loading_is_ignored() {
        let completion = ScriptedCompletion::with(vec![Ok("one".into())]);
        let mut session = controller(completion.clone(), Arc::default());

        assert!(session.send_message("first"));
        assert!(!session.send_message("second"));
        assert!(!session.send_message("   "));
        assert_eq!(session.state().messages.len(), 1);

        session.process_next_event().await;
        assert_eq!(completion.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn error_replies_map_to_distinct_fallbacks() {
        let api = reply_content(Err(ClientError::Api { status: 200, message: None }));
        let network = reply_content(Err(decode_error()));
        let remote = reply_content(
            Err(ClientError::Api { status: 500, message: Some("key missing".into()) })
        );
        assert_eq!(api, (API_ERROR_FALLBACK.to_string(), false));
        assert_eq!(network, (NETWORK_ERROR_FALLBACK.to_string(), false));
        assert_eq!(remote, ("key missing".to_string(), false));
        assert_ne!(API_ERROR_FALLBACK, NETWORK_ERROR_FALLBACK);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_still_clears_loading_and_skips_save() {
        let completion = ScriptedCompletion::with(vec![Err(decode_error())]);
        let history = Arc::new(MemoryHistory::default());
        let mut session = controller(completion, history.clone());

        session.send_message("hi");
        session.process_next_event().await;
        assert!(!session.state().loading);
        assert_eq!(session.state().messages[1].content, NETWORK_ERROR_FALLBACK);
        assert!(!session.save_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(session.try_next_event().is_none());
        assert_eq!(history.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_reply_triggers_deferred_save_and_history_refresh() {
        let completion = ScriptedCompletion::with(vec![Ok("hello".into())]);
        let history = Arc::new(MemoryHistory::default());
        let mut session = controller(completion, history.clone());

        session.send_message(&"q".repeat(60));
        session.process_next_event().await; // reply
        assert!(session.save_pending());
        session.process_next_event().await; // save due
        session.process_next_event().await; // saved
        assert_eq!(session.state().current_chat_id, Some(ChatId::new("100")));
        session.process_next_event().await; // history

        assert_eq!(session.state().history.len(), 1);
        assert_eq!(history.saves.load(Ordering::SeqCst), 1);
        assert_eq!(
            history.saved_titles.lock().unwrap()[0],
            format!("{}...", "q".repeat(50))
        );

        // Later replies on a saved chat do not save again.
        session.send_message("more");
        session.process_next_event().await;
        assert!(!session.save_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn new_chat_cancels_pending_save() {
        let completion = ScriptedCompletion::with(vec![Ok("hello".into())]);
        let history = Arc::new(MemoryHistory::default());
        let mut session = controller(completion, history.clone());

        session.navigate(Section::About);
        session.send_message("hi");
        session.process_next_event().await;
        assert!(session.save_pending());

        session.start_new_chat();
        assert!(session.state().messages.is_empty());
        assert_eq!(session.state().section, Section::Chat);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(session.try_next_event().is_none());
        assert_eq!(history.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reply_does_not_leak_into_new_chat() {
        let mut session = controller(ScriptedCompletion::with(vec![]), Arc::default());
        session.send_message("hi");
        let stale = session.next_event().await.unwrap();

        session.start_new_chat();
        assert!(!session.state().loading);
        session.apply(stale);
        assert!(session.state().messages.is_empty());
    }

    #[tokio::test]
    async fn save_without_messages_is_a_no_op() {
        let history = Arc::new(MemoryHistory::default());
        let mut session = controller(ScriptedCompletion::with(vec![]), history.clone());
        assert!(!session.save_current_chat());
        assert!(session.try_next_event().is_none());
        assert_eq!(history.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn load_chat_replaces_messages_and_shows_chat() {
        let mut session = controller(ScriptedCompletion::with(vec![]), Arc::default());
        session.send_message("old");
        session.process_next_event().await;
        assert_eq!(session.state().messages.len(), 2);

        session.navigate(Section::History);
        session.load_chat(ChatId::new("9"));
        session.process_next_event().await;

        let state = session.state();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "stored question");
        assert_eq!(state.current_chat_id, Some(ChatId::new("9")));
        assert_eq!(state.section, Section::Chat);
        assert!(!session.save_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_save_supersedes_deferred_save() {
        let completion = ScriptedCompletion::with(vec![Ok("hello".into())]);
        let history = Arc::new(MemoryHistory::default());
        let mut session = controller(completion, history.clone());

        session.send_message("hi");
        session.process_next_event().await;
        assert!(session.save_pending());

        assert!(session.save_current_chat());
        session.process_next_event().await; // saved
        assert_eq!(session.state().current_chat_id, Some(ChatId::new("100")));

        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Some(event) = session.try_next_event() {
            session.apply(event);
        }
        assert_eq!(history.saves.load(Ordering::SeqCst), 1);
        assert_eq!(session.state().current_chat_id, Some(ChatId::new("100")));
        assert!(!session.save_pending());
    }

    #[tokio::test]
    async fn new_chat_voids_an_outstanding_load() {
        let mut session = controller(ScriptedCompletion::with(vec![]), Arc::default());
        session.load_chat(ChatId::new("9"));
        session.start_new_chat();

        let loaded = session.next_event().await.unwrap();
        session.apply(loaded);
        assert!(session.state().messages.is_empty());
        assert!(session.state().current_chat_id.is_none());
    }

    #[tokio::test]
    async fn latest_load_wins_when_results_arrive_out_of_order() {
        let mut session = controller(ScriptedCompletion::with(vec![]), Arc::default());
        session.load_chat(ChatId::new("1"));
        let older = session.next_event().await.unwrap();
        session.load_chat(ChatId::new("2"));
        let newer = session.next_event().await.unwrap();

        session.apply(newer);
        session.apply(older);
        assert_eq!(session.state().current_chat_id, Some(ChatId::new("2")));
    }

    #[tokio::test]
    async fn history_failure_keeps_list_and_raises_notice() {
        let history = Arc::new(MemoryHistory { fail_list: true, ..Default::default() });
        let mut session = controller(ScriptedCompletion::with(vec![]), history);

        session.load_history();
        session.process_next_event().await;
        assert!(session.state().history.is_empty());
        assert_eq!(session.state().notices.len(), 1);
        assert!(session.state().notices[0].text.contains("db down"));

        let notice = session.state().notices[0].id;
        assert!(session.dismiss_notice(notice));
        assert!(session.state().notices.is_empty());
    }

    #[test]
    fn sidebar_toggles() {
        let mut session = controller(ScriptedCompletion::with(vec![]), Arc::default());
        assert!(session.state().sidebar_open);
        session.toggle_sidebar();
        assert!(!session.state().sidebar_open);
    }
}
