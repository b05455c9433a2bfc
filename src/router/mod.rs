//! Message router — the conversation state machine.
//!
//! Each inbound webhook invocation is classified once into a
//! [`Disposition`], executes exactly one transition, and produces the
//! outbound reply text. Collaborators (store, completion client,
//! outbound sender) are injected so the whole table is testable with
//! doubles.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channels::MessageSender;
use crate::conversation::{ActiveConversation, User};
use crate::error::RouterError;
use crate::llm::CompletionClient;
use crate::prompt::{self, PromptConfig, StyleDraws};
use crate::store::ConversationStore;

/// The keyword that opens a registration message.
pub const REGISTER_KEYWORD: &str = "register";

/// The channel tag Twilio prefixes onto WhatsApp addresses.
pub const CHANNEL_TAG: &str = "whatsapp:";

pub const NOT_REGISTERED_REPLY: &str = "You are not registered. To register, please start your message with 'register' followed by your details in this format:\n\n\
    'register, your name, your target user or client description.'\n\n\
    Example: 'register, John Doe, College students between 1st and 4th semester who struggle learning math.'\n\n\
    Please make sure your user description is well defined and correctly delimited (not everyone can be your user).";
pub const REGISTRATION_FORMAT_REPLY: &str =
    "Please provide all details in the format: register, Name, user description";
pub const REGISTRATION_FAILED_REPLY: &str = "Registration failed. Please try again.";
pub const REGISTRATION_OK_REPLY: &str = "Registration successful.";
pub const REMOVED_REPLY: &str =
    "Your registration and conversation have been removed. Send 'register' to start over.";
pub const RESET_REPLY: &str =
    "Conversation archived. Send any message to start a fresh interview.";
pub const EMPTY_FEEDBACK_REPLY: &str =
    "There is nothing to review yet. Run through some interview questions first, then send 'start feedback'.";
pub const COMPLETION_FAILED_REPLY: &str =
    "Sorry, I could not come up with a reply just now. Please try again.";

/// A control command, matched on the trimmed, lowercased body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Remove,
    Reset,
    StartFeedback,
    /// Anything else: a normal interview turn.
    Message,
}

impl Command {
    pub fn parse(body: &str) -> Self {
        match body.trim().to_lowercase().as_str() {
            "remove" => Self::Remove,
            "reset" => Self::Reset,
            "start feedback" => Self::StartFeedback,
            _ => Self::Message,
        }
    }
}

/// The derived mode for one inbound message, computed once per
/// invocation from the sender's records and the body.
#[derive(Debug)]
pub enum Disposition<'a> {
    /// Unknown sender, no registration keyword: guidance only.
    Unregistered,
    /// Unknown sender attempting to register.
    Registering,
    /// Known sender issuing a command or a normal turn.
    Command(&'a User, Command),
}

impl<'a> Disposition<'a> {
    pub fn classify(user: Option<&'a User>, body: &str) -> Self {
        match user {
            Some(user) => Self::Command(user, Command::parse(body)),
            None if body.to_lowercase().contains(REGISTER_KEYWORD) => Self::Registering,
            None => Self::Unregistered,
        }
    }
}

/// Parsed `register, <name>, <persona>` payload.
///
/// The persona may itself contain the delimiter; everything after the
/// second field is joined back together rather than truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub persona: String,
}

impl Registration {
    pub fn parse(body: &str) -> Option<Self> {
        let mut fields = body.split(',');
        let keyword = fields.next()?;
        if !keyword.to_lowercase().contains(REGISTER_KEYWORD) {
            return None;
        }

        let name = fields.next()?.trim().to_string();
        let rest: Vec<&str> = fields.collect();
        if rest.is_empty() {
            return None;
        }
        let persona = rest.join(",").trim().to_string();

        if name.is_empty() || persona.is_empty() {
            return None;
        }
        Some(Self { name, persona })
    }
}

/// The message router. One [`handle`](Self::handle) call per inbound
/// webhook; all state lives in the injected store.
pub struct MessageRouter {
    store: Arc<dyn ConversationStore>,
    llm: Arc<dyn CompletionClient>,
    sender: Arc<dyn MessageSender>,
    prompts: PromptConfig,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        llm: Arc<dyn CompletionClient>,
        sender: Arc<dyn MessageSender>,
        prompts: PromptConfig,
    ) -> Self {
        Self {
            store,
            llm,
            sender,
            prompts,
        }
    }

    /// Handle one inbound message and return the webhook reply body.
    pub async fn handle(&self, from: &str, body: &str) -> Result<String, RouterError> {
        let phone = from.strip_prefix(CHANNEL_TAG).unwrap_or(from);
        debug!(phone = %phone, "Inbound message");

        let user = self.store.get_user_by_phone(phone).await?;
        match Disposition::classify(user.as_ref(), body) {
            Disposition::Unregistered => {
                self.deliver(phone, NOT_REGISTERED_REPLY).await;
                Ok(String::new())
            }
            Disposition::Registering => self.register(phone, body).await,
            Disposition::Command(user, command) => {
                // Lazily materialized; persisted only when a turn lands,
                // so a same-message remove/reset nets out to no writes.
                let conversation = match self.store.get_active(user.id).await? {
                    Some(conversation) => conversation,
                    None => ActiveConversation::new(user.id),
                };

                match command {
                    Command::Remove => self.remove(user).await,
                    Command::Reset => self.reset(user).await,
                    Command::StartFeedback => {
                        self.feedback_turn(user, conversation, body).await
                    }
                    Command::Message => self.interview_turn(user, conversation, body).await,
                }
            }
        }
    }

    /// Registration: all-or-nothing; a malformed body or a store
    /// conflict leaves no partial user record.
    async fn register(&self, phone: &str, body: &str) -> Result<String, RouterError> {
        let Some(registration) = Registration::parse(body) else {
            return Ok(REGISTRATION_FORMAT_REPLY.to_string());
        };

        match self
            .store
            .create_user(phone, &registration.name, &registration.persona)
            .await
        {
            Ok(user) => {
                info!(user_id = %user.id, "User registered");
                self.deliver(phone, REGISTRATION_OK_REPLY).await;
                Ok(REGISTRATION_OK_REPLY.to_string())
            }
            Err(e) => {
                error!(error = %e, "Registration failed");
                Ok(REGISTRATION_FAILED_REPLY.to_string())
            }
        }
    }

    async fn remove(&self, user: &User) -> Result<String, RouterError> {
        self.store.remove_user(user.id).await?;
        info!(user_id = %user.id, "User and active conversation removed");
        self.deliver(&user.phone_number, REMOVED_REPLY).await;
        Ok(REMOVED_REPLY.to_string())
    }

    async fn reset(&self, user: &User) -> Result<String, RouterError> {
        let archived = self.store.archive_active(user.id).await?;
        info!(user_id = %user.id, archived, "Conversation reset");
        self.deliver(&user.phone_number, RESET_REPLY).await;
        Ok(RESET_REPLY.to_string())
    }

    async fn feedback_turn(
        &self,
        user: &User,
        mut conversation: ActiveConversation,
        body: &str,
    ) -> Result<String, RouterError> {
        if conversation.interview.is_empty() {
            self.deliver(&user.phone_number, EMPTY_FEEDBACK_REPLY).await;
            return Ok(EMPTY_FEEDBACK_REPLY.to_string());
        }

        let instruction = prompt::feedback_instruction(user, &conversation.interview);
        let Some(reply) = self.complete(body, &instruction).await else {
            self.deliver(&user.phone_number, COMPLETION_FAILED_REPLY).await;
            return Ok(String::new());
        };

        // The literal command text is the user turn; the pair goes to
        // the feedback transcript, never the interview one.
        conversation.feedback.push(body, reply.as_str());
        conversation.touch();
        self.store.save_active(&conversation).await?;

        self.deliver(&user.phone_number, &reply).await;
        Ok(reply)
    }

    async fn interview_turn(
        &self,
        user: &User,
        mut conversation: ActiveConversation,
        body: &str,
    ) -> Result<String, RouterError> {
        let draws = {
            let mut rng = rand::thread_rng();
            StyleDraws::sample(&mut rng, &self.prompts)
        };
        let instruction =
            prompt::interview_instruction(user, &conversation.interview, body, &draws, &self.prompts);

        let Some(reply) = self.complete(body, &instruction).await else {
            self.deliver(&user.phone_number, COMPLETION_FAILED_REPLY).await;
            return Ok(String::new());
        };

        conversation.interview.push(body, reply.as_str());
        conversation.touch();
        self.store.save_active(&conversation).await?;

        self.deliver(&user.phone_number, &reply).await;
        Ok(reply)
    }

    /// One best-effort completion call. Failures and empty replies both
    /// come back as `None`; no transcript entry is ever fabricated.
    async fn complete(&self, user_turn: &str, instruction: &str) -> Option<String> {
        match self.llm.complete(user_turn, instruction).await {
            Ok(Some(reply)) if !reply.trim().is_empty() => Some(reply),
            Ok(_) => {
                warn!("Completion returned an empty reply");
                None
            }
            Err(e) => {
                error!(error = %e, "Completion request failed");
                None
            }
        }
    }

    /// Best-effort outbound delivery; failures are logged, never rolled
    /// back into the invocation.
    async fn deliver(&self, to: &str, body: &str) {
        if let Err(e) = self.sender.send(to, body).await {
            warn!(to = %to, error = %e, "Outbound delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ChannelError, LlmError};
    use crate::store::LibSqlStore;

    // ── Doubles ─────────────────────────────────────────────────────

    /// Completion double that pops scripted outcomes in order, then
    /// falls back to a canned reply.
    struct ScriptedLlm {
        script: Mutex<VecDeque<Result<Option<String>, LlmError>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedLlm {
        fn always(reply: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::from([Ok(Some(reply.to_string()))])),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn scripted(script: Vec<Result<Option<String>, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedLlm {
        async fn complete(
            &self,
            user_turn: &str,
            system_instruction: &str,
        ) -> Result<Option<String>, LlmError> {
            self.calls
                .lock()
                .unwrap()
                .push((user_turn.to_string(), system_instruction.to_string()));
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(outcome) => {
                    // Keep replaying the last scripted outcome.
                    if script.is_empty() {
                        if let Ok(Some(reply)) = &outcome {
                            script.push_back(Ok(Some(reply.clone())));
                        }
                    }
                    outcome
                }
                None => Ok(Some("scripted reply".to_string())),
            }
        }
    }

    /// Sender double that records every delivery.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSender {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send(&self, to: &str, body: &str) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    /// Sender double whose deliveries always fail.
    struct FailingSender;

    #[async_trait]
    impl MessageSender for FailingSender {
        async fn send(&self, _to: &str, _body: &str) -> Result<(), ChannelError> {
            Err(ChannelError::SendFailed {
                channel: "whatsapp".to_string(),
                reason: "wire down".to_string(),
            })
        }
    }

    struct Harness {
        router: MessageRouter,
        store: Arc<LibSqlStore>,
        llm: Arc<ScriptedLlm>,
        sender: Arc<RecordingSender>,
    }

    async fn harness(llm: ScriptedLlm) -> Harness {
        let store = Arc::new(LibSqlStore::open_memory().await.unwrap());
        let llm = Arc::new(llm);
        let sender = Arc::new(RecordingSender::default());
        let router = MessageRouter::new(
            store.clone(),
            llm.clone(),
            sender.clone(),
            PromptConfig::default(),
        );
        Harness {
            router,
            store,
            llm,
            sender,
        }
    }

    async fn registered_harness(llm: ScriptedLlm) -> (Harness, User) {
        let h = harness(llm).await;
        h.router
            .handle("whatsapp:+100", "register, Ana Ruiz, first-year CS students")
            .await
            .unwrap();
        let user = h.store.get_user_by_phone("+100").await.unwrap().unwrap();
        (h, user)
    }

    // ── Pure parsing ────────────────────────────────────────────────

    #[test]
    fn command_matching_is_case_and_whitespace_insensitive() {
        assert_eq!(Command::parse("  ReSeT  "), Command::Reset);
        assert_eq!(Command::parse("REMOVE"), Command::Remove);
        assert_eq!(Command::parse("\tStart Feedback\n"), Command::StartFeedback);
        assert_eq!(Command::parse("reset please"), Command::Message);
        assert_eq!(Command::parse("tell me more"), Command::Message);
    }

    #[test]
    fn registration_parse_basic() {
        let parsed = Registration::parse("register, Ana Ruiz, first-year CS students").unwrap();
        assert_eq!(parsed.name, "Ana Ruiz");
        assert_eq!(parsed.persona, "first-year CS students");
    }

    #[test]
    fn registration_parse_preserves_delimited_persona() {
        let parsed =
            Registration::parse("register, Ana Ruiz, students, who, struggle, with, calculus")
                .unwrap();
        assert_eq!(parsed.name, "Ana Ruiz");
        assert_eq!(parsed.persona, "students, who, struggle, with, calculus");
    }

    #[test]
    fn registration_parse_rejects_missing_fields() {
        assert!(Registration::parse("register, Ana Ruiz").is_none());
        assert!(Registration::parse("register").is_none());
        assert!(Registration::parse("register, , students").is_none());
        assert!(Registration::parse("register, Ana Ruiz, ").is_none());
    }

    #[test]
    fn classify_computes_mode_once() {
        let user = User::new("+100", "Ana", "students");
        assert!(matches!(
            Disposition::classify(None, "hello"),
            Disposition::Unregistered
        ));
        assert!(matches!(
            Disposition::classify(None, "REGISTER, Ana, students"),
            Disposition::Registering
        ));
        assert!(matches!(
            Disposition::classify(Some(&user), "reset"),
            Disposition::Command(_, Command::Reset)
        ));
        assert!(matches!(
            Disposition::classify(Some(&user), "register, again, twice"),
            Disposition::Command(_, Command::Message)
        ));
    }

    // ── Transitions ─────────────────────────────────────────────────

    #[tokio::test]
    async fn unregistered_sender_gets_guidance_and_no_mutation() {
        let h = harness(ScriptedLlm::always("hi")).await;

        let reply = h.router.handle("whatsapp:+100", "hello").await.unwrap();

        assert_eq!(reply, "");
        assert!(h.store.get_user_by_phone("+100").await.unwrap().is_none());
        let sent = h.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+100");
        assert!(sent[0].1.contains("not registered"));
        assert!(h.llm.calls().is_empty());
    }

    #[tokio::test]
    async fn registration_creates_user_and_confirms() {
        let h = harness(ScriptedLlm::always("hi")).await;

        let reply = h
            .router
            .handle("whatsapp:+100", "register, Ana Ruiz, first-year CS students")
            .await
            .unwrap();

        assert_eq!(reply, REGISTRATION_OK_REPLY);
        let user = h.store.get_user_by_phone("+100").await.unwrap().unwrap();
        assert_eq!(user.name, "Ana Ruiz");
        assert_eq!(user.persona, "first-year CS students");
        assert_eq!(h.sender.sent().last().unwrap().1, REGISTRATION_OK_REPLY);
    }

    #[tokio::test]
    async fn malformed_registration_returns_format_help() {
        let h = harness(ScriptedLlm::always("hi")).await;

        let reply = h
            .router
            .handle("whatsapp:+100", "register Ana Ruiz")
            .await
            .unwrap();

        assert_eq!(reply, REGISTRATION_FORMAT_REPLY);
        assert!(h.store.get_user_by_phone("+100").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn registered_sender_saying_register_is_a_normal_turn() {
        let (h, user) = registered_harness(ScriptedLlm::always("sure, ask away")).await;

        let reply = h
            .router
            .handle("whatsapp:+100", "register, Someone Else, other users")
            .await
            .unwrap();

        // No re-registration; the body lands in the interview transcript.
        assert_eq!(reply, "sure, ask away");
        let loaded = h.store.get_user_by_phone("+100").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Ana Ruiz");
        let conversation = h.store.get_active(user.id).await.unwrap().unwrap();
        assert_eq!(conversation.interview.len(), 1);
    }

    #[tokio::test]
    async fn interview_turn_appends_and_persists() {
        let (h, user) = registered_harness(ScriptedLlm::always("hello there")).await;

        let reply = h.router.handle("whatsapp:+100", "hi").await.unwrap();

        assert_eq!(reply, "hello there");
        let conversation = h.store.get_active(user.id).await.unwrap().unwrap();
        assert_eq!(conversation.interview.len(), 1);
        assert!(conversation.feedback.is_empty());
        let turn = conversation.interview.last().unwrap();
        assert_eq!(turn.user, "hi");
        assert_eq!(turn.bot, "hello there");
        assert_eq!(h.sender.sent().last().unwrap().1, "hello there");
    }

    #[tokio::test]
    async fn completion_failure_leaves_no_transcript_entry() {
        let (h, user) = registered_harness(ScriptedLlm::scripted(vec![Err(
            LlmError::RequestFailed {
                provider: "gemini".to_string(),
                reason: "upstream 500".to_string(),
            },
        )]))
        .await;

        let reply = h.router.handle("whatsapp:+100", "hi").await.unwrap();

        assert_eq!(reply, "");
        assert!(h.store.get_active(user.id).await.unwrap().is_none());
        assert_eq!(h.sender.sent().last().unwrap().1, COMPLETION_FAILED_REPLY);
    }

    #[tokio::test]
    async fn empty_completion_is_treated_as_failure() {
        let (h, user) = registered_harness(ScriptedLlm::scripted(vec![Ok(None)])).await;

        let reply = h.router.handle("whatsapp:+100", "hi").await.unwrap();

        assert_eq!(reply, "");
        assert!(h.store.get_active(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_archives_snapshot_and_clears_active() {
        let (h, user) = registered_harness(ScriptedLlm::always("hello")).await;
        h.router.handle("whatsapp:+100", "hi").await.unwrap();
        let before = h.store.get_active(user.id).await.unwrap().unwrap();

        let reply = h.router.handle("whatsapp:+100", "reset").await.unwrap();

        assert_eq!(reply, RESET_REPLY);
        assert!(h.store.get_active(user.id).await.unwrap().is_none());
        let previous = h.store.list_previous(user.id).await.unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].interview, before.interview);
        assert_eq!(previous[0].feedback, before.feedback);
    }

    #[tokio::test]
    async fn reset_with_no_history_is_a_persisted_noop() {
        let (h, user) = registered_harness(ScriptedLlm::always("hello")).await;

        let reply = h.router.handle("whatsapp:+100", "  RESET ").await.unwrap();

        assert_eq!(reply, RESET_REPLY);
        assert!(h.store.get_active(user.id).await.unwrap().is_none());
        assert!(h.store.list_previous(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_deletes_user_and_active_keeps_archive() {
        let (h, user) = registered_harness(ScriptedLlm::always("hello")).await;
        h.router.handle("whatsapp:+100", "hi").await.unwrap();
        h.router.handle("whatsapp:+100", "reset").await.unwrap();
        h.router.handle("whatsapp:+100", "hi again").await.unwrap();

        let reply = h.router.handle("whatsapp:+100", "Remove").await.unwrap();

        assert_eq!(reply, REMOVED_REPLY);
        assert!(h.store.get_user_by_phone("+100").await.unwrap().is_none());
        assert!(h.store.get_active(user.id).await.unwrap().is_none());
        assert_eq!(h.store.list_previous(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_from_unknown_sender_is_the_unregistered_path() {
        let h = harness(ScriptedLlm::always("hello")).await;

        let reply = h.router.handle("whatsapp:+404", "remove").await.unwrap();

        assert_eq!(reply, "");
        assert!(h.sender.sent()[0].1.contains("not registered"));
    }

    #[tokio::test]
    async fn start_feedback_appends_to_feedback_only() {
        let (h, user) = registered_harness(ScriptedLlm::always("hello")).await;
        h.router.handle("whatsapp:+100", "hi").await.unwrap();

        let reply = h
            .router
            .handle("whatsapp:+100", "start feedback")
            .await
            .unwrap();

        assert_eq!(reply, "hello");
        let conversation = h.store.get_active(user.id).await.unwrap().unwrap();
        assert_eq!(conversation.interview.len(), 1);
        assert_eq!(conversation.feedback.len(), 1);
        let turn = conversation.feedback.last().unwrap();
        assert_eq!(turn.user, "start feedback");

        // The feedback instruction carries the whole interview.
        let (_, instruction) = h.llm.calls().last().unwrap().clone();
        assert!(instruction.contains("Mom Test"));
        assert!(instruction.contains("hi"));
    }

    #[tokio::test]
    async fn start_feedback_with_empty_interview_is_rejected() {
        let (h, user) = registered_harness(ScriptedLlm::always("hello")).await;

        let reply = h
            .router
            .handle("whatsapp:+100", "start feedback")
            .await
            .unwrap();

        assert_eq!(reply, EMPTY_FEEDBACK_REPLY);
        assert!(h.store.get_active(user.id).await.unwrap().is_none());
        assert!(h.llm.calls().is_empty());
    }

    #[tokio::test]
    async fn channel_tag_is_stripped_from_sender() {
        let h = harness(ScriptedLlm::always("hello")).await;
        h.router
            .handle("whatsapp:+100", "register, Ana, students")
            .await
            .unwrap();

        // Same sender without the tag resolves to the same user.
        let reply = h.router.handle("+100", "hi").await.unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn delivery_failure_does_not_lose_the_exchange() {
        let store = Arc::new(LibSqlStore::open_memory().await.unwrap());
        let llm = Arc::new(ScriptedLlm::always("hello"));
        let router = MessageRouter::new(
            store.clone(),
            llm,
            Arc::new(FailingSender),
            PromptConfig::default(),
        );

        router
            .handle("whatsapp:+100", "register, Ana, students")
            .await
            .unwrap();
        let user = store.get_user_by_phone("+100").await.unwrap().unwrap();

        let reply = router.handle("whatsapp:+100", "hi").await.unwrap();

        // The reply and the persisted record stand even though delivery failed.
        assert_eq!(reply, "hello");
        let conversation = store.get_active(user.id).await.unwrap().unwrap();
        assert_eq!(conversation.interview.len(), 1);
    }

    #[tokio::test]
    async fn interview_instruction_reaches_the_llm_with_persona() {
        let (h, _user) = registered_harness(ScriptedLlm::always("hello")).await;

        h.router.handle("whatsapp:+100", "hi").await.unwrap();

        let (turn, instruction) = h.llm.calls().last().unwrap().clone();
        assert_eq!(turn, "hi");
        assert!(instruction.contains("first-year CS students"));
        assert!(instruction.contains("Ana Ruiz"));
    }
}
