//! Recording fakes for the Bot API and the agent, plus a harness wiring them
//! into a handler and connection manager over temp storage.

use crate::agent::AgentClient;
use crate::config::Secret;
use crate::error::{AgentError, TelegramError};
use crate::gateway::AppState;
use crate::relay::{CommandHandler, ConnectionManager, HandlerSettings};
use crate::store::{MemorySessionStore, SessionStore, UserConfig, UserConfigStore};
use crate::telegram::types::{Chat, Message, User};
use crate::telegram::{BotApi, BotUser, ParseMode, SentMessage, Update, WebhookInfo};
use crate::templates::MessageTemplates;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

pub const SERVER: &str = "https://relay.example.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub bot_token: String,
    pub chat_id: String,
    pub text: String,
    pub parse_mode: Option<ParseMode>,
}

/// In-memory Bot API. Every call is recorded by method name.
#[derive(Default)]
pub struct FakeBot {
    calls: Mutex<Vec<&'static str>>,
    sent: Mutex<Vec<SentCall>>,
    /// Registered webhook URL per bot token.
    webhooks: Mutex<HashMap<String, String>>,
    next_message_id: AtomicI64,
    reject_get_me: bool,
    reject_send: bool,
    reject_webhook: bool,
}

impl FakeBot {
    /// `getMe` fails as for an invalid token.
    pub fn rejecting_get_me() -> Self {
        Self {
            reject_get_me: true,
            ..Default::default()
        }
    }

    /// `sendMessage` fails as for an unknown chat.
    pub fn rejecting_send() -> Self {
        Self {
            reject_send: true,
            ..Default::default()
        }
    }

    pub fn rejecting_webhook() -> Self {
        Self {
            reject_webhook: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn sent(&self) -> Vec<SentCall> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|c| c.text).collect()
    }

    pub fn webhook(&self, bot_token: &str) -> Option<String> {
        self.webhooks.lock().expect("lock").get(bot_token).cloned()
    }

    pub fn set_registered_webhook(&self, bot_token: &str, url: &str) {
        self.webhooks
            .lock()
            .expect("lock")
            .insert(bot_token.to_string(), url.to_string());
    }

    fn record(&self, method: &'static str) {
        self.calls.lock().expect("lock").push(method);
    }
}

fn rejected(method: &'static str, description: &str) -> TelegramError {
    TelegramError::Rejected {
        method,
        description: Some(description.to_string()),
    }
}

#[async_trait]
impl BotApi for FakeBot {
    async fn get_me(&self, _bot_token: &str) -> Result<BotUser, TelegramError> {
        self.record("getMe");
        if self.reject_get_me {
            return Err(rejected("getMe", "Unauthorized"));
        }
        Ok(BotUser {
            id: 1,
            is_bot: true,
            first_name: "Relay".to_string(),
            username: Some("relay_bot".to_string()),
        })
    }

    async fn send_message(
        &self,
        bot_token: &str,
        chat_id: &str,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<SentMessage, TelegramError> {
        self.record("sendMessage");
        if self.reject_send {
            return Err(rejected("sendMessage", "Bad Request: chat not found"));
        }
        self.sent.lock().expect("lock").push(SentCall {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            parse_mode,
        });
        Ok(SentMessage {
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn set_webhook(
        &self,
        bot_token: &str,
        url: &str,
        _secret_token: Option<&str>,
    ) -> Result<(), TelegramError> {
        self.record("setWebhook");
        if self.reject_webhook {
            return Err(rejected("setWebhook", "Bad Request: bad webhook"));
        }
        self.set_registered_webhook(bot_token, url);
        Ok(())
    }

    async fn get_webhook_info(&self, bot_token: &str) -> Result<WebhookInfo, TelegramError> {
        self.record("getWebhookInfo");
        Ok(WebhookInfo {
            url: self.webhook(bot_token).unwrap_or_default(),
            pending_update_count: Some(0),
            last_error_message: None,
        })
    }
}

/// Agent answering every call with a fixed outcome.
pub struct FakeAgent {
    replies: Vec<String>,
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeAgent {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            fail: false,
            calls: Mutex::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            replies: Vec::new(),
            fail: true,
            calls: Mutex::default(),
        }
    }

    /// `(message, user_id)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl AgentClient for FakeAgent {
    async fn execute_command(
        &self,
        message: &str,
        user_id: &str,
    ) -> Result<Vec<String>, AgentError> {
        self.calls
            .lock()
            .expect("lock")
            .push((message.to_string(), user_id.to_string()));
        if self.fail {
            // An unparsable URL is the simplest way to get a reqwest::Error.
            let err = reqwest::Client::new()
                .get("http://[::1")
                .build()
                .expect_err("invalid url");
            return Err(AgentError::Transport(err));
        }
        Ok(self.replies.clone())
    }
}

pub struct Harness {
    pub bot: Arc<FakeBot>,
    pub agent: Arc<FakeAgent>,
    pub sessions: Arc<MemorySessionStore>,
    pub configs: UserConfigStore,
    pub handler: Arc<CommandHandler>,
    pub connections: Arc<ConnectionManager>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FakeBot::default(), FakeAgent::replying(&[]), HandlerSettings::default())
    }

    pub fn build(bot: FakeBot, agent: FakeAgent, settings: HandlerSettings) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let configs = UserConfigStore::new(dir.path().join("user_configs")).expect("configs");
        let bot = Arc::new(bot);
        let agent = Arc::new(agent);
        let sessions = Arc::new(MemorySessionStore::new());
        let templates = Arc::new(MessageTemplates::default());

        let session_store: Arc<dyn SessionStore> = sessions.clone();
        let handler = Arc::new(CommandHandler::new(
            bot.clone(),
            agent.clone(),
            session_store,
            configs.clone(),
            templates.clone(),
            settings,
        ));
        let connections = Arc::new(ConnectionManager::new(
            bot.clone(),
            configs.clone(),
            templates,
            SERVER,
            None,
        ));

        Self {
            bot,
            agent,
            sessions,
            configs,
            handler,
            connections,
            _dir: dir,
        }
    }

    pub fn state(&self, webhook_secret: Option<Secret>) -> AppState {
        AppState {
            handler: self.handler.clone(),
            connections: self.connections.clone(),
            webhook_secret,
        }
    }

    /// Store a connected user holding `auth_token`.
    pub async fn connect_user(&self, user_id: &str, bot_token: &str, auth_token: &str) {
        let config = UserConfig {
            user_id: user_id.to_string(),
            bot_token: bot_token.to_string(),
            chat_id: "1000".to_string(),
            auth_token: Some(auth_token.to_string()),
        };
        self.configs.save(user_id, &config).await.expect("save");
    }
}

/// Private-chat update from `sender_id`.
pub fn update(sender_id: i64, text: Option<&str>) -> Update {
    Update {
        update_id: Some(1),
        message: Some(Message {
            message_id: Some(10),
            from: Some(User {
                id: sender_id,
                first_name: "Ivan".to_string(),
                last_name: Some("Petrov".to_string()),
                username: None,
            }),
            chat: Some(Chat { id: sender_id }),
            text: text.map(str::to_string),
        }),
    }
}
