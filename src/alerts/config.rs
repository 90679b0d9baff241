//! Delivery configuration types

use serde::{Deserialize, Serialize};

/// Scope used when a caller does not name one
pub const DEFAULT_SCOPE: &str = "default";

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_active() -> bool {
    true
}

/// Someone who receives alerts and reports for a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Unique subscriber ID
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Scope whose alerts this subscriber receives
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Inactive subscribers are kept but skipped on fan-out
    #[serde(default = "default_active")]
    pub active: bool,
    /// Where messages go
    #[serde(default)]
    pub targets: Vec<DeliveryTarget>,
}

impl Subscriber {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            scope: default_scope(),
            active: true,
            targets: Vec::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_target(mut self, target: DeliveryTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Delivery channel for one subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// Log to tracing
    Log,
    /// Chat bot message to a chat id
    Chat { chat_id: String },
    /// Browser push relayed through an HTTP push endpoint
    Push { endpoint: String },
}

impl DeliveryTarget {
    pub fn channel_name(&self) -> &'static str {
        match self {
            DeliveryTarget::Log => "log",
            DeliveryTarget::Chat { .. } => "chat",
            DeliveryTarget::Push { .. } => "push",
        }
    }
}

/// Chat bot credentials
#[derive(Debug, Clone)]
pub struct ChatBotConfig {
    /// Bot API base URL, e.g. `https://api.telegram.org`
    pub api_base: String,
    pub token: String,
}

impl ChatBotConfig {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    /// Build from `SKYWATCH_CHAT_BOT_TOKEN` / `SKYWATCH_CHAT_API_BASE`
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("SKYWATCH_CHAT_BOT_TOKEN").ok()?;
        if token.is_empty() {
            return None;
        }
        let api_base = std::env::var("SKYWATCH_CHAT_API_BASE")
            .unwrap_or_else(|_| "https://api.telegram.org".to_string());
        Some(Self::new(api_base, token))
    }

    pub fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.token
        )
    }
}
