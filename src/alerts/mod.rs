//! Threshold alerting
//!
//! Hysteresis and delivery gating per scope, the pipeline that feeds
//! readings through it, and fan-out of triggered alerts to subscribers.

pub mod checker;
pub mod config;
pub mod cooldown;
pub mod engine;
pub mod notifier;
pub mod state;
pub mod window;

pub use checker::{AlertPipeline, ScopedReading};
pub use config::{ChatBotConfig, DeliveryTarget, Subscriber, DEFAULT_SCOPE};
pub use cooldown::{AlertRate, CooldownTracker};
pub use engine::{Alert, AlertEngine, EvaluationResult, SuppressReason, DEFAULT_CONFIRMATIONS};
pub use notifier::{DeliveryError, DispatchReport, Dispatcher, OutgoingMessage};
pub use state::{AlarmState, AlarmTable, Transition};
pub use window::{local_clock, NotifyWindow};
