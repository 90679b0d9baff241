//! In-memory stores for readings, notification history and subscribers

pub mod notifications;
pub mod readings;
pub mod subscribers;

pub use notifications::{NotificationKind, NotificationLog, NotificationRecord};
pub use readings::ReadingStore;
pub use subscribers::SubscriberStore;
