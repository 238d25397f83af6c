//! DineTrack client core.
//!
//! Keeps role consoles (kitchen, server, cashier, admin) in step with the
//! restaurant Gateway: polling synchronizers mirror remote collections into a
//! local cache, pure projectors derive each screen's view from it, the
//! dispatcher sends state-changing calls, and the notification relay turns
//! cached state into role-scoped alerts.

pub mod api;
pub mod cache;
pub mod config;
pub mod console;
pub mod db;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod feedback;
pub mod models;
pub mod notifications;
pub mod projector;
pub mod storage;
pub mod sync;

pub use api::{Gateway, HttpGateway};
pub use cache::{LocalCache, OrderScope};
pub use config::ClientConfig;
pub use console::RoleConsole;
pub use dispatcher::{Dispatcher, PaymentOutcome};
pub use error::{DineError, DineResult, ValidationError};
pub use feedback::{Feedback, LogFeedback};
pub use notifications::{Notification, NotificationKind, NotificationSettings};
pub use storage::{Session, SessionStore};
pub use sync::{PollHandle, Synchronizer};
