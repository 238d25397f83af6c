//! User-visible acknowledgments (the toast equivalent).
//!
//! Sync and dispatch report through this sink; a UI shell supplies its own
//! implementation, headless consoles log.

use tracing::{info, warn};

pub trait Feedback: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Feedback routed into the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl Feedback for LogFeedback {
    fn success(&self, message: &str) {
        info!(target: "dinetrack::feedback", "{message}");
    }

    fn error(&self, message: &str) {
        warn!(target: "dinetrack::feedback", "{message}");
    }
}
