//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate database, classifier, fan-out and notification
//! operations; handlers only parse requests and shape responses.

mod accounts;
mod conversation;
mod message;
mod moderation;
mod notification;

pub use accounts::{AccountDirectory, DbAccountDirectory};
pub use conversation::{ConversationService, CreateConversation};
pub use message::{MessageService, SendMessage, within_window};
pub use moderation::{ModerationService, NewReport};
pub use notification::{NotificationPriority, NotificationService};

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Pagination defaults
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Page request (1-based page number)
#[derive(Debug, Clone, Copy, Default)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageRequest {
    /// SQL `(LIMIT, OFFSET)` with the limit clamped to `1..=100`
    pub fn bounds(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE) as i64;
        let page = self.page.unwrap_or(1).max(1) as i64;
        (limit, (page - 1) * limit)
    }
}

/// Run a side effect detached from the request, bounded by `timeout`
///
/// Failures are logged and never reach the caller.
pub(crate) fn spawn_best_effort<F>(action: &'static str, timeout: Duration, future: F)
where
    F: Future<Output = Result<(), AppError>> + Send + 'static,
{
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, future).await {
            Ok(Ok(())) => {
                tracing::debug!(action, "Best-effort task completed");
            }
            Ok(Err(error)) => {
                tracing::warn!(action, %error, "Best-effort task failed");
            }
            Err(_) => {
                tracing::warn!(
                    action,
                    timeout_seconds = timeout.as_secs(),
                    "Best-effort task timed out"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_default_and_clamp() {
        assert_eq!(PageRequest::default().bounds(), (20, 0));
        assert_eq!(
            PageRequest {
                page: Some(3),
                limit: Some(10)
            }
            .bounds(),
            (10, 20)
        );
        assert_eq!(
            PageRequest {
                page: Some(0),
                limit: Some(1000)
            }
            .bounds(),
            (100, 0)
        );
    }
}
