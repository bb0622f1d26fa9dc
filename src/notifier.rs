// Copyright (c) 2025, The Newsroom Authors
// MIT License
// All rights reserved.

//! # Operator Notification
//!
//! Best-effort alerting for fatal loop failures. The loop consumes the
//! capability through the `Notifier` trait; delivery failures are logged and
//! never escalated. Services wire their own transport (email, chat, pager)
//! behind the trait.

use crate::errors::{DispatchError, NotifyError};
use async_trait::async_trait;
use tracing::error;

#[cfg(test)]
use mockall::automock;

/// Alerts an operator that the loop gave up on a fatal failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, cause: &DispatchError) -> Result<(), NotifyError>;
}

/// Fallback notifier that only writes the alert to the log. Used when a
/// service wires no real notification transport.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, cause: &DispatchError) -> Result<(), NotifyError> {
        error!(title = title, cause = cause.to_string(), "operator notification");
        Ok(())
    }
}
