//! Portal abstraction layer
//!
//! The supervision loop talks to the captive portal exclusively through the
//! [`Portal`] trait, so tests can script portal behavior without a network.

pub mod campus;

pub use campus::CampusPortal;

use async_trait::async_trait;

use crate::error::PortalError;
use crate::models::{Credentials, LogoutResult, StatusReport};

/// The three remote operations the campus portal exposes.
///
/// Implementations are single-shot request wrappers: no retry, no failover
/// decision of their own beyond honoring the shared
/// [`FailoverState`](crate::failover::FailoverState).
#[async_trait]
pub trait Portal: Send + Sync {
    /// Query current authentication status.
    async fn query_status(&self) -> Result<StatusReport, PortalError>;

    /// Submit credentials; returns the post-login status.
    async fn login(&self, credentials: &Credentials) -> Result<StatusReport, PortalError>;

    /// Explicitly terminate the portal session.
    async fn logout(&self) -> Result<LogoutResult, PortalError>;
}
