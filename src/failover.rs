//! Dual-homed portal host selection
//!
//! The portal answers on two fixed addresses. A connect timeout is treated
//! as "this address is unreachable right now, try the other one on the very
//! next request". The swap is applied per request from the host the state
//! holds at that moment, so two consecutive timeouts bounce between the two
//! addresses instead of sticking to the healthy one. Known quirk, kept until
//! the network team confirms which address should win.

use std::sync::Mutex;

struct Inner {
    active: String,
    pending: bool,
}

/// Shared failover state read by the portal client on every request.
pub struct FailoverState {
    primary: String,
    secondary: String,
    inner: Mutex<Inner>,
}

impl FailoverState {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        let primary = primary.into();
        let secondary = secondary.into();
        Self {
            inner: Mutex::new(Inner {
                active: primary.clone(),
                pending: false,
            }),
            primary,
            secondary,
        }
    }

    /// Record that a request hit a connect timeout. The next outbound
    /// request will target the other host.
    pub fn mark_timeout(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending = true;
    }

    /// Host to use for the next outbound request.
    ///
    /// Consumes a pending timeout, if any, by flipping the active host and
    /// clearing the flag. Evaluated once per request, not per connection
    /// attempt.
    pub fn host_for_request(&self) -> String {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending {
            let next = self.other(&inner.active);
            tracing::info!("connect timeout at host {}, switching to {next}", inner.active);
            inner.active = next;
            inner.pending = false;
        }
        inner.active.clone()
    }

    fn other(&self, host: &str) -> String {
        if host == self.primary {
            self.secondary.clone()
        } else {
            self.primary.clone()
        }
    }
}
