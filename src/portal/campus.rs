//! Campus captive portal client
//!
//! Thin reqwest wrapper around the portal's three endpoints. The target host
//! is resolved through [`FailoverState`] once per outbound request, which is
//! where a pending connect-timeout failover takes effect.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use crate::config::HttpConfig;
use crate::error::PortalError;
use crate::failover::FailoverState;
use crate::models::{Credentials, LogoutResult, StatusReport};
use crate::portal::Portal;

const STATUS_PATH: &str = "/index.php/index/init";
const LOGIN_PATH: &str = "/index.php/index/login";
const LOGOUT_PATH: &str = "/index.php/index/logout";

pub struct CampusPortal {
    client: Client,
    failover: Arc<FailoverState>,
}

impl CampusPortal {
    pub fn new(failover: Arc<FailoverState>, http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(http.connect_timeout))
            // per-read timeout, not a whole-exchange deadline
            .read_timeout(Duration::from_secs(http.read_timeout))
            .build()?;
        Ok(Self { client, failover })
    }

    fn endpoint(&self, path: &str) -> String {
        endpoint(&self.failover.host_for_request(), path)
    }
}

/// The portal speaks plain HTTP only.
fn endpoint(host: &str, path: &str) -> String {
    format!("http://{host}{path}")
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, PortalError> {
    let resp = resp.error_for_status()?;
    resp.json::<T>().await.map_err(PortalError::from)
}

#[async_trait]
impl Portal for CampusPortal {
    async fn query_status(&self) -> Result<StatusReport, PortalError> {
        let resp = self
            .client
            .get(self.endpoint(STATUS_PATH))
            // cache buster, same as a browser XHR would send
            .query(&[("_", unix_millis())])
            .send()
            .await?;
        decode(resp).await
    }

    async fn login(&self, credentials: &Credentials) -> Result<StatusReport, PortalError> {
        let resp = self
            .client
            .post(self.endpoint(LOGIN_PATH))
            .form(&credentials.form_fields())
            .send()
            .await?;
        decode(resp).await
    }

    async fn logout(&self) -> Result<LogoutResult, PortalError> {
        let resp = self.client.post(self.endpoint(LOGOUT_PATH)).send().await?;
        decode(resp).await
    }
}
