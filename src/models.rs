//! Data models for the campus portal API and keeper events

use std::fmt;

use base64::Engine as _;
use serde::Deserialize;

/// ISP presets offered by the campus portal.
///
/// Each preset maps to the `domain` form field and the portal's
/// MAC-authentication flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isp {
    Teacher,
    ChinaNet,
    Unicom,
    Cmcc,
}

impl Isp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "teacher" => Some(Self::Teacher),
            "chinanet" | "telecom" => Some(Self::ChinaNet),
            "unicom" => Some(Self::Unicom),
            "cmcc" | "mobile" => Some(Self::Cmcc),
            _ => None,
        }
    }

    /// The literal `domain` value the portal expects.
    ///
    /// The padded teacher value is what the portal actually accepts;
    /// do not trim it.
    pub fn domain(self) -> &'static str {
        match self {
            Self::Teacher => " teacher ",
            Self::ChinaNet => "ChinaNet",
            Self::Unicom => "unicom",
            Self::Cmcc => "CMCC",
        }
    }

    pub fn enable_mac_auth(self) -> u8 {
        match self {
            Self::Teacher => 1,
            _ => 0,
        }
    }
}

/// Login credentials, immutable once handed to a supervision run.
///
/// The password is carried base64-encoded; that is obfuscation the portal
/// requires, not encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub domain: String,
    pub password: String,
    pub enable_mac_auth: u8,
}

impl Credentials {
    /// Build credentials from plaintext input, encoding the password.
    pub fn new(username: impl Into<String>, isp: Isp, plain_password: &str) -> Self {
        Self {
            username: username.into(),
            domain: isp.domain().to_string(),
            password: base64::engine::general_purpose::STANDARD.encode(plain_password),
            enable_mac_auth: isp.enable_mac_auth(),
        }
    }

    /// Form fields for `POST /index.php/index/login`.
    pub fn form_fields(&self) -> [(&'static str, String); 4] {
        [
            ("username", self.username.clone()),
            ("domain", self.domain.clone()),
            ("password", self.password.clone()),
            ("enablemacauth", self.enable_mac_auth.to_string()),
        ]
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "username:{} domain:{} macauth:{}",
            self.username, self.domain, self.enable_mac_auth
        )
    }
}

/// Authentication status returned by the portal's init and login endpoints.
///
/// `status == 0` means the portal considers this device logged out.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusReport {
    pub info: String,
    #[serde(default)]
    pub logout_domain: String,
    #[serde(default)]
    pub logout_ip: String,
    #[serde(default)]
    pub logout_location: String,
    /// Seconds online in the current session.
    #[serde(default)]
    pub logout_timer: u64,
    #[serde(default)]
    pub logout_username: String,
    pub status: i64,
}

impl StatusReport {
    pub fn needs_login(&self) -> bool {
        self.status == 0
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "info:{} user:{} domain:{} ip:{} location:{} online:{}",
            self.info,
            self.logout_username,
            self.logout_domain,
            self.logout_ip,
            self.logout_location,
            format_online(self.logout_timer)
        )
    }
}

/// Response of the explicit logout endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogoutResult {
    #[serde(default)]
    pub data: String,
    pub info: String,
    pub status: i64,
}

impl fmt::Display for LogoutResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "result:{} info:{} status:{}",
            self.data, self.info, self.status
        )
    }
}

/// Typed event delivered to the registered callback sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Status(StatusReport),
    Credentials(Credentials),
    Message(String),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Status(report) => write!(f, "{report}"),
            Event::Credentials(credentials) => write!(f, "{credentials}"),
            Event::Message(text) => f.write_str(text),
        }
    }
}

/// Render an online-seconds counter as `[Nd ]hh:mm:ss`.
fn format_online(total_seconds: u64) -> String {
    let seconds = total_seconds % 60;
    let minutes = total_seconds / 60 % 60;
    let hours = total_seconds / 60 / 60 % 24;
    let days = total_seconds / 60 / 60 / 24;
    if days == 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
    }
}
