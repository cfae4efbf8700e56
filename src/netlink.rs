//! Connection-type probing
//!
//! The keeper only authenticates while on WIFI. Connection type is derived
//! fresh each poll, never cached. The default probe shells out to `nmcli`,
//! which is how NetworkManager hosts expose link state; the trait seam lets
//! tests substitute a fixed answer.

use std::process::Command;

/// Classification of the active network link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    None,
    Cellular,
    Wifi,
    Vpn,
}

/// Probe supplied by the platform network layer.
pub trait LinkProbe: Send + Sync {
    fn connection_type(&self) -> ConnectionType;
}

/// `nmcli`-backed probe for Linux hosts running NetworkManager.
pub struct NmcliProbe;

impl LinkProbe for NmcliProbe {
    fn connection_type(&self) -> ConnectionType {
        let output = match Command::new("nmcli")
            .args(["-t", "-f", "TYPE,STATE", "device"])
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!("nmcli probe failed: {err}");
                return ConnectionType::None;
            }
        };
        classify_devices(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Classify terse `nmcli -t -f TYPE,STATE device` output.
///
/// WIFI wins over cellular, cellular over VPN, mirroring the precedence the
/// portal cares about: a VPN over WIFI still counts as WIFI for login
/// purposes.
fn classify_devices(stdout: &str) -> ConnectionType {
    let connected = |kind: &str| {
        stdout.lines().any(|line| {
            let mut parts = line.splitn(2, ':');
            parts.next() == Some(kind)
                && parts
                    .next()
                    .is_some_and(|state| state.starts_with("connected"))
        })
    };

    if connected("wifi") {
        ConnectionType::Wifi
    } else if connected("gsm") || connected("cdma") || connected("wwan") {
        ConnectionType::Cellular
    } else if connected("tun") || connected("wireguard") || connected("vpn") {
        ConnectionType::Vpn
    } else {
        ConnectionType::None
    }
}
