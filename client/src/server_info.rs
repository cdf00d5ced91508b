//! Public server metadata.
//!
//! The service exposes a JSON status document over HTTP. Fetching it is
//! left to the caller; this module only parses the payload and answers
//! whether a connection attempt is worthwhile.

use serde::Deserialize;
use std::time::Duration;

/// Ban status of the client IP, decoded from the `banned` field:
/// `0` clear, `-1` permanent, anything else a unix end time in ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanState {
    NotBanned,
    Permanent,
    /// Temporary ban ending at a unix timestamp in milliseconds.
    Until(i64),
}

impl BanState {
    pub fn from_value(value: i64) -> BanState {
        match value {
            0 => BanState::NotBanned,
            -1 => BanState::Permanent,
            time => BanState::Until(time),
        }
    }

    pub fn is_banned(self) -> bool {
        self != BanState::NotBanned
    }
}

impl<'de> Deserialize<'de> for BanState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(BanState::from_value(i64::deserialize(deserializer)?))
    }
}

/// The server's public status document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerInfo {
    #[serde(rename = "banned")]
    pub ban_state: BanState,
    pub captcha_enabled: bool,
    pub max_connections_per_ip: u32,
    pub motd: String,
    pub total_connections: u64,
    /// Uptime in milliseconds.
    uptime: u64,
    /// Player connections across the whole server.
    pub users: u32,
    /// Connections already open from this client's IP.
    pub your_conns: u32,
}

impl Default for ServerInfo {
    fn default() -> Self {
        ServerInfo {
            ban_state: BanState::NotBanned,
            captcha_enabled: false,
            max_connections_per_ip: 0,
            motd: String::new(),
            total_connections: 0,
            uptime: 0,
            users: 0,
            your_conns: 0,
        }
    }
}

impl ServerInfo {
    pub fn parse(json: &str) -> Result<ServerInfo, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime)
    }

    /// Whether a connect attempt can succeed: not banned, and below the
    /// per-IP connection cap (a cap of zero means unlimited).
    pub fn allows_connection(&self) -> bool {
        !self.ban_state.is_banned()
            && (self.max_connections_per_ip == 0 || self.your_conns < self.max_connections_per_ip)
    }
}
