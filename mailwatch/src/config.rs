//! # Configuration
//!
//! Module dedicated to the watcher configuration: how to reach the
//! mailbox server ([`SessionConfig`]), which folder to watch and how
//! ([`WatchConfig`]) and how to complete envelopes before dispatching
//! them ([`DispatchConfig`]).

use std::{fmt, time::Duration};

use crate::envelope::{Envelope, FetchFields, Mailbox};

/// The folder watched when none is given.
pub const INBOX: &str = "INBOX";

/// The default IDLE renewal timeout, in seconds.
///
/// Servers are only supposed to drop idling connections after 30
/// minutes, but some providers drop them after about 10 minutes.
pub const DEFAULT_IDLE_TIMEOUT: u64 = 9 * 60;

/// The default NOOP polling interval, in seconds.
pub const DEFAULT_NOOP_INTERVAL: u64 = 60;

/// The default maximum amount of attempts per processing pass.
pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;

/// The session configuration.
///
/// Passed as it is to [`crate::session::SessionHandle::connect`].
#[derive(Clone, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct SessionConfig {
    /// The mailbox server host name.
    pub host: String,

    /// The mailbox server host port.
    pub port: u16,

    /// The mailbox server login.
    ///
    /// Usually, the login is either the email address or its left
    /// part (before @).
    pub login: String,

    /// The mailbox server password or access token.
    pub passwd: String,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("passwd", &"<redacted>")
            .finish()
    }
}

/// The watch configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct WatchConfig {
    /// The name of the watched folder.
    pub folder: String,

    /// Open the folder in read-write mode.
    ///
    /// Needed when the arrival handler updates flags.
    pub writable: bool,

    /// The IDLE renewal timeout, in seconds.
    ///
    /// The IDLE command is renewed in background after this
    /// timeout. Should stay below the provider session expiry
    /// window. Defaults to [`DEFAULT_IDLE_TIMEOUT`].
    pub idle_timeout: Option<u64>,

    /// The NOOP polling interval, in seconds.
    ///
    /// Only used when the server does not support IDLE. Defaults to
    /// [`DEFAULT_NOOP_INTERVAL`].
    pub noop_interval: Option<u64>,

    /// The maximum amount of attempts before giving up. Defaults to
    /// [`DEFAULT_MAX_ATTEMPTS`].
    pub max_attempts: Option<u8>,

    /// The items fetched for every new message.
    pub fetch: FetchFields,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            folder: INBOX.into(),
            writable: true,
            idle_timeout: None,
            noop_interval: None,
            max_attempts: None,
            fetch: Default::default(),
        }
    }
}

impl WatchConfig {
    pub fn new(folder: impl ToString) -> Self {
        Self {
            folder: folder.to_string(),
            ..Default::default()
        }
    }

    /// Find the IDLE renewal timeout, which cannot be lower than 1
    /// second.
    pub fn find_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT).max(1))
    }

    /// Find the NOOP polling interval.
    pub fn find_noop_interval(&self) -> Duration {
        Duration::from_secs(self.noop_interval.unwrap_or(DEFAULT_NOOP_INTERVAL))
    }

    /// Find the maximum amount of attempts, which cannot be lower
    /// than 1.
    pub fn find_max_attempts(&self) -> u8 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1)
    }
}

/// The dispatch configuration.
///
/// Holds the addresses used when a new message lacks a sender or a
/// recipient.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct DispatchConfig {
    /// The address used when the From header is missing.
    pub default_from: Option<String>,

    /// The address used when the To header is missing.
    pub default_to: Option<String>,
}

impl DispatchConfig {
    /// Fill in the missing sender and recipient of the given
    /// envelope.
    pub fn complete(&self, envelope: &mut Envelope) {
        if envelope.from.is_none() {
            envelope.from = self.default_from.as_ref().map(Mailbox::new_nameless);
        }

        if envelope.to.is_none() {
            envelope.to = self.default_to.as_ref().map(Mailbox::new_nameless);
        }
    }
}
