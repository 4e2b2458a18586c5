//! # Session
//!
//! The [`SessionHandle`] is the boundary between the watcher and the
//! wire protocol. Implementations own the authenticated connection to
//! the mailbox server; the watcher only drives them.
//!
//! A session is not re-entrant: every operation goes through the
//! mutex of [`SessionSync`]. Folder changes pushed by the server are
//! forwarded to the registered [`FolderListener`], which must never
//! call back into the session.

use std::{
    fmt,
    ops::{Deref, Range},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SessionConfig,
    envelope::{Envelope, FetchFields},
    monitor::FolderListener,
    Result,
};

/// The connection state of a session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Authenticated,
}

/// The mode a folder is opened with.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FolderMode {
    #[default]
    Closed,
    ReadOnly,
    ReadWrite,
}

/// The state of an opened folder, as reported by the server.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FolderState {
    pub name: String,
    pub mode: FolderMode,

    /// The amount of messages in the folder, authoritative.
    pub count: u32,
}

impl FolderState {
    pub fn new(name: impl ToString, mode: FolderMode, count: u32) -> Self {
        Self {
            name: name.to_string(),
            mode,
            count,
        }
    }
}

/// The reason why an idle wait returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdleWake {
    /// The server pushed a folder change.
    Push,

    /// The renewal token got cancelled, either by the renewal timer
    /// or by a detected arrival.
    Renew,

    /// The shutdown token got cancelled.
    Shutdown,
}

/// The session collaborator.
///
/// Implementations wrap a wire protocol client (IMAP for example).
#[async_trait]
pub trait SessionHandle: Send {
    /// Connect and authenticate to the mailbox server.
    ///
    /// Connecting an already connected session replaces the
    /// underlying connection. The registered listener is kept, and
    /// the sequence numbers of the events pushed to it keep
    /// increasing across connections.
    async fn connect(&mut self, config: &SessionConfig) -> Result<()>;

    /// Return the current connection state.
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        !matches!(self.state(), ConnectionState::Disconnected)
    }

    fn is_authenticated(&self) -> bool {
        matches!(self.state(), ConnectionState::Authenticated)
    }

    /// Return `true` if the server supports the IDLE mode.
    fn supports_idle(&self) -> bool {
        true
    }

    /// Open (select) the given folder.
    async fn open_folder(&mut self, name: &str, writable: bool) -> Result<FolderState>;

    /// Wait for folder changes.
    ///
    /// The wait ends when the server pushes a change, when `renew`
    /// is cancelled or when `shutdown` is cancelled. Implementations
    /// must leave the IDLE mode cleanly before returning, which is
    /// why cancellation goes through tokens instead of dropping the
    /// future.
    async fn idle_wait(
        &mut self,
        renew: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Result<IdleWake>;

    /// Execute a no-operation, giving the server a chance to send
    /// pending folder changes.
    async fn noop(&mut self) -> Result<()>;

    /// Fetch descriptors of messages in the given range of 0-based
    /// positions, ordered by position.
    async fn fetch_summaries(
        &mut self,
        range: Range<u32>,
        fields: &FetchFields,
    ) -> Result<Vec<Envelope>>;

    /// Close the connection.
    async fn disconnect(&mut self) -> Result<()>;

    /// Register the listener of folder changes.
    ///
    /// Events must carry strictly increasing sequence numbers for as
    /// long as the listener stays registered: an event that is not
    /// newer than the last applied one is dropped as a replay.
    fn register(&mut self, listener: Arc<dyn FolderListener>);

    /// Unregister the listener of folder changes.
    fn unregister(&mut self);
}

/// The sync version of a session.
///
/// This is just a session wrapped into a mutex, so the same session
/// can be shared and updated across multiple tasks while keeping its
/// operations mutually exclusive.
pub struct SessionSync<S> {
    inner: Arc<Mutex<S>>,
}

impl<S: SessionHandle> SessionSync<S> {
    pub fn new(session: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }
}

impl<S> Clone for SessionSync<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Deref for SessionSync<S> {
    type Target = Mutex<S>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<S> fmt::Debug for SessionSync<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSync").finish_non_exhaustive()
    }
}
