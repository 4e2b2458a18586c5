//! In-memory mailbox server and session used by integration tests.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    ops::Range,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use mailwatch::{
    config::SessionConfig,
    envelope::{Envelope, Envelopes, FetchFields},
    event::WatchEvent,
    monitor::{FolderEvent, FolderListener},
    session::{ConnectionState, FolderMode, FolderState, IdleWake, SessionHandle},
    Error, Result, WatchHandle, WatcherBuilder,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver},
        Notify,
    },
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// Bound of every wait in tests, reached only if the watcher hangs.
pub const TIMEOUT: Duration = Duration::from_secs(3 * 3600);

#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Transient,
    Fatal,
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub uids: Vec<u32>,
    pub next_uid: u32,
    pub seq: u64,
    pub queued: VecDeque<FolderEvent>,
    pub last_event: Option<FolderEvent>,
    pub dropped: bool,
    pub no_idle: bool,
    pub connect_failures: VecDeque<Failure>,
    pub fetch_failures: VecDeque<Failure>,
    pub connects: usize,
    pub disconnects: usize,
    pub idles: usize,
    pub noops: usize,
    pub fetches: Vec<Range<u32>>,
}

impl ServerState {
    fn queue(&mut self, event: FolderEvent) {
        self.last_event = Some(event.clone());
        self.queued.push_back(event);
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// The in-memory mailbox server, holding a single folder.
#[derive(Clone, Debug, Default)]
pub struct Server {
    state: Arc<Mutex<ServerState>>,
    notify: Arc<Notify>,
}

impl Server {
    pub fn with_messages(count: u32) -> Self {
        let server = Self::default();
        server.append_silently(count);
        server
    }

    pub fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn session(&self) -> TestSession {
        TestSession {
            server: self.clone(),
            state: ConnectionState::Disconnected,
            listener: None,
        }
    }

    /// Append messages without notifying the session.
    pub fn append_silently(&self, count: u32) {
        let mut state = self.lock();
        for _ in 0..count {
            state.next_uid += 1;
            let uid = state.next_uid;
            state.uids.push(uid);
        }
    }

    /// Append messages then push the new count.
    pub fn deliver(&self, count: u32) {
        self.append_silently(count);

        {
            let mut state = self.lock();
            let seq = state.next_seq();
            let count = state.uids.len() as u32;
            state.queue(FolderEvent::count_changed(seq, count));
        }

        self.notify.notify_one();
    }

    pub fn expunge(&self, index: u32) {
        {
            let mut state = self.lock();
            state.uids.remove(index as usize);
            let seq = state.next_seq();
            state.queue(FolderEvent::message_expunged(seq, index));
        }

        self.notify.notify_one();
    }

    /// Push the last event again, with the same sequence number.
    pub fn replay_last(&self) {
        {
            let mut state = self.lock();
            if let Some(event) = state.last_event.clone() {
                state.queued.push_back(event);
            }
        }

        self.notify.notify_one();
    }

    pub fn drop_connection(&self) {
        self.lock().dropped = true;
        self.notify.notify_one();
    }

    pub fn fail_connect(&self, failure: Failure) {
        self.lock().connect_failures.push_back(failure);
    }

    pub fn fail_fetch(&self, failure: Failure) {
        self.lock().fetch_failures.push_back(failure);
    }

    pub fn disable_idle(&self) {
        self.lock().no_idle = true;
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn fetches(&self) -> Vec<Range<u32>> {
        self.lock().fetches.clone()
    }
}

fn io_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, msg.to_owned())
}

pub struct TestSession {
    server: Server,
    state: ConnectionState,
    listener: Option<Arc<dyn FolderListener>>,
}

impl TestSession {
    fn ensure_authenticated(&self) -> Result<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(Error::ConnectionLostError(io_error("not authenticated")))
        }
    }

    /// Forward queued events to the listener, returning `true` if
    /// some were pushed.
    fn push_queued(&self) -> bool {
        let events: Vec<_> = self.server.lock().queued.drain(..).collect();
        let pushed = !events.is_empty();

        if let Some(listener) = &self.listener {
            for event in events {
                listener.on_folder_event(event);
            }
        }

        pushed
    }

    fn take_dropped(&mut self) -> bool {
        let dropped = std::mem::take(&mut self.server.lock().dropped);
        if dropped {
            self.state = ConnectionState::Disconnected;
        }
        dropped
    }
}

#[async_trait]
impl SessionHandle for TestSession {
    async fn connect(&mut self, config: &SessionConfig) -> Result<()> {
        let failure = {
            let mut state = self.server.lock();
            state.connects += 1;
            state.dropped = false;
            state.connect_failures.pop_front()
        };

        match failure {
            Some(Failure::Transient) => Err(Error::ConnectError(
                io_error("refused"),
                config.host.clone(),
                config.port,
            )),
            Some(Failure::Fatal) => Err(Error::AuthenticationFailedError(config.login.clone())),
            None => {
                self.state = ConnectionState::Authenticated;
                Ok(())
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn supports_idle(&self) -> bool {
        !self.server.lock().no_idle
    }

    async fn open_folder(&mut self, name: &str, writable: bool) -> Result<FolderState> {
        self.ensure_authenticated()?;

        let mode = if writable {
            FolderMode::ReadWrite
        } else {
            FolderMode::ReadOnly
        };
        let count = self.server.lock().uids.len() as u32;

        Ok(FolderState::new(name, mode, count))
    }

    async fn idle_wait(
        &mut self,
        renew: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Result<IdleWake> {
        self.ensure_authenticated()?;
        self.server.lock().idles += 1;
        let notify = self.server.notify.clone();

        loop {
            if self.take_dropped() {
                return Err(Error::IdleError(io_error("connection dropped")));
            }

            if self.push_queued() {
                return Ok(IdleWake::Push);
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(IdleWake::Shutdown),
                _ = renew.cancelled() => return Ok(IdleWake::Renew),
                _ = notify.notified() => continue,
            }
        }
    }

    async fn noop(&mut self) -> Result<()> {
        if self.take_dropped() {
            return Err(Error::NoOpError(io_error("connection dropped")));
        }

        self.ensure_authenticated()?;
        self.server.lock().noops += 1;
        self.push_queued();
        Ok(())
    }

    async fn fetch_summaries(
        &mut self,
        range: Range<u32>,
        _fields: &FetchFields,
    ) -> Result<Vec<Envelope>> {
        self.ensure_authenticated()?;

        let mut state = self.server.lock();
        state.fetches.push(range.clone());

        match state.fetch_failures.pop_front() {
            Some(Failure::Transient) => {
                self.state = ConnectionState::Disconnected;
                return Err(Error::FetchFailedTransientError(
                    io_error("connection reset"),
                    range.start,
                    range.end,
                ));
            }
            Some(Failure::Fatal) => {
                return Err(Error::FetchFailedError(
                    "BAD invalid sequence set".into(),
                    range.start,
                    range.end,
                ));
            }
            None => (),
        }

        let end = (range.end as usize).min(state.uids.len());
        let start = (range.start as usize).min(end);

        let envelopes = state.uids[start..end]
            .iter()
            .zip(range.start..)
            .map(|(uid, index)| Envelope {
                subject: Some(format!("message {uid}")),
                ..Envelope::new(index, *uid)
            })
            .collect();

        Ok(envelopes)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.server.lock().disconnects += 1;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn register(&mut self, listener: Arc<dyn FolderListener>) {
        self.listener = Some(listener);
    }

    fn unregister(&mut self) {
        self.listener = None;
    }
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        host: "localhost".into(),
        port: 3143,
        login: "bob@localhost".into(),
        passwd: "password".into(),
    }
}

/// Watcher builder sending batches and events to channels.
pub fn builder(
    server: &Server,
) -> (
    WatcherBuilder<TestSession>,
    UnboundedReceiver<Envelopes>,
    UnboundedReceiver<WatchEvent>,
) {
    let (batches_tx, batches) = mpsc::unbounded_channel();
    let (events_tx, events) = mpsc::unbounded_channel();

    let builder = WatcherBuilder::new(session_config(), server.session())
        .with_handler(move |envelopes| {
            let batches_tx = batches_tx.clone();
            async move {
                batches_tx.send(envelopes).unwrap();
                Ok(())
            }
        })
        .with_event_handler(move |event| {
            events_tx.send(event).unwrap();
            Ok(())
        });

    (builder, batches, events)
}

/// A watcher running in background.
pub struct Harness {
    pub server: Server,
    pub handle: WatchHandle,
    pub batches: UnboundedReceiver<Envelopes>,
    pub events: UnboundedReceiver<WatchEvent>,
}

impl Harness {
    /// Spawn the given watcher and wait for it to be started.
    pub async fn spawn(
        server: &Server,
        configure: impl FnOnce(WatcherBuilder<TestSession>) -> WatcherBuilder<TestSession>,
    ) -> Self {
        let (builder, batches, events) = builder(server);
        let handle = configure(builder).build().spawn();

        let mut harness = Self {
            server: server.clone(),
            handle,
            batches,
            events,
        };

        harness
            .wait_for_event(|event| matches!(event, WatchEvent::Started { .. }))
            .await;

        harness
    }

    pub async fn next_batch(&mut self) -> Envelopes {
        timeout(TIMEOUT, self.batches.recv())
            .await
            .expect("batch should be dispatched")
            .expect("batch channel should be open")
    }

    /// Wait for an event matching the given predicate, returning the
    /// events received until then.
    pub async fn wait_for_event(&mut self, pred: impl Fn(&WatchEvent) -> bool) -> Vec<WatchEvent> {
        let mut received = Vec::new();

        loop {
            let event = timeout(TIMEOUT, self.events.recv())
                .await
                .expect("event should be fired")
                .expect("event channel should be open");
            let found = pred(&event);
            received.push(event);
            if found {
                return received;
            }
        }
    }
}

pub fn uids(envelopes: &Envelopes) -> Vec<u32> {
    envelopes.uids().into_iter().map(|uid| uid.0).collect()
}
