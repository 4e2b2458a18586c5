//! # Watcher
//!
//! The [`Watcher`] drives the idle-watch state machine of a single
//! folder. It alternates between waiting for changes pushed by the
//! server ([`WatchState::Idle`]) and processing new messages
//! ([`WatchState::Processing`]), reconnecting the session whenever it
//! drops ([`WatchState::Reconnecting`]).
//!
//! The watcher is the only user of its session. Folder changes are
//! received by its [`FolderMonitor`], which never calls back into the
//! session: new messages are fetched by the watcher once the idle
//! wait ended.

use std::{sync::Arc, time::Duration};

use futures::Future;
use tokio::{
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::{DispatchConfig, SessionConfig, WatchConfig},
    dispatch::{self, ArrivalHandler, Dispatcher},
    envelope::Envelopes,
    event::{self, fire, WatchEvent, WatchEventHandler},
    monitor::{FolderMonitor, Reconciliation},
    retry::{Retry, RetryState},
    session::{FolderState, SessionHandle, SessionSync},
    AnyResult, Error, Result,
};

/// The state of the watcher.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WatchState {
    /// The watcher waits for folder changes.
    #[default]
    Idle,

    /// New messages have been detected, a processing pass is due.
    Triggered,

    /// New messages are being fetched and dispatched.
    Processing,

    /// The session is being re-established.
    Reconnecting,

    /// The watcher stopped.
    Stopped,
}

/// The reason why the watcher woke up from the idle state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Wake {
    Change,
    Timeout,
    Shutdown,
}

/// The folder watcher.
pub struct Watcher<S> {
    session_config: SessionConfig,
    config: WatchConfig,
    session: SessionSync<S>,
    monitor: FolderMonitor,
    dispatcher: Dispatcher,
    events: WatchEventHandler,
    shutdown: CancellationToken,
    retry: Retry,
    state: WatchState,
}

impl<S: SessionHandle> Watcher<S> {
    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn monitor(&self) -> &FolderMonitor {
        &self.monitor
    }

    pub fn session(&self) -> &SessionSync<S> {
        &self.session
    }

    /// Return the token that stops the watcher once cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Watch the folder until the shutdown token is cancelled or
    /// until a fatal error occurs.
    ///
    /// Returns `Ok(())` on graceful stop, even if the stop
    /// interrupted a processing pass.
    pub async fn run(&mut self) -> Result<()> {
        let res = match self.start().await {
            Ok(()) => self.watch().await,
            Err(err) => Err(err),
        };

        self.stop().await;

        match res {
            Err(err) if err.is_cancelled() => {
                debug!(folder = self.monitor.folder(), "watch cancelled");
                Ok(())
            }
            Err(err) => {
                error!(folder = self.monitor.folder(), "watcher stopped: {err}");
                debug!("{err:?}");
                Err(err)
            }
            ok => ok,
        }
    }

    fn transition(&mut self, next: WatchState) {
        if self.state != next {
            let folder = self.monitor.folder();
            trace!(folder, from = ?self.state, to = ?next, "watch state changed");
            self.state = next;
        }
    }

    async fn start(&mut self) -> Result<()> {
        info!(folder = self.monitor.folder(), "starting watcher");

        self.retry.reset();
        self.monitor.reset();
        let folder = self.open_with_retry().await?;

        let listener = Arc::new(self.monitor.clone());
        self.session.lock().await.register(listener);
        self.monitor.baseline(folder.count);

        info!(folder = folder.name, count = folder.count, "watching folder");
        fire(
            &self.events,
            WatchEvent::Started {
                folder: folder.name,
                count: folder.count,
            },
        );

        self.retry.reset();
        self.transition(WatchState::Idle);

        Ok(())
    }

    async fn watch(&mut self) -> Result<()> {
        loop {
            match self.state {
                WatchState::Idle => self.idle().await?,
                WatchState::Triggered => {
                    if self.monitor.begin_processing() {
                        self.transition(WatchState::Processing);
                    } else {
                        self.transition(WatchState::Idle);
                    }
                }
                WatchState::Processing => {
                    let res = self.process().await;
                    self.monitor.end_processing();
                    res?;
                    self.transition(WatchState::Idle);
                }
                WatchState::Reconnecting => self.recover().await?,
                WatchState::Stopped => return Ok(()),
            }
        }
    }

    async fn idle(&mut self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            self.transition(WatchState::Stopped);
            return Ok(());
        }

        if self.monitor.is_arrival_pending() {
            self.transition(WatchState::Triggered);
            return Ok(());
        }

        let supports_idle = self.session.lock().await.supports_idle();
        let wake = if supports_idle {
            self.idle_wait().await
        } else {
            self.noop_wait().await
        };

        let wake = match wake {
            Ok(wake) => wake,
            Err(err) if err.is_transient() => {
                let folder = self.monitor.folder();
                warn!(folder, "cannot wait for folder changes, reconnecting: {err}");
                debug!("{err:?}");
                self.fail_attempt()?;
                self.transition(WatchState::Reconnecting);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        self.retry.reset();

        match wake {
            Wake::Shutdown => self.transition(WatchState::Stopped),
            _ if self.monitor.is_arrival_pending() => self.transition(WatchState::Triggered),
            Wake::Timeout => {
                let folder = self.monitor.folder();
                trace!(folder, tracked = self.monitor.tracked(), "renewing idle wait");
                if let Some(reconciliation) = self.monitor.resynchronize_if_diverged() {
                    self.report(reconciliation);
                }
            }
            Wake::Change => {
                trace!(folder = self.monitor.folder(), "folder changed without arrival");
            }
        }

        Ok(())
    }

    /// Wait for changes in IDLE mode.
    ///
    /// The wait is bounded by the renewal timer, whose expiry only
    /// cancels the renewal token of the current wait. The shutdown
    /// token is a distinct trigger.
    async fn idle_wait(&self) -> Result<Wake> {
        let folder = self.monitor.folder();
        let renew = CancellationToken::new();
        self.monitor.arm(&renew);

        let timeout = self.config.find_idle_timeout();
        trace!(folder, ?timeout, "starting idle wait");

        let deadline = sleep(timeout);
        tokio::pin!(deadline);
        let mut timed_out = false;

        let res = {
            let mut session = self.session.lock().await;
            let idle = session.idle_wait(&renew, &self.shutdown);
            tokio::pin!(idle);

            loop {
                tokio::select! {
                    res = &mut idle => break res,
                    _ = &mut deadline, if !timed_out => {
                        debug!(folder, "idle timeout reached, renewing");
                        timed_out = true;
                        renew.cancel();
                    }
                }
            }
        };

        self.monitor.disarm();

        let wake = res?;
        trace!(folder, ?wake, "idle wait ended");

        if self.shutdown.is_cancelled() {
            Ok(Wake::Shutdown)
        } else if timed_out {
            Ok(Wake::Timeout)
        } else {
            Ok(Wake::Change)
        }
    }

    /// Wait for changes by polling the server with NOOP.
    async fn noop_wait(&self) -> Result<Wake> {
        let interval = self.config.find_noop_interval();
        trace!(folder = self.monitor.folder(), ?interval, "server does not support idle, polling");

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(Wake::Shutdown),
            _ = sleep(interval) => (),
        }

        self.session.lock().await.noop().await?;
        Ok(Wake::Change)
    }

    async fn process(&mut self) -> Result<()> {
        let folder = self.monitor.folder().to_owned();
        let range = self.monitor.delta();

        if range.is_empty() {
            debug!(folder, "arrivals already processed, skipping");
            return Ok(());
        }

        info!(folder, from = range.start, to = range.end, "new messages arrived");
        fire(&self.events, WatchEvent::Triggered { range });

        self.retry.reset();

        loop {
            if self.shutdown.is_cancelled() {
                return Err(Error::CancelledError);
            }

            let res = self
                .dispatcher
                .dispatch(&self.session, &self.monitor, &self.shutdown, &self.events)
                .await;

            match res {
                Ok(uids) => {
                    debug!(folder, count = uids.len(), "new messages processed");
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    warn!(folder, "cannot process new messages, reconnecting: {err}");
                    debug!("{err:?}");
                    let attempt = self.fail_attempt();

                    self.transition(WatchState::Reconnecting);
                    match self.open().await {
                        Ok(state) => self.reconcile(&state),
                        Err(err) if err.is_transient() => {
                            warn!(folder, "cannot reconnect: {err}");
                            debug!("{err:?}");
                        }
                        Err(err) => return Err(err),
                    }

                    attempt?;
                    self.transition(WatchState::Processing);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Re-establish the session after a failed idle wait.
    async fn recover(&mut self) -> Result<()> {
        match self.open().await {
            Ok(state) => {
                self.reconcile(&state);
                self.transition(WatchState::Idle);
                Ok(())
            }
            Err(err) if err.is_transient() => {
                warn!(folder = self.monitor.folder(), "cannot reconnect: {err}");
                debug!("{err:?}");
                let attempt = self.fail_attempt()?;
                self.backoff(attempt).await
            }
            Err(err) => Err(err),
        }
    }

    /// (Re)connect the session then open the watched folder.
    async fn open(&self) -> Result<FolderState> {
        let folder = &self.config.folder;
        let mut session = self.session.lock().await;

        if session.is_connected() {
            if let Err(err) = session.disconnect().await {
                debug!(folder, "cannot disconnect session, replacing it anyway: {err}");
            }
        }

        let open = async {
            debug!(host = self.session_config.host, "connecting to mailbox server");
            session.connect(&self.session_config).await?;
            debug!(folder, writable = self.config.writable, "opening folder");
            session.open_folder(folder, self.config.writable).await
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::CancelledError),
            res = open => res,
        }
    }

    async fn open_with_retry(&mut self) -> Result<FolderState> {
        loop {
            match self.open().await {
                Ok(state) => return Ok(state),
                Err(err) if err.is_transient() => {
                    warn!(folder = self.monitor.folder(), "cannot open session: {err}");
                    debug!("{err:?}");
                    let attempt = self.fail_attempt()?;
                    self.backoff(attempt).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Register a failed attempt, returning the attempt number or an
    /// error once the maximum is reached.
    fn fail_attempt(&mut self) -> Result<u8> {
        let state = self.retry.next();
        let max_attempts = self.retry.max_attempts();
        let attempt = self.retry.attempts;

        warn!(folder = self.monitor.folder(), attempt, max_attempts, "attempt failed");
        fire(&self.events, WatchEvent::Retrying { attempt, max_attempts });

        match state {
            RetryState::Retry(attempt) => Ok(attempt),
            RetryState::Exhausted(attempts) => Err(Error::RetryExhaustedError(attempts)),
        }
    }

    async fn backoff(&self, attempt: u8) -> Result<()> {
        let delay = Duration::from_secs(attempt.into());
        trace!(folder = self.monitor.folder(), ?delay, "waiting before next attempt");

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::CancelledError),
            _ = sleep(delay) => Ok(()),
        }
    }

    fn reconcile(&self, state: &FolderState) {
        let folder = self.monitor.folder();
        info!(folder, count = state.count, "session re-established");

        match self.monitor.reconcile(state.count) {
            Reconciliation::InSync => (),
            Reconciliation::Arrived => {
                debug!(folder, "new messages arrived while reconnecting");
            }
            reconciliation => self.report(reconciliation),
        }
    }

    fn report(&self, reconciliation: Reconciliation) {
        if let Reconciliation::Resynchronized { from, to } = reconciliation {
            let folder = self.monitor.folder();
            warn!(folder, from, to, "message count resynchronized, arrivals may have been missed");
            fire(&self.events, WatchEvent::Resynchronized { from, to });
        }
    }

    async fn stop(&mut self) {
        let folder = self.monitor.folder().to_owned();
        self.monitor.disarm();

        {
            let mut session = self.session.lock().await;
            session.unregister();

            if session.is_connected() {
                if let Err(err) = session.disconnect().await {
                    warn!(folder, "cannot disconnect session: {err}");
                    debug!("{err:?}");
                }
            }
        }

        self.monitor.reset();
        self.transition(WatchState::Stopped);

        info!(folder, "watcher stopped");
        fire(&self.events, WatchEvent::Stopped);
    }
}

impl<S: SessionHandle + 'static> Watcher<S> {
    /// Run the watcher in a dedicated task.
    pub fn spawn(mut self) -> WatchHandle {
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move { self.run().await });
        WatchHandle { shutdown, task }
    }
}

/// Handle of a watcher running in its own task.
#[derive(Debug)]
pub struct WatchHandle {
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl WatchHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the watcher and wait for it to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Wait for the watcher to finish by itself.
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(Error::JoinTaskError)?
    }
}

/// Convenient builder that helps you to build a [`Watcher`].
pub struct WatcherBuilder<S> {
    session: S,
    session_config: SessionConfig,
    watch_config: WatchConfig,
    dispatch_config: DispatchConfig,
    handler: ArrivalHandler,
    events: WatchEventHandler,
    shutdown: CancellationToken,
}

impl<S: SessionHandle> WatcherBuilder<S> {
    pub fn new(session_config: SessionConfig, session: S) -> Self {
        Self {
            session,
            session_config,
            watch_config: Default::default(),
            dispatch_config: Default::default(),
            handler: dispatch::default_handler(),
            events: event::default_handler(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_watch_config(mut self, config: WatchConfig) -> Self {
        self.watch_config = config;
        self
    }

    pub fn with_dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch_config = config;
        self
    }

    /// Set the function called with every batch of new messages.
    pub fn with_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Envelopes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AnyResult<()>> + Send + 'static,
    {
        self.handler = dispatch::handler(f);
        self
    }

    pub fn with_event_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(WatchEvent) -> AnyResult<()> + Send + Sync + 'static,
    {
        self.events = Arc::new(handler);
        self
    }

    /// Use the given token as shutdown token.
    ///
    /// Useful to stop multiple watchers at once.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn build(self) -> Watcher<S> {
        let monitor = FolderMonitor::new(&self.watch_config.folder);
        let dispatcher = Dispatcher::new(
            self.dispatch_config,
            self.watch_config.fetch.clone(),
            self.handler,
        );

        Watcher {
            session_config: self.session_config,
            retry: Retry::new(self.watch_config.find_max_attempts()),
            config: self.watch_config,
            session: SessionSync::new(self.session),
            monitor,
            dispatcher,
            events: self.events,
            shutdown: self.shutdown,
            state: WatchState::Idle,
        }
    }
}
