//! # Dispatch
//!
//! The [`Dispatcher`] runs one fetch and dispatch attempt: it fetches
//! the messages the tracker does not know yet, tracks them, then
//! hands them over to the caller's [`ArrivalHandler`]. If anything
//! goes wrong after tracking, the attempt is rolled back so that the
//! next one fetches the same messages again.
//!
//! The retry policy around attempts lives in the watcher.

use std::{fmt, future::Future, sync::Arc};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
    config::DispatchConfig,
    envelope::{Envelopes, FetchFields, Uid},
    event::{fire, WatchEvent, WatchEventHandler},
    monitor::FolderMonitor,
    session::{SessionHandle, SessionSync},
    AnyResult, Error, Result,
};

/// The arrival handler alias.
///
/// Receives every batch of new messages, ordered by position. The
/// returned future is fully awaited before the next fetch starts.
pub type ArrivalHandler =
    Arc<dyn Fn(Envelopes) -> BoxFuture<'static, AnyResult<()>> + Send + Sync>;

/// Wrap the given async function into an [`ArrivalHandler`].
pub fn handler<F, Fut>(f: F) -> ArrivalHandler
where
    F: Fn(Envelopes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AnyResult<()>> + Send + 'static,
{
    Arc::new(move |envelopes| Box::pin(f(envelopes)))
}

pub(crate) fn default_handler() -> ArrivalHandler {
    Arc::new(|_| Box::pin(async { Ok(()) }))
}

#[derive(Clone)]
pub struct Dispatcher {
    config: DispatchConfig,
    fields: FetchFields,
    handler: ArrivalHandler,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, fields: FetchFields, handler: ArrivalHandler) -> Self {
        Self {
            config,
            fields,
            handler,
        }
    }

    /// Run one fetch and dispatch attempt.
    ///
    /// Returns the identifiers of the dispatched messages. On error,
    /// the identifiers tracked during the attempt are untracked.
    pub async fn dispatch<S: SessionHandle>(
        &self,
        session: &SessionSync<S>,
        monitor: &FolderMonitor,
        shutdown: &CancellationToken,
        events: &WatchEventHandler,
    ) -> Result<Vec<Uid>> {
        let folder = monitor.folder();
        let range = monitor.delta();

        if range.is_empty() {
            debug!(folder, "no new message to fetch");
            return Ok(Vec::new());
        }

        debug!(folder, from = range.start, to = range.end, "fetching new messages");

        let fetch = async {
            let mut session = session.lock().await;
            session.fetch_summaries(range.clone(), &self.fields).await
        };

        let envelopes = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(folder, "watch cancelled during fetch");
                return Err(Error::CancelledError);
            }
            envelopes = fetch => envelopes?,
        };

        let mut envelopes = Envelopes::from(envelopes);
        let count = envelopes.len();
        info!(folder, count, "fetched new messages");
        fire(events, WatchEvent::Fetched { count });

        let added = monitor.track(envelopes.uids());
        envelopes.retain(|envelope| added.contains(&envelope.uid));

        if envelopes.is_empty() {
            debug!(folder, "fetched messages are already known, skipping dispatch");
            return Ok(Vec::new());
        }

        for envelope in envelopes.iter_mut() {
            self.config.complete(envelope);
        }

        trace!(folder, "dispatching uids {added:?}");

        let res = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(folder, "watch cancelled during dispatch");
                Err(Error::CancelledError)
            }
            res = (self.handler)(envelopes) => res.map_err(Error::HandlerError),
        };

        if let Err(err) = res {
            debug!(folder, "rolling back {} tracked message(s)", added.len());
            monitor.untrack(&added);
            return Err(err);
        }

        fire(events, WatchEvent::Dispatched { count: added.len() });
        Ok(added)
    }
}
