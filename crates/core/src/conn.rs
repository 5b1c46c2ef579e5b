//! Connection lifecycle base and manager (§4.3).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_conn.hpp`'s
//! `SrsConnection`: every inbound connection is driven by repeated calls to
//! `do_cycle()` until it errors or is asked to stop, and removes itself from
//! its owning manager exactly once, via a callback, rather than the manager
//! polling connection state.

use std::sync::{Arc, Mutex};

use crate::coroutine::CancelToken;
use crate::error::Error;

/// Per-connection work contract. `id()` is only used for logging.
pub trait ConnectionHandler: Send {
    fn id(&self) -> u32;

    /// Run one iteration of the connection's protocol loop. Returning `Err`
    /// ends the connection; the manager will not call `do_cycle` again.
    fn do_cycle(&mut self, cancel: &CancelToken) -> Result<(), Error>;
}

/// Callback a [`Connection`] uses to remove itself from its manager exactly
/// once its cycle ends, regardless of whether it ended in error.
pub trait RemoveNotify: Send + Sync {
    fn remove(&self, conn_id: u32);
}

/// Wraps a [`ConnectionHandler`] with the self-removal contract.
///
/// Unlike `SrsConnection`, which is driven by an `SrsCoroutine`, the thread
/// spawn here is left to the caller (typically the accept loop in
/// `rtsp::caster`), since the manager only needs to track liveness and
/// sweep pending deletes, not own the thread.
pub struct Connection<H: ConnectionHandler> {
    handler: Mutex<H>,
    removed: Mutex<bool>,
}

impl<H: ConnectionHandler> Connection<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Mutex::new(handler),
            removed: Mutex::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.handler.lock().unwrap().id()
    }

    /// Run `do_cycle` in a loop until it errors or `cancel` fires, then
    /// notify `manager` exactly once. Intended to be the body of the
    /// connection's dedicated thread.
    pub fn run(self: &Arc<Self>, cancel: CancelToken, manager: Arc<dyn RemoveNotify>) {
        let result = loop {
            if cancel.cancelled() {
                break Ok(());
            }
            let mut h = self.handler.lock().unwrap();
            match h.do_cycle(&cancel) {
                Ok(()) => continue,
                Err(e) => break Err(e),
            }
        };
        if let Err(e) = result {
            tracing::debug!(conn_id = self.id(), error = %e, "connection cycle ended");
        }
        self.notify_removed(manager.as_ref());
    }

    fn notify_removed(&self, manager: &dyn RemoveNotify) {
        let mut removed = self.removed.lock().unwrap();
        if !*removed {
            *removed = true;
            manager.remove(self.id());
        }
    }
}

/// Tracks live connections and sweeps ones marked for deletion.
///
/// `SrsConnection`'s manager (`SrsServer` in the original) keeps a list and
/// a "zombie" queue so removal never happens while the caller is iterating
/// the live list; this is the same split, guarded by one mutex since our
/// connection counts are modest (bound by RTP/RTCP port pool size).
pub struct ConnectionManager<T> {
    live: Mutex<Vec<(u32, Arc<T>)>>,
    pending_delete: Mutex<Vec<u32>>,
}

impl<T> Default for ConnectionManager<T> {
    fn default() -> Self {
        Self {
            live: Mutex::new(Vec::new()),
            pending_delete: Mutex::new(Vec::new()),
        }
    }
}

impl<T> ConnectionManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: u32, conn: Arc<T>) {
        self.live.lock().unwrap().push((id, conn));
    }

    pub fn mark_for_removal(&self, id: u32) {
        self.pending_delete.lock().unwrap().push(id);
    }

    /// Drop any connection queued by `mark_for_removal` from the live list.
    /// Call periodically (e.g. once per accept-loop iteration).
    pub fn sweep(&self) {
        let mut pending = self.pending_delete.lock().unwrap();
        if pending.is_empty() {
            return;
        }
        let mut live = self.live.lock().unwrap();
        live.retain(|(id, _)| !pending.contains(id));
        pending.clear();
    }

    pub fn len(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of current live connections, for orchestration that needs
    /// to interrupt everything on shutdown.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.live.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }
}

/// A manager is its own removal sink: a connection calls back into the
/// manager that owns it to mark itself for the next sweep.
impl<T> RemoveNotify for ConnectionManager<T>
where
    T: Send + Sync,
{
    fn remove(&self, conn_id: u32) {
        self.mark_for_removal(conn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        id: u32,
        calls: Arc<AtomicUsize>,
        fail_after: usize,
    }

    impl ConnectionHandler for CountingHandler {
        fn id(&self) -> u32 {
            self.id
        }

        fn do_cycle(&mut self, _cancel: &CancelToken) -> Result<(), Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n + 1 >= self.fail_after {
                Err(Error::TaskTerminated)
            } else {
                Ok(())
            }
        }
    }

    struct TestManager(Arc<ConnectionManager<()>>);

    impl RemoveNotify for TestManager {
        fn remove(&self, id: u32) {
            self.0.mark_for_removal(id);
        }
    }

    #[test]
    fn connection_self_removes_exactly_once_on_error() {
        let mgr: Arc<ConnectionManager<()>> = Arc::new(ConnectionManager::new());
        mgr.add(1, Arc::new(()));
        let notify: Arc<dyn RemoveNotify> = Arc::new(TestManager(mgr.clone()));

        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            id: 1,
            calls: calls.clone(),
            fail_after: 3,
        };
        let conn = Arc::new(Connection::new(handler));

        let cancel = crate::coroutine::test_support::never_cancelled_token();

        conn.run(cancel, notify);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(mgr.len(), 1); // not yet swept
        mgr.sweep();
        assert_eq!(mgr.len(), 0);
    }
}
