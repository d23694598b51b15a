//! Ordered listener chain with fail-fast / fail-safe dispatch.
//!
//! The listener list is copy-on-write: mutations replace the whole `Arc`'d
//! vector, dispatch clones the `Arc` once and iterates that snapshot. A
//! listener added or removed while a message is being dispatched takes
//! effect from the next message on.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use super::listener::ListenerRef;
use crate::connection::Connection;
use crate::error::{ConnectorError, Result};

/// Ordered list of message listeners shared by all connections of a
/// connector.
pub struct DispatchChain<M> {
    listeners: RwLock<Arc<Vec<ListenerRef<M>>>>,
    fail_fast: bool,
}

impl<M: 'static> DispatchChain<M> {
    /// Empty chain.
    ///
    /// With `fail_fast`, the first listener error aborts dispatch and is
    /// returned; otherwise errors are logged and dispatch continues.
    pub fn new(fail_fast: bool) -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            fail_fast,
        }
    }

    /// Whether listener errors abort dispatch.
    pub fn is_fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Append a listener.
    pub fn add_listener(&self, listener: ListenerRef<M>) {
        self.update(|list| list.push(listener));
    }

    /// Append several listeners, keeping their order.
    pub fn add_listeners(&self, listeners: impl IntoIterator<Item = ListenerRef<M>>) {
        let listeners: Vec<_> = listeners.into_iter().collect();
        self.update(|list| list.extend(listeners));
    }

    /// Put a listener in front of all others.
    pub fn insert_first(&self, listener: ListenerRef<M>) {
        self.update(|list| list.insert(0, listener));
    }

    /// Remove a listener by identity. Returns whether it was registered.
    pub fn remove_listener(&self, listener: &ListenerRef<M>) -> bool {
        let target = Arc::as_ptr(listener).cast::<()>();
        let mut removed = false;
        self.update(|list| {
            if let Some(pos) = list
                .iter()
                .position(|l| Arc::as_ptr(l).cast::<()>() == target)
            {
                list.remove(pos);
                removed = true;
            }
        });
        removed
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Current listener list.
    pub fn snapshot(&self) -> Arc<Vec<ListenerRef<M>>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut Vec<ListenerRef<M>>)) {
        let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let mut list = guard.as_ref().clone();
        f(&mut list);
        *guard = Arc::new(list);
    }

    /// Run a message through the chain.
    ///
    /// Listeners whose predicate rejects the message are skipped. A
    /// listener returning `Ok(false)` stops the chain. Errors and panics
    /// from either the predicate or the handler are listener failures.
    pub fn dispatch(&self, connection: &Connection<M>, message: &M) -> Result<()> {
        let listeners = self.snapshot();

        for (index, listener) in listeners.iter().enumerate() {
            match invoke(listener, connection, message) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::trace!(
                        connection = connection.id(),
                        "Listener #{} stopped message processing",
                        index
                    );
                    break;
                }
                Err(e) if self.fail_fast => {
                    return Err(match e {
                        ConnectorError::Listener(_) => e,
                        other => ConnectorError::listener(other),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        connection = connection.id(),
                        "Listener #{} failed, continuing: {}",
                        index,
                        e
                    );
                }
            }
        }

        Ok(())
    }
}

impl<M: 'static> Default for DispatchChain<M> {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<M> std::fmt::Debug for DispatchChain<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .listeners
            .read()
            .map(|l| l.len())
            .unwrap_or_default();
        f.debug_struct("DispatchChain")
            .field("listeners", &len)
            .field("fail_fast", &self.fail_fast)
            .finish()
    }
}

/// Evaluate one listener, turning panics into listener errors.
///
/// `Ok(true)` means "continue with the next listener".
fn invoke<M: 'static>(listener: &ListenerRef<M>, connection: &Connection<M>, message: &M) -> Result<bool> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        if listener.applies(message) {
            listener.on_message(connection, message)
        } else {
            Ok(true)
        }
    }))
    .unwrap_or_else(|payload| Err(ConnectorError::listener(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("listener panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("listener panicked: {}", s)
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::codec::FieldMessage;
    use crate::handler::listener_fn;
    use crate::iso::IsoMessage;

    type Calls = Arc<Mutex<Vec<&'static str>>>;

    fn recording(name: &'static str, calls: &Calls, result: bool) -> ListenerRef<FieldMessage> {
        let calls = calls.clone();
        listener_fn(
            |_: &FieldMessage| true,
            move |_, _| {
                calls.lock().unwrap().push(name);
                Ok(result)
            },
        )
    }

    fn failing(name: &'static str, calls: &Calls) -> ListenerRef<FieldMessage> {
        let calls = calls.clone();
        listener_fn(
            |_: &FieldMessage| true,
            move |_, _| {
                calls.lock().unwrap().push(name);
                Err(ConnectorError::Listener(format!("{} failed", name)))
            },
        )
    }

    fn panicking_predicate() -> ListenerRef<FieldMessage> {
        listener_fn(
            |_: &FieldMessage| panic!("predicate exploded"),
            |_, _| Ok(true),
        )
    }

    #[tokio::test]
    async fn test_stop_on_false() {
        let (conn, _rx) = Connection::detached(1);
        let calls = Calls::default();
        let chain = DispatchChain::new(true);
        chain.add_listeners([
            recording("l1", &calls, true),
            recording("l2", &calls, false),
            recording("l3", &calls, true),
        ]);

        chain.dispatch(&conn, &FieldMessage::new(0x0200)).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["l1", "l2"]);
    }

    #[tokio::test]
    async fn test_skips_non_applicable() {
        let (conn, _rx) = Connection::detached(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = DispatchChain::new(true);

        let counter = hits.clone();
        chain.add_listener(listener_fn(
            |m: &FieldMessage| m.mti() == 0x0800,
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            },
        ));

        chain.dispatch(&conn, &FieldMessage::new(0x0200)).unwrap();
        chain.dispatch(&conn, &FieldMessage::new(0x0800)).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_safe_continues_after_panic() {
        let (conn, _rx) = Connection::detached(1);
        let calls = Calls::default();
        let chain = DispatchChain::new(false);
        chain.add_listeners([
            recording("l1", &calls, true),
            panicking_predicate(),
            recording("l3", &calls, true),
        ]);

        chain.dispatch(&conn, &FieldMessage::new(0x0200)).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["l1", "l3"]);
    }

    #[tokio::test]
    async fn test_fail_safe_continues_after_error() {
        let (conn, _rx) = Connection::detached(1);
        let calls = Calls::default();
        let chain = DispatchChain::new(false);
        chain.add_listeners([failing("l1", &calls), recording("l2", &calls, true)]);

        chain.dispatch(&conn, &FieldMessage::new(0x0200)).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["l1", "l2"]);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_on_panic() {
        let (conn, _rx) = Connection::detached(1);
        let calls = Calls::default();
        let chain = DispatchChain::new(true);
        chain.add_listeners([
            recording("l1", &calls, true),
            panicking_predicate(),
            recording("l3", &calls, true),
        ]);

        let err = chain.dispatch(&conn, &FieldMessage::new(0x0200)).unwrap_err();

        assert!(matches!(err, ConnectorError::Listener(ref m) if m.contains("predicate exploded")));
        assert_eq!(*calls.lock().unwrap(), vec!["l1"]);
    }

    #[tokio::test]
    async fn test_fail_fast_wraps_other_errors() {
        let (conn, _rx) = Connection::detached(1);
        let chain = DispatchChain::new(true);
        chain.add_listener(listener_fn(
            |_: &FieldMessage| true,
            |_, _| Err(ConnectorError::NotWritable),
        ));

        let err = chain.dispatch(&conn, &FieldMessage::new(0x0200)).unwrap_err();
        assert!(matches!(err, ConnectorError::Listener(ref m) if m.contains("not writable")));
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let (conn, _rx) = Connection::detached(1);
        let calls = Calls::default();
        let chain = DispatchChain::new(true);
        let l1 = recording("l1", &calls, true);
        let l2 = recording("l2", &calls, true);
        chain.add_listeners([l1.clone(), l2.clone()]);

        assert!(chain.remove_listener(&l1));
        assert!(!chain.remove_listener(&l1));
        assert_eq!(chain.len(), 1);

        chain.dispatch(&conn, &FieldMessage::new(0x0200)).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["l2"]);
    }

    #[tokio::test]
    async fn test_insert_first() {
        let (conn, _rx) = Connection::detached(1);
        let calls = Calls::default();
        let chain = DispatchChain::new(true);
        chain.add_listener(recording("late", &calls, true));
        chain.insert_first(recording("first", &calls, true));

        chain.dispatch(&conn, &FieldMessage::new(0x0200)).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["first", "late"]);
    }

    #[tokio::test]
    async fn test_mutation_during_dispatch_uses_snapshot() {
        let (conn, _rx) = Connection::detached(1);
        let calls = Calls::default();
        let chain = Arc::new(DispatchChain::new(true));

        let late = recording("late", &calls, true);
        let chain_ref = Arc::downgrade(&chain);
        let adder_calls = calls.clone();
        chain.add_listener(listener_fn(
            |_: &FieldMessage| true,
            move |_, _| {
                adder_calls.lock().unwrap().push("adder");
                if let Some(chain) = chain_ref.upgrade() {
                    chain.add_listener(late.clone());
                }
                Ok(true)
            },
        ));

        chain.dispatch(&conn, &FieldMessage::new(0x0200)).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["adder"]);
        assert_eq!(chain.len(), 2);
    }
}
