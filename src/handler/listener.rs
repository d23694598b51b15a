//! Message listener trait and closure adapter.

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::Result;

/// A predicate + handler pair in the dispatch chain.
///
/// Listeners run on the connection's read task, one message at a time.
/// Long-running work should be spawned onto the runtime instead of done
/// inline.
pub trait MessageListener<M>: Send + Sync + 'static {
    /// Whether this listener wants the message.
    fn applies(&self, message: &M) -> bool;

    /// Handle the message.
    ///
    /// Returns `Ok(true)` to let later listeners see the message,
    /// `Ok(false)` to stop the chain.
    fn on_message(&self, connection: &Connection<M>, message: &M) -> Result<bool>;
}

/// Shared listener reference; identity is the `Arc` pointer.
pub type ListenerRef<M> = Arc<dyn MessageListener<M>>;

/// Listener built from two closures.
struct FnListener<A, H> {
    applies: A,
    handle: H,
}

impl<M, A, H> MessageListener<M> for FnListener<A, H>
where
    M: 'static,
    A: Fn(&M) -> bool + Send + Sync + 'static,
    H: Fn(&Connection<M>, &M) -> Result<bool> + Send + Sync + 'static,
{
    fn applies(&self, message: &M) -> bool {
        (self.applies)(message)
    }

    fn on_message(&self, connection: &Connection<M>, message: &M) -> Result<bool> {
        (self.handle)(connection, message)
    }
}

/// Build a listener from a predicate and a handler.
///
/// ```
/// use iso8583_connector::codec::FieldMessage;
/// use iso8583_connector::handler::listener_fn;
/// use iso8583_connector::iso::IsoMessage;
///
/// let listener = listener_fn(
///     |m: &FieldMessage| m.mti() == 0x0200,
///     |connection, m| {
///         let mut response = m.clone();
///         response.set_field(39, iso8583_connector::iso::FieldValue::numeric(0, 2));
///         connection.send(response)?;
///         Ok(false)
///     },
/// );
/// # let _ = listener;
/// ```
pub fn listener_fn<M, A, H>(applies: A, handle: H) -> ListenerRef<M>
where
    M: 'static,
    A: Fn(&M) -> bool + Send + Sync + 'static,
    H: Fn(&Connection<M>, &M) -> Result<bool> + Send + Sync + 'static,
{
    Arc::new(FnListener { applies, handle })
}
