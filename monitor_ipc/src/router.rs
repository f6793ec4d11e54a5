//! Type-tag keyed dispatch of incoming containers.
//!
//! The receiving side of a channel registers handlers per type tag. Each
//! handler gets the raw payload and a [`Responder`] it may use to answer the
//! sender once.
//!
//! Dispatch runs on a snapshot of the handler list taken before the first
//! handler is invoked, with the table lock released. A handler that registers
//! or removes handlers affects the next dispatch, not the current one.

use crate::codec::{self, CodecError};
use crate::container::{Container, Message};
use crate::error::RouterError;
use serde::Serialize;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Function invoked for every container carrying a registered type tag.
pub type Handler = Arc<dyn Fn(Option<&[u8]>, &Responder) + Send + Sync>;

/// Single-shot reply handle given to handlers.
///
/// Clones share one slot: the first [`respond`](Responder::respond) delivers
/// its payload, every later call is ignored. When every clone is dropped
/// without a reply, the waiting [`ResponseReceiver`] resolves to `None`.
#[derive(Clone)]
pub struct Responder {
    slot: Arc<Mutex<Option<oneshot::Sender<Option<Vec<u8>>>>>>,
}

/// Waiting side of a [`Responder`].
#[derive(Debug)]
pub struct ResponseReceiver {
    rx: oneshot::Receiver<Option<Vec<u8>>>,
}

impl Responder {
    /// Create a responder and the receiver its reply is delivered to.
    pub fn new() -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let responder = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (responder, ResponseReceiver { rx })
    }

    /// Deliver a reply. Returns `false` if a reply was already delivered or
    /// the receiver is gone.
    pub fn respond(&self, payload: Option<Vec<u8>>) -> bool {
        let sender = self.slot.lock().unwrap().take();
        match sender {
            Some(tx) => tx.send(payload).is_ok(),
            None => {
                trace!("Ignoring second reply on a completed responder");
                false
            }
        }
    }

    /// Serialize `value` and deliver it as the reply.
    pub fn reply<T: Serialize>(&self, value: &T) -> Result<bool, CodecError> {
        let payload = codec::encode(value)?;
        Ok(self.respond(Some(payload)))
    }

    /// Whether no reply has been delivered yet.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl ResponseReceiver {
    /// Wait for the reply. `None` means the responder answered without a
    /// payload or was dropped without answering.
    pub async fn recv(self) -> Option<Vec<u8>> {
        self.rx.await.ok().flatten()
    }

    /// Take the reply if it has already been delivered.
    ///
    /// Returns `None` while the responder is still pending, `Some(None)` if
    /// it completed without a payload.
    pub fn try_recv(&mut self) -> Option<Option<Vec<u8>>> {
        match self.rx.try_recv() {
            Ok(payload) => Some(payload),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(None),
        }
    }
}

#[derive(Default)]
struct Route {
    /// Schema that claimed this tag through typed registration
    schema: Option<TypeId>,
    handlers: Vec<Handler>,
}

/// Mapping of type tags to ordered handler lists.
#[derive(Default)]
pub struct Router {
    routes: Mutex<HashMap<String, Route>>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `type_tag`. Handlers run in registration order.
    pub fn add_handler<F>(&self, type_tag: &str, handler: F)
    where
        F: Fn(Option<&[u8]>, &Responder) + Send + Sync + 'static,
    {
        let mut routes = self.routes.lock().unwrap();
        routes
            .entry(type_tag.to_string())
            .or_default()
            .handlers
            .push(Arc::new(handler));
        debug!(tag = type_tag, "Registered message handler");
    }

    /// Append a handler that receives the decoded message.
    ///
    /// Fails if another schema has already claimed `M::TYPE_TAG`. A payload
    /// that does not decode as `M` is logged and the handler is skipped.
    pub fn add_message_handler<M, F>(&self, handler: F) -> Result<(), RouterError>
    where
        M: Message,
        F: Fn(M, &Responder) + Send + Sync + 'static,
    {
        let mut routes = self.routes.lock().unwrap();
        let route = routes.entry(M::TYPE_TAG.to_string()).or_default();
        let schema = TypeId::of::<M>();
        match route.schema {
            Some(existing) if existing != schema => {
                return Err(RouterError::TagCollision {
                    tag: M::TYPE_TAG.to_string(),
                });
            }
            _ => route.schema = Some(schema),
        }

        route.handlers.push(Arc::new(move |payload, responder| {
            match codec::decode::<M>(payload.unwrap_or_default()) {
                Ok(message) => handler(message, responder),
                Err(e) => warn!(tag = M::TYPE_TAG, error = %e, "Dropping undecodable message"),
            }
        }));
        debug!(tag = M::TYPE_TAG, "Registered typed message handler");
        Ok(())
    }

    /// Snapshot of the handlers currently registered for `type_tag`.
    pub fn handlers(&self, type_tag: &str) -> Vec<Handler> {
        self.routes
            .lock()
            .unwrap()
            .get(type_tag)
            .map(|route| route.handlers.clone())
            .unwrap_or_default()
    }

    /// Remove every handler registered for `type_tag`.
    pub fn remove_handlers(&self, type_tag: &str) {
        if self.routes.lock().unwrap().remove(type_tag).is_some() {
            debug!(tag = type_tag, "Removed message handlers");
        }
    }

    /// Invoke every handler registered for the container's type tag, in
    /// registration order. Returns the number of handlers invoked; zero is
    /// not an error.
    ///
    /// The router does not stop a handler from ignoring the responder, and
    /// only the first of several replying handlers is delivered.
    pub fn handle(&self, container: &Container, responder: &Responder) -> usize {
        let handlers = self.handlers(container.type_tag());
        if handlers.is_empty() {
            debug!(tag = container.type_tag(), "No handlers registered");
            return 0;
        }

        for handler in &handlers {
            handler(container.content(), responder);
        }
        debug!(
            tag = container.type_tag(),
            handlers = handlers.len(),
            "Dispatched message"
        );
        handlers.len()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes = self.routes.lock().unwrap();
        let mut tags: Vec<_> = routes
            .iter()
            .map(|(tag, route)| (tag.as_str(), route.handlers.len()))
            .collect();
        tags.sort_unstable();
        f.debug_struct("Router").field("routes", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct MessageTypeA;

    impl Message for MessageTypeA {
        const TYPE_TAG: &'static str = "test.a";
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct MessageTypeB {
        value: u32,
    }

    impl Message for MessageTypeB {
        const TYPE_TAG: &'static str = "test.b";
    }

    #[derive(Serialize, Deserialize)]
    struct Impostor;

    impl Message for Impostor {
        const TYPE_TAG: &'static str = "test.a";
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(Option<&[u8]>, &Responder) + Send + Sync) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler_count = count.clone();
        (count, move |_: Option<&[u8]>, _: &Responder| {
            handler_count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_unregistered_tag_invokes_nothing() {
        let router = Router::new();
        let (count, handler) = counter();
        router.add_handler(MessageTypeB::TYPE_TAG, handler);

        let (responder, _rx) = Responder::new();
        let invoked = router.handle(&Container::make(&MessageTypeA).unwrap(), &responder);

        assert_eq!(invoked, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_invoked_for_related_type() {
        let router = Router::new();
        let (count_a, handler_a) = counter();
        let (count_b, handler_b) = counter();
        router.add_handler(MessageTypeA::TYPE_TAG, handler_a);
        router.add_handler(MessageTypeB::TYPE_TAG, handler_b);

        let (responder, _rx) = Responder::new();
        let invoked = router.handle(&Container::make(&MessageTypeA).unwrap(), &responder);

        assert_eq!(invoked, 1);
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let router = Router::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..4 {
            let order = order.clone();
            router.add_handler("test.a", move |_, _| order.lock().unwrap().push(id));
        }

        let (responder, _rx) = Responder::new();
        let invoked = router.handle(&Container::new("test.a", None), &responder);

        assert_eq!(invoked, 4);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_remove_handlers() {
        let router = Router::new();
        let (count, handler) = counter();
        router.add_handler("test.a", handler);
        router.remove_handlers("test.a");

        let (responder, _rx) = Responder::new();
        assert_eq!(router.handle(&Container::new("test.a", None), &responder), 0);
        assert!(router.handlers("test.a").is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handlers_returns_snapshot() {
        let router = Router::new();
        router.add_handler("test.a", |_, _| {});
        let snapshot = router.handlers("test.a");
        router.add_handler("test.a", |_, _| {});

        assert_eq!(snapshot.len(), 1);
        assert_eq!(router.handlers("test.a").len(), 2);
    }

    #[test]
    fn test_registration_during_dispatch_applies_to_next_dispatch() {
        let router = Arc::new(Router::new());
        let inner = Arc::downgrade(&router);
        router.add_handler("test.a", move |_, _| {
            if let Some(router) = inner.upgrade() {
                router.add_handler("test.a", |_, _| {});
            }
        });

        let (responder, _rx) = Responder::new();
        let container = Container::new("test.a", None);
        assert_eq!(router.handle(&container, &responder), 1);
        assert_eq!(router.handle(&container, &responder), 2);
    }

    #[test]
    fn test_first_reply_wins() {
        let router = Router::new();
        router.add_handler("test.a", |_, responder| {
            responder.respond(Some(b"first".to_vec()));
        });
        router.add_handler("test.a", |_, responder| {
            assert!(!responder.respond(Some(b"second".to_vec())));
        });

        let (responder, mut rx) = Responder::new();
        assert_eq!(router.handle(&Container::new("test.a", None), &responder), 2);
        assert_eq!(rx.try_recv(), Some(Some(b"first".to_vec())));
    }

    #[test]
    fn test_dropped_responder_resolves_empty() {
        let (responder, mut rx) = Responder::new();
        assert_eq!(rx.try_recv(), None);
        drop(responder);
        assert_eq!(rx.try_recv(), Some(None));
    }

    #[test]
    fn test_typed_handler_receives_decoded_message() {
        let router = Router::new();
        let seen = Arc::new(Mutex::new(None));
        let handler_seen = seen.clone();
        router
            .add_message_handler(move |message: MessageTypeB, responder| {
                *handler_seen.lock().unwrap() = Some(message.value);
                responder.reply(&message.value).unwrap();
            })
            .unwrap();

        let (responder, mut rx) = Responder::new();
        let container = Container::make(&MessageTypeB { value: 42 }).unwrap();
        assert_eq!(router.handle(&container, &responder), 1);

        assert_eq!(*seen.lock().unwrap(), Some(42));
        let reply = rx.try_recv().flatten().unwrap();
        assert_eq!(codec::decode::<u32>(&reply).unwrap(), 42);
    }

    #[test]
    fn test_typed_registration_rejects_tag_collision() {
        let router = Router::new();
        router
            .add_message_handler(|_: MessageTypeA, _| {})
            .unwrap();
        router
            .add_message_handler(|_: MessageTypeA, _| {})
            .unwrap();

        let err = router.add_message_handler(|_: Impostor, _| {}).unwrap_err();
        assert_eq!(
            err,
            RouterError::TagCollision {
                tag: "test.a".to_string()
            }
        );
        assert_eq!(router.handlers("test.a").len(), 2);
    }
}
