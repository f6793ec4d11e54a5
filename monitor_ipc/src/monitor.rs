//! Request/response sends and periodic polling against a bound channel.

use crate::channel::Channel;
use crate::codec;
use crate::container::{Container, Message};
use crate::error::{CommunicationError, CommunicationResult};
use crate::router::{Responder, ResponseReceiver};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::thread::{self, ThreadId};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest poll interval accepted by [`Monitor::start_monitoring`].
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Held by the loop while a tick starts its send, and by `stop` while
/// cancelling, so no tick can start once `stop` has returned.
///
/// The holder's thread is recorded so a stop issued from inside the tick,
/// e.g. by a loop-back handler, cancels without waiting on itself.
#[derive(Default)]
struct TickGate {
    lock: Mutex<()>,
    holder: Mutex<Option<ThreadId>>,
}

struct TickGuard<'a> {
    gate: &'a TickGate,
    _lock: MutexGuard<'a, ()>,
}

impl TickGate {
    fn enter(&self) -> TickGuard<'_> {
        let lock = self.lock.lock().unwrap();
        *self.holder.lock().unwrap() = Some(thread::current().id());
        TickGuard { gate: self, _lock: lock }
    }

    fn held_by_current_thread(&self) -> bool {
        *self.holder.lock().unwrap() == Some(thread::current().id())
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        *self.gate.holder.lock().unwrap() = None;
    }
}

/// Handle to the running poll loop.
struct PollTask {
    cancel: CancellationToken,
    gate: Arc<TickGate>,
    handle: JoinHandle<()>,
}

impl PollTask {
    fn stop(self) {
        if self.gate.held_by_current_thread() {
            // Called from within the tick; the loop exits before its next one.
            self.cancel.cancel();
            return;
        }
        let _gate = self.gate.enter();
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct MonitorInner {
    channel: RwLock<Option<Arc<dyn Channel>>>,
    poll: Mutex<Option<PollTask>>,
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        if let Ok(poll) = self.poll.get_mut() {
            if let Some(task) = poll.take() {
                task.cancel.cancel();
            }
        }
    }
}

/// Sends typed requests to the tunnel provider and polls it for updates.
///
/// The monitor holds a reference to a channel it does not own; the channel
/// can be swapped at any time with [`set_channel`](Monitor::set_channel).
/// Clones share the same channel and poll loop.
#[derive(Clone, Default)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    /// Create a monitor with no channel bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bound channel. A poll tick already sending keeps the
    /// channel it started with; the next tick uses the new one.
    pub fn set_channel(&self, channel: Option<Arc<dyn Channel>>) {
        *self.inner.channel.write().unwrap() = channel;
    }

    /// The currently bound channel.
    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.inner.channel.read().unwrap().clone()
    }

    /// Send `request` and wait for the provider's response.
    ///
    /// Resolves exactly once: with the decoded response, or with the first
    /// [`CommunicationError`] encountered.
    pub async fn send<Req, Resp>(&self, request: &Req) -> CommunicationResult<Resp>
    where
        Req: Message,
        Resp: DeserializeOwned,
    {
        let pending = self.dispatch(request)?;
        Self::receive(pending).await
    }

    /// Everything in a send up to handing the message to the channel.
    fn dispatch<Req: Message>(&self, request: &Req) -> CommunicationResult<ResponseReceiver> {
        let channel = self.channel().ok_or(CommunicationError::InvalidExtension)?;

        let status = channel.status();
        if !status.is_connected() {
            return Err(CommunicationError::InvalidState(status));
        }

        let message = Container::make(request)
            .and_then(|container| container.encode())
            .map_err(CommunicationError::ContainerSerialization)?;

        let (responder, pending) = Responder::new();
        channel
            .send_message(message, responder)
            .map_err(CommunicationError::SendFailure)?;
        debug!(tag = Req::TYPE_TAG, "Sent message to provider");
        Ok(pending)
    }

    async fn receive<Resp: DeserializeOwned>(pending: ResponseReceiver) -> CommunicationResult<Resp> {
        let payload = pending.recv().await.ok_or(CommunicationError::NilResponse)?;
        codec::decode(&payload).map_err(CommunicationError::ResponseDecoding)
    }

    /// Poll the provider every `poll_interval`, starting immediately.
    ///
    /// Each tick builds a request with `request_builder`, sends it and hands
    /// the result to `response_handler`, failures included; the loop keeps
    /// going regardless. Ticks follow a fixed schedule anchored at the start
    /// of the loop, and a tick whose slot passed while the previous send was
    /// still waiting is skipped. Any loop already running is stopped first.
    ///
    /// `request_builder` and any handler the channel runs synchronously
    /// during the send may call [`stop_monitoring`](Monitor::stop_monitoring)
    /// or `start_monitoring`; the current tick still delivers its result.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start_monitoring<Req, Resp, B, H>(
        &self,
        mut request_builder: B,
        mut response_handler: H,
        poll_interval: Duration,
    ) where
        Req: Message,
        Resp: DeserializeOwned + Send + 'static,
        B: FnMut() -> Req + Send + 'static,
        H: FnMut(CommunicationResult<Resp>) + Send + 'static,
    {
        let poll_interval = if poll_interval < MIN_POLL_INTERVAL {
            warn!(?poll_interval, "Poll interval too short, using {:?}", MIN_POLL_INTERVAL);
            MIN_POLL_INTERVAL
        } else {
            poll_interval
        };

        let mut poll = self.inner.poll.lock().unwrap();
        if let Some(previous) = poll.take() {
            debug!("Replacing running poll loop");
            previous.stop();
        }

        let cancel = CancellationToken::new();
        let gate = Arc::new(TickGate::default());
        let monitor: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let task_cancel = cancel.clone();
        let task_gate = gate.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let pending = {
                    let _gate = task_gate.enter();
                    if task_cancel.is_cancelled() {
                        break;
                    }
                    let Some(inner) = monitor.upgrade() else {
                        break;
                    };
                    Monitor { inner }.dispatch(&request_builder())
                };

                let result = match pending {
                    Ok(pending) => Self::receive(pending).await,
                    Err(e) => Err(e),
                };
                response_handler(result);
            }
            debug!("Poll loop exited");
        });

        *poll = Some(PollTask {
            cancel,
            gate,
            handle,
        });
        info!(?poll_interval, tag = Req::TYPE_TAG, "Started monitoring");
    }

    /// Stop the poll loop, if one is running.
    ///
    /// No tick starts after this returns. A send already in flight still
    /// delivers its result to the response handler.
    pub fn stop_monitoring(&self) {
        if let Some(task) = self.inner.poll.lock().unwrap().take() {
            task.stop();
            info!("Stopped monitoring");
        }
    }

    /// Whether a poll loop is running.
    pub fn is_monitoring(&self) -> bool {
        self.inner
            .poll
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }
}
