use std::cell::RefCell;
use std::rc::Rc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use gloo_net::websocket::futures::WebSocket;
use gloo_net::websocket::Message;
use gloo_timers::future::TimeoutFuture;
use live_feed::{
    CloseIntent, CloseOutcome, Coalescer, ConnectionFsm, PayloadCodec, SendError, WireFrame,
    DEFAULT_DEBOUNCE_MS,
};
use stats_core::{CompareRequest, StatsMessage};
use wasm_bindgen_futures::spawn_local;

/// Events the connection surfaces to the controller. Error frames skip the
/// coalescer so failures are never delayed behind a debounce window.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Opened,
    Message(StatsMessage),
    /// Transient server-side throttle; current data stays on screen.
    SoftError(String),
    /// Application error for the current subject.
    HardError(String),
    DecodeFailure(String),
    EncodeFailure(String),
    /// The socket accepted the request but the transport write failed. The
    /// request is parked for the next open; the caller may also fall back.
    SendFailed(CompareRequest),
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Reconnect attempts exhausted.
    ConnectionLost,
}

pub type FeedSink = Rc<dyn Fn(FeedEvent)>;

type Writer = Rc<RefCell<Option<SplitSink<WebSocket, Message>>>>;

struct Inner {
    url: String,
    codec: PayloadCodec,
    fsm: ConnectionFsm<CompareRequest>,
    coalescer: Coalescer<StatsMessage>,
    /// Bumped on every (re)connect and on intentional close; stale async
    /// tasks compare against it and exit instead of acting.
    generation: u64,
}

/// Owns the live stats channel for one subject: socket lifecycle, reconnect
/// backoff, outbound single-slot sends and inbound debounced delivery.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Rc<RefCell<Inner>>,
    writer: Writer,
    sink: FeedSink,
}

impl ConnectionManager {
    pub fn new(codec: PayloadCodec, sink: FeedSink) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                url: String::new(),
                codec,
                fsm: ConnectionFsm::new(),
                coalescer: Coalescer::new(DEFAULT_DEBOUNCE_MS),
                generation: 0,
            })),
            writer: Rc::new(RefCell::new(None)),
            sink,
        }
    }

    /// Point the channel at a subject URL and start the connection loop.
    /// Any previous connection for another subject goes stale immediately,
    /// including its queued debounce timers.
    pub fn connect(&self, url: String) {
        let generation = {
            let mut inner = self.inner.borrow_mut();
            inner.url = url;
            inner.generation += 1;
            inner.fsm = ConnectionFsm::new();
            inner.coalescer.reset();
            inner.generation
        };
        let this = self.clone();
        spawn_local(async move {
            this.run(generation).await;
        });
    }

    /// Intentional close: no reconnect, pending timers invalidated.
    pub fn close(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.generation += 1;
            inner.coalescer.reset();
            inner
                .fsm
                .on_close(CloseIntent::Intentional, Some(1000), "client closed");
        }
        let writer = self.writer.clone();
        spawn_local(async move {
            let taken = writer.borrow_mut().take();
            if let Some(mut w) = taken {
                let _ = w.close().await;
            }
        });
    }

    pub fn is_open(&self) -> bool {
        self.inner.borrow().fsm.is_open()
    }

    /// Send a request now if the channel is open, otherwise park it in the
    /// single pending slot for the next open. Returns whether a write was
    /// started; a transport failure after that surfaces as `SendFailed`.
    pub fn send(&self, request: CompareRequest) -> bool {
        let prepared = self.inner.borrow_mut().fsm.prepare_send(request);
        match prepared {
            Ok(request) => {
                self.transmit(request);
                true
            }
            Err(SendError::NotConnected) => false,
            Err(SendError::SendFailed(_)) => false,
        }
    }

    fn transmit(&self, request: CompareRequest) {
        let frame = match self.inner.borrow().codec.encode(&request) {
            Ok(frame) => frame,
            Err(err) => {
                (self.sink)(FeedEvent::EncodeFailure(err.to_string()));
                return;
            }
        };
        let this = self.clone();
        spawn_local(async move {
            let message = match frame {
                WireFrame::Text(text) => Message::Text(text),
                WireFrame::Binary(bytes) => Message::Bytes(bytes),
            };
            // Take the writer out for the await so a concurrent close cannot
            // observe a held borrow.
            let mut taken = this.writer.borrow_mut().take();
            let sent = match taken.as_mut() {
                Some(writer) => writer.send(message).await.is_ok(),
                None => false,
            };
            if let Some(writer) = taken {
                let mut slot = this.writer.borrow_mut();
                if slot.is_none() {
                    *slot = Some(writer);
                }
            }
            if !sent {
                this.inner
                    .borrow_mut()
                    .fsm
                    .on_send_failure(request.clone());
                (this.sink)(FeedEvent::SendFailed(request));
            }
        });
    }

    async fn run(&self, generation: u64) {
        loop {
            if self.stale(generation) {
                return;
            }
            let url = self.inner.borrow().url.clone();
            match WebSocket::open(&url) {
                Ok(socket) => {
                    let (write, mut read) = socket.split();
                    *self.writer.borrow_mut() = Some(write);
                    let flush = self.inner.borrow_mut().fsm.on_open();
                    (self.sink)(FeedEvent::Opened);
                    if let Some(request) = flush {
                        self.transmit(request);
                    }

                    while let Some(item) = read.next().await {
                        if self.stale(generation) {
                            return;
                        }
                        match item {
                            Ok(message) => self.handle_frame(generation, message),
                            Err(_) => break,
                        }
                    }
                    self.writer.borrow_mut().take();
                }
                Err(_) => {
                    // Fall through to the close handling below; a failed open
                    // consumes a reconnect attempt like a dropped socket.
                }
            }

            if self.stale(generation) {
                return;
            }
            let outcome = self
                .inner
                .borrow_mut()
                .fsm
                .on_close(CloseIntent::Dropped, None, "connection dropped");
            match outcome {
                CloseOutcome::Terminal { gave_up: true } => {
                    (self.sink)(FeedEvent::ConnectionLost);
                    return;
                }
                CloseOutcome::Terminal { gave_up: false } => return,
                CloseOutcome::RetryIn { attempt, delay_ms } => {
                    (self.sink)(FeedEvent::Reconnecting { attempt, delay_ms });
                    TimeoutFuture::new(delay_ms as u32).await;
                    if self.stale(generation) {
                        return;
                    }
                    self.inner.borrow_mut().fsm.on_reconnect_start();
                }
            }
        }
    }

    fn handle_frame(&self, generation: u64, message: Message) {
        let frame = match message {
            Message::Text(text) => WireFrame::Text(text),
            Message::Bytes(bytes) => WireFrame::Binary(bytes),
        };
        let decoded = self.inner.borrow().codec.decode(&frame);
        let message = match decoded {
            Ok(message) => message,
            Err(err) => {
                (self.sink)(FeedEvent::DecodeFailure(err.to_string()));
                return;
            }
        };

        // Error frames deliver immediately; only data snapshots coalesce.
        if let Some(error) = message.error.clone() {
            if message.is_rate_limited() {
                (self.sink)(FeedEvent::SoftError(error));
            } else {
                (self.sink)(FeedEvent::HardError(error));
            }
            return;
        }

        let (token, window_ms) = {
            let mut inner = self.inner.borrow_mut();
            (inner.coalescer.push(message), inner.coalescer.window_ms())
        };
        let this = self.clone();
        spawn_local(async move {
            TimeoutFuture::new(window_ms as u32).await;
            if this.stale(generation) {
                return;
            }
            let fired = this.inner.borrow_mut().coalescer.fire(token);
            if let Some(message) = fired {
                (this.sink)(FeedEvent::Message(message));
            }
        });
    }

    fn stale(&self, generation: u64) -> bool {
        self.inner.borrow().generation != generation
    }
}
