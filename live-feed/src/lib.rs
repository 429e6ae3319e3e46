//! Connection-layer logic for the live stats channel: wire codec,
//! reconnect state machine and update coalescing. Everything here is
//! DOM-agnostic; the wasm frontend drives the timers and the socket.

pub mod coalesce;
pub mod codec;
pub mod reconnect;

pub use coalesce::{Coalescer, DEFAULT_DEBOUNCE_MS};
pub use codec::{DecodeError, EncodeError, PayloadCodec, WireFrame};
pub use reconnect::{
    CloseIntent, CloseOutcome, ConnectionFsm, ConnectionState, SendError,
    BASE_RECONNECT_DELAY_MS, MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_DELAY_MS,
};
