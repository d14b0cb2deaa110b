//! Link layer: transport adapters, frame codec, and the link session.
//!
//! The session owns one transport and one deframer, runs the receive loop,
//! matches command acknowledgments, assembles photos, and publishes decoded
//! telemetry onto the event bus. Callers interact through the
//! [`LinkSession`] handle.

pub mod error;
pub mod frame;
pub mod photo;
pub mod session;
pub mod transport;

pub use error::{LinkError, Result};
pub use frame::{
    AckPayload, Deframer, Frame, FrameError, FrameType, PhotoChunk, FRAME_SYNC, MAX_PAYLOAD,
};
pub use photo::PhotoAssembler;
pub use session::{backoff_delay, LinkSession};
pub use transport::{connect, ConfigConnector, Transport, TransportConnector};
