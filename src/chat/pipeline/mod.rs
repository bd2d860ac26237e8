//! Busy flag, input buffer and the send pipeline.

pub mod busy;
pub mod input;
pub mod send_pipeline;

pub use busy::{BusyFlag, BusyGuard};
pub use input::InputBuffer;
pub use send_pipeline::{Exchange, RejectReason, ReplySource, SendOutcome, SendPipeline};
