//! Network subsystem: TCP transport and the two session pipelines

pub mod receiver;
pub mod sender;
pub mod transport;

pub use receiver::{run_receive, ReceiveExit, ReceiveOutcome, ReceiveStats};
pub use sender::{run_capture, CaptureExit, CaptureOutcome, CaptureStats};
pub use transport::{normalize_host, Transport};
