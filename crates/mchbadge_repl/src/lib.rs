//! Bitstream upload through the badge's interactive interpreter.
//!
//! The driver walks the interpreter into raw execution mode and runs single
//! statements; the uploader streams a base64-encoded bitstream into a remote
//! accumulator one bounded statement at a time, then decodes and loads it.

pub mod accumulator;
pub mod driver;
pub mod error;
pub mod payload;
pub mod uploader;

pub use driver::{ExecOutcome, RawReplDriver, ReplState};
pub use error::{Phase, UploadError};
pub use uploader::{upload, UploadReport};
