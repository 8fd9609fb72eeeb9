//! Serial backend for the MCH2021 badge.
//!
//! `locator` picks the badge among the host's serial ports by USB identity;
//! `link` implements `SerialLink` over a tokio-serial stream driven from an
//! owned runtime, so callers see a plain blocking API.

pub mod link;
pub mod locator;

pub use link::StreamLink;
pub use locator::{locate, select, Candidate};
