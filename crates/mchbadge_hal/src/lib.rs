//! Link abstraction shared by the MCH2021 badge programming crates.
//!
//! - `traits`: the `SerialLink` byte channel every backend implements
//! - `config`: versioned protocol constants and board identity
//! - `sim`: an in-process badge answering the raw REPL protocol

pub mod config;
pub mod sim;
pub mod traits;
