//! Chat engine orchestration module.

pub mod core;

pub use core::{ChatBackends, ChatEngine};
