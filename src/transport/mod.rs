//! Transport module - TCP socket handling.

mod tcp;

pub use tcp::{accept, bind, connect};
