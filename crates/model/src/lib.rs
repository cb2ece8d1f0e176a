//! An abstraction layer for generative-language services.
//!
//! This crate establishes an unified protocol for the conversation core
//! to talk to a completion service, so that the core can switch between
//! backends (or a scripted fake in tests) without modifying its code.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
