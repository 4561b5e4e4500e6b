//! Error handling for the indicator streaming graph.
//!
//! This module provides:
//! - [`HubError`], raised synchronously by every provider and hub operation
//! - Configuration and validation errors used while loading settings
//! - Error classification traits so callers can tell input mistakes from
//!   graph failures
//!
//! None of these errors are retried or swallowed inside the graph. A caller
//! that receives one is expected to fix the input stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use indicator_stream::error::{ErrorClassification, HubError};
//!
//! match quotes.add(quote) {
//!     Ok(_) => {}
//!     Err(e) if e.is_permanent() => eprintln!("rejected input: {e}"),
//!     Err(e) => return Err(e),
//! }
//! ```

mod common;
mod hub;
mod traits;

pub use common::*;
pub use hub::*;
pub use traits::*;
