#![forbid(unsafe_code)]
#![warn(missing_docs)]

//!
//! Environment of the app switch SDK: gateway environment selection and
//! structured logging.
//!

pub mod env;
pub mod logger;

#[doc(inline)]
pub use env::Env;
#[doc(inline)]
pub use logger::*;
pub use tracing;
