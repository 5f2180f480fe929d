#![forbid(unsafe_code)]
#![warn(missing_docs)]

//!
//! Protection for sensitive handshake material. Wrapper types which keep
//! secrets out of `Debug` output and logs, and wipe key data from memory when
//! it is dropped.
//!

pub use zeroize::Zeroize as ZeroizableSecret;

mod strategy;
pub use strategy::{Strategy, WithType, WithoutType};

mod abs;
pub use abs::{ExposeInterface, ExposeOptionInterface, PeekInterface};

mod secret;
pub use secret::Secret;

mod strong_secret;
pub use strong_secret::StrongSecret;

mod maskable;
pub use maskable::{Mask, Maskable};

/// Glob-import surface for the commonly used access traits.
///
/// `use masking::prelude::*;`
pub mod prelude {
    pub use super::{ExposeInterface, ExposeOptionInterface, PeekInterface};
}
