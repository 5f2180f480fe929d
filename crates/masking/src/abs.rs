//!
//! Access traits for the secret wrappers.
//!

use crate::{Secret, Strategy};

/// Borrow the inner secret value.
pub trait PeekInterface<S> {
    /// Only way to get a reference to the wrapped value.
    fn peek(&self) -> &S;
}

/// Consume the wrapper and return the inner value.
pub trait ExposeInterface<S> {
    /// Take the secret out of its wrapper.
    fn expose(self) -> S;
}

/// Expose the inner value of an optional secret by cloning it.
pub trait ExposeOptionInterface<S> {
    /// Clone the wrapped value out, if present.
    fn expose_option(&self) -> S;
}

impl<S, I> ExposeOptionInterface<Option<S>> for Option<Secret<S, I>>
where
    S: Clone,
    I: Strategy<S>,
{
    fn expose_option(&self) -> Option<S> {
        self.as_ref().map(|secret| secret.peek().clone())
    }
}
