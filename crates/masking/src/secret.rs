//!
//! A wrapper that masks its value in `Debug` output.
//!

use std::{fmt, marker::PhantomData};

use crate::{strategy::Strategy, ExposeInterface, PeekInterface, WithType};

/// A value that must not show up in logs.
///
/// `Debug` renders the masking strategy's output instead of the value. Access
/// goes through [`PeekInterface::peek`] (borrow) or
/// [`ExposeInterface::expose`] (consume), so every read site is explicit.
///
/// Serialization is transparent: persisted correlation state and outbound
/// gateway bodies need the real value on the wire, while the wrapper protects
/// every in-process rendering of it.
pub struct Secret<S, I = WithType>
where
    I: Strategy<S>,
{
    pub(crate) inner_secret: S,
    pub(crate) masker: PhantomData<I>,
}

impl<S, I> Secret<S, I>
where
    I: Strategy<S>,
{
    /// Take ownership of a secret value.
    pub fn new(secret: S) -> Self {
        Self {
            inner_secret: secret,
            masker: PhantomData,
        }
    }
}

impl<S, I> PeekInterface<S> for Secret<S, I>
where
    I: Strategy<S>,
{
    fn peek(&self) -> &S {
        &self.inner_secret
    }
}

impl<S, I> ExposeInterface<S> for Secret<S, I>
where
    I: Strategy<S>,
{
    fn expose(self) -> S {
        self.inner_secret
    }
}

impl<S, I> From<S> for Secret<S, I>
where
    I: Strategy<S>,
{
    fn from(secret: S) -> Self {
        Self::new(secret)
    }
}

impl<S: Clone, I> Clone for Secret<S, I>
where
    I: Strategy<S>,
{
    fn clone(&self) -> Self {
        Self {
            inner_secret: self.inner_secret.clone(),
            masker: PhantomData,
        }
    }
}

impl<S: PartialEq, I> PartialEq for Secret<S, I>
where
    I: Strategy<S>,
{
    fn eq(&self, other: &Self) -> bool {
        self.peek() == other.peek()
    }
}

impl<S: Eq, I> Eq for Secret<S, I> where I: Strategy<S> {}

impl<S, I> fmt::Debug for Secret<S, I>
where
    I: Strategy<S>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        I::fmt(&self.inner_secret, f)
    }
}

impl<S: Default, I> Default for Secret<S, I>
where
    I: Strategy<S>,
{
    fn default() -> Self {
        S::default().into()
    }
}

impl<S, I> serde::Serialize for Secret<S, I>
where
    S: serde::Serialize,
    I: Strategy<S>,
{
    fn serialize<T: serde::Serializer>(&self, serializer: T) -> Result<T::Ok, T::Error> {
        self.peek().serialize(serializer)
    }
}

impl<'de, S, I> serde::Deserialize<'de> for Secret<S, I>
where
    S: serde::Deserialize<'de>,
    I: Strategy<S>,
{
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        S::deserialize(deserializer).map(Self::new)
    }
}
