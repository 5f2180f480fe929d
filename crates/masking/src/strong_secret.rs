//!
//! A masked wrapper that wipes its value from memory on drop.
//!

use std::{fmt, marker::PhantomData};

use zeroize::Zeroize;

use crate::{strategy::Strategy, PeekInterface, WithType};

/// Key material and request bodies go in here: masked like [`crate::Secret`],
/// and zeroized when the wrapper is dropped.
pub struct StrongSecret<S: Zeroize, I = WithType>
where
    I: Strategy<S>,
{
    inner_secret: S,
    masker: PhantomData<I>,
}

impl<S: Zeroize, I> StrongSecret<S, I>
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

impl<S: Zeroize, I> PeekInterface<S> for StrongSecret<S, I>
where
    I: Strategy<S>,
{
    fn peek(&self) -> &S {
        &self.inner_secret
    }
}

impl<S: Zeroize, I> From<S> for StrongSecret<S, I>
where
    I: Strategy<S>,
{
    fn from(secret: S) -> Self {
        Self::new(secret)
    }
}

impl<S: Zeroize + Clone, I> Clone for StrongSecret<S, I>
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

impl<S: Zeroize + PartialEq, I> PartialEq for StrongSecret<S, I>
where
    I: Strategy<S>,
{
    fn eq(&self, other: &Self) -> bool {
        self.peek() == other.peek()
    }
}

impl<S: Zeroize + Eq, I> Eq for StrongSecret<S, I> where I: Strategy<S> {}

impl<S: Zeroize, I> fmt::Debug for StrongSecret<S, I>
where
    I: Strategy<S>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        I::fmt(&self.inner_secret, f)
    }
}

impl<S: Zeroize + Default, I> Default for StrongSecret<S, I>
where
    I: Strategy<S>,
{
    fn default() -> Self {
        S::default().into()
    }
}

impl<S: Zeroize, I> Drop for StrongSecret<S, I>
where
    I: Strategy<S>,
{
    fn drop(&mut self) {
        self.inner_secret.zeroize();
    }
}

impl<S, I> serde::Serialize for StrongSecret<S, I>
where
    S: Zeroize + serde::Serialize,
    I: Strategy<S>,
{
    fn serialize<T: serde::Serializer>(&self, serializer: T) -> Result<T::Ok, T::Error> {
        self.peek().serialize(serializer)
    }
}

impl<'de, S, I> serde::Deserialize<'de> for StrongSecret<S, I>
where
    S: Zeroize + serde::Deserialize<'de>,
    I: Strategy<S>,
{
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        S::deserialize(deserializer).map(Self::new)
    }
}
