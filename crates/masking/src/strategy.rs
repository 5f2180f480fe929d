use std::fmt;

/// How a secret is rendered when its wrapper is formatted.
pub trait Strategy<T> {
    /// Write the masked representation of `value`.
    fn fmt(value: &T, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// Masks the value but names its type, e.g. `*** alloc::string::String ***`.
#[derive(Debug)]
pub enum WithType {}

impl<T> Strategy<T> for WithType {
    fn fmt(_value: &T, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("*** ")?;
        f.write_str(std::any::type_name::<T>())?;
        f.write_str(" ***")
    }
}

/// Masks the value without naming its type.
#[derive(Debug)]
pub enum WithoutType {}

impl<T> Strategy<T> for WithoutType {
    fn fmt(_value: &T, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("*** ***")
    }
}
