//! Redaction wrapper for credential material
//!
//! Bearer tokens and caller passwords travel through request structs that get
//! Debug-formatted in logs. Wrapping them in `Secret` makes accidental leaks
//! print `[REDACTED]` instead, and wipes the value from memory on drop.

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value, redacted in Debug/Display output.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Wrap a sensitive value.
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the inner value. Call sites should be the ones that actually
    /// put the value on the wire, nothing else.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let secret = Secret::new(String::from("hunter2"));
        let debug = format!("{secret:?}");
        assert_eq!(debug, "[REDACTED]");
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn display_is_redacted() {
        let secret = Secret::new(String::from("sha256~abcdef"));
        assert_eq!(secret.to_string(), "[REDACTED]");
    }

    #[test]
    fn expose_returns_inner() {
        let secret = Secret::new(String::from("sha256~abcdef"));
        assert_eq!(secret.expose(), "sha256~abcdef");
    }

    #[test]
    fn clone_preserves_value() {
        let secret = Secret::new(String::from("tok"));
        let copy = secret.clone();
        assert_eq!(copy.expose(), secret.expose());
    }
}
