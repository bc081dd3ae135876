//! Counter key derivation.

use std::fmt;

use crate::wire::is_inline_arg;

/// Prefix applied to every counter key unless configured otherwise.
pub const DEFAULT_KEY_PREFIX: &str = "ratewire:";

/// The store key holding one identity's counter for the current window.
///
/// The key is the prefix followed by the identity verbatim, so distinct
/// identities always map to distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey(String);

impl CounterKey {
    /// Build a key for `identity`.
    ///
    /// Returns `None` when the identity is empty, or when the prefix or the
    /// identity contains whitespace or control characters. Such a key cannot
    /// travel as a single inline argument.
    pub fn new(prefix: &str, identity: &str) -> Option<Self> {
        if identity.is_empty() {
            return None;
        }
        let key = format!("{}{}", prefix, identity);
        is_inline_arg(&key).then_some(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_ip() {
        let key = CounterKey::new(DEFAULT_KEY_PREFIX, "10.0.0.5").unwrap();
        assert_eq!(key.as_str(), "ratewire:10.0.0.5");
        assert_eq!(key.to_string(), "ratewire:10.0.0.5");
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = CounterKey::new("p:", "2001:db8::1").unwrap();
        let b = CounterKey::new("p:", "2001:db8::1").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, CounterKey::new("p:", "2001:db8::2").unwrap());
    }

    #[test]
    fn test_key_rejects_unsendable_identity() {
        assert!(CounterKey::new(DEFAULT_KEY_PREFIX, "").is_none());
        assert!(CounterKey::new(DEFAULT_KEY_PREFIX, "10.0.0.5 FLUSHALL").is_none());
        assert!(CounterKey::new(DEFAULT_KEY_PREFIX, "a\r\nb").is_none());
    }

    #[test]
    fn test_key_rejects_unsendable_prefix() {
        assert!(CounterKey::new("my app:", "10.0.0.5").is_none());
        assert!(CounterKey::new("app\n", "10.0.0.5").is_none());
        assert_eq!(CounterKey::new("", "10.0.0.5").unwrap().as_str(), "10.0.0.5");
    }
}
