//! Credential handling for API keys and encryption keys
//!
//! Credentials are wrapped in [`secrecy::Secret`] so they are zeroed on drop,
//! redacted from `Debug` output and only readable through `expose_secret()`.
//! They are written to worker parameter files when needed but never to argv
//! or logs.

use secrecy::{CloneableSecret, DebugSecret, Secret, SerializableSecret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// String payload stored inside a [`SecretString`]
#[derive(Clone, Debug, Zeroize)]
#[zeroize(drop)]
pub struct SecretValue(String);

impl CloneableSecret for SecretValue {}
impl DebugSecret for SecretValue {}
impl SerializableSecret for SecretValue {}

impl SecretValue {
    /// Returns the secret as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the secret value is empty
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for SecretValue {
    fn from(s: String) -> Self {
        SecretValue(s)
    }
}

impl Serialize for SecretValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretValue)
    }
}

/// Zeroizing, redacted string secret
pub type SecretString = Secret<SecretValue>;

/// Wraps a plain string as a [`SecretString`]
///
/// ```rust
/// use hostagent::config::secret_string;
/// use secrecy::ExposeSecret;
///
/// let key = secret_string("api-key".to_string());
/// assert_eq!(key.expose_secret().as_str(), "api-key");
/// ```
#[inline]
pub fn secret_string(value: String) -> SecretString {
    Secret::new(SecretValue::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_debug_is_redacted() {
        let secret = secret_string("super-secret".to_string());
        let debug = format!("{secret:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_serde_roundtrip_keeps_value() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            key: SecretString,
        }

        let holder: Holder = serde_json::from_str(r#"{"key":"abc"}"#).unwrap();
        assert_eq!(holder.key.expose_secret().as_str(), "abc");
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"key":"abc"}"#);
    }

    #[test]
    fn test_is_empty() {
        assert!(secret_string("  ".to_string()).expose_secret().is_empty());
        assert!(!secret_string("x".to_string()).expose_secret().is_empty());
    }
}
