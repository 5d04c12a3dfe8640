//! Provider credentials.
//!
//! A key is wrapped in [`SecretString`] as soon as it is read and only
//! exposed where a request header is built. Neither `Debug` nor `Display`
//! prints it, and it is never serialized.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// Origin of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `api_key` in the settings file
    Settings,

    /// The provider's environment variable
    Environment(&'static str),

    /// Passed in by the embedding application
    Caller,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Settings => f.write_str("settings file"),
            CredentialSource::Environment(var) => write!(f, "${}", var),
            CredentialSource::Caller => f.write_str("caller"),
        }
    }
}

/// An API key for one provider.
#[derive(Clone)]
pub struct ApiCredential {
    secret: SecretString,
    source: CredentialSource,
    label: &'static str,
}

impl ApiCredential {
    /// Wrap a key. `label` names it in messages ("OpenAI API key").
    pub fn new(value: impl Into<String>, source: CredentialSource, label: &'static str) -> Self {
        let value: String = value.into();
        Self {
            secret: SecretString::from(value.trim().to_string()),
            source,
            label,
        }
    }

    /// Settings value if non-blank, else the environment variable if set
    /// and non-blank.
    pub fn resolve(
        configured: Option<&str>,
        env_var: Option<&'static str>,
        label: &'static str,
    ) -> Option<Self> {
        let from_settings = configured
            .filter(|v| !v.trim().is_empty())
            .map(|v| Self::new(v, CredentialSource::Settings, label));

        from_settings.or_else(|| {
            let var = env_var?;
            std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| Self::new(v, CredentialSource::Environment(var), label))
        })
    }

    /// The raw key, for building a request header.
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiCredential({}, {}, ****)", self.label, self.source)
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): ****", self.label, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sk-live-7f3a9c0e51d2";

    #[test]
    fn test_key_never_printed() {
        let credential = ApiCredential::new(KEY, CredentialSource::Settings, "OpenAI API key");

        let debug = format!("{:?}", credential);
        let display = credential.to_string();
        assert!(!debug.contains(KEY));
        assert!(!display.contains(KEY));
        assert_eq!(display, "OpenAI API key (settings file): ****");

        let config = crate::providers::ProviderConfig::new(crate::providers::ProviderKind::OpenAi)
            .with_credential(credential.clone());
        assert!(!format!("{:?}", config).contains(KEY));

        assert_eq!(credential.expose(), KEY);
    }

    #[test]
    fn test_settings_value_wins() {
        std::env::set_var("GRADEFLOW_TEST_KEY_PRIORITY", "from-env");
        let credential = ApiCredential::resolve(
            Some(" from-settings "),
            Some("GRADEFLOW_TEST_KEY_PRIORITY"),
            "Key",
        )
        .unwrap();
        assert_eq!(credential.expose(), "from-settings");
        assert_eq!(credential.source(), CredentialSource::Settings);
        std::env::remove_var("GRADEFLOW_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_blank_settings_value_falls_back_to_env() {
        std::env::set_var("GRADEFLOW_TEST_KEY_FALLBACK", "from-env");
        let credential =
            ApiCredential::resolve(Some("   "), Some("GRADEFLOW_TEST_KEY_FALLBACK"), "Key").unwrap();
        assert_eq!(credential.expose(), "from-env");
        assert_eq!(
            credential.source(),
            CredentialSource::Environment("GRADEFLOW_TEST_KEY_FALLBACK")
        );
        assert_eq!(
            credential.source().to_string(),
            "$GRADEFLOW_TEST_KEY_FALLBACK"
        );
        std::env::remove_var("GRADEFLOW_TEST_KEY_FALLBACK");
    }

    #[test]
    fn test_nothing_configured() {
        assert!(ApiCredential::resolve(None, Some("GRADEFLOW_TEST_KEY_UNSET_987"), "Key").is_none());
        assert!(ApiCredential::resolve(None, None, "Key").is_none());
        assert!(ApiCredential::new("  ", CredentialSource::Caller, "Key").is_empty());
    }
}
