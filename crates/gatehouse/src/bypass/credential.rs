//! Bypass secret and session token.

use rand::Rng;
use std::fmt;

/// The single configured bypass secret
///
/// An absent secret makes every comparison fail.
#[derive(Clone, Default)]
pub struct BypassCredential {
    secret: Option<String>,
}

impl BypassCredential {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Exact match against the configured secret
    pub fn verify_password(&self, candidate: &str) -> bool {
        match &self.secret {
            Some(secret) => candidate == secret,
            None => false,
        }
    }
}

impl fmt::Debug for BypassCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BypassCredential")
            .field("configured", &self.is_configured())
            .finish()
    }
}

const TOKEN_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// bypass_{timestamp}_{9 random base36 chars}
///
/// Opaque marker only; uniqueness is best-effort.
pub fn session_token(now_ms: i64) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..TOKEN_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();

    format!("bypass_{}_{}", now_ms, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_secret_rejects_everything() {
        for credential in [BypassCredential::new(None), BypassCredential::new(Some(String::new()))] {
            assert!(!credential.is_configured());
            for candidate in ["", "hunter2", "production-secret", " "] {
                assert!(!credential.verify_password(candidate));
            }
        }
    }

    #[test]
    fn test_exact_match_only() {
        let credential = BypassCredential::new(Some("Open-Sesame".into()));
        assert!(credential.verify_password("Open-Sesame"));
        assert!(!credential.verify_password("open-sesame"));
        assert!(!credential.verify_password("Open-Sesame "));
        assert!(!credential.verify_password(""));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credential = BypassCredential::new(Some("Open-Sesame".into()));
        let shown = format!("{:?}", credential);
        assert!(!shown.contains("Sesame"));
    }

    #[test]
    fn test_session_token_shape() {
        let token = session_token(1_760_000_000_000);
        let parts: Vec<&str> = token.split('_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "bypass");
        assert_eq!(parts[1], "1760000000000");
        assert_eq!(parts[2].len(), TOKEN_SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(token, session_token(1_760_000_000_000));
    }
}
