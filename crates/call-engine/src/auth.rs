//! Registration credential validation

/// Placeholder token accepted by [`StaticTokenValidator`]
pub const PLACEHOLDER_TOKEN: &str = "valid-token";

/// Decides whether a REGISTER credential is acceptable
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> bool;
}

impl<F> TokenValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn validate(&self, token: &str) -> bool {
        self(token)
    }
}

/// Accepts only [`PLACEHOLDER_TOKEN`], bare or as a Bearer credential
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator;

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, credential: &str) -> bool {
        bearer_token(credential) == PLACEHOLDER_TOKEN
    }
}

/// Token of a `Bearer` credential. sip-core renders the token as a
/// `token68` parameter, possibly quoted.
fn bearer_token(credential: &str) -> &str {
    let credential = credential.trim();
    let token = credential.strip_prefix("Bearer ").unwrap_or(credential).trim();
    let token = token.strip_prefix("token68=").unwrap_or(token);
    token.trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_validator() {
        let v = StaticTokenValidator;
        assert!(v.validate("valid-token"));
        assert!(v.validate("Bearer valid-token"));
        assert!(v.validate("Bearer token68=valid-token"));
        assert!(v.validate("Bearer token68=\"valid-token\""));
        assert!(!v.validate(""));
        assert!(!v.validate("Bearer other"));
        assert!(!v.validate("valid-token-2"));
    }

    #[test]
    fn test_closure_validator() {
        let v = |token: &str| token.len() == 3;
        assert!(TokenValidator::validate(&v, "abc"));
        assert!(!TokenValidator::validate(&v, "abcd"));
    }
}
