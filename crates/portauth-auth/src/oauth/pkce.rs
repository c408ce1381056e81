//! PKCE (Proof Key for Code Exchange) implementation
//!
//! Implements RFC 7636 with both the `plain` and `S256` methods. `plain`
//! remains supported because several fronted identity providers only emit
//! plain challenges; when the `code_challenge_method` parameter is omitted
//! it defaults to `plain` per RFC 7636 section 4.3.
//!
//! S256 comparison is deliberately tolerant: clients and IdPs disagree on
//! base64 flavors in the wild, so the challenge is compared against the
//! standard-base64, URL-safe, and padding-stripped encodings of the
//! verifier hash. Unknown methods always fail closed.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
};
use sha2::{Digest, Sha256};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains invalid characters.
    #[error("Invalid verifier characters: must be unreserved characters ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,

    /// Unsupported challenge method.
    #[error("Unsupported challenge method: {0}. Supported methods are plain and S256.")]
    UnsupportedMethod(String),

    /// PKCE verification failed (verifier doesn't match challenge).
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

impl PkceError {
    /// Create an `InvalidVerifierLength` error.
    #[must_use]
    pub fn invalid_verifier_length(len: usize) -> Self {
        Self::InvalidVerifierLength(len)
    }

    /// Create an `InvalidVerifierCharacters` error.
    #[must_use]
    pub fn invalid_verifier_characters() -> Self {
        Self::InvalidVerifierCharacters
    }

    /// Create an `UnsupportedMethod` error.
    #[must_use]
    pub fn unsupported_method(method: impl Into<String>) -> Self {
        Self::UnsupportedMethod(method.into())
    }

    /// Create a `VerificationFailed` error.
    #[must_use]
    pub fn verification_failed() -> Self {
        Self::VerificationFailed
    }

    /// Get the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidVerifierLength(_)
            | Self::InvalidVerifierCharacters
            | Self::UnsupportedMethod(_) => "invalid_request",
            Self::VerificationFailed => "invalid_grant",
        }
    }
}

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PkceChallengeMethod {
    /// Byte-equality of challenge and verifier.
    Plain,
    /// SHA-256 hash comparison.
    S256,
}

impl PkceChallengeMethod {
    /// Parse challenge method from string.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for anything other than
    /// "plain" or "S256".
    pub fn parse(method: &str) -> Result<Self, PkceError> {
        match method {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(PkceError::unsupported_method(other)),
        }
    }

    /// Get the method as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for PkceChallengeMethod {
    /// RFC 7636 section 4.3: the method defaults to `plain` when omitted.
    fn default() -> Self {
        Self::Plain
    }
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// PKCE code verifier.
///
/// A high-entropy cryptographic random string using the unreserved
/// characters `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`, with a
/// minimum length of 43 characters and a maximum length of 128 characters
/// (RFC 7636 section 4.1).
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Create a new verifier from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Length is not between 43 and 128 characters
    /// - Contains characters other than `[A-Za-z0-9-._~]`
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();

        if !(43..=128).contains(&len) {
            return Err(PkceError::invalid_verifier_length(len));
        }

        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '~')
        {
            return Err(PkceError::invalid_verifier_characters());
        }

        Ok(Self(verifier))
    }

    /// Generate a cryptographically random verifier.
    ///
    /// Generates 32 random bytes and encodes them as base64url (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        // `gen` is a reserved keyword in Rust 2024, so we use r#gen
        let bytes: [u8; 32] = rng.r#gen();
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        Self(verifier)
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PkceVerifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Compute the canonical S256 challenge for a verifier:
/// `BASE64URL(SHA256(ASCII(code_verifier)))` without padding.
#[must_use]
pub fn s256_challenge(verifier: &PkceVerifier) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_str().as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Verify a code verifier against a stored challenge.
///
/// For `plain`, challenge and verifier must be byte-equal. For `S256`, the
/// SHA-256 hash of the verifier is compared against the challenge under
/// standard base64, URL-safe base64, and with padding stripped on either
/// side, to tolerate base64 variants across clients.
///
/// # Errors
///
/// Returns `PkceError::VerificationFailed` on mismatch.
pub fn verify(
    challenge: &str,
    method: PkceChallengeMethod,
    verifier: &PkceVerifier,
) -> Result<(), PkceError> {
    let matches = match method {
        PkceChallengeMethod::Plain => challenge == verifier.as_str(),
        PkceChallengeMethod::S256 => {
            let mut hasher = Sha256::new();
            hasher.update(verifier.as_str().as_bytes());
            let hash = hasher.finalize();

            let candidates = [
                STANDARD.encode(hash),
                URL_SAFE.encode(hash),
                URL_SAFE_NO_PAD.encode(hash),
            ];
            let challenge_trimmed = challenge.trim_end_matches('=');
            candidates.iter().any(|c| {
                c == challenge || c.trim_end_matches('=') == challenge_trimmed
            })
        }
    };

    if matches {
        Ok(())
    } else {
        Err(PkceError::verification_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Verifier Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_verifier_generation() {
        let verifier = PkceVerifier::generate();
        let len = verifier.as_str().len();
        assert!(
            (43..=128).contains(&len),
            "Generated verifier length {} should be 43-128",
            len
        );
    }

    #[test]
    fn test_verifier_validation_length() {
        assert!(PkceVerifier::new("a".repeat(42)).is_err());
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(matches!(
            PkceVerifier::new("a".repeat(129)).unwrap_err(),
            PkceError::InvalidVerifierLength(129)
        ));
    }

    #[test]
    fn test_verifier_validation_characters() {
        let invalid = format!("{}!@#", "a".repeat(43));
        assert!(matches!(
            PkceVerifier::new(invalid).unwrap_err(),
            PkceError::InvalidVerifierCharacters
        ));
    }

    // -------------------------------------------------------------------------
    // Method Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_method_parse() {
        assert_eq!(
            PkceChallengeMethod::parse("plain").unwrap(),
            PkceChallengeMethod::Plain
        );
        assert_eq!(
            PkceChallengeMethod::parse("S256").unwrap(),
            PkceChallengeMethod::S256
        );
    }

    #[test]
    fn test_method_unknown_fails_closed() {
        assert!(matches!(
            PkceChallengeMethod::parse("s256").unwrap_err(),
            PkceError::UnsupportedMethod(_)
        ));
        assert!(matches!(
            PkceChallengeMethod::parse("S512").unwrap_err(),
            PkceError::UnsupportedMethod(_)
        ));
    }

    #[test]
    fn test_method_default_is_plain() {
        assert_eq!(PkceChallengeMethod::default(), PkceChallengeMethod::Plain);
    }

    // -------------------------------------------------------------------------
    // Verification Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_plain_verification_is_pure_equality() {
        let verifier = PkceVerifier::generate();
        assert!(verify(verifier.as_str(), PkceChallengeMethod::Plain, &verifier).is_ok());

        let other = PkceVerifier::generate();
        assert!(matches!(
            verify(other.as_str(), PkceChallengeMethod::Plain, &verifier).unwrap_err(),
            PkceError::VerificationFailed
        ));
    }

    #[test]
    fn test_s256_verification_success() {
        let verifier = PkceVerifier::generate();
        let challenge = s256_challenge(&verifier);
        assert!(verify(&challenge, PkceChallengeMethod::S256, &verifier).is_ok());
    }

    #[test]
    fn test_s256_verification_failure() {
        let verifier = PkceVerifier::generate();
        let other = PkceVerifier::generate();
        let challenge = s256_challenge(&other);
        assert!(verify(&challenge, PkceChallengeMethod::S256, &verifier).is_err());
    }

    #[test]
    fn test_s256_tolerates_base64_variants() {
        let verifier = PkceVerifier::generate();

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_str().as_bytes());
        let hash = hasher.finalize();

        // Standard base64 with padding
        let standard = STANDARD.encode(hash);
        assert!(verify(&standard, PkceChallengeMethod::S256, &verifier).is_ok());

        // URL-safe with padding
        let url_safe = URL_SAFE.encode(hash);
        assert!(verify(&url_safe, PkceChallengeMethod::S256, &verifier).is_ok());

        // URL-safe without padding (the canonical RFC 7636 form)
        let no_pad = URL_SAFE_NO_PAD.encode(hash);
        assert!(verify(&no_pad, PkceChallengeMethod::S256, &verifier).is_ok());
    }

    // -------------------------------------------------------------------------
    // RFC 7636 Test Vector
    // -------------------------------------------------------------------------

    #[test]
    fn test_rfc7636_appendix_b_test_vector() {
        // Test vector from RFC 7636 Appendix B
        // https://tools.ietf.org/html/rfc7636#appendix-B
        let verifier =
            PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string()).unwrap();

        assert_eq!(
            s256_challenge(&verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
            "S256 challenge should match RFC 7636 Appendix B test vector"
        );

        assert!(
            verify(
                "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
                PkceChallengeMethod::S256,
                &verifier
            )
            .is_ok()
        );
    }

    #[test]
    fn test_error_oauth_codes() {
        assert_eq!(
            PkceError::invalid_verifier_length(10).oauth_error_code(),
            "invalid_request"
        );
        assert_eq!(
            PkceError::unsupported_method("S512").oauth_error_code(),
            "invalid_request"
        );
        assert_eq!(
            PkceError::verification_failed().oauth_error_code(),
            "invalid_grant"
        );
    }
}
