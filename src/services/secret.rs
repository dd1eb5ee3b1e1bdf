//! Password verification for gated vault items.
//!
//! Handlers only ever ask "does this supplied password open that item?".
//! The stored form of the password is owned by the verifier, so a hashing
//! scheme can replace `PlaintextVerifier` without touching handler logic.

/// Decides whether a supplied password unlocks an item.
pub trait SecretVerifier: Send + Sync {
    /// `stored` is the value kept on the record; `supplied` is whatever the
    /// reader sent, if anything. A missing password never matches.
    fn verify(&self, stored: &str, supplied: Option<&str>) -> bool;
}

/// Compares the supplied password with the stored plaintext.
///
/// Passwords are kept unhashed in the record store; this verifier exists so
/// that weakness is contained in one place.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextVerifier;

impl SecretVerifier for PlaintextVerifier {
    fn verify(&self, stored: &str, supplied: Option<&str>) -> bool {
        supplied.is_some_and(|candidate| candidate == stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_requires_exact_match() {
        let verifier = PlaintextVerifier;
        assert!(verifier.verify("abc", Some("abc")));
        assert!(!verifier.verify("abc", Some("ABC")));
        assert!(!verifier.verify("abc", Some("")));
        assert!(!verifier.verify("abc", None));
    }
}
