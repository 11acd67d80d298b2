//! Username/password authentication, backed by the Argon2id
//! verification primitive treated as an external collaborator
//! (§1, §6).

use std::collections::HashMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use log::{error, info, warn};
use serde::Deserialize;

/// Deserialized shape of the `authenticator` config stanza.
#[derive(Debug, Deserialize, Default)]
pub struct RawAuthenticator {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub users: HashMap<String, String>,
}

/// Username-bytes -> password-digest lookup, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    enabled: bool,
    users: HashMap<Vec<u8>, String>,
}

impl Authenticator {
    pub fn new(enabled: bool, users: HashMap<Vec<u8>, String>) -> Self {
        Self { enabled, users }
    }

    pub fn from_raw(raw: RawAuthenticator) -> Self {
        Self {
            enabled: raw.enabled,
            users: raw
                .users
                .into_iter()
                .map(|(user, digest)| (user.into_bytes(), digest))
                .collect(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// `Authenticator.is_allowed(username_bytes, secret_bytes) -> bool`
    /// Unknown username, password mismatch, a malformed stored
    /// digest, and an internal verifier error all map to `false`, each
    /// logged at its own severity; constant-time comparison is the
    /// verifier's responsibility.
    pub fn is_allowed(&self, username: &[u8], secret: &[u8]) -> bool {
        let user_display = String::from_utf8_lossy(username).into_owned();
        let Some(digest) = self.users.get(username) else {
            warn!("unknown user {user_display}");
            return false;
        };
        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!("invalid hash for user {user_display}: {err}");
                return false;
            }
        };
        match Argon2::default().verify_password(secret, &parsed) {
            Ok(()) => {
                info!("authentication success for {user_display}");
                true
            }
            Err(argon2::password_hash::Error::Password) => {
                warn!("authentication failure for {user_display}");
                false
            }
            Err(err) => {
                error!("verification error for user {user_display}: {err}");
                false
            }
        }
    }
}

/// Used by the `digest` subcommand: hash a freshly entered secret into an
/// Argon2id PHC string suitable for a `users` map entry.
pub fn hash_password(secret: &[u8]) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(secret, &salt)?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hash_and_verify() {
        let digest = hash_password(b"hunter2").unwrap();
        let mut users = HashMap::new();
        users.insert(b"alice".to_vec(), digest);
        let auth = Authenticator::new(true, users);
        assert!(auth.is_allowed(b"alice", b"hunter2"));
        assert!(!auth.is_allowed(b"alice", b"wrong"));
    }

    #[test]
    fn unknown_user_is_denied() {
        let auth = Authenticator::new(true, HashMap::new());
        assert!(!auth.is_allowed(b"bob", b"anything"));
    }

    #[test]
    fn malformed_digest_is_denied_not_panicked() {
        let mut users = HashMap::new();
        users.insert(b"alice".to_vec(), "not-a-valid-phc-string".to_string());
        let auth = Authenticator::new(true, users);
        assert!(!auth.is_allowed(b"alice", b"whatever"));
    }
}
