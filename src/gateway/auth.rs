//! Pairing tokens and challenge-signature authentication.
//!
//! Tokens are high-entropy random strings; only their SHA-256 hash is kept,
//! and lookup compares hashes in constant time. A non-local client exchanges
//! its token for a single-use challenge bound to its connection, then proves
//! possession of an Ed25519 key by signing the challenge. The first
//! successful verification binds that key to the token; later pairings with
//! the same token must present the same key.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Permission;

/// A stored pairing token. The cleartext token never persists.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub id: Uuid,
    pub token_hash: [u8; 32],
    /// Base64 Ed25519 public key, bound on first successful verify.
    pub public_key: Option<String>,
    pub permissions: BTreeSet<Permission>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// A freshly created token; the cleartext is shown exactly once.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub id: Uuid,
    pub token: String,
}

/// Per-connection, single-use signing challenge.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub challenge: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PendingChallenge {
    token_id: Uuid,
    challenge: String,
    expires_at: DateTime<Utc>,
}

/// Outcome of a successful `auth.verify`.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub token_id: Uuid,
    pub public_key: String,
    pub permissions: BTreeSet<Permission>,
}

/// Why `auth.verify` failed.
///
/// Replaying an already-consumed challenge is a client protocol error and
/// keeps the connection open; every other failure closes it with 4003.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("no pending challenge for connection")]
    NoChallenge,
    #[error("challenge expired")]
    Expired,
    #[error("malformed or invalid public key")]
    BadKey,
    #[error("malformed signature")]
    BadSignature,
    #[error("signature verification failed")]
    SignatureMismatch,
    #[error("token is bound to a different key")]
    KeyMismatch,
    #[error("token expired or revoked")]
    TokenUnusable,
}

impl VerifyError {
    /// Whether this failure must close the connection (code 4003).
    pub fn closes_connection(&self) -> bool {
        !matches!(self, Self::NoChallenge)
    }
}

/// Token store and challenge broker.
pub struct AuthManager {
    auth_timeout: Duration,
    tokens: RwLock<HashMap<Uuid, TokenRecord>>,
    challenges: RwLock<HashMap<Uuid, PendingChallenge>>,
}

impl AuthManager {
    pub fn new(auth_timeout: Duration) -> Self {
        Self {
            auth_timeout,
            tokens: RwLock::new(HashMap::new()),
            challenges: RwLock::new(HashMap::new()),
        }
    }

    /// Create a pairing token with ≥256 bits of entropy. Only the hash is
    /// stored; the returned cleartext is the caller's one chance to see it.
    pub async fn create_token(
        &self,
        permissions: BTreeSet<Permission>,
        expires_in: Option<Duration>,
    ) -> IssuedToken {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let record = TokenRecord {
            id: Uuid::new_v4(),
            token_hash: Sha256::digest(token.as_bytes()).into(),
            public_key: None,
            permissions,
            created_at: Utc::now(),
            expires_at: expires_in.and_then(|d| {
                chrono::Duration::from_std(d)
                    .ok()
                    .map(|d| Utc::now() + d)
            }),
            revoked_at: None,
        };
        let id = record.id;
        self.tokens.write().await.insert(id, record);
        info!(token_id = %id, "pairing token created");
        IssuedToken { id, token }
    }

    /// Revoke a token; pending challenges for it stop verifying.
    pub async fn revoke_token(&self, id: Uuid) -> DomainResult<()> {
        let mut tokens = self.tokens.write().await;
        let record = tokens
            .get_mut(&id)
            .ok_or(DomainError::ValidationFailed(format!("unknown token {id}")))?;
        record.revoked_at = Some(Utc::now());
        info!(token_id = %id, "pairing token revoked");
        Ok(())
    }

    pub async fn list_tokens(&self) -> Vec<TokenRecord> {
        self.tokens.read().await.values().cloned().collect()
    }

    /// Look up a cleartext token by constant-time hash comparison,
    /// rejecting expired and revoked records.
    pub async fn verify_token(&self, token: &str) -> Option<TokenRecord> {
        let hash: [u8; 32] = Sha256::digest(token.as_bytes()).into();
        let now = Utc::now();
        let tokens = self.tokens.read().await;
        tokens
            .values()
            .find(|record| bool::from(hash.ct_eq(&record.token_hash)) && record.is_usable(now))
            .cloned()
    }

    /// `auth.pair`: exchange a valid token for a connection-bound challenge.
    pub async fn issue_challenge(
        &self,
        connection_id: Uuid,
        token: &str,
    ) -> DomainResult<IssuedChallenge> {
        let record = self
            .verify_token(token)
            .await
            .ok_or_else(|| DomainError::ValidationFailed("invalid or expired token".into()))?;

        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let challenge = hex::encode(bytes);
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.auth_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));

        self.challenges.write().await.insert(
            connection_id,
            PendingChallenge {
                token_id: record.id,
                challenge: challenge.clone(),
                expires_at,
            },
        );

        Ok(IssuedChallenge {
            challenge,
            expires_at,
        })
    }

    /// `auth.verify`: check the Ed25519 signature over this connection's
    /// challenge. The challenge is consumed regardless of outcome, so a
    /// replay of the same challenge fails as invalid params.
    pub async fn verify_signature(
        &self,
        connection_id: Uuid,
        signature_b64: &str,
        public_key_b64: &str,
    ) -> Result<VerifiedIdentity, VerifyError> {
        let Some(pending) = self.challenges.write().await.remove(&connection_id) else {
            return Err(VerifyError::NoChallenge);
        };
        if pending.expires_at <= Utc::now() {
            warn!(connection_id = %connection_id, "challenge expired");
            return Err(VerifyError::Expired);
        }

        let key_bytes: [u8; 32] = BASE64
            .decode(public_key_b64)
            .map_err(|_| VerifyError::BadKey)?
            .try_into()
            .map_err(|_| VerifyError::BadKey)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| VerifyError::BadKey)?;

        let sig_bytes: [u8; 64] = BASE64
            .decode(signature_b64)
            .map_err(|_| VerifyError::BadSignature)?
            .try_into()
            .map_err(|_| VerifyError::BadSignature)?;
        let signature = Signature::from_bytes(&sig_bytes);

        key.verify(pending.challenge.as_bytes(), &signature)
            .map_err(|_| VerifyError::SignatureMismatch)?;

        // Bind the key on first use; afterwards the same token requires it.
        let mut tokens = self.tokens.write().await;
        let record = tokens
            .get_mut(&pending.token_id)
            .ok_or(VerifyError::TokenUnusable)?;
        if !record.is_usable(Utc::now()) {
            return Err(VerifyError::TokenUnusable);
        }
        match &record.public_key {
            None => record.public_key = Some(public_key_b64.to_string()),
            Some(bound) if bound == public_key_b64 => {}
            Some(_) => {
                warn!(token_id = %record.id, "public key mismatch on paired token");
                return Err(VerifyError::KeyMismatch);
            }
        }

        Ok(VerifiedIdentity {
            token_id: record.id,
            public_key: public_key_b64.to_string(),
            permissions: record.permissions.clone(),
        })
    }

    /// Drop any pending challenge when a connection goes away.
    pub async fn forget_connection(&self, connection_id: Uuid) {
        self.challenges.write().await.remove(&connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn manager() -> AuthManager {
        AuthManager::new(Duration::from_secs(30))
    }

    fn keypair() -> (SigningKey, String) {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let signing = SigningKey::from_bytes(&seed);
        let public = BASE64.encode(signing.verifying_key().to_bytes());
        (signing, public)
    }

    #[tokio::test]
    async fn test_token_round_trip() {
        let auth = manager();
        let issued = auth
            .create_token([Permission::Read, Permission::Write].into_iter().collect(), None)
            .await;
        assert_eq!(issued.token.len(), 64); // 32 bytes hex

        let record = auth.verify_token(&issued.token).await.unwrap();
        assert_eq!(record.id, issued.id);
        assert!(auth.verify_token("not-a-token").await.is_none());
    }

    #[tokio::test]
    async fn test_revoked_token_rejected() {
        let auth = manager();
        let issued = auth.create_token(Permission::all(), None).await;
        auth.revoke_token(issued.id).await.unwrap();
        assert!(auth.verify_token(&issued.token).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let auth = manager();
        let issued = auth
            .create_token(Permission::all(), Some(Duration::from_millis(0)))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(auth.verify_token(&issued.token).await.is_none());
    }

    #[tokio::test]
    async fn test_challenge_sign_verify() {
        let auth = manager();
        let issued = auth.create_token(Permission::all(), None).await;
        let (signing, public) = keypair();

        let conn = Uuid::new_v4();
        let challenge = auth.issue_challenge(conn, &issued.token).await.unwrap();
        let signature = BASE64.encode(signing.sign(challenge.challenge.as_bytes()).to_bytes());

        let identity = auth
            .verify_signature(conn, &signature, &public)
            .await
            .unwrap();
        assert_eq!(identity.token_id, issued.id);
        assert!(identity.permissions.contains(&Permission::Admin));
    }

    #[tokio::test]
    async fn test_challenge_is_single_use() {
        let auth = manager();
        let issued = auth.create_token(Permission::all(), None).await;
        let (signing, public) = keypair();

        let conn = Uuid::new_v4();
        let challenge = auth.issue_challenge(conn, &issued.token).await.unwrap();
        let signature = BASE64.encode(signing.sign(challenge.challenge.as_bytes()).to_bytes());

        auth.verify_signature(conn, &signature, &public).await.unwrap();
        // Replaying the same challenge fails: it was consumed.
        assert!(auth.verify_signature(conn, &signature, &public).await.is_err());
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_and_challenge_consumed() {
        let auth = manager();
        let issued = auth.create_token(Permission::all(), None).await;
        let (_, public) = keypair();
        let (other_signing, _) = keypair();

        let conn = Uuid::new_v4();
        let challenge = auth.issue_challenge(conn, &issued.token).await.unwrap();
        let wrong = BASE64.encode(other_signing.sign(challenge.challenge.as_bytes()).to_bytes());

        assert!(auth.verify_signature(conn, &wrong, &public).await.is_err());
        // Consumed on failure too.
        assert!(auth.verify_signature(conn, &wrong, &public).await.is_err());
    }

    #[tokio::test]
    async fn test_token_binds_to_first_key() {
        let auth = manager();
        let issued = auth.create_token(Permission::all(), None).await;
        let (signing_a, public_a) = keypair();
        let (signing_b, public_b) = keypair();

        // First pairing binds key A.
        let conn_a = Uuid::new_v4();
        let ch_a = auth.issue_challenge(conn_a, &issued.token).await.unwrap();
        let sig_a = BASE64.encode(signing_a.sign(ch_a.challenge.as_bytes()).to_bytes());
        auth.verify_signature(conn_a, &sig_a, &public_a).await.unwrap();

        // Same token with key A again: fine, same permissions.
        let conn_a2 = Uuid::new_v4();
        let ch_a2 = auth.issue_challenge(conn_a2, &issued.token).await.unwrap();
        let sig_a2 = BASE64.encode(signing_a.sign(ch_a2.challenge.as_bytes()).to_bytes());
        let again = auth
            .verify_signature(conn_a2, &sig_a2, &public_a)
            .await
            .unwrap();
        assert_eq!(again.permissions, Permission::all());

        // A different key must be rejected.
        let conn_b = Uuid::new_v4();
        let ch_b = auth.issue_challenge(conn_b, &issued.token).await.unwrap();
        let sig_b = BASE64.encode(signing_b.sign(ch_b.challenge.as_bytes()).to_bytes());
        assert!(auth.verify_signature(conn_b, &sig_b, &public_b).await.is_err());
    }
}
