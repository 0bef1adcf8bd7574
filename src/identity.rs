//! Identity service set for identity-capable contexts.
//!
//! Contexts that opt in (capability tag set, [`IdentityContext`]
//! implemented, [`IDENTITY_SCHEMA`] appended to their schema script) get a
//! standard service trio registered at composition time: a user manager, a
//! role manager, and a default token provider, all backed by the same
//! context instance.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD as B64;
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::context::TestContext;
use crate::error::ContextError;
use crate::registry::ServiceCollection;

/// Schema fragment for the identity store. Identity-capable contexts append
/// this to their create script.
pub const IDENTITY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identity_users (
    id UUID PRIMARY KEY,
    email TEXT NOT NULL,
    normalized_email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS identity_roles (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    normalized_name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS identity_user_roles (
    user_id UUID NOT NULL REFERENCES identity_users(id) ON DELETE CASCADE,
    role_id UUID NOT NULL REFERENCES identity_roles(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, role_id)
);
";

/// Errors from identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A user with the same normalized email already exists.
    #[error("a user with email '{email}' already exists")]
    DuplicateEmail {
        /// Offending email.
        email: String,
    },

    /// A role with the same normalized name already exists.
    #[error("a role named '{name}' already exists")]
    DuplicateRole {
        /// Offending role name.
        name: String,
    },

    /// Underlying store failure.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// A stored user account.
#[derive(Debug, Clone)]
pub struct IdentityUser {
    /// Stable identifier.
    pub id: Uuid,
    /// Email as supplied.
    pub email: String,
    /// Lowercased email used for lookups.
    pub normalized_email: String,
    /// Salted password hash.
    pub password_hash: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A stored role.
#[derive(Debug, Clone)]
pub struct IdentityRole {
    /// Stable identifier.
    pub id: Uuid,
    /// Name as supplied.
    pub name: String,
    /// Lowercased name used for lookups.
    pub normalized_name: String,
}

/// Store operations over the standard identity schema.
///
/// All methods have default implementations against the context's pool, so
/// opting in is `impl IdentityContext for MyContext {}`.
#[async_trait]
pub trait IdentityContext: TestContext {
    /// Insert a user row.
    async fn insert_user(&self, user: &IdentityUser) -> Result<(), ContextError> {
        let client = self.pool().get().await?;
        client
            .execute(
                "INSERT INTO identity_users (id, email, normalized_email, password_hash, created_at) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &user.id,
                    &user.email,
                    &user.normalized_email,
                    &user.password_hash,
                    &user.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    /// Look up a user by normalized email.
    async fn find_user_by_email(
        &self,
        normalized_email: &str,
    ) -> Result<Option<IdentityUser>, ContextError> {
        let client = self.pool().get().await?;
        let row = client
            .query_opt(
                "SELECT id, email, normalized_email, password_hash, created_at \
                 FROM identity_users WHERE normalized_email = $1",
                &[&normalized_email],
            )
            .await?;
        Ok(row.map(|row| IdentityUser {
            id: row.get("id"),
            email: row.get("email"),
            normalized_email: row.get("normalized_email"),
            password_hash: row.get("password_hash"),
            created_at: row.get("created_at"),
        }))
    }

    /// Insert a role row.
    async fn insert_role(&self, role: &IdentityRole) -> Result<(), ContextError> {
        let client = self.pool().get().await?;
        client
            .execute(
                "INSERT INTO identity_roles (id, name, normalized_name) VALUES ($1, $2, $3)",
                &[&role.id, &role.name, &role.normalized_name],
            )
            .await?;
        Ok(())
    }

    /// Look up a role by normalized name.
    async fn find_role_by_name(
        &self,
        normalized_name: &str,
    ) -> Result<Option<IdentityRole>, ContextError> {
        let client = self.pool().get().await?;
        let row = client
            .query_opt(
                "SELECT id, name, normalized_name FROM identity_roles WHERE normalized_name = $1",
                &[&normalized_name],
            )
            .await?;
        Ok(row.map(|row| IdentityRole {
            id: row.get("id"),
            name: row.get("name"),
            normalized_name: row.get("normalized_name"),
        }))
    }

    /// Assign a role to a user. Idempotent.
    async fn add_user_to_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ContextError> {
        let client = self.pool().get().await?;
        client
            .execute(
                "INSERT INTO identity_user_roles (user_id, role_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
                &[&user_id, &role_id],
            )
            .await?;
        Ok(())
    }
}

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const HASH_INFO: &[u8] = b"pgharness-password-v1";

/// Salted password hashing with constant-time verification.
///
/// Format: `v1$<salt-b64>$<hash-b64>` with an HKDF-SHA-256 derivation.
#[derive(Debug, Default, Clone)]
pub struct PasswordHasher;

impl PasswordHasher {
    /// Hash a password under a fresh random salt.
    pub fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let digest = Self::derive(password, &salt);
        format!("v1${}${}", B64.encode(salt), B64.encode(digest))
    }

    /// Verify a password against a stored hash. Malformed hashes verify as
    /// false rather than erroring.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let mut parts = stored.split('$');
        let (Some("v1"), Some(salt), Some(digest), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let (Ok(salt), Ok(digest)) = (B64.decode(salt), B64.decode(digest)) else {
            return false;
        };
        let computed = Self::derive(password, &salt);
        computed.ct_eq(digest.as_slice()).into()
    }

    fn derive(password: &str, salt: &[u8]) -> [u8; HASH_LEN] {
        let hkdf = Hkdf::<Sha256>::new(Some(salt), password.as_bytes());
        let mut okm = [0u8; HASH_LEN];
        if hkdf.expand(HASH_INFO, &mut okm).is_err() {
            unreachable!("hkdf output length is fixed at {HASH_LEN} bytes");
        }
        okm
    }
}

/// Default purpose-scoped token provider.
///
/// Tokens are keyed blake3 hashes over the user identity and purpose; the
/// key is generated per provider instance, so tokens are only valid against
/// the registry that issued them.
pub struct DefaultTokenProvider {
    key: [u8; 32],
}

impl DefaultTokenProvider {
    /// Create a provider with a fresh random key.
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Generate a token for the given user and purpose.
    pub fn generate(&self, user: &IdentityUser, purpose: &str) -> String {
        hex::encode(self.token_hash(user, purpose).as_bytes())
    }

    /// Validate a previously generated token. Comparison is constant time.
    pub fn validate(&self, user: &IdentityUser, purpose: &str, token: &str) -> bool {
        let Ok(bytes) = hex::decode(token) else {
            return false;
        };
        let Ok(bytes) = <[u8; 32]>::try_from(bytes.as_slice()) else {
            return false;
        };
        // blake3::Hash equality is constant time.
        blake3::Hash::from(bytes) == self.token_hash(user, purpose)
    }

    fn token_hash(&self, user: &IdentityUser, purpose: &str) -> blake3::Hash {
        let message = format!("{}:{}:{}", user.id, user.normalized_email, purpose);
        blake3::keyed_hash(&self.key, message.as_bytes())
    }
}

impl Default for DefaultTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// User account management over an identity-capable context.
pub struct UserManager<C: IdentityContext> {
    context: Arc<C>,
    hasher: PasswordHasher,
}

impl<C: IdentityContext> UserManager<C> {
    /// Create a manager backed by the given context.
    pub fn new(context: Arc<C>) -> Self {
        Self {
            context,
            hasher: PasswordHasher,
        }
    }

    /// Create a user with the given email and password.
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<IdentityUser, IdentityError> {
        let normalized_email = email.to_lowercase();
        if self
            .context
            .find_user_by_email(&normalized_email)
            .await?
            .is_some()
        {
            return Err(IdentityError::DuplicateEmail {
                email: email.to_string(),
            });
        }

        let user = IdentityUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            normalized_email,
            password_hash: self.hasher.hash(password),
            created_at: Utc::now(),
        };
        self.context.insert_user(&user).await?;
        tracing::debug!(user_id = %user.id, "created identity user");
        Ok(user)
    }

    /// Look up a user by email (case-insensitive).
    pub async fn find_by_email(&self, email: &str) -> Result<Option<IdentityUser>, IdentityError> {
        let user = self
            .context
            .find_user_by_email(&email.to_lowercase())
            .await?;
        Ok(user)
    }

    /// Check a password against the stored hash.
    pub fn check_password(&self, user: &IdentityUser, password: &str) -> bool {
        self.hasher.verify(password, &user.password_hash)
    }
}

/// Role management over an identity-capable context.
pub struct RoleManager<C: IdentityContext> {
    context: Arc<C>,
}

impl<C: IdentityContext> RoleManager<C> {
    /// Create a manager backed by the given context.
    pub fn new(context: Arc<C>) -> Self {
        Self { context }
    }

    /// Create a role with the given name.
    pub async fn create_role(&self, name: &str) -> Result<IdentityRole, IdentityError> {
        let normalized_name = name.to_lowercase();
        if self
            .context
            .find_role_by_name(&normalized_name)
            .await?
            .is_some()
        {
            return Err(IdentityError::DuplicateRole {
                name: name.to_string(),
            });
        }

        let role = IdentityRole {
            id: Uuid::new_v4(),
            name: name.to_string(),
            normalized_name,
        };
        self.context.insert_role(&role).await?;
        Ok(role)
    }

    /// Look up a role by name (case-insensitive).
    pub async fn find_by_name(&self, name: &str) -> Result<Option<IdentityRole>, IdentityError> {
        let role = self.context.find_role_by_name(&name.to_lowercase()).await?;
        Ok(role)
    }

    /// Assign a role to a user.
    pub async fn add_to_role(
        &self,
        user: &IdentityUser,
        role: &IdentityRole,
    ) -> Result<(), IdentityError> {
        self.context.add_user_to_role(user.id, role.id).await?;
        Ok(())
    }
}

/// Register the standard identity service set for a capable context.
///
/// Identity-capable contexts call this from their
/// `register_identity_services` override.
pub fn register_identity_defaults<C: IdentityContext>(
    services: &mut ServiceCollection,
    context: &Arc<C>,
) {
    services.add_singleton(UserManager::new(Arc::clone(context)));
    services.add_singleton(RoleManager::new(Arc::clone(context)));
    services.add_singleton(DefaultTokenProvider::new());
}
