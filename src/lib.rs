//! Ephemeral per-test PostgreSQL containers with generic context binding.
//!
//! A [`PgHarness`] provisions one isolated Postgres container, binds a
//! caller-defined context type to it, composes a minimal service registry
//! around that context, and tears everything down deterministically —
//! context first, container second — however construction went.
//!
//! Provides:
//! - [`PgHarness`] / [`PgHarnessBuilder`]: blocking construction façade
//!   over the async lifecycle
//! - [`TestContext`]: per-type factory, schema script, and uniform default
//!   operations (ensure-created, ensure-deleted, can-connect)
//! - [`ServiceRegistry`]: immutable type-map seeded with the context,
//!   extensible via a builder hook
//! - [`identity`]: user/role/token services registered automatically for
//!   identity-capable context types
//!
//! # Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use deadpool_postgres::Pool;
//! use pgharness::{ContextError, ContextOptions, PgHarness, TestContext};
//!
//! struct ClinicContext {
//!     pool: Pool,
//! }
//!
//! #[async_trait]
//! impl TestContext for ClinicContext {
//!     async fn connect(options: ContextOptions) -> Result<Self, ContextError> {
//!         Ok(Self { pool: options.build_pool()? })
//!     }
//!
//!     fn pool(&self) -> &Pool {
//!         &self.pool
//!     }
//!
//!     fn create_script(&self) -> &str {
//!         "CREATE TABLE IF NOT EXISTS doctors (id SERIAL PRIMARY KEY, name TEXT NOT NULL);"
//!     }
//! }
//!
//! let mut harness = PgHarness::<ClinicContext>::builder().build()?;
//! assert!(harness.run(harness.context().can_connect()));
//! harness.tear_down_blocking();
//! # Ok::<(), pgharness::HarnessError>(())
//! ```
//!
//! Concurrent harnesses never collide: each generates its own database
//! name and publishes the server on an engine-assigned ephemeral port.

mod bridge;
pub mod container;
pub mod context;
pub mod detect;
pub mod error;
pub mod harness;
pub mod identity;
pub mod registry;

pub use container::{ConnectOptions, ContainerSettings, DEFAULT_IMAGE, PostgresContainer};
pub use context::{ContextOptions, TestContext, TrackingMode};
pub use error::{ContextError, HarnessError, RegistryError, Result};
pub use harness::{PgHarness, PgHarnessBuilder};
pub use identity::{
    DefaultTokenProvider, IDENTITY_SCHEMA, IdentityContext, IdentityError, IdentityRole,
    IdentityUser, PasswordHasher, RoleManager, UserManager,
};
pub use registry::{ServiceCollection, ServiceRegistry};
