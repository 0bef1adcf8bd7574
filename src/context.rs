//! Generic test-context binding.
//!
//! A context is a caller-defined unit-of-work type over the provisioned
//! database. The harness knows nothing about concrete context shapes: the
//! [`TestContext`] trait supplies the per-type factory ([`connect`]) and the
//! schema script, and the trait's default methods implement the uniform
//! parts (idempotent schema create/drop, liveness check) on top of the
//! context's pool.
//!
//! [`connect`]: TestContext::connect

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::container::ConnectOptions;
use crate::error::{ContextError, HarnessError};
use crate::registry::ServiceCollection;

/// Row tracking behavior requested from a context.
///
/// Contexts that implement dirty-tracking consult this; plain query
/// contexts may ignore it. The harness default is [`NoTracking`] so a test
/// never relies on automatic change detection.
///
/// [`NoTracking`]: TrackingMode::NoTracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    /// Rows are detached after materialization.
    #[default]
    NoTracking,
    /// Rows remain attached for dirty-tracking.
    Tracked,
}

/// Options handed to a context factory.
///
/// Built by the harness pointing at the just-started container; a
/// caller-supplied configuration hook may adjust it before binding.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    connect: ConnectOptions,
    tracking: TrackingMode,
    pool_size: usize,
}

impl ContextOptions {
    /// Defaults: no tracking, small pool, pointed at the given descriptor.
    pub fn new(connect: ConnectOptions) -> Self {
        Self {
            connect,
            tracking: TrackingMode::default(),
            pool_size: 4,
        }
    }

    /// Override the tracking mode.
    pub fn tracking(mut self, mode: TrackingMode) -> Self {
        self.tracking = mode;
        self
    }

    /// Override the pool size.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// The connection descriptor these options point at.
    pub fn connect_options(&self) -> &ConnectOptions {
        &self.connect
    }

    /// The requested tracking mode.
    pub fn tracking_mode(&self) -> TrackingMode {
        self.tracking
    }

    /// Build a connection pool against the descriptor. Pool creation is
    /// lazy; no connection is opened until first checkout.
    pub fn build_pool(&self) -> Result<Pool, ContextError> {
        let mut config = deadpool_postgres::Config::new();
        config.host = Some(self.connect.host.clone());
        config.port = Some(self.connect.port);
        config.dbname = Some(self.connect.dbname.clone());
        config.user = Some(self.connect.user.clone());
        config.password = Some(self.connect.password.clone());
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        config.pool = Some(PoolConfig::new(self.pool_size));
        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;
        Ok(pool)
    }
}

/// A connection-bound test context.
///
/// Implementations supply the factory, the pool accessor, and the schema
/// script; everything else has a uniform default. Identity-capable contexts
/// additionally set [`IDENTITY_CAPABLE`](Self::IDENTITY_CAPABLE) and
/// override [`register_identity_services`](Self::register_identity_services).
#[async_trait]
pub trait TestContext: Send + Sync + Sized + 'static {
    /// Capability tag checked once at registry composition time.
    const IDENTITY_CAPABLE: bool = false;

    /// Construct the context from the given options.
    async fn connect(options: ContextOptions) -> Result<Self, ContextError>;

    /// The context's connection pool.
    fn pool(&self) -> &Pool;

    /// DDL script that materializes this context's schema. Statements must
    /// be idempotent (`IF NOT EXISTS`).
    fn create_script(&self) -> &str;

    /// Materialize the schema. Idempotent.
    async fn ensure_created(&self) -> Result<(), ContextError> {
        let client = self.pool().get().await?;
        client.batch_execute(self.create_script()).await?;
        Ok(())
    }

    /// Drop the schema. Idempotent; used during teardown while the
    /// container is still up.
    async fn ensure_deleted(&self) -> Result<(), ContextError> {
        let client = self.pool().get().await?;
        client
            .batch_execute(
                "DROP SCHEMA IF EXISTS public CASCADE; CREATE SCHEMA IF NOT EXISTS public;",
            )
            .await?;
        Ok(())
    }

    /// True when the backing database answers a round trip.
    async fn can_connect(&self) -> bool {
        match self.pool().get().await {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }

    /// Register identity services for this context type. Called by the
    /// registry composer only when [`IDENTITY_CAPABLE`](Self::IDENTITY_CAPABLE)
    /// is set. The default is a no-op.
    fn register_identity_services(services: &mut ServiceCollection, context: &Arc<Self>) {
        let _ = (services, context);
    }
}

/// Bind a context of type `C` to the given descriptor: apply the
/// configuration hook (or defaults), run the factory, materialize the
/// schema.
pub(crate) async fn bind<C, F>(
    connect: ConnectOptions,
    configure: Option<F>,
) -> Result<C, HarnessError>
where
    C: TestContext,
    F: FnOnce(ContextOptions) -> ContextOptions + Send,
{
    let mut options = ContextOptions::new(connect);
    if let Some(hook) = configure {
        options = hook(options);
    }

    let context = C::connect(options)
        .await
        .map_err(HarnessError::ContextConstruction)?;

    context
        .ensure_created()
        .await
        .map_err(HarnessError::SchemaInit)?;

    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn descriptor() -> ConnectOptions {
        ConnectOptions {
            host: "127.0.0.1".to_string(),
            port: 1,
            dbname: "test_db_x".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
        }
    }

    struct NullContext {
        pool: Pool,
    }

    #[async_trait]
    impl TestContext for NullContext {
        async fn connect(options: ContextOptions) -> Result<Self, ContextError> {
            Ok(Self {
                pool: options.build_pool()?,
            })
        }

        fn pool(&self) -> &Pool {
            &self.pool
        }

        fn create_script(&self) -> &str {
            "SELECT 1;"
        }
    }

    #[test]
    fn defaults_disable_tracking() {
        let options = ContextOptions::new(descriptor());
        assert_eq!(options.tracking_mode(), TrackingMode::NoTracking);
    }

    #[test]
    fn hooks_can_override_tracking() {
        let options = ContextOptions::new(descriptor()).tracking(TrackingMode::Tracked);
        assert_eq!(options.tracking_mode(), TrackingMode::Tracked);
    }

    #[test]
    fn pool_creation_is_lazy() {
        // Port 1 is closed; creation must still succeed because no
        // connection is opened until checkout.
        let options = ContextOptions::new(descriptor());
        assert!(options.build_pool().is_ok());
    }

    #[tokio::test]
    async fn can_connect_is_false_for_unreachable_server() {
        let context = NullContext::connect(ContextOptions::new(descriptor()))
            .await
            .expect("factory");
        assert!(!context.can_connect().await);
    }

    #[test]
    fn capability_tag_defaults_to_false() {
        assert!(!NullContext::IDENTITY_CAPABLE);
    }
}
