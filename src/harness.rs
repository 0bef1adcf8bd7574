//! Harness façade: container start, context bind, registry composition,
//! deterministic teardown.
//!
//! Construction is strictly sequential: start the container, bind the
//! context, compose the registry. Teardown runs in reverse: drop the
//! schema, release the context, stop the container. Any failure after the
//! container is up triggers best-effort teardown of everything acquired so
//! far before the error propagates, so a failed construction never leaks a
//! running container.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::BlockingBridge;
use crate::container::{ConnectOptions, ContainerSettings, PostgresContainer};
use crate::context::{ContextOptions, TestContext, bind};
use crate::error::HarnessError;
use crate::registry::{ServiceCollection, ServiceRegistry};

type ContextHook = Box<dyn FnOnce(ContextOptions) -> ContextOptions + Send>;
type ServicesHook = Box<dyn FnOnce(&mut ServiceCollection) + Send>;

/// Builder for a [`PgHarness`]. All settings are optional.
pub struct PgHarnessBuilder<C: TestContext> {
    settings: ContainerSettings,
    configure_context: Option<ContextHook>,
    configure_services: Option<ServicesHook>,
    _context: PhantomData<fn() -> C>,
}

impl<C: TestContext> PgHarnessBuilder<C> {
    /// Create a builder with defaults: pinned image, two-minute startup
    /// bound, no hooks.
    pub fn new() -> Self {
        Self {
            settings: ContainerSettings::default(),
            configure_context: None,
            configure_services: None,
            _context: PhantomData,
        }
    }

    /// Override the container image reference.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.settings.image = image.into();
        self
    }

    /// Override the startup readiness bound.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.settings.startup_timeout = timeout;
        self
    }

    /// Hook applied to the context options before the context is bound.
    /// Without it the defaults are used: no tracking, pointed at the
    /// generated connection descriptor.
    pub fn configure_context<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(ContextOptions) -> ContextOptions + Send + 'static,
    {
        self.configure_context = Some(Box::new(hook));
        self
    }

    /// Hook applied to the service collection after the harness defaults,
    /// so caller registrations override them.
    pub fn configure_services<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut ServiceCollection) + Send + 'static,
    {
        self.configure_services = Some(Box::new(hook));
        self
    }

    /// Construct the harness, blocking the calling thread.
    ///
    /// The async provisioning steps run on the harness's own bridge
    /// runtime, never on the caller's scheduler.
    pub fn build(self) -> Result<PgHarness<C>, HarnessError> {
        let bridge = BlockingBridge::new()?;
        let provisioned = bridge.run(Self::provision(
            self.settings,
            self.configure_context,
            self.configure_services,
        ))?;
        Ok(PgHarness::assemble(bridge, provisioned))
    }

    /// Construct the harness from an async caller.
    pub async fn build_async(self) -> Result<PgHarness<C>, HarnessError> {
        let bridge = BlockingBridge::new()?;
        let provisioned = Self::provision(
            self.settings,
            self.configure_context,
            self.configure_services,
        )
        .await?;
        Ok(PgHarness::assemble(bridge, provisioned))
    }

    /// The sequential construction pipeline with its unwind behavior.
    async fn provision(
        settings: ContainerSettings,
        configure_context: Option<ContextHook>,
        configure_services: Option<ServicesHook>,
    ) -> Result<Provisioned<C>, HarnessError> {
        let mut container = PostgresContainer::new(settings);

        // start() cleans up after itself on readiness timeout.
        let connect = container.start().await?;

        // From here on every failure must unwind what was acquired, in
        // reverse order, before propagating.
        let context = match bind::<C, _>(connect.clone(), configure_context).await {
            Ok(context) => Arc::new(context),
            Err(e) => {
                container.stop().await;
                return Err(e);
            }
        };

        let mut services = ServiceCollection::new();
        services.add_shared(Arc::clone(&context));
        if C::IDENTITY_CAPABLE {
            C::register_identity_services(&mut services, &context);
        }
        if let Some(hook) = configure_services {
            hook(&mut services);
        }

        let registry = match services.build() {
            Ok(registry) => registry,
            Err(e) => {
                tear_down_inner(&mut container, Some(context)).await;
                return Err(e);
            }
        };

        Ok(Provisioned {
            container,
            connect,
            context,
            registry,
        })
    }
}

impl<C: TestContext> Default for PgHarnessBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

struct Provisioned<C> {
    container: PostgresContainer,
    connect: ConnectOptions,
    context: Arc<C>,
    registry: ServiceRegistry,
}

/// An isolated Postgres container with a bound context and a composed
/// service registry.
///
/// One harness owns exactly one container and one context; independent
/// harness instances are fully isolated and may run concurrently. A single
/// harness is single-owner, single-consumer.
pub struct PgHarness<C: TestContext> {
    bridge: BlockingBridge,
    container: PostgresContainer,
    connect: ConnectOptions,
    context: Option<Arc<C>>,
    registry: ServiceRegistry,
    torn_down: bool,
}

impl<C: TestContext> PgHarness<C> {
    /// Start building a harness for context type `C`.
    pub fn builder() -> PgHarnessBuilder<C> {
        PgHarnessBuilder::new()
    }

    fn assemble(bridge: BlockingBridge, provisioned: Provisioned<C>) -> Self {
        Self {
            bridge,
            container: provisioned.container,
            connect: provisioned.connect,
            context: Some(provisioned.context),
            registry: provisioned.registry,
            torn_down: false,
        }
    }

    /// The bound context.
    ///
    /// # Panics
    ///
    /// Panics when called after [`tear_down`](Self::tear_down).
    pub fn context(&self) -> &C {
        self.context
            .as_deref()
            .expect("context accessed after tear_down")
    }

    /// Shared handle to the bound context.
    ///
    /// # Panics
    ///
    /// Panics when called after [`tear_down`](Self::tear_down).
    pub fn context_handle(&self) -> Arc<C> {
        self.context
            .clone()
            .expect("context accessed after tear_down")
    }

    /// The composed service registry.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Connection descriptor for the backing container. Valid only while
    /// the container is running.
    pub fn connect_options(&self) -> &ConnectOptions {
        &self.connect
    }

    /// The generated per-harness database name.
    pub fn database_name(&self) -> &str {
        self.container.database()
    }

    /// Run an async operation to completion on the harness's bridge
    /// runtime, blocking the calling thread. This is how synchronous tests
    /// drive the async context API.
    pub fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        self.bridge.run(fut)
    }

    /// Tear down: drop the schema, release the context, stop the
    /// container — reverse of creation order, so the schema drop still has
    /// a live connection target.
    ///
    /// Idempotent; every step's failure is logged and swallowed, never
    /// propagated, so teardown cannot obscure the outcome of the test that
    /// used the harness.
    pub async fn tear_down(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        tear_down_inner(&mut self.container, self.context.take()).await;
    }

    /// Blocking form of [`tear_down`](Self::tear_down) for synchronous
    /// callers.
    pub fn tear_down_blocking(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let Self {
            bridge,
            container,
            context,
            ..
        } = self;
        let context = context.take();
        bridge.run(tear_down_inner(container, context));
    }
}

impl<C: TestContext> Drop for PgHarness<C> {
    fn drop(&mut self) {
        if !self.torn_down {
            tracing::debug!(
                database = %self.container.database(),
                "harness dropped without tear_down, running best-effort teardown"
            );
            self.tear_down_blocking();
        }
    }
}

/// Best-effort teardown sequence shared by the async and blocking paths
/// and by the construction unwind.
async fn tear_down_inner<C: TestContext>(
    container: &mut PostgresContainer,
    context: Option<Arc<C>>,
) {
    if let Some(context) = context {
        match context.ensure_deleted().await {
            Ok(()) => tracing::debug!("schema dropped"),
            Err(e) => tracing::warn!(error = %e, "failed to drop schema during teardown"),
        }
        // Registry consumers may still hold clones of the context; the pool
        // they reference dies with the container either way.
        drop(context);
    }
    container.stop().await;
}
