//! Minimal service registry.
//!
//! A [`ServiceCollection`] accumulates registrations in insertion order and
//! is finalized into an immutable [`ServiceRegistry`]. Singleton values are
//! stored directly; factories run once at build time and may resolve
//! services registered before them. A factory that asks for a kind never
//! registered fails the whole build — an unsatisfiable graph is reported,
//! not silently dropped.
//!
//! Registering the same service kind twice keeps the later registration,
//! which is what lets caller-supplied hooks override harness defaults.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HarnessError, RegistryError};

type AnyService = Arc<dyn Any + Send + Sync>;
type Factory =
    Box<dyn FnOnce(&ServiceRegistry) -> Result<AnyService, RegistryError> + Send + 'static>;

enum Provider {
    Instance(AnyService),
    Factory(Factory),
}

struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    provider: Provider,
}

/// In-progress, mutable set of service registrations.
#[derive(Default)]
pub struct ServiceCollection {
    registrations: Vec<Registration>,
}

impl ServiceCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a singleton value.
    pub fn add_singleton<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.add_shared(Arc::new(value))
    }

    /// Register an already-shared singleton.
    pub fn add_shared<T: Send + Sync + 'static>(&mut self, value: Arc<T>) -> &mut Self {
        self.registrations.push(Registration {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            provider: Provider::Instance(value),
        });
        self
    }

    /// Register a factory evaluated once at build time. The factory may
    /// resolve services registered before it; resolving a missing kind
    /// fails the build.
    pub fn add_factory<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(&ServiceRegistry) -> Result<T, RegistryError> + Send + 'static,
    {
        self.registrations.push(Registration {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            provider: Provider::Factory(Box::new(move |registry| {
                factory(registry).map(|value| Arc::new(value) as AnyService)
            })),
        });
        self
    }

    /// Finalize the collection. Factories run in registration order against
    /// the services built so far. No further registration is possible on
    /// the result.
    pub fn build(self) -> Result<ServiceRegistry, HarnessError> {
        let mut registry = ServiceRegistry {
            services: HashMap::with_capacity(self.registrations.len()),
        };

        for registration in self.registrations {
            let service = match registration.provider {
                Provider::Instance(value) => value,
                Provider::Factory(factory) => factory(&registry).map_err(|e| {
                    tracing::warn!(
                        service = registration.type_name,
                        error = %e,
                        "service registration graph is unsatisfiable"
                    );
                    HarnessError::RegistryBuild(e)
                })?,
            };
            // Later registrations win.
            registry.services.insert(registration.type_id, service);
        }

        Ok(registry)
    }
}

/// Immutable service registry. Built once, read many times; safe for
/// concurrent read access.
pub struct ServiceRegistry {
    services: HashMap<TypeId, AnyService>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.len())
            .finish()
    }
}

impl ServiceRegistry {
    /// Resolve a service, if registered.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|service| Arc::clone(service).downcast::<T>().ok())
    }

    /// Resolve a service, failing with [`RegistryError::NotRegistered`]
    /// when absent.
    pub fn get_required<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, RegistryError> {
        self.get::<T>().ok_or(RegistryError::NotRegistered {
            service: std::any::type_name::<T>(),
        })
    }

    /// Number of registered service kinds.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq)]
    struct Greeting(String);

    #[derive(Debug)]
    struct Repeater {
        text: String,
        times: usize,
    }

    #[test]
    fn singleton_resolves() {
        let mut services = ServiceCollection::new();
        services.add_singleton(Greeting("hello".to_string()));
        let registry = services.build().expect("build");

        let greeting = registry.get_required::<Greeting>().expect("resolve");
        assert_eq!(*greeting, Greeting("hello".to_string()));
    }

    #[test]
    fn missing_service_reports_not_registered() {
        let registry = ServiceCollection::new().build().expect("build");
        let err = registry.get_required::<Greeting>().unwrap_err();
        assert!(matches!(err, RegistryError::NotRegistered { .. }));
        assert!(err.to_string().contains("Greeting"));
    }

    #[test]
    fn factory_resolves_earlier_registrations() {
        let mut services = ServiceCollection::new();
        services.add_singleton(Greeting("hi".to_string()));
        services.add_factory(|registry| {
            let greeting = registry.get_required::<Greeting>()?;
            Ok(Repeater {
                text: greeting.0.clone(),
                times: 3,
            })
        });
        let registry = services.build().expect("build");

        let repeater = registry.get_required::<Repeater>().expect("resolve");
        assert_eq!(repeater.text, "hi");
        assert_eq!(repeater.times, 3);
    }

    #[test]
    fn factory_with_missing_dependency_fails_the_build() {
        let mut services = ServiceCollection::new();
        services.add_factory(|registry| {
            let greeting = registry.get_required::<Greeting>()?;
            Ok(Repeater {
                text: greeting.0.clone(),
                times: 1,
            })
        });

        let err = services.build().unwrap_err();
        assert!(matches!(
            err,
            HarnessError::RegistryBuild(RegistryError::NotRegistered { .. })
        ));
    }

    #[test]
    fn later_registration_wins() {
        let mut services = ServiceCollection::new();
        services.add_singleton(Greeting("default".to_string()));
        services.add_singleton(Greeting("override".to_string()));
        let registry = services.build().expect("build");

        assert_eq!(registry.len(), 1);
        let greeting = registry.get_required::<Greeting>().expect("resolve");
        assert_eq!(greeting.0, "override");
    }

    #[test]
    fn shared_singleton_is_the_same_allocation() {
        let value = Arc::new(Greeting("shared".to_string()));
        let mut services = ServiceCollection::new();
        services.add_shared(Arc::clone(&value));
        let registry = services.build().expect("build");

        let resolved = registry.get::<Greeting>().expect("resolve");
        assert!(Arc::ptr_eq(&value, &resolved));
    }
}
