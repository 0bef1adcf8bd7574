//! Nested container environment detection.
//!
//! When the test process itself runs inside a container (dev container, CI
//! job with a mounted Docker socket), containers started through the shared
//! engine publish their ports on the *host*, not inside the current
//! namespace. Detection here selects the provisioning strategy: engine
//! socket path and the hostname under which published ports are reachable.
//!
//! Detection is heuristic. A misfire never aborts provisioning; the caller
//! falls back to the default engine connection and logs a warning.

use std::path::Path;

/// Marker file written by Docker inside its containers.
const DOCKER_ENV_MARKER: &str = "/.dockerenv";

/// Marker file written by Podman inside its containers.
const CONTAINER_ENV_MARKER: &str = "/.containerenv";

/// Set by VS Code remote-container tooling.
const REMOTE_CONTAINERS_VAR: &str = "REMOTE_CONTAINERS";

/// Engine socket path used when a host socket is mounted into the
/// environment.
pub const NESTED_ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// Hostname under which host-published ports are reachable from inside a
/// container sharing the host engine.
pub const NESTED_HOST_OVERRIDE: &str = "host.docker.internal";

/// Returns true when the current process appears to run inside a container
/// that shares the host's container engine.
pub fn running_in_container() -> bool {
    Path::new(DOCKER_ENV_MARKER).exists()
        || Path::new(CONTAINER_ENV_MARKER).exists()
        || std::env::var_os(REMOTE_CONTAINERS_VAR).is_some()
}
