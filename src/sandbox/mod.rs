//! Per-project sandbox containers.
//!
//! Each project gets one container named `{prefix}{id}`, attached to a shared
//! network, with the host directory `{projects_root}/{id}` bind-mounted at the
//! editor's workspace and routing labels that publish it at `{id}.{base_domain}`.
//! The container's entrypoint drops an init marker into the workspace once the
//! project skeleton is ready.

mod docker;
mod manager;
mod routing;
mod runtime;

pub use docker::DockerRuntime;
pub use manager::{Environment, SandboxManager};
pub use routing::{project_host, project_url, routing_labels};
pub use runtime::{ContainerPresence, ContainerRuntime, ContainerSpec, ExecOutput};
