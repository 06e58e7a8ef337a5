//! Edge-router labels attached to sandbox containers.
//!
//! The labels follow Traefik's docker provider conventions, so a router
//! watching the daemon picks up each new sandbox without any registration call.

use std::collections::HashMap;

use crate::config::SandboxSettings;
use crate::project::ProjectId;

/// Public host name of a project's preview.
pub fn project_host(project: &ProjectId, settings: &SandboxSettings) -> String {
    format!("{}.{}", project, settings.base_domain)
}

/// Externally reachable address of a project's environment.
pub fn project_url(project: &ProjectId, settings: &SandboxSettings) -> String {
    format!("{}://{}", settings.scheme, project_host(project, settings))
}

pub fn routing_labels(project: &ProjectId, settings: &SandboxSettings) -> HashMap<String, String> {
    let router = format!("{}{}", settings.container_prefix, project);
    let rule = format!("Host(`{}`)", project_host(project, settings));

    let mut labels = HashMap::new();
    labels.insert("traefik.enable".to_string(), "true".to_string());

    labels.insert(format!("traefik.http.routers.{router}.rule"), rule.clone());
    labels.insert(
        format!("traefik.http.routers.{router}.entrypoints"),
        settings.entrypoint.clone(),
    );

    labels.insert(format!("traefik.http.routers.{router}-secure.rule"), rule);
    labels.insert(
        format!("traefik.http.routers.{router}-secure.entrypoints"),
        settings.secure_entrypoint.clone(),
    );
    labels.insert(
        format!("traefik.http.routers.{router}-secure.tls"),
        "true".to_string(),
    );
    labels.insert(
        format!("traefik.http.routers.{router}-secure.tls.certresolver"),
        settings.cert_resolver.clone(),
    );

    labels.insert(
        format!("traefik.http.services.{router}.loadbalancer.server.port"),
        settings.backend_port.to_string(),
    );
    labels
}
