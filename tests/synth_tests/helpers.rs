//! Shared helpers for synthesis tests

use std::path::PathBuf;

use serde_json::Value;

use keycloak_cluster::config::{self, DeploymentConfig};
use keycloak_cluster::template::Template;

/// Path of a fixture under `tests/fixtures`
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Load a fixture deployment
pub fn deployment(name: &str) -> DeploymentConfig {
    config::load_file(fixture(name)).unwrap()
}

/// Synthesize a fixture deployment
pub fn synthesize(name: &str) -> Template {
    keycloak_cluster::synthesize(&deployment(name)).unwrap()
}

/// Container definitions of a task definition
pub fn containers<'t>(template: &'t Template, task_definition: &str) -> &'t [Value] {
    template
        .resource(task_definition)
        .unwrap()
        .properties["ContainerDefinitions"]
        .as_array()
        .unwrap()
}

/// Value of an environment variable of a container definition
pub fn env<'c>(container: &'c Value, name: &str) -> Option<&'c Value> {
    container["Environment"]
        .as_array()?
        .iter()
        .find(|e| e["Name"] == name)
        .map(|e| &e["Value"])
}
