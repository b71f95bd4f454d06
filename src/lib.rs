//! Keycloak Cluster - a Keycloak cluster on ECS Fargate, synthesized into a
//! CloudFormation template
//!
//! A deployment names its shared infrastructure through providers (VPC,
//! database, ECS cluster, Cloud Map namespace) and its exposure through port
//! publishers. Synthesis resolves every provider in a fixed order, composes
//! the Keycloak task definition and service, and writes the result into a
//! single [`template::Template`].
//!
//! # Architecture
//!
//! Synthesis is a single pass over an explicit resource graph:
//! - Providers either create resources or hand back existing infrastructure
//! - Cluster discovery is bound after the service exists and rendered last
//! - Every configuration error aborts the pass before output is produced
//!
//! # Modules
//!
//! - [`template`] - CloudFormation template, construct scopes and intrinsics
//! - [`provider`] - VPC, database, ECS cluster and namespace providers
//! - [`publish`] - Port publishers and the deprecated listener providers
//! - [`workload`] - Keycloak container, task definition and Fargate service
//! - [`network`] - Security groups, peers and subnet selection
//! - [`compiler`] - Composes a complete Keycloak cluster
//! - [`config`] - Declarative deployment configuration
//! - [`error`] - Error types for synthesis

#![deny(missing_docs)]

pub mod compiler;
pub mod config;
pub mod error;
pub mod network;
pub mod provider;
pub mod publish;
pub mod template;
pub mod workload;

pub use compiler::{synthesize, KeycloakCluster, KeycloakClusterProps};
pub use config::DeploymentConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Container Ports
// =============================================================================
// Ports the Keycloak container exposes to publishers. JGroups traffic stays
// inside the service security group.

pub use workload::{ADMIN_CONSOLE_PORT, HTTPS_WEB_PORT, WEB_PORT};
