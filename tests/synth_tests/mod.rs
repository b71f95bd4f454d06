//! Integration tests for template synthesis
//!
//! Tests are organized by the story they tell:
//!
//! - `deployments`: Stories about operators describing a deployment in YAML
//!   and getting a complete template back
//!
//! - `bring_your_own`: Stories about plugging existing infrastructure into
//!   the cluster through the provider API
//!
//! - `exposure`: Stories about publishing Keycloak's ports, including the
//!   deprecated listener providers

mod bring_your_own;
mod deployments;
mod exposure;
mod helpers;
