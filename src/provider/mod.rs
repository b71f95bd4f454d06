//! Infrastructure provider abstraction layer
//!
//! Each piece of shared infrastructure the Keycloak cluster needs is supplied
//! by a provider: a one-method trait that either creates new resources in the
//! template or hands back caller-supplied infrastructure. Providers are
//! resolved in a fixed order and every stage receives the results of the
//! stages before it:
//!
//! ```text
//! vpc -> database -> ecs cluster -> cloud map namespace
//! ```
//!
//! # Supported Providers
//!
//! - [`VpcProvider`]: [`IngressAndPrivateVpc`], [`ExistingVpc`]
//! - [`DatabaseProvider`]: [`ServerlessAuroraDatabase`], [`DatabaseInstance`], [`ExistingDatabase`]
//! - [`ClusterProvider`]: [`EcsCluster`], [`FargateSpotCluster`], [`ExistingCluster`]
//! - [`NamespaceProvider`]: [`PrivateDnsNamespace`], [`ExistingNamespace`]
//!
//! When a provider is not supplied, the matching factory in
//! [`ProviderDefaults`] builds one.

mod cluster;
mod database;
mod namespace;
mod vpc;

pub use cluster::{
    ClusterInfo, EcsCluster, ExistingCluster, FargateSpotCluster, FARGATE_CAPACITY_PROVIDERS,
};
pub use database::{
    map_engine_to_vendor, ClusterEngine, DatabaseInfo, DatabaseInstance, EngineFamily,
    ExistingDatabase, InstanceEngine, SecretRef, ServerlessAuroraDatabase, ServerlessScaling,
};
pub use namespace::{ExistingNamespace, NamespaceInfo, PrivateDnsNamespace};
pub use vpc::{ExistingVpc, IngressAndPrivateVpc, VpcInfo};

use std::fmt;

use crate::template::Scope;
use crate::Result;

/// Supplies the network the cluster lives in
pub trait VpcProvider: fmt::Debug {
    /// Bind resources to the scope and provide [`VpcInfo`]
    fn bind(&self, scope: &mut Scope<'_>) -> Result<VpcInfo>;
}

/// Supplies the database and its credential secret once the VPC is known
pub trait DatabaseProvider: fmt::Debug {
    /// Bind resources to the scope with access to the VPC
    fn bind(&self, scope: &mut Scope<'_>, vpc: &VpcInfo) -> Result<DatabaseInfo>;
}

/// Supplies the ECS cluster once the VPC is known
pub trait ClusterProvider: fmt::Debug {
    /// Bind resources to the scope with access to the VPC
    fn bind(&self, scope: &mut Scope<'_>, vpc: &VpcInfo) -> Result<ClusterInfo>;
}

/// Supplies the Cloud Map namespace used for cluster member discovery
pub trait NamespaceProvider: fmt::Debug {
    /// Bind resources to the scope with access to the VPC
    fn bind(&self, scope: &mut Scope<'_>, vpc: &VpcInfo) -> Result<NamespaceInfo>;
}

/// Factories used when a provider is not supplied
///
/// Replacing a factory changes what gets created by default without touching
/// the per-deployment configuration.
#[derive(Clone, Copy, Debug)]
pub struct ProviderDefaults {
    /// Default VPC provider
    pub vpc: fn() -> Box<dyn VpcProvider>,
    /// Default database provider
    pub database: fn() -> Box<dyn DatabaseProvider>,
    /// Default ECS cluster provider
    pub cluster: fn() -> Box<dyn ClusterProvider>,
    /// Default Cloud Map namespace provider
    pub namespace: fn() -> Box<dyn NamespaceProvider>,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            vpc: ingress_and_private_vpc,
            database: serverless_aurora_database,
            cluster: ecs_cluster,
            namespace: private_dns_namespace,
        }
    }
}

/// A new VPC with public ingress and private subnets
pub fn ingress_and_private_vpc() -> Box<dyn VpcProvider> {
    Box::new(IngressAndPrivateVpc::default())
}

/// A new serverless Aurora MySQL cluster
pub fn serverless_aurora_database() -> Box<dyn DatabaseProvider> {
    Box::new(ServerlessAuroraDatabase::default())
}

/// A new ECS cluster
pub fn ecs_cluster() -> Box<dyn ClusterProvider> {
    Box::new(EcsCluster)
}

/// A new private DNS namespace named `keycloak-service-discovery`
pub fn private_dns_namespace() -> Box<dyn NamespaceProvider> {
    Box::new(PrivateDnsNamespace::default())
}
