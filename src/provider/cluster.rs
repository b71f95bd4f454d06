//! ECS cluster providers

use serde_json::{json, Value};
use tracing::info;

use super::{ClusterProvider, VpcInfo};
use crate::template::{intrinsic, Resource, Scope};
use crate::Result;

/// Capacity providers every Fargate cluster can associate
pub const FARGATE_CAPACITY_PROVIDERS: [&str; 2] = ["FARGATE", "FARGATE_SPOT"];

/// Information about the ECS cluster the service is added to
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterInfo {
    /// Cluster name or ARN (literal or intrinsic)
    pub cluster_name: Value,
    /// Capacity providers associated by this template
    pub capacity_providers: Vec<String>,
    /// Logical id of the association resource the service must wait for
    pub capacity_association: Option<String>,
}

impl ClusterInfo {
    /// Cluster with no capacity providers associated by this template
    pub fn new(cluster_name: Value) -> Self {
        Self {
            cluster_name,
            capacity_providers: Vec::new(),
            capacity_association: None,
        }
    }
}

/// Creates a plain ECS cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcsCluster;

impl ClusterProvider for EcsCluster {
    fn bind(&self, scope: &mut Scope<'_>, _vpc: &VpcInfo) -> Result<ClusterInfo> {
        let cluster_id = scope.add_resource("Cluster", Resource::new("AWS::ECS::Cluster"))?;
        info!(provider = "ecs-cluster", logical_id = %cluster_id, "creating ECS cluster");
        Ok(ClusterInfo::new(intrinsic::reference(&cluster_id)))
    }
}

/// Creates an ECS cluster with the FARGATE and FARGATE_SPOT capacity
/// providers associated
///
/// The service only runs on spot capacity when a capacity provider strategy
/// is configured for it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FargateSpotCluster;

impl ClusterProvider for FargateSpotCluster {
    fn bind(&self, scope: &mut Scope<'_>, _vpc: &VpcInfo) -> Result<ClusterInfo> {
        let cluster_id = scope.add_resource("Cluster", Resource::new("AWS::ECS::Cluster"))?;
        let mut cluster_scope = scope.child("Cluster");
        let association_id = cluster_scope.add_resource(
            "CapacityProviderAssociations",
            Resource::new("AWS::ECS::ClusterCapacityProviderAssociations").with_properties(json!({
                "Cluster": intrinsic::reference(&cluster_id),
                "CapacityProviders": FARGATE_CAPACITY_PROVIDERS,
                "DefaultCapacityProviderStrategy": []
            })),
        )?;
        info!(
            provider = "fargate-spot-cluster",
            logical_id = %cluster_id,
            "creating ECS cluster with Fargate Spot capacity"
        );

        Ok(ClusterInfo {
            cluster_name: intrinsic::reference(&cluster_id),
            capacity_providers: FARGATE_CAPACITY_PROVIDERS.map(String::from).to_vec(),
            capacity_association: Some(association_id),
        })
    }
}

/// Provides a caller-supplied cluster
#[derive(Clone, Debug, PartialEq)]
pub struct ExistingCluster {
    info: ClusterInfo,
}

impl ExistingCluster {
    /// Wrap raw cluster information
    pub fn new(info: ClusterInfo) -> Self {
        Self { info }
    }
}

impl ClusterProvider for ExistingCluster {
    fn bind(&self, _scope: &mut Scope<'_>, _vpc: &VpcInfo) -> Result<ClusterInfo> {
        info!(provider = "existing-cluster", "providing ECS cluster");
        Ok(self.info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;

    fn vpc() -> VpcInfo {
        VpcInfo {
            vpc_id: json!("vpc-1"),
            public_subnet_ids: vec![],
            private_subnet_ids: vec![json!("subnet-1")],
        }
    }

    #[test]
    fn ecs_cluster_creates_a_single_cluster() {
        let mut template = Template::new();
        let mut root = template.root();
        let mut scope = root.child("Keycloak");
        let info = EcsCluster.bind(&mut scope, &vpc()).unwrap();
        drop(scope);

        assert_eq!(info.cluster_name, json!({ "Ref": "KeycloakCluster" }));
        assert!(info.capacity_association.is_none());
        assert_eq!(template.count_of_type("AWS::ECS::Cluster"), 1);
    }

    #[test]
    fn spot_cluster_associates_fargate_capacity_providers() {
        let mut template = Template::new();
        let mut root = template.root();
        let info = FargateSpotCluster.bind(&mut root, &vpc()).unwrap();
        drop(root);

        assert_eq!(info.capacity_providers, vec!["FARGATE", "FARGATE_SPOT"]);
        let association_id = info.capacity_association.unwrap();
        assert_eq!(association_id, "ClusterCapacityProviderAssociations");
        let association = template.resource(&association_id).unwrap();
        assert_eq!(
            association.properties["CapacityProviders"],
            json!(["FARGATE", "FARGATE_SPOT"])
        );
        assert_eq!(association.properties["Cluster"], json!({ "Ref": "Cluster" }));
    }

    #[test]
    fn existing_cluster_creates_nothing() {
        let mut template = Template::new();
        let mut root = template.root();
        let info = ExistingCluster::new(ClusterInfo::new(json!("arn:aws:ecs:cluster/shared")))
            .bind(&mut root, &vpc())
            .unwrap();
        drop(root);
        assert_eq!(info.cluster_name, json!("arn:aws:ecs:cluster/shared"));
        assert!(template.resources.is_empty());
    }
}
