//! The ECS service running the Keycloak tasks

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::network::{self, Connectable, Peer, PortRange, SubnetSelection};
use crate::provider::{ClusterInfo, NamespaceInfo, VpcInfo};
use crate::template::{intrinsic, Resource, Scope};
use crate::{Error, Result};

// =============================================================================
// Service Discovery
// =============================================================================

/// DNS record type registered in Cloud Map
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    /// IPv4 address record
    #[default]
    A,
    /// IPv6 address record
    Aaaa,
    /// Service record
    Srv,
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Srv => "SRV",
        })
    }
}

/// A Cloud Map service the tasks register in
#[derive(Clone, Debug, PartialEq)]
pub struct CloudMapService {
    /// Service name (literal or intrinsic)
    pub service_name: Value,
    /// Namespace DNS name (literal or intrinsic)
    pub namespace_name: Value,
    /// Record type registered for each task
    pub dns_record_type: DnsRecordType,
}

// =============================================================================
// Service Properties
// =============================================================================

/// One entry of a capacity provider strategy
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapacityProviderStrategyItem {
    /// Capacity provider name, e.g. `FARGATE_SPOT`
    pub capacity_provider: String,
    /// Relative share of tasks
    #[serde(default)]
    pub weight: Option<u32>,
    /// Tasks always placed on this provider
    #[serde(default)]
    pub base: Option<u32>,
}

impl CapacityProviderStrategyItem {
    fn to_value(&self) -> Value {
        let mut item = Map::new();
        item.insert("CapacityProvider".to_string(), json!(self.capacity_provider));
        if let Some(weight) = self.weight {
            item.insert("Weight".to_string(), json!(weight));
        }
        if let Some(base) = self.base {
            item.insert("Base".to_string(), json!(base));
        }
        Value::Object(item)
    }
}

/// Target-tracking CPU autoscaling of the task count
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoScaling {
    /// Fewest tasks
    pub min_capacity: u32,
    /// Most tasks
    pub max_capacity: u32,
    /// Average CPU utilization to hold
    pub target_cpu_utilization_percent: u32,
    /// Wait after a scale-in activity
    pub scale_in_cooldown_secs: u32,
    /// Wait after a scale-out activity
    pub scale_out_cooldown_secs: u32,
}

impl Default for AutoScaling {
    fn default() -> Self {
        Self {
            min_capacity: 1,
            max_capacity: 2,
            target_cpu_utilization_percent: 75,
            scale_in_cooldown_secs: 30 * 60,
            scale_out_cooldown_secs: 10 * 60,
        }
    }
}

impl AutoScaling {
    /// Reject empty ranges and out-of-range targets
    pub fn validate(&self) -> Result<()> {
        if self.max_capacity == 0 {
            return Err(Error::validation("autoscaling max capacity must be at least 1"));
        }
        if self.min_capacity > self.max_capacity {
            return Err(Error::validation(format!(
                "autoscaling min capacity {} exceeds max capacity {}",
                self.min_capacity, self.max_capacity
            )));
        }
        if !(1..=100).contains(&self.target_cpu_utilization_percent) {
            return Err(Error::validation(format!(
                "target CPU utilization {}% must be between 1 and 100",
                self.target_cpu_utilization_percent
            )));
        }
        Ok(())
    }
}

/// Settings of the ECS service
#[derive(Clone, Debug, PartialEq)]
pub struct FargateServiceProps {
    /// Number of tasks to run
    pub desired_count: u32,
    /// Seconds load balancer health checks are ignored after a task starts
    pub health_check_grace_period_secs: u32,
    /// Roll back deployments that fail to stabilize
    pub circuit_breaker: bool,
    /// Lower bound of running tasks during a deployment, in percent
    pub min_healthy_percent: Option<u32>,
    /// Upper bound of running tasks during a deployment, in percent
    pub max_healthy_percent: Option<u32>,
    /// Subnets the tasks are placed in
    pub task_subnets: SubnetSelection,
    /// Give each task a public IP
    pub assign_public_ip: bool,
    /// Replaces the FARGATE launch type when not empty
    pub capacity_provider_strategy: Vec<CapacityProviderStrategyItem>,
    /// Cloud Map record type
    pub dns_record_type: DnsRecordType,
    /// Cloud Map record TTL
    pub dns_ttl_secs: u32,
}

impl Default for FargateServiceProps {
    fn default() -> Self {
        Self {
            desired_count: 1,
            health_check_grace_period_secs: 10 * 60,
            circuit_breaker: true,
            min_healthy_percent: None,
            max_healthy_percent: None,
            task_subnets: SubnetSelection::Private,
            assign_public_ip: false,
            capacity_provider_strategy: Vec::new(),
            dns_record_type: DnsRecordType::A,
            dns_ttl_secs: 10,
        }
    }
}

impl FargateServiceProps {
    fn validate(&self, cluster: &ClusterInfo) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_healthy_percent, self.max_healthy_percent) {
            if min > max {
                return Err(Error::validation(format!(
                    "min healthy percent {min} exceeds max healthy percent {max}"
                )));
            }
        }
        if self.dns_record_type == DnsRecordType::Srv {
            return Err(Error::unsupported(
                "SRV records need a container port mapping; register A or AAAA records",
            ));
        }
        if self.capacity_provider_strategy.is_empty() {
            return Ok(());
        }
        if cluster.capacity_providers.is_empty() {
            warn!(
                "capacity provider strategy set but the cluster associates no capacity providers in this template"
            );
            return Ok(());
        }
        for item in &self.capacity_provider_strategy {
            if !cluster.capacity_providers.contains(&item.capacity_provider) {
                return Err(Error::validation(format!(
                    "capacity provider '{}' is not associated with the cluster (available: {})",
                    item.capacity_provider,
                    cluster.capacity_providers.join(", ")
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Fargate Service
// =============================================================================

/// Handle to the ECS service written into the template
#[derive(Clone, Debug, PartialEq)]
pub struct FargateService {
    id: String,
    logical_id: String,
    security_group_id: String,
    cloud_map_id: String,
    cluster_name: Value,
    namespace_name: Value,
    dns_record_type: DnsRecordType,
    health_check_grace_period_secs: u32,
}

impl FargateService {
    /// Create the service, its security group and its Cloud Map registration
    ///
    /// `task_definition` is the logical id of a task definition that may be
    /// rendered later in the same pass.
    pub fn new(
        scope: &mut Scope<'_>,
        id: &str,
        cluster: &ClusterInfo,
        vpc: &VpcInfo,
        namespace: &NamespaceInfo,
        task_definition: &str,
        props: &FargateServiceProps,
    ) -> Result<Self> {
        props.validate(cluster)?;
        let subnets = vpc.subnets(props.task_subnets)?;

        let mut service_scope = scope.child(id);
        let description = format!("{}/SecurityGroup", service_scope.path());
        let security_group_id = network::create_security_group(
            &mut service_scope,
            "SecurityGroup",
            &description,
            vpc.vpc_id.clone(),
        )?;
        let cloud_map_name = service_scope.own_logical_id().to_ascii_lowercase();
        let cloud_map_id = service_scope.add_resource(
            "CloudmapService",
            Resource::new("AWS::ServiceDiscovery::Service").with_properties(json!({
                "Name": cloud_map_name,
                "NamespaceId": namespace.namespace_id,
                "DnsConfig": {
                    "DnsRecords": [{
                        "Type": props.dns_record_type.to_string(),
                        "TTL": props.dns_ttl_secs
                    }],
                    "NamespaceId": namespace.namespace_id,
                    "RoutingPolicy": "MULTIVALUE"
                },
                "HealthCheckCustomConfig": { "FailureThreshold": 1 }
            })),
        )?;

        let mut deployment = Map::new();
        if let Some(max) = props.max_healthy_percent {
            deployment.insert("MaximumPercent".to_string(), json!(max));
        }
        if let Some(min) = props.min_healthy_percent {
            deployment.insert("MinimumHealthyPercent".to_string(), json!(min));
        }
        if props.circuit_breaker {
            deployment.insert(
                "DeploymentCircuitBreaker".to_string(),
                json!({ "Enable": true, "Rollback": true }),
            );
        }

        let mut properties = json!({
            "Cluster": cluster.cluster_name,
            "TaskDefinition": intrinsic::reference(task_definition),
            "DesiredCount": props.desired_count,
            "DeploymentConfiguration": deployment,
            "EnableECSManagedTags": false,
            "NetworkConfiguration": {
                "AwsvpcConfiguration": {
                    "AssignPublicIp": if props.assign_public_ip { "ENABLED" } else { "DISABLED" },
                    "SecurityGroups": [network::group_id(&security_group_id)],
                    "Subnets": subnets
                }
            },
            "ServiceRegistries": [{ "RegistryArn": intrinsic::get_att(&cloud_map_id, "Arn") }]
        });
        if props.capacity_provider_strategy.is_empty() {
            properties["LaunchType"] = json!("FARGATE");
        } else {
            properties["CapacityProviderStrategy"] = props
                .capacity_provider_strategy
                .iter()
                .map(CapacityProviderStrategyItem::to_value)
                .collect();
        }

        let mut resource = Resource::new("AWS::ECS::Service").with_properties(properties);
        if let Some(association) = &cluster.capacity_association {
            resource = resource.depends_on(association.clone());
        }
        let logical_id = scope.add_resource(id, resource)?;
        info!(
            logical_id = %logical_id,
            desired_count = props.desired_count,
            circuit_breaker = props.circuit_breaker,
            "creating Fargate service"
        );

        Ok(Self {
            id: id.to_string(),
            logical_id,
            security_group_id,
            cloud_map_id,
            cluster_name: cluster.cluster_name.clone(),
            namespace_name: namespace.namespace_name.clone(),
            dns_record_type: props.dns_record_type,
            health_check_grace_period_secs: props.health_check_grace_period_secs,
        })
    }

    /// Logical id of the `AWS::ECS::Service`
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Logical id of the service's security group
    pub fn security_group_logical_id(&self) -> &str {
        &self.security_group_id
    }

    /// The service's security group as a connection endpoint
    pub fn connectable(&self) -> Connectable {
        Connectable::new(network::group_id(&self.security_group_id))
    }

    /// The Cloud Map service the tasks register in
    pub fn cloud_map_service(&self) -> CloudMapService {
        CloudMapService {
            service_name: intrinsic::get_att(&self.cloud_map_id, "Name"),
            namespace_name: self.namespace_name.clone(),
            dns_record_type: self.dns_record_type,
        }
    }

    /// Open `ports` on the service to `peer`
    ///
    /// Rules are keyed by peer and port, so opening the same port twice adds
    /// one rule.
    pub fn allow_from(&self, scope: &mut Scope<'_>, peer: &Peer, ports: PortRange) -> Result<()> {
        let mut service_scope = scope.child(&self.id);
        let mut sg_scope = service_scope.child("SecurityGroup");
        let rule_id = format!("from {}:{}", peer.label(), ports.describe());
        if sg_scope.contains(&rule_id) {
            debug!(rule = %rule_id, "ingress rule already present");
            return Ok(());
        }
        network::allow_from(
            &mut sg_scope,
            &rule_id,
            network::group_id(&self.security_group_id),
            peer,
            ports,
        )?;
        Ok(())
    }

    /// Let tasks of this service reach each other on `ports`
    pub fn allow_internally(&self, scope: &mut Scope<'_>, ports: PortRange) -> Result<()> {
        let peer = Peer::SecurityGroup(network::group_id(&self.security_group_id));
        self.allow_from(scope, &peer, ports)
    }

    /// Register a container port with a load balancer target group
    ///
    /// `listener` is the listener or listener rule that attaches the target
    /// group to a load balancer; ECS rejects target groups that are not
    /// attached yet.
    pub fn add_load_balancer_target(
        &self,
        scope: &mut Scope<'_>,
        target_group_arn: Value,
        container_name: &str,
        container_port: u16,
        listener: Option<&str>,
    ) -> Result<()> {
        scope.push_property(
            &self.logical_id,
            "LoadBalancers",
            json!({
                "ContainerName": container_name,
                "ContainerPort": container_port,
                "TargetGroupArn": target_group_arn
            }),
        )?;
        if let Some(listener) = listener {
            scope.add_dependency(&self.logical_id, listener)?;
        }

        // The grace period is only valid on services behind a load balancer.
        let grace_period = self.health_check_grace_period_secs;
        let service = scope.resource_mut(&self.logical_id).ok_or_else(|| {
            Error::missing_dependency(format!("service '{}' is not in the template", self.logical_id))
        })?;
        service.properties["HealthCheckGracePeriodSeconds"] = json!(grace_period);

        debug!(
            service = %self.logical_id,
            container = %container_name,
            port = container_port,
            "registered load balancer target"
        );
        Ok(())
    }

    /// Scale the task count on average CPU utilization
    pub fn auto_scale(&self, scope: &mut Scope<'_>, scaling: &AutoScaling) -> Result<()> {
        scaling.validate()?;
        let mut service_scope = scope.child(&self.id);
        let mut task_count = service_scope.child("TaskCount");
        let target_id = task_count.add_resource(
            "Target",
            Resource::new("AWS::ApplicationAutoScaling::ScalableTarget").with_properties(json!({
                "MinCapacity": scaling.min_capacity,
                "MaxCapacity": scaling.max_capacity,
                "ResourceId": intrinsic::join("", vec![
                    json!("service/"),
                    self.cluster_name.clone(),
                    json!("/"),
                    intrinsic::get_att(&self.logical_id, "Name"),
                ]),
                "RoleARN": intrinsic::sub(
                    "arn:${AWS::Partition}:iam::${AWS::AccountId}:role/aws-service-role/ecs.application-autoscaling.amazonaws.com/AWSServiceRoleForApplicationAutoScaling_ECSService",
                    Vec::<(String, Value)>::new(),
                ),
                "ScalableDimension": "ecs:service:DesiredCount",
                "ServiceNamespace": "ecs"
            })),
        )?;
        let policy_name = task_count.child_logical_id("Target", "CpuScaling");
        task_count.child("Target").add_resource(
            "CpuScaling",
            Resource::new("AWS::ApplicationAutoScaling::ScalingPolicy").with_properties(json!({
                "PolicyName": policy_name,
                "PolicyType": "TargetTrackingScaling",
                "ScalingTargetId": intrinsic::reference(&target_id),
                "TargetTrackingScalingPolicyConfiguration": {
                    "PredefinedMetricSpecification": {
                        "PredefinedMetricType": "ECSServiceAverageCPUUtilization"
                    },
                    "TargetValue": scaling.target_cpu_utilization_percent,
                    "ScaleInCooldown": scaling.scale_in_cooldown_secs,
                    "ScaleOutCooldown": scaling.scale_out_cooldown_secs
                }
            })),
        )?;
        info!(
            service = %self.logical_id,
            min = scaling.min_capacity,
            max = scaling.max_capacity,
            target_percent = scaling.target_cpu_utilization_percent,
            "enabling CPU autoscaling"
        );
        Ok(())
    }
}
