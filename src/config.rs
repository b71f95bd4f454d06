//! Declarative deployment configuration
//!
//! A deployment is described by a single YAML (or JSON) document. Provider
//! and publisher choices carry a `type:` discriminator; anything left out
//! falls back to the same defaults [`KeycloakClusterProps`] applies.
//!
//! ```yaml
//! id: Keycloak
//! database:
//!   type: instance
//!   engine:
//!     engine: postgres
//!     version: "13.4"
//! httpsPortPublisher:
//!   type: https-alb
//!   certificates:
//!     - arn:aws:acm:us-east-1:123456789012:certificate/abc
//!   upgradeHttp: true
//! desiredCount: 2
//! ```

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::compiler::KeycloakClusterProps;
use crate::network::{Connectable, SubnetSelection};
use crate::provider::{
    ClusterEngine, ClusterInfo, ClusterProvider, DatabaseInfo, DatabaseInstance, DatabaseProvider,
    EcsCluster, ExistingCluster, ExistingDatabase, ExistingNamespace, ExistingVpc,
    FargateSpotCluster, IngressAndPrivateVpc, InstanceEngine, NamespaceProvider,
    PrivateDnsNamespace, SecretRef, ServerlessAuroraDatabase, ServerlessScaling, VpcProvider,
};
use crate::publish::{
    AddTargetPublisher, ExistingListener, HttpAlbPublisher, HttpListener, HttpsAlbPublisher,
    HttpsListener, ListenerCondition, ListenerProvider, NlbListener, NlbPublisher, NoneListener,
    NonePublisher, PortPublisher, DEFAULT_LOAD_BALANCER_ID,
};
use crate::workload::{AutoScaling, CapacityProviderStrategyItem, DatabaseVendor, KeycloakOptions};
use crate::{Error, Result};

/// Construct id the cluster is created under when none is configured
pub const DEFAULT_CLUSTER_ID: &str = "Keycloak";

fn default_cluster_id() -> String {
    DEFAULT_CLUSTER_ID.to_string()
}

fn default_load_balancer_id() -> String {
    DEFAULT_LOAD_BALANCER_ID.to_string()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Deployment
// =============================================================================

/// One Keycloak cluster deployment
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DeploymentConfig {
    /// Construct id of the cluster; prefixes every logical id
    pub id: String,
    /// Template description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Network; a new VPC when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc: Option<VpcConfig>,
    /// Database; a new serverless Aurora MySQL cluster when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,
    /// ECS cluster; a new cluster when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,
    /// Cloud Map namespace; a new private DNS namespace when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<NamespaceConfig>,

    /// How the HTTP port is published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_port_publisher: Option<PublisherConfig>,
    /// How the HTTPS port is published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_port_publisher: Option<PublisherConfig>,
    /// How the admin console port is published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_console_port_publisher: Option<PublisherConfig>,

    /// Deprecated; use `httpPortPublisher`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener_provider: Option<ListenerConfig>,
    /// Deprecated; use `httpsPortPublisher`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_listener_provider: Option<ListenerConfig>,
    /// Deprecated; use `adminConsolePortPublisher`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_console_listener_provider: Option<ListenerConfig>,

    /// Keycloak container settings
    pub keycloak: KeycloakOptions,

    /// Task cpu units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Task memory
    #[serde(rename = "memoryMiB", skip_serializing_if = "Option::is_none")]
    pub memory_mib: Option<u32>,
    /// Number of Keycloak tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_count: Option<u32>,
    /// Seconds load balancer health checks are ignored after a task starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_grace_period_secs: Option<u32>,
    /// Roll back deployments that fail to stabilize
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<bool>,
    /// Lower bound of running tasks during deployments, in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_healthy_percent: Option<u32>,
    /// Upper bound of running tasks during deployments, in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_healthy_percent: Option<u32>,
    /// Subnets the tasks run in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_subnets: Option<SubnetSelection>,
    /// Give tasks public IPs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign_public_ip: Option<bool>,
    /// Capacity provider strategy of the service
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capacity_provider_strategy: Vec<CapacityProviderStrategyItem>,
    /// CPU autoscaling of the task count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_scaling: Option<AutoScaling>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            id: default_cluster_id(),
            description: None,
            vpc: None,
            database: None,
            cluster: None,
            namespace: None,
            http_port_publisher: None,
            https_port_publisher: None,
            admin_console_port_publisher: None,
            listener_provider: None,
            https_listener_provider: None,
            admin_console_listener_provider: None,
            keycloak: KeycloakOptions::default(),
            cpu: None,
            memory_mib: None,
            desired_count: None,
            health_check_grace_period_secs: None,
            circuit_breaker: None,
            min_healthy_percent: None,
            max_healthy_percent: None,
            task_subnets: None,
            assign_public_ip: None,
            capacity_provider_strategy: Vec::new(),
            auto_scaling: None,
        }
    }
}

impl DeploymentConfig {
    /// Parse a YAML or JSON document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        if config.id.is_empty() {
            return Err(Error::validation("deployment id must not be empty"));
        }
        Ok(config)
    }

    /// Build the cluster props, turning every configured choice into its
    /// provider or publisher
    pub fn into_props(&self) -> KeycloakClusterProps {
        KeycloakClusterProps {
            vpc: self.vpc.as_ref().map(VpcConfig::provider),
            database: self.database.as_ref().map(DatabaseConfig::provider),
            cluster: self.cluster.as_ref().map(ClusterConfig::provider),
            namespace: self.namespace.as_ref().map(NamespaceConfig::provider),
            http_port_publisher: self.http_port_publisher.as_ref().map(PublisherConfig::publisher),
            https_port_publisher: self
                .https_port_publisher
                .as_ref()
                .map(PublisherConfig::publisher),
            admin_console_port_publisher: self
                .admin_console_port_publisher
                .as_ref()
                .map(PublisherConfig::publisher),
            listener_provider: self.listener_provider.as_ref().map(ListenerConfig::provider),
            https_listener_provider: self
                .https_listener_provider
                .as_ref()
                .map(ListenerConfig::provider),
            admin_console_listener_provider: self
                .admin_console_listener_provider
                .as_ref()
                .map(ListenerConfig::provider),
            keycloak: self.keycloak.clone(),
            cpu: self.cpu,
            memory_mib: self.memory_mib,
            desired_count: self.desired_count,
            health_check_grace_period_secs: self.health_check_grace_period_secs,
            circuit_breaker: self.circuit_breaker,
            min_healthy_percent: self.min_healthy_percent,
            max_healthy_percent: self.max_healthy_percent,
            task_subnets: self.task_subnets,
            assign_public_ip: self.assign_public_ip,
            capacity_provider_strategy: self.capacity_provider_strategy.clone(),
            auto_scaling: self.auto_scaling.clone(),
            defaults: Default::default(),
        }
    }
}

/// Read a deployment document from disk
pub fn load_file(path: impl AsRef<Path>) -> Result<DeploymentConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read {}: {e}", path.display())))?;
    debug!(path = %path.display(), bytes = content.len(), "loaded deployment config");
    DeploymentConfig::from_yaml(&content)
}

/// JSON schema of [`DeploymentConfig`], pretty printed
pub fn schema() -> Result<String> {
    let schema = schemars::schema_for!(DeploymentConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}

// =============================================================================
// Providers
// =============================================================================

/// Where the VPC comes from
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VpcConfig {
    /// New VPC with public ingress and private subnets
    IngressAndPrivate(IngressAndPrivateVpcConfig),
    /// Caller-supplied VPC
    Existing(ExistingVpcConfig),
}

/// Settings of a new VPC
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct IngressAndPrivateVpcConfig {
    /// /16 CIDR block
    pub cidr: String,
    /// Number of availability zones
    pub max_azs: usize,
    /// Number of NAT gateways
    pub nat_gateways: usize,
}

impl Default for IngressAndPrivateVpcConfig {
    fn default() -> Self {
        let vpc = IngressAndPrivateVpc::default();
        Self {
            cidr: vpc.cidr,
            max_azs: vpc.max_azs,
            nat_gateways: vpc.nat_gateways,
        }
    }
}

/// Ids of a caller-supplied VPC
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingVpcConfig {
    /// VPC id
    pub vpc_id: String,
    /// Subnets load balancers are placed in
    #[serde(default)]
    pub public_subnet_ids: Vec<String>,
    /// Subnets tasks and databases are placed in
    #[serde(default)]
    pub private_subnet_ids: Vec<String>,
}

impl VpcConfig {
    fn provider(&self) -> Box<dyn VpcProvider> {
        match self {
            Self::IngressAndPrivate(c) => Box::new(IngressAndPrivateVpc {
                cidr: c.cidr.clone(),
                max_azs: c.max_azs,
                nat_gateways: c.nat_gateways,
            }),
            Self::Existing(c) => Box::new(
                ExistingVpc::new(&c.vpc_id)
                    .with_public_subnets(c.public_subnet_ids.iter())
                    .with_private_subnets(c.private_subnet_ids.iter()),
            ),
        }
    }
}

/// Where the database comes from
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DatabaseConfig {
    /// New serverless Aurora cluster
    ServerlessAurora {
        /// Cluster engine
        #[serde(default)]
        engine: ClusterEngine,
        /// Auto pause and capacity
        #[serde(default)]
        scaling: ServerlessScaling,
        /// Subnets the cluster is placed in
        #[serde(default)]
        subnets: SubnetSelection,
    },
    /// New single RDS instance
    Instance(DatabaseInstanceConfig),
    /// Caller-supplied database
    Existing(ExistingDatabaseConfig),
}

/// Settings of a new RDS instance
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseInstanceConfig {
    /// Engine and version, e.g. `{ engine: postgres, version: "13.4" }`
    pub engine: InstanceEngine,
    /// Instance type without the `db.` prefix
    pub instance_type: String,
    /// Allocated storage in GiB
    pub allocated_storage: u32,
    /// Subnets the instance is placed in
    pub subnets: SubnetSelection,
}

impl Default for DatabaseInstanceConfig {
    fn default() -> Self {
        let instance = DatabaseInstance::default();
        Self {
            engine: instance.engine,
            instance_type: instance.instance_type,
            allocated_storage: instance.allocated_storage,
            subnets: instance.subnets,
        }
    }
}

/// A database managed outside this template
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingDatabaseConfig {
    /// ARN of the credential secret (host, port, username, password)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_arn: Option<String>,
    /// Keycloak vendor of the database
    pub vendor: DatabaseVendor,
    /// Security group of the database; the service is allowed in when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
    /// Port opened to the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl DatabaseConfig {
    fn provider(&self) -> Box<dyn DatabaseProvider> {
        match self {
            Self::ServerlessAurora {
                engine,
                scaling,
                subnets,
            } => Box::new(ServerlessAuroraDatabase {
                engine: *engine,
                scaling: scaling.clone(),
                subnets: *subnets,
            }),
            Self::Instance(c) => Box::new(DatabaseInstance {
                engine: c.engine.clone(),
                instance_type: c.instance_type.clone(),
                allocated_storage: c.allocated_storage,
                subnets: c.subnets,
            }),
            Self::Existing(c) => {
                let connectable = c.security_group_id.as_ref().map(|group| {
                    let connectable = Connectable::new(Value::String(group.clone()));
                    match c.port {
                        Some(port) => connectable.with_default_port(port),
                        None => connectable,
                    }
                });
                Box::new(ExistingDatabase::new(DatabaseInfo {
                    credentials: c
                        .secret_arn
                        .as_deref()
                        .filter(|arn| !arn.is_empty())
                        .map(SecretRef::from_arn),
                    vendor: c.vendor,
                    connectable,
                }))
            }
        }
    }
}

/// Where the ECS cluster comes from
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClusterConfig {
    /// New cluster
    Ecs,
    /// New cluster with FARGATE and FARGATE_SPOT associated
    FargateSpot,
    /// Caller-supplied cluster
    Existing(ExistingClusterConfig),
}

/// A cluster managed outside this template
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingClusterConfig {
    /// Cluster name or ARN
    pub cluster_name: String,
    /// Capacity providers already associated with the cluster
    #[serde(default)]
    pub capacity_providers: Vec<String>,
}

impl ClusterConfig {
    fn provider(&self) -> Box<dyn ClusterProvider> {
        match self {
            Self::Ecs => Box::new(EcsCluster),
            Self::FargateSpot => Box::new(FargateSpotCluster),
            Self::Existing(c) => Box::new(ExistingCluster::new(ClusterInfo {
                capacity_providers: c.capacity_providers.clone(),
                ..ClusterInfo::new(Value::String(c.cluster_name.clone()))
            })),
        }
    }
}

/// Where the Cloud Map namespace comes from
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NamespaceConfig {
    /// New private DNS namespace in the VPC
    PrivateDns {
        /// Namespace name
        #[serde(default = "default_namespace_name")]
        name: String,
    },
    /// Caller-supplied namespace
    Existing(ExistingNamespaceConfig),
}

fn default_namespace_name() -> String {
    PrivateDnsNamespace::default().name
}

/// A namespace managed outside this template
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingNamespaceConfig {
    /// Namespace id
    pub namespace_id: String,
    /// Namespace DNS name
    pub namespace_name: String,
}

impl NamespaceConfig {
    fn provider(&self) -> Box<dyn NamespaceProvider> {
        match self {
            Self::PrivateDns { name } => Box::new(PrivateDnsNamespace { name: name.clone() }),
            Self::Existing(c) => Box::new(ExistingNamespace::new(
                c.namespace_id.clone(),
                c.namespace_name.clone(),
            )),
        }
    }
}

// =============================================================================
// Exposure
// =============================================================================

/// How a container port is published
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PublisherConfig {
    /// Not published
    None,
    /// Rule on an existing ALB listener
    AddTarget(ListenerRuleConfig),
    /// Internet-facing ALB listening for HTTP
    HttpAlb(AlbConfig),
    /// Internet-facing ALB listening for HTTPS
    HttpsAlb(HttpsAlbConfig),
    /// Internet-facing NLB
    Nlb(NlbConfig),
}

/// A rule on an existing listener
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerRuleConfig {
    /// ARN of the listener
    pub listener_arn: String,
    /// Rule conditions
    #[serde(default)]
    pub conditions: Vec<ListenerCondition>,
    /// Rule priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// Settings shared by application load balancer publishers
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlbConfig {
    /// Construct id of the load balancer; equal ids share one
    #[serde(default = "default_load_balancer_id")]
    pub id: String,
    /// Configure the target group health check
    #[serde(default = "default_true")]
    pub health_check: bool,
}

/// Settings of an HTTPS application load balancer
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpsAlbConfig {
    /// Construct id of the load balancer; equal ids share one
    #[serde(default = "default_load_balancer_id")]
    pub id: String,
    /// Configure the target group health check
    #[serde(default = "default_true")]
    pub health_check: bool,
    /// ACM certificate ARNs
    pub certificates: Vec<String>,
    /// Redirect HTTP on port 80 to HTTPS
    #[serde(default)]
    pub upgrade_http: bool,
    /// Host to redirect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_http_host: Option<String>,
}

/// Settings of a network load balancer
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NlbConfig {
    /// Construct id of the load balancer; equal ids share one
    #[serde(default = "default_load_balancer_id")]
    pub id: String,
    /// Port the load balancer listens on
    pub port: u16,
    /// Configure the target group health check
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl PublisherConfig {
    fn publisher(&self) -> Box<dyn PortPublisher> {
        match self {
            Self::None => Box::new(NonePublisher),
            Self::AddTarget(c) => Box::new(AddTargetPublisher {
                listener_arn: c.listener_arn.clone(),
                conditions: c.conditions.clone(),
                priority: c.priority,
            }),
            Self::HttpAlb(c) => Box::new(HttpAlbPublisher {
                id: c.id.clone(),
                health_check: c.health_check,
            }),
            Self::HttpsAlb(c) => Box::new(HttpsAlbPublisher {
                id: c.id.clone(),
                health_check: c.health_check,
                certificates: c.certificates.clone(),
                upgrade_http: c.upgrade_http,
                upgrade_http_host: c.upgrade_http_host.clone(),
            }),
            Self::Nlb(c) => Box::new(NlbPublisher {
                id: c.id.clone(),
                port: c.port,
                health_check: c.health_check,
            }),
        }
    }
}

/// Deprecated listener provider choices
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ListenerConfig {
    /// Not exposed
    None,
    /// Rule on an existing listener
    Existing(ListenerRuleConfig),
    /// New HTTP application load balancer
    Http,
    /// New HTTPS application load balancer
    Https {
        /// ACM certificate ARNs
        certificates: Vec<String>,
    },
    /// Network load balancer
    Nlb(NlbConfig),
}

impl ListenerConfig {
    fn provider(&self) -> Box<dyn ListenerProvider> {
        match self {
            Self::None => Box::new(NoneListener),
            Self::Existing(c) => Box::new(ExistingListener {
                listener_arn: c.listener_arn.clone(),
                conditions: c.conditions.clone(),
                priority: c.priority,
            }),
            Self::Http => Box::new(HttpListener),
            Self::Https { certificates } => Box::new(HttpsListener {
                certificates: certificates.clone(),
            }),
            Self::Nlb(c) => Box::new(NlbListener {
                id: c.id.clone(),
                port: c.port,
                health_check: c.health_check,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{ListenerKind, PublisherKind};

    // =========================================================================
    // Story Tests: Reading Deployments
    // =========================================================================

    #[test]
    fn story_empty_document_means_all_defaults() {
        let config = DeploymentConfig::from_yaml("{}").unwrap();
        assert_eq!(config, DeploymentConfig::default());
        assert_eq!(config.id, "Keycloak");

        let props = config.into_props();
        assert!(props.vpc.is_none());
        assert!(props.http_port_publisher.is_none());
        assert!(props.capacity_provider_strategy.is_empty());
    }

    #[test]
    fn story_tagged_providers_parse() {
        let config = DeploymentConfig::from_yaml(
            r#"
id: Sso
vpc:
  type: existing
  vpcId: vpc-123
  privateSubnetIds: [subnet-a, subnet-b]
database:
  type: instance
  engine:
    engine: postgres
    version: "13.4"
  instanceType: r5.large
cluster:
  type: fargate-spot
namespace:
  type: existing
  namespaceId: ns-1
  namespaceName: internal.example.com
memoryMiB: 4096
capacityProviderStrategy:
  - capacityProvider: FARGATE_SPOT
    weight: 2
"#,
        )
        .unwrap();

        assert_eq!(config.id, "Sso");
        assert_eq!(config.memory_mib, Some(4096));
        match &config.database {
            Some(DatabaseConfig::Instance(instance)) => {
                assert_eq!(
                    instance.engine,
                    InstanceEngine::Postgres {
                        version: Some("13.4".to_string())
                    }
                );
                assert_eq!(instance.instance_type, "r5.large");
                assert_eq!(instance.allocated_storage, 100);
            }
            other => panic!("expected instance database, got {other:?}"),
        }
        assert_eq!(config.cluster, Some(ClusterConfig::FargateSpot));
        assert_eq!(config.capacity_provider_strategy[0].weight, Some(2));
    }

    #[test]
    fn story_publishers_become_trait_objects() {
        let config = DeploymentConfig::from_yaml(
            r#"
httpPortPublisher:
  type: none
httpsPortPublisher:
  type: https-alb
  certificates: [arn:cert]
  upgradeHttp: true
adminConsolePortPublisher:
  type: nlb
  port: 9990
"#,
        )
        .unwrap();
        let props = config.into_props();

        let kind = |p: &Option<Box<dyn PortPublisher>>| p.as_ref().map(|p| p.kind());
        assert_eq!(kind(&props.http_port_publisher), Some(PublisherKind::None));
        assert_eq!(kind(&props.https_port_publisher), Some(PublisherKind::HttpsAlb));
        assert_eq!(kind(&props.admin_console_port_publisher), Some(PublisherKind::Nlb));
    }

    #[test]
    fn story_legacy_listeners_parse() {
        let config = DeploymentConfig::from_yaml(
            r#"
listenerProvider:
  type: existing
  listenerArn: arn:listener
  conditions:
    - pathPatterns: ["/auth/*"]
  priority: 10
httpsListenerProvider:
  type: https
  certificates: [arn:cert]
"#,
        )
        .unwrap();
        match &config.listener_provider {
            Some(ListenerConfig::Existing(rule)) => {
                assert_eq!(
                    rule.conditions,
                    vec![ListenerCondition::PathPatterns(vec!["/auth/*".to_string()])]
                );
                assert_eq!(rule.priority, Some(10));
            }
            other => panic!("expected existing listener, got {other:?}"),
        }
        let props = config.into_props();
        assert_eq!(
            props.https_listener_provider.as_ref().map(|l| l.kind()),
            Some(ListenerKind::Https)
        );
    }

    #[test]
    fn story_unknown_provider_type_is_rejected() {
        let err = DeploymentConfig::from_yaml("vpc:\n  type: carrier-pigeon\n").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn story_empty_id_is_rejected() {
        let err = DeploymentConfig::from_yaml("id: \"\"\n").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn story_missing_file_reports_path() {
        let err = load_file("/nonexistent/keycloak.yaml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("/nonexistent/keycloak.yaml"));
    }

    #[test]
    fn story_schema_names_deployment_fields() {
        let schema = schema().unwrap();
        assert!(schema.contains("httpsPortPublisher"));
        assert!(schema.contains("capacityProviderStrategy"));
        assert!(schema.contains("memoryMiB"));
    }

    #[test]
    fn story_existing_database_opens_port_when_group_given() {
        let config = DatabaseConfig::Existing(ExistingDatabaseConfig {
            secret_arn: Some("arn:secret".to_string()),
            vendor: DatabaseVendor::Mariadb,
            security_group_id: Some("sg-db".to_string()),
            port: Some(3306),
        });
        let mut template = crate::template::Template::new();
        let mut root = template.root();
        let vpc = ExistingVpc::new("vpc-1").bind(&mut root).unwrap();
        let info = config.provider().bind(&mut root, &vpc).unwrap();
        assert_eq!(info.vendor, DatabaseVendor::Mariadb);
        assert_eq!(info.connectable.unwrap().default_port, Some(3306));
    }
}
