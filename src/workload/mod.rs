//! Workload types for the Keycloak service
//!
//! This module defines the ECS resources the cluster runs:
//! - [`TaskDefinition`]: Fargate task with typed [`ContainerDefinition`]s
//! - [`KeycloakContainer`]: the Keycloak server container and its contract
//! - [`EnsureDatabase`]: preparation container creating the database
//! - [`FargateService`]: ECS service, Cloud Map registration, autoscaling
//!
//! Task definitions are assembled in memory and only written to the template
//! by [`KeycloakTaskDefinition::render`], after the service exists and the
//! discovery settings that depend on it are known.

mod container;
mod prepare;
mod service;

pub use container::{
    map_dns_record_type_to_jgroups, DatabaseVendor, KeycloakContainer, KeycloakOptions,
    ADMIN_CONSOLE_PORT, HTTPS_WEB_PORT, WEB_PORT,
};
pub use prepare::EnsureDatabase;
pub use service::{
    AutoScaling, CapacityProviderStrategyItem, CloudMapService, DnsRecordType, FargateService,
    FargateServiceProps,
};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::SecretRef;
use crate::template::{intrinsic, Resource, Scope};
use crate::{Error, Result};

/// Days CloudWatch keeps container logs
pub const LOG_RETENTION_DAYS: u32 = 30;

/// Stream prefix for every container log stream
pub const LOG_STREAM_PREFIX: &str = "/keycloak-cluster";

// =============================================================================
// Container Definition
// =============================================================================

/// A single ECS container definition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDefinition {
    /// Container name, unique within the task
    pub name: String,
    /// Image reference
    pub image: String,
    /// Whether the task stops when this container stops
    pub essential: bool,
    /// Command override
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Plain environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvVar>,
    /// Environment variables read from Secrets Manager
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretVar>,
    /// Port mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
    /// Hard memory limit in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    /// Soft memory reservation in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<u32>,
    /// Log configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfiguration>,
    /// Containers that must reach a condition before this one starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ContainerDependency>,
    /// Secret ARNs the execution role must be able to read
    #[serde(skip)]
    pub secret_arns: Vec<Value>,
}

impl ContainerDefinition {
    /// Create an essential container with no settings
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            essential: true,
            command: Vec::new(),
            environment: Vec::new(),
            secrets: Vec::new(),
            port_mappings: Vec::new(),
            memory: None,
            memory_reservation: None,
            log_configuration: None,
            depends_on: Vec::new(),
            secret_arns: Vec::new(),
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.environment.push(EnvVar {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Read an environment variable from one JSON key of a secret
    pub fn with_secret(mut self, name: impl Into<String>, secret: &SecretRef, key: &str) -> Self {
        self.secrets.push(SecretVar {
            name: name.into(),
            value_from: secret.field(key),
        });
        if !self.secret_arns.contains(&secret.arn) {
            self.secret_arns.push(secret.arn.clone());
        }
        self
    }

    /// Add a port mapping
    pub fn with_port(mut self, container_port: u16, protocol: TransportProtocol) -> Self {
        self.port_mappings.push(PortMapping {
            container_port,
            protocol,
        });
        self
    }

    /// Value of an environment variable
    pub fn env(&self, name: &str) -> Option<&Value> {
        self.environment
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.value)
    }

    /// Replace (or add) an environment variable
    pub fn set_env(&mut self, name: &str, value: Value) {
        match self.environment.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.value = value,
            None => self.environment.push(EnvVar {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Secret variable by name
    pub fn secret(&self, name: &str) -> Option<&SecretVar> {
        self.secrets.iter().find(|s| s.name == name)
    }
}

/// Environment variable; the value may be an intrinsic
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: Value,
}

/// Environment variable sourced from Secrets Manager
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SecretVar {
    /// Variable name
    pub name: String,
    /// Secret ARN with JSON key suffix
    pub value_from: Value,
}

/// Transport protocol of a port mapping
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
}

/// Container port mapping
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PortMapping {
    /// Port inside the container
    pub container_port: u16,
    /// Transport protocol
    pub protocol: TransportProtocol,
}

/// Container log configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LogConfiguration {
    /// Log driver (always awslogs here)
    pub log_driver: String,
    /// Driver options
    pub options: BTreeMap<String, Value>,
}

impl LogConfiguration {
    /// awslogs driver writing to a log group
    pub fn aws_logs(log_group: Value, stream_prefix: &str) -> Self {
        let mut options = BTreeMap::new();
        options.insert("awslogs-group".to_string(), log_group);
        options.insert("awslogs-stream-prefix".to_string(), json!(stream_prefix));
        options.insert("awslogs-region".to_string(), intrinsic::reference("AWS::Region"));
        Self {
            log_driver: "awslogs".to_string(),
            options,
        }
    }
}

/// Condition a dependency must reach
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerDependencyCondition {
    /// The dependency has started
    Start,
    /// The dependency ran to completion (any exit code)
    Complete,
    /// The dependency exited with status zero
    Success,
    /// The dependency passed its health check
    Healthy,
}

/// Dependency on another container in the task
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDependency {
    /// Name of the container depended on
    pub container_name: String,
    /// Condition it must reach
    pub condition: ContainerDependencyCondition,
}

// =============================================================================
// Task Definition
// =============================================================================

/// A Fargate task definition under construction
///
/// The first essential container added is the default container.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskDefinition {
    id: String,
    cpu: u32,
    memory_mib: u32,
    containers: Vec<ContainerDefinition>,
}

impl TaskDefinition {
    /// Create an empty Fargate task definition, validating the size
    pub fn new(id: impl Into<String>, cpu: u32, memory_mib: u32) -> Result<Self> {
        validate_fargate_size(cpu, memory_mib)?;
        Ok(Self {
            id: id.into(),
            cpu,
            memory_mib,
            containers: Vec::new(),
        })
    }

    /// Construct id of the task definition
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Task cpu units
    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    /// Task memory in MiB
    pub fn memory_mib(&self) -> u32 {
        self.memory_mib
    }

    /// Logical id the task definition gets when rendered into `scope`
    pub fn logical_id(&self, scope: &Scope<'_>) -> String {
        scope.logical_id(&self.id)
    }

    /// Log configuration every container in this task uses
    pub fn log_configuration(&self, scope: &Scope<'_>) -> LogConfiguration {
        let log_group_id = scope.child_logical_id(&self.id, "LogGroup");
        LogConfiguration::aws_logs(intrinsic::reference(&log_group_id), LOG_STREAM_PREFIX)
    }

    /// Add a container; names must be unique
    pub fn add_container(&mut self, container: ContainerDefinition) -> Result<()> {
        if self.containers.iter().any(|c| c.name == container.name) {
            return Err(Error::validation(format!(
                "task definition '{}' already has a container named '{}'",
                self.id, container.name
            )));
        }
        debug!(task = %self.id, container = %container.name, "adding container");
        self.containers.push(container);
        Ok(())
    }

    /// The first essential container
    pub fn default_container(&self) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.essential)
    }

    /// Container by name
    pub fn container(&self, name: &str) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Mutable container by name
    pub fn container_mut(&mut self, name: &str) -> Option<&mut ContainerDefinition> {
        self.containers.iter_mut().find(|c| c.name == name)
    }

    /// All containers in insertion order
    pub fn containers(&self) -> &[ContainerDefinition] {
        &self.containers
    }

    /// Make `container` wait until `depends_on` reaches `condition`
    pub fn add_container_dependency(
        &mut self,
        container: &str,
        depends_on: &str,
        condition: ContainerDependencyCondition,
    ) -> Result<()> {
        if self.container(depends_on).is_none() {
            return Err(Error::missing_dependency(format!(
                "container '{depends_on}' is not part of task definition '{}'",
                self.id
            )));
        }
        let task_id = self.id.clone();
        let target = self.container_mut(container).ok_or_else(|| {
            Error::missing_dependency(format!(
                "container '{container}' is not part of task definition '{task_id}'"
            ))
        })?;
        target.depends_on.push(ContainerDependency {
            container_name: depends_on.to_string(),
            condition,
        });
        Ok(())
    }

    /// Write the task definition, its IAM roles and log group into `scope`
    ///
    /// Returns the task definition's logical id.
    pub fn render(&self, scope: &mut Scope<'_>) -> Result<String> {
        if self.default_container().is_none() {
            return Err(Error::validation(format!(
                "task definition '{}' has no essential container",
                self.id
            )));
        }

        let logical_id = self.logical_id(scope);
        let mut task_scope = scope.child(&self.id);

        let log_group_id = task_scope.add_resource(
            "LogGroup",
            Resource::new("AWS::Logs::LogGroup")
                .with_properties(json!({ "RetentionInDays": LOG_RETENTION_DAYS }))
                .with_retention_policy("Retain"),
        )?;
        let task_role_id = task_scope.add_resource(
            "TaskRole",
            Resource::new("AWS::IAM::Role").with_properties(ecs_tasks_assume_role()),
        )?;
        let execution_role_id = task_scope.add_resource(
            "ExecutionRole",
            Resource::new("AWS::IAM::Role").with_properties(ecs_tasks_assume_role()),
        )?;

        let mut statements = vec![json!({
            "Effect": "Allow",
            "Action": ["logs:CreateLogStream", "logs:PutLogEvents"],
            "Resource": intrinsic::get_att(&log_group_id, "Arn")
        })];
        let mut secret_arns: Vec<Value> = Vec::new();
        for arn in self.containers.iter().flat_map(|c| &c.secret_arns) {
            if !secret_arns.contains(arn) {
                secret_arns.push(arn.clone());
            }
        }
        if !secret_arns.is_empty() {
            statements.push(json!({
                "Effect": "Allow",
                "Action": ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
                "Resource": secret_arns
            }));
        }
        let policy_id = task_scope.child("ExecutionRole").add_resource(
            "DefaultPolicy",
            Resource::new("AWS::IAM::Policy").with_properties(json!({
                "PolicyName": format!("{execution_role_id}DefaultPolicy"),
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": statements
                },
                "Roles": [intrinsic::reference(&execution_role_id)]
            })),
        )?;

        scope.add_resource(
            &self.id,
            Resource::new("AWS::ECS::TaskDefinition")
                .with_properties(json!({
                    "Family": logical_id,
                    "Cpu": self.cpu.to_string(),
                    "Memory": self.memory_mib.to_string(),
                    "NetworkMode": "awsvpc",
                    "RequiresCompatibilities": ["FARGATE"],
                    "ExecutionRoleArn": intrinsic::get_att(&execution_role_id, "Arn"),
                    "TaskRoleArn": intrinsic::get_att(&task_role_id, "Arn"),
                    "ContainerDefinitions": serde_json::to_value(&self.containers)?
                }))
                .depends_on(policy_id),
        )
    }
}

fn ecs_tasks_assume_role() -> Value {
    json!({
        "AssumeRolePolicyDocument": {
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "ecs-tasks.amazonaws.com" },
                "Action": "sts:AssumeRole"
            }]
        }
    })
}

/// Check a cpu/memory pair against the Fargate task size table
pub fn validate_fargate_size(cpu: u32, memory_mib: u32) -> Result<()> {
    let valid = match cpu {
        256 => matches!(memory_mib, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory_mib) && memory_mib % 1024 == 0,
        1024 => (2048..=8192).contains(&memory_mib) && memory_mib % 1024 == 0,
        2048 => (4096..=16384).contains(&memory_mib) && memory_mib % 1024 == 0,
        4096 => (8192..=30720).contains(&memory_mib) && memory_mib % 1024 == 0,
        _ => {
            return Err(Error::validation(format!(
                "{cpu} is not a valid Fargate cpu value (256, 512, 1024, 2048 or 4096)"
            )))
        }
    };
    if !valid {
        return Err(Error::validation(format!(
            "{memory_mib} MiB is not a valid memory size for {cpu} Fargate cpu units"
        )));
    }
    Ok(())
}

// =============================================================================
// Keycloak Task Definition
// =============================================================================

/// Task definition running Keycloak, plus the preparation step when the
/// database needs one
///
/// Construction only records settings. Nothing reaches the template until
/// [`render`](Self::render), so discovery settings bound after the service is
/// created still end up in the container environment.
#[derive(Clone, Debug, PartialEq)]
pub struct KeycloakTaskDefinition {
    task: TaskDefinition,
    keycloak: KeycloakContainer,
    prepare: Option<EnsureDatabase>,
}

impl KeycloakTaskDefinition {
    /// Size the task and decide whether a preparation step is needed
    pub fn new(
        id: impl Into<String>,
        cpu: u32,
        memory_mib: u32,
        keycloak: KeycloakContainer,
    ) -> Result<Self> {
        let task = TaskDefinition::new(id, cpu, memory_mib)?;
        let prepare = EnsureDatabase::for_container(&keycloak)?;
        Ok(Self {
            task,
            keycloak,
            prepare,
        })
    }

    /// The Keycloak container settings
    pub fn keycloak(&self) -> &KeycloakContainer {
        &self.keycloak
    }

    /// The preparation step, when one is added
    pub fn prepare(&self) -> Option<&EnsureDatabase> {
        self.prepare.as_ref()
    }

    /// Logical id of the task definition once rendered into `scope`
    pub fn logical_id(&self, scope: &Scope<'_>) -> String {
        self.task.logical_id(scope)
    }

    /// Point Keycloak cluster discovery at a Cloud Map service
    pub fn use_cloud_map_service(&mut self, service: CloudMapService) {
        self.keycloak.use_cloud_map_service(service);
    }

    /// Assemble the containers and write everything into `scope`
    ///
    /// Returns the task definition's logical id.
    pub fn render(&self, scope: &mut Scope<'_>) -> Result<String> {
        let mut task = self.task.clone();
        let logging = task.log_configuration(scope);
        task.add_container(self.keycloak.container_definition(task.memory_mib(), &logging)?)?;
        if let Some(prepare) = &self.prepare {
            prepare.extend(&mut task, &logging)?;
        }
        task.render(scope)
    }
}
