//! Keycloak cluster composition
//!
//! [`KeycloakCluster::new`] is the one place where every piece meets. It
//! resolves the providers in a fixed order, each stage receiving the results
//! of the stages before it:
//!
//! ```text
//! vpc -> database -> ecs cluster -> cloud map namespace
//!     -> task definition (+ database preparation) -> service
//!     -> discovery binding -> published ports -> rendered task definition
//! ```
//!
//! # Exposure Defaults
//!
//! The HTTP port is published on a new HTTP load balancer unless an HTTPS
//! strategy is given, in which case HTTP is not published by default. HTTPS
//! and the admin console are never published by default. Port publishers
//! and the deprecated listener providers cannot be mixed.

use tracing::{info, warn};

use crate::network::{self, PortRange, SubnetSelection};
use crate::provider::{
    ClusterProvider, DatabaseProvider, NamespaceProvider, ProviderDefaults, VpcProvider,
};
use crate::publish::{
    Exposure, HealthCheck, HttpAlbPublisher, HttpListener, ListenerProvider, NoneListener,
    NonePublisher, PortPublisher, Protocol, PublishTarget,
};
use crate::config::DeploymentConfig;
use crate::template::{Scope, Template};
use crate::workload::{
    AutoScaling, CapacityProviderStrategyItem, FargateService, FargateServiceProps,
    KeycloakContainer, KeycloakOptions, KeycloakTaskDefinition, ADMIN_CONSOLE_PORT,
    HTTPS_WEB_PORT, WEB_PORT,
};
use crate::{Error, Result};

/// Default Fargate task cpu units
pub const DEFAULT_CPU: u32 = 1024;
/// Default Fargate task memory
pub const DEFAULT_MEMORY_MIB: u32 = 2048;
/// Path load balancers probe on every published port
pub const HEALTH_CHECK_PATH: &str = "/auth/realms/master";
/// Seconds a new task ramps up behind an application load balancer
pub const SLOW_START_SECS: u32 = 60;
/// Seconds a stopping task keeps draining connections
pub const DEREGISTRATION_DELAY_SECS: u32 = 5;

/// Everything a Keycloak cluster can be configured with
///
/// Every field is optional. Providers that are not supplied are built by the
/// matching factory in `defaults`.
#[derive(Debug, Default)]
pub struct KeycloakClusterProps {
    /// Network; default a new VPC
    pub vpc: Option<Box<dyn VpcProvider>>,
    /// Database; default a new serverless Aurora MySQL cluster
    pub database: Option<Box<dyn DatabaseProvider>>,
    /// ECS cluster; default a new cluster
    pub cluster: Option<Box<dyn ClusterProvider>>,
    /// Cloud Map namespace; default `keycloak-service-discovery`
    pub namespace: Option<Box<dyn NamespaceProvider>>,

    /// Publisher of the HTTP port
    pub http_port_publisher: Option<Box<dyn PortPublisher>>,
    /// Publisher of the HTTPS port
    pub https_port_publisher: Option<Box<dyn PortPublisher>>,
    /// Publisher of the WildFly admin console port
    pub admin_console_port_publisher: Option<Box<dyn PortPublisher>>,

    /// Deprecated; use `http_port_publisher`
    pub listener_provider: Option<Box<dyn ListenerProvider>>,
    /// Deprecated; use `https_port_publisher`
    pub https_listener_provider: Option<Box<dyn ListenerProvider>>,
    /// Deprecated; use `admin_console_port_publisher`
    pub admin_console_listener_provider: Option<Box<dyn ListenerProvider>>,

    /// Keycloak container settings; the vendor always follows the database
    pub keycloak: KeycloakOptions,
    /// Task cpu units (default 1024)
    pub cpu: Option<u32>,
    /// Task memory (default 2048 MiB)
    pub memory_mib: Option<u32>,
    /// Number of Keycloak tasks (default 1)
    pub desired_count: Option<u32>,
    /// Seconds health checks are ignored after a task starts (default 600)
    pub health_check_grace_period_secs: Option<u32>,
    /// Deployment circuit breaker with rollback (default on)
    pub circuit_breaker: Option<bool>,
    /// Lower bound of running tasks during deployments, in percent
    pub min_healthy_percent: Option<u32>,
    /// Upper bound of running tasks during deployments, in percent
    pub max_healthy_percent: Option<u32>,
    /// Subnets the tasks run in (default private)
    pub task_subnets: Option<SubnetSelection>,
    /// Give tasks public IPs (default off)
    pub assign_public_ip: Option<bool>,
    /// Capacity provider strategy; replaces the FARGATE launch type
    pub capacity_provider_strategy: Vec<CapacityProviderStrategyItem>,
    /// CPU autoscaling of the task count
    pub auto_scaling: Option<AutoScaling>,

    /// Factories for providers that are not supplied
    pub defaults: ProviderDefaults,
}

impl KeycloakClusterProps {
    fn uses_listener_providers(&self) -> bool {
        self.listener_provider.is_some()
            || self.https_listener_provider.is_some()
            || self.admin_console_listener_provider.is_some()
    }

    fn uses_port_publishers(&self) -> bool {
        self.http_port_publisher.is_some()
            || self.https_port_publisher.is_some()
            || self.admin_console_port_publisher.is_some()
    }
}

/// The exposure strategy resolved for each published port
#[derive(Debug)]
pub struct Exposures {
    /// Web port 8080
    pub http: Exposure,
    /// Web port 8443
    pub https: Exposure,
    /// Admin console port 9990
    pub admin_console: Exposure,
}

type Providers = (
    Box<dyn VpcProvider>,
    Box<dyn DatabaseProvider>,
    Box<dyn ClusterProvider>,
    Box<dyn NamespaceProvider>,
);

/// Split the props into providers (defaults applied) and exposures
fn resolve(props: &mut KeycloakClusterProps) -> Result<(Providers, Exposures)> {
    let legacy = props.uses_listener_providers();
    if legacy && props.uses_port_publishers() {
        return Err(Error::conflict(
            "Cannot use both PortPublisher and ListenerProvider properties at the same time",
        ));
    }

    let defaults = props.defaults;
    let providers = (
        props.vpc.take().unwrap_or_else(defaults.vpc),
        props.database.take().unwrap_or_else(defaults.database),
        props.cluster.take().unwrap_or_else(defaults.cluster),
        props.namespace.take().unwrap_or_else(defaults.namespace),
    );

    let exposures = if legacy {
        let https = props.https_listener_provider.take();
        let http: Box<dyn ListenerProvider> = match props.listener_provider.take() {
            Some(provider) => provider,
            None if https.is_some() => Box::new(NoneListener),
            None => Box::new(HttpListener),
        };
        Exposures {
            http: Exposure::Listener(http),
            https: Exposure::Listener(https.unwrap_or_else(|| Box::new(NoneListener))),
            admin_console: Exposure::Listener(
                props
                    .admin_console_listener_provider
                    .take()
                    .unwrap_or_else(|| Box::new(NoneListener)),
            ),
        }
    } else {
        let https = props.https_port_publisher.take();
        let http: Box<dyn PortPublisher> = match props.http_port_publisher.take() {
            Some(publisher) => publisher,
            None if https.is_some() => Box::new(NonePublisher),
            None => Box::new(HttpAlbPublisher::default()),
        };
        Exposures {
            http: Exposure::Publisher(http),
            https: Exposure::Publisher(https.unwrap_or_else(|| Box::new(NonePublisher))),
            admin_console: Exposure::Publisher(
                props
                    .admin_console_port_publisher
                    .take()
                    .unwrap_or_else(|| Box::new(NonePublisher)),
            ),
        }
    };
    Ok((providers, exposures))
}

/// A complete Keycloak cluster
#[derive(Debug)]
pub struct KeycloakCluster {
    service: FargateService,
    task_definition: KeycloakTaskDefinition,
    task_definition_id: String,
    exposures: Exposures,
}

impl KeycloakCluster {
    /// Compose the cluster under `id` in `scope`
    pub fn new(scope: &mut Scope<'_>, id: &str, mut props: KeycloakClusterProps) -> Result<Self> {
        let ((vpc_provider, database_provider, cluster_provider, namespace_provider), exposures) =
            resolve(&mut props)?;

        let mut scope = scope.child(id);
        info!(path = %scope.path(), "composing Keycloak cluster");

        // Providers, in dependency order
        let vpc = vpc_provider.bind(&mut scope)?;
        let database = database_provider.bind(&mut scope, &vpc)?;
        let cluster = cluster_provider.bind(&mut scope, &vpc)?;
        let namespace = namespace_provider.bind(&mut scope, &vpc)?;

        // Keycloak always talks to the database it was given
        let mut options = props.keycloak.clone();
        if let Some(requested) = options.database_vendor {
            if requested != database.vendor {
                warn!(
                    requested = %requested,
                    database = %database.vendor,
                    "ignoring configured database vendor in favor of the database's engine"
                );
            }
        }
        options.database_vendor = Some(database.vendor);
        let keycloak = KeycloakContainer::new(&options, database.credentials.clone())?;
        let container_name = keycloak.container_name().to_string();

        let mut task_definition = KeycloakTaskDefinition::new(
            "TaskDefinition",
            props.cpu.unwrap_or(DEFAULT_CPU),
            props.memory_mib.unwrap_or(DEFAULT_MEMORY_MIB),
            keycloak,
        )?;
        let task_definition_id = task_definition.logical_id(&scope);

        let service_props = FargateServiceProps {
            desired_count: props.desired_count.unwrap_or(1),
            health_check_grace_period_secs: props
                .health_check_grace_period_secs
                .unwrap_or(10 * 60),
            circuit_breaker: props.circuit_breaker.unwrap_or(true),
            min_healthy_percent: props.min_healthy_percent,
            max_healthy_percent: props.max_healthy_percent,
            task_subnets: props.task_subnets.unwrap_or_default(),
            assign_public_ip: props.assign_public_ip.unwrap_or(false),
            capacity_provider_strategy: props.capacity_provider_strategy.clone(),
            ..Default::default()
        };
        let service = FargateService::new(
            &mut scope,
            "Service",
            &cluster,
            &vpc,
            &namespace,
            &task_definition_id,
            &service_props,
        )?;

        if let Some(connectable) = &database.connectable {
            network::allow_default_port_from(
                &mut scope.child("Database"),
                "FromService",
                connectable,
                &service.connectable(),
            )?;
        }

        // Cluster members find each other through Cloud Map
        task_definition.use_cloud_map_service(service.cloud_map_service());
        service.allow_internally(&mut scope, PortRange::AllTraffic)?;

        let ports = [
            (&exposures.http, WEB_PORT, Protocol::Http),
            (&exposures.https, HTTPS_WEB_PORT, Protocol::Https),
            (&exposures.admin_console, ADMIN_CONSOLE_PORT, Protocol::Http),
        ];
        for (exposure, port, protocol) in ports {
            let target = PublishTarget {
                vpc: &vpc,
                service: &service,
                container_name: &container_name,
                container_port: port,
                protocol,
                slow_start_secs: Some(SLOW_START_SECS),
                deregistration_delay_secs: Some(DEREGISTRATION_DELAY_SECS),
                health_check: HealthCheck::http(HEALTH_CHECK_PATH),
            };
            exposure.expose(&mut scope, &target)?;
        }

        if let Some(scaling) = &props.auto_scaling {
            service.auto_scale(&mut scope, scaling)?;
        }

        task_definition.render(&mut scope)?;
        info!(
            path = %scope.path(),
            vendor = %database.vendor,
            task_definition = %task_definition_id,
            "Keycloak cluster composed"
        );

        Ok(Self {
            service,
            task_definition,
            task_definition_id,
            exposures,
        })
    }

    /// The ECS service running the Keycloak tasks
    pub fn service(&self) -> &FargateService {
        &self.service
    }

    /// The task definition, as rendered
    pub fn task_definition(&self) -> &KeycloakTaskDefinition {
        &self.task_definition
    }

    /// Logical id of the task definition
    pub fn task_definition_id(&self) -> &str {
        &self.task_definition_id
    }

    /// The exposure strategy resolved for each port
    pub fn exposures(&self) -> &Exposures {
        &self.exposures
    }
}

/// Synthesize the template of one deployment
pub fn synthesize(config: &DeploymentConfig) -> Result<Template> {
    let mut template = Template::new();
    if let Some(description) = &config.description {
        template = template.with_description(description.clone());
    }
    {
        let mut root = template.root();
        KeycloakCluster::new(&mut root, &config.id, config.into_props())?;
    }
    info!(
        id = %config.id,
        resources = template.resources.len(),
        outputs = template.outputs.len(),
        "synthesized template"
    );
    Ok(template)
}
