//! Port exposure strategies
//!
//! A published port is a container port of the Keycloak service made
//! reachable through a load balancer. Two families of strategies exist:
//!
//! - [`PortPublisher`]: the current family. ALB and NLB publishers share a
//!   load balancer when they are given the same id, so publishing HTTP and
//!   HTTPS through one id yields one load balancer with two listeners.
//! - [`ListenerProvider`]: the deprecated family, kept for existing
//!   deployments. It cannot be mixed with publishers.
//!
//! [`Exposure`] holds whichever strategy was resolved for one port.

mod listener;
mod publisher;

pub use listener::{
    ExistingListener, HttpListener, HttpsListener, ListenerKind, ListenerProvider, NlbListener,
    NoneListener,
};
pub use publisher::{
    AddTargetPublisher, HttpAlbPublisher, HttpsAlbPublisher, NlbPublisher, NonePublisher,
    PortPublisher, PublisherKind,
};

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::network::{self, Peer, PortRange, SubnetSelection};
use crate::provider::VpcInfo;
use crate::template::{intrinsic, Output, Resource, Scope};
use crate::workload::FargateService;
use crate::{Error, Result};

/// Default construct id of a created load balancer
pub const DEFAULT_LOAD_BALANCER_ID: &str = "LoadBalancer";

/// Default priority of rules added to an existing listener
pub const DEFAULT_RULE_PRIORITY: u32 = 1000;

const LOAD_BALANCER_TYPE: &str = "AWS::ElasticLoadBalancingV2::LoadBalancer";
const LISTENER_TYPE: &str = "AWS::ElasticLoadBalancingV2::Listener";
const LISTENER_RULE_TYPE: &str = "AWS::ElasticLoadBalancingV2::ListenerRule";
const TARGET_GROUP_TYPE: &str = "AWS::ElasticLoadBalancingV2::TargetGroup";

/// Session stickiness Keycloak recommends, to keep sessions on the node
/// that owns their cache entries
const STICKINESS_COOKIE_SECS: u32 = 24 * 60 * 60;

// =============================================================================
// Protocols and Targets
// =============================================================================

/// Protocol a container port speaks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    Https,
    /// Raw TCP
    Tcp,
}

impl Protocol {
    /// Target group protocol on an application load balancer
    pub fn alb_protocol(self) -> Result<&'static str> {
        match self {
            Self::Http => Ok("HTTP"),
            Self::Https => Ok("HTTPS"),
            Self::Tcp => Err(Error::unsupported(format!("{self} is not supported by ALB"))),
        }
    }

    /// Target group protocol on a network load balancer
    ///
    /// TLS is not terminated by the load balancer, so everything is TCP.
    pub fn nlb_protocol(self) -> &'static str {
        "TCP"
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Tcp => "TCP",
        })
    }
}

/// Target group health check
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCheck {
    /// HTTP path to probe; ignored by network load balancers
    pub path: Option<String>,
    /// Whether the health check is configured at all
    pub enabled: bool,
}

impl HealthCheck {
    /// Probe `path`
    pub fn http(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            enabled: true,
        }
    }

    /// Leave the health check to the platform defaults
    pub fn disabled() -> Self {
        Self {
            path: None,
            enabled: false,
        }
    }
}

/// A container port to publish
#[derive(Debug)]
pub struct PublishTarget<'a> {
    /// VPC the load balancer is placed in
    pub vpc: &'a VpcInfo,
    /// Service whose tasks receive the traffic
    pub service: &'a FargateService,
    /// Container receiving the traffic
    pub container_name: &'a str,
    /// Port on the container
    pub container_port: u16,
    /// Protocol the container port speaks
    pub protocol: Protocol,
    /// Seconds a new target ramps up before receiving a full share
    pub slow_start_secs: Option<u32>,
    /// Seconds a deregistering target keeps draining
    pub deregistration_delay_secs: Option<u32>,
    /// Target group health check
    pub health_check: HealthCheck,
}

/// Condition of a listener rule
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ListenerCondition {
    /// Match any of these path patterns
    PathPatterns(Vec<String>),
    /// Match any of these host headers
    HostHeaders(Vec<String>),
}

impl ListenerCondition {
    fn to_value(&self) -> Value {
        match self {
            Self::PathPatterns(values) => json!({
                "Field": "path-pattern",
                "PathPatternConfig": { "Values": values }
            }),
            Self::HostHeaders(values) => json!({
                "Field": "host-header",
                "HostHeaderConfig": { "Values": values }
            }),
        }
    }
}

// =============================================================================
// Exposure
// =============================================================================

/// The resolved strategy for one container port
#[derive(Debug)]
pub enum Exposure {
    /// A port publisher
    Publisher(Box<dyn PortPublisher>),
    /// A deprecated listener provider
    Listener(Box<dyn ListenerProvider>),
}

impl Exposure {
    /// Publish the target's port with the held strategy
    pub fn expose(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()> {
        match self {
            Self::Publisher(publisher) => publisher.publish(scope, target),
            Self::Listener(listener) => listener.add_targets(scope, target),
        }
    }

    /// Returns true when nothing is published
    pub fn is_none(&self) -> bool {
        match self {
            Self::Publisher(publisher) => publisher.kind() == PublisherKind::None,
            Self::Listener(listener) => listener.kind() == ListenerKind::None,
        }
    }
}

// =============================================================================
// Shared Load Balancer Plumbing
// =============================================================================

/// Kind of elastic load balancer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoadBalancerKind {
    Application,
    Network,
}

impl LoadBalancerKind {
    fn type_property(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Network => "network",
        }
    }
}

/// A load balancer in the template
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LoadBalancer {
    pub(crate) id: String,
    pub(crate) logical_id: String,
    pub(crate) security_group_id: Option<String>,
}

impl LoadBalancer {
    pub(crate) fn dns_name(&self) -> Value {
        intrinsic::get_att(&self.logical_id, "DNSName")
    }
}

/// Find the load balancer under `id`, or create an internet-facing one
///
/// An existing load balancer of the other kind is a conflict.
pub(crate) fn find_or_create_load_balancer(
    scope: &mut Scope<'_>,
    id: &str,
    kind: LoadBalancerKind,
    vpc: &VpcInfo,
) -> Result<LoadBalancer> {
    if let Some(existing) = scope.find(id) {
        let existing_kind = existing
            .property("Type")
            .and_then(Value::as_str)
            .unwrap_or("application");
        if existing.type_ != LOAD_BALANCER_TYPE || existing_kind != kind.type_property() {
            return Err(Error::conflict(format!(
                "'{id}' already names a {existing_kind} load balancer ({}), cannot reuse it as {}",
                existing.type_,
                kind.type_property()
            )));
        }
        debug!(id = %id, "reusing load balancer");
        let security_group_id = match kind {
            LoadBalancerKind::Application => Some(scope.child_logical_id(id, "SecurityGroup")),
            LoadBalancerKind::Network => None,
        };
        return Ok(LoadBalancer {
            id: id.to_string(),
            logical_id: scope.logical_id(id),
            security_group_id,
        });
    }
    create_load_balancer(scope, id, kind, vpc)
}

/// Create an internet-facing load balancer in the public subnets
pub(crate) fn create_load_balancer(
    scope: &mut Scope<'_>,
    id: &str,
    kind: LoadBalancerKind,
    vpc: &VpcInfo,
) -> Result<LoadBalancer> {
    let subnets = vpc.subnets(SubnetSelection::Public)?;

    let mut properties = json!({
        "Type": kind.type_property(),
        "Scheme": "internet-facing",
        "Subnets": subnets,
        "LoadBalancerAttributes": [{ "Key": "deletion_protection.enabled", "Value": "false" }]
    });
    let security_group_id = match kind {
        LoadBalancerKind::Application => {
            let mut lb_scope = scope.child(id);
            let description = format!(
                "Automatically created Security Group for ELB {}",
                lb_scope.own_logical_id()
            );
            let sg = network::create_security_group(
                &mut lb_scope,
                "SecurityGroup",
                &description,
                vpc.vpc_id.clone(),
            )?;
            properties["SecurityGroups"] = json!([network::group_id(&sg)]);
            Some(sg)
        }
        LoadBalancerKind::Network => None,
    };

    let logical_id =
        scope.add_resource(id, Resource::new(LOAD_BALANCER_TYPE).with_properties(properties))?;
    info!(
        logical_id = %logical_id,
        kind = kind.type_property(),
        "creating load balancer"
    );
    Ok(LoadBalancer {
        id: id.to_string(),
        logical_id,
        security_group_id,
    })
}

/// Open a listener port of an application load balancer to the internet
pub(crate) fn open_listener_port(
    scope: &mut Scope<'_>,
    load_balancer: &LoadBalancer,
    port: u16,
) -> Result<()> {
    let Some(security_group_id) = &load_balancer.security_group_id else {
        return Ok(());
    };
    let mut lb_scope = scope.child(&load_balancer.id);
    let mut sg_scope = lb_scope.child("SecurityGroup");
    let ports = PortRange::Tcp(port);
    let rule_id = format!("from {}:{}", Peer::AnyIpv4.label(), ports.describe());
    if sg_scope.contains(&rule_id) {
        return Ok(());
    }
    network::allow_from(
        &mut sg_scope,
        &rule_id,
        network::group_id(security_group_id),
        &Peer::AnyIpv4,
        ports,
    )?;
    Ok(())
}

/// Add a listener to a load balancer, returning the listener's logical id
pub(crate) fn add_listener(
    scope: &mut Scope<'_>,
    load_balancer: &LoadBalancer,
    listener_id: &str,
    properties: Value,
) -> Result<String> {
    let mut properties = properties;
    properties["LoadBalancerArn"] = intrinsic::reference(&load_balancer.logical_id);
    let logical_id = scope
        .child(&load_balancer.id)
        .add_resource(listener_id, Resource::new(LISTENER_TYPE).with_properties(properties))?;
    debug!(logical_id = %logical_id, "adding listener");
    Ok(logical_id)
}

/// A `forward` action to a target group
pub(crate) fn forward_to(target_group_id: &str) -> Value {
    json!([{ "Type": "forward", "TargetGroupArn": intrinsic::reference(target_group_id) }])
}

/// Target group settings beyond port and protocol
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TargetGroupOptions {
    pub(crate) port: Option<u16>,
    pub(crate) stickiness: bool,
    pub(crate) slow_start: bool,
    pub(crate) health_check_path: bool,
}

/// Create an `ip` target group for the publish target
pub(crate) fn add_target_group(
    scope: &mut Scope<'_>,
    id: &str,
    target: &PublishTarget<'_>,
    protocol: &str,
    options: TargetGroupOptions,
) -> Result<String> {
    let mut attributes = Vec::new();
    if options.stickiness {
        attributes.push(attribute("stickiness.enabled", "true"));
        attributes.push(attribute("stickiness.type", "lb_cookie"));
        attributes.push(attribute(
            "stickiness.lb_cookie.duration_seconds",
            &STICKINESS_COOKIE_SECS.to_string(),
        ));
    }
    if let (true, Some(secs)) = (options.slow_start, target.slow_start_secs) {
        attributes.push(attribute("slow_start.duration_seconds", &secs.to_string()));
    }
    if let Some(secs) = target.deregistration_delay_secs {
        attributes.push(attribute("deregistration_delay.timeout_seconds", &secs.to_string()));
    }

    let mut properties = Map::new();
    properties.insert(
        "Port".to_string(),
        json!(options.port.unwrap_or(target.container_port)),
    );
    properties.insert("Protocol".to_string(), json!(protocol));
    properties.insert("TargetType".to_string(), json!("ip"));
    properties.insert("VpcId".to_string(), target.vpc.vpc_id.clone());
    if !attributes.is_empty() {
        properties.insert("TargetGroupAttributes".to_string(), Value::Array(attributes));
    }
    if target.health_check.enabled {
        properties.insert("HealthCheckEnabled".to_string(), json!(true));
        if let (true, Some(path)) = (options.health_check_path, &target.health_check.path) {
            properties.insert("HealthCheckPath".to_string(), json!(path));
        }
    }

    scope.add_resource(
        id,
        Resource::new(TARGET_GROUP_TYPE).with_properties(Value::Object(properties)),
    )
}

fn attribute(key: &str, value: &str) -> Value {
    json!({ "Key": key, "Value": value })
}

/// Register the service with a target group attached by `listener`
pub(crate) fn register_service(
    scope: &mut Scope<'_>,
    target: &PublishTarget<'_>,
    target_group_id: &str,
    listener: &str,
) -> Result<()> {
    target.service.add_load_balancer_target(
        scope,
        intrinsic::reference(target_group_id),
        target.container_name,
        target.container_port,
        Some(listener),
    )
}

/// Let an application load balancer reach the container port
pub(crate) fn allow_load_balancer(
    scope: &mut Scope<'_>,
    target: &PublishTarget<'_>,
    load_balancer: &LoadBalancer,
) -> Result<()> {
    match &load_balancer.security_group_id {
        Some(sg) => target.service.allow_from(
            scope,
            &Peer::SecurityGroup(network::group_id(sg)),
            PortRange::Tcp(target.container_port),
        ),
        None => Ok(()),
    }
}

/// Add `url_format` (with `${HostName}`) as an output
pub(crate) fn add_url_output(
    scope: &mut Scope<'_>,
    id: &str,
    url_format: &str,
    load_balancer: &LoadBalancer,
) -> Result<String> {
    scope.add_output(
        id,
        Output::new(intrinsic::sub(url_format, [("HostName", load_balancer.dns_name())])),
    )
}

/// Forward matching requests on an existing listener to a new target group
pub(crate) fn attach_to_listener(
    scope: &mut Scope<'_>,
    target: &PublishTarget<'_>,
    listener_arn: &Value,
    conditions: &[ListenerCondition],
    priority: Option<u32>,
) -> Result<()> {
    let protocol = target.protocol.alb_protocol()?;
    if conditions.is_empty() {
        return Err(Error::validation(
            "a rule on an existing listener needs at least one condition",
        ));
    }
    let priority = priority.unwrap_or(DEFAULT_RULE_PRIORITY);
    if !(1..=50_000).contains(&priority) {
        return Err(Error::validation(format!(
            "listener rule priority {priority} must be between 1 and 50000"
        )));
    }

    let port = target.container_port;
    let target_group_id = add_target_group(
        scope,
        &format!("Keycloak{port}Group"),
        target,
        protocol,
        TargetGroupOptions {
            health_check_path: true,
            ..Default::default()
        },
    )?;
    let rule_id = scope.add_resource(
        &format!("Keycloak{port}Rule"),
        Resource::new(LISTENER_RULE_TYPE).with_properties(json!({
            "ListenerArn": listener_arn,
            "Priority": priority,
            "Conditions": conditions.iter().map(ListenerCondition::to_value).collect::<Vec<_>>(),
            "Actions": forward_to(&target_group_id)
        })),
    )?;
    info!(
        rule = %rule_id,
        port = port,
        priority = priority,
        "forwarding existing listener to Keycloak"
    );
    register_service(scope, target, &target_group_id, &rule_id)
}
