//! Deprecated listener providers
//!
//! These predate [`PortPublisher`](super::PortPublisher) and always create
//! their application load balancer under the fixed id `LoadBalancer`, so two
//! of them cannot be combined on one cluster.

use std::fmt;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::publisher::{alb_target_group, nlb_target_group};
use super::{
    add_listener, add_url_output, allow_load_balancer, attach_to_listener, create_load_balancer,
    find_or_create_load_balancer, forward_to, open_listener_port, register_service,
    ListenerCondition, LoadBalancer, LoadBalancerKind, PublishTarget, DEFAULT_LOAD_BALANCER_ID,
};
use crate::network::{Peer, PortRange};
use crate::template::{intrinsic, Output, Scope};
use crate::{Error, Result};

/// Which listener provider a trait object is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerKind {
    /// Not exposed
    None,
    /// Rule on an existing listener
    Existing,
    /// New HTTP application load balancer
    Http,
    /// New HTTPS application load balancer
    Https,
    /// Network load balancer
    Nlb,
}

/// Adds the container port to a load balancer listener
pub trait ListenerProvider: fmt::Debug {
    /// Write the listener and target group into `scope`
    fn add_targets(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()>;

    /// Which provider this is
    fn kind(&self) -> ListenerKind;
}

/// Leaves the port unexposed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoneListener;

impl ListenerProvider for NoneListener {
    fn add_targets(&self, _scope: &mut Scope<'_>, _target: &PublishTarget<'_>) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> ListenerKind {
        ListenerKind::None
    }
}

/// Adds a rule to a caller-supplied listener
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistingListener {
    /// ARN of the listener
    pub listener_arn: String,
    /// Rule conditions (at least one)
    pub conditions: Vec<ListenerCondition>,
    /// Rule priority, 1000 when unset
    pub priority: Option<u32>,
}

impl ListenerProvider for ExistingListener {
    fn add_targets(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()> {
        attach_to_listener(
            scope,
            target,
            &json!(self.listener_arn),
            &self.conditions,
            self.priority,
        )
    }

    fn kind(&self) -> ListenerKind {
        ListenerKind::Existing
    }
}

/// Creates a new ALB listening for HTTP
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HttpListener;

impl ListenerProvider for HttpListener {
    fn add_targets(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()> {
        let protocol = target.protocol.alb_protocol()?;
        let load_balancer = new_application_load_balancer(scope, target, "http://${HostName}/")?;
        open_listener_port(scope, &load_balancer, 80)?;
        let target_group_id = alb_target_group(
            scope,
            DEFAULT_LOAD_BALANCER_ID,
            "HTTP",
            target,
            protocol,
            true,
            false,
        )?;
        let listener_id = add_listener(
            scope,
            &load_balancer,
            "HTTP",
            json!({
                "Port": 80,
                "Protocol": "HTTP",
                "DefaultActions": forward_to(&target_group_id)
            }),
        )?;
        allow_load_balancer(scope, target, &load_balancer)?;
        register_service(scope, target, &target_group_id, &listener_id)
    }

    fn kind(&self) -> ListenerKind {
        ListenerKind::Http
    }
}

/// Creates a new ALB listening for HTTPS with the given certificates
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpsListener {
    /// ACM certificate ARNs (at least one)
    pub certificates: Vec<String>,
}

impl ListenerProvider for HttpsListener {
    fn add_targets(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()> {
        if self.certificates.is_empty() {
            return Err(Error::missing_dependency(
                "Please provide one or more certificates to the load balancer",
            ));
        }
        let protocol = target.protocol.alb_protocol()?;
        let load_balancer = new_application_load_balancer(scope, target, "https://${HostName}/")?;
        open_listener_port(scope, &load_balancer, 443)?;
        let target_group_id = alb_target_group(
            scope,
            DEFAULT_LOAD_BALANCER_ID,
            "HTTPS",
            target,
            protocol,
            true,
            false,
        )?;
        let certificates: Vec<Value> = self
            .certificates
            .iter()
            .map(|arn| json!({ "CertificateArn": arn }))
            .collect();
        let listener_id = add_listener(
            scope,
            &load_balancer,
            "HTTPS",
            json!({
                "Port": 443,
                "Protocol": "HTTPS",
                "Certificates": certificates,
                "DefaultActions": forward_to(&target_group_id)
            }),
        )?;
        allow_load_balancer(scope, target, &load_balancer)?;
        register_service(scope, target, &target_group_id, &listener_id)
    }

    fn kind(&self) -> ListenerKind {
        ListenerKind::Https
    }
}

/// Adds a TCP listener to a (possibly shared) NLB
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NlbListener {
    /// Construct id of the load balancer
    pub id: String,
    /// Port the load balancer listens on
    pub port: u16,
    /// Configure the target group health check
    pub health_check: bool,
}

impl NlbListener {
    /// NLB listener on `port` of the default load balancer
    pub fn new(port: u16) -> Self {
        Self {
            id: DEFAULT_LOAD_BALANCER_ID.to_string(),
            port,
            health_check: true,
        }
    }
}

impl ListenerProvider for NlbListener {
    fn add_targets(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()> {
        let load_balancer =
            find_or_create_load_balancer(scope, &self.id, LoadBalancerKind::Network, target.vpc)?;
        // Listeners are named after the container port, not the listen port.
        let listener_name = format!("Port{}", target.container_port);

        let target_group_id = nlb_target_group(
            scope,
            &self.id,
            &listener_name,
            target,
            self.port,
            self.health_check,
        )?;
        let listener_id = add_listener(
            scope,
            &load_balancer,
            &listener_name,
            json!({
                "Port": self.port,
                "Protocol": "TCP",
                "DefaultActions": forward_to(&target_group_id)
            }),
        )?;
        scope.child(&self.id).add_output(
            &format!("EndpointPort{}", target.container_port),
            Output::new(intrinsic::sub(
                "${Host}:${Port}",
                [
                    ("Host", load_balancer.dns_name()),
                    ("Port", json!(self.port.to_string())),
                ],
            )),
        )?;

        let ports = PortRange::Tcp(target.container_port);
        target.service.allow_from(scope, &Peer::AnyIpv4, ports)?;
        target.service.allow_from(scope, &Peer::AnyIpv6, ports)?;
        register_service(scope, target, &target_group_id, &listener_id)
    }

    fn kind(&self) -> ListenerKind {
        ListenerKind::Nlb
    }
}

/// Always a new load balancer plus the scope-level `LoadBalancerUrl` output
fn new_application_load_balancer(
    scope: &mut Scope<'_>,
    target: &PublishTarget<'_>,
    url_format: &str,
) -> Result<LoadBalancer> {
    warn!(
        port = target.container_port,
        "listener providers are deprecated; use port publishers instead"
    );
    let load_balancer = create_load_balancer(
        scope,
        DEFAULT_LOAD_BALANCER_ID,
        LoadBalancerKind::Application,
        target.vpc,
    )?;
    add_url_output(scope, "LoadBalancerUrl", url_format, &load_balancer)?;
    info!(
        logical_id = %load_balancer.logical_id,
        port = target.container_port,
        "created load balancer for listener provider"
    );
    Ok(load_balancer)
}
