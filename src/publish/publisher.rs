//! Port publishers

use std::fmt;

use serde_json::{json, Map, Value};
use tracing::info;

use super::{
    add_listener, add_target_group, add_url_output, allow_load_balancer, attach_to_listener,
    find_or_create_load_balancer, forward_to, open_listener_port, register_service, HealthCheck,
    ListenerCondition, LoadBalancerKind, PublishTarget, TargetGroupOptions,
    DEFAULT_LOAD_BALANCER_ID,
};
use crate::network::{Peer, PortRange};
use crate::template::{intrinsic, Output, Scope};
use crate::{Error, Result};

/// Which publisher a trait object is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherKind {
    /// Not published
    None,
    /// Rule on an existing listener
    AddTarget,
    /// HTTP application load balancer
    HttpAlb,
    /// HTTPS application load balancer
    HttpsAlb,
    /// Network load balancer
    Nlb,
}

/// Exposes a container port
pub trait PortPublisher: fmt::Debug {
    /// Write whatever is needed to reach the target's port into `scope`
    fn publish(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()>;

    /// Which publisher this is
    fn kind(&self) -> PublisherKind;
}

/// Leaves the port unpublished
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NonePublisher;

impl PortPublisher for NonePublisher {
    fn publish(&self, _scope: &mut Scope<'_>, _target: &PublishTarget<'_>) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> PublisherKind {
        PublisherKind::None
    }
}

/// Forwards matching requests on an existing ALB listener to the port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddTargetPublisher {
    /// ARN of the listener
    pub listener_arn: String,
    /// Conditions of the listener rule (at least one)
    pub conditions: Vec<ListenerCondition>,
    /// Rule priority, 1000 when unset
    pub priority: Option<u32>,
}

impl PortPublisher for AddTargetPublisher {
    fn publish(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()> {
        attach_to_listener(
            scope,
            target,
            &json!(self.listener_arn),
            &self.conditions,
            self.priority,
        )
    }

    fn kind(&self) -> PublisherKind {
        PublisherKind::AddTarget
    }
}

/// Publishes the port on an internet-facing ALB listening for HTTP on 80
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpAlbPublisher {
    /// Construct id of the load balancer; publishers sharing it share the
    /// load balancer
    pub id: String,
    /// Configure the target group health check
    pub health_check: bool,
}

impl Default for HttpAlbPublisher {
    fn default() -> Self {
        Self {
            id: DEFAULT_LOAD_BALANCER_ID.to_string(),
            health_check: true,
        }
    }
}

impl PortPublisher for HttpAlbPublisher {
    fn publish(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()> {
        let protocol = target.protocol.alb_protocol()?;
        let load_balancer = find_or_create_load_balancer(
            scope,
            &self.id,
            LoadBalancerKind::Application,
            target.vpc,
        )?;
        open_listener_port(scope, &load_balancer, 80)?;

        let target_group_id =
            alb_target_group(scope, &self.id, "HTTP", target, protocol, self.health_check, true)?;
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
        add_url_output(
            &mut scope.child(&self.id).child("HTTP"),
            "Url",
            "http://${HostName}/",
            &load_balancer,
        )?;

        allow_load_balancer(scope, target, &load_balancer)?;
        register_service(scope, target, &target_group_id, &listener_id)?;
        info!(
            listener = %listener_id,
            port = target.container_port,
            "published container port over HTTP"
        );
        Ok(())
    }

    fn kind(&self) -> PublisherKind {
        PublisherKind::HttpAlb
    }
}

/// Publishes the port on an internet-facing ALB listening for HTTPS on 443
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpsAlbPublisher {
    /// Construct id of the load balancer
    pub id: String,
    /// Configure the target group health check
    pub health_check: bool,
    /// ACM certificate ARNs (at least one)
    pub certificates: Vec<String>,
    /// Redirect HTTP on port 80 to HTTPS
    pub upgrade_http: bool,
    /// Host to redirect to; the request host when unset
    pub upgrade_http_host: Option<String>,
}

impl HttpsAlbPublisher {
    /// HTTPS publisher on the default load balancer
    pub fn new(certificates: Vec<String>) -> Self {
        Self {
            id: DEFAULT_LOAD_BALANCER_ID.to_string(),
            health_check: true,
            certificates,
            upgrade_http: false,
            upgrade_http_host: None,
        }
    }
}

impl PortPublisher for HttpsAlbPublisher {
    fn publish(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()> {
        if self.certificates.is_empty() {
            return Err(Error::missing_dependency(
                "Please provide one or more certificates to the load balancer",
            ));
        }
        let protocol = target.protocol.alb_protocol()?;
        let load_balancer = find_or_create_load_balancer(
            scope,
            &self.id,
            LoadBalancerKind::Application,
            target.vpc,
        )?;

        if self.upgrade_http {
            let mut redirect = Map::new();
            redirect.insert("Protocol".to_string(), json!("HTTPS"));
            redirect.insert("Port".to_string(), json!("443"));
            if let Some(host) = &self.upgrade_http_host {
                redirect.insert("Host".to_string(), json!(host));
            }
            redirect.insert("StatusCode".to_string(), json!("HTTP_302"));
            open_listener_port(scope, &load_balancer, 80)?;
            add_listener(
                scope,
                &load_balancer,
                "HTTP",
                json!({
                    "Port": 80,
                    "Protocol": "HTTP",
                    "DefaultActions": [{ "Type": "redirect", "RedirectConfig": Value::Object(redirect) }]
                }),
            )?;
        }

        open_listener_port(scope, &load_balancer, 443)?;
        let target_group_id =
            alb_target_group(scope, &self.id, "HTTPS", target, protocol, self.health_check, true)?;
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
        add_url_output(
            &mut scope.child(&self.id).child("HTTPS"),
            "Url",
            "https://${HostName}/",
            &load_balancer,
        )?;

        allow_load_balancer(scope, target, &load_balancer)?;
        register_service(scope, target, &target_group_id, &listener_id)?;
        info!(
            listener = %listener_id,
            port = target.container_port,
            upgrade_http = self.upgrade_http,
            "published container port over HTTPS"
        );
        Ok(())
    }

    fn kind(&self) -> PublisherKind {
        PublisherKind::HttpsAlb
    }
}

/// Publishes the port on an internet-facing NLB
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NlbPublisher {
    /// Construct id of the load balancer
    pub id: String,
    /// Port the load balancer listens on
    pub port: u16,
    /// Configure the target group health check
    pub health_check: bool,
}

impl NlbPublisher {
    /// NLB publisher listening on `port` of the default load balancer
    pub fn new(port: u16) -> Self {
        Self {
            id: DEFAULT_LOAD_BALANCER_ID.to_string(),
            port,
            health_check: true,
        }
    }
}

impl PortPublisher for NlbPublisher {
    fn publish(&self, scope: &mut Scope<'_>, target: &PublishTarget<'_>) -> Result<()> {
        let load_balancer =
            find_or_create_load_balancer(scope, &self.id, LoadBalancerKind::Network, target.vpc)?;
        let listener_name = format!("Port{}", self.port);

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
        scope.child(&self.id).child(&listener_name).add_output(
            "Endpoint",
            Output::new(intrinsic::sub(
                "${Host}:${Port}",
                [
                    ("Host", load_balancer.dns_name()),
                    ("Port", json!(self.port.to_string())),
                ],
            )),
        )?;

        // Network load balancers have no security group to allow from.
        let ports = PortRange::Tcp(target.container_port);
        target.service.allow_from(scope, &Peer::AnyIpv4, ports)?;
        target.service.allow_from(scope, &Peer::AnyIpv6, ports)?;

        register_service(scope, target, &target_group_id, &listener_id)?;
        info!(
            listener = %listener_id,
            port = target.container_port,
            listen_port = self.port,
            "published container port over NLB"
        );
        Ok(())
    }

    fn kind(&self) -> PublisherKind {
        PublisherKind::Nlb
    }
}

/// Target group `<lb>/<listener>/KeycloakGroup`
pub(super) fn alb_target_group(
    scope: &mut Scope<'_>,
    load_balancer_id: &str,
    listener_id: &str,
    target: &PublishTarget<'_>,
    protocol: &str,
    health_check: bool,
    stickiness: bool,
) -> Result<String> {
    let mut lb_scope = scope.child(load_balancer_id);
    let mut listener_scope = lb_scope.child(listener_id);
    let checked = PublishTarget {
        health_check: if health_check {
            target.health_check.clone()
        } else {
            HealthCheck::disabled()
        },
        ..*target
    };
    add_target_group(
        &mut listener_scope,
        "KeycloakGroup",
        &checked,
        protocol,
        TargetGroupOptions {
            port: None,
            stickiness,
            slow_start: true,
            health_check_path: true,
        },
    )
}

/// Target group `<lb>/<listener>/TargetGroup` on the listener port, health
/// checked without a path
pub(super) fn nlb_target_group(
    scope: &mut Scope<'_>,
    load_balancer_id: &str,
    listener_id: &str,
    target: &PublishTarget<'_>,
    port: u16,
    health_check: bool,
) -> Result<String> {
    let mut lb_scope = scope.child(load_balancer_id);
    let mut listener_scope = lb_scope.child(listener_id);
    let checked = PublishTarget {
        health_check: HealthCheck {
            path: None,
            enabled: health_check && target.health_check.enabled,
        },
        ..*target
    };
    add_target_group(
        &mut listener_scope,
        "TargetGroup",
        &checked,
        target.protocol.nlb_protocol(),
        TargetGroupOptions {
            port: Some(port),
            ..Default::default()
        },
    )
}
