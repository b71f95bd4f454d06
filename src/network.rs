//! Security groups and ingress rules
//!
//! Connections between the Keycloak service, its database and the load
//! balancers are expressed as standalone `AWS::EC2::SecurityGroupIngress`
//! resources so that the security groups themselves never reference each
//! other (no circular dependencies in the template).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::template::{intrinsic, Resource, Scope};
use crate::Result;

/// CloudFormation type for security groups
pub const SECURITY_GROUP_TYPE: &str = "AWS::EC2::SecurityGroup";
/// CloudFormation type for standalone ingress rules
pub const SECURITY_GROUP_INGRESS_TYPE: &str = "AWS::EC2::SecurityGroupIngress";

/// Source of inbound traffic
#[derive(Clone, Debug, PartialEq)]
pub enum Peer {
    /// Any IPv4 address
    AnyIpv4,
    /// Any IPv6 address
    AnyIpv6,
    /// Members of a security group
    SecurityGroup(Value),
}

impl Peer {
    /// Label used in rule ids and descriptions
    ///
    /// Security groups created in this template are named by logical id.
    pub fn label(&self) -> String {
        match self {
            Self::AnyIpv4 => "0.0.0.0/0".to_string(),
            Self::AnyIpv6 => "::/0".to_string(),
            Self::SecurityGroup(Value::String(id)) => id.clone(),
            Self::SecurityGroup(value) => value
                .get("Fn::GetAtt")
                .and_then(|att| att.get(0))
                .or_else(|| value.get("Ref"))
                .and_then(Value::as_str)
                .unwrap_or("security group")
                .to_string(),
        }
    }
}

/// A port range and protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortRange {
    /// A single TCP port
    Tcp(u16),
    /// A single UDP port
    Udp(u16),
    /// All protocols, all ports
    AllTraffic,
}

impl PortRange {
    fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        let (protocol, port) = match self {
            Self::Tcp(port) => ("tcp", Some(*port)),
            Self::Udp(port) => ("udp", Some(*port)),
            Self::AllTraffic => ("-1", None),
        };
        props.insert("IpProtocol".to_string(), json!(protocol));
        if let Some(port) = port {
            props.insert("FromPort".to_string(), json!(port));
            props.insert("ToPort".to_string(), json!(port));
        }
        props
    }

    /// Short description, e.g. `tcp 8080`
    pub fn describe(&self) -> String {
        match self {
            Self::Tcp(port) => format!("tcp {port}"),
            Self::Udp(port) => format!("udp {port}"),
            Self::AllTraffic => "all traffic".to_string(),
        }
    }
}

/// Something that owns a security group and listens on a default port
#[derive(Clone, Debug, PartialEq)]
pub struct Connectable {
    /// Security group id (literal or intrinsic)
    pub security_group_id: Value,
    /// Port other resources connect to by default
    pub default_port: Option<u16>,
}

impl Connectable {
    /// Create a connectable from a security group id
    pub fn new(security_group_id: Value) -> Self {
        Self {
            security_group_id,
            default_port: None,
        }
    }

    /// Set the default port
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = Some(port);
        self
    }
}

/// Which subnets of a VPC to place resources in
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubnetSelection {
    /// Subnets routed through an internet gateway
    Public,
    /// Subnets routed through NAT
    #[default]
    Private,
}

/// Create a security group in `vpc_id`, returning its logical id
pub fn create_security_group(
    scope: &mut Scope<'_>,
    id: &str,
    description: &str,
    vpc_id: Value,
) -> Result<String> {
    scope.add_resource(
        id,
        Resource::new(SECURITY_GROUP_TYPE).with_properties(json!({
            "GroupDescription": description,
            "VpcId": vpc_id,
            "SecurityGroupEgress": [{
                "CidrIp": "0.0.0.0/0",
                "Description": "Allow all outbound traffic by default",
                "IpProtocol": "-1"
            }]
        })),
    )
}

/// Allow traffic from `peer` into `target_group_id` on `ports`
pub fn allow_from(
    scope: &mut Scope<'_>,
    id: &str,
    target_group_id: Value,
    peer: &Peer,
    ports: PortRange,
) -> Result<String> {
    let mut obj = ports.properties();
    obj.insert("GroupId".to_string(), target_group_id);
    let description = match peer {
        Peer::AnyIpv4 => {
            obj.insert("CidrIp".to_string(), json!("0.0.0.0/0"));
            format!("from 0.0.0.0/0:{}", ports.describe())
        }
        Peer::AnyIpv6 => {
            obj.insert("CidrIpv6".to_string(), json!("::/0"));
            format!("from ::/0:{}", ports.describe())
        }
        Peer::SecurityGroup(source) => {
            obj.insert("SourceSecurityGroupId".to_string(), source.clone());
            format!("from {}:{}", peer.label(), ports.describe())
        }
    };
    obj.insert("Description".to_string(), json!(description));

    scope.add_resource(
        id,
        Resource::new(SECURITY_GROUP_INGRESS_TYPE).with_properties(Value::Object(obj)),
    )
}

/// Allow `from` to reach `to` on the default port of `to`
///
/// Does nothing when `to` has no default port.
pub fn allow_default_port_from(
    scope: &mut Scope<'_>,
    id: &str,
    to: &Connectable,
    from: &Connectable,
) -> Result<Option<String>> {
    let Some(port) = to.default_port else {
        return Ok(None);
    };
    allow_from(
        scope,
        id,
        to.security_group_id.clone(),
        &Peer::SecurityGroup(from.security_group_id.clone()),
        PortRange::Tcp(port),
    )
    .map(Some)
}

/// Group id attribute of a security group created in this template
pub fn group_id(logical_id: &str) -> Value {
    intrinsic::get_att(logical_id, "GroupId")
}
