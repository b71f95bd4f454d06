//! VPC providers

use serde_json::{json, Value};
use tracing::info;

use super::VpcProvider;
use crate::network::SubnetSelection;
use crate::template::{intrinsic, Resource, Scope};
use crate::{Error, Result};

/// Information about the VPC other providers place their resources in
#[derive(Clone, Debug, PartialEq)]
pub struct VpcInfo {
    /// VPC id (literal or intrinsic)
    pub vpc_id: Value,
    /// Public subnet ids
    pub public_subnet_ids: Vec<Value>,
    /// Private subnet ids
    pub private_subnet_ids: Vec<Value>,
}

impl VpcInfo {
    /// Subnet ids for a selection
    pub fn subnets(&self, selection: SubnetSelection) -> Result<Vec<Value>> {
        let subnets = match selection {
            SubnetSelection::Public => &self.public_subnet_ids,
            SubnetSelection::Private => &self.private_subnet_ids,
        };
        if subnets.is_empty() {
            return Err(Error::missing_dependency(format!(
                "the VPC has no {} subnets",
                match selection {
                    SubnetSelection::Public => "public",
                    SubnetSelection::Private => "private",
                }
            )));
        }
        Ok(subnets.clone())
    }
}

/// Provides an already-existing VPC
#[derive(Clone, Debug, PartialEq)]
pub struct ExistingVpc {
    info: VpcInfo,
}

impl ExistingVpc {
    /// Existing VPC by id, subnets added with the builder methods
    pub fn new(vpc_id: impl Into<String>) -> Self {
        Self {
            info: VpcInfo {
                vpc_id: Value::String(vpc_id.into()),
                public_subnet_ids: Vec::new(),
                private_subnet_ids: Vec::new(),
            },
        }
    }

    /// Provide a fully formed [`VpcInfo`]
    pub fn from_info(info: VpcInfo) -> Self {
        Self { info }
    }

    /// Set the public subnet ids
    pub fn with_public_subnets<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.info.public_subnet_ids = ids.into_iter().map(|s| Value::String(s.into())).collect();
        self
    }

    /// Set the private subnet ids
    pub fn with_private_subnets<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.info.private_subnet_ids = ids.into_iter().map(|s| Value::String(s.into())).collect();
        self
    }
}

impl VpcProvider for ExistingVpc {
    fn bind(&self, _scope: &mut Scope<'_>) -> Result<VpcInfo> {
        info!(provider = "existing-vpc", "providing VPC");
        Ok(self.info.clone())
    }
}

/// Creates a VPC with public "ingress" /24 subnets and private /21 subnets
///
/// One subnet of each kind per availability zone. Private subnets route
/// through NAT gateways placed in the ingress subnets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressAndPrivateVpc {
    /// VPC CIDR block; subnets are carved out of 10.0.0.0/16 offsets
    pub cidr: String,
    /// Number of availability zones
    pub max_azs: usize,
    /// Number of NAT gateways (at most one per AZ)
    pub nat_gateways: usize,
}

impl Default for IngressAndPrivateVpc {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: 1,
        }
    }
}

impl IngressAndPrivateVpc {
    fn second_octets(&self) -> Result<[u8; 2]> {
        let mut parts = self.cidr.split('/').next().unwrap_or_default().split('.');
        let first = parts.next().and_then(|p| p.parse::<u8>().ok());
        let second = parts.next().and_then(|p| p.parse::<u8>().ok());
        match (first, second, self.cidr.ends_with("/16")) {
            (Some(a), Some(b), true) => Ok([a, b]),
            _ => Err(Error::validation(format!(
                "VPC CIDR '{}' must be a /16 block",
                self.cidr
            ))),
        }
    }

    // /24 ingress subnets at 10.x.0.0, 10.x.1.0, ...; /21 private subnets
    // start at the first /21 boundary after the ingress range.
    fn ingress_cidr(prefix: [u8; 2], index: usize) -> String {
        format!("{}.{}.{}.0/24", prefix[0], prefix[1], index)
    }

    fn private_cidr(prefix: [u8; 2], index: usize) -> String {
        format!("{}.{}.{}.0/21", prefix[0], prefix[1], (index + 1) * 8)
    }
}

impl VpcProvider for IngressAndPrivateVpc {
    fn bind(&self, scope: &mut Scope<'_>) -> Result<VpcInfo> {
        if self.max_azs == 0 || self.max_azs > 6 {
            return Err(Error::validation(format!(
                "maxAzs must be between 1 and 6, got {}",
                self.max_azs
            )));
        }
        if self.nat_gateways > self.max_azs {
            return Err(Error::validation(format!(
                "cannot place {} NAT gateways in {} availability zones",
                self.nat_gateways, self.max_azs
            )));
        }
        let prefix = self.second_octets()?;

        let mut vpc_scope = scope.child("Vpc");
        let vpc_id = vpc_scope.add_resource(
            "Resource",
            Resource::new("AWS::EC2::VPC").with_properties(json!({
                "CidrBlock": self.cidr,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default"
            })),
        )?;
        info!(provider = "ingress-and-private-vpc", logical_id = %vpc_id, azs = self.max_azs, "creating VPC");

        let igw_id = vpc_scope.add_resource("IGW", Resource::new("AWS::EC2::InternetGateway"))?;
        let attachment_id = vpc_scope.add_resource(
            "VPCGW",
            Resource::new("AWS::EC2::VPCGatewayAttachment").with_properties(json!({
                "VpcId": intrinsic::reference(&vpc_id),
                "InternetGatewayId": intrinsic::reference(&igw_id)
            })),
        )?;

        let mut public_subnet_ids = Vec::with_capacity(self.max_azs);
        let mut nat_gateway_ids = Vec::with_capacity(self.nat_gateways);
        for az in 0..self.max_azs {
            let name = format!("ingressSubnet{}", az + 1);
            let mut subnet_scope = vpc_scope.child(&name);
            let subnet_id = add_subnet(
                &mut subnet_scope,
                &vpc_id,
                az,
                Self::ingress_cidr(prefix, az),
                true,
            )?;
            let route_table_id = subnet_scope.logical_id("RouteTable");
            subnet_scope.add_resource(
                "DefaultRoute",
                Resource::new("AWS::EC2::Route")
                    .with_properties(json!({
                        "RouteTableId": intrinsic::reference(&route_table_id),
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "GatewayId": intrinsic::reference(&igw_id)
                    }))
                    .depends_on(attachment_id.clone()),
            )?;

            if az < self.nat_gateways {
                let eip_id = subnet_scope.add_resource(
                    "EIP",
                    Resource::new("AWS::EC2::EIP").with_properties(json!({ "Domain": "vpc" })),
                )?;
                let nat_id = subnet_scope.add_resource(
                    "NATGateway",
                    Resource::new("AWS::EC2::NatGateway")
                        .with_properties(json!({
                            "SubnetId": intrinsic::reference(&subnet_id),
                            "AllocationId": intrinsic::get_att(&eip_id, "AllocationId")
                        }))
                        .depends_on(attachment_id.clone()),
                )?;
                nat_gateway_ids.push(nat_id);
            }
            public_subnet_ids.push(intrinsic::reference(&subnet_id));
        }

        let mut private_subnet_ids = Vec::with_capacity(self.max_azs);
        for az in 0..self.max_azs {
            let name = format!("privateSubnet{}", az + 1);
            let mut subnet_scope = vpc_scope.child(&name);
            let subnet_id = add_subnet(
                &mut subnet_scope,
                &vpc_id,
                az,
                Self::private_cidr(prefix, az),
                false,
            )?;
            let route_table_id = subnet_scope.logical_id("RouteTable");
            if !nat_gateway_ids.is_empty() {
                let nat_id = &nat_gateway_ids[az % nat_gateway_ids.len()];
                subnet_scope.add_resource(
                    "DefaultRoute",
                    Resource::new("AWS::EC2::Route").with_properties(json!({
                        "RouteTableId": intrinsic::reference(&route_table_id),
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": intrinsic::reference(nat_id)
                    })),
                )?;
            }
            private_subnet_ids.push(intrinsic::reference(&subnet_id));
        }

        Ok(VpcInfo {
            vpc_id: intrinsic::reference(&vpc_id),
            public_subnet_ids,
            private_subnet_ids,
        })
    }
}

/// Subnet, route table and association for one AZ
fn add_subnet(
    scope: &mut Scope<'_>,
    vpc_id: &str,
    az: usize,
    cidr: String,
    public: bool,
) -> Result<String> {
    let subnet_id = scope.add_resource(
        "Subnet",
        Resource::new("AWS::EC2::Subnet").with_properties(json!({
            "VpcId": intrinsic::reference(vpc_id),
            "CidrBlock": cidr,
            "AvailabilityZone": intrinsic::select(az, intrinsic::get_azs()),
            "MapPublicIpOnLaunch": public
        })),
    )?;
    let route_table_id = scope.add_resource(
        "RouteTable",
        Resource::new("AWS::EC2::RouteTable")
            .with_properties(json!({ "VpcId": intrinsic::reference(vpc_id) })),
    )?;
    scope.add_resource(
        "RouteTableAssociation",
        Resource::new("AWS::EC2::SubnetRouteTableAssociation").with_properties(json!({
            "RouteTableId": intrinsic::reference(&route_table_id),
            "SubnetId": intrinsic::reference(&subnet_id)
        })),
    )?;
    Ok(subnet_id)
}
