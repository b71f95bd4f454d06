//! Cloud Map namespace providers

use serde_json::{json, Value};
use tracing::info;

use super::{NamespaceProvider, VpcInfo};
use crate::template::{intrinsic, Resource, Scope};
use crate::{Error, Result};

/// Default name of the private DNS namespace
pub const DEFAULT_NAMESPACE_NAME: &str = "keycloak-service-discovery";

/// The Cloud Map namespace used for service discovery
#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceInfo {
    /// Namespace id (literal or intrinsic)
    pub namespace_id: Value,
    /// DNS name of the namespace (literal or intrinsic)
    pub namespace_name: Value,
}

/// Creates a private DNS namespace in the VPC
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateDnsNamespace {
    /// Globally unique namespace name
    pub name: String,
}

impl Default for PrivateDnsNamespace {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAMESPACE_NAME.to_string(),
        }
    }
}

impl NamespaceProvider for PrivateDnsNamespace {
    fn bind(&self, scope: &mut Scope<'_>, vpc: &VpcInfo) -> Result<NamespaceInfo> {
        if self.name.is_empty() {
            return Err(Error::validation("namespace name must not be empty"));
        }
        let namespace_id = scope.add_resource(
            "ServiceDiscoveryNS",
            Resource::new("AWS::ServiceDiscovery::PrivateDnsNamespace").with_properties(json!({
                "Name": self.name,
                "Vpc": vpc.vpc_id
            })),
        )?;
        info!(
            provider = "private-dns-namespace",
            logical_id = %namespace_id,
            name = %self.name,
            "creating Cloud Map namespace"
        );
        Ok(NamespaceInfo {
            namespace_id: intrinsic::get_att(&namespace_id, "Id"),
            namespace_name: json!(self.name),
        })
    }
}

/// Provides a caller-supplied namespace
#[derive(Clone, Debug, PartialEq)]
pub struct ExistingNamespace {
    info: NamespaceInfo,
}

impl ExistingNamespace {
    /// Existing namespace by id and DNS name
    pub fn new(namespace_id: impl Into<String>, namespace_name: impl Into<String>) -> Self {
        Self {
            info: NamespaceInfo {
                namespace_id: Value::String(namespace_id.into()),
                namespace_name: Value::String(namespace_name.into()),
            },
        }
    }
}

impl NamespaceProvider for ExistingNamespace {
    fn bind(&self, _scope: &mut Scope<'_>, _vpc: &VpcInfo) -> Result<NamespaceInfo> {
        info!(provider = "existing-namespace", "providing Cloud Map namespace");
        Ok(self.info.clone())
    }
}
