//! The Keycloak server container
//!
//! [`KeycloakOptions`] is what a deployment configures; [`KeycloakContainer`]
//! is the validated result with every default applied. The container
//! definition itself is only produced at render time because the JGroups
//! discovery settings depend on the Cloud Map service, which is created after
//! the task definition.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ContainerDefinition, LogConfiguration, TransportProtocol};
use super::{CloudMapService, DnsRecordType};
use crate::provider::SecretRef;
use crate::template::intrinsic;
use crate::{Error, Result};

/// Web traffic port
pub const WEB_PORT: u16 = 8080;
/// Web traffic port with HTTPS
pub const HTTPS_WEB_PORT: u16 = 8443;
/// WildFly admin console port
pub const ADMIN_CONSOLE_PORT: u16 = 9990;

const JGROUPS_TCP_PORT: u16 = 7600;
const JGROUPS_TCP_FD_PORT: u16 = 57600;
const JGROUPS_UDP_PORT: u16 = 55200;
const JGROUPS_UDP_FD_PORT: u16 = 54200;

const DEFAULT_IMAGE: &str = "jboss/keycloak";
const DEFAULT_CONTAINER_NAME: &str = "keycloak";
const DEFAULT_DATABASE_NAME: &str = "keycloak";
const DEFAULT_ADMIN: &str = "admin";

/// Database vendor tag understood by the Keycloak image
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseVendor {
    /// In-memory database; data is lost when the task restarts
    #[default]
    H2,
    /// MySQL
    Mysql,
    /// MariaDB
    Mariadb,
    /// PostgreSQL
    Postgres,
    /// Oracle (reserved, not supported)
    Oracle,
    /// Microsoft SQL Server (reserved, not supported)
    Mssql,
}

impl DatabaseVendor {
    /// Value of the `DB_VENDOR` environment variable
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H2 => "h2",
            Self::Mysql => "mysql",
            Self::Mariadb => "mariadb",
            Self::Postgres => "postgres",
            Self::Oracle => "oracle",
            Self::Mssql => "mssql",
        }
    }

    /// Returns true for vendors this crate can deploy against
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::H2 | Self::Mysql | Self::Mariadb | Self::Postgres)
    }
}

impl fmt::Display for DatabaseVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a Cloud Map record type to the name JGroups DNS_PING expects
pub fn map_dns_record_type_to_jgroups(record_type: DnsRecordType) -> Result<&'static str> {
    match record_type {
        DnsRecordType::A => Ok("A"),
        DnsRecordType::Srv => Ok("SRV"),
        other => Err(Error::unsupported(format!(
            "Unsupported service discovery record type: {other}"
        ))),
    }
}

/// Keycloak configuration as supplied by a deployment
///
/// Every field is optional; defaults are applied by [`KeycloakContainer::new`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct KeycloakOptions {
    /// Container image (default `jboss/keycloak`)
    pub image: Option<String>,
    /// Container name (default `keycloak`)
    pub container_name: Option<String>,
    /// Distributed cache owners per key (default 1)
    pub cache_owners_count: Option<u32>,
    /// Cache owners for authentication sessions (default `cacheOwnersCount`)
    pub cache_owners_auth_sessions_count: Option<u32>,
    /// Database name (default `keycloak`)
    pub database_name: Option<String>,
    /// Database vendor (default h2); the cluster sets it from the database
    pub database_vendor: Option<DatabaseVendor>,
    /// Admin user created in the master realm (default `admin`)
    pub default_admin_user: Option<String>,
    /// Password of the admin user (default `admin`)
    pub default_admin_password: Option<String>,
    /// Container memory limit (default the task memory)
    #[serde(rename = "memoryLimitMiB")]
    pub memory_limit_mib: Option<u32>,
    /// Container memory reservation (default 80% of the limit)
    #[serde(rename = "memoryReservationMiB")]
    pub memory_reservation_mib: Option<u32>,
}

/// Validated Keycloak container settings
#[derive(Clone, Debug, PartialEq)]
pub struct KeycloakContainer {
    image: String,
    container_name: String,
    database_name: String,
    vendor: DatabaseVendor,
    credentials: Option<SecretRef>,
    admin_user: String,
    admin_password: String,
    cache_owners: u32,
    auth_session_cache_owners: u32,
    memory_limit_mib: Option<u32>,
    memory_reservation_mib: Option<u32>,
    cloud_map_service: Option<CloudMapService>,
}

impl KeycloakContainer {
    /// Apply defaults and validate the vendor against the credentials
    pub fn new(options: &KeycloakOptions, credentials: Option<SecretRef>) -> Result<Self> {
        let vendor = options.database_vendor.unwrap_or_default();
        if !vendor.is_supported() {
            return Err(Error::unsupported(format!(
                "The {vendor} database vendor is not yet tested and fully supported"
            )));
        }
        if credentials.is_none() && vendor != DatabaseVendor::H2 {
            return Err(Error::missing_dependency(format!(
                "The {vendor} database vendor requires credentials"
            )));
        }

        let cache_owners = options.cache_owners_count.unwrap_or(1);
        let auth_session_cache_owners = options
            .cache_owners_auth_sessions_count
            .unwrap_or(cache_owners);
        if cache_owners == 0 || auth_session_cache_owners == 0 {
            return Err(Error::validation("cache owner counts must be at least 1"));
        }

        let container_name = options
            .container_name
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string());
        if container_name.is_empty() {
            return Err(Error::validation("container name must not be empty"));
        }

        Ok(Self {
            image: options
                .image
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            container_name,
            database_name: options
                .database_name
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
            vendor,
            credentials,
            admin_user: options
                .default_admin_user
                .clone()
                .unwrap_or_else(|| DEFAULT_ADMIN.to_string()),
            admin_password: options
                .default_admin_password
                .clone()
                .unwrap_or_else(|| DEFAULT_ADMIN.to_string()),
            cache_owners,
            auth_session_cache_owners,
            memory_limit_mib: options.memory_limit_mib,
            memory_reservation_mib: options.memory_reservation_mib,
            cloud_map_service: None,
        })
    }

    /// Name of the container in the task definition
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Name of the Keycloak database
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Database vendor
    pub fn vendor(&self) -> DatabaseVendor {
        self.vendor
    }

    /// Database credentials, when the vendor needs them
    pub fn credentials(&self) -> Option<&SecretRef> {
        self.credentials.as_ref()
    }

    /// Distributed cache owners per key
    pub fn cache_owners(&self) -> u32 {
        self.cache_owners
    }

    /// Distributed cache owners for authentication sessions
    pub fn auth_session_cache_owners(&self) -> u32 {
        self.auth_session_cache_owners
    }

    /// Use Cloud Map DNS queries to find cluster members
    pub fn use_cloud_map_service(&mut self, service: CloudMapService) {
        self.cloud_map_service = Some(service);
    }

    /// `JGROUPS_DISCOVERY_PROTOCOL`
    pub fn discovery_protocol(&self) -> &'static str {
        match self.cloud_map_service {
            Some(_) => "dns.DNS_PING",
            None => "JDBC_PING",
        }
    }

    /// `JGROUPS_DISCOVERY_PROPERTIES`
    pub fn discovery_properties(&self) -> Result<Value> {
        let Some(service) = &self.cloud_map_service else {
            return Ok(json!(""));
        };
        // SRV records can't carry both clustering ports, so awsvpc A records
        // are what the cluster registers.
        let query_type = map_dns_record_type_to_jgroups(service.dns_record_type)?;
        Ok(intrinsic::sub(
            "dns_query=${ServiceName}.${ServiceNamespace},dns_record_type=${QueryType}",
            [
                ("ServiceName", service.service_name.clone()),
                ("ServiceNamespace", service.namespace_name.clone()),
                ("QueryType", json!(query_type)),
            ],
        ))
    }

    /// Build the container definition for a task with `task_memory_mib`
    pub fn container_definition(
        &self,
        task_memory_mib: u32,
        logging: &LogConfiguration,
    ) -> Result<ContainerDefinition> {
        let memory_limit = self.memory_limit_mib.unwrap_or(task_memory_mib);
        if memory_limit > task_memory_mib {
            return Err(Error::validation(format!(
                "container memory limit {memory_limit} MiB exceeds task memory {task_memory_mib} MiB"
            )));
        }
        let memory_reservation = self
            .memory_reservation_mib
            .unwrap_or_else(|| (f64::from(memory_limit) * 0.8).round() as u32);
        if memory_reservation > memory_limit {
            return Err(Error::validation(format!(
                "memory reservation {memory_reservation} MiB exceeds memory limit {memory_limit} MiB"
            )));
        }

        let database_name = match self.vendor {
            DatabaseVendor::H2 => "",
            _ => self.database_name.as_str(),
        };

        let mut container = ContainerDefinition::new(&self.container_name, &self.image)
            .with_env("KEYCLOAK_USER", self.admin_user.as_str())
            .with_env("KEYCLOAK_PASSWORD", self.admin_password.as_str())
            .with_env("DB_VENDOR", self.vendor.as_str())
            .with_env("DB_NAME", database_name)
            .with_env("JGROUPS_DISCOVERY_PROTOCOL", self.discovery_protocol())
            .with_env("JGROUPS_DISCOVERY_PROPERTIES", self.discovery_properties()?)
            .with_env("CACHE_OWNERS_COUNT", self.cache_owners.to_string())
            .with_env(
                "CACHE_OWNERS_AUTH_SESSIONS_COUNT",
                self.auth_session_cache_owners.to_string(),
            )
            .with_env("JDBC_PARAMS", "useSSL=false")
            .with_env("JAVA_OPTS", "-Djboss.bind.address.management=0.0.0.0");

        if let Some(credentials) = &self.credentials {
            container = container
                .with_secret("DB_ADDR", credentials, "host")
                .with_secret("DB_PORT", credentials, "port")
                .with_secret("DB_USER", credentials, "username")
                .with_secret("DB_PASSWORD", credentials, "password");
        }

        container = container
            .with_port(WEB_PORT, TransportProtocol::Tcp)
            .with_port(HTTPS_WEB_PORT, TransportProtocol::Tcp)
            .with_port(ADMIN_CONSOLE_PORT, TransportProtocol::Tcp)
            .with_port(JGROUPS_TCP_PORT, TransportProtocol::Tcp)
            .with_port(JGROUPS_TCP_FD_PORT, TransportProtocol::Tcp)
            .with_port(JGROUPS_UDP_PORT, TransportProtocol::Udp)
            .with_port(JGROUPS_UDP_FD_PORT, TransportProtocol::Udp);

        container.memory = Some(memory_limit);
        container.memory_reservation = Some(memory_reservation);
        container.log_configuration = Some(logging.clone());
        Ok(container)
    }
}
