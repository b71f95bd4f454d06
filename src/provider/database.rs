//! Database providers
//!
//! A database provider hands back a [`DatabaseInfo`]: the Secrets Manager
//! secret holding the connection credentials in the standard RDS JSON shape
//! (`host`, `port`, `username`, `password`, `dbname`), the Keycloak vendor
//! tag the engine maps to, and optionally a [`Connectable`] so the service
//! can be allowed in on the database's default port.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{DatabaseProvider, VpcInfo};
use crate::network::{self, Connectable, SubnetSelection};
use crate::template::{intrinsic, Resource, Scope};
use crate::workload::DatabaseVendor;
use crate::{Error, Result};

/// Characters RDS rejects in generated master passwords
const EXCLUDED_PASSWORD_CHARACTERS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

/// Aurora capacity units accepted by serverless v1 clusters
const VALID_CAPACITY_UNITS: [u32; 10] = [1, 2, 4, 8, 16, 32, 64, 128, 256, 384];

/// Handle to a Secrets Manager secret
#[derive(Clone, Debug, PartialEq)]
pub struct SecretRef {
    /// Secret ARN (literal or intrinsic)
    pub arn: Value,
}

impl SecretRef {
    /// Wrap a secret ARN
    pub fn new(arn: Value) -> Self {
        Self { arn }
    }

    /// Secret from a literal ARN
    pub fn from_arn(arn: impl Into<String>) -> Self {
        Self::new(Value::String(arn.into()))
    }

    /// `valueFrom` for an ECS container secret reading one JSON key
    pub fn field(&self, key: &str) -> Value {
        intrinsic::join("", vec![self.arn.clone(), json!(format!(":{key}::"))])
    }

    /// Dynamic reference to one JSON key, for resource properties
    pub fn resolve(&self, key: &str) -> Value {
        intrinsic::resolve_secret(self.arn.clone(), key)
    }
}

/// Information needed to connect to the database
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseInfo {
    /// Credentials in the standard RDS JSON format; only h2 runs without
    pub credentials: Option<SecretRef>,
    /// Keycloak vendor tag for the engine
    pub vendor: DatabaseVendor,
    /// Lets the service open the database's default port to itself
    pub connectable: Option<Connectable>,
}

/// RDS engine family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum EngineFamily {
    Mysql,
    Postgresql,
    Mariadb,
    SqlServer,
    Oracle,
}

impl fmt::Display for EngineFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mysql => "MYSQL",
            Self::Postgresql => "POSTGRESQL",
            Self::Mariadb => "MARIADB",
            Self::SqlServer => "SQLSERVER",
            Self::Oracle => "ORACLE",
        };
        f.write_str(name)
    }
}

/// Map an engine family to the Keycloak vendor that speaks to it
pub fn map_engine_to_vendor(family: EngineFamily) -> Result<DatabaseVendor> {
    match family {
        EngineFamily::Mysql => Ok(DatabaseVendor::Mysql),
        EngineFamily::Postgresql => Ok(DatabaseVendor::Postgres),
        EngineFamily::Mariadb => Ok(DatabaseVendor::Mariadb),
        other => Err(Error::unsupported(format!("Unknown engine family: {other}"))),
    }
}

/// Engine of an Aurora cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterEngine {
    /// Aurora MySQL (5.7 compatible)
    #[default]
    AuroraMysql,
    /// Aurora PostgreSQL
    AuroraPostgresql,
}

impl ClusterEngine {
    /// CloudFormation `Engine` value
    pub fn engine(&self) -> &'static str {
        match self {
            Self::AuroraMysql => "aurora-mysql",
            Self::AuroraPostgresql => "aurora-postgresql",
        }
    }

    /// Engine version pinned for serverless v1, when the engine needs one
    fn serverless_version(&self) -> Option<&'static str> {
        match self {
            Self::AuroraMysql => None,
            Self::AuroraPostgresql => Some("11.13"),
        }
    }

    /// Engine family, used to pick the Keycloak vendor
    pub fn family(&self) -> EngineFamily {
        match self {
            Self::AuroraMysql => EngineFamily::Mysql,
            Self::AuroraPostgresql => EngineFamily::Postgresql,
        }
    }

    /// Port the cluster listens on
    pub fn default_port(&self) -> u16 {
        match self {
            Self::AuroraMysql => 3306,
            Self::AuroraPostgresql => 5432,
        }
    }
}

/// Engine and version of a single database instance
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "engine", rename_all = "kebab-case")]
#[allow(missing_docs)]
pub enum InstanceEngine {
    Mysql {
        #[serde(default)]
        version: Option<String>,
    },
    Postgres {
        #[serde(default)]
        version: Option<String>,
    },
    Mariadb {
        #[serde(default)]
        version: Option<String>,
    },
    SqlserverEx {
        #[serde(default)]
        version: Option<String>,
    },
    OracleSe2 {
        #[serde(default)]
        version: Option<String>,
    },
}

impl Default for InstanceEngine {
    fn default() -> Self {
        Self::Mysql {
            version: Some("8.0".to_string()),
        }
    }
}

impl InstanceEngine {
    /// CloudFormation `Engine` value
    pub fn engine(&self) -> &'static str {
        match self {
            Self::Mysql { .. } => "mysql",
            Self::Postgres { .. } => "postgres",
            Self::Mariadb { .. } => "mariadb",
            Self::SqlserverEx { .. } => "sqlserver-ex",
            Self::OracleSe2 { .. } => "oracle-se2",
        }
    }

    /// Engine version, falling back to a per-engine default
    pub fn version(&self) -> &str {
        let (version, default) = match self {
            Self::Mysql { version } => (version, "8.0"),
            Self::Postgres { version } => (version, "13"),
            Self::Mariadb { version } => (version, "10.5"),
            Self::SqlserverEx { version } => (version, "15.00"),
            Self::OracleSe2 { version } => (version, "19"),
        };
        version.as_deref().unwrap_or(default)
    }

    /// Engine family, used to pick the Keycloak vendor
    pub fn family(&self) -> EngineFamily {
        match self {
            Self::Mysql { .. } => EngineFamily::Mysql,
            Self::Postgres { .. } => EngineFamily::Postgresql,
            Self::Mariadb { .. } => EngineFamily::Mariadb,
            Self::SqlserverEx { .. } => EngineFamily::SqlServer,
            Self::OracleSe2 { .. } => EngineFamily::Oracle,
        }
    }

    /// Port the instance listens on
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Mysql { .. } | Self::Mariadb { .. } => 3306,
            Self::Postgres { .. } => 5432,
            Self::SqlserverEx { .. } => 1433,
            Self::OracleSe2 { .. } => 1521,
        }
    }
}

/// Serverless v1 scaling options
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessScaling {
    /// Minutes of inactivity before pausing; `None` never pauses
    #[serde(default = "default_auto_pause_minutes")]
    pub auto_pause_minutes: Option<u32>,
    /// Minimum Aurora capacity units
    #[serde(default = "default_capacity")]
    pub min_capacity: u32,
    /// Maximum Aurora capacity units
    #[serde(default = "default_capacity")]
    pub max_capacity: u32,
}

fn default_auto_pause_minutes() -> Option<u32> {
    Some(5)
}

fn default_capacity() -> u32 {
    1
}

impl Default for ServerlessScaling {
    fn default() -> Self {
        Self {
            auto_pause_minutes: default_auto_pause_minutes(),
            min_capacity: default_capacity(),
            max_capacity: default_capacity(),
        }
    }
}

impl ServerlessScaling {
    fn validate(&self) -> Result<()> {
        for capacity in [self.min_capacity, self.max_capacity] {
            if !VALID_CAPACITY_UNITS.contains(&capacity) {
                return Err(Error::validation(format!(
                    "{capacity} is not a valid Aurora capacity unit"
                )));
            }
        }
        if self.min_capacity > self.max_capacity {
            return Err(Error::validation(format!(
                "minimum capacity {} exceeds maximum capacity {}",
                self.min_capacity, self.max_capacity
            )));
        }
        if let Some(minutes) = self.auto_pause_minutes {
            if minutes == 0 || minutes > 24 * 60 {
                return Err(Error::validation(format!(
                    "auto pause must be between 1 minute and 1 day, got {minutes} minutes"
                )));
            }
        }
        Ok(())
    }

    fn properties(&self) -> Value {
        let mut scaling = json!({
            "AutoPause": self.auto_pause_minutes.is_some(),
            "MinCapacity": self.min_capacity,
            "MaxCapacity": self.max_capacity
        });
        if let Some(minutes) = self.auto_pause_minutes {
            scaling["SecondsUntilAutoPause"] = json!(minutes * 60);
        }
        scaling
    }
}

/// Provides a serverless Aurora database cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerlessAuroraDatabase {
    /// Cluster engine (default aurora-mysql)
    pub engine: ClusterEngine,
    /// Scaling (default 5 minute auto pause, 1 ACU)
    pub scaling: ServerlessScaling,
    /// Subnets to place the cluster in
    pub subnets: SubnetSelection,
}

impl DatabaseProvider for ServerlessAuroraDatabase {
    fn bind(&self, scope: &mut Scope<'_>, vpc: &VpcInfo) -> Result<DatabaseInfo> {
        let vendor = map_engine_to_vendor(self.engine.family())?;
        self.scaling.validate()?;
        let subnet_ids = vpc.subnets(self.subnets)?;

        let mut db = scope.child("Database");
        let parts = add_database_base(&mut db, vpc, subnet_ids, "serverless cluster")?;

        let mut properties = json!({
            "Engine": self.engine.engine(),
            "EngineMode": "serverless",
            "DBSubnetGroupName": intrinsic::reference(&parts.subnet_group_id),
            "VpcSecurityGroupIds": [network::group_id(&parts.security_group_id)],
            "MasterUsername": parts.secret.resolve("username"),
            "MasterUserPassword": parts.secret.resolve("password"),
            "ScalingConfiguration": self.scaling.properties(),
            "StorageEncrypted": true,
            "CopyTagsToSnapshot": true
        });
        if let Some(version) = self.engine.serverless_version() {
            properties["EngineVersion"] = json!(version);
        }
        let cluster_id = db.add_resource(
            "Resource",
            Resource::new("AWS::RDS::DBCluster")
                .with_properties(properties)
                .with_retention_policy("Snapshot"),
        )?;
        info!(
            provider = "serverless-aurora",
            logical_id = %cluster_id,
            engine = self.engine.engine(),
            "creating database cluster"
        );

        let credentials = attach_secret(&mut db, &parts.secret, &cluster_id, "AWS::RDS::DBCluster")?;
        Ok(DatabaseInfo {
            credentials: Some(credentials),
            vendor,
            connectable: Some(
                Connectable::new(network::group_id(&parts.security_group_id))
                    .with_default_port(self.engine.default_port()),
            ),
        })
    }
}

/// Provides a single RDS database instance
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseInstance {
    /// Instance engine (default mysql 8.0)
    pub engine: InstanceEngine,
    /// Instance type without the `db.` prefix (default t2.micro)
    pub instance_type: String,
    /// Allocated storage in GiB
    pub allocated_storage: u32,
    /// Subnets to place the instance in
    pub subnets: SubnetSelection,
}

impl Default for DatabaseInstance {
    fn default() -> Self {
        Self {
            engine: InstanceEngine::default(),
            instance_type: "t2.micro".to_string(),
            allocated_storage: 100,
            subnets: SubnetSelection::default(),
        }
    }
}

impl DatabaseProvider for DatabaseInstance {
    fn bind(&self, scope: &mut Scope<'_>, vpc: &VpcInfo) -> Result<DatabaseInfo> {
        let vendor = map_engine_to_vendor(self.engine.family())?;
        if self.allocated_storage == 0 {
            return Err(Error::validation("allocated storage must be greater than zero"));
        }
        let subnet_ids = vpc.subnets(self.subnets)?;

        let mut db = scope.child("Database");
        let parts = add_database_base(&mut db, vpc, subnet_ids, "database instance")?;

        let instance_id = db.add_resource(
            "Resource",
            Resource::new("AWS::RDS::DBInstance")
                .with_properties(json!({
                    "Engine": self.engine.engine(),
                    "EngineVersion": self.engine.version(),
                    "DBInstanceClass": format!("db.{}", self.instance_type),
                    "AllocatedStorage": self.allocated_storage.to_string(),
                    "StorageType": "gp2",
                    "DBSubnetGroupName": intrinsic::reference(&parts.subnet_group_id),
                    "VPCSecurityGroups": [network::group_id(&parts.security_group_id)],
                    "MasterUsername": parts.secret.resolve("username"),
                    "MasterUserPassword": parts.secret.resolve("password"),
                    "PubliclyAccessible": self.subnets == SubnetSelection::Public,
                    "CopyTagsToSnapshot": true
                }))
                .with_retention_policy("Snapshot"),
        )?;
        info!(
            provider = "database-instance",
            logical_id = %instance_id,
            engine = self.engine.engine(),
            version = self.engine.version(),
            "creating database instance"
        );

        let credentials =
            attach_secret(&mut db, &parts.secret, &instance_id, "AWS::RDS::DBInstance")?;
        Ok(DatabaseInfo {
            credentials: Some(credentials),
            vendor,
            connectable: Some(
                Connectable::new(network::group_id(&parts.security_group_id))
                    .with_default_port(self.engine.default_port()),
            ),
        })
    }
}

/// Provides caller-supplied database information as is
#[derive(Clone, Debug, PartialEq)]
pub struct ExistingDatabase {
    info: DatabaseInfo,
}

impl ExistingDatabase {
    /// Wrap raw database information
    pub fn new(info: DatabaseInfo) -> Self {
        Self { info }
    }
}

impl DatabaseProvider for ExistingDatabase {
    fn bind(&self, _scope: &mut Scope<'_>, _vpc: &VpcInfo) -> Result<DatabaseInfo> {
        info!(provider = "existing-database", vendor = %self.info.vendor, "providing database");
        Ok(self.info.clone())
    }
}

struct DatabaseBase {
    subnet_group_id: String,
    security_group_id: String,
    secret: SecretRef,
}

/// Subnet group, security group and generated credentials shared by every
/// database the crate creates
fn add_database_base(
    db: &mut Scope<'_>,
    vpc: &VpcInfo,
    subnet_ids: Vec<Value>,
    kind: &str,
) -> Result<DatabaseBase> {
    let path = db.path();
    let subnet_group_id = db.add_resource(
        "Subnets",
        Resource::new("AWS::RDS::DBSubnetGroup").with_properties(json!({
            "DBSubnetGroupDescription": format!("Subnets for {kind} {path}"),
            "SubnetIds": subnet_ids
        })),
    )?;
    let security_group_id = network::create_security_group(
        db,
        "SecurityGroup",
        &format!("RDS security group for {path}"),
        vpc.vpc_id.clone(),
    )?;
    let secret_id = db.add_resource(
        "Secret",
        Resource::new("AWS::SecretsManager::Secret")
            .with_properties(json!({
                "Description": format!("Generated credentials for {path}"),
                "GenerateSecretString": {
                    "SecretStringTemplate": "{\"username\":\"admin\"}",
                    "GenerateStringKey": "password",
                    "PasswordLength": 30,
                    "ExcludeCharacters": EXCLUDED_PASSWORD_CHARACTERS
                }
            }))
            .with_retention_policy("Delete"),
    )?;
    Ok(DatabaseBase {
        subnet_group_id,
        security_group_id,
        secret: SecretRef::new(intrinsic::reference(&secret_id)),
    })
}

/// Attach the secret to the database so Secrets Manager fills in host and port
///
/// The returned handle references the attachment, which makes consumers wait
/// until the secret has been completed.
fn attach_secret(
    db: &mut Scope<'_>,
    secret: &SecretRef,
    target_id: &str,
    target_type: &str,
) -> Result<SecretRef> {
    let attachment_id = db.add_resource(
        "SecretAttachment",
        Resource::new("AWS::SecretsManager::SecretTargetAttachment").with_properties(json!({
            "SecretId": secret.arn,
            "TargetId": intrinsic::reference(target_id),
            "TargetType": target_type
        })),
    )?;
    Ok(SecretRef::new(intrinsic::reference(&attachment_id)))
}
