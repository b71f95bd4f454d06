//! Integration tests for existing infrastructure
//!
//! These tests tell the story of a platform team that already runs a VPC,
//! a database, an ECS cluster and a Cloud Map namespace, and wants Keycloak
//! to join them instead of creating its own.

use serde_json::json;

use keycloak_cluster::network::Connectable;
use keycloak_cluster::provider::{
    ClusterEngine, ClusterInfo, DatabaseInfo, DatabaseProvider, ExistingCluster, ExistingDatabase,
    ExistingNamespace, ExistingVpc, ProviderDefaults, SecretRef, ServerlessAuroraDatabase,
};
use keycloak_cluster::config::DeploymentConfig;
use keycloak_cluster::template::Template;
use keycloak_cluster::workload::DatabaseVendor;
use keycloak_cluster::{Error, KeycloakCluster, KeycloakClusterProps};

use super::helpers::{containers, env};

// =============================================================================
// Test Fixtures
// =============================================================================

fn existing_vpc() -> ExistingVpc {
    ExistingVpc::new("vpc-shared")
        .with_public_subnets(["subnet-pub-a", "subnet-pub-b"])
        .with_private_subnets(["subnet-priv-a", "subnet-priv-b"])
}

fn existing_database(vendor: DatabaseVendor) -> ExistingDatabase {
    ExistingDatabase::new(DatabaseInfo {
        credentials: Some(SecretRef::from_arn(
            "arn:aws:secretsmanager:us-east-1:123456789012:secret:keycloak-db",
        )),
        vendor,
        connectable: Some(Connectable::new(json!("sg-database")).with_default_port(3306)),
    })
}

fn compose(props: KeycloakClusterProps) -> keycloak_cluster::Result<Template> {
    let mut template = Template::new();
    {
        let mut root = template.root();
        KeycloakCluster::new(&mut root, "Keycloak", props)?;
    }
    Ok(template)
}

// =============================================================================
// Story: Everything Already Exists
// =============================================================================

/// With every provider supplied, only Keycloak's own resources are created
#[test]
fn story_cluster_joins_existing_infrastructure() {
    let template = compose(KeycloakClusterProps {
        vpc: Some(Box::new(existing_vpc())),
        database: Some(Box::new(existing_database(DatabaseVendor::Mariadb))),
        cluster: Some(Box::new(ExistingCluster::new(ClusterInfo::new(json!(
            "platform"
        ))))),
        namespace: Some(Box::new(ExistingNamespace::new("ns-123", "internal.example.com"))),
        ..Default::default()
    })
    .unwrap();

    for type_ in [
        "AWS::EC2::VPC",
        "AWS::RDS::DBCluster",
        "AWS::RDS::DBInstance",
        "AWS::ECS::Cluster",
        "AWS::ServiceDiscovery::PrivateDnsNamespace",
    ] {
        assert_eq!(template.count_of_type(type_), 0, "unexpected {type_}");
    }

    let service = template.resource("KeycloakService").unwrap();
    assert_eq!(service.properties["Cluster"], "platform");

    let registry = template.resource("KeycloakServiceCloudmapService").unwrap();
    assert_eq!(registry.properties["DnsConfig"]["NamespaceId"], "ns-123");

    // The existing database lets the service in on its port
    let rule = template.resource("KeycloakDatabaseFromService").unwrap();
    assert_eq!(rule.properties["GroupId"], "sg-database");
    assert_eq!(rule.properties["FromPort"], 3306);
}

/// MariaDB is prepared with the MySQL client and discovery points at the
/// existing namespace
#[test]
fn story_mariadb_uses_mysql_preparation() {
    let template = compose(KeycloakClusterProps {
        vpc: Some(Box::new(existing_vpc())),
        database: Some(Box::new(existing_database(DatabaseVendor::Mariadb))),
        namespace: Some(Box::new(ExistingNamespace::new("ns-123", "internal.example.com"))),
        ..Default::default()
    })
    .unwrap();

    let containers = containers(&template, "KeycloakTaskDefinition");
    let keycloak = containers.iter().find(|c| c["Name"] == "keycloak").unwrap();
    assert_eq!(env(keycloak, "DB_VENDOR"), Some(&json!("mariadb")));

    let properties = env(keycloak, "JGROUPS_DISCOVERY_PROPERTIES").unwrap();
    assert_eq!(properties["Fn::Sub"][1]["ServiceNamespace"], "internal.example.com");

    let ensure = containers
        .iter()
        .find(|c| c["Name"] == "ensure-mysql-database")
        .unwrap();
    assert!(ensure["Image"].as_str().unwrap().starts_with("mysql"));
}

// =============================================================================
// Story: Changing the Defaults
// =============================================================================

/// Replacing a default factory changes what every deployment gets
#[test]
fn story_default_database_can_be_swapped() {
    fn aurora_postgres() -> Box<dyn DatabaseProvider> {
        Box::new(ServerlessAuroraDatabase {
            engine: ClusterEngine::AuroraPostgresql,
            ..Default::default()
        })
    }

    let template = compose(KeycloakClusterProps {
        defaults: ProviderDefaults {
            database: aurora_postgres,
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();

    let database = template.resource("KeycloakDatabaseResource").unwrap();
    assert_eq!(database.properties["Engine"], "aurora-postgresql");

    let rule = template.resource("KeycloakDatabaseFromService").unwrap();
    assert_eq!(rule.properties["FromPort"], 5432);

    let containers = containers(&template, "KeycloakTaskDefinition");
    assert!(containers
        .iter()
        .any(|c| c["Name"] == "ensure-postgresql-database"));
}

/// Reserved vendors are refused even when the database claims them
#[test]
fn story_reserved_vendor_is_unsupported() {
    let err = compose(KeycloakClusterProps {
        vpc: Some(Box::new(existing_vpc())),
        database: Some(Box::new(existing_database(DatabaseVendor::Oracle))),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

/// An existing VPC without private subnets cannot host the tasks
#[test]
fn story_vpc_without_private_subnets_is_rejected() {
    let err = compose(KeycloakClusterProps {
        vpc: Some(Box::new(
            ExistingVpc::new("vpc-public-only").with_public_subnets(["subnet-pub-a"]),
        )),
        database: Some(Box::new(existing_database(DatabaseVendor::Mysql))),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, Error::MissingDependency(_)));
}

// =============================================================================
// Story: Existing Database Without Credentials
// =============================================================================

fn existing_database_config(vendor: &str, extra: &str) -> DeploymentConfig {
    DeploymentConfig::from_yaml(&format!(
        r#"
vpc:
  type: existing
  vpcId: vpc-shared
  publicSubnetIds: [subnet-pub-a, subnet-pub-b]
  privateSubnetIds: [subnet-priv-a, subnet-priv-b]
database:
  type: existing
  vendor: {vendor}
{extra}"#
    ))
    .unwrap()
}

/// Every real database vendor needs a credential secret
#[test]
fn story_existing_database_without_secret_is_rejected() {
    for vendor in ["mysql", "mariadb", "postgres"] {
        let err = keycloak_cluster::synthesize(&existing_database_config(vendor, "")).unwrap_err();
        assert!(matches!(err, Error::MissingDependency(_)), "{vendor}: {err}");
        assert!(
            err.to_string()
                .contains(&format!("The {vendor} database vendor requires credentials")),
            "{err}"
        );
    }
}

/// An empty secret ARN counts as no secret at all
#[test]
fn story_existing_database_with_empty_secret_is_rejected() {
    let config = existing_database_config("postgres", "  secretArn: ''\n");
    let err = keycloak_cluster::synthesize(&config).unwrap_err();
    assert!(matches!(err, Error::MissingDependency(_)));
}

/// With a secret the same database is accepted and prepared
#[test]
fn story_existing_database_with_secret_is_prepared() {
    let config = existing_database_config(
        "postgres",
        "  secretArn: arn:aws:secretsmanager:us-east-1:123456789012:secret:keycloak-db\n",
    );
    let template = keycloak_cluster::synthesize(&config).unwrap();
    let containers = containers(&template, "KeycloakTaskDefinition");
    assert!(containers
        .iter()
        .any(|c| c["Name"] == "ensure-postgresql-database"));
}

/// h2 keeps everything in memory and needs no secret
#[test]
fn story_existing_h2_database_needs_no_secret() {
    let template = keycloak_cluster::synthesize(&existing_database_config("h2", "")).unwrap();
    let containers = containers(&template, "KeycloakTaskDefinition");
    assert_eq!(containers.len(), 1);
    assert_eq!(env(&containers[0], "DB_VENDOR"), Some(&json!("h2")));
}
