//! Integration tests for YAML deployments
//!
//! These tests tell the story of an operator who writes a deployment file,
//! runs synthesis, and hands the template to CloudFormation.

use serde_json::json;

use keycloak_cluster::config::DeploymentConfig;
use keycloak_cluster::template::Template;
use keycloak_cluster::Error;

use super::helpers::{containers, deployment, env, fixture, synthesize};

// =============================================================================
// Story: The Simplest Deployment
// =============================================================================

/// An empty deployment file yields a complete, self-contained cluster
#[test]
fn story_empty_deployment_builds_everything() {
    let template = synthesize("minimal.yaml");

    for type_ in [
        "AWS::EC2::VPC",
        "AWS::RDS::DBCluster",
        "AWS::ECS::Cluster",
        "AWS::ServiceDiscovery::PrivateDnsNamespace",
        "AWS::ServiceDiscovery::Service",
        "AWS::ECS::TaskDefinition",
        "AWS::ECS::Service",
        "AWS::ElasticLoadBalancingV2::LoadBalancer",
    ] {
        assert_eq!(template.count_of_type(type_), 1, "expected one {type_}");
    }

    let url = template.output("KeycloakLoadBalancerHTTPUrl").unwrap();
    assert_eq!(url.value["Fn::Sub"][0], "http://${HostName}/");
}

/// The default database is MySQL, so the task runs a preparation container
/// before Keycloak starts
#[test]
fn story_default_database_is_prepared_before_keycloak_starts() {
    let template = synthesize("minimal.yaml");
    let containers = containers(&template, "KeycloakTaskDefinition");

    let keycloak = containers.iter().find(|c| c["Name"] == "keycloak").unwrap();
    let ensure = containers
        .iter()
        .find(|c| c["Name"] == "ensure-mysql-database")
        .unwrap();

    assert_eq!(env(keycloak, "DB_VENDOR"), Some(&json!("mysql")));
    assert_eq!(env(keycloak, "DB_NAME"), Some(&json!("keycloak")));
    assert_eq!(ensure["Essential"], false);
    assert_eq!(
        keycloak["DependsOn"],
        json!([{ "ContainerName": "ensure-mysql-database", "Condition": "COMPLETE" }])
    );
}

/// The template is deterministic: the same file always synthesizes to the
/// same bytes
#[test]
fn story_synthesis_is_deterministic() {
    let first = synthesize("production.yaml").to_json().unwrap();
    let second = synthesize("production.yaml").to_json().unwrap();
    assert_eq!(first, second);

    let parsed: Template = serde_json::from_str(&first).unwrap();
    assert_eq!(parsed.format_version, "2010-09-09");
}

// =============================================================================
// Story: A Production Deployment
// =============================================================================

/// A tuned deployment on existing networking, Postgres, spot capacity and
/// HTTPS with an HTTP redirect
#[test]
fn story_production_deployment() {
    let template = synthesize("production.yaml");

    assert_eq!(
        template.description.as_deref(),
        Some("Keycloak for sso.example.com")
    );
    assert_eq!(template.count_of_type("AWS::EC2::VPC"), 0);

    let database = template.resource("SsoDatabaseResource").unwrap();
    assert_eq!(database.type_, "AWS::RDS::DBInstance");
    assert_eq!(database.properties["Engine"], "postgres");
    assert_eq!(database.properties["DBInstanceClass"], "db.r5.large");

    let task = template.resource("SsoTaskDefinition").unwrap();
    assert_eq!(task.properties["Cpu"], "2048");
    assert_eq!(task.properties["Memory"], "4096");

    let containers = containers(&template, "SsoTaskDefinition");
    let keycloak = containers.iter().find(|c| c["Name"] == "keycloak").unwrap();
    assert_eq!(env(keycloak, "DB_VENDOR"), Some(&json!("postgres")));
    assert_eq!(env(keycloak, "DB_NAME"), Some(&json!("sso")));
    assert_eq!(env(keycloak, "KEYCLOAK_USER"), Some(&json!("root")));
    assert_eq!(env(keycloak, "CACHE_OWNERS_COUNT"), Some(&json!("2")));
    assert!(containers
        .iter()
        .any(|c| c["Name"] == "ensure-postgresql-database"));
}

#[test]
fn story_production_service_settings() {
    let template = synthesize("production.yaml");
    let service = template.resource("SsoService").unwrap();

    assert_eq!(service.properties["DesiredCount"], 2);
    assert_eq!(
        service.properties["DeploymentConfiguration"],
        json!({
            "MaximumPercent": 200,
            "MinimumHealthyPercent": 50,
            "DeploymentCircuitBreaker": { "Enable": true, "Rollback": true }
        })
    );
    assert!(service.properties.get("LaunchType").is_none());
    assert_eq!(
        service.properties["CapacityProviderStrategy"],
        json!([
            { "CapacityProvider": "FARGATE", "Weight": 1, "Base": 1 },
            { "CapacityProvider": "FARGATE_SPOT", "Weight": 3 }
        ])
    );
    assert_eq!(
        service.properties["NetworkConfiguration"]["AwsvpcConfiguration"]["Subnets"],
        json!(["subnet-priv-a", "subnet-priv-b"])
    );

    let target = template.resource("SsoServiceTaskCountTarget").unwrap();
    assert_eq!(target.properties["MinCapacity"], 2);
    assert_eq!(target.properties["MaxCapacity"], 6);
    let policy = template
        .resource("SsoServiceTaskCountTargetCpuScaling")
        .unwrap();
    assert_eq!(
        policy.properties["TargetTrackingScalingPolicyConfiguration"]["TargetValue"],
        60
    );
}

#[test]
fn story_production_redirects_http_to_https() {
    let template = synthesize("production.yaml");

    let redirect = template.resource("SsoLoadBalancerHTTP").unwrap();
    assert_eq!(
        redirect.properties["DefaultActions"][0]["RedirectConfig"],
        json!({
            "Protocol": "HTTPS",
            "Port": "443",
            "Host": "sso.example.com",
            "StatusCode": "HTTP_302"
        })
    );
    let https = template.resource("SsoLoadBalancerHTTPS").unwrap();
    assert_eq!(https.properties["Port"], 443);
    assert!(template.output("SsoLoadBalancerHTTPSUrl").is_some());
    assert!(template.output("SsoLoadBalancerHTTPUrl").is_none());

    let service = template.resource("SsoService").unwrap();
    assert_eq!(service.properties["HealthCheckGracePeriodSeconds"], 600);
    assert_eq!(
        service.properties["LoadBalancers"][0]["ContainerPort"],
        8443
    );
}

// =============================================================================
// Story: Rejected Deployments
// =============================================================================

/// Mixing port publishers with listener providers fails before anything is
/// synthesized
#[test]
fn story_conflicting_exposure_is_rejected() {
    let err = keycloak_cluster::synthesize(&deployment("conflict.yaml")).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(err
        .to_string()
        .contains("Cannot use both PortPublisher and ListenerProvider"));
}

#[test]
fn story_typo_in_document_is_a_serialization_error() {
    let err = DeploymentConfig::from_yaml("cluster:\n  type: fargate-spotty\n").unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
}

#[test]
fn story_invalid_sizing_is_rejected() {
    let config = DeploymentConfig::from_yaml("cpu: 256\nmemoryMiB: 8192\n").unwrap();
    let err = keycloak_cluster::synthesize(&config).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn story_fixtures_round_trip_through_yaml() {
    let original = deployment("production.yaml");
    let yaml = serde_yaml::to_string(&original).unwrap();
    assert_eq!(DeploymentConfig::from_yaml(&yaml).unwrap(), original);
    assert!(fixture("production.yaml").exists());
}
