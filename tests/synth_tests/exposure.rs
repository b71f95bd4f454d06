//! Integration tests for publishing Keycloak's ports
//!
//! These tests tell the story of how Keycloak is reached from outside the
//! cluster: load balancers created for it, load balancers shared with other
//! applications, and the deprecated listener providers older deployments
//! still use.

use serde_json::json;

use keycloak_cluster::publish::{
    AddTargetPublisher, HttpAlbPublisher, HttpsListener, ListenerCondition, NlbPublisher,
};
use keycloak_cluster::config::DeploymentConfig;
use keycloak_cluster::template::Template;
use keycloak_cluster::{Error, KeycloakCluster, KeycloakClusterProps};

use super::helpers::synthesize;

const LOAD_BALANCER: &str = "AWS::ElasticLoadBalancingV2::LoadBalancer";
const TARGET_GROUP: &str = "AWS::ElasticLoadBalancingV2::TargetGroup";

fn synthesize_yaml(yaml: &str) -> keycloak_cluster::Result<Template> {
    keycloak_cluster::synthesize(&DeploymentConfig::from_yaml(yaml)?)
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
// Story: Network Load Balancer
// =============================================================================

/// Two NLB publishers with the default id share one load balancer
#[test]
fn story_nlb_publishers_share_a_load_balancer() {
    let template = synthesize("nlb.yaml");

    assert_eq!(template.count_of_type(LOAD_BALANCER), 1);
    let lb = template.resource("KeycloakLoadBalancer").unwrap();
    assert_eq!(lb.properties["Type"], "network");

    let http = template.resource("KeycloakLoadBalancerPort80").unwrap();
    assert_eq!(http.properties["Protocol"], "TCP");
    let https = template.resource("KeycloakLoadBalancerPort443").unwrap();
    assert_eq!(https.properties["Port"], 443);

    assert!(template.output("KeycloakLoadBalancerPort80Endpoint").is_some());
    assert!(template.output("KeycloakLoadBalancerPort443Endpoint").is_some());
}

/// Health checking can be switched off for one publisher only
#[test]
fn story_nlb_health_check_is_per_publisher() {
    let template = synthesize("nlb.yaml");
    let groups: Vec<_> = template.resources_of_type(TARGET_GROUP).collect();
    assert_eq!(groups.len(), 2);

    let enabled = groups
        .iter()
        .filter(|(_, group)| group.properties.get("HealthCheckEnabled").is_some())
        .count();
    assert_eq!(enabled, 1);
}

/// NLB traffic keeps the client address, so the container ports open to
/// the internet
#[test]
fn story_nlb_opens_container_ports_to_everyone() {
    let template = synthesize("nlb.yaml");
    let ingress: Vec<_> = template
        .resources_of_type("AWS::EC2::SecurityGroupIngress")
        .map(|(_, rule)| rule)
        .filter(|rule| rule.properties["FromPort"] == 8443)
        .collect();

    assert!(ingress.iter().any(|r| r.properties["CidrIp"] == "0.0.0.0/0"));
    assert!(ingress.iter().any(|r| r.properties["CidrIpv6"] == "::/0"));
}

// =============================================================================
// Story: Mixing Load Balancer Kinds
// =============================================================================

/// An ALB and an NLB cannot live under the same id
#[test]
fn story_alb_and_nlb_under_one_id_conflict() {
    let err = compose(KeycloakClusterProps {
        http_port_publisher: Some(Box::new(HttpAlbPublisher::default())),
        https_port_publisher: Some(Box::new(NlbPublisher::new(443))),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

/// Ids that only differ in punctuation name different load balancers, but
/// they would share a logical id, so the deployment is refused
#[test]
fn story_load_balancer_ids_differing_in_punctuation_are_refused() {
    let err = synthesize_yaml(
        r#"
httpPortPublisher:
  type: nlb
  id: Public-Nlb
  port: 80
httpsPortPublisher:
  type: nlb
  id: PublicNlb
  port: 443
"#,
    )
    .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    let message = err.to_string();
    assert!(message.contains("Keycloak/Public-Nlb"), "{message}");
    assert!(message.contains("Keycloak/PublicNlb"), "{message}");
}

/// The same id spelled the same way is still shared
#[test]
fn story_equal_load_balancer_ids_share_one() {
    let template = synthesize_yaml(
        r#"
httpPortPublisher:
  type: nlb
  id: Public-Nlb
  port: 80
httpsPortPublisher:
  type: nlb
  id: Public-Nlb
  port: 443
"#,
    )
    .unwrap();

    assert_eq!(template.count_of_type(LOAD_BALANCER), 1);
    assert!(template.resource("KeycloakPublicNlb").is_some());
}

/// Under different ids they simply become two load balancers
#[test]
fn story_alb_and_nlb_under_different_ids() {
    let template = compose(KeycloakClusterProps {
        http_port_publisher: Some(Box::new(HttpAlbPublisher::default())),
        admin_console_port_publisher: Some(Box::new(NlbPublisher {
            id: "Admin".to_string(),
            ..NlbPublisher::new(9990)
        })),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(template.count_of_type(LOAD_BALANCER), 2);
    assert!(template.resource("KeycloakAdminPort9990").is_some());
}

// =============================================================================
// Story: Shared Application Load Balancer
// =============================================================================

/// Publishing onto an existing listener adds only a target group and a rule
#[test]
fn story_existing_listener_gets_a_rule() {
    let template = compose(KeycloakClusterProps {
        http_port_publisher: Some(Box::new(AddTargetPublisher {
            listener_arn: "arn:aws:elasticloadbalancing:us-east-1:1:listener/app/shared/a/b"
                .to_string(),
            conditions: vec![ListenerCondition::HostHeaders(vec![
                "sso.example.com".to_string()
            ])],
            priority: Some(5),
        })),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(template.count_of_type(LOAD_BALANCER), 0);
    let rule = template.resource("KeycloakKeycloak8080Rule").unwrap();
    assert_eq!(rule.properties["Priority"], 5);
    assert_eq!(
        rule.properties["Conditions"],
        json!([{
            "Field": "host-header",
            "HostHeaderConfig": { "Values": ["sso.example.com"] }
        }])
    );
}

/// A rule without conditions would swallow every request on the listener
#[test]
fn story_existing_listener_needs_a_condition() {
    let err = compose(KeycloakClusterProps {
        http_port_publisher: Some(Box::new(AddTargetPublisher {
            listener_arn: "arn:listener".to_string(),
            conditions: Vec::new(),
            priority: None,
        })),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

/// Rule priorities outside 1..=50000 are refused for both publisher families
#[test]
fn story_listener_rule_priority_must_be_in_range() {
    for priority in [0, 50_001] {
        for exposure in ["httpPortPublisher:\n  type: add-target", "listenerProvider:\n  type: existing"] {
            let yaml = format!(
                "{exposure}\n  listenerArn: arn:listener\n  conditions:\n    - hostHeaders: [sso.example.com]\n  priority: {priority}\n"
            );
            let err = synthesize_yaml(&yaml).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{exposure}: {err}");
            assert!(err.to_string().contains("between 1 and 50000"), "{err}");
        }
    }
}

/// The bounds themselves are valid priorities
#[test]
fn story_listener_rule_priority_bounds_are_accepted() {
    for priority in [1, 50_000] {
        let yaml = format!(
            "httpPortPublisher:\n  type: add-target\n  listenerArn: arn:listener\n  conditions:\n    - hostHeaders: [sso.example.com]\n  priority: {priority}\n"
        );
        let template = synthesize_yaml(&yaml).unwrap();
        let rule = template.resource("KeycloakKeycloak8080Rule").unwrap();
        assert_eq!(rule.properties["Priority"], priority);
    }
}

// =============================================================================
// Story: Deprecated Listener Providers
// =============================================================================

/// Older deployments attach to an existing listener through the listener
/// provider family
#[test]
fn story_legacy_existing_listener() {
    let template = synthesize("legacy.yaml");
    assert_eq!(template.count_of_type(LOAD_BALANCER), 0);

    let rule = template.resource("KeycloakKeycloak8080Rule").unwrap();
    assert_eq!(rule.properties["Priority"], 20);
    let service = template.resource("KeycloakService").unwrap();
    assert!(service
        .depends_on
        .contains(&"KeycloakKeycloak8080Rule".to_string()));
}

/// A legacy HTTPS listener replaces the default HTTP one
#[test]
fn story_legacy_https_listener_disables_http() {
    let template = compose(KeycloakClusterProps {
        https_listener_provider: Some(Box::new(HttpsListener {
            certificates: vec!["arn:aws:acm:us-east-1:1:certificate/abc".to_string()],
        })),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(template.count_of_type(LOAD_BALANCER), 1);
    assert!(template.resource("KeycloakLoadBalancerHTTPS").is_some());
    assert!(template.resource("KeycloakLoadBalancerHTTP").is_none());
    let url = template.output("KeycloakLoadBalancerUrl").unwrap();
    assert_eq!(url.value["Fn::Sub"][0], "https://${HostName}/");
}
