//! CloudFormation template model
//!
//! Synthesis produces a single [`Template`]: a deterministic map of logical
//! ids to [`Resource`]s plus named [`Output`]s. Resources carry untyped
//! `serde_json::Value` properties, the same way manifests elsewhere in the
//! crate are built with `json!` and only typed where structure matters.
//!
//! Resources are never added to a template directly; they go through a
//! [`Scope`], which derives logical ids from the construct path and rejects
//! duplicates. The template remembers which path produced each logical id, so
//! two paths that flatten to the same id are an error rather than a silent
//! merge.

pub mod intrinsic;
mod scope;

pub use scope::Scope;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// CloudFormation template format version
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// A synthesized CloudFormation template
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    /// Format version, always [`TEMPLATE_FORMAT_VERSION`]
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Resources keyed by logical id
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
    /// Outputs keyed by logical id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
    /// Construct path that produced each logical id
    #[serde(skip)]
    construct_paths: BTreeMap<String, Vec<String>>,
}

impl Template {
    /// Create an empty template
    pub fn new() -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            ..Default::default()
        }
    }

    /// Set the template description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Open the root scope of this template
    pub fn root(&mut self) -> Scope<'_> {
        Scope::root(self)
    }

    /// Look up a resource by logical id
    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// Look up an output by logical id
    pub fn output(&self, logical_id: &str) -> Option<&Output> {
        self.outputs.get(logical_id)
    }

    /// All resources of the given CloudFormation type, in logical id order
    pub fn resources_of_type<'a>(
        &'a self,
        type_: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.type_ == type_)
    }

    /// Number of resources of the given CloudFormation type
    pub fn count_of_type(&self, type_: &str) -> usize {
        self.resources_of_type(type_).count()
    }

    /// Serialize the template to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize the template to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// A single CloudFormation resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    /// Resource type (e.g., "AWS::ECS::Service")
    #[serde(rename = "Type")]
    pub type_: String,
    /// Resource properties (untyped)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
    /// Logical ids this resource must be created after
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// What happens to the physical resource when it leaves the stack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    /// What happens to the physical resource when an update replaces it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
}

impl Resource {
    /// Create a resource with no properties
    pub fn new(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            properties: Value::Null,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Set both the deletion and update-replace policy (e.g., "Snapshot", "Retain")
    pub fn with_retention_policy(mut self, policy: impl Into<String>) -> Self {
        let policy = policy.into();
        self.deletion_policy = Some(policy.clone());
        self.update_replace_policy = Some(policy);
        self
    }

    /// Set the properties for this resource
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Add an explicit dependency on another logical id
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let id = logical_id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Read a top-level property
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// A template output
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    /// Output value (literal or intrinsic)
    pub value: Value,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Output {
    /// Create an output with the given value
    pub fn new(value: Value) -> Self {
        Self {
            value,
            description: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_template_has_format_version() {
        let template = Template::new();
        assert_eq!(template.format_version, "2010-09-09");
        assert!(template.resources.is_empty());
    }

    #[test]
    fn serializes_cloudformation_shape() {
        let mut template = Template::new().with_description("test");
        template.resources.insert(
            "Bucket".to_string(),
            Resource::new("AWS::S3::Bucket")
                .with_properties(json!({ "BucketName": "b" }))
                .depends_on("Other"),
        );
        template
            .outputs
            .insert("Name".to_string(), Output::new(json!("b")));

        let value: Value = serde_json::from_str(&template.to_json().unwrap()).unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Description"], "test");
        assert_eq!(value["Resources"]["Bucket"]["Type"], "AWS::S3::Bucket");
        assert_eq!(value["Resources"]["Bucket"]["Properties"]["BucketName"], "b");
        assert_eq!(value["Resources"]["Bucket"]["DependsOn"], json!(["Other"]));
        assert_eq!(value["Outputs"]["Name"]["Value"], "b");
    }

    #[test]
    fn empty_properties_and_dependencies_are_omitted() {
        let mut template = Template::new();
        template
            .resources
            .insert("Cluster".to_string(), Resource::new("AWS::ECS::Cluster"));

        let value: Value = serde_json::from_str(&template.to_json().unwrap()).unwrap();
        let cluster = value["Resources"]["Cluster"].as_object().unwrap();
        assert!(!cluster.contains_key("Properties"));
        assert!(!cluster.contains_key("DependsOn"));
        assert!(!value.as_object().unwrap().contains_key("Outputs"));
    }

    #[test]
    fn depends_on_is_deduplicated() {
        let resource = Resource::new("AWS::ECS::Service")
            .depends_on("Listener")
            .depends_on("Listener");
        assert_eq!(resource.depends_on, vec!["Listener".to_string()]);
    }

    #[test]
    fn counts_resources_by_type() {
        let mut template = Template::new();
        for id in ["A", "B"] {
            template
                .resources
                .insert(id.to_string(), Resource::new("AWS::EC2::Subnet"));
        }
        template
            .resources
            .insert("C".to_string(), Resource::new("AWS::EC2::VPC"));

        assert_eq!(template.count_of_type("AWS::EC2::Subnet"), 2);
        assert_eq!(template.count_of_type("AWS::EC2::VPC"), 1);
        assert_eq!(template.count_of_type("AWS::ECS::Service"), 0);
    }

    #[test]
    fn yaml_output_round_trips_type() {
        let mut template = Template::new();
        template
            .resources
            .insert("Vpc".to_string(), Resource::new("AWS::EC2::VPC"));
        let yaml = template.to_yaml().unwrap();
        assert!(yaml.contains("AWS::EC2::VPC"));
        let parsed: Template = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, template);
    }
}
