//! Construct scopes over a template
//!
//! A [`Scope`] is a path inside the construct tree. Logical ids are the path
//! components concatenated after stripping anything that is not ASCII
//! alphanumeric, so `Keycloak/LoadBalancer/HTTP` becomes
//! `KeycloakLoadBalancerHTTP`. Looking a child up by id is how load
//! balancers are shared between publishers.
//!
//! Stripping is lossy: `Public-Nlb` and `PublicNlb` flatten to the same
//! logical id. Lookups only match the construct path that created a resource,
//! and adding a resource whose logical id belongs to another path fails.

use serde_json::Value;
use tracing::debug;

use super::{Output, Resource, Template};
use crate::{Error, Result};

/// A mutable view of a template rooted at a construct path
#[derive(Debug)]
pub struct Scope<'t> {
    template: &'t mut Template,
    path: Vec<String>,
}

impl<'t> Scope<'t> {
    /// The root scope (empty path)
    pub fn root(template: &'t mut Template) -> Self {
        Self {
            template,
            path: Vec::new(),
        }
    }

    /// Open a child scope; nothing is written to the template
    pub fn child(&mut self, id: &str) -> Scope<'_> {
        let mut path = self.path.clone();
        path.push(id.to_string());
        Scope {
            template: &mut *self.template,
            path,
        }
    }

    /// Construct path of this scope, `/` separated
    pub fn path(&self) -> String {
        self.path.join("/")
    }

    /// Logical id a child with the given id would get
    pub fn logical_id(&self, id: &str) -> String {
        self.path
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(id))
            .flat_map(|part| part.chars().filter(char::is_ascii_alphanumeric))
            .collect()
    }

    /// Logical id `id` would get inside the child scope `child`
    pub fn child_logical_id(&self, child: &str, id: &str) -> String {
        self.logical_id(&format!("{child}{id}"))
    }

    fn construct_path(&self, id: &str) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(id.to_string());
        path
    }

    /// The resource created under `id` in this scope, if that path owns its
    /// logical id
    fn owned(&self, id: &str) -> Option<&Resource> {
        let logical_id = self.logical_id(id);
        let resource = self.template.resources.get(&logical_id)?;
        match self.template.construct_paths.get(&logical_id) {
            Some(owner) if *owner != self.construct_path(id) => None,
            _ => Some(resource),
        }
    }

    /// Logical id of this scope itself
    pub fn own_logical_id(&self) -> String {
        self.path
            .iter()
            .flat_map(|part| part.chars().filter(char::is_ascii_alphanumeric))
            .collect()
    }

    /// Add a resource under `id`, returning its logical id
    ///
    /// Fails when the id is already taken in the template.
    pub fn add_resource(&mut self, id: &str, resource: Resource) -> Result<String> {
        let logical_id = self.logical_id(id);
        if logical_id.is_empty() {
            return Err(Error::validation(format!(
                "construct id '{id}' does not produce a valid logical id"
            )));
        }
        let path = self.construct_path(id);
        if self.template.resources.contains_key(&logical_id) {
            return Err(match self.template.construct_paths.get(&logical_id) {
                Some(owner) if *owner != path => Error::validation(format!(
                    "construct '{}' and construct '{}' both map to logical id '{logical_id}'",
                    path.join("/"),
                    owner.join("/")
                )),
                _ => Error::validation(format!(
                    "There is already a construct with name '{id}' in '{}'",
                    self.display_path()
                )),
            });
        }
        debug!(logical_id = %logical_id, type_ = %resource.type_, "adding resource");
        self.template.resources.insert(logical_id.clone(), resource);
        self.template
            .construct_paths
            .insert(logical_id.clone(), path);
        Ok(logical_id)
    }

    /// Add an output under `id`, returning its logical id
    pub fn add_output(&mut self, id: &str, output: Output) -> Result<String> {
        let logical_id = self.logical_id(id);
        if self.template.outputs.contains_key(&logical_id) {
            return Err(Error::validation(format!(
                "There is already an output with name '{id}' in '{}'",
                self.display_path()
            )));
        }
        self.template.outputs.insert(logical_id.clone(), output);
        Ok(logical_id)
    }

    /// Returns true when a child resource with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.owned(id).is_some()
    }

    /// Find a child resource by id
    pub fn find(&self, id: &str) -> Option<&Resource> {
        self.owned(id)
    }

    /// Find a resource anywhere in the template by logical id
    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.template.resources.get(logical_id)
    }

    /// Mutable access to a resource anywhere in the template by logical id
    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut Resource> {
        self.template.resources.get_mut(logical_id)
    }

    /// Make `logical_id` depend on `on`
    pub fn add_dependency(&mut self, logical_id: &str, on: &str) -> Result<()> {
        let resource = self.resource_mut(logical_id).ok_or_else(|| {
            Error::validation(format!("cannot add dependency to unknown resource '{logical_id}'"))
        })?;
        if !resource.depends_on.iter().any(|d| d == on) {
            resource.depends_on.push(on.to_string());
        }
        Ok(())
    }

    /// Append a value to an array property of an existing resource
    pub fn push_property(&mut self, logical_id: &str, property: &str, value: Value) -> Result<()> {
        let resource = self.resource_mut(logical_id).ok_or_else(|| {
            Error::validation(format!("cannot modify unknown resource '{logical_id}'"))
        })?;
        let props = resource
            .properties
            .as_object_mut()
            .ok_or_else(|| Error::validation(format!("resource '{logical_id}' has no properties")))?;
        match props
            .entry(property.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(Error::validation(format!(
                "property '{property}' of '{logical_id}' is not a list"
            ))),
        }
    }

    fn display_path(&self) -> String {
        if self.path.is_empty() {
            "<root>".to_string()
        } else {
            self.path()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn logical_ids_concatenate_path() {
        let mut template = Template::new();
        let mut root = template.root();
        let mut keycloak = root.child("Keycloak");
        let lb = keycloak.child("LoadBalancer");
        assert_eq!(lb.logical_id("HTTP"), "KeycloakLoadBalancerHTTP");
        assert_eq!(lb.own_logical_id(), "KeycloakLoadBalancer");
        assert_eq!(lb.path(), "Keycloak/LoadBalancer");
    }

    #[test]
    fn logical_ids_strip_non_alphanumerics() {
        let mut template = Template::new();
        let mut root = template.root();
        let scope = root.child("my-stack");
        assert_eq!(scope.logical_id("ensure_db.1"), "mystackensuredb1");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut template = Template::new();
        let mut root = template.root();
        root.add_resource("Vpc", Resource::new("AWS::EC2::VPC")).unwrap();
        let err = root
            .add_resource("Vpc", Resource::new("AWS::EC2::VPC"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("already a construct"));
    }

    #[test]
    fn story_ids_differing_in_punctuation_stay_distinct() {
        let mut template = Template::new();
        let mut root = template.root();
        let mut scope = root.child("Keycloak");
        scope
            .add_resource("Public-Nlb", Resource::new("AWS::ElasticLoadBalancingV2::LoadBalancer"))
            .unwrap();

        assert!(scope.contains("Public-Nlb"));
        assert!(!scope.contains("PublicNlb"));
        assert!(scope.find("PublicNlb").is_none());

        let err = scope
            .add_resource("PublicNlb", Resource::new("AWS::ElasticLoadBalancingV2::LoadBalancer"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let message = err.to_string();
        assert!(message.contains("Keycloak/PublicNlb"));
        assert!(message.contains("Keycloak/Public-Nlb"));
        assert!(message.contains("KeycloakPublicNlb"));
    }

    #[test]
    fn story_nested_paths_that_flatten_alike_collide() {
        let mut template = Template::new();
        let mut root = template.root();
        root.child("Load").add_resource("Balancer", Resource::new("A")).unwrap();
        assert!(!root.contains("LoadBalancer"));
        let err = root.add_resource("LoadBalancer", Resource::new("B")).unwrap_err();
        assert!(err.to_string().contains("both map to logical id 'LoadBalancer'"));
    }

    #[test]
    fn find_returns_child_resources() {
        let mut template = Template::new();
        let mut root = template.root();
        let mut scope = root.child("Keycloak");
        assert!(!scope.contains("LoadBalancer"));
        scope
            .add_resource(
                "LoadBalancer",
                Resource::new("AWS::ElasticLoadBalancingV2::LoadBalancer"),
            )
            .unwrap();
        assert!(scope.contains("LoadBalancer"));
        assert_eq!(
            scope.find("LoadBalancer").unwrap().type_,
            "AWS::ElasticLoadBalancingV2::LoadBalancer"
        );
        drop(scope);
        assert!(template.resource("KeycloakLoadBalancer").is_some());
    }

    #[test]
    fn push_property_appends_to_lists() {
        let mut template = Template::new();
        let mut root = template.root();
        let id = root
            .add_resource(
                "Service",
                Resource::new("AWS::ECS::Service").with_properties(json!({})),
            )
            .unwrap();
        root.push_property(&id, "LoadBalancers", json!({ "ContainerPort": 8080 }))
            .unwrap();
        root.push_property(&id, "LoadBalancers", json!({ "ContainerPort": 8443 }))
            .unwrap();
        let lbs = template.resource("Service").unwrap().property("LoadBalancers").unwrap();
        assert_eq!(lbs.as_array().unwrap().len(), 2);
    }

    #[test]
    fn add_dependency_requires_existing_resource() {
        let mut template = Template::new();
        let mut root = template.root();
        assert!(root.add_dependency("Missing", "Other").is_err());
        root.add_resource("Service", Resource::new("AWS::ECS::Service"))
            .unwrap();
        root.add_dependency("Service", "Listener").unwrap();
        root.add_dependency("Service", "Listener").unwrap();
        assert_eq!(
            template.resource("Service").unwrap().depends_on,
            vec!["Listener".to_string()]
        );
    }

    #[test]
    fn outputs_use_scoped_ids() {
        let mut template = Template::new();
        let mut root = template.root();
        let mut scope = root.child("Listener");
        scope.add_output("Url", Output::new(json!("x"))).unwrap();
        assert!(scope.add_output("Url", Output::new(json!("y"))).is_err());
        drop(scope);
        assert!(template.output("ListenerUrl").is_some());
    }
}
