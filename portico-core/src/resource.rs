use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// An accessor trait for a watched Gateway API object.
///
/// Unlike compiled-in kinds, these objects carry the `apiVersion` they were served with,
/// so the version is read from the instance rather than from the type.
///
/// These types SHOULD all have required properties:
/// - `.metadata`
/// - `.metadata.name`
pub trait Resource {
    /// The `apiVersion` declared by this object
    fn api_version(&self) -> &str;
    /// The `kind` declared by this object
    fn kind(&self) -> &str;

    /// Metadata that all persisted resources must have
    fn meta(&self) -> &ObjectMeta;
}

/// An accessor trait for objects following the spec/status convention
pub trait HasStatus {
    /// The type of the `status` object
    type Status;

    /// Returns an optional reference to the `status` of the object
    fn status(&self) -> Option<&Self::Status>;
}

/// Helper methods for resources.
pub trait ResourceExt: Resource {
    /// Returns the name of the resource, or the empty string when unset
    fn name_any(&self) -> String;
    /// The namespace the resource is in
    fn namespace(&self) -> Option<String>;
    /// The resource version
    fn resource_version(&self) -> Option<String>;
    /// The generation, bumped by the apiserver on every spec change
    fn generation(&self) -> Option<i64>;
    /// The owner reference flagged as the managing controller, if any
    fn controller_owner(&self) -> Option<&OwnerReference>;
}

impl<K: Resource> ResourceExt for K {
    fn name_any(&self) -> String {
        self.meta()
            .name
            .clone()
            .or_else(|| self.meta().generate_name.clone())
            .unwrap_or_default()
    }

    fn namespace(&self) -> Option<String> {
        self.meta().namespace.clone()
    }

    fn resource_version(&self) -> Option<String> {
        self.meta().resource_version.clone()
    }

    fn generation(&self) -> Option<i64> {
        self.meta().generation
    }

    fn controller_owner(&self) -> Option<&OwnerReference> {
        self.meta()
            .owner_references
            .as_deref()?
            .iter()
            .find(|owner| owner.controller == Some(true))
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceExt;
    use crate::GatewayClass;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    #[test]
    fn name_any_falls_back_to_generate_name() {
        let mut gc = GatewayClass::new("", "example.com/ctrl");
        gc.metadata.name = None;
        gc.metadata.generate_name = Some("gc-".into());
        assert_eq!(gc.name_any(), "gc-");
    }

    #[test]
    fn controller_owner_picks_the_controller_entry() {
        let mut gc = GatewayClass::new("public", "example.com/ctrl");
        assert!(gc.controller_owner().is_none());

        gc.metadata.owner_references = Some(vec![
            OwnerReference {
                name: "bystander".into(),
                ..OwnerReference::default()
            },
            OwnerReference {
                name: "boss".into(),
                controller: Some(true),
                ..OwnerReference::default()
            },
        ]);
        assert_eq!(gc.controller_owner().map(|o| o.name.as_str()), Some("boss"));
    }
}
