//! Gateway API kinds watched by the controller.
//!
//! Only the fields the controller reads or writes are modelled; everything else in the
//! served objects is ignored on deserialization.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
use serde::{Deserialize, Serialize};

use crate::{
    resource::{HasStatus, Resource},
    SUPPORTED_VERSION,
};

/// A class of Gateways, claimed by exactly one controller through `spec.controllerName`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClass {
    /// The `apiVersion` the object was served with
    pub api_version: String,
    /// Always `GatewayClass`
    pub kind: String,
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired state
    pub spec: GatewayClassSpec,
    /// Observed state, written through the status subresource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GatewayClassStatus>,
}

/// Desired state of a [`GatewayClass`]
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassSpec {
    /// Domain-prefixed name of the controller managing Gateways of this class
    pub controller_name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Observed state of a [`GatewayClass`]
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassStatus {
    /// Conditions keyed by their `type`
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl GatewayClass {
    /// Creates a named class at the supported version, claimed by `controller_name`
    pub fn new(name: &str, controller_name: &str) -> Self {
        Self {
            api_version: SUPPORTED_VERSION.to_string(),
            kind: "GatewayClass".to_string(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: GatewayClassSpec {
                controller_name: controller_name.to_string(),
                description: None,
            },
            status: None,
        }
    }

    /// Conditions currently recorded in the status block
    pub fn conditions(&self) -> &[Condition] {
        self.status().map(|s| s.conditions.as_slice()).unwrap_or_default()
    }
}

impl Resource for GatewayClass {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl HasStatus for GatewayClass {
    type Status = GatewayClassStatus;

    fn status(&self) -> Option<&GatewayClassStatus> {
        self.status.as_ref()
    }
}

/// A Gateway instance; only its class reference is of interest here
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    /// The `apiVersion` the object was served with
    pub api_version: String,
    /// Always `Gateway`
    pub kind: String,
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired state
    pub spec: GatewaySpec,
}

/// Desired state of a [`Gateway`]
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Name of the [`GatewayClass`] this Gateway is an instance of
    pub gateway_class_name: String,
}

impl Gateway {
    /// Creates a namespaced Gateway of the given class at the supported version
    pub fn new(name: &str, namespace: &str, class: &str) -> Self {
        Self {
            api_version: SUPPORTED_VERSION.to_string(),
            kind: "Gateway".to_string(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            spec: GatewaySpec {
                gateway_class_name: class.to_string(),
            },
        }
    }
}

impl Resource for Gateway {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}
