//! Crate with types and pure logic for reconciling Gateway API classes
//!
//! This crate is available as a minimal alternative to `portico` where no runtime is needed.
//! The same information here is always re-exported from `portico` under `portico::core`.
#![deny(unsafe_code)]

pub mod conditions;
pub use conditions::{
    accepts_controller, compute_conditions, conditions_match, merge_conditions, ConditionStatus,
    ConditionType, DesiredCondition,
};

pub mod gateway;
pub use gateway::{Gateway, GatewayClass, GatewayClassSpec, GatewayClassStatus, GatewaySpec};

pub mod gvk;
pub use gvk::{GroupVersion, ParseGroupVersionError};

mod resource;
pub use resource::{HasStatus, Resource, ResourceExt};

pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta, Time};

/// The Gateway API group served by this controller
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// The only `apiVersion` this controller reconciles
pub const SUPPORTED_VERSION: &str = "gateway.networking.k8s.io/v1";

/// The `spec.controllerName` this controller claims by default
pub const DEFAULT_CONTROLLER_NAME: &str = "kubeportico.xyz/controller";

#[cfg(test)]
mod tests {
    use super::{GroupVersion, GATEWAY_API_GROUP, SUPPORTED_VERSION};

    #[test]
    fn supported_version_is_in_the_gateway_group() {
        let gv: GroupVersion = SUPPORTED_VERSION.parse().unwrap();
        assert_eq!(gv, GroupVersion::gv(GATEWAY_API_GROUP, "v1"));
    }
}
