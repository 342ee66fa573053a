use educe::Educe;
use portico_core::{ObjectMeta, Resource};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

#[derive(Educe)]
#[educe(Debug, PartialEq, Eq, Hash, Clone)]
/// A namespaced (if relevant) reference to an object
///
/// Renders as `name` for cluster-scoped objects and `namespace/name` otherwise,
/// and parses back from the same form:
///
/// ```
/// use portico_runtime::reflector::ObjectRef;
/// let key: ObjectRef = "infra/edge".parse().unwrap();
/// assert_eq!(key, ObjectRef::new("edge").within("infra"));
/// assert_eq!(ObjectRef::new("public").to_string(), "public");
/// ```
#[non_exhaustive]
pub struct ObjectRef {
    /// The name of the object
    pub name: String,
    /// The namespace of the object
    ///
    /// `None` for cluster-scoped kinds such as `GatewayClass`.
    pub namespace: Option<String>,
    /// Extra information about the object being referred to
    ///
    /// This is *not* considered when comparing objects, so two notifications for the same
    /// object always produce equal keys no matter which revision they carried.
    #[educe(Hash(ignore), PartialEq(ignore))]
    pub extra: Extra,
}

/// Non-vital information about an object being referred to
///
/// See [`ObjectRef::extra`].
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct Extra {
    /// The version of the resource at the time of reference
    pub resource_version: Option<String>,
    /// The uid of the object
    pub uid: Option<String>,
}

/// A key could not be parsed into an [`ObjectRef`]
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object key {0:?}: expected `name` or `namespace/name`")]
pub struct ParseObjectRefError(pub String);

impl ObjectRef {
    /// A reference to the cluster-scoped object `name`
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            extra: Extra::default(),
        }
    }

    /// Scopes the reference to `namespace`
    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Creates `ObjectRef` from the resource
    ///
    /// Returns `None` when the object has no name, since no stable key can be derived.
    #[must_use]
    pub fn from_obj<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        Some(Self {
            name: meta.name.clone().filter(|name| !name.is_empty())?,
            namespace: meta.namespace.clone(),
            extra: Extra::from_obj_meta(meta),
        })
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}/")?;
        }
        write!(f, "{}", self.name)
    }
}

impl FromStr for ObjectRef {
    type Err = ParseObjectRefError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        match *key.split('/').collect::<Vec<_>>().as_slice() {
            [name] if !name.is_empty() => Ok(Self::new(name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::new(name).within(ns)),
            _ => Err(ParseObjectRefError(key.to_string())),
        }
    }
}

impl Extra {
    fn from_obj_meta(obj_meta: &ObjectMeta) -> Self {
        Self {
            resource_version: obj_meta.resource_version.clone(),
            uid: obj_meta.uid.clone(),
        }
    }
}
