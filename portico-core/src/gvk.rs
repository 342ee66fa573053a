//! Type information for declared api versions.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("failed to parse group version: {0}")]
/// Failed to parse group version.
pub struct ParseGroupVersionError(pub String);

/// Core information about a family of API Resources
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    /// API group
    pub group: String,
    /// Version
    pub version: String,
}

impl GroupVersion {
    /// Construct from explicit group and version
    pub fn gv(group_: &str, version_: &str) -> Self {
        let version = version_.to_string();
        let group = group_.to_string();
        Self { group, version }
    }

    /// Generate the apiVersion string used in a kind's yaml
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl FromStr for GroupVersion {
    type Err = ParseGroupVersionError;

    fn from_str(gv: &str) -> Result<Self, Self::Err> {
        let gvsplit = gv.splitn(2, '/').collect::<Vec<_>>();
        let (group, version) = match *gvsplit.as_slice() {
            [g, v] if !g.is_empty() && !v.is_empty() => (g.to_string(), v.to_string()),
            [v] if !v.is_empty() => (String::new(), v.to_string()), // core v1 case
            _ => return Err(ParseGroupVersionError(gv.into())),
        };
        Ok(Self { group, version })
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

#[cfg(test)]
mod tests {
    use super::{GroupVersion, ParseGroupVersionError};

    #[test]
    fn parses_grouped_versions() {
        let gv: GroupVersion = "gateway.networking.k8s.io/v1beta1".parse().unwrap();
        assert_eq!(gv, GroupVersion::gv("gateway.networking.k8s.io", "v1beta1"));
        assert_eq!(gv.to_string(), "gateway.networking.k8s.io/v1beta1");
    }

    #[test]
    fn parses_core_versions() {
        let gv: GroupVersion = "v1".parse().unwrap();
        assert_eq!(gv.group, "");
        assert_eq!(gv.api_version(), "v1");
    }

    #[test]
    fn rejects_empty_segments() {
        assert_eq!(
            "".parse::<GroupVersion>(),
            Err(ParseGroupVersionError(String::new()))
        );
        assert!("gateway.networking.k8s.io/".parse::<GroupVersion>().is_err());
        assert!("/v1".parse::<GroupVersion>().is_err());
    }
}
