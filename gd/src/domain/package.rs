//! Package domain type

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A named, versioned unit of work with dependencies on other packages
/// in the same graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Unique package name
    pub name: String,

    /// Version string (opaque to the executor)
    #[serde(default)]
    pub version: String,

    /// Filesystem path of the package
    #[serde(default)]
    pub path: PathBuf,

    /// Names of packages this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Package {
    /// Create a package with no dependencies
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            path: PathBuf::new(),
            dependencies: Vec::new(),
        }
    }

    /// Set the version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the filesystem path
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Add a dependency on another package
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Whether this package has any dependencies
    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_builder() {
        let pkg = Package::new("core")
            .with_version("1.2.0")
            .with_path("/repo/core")
            .with_dependency("util");

        assert_eq!(pkg.name, "core");
        assert_eq!(pkg.version, "1.2.0");
        assert_eq!(pkg.path, PathBuf::from("/repo/core"));
        assert_eq!(pkg.dependencies, vec!["util".to_string()]);
        assert!(pkg.has_dependencies());
    }

    #[test]
    fn test_package_serde_defaults() {
        let pkg: Package = serde_yaml::from_str("name: solo").unwrap();
        assert_eq!(pkg.name, "solo");
        assert!(pkg.version.is_empty());
        assert!(!pkg.has_dependencies());
    }
}
