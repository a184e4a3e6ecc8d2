//! Package manifest parsing and the token scope capability model.

use crate::error::{RegistryError, Result};
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid regex"))
}

/// Validate a package name against the host ecosystem's grammar.
pub fn validate_package_name(name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(RegistryError::Validation(format!(
            "invalid package name '{name}': must match ^[a-z][a-z0-9_]*$"
        )))
    }
}

/// Parse and validate a semantic version string.
pub fn parse_version(raw: &str) -> Result<Version> {
    Version::parse(raw).map_err(|e| RegistryError::Validation(format!("invalid version: {e}")))
}

/// The manifest found at the root of a published archive (`pubspec.yaml`).
///
/// Only `name` and `version` are contractually required; everything else is
/// carried opaquely so unrecognized manifest fields round-trip unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub dependencies: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub environment: serde_json::Map<String, serde_json::Value>,
    /// Any remaining manifest fields, preserved opaquely.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PackageManifest {
    /// Parse a manifest from the raw YAML bytes of a `pubspec.yaml` file,
    /// validating the name/version grammar required by the publish pipeline.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        let value: serde_yml::Value = serde_yml::from_slice(bytes)?;
        let manifest: PackageManifest = serde_yml::from_value(value)
            .map_err(|e| RegistryError::Validation(format!("malformed manifest: {e}")))?;
        validate_package_name(&manifest.name)?;
        parse_version(&manifest.version)?;
        Ok(manifest)
    }

    pub fn semver(&self) -> Result<Version> {
        parse_version(&self.version)
    }
}

/// A capability string attached to a bearer token.
///
/// Scopes form a capability set (spec §3 invariant 6): `admin` satisfies
/// every predicate; `publish:all` satisfies publishing any package;
/// `publish:pkg:<name>` satisfies publishing only that package; `read:all`
/// satisfies any read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(pub String);

impl Scope {
    pub const ADMIN: &'static str = "admin";
    pub const PUBLISH_ALL: &'static str = "publish:all";
    pub const READ_ALL: &'static str = "read:all";

    pub fn publish_pkg(name: &str) -> Scope {
        Scope(format!("publish:pkg:{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A set of scopes attached to a token, with the capability predicates the
/// auth layer evaluates against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(pub Vec<Scope>);

impl ScopeSet {
    pub fn new(scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(scopes.into_iter().map(|s| Scope(s.into())).collect())
    }

    fn has(&self, value: &str) -> bool {
        self.0.iter().any(|s| s.as_str() == value)
    }

    /// `admin` or `read:all` satisfy any read.
    pub fn requires_read(&self) -> bool {
        self.has(Scope::ADMIN) || self.has(Scope::READ_ALL)
    }

    /// `admin`, `publish:all`, or `publish:pkg:<name>` satisfy publishing `name`.
    pub fn requires_package_publish(&self, name: &str) -> bool {
        self.has(Scope::ADMIN) || self.has(Scope::PUBLISH_ALL) || self.has(Scope::publish_pkg(name).as_str())
    }

    pub fn is_admin(&self) -> bool {
        self.has(Scope::ADMIN)
    }
}

/// Deterministic content-addressed archive key layout, shared by both blob
/// store backends: `<package>/<version>-<sha256>.tar.gz`.
pub fn archive_key(package: &str, version: &str, sha256_hex: &str) -> String {
    format!("{package}/{version}-{sha256_hex}.tar.gz")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_accepted() {
        assert!(validate_package_name("alpha").is_ok());
        assert!(validate_package_name("alpha_beta2").is_ok());
    }

    #[test]
    fn invalid_names_rejected() {
        assert!(validate_package_name("Alpha").is_err());
        assert!(validate_package_name("1alpha").is_err());
        assert!(validate_package_name("alpha-beta").is_err());
    }

    #[test]
    fn manifest_parses_minimal_yaml() {
        let yaml = b"name: alpha\nversion: 1.0.0\ndescription: test package\n";
        let manifest = PackageManifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.name, "alpha");
        assert_eq!(manifest.version, "1.0.0");
    }

    #[test]
    fn manifest_rejects_bad_name() {
        let yaml = b"name: Alpha\nversion: 1.0.0\n";
        assert!(PackageManifest::from_yaml(yaml).is_err());
    }

    #[test]
    fn scope_predicates() {
        let admin = ScopeSet::new(["admin"]);
        assert!(admin.requires_package_publish("anything"));
        assert!(admin.requires_read());

        let scoped = ScopeSet::new(["publish:pkg:alpha"]);
        assert!(scoped.requires_package_publish("alpha"));
        assert!(!scoped.requires_package_publish("beta"));
        assert!(!scoped.requires_read());

        let publish_all = ScopeSet::new(["publish:all"]);
        assert!(publish_all.requires_package_publish("whatever"));
    }

    #[test]
    fn archive_key_layout() {
        assert_eq!(archive_key("alpha", "1.0.0", "deadbeef"), "alpha/1.0.0-deadbeef.tar.gz");
    }
}
</content>
