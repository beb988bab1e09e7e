//! Terraform version parsing.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use semver::{Version, VersionReq};

use super::TfError;

/// Version reported by `terraform version`, including any pre-release tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TerraformVersion(Version);

impl TerraformVersion {
    /// Create a release version.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Extract the version from `terraform version` output,
    /// e.g. `Terraform v1.5.7\non linux_amd64`.
    pub fn from_output(output: &str) -> Result<Self, TfError> {
        let pattern = Regex::new(r"v?(\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?)")
            .map_err(|e| TfError::Version(e.to_string()))?;

        let first_line = output.lines().next().unwrap_or_default();
        let caps = pattern
            .captures(first_line)
            .ok_or_else(|| TfError::Version(first_line.to_string()))?;

        Version::parse(&caps[1])
            .map(Self)
            .map_err(|e| TfError::Version(format!("{}: {}", first_line, e)))
    }

    /// Whether this version satisfies `req`.
    ///
    /// Pre-releases only match requirements that name the same
    /// `major.minor.patch` with a pre-release tag, so `0.13.0-beta1` does
    /// not satisfy `>=0.13.0`.
    pub fn satisfies(&self, req: &VersionReq) -> bool {
        req.matches(&self.0)
    }

    /// The underlying semantic version.
    pub fn as_semver(&self) -> &Version {
        &self.0
    }
}

impl FromStr for TerraformVersion {
    type Err = TfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_output(s)
    }
}

impl fmt::Display for TerraformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_output() {
        let version =
            TerraformVersion::from_output("Terraform v1.5.7\non linux_amd64\n").unwrap();
        assert_eq!(version, TerraformVersion::new(1, 5, 7));

        let version = TerraformVersion::from_output("OpenTofu v1.6.0-beta1").unwrap();
        assert_eq!(version.to_string(), "1.6.0-beta1");
        assert!(!version.as_semver().pre.is_empty());

        assert!(TerraformVersion::from_output("command not found").is_err());
        assert!(TerraformVersion::from_output("").is_err());
    }

    #[test]
    fn test_satisfies() {
        let req = VersionReq::parse(">=0.13.0").unwrap();
        assert!(!TerraformVersion::new(0, 12, 31).satisfies(&req));
        assert!(TerraformVersion::new(0, 13, 0).satisfies(&req));
        assert!(TerraformVersion::new(1, 0, 0).satisfies(&req));
        assert!(!"0.13.0-beta1".parse::<TerraformVersion>().unwrap().satisfies(&req));
        assert_eq!("0.13.1".parse::<TerraformVersion>().unwrap().to_string(), "0.13.1");
    }
}
