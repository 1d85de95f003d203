//! Host platform detection.

use crate::errors::ConfigError;
use std::path::Path;

pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Native package format of the host distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Deb,
    Rpm,
}

impl PackageFormat {
    /// CPack generator name.
    pub fn generator(&self) -> &'static str {
        match self {
            Self::Deb => "DEB",
            Self::Rpm => "RPM",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Deb => "deb",
            Self::Rpm => "rpm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub distrib: String,
    pub version: String,
    pub package_format: PackageFormat,
}

impl HostInfo {
    /// Detect from `/etc/os-release`, or from `override_distrib` when given.
    pub fn detect(override_distrib: Option<&str>) -> Result<Self, ConfigError> {
        Self::detect_from(Path::new(OS_RELEASE_PATH), override_distrib)
    }

    pub fn detect_from(os_release: &Path, override_distrib: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(distrib) = override_distrib {
            return Self::from_parts(distrib, "");
        }
        let content =
            std::fs::read_to_string(os_release).map_err(|source| ConfigError::HostInfoUnreadable {
                path: os_release.to_path_buf(),
                source,
            })?;
        Self::parse(&content)
    }

    /// Parse `os-release` content (`KEY=value` lines, values optionally quoted).
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut distrib = String::new();
        let mut version = String::new();
        for line in content.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key {
                "ID" => distrib = value.to_string(),
                "VERSION_ID" => version = value.to_string(),
                _ => {}
            }
        }
        Self::from_parts(&distrib, &version)
    }

    fn from_parts(distrib: &str, version: &str) -> Result<Self, ConfigError> {
        let distrib = distrib.trim().to_lowercase();
        let package_format = match distrib.as_str() {
            "ubuntu" | "debian" => PackageFormat::Deb,
            "fedora" => PackageFormat::Rpm,
            _ => return Err(ConfigError::UnrecognizedHost { distrib }),
        };
        Ok(Self {
            distrib,
            version: version.to_string(),
            package_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_ubuntu() {
        let content = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nID_LIKE=debian\n";
        let host = HostInfo::parse(content).unwrap();
        assert_eq!(host.distrib, "ubuntu");
        assert_eq!(host.version, "22.04");
        assert_eq!(host.package_format, PackageFormat::Deb);
    }

    #[test]
    fn test_parse_fedora_rpm() {
        let host = HostInfo::parse("ID=fedora\nVERSION_ID=39\n").unwrap();
        assert_eq!(host.package_format.generator(), "RPM");
        assert_eq!(host.package_format.extension(), "rpm");
    }

    #[test]
    fn test_unrecognized_host() {
        let err = HostInfo::parse("ID=arch\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnrecognizedHost { distrib } if distrib == "arch"));
    }

    #[test]
    fn test_override_skips_file() {
        let host = HostInfo::detect_from(Path::new("/nonexistent/os-release"), Some("Debian")).unwrap();
        assert_eq!(host.distrib, "debian");
    }

    #[test]
    fn test_detect_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("os-release");
        std::fs::write(&path, "ID=\"fedora\"\n").unwrap();
        assert_eq!(HostInfo::detect_from(&path, None).unwrap().distrib, "fedora");

        let err = HostInfo::detect_from(&dir.path().join("missing"), None).unwrap_err();
        assert!(matches!(err, ConfigError::HostInfoUnreadable { .. }));
    }
}
