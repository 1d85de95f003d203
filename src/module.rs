//! Buildable modules and the origin mini-language.
//!
//! An origin string is one of:
//! - an absolute local path (`/home/me/openfluid`), used as-is
//! - `default`, the module's known remote repository
//! - `<locator>[#<ref>]`, a remote repository with an optional branch or tag
//!
//! Locators without a scheme are GitHub `owner/name` slugs.

use crate::errors::ConfigError;
use std::fmt;
use std::path::{Path, PathBuf};

pub const GITHUB_URL: &str = "https://github.com";

/// Where a module's sources come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Pre-existing sources on disk; nothing is cloned.
    Local(PathBuf),
    Remote {
        url: String,
        reference: Option<String>,
    },
}

impl Origin {
    /// Parse an origin string for `module`, resolving `default` to `default_locator`.
    pub fn parse(module: &str, value: &str, default_locator: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigError::MissingOrigin {
                module: module.to_string(),
            });
        }
        if value.starts_with('/') {
            return Ok(Self::Local(PathBuf::from(value)));
        }

        let value = if value == "default" {
            default_locator
        } else {
            value
        };

        let mut parts = value.split('#');
        let locator = parts.next().unwrap_or_default();
        let reference = parts.next().filter(|r| !r.is_empty()).map(str::to_string);
        if parts.next().is_some() {
            return Err(ConfigError::MalformedOrigin {
                module: module.to_string(),
                value: value.to_string(),
            });
        }
        if locator.is_empty() {
            return Err(ConfigError::MissingOrigin {
                module: module.to_string(),
            });
        }

        Ok(Self::Remote {
            url: remote_url(locator),
            reference,
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote {
                url,
                reference: Some(reference),
            } => write!(f, "{}#{}", url, reference),
            Self::Remote { url, reference: None } => write!(f, "{}", url),
        }
    }
}

fn remote_url(locator: &str) -> String {
    if locator.contains("://") || locator.starts_with("git@") {
        locator.to_string()
    } else {
        format!("{}/{}", GITHUB_URL, locator.trim_start_matches('/'))
    }
}

/// Add-on modules built after the primary one, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependentKind {
    ROpenfluid,
    PyOpenfluid,
    OpenfluidJs,
}

impl DependentKind {
    /// Fixed order in which dependents are visited.
    pub const PRIORITY: [DependentKind; 3] = [Self::ROpenfluid, Self::PyOpenfluid, Self::OpenfluidJs];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ROpenfluid => "ropenfluid",
            Self::PyOpenfluid => "pyopenfluid",
            Self::OpenfluidJs => "openfluidjs",
        }
    }

    /// Letter prefixed to this module's step tags.
    pub fn tag_prefix(&self) -> char {
        match self {
            Self::ROpenfluid => 'R',
            Self::PyOpenfluid => 'P',
            Self::OpenfluidJs => 'J',
        }
    }

    pub fn default_locator(&self) -> &'static str {
        match self {
            Self::ROpenfluid => "OpenFLUID/ropenfluid",
            Self::PyOpenfluid => "OpenFLUID/pyopenfluid",
            Self::OpenfluidJs => "OpenFLUID/openfluidjs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Primary,
    Dependent(DependentKind),
}

pub const PRIMARY_NAME: &str = "openfluid";
pub const PRIMARY_DEFAULT_LOCATOR: &str = "OpenFLUID/openfluid";

impl ModuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primary => PRIMARY_NAME,
            Self::Dependent(kind) => kind.name(),
        }
    }

    /// Step tag for the `n`-th step of this module, e.g. `3` or `R3`.
    pub fn tag(&self, n: u8) -> String {
        match self {
            Self::Primary => n.to_string(),
            Self::Dependent(kind) => format!("{}{}", kind.tag_prefix(), n),
        }
    }

    pub fn default_locator(&self) -> &'static str {
        match self {
            Self::Primary => PRIMARY_DEFAULT_LOCATOR,
            Self::Dependent(kind) => kind.default_locator(),
        }
    }
}

/// A module to fetch and build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub kind: ModuleKind,
    pub origin: Origin,
    /// Directory holding the sources once fetched.
    pub src_dir: PathBuf,
}

impl ModuleSpec {
    /// Resolve a module from its origin string; sources land in `<src_root>/<name>`
    /// unless the origin is a local path.
    pub fn resolve(kind: ModuleKind, origin: &str, src_root: &Path) -> Result<Self, ConfigError> {
        let origin = Origin::parse(kind.name(), origin, kind.default_locator())?;
        let src_dir = match &origin {
            Origin::Local(path) => path.clone(),
            Origin::Remote { .. } => src_root.join(kind.name()),
        };
        Ok(Self {
            kind,
            origin,
            src_dir,
        })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path_origin() {
        let origin = Origin::parse("openfluid", "/opt/src/openfluid", PRIMARY_DEFAULT_LOCATOR).unwrap();
        assert_eq!(origin, Origin::Local(PathBuf::from("/opt/src/openfluid")));
        assert!(origin.is_local());
    }

    #[test]
    fn test_default_origin_uses_known_repository() {
        let origin = Origin::parse("ropenfluid", "default", "OpenFLUID/ropenfluid").unwrap();
        assert_eq!(
            origin,
            Origin::Remote {
                url: "https://github.com/OpenFLUID/ropenfluid".into(),
                reference: None,
            }
        );
    }

    #[test]
    fn test_remote_with_branch() {
        let origin = Origin::parse("openfluid", "someone/openfluid#develop", PRIMARY_DEFAULT_LOCATOR).unwrap();
        assert_eq!(
            origin,
            Origin::Remote {
                url: "https://github.com/someone/openfluid".into(),
                reference: Some("develop".into()),
            }
        );
        assert_eq!(origin.to_string(), "https://github.com/someone/openfluid#develop");
    }

    #[test]
    fn test_full_url_kept() {
        let origin = Origin::parse("openfluid", "https://gitlab.example.org/of/openfluid.git", PRIMARY_DEFAULT_LOCATOR).unwrap();
        match origin {
            Origin::Remote { url, reference } => {
                assert_eq!(url, "https://gitlab.example.org/of/openfluid.git");
                assert!(reference.is_none());
            }
            Origin::Local(_) => panic!("Expected remote origin"),
        }
    }

    #[test]
    fn test_several_hashes_rejected() {
        let err = Origin::parse("openfluid", "a/b#c#d", PRIMARY_DEFAULT_LOCATOR).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedOrigin { .. }));
    }

    #[test]
    fn test_empty_origin_rejected() {
        let err = Origin::parse("openfluid", "  ", PRIMARY_DEFAULT_LOCATOR).unwrap_err();
        assert!(matches!(err, ConfigError::MissingOrigin { .. }));
    }

    #[test]
    fn test_tags_and_priority() {
        assert_eq!(ModuleKind::Primary.tag(3), "3");
        assert_eq!(ModuleKind::Dependent(DependentKind::PyOpenfluid).tag(5), "P5");
        let prefixes: Vec<char> = DependentKind::PRIORITY.iter().map(|k| k.tag_prefix()).collect();
        assert_eq!(prefixes, vec!['R', 'P', 'J']);
    }

    #[test]
    fn test_module_src_dir() {
        let root = Path::new("/tmp/bm/src");
        let remote = ModuleSpec::resolve(ModuleKind::Primary, "default", root).unwrap();
        assert_eq!(remote.src_dir, root.join("openfluid"));

        let local = ModuleSpec::resolve(
            ModuleKind::Dependent(DependentKind::OpenfluidJs),
            "/work/openfluidjs",
            root,
        )
        .unwrap();
        assert_eq!(local.src_dir, PathBuf::from("/work/openfluidjs"));
    }
}
