use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host and sandbox settings for multi-context orchestration.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Host directory mounted into sandboxes.
    pub host_shared_dir: PathBuf,
    /// Mount point of `host_shared_dir` inside sandboxes.
    pub sandbox_shared_root: PathBuf,
    /// Directory holding one Dockerfile directory per image.
    pub dockerfiles_dir: PathBuf,
    /// Directory holding `run-docker-image.sh`.
    pub scripts_dir: PathBuf,
    /// Build machine executable as seen from inside a sandbox.
    pub sandbox_entry: String,
    /// Volume where images are stored.
    pub target_volume: PathBuf,
    /// Upper estimate of one built image, in KiB.
    pub max_image_size_kib: u64,
    pub image_prefix: String,
    pub dockerfile_suffix: String,
    pub launch_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let host_shared_dir = dirs::home_dir()
            .map(|home| home.join("shared"))
            .unwrap_or_else(|| PathBuf::from("/shared"));
        Self {
            dockerfiles_dir: host_shared_dir
                .join("openfluid-devtools")
                .join("docker")
                .join("Dockerfiles"),
            scripts_dir: host_shared_dir.join("openfluid-buildmachine").join("scripts"),
            host_shared_dir,
            sandbox_shared_root: PathBuf::from("/shared"),
            sandbox_entry: "/shared/openfluid-buildmachine/buildmachine".to_string(),
            target_volume: PathBuf::from("/"),
            max_image_size_kib: 5_000_000,
            image_prefix: "ofbuild/".to_string(),
            dockerfile_suffix: "-qt5".to_string(),
            launch_timeout: None,
        }
    }
}

/// Raw TOML structure of the settings file
#[derive(Debug, Deserialize)]
struct SettingsToml {
    sandbox: Option<SandboxSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SandboxSection {
    host_shared_dir: Option<PathBuf>,
    shared_root: Option<PathBuf>,
    dockerfiles_dir: Option<PathBuf>,
    scripts_dir: Option<PathBuf>,
    entry: Option<String>,
    target_volume: Option<PathBuf>,
    max_image_size_kib: Option<u64>,
    image_prefix: Option<String>,
    dockerfile_suffix: Option<String>,
    launch_timeout: Option<u64>,
}

impl OrchestratorSettings {
    /// Load settings from a TOML file. Returns defaults when no file is given
    /// or the file doesn't exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.filter(|p| p.exists()) else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let toml: SettingsToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let mut settings = Self::default();
        if let Some(section) = toml.sandbox {
            if let Some(dir) = section.host_shared_dir {
                // Derived directories follow the shared dir unless set explicitly.
                settings.dockerfiles_dir = dir
                    .join("openfluid-devtools")
                    .join("docker")
                    .join("Dockerfiles");
                settings.scripts_dir = dir.join("openfluid-buildmachine").join("scripts");
                settings.host_shared_dir = dir;
            }
            if let Some(root) = section.shared_root {
                settings.sandbox_shared_root = root;
            }
            if let Some(dir) = section.dockerfiles_dir {
                settings.dockerfiles_dir = dir;
            }
            if let Some(dir) = section.scripts_dir {
                settings.scripts_dir = dir;
            }
            if let Some(entry) = section.entry {
                settings.sandbox_entry = entry;
            }
            if let Some(volume) = section.target_volume {
                settings.target_volume = volume;
            }
            if let Some(size) = section.max_image_size_kib {
                settings.max_image_size_kib = size;
            }
            if let Some(prefix) = section.image_prefix {
                settings.image_prefix = prefix;
            }
            if let Some(suffix) = section.dockerfile_suffix {
                settings.dockerfile_suffix = suffix;
            }
            if let Some(secs) = section.launch_timeout {
                settings.launch_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
        }

        Ok(settings)
    }

    /// Host-side location of a path under the sandbox shared root.
    pub fn to_host_path(&self, sandbox_path: &Path) -> PathBuf {
        match sandbox_path.strip_prefix(&self.sandbox_shared_root) {
            Ok(relative) => self.host_shared_dir.join(relative),
            Err(_) => sandbox_path.to_path_buf(),
        }
    }
}
