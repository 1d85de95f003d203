//! Docker sandboxes: image lookup, image builds and the free-space check.

use super::settings::OrchestratorSettings;
use crate::errors::{OrchestrationError, ResourceError};
use bollard::Docker;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Fail when a volume doesn't have room for one more image.
pub fn ensure_space(volume: &Path, available_kib: u64, required_kib: u64) -> Result<(), ResourceError> {
    if available_kib < required_kib {
        return Err(ResourceError::InsufficientSpace {
            volume: volume.to_path_buf(),
            available_kib,
            required_kib,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DockerSandbox {
    settings: OrchestratorSettings,
}

impl DockerSandbox {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Dockerfile directory for an image: prefix removed, suffix ensured.
    pub fn dockerfile_dir_name(&self, image: &str) -> String {
        let name = image.strip_prefix(&self.settings.image_prefix).unwrap_or(image);
        if name.ends_with(&self.settings.dockerfile_suffix) {
            name.to_string()
        } else {
            format!("{}{}", name, self.settings.dockerfile_suffix)
        }
    }

    /// Whether the Docker daemon knows `image`. An unreachable daemon counts as absent.
    pub async fn image_exists(&self, image: &str) -> bool {
        let docker = match Docker::connect_with_local_defaults() {
            Ok(docker) => docker,
            Err(e) => {
                warn!(error = %e, "Docker daemon unreachable");
                return false;
            }
        };
        match docker.inspect_image(image).await {
            Ok(_) => true,
            Err(e) => {
                debug!(image, error = %e, "image lookup failed");
                false
            }
        }
    }

    /// Free space check on the target volume against the image size estimate.
    pub fn check_space(&self) -> Result<(), ResourceError> {
        let volume = &self.settings.target_volume;
        let available = fs2::available_space(volume).map_err(|source| ResourceError::Unmeasurable {
            volume: volume.clone(),
            source,
        })?;
        ensure_space(volume, available / 1024, self.settings.max_image_size_kib)
    }

    /// Build an image from its Dockerfile directory.
    pub async fn build_image(&self, image: &str) -> Result<(), OrchestrationError> {
        self.check_space()?;

        let dir_name = self.dockerfile_dir_name(image);
        let dockerfile = self.settings.dockerfiles_dir.join(&dir_name).join("Dockerfile");
        if !dockerfile.is_file() {
            return Err(OrchestrationError::ImageBuildFailed {
                image: image.to_string(),
                message: format!("Dockerfile not found: {}", dockerfile.display()),
            });
        }

        let tag = format!("{}{}", self.settings.image_prefix, dir_name);
        info!(image, tag = %tag, "building sandbox image");
        let output = Command::new("docker")
            .args(["build", "--pull=true", "--no-cache", "-t", &tag])
            .arg(format!("./{}", dir_name))
            .current_dir(&self.settings.dockerfiles_dir)
            .output()
            .await
            .map_err(|e| OrchestrationError::ImageBuildFailed {
                image: image.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(OrchestrationError::ImageBuildFailed {
                image: image.to_string(),
                message: format!(
                    "docker build exited with {}: {}",
                    output.status,
                    tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
                ),
            });
        }
        Ok(())
    }

    /// Make sure `image` exists, building it first when allowed.
    pub async fn ensure_image(&self, image: &str, try_build: bool) -> Result<(), OrchestrationError> {
        if self.image_exists(image).await {
            return Ok(());
        }
        if !try_build {
            return Err(OrchestrationError::ImageUnavailable {
                image: image.to_string(),
            });
        }

        self.build_image(image).await?;
        if self.image_exists(image).await {
            Ok(())
        } else {
            Err(OrchestrationError::ImageUnavailable {
                image: image.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_dockerfile_dir_name() {
        let sandbox = DockerSandbox::new(OrchestratorSettings::default());
        assert_eq!(sandbox.dockerfile_dir_name("ofbuild/debian-11"), "debian-11-qt5");
        assert_eq!(sandbox.dockerfile_dir_name("ofbuild/debian-11-qt5"), "debian-11-qt5");
        assert_eq!(sandbox.dockerfile_dir_name("fedora-38"), "fedora-38-qt5");
    }

    #[test]
    fn test_ensure_space() {
        assert!(ensure_space(Path::new("/"), 6_000_000, 5_000_000).is_ok());
        let err = ensure_space(Path::new("/"), 1_000, 5_000_000).unwrap_err();
        assert!(matches!(
            err,
            ResourceError::InsufficientSpace {
                available_kib: 1_000,
                ..
            }
        ));
    }

    #[test]
    fn test_check_space_on_unknown_volume() {
        let settings = OrchestratorSettings {
            target_volume: PathBuf::from("/nonexistent/volume/for/mbm"),
            ..OrchestratorSettings::default()
        };
        let err = DockerSandbox::new(settings).check_space().unwrap_err();
        assert!(matches!(err, ResourceError::Unmeasurable { .. }));
    }

    #[tokio::test]
    async fn test_build_image_without_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let settings = OrchestratorSettings {
            dockerfiles_dir: dir.path().to_path_buf(),
            target_volume: dir.path().to_path_buf(),
            max_image_size_kib: 0,
            ..OrchestratorSettings::default()
        };
        let err = DockerSandbox::new(settings)
            .build_image("ofbuild/unknown-distro")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Dockerfile not found"));
    }
}
