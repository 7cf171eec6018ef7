// src/core/provisioner.rs

use crate::core::errors::ProvisioningError;
use crate::core::models::Target;
use crate::logging::file_timestamp;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A disposable copy of the template project, bound to one target.
#[derive(Debug)]
pub struct ProvisionedProject {
    path: PathBuf,
    target: Target,
}

impl ProvisionedProject {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Concludes the project: deletes the copy unless it should be kept for inspection.
    pub async fn release(self, keep: bool) {
        if keep {
            debug!(project = %self.path.display(), "Keeping project copy for inspection.");
            return;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!(project = %self.path.display(), "Removed project copy."),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(project = %self.path.display(), error = %e, "Could not remove project copy."),
        }
    }
}

/// Copies the immutable template project to a fresh per-target location.
#[derive(Debug, Clone)]
pub struct ProjectProvisioner {
    template: PathBuf,
    projects_dir: PathBuf,
}

impl ProjectProvisioner {
    pub fn new(template: PathBuf, projects_dir: PathBuf) -> Self {
        Self { template, projects_dir }
    }

    fn extension(&self) -> String {
        self.template
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("project")
            .to_string()
    }

    /// Creates the project copy for `target`.
    ///
    /// The file name combines the target slug and a timestamp; a numeric suffix
    /// is added in the unlikely case that name is already taken.
    ///
    /// # Errors
    /// `TemplateMissing` / `TemplateUnreadable` when the template cannot be read,
    /// `Destination` when the copy cannot be created.
    pub async fn provision(&self, target: &Target) -> Result<ProvisionedProject, ProvisioningError> {
        match tokio::fs::metadata(&self.template).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(ProvisioningError::TemplateMissing(self.template.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProvisioningError::TemplateMissing(self.template.clone()));
            }
            Err(source) => {
                return Err(ProvisioningError::TemplateUnreadable { path: self.template.clone(), source });
            }
        }

        tokio::fs::create_dir_all(&self.projects_dir)
            .await
            .map_err(|source| ProvisioningError::Destination { path: self.projects_dir.clone(), source })?;

        let path = self.unique_path(target).await;
        info!(
            source = %self.template.display(),
            destination = %path.display(),
            "Copying template project."
        );
        let bytes = match tokio::fs::copy(&self.template, &path).await {
            Ok(bytes) => bytes,
            Err(source) => {
                let unreadable = source.kind() == ErrorKind::PermissionDenied && !can_read(&self.template).await;
                return Err(if unreadable {
                    ProvisioningError::TemplateUnreadable { path: self.template.clone(), source }
                } else {
                    ProvisioningError::Destination { path, source }
                });
            }
        };
        info!(size_kb = %format!("{:.1}", bytes as f64 / 1024.0), "Project copy ready.");

        Ok(ProvisionedProject { path, target: target.clone() })
    }

    async fn unique_path(&self, target: &Target) -> PathBuf {
        let stem = format!("{}_{}", target.slug(), file_timestamp());
        let extension = self.extension();
        let mut candidate = self.projects_dir.join(format!("{}.{}", stem, extension));
        let mut suffix = 1;
        while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate = self.projects_dir.join(format!("{}_{}.{}", stem, suffix, extension));
            suffix += 1;
        }
        candidate
    }

    /// Removes project copies left behind by earlier runs.
    ///
    /// # Returns
    /// The number of files removed.
    pub async fn purge_stale(&self) -> usize {
        let extension = self.extension();
        let mut entries = match tokio::fs::read_dir(&self.projects_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = %self.projects_dir.display(), error = %e, "Could not list project copies.");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let matches = path.extension().and_then(|e| e.to_str()) == Some(extension.as_str());
            if !matches {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!(project = %path.display(), "Removed stale project copy.");
                    removed += 1;
                }
                Err(e) => warn!(project = %path.display(), error = %e, "Could not remove stale project copy."),
            }
        }
        removed
    }
}

async fn can_read(path: &Path) -> bool {
    tokio::fs::File::open(path).await.is_ok()
}
