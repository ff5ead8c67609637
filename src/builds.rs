//! User-registered application builds.
//!
//! Users may point the launcher at their own installations in addition to
//! the versions the cluster configuration lists. The registry is a JSON
//! object `{"name": "/path/to/Linux64", ...}` kept in the app folder.

use std::path::{Path, PathBuf};

use serde::ser::{Serialize, Serializer};
use serde::Deserialize;

use crate::config::ordered_map;
use crate::error::{LauncherError, Result};
use crate::log_store::discard;

/// Every installation must end in this directory.
pub const BUILD_DIR_SUFFIX: &str = "Linux64";

/// File inside an installation naming its product on the first line.
const PRODUCT_LIST: &str = "config/ProductList.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomBuild {
    pub name: String,
    pub path: PathBuf,
    /// First line of the build's product list
    pub product: String,
}

/// Product name of the installation at `path`, or `None` when it has no
/// product list.
pub async fn product_name(path: &Path) -> Option<String> {
    let text = tokio::fs::read_to_string(path.join(PRODUCT_LIST)).await.ok()?;
    Some(text.lines().next().unwrap_or_default().trim_end().to_string())
}

#[derive(Deserialize)]
struct BuildFile(#[serde(deserialize_with = "ordered_map")] Vec<(String, PathBuf)>);

struct BuildFileRef<'a>(&'a [CustomBuild]);

impl Serialize for BuildFileRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|build| (&build.name, &build.path)))
    }
}

#[derive(Debug)]
pub struct BuildRegistry {
    path: PathBuf,
    builds: Vec<CustomBuild>,
    recovered: bool,
}

impl BuildRegistry {
    /// Load the registry at `path`. A missing file is an empty registry; an
    /// unreadable one is deleted. Entries whose installation has no product
    /// list are skipped but stay in the file until the next rewrite.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut recovered = false;

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BuildFile>(&bytes) {
                Ok(BuildFile(entries)) => entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Custom builds file is corrupted, removed");
                    discard(&path).await;
                    recovered = true;
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Custom builds file is unreadable, removed");
                discard(&path).await;
                recovered = true;
                Vec::new()
            }
        };

        let mut builds = Vec::with_capacity(entries.len());
        for (name, build_path) in entries {
            match product_name(&build_path).await {
                Some(product) => builds.push(CustomBuild {
                    name,
                    path: build_path,
                    product,
                }),
                None => {
                    tracing::warn!(build = %name, path = %build_path.display(), "Product is not available, build skipped");
                }
            }
        }

        tracing::debug!(path = %path.display(), builds = builds.len(), "Custom builds loaded");
        Self {
            path,
            builds,
            recovered,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the previous file was unreadable and has been removed.
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered
    }

    pub fn builds(&self) -> &[CustomBuild] {
        &self.builds
    }

    /// `(name, path)` pairs for [`ClusterConfig::add_install_dirs`].
    ///
    /// [`ClusterConfig::add_install_dirs`]: crate::config::ClusterConfig::add_install_dirs
    pub fn install_dirs(&self) -> impl Iterator<Item = (String, PathBuf)> + '_ {
        self.builds
            .iter()
            .map(|build| (build.name.clone(), build.path.clone()))
    }

    /// Register a build and rewrite the file.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Validation`] when the path does not end in
    /// `Linux64`, has no product list, or the name is empty or taken.
    pub async fn add(&mut self, name: &str, path: impl Into<PathBuf>) -> Result<&CustomBuild> {
        let path = path.into();
        if !path.to_string_lossy().ends_with(BUILD_DIR_SUFFIX) {
            return Err(LauncherError::Validation(
                "Your path should include and be ended by Linux64 (eg /ott/apps/ANSYSEM/Linux64)"
                    .to_string(),
            ));
        }
        let name = name.trim();
        if name.is_empty() || self.builds.iter().any(|build| build.name == name) {
            return Err(LauncherError::Validation(
                "Name cannot be empty and not unique".to_string(),
            ));
        }
        let Some(product) = product_name(&path).await else {
            return Err(LauncherError::Validation(format!(
                "Product is not available. Please check {}",
                path.display()
            )));
        };

        self.builds.push(CustomBuild {
            name: name.to_string(),
            path,
            product,
        });
        self.persist().await?;
        tracing::info!(build = name, "Custom build added");

        let index = self.builds.len() - 1;
        Ok(&self.builds[index])
    }

    /// Forget a build and rewrite the file. Returns false if no build has
    /// that name.
    pub async fn remove(&mut self, name: &str) -> Result<bool> {
        let before = self.builds.len();
        self.builds.retain(|build| build.name != name);
        if self.builds.len() == before {
            return Ok(false);
        }
        self.persist().await?;
        tracing::info!(build = name, "Custom build removed");
        Ok(true)
    }

    async fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&BuildFileRef(&self.builds))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| LauncherError::Persistence(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            LauncherError::Persistence(format!("cannot replace {}: {}", self.path.display(), e))
        })
    }
}
