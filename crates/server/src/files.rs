use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use shared::domain::{ArtifactKind, MilestoneId, ProjectId};

/// Local artifact store. The engine only ever sees the relative reference
/// this store hands back; swapping it for object storage would not touch
/// the engine.
#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Writes the artifact under `{project}/{milestone}/{kind}_{name}` and
    /// returns that relative path as the opaque reference.
    pub async fn save(
        &self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
        kind: ArtifactKind,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let dir = self
            .root
            .join(project_id.0.to_string())
            .join(milestone_id.0.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create upload dir '{}'", dir.display()))?;

        let name = format!("{}_{}", kind.as_str(), sanitize_filename(filename));
        let path = dir.join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write artifact '{}'", path.display()))?;

        Ok(format!(
            "{}/{}/{}",
            project_id.0, milestone_id.0, name
        ))
    }

    /// Maps a stored reference back to the on-disk path. References only
    /// ever come from the database, and are built from sanitized names.
    pub fn resolve(&self, reference: &str) -> PathBuf {
        self.root.join(Path::new(reference))
    }

    /// Drops every stored artifact; part of the administrative wipe.
    pub async fn clear(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&self.root)
                .await
                .with_context(|| format!("failed to clear upload dir '{}'", self.root.display()))?;
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to recreate upload dir '{}'", self.root.display()))?;
        Ok(())
    }
}

/// Keeps only a safe basename: no path separators, no odd characters.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "file.bin".to_string()
    } else {
        cleaned
    }
}
