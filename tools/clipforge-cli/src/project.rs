//! Project files: a timeline plus the media it references.
//!
//! ```json
//! { "timeline": { "tracks": [...] }, "media": { "cam": "footage/cam.mp4" } }
//! ```
//!
//! Relative media paths resolve against the project file's directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clipforge_render_engine::{DecodeOptions, MediaLibrary};
use clipforge_timeline_model::Timeline;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub timeline: Timeline,

    #[serde(default)]
    pub media: BTreeMap<String, PathBuf>,
}

/// A project file read from disk.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub path: PathBuf,
    pub file: ProjectFile,
}

impl LoadedProject {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project file {}", path.display()))?;
        let file: ProjectFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse project file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn timeline(&self) -> &Timeline {
        &self.file.timeline
    }

    /// Project name, from the file stem.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    }

    /// Absolute location of every media entry.
    pub fn media_paths(&self) -> BTreeMap<String, PathBuf> {
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));
        self.file
            .media
            .iter()
            .map(|(id, p)| {
                let resolved = if p.is_absolute() { p.clone() } else { base.join(p) };
                (id.clone(), resolved)
            })
            .collect()
    }

    /// Decode every referenced media file.
    pub fn load_media(&self, options: DecodeOptions) -> anyhow::Result<MediaLibrary> {
        let mut library = MediaLibrary::new();
        for (id, path) in self.media_paths() {
            tracing::info!(media_id = %id, path = %path.display(), "Loading media");
            library
                .load_path(&id, &path, options)
                .map_err(|e| anyhow::anyhow!("Failed to load media '{id}': {}", e.user_message()))?;
        }
        Ok(library)
    }
}
