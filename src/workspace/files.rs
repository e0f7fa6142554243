//! Workspace file helpers: template seeding and app metadata extraction.

use std::io;
use std::path::Path;

use serde::Deserialize;
use walkdir::WalkDir;

use crate::models::AppMetadata;

/// File the generator may write with the app's title and description.
pub const APP_META_FILE: &str = ".appforge/app.json";

/// Directories never copied from a template.
const SKIP_DIRS: &[&str] = &["node_modules", ".git", ".next"];

/// Copy `template` into `workspace`, skipping dependency and VCS directories.
/// Returns the number of files copied.
pub fn populate_from_template(template: &Path, workspace: &Path) -> io::Result<usize> {
    let mut copied = 0;
    let walker = WalkDir::new(template).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIP_DIRS.contains(&name)))
    });
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(template)
            .map_err(io::Error::other)?;
        let target = workspace.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[derive(Deserialize)]
struct PackageJson {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Read the generated app's title/description. Missing or malformed files
/// yield empty metadata.
pub async fn extract_metadata(workspace: &Path) -> AppMetadata {
    if let Ok(content) = tokio::fs::read_to_string(workspace.join(APP_META_FILE)).await {
        match serde_json::from_str::<AppMetadata>(&content) {
            Ok(meta) if meta.title.is_some() || meta.description.is_some() => return meta,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(workspace = %workspace.display(), error = %e, "ignoring malformed app metadata")
            }
        }
    }

    if let Ok(content) = tokio::fs::read_to_string(workspace.join("package.json")).await
        && let Ok(pkg) = serde_json::from_str::<PackageJson>(&content)
    {
        return AppMetadata {
            title: pkg.name.filter(|n| !n.is_empty()),
            description: pkg.description.filter(|d| !d.is_empty()),
        };
    }

    AppMetadata::default()
}
