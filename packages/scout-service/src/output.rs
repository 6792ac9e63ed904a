use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use scout_domain::pagination::PaginationMetadata;

/// Compact stand-in for the page payload once it has been written to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputReference {
	pub path: String,
	pub item_count: usize,
	pub page_count: usize,
	pub pagination: PaginationMetadata,
}

/// Relative paths resolve against the workspace directory. Paths that climb out of the
/// workspace, or absolute paths outside it, are rejected.
pub fn resolve_output_path(workspace: &str, output_file: &str) -> Result<PathBuf> {
	let path = Path::new(output_file);
	let relative = if path.is_absolute() {
		path.strip_prefix(workspace).map_err(|_| escapes(output_file))?
	} else {
		path
	};
	let mut names = 0_usize;

	for component in relative.components() {
		match component {
			Component::Normal(_) => names += 1,
			Component::CurDir => {},
			Component::ParentDir | Component::RootDir | Component::Prefix(_) =>
				return Err(escapes(output_file)),
		}
	}

	if names == 0 {
		return Err(escapes(output_file));
	}

	Ok(Path::new(workspace).join(relative))
}

pub async fn write_payload<T>(path: &Path, payload: &T) -> Result<()>
where
	T: Serialize,
{
	let bytes = serde_json::to_vec_pretty(payload)
		.map_err(|err| Error::OutputWrite { message: err.to_string() })?;

	if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
		tokio::fs::create_dir_all(parent).await.map_err(|err| Error::OutputWrite {
			message: format!("Failed to create {}: {err}", parent.display()),
		})?;
	}

	tokio::fs::write(path, bytes).await.map_err(|err| Error::OutputWrite {
		message: format!("Failed to write {}: {err}", path.display()),
	})
}

fn escapes(output_file: &str) -> Error {
	Error::InvalidRequest {
		message: format!("output_file {output_file:?} must name a file inside the workspace."),
	}
}
