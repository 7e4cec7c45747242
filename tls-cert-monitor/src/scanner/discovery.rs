//! Candidate discovery: which paths are worth handing to the parser.

use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

const CANDIDATE_EXTENSIONS: &[&str] =
	&["pem", "crt", "cer", "cert", "der", "p7b", "p7c", "pfx", "p12"];
const CERTISH_NAME_PARTS: &[&str] =
	&["cert", "certificate", "chain", "bundle", "ca-cert", "cacert"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PathClass {
	/// Looks like certificate material; parse it.
	Candidate,
	/// Certificate-shaped name but private-key pattern; counted, never parsed.
	PrivateKey,
	/// Not certificate material at all.
	Ignored,
}

pub(crate) fn classify_basename(basename: &str) -> PathClass {
	let lower = basename.to_ascii_lowercase();

	let certish_ext = lower
		.rsplit_once('.')
		.map(|(_, ext)| CANDIDATE_EXTENSIONS.contains(&ext))
		.unwrap_or(false);
	let certish_name = CERTISH_NAME_PARTS.iter().any(|part| lower.contains(part));
	if !certish_ext && !certish_name {
		return PathClass::Ignored;
	}

	let keyish = lower.ends_with(".key")
		|| lower.ends_with(".priv")
		|| lower.ends_with("_key")
		|| lower.ends_with("-key")
		|| lower.ends_with("key.pem")
		|| lower.contains("private");
	if keyish {
		return PathClass::PrivateKey;
	}
	PathClass::Candidate
}

/// Resolves to absolute form, following symlinks where the path exists and
/// folding `.`/`..` components lexically where it does not. `..` can never
/// escape above the filesystem root.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
	if let Ok(resolved) = path.canonicalize() {
		return resolved;
	}
	let absolute = if path.is_absolute() {
		path.to_path_buf()
	} else {
		std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
	};
	let mut normalized = PathBuf::new();
	for component in absolute.components() {
		match component {
			Component::CurDir => {},
			Component::ParentDir => {
				normalized.pop();
			},
			other => normalized.push(other),
		}
	}
	normalized
}

/// A path is scannable iff it sits below at least one include root and below
/// no exclude root. All inputs must already be normalized.
pub(crate) fn is_scannable(path: &Path, includes: &[PathBuf], excludes: &[PathBuf]) -> bool {
	includes.iter().any(|root| path.starts_with(root))
		&& !excludes.iter().any(|root| path.starts_with(root))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct DiscoveryCounts {
	pub files_seen: u64,
	pub private_keys_skipped: u64,
}

/// Walks every include root, reporting candidate files through
/// `on_candidate`. Traversal errors on one root never stop the others.
/// Returns early when `on_candidate` reports the consumer has gone away.
pub(crate) fn walk_roots(
	includes: &[PathBuf], excludes: &[PathBuf], mut on_candidate: impl FnMut(PathBuf) -> bool,
) -> DiscoveryCounts {
	let mut counts = DiscoveryCounts::default();

	for root in includes {
		for entry in WalkDir::new(root).follow_links(true) {
			let entry = match entry {
				Ok(entry) => entry,
				Err(e) => {
					warn!(root = %root.display(), error = %e, "directory traversal error");
					continue;
				},
			};
			if !entry.file_type().is_file() {
				continue;
			}
			let class = entry
				.file_name()
				.to_str()
				.map(classify_basename)
				.unwrap_or(PathClass::Ignored);
			if class == PathClass::Ignored {
				continue;
			}
			let path = normalize_path(entry.path());
			if !is_scannable(&path, includes, excludes) {
				continue;
			}
			counts.files_seen += 1;
			match class {
				PathClass::PrivateKey => counts.private_keys_skipped += 1,
				PathClass::Candidate => {
					if !on_candidate(path) {
						return counts;
					}
				},
				PathClass::Ignored => unreachable!("filtered above"),
			}
		}
	}
	counts
}
