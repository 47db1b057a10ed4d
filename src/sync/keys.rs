//! Remote key derivation.
//!
//! A key is the file's path relative to the sync root, always with `/`
//! separators. The same file gives the same key whether it was reached via a
//! relative or absolute path, from any working directory, or through a
//! symlinked directory.

use std::path::{Component, Path, PathBuf};

/// Prefix for files that resolve outside the root.
pub const EXTERNAL_PREFIX: &str = "_external";

/// Make `path` absolute against the current directory without touching the
/// filesystem further.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Remove `.` and resolve `..` lexically.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => components.push(component),
            },
            _ => components.push(component),
        }
    }
    components.iter().collect()
}

/// Join the normal components of a relative path with `/`.
fn to_key(relative: &Path) -> Option<String> {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Resolve directory symlinks in the parent but keep the file's own name, so
/// a symlinked file keeps its own key.
fn resolve_parent(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    parent.canonicalize().ok().map(|p| p.join(name))
}

fn external_key(path: &Path) -> String {
    let resolved = path.canonicalize().unwrap_or_else(|_| clean_path(&absolute(path)));
    let digest = blake3::hash(resolved.to_string_lossy().as_bytes()).to_hex();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    format!("{}/{}-{}", EXTERNAL_PREFIX, &digest.as_str()[..16], name)
}

/// Deterministic remote key for `path` under `root`.
pub fn remote_key_for(path: &Path, root: &Path) -> String {
    let abs_path = clean_path(&absolute(path));
    let abs_root = clean_path(&absolute(root));

    if let (Some(resolved), Ok(canonical_root)) = (resolve_parent(&abs_path), abs_root.canonicalize()) {
        if let Some(key) = resolved.strip_prefix(&canonical_root).ok().and_then(to_key) {
            return key;
        }
    }

    if let Some(key) = abs_path.strip_prefix(&abs_root).ok().and_then(to_key) {
        return key;
    }

    external_key(&abs_path)
}
