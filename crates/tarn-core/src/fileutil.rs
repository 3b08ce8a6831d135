//! Local path resolution against the repository root.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Resolve `path` against `root`.
///
/// Relative paths are joined onto `root`, `~/` expands to `$HOME`, and the
/// result is lexically normalised. Unless `allow_host_access` is set the
/// final path must stay inside `root`.
pub fn resolve_local_path(path: &str, root: &Path, allow_host_access: bool) -> Result<PathBuf> {
    let expanded = expand_home(path);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    };
    let resolved = normalize(&joined);
    if !allow_host_access && !resolved.starts_with(normalize(root)) {
        bail!("file connector cannot access data outside root: {}", path);
    }
    Ok(resolved)
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Remove `.` and resolve `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether a path contains glob metacharacters.
pub fn is_glob(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Match `name` against a glob where `*` stops at `/`, `**` crosses
/// directories and `?` matches one character.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn go(p: &[u8], n: &[u8]) -> bool {
        match p.first() {
            None => n.is_empty(),
            Some(b'*') if p.get(1) == Some(&b'*') => {
                let rest = p[2..].strip_prefix(b"/").unwrap_or(&p[2..]);
                (0..=n.len()).any(|i| go(rest, &n[i..]))
            }
            Some(b'*') => {
                let rest = &p[1..];
                for i in 0..=n.len() {
                    if go(rest, &n[i..]) {
                        return true;
                    }
                    if n.get(i) == Some(&b'/') {
                        break;
                    }
                }
                false
            }
            Some(b'?') => !n.is_empty() && n[0] != b'/' && go(&p[1..], &n[1..]),
            Some(c) => n.first() == Some(c) && go(&p[1..], &n[1..]),
        }
    }
    go(pattern.as_bytes(), name.as_bytes())
}

/// The longest leading part of a glob pattern without metacharacters, cut at
/// a `/` boundary. Used as the listing prefix.
pub fn glob_prefix(pattern: &str) -> &str {
    let first_meta = pattern.find(['*', '?', '[']).unwrap_or(pattern.len());
    match pattern[..first_meta].rfind('/') {
        Some(i) => &pattern[..=i],
        None => "",
    }
}

/// Local files matched by `path`, which may be a glob, in path order with
/// their sizes. A plain path must exist.
pub fn list_local_files(path: &Path) -> Result<Vec<(PathBuf, u64)>> {
    let pattern = path.to_string_lossy();
    if !is_glob(&pattern) {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("file does not exist: {}", path.display()))?;
        return Ok(vec![(path.to_path_buf(), meta.len())]);
    }

    let prefix = glob_prefix(&pattern);
    let base = if prefix.is_empty() { Path::new(".") } else { Path::new(prefix) };
    let mut out = Vec::new();
    let mut pending = vec![base.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if dir == base => {
                return Err(e).with_context(|| format!("cannot list {}", dir.display()))
            }
            Err(_) => continue,
        };
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let entry_path = entry.path();
            if file_type.is_dir() {
                pending.push(entry_path);
            } else if file_type.is_file() && glob_match(&pattern, &entry_path.to_string_lossy()) {
                out.push((entry_path, entry.metadata()?.len()));
            }
        }
    }
    out.sort();
    Ok(out)
}
