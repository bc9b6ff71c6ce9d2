//! Local configuration snapshot (`.env`).
//!
//! The snapshot is rebuilt in memory on every successful run and then written
//! in one step: the full buffer goes to a temp file next to the target, is
//! fsynced, and renamed over the target. A crash mid-write leaves the previous
//! snapshot intact.
//!
//! Entry order: credentials, then resource entries in the order they were
//! resolved, then entries carried forward from the previous snapshot.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
};

use tracing::debug;

use crate::{
    config::{ANON_KEY_VAR, Credentials, URL_VAR},
    error::AppError,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<(String, String)>,
}

impl Snapshot {
    /// Start a snapshot holding the remote endpoint and access credential.
    pub fn new(credentials: &Credentials) -> Self {
        let mut snap = Self::default();
        snap.set(URL_VAR, &credentials.url);
        snap.set(ANON_KEY_VAR, &credentials.anon_key);
        snap
    }

    /// Insert or replace `key`, keeping its original position on replace.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        for (k, v) in entries {
            self.set(&k, &v);
        }
    }

    /// Append entries from a previous snapshot whose keys this one lacks.
    /// Returns how many were carried.
    pub fn carry_forward(&mut self, previous: impl IntoIterator<Item = (String, String)>) -> usize {
        let mut carried = 0;
        for (k, v) in previous {
            if self.get(&k).is_none() {
                self.entries.push((k, v));
                carried += 1;
            }
        }
        carried
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Every key in `required` must be present with a non-empty value.
    pub fn require(&self, required: &[&str]) -> Result<(), AppError> {
        for key in required {
            match self.get(key) {
                Some(v) if !v.is_empty() => {}
                _ => {
                    return Err(AppError::Snapshot(format!("required entry {key} is missing or empty")));
                }
            }
        }
        Ok(())
    }

    /// Render as `KEY=value` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push('=');
            out.push_str(&quote(v));
            out.push('\n');
        }
        out
    }
}

/// Values made only of URL/base64-safe characters are written bare; anything
/// else is double-quoted with `\`, `"`, `$` and newlines escaped.
fn quote(value: &str) -> String {
    let bare = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:+=@,~%?&".contains(c));
    if bare {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Read the entries of an existing snapshot, or nothing if there is none.
///
/// An unparseable snapshot is an error: overwriting it would silently drop
/// whatever it held.
pub fn read_existing(path: &Path) -> Result<Vec<(String, String)>, AppError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let iter = dotenvy::from_path_iter(path)
        .map_err(|e| AppError::Snapshot(format!("cannot read {}: {e}", path.display())))?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Snapshot(format!("cannot parse {}: {e}", path.display())))
}

/// Replace `path` with `contents` via temp file + rename in the same directory.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), AppError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| AppError::Snapshot(format!("{} has no file name", path.display())))?
        .to_string_lossy()
        .to_string();
    fs::create_dir_all(&dir)
        .map_err(|e| AppError::Snapshot(format!("cannot create {}: {e}", dir.display())))?;

    let tmp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    let result = write_then_rename(&tmp_path, path, contents);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_then_rename(tmp_path: &Path, path: &Path, contents: &str) -> Result<(), AppError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(tmp_path)
        .map_err(|e| AppError::Snapshot(format!("cannot create {}: {e}", tmp_path.display())))?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| AppError::Snapshot(format!("cannot write {}: {e}", tmp_path.display())))?;
    drop(file);

    fs::rename(tmp_path, path)
        .map_err(|e| AppError::Snapshot(format!("cannot replace {}: {e}", path.display())))?;
    debug!(path = %path.display(), bytes = contents.len(), "snapshot written");
    Ok(())
}
