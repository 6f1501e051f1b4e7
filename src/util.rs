use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Opens `path`, naming the `kind` of file in the error.
pub fn open(path: &Path, kind: &str) -> Result<File> {
    File::open(path).with_context(|| format!("Opening {} file `{}`", kind, path.display()))
}

/// Returns the path beside `dir` with `suffix` appended to its name, e.g.
/// `out` and `staging` give `out.staging`.
pub fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "site".into());
    name.push(".");
    name.push(suffix);
    dir.with_file_name(name)
}
