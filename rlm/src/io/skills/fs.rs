//! Filesystem skills.
//!
//! Reads accept absolute paths or paths relative to the project root. Writes
//! are sandboxed: the resolved target must stay inside the project root and
//! may not contain `..` components.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use globset::Glob;
use serde::Deserialize;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use super::{SkillContext, parse_params, resolve_read};

#[derive(Debug, Deserialize)]
struct PeekFileParams {
    path: String,
    #[serde(default)]
    start: usize,
    #[serde(default = "default_peek_end")]
    end: usize,
}

fn default_peek_end() -> usize {
    2_000
}

/// Return characters `[start, end)` of a text file.
pub fn peek_file(params: &Map<String, Value>, ctx: &SkillContext) -> Result<String> {
    let params: PeekFileParams = parse_params("peek_file", params)?;
    if params.end < params.start {
        bail!("peek_file end ({}) is before start ({})", params.end, params.start);
    }
    let path = resolve_read(&ctx.project_root, &params.path);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let slice: String = contents
        .chars()
        .skip(params.start)
        .take(params.end - params.start)
        .collect();
    Ok(format!(
        "[peek_file] {} [{}..{}]\n{slice}",
        path.display(),
        params.start,
        params.end
    ))
}

#[derive(Debug, Deserialize)]
struct ListDirParams {
    #[serde(default = "default_dir")]
    path: String,
    #[serde(default = "default_max_items")]
    max_items: usize,
}

fn default_dir() -> String {
    ".".to_string()
}

fn default_max_items() -> usize {
    100
}

/// List one directory level, sorted, directories suffixed with `/`.
pub fn list_dir(params: &Map<String, Value>, ctx: &SkillContext) -> Result<String> {
    let params: ListDirParams = parse_params("list_dir", params)?;
    let dir = resolve_read(&ctx.project_root, &params.path);
    let mut names = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("list {}", dir.display()))? {
        let entry = entry.with_context(|| format!("list {}", dir.display()))?;
        let mut name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    Ok(render_listing("list_dir", &dir, &names, params.max_items))
}

#[derive(Debug, Deserialize)]
struct ReadEntireFileParams {
    path: String,
    #[serde(default = "default_max_size")]
    max_size_bytes: u64,
}

fn default_max_size() -> u64 {
    1_000_000
}

/// Read a whole text file, refusing files larger than `max_size_bytes`.
pub fn read_entire_file_safe(params: &Map<String, Value>, ctx: &SkillContext) -> Result<String> {
    let params: ReadEntireFileParams = parse_params("read_entire_file_safe", params)?;
    let path = resolve_read(&ctx.project_root, &params.path);
    let meta = fs::metadata(&path).with_context(|| format!("stat {}", path.display()))?;
    if !meta.is_file() {
        bail!("{} is not a file", path.display());
    }
    if meta.len() > params.max_size_bytes {
        bail!(
            "{} is {} bytes, larger than max_size_bytes {}",
            path.display(),
            meta.len(),
            params.max_size_bytes
        );
    }
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    Ok(format!("[read_entire_file_safe] {}\n{contents}", path.display()))
}

#[derive(Debug, Deserialize)]
struct WriteFileParams {
    path: String,
    content: String,
    #[serde(default)]
    overwrite: bool,
}

pub fn write_file_safe(params: &Map<String, Value>, ctx: &SkillContext) -> Result<String> {
    let params: WriteFileParams = parse_params("write_file_safe", params)?;
    write_sandboxed(&ctx.project_root, &params.path, &params.content, params.overwrite)
}

/// Write `content` to `raw_path` inside `root`, creating parent directories.
///
/// Symlinks never carry a write out of the root: the parent directory is
/// checked after canonicalization and a symlink target is refused.
/// Returns `"[write_file_safe] Wrote N bytes to <path>"`.
pub fn write_sandboxed(root: &Path, raw_path: &str, content: &str, overwrite: bool) -> Result<String> {
    let (canonical_root, target) = resolve_write(root, raw_path)?;
    let parent = target
        .parent()
        .with_context(|| format!("write path {} has no parent", target.display()))?;

    ensure_confined(&canonical_root, deepest_existing(parent))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let parent = ensure_confined(&canonical_root, parent)?;
    let target = parent.join(
        target
            .file_name()
            .with_context(|| format!("write path {} has no file name", target.display()))?,
    );

    if let Ok(meta) = fs::symlink_metadata(&target) {
        if meta.file_type().is_symlink() {
            bail!("refusing to write through symlink {}", target.display());
        }
    }

    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut file = match options.open(&target) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            bail!("{} already exists and overwrite is false", target.display())
        }
        Err(err) => {
            return Err(err).with_context(|| format!("open {}", target.display()));
        }
    };
    file.write_all(content.as_bytes())
        .with_context(|| format!("write {}", target.display()))?;
    Ok(format!(
        "[write_file_safe] Wrote {} bytes to {}",
        content.len(),
        target.display()
    ))
}

/// Nearest ancestor of `path` that exists (without following a final symlink).
fn deepest_existing(path: &Path) -> &Path {
    let mut current = path;
    while fs::symlink_metadata(current).is_err() {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current
}

/// Canonicalize `dir` and require it to sit inside `canonical_root`.
fn ensure_confined(canonical_root: &Path, dir: &Path) -> Result<PathBuf> {
    let resolved =
        fs::canonicalize(dir).with_context(|| format!("resolve {}", dir.display()))?;
    if !resolved.starts_with(canonical_root) {
        bail!(
            "write path resolves to {} outside project root {}",
            resolved.display(),
            canonical_root.display()
        );
    }
    Ok(resolved)
}

/// Lexically resolve a write target and reject anything that escapes `root`.
///
/// Returns the canonical root and the joined target.
fn resolve_write(root: &Path, raw_path: &str) -> Result<(PathBuf, PathBuf)> {
    let raw = raw_path.trim();
    if raw.is_empty() {
        bail!("write path is empty");
    }
    let input = Path::new(raw);
    if input.components().any(|c| matches!(c, Component::ParentDir)) {
        bail!("write path '{raw}' may not contain '..'");
    }
    fs::create_dir_all(root).with_context(|| format!("create project root {}", root.display()))?;
    let canonical_root = fs::canonicalize(root)
        .with_context(|| format!("resolve project root {}", root.display()))?;

    let relative = if input.is_absolute() {
        match input
            .strip_prefix(&canonical_root)
            .or_else(|_| input.strip_prefix(root))
        {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => bail!(
                "write path {} is outside project root {}",
                input.display(),
                canonical_root.display()
            ),
        }
    } else {
        input.to_path_buf()
    };
    if relative.as_os_str().is_empty() {
        bail!("write path '{raw}' names the project root itself");
    }
    let target = canonical_root.join(relative);
    Ok((canonical_root, target))
}

#[derive(Debug, Deserialize)]
struct ListRecursiveParams {
    #[serde(default = "default_dir")]
    path: String,
    #[serde(default = "default_pattern")]
    pattern: String,
    #[serde(default = "default_max_depth")]
    max_depth: usize,
    #[serde(default = "default_recursive_items")]
    max_items: usize,
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_max_depth() -> usize {
    3
}

fn default_recursive_items() -> usize {
    200
}

/// List files under a directory whose file name matches a glob.
pub fn list_files_recursive(params: &Map<String, Value>, ctx: &SkillContext) -> Result<String> {
    let params: ListRecursiveParams = parse_params("list_files_recursive", params)?;
    let dir = resolve_read(&ctx.project_root, &params.path);
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let matcher = Glob::new(&params.pattern)
        .with_context(|| format!("invalid glob '{}'", params.pattern))?
        .compile_matcher();

    let mut files = Vec::new();
    for entry in WalkDir::new(&dir)
        .max_depth(params.max_depth.max(1))
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() || !matcher.is_match(entry.file_name()) {
            continue;
        }
        let rel = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
        files.push(rel.display().to_string());
    }
    Ok(render_listing("list_files_recursive", &dir, &files, params.max_items))
}

pub(crate) fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn render_listing(skill: &str, dir: &Path, names: &[String], max_items: usize) -> String {
    let mut out = format!("[{skill}] {} ({} entries)", dir.display(), names.len());
    for name in names.iter().take(max_items) {
        let _ = write!(out, "\n{name}");
    }
    if names.len() > max_items {
        let _ = write!(out, "\n... {} more", names.len() - max_items);
    }
    out
}
