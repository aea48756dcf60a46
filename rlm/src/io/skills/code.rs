//! Code skills: search, static analysis, test runs.

use std::fmt::Write as _;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use super::fs::is_hidden;
use super::{SkillContext, TestKind, TestRequest, parse_params, resolve_read};

/// Directories never searched.
const SKIP_DIRS: &[&str] = &["target", "node_modules", "__pycache__", "venv"];
/// Files larger than this are skipped by search.
const MAX_SEARCH_FILE_BYTES: u64 = 1_000_000;
const MAX_MATCHES_PER_FILE: usize = 5;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SearchMode {
    #[default]
    Keyword,
    Regex,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default = "default_dir")]
    path: String,
    pattern: String,
    #[serde(default = "default_max_files")]
    max_files: usize,
    #[serde(default)]
    mode: SearchMode,
}

fn default_dir() -> String {
    ".".to_string()
}

fn default_max_files() -> usize {
    50
}

/// Search text files for a keyword (case-insensitive) or regex.
pub fn search_codebase(params: &Map<String, Value>, ctx: &SkillContext) -> Result<String> {
    let params: SearchParams = parse_params("search_codebase", params)?;
    if params.pattern.trim().is_empty() {
        bail!("search_codebase pattern is empty");
    }
    let root = resolve_read(&ctx.project_root, &params.path);
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let matcher = match params.mode {
        SearchMode::Keyword => Regex::new(&format!("(?i){}", regex::escape(&params.pattern))),
        SearchMode::Regex => Regex::new(&params.pattern),
    }
    .with_context(|| format!("invalid search pattern '{}'", params.pattern))?;

    let mut out = String::new();
    let mut files_with_matches = 0usize;
    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(is_hidden(e.file_name()) || is_skipped_dir(e)))
        .filter_map(Result::ok);
    for entry in walker {
        if files_with_matches >= params.max_files {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_SEARCH_FILE_BYTES {
            continue;
        }
        // Binary or non-UTF-8 files are skipped.
        let Ok(contents) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        let mut hits = 0usize;
        for (idx, line) in contents.lines().enumerate() {
            if !matcher.is_match(line) {
                continue;
            }
            if hits < MAX_MATCHES_PER_FILE {
                let _ = write!(out, "\n{}:{}: {}", rel.display(), idx + 1, line.trim());
            }
            hits += 1;
        }
        if hits > 0 {
            files_with_matches += 1;
        }
    }

    if files_with_matches == 0 {
        return Ok(format!(
            "[search_codebase] No matches for '{}' under {}",
            params.pattern,
            root.display()
        ));
    }
    Ok(format!(
        "[search_codebase] Matches for '{}' in {files_with_matches} file(s):{out}",
        params.pattern
    ))
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.file_type().is_dir() && SKIP_DIRS.iter().any(|dir| *dir == name)
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    code: String,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default = "default_max_length")]
    max_length: usize,
}

fn default_language() -> String {
    "auto".to_string()
}

fn default_max_length() -> usize {
    4_096
}

struct Rule {
    /// Languages the rule applies to; empty means all.
    languages: &'static [&'static str],
    needle: &'static str,
    finding: &'static str,
}

const RULES: &[Rule] = &[
    Rule { languages: &["rust"], needle: "panic!(", finding: "explicit panic! aborts the thread; return a Result instead" },
    Rule { languages: &["rust"], needle: ".unwrap()", finding: "unwrap() panics on None/Err; propagate with ?" },
    Rule { languages: &["rust"], needle: ".expect(", finding: "expect() panics on None/Err; propagate with ?" },
    Rule { languages: &["rust"], needle: "unsafe ", finding: "unsafe block needs a documented invariant" },
    Rule { languages: &["python"], needle: "except:", finding: "bare except swallows every exception; catch a specific type" },
    Rule { languages: &["python"], needle: "eval(", finding: "eval() executes arbitrary input" },
    Rule { languages: &["python"], needle: "exec(", finding: "exec() executes arbitrary input" },
    Rule { languages: &["python"], needle: "import *", finding: "wildcard import hides where names come from" },
    Rule { languages: &[], needle: "TODO", finding: "unfinished TODO marker" },
    Rule { languages: &[], needle: "FIXME", finding: "unresolved FIXME marker" },
];

/// Heuristic static analysis; returns an `[analyze_code] RCA: ...` report.
pub fn analyze_code(params: &Map<String, Value>, _ctx: &SkillContext) -> Result<String> {
    let params: AnalyzeParams = parse_params("analyze_code", params)?;
    Ok(analyze_snippet(&params.code, &params.language, params.max_length))
}

/// Analyze `code` directly; used by the code review finalizer.
pub fn analyze_snippet(code: &str, language: &str, max_length: usize) -> String {
    let language = match language.trim().to_ascii_lowercase().as_str() {
        "auto" | "" => detect_language(code),
        "rs" => "rust".to_string(),
        "py" => "python".to_string(),
        other => other.to_string(),
    };
    let mut end = code.len().min(max_length);
    while !code.is_char_boundary(end) {
        end -= 1;
    }
    let scanned = &code[..end];

    let mut findings = Vec::new();
    for (idx, line) in scanned.lines().enumerate() {
        for rule in RULES {
            let applies = rule.languages.is_empty() || rule.languages.contains(&language.as_str());
            if applies && line.contains(rule.needle) {
                findings.push(format!("line {}: {}", idx + 1, rule.finding));
            }
        }
    }

    let mut report = format!(
        "[analyze_code] RCA ({language}, {} lines scanned): ",
        scanned.lines().count()
    );
    if findings.is_empty() {
        report.push_str("no issues found by static heuristics.");
    } else {
        let _ = write!(report, "{} finding(s)", findings.len());
        for finding in &findings {
            let _ = write!(report, "\n- {finding}");
        }
    }
    if end < code.len() {
        let _ = write!(report, "\n[analysis truncated at {end} bytes]");
    }
    report
}

fn detect_language(code: &str) -> String {
    if code.contains("fn ") || code.contains("let mut ") || code.contains("impl ") {
        return "rust".to_string();
    }
    if code.contains("def ") || code.contains("import ") || code.contains("self.") {
        return "python".to_string();
    }
    "unknown".to_string()
}

#[derive(Debug, Deserialize)]
struct RunTestsParams {
    #[serde(default = "default_dir")]
    dir: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: TestKind,
    #[serde(default = "default_timeout_sec")]
    timeout_sec: u64,
}

fn default_kind() -> TestKind {
    TestKind::Python
}

fn default_timeout_sec() -> u64 {
    300
}

/// Run the project's test suite through the configured [`super::TestRunner`].
pub fn run_tests(params: &Map<String, Value>, ctx: &SkillContext) -> Result<String> {
    let params: RunTestsParams = parse_params("run_tests", params)?;
    let dir = resolve_read(&ctx.project_root, &params.dir);
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let outcome = ctx.test_runner.run(&TestRequest {
        dir,
        kind: params.kind,
        timeout: Duration::from_secs(params.timeout_sec.max(1)),
        output_limit_bytes: ctx.output_limit_bytes,
    })?;
    Ok(outcome.describe(params.kind))
}
