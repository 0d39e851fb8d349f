//! Configuration validation.
//!
//! Reports syntax errors, unknown or misspelled fields, type errors, and
//! settings that parse but cannot work.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use crate::schema::ChanregConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", or "semantic"
    pub category: &'static str,
    /// Dotted path, e.g. "database.url"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Field names per section, mirroring `schema.rs`.
fn known_sections() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("database", &[
            "url",
            "max_connections",
            "supports_outer_joins",
            "write_timeout_secs",
        ][..]),
        ("categories", &["root"][..]),
        ("sequences", &["channel_type"][..]),
    ])
}

/// Validate a config file at the given path, or the discovered one when
/// `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "syntax",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(raw) => {
            let raw = crate::env_subst::substitute_env(&raw);
            match actual_path.extension().and_then(|e| e.to_str()) {
                Some("toml") | None => validate_toml_str(&raw),
                _ => match crate::loader::parse_config(&raw, &actual_path) {
                    Ok(config) => validate_config(&config),
                    Err(e) => ValidationResult {
                        diagnostics: vec![Diagnostic::new(
                            Severity::Error,
                            "type-error",
                            "",
                            e.to_string(),
                        )],
                        config_path: None,
                    },
                },
            }
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate a TOML string without touching the filesystem.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &mut diagnostics);

    match toml::from_str::<ChanregConfig>(toml_str) {
        Ok(config) => diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on an already parsed config.
#[must_use]
pub fn validate_config(config: &ChanregConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let db = &config.database;

    if !db.url.starts_with("sqlite:") {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "database.url",
            "only sqlite: URLs are supported",
        ));
    }
    if db.max_connections == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "database.max_connections",
            "must be at least 1",
        ));
    }
    if db.write_timeout_secs == Some(0) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "database.write_timeout_secs",
            "a zero timeout fails every write; omit it to disable the deadline",
        ));
    }
    if db.url.contains(":memory:") && db.max_connections > 1 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "database.max_connections",
            "each connection to an in-memory database sees its own database",
        ));
    }
    if config.categories.root.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "categories.root",
            "must not be empty",
        ));
    }
    if config.sequences.channel_type.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "sequences.channel_type",
            "must not be empty",
        ));
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(value: &toml::Value, diagnostics: &mut Vec<Diagnostic>) {
    let Some(table) = value.as_table() else {
        return;
    };
    let sections = known_sections();
    let section_names: Vec<&str> = sections.keys().copied().collect();

    for (section, body) in table {
        let Some(fields) = sections.get(section.as_str()) else {
            diagnostics.push(unknown_field(section, section, &section_names));
            continue;
        };
        let Some(body) = body.as_table() else {
            continue;
        };
        for key in body.keys() {
            if !fields.contains(&key.as_str()) {
                diagnostics.push(unknown_field(&format!("{section}.{key}"), key, fields));
            }
        }
    }
}

fn unknown_field(path: &str, key: &str, candidates: &[&str]) -> Diagnostic {
    let message = match suggest(key, candidates, 3) {
        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
        None => "unknown field".to_string(),
    };
    Diagnostic::new(Severity::Error, "unknown-field", path, message)
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(key: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(key, c)))
        .filter(|(_, d)| *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}
