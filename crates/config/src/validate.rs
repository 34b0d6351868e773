//! Configuration validation.
//!
//! Checks a TOML, YAML or JSON document for syntax errors, unknown or
//! misspelled keys, type errors, and settings that parse but cannot work.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::schema::SwitchboardConfig;

/// Config file syntax, chosen by extension the same way the loader does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Yaml,
    Json,
}

impl Format {
    /// `None` for an extension the loader cannot read. A path without an
    /// extension is TOML.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()).unwrap_or("toml") {
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Yaml => "YAML",
            Self::Json => "JSON",
        }
    }

    fn parse(self, raw: &str) -> Result<Value, String> {
        match self {
            Self::Toml => toml::from_str(raw).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
        }
    }
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
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
    /// "syntax", "unknown-field", "type-error", "value"
    pub category: &'static str,
    /// Dotted path, e.g. "store.op_timeout_ms"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree ─────────────────────────────────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Dynamic keys with free-form values.
    Map,
    Array(Box<KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Array, Leaf, Map, Struct};

    Struct(HashMap::from([
        (
            "dispatch",
            Struct(HashMap::from([
                ("dedup_window", Leaf),
                ("tie_break_seed", Leaf),
                ("selection_attempts", Leaf),
            ])),
        ),
        (
            "store",
            Struct(HashMap::from([
                ("namespace", Leaf),
                ("op_timeout_ms", Leaf),
                ("lease_timeout_ms", Leaf),
            ])),
        ),
        (
            "metrics",
            Struct(HashMap::from([("enabled", Leaf), ("labels", Map)])),
        ),
        (
            "agents",
            Array(Box::new(Struct(HashMap::from([
                ("id", Leaf),
                ("online", Leaf),
            ])))),
        ),
    ]))
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }
    prev[b.len()]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (levenshtein(needle, c), *c))
        .filter(|(d, _)| *d <= 3)
        .min()
        .map(|(_, c)| c)
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Validate the config file at `path`.
pub fn validate_file(path: &Path) -> ValidationResult {
    let syntax_error = |message: String| ValidationResult {
        diagnostics: vec![Diagnostic {
            severity: Severity::Error,
            category: "syntax",
            path: String::new(),
            message,
        }],
        config_path: None,
    };

    let mut result = match (std::fs::read_to_string(path), Format::from_path(path)) {
        (Err(e), _) => syntax_error(format!("cannot read {}: {e}", path.display())),
        (Ok(_), None) => syntax_error(format!(
            "unsupported config format: {}",
            path.display()
        )),
        (Ok(raw), Some(format)) => validate_str(&crate::env_subst::substitute_env(&raw), format),
    };
    result.config_path = Some(path.to_path_buf());
    result
}

/// Validate a TOML document.
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    validate_str(toml_str, Format::Toml)
}

/// Validate a document in the given format.
pub fn validate_str(raw: &str, format: Format) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value = match format.parse(raw) {
        // An empty YAML document is an empty config.
        Ok(Value::Null) => Value::Object(serde_json::Map::new()),
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("{} syntax error: {e}", format.name()),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<SwitchboardConfig>(value) {
        Ok(config) => diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on an already parsed config.
pub fn validate_config(config: &SwitchboardConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let mut error = |path: &str, message: String| {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "value",
            path: path.to_string(),
            message,
        });
    };

    if let Err(e) = config.dispatch.dedup_window() {
        error("dispatch.dedup_window", e.to_string());
    }
    if config.dispatch.selection_attempts == 0 {
        error(
            "dispatch.selection_attempts",
            "must be at least 1".to_string(),
        );
    }
    if config.store.op_timeout_ms == 0 {
        error("store.op_timeout_ms", "must be greater than 0".to_string());
    }
    if config.store.lease_timeout_ms == 0 {
        error("store.lease_timeout_ms", "must be greater than 0".to_string());
    }
    if config.store.namespace.trim().is_empty() {
        error("store.namespace", "must not be empty".to_string());
    }

    let mut seen = HashSet::new();
    for (i, agent) in config.agents.iter().enumerate() {
        if agent.id.trim().is_empty() {
            error(&format!("agents[{i}].id"), "must not be empty".to_string());
        } else if !seen.insert(agent.id.as_str()) {
            error(
                &format!("agents[{i}].id"),
                format!("duplicate agent id \"{}\"", agent.id),
            );
        }
    }

    if config.dispatch.dedup_window.is_none() {
        diagnostics.push(Diagnostic {
            severity: Severity::Info,
            category: "value",
            path: "dispatch.dedup_window".into(),
            message: "not set: identical messages from a customer are ignored forever".into(),
        });
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (value, schema) {
        (Value::Object(table), KnownKeys::Struct(fields)) => {
            let known: Vec<&str> = fields.keys().copied().collect();
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match fields.get(key.as_str()) {
                    Some(child_schema) => {
                        check_unknown_fields(child, child_schema, &path, diagnostics)
                    },
                    None => diagnostics.push(Diagnostic {
                        severity: Severity::Error,
                        category: "unknown-field",
                        path,
                        message: match suggest(key, &known) {
                            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                            None => "unknown field".to_string(),
                        },
                    }),
                }
            }
        },
        (Value::Array(items), KnownKeys::Array(item_schema)) => {
            for (i, item) in items.iter().enumerate() {
                check_unknown_fields(item, item_schema, &format!("{prefix}[{i}]"), diagnostics);
            }
        },
        // Leaf, free-form map, or a type mismatch caught by deserialization.
        _ => {},
    }
}
