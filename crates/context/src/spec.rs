use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ContextError;

/// A context request item: either a bare path/glob or a detailed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ContextSpecInput {
    Path(String),
    Detailed(ContextSpec),
}

impl ContextSpecInput {
    pub fn into_spec(self) -> ContextSpec {
        match self {
            ContextSpecInput::Path(path) => ContextSpec::path(path),
            ContextSpecInput::Detailed(spec) => spec,
        }
    }
}

impl From<&str> for ContextSpecInput {
    fn from(value: &str) -> Self {
        ContextSpecInput::Path(value.to_string())
    }
}

impl From<ContextSpec> for ContextSpecInput {
    fn from(value: ContextSpec) -> Self {
        ContextSpecInput::Detailed(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ContextSpec {
    /// File, directory, or glob pattern.
    pub path: String,
    /// First line to include (1-based, inclusive).
    #[serde(default, alias = "from", skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    /// Last line to include (1-based, inclusive). Clamped to the file length.
    #[serde(default, alias = "to", skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    /// Directory recursion (default: true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    /// Extension allow-list for directories, e.g. `[".rs", "py"]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    /// Component names or wildcard patterns to skip.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    /// Glob evaluated relative to `path` when `path` is a directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Honour `.gitignore` files during directory walks.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub gitignore: bool,
}

impl ContextSpec {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn lines(mut self, start: usize, end: usize) -> Self {
        self.line_start = Some(start);
        self.line_end = Some(end);
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = Some(recursive);
        self
    }

    pub fn extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = Some(extensions.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn exclude(mut self, patterns: &[&str]) -> Self {
        self.exclude = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn range(&self) -> LineRange {
        LineRange {
            start: self.line_start.unwrap_or(1),
            end: self.line_end,
        }
    }

    pub fn is_glob(&self) -> bool {
        is_glob_text(&self.path)
    }

    pub(crate) fn validate(&self, index: usize) -> Result<(), ContextError> {
        let invalid = |reason: String| ContextError::InvalidSpec { index, reason };

        if self.path.trim().is_empty() {
            return Err(invalid("path must not be empty".to_string()));
        }
        if self.line_start == Some(0) || self.line_end == Some(0) {
            return Err(invalid("line numbers are 1-based".to_string()));
        }
        if let (Some(start), Some(end)) = (self.line_start, self.line_end) {
            if start > end {
                return Err(invalid(format!("line range {start}-{end} is reversed")));
            }
        }

        let mut patterns: Vec<&str> = Vec::new();
        if self.is_glob() {
            patterns.push(&self.path);
        }
        if let Some(pattern) = self.pattern.as_deref() {
            if pattern.trim().is_empty() {
                return Err(invalid("pattern must not be empty".to_string()));
            }
            patterns.push(pattern);
        }
        patterns.extend(
            self.exclude
                .iter()
                .map(String::as_str)
                .filter(|p| is_glob_text(p)),
        );
        for pattern in patterns {
            glob::Pattern::new(pattern).map_err(|err| ContextError::InvalidPattern {
                index,
                pattern: pattern.to_string(),
                reason: err.msg.to_string(),
            })?;
        }
        Ok(())
    }
}

pub(crate) fn is_glob_text(text: &str) -> bool {
    text.contains(['*', '?', '['])
}

/// Inclusive 1-based line range; `end == None` runs to end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl LineRange {
    pub const WHOLE: LineRange = LineRange {
        start: 1,
        end: None,
    };

    pub fn is_whole(&self) -> bool {
        *self == Self::WHOLE
    }

    pub fn contains(&self, other: &LineRange) -> bool {
        if self.start > other.start {
            return false;
        }
        match (self.end, other.end) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => theirs <= mine,
        }
    }
}

/// Declared context category; selects default extensions for directory specs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContextCategory {
    Code,
    Docs,
    Config,
    Web,
    Data,
    #[default]
    General,
}

impl ContextCategory {
    pub const NAMES: &'static [&'static str] = &["code", "docs", "config", "web", "data", "general"];

    /// Empty means every file qualifies.
    pub fn default_extensions(self) -> &'static [&'static str] {
        match self {
            ContextCategory::Code => &[
                "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "hpp", "cs", "go", "rs",
                "rb", "php", "swift", "kt", "scala", "r", "m",
            ],
            ContextCategory::Docs => &["md", "txt", "rst", "adoc", "tex", "org"],
            ContextCategory::Config => &["json", "yaml", "yml", "toml", "ini", "cfg", "conf", "xml"],
            ContextCategory::Web => &["html", "htm", "css", "scss", "sass", "less"],
            ContextCategory::Data => &["csv", "tsv", "sql"],
            ContextCategory::General => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContextCategory::Code => "code",
            ContextCategory::Docs => "docs",
            ContextCategory::Config => "config",
            ContextCategory::Web => "web",
            ContextCategory::Data => "data",
            ContextCategory::General => "general",
        }
    }
}

impl FromStr for ContextCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Ok(ContextCategory::Code),
            "docs" => Ok(ContextCategory::Docs),
            "config" => Ok(ContextCategory::Config),
            "web" => Ok(ContextCategory::Web),
            "data" => Ok(ContextCategory::Data),
            "general" | "all" => Ok(ContextCategory::General),
            other => Err(format!("unknown context category `{other}`")),
        }
    }
}
