use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A bounded excerpt of one file with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextFragment {
    /// Relative to the context root when the file lives under it.
    pub source_path: String,
    /// Absent when the fragment covers the whole file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    pub content: String,
    pub size_bytes: usize,
    /// Cut short by the byte budget.
    #[serde(default)]
    pub truncated: bool,
    /// Indices of the request specs that produced this fragment.
    pub origin_specs: Vec<usize>,
    pub sha256: String,
}

impl ContextFragment {
    pub fn is_whole_file(&self) -> bool {
        self.line_start.is_none() && self.line_end.is_none()
    }

    /// Header used when fragments are rendered into a prompt.
    pub fn label(&self) -> String {
        match (self.line_start, self.line_end) {
            (Some(start), Some(end)) => format!("{} (lines {start}-{end})", self.source_path),
            (Some(start), None) => format!("{} (from line {start})", self.source_path),
            _ => self.source_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WarningReason {
    NotFound,
    PermissionDenied,
    Binary,
    TooLarge,
    Unreadable,
    RangePastEnd,
    InvalidPattern,
    NoMatches,
    BudgetExhausted,
}

impl WarningReason {
    pub fn as_str(self) -> &'static str {
        match self {
            WarningReason::NotFound => "not_found",
            WarningReason::PermissionDenied => "permission_denied",
            WarningReason::Binary => "binary",
            WarningReason::TooLarge => "too_large",
            WarningReason::Unreadable => "unreadable",
            WarningReason::RangePastEnd => "range_past_end",
            WarningReason::InvalidPattern => "invalid_pattern",
            WarningReason::NoMatches => "no_matches",
            WarningReason::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// A skipped path or a resolution-wide note. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveWarning {
    pub path: String,
    pub reason: WarningReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ResolveWarning {
    pub fn new(path: impl Into<String>, reason: WarningReason) -> Self {
        Self {
            path: path.into(),
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn from_io(path: impl Into<String>, err: &std::io::Error) -> Self {
        let reason = match err.kind() {
            std::io::ErrorKind::NotFound => WarningReason::NotFound,
            std::io::ErrorKind::PermissionDenied => WarningReason::PermissionDenied,
            _ => WarningReason::Unreadable,
        };
        Self::new(path, reason).with_detail(err.to_string())
    }
}

/// Output of one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub fragments: Vec<ContextFragment>,
    pub warnings: Vec<ResolveWarning>,
    pub total_bytes: usize,
    pub budget_bytes: usize,
    /// True when any fragment was cut or any candidate was left out for budget.
    pub truncated: bool,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Renders fragments as labelled blocks for prompt assembly.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            out.push_str("--- File: ");
            out.push_str(&fragment.label());
            if fragment.truncated {
                out.push_str(" [truncated]");
            }
            out.push_str(" ---\n");
            out.push_str(&fragment.content);
            if !fragment.content.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}
