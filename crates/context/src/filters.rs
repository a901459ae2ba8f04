use glob::{MatchOptions, Pattern};
use std::path::{Component, Path};

use crate::spec::is_glob_text;

/// Always skipped during directory and glob expansion.
pub const BUILTIN_EXCLUDES: &[&str] = &[
    // VCS
    ".git",
    ".hg",
    ".svn",
    // dependencies / virtual environments
    "node_modules",
    ".venv",
    "venv",
    "env",
    ".env",
    ".tox",
    // build output / caches
    "__pycache__",
    "dist",
    "build",
    "target",
    "htmlcov",
    ".coverage",
    ".pytest_cache",
    ".mypy_cache",
    "*.egg-info",
    "*.pyc",
    "*.pyo",
    "*.pyd",
    "*.o",
    "*.so",
    "*.class",
    // editors / OS metadata
    ".idea",
    ".vscode",
    "*.swp",
    "*.swo",
    ".DS_Store",
    "Thumbs.db",
];

/// Exclusion rules for one spec: the built-in set plus the spec's own `exclude` list.
///
/// A plain entry matches any path component exactly (`node_modules`), or a path prefix when it
/// contains a separator (`src/generated`). A wildcard entry matches the file name or the whole
/// relative path.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    names: Vec<String>,
    prefixes: Vec<String>,
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    pub fn builtin() -> Self {
        let mut set = Self::default();
        for entry in BUILTIN_EXCLUDES {
            set.push(entry);
        }
        set
    }

    pub fn with_user(user: &[String]) -> Self {
        let mut set = Self::builtin();
        for entry in user {
            set.push(entry);
        }
        set
    }

    fn push(&mut self, raw: &str) {
        let normalized = normalize_filter_path(raw);
        if normalized.is_empty() {
            return;
        }
        if is_glob_text(&normalized) {
            match Pattern::new(&normalized) {
                Ok(pattern) => self.patterns.push(pattern),
                Err(err) => log::warn!("Ignoring exclude pattern {normalized:?}: {}", err.msg),
            }
        } else if normalized.contains('/') {
            self.prefixes.push(normalized);
        } else {
            self.names.push(normalized);
        }
    }

    /// `rel_path` is relative to the directory being expanded.
    pub fn excludes(&self, rel_path: &Path) -> bool {
        let mut joined = String::new();
        for component in rel_path.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let name = name.to_string_lossy();
            if self.names.iter().any(|excluded| excluded == name.as_ref()) {
                return true;
            }
            if self
                .patterns
                .iter()
                .any(|pattern| pattern.matches_with(&name, match_options()))
            {
                return true;
            }
            if !joined.is_empty() {
                joined.push('/');
            }
            joined.push_str(&name);
        }

        if joined.is_empty() {
            return false;
        }
        self.prefixes
            .iter()
            .any(|prefix| path_prefix_matches_normalized(prefix, &joined))
            || self
                .patterns
                .iter()
                .any(|pattern| pattern.matches_with(&joined, match_options()))
    }
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

fn normalize_filter_path(raw: &str) -> String {
    let mut value = raw.trim().replace('\\', "/");
    while let Some(rest) = value.strip_prefix("./") {
        value = rest.to_string();
    }
    let value = value.trim_matches('/');
    if value == "." {
        return String::new();
    }
    value.to_string()
}

fn path_prefix_matches_normalized(prefix: &str, path: &str) -> bool {
    if path == prefix {
        return true;
    }

    if !path.starts_with(prefix) {
        return false;
    }

    path.as_bytes().get(prefix.len()) == Some(&b'/')
}

/// Case-insensitive extension allow-list; empty accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    allowed: Vec<String>,
}

impl ExtensionFilter {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let allowed = extensions
            .iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { allowed }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn accepts(&self, path: &Path) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .is_some_and(|ext| self.allowed.iter().any(|allowed| *allowed == ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_skips_vcs_and_artifacts() {
        let set = ExcludeSet::builtin();
        assert!(set.excludes(Path::new(".git/config")));
        assert!(set.excludes(Path::new("pkg/node_modules/left-pad/index.js")));
        assert!(set.excludes(Path::new("pkg/__pycache__/mod.cpython-311.pyc")));
        assert!(set.excludes(Path::new("lib/mod.pyc")));
        assert!(set.excludes(Path::new("my_pkg.egg-info/PKG-INFO")));
        assert!(set.excludes(Path::new("docs/.DS_Store")));
        assert!(!set.excludes(Path::new("src/main.py")));
        assert!(!set.excludes(Path::new("src/builder.py")));
    }

    #[test]
    fn user_entries_match_components_prefixes_and_globs() {
        let set = ExcludeSet::with_user(&[
            "fixtures".to_string(),
            "./src/generated/".to_string(),
            "*_test.py".to_string(),
            "docs/*.md".to_string(),
        ]);
        assert!(set.excludes(Path::new("tests/fixtures/a.py")));
        assert!(set.excludes(Path::new("src/generated/schema.py")));
        assert!(!set.excludes(Path::new("src/generated_extra.py")));
        assert!(set.excludes(Path::new("pkg/io_test.py")));
        assert!(set.excludes(Path::new("docs/intro.md")));
        assert!(!set.excludes(Path::new("docs/guide/intro.md")));
    }

    #[test]
    fn empty_relative_path_is_never_excluded() {
        assert!(!ExcludeSet::builtin().excludes(Path::new("")));
    }

    #[test]
    fn extension_filter_normalises_dots_and_case() {
        let filter = ExtensionFilter::new(&[".PY", "rs", " "]);
        assert!(filter.accepts(Path::new("a/b.py")));
        assert!(filter.accepts(Path::new("lib.RS")));
        assert!(!filter.accepts(Path::new("README")));
        assert!(!filter.accepts(Path::new("notes.md")));
        assert!(ExtensionFilter::default().accepts(Path::new("README")));
    }
}
