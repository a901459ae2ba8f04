use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

use crate::filters::{ExcludeSet, ExtensionFilter};
use crate::fragment::{ResolveWarning, WarningReason};

/// Files found under one directory spec, plus the entries that could not be read.
#[derive(Debug, Default)]
pub struct Scan {
    pub files: Vec<PathBuf>,
    pub warnings: Vec<ResolveWarning>,
}

/// Expands a directory into a deterministic, sorted list of files.
pub struct DirectoryScanner {
    root: PathBuf,
    recursive: bool,
    gitignore: bool,
    extensions: ExtensionFilter,
    excludes: ExcludeSet,
}

impl DirectoryScanner {
    pub fn new(root: impl AsRef<Path>, excludes: ExcludeSet) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            recursive: true,
            gitignore: false,
            extensions: ExtensionFilter::default(),
            excludes,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn gitignore(mut self, gitignore: bool) -> Self {
        self.gitignore = gitignore;
        self
    }

    pub fn extensions(mut self, extensions: ExtensionFilter) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn scan(&self) -> Scan {
        let mut scan = Scan::default();

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(false)
            .hidden(false)
            .git_ignore(self.gitignore)
            .git_exclude(self.gitignore)
            .parents(self.gitignore)
            .require_git(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b));
        if !self.recursive {
            builder.max_depth(Some(1));
        }

        let root = self.root.clone();
        let excludes = self.excludes.clone();
        builder.filter_entry(move |entry| {
            let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            !excludes.excludes(relative)
        });

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }
                    let path = entry.path();
                    if !self.extensions.accepts(path) {
                        log::trace!("Skipping {} (extension filter)", path.display());
                        continue;
                    }
                    scan.files.push(path.to_path_buf());
                }
                Err(err) => {
                    log::warn!("Failed to read entry under {}: {err}", self.root.display());
                    scan.warnings.push(walk_warning(&self.root, &err));
                }
            }
        }

        scan.files.sort();
        log::debug!(
            "Expanded {} into {} files",
            self.root.display(),
            scan.files.len()
        );
        scan
    }
}

fn walk_warning(root: &Path, err: &ignore::Error) -> ResolveWarning {
    let path = error_path(err).unwrap_or_else(|| root.to_path_buf());
    let path = path.display().to_string();
    match err.io_error() {
        Some(io) => ResolveWarning::from_io(path, io),
        None => ResolveWarning::new(path, WarningReason::Unreadable).with_detail(err.to_string()),
    }
}

fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}
