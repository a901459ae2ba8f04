use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::Result;
use crate::filters::{ExcludeSet, ExtensionFilter};
use crate::fragment::{ContextFragment, Resolution, ResolveWarning, WarningReason};
use crate::relevance;
use crate::scanner::DirectoryScanner;
use crate::spec::{is_glob_text, ContextCategory, ContextSpec, ContextSpecInput, LineRange};

pub const DEFAULT_BUDGET_BYTES: usize = 200_000;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;
const BINARY_SNIFF_BYTES: usize = 8_000;

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Upper bound on the summed `size_bytes` of all fragments.
    pub budget_bytes: usize,
    /// Supplies default extensions for directory specs without an explicit list.
    pub category: ContextCategory,
    pub max_file_bytes: u64,
    /// Base for relative spec paths and for displayed fragment paths.
    pub root: PathBuf,
    /// Keywords that switch accumulation to relevance order.
    pub focus: Option<String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            category: ContextCategory::General,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            root: PathBuf::from("."),
            focus: None,
        }
    }
}

impl ResolveOptions {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_budget(mut self, budget_bytes: usize) -> Self {
        self.budget_bytes = budget_bytes;
        self
    }

    pub fn with_category(mut self, category: ContextCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_focus(mut self, focus: Option<String>) -> Self {
        self.focus = focus.filter(|f| !f.trim().is_empty());
        self
    }
}

/// One `(file, range)` pair after expansion and deduplication.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    display: String,
    range: LineRange,
    origins: Vec<usize>,
}

struct Loaded {
    candidate: Candidate,
    content: String,
    line_start: Option<usize>,
    line_end: Option<usize>,
}

/// Resolves `specs` into fragments, in input order unless `focus` is set.
///
/// Every spec is validated before the filesystem is touched. Per-file problems become warnings.
pub fn resolve(specs: &[ContextSpecInput], options: &ResolveOptions) -> Result<Resolution> {
    let specs: Vec<ContextSpec> = specs.iter().cloned().map(ContextSpecInput::into_spec).collect();
    for (index, spec) in specs.iter().enumerate() {
        spec.validate(index)?;
    }

    let root = fs::canonicalize(&options.root).unwrap_or_else(|_| options.root.clone());
    let mut warnings = Vec::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    for (index, spec) in specs.iter().enumerate() {
        let range = spec.range();
        for path in expand(spec, &root, options.category, &mut warnings) {
            push_candidate(
                &mut candidates,
                Candidate {
                    display: display_path(&root, &path),
                    path,
                    range,
                    origins: vec![index],
                },
            );
        }
    }

    let mut loaded = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match load(candidate, options.max_file_bytes) {
            Ok(item) => loaded.push(item),
            Err(warning) => warnings.push(warning),
        }
    }

    let order = match options.focus.as_deref().map(relevance::keywords) {
        Some(keywords) if !keywords.is_empty() => {
            let scores: Vec<f64> = loaded
                .iter()
                .map(|item| relevance::score(&keywords, &item.candidate.display, &item.content))
                .collect();
            relevance::order_by_score(&scores)
        }
        _ => (0..loaded.len()).collect(),
    };

    let mut resolution = accumulate(&loaded, &order, options.budget_bytes, &mut warnings);
    for warning in &warnings {
        log::warn!(
            "Context {}: {}{}",
            warning.reason.as_str(),
            warning.path,
            warning
                .detail
                .as_deref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default()
        );
    }
    resolution.warnings = warnings;
    Ok(resolution)
}

fn accumulate(
    loaded: &[Loaded],
    order: &[usize],
    budget: usize,
    warnings: &mut Vec<ResolveWarning>,
) -> Resolution {
    let mut resolution = Resolution {
        budget_bytes: budget,
        ..Resolution::default()
    };

    for (position, &index) in order.iter().enumerate() {
        let item = &loaded[index];
        let remaining = budget - resolution.total_bytes;
        if item.content.len() <= remaining {
            resolution.total_bytes += item.content.len();
            resolution.fragments.push(fragment(
                item,
                item.content.clone(),
                item.line_start,
                item.line_end,
                false,
            ));
            continue;
        }

        resolution.truncated = true;
        let cut = floor_char_boundary(&item.content, remaining);
        let mut omitted = order.len() - position - 1;
        if cut == 0 {
            omitted += 1;
        } else {
            let kept = &item.content[..cut];
            let start = item.line_start.unwrap_or(1);
            let end = start + kept.split_inclusive('\n').count() - 1;
            resolution.total_bytes += cut;
            resolution.fragments.push(fragment(
                item,
                kept.to_string(),
                Some(start),
                Some(end),
                true,
            ));
            log::debug!(
                "Truncated {} to {cut} of {} bytes",
                item.candidate.display,
                item.content.len()
            );
        }
        if omitted > 0 {
            warnings.push(
                ResolveWarning::new("*", WarningReason::BudgetExhausted)
                    .with_detail(format!("{omitted} candidate(s) omitted at {budget} bytes")),
            );
        }
        break;
    }
    resolution
}

fn fragment(
    item: &Loaded,
    content: String,
    line_start: Option<usize>,
    line_end: Option<usize>,
    truncated: bool,
) -> ContextFragment {
    let sha256 = hex_encode_lower(&Sha256::digest(content.as_bytes()));
    ContextFragment {
        source_path: item.candidate.display.clone(),
        line_start,
        line_end,
        size_bytes: content.len(),
        content,
        truncated,
        origin_specs: item.candidate.origins.clone(),
        sha256,
    }
}

/// Same file: a range already covered only merges provenance; a wider range takes the slot of
/// the first range it covers and absorbs the rest. Partial overlaps stay separate.
fn push_candidate(candidates: &mut Vec<Candidate>, incoming: Candidate) {
    if let Some(existing) = candidates
        .iter_mut()
        .find(|c| c.path == incoming.path && c.range.contains(&incoming.range))
    {
        merge_origins(&mut existing.origins, &incoming.origins);
        return;
    }

    let covered: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.path == incoming.path && incoming.range.contains(&c.range))
        .map(|(i, _)| i)
        .collect();
    let Some((&first, rest)) = covered.split_first() else {
        candidates.push(incoming);
        return;
    };

    let mut origins = candidates[first].origins.clone();
    for &index in rest {
        merge_origins(&mut origins, &candidates[index].origins);
    }
    merge_origins(&mut origins, &incoming.origins);
    for &index in rest.iter().rev() {
        candidates.remove(index);
    }
    let slot = &mut candidates[first];
    slot.range = incoming.range;
    slot.origins = origins;
}

fn merge_origins(into: &mut Vec<usize>, from: &[usize]) {
    for origin in from {
        if !into.contains(origin) {
            into.push(*origin);
        }
    }
    into.sort_unstable();
}

fn expand(
    spec: &ContextSpec,
    root: &Path,
    category: ContextCategory,
    warnings: &mut Vec<ResolveWarning>,
) -> Vec<PathBuf> {
    let joined = root.join(spec.path.trim());

    let files = if let Some(pattern) = spec.pattern.as_deref() {
        let base = match fs::canonicalize(&joined) {
            Ok(base) if base.is_dir() => base,
            Ok(_) => {
                warnings.push(
                    ResolveWarning::new(&spec.path, WarningReason::NoMatches)
                        .with_detail("`pattern` requires a directory path"),
                );
                return Vec::new();
            }
            Err(err) => {
                warnings.push(ResolveWarning::from_io(&spec.path, &err));
                return Vec::new();
            }
        };
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(&base.to_string_lossy()),
            pattern.trim().trim_start_matches("./")
        );
        glob_files(&full, &base, spec, warnings)
    } else if spec.is_glob() {
        let full = if Path::new(spec.path.trim()).is_absolute() {
            spec.path.trim().to_string()
        } else {
            format!(
                "{}/{}",
                glob::Pattern::escape(&root.to_string_lossy()),
                spec.path.trim().trim_start_matches("./")
            )
        };
        let base = literal_prefix(&joined);
        glob_files(&full, &base, spec, warnings)
    } else {
        let target = match fs::canonicalize(&joined) {
            Ok(target) => target,
            Err(err) => {
                warnings.push(ResolveWarning::from_io(&spec.path, &err));
                return Vec::new();
            }
        };
        if !target.is_dir() {
            return vec![target];
        }
        let extensions = match spec.extensions.as_deref() {
            Some(explicit) => ExtensionFilter::new(explicit),
            None => ExtensionFilter::new(category.default_extensions()),
        };
        let scan = DirectoryScanner::new(&target, ExcludeSet::with_user(&spec.exclude))
            .recursive(spec.recursive.unwrap_or(true))
            .gitignore(spec.gitignore)
            .extensions(extensions)
            .scan();
        warnings.extend(scan.warnings);
        scan.files
    };

    if files.is_empty() {
        warnings.push(ResolveWarning::new(&spec.path, WarningReason::NoMatches));
    }
    files
}

fn glob_files(
    pattern: &str,
    base: &Path,
    spec: &ContextSpec,
    warnings: &mut Vec<ResolveWarning>,
) -> Vec<PathBuf> {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(err) => {
            warnings.push(
                ResolveWarning::new(&spec.path, WarningReason::InvalidPattern)
                    .with_detail(err.msg),
            );
            return Vec::new();
        }
    };

    let excludes = ExcludeSet::with_user(&spec.exclude);
    let extensions = ExtensionFilter::new(spec.extensions.as_deref().unwrap_or(&[]));
    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => {
                if !path.is_file() {
                    continue;
                }
                let relative = path.strip_prefix(base).unwrap_or(&path);
                if excludes.excludes(relative) || !extensions.accepts(&path) {
                    log::trace!("Skipping {} (excluded)", path.display());
                    continue;
                }
                files.push(fs::canonicalize(&path).unwrap_or(path));
            }
            Err(err) => warnings.push(ResolveWarning::from_io(
                err.path().display().to_string(),
                err.error(),
            )),
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Leading components of a glob path that contain no wildcard.
fn literal_prefix(path: &Path) -> PathBuf {
    let mut prefix = PathBuf::new();
    for component in path.components() {
        if let Component::Normal(name) = component {
            if is_glob_text(&name.to_string_lossy()) {
                break;
            }
        }
        prefix.push(component);
    }
    prefix
}

fn load(candidate: Candidate, max_file_bytes: u64) -> std::result::Result<Loaded, ResolveWarning> {
    let display = candidate.display.clone();
    let meta = fs::metadata(&candidate.path).map_err(|e| ResolveWarning::from_io(&display, &e))?;
    if meta.len() > max_file_bytes {
        return Err(ResolveWarning::new(&display, WarningReason::TooLarge)
            .with_detail(format!("{} bytes > {max_file_bytes}", meta.len())));
    }
    let bytes = fs::read(&candidate.path).map_err(|e| ResolveWarning::from_io(&display, &e))?;
    if looks_binary(&bytes) {
        return Err(ResolveWarning::new(&display, WarningReason::Binary));
    }
    let text = String::from_utf8_lossy(&bytes).into_owned();

    if candidate.range.is_whole() {
        return Ok(Loaded {
            candidate,
            content: text,
            line_start: None,
            line_end: None,
        });
    }

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let total = lines.len();
    let start = candidate.range.start;
    if start > total {
        return Err(ResolveWarning::new(&display, WarningReason::RangePastEnd)
            .with_detail(format!("starts at line {start}, file has {total} lines")));
    }
    let end = candidate.range.end.map_or(total, |end| end.min(total));
    let content = lines[start - 1..end].concat();
    Ok(Loaded {
        candidate,
        content,
        line_start: Some(start),
        line_end: Some(end),
    })
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0)
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    if max >= text.len() {
        return text.len();
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

fn display_path(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) if !relative.as_os_str().is_empty() => {
            relative.to_string_lossy().replace('\\', "/")
        }
        _ => path.display().to_string(),
    }
}

fn hex_encode_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(path: &str, start: usize, end: Option<usize>, origin: usize) -> Candidate {
        Candidate {
            path: PathBuf::from(path),
            display: path.to_string(),
            range: LineRange { start, end },
            origins: vec![origin],
        }
    }

    fn summary(candidates: &[Candidate]) -> Vec<(String, usize, Option<usize>, Vec<usize>)> {
        candidates
            .iter()
            .map(|c| (c.display.clone(), c.range.start, c.range.end, c.origins.clone()))
            .collect()
    }

    #[test]
    fn covered_range_merges_provenance_only() {
        let mut list = Vec::new();
        push_candidate(&mut list, candidate("a.rs", 1, None, 0));
        push_candidate(&mut list, candidate("b.rs", 1, None, 1));
        push_candidate(&mut list, candidate("a.rs", 10, Some(20), 2));
        assert_eq!(
            summary(&list),
            vec![
                ("a.rs".to_string(), 1, None, vec![0, 2]),
                ("b.rs".to_string(), 1, None, vec![1]),
            ]
        );
    }

    #[test]
    fn wider_range_takes_first_slot_and_absorbs_others() {
        let mut list = Vec::new();
        push_candidate(&mut list, candidate("a.rs", 5, Some(8), 0));
        push_candidate(&mut list, candidate("b.rs", 1, None, 1));
        push_candidate(&mut list, candidate("a.rs", 12, Some(14), 2));
        push_candidate(&mut list, candidate("a.rs", 1, Some(30), 3));
        assert_eq!(
            summary(&list),
            vec![
                ("a.rs".to_string(), 1, Some(30), vec![0, 2, 3]),
                ("b.rs".to_string(), 1, None, vec![1]),
            ]
        );
    }

    #[test]
    fn partial_overlap_stays_separate() {
        let mut list = Vec::new();
        push_candidate(&mut list, candidate("a.rs", 1, Some(10), 0));
        push_candidate(&mut list, candidate("a.rs", 5, Some(15), 1));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn char_boundary_never_splits_code_points() {
        let text = "aé€";
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(floor_char_boundary(text, 3), 3);
        assert_eq!(floor_char_boundary(text, 5), 3);
        assert_eq!(floor_char_boundary(text, 100), text.len());
    }

    #[test]
    fn literal_prefix_stops_at_first_wildcard() {
        assert_eq!(
            literal_prefix(Path::new("/repo/src/**/*.rs")),
            PathBuf::from("/repo/src")
        );
        assert_eq!(literal_prefix(Path::new("/repo/*.md")), PathBuf::from("/repo"));
    }
}
