use colloquy_context::{
    resolve, ContextCategory, ContextError, ContextSpec, ContextSpecInput, ResolveOptions,
    WarningReason,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: impl AsRef<[u8]>) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

fn options(root: &Path) -> ResolveOptions {
    ResolveOptions::default().with_root(root)
}

fn numbered_lines(count: usize) -> String {
    (1..=count).map(|n| format!("line {n}\n")).collect()
}

#[test]
fn directory_then_file_keeps_input_order() {
    let temp = TempDir::new().expect("tempdir");
    for name in ["a", "b", "c", "d", "e"] {
        write(temp.path(), &format!("src/{name}.py"), "x".repeat(8_000));
    }
    write(temp.path(), "src/notes.txt", "ignored by the extension filter");
    write(temp.path(), "README.md", "r".repeat(2_000));

    let specs = vec![
        ContextSpecInput::from(
            ContextSpec::path("src/")
                .recursive(true)
                .extensions(&[".py"]),
        ),
        ContextSpecInput::from("README.md"),
    ];
    let resolution =
        resolve(&specs, &options(temp.path()).with_budget(100_000)).expect("resolve");

    let paths: Vec<&str> = resolution
        .fragments
        .iter()
        .map(|f| f.source_path.as_str())
        .collect();
    assert_eq!(
        paths,
        vec!["src/a.py", "src/b.py", "src/c.py", "src/d.py", "src/e.py", "README.md"]
    );
    assert_eq!(resolution.total_bytes, 42_000);
    assert!(!resolution.truncated);
    assert!(resolution.warnings.is_empty());
    assert!(resolution.fragments.iter().all(|f| f.is_whole_file()));
}

#[test]
fn missing_file_is_a_warning_not_an_error() {
    let temp = TempDir::new().expect("tempdir");
    let resolution = resolve(
        &[ContextSpecInput::from("missing.txt")],
        &options(temp.path()).with_budget(1_000),
    )
    .expect("resolve");

    assert!(resolution.fragments.is_empty());
    assert_eq!(resolution.warnings.len(), 1);
    assert_eq!(resolution.warnings[0].reason, WarningReason::NotFound);
    assert_eq!(resolution.warnings[0].path, "missing.txt");
}

#[test]
fn resolving_twice_is_byte_identical() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "lib/one.rs", "fn one() {}\n");
    write(temp.path(), "lib/two.rs", "fn two() {}\n");
    write(temp.path(), "lib/nested/three.rs", "fn three() {}\n");

    let specs = vec![
        ContextSpecInput::from("lib"),
        ContextSpecInput::from("lib/*.rs"),
    ];
    let opts = options(temp.path()).with_category(ContextCategory::Code);
    let first = resolve(&specs, &opts).expect("first");
    let second = resolve(&specs, &opts).expect("second");

    assert_eq!(first, second);
    assert_eq!(first.fragments.len(), 3);
    // the glob only re-covers files the directory already produced
    assert_eq!(first.fragments[0].origin_specs, vec![0]);
    assert_eq!(first.fragments[1].origin_specs, vec![0, 1]);
}

#[test]
fn overflowing_fragment_is_truncated_and_marked() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "a.txt", numbered_lines(10));
    write(temp.path(), "b.txt", numbered_lines(10));
    write(temp.path(), "c.txt", numbered_lines(10));

    let a_len = numbered_lines(10).len();
    let budget = a_len + 20;
    let specs: Vec<ContextSpecInput> = ["a.txt", "b.txt", "c.txt"]
        .into_iter()
        .map(ContextSpecInput::from)
        .collect();
    let resolution = resolve(&specs, &options(temp.path()).with_budget(budget)).expect("resolve");

    assert_eq!(resolution.fragments.len(), 2);
    assert!(resolution.total_bytes <= budget);
    assert_eq!(resolution.total_bytes, budget);
    assert!(resolution.truncated);

    let cut = &resolution.fragments[1];
    assert!(cut.truncated);
    assert_eq!(cut.size_bytes, 20);
    assert_eq!(cut.content, "line 1\nline 2\nline 3");
    assert_eq!(cut.line_start, Some(1));
    assert_eq!(cut.line_end, Some(3));
    assert!(resolution
        .warnings
        .iter()
        .any(|w| w.reason == WarningReason::BudgetExhausted));
}

#[test]
fn wider_range_wins_and_provenance_is_merged() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "big.rs", numbered_lines(50));

    let specs = vec![
        ContextSpecInput::from(ContextSpec::path("big.rs").lines(10, 12)),
        ContextSpecInput::from(ContextSpec::path("big.rs").lines(5, 20)),
    ];
    let resolution = resolve(&specs, &options(temp.path())).expect("resolve");

    assert_eq!(resolution.fragments.len(), 1);
    let fragment = &resolution.fragments[0];
    assert_eq!((fragment.line_start, fragment.line_end), (Some(5), Some(20)));
    assert_eq!(fragment.origin_specs, vec![0, 1]);
    assert!(fragment.content.starts_with("line 5\n"));
    assert!(fragment.content.ends_with("line 20\n"));
}

#[test]
fn range_end_is_clamped_and_past_end_start_is_skipped() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "short.md", numbered_lines(4));
    write(temp.path(), "other.md", numbered_lines(2));

    let specs: Vec<ContextSpecInput> = serde_json::from_value(serde_json::json!([
        {"path": "short.md", "from": 3, "to": 400},
        {"path": "other.md", "from": 9, "to": 12}
    ]))
    .expect("specs");
    let resolution = resolve(&specs, &options(temp.path())).expect("resolve");

    assert_eq!(resolution.fragments.len(), 1);
    assert_eq!(resolution.fragments[0].content, "line 3\nline 4\n");
    assert_eq!(resolution.fragments[0].line_end, Some(4));
    assert_eq!(resolution.warnings.len(), 1);
    assert_eq!(resolution.warnings[0].reason, WarningReason::RangePastEnd);
}

#[test]
fn glob_expansion_is_lexicographic_and_skips_builtin_exclusions() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "pkg/zeta.py", "z");
    write(temp.path(), "pkg/alpha.py", "a");
    write(temp.path(), "pkg/mid/beta.py", "b");
    write(temp.path(), "pkg/__pycache__/alpha.py", "cached");

    let resolution = resolve(
        &[ContextSpecInput::from("pkg/**/*.py")],
        &options(temp.path()),
    )
    .expect("resolve");

    let paths: Vec<&str> = resolution
        .fragments
        .iter()
        .map(|f| f.source_path.as_str())
        .collect();
    assert_eq!(paths, vec!["pkg/alpha.py", "pkg/mid/beta.py", "pkg/zeta.py"]);
}

#[test]
fn directory_pattern_is_relative_to_the_directory() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "docs/guide.md", "guide");
    write(temp.path(), "docs/api/ref.md", "ref");
    write(temp.path(), "docs/conf.toml", "x = 1");

    let resolution = resolve(
        &[ContextSpecInput::from(ContextSpec::path("docs").pattern("*.md"))],
        &options(temp.path()),
    )
    .expect("resolve");

    let paths: Vec<&str> = resolution
        .fragments
        .iter()
        .map(|f| f.source_path.as_str())
        .collect();
    assert_eq!(paths, vec!["docs/guide.md"]);
}

#[test]
fn binary_and_oversized_files_are_skipped_with_warnings() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "blob.bin", [0x7f, b'E', b'L', b'F', 0, 1, 2]);
    write(temp.path(), "huge.txt", "h".repeat(4_096));
    write(temp.path(), "ok.txt", "fine");

    let specs: Vec<ContextSpecInput> = ["blob.bin", "huge.txt", "ok.txt"]
        .into_iter()
        .map(ContextSpecInput::from)
        .collect();
    let mut opts = options(temp.path());
    opts.max_file_bytes = 1_024;
    let resolution = resolve(&specs, &opts).expect("resolve");

    assert_eq!(resolution.fragments.len(), 1);
    assert_eq!(resolution.fragments[0].source_path, "ok.txt");
    let reasons: Vec<WarningReason> = resolution.warnings.iter().map(|w| w.reason).collect();
    assert_eq!(reasons, vec![WarningReason::Binary, WarningReason::TooLarge]);
}

#[test]
fn category_selects_default_extensions_for_directories() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "proj/main.go", "package main");
    write(temp.path(), "proj/README.md", "# readme");
    write(temp.path(), "proj/config.yaml", "a: 1");

    let specs = [ContextSpecInput::from("proj")];
    let code = resolve(&specs, &options(temp.path()).with_category(ContextCategory::Code))
        .expect("code");
    let docs = resolve(&specs, &options(temp.path()).with_category(ContextCategory::Docs))
        .expect("docs");
    let general = resolve(&specs, &options(temp.path())).expect("general");

    assert_eq!(code.fragments.len(), 1);
    assert_eq!(code.fragments[0].source_path, "proj/main.go");
    assert_eq!(docs.fragments[0].source_path, "proj/README.md");
    assert_eq!(general.fragments.len(), 3);
}

#[test]
fn focus_reorders_by_relevance() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "a.txt", "nothing to see");
    write(temp.path(), "b.txt", "checkpoint checkpoint checkpoint");

    let specs: Vec<ContextSpecInput> = ["a.txt", "b.txt"]
        .into_iter()
        .map(ContextSpecInput::from)
        .collect();
    let resolution = resolve(
        &specs,
        &options(temp.path()).with_focus(Some("checkpoint".to_string())),
    )
    .expect("resolve");

    assert_eq!(resolution.fragments[0].source_path, "b.txt");
    assert_eq!(resolution.fragments[1].source_path, "a.txt");
}

#[test]
fn malformed_spec_fails_before_any_io() {
    let temp = TempDir::new().expect("tempdir");
    let specs = vec![
        ContextSpecInput::from("missing.txt"),
        ContextSpecInput::from(ContextSpec::path("x.rs").lines(9, 3)),
    ];
    let err = resolve(&specs, &options(temp.path())).expect_err("invalid");
    assert!(matches!(err, ContextError::InvalidSpec { index: 1, .. }));
}

#[test]
fn fragments_carry_content_digest() {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "hello.txt", "hello");
    let resolution =
        resolve(&[ContextSpecInput::from("hello.txt")], &options(temp.path())).expect("resolve");
    assert_eq!(
        resolution.fragments[0].sha256,
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
}
