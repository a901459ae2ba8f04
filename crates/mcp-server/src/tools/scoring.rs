const TECHNICAL_TERMS: &[&str] = &[
    "implement",
    "function",
    "class",
    "method",
    "algorithm",
    "optimize",
    "architecture",
    "performance",
    "security",
];

/// Rough token count when the provider does not report one: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

fn has_header(text: &str) -> bool {
    text.lines().any(|line| line.trim_start().starts_with('#'))
}

fn has_list(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("- ")
            || line.starts_with("* ")
            || line
                .split_once(". ")
                .is_some_and(|(n, _)| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Heuristic response quality in `0.0..=1.0`.
pub fn quality(response: &str) -> f64 {
    let lowered = response.to_lowercase();
    let signals = [
        (response.chars().count() > 100, 0.2),
        (response.contains("```"), 0.3),
        (has_header(response), 0.2),
        (has_list(response), 0.15),
        (TECHNICAL_TERMS.iter().any(|t| lowered.contains(t)), 0.15),
    ];
    let score: f64 = signals
        .iter()
        .filter(|(hit, _)| *hit)
        .map(|(_, weight)| weight)
        .sum();
    if score == 0.0 {
        0.3
    } else {
        score.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("ééééé"), 2);
    }

    #[test]
    fn plain_short_answer_gets_the_floor() {
        assert_eq!(quality("Short answer"), 0.3);
    }

    #[test]
    fn signals_add_up_and_cap_at_one() {
        assert!((quality("```rust\nlet x = 1;\n```") - 0.3).abs() < 1e-9);
        assert!((quality("# Header\n- item\n## Sub") - 0.35).abs() < 1e-9);

        let rich = format!(
            "# Plan\n\n1. Implement the cache\n- measure performance\n```rust\nfn f() {{}}\n```\n{}",
            "detail ".repeat(20)
        );
        assert!((quality(&rich) - 1.0).abs() < 1e-9);
    }
}
