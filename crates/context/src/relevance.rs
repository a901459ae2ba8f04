//! Keyword relevance used when a request supplies `focus` terms.

const MAX_HITS_PER_KEYWORD: usize = 5;
const HIT_WEIGHT: f64 = 0.1;
const LARGE_ITEM_BYTES: usize = 8_000;
const LARGE_ITEM_PENALTY: f64 = 0.7;

/// Lowercased focus keywords; words shorter than two characters are ignored.
pub fn keywords(focus: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in focus.split(|c: char| c.is_whitespace() || c == ',' || c == ';') {
        let word = word.trim().to_lowercase();
        if word.chars().count() < 2 || out.contains(&word) {
            continue;
        }
        out.push(word);
    }
    out
}

pub fn score(keywords: &[String], path: &str, content: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let haystack = content.to_lowercase();
    let path = path.to_lowercase();
    let mut score = 0.0;
    for keyword in keywords {
        let hits = haystack.matches(keyword.as_str()).take(MAX_HITS_PER_KEYWORD).count();
        score += hits as f64 * HIT_WEIGHT;
        if path.contains(keyword.as_str()) {
            score += HIT_WEIGHT;
        }
    }
    if content.len() > LARGE_ITEM_BYTES {
        score *= LARGE_ITEM_PENALTY;
    }
    score
}

/// Stable: equal scores keep their input order.
pub fn order_by_score(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}
