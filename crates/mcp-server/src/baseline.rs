use colloquy_context::ContextFragment;

use crate::tools::scoring::estimate_tokens;

pub const DEFAULT_BASELINE_TOKENS: usize = 10_000;
const EXCERPT_LINES: usize = 12;
const TRUNCATION_NOTE: &str = "\n... (section truncated to fit token budget)\n\n";

/// Produces the structured document that opens an iterative discussion.
pub trait DocumentGenerator: Send + Sync {
    fn generate(&self, topic: &str, fragments: &[ContextFragment]) -> String;
}

struct Section {
    title: &'static str,
    body: String,
    /// 1 is kept first.
    priority: u8,
}

/// Markdown baseline built from the topic and the resolved context, under a token budget.
#[derive(Debug, Clone)]
pub struct BaselineGenerator {
    token_budget: usize,
}

impl Default for BaselineGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_TOKENS)
    }
}

const REQUIREMENT_HINTS: &[(&str, &str)] = &[
    ("performance", "Latency and throughput targets are stated and measured"),
    ("fast", "Latency and throughput targets are stated and measured"),
    ("secur", "Threats, trust boundaries and secrets handling are addressed"),
    ("auth", "Authentication and authorisation paths are explicit"),
    ("scal", "Behaviour under growth in data and load is described"),
    ("test", "Verification strategy covers the critical paths"),
    ("api", "Interface contracts and error semantics are pinned down"),
    ("data", "Data ownership, consistency and retention are defined"),
    ("migrat", "Rollout and rollback steps are planned"),
    ("cach", "Invalidation and staleness rules are explicit"),
];

impl BaselineGenerator {
    pub fn new(token_budget: usize) -> Self {
        Self {
            token_budget: token_budget.max(1),
        }
    }

    fn sections(topic: &str, fragments: &[ContextFragment]) -> Vec<Section> {
        let total_bytes: usize = fragments.iter().map(|f| f.size_bytes).sum();
        let mut sections = vec![
            Section {
                title: "Executive Summary",
                body: format!(
                    "This document frames the discussion on **{topic}**. It draws on {} context \
                     fragment(s) totalling {total_bytes} bytes.\n",
                    fragments.len()
                ),
                priority: 1,
            },
            Section {
                title: "Problem Statement",
                body: format!("{topic}\n"),
                priority: 1,
            },
        ];

        if !fragments.is_empty() {
            let mut inventory = String::new();
            for fragment in fragments {
                inventory.push_str(&format!(
                    "- `{}` ({} bytes{})\n",
                    fragment.label(),
                    fragment.size_bytes,
                    if fragment.truncated { ", truncated" } else { "" }
                ));
            }
            sections.push(Section {
                title: "Context Inventory",
                body: inventory,
                priority: 2,
            });

            let mut excerpts = String::new();
            for fragment in fragments {
                excerpts.push_str(&format!("### {}\n\n```\n", fragment.label()));
                for line in fragment.content.lines().take(EXCERPT_LINES) {
                    excerpts.push_str(line);
                    excerpts.push('\n');
                }
                excerpts.push_str("```\n\n");
            }
            sections.push(Section {
                title: "Key Excerpts",
                body: excerpts,
                priority: 3,
            });
        }

        let lowered = topic.to_lowercase();
        let mut requirements: Vec<&str> = Vec::new();
        for (needle, requirement) in REQUIREMENT_HINTS {
            if lowered.contains(needle) && !requirements.contains(requirement) {
                requirements.push(*requirement);
            }
        }
        if requirements.is_empty() {
            requirements.push("Scope and constraints are agreed before design work starts");
        }
        sections.push(Section {
            title: "Requirements",
            body: requirements.iter().map(|r| format!("- {r}\n")).collect(),
            priority: 2,
        });

        sections.push(Section {
            title: "Open Questions",
            body: format!(
                "1. What are the hard constraints on {topic}?\n\
                 2. Which alternatives were considered and rejected?\n\
                 3. What are the failure modes and how are they detected?\n\
                 4. What would make this a success in three months?\n"
            ),
            priority: 1,
        });
        sections.push(Section {
            title: "Success Criteria",
            body: "- The recommended approach is concrete enough to implement\n\
                   - Risks are named with mitigations\n\
                   - Open questions have owners or answers\n"
                .to_string(),
            priority: 2,
        });
        sections
    }
}

fn floor_char_boundary(text: &str, max_bytes: usize) -> usize {
    if max_bytes >= text.len() {
        return text.len();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    end
}

impl DocumentGenerator for BaselineGenerator {
    fn generate(&self, topic: &str, fragments: &[ContextFragment]) -> String {
        let mut sections = Self::sections(topic.trim(), fragments);
        sections.sort_by_key(|s| s.priority);

        let mut document = format!("# Baseline: {}\n\n", topic.trim());
        let mut used = 0usize;
        for section in sections {
            let cost = estimate_tokens(&section.body) as usize;
            if used + cost <= self.token_budget {
                document.push_str(&format!("## {}\n\n{}\n", section.title, section.body));
                used += cost;
                continue;
            }
            let remaining = self.token_budget.saturating_sub(used);
            if remaining > 0 {
                let end = floor_char_boundary(&section.body, remaining * 4);
                document.push_str(&format!("## {}\n\n", section.title));
                document.push_str(&section.body[..end]);
                document.push_str(TRUNCATION_NOTE);
            }
            log::debug!(
                "Baseline for {topic:?} stopped at section {:?} (budget {} tokens)",
                section.title,
                self.token_budget
            );
            break;
        }
        document
    }
}
