//! Static adversarial pattern catalog.
//!
//! A fixed table of `(category, pattern, weight)` tuples, compiled once on
//! first use. Matching is a pure function of the input text: lowercase the
//! text, run each category's pattern set, and report at most one finding
//! per category (the first matching pattern supplies the span).

use std::sync::OnceLock;

use regex::{Regex, RegexSet};

use super::assessment::{InjectionCategory, InjectionFinding};

/// One category's compiled patterns.
struct CategoryPatterns {
    category: InjectionCategory,
    /// Fast multi-pattern pre-check.
    regex_set: RegexSet,
    /// Individual regexes for extracting the matched span.
    regexes: Vec<Regex>,
    /// Weight contributed when this category matches.
    weight: u8,
}

/// The compiled catalog, shared process-wide.
pub(super) struct Catalog {
    patterns: Vec<CategoryPatterns>,
}

static CATALOG: OnceLock<Catalog> = OnceLock::new();

impl Catalog {
    /// Returns the process-wide compiled catalog.
    pub(super) fn shared() -> &'static Catalog {
        CATALOG.get_or_init(Catalog::build)
    }

    /// Matches `text` against every category and returns the findings.
    pub(super) fn match_text(&self, text: &str) -> Vec<InjectionFinding> {
        let text_lower = text.to_lowercase();
        let mut findings = Vec::new();

        for cat in &self.patterns {
            if !cat.regex_set.is_match(&text_lower) {
                continue;
            }
            for regex in &cat.regexes {
                if let Some(m) = regex.find(&text_lower) {
                    findings.push(InjectionFinding {
                        category: cat.category,
                        matched_span: m.as_str().to_string(),
                        weight: cat.weight,
                    });
                    break;
                }
            }
        }

        findings
    }

    fn build() -> Catalog {
        Catalog {
            patterns: vec![
                Self::build_role_switch(),
                Self::build_instruction_override(),
                Self::build_prompt_extraction(),
                Self::build_context_escape(),
                Self::build_jailbreak(),
                Self::build_impersonation(),
                Self::build_script_payload(),
            ],
        }
    }

    fn build_role_switch() -> CategoryPatterns {
        let patterns = vec![
            r"\byou\s+are\s+now\s+(a|an|the|no\s+longer)\b",
            r"\bact\s+as\s+(if\s+you\s+(are|were)|an?\s+\w+\s+(without|with\s+no))\b",
            r"\bpretend\s+(to\s+be|you\s+are|you're)\b",
            r"\broleplay\s+as\b",
            r"\bfrom\s+now\s+on\s+you\s+(are|will|must)\b",
            r"\bassume\s+the\s+(role|persona|identity)\s+of\b",
        ];
        Self::compile(InjectionCategory::RoleSwitch, &patterns, 30)
    }

    fn build_instruction_override() -> CategoryPatterns {
        let patterns = vec![
            r"\b(ignore|disregard|forget|skip)\s+(all\s+|any\s+|the\s+)?(previous|prior|earlier|above|your)\s+(instructions?|rules?|guidelines?|prompts?|directives?|context)\b",
            r"\boverride\s+(your|the|all)\s+(instructions?|rules?|settings|programming)\b",
            r"\byour\s+(new\s+)?(instructions?|rules?)\s+(are|replace|supersede)\b",
            r"\bnew\s+instructions?\s*:",
            r"\bdo\s+not\s+follow\s+(your|the)\s+(instructions?|rules?|guidelines?)\b",
            r"\bthe\s+(above|previous)\s+instructions?\s+(are|is)\s+(wrong|void|cancelled|canceled)\b",
        ];
        Self::compile(InjectionCategory::InstructionOverride, &patterns, 45)
    }

    fn build_prompt_extraction() -> CategoryPatterns {
        let patterns = vec![
            r"\b(reveal|show|print|display|repeat|output|expose|leak)\s+(me\s+)?(your|the)\s+(system\s+|initial\s+|hidden\s+)?(prompt|instructions?)\b",
            r"\bwhat\s+(is|are)\s+your\s+(system\s+)?(prompt|instructions?)\b",
            r"\btell\s+me\s+(your|the)\s+(system\s+)?(prompt|instructions?)\b",
            r"\brepeat\s+(everything|all\s+text)\s+(above|before)\b",
            r"\bverbatim\s+copy\s+of\s+(your|the)\s+prompt\b",
        ];
        Self::compile(InjectionCategory::PromptExtraction, &patterns, 40)
    }

    fn build_context_escape() -> CategoryPatterns {
        let patterns = vec![
            r"\[/?(system|assistant|inst)\]",
            r"</?(system|assistant)>",
            r"<<\s*/?sys\s*>>",
            r"(?m)^\s*###\s+(system|instruction)",
            r"\bend\s+of\s+(system|user)\s+(message|input|text)\b",
            r"-{3,}\s*(begin|end)\s+[a-z ]*(text|content|message)",
            r"```\s*system",
        ];
        Self::compile(InjectionCategory::ContextEscape, &patterns, 35)
    }

    fn build_jailbreak() -> CategoryPatterns {
        let patterns = vec![
            r"\b(dan|developer|god)\s+mode\b",
            r"\b(jailbreak|jailbroken)\b",
            r"\bdo\s+anything\s+now\b",
            r"\b(you\s+have|with)\s+no\s+(restrictions?|limitations?|filters?)\b",
            r"\bbypass\s+(your\s+|all\s+)?(safety|content|ethical)\s*(filters?|restrictions?|guidelines?)?\b",
            r"\bunfiltered\s+(mode|ai|responses?)\b",
            r"\bwithout\s+(any\s+)?(censorship|moral|ethical)\s+(guidelines?|constraints?)\b",
        ];
        Self::compile(InjectionCategory::Jailbreak, &patterns, 40)
    }

    fn build_impersonation() -> CategoryPatterns {
        let patterns = vec![
            r"\b(this\s+is|we\s+are|i\s+am)\s+(your|the)\s+bank('s)?\s*(security|fraud|support)?\b",
            r"\bofficial\s+(bank\s+)?(security|fraud|support)\s+(team|department|desk)\b",
            r"\bon\s+behalf\s+of\s+(your|the)\s+bank\b",
            r"\b(fraud|security)\s+department\s+calling\b",
            r"\byour\s+account\s+(team|manager)\s+(here|speaking)\b",
        ];
        Self::compile(InjectionCategory::Impersonation, &patterns, 50)
    }

    fn build_script_payload() -> CategoryPatterns {
        let patterns = vec![
            r"<script\b",
            r"javascript\s*:",
            r"\bon(error|load|click|mouseover)\s*=",
            r"<iframe\b",
            r"\beval\s*\(",
            r"\bdocument\.(cookie|write)\b",
            r"<\?php\b",
            r"#!/bin/(ba)?sh\b",
            r"\bpowershell(\.exe)?\s+-",
            r"\bbase64\s*,\s*[a-z0-9+/=]{40,}",
        ];
        Self::compile(InjectionCategory::ScriptPayload, &patterns, 60)
    }

    fn compile(category: InjectionCategory, patterns: &[&str], weight: u8) -> CategoryPatterns {
        let regex_set = RegexSet::new(patterns).expect("invalid catalog pattern");
        let regexes = patterns
            .iter()
            .map(|p| Regex::new(p).expect("invalid catalog pattern"))
            .collect();

        CategoryPatterns {
            category,
            regex_set,
            regexes,
            weight,
        }
    }
}
