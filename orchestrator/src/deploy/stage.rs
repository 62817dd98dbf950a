//! Current-stage extraction from deployment log text

use regex::Regex;

use crate::errors::OrchestratorError;

/// Label reported when no rule matches
pub const DEFAULT_STAGE: &str = "in progress";

/// Coordinator markers, in phase order
const MARKERS: &[&str] = &["preparing", "building", "deploying", "verifying"];

/// Free-text rules tried on script output, with the phase each one implies
const HEURISTICS: &[(&str, usize)] = &[
    (r"(?i)health[- ]?check|smoke test", 3),
    (
        r"(?i)\b(rsync|scp|docker(-compose| compose)? up|kubectl (apply|rollout)|systemctl (restart|reload)|pm2 (start|reload|restart))\b",
        2,
    ),
    (
        r"(?i)\b(npm (ci|install|run build)|yarn (install|build)|pnpm (install|build)|cargo build|mvn (package|install)|gradle build|docker build)\b",
        1,
    ),
    (r"(?i)\bgit (clone|fetch|pull|checkout)\b", 0),
];

#[derive(Debug, Clone)]
struct StageRule {
    pattern: Regex,
    label: String,
    /// Position in the phase order; `None` for custom rules
    phase: Option<usize>,
    marker: bool,
}

/// Maps accumulated log text to a human-readable stage label.
///
/// The newest coordinator marker sets a floor: script output after it may
/// only move the stage forward, never back to an earlier phase.
#[derive(Debug, Clone)]
pub struct StageExtractor {
    rules: Vec<StageRule>,
}

impl StageExtractor {
    /// Compile a custom rule set; the first matching rule on the newest matching line wins
    pub fn with_rules<P, L>(rules: impl IntoIterator<Item = (P, L)>) -> Result<Self, OrchestratorError>
    where
        P: AsRef<str>,
        L: Into<String>,
    {
        let rules = rules
            .into_iter()
            .map(|(pattern, label)| {
                let pattern = pattern.as_ref();
                Regex::new(pattern)
                    .map(|pattern| StageRule {
                        pattern,
                        label: label.into(),
                        phase: None,
                        marker: false,
                    })
                    .map_err(|e| {
                        OrchestratorError::ValidationError(format!(
                            "invalid stage pattern {}: {}",
                            pattern, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// The current stage label for `log`
    pub fn extract(&self, log: &str) -> String {
        // newest heuristic hit seen so far, pending the marker that bounds it
        let mut candidate: Option<&StageRule> = None;

        for line in log.lines().rev() {
            let Some(rule) = self.rules.iter().find(|rule| rule.pattern.is_match(line)) else {
                continue;
            };
            match rule.phase {
                None => return rule.label.clone(),
                Some(floor) if rule.marker => {
                    return match candidate {
                        Some(hit) if hit.phase.is_some_and(|phase| phase >= floor) => {
                            hit.label.clone()
                        }
                        _ => rule.label.clone(),
                    };
                }
                Some(_) => {
                    candidate.get_or_insert(rule);
                }
            }
        }

        candidate
            .map(|rule| rule.label.clone())
            .unwrap_or_else(|| DEFAULT_STAGE.to_string())
    }
}

impl Default for StageExtractor {
    fn default() -> Self {
        let markers = MARKERS.iter().enumerate().map(|(phase, name)| {
            (format!(r"\[stage:{}\]", name), phase, true)
        });
        let heuristics = HEURISTICS
            .iter()
            .map(|(pattern, phase)| (pattern.to_string(), *phase, false));

        let rules = markers
            .chain(heuristics)
            .filter_map(|(pattern, phase, marker)| {
                Regex::new(&pattern).ok().map(|pattern| StageRule {
                    pattern,
                    label: MARKERS[phase].to_string(),
                    phase: Some(phase),
                    marker,
                })
            })
            .collect();
        Self { rules }
    }
}
