//! Regex-based PII detector and redactor.

use std::collections::HashMap;

use async_trait::async_trait;
use config::{FirewallMode, RegexFilterConfig};
use jiff::Timestamp;
use serde_json::json;

use crate::{
    Detection, FilterContext, FirewallError,
    patterns::{CompiledPattern, PatternCatalogue},
    pipeline::{Filter, FilterDirection},
    store::PiiToken,
};

const FILTER_NAME: &str = "regex_pii";

/// Detects PII with the configured pattern set on both phases.
///
/// Input phase: records a detection per match; in redact mode the match is
/// replaced with a tokenizer-minted synthetic token, in enforce mode with
/// the fixed `[TYPE]` mask (when redaction is enabled), in monitor mode
/// nothing is substituted.
///
/// Output phase: in redact mode the response is detokenized first; when
/// that changed anything, detection is skipped entirely since originals
/// are legitimately returning to the caller.
pub struct RegexPiiFilter {
    priority: i32,
    patterns: Vec<CompiledPattern>,
    redact_enabled: bool,
}

struct SpanMatch<'t> {
    start: usize,
    end: usize,
    text: &'t str,
    pattern: usize,
}

impl RegexPiiFilter {
    /// Build the filter from its configuration and a loaded catalogue.
    pub fn new(config: &RegexFilterConfig, catalogue: &PatternCatalogue) -> crate::Result<Self> {
        let patterns = catalogue.select(&config.patterns, &config.regions, &config.types);

        if patterns.is_empty() {
            return Err(FirewallError::Patterns(
                "regex filter selection matched no patterns".to_string(),
            ));
        }

        Ok(Self {
            priority: config.priority,
            patterns,
            redact_enabled: config.redact_enabled,
        })
    }

    /// Collect matches across all enabled patterns.
    ///
    /// Matches are non-overlapping per pattern (the regex engine yields
    /// leftmost matches); cross-pattern overlaps are resolved
    /// first-in-priority-order so output stays deterministic.
    fn collect_matches<'t>(&self, text: &'t str) -> Vec<SpanMatch<'t>> {
        let mut kept: Vec<SpanMatch<'t>> = Vec::new();

        for (index, pattern) in self.patterns.iter().enumerate() {
            for m in pattern.regex.find_iter(text) {
                let overlaps = kept.iter().any(|k| m.start() < k.end && k.start < m.end());

                if !overlaps {
                    kept.push(SpanMatch {
                        start: m.start(),
                        end: m.end(),
                        text: m.as_str(),
                        pattern: index,
                    });
                }
            }
        }

        kept.sort_by_key(|m| m.start);
        kept
    }

    fn detection(&self, pattern: &CompiledPattern, location: &str) -> Detection {
        let mut details = HashMap::new();
        details.insert("pii_type".to_string(), json!(pattern.pii_type.as_str()));
        details.insert("pattern".to_string(), json!(pattern.id()));
        details.insert("confidence".to_string(), json!(pattern.confidence));

        Detection {
            filter: FILTER_NAME.to_string(),
            detection_type: "pii".to_string(),
            severity: pattern.severity.clone(),
            location: location.to_string(),
            details,
            timestamp: Timestamp::now(),
        }
    }

    /// Rewrite `text` according to the mode, recording detections as we
    /// go. Returns the rewritten text when anything was substituted.
    async fn scan(&self, ctx: &mut FilterContext, text: &str, location: &str) -> Option<String> {
        let matches = self.collect_matches(text);

        if matches.is_empty() {
            return None;
        }

        let tokenizer = (ctx.mode == FirewallMode::Redact && location == "input")
            .then(|| ctx.tokenizer.clone())
            .flatten();
        let mask = tokenizer.is_none() && self.redact_enabled && ctx.mode == FirewallMode::Enforce;

        let mut rewritten = String::with_capacity(text.len());
        let mut cursor = 0;
        let mut changed = false;

        for m in matches {
            let pattern = &self.patterns[m.pattern];
            ctx.add_detection(self.detection(pattern, location));

            rewritten.push_str(&text[cursor..m.start]);

            if let Some(tokenizer) = &tokenizer {
                let token = tokenizer.tokenize(&ctx.session_id, &pattern.pii_type, m.text).await;

                ctx.pii_tokens.push(PiiToken {
                    original_value: m.text.to_string(),
                    token_value: token.clone(),
                    pii_type: pattern.pii_type.clone(),
                    detected_at: Timestamp::now(),
                });

                rewritten.push_str(&token);
                changed = true;
            } else if mask {
                rewritten.push('[');
                rewritten.push_str(pattern.pii_type.as_str());
                rewritten.push(']');
                changed = true;
            } else {
                rewritten.push_str(m.text);
            }

            cursor = m.end;
        }

        rewritten.push_str(&text[cursor..]);

        changed.then_some(rewritten)
    }
}

#[async_trait]
impl Filter for RegexPiiFilter {
    fn name(&self) -> &str {
        FILTER_NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn direction(&self) -> FilterDirection {
        FilterDirection::Both
    }

    async fn apply_input(&self, ctx: &mut FilterContext) -> crate::Result<()> {
        let body = std::mem::take(&mut ctx.request_body);

        if let Some(rewritten) = self.scan(ctx, &body, "input").await {
            ctx.modified_request_body = Some(rewritten);
        }

        ctx.request_body = body;
        Ok(())
    }

    async fn apply_output(&self, ctx: &mut FilterContext) -> crate::Result<()> {
        let Some(body) = ctx.response_body.clone() else {
            return Ok(());
        };

        if ctx.mode == FirewallMode::Redact
            && let Some(tokenizer) = ctx.tokenizer.clone()
        {
            let restored = tokenizer.detokenize_all(&ctx.session_id, &body).await;

            if restored != body {
                // Originals are legitimately returning to the caller; do
                // not re-detect them.
                ctx.modified_response_body = Some(restored);
                return Ok(());
            }
        }

        if let Some(rewritten) = self.scan(ctx, &body, "output").await {
            ctx.modified_response_body = Some(rewritten);
        }

        Ok(())
    }
}
