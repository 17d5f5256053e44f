#![forbid(unsafe_code)]

//! Parsing of the three-tag verdict format returned by prompted moderation models.
//!
//! ```text
//! <flagged>true</flagged>
//! <reason>harassment</reason>
//! <category_scores>0.6</category_scores>
//! ```

use std::sync::LazyLock;

use livemod_domain::{Category, ModerationResult};
use regex::Regex;

static THINKING_BLOCKS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
	["thinking", "think", "reasoning", "thought"].map(|tag| {
		Regex::new(&format!(r"(?is)<{tag}>.*?</{tag}>")).expect("thinking block pattern")
	})
});
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("blank line pattern"));
static FLAGGED: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?i)<flagged>\s*(true|false)\s*</flagged>").expect("flagged pattern"));
static REASON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<reason>(.*?)</reason>").expect("reason pattern"));
static SCORES: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?is)<category_scores>(.*?)</category_scores>").expect("scores pattern"));
static LEADING_FLOAT: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\s*[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").expect("float pattern"));

/// Remove reasoning blocks a model emitted despite being told not to, then tidy whitespace.
pub fn strip_thinking(text: &str) -> String {
	let mut out = text.to_string();
	for re in THINKING_BLOCKS.iter() {
		out = re.replace_all(&out, "").into_owned();
	}
	BLANK_LINES.replace_all(&out, "\n\n").trim().to_string()
}

/// Leading decimal number of `s`, ignoring anything after it.
pub fn leading_float(s: &str) -> Option<f64> {
	let m = LEADING_FLOAT.find(s)?;
	m.as_str().trim().parse::<f64>().ok()
}

/// Parse a tagged verdict against `vocabulary`.
///
/// Missing or malformed `<flagged>` reads as `false` and a missing score as `0.0`.
/// A category is hit when the reason text contains one of its keywords.
pub fn parse_verdict(raw: &str, vocabulary: &[Category]) -> ModerationResult {
	let cleaned = strip_thinking(raw);

	let flagged = FLAGGED
		.captures(&cleaned)
		.is_some_and(|c| c[1].eq_ignore_ascii_case("true"));
	let reason = REASON
		.captures(&cleaned)
		.map(|c| c[1].trim().to_string())
		.unwrap_or_default();
	let score = SCORES
		.captures(&cleaned)
		.and_then(|c| leading_float(&c[1]))
		.unwrap_or(0.0);

	let mut result = ModerationResult::new(flagged);
	for category in vocabulary {
		let hit = category.keywords().iter().any(|k| reason.contains(k));
		result.set_category(category.as_str(), hit, if hit { score } else { 0.0 });
	}
	result.with_reason(reason)
}
