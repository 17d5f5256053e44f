#![forbid(unsafe_code)]

pub const DEFAULT_TRIGGER_TOKENS: [&str; 2] = ["@SamLePirate", "Gentil Robot"];

/// Literal chat prefixes that mark a comment as addressed to the responder.
#[derive(Debug, Clone)]
pub struct TriggerTokens {
	lowered: Vec<String>,
}

impl Default for TriggerTokens {
	fn default() -> Self {
		Self::new(DEFAULT_TRIGGER_TOKENS)
	}
}

impl TriggerTokens {
	pub fn new<I, S>(tokens: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let lowered = tokens
			.into_iter()
			.map(|t| t.as_ref().trim().to_lowercase())
			.filter(|t| !t.is_empty())
			.collect();
		Self { lowered }
	}

	/// Case-insensitive prefix match against any token.
	pub fn matches(&self, text: &str) -> bool {
		let text = text.to_lowercase();
		self.lowered.iter().any(|t| text.starts_with(t.as_str()))
	}

	pub fn is_empty(&self) -> bool {
		self.lowered.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_tokens_match_prefix_case_insensitively() {
		let t = TriggerTokens::default();
		assert!(t.matches("@SamLePirate tu fais quoi ?"));
		assert!(t.matches("@samlepirate salut"));
		assert!(t.matches("gentil robot, une blague ?"));
	}

	#[test]
	fn only_prefixes_count() {
		let t = TriggerTokens::default();
		assert!(!t.matches("salut @SamLePirate"));
		assert!(!t.matches("Bonjour à tous"));
		assert!(!t.matches(""));
		assert!(!t.matches("  Gentil Robot !"));
	}

	#[test]
	fn blank_tokens_are_dropped() {
		let t = TriggerTokens::new(["", "  "]);
		assert!(t.is_empty());
		assert!(!t.matches("anything"));
	}
}
