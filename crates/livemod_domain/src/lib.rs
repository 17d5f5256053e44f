#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// AI provider selected by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
	OpenAi,
	LocalModel,
}

impl Provider {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Provider::OpenAi => "openai",
			Provider::LocalModel => "local_model",
		}
	}
}

impl fmt::Display for Provider {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers and enumerations from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown provider: {0}")]
	UnknownProvider(String),
}

impl FromStr for Provider {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"openai" | "open_ai" => Ok(Provider::OpenAi),
			"ollama" | "local" | "local-model" | "local_model" => Ok(Provider::LocalModel),
			other => Err(ParseIdError::UnknownProvider(other.to_string())),
		}
	}
}

/// Broadcaster unique id (the `@handle` of a live room), stored without the leading `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	/// Create a non-empty `RoomId`, dropping a leading `@`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		let trimmed = id.trim();
		let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed).trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(trimmed.to_string()))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "@{}", self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

/// Upstream-assigned chat message identifier. Opaque; only compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
	/// Create a non-empty message id.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A chat comment as received from the live room.
///
/// Every field is immutable once received; moderation and response data are carried
/// next to the message by the outbound view, never written into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
	pub id: MessageId,
	pub author_handle: String,
	pub author_display_name: String,
	#[serde(default)]
	pub avatar_url: String,
	pub text: String,
}

impl ChatMessage {
	pub fn new(id: MessageId, author_handle: impl Into<String>, text: impl Into<String>) -> Self {
		let author_handle = author_handle.into();
		Self {
			id,
			author_display_name: author_handle.clone(),
			author_handle,
			avatar_url: String::new(),
			text: text.into(),
		}
	}

	pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
		self.author_display_name = name.into();
		self
	}

	pub fn with_avatar_url(mut self, url: impl Into<String>) -> Self {
		self.avatar_url = url.into();
		self
	}

	/// Display name, falling back to the handle when the platform sent none.
	pub fn display_name(&self) -> &str {
		if self.author_display_name.trim().is_empty() {
			&self.author_handle
		} else {
			&self.author_display_name
		}
	}
}

/// Moderation category vocabulary understood by the tag-based adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
	Harassment,
	Hate,
	Sexual,
	Violence,
	SelfHarm,
	Illegal,
	Politeness,
	WeirdJoke,
	Conspiracy,
	Racism,
	Other,
}

impl Category {
	/// Categories reported by the first moderation pass.
	pub const BASE: [Category; 6] = [
		Category::Harassment,
		Category::Hate,
		Category::Sexual,
		Category::Violence,
		Category::SelfHarm,
		Category::Illegal,
	];

	/// Extra categories only the escalation pass reports.
	pub const ESCALATION: [Category; 5] = [
		Category::Politeness,
		Category::WeirdJoke,
		Category::Conspiracy,
		Category::Racism,
		Category::Other,
	];

	pub const ALL: [Category; 11] = [
		Category::Harassment,
		Category::Hate,
		Category::Sexual,
		Category::Violence,
		Category::SelfHarm,
		Category::Illegal,
		Category::Politeness,
		Category::WeirdJoke,
		Category::Conspiracy,
		Category::Racism,
		Category::Other,
	];

	/// Map key used in `ModerationResult`.
	pub const fn as_str(self) -> &'static str {
		match self {
			Category::Harassment => "harassment",
			Category::Hate => "hate",
			Category::Sexual => "sexual",
			Category::Violence => "violence",
			Category::SelfHarm => "self_harm",
			Category::Illegal => "illegal",
			Category::Politeness => "politeness",
			Category::WeirdJoke => "weird_joke",
			Category::Conspiracy => "conspiracy",
			Category::Racism => "racism",
			Category::Other => "other",
		}
	}

	/// Substrings that mark this category when found in a model's free-text reason.
	pub const fn keywords(self) -> &'static [&'static str] {
		match self {
			Category::Harassment => &["harassment"],
			Category::Hate => &["hate"],
			Category::Sexual => &["sexual"],
			Category::Violence => &["violence"],
			Category::SelfHarm => &["self_harm"],
			Category::Illegal => &["illegal"],
			Category::Politeness => &["politeness"],
			// older prompts spelled it "wierd_joke"
			Category::WeirdJoke => &["weird_joke", "wierd_joke"],
			Category::Conspiracy => &["conspiracy"],
			Category::Racism => &["racism"],
			Category::Other => &["other"],
		}
	}
}

impl fmt::Display for Category {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Normalized moderation verdict.
///
/// Invariant: any category with a score above zero is marked `true` in `categories`.
/// Every mutating method restores it; `is_consistent` checks it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationResult {
	pub flagged: bool,
	#[serde(default)]
	pub categories: BTreeMap<String, bool>,
	#[serde(default)]
	pub category_scores: BTreeMap<String, f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub provider_reason: Option<String>,
}

impl ModerationResult {
	pub fn new(flagged: bool) -> Self {
		Self {
			flagged,
			..Self::default()
		}
	}

	/// Build from a provider's native category maps, enforcing the score/category invariant.
	pub fn from_provider_maps(
		flagged: bool,
		categories: BTreeMap<String, bool>,
		category_scores: BTreeMap<String, f64>,
	) -> Self {
		let mut out = Self {
			flagged,
			categories,
			category_scores,
			provider_reason: None,
		};
		out.normalize();
		out
	}

	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		let reason = reason.into();
		self.provider_reason = if reason.trim().is_empty() { None } else { Some(reason) };
		self
	}

	/// Record one category. A positive score always marks the category.
	pub fn set_category(&mut self, name: &str, hit: bool, score: f64) {
		let score = clamp_score(score);
		self.categories.insert(name.to_string(), hit || score > 0.0);
		self.category_scores.insert(name.to_string(), score);
	}

	/// Clamp scores into `[0, 1]` and mark every category that has a positive score.
	pub fn normalize(&mut self) {
		for (name, score) in self.category_scores.iter_mut() {
			*score = clamp_score(*score);
			if *score > 0.0 {
				self.categories.insert(name.clone(), true);
			} else {
				self.categories.entry(name.clone()).or_insert(false);
			}
		}
	}

	pub fn is_consistent(&self) -> bool {
		self.category_scores
			.iter()
			.filter(|(_, score)| **score > 0.0)
			.all(|(name, _)| self.categories.get(name).copied().unwrap_or(false))
	}

	pub fn category(&self, name: &str) -> bool {
		self.categories.get(name).copied().unwrap_or(false)
	}

	pub fn score(&self, name: &str) -> f64 {
		self.category_scores.get(name).copied().unwrap_or(0.0)
	}

	/// Categories marked `true`, with their score.
	pub fn flagged_categories(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
		self.categories
			.iter()
			.filter(|(_, hit)| **hit)
			.map(|(name, _)| (name.as_str(), self.score(name)))
	}
}

fn clamp_score(v: f64) -> f64 {
	if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}
