#![forbid(unsafe_code)]

mod escalation;
mod local;
mod openai;

use std::fmt;

use livemod_domain::ModerationResult;

pub use escalation::EscalationModeration;
pub use local::LocalModeration;
pub use openai::OpenAiModeration;

/// Which moderation adapter produced (or will produce) a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModerationAdapterKind {
	OpenAi,
	LocalModel,
	Escalation,
}

impl ModerationAdapterKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			ModerationAdapterKind::OpenAi => "moderate-openai",
			ModerationAdapterKind::LocalModel => "moderate-local",
			ModerationAdapterKind::Escalation => "escalation",
		}
	}
}

impl fmt::Display for ModerationAdapterKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A moderation pass over one message's text.
///
/// Implementations swallow their own failures: `None` means "no verdict", never a panic or error.
#[async_trait::async_trait]
pub trait ModerationAdapter: Send + Sync + 'static {
	fn kind(&self) -> ModerationAdapterKind;

	async fn moderate(&self, text: &str) -> Option<ModerationResult>;
}

pub(crate) const LOCAL_MODERATION_PROMPT: &str = r#"
You are a content moderation system. Analyze the following message and determine if it contains harmful content.
Any type of insult or racism or patriotism or misgenderation or any other type of discrimination is harmful content.
Be really sensitive to everything related to sex, gender, race, religion, etc.
Examples of harmful content:
"France aux Français" is harassment at 0.6.
"La France aux Arabes" is harassment at 0.6.
"La France aux Africains" is harassment at 0.6.
"La France aux Asiatiques" is harassment at 0.6.
"La France aux Européens" is harassment at 0.6.
"La France aux Américains" is harassment at 0.6.

if any harmful content is included in the message, flag it as true.
Don't think. in the think process, you just write "ok"
I want to make sure everything is super safe.
You speak french, so don't translate the message.
Please respond in XML format using these tags and only these tags:
<flagged>true/false</flagged>
<reason>Specify the reason if flagged, such as: harassment, hate_speech, sexual, violence, self_harm, illegal_activity</reason>
<category_scores>0.0 to 1.0 indicating severity</category_scores>
"#;

pub(crate) const ESCALATION_PROMPT: &str = r#"
You are a second-pass content moderation system for a French TikTok live chat.
A first automated filter found nothing wrong with the message below. Look again, more strictly.
Any insult, discrimination, dog whistle, nationalist slogan, misgendering, mockery of a group,
conspiracy theory or rude remark is harmful content, even when phrased as a joke.
"La France aux Français" and every "La France aux ..." variant is racism and harassment at 0.8.
Impolite or aggressive wording towards the streamer or other viewers is politeness.
Jokes that mock a group or rely on a stereotype are weird_joke.

You speak french, so don't translate the message.
Don't think. in the think process, you just write "ok"
Please respond in XML format using these tags and only these tags:
<flagged>true/false</flagged>
<reason>Name every category that applies among: harassment, hate, sexual, violence, self_harm, illegal, politeness, weird_joke, conspiracy, racism, other</reason>
<category_scores>0.0 to 1.0 indicating severity</category_scores>
"#;

pub(crate) const MODERATION_USER_PREFIX: &str = "Here is the message to moderate: ";
