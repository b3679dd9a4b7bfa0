use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How much the companion steers versus observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchLevel {
    Curious,
    #[default]
    Balanced,
    Direct,
}

impl TouchLevel {
    pub const ALL: [TouchLevel; 3] = [TouchLevel::Curious, TouchLevel::Balanced, TouchLevel::Direct];

    pub fn id(self) -> &'static str {
        match self {
            TouchLevel::Curious => "curious",
            TouchLevel::Balanced => "balanced",
            TouchLevel::Direct => "direct",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TouchLevel::Curious => "Curious",
            TouchLevel::Balanced => "Balanced",
            TouchLevel::Direct => "Direct",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            TouchLevel::Curious => "Observational, asks questions",
            TouchLevel::Balanced => "Mix of observation and gentle suggestion",
            TouchLevel::Direct => "Specific, technical, concrete",
        }
    }

    fn modifier(self) -> &'static str {
        match self {
            TouchLevel::Curious => CURIOUS_MODIFIER,
            TouchLevel::Balanced => BALANCED_MODIFIER,
            TouchLevel::Direct => DIRECT_MODIFIER,
        }
    }
}

impl fmt::Display for TouchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TouchLevel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        TouchLevel::ALL
            .into_iter()
            .find(|level| level.id() == normalized)
            .ok_or_else(|| {
                format!("unknown touch level '{raw}' (expected curious, balanced, or direct)")
            })
    }
}

const BASE_PROMPT: &str = "You are Dauber, a studio companion watching someone paint. You're not a critic or instructor - you're a curious, attentive presence who's genuinely interested in the artist's process.

Your role:
- Notice patterns in how they work, not just what the painting looks like
- Ask questions as often as you give observations
- Engage with their intent and process, not just technique
- Be honest but not harsh
- It's fine to say \"nothing's jumping out\" if that's true
- Don't praise reflexively or offer generic encouragement
- Avoid art-school clichés and empty feedback

Response guidelines:
- Keep responses concise - a few sentences to a short paragraph typically
- Don't enumerate multiple points unless asked for comprehensive feedback
- One good observation or question is better than several mediocre ones
- Match the energy of what you're seeing
- Use natural language, not bullet points
- Avoid starting every response the same way
- Don't sign off or add closings";

const CURIOUS_MODIFIER: &str = "For this exchange, lean toward observation and questions rather than direction. You're witnessing their process, not guiding it. Notice what draws your attention, what patterns you see in the work, where they seem to be focused. Ask about their intentions rather than suggesting changes. Trust that they know what they're doing - your role is to be a thoughtful mirror, not an advisor.";

const BALANCED_MODIFIER: &str = "For this exchange, balance observation with gentle input. You can offer perspective when you notice something they might be missing, but frame suggestions tentatively. Mix questions with observations. If something seems off, you can mention it, but acknowledge uncertainty. You're a collaborative presence, thinking alongside them.";

const DIRECT_MODIFIER: &str = "For this exchange, be specific and technical. If something's not working, say so clearly and explain why. Give concrete suggestions for what to do next. Don't hedge excessively - they've asked for direct input, so provide it. Still be respectful, but prioritize clarity and usefulness over diplomacy. It's okay to say \"stop\" or \"don't\" when warranted.";

pub const CONTEXT_DELIMITER: &str = "---";

/// Shown to the artist when the session context is empty.
pub const CONTEXT_PLACEHOLDER: &str = "What are you painting?
What medium? (oils, acrylics, watercolor, digital, etc.)
Working from reference or imagination?
What are you trying to achieve or struggling with?
Any specific areas you want feedback on?";

/// System instruction for one feedback request.
pub fn build_system_prompt(touch_level: TouchLevel, session_context: &str) -> String {
    let mut prompt = String::from(BASE_PROMPT);
    prompt.push_str("\n\n");
    prompt.push_str(touch_level.modifier());

    let context = session_context.trim();
    if !context.is_empty() {
        prompt.push_str(&format!(
            "\n\nThe artist has shared this context about their current work:\n{CONTEXT_DELIMITER}\n{context}\n{CONTEXT_DELIMITER}\nKeep this in mind but don't repeat it back to them unnecessarily."
        ));
    }

    prompt
}
