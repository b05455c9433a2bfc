//! Prompt composition for interview and feedback modes.
//!
//! Pure string building, no I/O. All randomness is sampled up front into
//! [`StyleDraws`], so composition is deterministic given its inputs.

use std::ops::RangeInclusive;

use rand::Rng;

use crate::conversation::{Transcript, User};

/// Tuning knobs for interview-mode prompts.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// How closely the simulated customer sticks to the persona, in percent.
    pub conformity: RangeInclusive<u8>,
    /// Noise applied to the founder's word count before tier selection.
    pub length_multiplier: RangeInclusive<f64>,
    /// Scaled word counts at or below this get the concise instruction.
    pub concise_max_words: usize,
    /// Scaled word counts at or below this get the moderate instruction.
    pub moderate_max_words: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            conformity: 30..=80,
            length_multiplier: 0.7..=1.3,
            concise_max_words: 20,
            moderate_max_words: 60,
        }
    }
}

/// Random draws that shape a single interview reply.
#[derive(Debug, Clone, Copy)]
pub struct StyleDraws {
    pub conformity_pct: u8,
    pub length_multiplier: f64,
}

impl StyleDraws {
    /// Sample fresh draws from the configured ranges.
    pub fn sample<R: Rng + ?Sized>(rng: &mut R, config: &PromptConfig) -> Self {
        Self {
            conformity_pct: rng.gen_range(config.conformity.clone()),
            length_multiplier: rng.gen_range(config.length_multiplier.clone()),
        }
    }
}

/// Target response length, selected from the founder's scaled word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LengthTier {
    Concise,
    Moderate,
    Comprehensive,
}

impl LengthTier {
    /// Select a tier from `word_count * multiplier` against the
    /// configured thresholds. Monotonic in word count for a fixed
    /// multiplier.
    pub fn select(word_count: usize, multiplier: f64, config: &PromptConfig) -> Self {
        let scaled = word_count as f64 * multiplier;
        if scaled <= config.concise_max_words as f64 {
            Self::Concise
        } else if scaled <= config.moderate_max_words as f64 {
            Self::Moderate
        } else {
            Self::Comprehensive
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Self::Concise => "Respond concisely, in one or two short sentences.",
            Self::Moderate => "Respond with a moderately detailed answer.",
            Self::Comprehensive => "Respond with a comprehensive, detailed answer.",
        }
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Build the system instruction for a normal interview turn.
///
/// Embeds the persona with a loose-conformity instruction, the selected
/// length tier, and the most recent exchange as short-term memory.
pub fn interview_instruction(
    user: &User,
    interview: &Transcript,
    current_turn: &str,
    draws: &StyleDraws,
    config: &PromptConfig,
) -> String {
    let tier = LengthTier::select(word_count(current_turn), draws.length_multiplier, config);

    let mut prompt = format!(
        "You are a simulated customer helping a startup founder practice \
         customer interviews. The founder's name is {name}. Their target \
         customer is described as: {persona}.\n\
         Adopt that persona only loosely: stay roughly {conformity}% \
         consistent with the description, and diverge freely where the \
         conversation reveals new information about who you are. Before \
         finalizing each reply, privately check it for consistency with \
         what you have already said, and only then answer.\n",
        name = user.name,
        persona = user.persona,
        conformity = draws.conformity_pct,
    );
    prompt.push_str(tier.instruction());
    prompt.push('\n');

    if let Some(last) = interview.last() {
        prompt.push_str(&format!(
            "For context, the most recent exchange was:\nFounder: {}\nCustomer: {}\n",
            last.user, last.bot,
        ));
    }

    prompt
}

/// Build the system instruction for feedback mode.
///
/// Embeds the full interview transcript and the review rubric.
pub fn feedback_instruction(user: &User, interview: &Transcript) -> String {
    format!(
        "You are an interview coach reviewing a practice customer interview. \
         The founder's name is {name}.\n\
         Evaluate the founder's questions against The Mom Test principles: \
         favor concrete, specific questions about past behavior; flag \
         pitching, hypotheticals, and compliment-fishing; reward digging \
         into specifics. Give detailed, actionable feedback on errors and \
         areas of improvement, quoting the founder's own questions where \
         useful.\n\nFull interview transcript:\n{transcript}",
        name = user.name,
        transcript = interview.render(),
    )
}
