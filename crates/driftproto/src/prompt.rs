//! Weighted prompts steering the generative session.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Upper bound for a prompt weight.
pub const MAX_PROMPT_WEIGHT: f32 = 2.0;

/// A prompt as the UI owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub text: String,
    /// Influence on the generation, 0.0..=2.0. Zero means inactive.
    pub weight: f32,
    /// External controller binding (MIDI CC number or similar).
    pub cc: u8,
}

impl Prompt {
    pub fn new(id: impl Into<String>, text: impl Into<String>, weight: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            weight: clamp_weight(weight),
            cc: 0,
        }
    }

    pub fn with_cc(mut self, cc: u8) -> Self {
        self.cc = cc;
        self
    }

    pub fn set_weight(&mut self, weight: f32) {
        self.weight = clamp_weight(weight);
    }
}

/// What the session actually receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPrompt {
    pub text: String,
    pub weight: f32,
}

impl From<&Prompt> for WeightedPrompt {
    fn from(prompt: &Prompt) -> Self {
        Self {
            text: prompt.text.clone(),
            weight: prompt.weight,
        }
    }
}

fn clamp_weight(weight: f32) -> f32 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, MAX_PROMPT_WEIGHT)
    }
}

/// Prompts with positive weight whose text was not rejected by the
/// content filter.
pub fn active_prompts<'a>(
    prompts: impl IntoIterator<Item = &'a Prompt>,
    filtered: &HashSet<String>,
) -> Vec<WeightedPrompt> {
    prompts
        .into_iter()
        .filter(|p| p.weight > 0.0 && !filtered.contains(&p.text))
        .map(WeightedPrompt::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_is_clamped() {
        assert_eq!(Prompt::new("a", "x", 5.0).weight, 2.0);
        assert_eq!(Prompt::new("a", "x", -1.0).weight, 0.0);
        assert_eq!(Prompt::new("a", "x", f32::NAN).weight, 0.0);
    }

    #[test]
    fn active_excludes_zero_weight_and_filtered() {
        let prompts = vec![
            Prompt::new("1", "bossa nova", 1.0),
            Prompt::new("2", "silence", 0.0),
            Prompt::new("3", "forbidden", 0.7),
        ];
        let filtered: HashSet<String> = ["forbidden".to_string()].into_iter().collect();

        let active = active_prompts(&prompts, &filtered);
        assert_eq!(
            active,
            vec![WeightedPrompt {
                text: "bossa nova".to_string(),
                weight: 1.0
            }]
        );
    }
}
