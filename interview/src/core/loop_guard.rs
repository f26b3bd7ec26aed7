//! Repeated-prompt detection.

use crate::session::{Message, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopGuardConfig {
    pub enabled: bool,
    /// How many trailing messages to scan.
    pub scan_messages: usize,
    /// How many assistant messages within the scan to compare.
    pub window: usize,
    pub repeat_threshold: usize,
    /// Messages this short or shorter never count as repeats.
    pub min_message_chars: usize,
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_messages: 20,
            window: 10,
            repeat_threshold: 3,
            min_message_chars: 20,
        }
    }
}

impl LoopGuardConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.repeat_threshold < 2 {
            anyhow::bail!("loop_guard.repeat_threshold must be >= 2");
        }
        if self.window < self.repeat_threshold {
            anyhow::bail!("loop_guard.window must be >= loop_guard.repeat_threshold");
        }
        if self.scan_messages < self.window {
            anyhow::bail!("loop_guard.scan_messages must be >= loop_guard.window");
        }
        Ok(())
    }
}

/// The assistant message repeated often enough to count as a loop, if any.
///
/// Only messages from `from` onward are considered, so history before the
/// last forced advance does not trip the guard again.
pub fn repeated_prompt<'a>(
    messages: &'a [Message],
    from: usize,
    config: &LoopGuardConfig,
) -> Option<&'a str> {
    if !config.enabled {
        return None;
    }
    let recent = messages.get(from..).unwrap_or_default();
    let scan_start = recent.len().saturating_sub(config.scan_messages);

    let assistant: Vec<&str> = recent[scan_start..]
        .iter()
        .rev()
        .filter(|message| message.role == Role::Assistant)
        .take(config.window)
        .map(|message| message.content.trim())
        .collect();
    if assistant.len() < config.repeat_threshold {
        return None;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for text in &assistant {
        *counts.entry(*text).or_default() += 1;
    }
    // Most recent first so the answer does not depend on map order.
    assistant.into_iter().find(|text| {
        text.chars().count() > config.min_message_chars
            && counts.get(text).copied().unwrap_or_default() >= config.repeat_threshold
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUCK: &str = "Could you describe the approval step in more detail?";

    fn history(contents: &[(&str, Role)]) -> Vec<Message> {
        contents
            .iter()
            .map(|(content, role)| Message::new(*role, *content))
            .collect()
    }

    #[test]
    fn trips_after_three_identical_prompts() {
        let messages = history(&[
            (STUCK, Role::Assistant),
            ("hmm", Role::User),
            (STUCK, Role::Assistant),
            ("what?", Role::User),
            (STUCK, Role::Assistant),
        ]);
        assert_eq!(
            repeated_prompt(&messages, 0, &LoopGuardConfig::default()),
            Some(STUCK)
        );
    }

    #[test]
    fn two_repeats_do_not_trip() {
        let messages = history(&[
            (STUCK, Role::Assistant),
            ("hmm", Role::User),
            (STUCK, Role::Assistant),
        ]);
        assert!(repeated_prompt(&messages, 0, &LoopGuardConfig::default()).is_none());
    }

    #[test]
    fn short_prompts_are_ignored() {
        let messages = history(&[
            ("Is this correct?", Role::Assistant),
            ("Is this correct?", Role::Assistant),
            ("Is this correct?", Role::Assistant),
        ]);
        assert!(repeated_prompt(&messages, 0, &LoopGuardConfig::default()).is_none());
    }

    #[test]
    fn history_before_floor_is_ignored() {
        let messages = history(&[
            (STUCK, Role::Assistant),
            (STUCK, Role::Assistant),
            (STUCK, Role::Assistant),
            ("Thanks, moving on.", Role::Assistant),
        ]);
        assert!(repeated_prompt(&messages, 3, &LoopGuardConfig::default()).is_none());
        assert!(repeated_prompt(&messages, 99, &LoopGuardConfig::default()).is_none());
    }

    #[test]
    fn disabled_guard_never_trips() {
        let messages = history(&[
            (STUCK, Role::Assistant),
            (STUCK, Role::Assistant),
            (STUCK, Role::Assistant),
        ]);
        let config = LoopGuardConfig {
            enabled: false,
            ..LoopGuardConfig::default()
        };
        assert!(repeated_prompt(&messages, 0, &config).is_none());
    }

    #[test]
    fn validate_rejects_inconsistent_windows() {
        let config = LoopGuardConfig {
            window: 2,
            ..LoopGuardConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(LoopGuardConfig::default().validate().is_ok());
    }
}
