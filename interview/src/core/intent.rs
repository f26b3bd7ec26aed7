//! Heuristic intent classification over free-text answers.
//!
//! Word lists live in a versioned [`IntentTables`] value so they can be tuned
//! without touching the classifiers. Text is lowercased and punctuation is
//! folded to spaces before matching, so every check is case-insensitive.

use serde::{Deserialize, Serialize};

/// Current version of [`DEFAULT_TABLES`].
pub const TABLES_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YesNo {
    Yes,
    No,
    Unclear,
}

#[derive(Debug, Clone, Copy)]
pub struct IntentTables {
    pub version: u32,
    pub affirmative: &'static [&'static str],
    pub negative: &'static [&'static str],
    /// Leading phrases that soften an answer into a yes ("i think", ...).
    pub soft_yes_phrases: &'static [&'static str],
    /// Opening words that read as yes when followed by `soft_yes_object`.
    pub soft_yes_openers: &'static [&'static str],
    pub soft_yes_object: &'static str,
    pub negators: &'static [&'static str],
    /// Positive adjectives that flip to no after a negator.
    pub negatable: &'static [&'static str],
    pub vague_terms: &'static [&'static str],
    /// Short clear answers that are never treated as vague.
    pub clear_responses: &'static [&'static str],
    pub done_signals: &'static [&'static str],
    pub no_decision: &'static [&'static str],
    /// Character offset within which a done signal must start.
    pub done_signal_window: usize,
    /// Answers this short count as a done signal wherever it appears.
    pub done_short_answer_words: usize,
}

pub static DEFAULT_TABLES: IntentTables = IntentTables {
    version: TABLES_VERSION,
    affirmative: &[
        "yes",
        "y",
        "yeah",
        "yep",
        "yup",
        "sure",
        "ok",
        "okay",
        "k",
        "great",
        "good",
        "fine",
        "alright",
        "right",
        "correct",
        "true",
        "accurate",
        "affirmative",
        "confirmed",
        "generally",
        "mostly",
    ],
    negative: &["no", "n", "nope", "nah", "negative", "incorrect", "false"],
    soft_yes_phrases: &["i guess", "i think"],
    soft_yes_openers: &["sounds", "looks"],
    soft_yes_object: "good",
    negators: &["not", "isn", "aren", "wasn", "don", "doesn", "never"],
    negatable: &["accurate", "correct", "true", "right"],
    vague_terms: &[
        "maybe",
        "sort of",
        "kind of",
        "i think",
        "not sure",
        "dunno",
        "idk",
        "probably",
    ],
    clear_responses: &[
        "no",
        "yes",
        "y",
        "n",
        "nope",
        "yep",
        "yeah",
        "nah",
        "no decision",
        "none",
        "n a",
        "na",
        "not applicable",
        "there is no",
        "there s no",
    ],
    done_signals: &[
        "done",
        "complete",
        "finished",
        "that s it",
        "thats it",
        "no more",
        "nothing",
        "end",
    ],
    no_decision: &[
        "no",
        "none",
        "n a",
        "na",
        "not applicable",
        "no decision",
        "not a decision",
        "no branch",
        "no branching",
    ],
    done_signal_window: 15,
    done_short_answer_words: 3,
};

/// Lowercase `text` and fold every non-alphanumeric run into one space.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Byte offset of `phrase` in normalized `text`, matched on word boundaries.
fn find_phrase(text: &str, phrase: &str) -> Option<usize> {
    if phrase.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(found) = text[from..].find(phrase) {
        let start = from + found;
        let end = start + phrase.len();
        let starts_word = start == 0 || text.as_bytes()[start - 1] == b' ';
        let ends_word = end == text.len() || text.as_bytes()[end] == b' ';
        if starts_word && ends_word {
            return Some(start);
        }
        from = start + 1;
        while !text.is_char_boundary(from) {
            from += 1;
        }
    }
    None
}

fn starts_with_phrase(text: &str, phrase: &str) -> bool {
    text == phrase
        || text
            .strip_prefix(phrase)
            .is_some_and(|rest| rest.starts_with(' '))
}

impl IntentTables {
    /// Classify a yes/no answer.
    ///
    /// The first word decides when it is a known yes or no word. A negated
    /// adjective ("not correct") then reads as no. Soft affirmations count only
    /// when they open the answer and nothing negative follows. Otherwise the
    /// answer is definite only when words of exactly one polarity appear.
    pub fn classify_yes_no(&self, text: &str) -> YesNo {
        let normalized = normalize(text);
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
        let Some(first) = tokens.first() else {
            return YesNo::Unclear;
        };

        if self.affirmative.contains(first) {
            return YesNo::Yes;
        }
        if self.negative.contains(first) {
            return YesNo::No;
        }

        let has_negator = tokens.iter().any(|t| self.negators.contains(t));
        if has_negator && tokens.iter().any(|t| self.negatable.contains(t)) {
            return YesNo::No;
        }

        let no_hit = tokens.iter().any(|t| self.negative.contains(t));
        if !has_negator && !no_hit && self.opens_softly(&normalized, first, &tokens) {
            return YesNo::Yes;
        }

        let yes_hit = tokens.iter().any(|t| self.affirmative.contains(t));
        match (yes_hit, no_hit) {
            (true, false) => YesNo::Yes,
            (false, true) => YesNo::No,
            _ => YesNo::Unclear,
        }
    }

    fn opens_softly(&self, normalized: &str, first: &str, tokens: &[&str]) -> bool {
        self.soft_yes_phrases
            .iter()
            .any(|phrase| starts_with_phrase(normalized, phrase))
            || (self.soft_yes_openers.contains(&first) && tokens.contains(&self.soft_yes_object))
    }

    /// True when the answer hedges and is not a recognizably clear answer.
    pub fn is_vague(&self, text: &str) -> bool {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return false;
        }
        let clear = self
            .clear_responses
            .iter()
            .any(|phrase| starts_with_phrase(&normalized, phrase));
        if clear {
            return false;
        }
        self.vague_terms
            .iter()
            .any(|term| find_phrase(&normalized, term).is_some())
    }

    /// True when the user signals there is nothing more to add.
    ///
    /// The signal must open the answer, or the answer must be very short.
    pub fn said_done(&self, text: &str) -> bool {
        let normalized = normalize(text);
        let short = normalized.split(' ').filter(|t| !t.is_empty()).count()
            <= self.done_short_answer_words;
        self.done_signals.iter().any(|signal| {
            find_phrase(&normalized, signal)
                .is_some_and(|start| start < self.done_signal_window || short)
        })
    }

    /// True when a decision answer says there is no decision at this step.
    pub fn is_no_decision(&self, text: &str) -> bool {
        let normalized = normalize(text);
        normalized.is_empty()
            || self
                .no_decision
                .iter()
                .any(|phrase| find_phrase(&normalized, phrase).is_some())
    }
}

/// True when any of `words` appears as a whole word in `text`.
pub fn mentions_any(text: &str, words: &[&str]) -> bool {
    let normalized = normalize(text);
    words
        .iter()
        .any(|word| find_phrase(&normalized, word).is_some())
}

/// Classify with [`DEFAULT_TABLES`].
pub fn classify_yes_no(text: &str) -> YesNo {
    DEFAULT_TABLES.classify_yes_no(text)
}
