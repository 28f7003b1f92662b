//! Spanish follow-up vocabulary: quick yes/no replies, priority words,
//! relative dates and list-edit phrasing.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use parley_store::Priority;
use regex::Regex;

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Quick replies
// ---------------------------------------------------------------------------

/// A bare confirmation or rejection of the pending action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickReply {
    Confirm,
    Reject,
}

const CONFIRM_PHRASES: &[&str] = &[
    "sí", "si", "ok", "okay", "dale", "perfecto", "listo", "adelante", "correcto", "está bien",
    "esta bien",
];

const REJECT_PHRASES: &[&str] = &[
    "no", "mejor no", "cancela", "cancelar", "olvídalo", "olvidalo", "dejalo", "déjalo", "nada",
];

/// Lowercased word tokens. Punctuation (including `¿` and `¡`) separates.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `phrase` occurs in `tokens` as a run of whole tokens.
fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.is_empty() || words.len() > tokens.len() {
        return false;
    }
    tokens
        .windows(words.len())
        .any(|window| window.iter().zip(&words).all(|(t, w)| t == w))
}

/// Classify `text` as a quick reply. Confirmation is checked first.
pub fn quick_reply(text: &str) -> Option<QuickReply> {
    let tokens = tokenize(text);
    if CONFIRM_PHRASES.iter().any(|p| contains_phrase(&tokens, p)) {
        Some(QuickReply::Confirm)
    } else if REJECT_PHRASES.iter().any(|p| contains_phrase(&tokens, p)) {
        Some(QuickReply::Reject)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

const PRIORITY_WORDS: &[(Priority, &[&str])] = &[
    (Priority::Urgent, &["urgente", "crítico", "critico", "crítica", "critica", "asap"]),
    (Priority::High, &["alta", "alto", "importante"]),
    (Priority::Normal, &["normal", "media", "medio"]),
    (Priority::Low, &["baja", "bajo", "después", "despues"]),
];

/// The priority a follow-up asks for, most urgent match first.
pub fn priority_from_text(text: &str) -> Option<Priority> {
    let tokens = tokenize(text);
    PRIORITY_WORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| tokens.iter().any(|t| t == w)))
        .map(|(priority, _)| *priority)
}

// ---------------------------------------------------------------------------
// Relative dates
// ---------------------------------------------------------------------------

/// Resolve a relative date expression against `today`.
///
/// "pasado (mañana)" is checked before "mañana" so it is not read as
/// tomorrow. Weekday targets are always in the future.
pub fn date_from_text(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lowered = text.to_lowercase();
    let has = |needle: &str| lowered.contains(needle);

    if has("pasado") {
        today.checked_add_days(Days::new(2))
    } else if has("mañana") || has("manana") {
        today.checked_add_days(Days::new(1))
    } else if has("próxima semana") || has("proxima semana") || has("lunes") {
        next_weekday(today, Weekday::Mon)
    } else if has("viernes") {
        next_weekday(today, Weekday::Fri)
    } else {
        None
    }
}

/// The next `target` strictly after `today`.
fn next_weekday(today: NaiveDate, target: Weekday) -> Option<NaiveDate> {
    let current = today.weekday().num_days_from_monday();
    let wanted = target.num_days_from_monday();
    let ahead = match (wanted + 7 - current) % 7 {
        0 => 7,
        n => n,
    };
    today.checked_add_days(Days::new(u64::from(ahead)))
}

// ---------------------------------------------------------------------------
// List edits
// ---------------------------------------------------------------------------

const ADD_PREFIX: &str = r"(?i)\b(?:añade|agrega|incluye|pon)\b:?\s*";
const ITEM_SEPARATOR: &str = r"[,\n]|\s+y\s+";
const BLOCKER_PREFIX: &str = r"(?i)\b(?:añade|agrega|pon)\s+(?:un\s+)?blocker:?\s*";

/// Minimum length, in characters, of an item taken from free text.
const MIN_ITEM_CHARS: usize = 3;

/// Compiled list-edit patterns.
pub struct ListEdits {
    add_prefix: Regex,
    item_separator: Regex,
    blocker_prefix: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| KernelError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

impl ListEdits {
    pub fn new() -> Result<Self> {
        Ok(Self {
            add_prefix: compile(ADD_PREFIX)?,
            item_separator: compile(ITEM_SEPARATOR)?,
            blocker_prefix: compile(BLOCKER_PREFIX)?,
        })
    }

    /// New list items named in `details`: "añade documentar, probar y
    /// desplegar" gives three items. Fragments shorter than three characters
    /// are dropped.
    pub fn extract_new_items(&self, details: &str) -> Vec<String> {
        if details.trim().is_empty() {
            return Vec::new();
        }
        let stripped = self.add_prefix.replace_all(details, "");
        self.item_separator
            .split(&stripped)
            .map(str::trim)
            .filter(|item| item.chars().count() >= MIN_ITEM_CHARS)
            .map(str::to_string)
            .collect()
    }

    /// The blocker text in "añade blocker: esperando al cliente".
    pub fn extract_blocker(&self, text: &str) -> String {
        self.blocker_prefix.replace_all(text, "").trim().to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
