//! OCR text correction
//!
//! Deterministic, rule-based repair of systematic OCR character confusions
//! in prescription text. Substrings whose exact characters carry meaning
//! (dosages, dates, times, medical abbreviations) are swapped for
//! placeholders before any rewrite rule runs and restored afterwards.
//!
//! Passes, in order:
//! 1. Protect dosages, dates, times, then each abbreviation pattern
//! 2. Apply the character-confusion table
//! 3. Segment lines, splitting long ones on sentence ends
//! 4. Restore every placeholder
//! 5. Normalize spacing and capitalize known acronyms

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;

/// Inputs shorter than this (in chars) are returned unchanged
pub const MIN_CORRECTION_LEN: usize = 3;

/// Lines longer than this (in chars) are split on sentence ends
pub const MAX_SEGMENT_LEN: usize = 80;

// Placeholders are wrapped in private-use code points, which OCR output
// never legitimately contains; they are stripped from input up front.
const OPEN: char = '\u{E000}';
const CLOSE: char = '\u{E001}';

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").unwrap());

static DOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d+(?:\.\d+)?[ \t]*(?:mg|ml|g|mcg|µg|iu|tablets?|pills?|capsules?)\b").unwrap()
});

static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").unwrap());

static TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}:\d{2}[ \t]*(?:am|pm|AM|PM)?\b").unwrap());

/// Prescription shorthand, protected in this order
static ABBREVIATIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b[Rr]x\b",                        // prescription
        r"\bq\.?d\.?\b",                     // once daily
        r"\bb\.?i\.?d\.?\b",                 // twice daily
        r"\bt\.?i\.?d\.?\b",                 // three times daily
        r"\bq\.?i\.?d\.?\b",                 // four times daily
        r"\bp\.?r\.?n\.?\b",                 // as needed
        r"\bp\.?o\.?\b",                     // by mouth
        r"\bs\.?l\.?\b",                     // sublingual
        r"\bi\.?v\.?\b",                     // intravenous
        r"\bi\.?m\.?\b",                     // intramuscular
        r"\bq\.?h\.?s\.?\b",                 // at bedtime
        r"\ba\.?c\.?\b",                     // before meals
        r"\bp\.?c\.?\b",                     // after meals
        r"\bs\.?o\.?s\.?\b",                 // if needed
        r"\bq\.?[ \t]?\d+[ \t]?h\.?\b",       // every n hours
        r"\bq\.?[ \t]?\d+[ \t]?-[ \t]?\d+[ \t]?h\.?\b", // every n-m hours
        r"\bn\.?p\.?o\.?\b",                 // nothing by mouth
        r"\bp\.?r\.?\b",                     // per rectum
        r"\bo\.?d\.?\b",                     // right eye
        r"\bo\.?s\.?\b",                     // left eye
        r"\bo\.?u\.?\b",                     // both eyes
        r"\bs\.?q\.?\b",                     // subcutaneous
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Character-confusion fixes. Later rules see the output of earlier ones.
static CONFUSIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // unit misreads directly after a number
        (r"(\d)rn[gq]\b", "${1}mg"),
        // O/0 and l/1 lookalikes in numeric context
        (r"\b(\d+)O\b", "${1}0"),
        (r"\bO(\d+)\b", "0${1}"),
        (r"\blO\b", "10"),
        (r"\bl(\d+)\b", "1${1}"),
        // isolated lookalikes
        (r"\bl\b", "1"),
        (r"\bO\b", "0"),
        (r"\brn\b", "m"),
        // doubled-letter misreads
        (r"vv", "w"),
        // frequent whole-word misreads
        (r"\brneals\b", "meals"),
        (r"\bbedtirne\b", "bedtime"),
        (r"\binfectlon\b", "infection"),
        (r"\bdai[ift]y\b", "daily"),
        (r"\btabiet\b", "tablet"),
        (r"\bmedlcation\b", "medication"),
        (r"\bmedication5\b", "medications"),
    ]
    .iter()
    .map(|(p, r)| (Regex::new(p).unwrap(), *r))
    .collect()
});

static NUMBER_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)([a-zA-Z]{2,})").unwrap());

/// Suffixes that legitimately follow a number without a space
const ATTACHED_SUFFIXES: &[&str] = &[
    "mg", "ml", "mcg", "iu", "tablet", "tablets", "pill", "pills", "capsule", "capsules", "st",
    "nd", "rd", "th",
];

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?][ \t]+").unwrap());

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

static SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+([.,;:!?])").unwrap());

static CAPITALIZATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\brx\b", "Rx"),
        (r"(?i)\bcovid-19\b", "COVID-19"),
        (r"(?i)\bcovid\b", "COVID"),
    ]
    .iter()
    .map(|(p, r)| (Regex::new(p).unwrap(), *r))
    .collect()
});

/// Correct raw OCR text
///
/// Never fails. Text shorter than [`MIN_CORRECTION_LEN`] chars is returned
/// unchanged. The result never contains a placeholder.
pub fn correct(text: &str) -> String {
    if text.chars().count() < MIN_CORRECTION_LEN {
        return text.to_string();
    }

    let sanitized: String = text.chars().filter(|c| *c != OPEN && *c != CLOSE).collect();

    let mut vault = Vault::default();
    let protected = vault.protect_all(&sanitized);
    let fixed = fix_confusions(&protected);
    let segmented = segment_lines(&fixed).join("\n");
    let restored = vault.restore(&segmented);
    normalize(&restored)
}

/// True if `text` still holds a correction placeholder or a stray marker
pub fn contains_placeholder(text: &str) -> bool {
    text.contains(OPEN) || text.contains(CLOSE)
}

/// Originals captured during protection, indexed by placeholder number
#[derive(Default)]
struct Vault {
    originals: Vec<String>,
}

impl Vault {
    fn protect_all(&mut self, text: &str) -> String {
        let mut out = self.protect(&DOSE, text);
        out = self.protect(&DATE, &out);
        out = self.protect(&TIME, &out);
        for pattern in ABBREVIATIONS.iter() {
            out = self.protect(pattern, &out);
        }
        out
    }

    fn protect(&mut self, pattern: &Regex, text: &str) -> String {
        pattern
            .replace_all(text, |caps: &Captures| {
                let token = format!("{OPEN}{}{CLOSE}", self.originals.len());
                self.originals.push(caps[0].to_string());
                token
            })
            .into_owned()
    }

    fn restore(&self, text: &str) -> String {
        let restored = PLACEHOLDER
            .replace_all(text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.originals.get(i))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned();

        if contains_placeholder(&restored) {
            warn!("Stray placeholder markers survived restoration; stripping them");
            return restored.chars().filter(|c| *c != OPEN && *c != CLOSE).collect();
        }
        restored
    }
}

fn fix_confusions(text: &str) -> String {
    let mut out = text.to_string();
    for (pattern, replacement) in CONFUSIONS.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }

    NUMBER_WORD
        .replace_all(&out, |caps: &Captures| {
            let word = caps[2].to_ascii_lowercase();
            if ATTACHED_SUFFIXES.contains(&word.as_str()) {
                caps[0].to_string()
            } else {
                format!("{} {}", &caps[1], &caps[2])
            }
        })
        .into_owned()
}

/// Split text into lines, breaking lines longer than [`MAX_SEGMENT_LEN`]
/// after each sentence-ending punctuation mark. Blank lines are kept empty.
pub fn segment_lines(text: &str) -> Vec<String> {
    let mut segments = Vec::new();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            segments.push(String::new());
            continue;
        }
        if line.chars().count() <= MAX_SEGMENT_LEN {
            segments.push(line.to_string());
            continue;
        }

        let mut start = 0;
        for m in SENTENCE_END.find_iter(line) {
            // punctuation is a single ASCII byte
            segments.push(line[start..m.start() + 1].to_string());
            start = m.end();
        }
        if start < line.len() {
            segments.push(line[start..].to_string());
        }
    }

    segments
}

fn normalize(text: &str) -> String {
    let out = MULTI_SPACE.replace_all(text, " ");
    let mut out = SPACE_BEFORE_PUNCT.replace_all(&out, "$1").into_owned();
    for (pattern, replacement) in CAPITALIZATIONS.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}
