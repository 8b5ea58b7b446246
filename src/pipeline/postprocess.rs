//! Post-processing: deterministic whitespace cleanup of decoded LaTeX.
//!
//! The tokenizer is byte-level BPE, so the raw text carries spaces between
//! almost every token (`x ^ { 2 }`). Two rules bring it back to compact
//! LaTeX without changing meaning:
//!
//! 1. A space between a text-style command and its `{` argument is removed
//!    (`\text {hi}` → `\text{hi}`), once per command occurrence.
//! 2. Whitespace between two characters is collapsed when at least one side
//!    is not a letter, repeated until the string stops changing. Runs between
//!    two letters are kept (`\alpha x` stays separated), as is a control
//!    space `\ `.
//!
//! The collapse is heuristic and can change the meaning of some inputs
//! (spaces inside `\text{...}` arguments next to punctuation are removed);
//! it is reproduced as-is because the models' outputs are tuned to it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply both rules to the detokenised text.
///
/// Idempotent: `postprocess(&postprocess(s)) == postprocess(s)`.
pub fn postprocess(input: &str) -> String {
    let s = tighten_command_arguments(input);
    collapse_spaces(&s)
}

// ── Rule 1: Text-style command arguments ────────────────────────────────────

static RE_TEXT_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(operatorname|mathrm|text|mathbf)\s?\*? \{.*?\}").unwrap()
});

fn tighten_command_arguments(input: &str) -> String {
    RE_TEXT_COMMAND
        .replace_all(input, |caps: &regex::Captures| caps[0].replacen(' ', "", 1))
        .into_owned()
}

// ── Rule 2: Collapse spaces next to non-letters ─────────────────────────────

static RE_NONLETTER_NONLETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^A-Za-z])\s+?([^A-Za-z])").unwrap());
static RE_NONLETTER_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^A-Za-z])\s+?([A-Za-z])").unwrap());
static RE_LETTER_NONLETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z])\s+?([^A-Za-z])").unwrap());

fn collapse_spaces(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = join_pairs(&RE_NONLETTER_NONLETTER, &current, true);
        let next = join_pairs(&RE_NONLETTER_LETTER, &next, true);
        let next = join_pairs(&RE_LETTER_NONLETTER, &next, false);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Replace each non-overlapping match with its two captured characters.
///
/// With `keep_control_space`, a match that starts at a `\` directly followed
/// by a space is skipped and the scan resumes one character later.
fn join_pairs(re: &Regex, input: &str, keep_control_space: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    let mut pos = 0;

    while let Some(caps) = re.captures_at(input, pos) {
        let (Some(whole), Some(a), Some(b)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            break;
        };
        if keep_control_space && input[whole.start()..].starts_with("\\ ") {
            // `\` is one byte, so the next index is a char boundary.
            pos = whole.start() + 1;
            continue;
        }
        out.push_str(&input[last..whole.start()]);
        out.push_str(a.as_str());
        out.push_str(b.as_str());
        last = whole.end();
        pos = whole.end();
    }

    out.push_str(&input[last..]);
    out
}
