//! Entity allocation: assigning indices to literal values against the
//! natural-language sentence.

use indexmap::IndexMap;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::ast::{LocationValue, TimeValue, Value};
use crate::error::Error;

use super::EntityDict;

/// How entity indices are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationMode {
    /// The default: each literal must match a contiguous span of the
    /// sentence; indices follow the order the matches appear in the
    /// sentence. An unmatched literal is an encoding error.
    #[default]
    Consecutive,
    /// Indices follow the order literals appear in the program; no
    /// sentence matching is required.
    Sequential,
    /// Like consecutive, but gaps inside the matched span are tolerated.
    NonConsecutive,
}

/// Pluggable value-to-sentence matching.
pub trait ValueMatcher {
    /// Span of `sentence` (token indices, end exclusive) the value
    /// corresponds to, or `None`.
    fn match_value(&self, value: &Value, sentence: &[String]) -> Option<(usize, usize)>;
}

/// Case- and accent-insensitive token normalization (NFKD fold with
/// combining marks removed).
pub fn normalize_token(token: &str) -> String {
    token
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Default matcher: compares normalized string forms. Entities match on
/// canonical value or display; currencies match `$N` and `N dollars`
/// spellings.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMatcher {
    /// Allow gaps between the candidate tokens (non-consecutive mode).
    pub allow_gaps: bool,
}

impl DefaultMatcher {
    fn candidates(&self, value: &Value) -> Vec<Vec<String>> {
        match value {
            Value::String(s) => vec![tokens_of(s)],
            Value::Number(n) => vec![vec![format_plain(*n)]],
            Value::Measure { value, .. } => vec![vec![format_plain(*value)]],
            Value::Currency { value, code } => {
                let amount = format_plain(*value);
                let mut forms = vec![vec![format!("${amount}")]];
                if code == "usd" {
                    forms.push(vec![amount.clone(), "dollars".to_string()]);
                    forms.push(vec![amount.clone(), "bucks".to_string()]);
                }
                forms.push(vec![amount.clone(), code.clone()]);
                forms.push(vec![amount]);
                forms
            }
            Value::Time(TimeValue::Absolute { hour, minute, .. }) => {
                let mut forms = vec![vec![format!("{hour}:{minute:02}")]];
                if *minute == 0 {
                    forms.push(vec![hour.to_string()]);
                }
                forms
            }
            Value::Location(LocationValue::Absolute { display: Some(d), .. }) => {
                vec![tokens_of(d)]
            }
            Value::Location(LocationValue::Unresolved(name)) => vec![tokens_of(name)],
            Value::Entity { value, display, .. } => {
                let mut forms = Vec::new();
                if let Some(display) = display {
                    forms.push(tokens_of(display));
                }
                if let Some(value) = value {
                    forms.push(tokens_of(value));
                }
                forms
            }
            _ => Vec::new(),
        }
    }
}

impl ValueMatcher for DefaultMatcher {
    fn match_value(&self, value: &Value, sentence: &[String]) -> Option<(usize, usize)> {
        let sentence: Vec<String> =
            sentence.iter().map(|t| normalize_token(t)).collect();
        for candidate in self.candidates(value) {
            let candidate: Vec<String> =
                candidate.iter().map(|t| normalize_token(t)).collect();
            if candidate.is_empty() {
                continue;
            }
            let found = if self.allow_gaps {
                find_subsequence(&candidate, &sentence)
            } else {
                find_contiguous(&candidate, &sentence)
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

fn tokens_of(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

fn format_plain(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9e15 {
        format!("{}", n as i64)
    } else {
        format!("{n:?}")
    }
}

fn find_contiguous(needle: &[String], haystack: &[String]) -> Option<(usize, usize)> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .find(|&start| haystack[start..start + needle.len()] == *needle)
        .map(|start| (start, start + needle.len()))
}

fn find_subsequence(needle: &[String], haystack: &[String]) -> Option<(usize, usize)> {
    let mut first = None;
    let mut pos = 0;
    for token in needle {
        let found = haystack[pos..].iter().position(|t| t == token)? + pos;
        if first.is_none() {
            first = Some(found);
        }
        pos = found + 1;
    }
    first.map(|f| (f, pos))
}

/// One literal awaiting allocation.
#[derive(Debug, Clone)]
pub(crate) struct PendingLiteral {
    /// Entity token type, e.g. `NUMBER`.
    pub etype: String,
    /// Dictionary payload (`Measure` literals store their numeric part).
    pub payload: Value,
    /// Original value, used for matching.
    pub original: Value,
}

/// Assign entity tokens to literals and build the dictionary.
///
/// Returns, for each pending literal in order, its token.
pub(crate) fn allocate(
    pending: &[PendingLiteral],
    sentence: &[String],
    mode: AllocationMode,
    matcher: &dyn ValueMatcher,
) -> Result<(Vec<String>, EntityDict), Error> {
    // Dedup by (etype, payload): identical literals share a token.
    let mut unique: Vec<(String, Value, Value)> = Vec::new();
    let mut unique_index = Vec::with_capacity(pending.len());
    for literal in pending {
        let existing = unique
            .iter()
            .position(|(etype, payload, _)| *etype == literal.etype && *payload == literal.payload);
        match existing {
            Some(i) => unique_index.push(i),
            None => {
                unique.push((
                    literal.etype.clone(),
                    literal.payload.clone(),
                    literal.original.clone(),
                ));
                unique_index.push(unique.len() - 1);
            }
        }
    }

    // Order of allocation within each type.
    let order: Vec<usize> = match mode {
        AllocationMode::Sequential => (0..unique.len()).collect(),
        AllocationMode::Consecutive | AllocationMode::NonConsecutive => {
            let mut spans = Vec::with_capacity(unique.len());
            for (_, _, original) in &unique {
                match matcher.match_value(original, sentence) {
                    Some(span) => spans.push(span),
                    None => {
                        return Err(Error::UnmatchedLiteral(format!(
                            "value {original:?} does not appear in the sentence"
                        )))
                    }
                }
            }
            let mut order: Vec<usize> = (0..unique.len()).collect();
            order.sort_by_key(|&i| spans[i]);
            order
        }
    };

    // Per-type counters assign indices in allocation order.
    let mut counters: IndexMap<String, usize> = IndexMap::new();
    let mut tokens: Vec<Option<String>> = vec![None; unique.len()];
    let mut dict = EntityDict::new();
    for i in order {
        let (etype, payload, _) = &unique[i];
        let index = counters.entry(etype.clone()).or_insert(0);
        let token = format!("{etype}_{index}");
        *index += 1;
        dict.insert(token.clone(), payload.clone());
        tokens[i] = Some(token);
    }

    let assigned = unique_index
        .into_iter()
        .map(|i| tokens[i].clone().expect("all literals allocated"))
        .collect();
    Ok((assigned, dict))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    fn pend(value: Value) -> PendingLiteral {
        PendingLiteral {
            etype: super::super::entity_type_of(&value).unwrap(),
            payload: value.clone(),
            original: value,
        }
    }

    #[test]
    fn normalization_strips_accents_and_case() {
        assert_eq!(normalize_token("Café"), "cafe");
        assert_eq!(normalize_token("BEYONCÉ"), "beyonce");
    }

    #[test]
    fn consecutive_indices_follow_sentence_order() {
        // Program order: "world" then "hello"; sentence order is
        // reversed, so indices follow the sentence.
        let pending = vec![
            pend(Value::String("world".to_string())),
            pend(Value::String("hello".to_string())),
        ];
        let (tokens, dict) = allocate(
            &pending,
            &sentence("say hello world"),
            AllocationMode::Consecutive,
            &DefaultMatcher::default(),
        )
        .unwrap();
        assert_eq!(tokens, vec!["QUOTED_STRING_1", "QUOTED_STRING_0"]);
        assert_eq!(dict["QUOTED_STRING_0"], Value::String("hello".to_string()));
        assert_eq!(dict["QUOTED_STRING_1"], Value::String("world".to_string()));
    }

    #[test]
    fn sequential_indices_follow_program_order() {
        let pending = vec![
            pend(Value::String("world".to_string())),
            pend(Value::String("hello".to_string())),
        ];
        let (tokens, _) = allocate(
            &pending,
            &sentence("unrelated sentence"),
            AllocationMode::Sequential,
            &DefaultMatcher::default(),
        )
        .unwrap();
        assert_eq!(tokens, vec!["QUOTED_STRING_0", "QUOTED_STRING_1"]);
    }

    #[test]
    fn consecutive_unmatched_literal_errors() {
        let pending = vec![pend(Value::Number(42.0))];
        let err = allocate(
            &pending,
            &sentence("no numbers here"),
            AllocationMode::Consecutive,
            &DefaultMatcher::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnmatchedLiteral(_)));
    }

    #[test]
    fn identical_literals_share_a_token() {
        let pending = vec![
            pend(Value::Number(42.0)),
            pend(Value::Number(42.0)),
        ];
        let (tokens, dict) = allocate(
            &pending,
            &sentence("get 42 things"),
            AllocationMode::Consecutive,
            &DefaultMatcher::default(),
        )
        .unwrap();
        assert_eq!(tokens, vec!["NUMBER_0", "NUMBER_0"]);
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn currency_matches_dollar_spellings() {
        let matcher = DefaultMatcher::default();
        let value = Value::Currency {
            value: 50.0,
            code: "usd".to_string(),
        };
        assert!(matcher
            .match_value(&value, &sentence("send $50 to bob"))
            .is_some());
        assert!(matcher
            .match_value(&value, &sentence("send 50 dollars to bob"))
            .is_some());
        assert!(matcher
            .match_value(&value, &sentence("send nothing to bob"))
            .is_none());
    }

    #[test]
    fn entity_matches_display_form() {
        let matcher = DefaultMatcher::default();
        let value = Value::entity("spotify:123", "com.spotify:song", Some("Imagine".to_string()));
        assert_eq!(
            matcher.match_value(&value, &sentence("play imagine on spotify")),
            Some((1, 2))
        );
    }

    #[test]
    fn gaps_allowed_only_in_nonconsecutive() {
        let contiguous = DefaultMatcher::default();
        let gappy = DefaultMatcher { allow_gaps: true };
        let value = Value::String("hello big world".to_string());
        let s = sentence("hello big bad world");
        assert!(contiguous.match_value(&value, &s).is_none());
        assert_eq!(gappy.match_value(&value, &s), Some((0, 4)));
    }
}
