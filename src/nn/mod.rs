//! NN-syntax codec: the whitespace-tokenized program form used as the
//! target of neural semantic parsers.
//!
//! The alphabet is grammar keywords (lowercase words and punctuation),
//! parameter tokens (`param:status`), function tokens
//! (`@com.twitter.post`), placeholder tokens (`SLOT_0`), and entity
//! tokens (`QUOTED_STRING_0`, `NUMBER_2`,
//! `GENERIC_ENTITY_com.spotify:song_0`). Literal values leave the token
//! stream and move into an entity dictionary; the [`allocator`] assigns
//! their indices against the natural-language sentence.
//!
//! Dates are rendered structurally (`new Date ( 2020 , 4 , 1 )`,
//! `start_of day`) rather than as opaque entities.
//!
//! `decode(encode(p, s), s) == p` for every typechecked, normalized `p`
//! whose literals match the sentence.

pub mod allocator;
mod compat;
mod decode;
mod encode;

pub use allocator::{AllocationMode, DefaultMatcher, ValueMatcher};
pub use compat::{apply_compatibility, NnSyntaxVersion};
pub use decode::decode;
pub use encode::{encode, encode_with_options, EncodeOptions};

use indexmap::IndexMap;

use crate::ast::{Input, Value};
use crate::error::Error;
use crate::foundation::CancellationToken;
use crate::schema::SchemaRetriever;
use crate::typecheck::TypecheckOptions;

/// Decode an NN token sequence and typecheck the result.
///
/// This is the usual consumption path for semantic-parser output: the
/// syntactic decode is pure, then schemas resolve through the retriever
/// exactly as for surface programs.
pub async fn decode_and_typecheck(
    tokens: &[String],
    entities: &EntityDict,
    retriever: &dyn SchemaRetriever,
    options: &TypecheckOptions,
    cancel: &CancellationToken,
) -> Result<Input, Error> {
    let input = decode(tokens, entities)?;
    crate::typecheck::typecheck(&input, retriever, options, cancel).await
}

/// Maps entity tokens (`NUMBER_0`) and slot tokens (`SLOT_1`) to their
/// concrete values.
pub type EntityDict = IndexMap<String, Value>;

/// Entity-token type for a literal, when the literal is entity-allocated
/// (dates and small numbers are rendered structurally instead).
pub(crate) fn entity_type_of(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => Some("QUOTED_STRING".to_string()),
        Value::Number(_) => Some("NUMBER".to_string()),
        Value::Measure { .. } => Some("NUMBER".to_string()),
        Value::Currency { .. } => Some("CURRENCY".to_string()),
        Value::Time(crate::ast::TimeValue::Absolute { .. }) => Some("TIME".to_string()),
        Value::Location(crate::ast::LocationValue::Absolute { .. })
        | Value::Location(crate::ast::LocationValue::Unresolved(_)) => {
            Some("LOCATION".to_string())
        }
        Value::Entity { kind, .. } => Some(match kind.as_str() {
            "tt:username" => "USERNAME".to_string(),
            "tt:hashtag" => "HASHTAG".to_string(),
            "tt:url" => "URL".to_string(),
            "tt:phone_number" => "PHONE_NUMBER".to_string(),
            "tt:email_address" => "EMAIL_ADDRESS".to_string(),
            "tt:path_name" => "PATH_NAME".to_string(),
            other => format!("GENERIC_ENTITY_{other}"),
        }),
        _ => None,
    }
}

/// Does this word look like an entity token (`TYPE_3`)?
pub(crate) fn is_entity_token(word: &str) -> bool {
    match word.rsplit_once('_') {
        Some((prefix, index)) => {
            !prefix.is_empty()
                && !index.is_empty()
                && index.chars().all(|c| c.is_ascii_digit())
                && prefix.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_token_shapes() {
        assert!(is_entity_token("NUMBER_0"));
        assert!(is_entity_token("QUOTED_STRING_12"));
        assert!(is_entity_token("GENERIC_ENTITY_com.spotify:song_0"));
        assert!(is_entity_token("SLOT_1"));
        assert!(!is_entity_token("param:number"));
        assert!(!is_entity_token("notify"));
        assert!(!is_entity_token("unit_less"));
    }

    #[test]
    fn builtin_entities_have_short_tokens() {
        let username = Value::entity("bob", "tt:username", None);
        assert_eq!(entity_type_of(&username).as_deref(), Some("USERNAME"));
        let song = Value::entity("x", "com.spotify:song", None);
        assert_eq!(
            entity_type_of(&song).as_deref(),
            Some("GENERIC_ENTITY_com.spotify:song")
        );
    }
}
