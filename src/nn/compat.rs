//! Backward compatibility with older NN-syntax releases.
//!
//! Each versioned release gets a forward-rewrite over the token stream;
//! the decoder itself only understands the current dialect. Rewrites
//! compose: tokens produced by an old release pass through every rule for
//! versions newer than it.

use std::fmt;

/// An NN-syntax dialect version, `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NnSyntaxVersion {
    pub major: u16,
    pub minor: u16,
}

impl NnSyntaxVersion {
    pub const CURRENT: NnSyntaxVersion = NnSyntaxVersion {
        major: 1,
        minor: 11,
    };

    /// Parse `"1.9"` or `"1.9.2"` (patch ignored).
    pub fn parse(text: &str) -> Option<NnSyntaxVersion> {
        let mut parts = text.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some(NnSyntaxVersion { major, minor })
    }
}

impl fmt::Display for NnSyntaxVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Rewrite a token stream produced for `version` into the current
/// dialect.
pub fn apply_compatibility(version: NnSyntaxVersion, tokens: Vec<String>) -> Vec<String> {
    let mut tokens = tokens;
    if version < (NnSyntaxVersion { major: 1, minor: 10 }) {
        tokens = rewrite_dollar_undefined(tokens);
        tokens = rewrite_argminmax(tokens);
    }
    tokens
}

/// Pre-1.10 releases spelled the slot hole `$undefined`.
fn rewrite_dollar_undefined(tokens: Vec<String>) -> Vec<String> {
    tokens
        .into_iter()
        .map(|t| {
            if t == "$undefined" {
                "undefined".to_string()
            } else {
                t
            }
        })
        .collect()
}

/// Pre-1.10 `argmin` / `argmax` become sort plus a first-row index:
/// `argmax param:x of t` -> `sort param:x desc of t [ 1 ]`.
fn rewrite_argminmax(tokens: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let direction = match tokens[i].as_str() {
            "argmax" => Some("desc"),
            "argmin" => Some("asc"),
            _ => None,
        };
        let Some(direction) = direction else {
            out.push(tokens[i].clone());
            i += 1;
            continue;
        };

        out.push("sort".to_string());
        i += 1;
        // `param:x of` follows; copy through the parameter, insert the
        // direction, then find the end of the table expression and index
        // its first row.
        if i < tokens.len() && tokens[i].starts_with("param:") {
            out.push(tokens[i].clone());
            i += 1;
        }
        out.push(direction.to_string());

        // Copy until the table expression ends (top-level `=>`, `;`, or
        // end of stream), then append `[ 1 ]`.
        let mut depth = 0usize;
        let mut end = i;
        while end < tokens.len() {
            match tokens[end].as_str() {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                "=>" | ";" if depth == 0 => break,
                _ => {}
            }
            end += 1;
        }
        out.extend(tokens[i..end].iter().cloned());
        out.push("[".to_string());
        out.push("1".to_string());
        out.push("]".to_string());
        i = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn version_ordering() {
        let old = NnSyntaxVersion::parse("1.9.2").unwrap();
        let new = NnSyntaxVersion::parse("1.10").unwrap();
        assert!(old < new);
        assert!(new <= NnSyntaxVersion::CURRENT);
    }

    #[test]
    fn dollar_undefined_rewrites() {
        let tokens = toks("now => @com.twitter.post param:status = $undefined");
        let rewritten =
            apply_compatibility(NnSyntaxVersion::parse("1.9").unwrap(), tokens);
        assert!(rewritten.contains(&"undefined".to_string()));
        assert!(!rewritten.contains(&"$undefined".to_string()));
    }

    #[test]
    fn current_version_is_untouched() {
        let tokens = toks("now => @com.twitter.post param:status = $undefined");
        let rewritten = apply_compatibility(NnSyntaxVersion::CURRENT, tokens.clone());
        assert_eq!(rewritten, tokens);
    }

    #[test]
    fn argmax_becomes_sort_and_index() {
        let tokens = toks("now => argmax param:file_size of @com.google.drive.list_drive_files => notify");
        let rewritten =
            apply_compatibility(NnSyntaxVersion::parse("1.9").unwrap(), tokens);
        assert_eq!(
            rewritten,
            toks("now => sort param:file_size desc of @com.google.drive.list_drive_files [ 1 ] => notify")
        );
    }

    #[test]
    fn argmin_uses_ascending_sort() {
        let tokens = toks("now => argmin param:price of @org.store.search => notify");
        let rewritten =
            apply_compatibility(NnSyntaxVersion::parse("1.9").unwrap(), tokens);
        assert!(rewritten.windows(2).any(|w| w[0] == "param:price" && w[1] == "asc"));
    }
}
