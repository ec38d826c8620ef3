//! Lexical analysis for ThingTalk surface syntax.
//!
//! Tokenization uses logos. Structured literals are single tokens with a
//! payload: `5kWh` is one `Measure` token, `$50` one `Currency` token,
//! `"foo"` one unescaped `Str` token. Comments and whitespace are skipped
//! by lexer attributes and never reach the parser.
//!
//! Identifiers starting with `__` are reserved for the toolchain
//! (`__pi`, `__const`); the parser rejects other uses.

use logos::Logos;

use crate::error::LexicalError;
use crate::foundation::Span;

/// A ThingTalk token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
pub enum Token {
    // === Keywords ===
    #[token("now")]
    Now,
    #[token("monitor")]
    Monitor,
    #[token("notify")]
    Notify,
    #[token("return")]
    Return,
    #[token("join")]
    Join,
    #[token("on")]
    On,
    #[token("edge")]
    Edge,
    #[token("new")]
    New,
    #[token("as")]
    As,
    #[token("of")]
    Of,
    #[token("in")]
    In,
    #[token("req")]
    Req,
    #[token("opt")]
    Opt,
    #[token("out")]
    Out,
    #[token("compute")]
    Compute,
    #[token("aggregate")]
    Aggregate,
    #[token("sort")]
    Sort,
    #[token("asc")]
    Asc,
    #[token("desc")]
    Desc,
    #[token("let")]
    Let,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("enum")]
    Enum,
    #[token("class")]
    Class,
    #[token("extends")]
    Extends,
    #[token("dataset")]
    Dataset,
    #[token("bookkeeping")]
    Bookkeeping,
    #[token("timer")]
    Timer,
    #[token("attimer")]
    AtTimer,
    #[token("result")]
    Result,
    #[token("null")]
    Null,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("entity")]
    Entity,
    #[token("monitorable")]
    Monitorable,
    #[token("list")]
    List,
    #[token("query")]
    Query,
    #[token("action")]
    Action,
    #[token("stream")]
    Stream,
    #[token("oninput")]
    OnInput,
    #[token("start_of")]
    StartOf,
    #[token("end_of")]
    EndOf,

    // === Operators ===
    #[token("=>")]
    Arrow,
    #[token(":=")]
    Define,
    #[token("==")]
    EqEq,
    #[token(">=")]
    GtEq,
    #[token("<=")]
    LtEq,
    #[token("=~")]
    Like,
    #[token("~=")]
    RevLike,
    #[token("=")]
    Eq,
    #[token("^^")]
    EntityCast,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    // === Punctuation ===
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("#_[")]
    NlAnnotationOpen,
    #[token("#[")]
    ImplAnnotationOpen,

    // === Literals ===
    /// Measure literal, e.g. `5kWh`, `1.5h`, `5defaultTemperature`.
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?[A-Za-z_][A-Za-z0-9_]*", |lex| {
        split_measure(lex.slice())
    }, priority = 3)]
    Measure((f64, String)),

    /// Currency shorthand `$50` (US dollars) or `50$usd`.
    #[regex(r"\$[0-9]+(\.[0-9]+)?", |lex| {
        let value = lex.slice()[1..].parse::<f64>().ok()?;
        Some((value, "usd".to_string()))
    })]
    #[regex(r"[0-9]+(\.[0-9]+)?\$[a-zA-Z]+", |lex| {
        let s = lex.slice();
        let split = s.find('$')?;
        let value = s[..split].parse::<f64>().ok()?;
        Some((value, s[split + 1..].to_lowercase()))
    })]
    Currency((f64, String)),

    /// Floating-point literal. Higher priority than `Measure` so `1e10`
    /// lexes as a double, not as `1` with unit `e10`.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok(), priority = 10)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok(), priority = 10)]
    Double(f64),

    /// Integer literal.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok(), priority = 10)]
    Integer(i64),

    /// Double-quoted string with `\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len() - 1])
    })]
    Str(String),

    /// Class reference `@com.twitter.post` (payload excludes the `@`).
    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_.-]*", |lex| lex.slice()[1..].to_string())]
    ClassIdent(String),

    /// `$`-prefixed keyword: `$event`, `$context`, `$location`, `$time`,
    /// `$dialogue`, `$undefined`, `$answer`, ... (payload excludes the `$`).
    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    DollarIdent(String),

    /// `$?` — shorthand for `$undefined`.
    #[token("$?")]
    UndefinedMark,

    /// Plain identifier.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Identifier-shaped text of this token, for positions where keywords
    /// may be used as parameter names (`in`, `out`, `query`, ...).
    pub fn as_ident(&self) -> Option<&str> {
        Some(match self {
            Token::Ident(s) => s.as_str(),
            Token::Now => "now",
            Token::Monitor => "monitor",
            Token::Join => "join",
            Token::On => "on",
            Token::New => "new",
            Token::Of => "of",
            Token::In => "in",
            Token::Req => "req",
            Token::Opt => "opt",
            Token::Out => "out",
            Token::Sort => "sort",
            Token::Asc => "asc",
            Token::Desc => "desc",
            Token::Timer => "timer",
            Token::AtTimer => "attimer",
            Token::Result => "result",
            Token::From => "from",
            Token::Entity => "entity",
            Token::List => "list",
            Token::Query => "query",
            Token::Action => "action",
            Token::Stream => "stream",
            Token::Class => "class",
            Token::Compute => "compute",
            Token::Aggregate => "aggregate",
            Token::Monitorable => "monitorable",
            Token::Edge => "edge",
            _ => return None,
        })
    }
}

/// Split a measure token into numeric value and unit.
///
/// The split point is the longest numeric prefix that parses as a float
/// and leaves an identifier-shaped remainder, so `1e10m` is `1e10` meters
/// rather than `1` of unit `e10m`.
fn split_measure(s: &str) -> Option<(f64, String)> {
    let bytes = s.as_bytes();
    for i in (1..s.len()).rev() {
        let c = bytes[i] as char;
        if !(c.is_ascii_alphabetic() || c == '_') {
            continue;
        }
        if !s[i..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            continue;
        }
        if let Ok(value) = s[..i].parse::<f64>() {
            return Some((value, s[i..].to_string()));
        }
    }
    None
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Measure((value, unit)) => write!(f, "{value}{unit}"),
            Token::Currency((value, code)) => write!(f, "{value}${code}"),
            Token::Double(x) => write!(f, "{x}"),
            Token::Integer(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::ClassIdent(name) => write!(f, "@{name}"),
            Token::DollarIdent(name) => write!(f, "${name}"),
            Token::Ident(name) => write!(f, "{name}"),
            Token::UndefinedMark => write!(f, "$?"),
            simple => write!(f, "{}", simple_token_str(simple)),
        }
    }
}

fn simple_token_str(token: &Token) -> &'static str {
    match token {
        Token::Now => "now",
        Token::Monitor => "monitor",
        Token::Notify => "notify",
        Token::Return => "return",
        Token::Join => "join",
        Token::On => "on",
        Token::Edge => "edge",
        Token::New => "new",
        Token::As => "as",
        Token::Of => "of",
        Token::In => "in",
        Token::Req => "req",
        Token::Opt => "opt",
        Token::Out => "out",
        Token::Compute => "compute",
        Token::Aggregate => "aggregate",
        Token::Sort => "sort",
        Token::Asc => "asc",
        Token::Desc => "desc",
        Token::Let => "let",
        Token::True => "true",
        Token::False => "false",
        Token::Enum => "enum",
        Token::Class => "class",
        Token::Extends => "extends",
        Token::Dataset => "dataset",
        Token::Bookkeeping => "bookkeeping",
        Token::Timer => "timer",
        Token::AtTimer => "attimer",
        Token::Result => "result",
        Token::Null => "null",
        Token::Import => "import",
        Token::From => "from",
        Token::Entity => "entity",
        Token::Monitorable => "monitorable",
        Token::List => "list",
        Token::Query => "query",
        Token::Action => "action",
        Token::Stream => "stream",
        Token::OnInput => "oninput",
        Token::StartOf => "start_of",
        Token::EndOf => "end_of",
        Token::Arrow => "=>",
        Token::Define => ":=",
        Token::EqEq => "==",
        Token::GtEq => ">=",
        Token::LtEq => "<=",
        Token::Like => "=~",
        Token::RevLike => "~=",
        Token::Eq => "=",
        Token::EntityCast => "^^",
        Token::AndAnd => "&&",
        Token::OrOr => "||",
        Token::Bang => "!",
        Token::Plus => "+",
        Token::Minus => "-",
        Token::Star => "*",
        Token::Slash => "/",
        Token::Colon => ":",
        Token::Comma => ",",
        Token::Semicolon => ";",
        Token::Dot => ".",
        Token::LParen => "(",
        Token::RParen => ")",
        Token::LBracket => "[",
        Token::RBracket => "]",
        Token::LBrace => "{",
        Token::RBrace => "}",
        Token::NlAnnotationOpen => "#_[",
        Token::ImplAnnotationOpen => "#[",
        _ => "<token>",
    }
}

/// Token plus its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenize a whole source text.
///
/// Fails fast: the first unrecognized character aborts the lex with a
/// [`LexicalError`] pointing at it.
pub fn tokenize(source: &str, file_id: u16) -> Result<Vec<SpannedToken>, LexicalError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let start_line = 1 + source[..range.start].matches('\n').count() as u32;
        match result {
            Ok(token) => tokens.push(SpannedToken {
                token,
                span: Span::new(
                    file_id,
                    range.start as u32,
                    range.end as u32,
                    start_line.min(u16::MAX as u32) as u16,
                ),
            }),
            Err(()) => {
                let col = range.start
                    - source[..range.start]
                        .rfind('\n')
                        .map(|i| i + 1)
                        .unwrap_or(0);
                return Err(LexicalError {
                    line: start_line,
                    col: col as u32 + 1,
                    message: format!(
                        "unexpected character {:?}",
                        source[range.clone()].chars().next().unwrap_or('\0')
                    ),
                });
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        tokenize(source, 0)
            .expect("lexing failed")
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn keywords_and_idents() {
        let tokens = lex("now monitor notify status");
        assert_eq!(
            tokens,
            vec![
                Token::Now,
                Token::Monitor,
                Token::Notify,
                Token::Ident("status".to_string()),
            ]
        );
    }

    #[test]
    fn class_idents() {
        let tokens = lex("@com.twitter.post");
        assert_eq!(tokens, vec![Token::ClassIdent("com.twitter.post".to_string())]);
    }

    #[test]
    fn numbers() {
        let tokens = lex("42 3.14 1e10");
        assert_eq!(
            tokens,
            vec![Token::Integer(42), Token::Double(3.14), Token::Double(1e10)]
        );
    }

    #[test]
    fn measure_is_one_token() {
        let tokens = lex("5kWh 1.5h 5defaultTemperature");
        assert_eq!(
            tokens,
            vec![
                Token::Measure((5.0, "kWh".to_string())),
                Token::Measure((1.5, "h".to_string())),
                Token::Measure((5.0, "defaultTemperature".to_string())),
            ]
        );
    }

    #[test]
    fn exponent_is_not_a_unit() {
        // `1e10` is a double, `1e10m` is 1e10 meters.
        let tokens = lex("1e10m");
        assert_eq!(tokens, vec![Token::Measure((1e10, "m".to_string()))]);
    }

    #[test]
    fn currency_shorthands() {
        let tokens = lex("$50 25.5$eur");
        assert_eq!(
            tokens,
            vec![
                Token::Currency((50.0, "usd".to_string())),
                Token::Currency((25.5, "eur".to_string())),
            ]
        );
    }

    #[test]
    fn strings_unescape() {
        let tokens = lex(r#""hello" "a\"b\nc""#);
        assert_eq!(
            tokens,
            vec![
                Token::Str("hello".to_string()),
                Token::Str("a\"b\nc".to_string()),
            ]
        );
    }

    #[test]
    fn entity_literal_tokens() {
        let tokens = lex(r#""imagine"^^com.spotify:song"#);
        assert_eq!(
            tokens,
            vec![
                Token::Str("imagine".to_string()),
                Token::EntityCast,
                Token::Ident("com".to_string()),
                Token::Dot,
                Token::Ident("spotify".to_string()),
                Token::Colon,
                Token::Ident("song".to_string()),
            ]
        );
    }

    #[test]
    fn dollar_forms() {
        let tokens = lex("$undefined $? $event $context $dialogue");
        assert_eq!(
            tokens,
            vec![
                Token::DollarIdent("undefined".to_string()),
                Token::UndefinedMark,
                Token::DollarIdent("event".to_string()),
                Token::DollarIdent("context".to_string()),
                Token::DollarIdent("dialogue".to_string()),
            ]
        );
    }

    #[test]
    fn annotations_open_distinctly() {
        let tokens = lex("#_[canonical=\"x\"] #[poll_interval=1h]");
        assert_eq!(tokens[0], Token::NlAnnotationOpen);
        assert!(tokens.contains(&Token::ImplAnnotationOpen));
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = lex("now // line comment\n/* block\ncomment */ notify");
        assert_eq!(tokens, vec![Token::Now, Token::Notify]);
    }

    #[test]
    fn operators() {
        let tokens = lex("=> == >= <= =~ ~= && || := ^^");
        assert_eq!(
            tokens,
            vec![
                Token::Arrow,
                Token::EqEq,
                Token::GtEq,
                Token::LtEq,
                Token::Like,
                Token::RevLike,
                Token::AndAnd,
                Token::OrOr,
                Token::Define,
                Token::EntityCast,
            ]
        );
    }

    #[test]
    fn lexical_error_has_position() {
        let err = tokenize("now ` notify", 0).unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.col, 5);
    }

    #[test]
    fn spans_track_lines() {
        let tokens = tokenize("now\nnotify", 0).unwrap();
        assert_eq!(tokens[0].span.start_line, 1);
        assert_eq!(tokens[1].span.start_line, 2);
    }
}
