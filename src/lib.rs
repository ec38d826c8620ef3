//! # ThingTalk core toolchain
//!
//! The language toolchain for ThingTalk, the virtual-assistant DSL that
//! binds natural-language intents to structured invocations of Thingpedia
//! skills: concrete syntax, AST, type system and typechecker, normalizer,
//! prettyprinter, and the NN-syntax codec targeted by neural semantic
//! parsers.
//!
//! ## Pipeline
//!
//! ```text
//! source text ── lexer ── parser ──► AST
//! AST + SchemaRetriever ── typecheck ──► typed AST
//! typed AST ── normalize ──► canonical AST
//! canonical AST ◄── nn::decode / nn::encode ──► NN tokens + entities
//! AST ── pretty ──► canonical surface text
//! ```
//!
//! The toolchain is pure: the only I/O-capable collaborator is the
//! [`SchemaRetriever`](schema::SchemaRetriever), consulted during
//! typechecking (and after NN decoding, when the decoded program is
//! checked). Parsing, normalization, and NN coding never perform I/O.
//!
//! ## Example
//!
//! ```no_run
//! use thingtalk::{parse, typecheck, normalize, TypecheckOptions};
//! use thingtalk::foundation::CancellationToken;
//! use thingtalk::schema::MemorySchemaRetriever;
//!
//! # async fn run() -> Result<(), thingtalk::Error> {
//! let retriever = MemorySchemaRetriever::new();
//! let program = parse("now => @com.xkcd.get_comic(number=42) => notify;")?;
//! let typed = typecheck(
//!     &program,
//!     &retriever,
//!     &TypecheckOptions::default(),
//!     &CancellationToken::none(),
//! )
//! .await?;
//! let canonical = normalize(&typed)?;
//! # let _ = canonical;
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod error;
pub mod foundation;
pub mod lexer;
pub mod nn;
pub mod optimize;
pub mod parser;
pub mod pretty;
pub mod schema;
pub mod typecheck;
pub mod types;

pub use ast::Input;
pub use error::{Error, LexicalError, Result, TypeError, TypeErrorKind};
pub use optimize::normalize;
pub use parser::{parse, parse_permission_rule, parse_program, ParseError};
pub use pretty::pretty;
pub use typecheck::{typecheck, TypecheckOptions};

/// Toolchain version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
