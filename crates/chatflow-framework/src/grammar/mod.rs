//! Declarative command grammars.
//!
//! A grammar is a whitespace-separated list of literal words and typed
//! placeholders:
//!
//! | Token | Accepts |
//! |-------|---------|
//! | `word` | the literal word (ASCII case-insensitive) |
//! | `[string]` | any single token |
//! | `[number]` | a token that parses as a number |
//! | `[bool]` | `true/false`, `yes/no`, `on/off`, `1/0` |
//! | `[any]` | the remaining tokens, possibly none; must come last |
//!
//! Input is tokenized with [`tokenize`] and matched against the grammar as
//! a whole. A match yields the placeholder values as [`Args`].
//!
//! ```rust,ignore
//! let grammar = Grammar::parse("share [string]")?;
//! let args = grammar.match_text("share hello").unwrap();
//! assert_eq!(args.str(0), Some("hello"));
//! ```

mod parser;
mod split;

pub use parser::{Args, Grammar, Placeholder};
pub use split::tokenize;
