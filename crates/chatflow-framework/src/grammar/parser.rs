use serde::Serialize;
use serde_json::{Number, Value};

use super::split::tokenize;
use crate::error::{GrammarError, GrammarResult};

/// Typed placeholder kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    String,
    Number,
    Bool,
    Any,
}

impl Placeholder {
    fn parse(name: &str) -> GrammarResult<Self> {
        match name {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "bool" => Ok(Self::Bool),
            "any" => Ok(Self::Any),
            other => Err(GrammarError::UnknownPlaceholder(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Slot(Placeholder),
}

/// A compiled grammar definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    define: String,
    parts: Vec<Part>,
}

impl Grammar {
    /// Compiles a definition such as `"todo add [string]"`.
    pub fn parse(define: &str) -> GrammarResult<Self> {
        let words: Vec<&str> = define.split_whitespace().collect();
        if words.is_empty() {
            return Err(GrammarError::Empty);
        }
        let mut parts = Vec::with_capacity(words.len());
        for (i, word) in words.iter().enumerate() {
            let part = match word.strip_prefix('[').and_then(|w| w.strip_suffix(']')) {
                Some(name) => {
                    let slot = Placeholder::parse(name)?;
                    if slot == Placeholder::Any && i + 1 != words.len() {
                        return Err(GrammarError::AnyNotLast(define.to_string()));
                    }
                    Part::Slot(slot)
                }
                None => Part::Literal(word.to_string()),
            };
            parts.push(part);
        }
        Ok(Self {
            define: words.join(" "),
            parts,
        })
    }

    /// The normalized definition.
    pub fn define(&self) -> &str {
        &self.define
    }

    /// Leading literal, used in help listings.
    pub fn keyword(&self) -> Option<&str> {
        match self.parts.first() {
            Some(Part::Literal(word)) => Some(word),
            _ => None,
        }
    }

    /// Tokenizes `text` and matches it.
    pub fn match_text(&self, text: &str) -> Option<Args> {
        self.match_tokens(&tokenize(text))
    }

    /// Matches a token stream against the grammar.
    pub fn match_tokens(&self, tokens: &[String]) -> Option<Args> {
        let mut args = Vec::new();
        let mut rest = tokens;
        for part in &self.parts {
            match part {
                Part::Slot(Placeholder::Any) => {
                    args.push(Value::String(rest.join(" ")));
                    rest = &[];
                }
                Part::Literal(word) => {
                    let (token, tail) = rest.split_first()?;
                    if !token.eq_ignore_ascii_case(word) {
                        return None;
                    }
                    rest = tail;
                }
                Part::Slot(slot) => {
                    let (token, tail) = rest.split_first()?;
                    args.push(convert(*slot, token)?);
                    rest = tail;
                }
            }
        }
        rest.is_empty().then_some(Args(args))
    }
}

fn convert(slot: Placeholder, token: &str) -> Option<Value> {
    match slot {
        Placeholder::String | Placeholder::Any => Some(Value::String(token.to_string())),
        Placeholder::Number => {
            if let Ok(i) = token.parse::<i64>() {
                return Some(Value::Number(i.into()));
            }
            token
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
        }
        Placeholder::Bool => match token.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
    }
}

/// Placeholder values captured by a grammar match, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    pub fn i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_i64)
    }

    pub fn f64(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Value::as_f64)
    }

    pub fn bool(&self, index: usize) -> Option<bool> {
        self.get(index).and_then(Value::as_bool)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}
