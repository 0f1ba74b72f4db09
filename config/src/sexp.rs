//! S-expression reader for `.ensime` project files.
//!
//! An `.ensime` file is a list of alternating keyword/value pairs:
//!
//! ```text
//! (:name "demo"
//!  :scala-version "2.11.8"
//!  :java-flags ("-Xmx2g" "-Xss2m")
//!  :subprojects ((:name "core" :source-roots ("/src/core"))))
//! ```
//!
//! [`parse_document`] turns this into a JSON object keyed by the keyword
//! names with the leading `:` stripped. A value whose first element is itself
//! a list is a nested record: each inner list is converted into an object, so
//! a single nested record becomes a one-element array wrapping its mapping.

use std::iter::Peekable;
use std::str::Chars;

use serde_json::{Map, Number, Value};

/// Malformed S-expression syntax or pair structure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ConfigParseError {
    line: usize,
    message: String,
}

impl ConfigParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }

    /// 1-indexed line where the problem was detected.
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

type Result<T> = std::result::Result<T, ConfigParseError>;

#[derive(Debug, Clone, PartialEq)]
enum Datum {
    List { items: Vec<Datum>, line: usize },
    Str(String),
    Int(i64),
    Float(f64),
    Symbol { name: String, line: usize },
}

struct Reader<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == ';' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Read every top-level datum until EOF.
    fn read_all(&mut self) -> Result<Vec<Datum>> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            match self.chars.peek() {
                None => return Ok(out),
                Some(')') => return Err(ConfigParseError::new(self.line, "unbalanced `)`")),
                Some(_) => out.push(self.read_datum()?),
            }
        }
    }

    fn read_datum(&mut self) -> Result<Datum> {
        self.skip_trivia();
        match self.chars.peek().copied() {
            None => Err(ConfigParseError::new(self.line, "unexpected end of input")),
            Some('(') => self.read_list(),
            Some('"') => self.read_string(),
            Some(_) => Ok(self.read_atom()),
        }
    }

    fn read_list(&mut self) -> Result<Datum> {
        let line = self.line;
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.chars.peek() {
                None => {
                    return Err(ConfigParseError::new(
                        line,
                        "unbalanced `(`: list is never closed",
                    ));
                }
                Some(')') => {
                    self.bump();
                    return Ok(Datum::List { items, line });
                }
                Some(_) => items.push(self.read_datum()?),
            }
        }
    }

    fn read_string(&mut self) -> Result<Datum> {
        let line = self.line;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ConfigParseError::new(line, "unterminated string")),
                Some('"') => return Ok(Datum::Str(out)),
                Some('\\') => match self.bump() {
                    None => return Err(ConfigParseError::new(line, "unterminated string")),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn read_atom(&mut self) -> Datum {
        let line = self.line;
        let mut token = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';') {
                break;
            }
            token.push(c);
            self.bump();
        }

        if let Ok(n) = token.parse::<i64>() {
            return Datum::Int(n);
        }
        if token.contains(|c: char| c.is_ascii_digit())
            && let Ok(f) = token.parse::<f64>()
            && f.is_finite()
        {
            return Datum::Float(f);
        }
        Datum::Symbol { name: token, line }
    }
}

/// Parse an `.ensime` document into a JSON object.
///
/// The document is either one list of pairs or several pair lists in a row,
/// which are read as a single concatenated list.
pub fn parse_document(input: &str) -> Result<Map<String, Value>> {
    let mut reader = Reader::new(input);
    let forms = reader.read_all()?;

    let mut pairs = Vec::new();
    for form in forms {
        match form {
            Datum::List { items, .. } => pairs.extend(items),
            Datum::Symbol { line, .. } => {
                return Err(ConfigParseError::new(
                    line,
                    "expected a list of key/value pairs at top level",
                ));
            }
            _ => {
                return Err(ConfigParseError::new(
                    reader.line,
                    "expected a list of key/value pairs at top level",
                ));
            }
        }
    }
    pairs_to_map(&pairs, 1)
}

fn pairs_to_map(items: &[Datum], line: usize) -> Result<Map<String, Value>> {
    if items.len() % 2 != 0 {
        return Err(ConfigParseError::new(
            line,
            format!(
                "odd number of elements ({}) in a key/value list",
                items.len()
            ),
        ));
    }

    let mut map = Map::new();
    for pair in items.chunks_exact(2) {
        let key = key_name(&pair[0], line)?;
        let value = to_value(&pair[1])?;
        map.insert(key, value);
    }
    Ok(map)
}

fn key_name(datum: &Datum, line: usize) -> Result<String> {
    match datum {
        Datum::Symbol { name, .. } => Ok(name.trim_start_matches(':').to_string()),
        Datum::Str(s) => Ok(s.trim_start_matches(':').to_string()),
        Datum::List { line, .. } => Err(ConfigParseError::new(
            *line,
            "expected a keyword, found a list",
        )),
        Datum::Int(n) => Err(ConfigParseError::new(
            line,
            format!("expected a keyword, found number {n}"),
        )),
        Datum::Float(f) => Err(ConfigParseError::new(
            line,
            format!("expected a keyword, found number {f}"),
        )),
    }
}

fn to_value(datum: &Datum) -> Result<Value> {
    Ok(match datum {
        Datum::Str(s) => Value::String(s.clone()),
        Datum::Int(n) => Value::Number((*n).into()),
        Datum::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Datum::Symbol { name, .. } if name == "nil" => Value::Null,
        Datum::Symbol { name, .. } => Value::String(name.clone()),
        Datum::List { items, .. } => {
            if matches!(items.first(), Some(Datum::List { .. })) {
                // Nested records: every inner list is its own pair list.
                let mut records = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Datum::List {
                            items: inner,
                            line: inner_line,
                        } => records.push(Value::Object(pairs_to_map(inner, *inner_line)?)),
                        other => records.push(to_value(other)?),
                    }
                }
                Value::Array(records)
            } else {
                Value::Array(items.iter().map(to_value).collect::<Result<_>>()?)
            }
        }
    })
}
