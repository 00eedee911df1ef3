//! Reader and writer for the line-oriented `key = value` configuration format.
//!
//! Each non-empty line holds one assignment. `//` and `#` start a comment anywhere outside
//! of a quoted string, which is also how a key is switched off: a commented key is simply
//! absent from the map. A bracketed list may continue over several lines until its
//! brackets balance.
use fxhash::FxHashMap;
use serde_yaml::{Mapping, Value};
use std::fmt::Display;
use std::path::Path;

use super::constants::COMMENT_MARKERS;
use super::error::{ConfigError, ConfigValueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Square,
    Round,
}

impl Bracket {
    fn delimiters(&self) -> (char, char) {
        match self {
            Self::Square => ('[', ']'),
            Self::Round => ('(', ')'),
        }
    }
}

/// A single configuration value
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A quoted string
    Str(String),
    /// An unquoted word that is not a number or boolean
    Word(String),
    List(Bracket, Vec<ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Word(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            Self::List(_, items) => Some(items),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<Vec<i64>> {
        self.as_list()?.iter().map(|v| v.as_int()).collect()
    }

    fn to_yaml(&self) -> Value {
        match self {
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Bool(b) => Value::Bool(*b),
            Self::Str(s) | Self::Word(s) => Value::String(s.clone()),
            Self::List(_, items) => Value::Sequence(items.iter().map(|v| v.to_yaml()).collect()),
        }
    }

    fn from_yaml(key: &str, value: &Value) -> Result<Option<Self>, ConfigValueError> {
        let converted = match value {
            Value::Null => return Ok(None),
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s.clone()),
            Value::Sequence(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(v) = Self::from_yaml(key, item)? {
                        list.push(v);
                    }
                }
                Self::List(Bracket::Square, list)
            }
            Value::Mapping(_) | Value::Tagged(_) => {
                return Err(ConfigValueError::WrongType {
                    key: key.to_string(),
                    expected: "a scalar or a list",
                })
            }
        };
        Ok(Some(converted))
    }
}

impl Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Str(s) if s.contains('"') => write!(f, "'{s}'"),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::Word(s) => write!(f, "{s}"),
            Self::List(bracket, items) => {
                let (open, close) = bracket.delimiters();
                let rendered: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                if *bracket == Bracket::Round && items.len() == 1 {
                    write!(f, "{open}{},{close}", rendered[0])
                } else {
                    write!(f, "{open}{}{close}", rendered.join(", "))
                }
            }
        }
    }
}

/// Remove a trailing comment, leaving comment markers inside quotes alone
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (idx, c) in line.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => (),
            None if c == '"' || c == '\'' => quote = Some(c),
            None => {
                if COMMENT_MARKERS.iter().any(|m| line[idx..].starts_with(m)) {
                    return &line[..idx];
                }
            }
        }
    }
    line
}

/// Net bracket depth of a piece of text, ignoring quoted content
fn bracket_depth(text: &str) -> i64 {
    let mut quote: Option<char> = None;
    let mut depth = 0;
    for c in text.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => (),
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => depth -= 1,
                _ => (),
            },
        }
    }
    depth
}

/// Split on top-level commas. Returns None if the brackets do not nest properly
fn split_top_level(text: &str) -> Option<Vec<&str>> {
    let mut quote: Option<char> = None;
    let mut depth = 0i64;
    let mut pieces = Vec::new();
    let mut begin = 0;
    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => (),
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return None;
                    }
                }
                ',' if depth == 0 => {
                    pieces.push(&text[begin..idx]);
                    begin = idx + 1;
                }
                _ => (),
            },
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    pieces.push(&text[begin..]);
    Some(pieces)
}

fn find_assignment(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => (),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '=' => return Some(idx),
            None => (),
        }
    }
    None
}

fn parse_value(
    text: &str,
    line: usize,
    key: &str,
    depth_left: usize,
) -> Result<ConfigValue, ConfigValueError> {
    let text = text.trim();
    let first = match text.chars().next() {
        Some(c) => c,
        None => {
            return Err(ConfigValueError::EmptyValue {
                line,
                key: key.to_string(),
            })
        }
    };

    let bracket = match first {
        '[' => Some(Bracket::Square),
        '(' => Some(Bracket::Round),
        _ => None,
    };
    if let Some(bracket) = bracket {
        let (_, close) = bracket.delimiters();
        let unbalanced = || ConfigValueError::UnbalancedBrackets {
            line,
            key: key.to_string(),
        };
        if !text.ends_with(close) || text.len() < 2 {
            return Err(unbalanced());
        }
        if depth_left == 0 {
            return Err(ConfigValueError::NestedList {
                line,
                key: key.to_string(),
            });
        }
        let inner = &text[1..text.len() - 1];
        let pieces = split_top_level(inner).ok_or_else(unbalanced)?;
        let n_pieces = pieces.len();
        let mut items = Vec::with_capacity(n_pieces);
        for (idx, piece) in pieces.into_iter().enumerate() {
            if piece.trim().is_empty() {
                // "[]" and a trailing comma as in "(1,)" both leave one empty piece at the end
                if idx == n_pieces - 1 {
                    continue;
                }
                return Err(ConfigValueError::EmptyValue {
                    line,
                    key: key.to_string(),
                });
            }
            items.push(parse_value(piece, line, key, depth_left - 1)?);
        }
        return Ok(ConfigValue::List(bracket, items));
    }

    if first == '"' || first == '\'' {
        if text.len() < 2 || !text.ends_with(first) {
            return Err(ConfigValueError::UnterminatedString {
                line,
                key: key.to_string(),
            });
        }
        return Ok(ConfigValue::Str(text[1..text.len() - 1].to_string()));
    }

    Ok(match text {
        "True" | "true" => ConfigValue::Bool(true),
        "False" | "false" => ConfigValue::Bool(false),
        _ => {
            if let Ok(i) = text.parse::<i64>() {
                ConfigValue::Int(i)
            } else if let Ok(f) = text.parse::<f64>() {
                ConfigValue::Float(f)
            } else {
                ConfigValue::Word(text.to_string())
            }
        }
    })
}

/// Ordered map of configuration keys to values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigMap {
    entries: Vec<(String, ConfigValue)>,
    index: FxHashMap<String, usize>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a configuration file. Lists may hold scalars only
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::BadFilePath(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text)?)
    }

    /// Read a configuration file written by older versions, which may nest lists
    pub fn read_legacy(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::BadFilePath(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse_legacy(&text)?)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigValueError> {
        Self::parse_with_depth(text, 1)
    }

    pub fn parse_legacy(text: &str) -> Result<Self, ConfigValueError> {
        Self::parse_with_depth(text, usize::MAX)
    }

    fn parse_with_depth(text: &str, max_depth: usize) -> Result<Self, ConfigValueError> {
        let mut map = Self::new();
        let mut pending: Option<(usize, String)> = None;
        for (idx, raw) in text.lines().enumerate() {
            let stripped = strip_comment(raw).trim();
            let (start, logical) = match pending.take() {
                Some((start, mut acc)) => {
                    acc.push(' ');
                    acc.push_str(stripped);
                    (start, acc)
                }
                None if stripped.is_empty() => continue,
                None => (idx + 1, stripped.to_string()),
            };
            if bracket_depth(&logical) > 0 {
                pending = Some((start, logical));
                continue;
            }
            map.parse_assignment(start, &logical, max_depth)?;
        }
        if let Some((line, logical)) = pending {
            let key = match find_assignment(&logical) {
                Some(eq) => logical[..eq].trim().to_string(),
                None => logical,
            };
            return Err(ConfigValueError::UnbalancedBrackets { line, key });
        }
        Ok(map)
    }

    fn parse_assignment(
        &mut self,
        line: usize,
        text: &str,
        max_depth: usize,
    ) -> Result<(), ConfigValueError> {
        let missing = || ConfigValueError::MissingAssignment {
            line,
            text: text.to_string(),
        };
        let eq = find_assignment(text).ok_or_else(missing)?;
        let key = text[..eq].trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(missing());
        }
        let value = parse_value(&text[eq + 1..], line, key, max_depth)?;
        if self.contains_key(key) {
            return Err(ConfigValueError::DuplicateKey {
                line,
                key: key.to_string(),
            });
        }
        self.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.index.get(key).map(|idx| &self.entries[*idx].1)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace a value. New keys are appended
    pub fn insert(&mut self, key: &str, value: ConfigValue) -> Option<ConfigValue> {
        match self.index.get(key) {
            Some(idx) => Some(std::mem::replace(&mut self.entries[*idx].1, value)),
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        let idx = self.index.remove(key)?;
        let (_, value) = self.entries.remove(idx);
        for position in self.index.values_mut() {
            if *position > idx {
                *position -= 1;
            }
        }
        Some(value)
    }

    /// Move the value of `old` to `new`, replacing any value already under `new`
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        match self.remove(old) {
            Some(value) => {
                self.remove(new);
                self.insert(new, value);
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_yaml_value(&self) -> Value {
        let mut mapping = Mapping::new();
        for (key, value) in self.iter() {
            mapping.insert(Value::String(key.to_string()), value.to_yaml());
        }
        Value::Mapping(mapping)
    }

    /// Build a map from a YAML mapping. Null values are treated as absent keys
    pub fn from_yaml_value(value: &Value) -> Result<Self, ConfigValueError> {
        let mapping = match value {
            Value::Mapping(m) => m,
            _ => {
                return Err(ConfigValueError::WrongType {
                    key: String::from("<root>"),
                    expected: "a mapping",
                })
            }
        };
        let mut map = Self::new();
        for (key, value) in mapping {
            let key = match key.as_str() {
                Some(k) => k,
                None => {
                    return Err(ConfigValueError::WrongType {
                        key: format!("{key:?}"),
                        expected: "a string key",
                    })
                }
            };
            if let Some(converted) = ConfigValue::from_yaml(key, value)? {
                map.insert(key, converted);
            }
        }
        Ok(map)
    }

    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_string())?;
        Ok(())
    }
}

impl Display for ConfigMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in self.iter() {
            writeln!(f, "{key} = {value}")?;
        }
        Ok(())
    }
}
