//! Parser, printer and expander for the algorithm sequence language.
//!
//! A sequence is written as a sum of terms, where each term is an optionally repeated
//! algorithm or parenthesized sub-sequence:
//!
//! ```text
//! sequence   := term ('+' term)*
//! term       := (integer '*')? atom
//! atom       := ALGONAME | '(' sequence ')'
//! ```
//!
//! A multiplier binds to exactly one atom, so `3*ER+HIO` runs three ER iterations followed
//! by a single HIO iteration. Whitespace is ignored everywhere.
use std::fmt::Display;
use std::str::FromStr;

use super::algorithm::AlgorithmToken;
use super::constants::MAX_ITERATIONS;
use super::error::SequenceError;

/// A node of a parsed algorithm sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceNode {
    Leaf(AlgorithmToken),
    Repeat {
        count: usize,
        body: Vec<SequenceNode>,
    },
    Concat(Vec<SequenceNode>),
}

impl SequenceNode {
    /// Number of iterations this node expands to, at most [`MAX_ITERATIONS`]
    pub fn total_iterations(&self) -> Result<usize, SequenceError> {
        let total = self.count_iterations()?;
        if total > MAX_ITERATIONS {
            return Err(SequenceError::IterationLimit {
                total,
                limit: MAX_ITERATIONS,
            });
        }
        Ok(total)
    }

    fn count_iterations(&self) -> Result<usize, SequenceError> {
        match self {
            Self::Leaf(_) => Ok(1),
            Self::Repeat { count, body } => {
                let inner = sum_iterations(body)?;
                inner
                    .checked_mul(*count)
                    .ok_or(SequenceError::TooManyIterations)
            }
            Self::Concat(children) => sum_iterations(children),
        }
    }

    /// Flatten the tree into one algorithm per iteration, in left-to-right depth-first order
    pub fn expand(&self) -> Result<Vec<AlgorithmToken>, SequenceError> {
        let mut flat = Vec::with_capacity(self.total_iterations()?);
        self.expand_into(&mut flat);
        Ok(flat)
    }

    fn expand_into(&self, flat: &mut Vec<AlgorithmToken>) {
        match self {
            Self::Leaf(token) => flat.push(*token),
            Self::Repeat { count, body } => {
                for _ in 0..*count {
                    for node in body {
                        node.expand_into(flat);
                    }
                }
            }
            Self::Concat(children) => {
                for node in children {
                    node.expand_into(flat);
                }
            }
        }
    }

    /// True if any leaf uses a partial coherence modulus
    pub fn contains_partial_coherence(&self) -> bool {
        match self {
            Self::Leaf(token) => token.is_partial_coherence(),
            Self::Repeat { body, .. } => body.iter().any(|n| n.contains_partial_coherence()),
            Self::Concat(children) => children.iter().any(|n| n.contains_partial_coherence()),
        }
    }

    /// Index of the first iteration running a partial coherence algorithm
    pub fn first_partial_coherence(&self) -> Result<Option<usize>, SequenceError> {
        match self {
            Self::Leaf(token) => Ok(token.is_partial_coherence().then_some(0)),
            // The first repetition of a body is where its first pc iteration lies
            Self::Repeat { body, .. } | Self::Concat(body) => {
                let mut offset = 0usize;
                for node in body {
                    if let Some(idx) = node.first_partial_coherence()? {
                        return offset
                            .checked_add(idx)
                            .map(Some)
                            .ok_or(SequenceError::TooManyIterations);
                    }
                    offset = offset
                        .checked_add(node.count_iterations()?)
                        .ok_or(SequenceError::TooManyIterations)?;
                }
                Ok(None)
            }
        }
    }

    fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }
}

fn sum_iterations(nodes: &[SequenceNode]) -> Result<usize, SequenceError> {
    nodes.iter().try_fold(0usize, |acc, node| {
        acc.checked_add(node.count_iterations()?)
            .ok_or(SequenceError::TooManyIterations)
    })
}

fn write_joined(f: &mut std::fmt::Formatter<'_>, nodes: &[SequenceNode]) -> std::fmt::Result {
    for (idx, node) in nodes.iter().enumerate() {
        if idx > 0 {
            write!(f, "+")?;
        }
        // A concat inside a concat only survives a reparse with its own parentheses
        match node {
            SequenceNode::Concat(_) => write!(f, "({node})")?,
            _ => write!(f, "{node}")?,
        }
    }
    Ok(())
}

impl Display for SequenceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(token) => write!(f, "{token}"),
            Self::Repeat { count, body } => {
                if body.len() == 1 && body[0].is_leaf() {
                    write!(f, "{count}*{}", body[0])
                } else if body.len() == 1 {
                    match &body[0] {
                        Self::Concat(children) => {
                            write!(f, "{count}*(")?;
                            write_joined(f, children)?;
                            write!(f, ")")
                        }
                        other => write!(f, "{count}*({other})"),
                    }
                } else {
                    write!(f, "{count}*(")?;
                    write_joined(f, body)?;
                    write!(f, ")")
                }
            }
            Self::Concat(children) => write_joined(f, children),
        }
    }
}

impl FromStr for SequenceNode {
    type Err = SequenceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_sequence(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Count(usize),
    Name(String),
    Plus,
    Star,
    Open,
    Close,
    End,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
    text: String,
}

fn tokenize(source: &str) -> Result<Vec<Token>, SequenceError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    while let Some((position, c)) = chars.next() {
        let kind = match c {
            c if c.is_whitespace() => continue,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '(' => TokenKind::Open,
            ')' => TokenKind::Close,
            c if c.is_ascii_digit() => {
                let mut end = position + c.len_utf8();
                while let Some((idx, d)) = chars.peek().copied() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = idx + d.len_utf8();
                    chars.next();
                }
                let text = &source[position..end];
                let count = text.parse().map_err(|_| SequenceError::CountOverflow {
                    position,
                    found: text.to_string(),
                })?;
                tokens.push(Token {
                    kind: TokenKind::Count(count),
                    position,
                    text: text.to_string(),
                });
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = position + c.len_utf8();
                while let Some((idx, d)) = chars.peek().copied() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    end = idx + d.len_utf8();
                    chars.next();
                }
                let text = &source[position..end];
                tokens.push(Token {
                    kind: TokenKind::Name(text.to_string()),
                    position,
                    text: text.to_string(),
                });
                continue;
            }
            other => {
                return Err(SequenceError::SyntaxError {
                    position,
                    found: other.to_string(),
                    reason: "unexpected character",
                })
            }
        };
        tokens.push(Token {
            kind,
            position,
            text: c.to_string(),
        });
    }
    tokens.push(Token {
        kind: TokenKind::End,
        position: source.len(),
        text: String::new(),
    });
    Ok(tokens)
}

/// Recursive descent parser over the token stream
struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with End and the parser never steps past it
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::End {
            self.cursor += 1;
        }
        token
    }

    fn syntax_error(token: &Token, reason: &'static str) -> SequenceError {
        SequenceError::SyntaxError {
            position: token.position,
            found: token.text.clone(),
            reason,
        }
    }

    fn sequence(&mut self) -> Result<SequenceNode, SequenceError> {
        let mut terms = vec![self.term()?];
        while self.peek().kind == TokenKind::Plus {
            self.advance();
            terms.push(self.term()?);
        }
        if terms.len() == 1 {
            Ok(terms.remove(0))
        } else {
            Ok(SequenceNode::Concat(terms))
        }
    }

    fn term(&mut self) -> Result<SequenceNode, SequenceError> {
        let next = self.peek().kind.clone();
        if let TokenKind::Count(count) = next {
            let count_token = self.advance();
            let star = self.advance();
            if star.kind != TokenKind::Star {
                return Err(Self::syntax_error(
                    &star,
                    "a repeat count must be followed by '*'",
                ));
            }
            if count == 0 {
                return Err(SequenceError::ZeroRepeat(count_token.position));
            }
            let atom = self.atom()?;
            return Ok(SequenceNode::Repeat {
                count,
                body: vec![atom],
            });
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<SequenceNode, SequenceError> {
        let token = self.advance();
        match &token.kind {
            TokenKind::Name(name) => {
                let leaf =
                    name.parse::<AlgorithmToken>()
                        .map_err(|_| SequenceError::UnknownAlgorithm {
                            position: token.position,
                            name: name.clone(),
                        })?;
                Ok(SequenceNode::Leaf(leaf))
            }
            TokenKind::Open => {
                let inner = self.sequence()?;
                let close = self.advance();
                match close.kind {
                    TokenKind::Close => Ok(inner),
                    TokenKind::End => Err(Self::syntax_error(&token, "unbalanced parenthesis")),
                    _ => Err(Self::syntax_error(&close, "expected '+' or ')'")),
                }
            }
            TokenKind::Count(_) => Err(Self::syntax_error(
                &token,
                "a repeat count must apply to an algorithm or a parenthesized group",
            )),
            TokenKind::End => Err(Self::syntax_error(
                &token,
                "expected an algorithm or '(' but the sequence ended",
            )),
            _ => Err(Self::syntax_error(&token, "expected an algorithm or '('")),
        }
    }
}

/// Parse an algorithm sequence expression into its tree
pub fn parse_sequence(source: &str) -> Result<SequenceNode, SequenceError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        cursor: 0,
    };
    let root = parser.sequence()?;
    let trailing = parser.advance();
    match trailing.kind {
        TokenKind::End => Ok(root),
        TokenKind::Close => Err(Parser::syntax_error(&trailing, "unbalanced parenthesis")),
        _ => Err(Parser::syntax_error(
            &trailing,
            "terms must be joined with '+'",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AlgorithmToken::{ER, ERpc, HIO, HIOpc};

    fn repeat(count: usize, node: SequenceNode) -> SequenceNode {
        SequenceNode::Repeat {
            count,
            body: vec![node],
        }
    }

    #[test]
    fn test_parse_nested_example() {
        let parsed = parse_sequence("3* (20*ER + 180*HIO) + 20*ER").unwrap();
        let expected = SequenceNode::Concat(vec![
            repeat(
                3,
                SequenceNode::Concat(vec![
                    repeat(20, SequenceNode::Leaf(ER)),
                    repeat(180, SequenceNode::Leaf(HIO)),
                ]),
            ),
            repeat(20, SequenceNode::Leaf(ER)),
        ]);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_expand_nested_example() {
        let parsed = parse_sequence("3* (20*ER + 180*HIO) + 20*ER").unwrap();
        assert_eq!(parsed.total_iterations().unwrap(), 620);
        let flat = parsed.expand().unwrap();
        assert_eq!(flat.len(), 620);
        for block in 0..3 {
            let start = block * 200;
            assert!(flat[start..start + 20].iter().all(|t| *t == ER));
            assert!(flat[start + 20..start + 200].iter().all(|t| *t == HIO));
        }
        assert!(flat[600..].iter().all(|t| *t == ER));
    }

    #[test]
    fn test_multiplier_binds_to_single_atom() {
        let parsed = parse_sequence("3*ER+HIO").unwrap();
        assert_eq!(parsed.expand().unwrap(), vec![ER, ER, ER, HIO]);
    }

    #[test]
    fn test_single_group_collapses() {
        assert_eq!(parse_sequence("(ER)").unwrap(), SequenceNode::Leaf(ER));
        assert_eq!(
            parse_sequence("2*((HIOpc))").unwrap(),
            repeat(2, SequenceNode::Leaf(HIOpc))
        );
    }

    #[test]
    fn test_round_trip() {
        let sources = [
            "3* (20*ER + 180*HIO) + 20*ER",
            "ER",
            "(ER+HIO)+ERpc",
            "2*(3*(ER+HIOpc)+ 4*ER)",
            "5*(2*ERpc)",
            "1*(20*ER+80*HIO)+20*ER",
        ];
        for source in sources {
            let parsed = parse_sequence(source).unwrap();
            let printed = parsed.to_string();
            let reparsed = parse_sequence(&printed).unwrap();
            assert_eq!(parsed, reparsed, "round trip of {source} via {printed}");
        }
        assert_eq!(
            parse_sequence("3* (20*ER + 180*HIO) + 20*ER")
                .unwrap()
                .to_string(),
            "3*(20*ER+180*HIO)+20*ER"
        );
    }

    #[test]
    fn test_unknown_token() {
        match parse_sequence("5*XYZ") {
            Err(SequenceError::UnknownAlgorithm { position, name }) => {
                assert_eq!(position, 2);
                assert_eq!(name, "XYZ");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(parse_sequence("20*er").is_err());
    }

    #[test]
    fn test_unbalanced_parentheses() {
        match parse_sequence("(3*ER") {
            Err(SequenceError::SyntaxError { position, .. }) => assert_eq!(position, 0),
            other => panic!("unexpected result {other:?}"),
        }
        match parse_sequence("3*ER)") {
            Err(SequenceError::SyntaxError { position, found, .. }) => {
                assert_eq!(position, 4);
                assert_eq!(found, ")");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_rejected_forms() {
        let bad = [
            "", "   ", "0*ER", "3*4*ER", "3 ER", "ER HIO", "ER+", "+ER", "3*", "3", "()",
            "ER*3", "2*(ER+)", "ER;HIO",
        ];
        for source in bad {
            assert!(parse_sequence(source).is_err(), "{source:?} should fail");
        }
        assert_eq!(parse_sequence("0*ER"), Err(SequenceError::ZeroRepeat(0)));
    }

    #[test]
    fn test_count_overflow() {
        assert!(matches!(
            parse_sequence("99999999999999999999999*ER"),
            Err(SequenceError::CountOverflow { .. })
        ));
        let huge = parse_sequence(&format!("{}*(2*ER)", usize::MAX)).unwrap();
        assert_eq!(
            huge.total_iterations(),
            Err(SequenceError::TooManyIterations)
        );
    }

    #[test]
    fn test_iteration_limit() {
        let long = parse_sequence("4000000000*ER").unwrap();
        assert_eq!(
            long.total_iterations(),
            Err(SequenceError::IterationLimit {
                total: 4_000_000_000,
                limit: MAX_ITERATIONS,
            })
        );
        assert!(long.expand().is_err());
        let at_limit = parse_sequence(&format!("{MAX_ITERATIONS}*ER")).unwrap();
        assert_eq!(at_limit.total_iterations(), Ok(MAX_ITERATIONS));
    }

    #[test]
    fn test_first_partial_coherence() {
        let first = |source: &str| parse_sequence(source).unwrap().first_partial_coherence();
        assert_eq!(first("20*ER+10*HIOpc"), Ok(Some(20)));
        assert_eq!(first("3*(20*ER+5*ERpc)+HIOpc"), Ok(Some(20)));
        assert_eq!(first("2*(3*ER)+(4*HIO+ERpc)"), Ok(Some(10)));
        assert_eq!(first("HIOpc"), Ok(Some(0)));
        assert_eq!(first("20*ER+80*HIO"), Ok(None));
        // Found without expanding the run
        assert_eq!(first("4000000000*ER+ERpc"), Ok(Some(4_000_000_000)));
    }

    #[test]
    fn test_contains_partial_coherence() {
        assert!(parse_sequence("10*ER+2*(5*HIOpc)")
            .unwrap()
            .contains_partial_coherence());
        assert!(!parse_sequence("10*ER+HIO").unwrap().contains_partial_coherence());
        assert_eq!(parse_sequence("ERpc").unwrap(), SequenceNode::Leaf(ERpc));
    }
}
