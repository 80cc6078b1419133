//! Boolean predicates over named facts
//!
//! Used by accumulation qualifiers such as `@CalledMethodsPredicate("a && (b || c)")`.
//! Grammar, lowest precedence first:
//!
//! ```text
//! or    := and ('||' and)*
//! and   := unary ('&&' unary)*
//! unary := '!' unary | '(' or ')' | IDENT
//! ```

use crate::error::{QualflowError, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Deepest nesting of `!` and parentheses accepted by [`Predicate::parse`]
pub const MAX_NESTING: usize = 128;

/// Longest predicate, in tokens, accepted by [`Predicate::parse`]
pub const MAX_TOKENS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Predicate {
    Fact(String),
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let err = |message: String| QualflowError::PredicateParse {
        predicate: input.to_string(),
        message,
    };
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '&' | '|' => {
                chars.next();
                match chars.next() {
                    Some((_, next)) if next == c => {
                        tokens.push(if c == '&' { Token::And } else { Token::Or });
                    }
                    _ => return Err(err(format!("expected `{c}{c}` at offset {pos}"))),
                }
            }
            c if is_ident_start(c) => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !is_ident_part(c) {
                        break;
                    }
                    ident.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(err(format!("unexpected character `{other}` at offset {pos}"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> QualflowError {
        QualflowError::PredicateParse {
            predicate: self.source.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Predicate::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Predicate::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Predicate> {
        match self.bump() {
            Some(Token::Not) => {
                let inner = self.nested(Self::parse_unary)?;
                Ok(Predicate::Not(Box::new(inner)))
            }
            Some(Token::LParen) => {
                let inner = self.nested(Self::parse_or)?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("unbalanced parentheses")),
                }
            }
            Some(Token::Ident(name)) => Ok(Predicate::Fact(name)),
            Some(other) => Err(self.error(format!("unexpected token {other:?}"))),
            None => Err(self.error("unexpected end of predicate")),
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Predicate>) -> Result<Predicate> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {MAX_NESTING}")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }
}

impl Predicate {
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.len() > MAX_TOKENS {
            return Err(QualflowError::PredicateParse {
                predicate: input.to_string(),
                message: format!("longer than {MAX_TOKENS} tokens"),
            });
        }
        let mut parser = Parser {
            source: input,
            tokens,
            pos: 0,
            depth: 0,
        };
        let predicate = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error(format!("trailing input after token {}", parser.pos)));
        }
        Ok(predicate)
    }

    pub fn fact(name: impl Into<String>) -> Self {
        Predicate::Fact(name.into())
    }

    /// Conjunction of every fact in `names`; `None` when empty
    pub fn all_of<I, S>(names: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .map(Predicate::fact)
            .reduce(|a, b| Predicate::And(Box::new(a), Box::new(b)))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn evaluate<S: AsRef<str>>(&self, facts: &BTreeSet<S>) -> bool
    where
        S: Ord,
    {
        self.eval_with(&|name| facts.iter().any(|f| f.as_ref() == name))
    }

    fn eval_with(&self, holds: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Predicate::Fact(name) => holds(name),
            Predicate::Not(inner) => !inner.eval_with(holds),
            Predicate::And(a, b) => a.eval_with(holds) && b.eval_with(holds),
            Predicate::Or(a, b) => a.eval_with(holds) || b.eval_with(holds),
        }
    }

    /// Every fact named anywhere in the predicate
    pub fn facts(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_facts(&mut out);
        out
    }

    fn collect_facts(&self, out: &mut BTreeSet<String>) {
        match self {
            Predicate::Fact(name) => {
                out.insert(name.clone());
            }
            Predicate::Not(inner) => inner.collect_facts(out),
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.collect_facts(out);
                b.collect_facts(out);
            }
        }
    }

    /// Whether every assignment satisfying `self` also satisfies `other`, decided by
    /// truth table over the facts either side mentions.
    pub fn implies(&self, other: &Predicate) -> bool {
        let mut names: Vec<String> = self.facts().into_iter().collect();
        for f in other.facts() {
            if !names.contains(&f) {
                names.push(f);
            }
        }
        // Predicates from annotations name a handful of methods; cap the table anyway
        if names.len() > 16 {
            return self == other;
        }
        (0u32..(1u32 << names.len())).all(|mask| {
            let holds = |name: &str| {
                names
                    .iter()
                    .position(|n| n == name)
                    .is_some_and(|i| mask & (1 << i) != 0)
            };
            !self.eval_with(&holds) || other.eval_with(&holds)
        })
    }

    fn precedence(&self) -> u8 {
        match self {
            Predicate::Or(..) => 0,
            Predicate::And(..) => 1,
            Predicate::Not(_) | Predicate::Fact(_) => 2,
        }
    }

    fn fmt_child(&self, child: &Predicate, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if child.precedence() < self.precedence() {
            write!(f, "({child})")
        } else {
            write!(f, "{child}")
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Fact(name) => write!(f, "{name}"),
            Predicate::Not(inner) => {
                write!(f, "!")?;
                self.fmt_child(inner, f)
            }
            Predicate::And(a, b) => {
                self.fmt_child(a, f)?;
                write!(f, " && ")?;
                self.fmt_child(b, f)
            }
            Predicate::Or(a, b) => {
                self.fmt_child(a, f)?;
                write!(f, " || ")?;
                self.fmt_child(b, f)
            }
        }
    }
}
