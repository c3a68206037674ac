// Rule predicates: compiled condition expressions over Context

use std::fmt;
use std::sync::Arc;

use crate::context::Context;

/// A rule guard evaluated against the context snapshot of a key press.
///
/// Either a compiled condition expression (`wm_class =~ 'firefox|chrome'`)
/// or a host-supplied callback. Evaluation is pure and infallible.
#[derive(Clone)]
pub enum Predicate {
    Expr(ConditionExpr),
    Func(Arc<dyn Fn(&Context) -> bool + Send + Sync>),
}

impl Predicate {
    /// Compile a condition string. Grammar:
    ///
    /// ```text
    /// expr     := or
    /// or       := and ("or" and)*
    /// and      := not ("and" not)*
    /// not      := "not" not | primary
    /// primary  := "(" expr ")" | field (("==" | "=~") value)?
    /// ```
    ///
    /// Fields: `wm_class`, `wm_name`, `device_name` (string-valued) and the
    /// bare booleans `capslock`, `numlock`. `==` compares case-insensitively,
    /// `=~` does case-insensitive substring matching over `|`-separated
    /// alternatives with optional `^...$` anchoring.
    pub fn parse(condition: &str) -> Result<Predicate, PredicateParseError> {
        let tokens = tokenize(condition)?;
        let expr = Parser::new(tokens).parse()?;
        Ok(Predicate::Expr(expr))
    }

    /// Wrap a host callback.
    pub fn func(f: impl Fn(&Context) -> bool + Send + Sync + 'static) -> Predicate {
        Predicate::Func(Arc::new(f))
    }

    pub fn matches(&self, ctx: &Context) -> bool {
        match self {
            Predicate::Expr(expr) => expr.eval(ctx),
            Predicate::Func(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            Predicate::Func(_) => f.write_str("Func(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredicateParseError {
    #[error("empty condition")]
    Empty,
    #[error("unterminated string literal in condition")]
    UnterminatedString,
    #[error("unexpected character '{0}' in condition")]
    UnexpectedChar(char),
    #[error("unknown condition field '{0}'")]
    UnknownField(String),
    #[error("malformed condition expression")]
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    WmClass,
    WmName,
    DeviceName,
    Capslock,
    Numlock,
}

impl Field {
    fn parse(name: &str) -> Result<Field, PredicateParseError> {
        match name.to_lowercase().as_str() {
            "wm_class" => Ok(Field::WmClass),
            "wm_name" => Ok(Field::WmName),
            "device_name" | "devn" => Ok(Field::DeviceName),
            "capslock" | "capslk" => Ok(Field::Capslock),
            "numlock" | "numlk" => Ok(Field::Numlock),
            other => Err(PredicateParseError::UnknownField(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Match,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    And(Box<ConditionExpr>, Box<ConditionExpr>),
    Or(Box<ConditionExpr>, Box<ConditionExpr>),
    Not(Box<ConditionExpr>),
    Compare {
        field: Field,
        op: Op,
        value: String,
    },
    Flag(Field),
}

impl ConditionExpr {
    fn eval(&self, ctx: &Context) -> bool {
        match self {
            ConditionExpr::And(l, r) => l.eval(ctx) && r.eval(ctx),
            ConditionExpr::Or(l, r) => l.eval(ctx) || r.eval(ctx),
            ConditionExpr::Not(inner) => !inner.eval(ctx),
            ConditionExpr::Flag(field) => match field {
                Field::Capslock => ctx.capslock_on,
                Field::Numlock => ctx.numlock_on,
                _ => false,
            },
            ConditionExpr::Compare { field, op, value } => {
                let actual = match field {
                    Field::WmClass => ctx.wm_class.as_str(),
                    Field::WmName => ctx.wm_name.as_str(),
                    Field::DeviceName => ctx.device_name.as_str(),
                    Field::Capslock => return flag_equals(ctx.capslock_on, value),
                    Field::Numlock => return flag_equals(ctx.numlock_on, value),
                };
                match op {
                    Op::Eq => actual.eq_ignore_ascii_case(value),
                    Op::Match => contains_pattern(actual, value),
                }
            }
        }
    }
}

fn flag_equals(actual: bool, expected: &str) -> bool {
    let expected_on = matches!(expected.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
    actual == expected_on
}

/// `|`-separated case-insensitive substring match with `^...$` anchoring.
fn contains_pattern(value: &str, pattern: &str) -> bool {
    let value_lower = value.to_lowercase();
    pattern.split('|').any(|raw| {
        let mut token = raw.trim().to_lowercase();
        if let Some(stripped) = token.strip_prefix("(?i)") {
            token = stripped.trim().to_string();
        }
        if token.is_empty() {
            return false;
        }
        if token.starts_with('^') && token.ends_with('$') && token.len() >= 2 {
            let exact = &token[1..token.len() - 1];
            return !exact.is_empty() && value_lower == exact;
        }
        let token = token.trim_start_matches('^').trim_end_matches('$');
        !token.is_empty() && value_lower.contains(token)
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Eq,
    Match,
    Ident(String),
    StringLit(String),
}

fn tokenize(condition: &str) -> Result<Vec<Token>, PredicateParseError> {
    let chars: Vec<char> = condition.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        match ch {
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            '=' => {
                match chars.get(i + 1).copied() {
                    Some('=') => out.push(Token::Eq),
                    Some('~') => out.push(Token::Match),
                    _ => return Err(PredicateParseError::UnexpectedChar('=')),
                }
                i += 2;
            }
            '\'' | '"' => {
                let quote = ch;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(PredicateParseError::UnterminatedString);
                }
                out.push(Token::StringLit(chars[start..i].iter().collect()));
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len() {
                    let c = chars[i];
                    if c.is_whitespace() || matches!(c, '(' | ')' | '=') {
                        break;
                    }
                    i += 1;
                }
                if start == i {
                    return Err(PredicateParseError::UnexpectedChar(ch));
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_lowercase().as_str() {
                    "and" => out.push(Token::And),
                    "or" => out.push(Token::Or),
                    "not" => out.push(Token::Not),
                    _ => out.push(Token::Ident(word)),
                }
            }
        }
    }

    if out.is_empty() {
        return Err(PredicateParseError::Empty);
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> Result<ConditionExpr, PredicateParseError> {
        let expr = self.parse_or()?;
        if self.peek().is_some() {
            return Err(PredicateParseError::Malformed);
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<ConditionExpr, PredicateParseError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = ConditionExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ConditionExpr, PredicateParseError> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.parse_not()?;
            left = ConditionExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<ConditionExpr, PredicateParseError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.next();
            let inner = self.parse_not()?;
            return Ok(ConditionExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ConditionExpr, PredicateParseError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.next();
                let expr = self.parse_or()?;
                if !matches!(self.next(), Some(Token::RParen)) {
                    return Err(PredicateParseError::Malformed);
                }
                Ok(expr)
            }
            Some(Token::Ident(_)) => self.parse_comparison(),
            _ => Err(PredicateParseError::Malformed),
        }
    }

    fn parse_comparison(&mut self) -> Result<ConditionExpr, PredicateParseError> {
        let field = match self.next() {
            Some(Token::Ident(name)) => Field::parse(&name)?,
            _ => return Err(PredicateParseError::Malformed),
        };

        let op = match self.peek() {
            Some(Token::Eq) => Op::Eq,
            Some(Token::Match) => Op::Match,
            _ => return Ok(ConditionExpr::Flag(field)),
        };
        self.next();

        let value = match self.next() {
            Some(Token::StringLit(s)) | Some(Token::Ident(s)) => s,
            _ => return Err(PredicateParseError::Malformed),
        };

        Ok(ConditionExpr::Compare { field, op, value })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}
