//! Statement parser front end.
//!
//! The compiler only needs something that turns statement text into AST
//! nodes, see [`PolicyParser`]. [`StatementParser`] is a small tokenizer
//! plus recursive-descent parser for the statement language:
//!
//! ```text
//! statement = 'accept' | 'reject' | 'next' ('term' | 'policy')
//!           | 'protocol' ['=' | '=='] name
//!           | ident ('=' | '+=' | '-=' | '*=') expr
//!           | expr
//! expr      = xor ( 'or' xor )*
//! xor       = and ( 'xor' and )*
//! and       = not ( 'and' not )*
//! not       = 'not' not | cmp
//! cmp       = sum [ ('==' | '!=' | '<' | '>' | '<=' | '>=') sum | 'matches' string ]
//! sum       = product ( ('+' | '-') product )*
//! product   = atom ( '*' atom )*
//! atom      = '(' expr ')' | literal | 'SET' ident | 'policy' ident | ident
//! ```
//!
//! Statements are separated by `;`.

use std::net::IpAddr;

use tracing::{Level, instrument};

use crate::ast::{FlowTarget, Node, NodeKind};
use crate::error::PolicyError;
use crate::operators::Op;
use crate::types::{Prefix, Value};

pub trait PolicyParser {
    fn parse(&self, text: &str) -> Result<Vec<Node>, PolicyError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatementParser;

impl PolicyParser for StatementParser {
    #[instrument(level = Level::TRACE, skip(self))]
    fn parse(&self, text: &str) -> Result<Vec<Node>, PolicyError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let mut nodes = Vec::new();
        while !parser.at_end() {
            if parser.eat(&Tok::Semi) {
                continue;
            }
            nodes.push(parser.statement()?);
            if !parser.at_end() && !parser.eat(&Tok::Semi) {
                return Err(parser.error("expected ';'"));
            }
        }
        Ok(nodes)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Str(String),
    Sym(&'static str),
    Semi,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: u32,
}

const SYMBOLS: [&str; 14] = [
    "==", "!=", "<=", ">=", "+=", "-=", "*=", "<", ">", "=", "+", "-", "*", "(",
];

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/')
}

fn tokenize(text: &str) -> Result<Vec<Token>, PolicyError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            ';' => {
                tokens.push(Token { tok: Tok::Semi, line });
                i += 1;
            }
            ')' => {
                tokens.push(Token {
                    tok: Tok::Sym(")"),
                    line,
                });
                i += 1;
            }
            '"' => {
                let start_line = line;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(PolicyError::ParseError {
                                line: start_line,
                                message: "unterminated string".to_string(),
                            });
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') if i + 1 < chars.len() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) => {
                            if ch == '\n' {
                                line += 1;
                            }
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token {
                    tok: Tok::Str(s),
                    line: start_line,
                });
            }
            '-' if chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                let start = i;
                i += 1;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Word(chars[start..i].iter().collect()),
                    line,
                });
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Word(chars[start..i].iter().collect()),
                    line,
                });
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let Some(sym) = SYMBOLS.iter().copied().find(|s| rest.starts_with(*s)) else {
                    return Err(PolicyError::ParseError {
                        line,
                        message: format!("unexpected character {c:?}"),
                    });
                };
                tokens.push(Token {
                    tok: Tok::Sym(sym),
                    line,
                });
                i += sym.len();
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Word(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> PolicyError {
        let found = match self.peek() {
            Some(Tok::Word(w)) => format!(" near {w:?}"),
            Some(Tok::Str(s)) => format!(" near \"{s}\""),
            Some(Tok::Sym(s)) => format!(" near {s:?}"),
            Some(Tok::Semi) => " near ';'".to_string(),
            None => " at end of input".to_string(),
        };
        PolicyError::ParseError {
            line: self.line(),
            message: format!("{}{found}", message.into()),
        }
    }

    fn name(&mut self) -> Result<String, PolicyError> {
        match self.peek().cloned() {
            Some(Tok::Word(w)) | Some(Tok::Str(w)) => {
                self.pos += 1;
                Ok(w)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn statement(&mut self) -> Result<Node, PolicyError> {
        let line = self.line();
        if self.eat_word("accept") {
            return Ok(Node::new(line, NodeKind::Accept));
        }
        if self.eat_word("reject") {
            return Ok(Node::new(line, NodeKind::Reject));
        }
        if self.eat_word("next") {
            let target = if self.eat_word("term") {
                FlowTarget::Term
            } else if self.eat_word("policy") {
                FlowTarget::Policy
            } else {
                return Err(self.error("expected 'term' or 'policy'"));
            };
            return Ok(Node::new(line, NodeKind::Next(target)));
        }
        if self.eat_word("protocol") {
            if !self.eat(&Tok::Sym("==")) {
                self.eat(&Tok::Sym("="));
            }
            return Ok(Node::protocol(line, self.name()?));
        }

        // assignment lookahead: ident followed by an assignment operator
        if let (Some(Tok::Word(var)), Some(Tok::Sym(sym))) = (
            self.peek().cloned(),
            self.tokens.get(self.pos + 1).map(|t| t.tok.clone()),
        ) {
            let modifier = match sym {
                "=" => Some(None),
                "+=" => Some(Some(Op::Add)),
                "-=" => Some(Some(Op::Sub)),
                "*=" => Some(Some(Op::Mul)),
                _ => None,
            };
            if let Some(modifier) = modifier {
                self.pos += 2;
                let rvalue = self.expr()?;
                return Ok(Node::assign(line, var, modifier, rvalue));
            }
        }
        self.expr()
    }

    fn expr(&mut self) -> Result<Node, PolicyError> {
        self.binary_chain(Self::xor_expr, &[("or", Op::Or)])
    }

    fn xor_expr(&mut self) -> Result<Node, PolicyError> {
        self.binary_chain(Self::and_expr, &[("xor", Op::Xor)])
    }

    fn and_expr(&mut self) -> Result<Node, PolicyError> {
        self.binary_chain(Self::not_expr, &[("and", Op::And)])
    }

    fn not_expr(&mut self) -> Result<Node, PolicyError> {
        let line = self.line();
        if self.eat_word("not") {
            let child = self.not_expr()?;
            return Ok(Node::unary(line, Op::Not, child));
        }
        self.cmp_expr()
    }

    fn cmp_expr(&mut self) -> Result<Node, PolicyError> {
        let left = self.sum()?;
        let line = self.line();
        if self.eat_word("matches") {
            return match self.peek().cloned() {
                Some(Tok::Str(pattern)) => {
                    self.pos += 1;
                    Ok(Node::regex(line, pattern, left))
                }
                _ => Err(self.error("expected a quoted pattern after 'matches'")),
            };
        }
        let op = match self.peek() {
            Some(Tok::Sym("==")) => Op::Eq,
            Some(Tok::Sym("!=")) => Op::Ne,
            Some(Tok::Sym("<")) => Op::Lt,
            Some(Tok::Sym(">")) => Op::Gt,
            Some(Tok::Sym("<=")) => Op::Le,
            Some(Tok::Sym(">=")) => Op::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.sum()?;
        Ok(Node::binary(line, op, left, right))
    }

    fn sum(&mut self) -> Result<Node, PolicyError> {
        let mut left = self.product()?;
        loop {
            let line = self.line();
            let op = if self.eat(&Tok::Sym("+")) {
                Op::Add
            } else if self.eat(&Tok::Sym("-")) {
                Op::Sub
            } else {
                return Ok(left);
            };
            let right = self.product()?;
            left = Node::binary(line, op, left, right);
        }
    }

    fn product(&mut self) -> Result<Node, PolicyError> {
        let mut left = self.atom()?;
        loop {
            let line = self.line();
            if !self.eat(&Tok::Sym("*")) {
                return Ok(left);
            }
            let right = self.atom()?;
            left = Node::binary(line, Op::Mul, left, right);
        }
    }

    fn binary_chain(
        &mut self,
        next: fn(&mut Self) -> Result<Node, PolicyError>,
        ops: &[(&str, Op)],
    ) -> Result<Node, PolicyError> {
        let mut left = next(self)?;
        'outer: loop {
            let line = self.line();
            for (word, op) in ops {
                if self.eat_word(word) {
                    let right = next(self)?;
                    left = Node::binary(line, *op, left, right);
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn atom(&mut self) -> Result<Node, PolicyError> {
        let line = self.line();
        match self.peek().cloned() {
            Some(Tok::Sym("(")) => {
                self.pos += 1;
                let inner = self.expr()?;
                if !self.eat(&Tok::Sym(")")) {
                    return Err(self.error("expected ')'"));
                }
                Ok(inner)
            }
            Some(Tok::Str(s)) => {
                self.pos += 1;
                Ok(Node::literal(line, Value::Str(s)))
            }
            Some(Tok::Word(w)) => {
                self.pos += 1;
                match w.as_str() {
                    "SET" => Ok(Node::set(line, self.name()?)),
                    "policy" => Ok(Node::subroutine(line, self.name()?)),
                    "true" => Ok(Node::literal(line, Value::Bool(true))),
                    "false" => Ok(Node::literal(line, Value::Bool(false))),
                    "accept" | "reject" | "next" | "protocol" | "not" | "and" | "or" | "xor"
                    | "matches" => {
                        self.pos -= 1;
                        Err(self.error("unexpected keyword"))
                    }
                    _ => match literal(&w) {
                        Some(value) => Ok(Node::literal(line, value)),
                        None if w.starts_with(|c: char| c.is_ascii_digit() || c == '-') => {
                            self.pos -= 1;
                            Err(self.error("malformed literal"))
                        }
                        None => Ok(Node::var(line, w)),
                    },
                }
            }
            _ => Err(self.error("expected an expression")),
        }
    }
}

/// Classify a bare word as a numeric or address literal.
fn literal(word: &str) -> Option<Value> {
    if let Ok(n) = word.parse::<u32>() {
        return Some(Value::U32(n));
    }
    if word.starts_with('-') {
        return word.parse::<i32>().ok().map(Value::I32);
    }
    if word.contains('/') {
        let prefix: Prefix = word.parse().ok()?;
        return Some(if prefix.is_ipv4() {
            Value::Ipv4Net(prefix)
        } else {
            Value::Ipv6Net(prefix)
        });
    }
    match word.parse::<IpAddr>().ok()? {
        IpAddr::V4(a) => Some(Value::Ipv4(a)),
        IpAddr::V6(a) => Some(Value::Ipv6(a)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn parse_one(text: &str) -> Node {
        let mut nodes = StatementParser.parse(text).unwrap();
        assert_eq!(nodes.len(), 1, "{text}");
        nodes.remove(0)
    }

    #[test]
    fn test_precedence() {
        let node = parse_one("med < 10 and not tag == 5 or accepted");
        let NodeKind::Binary { op, left, .. } = node.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, Op::Or);
        assert!(matches!(left.kind, NodeKind::Binary { op: Op::And, .. }));
    }

    #[test]
    fn test_arithmetic_is_left_associative() {
        let node = parse_one("med - 1 - 2");
        let NodeKind::Binary { op, left, right } = node.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, Op::Sub);
        assert!(matches!(left.kind, NodeKind::Binary { op: Op::Sub, .. }));
        assert_eq!(right.kind, NodeKind::Literal(Value::U32(2)));
    }

    #[parameterized(
        u32_lit = { "42", Value::U32(42) },
        i32_lit = { "-7", Value::I32(-7) },
        txt = { "\"a \\\"b\\\"\"", Value::Str("a \"b\"".into()) },
        v4 = { "192.0.2.1", Value::Ipv4("192.0.2.1".parse().unwrap()) },
        v4net = { "10.0.0.0/8", Value::Ipv4Net("10.0.0.0/8".parse().unwrap()) },
        v6net = { "2001:db8::/32", Value::Ipv6Net("2001:db8::/32".parse().unwrap()) },
        boolean = { "true", Value::Bool(true) },
    )]
    fn test_literals(text: &str, expected: Value) {
        assert_eq!(parse_one(text).kind, NodeKind::Literal(expected));
    }

    #[test]
    fn test_statement_forms() {
        let nodes = StatementParser
            .parse(
                "protocol bgp;\nnetwork4 <= SET nets;\nmed += 5;\nas-path matches \"^65\";\n\
                 policy common;\nnext policy;\naccept;",
            )
            .unwrap();
        assert_eq!(nodes.len(), 7);
        assert_eq!(nodes[0].kind, NodeKind::ProtocolMatch("bgp".into()));
        assert!(matches!(&nodes[1].kind, NodeKind::Binary { op: Op::Le, right, .. }
            if right.kind == NodeKind::SetRef("nets".into())));
        assert!(matches!(&nodes[2].kind, NodeKind::Assign { var, modifier: Some(Op::Add), .. }
            if var == "med"));
        assert_eq!(nodes[2].line, 3);
        assert!(matches!(&nodes[3].kind, NodeKind::Regex { pattern, .. } if pattern == "^65"));
        assert_eq!(nodes[4].kind, NodeKind::Subroutine("common".into()));
        assert_eq!(nodes[5].kind, NodeKind::Next(FlowTarget::Policy));
        assert_eq!(nodes[6].kind, NodeKind::Accept);
    }

    #[test]
    fn test_protocol_assignment_spelling() {
        assert_eq!(
            parse_one("protocol = \"rip\"").kind,
            NodeKind::ProtocolMatch("rip".into())
        );
    }

    #[parameterized(
        unterminated = { "as-path == \"abc" },
        missing_semicolon = { "accept reject" },
        dangling_operator = { "med ==" },
        bad_next = { "next hop" },
        unbalanced = { "(med == 1" },
        bad_literal = { "10.0.0.300" },
        stray_char = { "med == 1 $" },
    )]
    fn test_parse_errors(text: &str) {
        let err = StatementParser.parse(text).unwrap_err();
        assert!(matches!(err, PolicyError::ParseError { .. }), "{err:?}");
    }

    #[test]
    fn test_error_line() {
        let err = StatementParser.parse("accept;\n\nmed == ;").unwrap_err();
        assert_eq!(err.line(), Some(3));
    }
}
