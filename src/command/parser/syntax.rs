use crate::command::parser::lexer::{Token, tokenize};
use crate::command::types::AstNode;
use crate::engine::array::attribute::AttributeDesc;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::dimension::DimensionDesc;
use crate::engine::errors::PlanError;

/// Parses one statement of the array language: a nested operator call
/// such as `store(filter(scan(A), v > 5), B)`.
pub fn parse_statement(input: &str) -> Result<AstNode, PlanError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, at: 0 };
    let node = parser.parse_call()?;
    if !parser.at_end() {
        return Err(PlanError::Syntax(format!(
            "trailing input after statement: {:?}",
            parser.peek()
        )));
    }
    Ok(node)
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.at >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn next(&mut self) -> Result<Token, PlanError> {
        let tok = self
            .tokens
            .get(self.at)
            .cloned()
            .ok_or_else(|| PlanError::Syntax("unexpected end of input".to_string()))?;
        self.at += 1;
        Ok(tok)
    }

    fn expect_symbol(&mut self, c: char) -> Result<(), PlanError> {
        match self.next()? {
            Token::Symbol(s) if s == c => Ok(()),
            other => Err(PlanError::Syntax(format!("expected '{c}', got {other:?}"))),
        }
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == c) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn parse_call(&mut self) -> Result<AstNode, PlanError> {
        let name = match self.next()? {
            Token::Ident(name) => name,
            other => {
                return Err(PlanError::Syntax(format!(
                    "expected operator name, got {other:?}"
                )));
            }
        };
        self.expect_symbol('(')?;
        let mut args = Vec::new();
        if !self.eat_symbol(')') {
            loop {
                args.push(self.parse_arg()?);
                if self.eat_symbol(')') {
                    break;
                }
                self.expect_symbol(',')?;
            }
        }
        Ok(AstNode::call(name, args))
    }

    fn parse_arg(&mut self) -> Result<AstNode, PlanError> {
        // a schema literal can only start an argument
        if matches!(self.peek(), Some(Token::Symbol('<'))) {
            return self.parse_schema();
        }
        // a lone star is the asterisk argument, not multiplication
        if matches!(self.peek(), Some(Token::Symbol('*')))
            && matches!(
                self.tokens.get(self.at + 1),
                Some(Token::Symbol(',')) | Some(Token::Symbol(')'))
            )
        {
            self.at += 1;
            return Ok(AstNode::Star);
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<AstNode, PlanError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Ident(w)) if w == "or") {
            self.at += 1;
            let right = self.parse_and()?;
            left = AstNode::BinaryOp {
                op: "or".to_string(),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<AstNode, PlanError> {
        let mut left = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::Ident(w)) if w == "and") {
            self.at += 1;
            let right = self.parse_comparison()?;
            left = AstNode::BinaryOp {
                op: "and".to_string(),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<AstNode, PlanError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Symbol(c)) if matches!(c, '<' | '>' | '=') => Some(c.to_string()),
            Some(Token::Op(op)) => Some(op.clone()),
            _ => None,
        };
        match op {
            None => Ok(left),
            Some(op) => {
                self.at += 1;
                let right = self.parse_additive()?;
                Ok(AstNode::BinaryOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
        }
    }

    fn parse_additive(&mut self) -> Result<AstNode, PlanError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Symbol('+')) => "+",
                Some(Token::Symbol('-')) => "-",
                _ => break,
            };
            self.at += 1;
            let right = self.parse_multiplicative()?;
            left = AstNode::BinaryOp {
                op: op.to_string(),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<AstNode, PlanError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Symbol('*')) => "*",
                Some(Token::Symbol('/')) => "/",
                _ => break,
            };
            self.at += 1;
            let right = self.parse_unary()?;
            left = AstNode::BinaryOp {
                op: op.to_string(),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<AstNode, PlanError> {
        if self.eat_symbol('-') {
            let inner = self.parse_unary()?;
            return Ok(match inner {
                AstNode::Integer(v) => AstNode::Integer(-v),
                AstNode::Float(v) => AstNode::Float(-v),
                other => AstNode::BinaryOp {
                    op: "-".to_string(),
                    left: Box::new(AstNode::Integer(0)),
                    right: Box::new(other),
                },
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<AstNode, PlanError> {
        match self.next()? {
            Token::Integer(v) => Ok(AstNode::Integer(v)),
            Token::Float(v) => Ok(AstNode::Float(v)),
            Token::Text(s) => Ok(AstNode::Text(s)),
            Token::Symbol('(') => {
                let inner = self.parse_or()?;
                self.expect_symbol(')')?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if matches!(self.peek(), Some(Token::Symbol('('))) {
                    self.at -= 1;
                    self.parse_call()
                } else {
                    Ok(AstNode::Identifier(name))
                }
            }
            other => Err(PlanError::Syntax(format!("unexpected token {other:?}"))),
        }
    }

    /// `<v:int32, w:double null>[i=0:99,10,0, j=-5:5,11,0]`
    fn parse_schema(&mut self) -> Result<AstNode, PlanError> {
        self.expect_symbol('<')?;
        let mut attributes = Vec::new();
        loop {
            let name = match self.next()? {
                Token::Ident(n) => n,
                other => {
                    return Err(PlanError::Syntax(format!(
                        "expected attribute name, got {other:?}"
                    )));
                }
            };
            self.expect_symbol(':')?;
            let type_id = match self.next()? {
                Token::Ident(t) => t,
                other => {
                    return Err(PlanError::Syntax(format!(
                        "expected type name, got {other:?}"
                    )));
                }
            };
            let mut attr = AttributeDesc::new(attributes.len() as u32, name, type_id);
            if matches!(self.peek(), Some(Token::Ident(w)) if w == "null") {
                self.at += 1;
                attr = attr.nullable(true);
            }
            attributes.push(attr);
            if self.eat_symbol(',') {
                continue;
            }
            match self.next()? {
                Token::Symbol('>') => break,
                Token::Op(op) if op == ">=" => {
                    // ">" immediately followed by "=" cannot occur in a
                    // schema; reject it clearly
                    return Err(PlanError::Syntax("malformed schema".to_string()));
                }
                other => {
                    return Err(PlanError::Syntax(format!(
                        "expected '>' after attributes, got {other:?}"
                    )));
                }
            }
        }
        self.expect_symbol('[')?;
        let mut dimensions = Vec::new();
        loop {
            let name = match self.next()? {
                Token::Ident(n) => n,
                other => {
                    return Err(PlanError::Syntax(format!(
                        "expected dimension name, got {other:?}"
                    )));
                }
            };
            self.expect_symbol('=')?;
            let start = self.parse_coordinate()?;
            self.expect_symbol(':')?;
            let end = self.parse_coordinate()?;
            self.expect_symbol(',')?;
            let interval = self.parse_coordinate()?;
            self.expect_symbol(',')?;
            let overlap = self.parse_coordinate()?;
            dimensions.push(DimensionDesc::new(name, start, end, interval, overlap));
            if self.eat_symbol(',') {
                continue;
            }
            self.expect_symbol(']')?;
            break;
        }
        Ok(AstNode::Schema(ArrayDesc::new("", attributes, dimensions)))
    }

    fn parse_coordinate(&mut self) -> Result<i64, PlanError> {
        let negative = self.eat_symbol('-');
        match self.next()? {
            Token::Integer(v) => Ok(if negative { -v } else { v }),
            other => Err(PlanError::Syntax(format!(
                "expected coordinate, got {other:?}"
            ))),
        }
    }
}
