use crate::error::{CompileError, ErrorKind};
use crate::parsing::ast::*;
use crate::parsing::lexer::{Lexer, Token, TokenType};
use crate::source::{Pos, Source};

pub fn parse_module(source: &Source) -> Result<Vec<Stmt>, CompileError> {
    let mut parser = Parser::new(source);
    let mut stmts = Vec::new();
    while parser.curr().typ != TokenType::EOF {
        stmts.push(parser.parse_statement()?);
    }
    Ok(stmts)
}

type ParseResult<T> = Result<T, CompileError>;

struct Parser<'a> {
    tokens: Box<[Token<'a>]>,
    idx: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a Source) -> Parser<'a> {
        Parser { tokens: Lexer::lex(source), idx: 0 }
    }

    fn curr(&self) -> Token<'a> {
        self.tokens[self.idx]
    }

    fn peek(&self) -> Token<'a> {
        if self.idx + 1 >= self.tokens.len() {
            self.tokens[self.idx]
        } else {
            self.tokens[self.idx + 1]
        }
    }

    fn advance(&mut self) -> Token<'a> {
        let ret = self.curr();
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
        ret
    }

    fn matches(&mut self, typ: TokenType) -> bool {
        if self.curr().typ == typ {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, typ: TokenType) -> ParseResult<Token<'a>> {
        if self.curr().typ == typ {
            Ok(self.advance())
        } else {
            Err(self.unexpected(typ.name()))
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        CompileError::new(
            ErrorKind::Parse,
            format!("Unexpected token. Got {}, but expected {}.", self.curr().typ.name(), expected),
            self.curr().pos,
        )
    }

    fn pos(&self) -> Pos {
        self.curr().pos
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        match self.curr().typ {
            TokenType::Def => self.parse_function_def(),
            TokenType::If => self.parse_if(),
            TokenType::For => self.parse_for(),
            _ => self.parse_simple_statement(),
        }
    }

    fn parse_function_def(&mut self) -> ParseResult<Stmt> {
        let pos = self.pos();
        self.expect(TokenType::Def)?;
        let name = self.expect(TokenType::Identifier)?.text.to_owned();
        self.expect(TokenType::LeftParenthesis)?;

        let mut params = Vec::new();
        let mut vararg = None;
        let mut seen_default = false;
        while self.curr().typ != TokenType::RightParenthesis {
            if self.matches(TokenType::Star) {
                vararg = Some(self.expect(TokenType::Identifier)?.text.to_owned());
                break;
            }
            let param_pos = self.pos();
            let param_name = self.expect(TokenType::Identifier)?.text.to_owned();
            self.expect(TokenType::Colon)?;
            let annotation = self.parse_expr()?;
            let default = if self.matches(TokenType::Equal) {
                seen_default = true;
                Some(self.parse_expr()?)
            } else {
                if seen_default {
                    return Err(CompileError::new(
                        ErrorKind::Parse,
                        "A parameter without a default follows one with a default.",
                        param_pos,
                    ));
                }
                None
            };
            params.push(Param { name: param_name, annotation, default, pos: param_pos });
            if !self.matches(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RightParenthesis)?;

        let returns = if self.matches(TokenType::Arrow) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Stmt::FunctionDef { name, params, vararg, returns, body, pos })
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let pos = self.pos();
        self.advance();
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        let orelse = match self.curr().typ {
            TokenType::Elif => vec![self.parse_if_from_elif()?],
            TokenType::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt::If { test, body, orelse, pos })
    }

    fn parse_if_from_elif(&mut self) -> ParseResult<Stmt> {
        let pos = self.pos();
        self.expect(TokenType::Elif)?;
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        let orelse = match self.curr().typ {
            TokenType::Elif => vec![self.parse_if_from_elif()?],
            TokenType::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt::If { test, body, orelse, pos })
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let pos = self.pos();
        self.advance();
        let target_pos = self.pos();
        let mut targets = vec![self.parse_postfix()?];
        while self.matches(TokenType::Comma) {
            targets.push(self.parse_postfix()?);
        }
        let target = if targets.len() == 1 {
            targets.pop().unwrap()
        } else {
            Expr::TupleLit { elts: targets, pos: target_pos }
        };
        self.expect(TokenType::In)?;
        let iter = self.parse_expr_list()?;
        let body = self.parse_block()?;
        let orelse = if self.matches(TokenType::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::For { target, iter, body, orelse, pos })
    }

    /// A colon-introduced suite: either an indented block or a single simple
    /// statement on the same line.
    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(TokenType::Colon)?;
        if self.curr().typ != TokenType::Newline {
            return Ok(vec![self.parse_simple_statement()?]);
        }
        self.expect(TokenType::Newline)?;
        self.expect(TokenType::Indent)?;
        let mut stmts = Vec::new();
        while self.curr().typ != TokenType::Dedent && self.curr().typ != TokenType::EOF {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenType::Dedent)?;
        Ok(stmts)
    }

    fn parse_simple_statement(&mut self) -> ParseResult<Stmt> {
        let pos = self.pos();
        let stmt = match self.curr().typ {
            TokenType::Return => {
                self.advance();
                let value = if self.curr().typ == TokenType::Newline {
                    None
                } else {
                    Some(self.parse_expr_list()?)
                };
                Stmt::Return { value, pos }
            }
            TokenType::Assert => {
                self.advance();
                let test = self.parse_expr()?;
                let msg = if self.matches(TokenType::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Stmt::Assert { test, msg, pos }
            }
            TokenType::From => {
                self.advance();
                let module = self.expect(TokenType::Identifier)?.text.to_owned();
                self.expect(TokenType::Import)?;
                let mut names = vec![self.expect(TokenType::Identifier)?.text.to_owned()];
                while self.matches(TokenType::Comma) {
                    names.push(self.expect(TokenType::Identifier)?.text.to_owned());
                }
                Stmt::ImportFrom { module, names, pos }
            }
            TokenType::Import => {
                self.advance();
                let module = self.expect(TokenType::Identifier)?.text.to_owned();
                Stmt::Import { module, pos }
            }
            TokenType::Identifier if self.peek().typ == TokenType::Colon => {
                let target = self.advance().text.to_owned();
                self.expect(TokenType::Colon)?;
                let annotation = self.parse_expr()?;
                let value = if self.matches(TokenType::Equal) {
                    Some(self.parse_expr_list()?)
                } else {
                    None
                };
                Stmt::AnnAssign { target, annotation, value, pos }
            }
            _ => self.parse_expr_statement(pos)?,
        };
        self.expect(TokenType::Newline)?;
        Ok(stmt)
    }

    fn parse_expr_statement(&mut self, pos: Pos) -> ParseResult<Stmt> {
        let first = self.parse_expr_list()?;
        match self.curr().typ {
            TokenType::Equal => {
                let mut targets = vec![first];
                let mut value = None;
                while self.matches(TokenType::Equal) {
                    let next = self.parse_expr_list()?;
                    if self.curr().typ == TokenType::Equal {
                        targets.push(next);
                    } else {
                        value = Some(next);
                    }
                }
                Ok(Stmt::Assign { targets, value: value.unwrap(), pos })
            }
            TokenType::PlusEqual | TokenType::MinusEqual | TokenType::StarEqual
            | TokenType::SlashEqual => {
                let op = match self.advance().typ {
                    TokenType::PlusEqual => BinOpKind::Add,
                    TokenType::MinusEqual => BinOpKind::Sub,
                    TokenType::StarEqual => BinOpKind::Mul,
                    _ => BinOpKind::Div,
                };
                let value = self.parse_expr_list()?;
                Ok(Stmt::AugAssign { target: first, op, value, pos })
            }
            _ => Ok(Stmt::Expr { value: first, pos }),
        }
    }

    /// One or more comma-separated expressions; two or more become a bare
    /// tuple display, as in `a, b = b, a`.
    fn parse_expr_list(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        let first = self.parse_expr()?;
        if self.curr().typ != TokenType::Comma {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.matches(TokenType::Comma) {
            elts.push(self.parse_expr()?);
        }
        Ok(Expr::TupleLit { elts, pos })
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        let body = self.parse_or()?;
        if !self.matches(TokenType::If) {
            return Ok(body);
        }
        let test = self.parse_or()?;
        self.expect(TokenType::Else)?;
        let orelse = self.parse_expr()?;
        Ok(Expr::IfExp { test: Box::new(test), body: Box::new(body), orelse: Box::new(orelse), pos })
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        let first = self.parse_and()?;
        if self.curr().typ != TokenType::Or {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.matches(TokenType::Or) {
            values.push(self.parse_and()?);
        }
        Ok(Expr::BoolOp { op: BoolOpKind::Or, values, pos })
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        let first = self.parse_not()?;
        if self.curr().typ != TokenType::And {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.matches(TokenType::And) {
            values.push(self.parse_not()?);
        }
        Ok(Expr::BoolOp { op: BoolOpKind::And, values, pos })
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        if self.matches(TokenType::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp { op: UnaryOpKind::Not, operand: Box::new(operand), pos });
        }
        self.parse_comparison()
    }

    fn comparison_op(typ: TokenType) -> Option<CmpOp> {
        match typ {
            TokenType::EqualEqual => Some(CmpOp::Eq),
            TokenType::NotEqual => Some(CmpOp::NotEq),
            TokenType::Less => Some(CmpOp::Lt),
            TokenType::LessEqual => Some(CmpOp::LtE),
            TokenType::Greater => Some(CmpOp::Gt),
            TokenType::GreaterEqual => Some(CmpOp::GtE),
            TokenType::In => Some(CmpOp::In),
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        let left = self.parse_arith()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = Self::comparison_op(self.curr().typ) {
            self.advance();
            ops.push(op);
            comparators.push(self.parse_arith()?);
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare { left: Box::new(left), ops, comparators, pos })
        }
    }

    fn parse_arith(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.curr().typ {
                TokenType::Plus => BinOpKind::Add,
                TokenType::Minus => BinOpKind::Sub,
                _ => break,
            };
            let pos = self.pos();
            self.advance();
            let right = self.parse_term()?;
            left = Expr::BinOp { left: Box::new(left), op, right: Box::new(right), pos };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.curr().typ {
                TokenType::Star => BinOpKind::Mul,
                TokenType::Slash => BinOpKind::Div,
                _ => break,
            };
            let pos = self.pos();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinOp { left: Box::new(left), op, right: Box::new(right), pos };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        let op = match self.curr().typ {
            TokenType::Plus => Some(UnaryOpKind::Pos),
            TokenType::Minus => Some(UnaryOpKind::Neg),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::UnaryOp { op, operand: Box::new(operand), pos });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            let pos = self.pos();
            match self.curr().typ {
                TokenType::LeftParenthesis => {
                    self.advance();
                    let (args, keywords) = self.parse_arguments()?;
                    self.expect(TokenType::RightParenthesis)?;
                    expr = Expr::Call { func: Box::new(expr), args, keywords, pos };
                }
                TokenType::LeftBracket => {
                    self.advance();
                    let index = self.parse_index()?;
                    self.expect(TokenType::RightBracket)?;
                    expr = Expr::Subscript { value: Box::new(expr), index, pos };
                }
                TokenType::Period => {
                    self.advance();
                    let attr = self.expect(TokenType::Identifier)?.text.to_owned();
                    expr = Expr::Attribute { value: Box::new(expr), attr, pos };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> ParseResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while self.curr().typ != TokenType::RightParenthesis {
            if self.curr().typ == TokenType::Identifier && self.peek().typ == TokenType::Equal {
                let pos = self.pos();
                let name = self.advance().text.to_owned();
                self.expect(TokenType::Equal)?;
                let value = self.parse_expr()?;
                keywords.push(Keyword { name, value, pos });
            } else {
                if !keywords.is_empty() {
                    return Err(CompileError::new(
                        ErrorKind::Parse,
                        "A positional argument follows a keyword argument.",
                        self.pos(),
                    ));
                }
                args.push(self.parse_expr()?);
            }
            if !self.matches(TokenType::Comma) {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn parse_index(&mut self) -> ParseResult<Index> {
        // a comma list like Tuple[int, str] indexes with a bare tuple display
        let lower = if self.curr().typ == TokenType::Colon {
            None
        } else {
            Some(Box::new(self.parse_expr_list()?))
        };
        if !self.matches(TokenType::Colon) {
            return Ok(Index::Single(lower.ok_or_else(|| self.unexpected("an index"))?));
        }
        let upper = if self.curr().typ == TokenType::RightBracket {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        Ok(Index::Slice { lower, upper })
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        match self.curr().typ {
            TokenType::Integer => {
                let token = self.advance();
                let value = token.text.parse::<i64>().map_err(|_| {
                    CompileError::new(
                        ErrorKind::Parse,
                        format!("Could not parse {} as an integer literal.", token.text),
                        pos,
                    )
                })?;
                Ok(Expr::Int { value, pos })
            }
            TokenType::Float => {
                let token = self.advance();
                let value = token.text.parse::<f64>().map_err(|_| {
                    CompileError::new(
                        ErrorKind::Parse,
                        format!("Could not parse {} as a float literal.", token.text),
                        pos,
                    )
                })?;
                Ok(Expr::Float { value, pos })
            }
            TokenType::Str => {
                let token = self.advance();
                Ok(Expr::Str { value: Self::cook_string(token.text), pos })
            }
            TokenType::True => {
                self.advance();
                Ok(Expr::Bool { value: true, pos })
            }
            TokenType::False => {
                self.advance();
                Ok(Expr::Bool { value: false, pos })
            }
            TokenType::None => {
                self.advance();
                Ok(Expr::NoneLit { pos })
            }
            TokenType::Identifier => {
                let name = self.advance().text.to_owned();
                Ok(Expr::Name { name, pos })
            }
            TokenType::LeftParenthesis => {
                self.advance();
                let expr = self.parse_expr_list()?;
                self.expect(TokenType::RightParenthesis)?;
                Ok(expr)
            }
            TokenType::LeftBracket => {
                self.advance();
                let mut elts = Vec::new();
                while self.curr().typ != TokenType::RightBracket {
                    elts.push(self.parse_expr()?);
                    if !self.matches(TokenType::Comma) {
                        break;
                    }
                }
                self.expect(TokenType::RightBracket)?;
                Ok(Expr::ListLit { elts, pos })
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Strips the quotes off a string token and resolves its escapes.
    fn cook_string(raw: &str) -> String {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use crate::parsing::ast::*;
    use crate::parsing::parser::parse_module;
    use crate::source::Source;

    fn parse(text: &str) -> Vec<Stmt> {
        parse_module(&Source::from_text("<test>", text)).unwrap()
    }

    #[test]
    fn parse_assignment() {
        let stmts = parse("x = 1\n");
        assert_eq!(stmts.len(), 1);
        assert!(matches!(&stmts[0], Stmt::Assign { targets, .. } if targets.len() == 1));
    }

    #[test]
    fn parse_tuple_swap() {
        let stmts = parse("a, b = b, a\n");
        match &stmts[0] {
            Stmt::Assign { targets, value, .. } => {
                assert!(matches!(&targets[0], Expr::TupleLit { elts, .. } if elts.len() == 2));
                assert!(matches!(value, Expr::TupleLit { elts, .. } if elts.len() == 2));
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn parse_single_line_def() {
        let stmts = parse("def f(x: int) -> int: return x + 1\n");
        match &stmts[0] {
            Stmt::FunctionDef { name, params, returns, body, .. } => {
                assert_eq!(name, "f");
                assert_eq!(params.len(), 1);
                assert!(returns.is_some());
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn parse_elif_chain() {
        let stmts = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &stmts[0] {
            Stmt::If { orelse, .. } => {
                assert_eq!(orelse.len(), 1);
                assert!(matches!(&orelse[0], Stmt::If { orelse, .. } if orelse.len() == 1));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn parse_comparison_chain() {
        let stmts = parse("x = a < b > c\n");
        match &stmts[0] {
            Stmt::Assign { value: Expr::Compare { ops, comparators, .. }, .. } => {
                assert_eq!(ops.len(), 2);
                assert_eq!(comparators.len(), 2);
            }
            other => panic!("expected compare, got {:?}", other),
        }
    }

    #[test]
    fn parse_ternary() {
        let stmts = parse("x = 1 if flag else 2\n");
        assert!(matches!(&stmts[0], Stmt::Assign { value: Expr::IfExp { .. }, .. }));
    }

    #[test]
    fn parse_call_keywords() {
        let stmts = parse("f(1, 2, scale=3)\n");
        match &stmts[0] {
            Stmt::Expr { value: Expr::Call { args, keywords, .. }, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(keywords.len(), 1);
                assert_eq!(keywords[0].name, "scale");
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn parse_annotated_assignment() {
        let stmts = parse("xs: List[int] = []\n");
        match &stmts[0] {
            Stmt::AnnAssign { target, annotation, value, .. } => {
                assert_eq!(target, "xs");
                assert!(matches!(annotation, Expr::Subscript { .. }));
                assert!(matches!(value, Some(Expr::ListLit { elts, .. }) if elts.is_empty()));
            }
            other => panic!("expected ann-assign, got {:?}", other),
        }
    }

    #[test]
    fn parse_augmented_assignment() {
        let stmts = parse("x += 2\n");
        assert!(matches!(&stmts[0], Stmt::AugAssign { op: BinOpKind::Add, .. }));
    }

    #[test]
    fn parse_for_multi_target() {
        let stmts = parse("for k, v in pairs:\n    x = k\n");
        match &stmts[0] {
            Stmt::For { target, .. } => {
                assert!(matches!(target, Expr::TupleLit { elts, .. } if elts.len() == 2));
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn parse_slice_index() {
        let stmts = parse("x = xs[1:2]\n");
        match &stmts[0] {
            Stmt::Assign { value: Expr::Subscript { index, .. }, .. } => {
                assert!(matches!(index, Index::Slice { .. }));
            }
            other => panic!("expected subscript, got {:?}", other),
        }
    }

    #[test]
    fn parse_error_reports_position() {
        let err = parse_module(&Source::from_text("<test>", "def = 1\n")).unwrap_err();
        assert_eq!(err.pos.unwrap().line, 1);
    }

    #[test]
    fn parse_vararg_def() {
        let stmts = parse("def f(x: int, *rest) -> int:\n    return x\n");
        match &stmts[0] {
            Stmt::FunctionDef { vararg, .. } => assert_eq!(vararg.as_deref(), Some("rest")),
            other => panic!("expected def, got {:?}", other),
        }
    }
}
