use log::trace;
use smol_str::SmolStr;

use crate::compiler::parse_lua_number::{NumberResult, str_to_number};
use crate::compiler::parser::ast::*;
use crate::compiler::parser::error::SyntaxError;
use crate::compiler::parser::lua_operator_kind::{
    UNARY_PRIORITY, to_binary_operator, to_unary_operator,
};
use crate::compiler::parser::lua_token::LuaToken;
use crate::compiler::parser::lua_token_kind::LuaTokenKind;
use crate::compiler::parser::position::Position;
use crate::compiler::parser::scanner::{ScanConfig, Scanner};
use crate::lua_vm::lua_limits::MAX_SYNTAX_LEVELS;

type ParseResult<T> = Result<T, SyntaxError>;

/// Recursive-descent parser with one token of lookahead. The first error
/// ends the parse.
pub struct Parser<'a> {
    scanner: Scanner<'a>,
    tok: LuaToken,
    tok_end: Position,
    /// Last line of the previous token.
    prev_line: u32,
    started: bool,
    comments: Vec<CommentGroup>,
    lead: Option<usize>,
    line_comment: Option<usize>,
    lead_comments: Vec<(Position, usize)>,
    line_comments: Vec<(Position, usize)>,
    allow_vararg: bool,
    allow_break: bool,
    depth: usize,
}

/// Symbols and reserved words are quoted in messages; `<eof>`, `<name>`
/// and the other token classes are not.
fn quoted(kind: LuaTokenKind) -> String {
    let text = kind.to_user_string();
    if text.starts_with('<') {
        text.to_string()
    } else {
        format!("'{}'", text)
    }
}

pub fn parse_chunk(src: &[u8], source: &str, config: ScanConfig) -> ParseResult<File> {
    Parser::new(Scanner::new(src, source, config)).parse_file()
}

impl<'a> Parser<'a> {
    pub fn new(scanner: Scanner<'a>) -> Self {
        let source = scanner.source().clone();
        Parser {
            scanner,
            tok: LuaToken::new(LuaTokenKind::TkEof, Position::new(source, 1, 0), Vec::new()),
            tok_end: Position::invalid(),
            prev_line: 1,
            started: false,
            comments: Vec::new(),
            lead: None,
            line_comment: None,
            lead_comments: Vec::new(),
            line_comments: Vec::new(),
            allow_vararg: true,
            allow_break: false,
            depth: 0,
        }
    }

    pub fn parse_file(mut self) -> ParseResult<File> {
        trace!("parsing {}", self.scanner.source());
        self.advance()?;
        let chunk = self.block()?;
        if self.tok.kind != LuaTokenKind::TkEof {
            return Err(self.error_expected(LuaTokenKind::TkEof));
        }
        let file = File {
            filename: self.scanner.source().clone(),
            shebang: self.scanner.shebang().map(|s| s.to_string()),
            chunk,
            comments: self.comments,
            lead_comments: self.lead_comments,
            line_comments: self.line_comments,
        };
        trace!(
            "parsed {}: {} statements, {} comment groups",
            file.filename,
            file.chunk.stmts.len(),
            file.comments.len()
        );
        Ok(file)
    }

    // ===== token plumbing =====

    fn advance(&mut self) -> ParseResult<()> {
        self.prev_line = self.scanner.line();
        let has_prev = self.started;
        self.started = true;
        self.lead = None;
        self.line_comment = None;
        let mut group: Vec<Comment> = Vec::new();
        let mut group_end = 0u32;
        let mut first_group = true;
        loop {
            let tok = self.scanner.next();
            if tok.kind == LuaTokenKind::TkComment {
                if !group.is_empty() && tok.pos.line > group_end + 1 {
                    let trailing = first_group && has_prev;
                    self.close_group(std::mem::take(&mut group), trailing, None);
                    first_group = false;
                }
                group.push(Comment {
                    pos: tok.pos.clone(),
                    text: tok.literal_str(),
                });
                group_end = self.scanner.line();
                continue;
            }
            if tok.kind == LuaTokenKind::TkIllegal {
                return Err(self
                    .scanner
                    .last_error()
                    .cloned()
                    .unwrap_or_else(|| SyntaxError::new(tok.pos.clone(), "unexpected symbol")));
            }
            if !group.is_empty() {
                let trailing = first_group && has_prev;
                let next_line = tok.pos.line;
                self.close_group(std::mem::take(&mut group), trailing, Some((group_end, next_line)));
            }
            self.tok = tok;
            self.tok_end = self.scanner.cur_pos();
            return Ok(());
        }
    }

    /// Records a finished comment group. A group that starts on the line of
    /// the previous token is that token's line comment; otherwise a group
    /// ending at most one line above the next token is its lead comment.
    fn close_group(&mut self, list: Vec<Comment>, trailing: bool, next: Option<(u32, u32)>) {
        let start_line = list[0].pos.line;
        let idx = self.comments.len();
        self.comments.push(CommentGroup { list });
        if trailing && start_line == self.prev_line {
            self.line_comment = Some(idx);
            return;
        }
        if let Some((end, next_line)) = next {
            if end + 1 >= next_line {
                self.lead = Some(idx);
            }
        }
    }

    fn check(&self, kind: LuaTokenKind) -> bool {
        self.tok.kind == kind
    }

    fn test_next(&mut self, kind: LuaTokenKind) -> ParseResult<bool> {
        if self.tok.kind == kind {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: LuaTokenKind) -> ParseResult<Position> {
        if self.tok.kind != kind {
            return Err(self.error_expected(kind));
        }
        let pos = self.tok.pos.clone();
        self.advance()?;
        Ok(pos)
    }

    fn expect_match(
        &mut self,
        what: LuaTokenKind,
        who: LuaTokenKind,
        line: u32,
    ) -> ParseResult<Position> {
        if self.tok.kind == what {
            let pos = self.tok.pos.clone();
            self.advance()?;
            return Ok(pos);
        }
        if line == self.tok.pos.line {
            Err(self.error_expected(what))
        } else {
            Err(self.error_near(format!(
                "{} expected (to close {} at line {})",
                quoted(what),
                quoted(who),
                line
            )))
        }
    }

    fn peek_kind(&self) -> LuaTokenKind {
        let mut probe = self.scanner.clone();
        loop {
            let tok = probe.next();
            if tok.kind != LuaTokenKind::TkComment {
                return tok.kind;
            }
        }
    }

    fn error_near(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::near(self.tok.pos.clone(), message, self.tok.near_text())
    }

    fn error_expected(&self, kind: LuaTokenKind) -> SyntaxError {
        self.error_near(format!("{} expected", quoted(kind)))
    }

    fn enter_level(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_SYNTAX_LEVELS {
            return Err(self.error_near("chunk has too many syntax levels"));
        }
        Ok(())
    }

    fn leave_level(&mut self) {
        self.depth -= 1;
    }

    fn name(&mut self) -> ParseResult<Name> {
        if self.tok.kind != LuaTokenKind::TkName {
            return Err(self.error_expected(LuaTokenKind::TkName));
        }
        let name = Name {
            pos: self.tok.pos.clone(),
            name: SmolStr::new(self.tok.literal_str()),
        };
        self.advance()?;
        Ok(name)
    }

    // ===== statements =====

    fn block(&mut self) -> ParseResult<Block> {
        let open = self.tok.pos.clone();
        let mut stmts = Vec::new();
        while !self.tok.kind.is_block_follow(true) {
            if self.check(LuaTokenKind::TkReturn) {
                stmts.push(self.statement()?);
                break;
            }
            stmts.push(self.statement()?);
        }
        Ok(Block {
            open,
            close: self.tok.pos.clone(),
            stmts,
        })
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.enter_level()?;
        let start = self.tok.pos.clone();
        if let Some(idx) = self.lead.take() {
            self.lead_comments.push((start.clone(), idx));
        }
        let line = start.line;
        let stmt = match self.tok.kind {
            LuaTokenKind::TkSemicolon => {
                self.advance()?;
                Stmt::Empty(start.clone())
            }
            LuaTokenKind::TkIf => self.if_stat(line)?,
            LuaTokenKind::TkWhile => {
                self.advance()?;
                let cond = self.expr()?;
                self.expect(LuaTokenKind::TkDo)?;
                let block = self.loop_block()?;
                self.expect_match(LuaTokenKind::TkEnd, LuaTokenKind::TkWhile, line)?;
                Stmt::While(WhileStmt {
                    pos: start.clone(),
                    cond,
                    block,
                })
            }
            LuaTokenKind::TkDo => {
                self.advance()?;
                let block = self.block()?;
                self.expect_match(LuaTokenKind::TkEnd, LuaTokenKind::TkDo, line)?;
                Stmt::Do(Block {
                    open: start.clone(),
                    ..block
                })
            }
            LuaTokenKind::TkFor => self.for_stat(line)?,
            LuaTokenKind::TkRepeat => {
                self.advance()?;
                let block = self.loop_block()?;
                self.expect_match(LuaTokenKind::TkUntil, LuaTokenKind::TkRepeat, line)?;
                let cond = self.expr()?;
                Stmt::Repeat(RepeatStmt {
                    pos: start.clone(),
                    block,
                    cond,
                })
            }
            LuaTokenKind::TkFunction => {
                self.advance()?;
                let mut target = Expr::Name(self.name()?);
                let mut method = None;
                while self.check(LuaTokenKind::TkDot) {
                    self.advance()?;
                    let field = self.name()?;
                    target = Expr::SelectorExpr(Box::new(SelectorExpr {
                        object: target,
                        field,
                    }));
                }
                if self.test_next(LuaTokenKind::TkColon)? {
                    method = Some(self.name()?);
                }
                let body = self.func_body(line)?;
                Stmt::Func(FuncStmt {
                    pos: start.clone(),
                    target,
                    method,
                    body,
                })
            }
            LuaTokenKind::TkLocal => {
                self.advance()?;
                if self.test_next(LuaTokenKind::TkFunction)? {
                    let name = self.name()?;
                    let body = self.func_body(line)?;
                    Stmt::LocalFunc(LocalFuncStmt {
                        pos: start.clone(),
                        name,
                        body,
                    })
                } else {
                    let mut names = vec![self.name()?];
                    while self.test_next(LuaTokenKind::TkComma)? {
                        names.push(self.name()?);
                    }
                    let values = if self.test_next(LuaTokenKind::TkAssign)? {
                        self.expr_list()?
                    } else {
                        Vec::new()
                    };
                    Stmt::LocalAssign(LocalAssignStmt {
                        pos: start.clone(),
                        names,
                        values,
                    })
                }
            }
            LuaTokenKind::TkLabel => {
                self.advance()?;
                let name = self.name()?;
                self.expect(LuaTokenKind::TkLabel)?;
                Stmt::Label(LabelStmt {
                    pos: start.clone(),
                    name,
                })
            }
            LuaTokenKind::TkReturn => {
                self.advance()?;
                let values = if self.tok.kind.is_block_follow(true)
                    || self.check(LuaTokenKind::TkSemicolon)
                {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                let mut end = values.last().map(|v| v.end()).unwrap_or_else(|| start.offset(6));
                if self.check(LuaTokenKind::TkSemicolon) {
                    end = self.tok.pos.offset(1);
                    self.advance()?;
                }
                Stmt::Return(ReturnStmt {
                    pos: start.clone(),
                    values,
                    end,
                })
            }
            LuaTokenKind::TkBreak => {
                if !self.allow_break {
                    return Err(self.error_near("break outside a loop"));
                }
                self.advance()?;
                Stmt::Break(start.clone())
            }
            LuaTokenKind::TkGoto => {
                self.advance()?;
                let label = self.name()?;
                Stmt::Goto(GotoStmt {
                    pos: start.clone(),
                    label,
                })
            }
            _ => self.expr_stat()?,
        };
        if let Some(idx) = self.line_comment.take() {
            self.line_comments.push((start, idx));
        }
        self.leave_level();
        Ok(stmt)
    }

    fn loop_block(&mut self) -> ParseResult<Block> {
        let saved = std::mem::replace(&mut self.allow_break, true);
        let block = self.block();
        self.allow_break = saved;
        block
    }

    fn if_stat(&mut self, line: u32) -> ParseResult<Stmt> {
        let pos = self.tok.pos.clone();
        self.advance()?;
        let cond = self.expr()?;
        self.expect(LuaTokenKind::TkThen)?;
        let then_block = self.block()?;
        let mut else_ifs = Vec::new();
        while self.check(LuaTokenKind::TkElseIf) {
            self.advance()?;
            let cond = self.expr()?;
            self.expect(LuaTokenKind::TkThen)?;
            let block = self.block()?;
            else_ifs.push(CondBlock { cond, block });
        }
        let else_block = if self.test_next(LuaTokenKind::TkElse)? {
            Some(self.block()?)
        } else {
            None
        };
        let end = self.expect_match(LuaTokenKind::TkEnd, LuaTokenKind::TkIf, line)?;
        Ok(Stmt::If(IfStmt {
            pos,
            cond,
            then_block,
            else_ifs,
            else_block,
            end,
        }))
    }

    fn for_stat(&mut self, line: u32) -> ParseResult<Stmt> {
        let pos = self.tok.pos.clone();
        self.advance()?;
        let first = self.name()?;
        match self.tok.kind {
            LuaTokenKind::TkAssign => {
                self.advance()?;
                let start = self.expr()?;
                self.expect(LuaTokenKind::TkComma)?;
                let limit = self.expr()?;
                let step = if self.test_next(LuaTokenKind::TkComma)? {
                    Some(self.expr()?)
                } else {
                    None
                };
                self.expect(LuaTokenKind::TkDo)?;
                let block = self.loop_block()?;
                self.expect_match(LuaTokenKind::TkEnd, LuaTokenKind::TkFor, line)?;
                Ok(Stmt::For(ForStmt {
                    pos,
                    var: first,
                    start,
                    limit,
                    step,
                    block,
                }))
            }
            LuaTokenKind::TkComma | LuaTokenKind::TkIn => {
                let mut names = vec![first];
                while self.test_next(LuaTokenKind::TkComma)? {
                    names.push(self.name()?);
                }
                self.expect(LuaTokenKind::TkIn)?;
                let exprs = self.expr_list()?;
                self.expect(LuaTokenKind::TkDo)?;
                let block = self.loop_block()?;
                self.expect_match(LuaTokenKind::TkEnd, LuaTokenKind::TkFor, line)?;
                Ok(Stmt::ForEach(ForEachStmt {
                    pos,
                    names,
                    exprs,
                    block,
                }))
            }
            _ => Err(self.error_near("'=' or 'in' expected")),
        }
    }

    fn expr_stat(&mut self) -> ParseResult<Stmt> {
        let first = self.suffixed_expr()?;
        if self.check(LuaTokenKind::TkAssign) || self.check(LuaTokenKind::TkComma) {
            let mut targets = vec![first];
            while self.test_next(LuaTokenKind::TkComma)? {
                targets.push(self.suffixed_expr()?);
            }
            for target in &targets {
                if !matches!(
                    target,
                    Expr::Name(_) | Expr::SelectorExpr(_) | Expr::IndexExpr(_)
                ) {
                    return Err(SyntaxError::near(
                        target.pos(),
                        "syntax error",
                        self.tok.near_text(),
                    ));
                }
            }
            self.expect(LuaTokenKind::TkAssign)?;
            let values = self.expr_list()?;
            return Ok(Stmt::Assign(AssignStmt { targets, values }));
        }
        if !matches!(first, Expr::CallExpr(_)) {
            return Err(self.error_near("syntax error"));
        }
        Ok(Stmt::Expr(first))
    }

    fn func_body(&mut self, line: u32) -> ParseResult<FuncBody> {
        let pos = self.expect(LuaTokenKind::TkLeftParen)?;
        let mut names = Vec::new();
        let mut vararg = false;
        if !self.check(LuaTokenKind::TkRightParen) {
            loop {
                match self.tok.kind {
                    LuaTokenKind::TkName => names.push(self.name()?),
                    LuaTokenKind::TkEllipsis => {
                        self.advance()?;
                        vararg = true;
                        break;
                    }
                    _ => return Err(self.error_near("<name> expected")),
                }
                if !self.test_next(LuaTokenKind::TkComma)? {
                    break;
                }
            }
        }
        self.expect(LuaTokenKind::TkRightParen)?;
        let saved_vararg = std::mem::replace(&mut self.allow_vararg, vararg);
        let saved_break = std::mem::replace(&mut self.allow_break, false);
        let block = self.block();
        self.allow_vararg = saved_vararg;
        self.allow_break = saved_break;
        let block = block?;
        self.expect_match(LuaTokenKind::TkEnd, LuaTokenKind::TkFunction, line)?;
        Ok(FuncBody {
            pos,
            params: ParamList { names, vararg },
            block,
        })
    }

    // ===== expressions =====

    fn expr_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut list = vec![self.expr()?];
        while self.test_next(LuaTokenKind::TkComma)? {
            list.push(self.expr()?);
        }
        Ok(list)
    }

    pub fn expr(&mut self) -> ParseResult<Expr> {
        self.sub_expr(0)
    }

    fn sub_expr(&mut self, limit: u8) -> ParseResult<Expr> {
        self.enter_level()?;
        let mut left = if let Some(op) = to_unary_operator(self.tok.kind) {
            let pos = self.tok.pos.clone();
            self.advance()?;
            let operand = self.sub_expr(UNARY_PRIORITY)?;
            Expr::UnaryExpr(Box::new(UnaryExpr { pos, op, operand }))
        } else {
            self.simple_expr()?
        };
        // A left-associative chain nests the tree without recursing here,
        // so every operator counts as a level.
        let mut chained = 0;
        while let Some(op) = to_binary_operator(self.tok.kind) {
            let priority = *op.get_priority();
            if priority.left <= limit {
                break;
            }
            self.enter_level()?;
            chained += 1;
            let op_pos = self.tok.pos.clone();
            self.advance()?;
            let right = self.sub_expr(priority.right)?;
            left = Expr::BinaryExpr(Box::new(BinaryExpr {
                op,
                op_pos,
                left,
                right,
            }));
        }
        self.depth -= chained;
        self.leave_level();
        Ok(left)
    }

    fn simple_expr(&mut self) -> ParseResult<Expr> {
        let pos = self.tok.pos.clone();
        let lit = |value: LitValue, raw: SmolStr, end: Position| {
            Expr::BasicLit(BasicLit {
                pos: pos.clone(),
                end,
                value,
                raw,
            })
        };
        let expr = match self.tok.kind {
            LuaTokenKind::TkInt | LuaTokenKind::TkFloat => {
                let raw = SmolStr::new(self.tok.literal_str());
                let value = match str_to_number(&self.tok.literal) {
                    Some(NumberResult::Int(i)) => LitValue::Integer(i),
                    Some(NumberResult::Float(f)) => LitValue::Float(f),
                    None => return Err(self.error_near("malformed number")),
                };
                lit(value, raw, self.tok_end.clone())
            }
            LuaTokenKind::TkString => lit(
                LitValue::String(self.tok.literal.clone()),
                SmolStr::default(),
                self.tok_end.clone(),
            ),
            LuaTokenKind::TkNil => lit(LitValue::Nil, "nil".into(), pos.offset(3)),
            LuaTokenKind::TkTrue => lit(LitValue::True, "true".into(), pos.offset(4)),
            LuaTokenKind::TkFalse => lit(LitValue::False, "false".into(), pos.offset(5)),
            LuaTokenKind::TkEllipsis => {
                if !self.allow_vararg {
                    return Err(self.error_near("cannot use '...' outside a vararg function"));
                }
                Expr::Vararg(pos.clone())
            }
            LuaTokenKind::TkLeftBrace => return self.table_constructor(),
            LuaTokenKind::TkFunction => {
                let line = pos.line;
                self.advance()?;
                let body = self.func_body(line)?;
                return Ok(Expr::FuncLit(Box::new(FuncLit { pos, body })));
            }
            _ => return self.suffixed_expr(),
        };
        self.advance()?;
        Ok(expr)
    }

    fn primary_expr(&mut self) -> ParseResult<Expr> {
        match self.tok.kind {
            LuaTokenKind::TkName => Ok(Expr::Name(self.name()?)),
            LuaTokenKind::TkLeftParen => {
                let open = self.tok.pos.clone();
                let line = open.line;
                self.advance()?;
                let inner = self.expr()?;
                let close =
                    self.expect_match(LuaTokenKind::TkRightParen, LuaTokenKind::TkLeftParen, line)?;
                Ok(Expr::ParenExpr(Box::new(ParenExpr { open, close, inner })))
            }
            _ => Err(self.error_near("unexpected symbol")),
        }
    }

    fn suffixed_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary_expr()?;
        let mut chained = 0;
        loop {
            if matches!(
                self.tok.kind,
                LuaTokenKind::TkDot
                    | LuaTokenKind::TkLeftBracket
                    | LuaTokenKind::TkColon
                    | LuaTokenKind::TkLeftParen
                    | LuaTokenKind::TkString
                    | LuaTokenKind::TkLeftBrace
            ) {
                self.enter_level()?;
                chained += 1;
            }
            match self.tok.kind {
                LuaTokenKind::TkDot => {
                    self.advance()?;
                    let field = self.name()?;
                    expr = Expr::SelectorExpr(Box::new(SelectorExpr {
                        object: expr,
                        field,
                    }));
                }
                LuaTokenKind::TkLeftBracket => {
                    self.advance()?;
                    let key = self.expr()?;
                    let close = self.expect(LuaTokenKind::TkRightBracket)?;
                    expr = Expr::IndexExpr(Box::new(IndexExpr {
                        object: expr,
                        key,
                        close,
                    }));
                }
                LuaTokenKind::TkColon => {
                    self.advance()?;
                    let method = self.name()?;
                    let (args, close) = self.call_args()?;
                    expr = Expr::CallExpr(Box::new(CallExpr {
                        func: expr,
                        method: Some(method),
                        args,
                        close,
                    }));
                }
                LuaTokenKind::TkLeftParen | LuaTokenKind::TkString | LuaTokenKind::TkLeftBrace => {
                    let (args, close) = self.call_args()?;
                    expr = Expr::CallExpr(Box::new(CallExpr {
                        func: expr,
                        method: None,
                        args,
                        close,
                    }));
                }
                _ => {
                    self.depth -= chained;
                    return Ok(expr);
                }
            }
        }
    }

    /// Arguments of a call and the position of their last character.
    fn call_args(&mut self) -> ParseResult<(Vec<Expr>, Position)> {
        match self.tok.kind {
            LuaTokenKind::TkString => {
                let end = self.tok_end.clone();
                let close = Position::new(end.source.clone(), end.line, end.column.saturating_sub(1));
                let arg = self.simple_expr()?;
                Ok((vec![arg], close))
            }
            LuaTokenKind::TkLeftBrace => {
                let arg = self.table_constructor()?;
                let close = match &arg {
                    Expr::TableLit(t) => t.close.clone(),
                    _ => arg.end(),
                };
                Ok((vec![arg], close))
            }
            LuaTokenKind::TkLeftParen => {
                let line = self.tok.pos.line;
                self.advance()?;
                let args = if self.check(LuaTokenKind::TkRightParen) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                let close =
                    self.expect_match(LuaTokenKind::TkRightParen, LuaTokenKind::TkLeftParen, line)?;
                Ok((args, close))
            }
            _ => Err(self.error_near("function arguments expected")),
        }
    }

    fn table_constructor(&mut self) -> ParseResult<Expr> {
        let open = self.tok.pos.clone();
        let line = open.line;
        self.expect(LuaTokenKind::TkLeftBrace)?;
        let mut fields = Vec::new();
        while !self.check(LuaTokenKind::TkRightBrace) {
            fields.push(self.field()?);
            if !self.test_next(LuaTokenKind::TkComma)? && !self.test_next(LuaTokenKind::TkSemicolon)?
            {
                break;
            }
        }
        let close = self.expect_match(LuaTokenKind::TkRightBrace, LuaTokenKind::TkLeftBrace, line)?;
        Ok(Expr::TableLit(Box::new(TableLit {
            open,
            close,
            fields,
        })))
    }

    fn field(&mut self) -> ParseResult<Expr> {
        let pos = self.tok.pos.clone();
        match self.tok.kind {
            LuaTokenKind::TkName if self.peek_kind() == LuaTokenKind::TkAssign => {
                let name = self.name()?;
                self.expect(LuaTokenKind::TkAssign)?;
                let value = self.expr()?;
                let key = Expr::BasicLit(BasicLit {
                    pos: name.pos.clone(),
                    end: name.end(),
                    value: LitValue::String(name.name.as_bytes().to_vec()),
                    raw: name.name.clone(),
                });
                Ok(Expr::KeyValueExpr(Box::new(KeyValueExpr {
                    pos,
                    key,
                    value,
                    bracketed: false,
                })))
            }
            LuaTokenKind::TkLeftBracket => {
                self.advance()?;
                let key = self.expr()?;
                self.expect(LuaTokenKind::TkRightBracket)?;
                self.expect(LuaTokenKind::TkAssign)?;
                let value = self.expr()?;
                Ok(Expr::KeyValueExpr(Box::new(KeyValueExpr {
                    pos,
                    key,
                    value,
                    bracketed: true,
                })))
            }
            _ => self.expr(),
        }
    }
}
