//! Syntax tree produced by the parser.
//!
//! Every node reports `pos()` (its first character) and `end()` (one past
//! its last character).

use smol_str::SmolStr;

use crate::compiler::parser::lua_operator_kind::{BinaryOperator, UnaryOperator};
use crate::compiler::parser::position::Position;

#[derive(Debug, Clone)]
pub struct Comment {
    pub pos: Position,
    /// Raw text including the leading `--`, without the trailing newline.
    pub text: String,
}

impl Comment {
    pub fn end(&self) -> Position {
        self.pos.offset_by(self.text.as_bytes())
    }
}

/// Comments on consecutive lines with no blank line between them.
#[derive(Debug, Clone)]
pub struct CommentGroup {
    pub list: Vec<Comment>,
}

impl CommentGroup {
    pub fn pos(&self) -> Position {
        self.list.first().map(|c| c.pos.clone()).unwrap_or_default()
    }

    pub fn end(&self) -> Position {
        self.list.last().map(|c| c.end()).unwrap_or_default()
    }

    pub fn text(&self) -> String {
        self.list
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct Name {
    pub pos: Position,
    pub name: SmolStr,
}

impl Name {
    pub fn end(&self) -> Position {
        self.pos.offset(self.name.len() as u32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Nil,
    True,
    False,
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct BasicLit {
    pub pos: Position,
    pub end: Position,
    pub value: LitValue,
    /// Source spelling of numerals, kept for printing.
    pub raw: SmolStr,
}

#[derive(Debug, Clone)]
pub struct ParamList {
    pub names: Vec<Name>,
    pub vararg: bool,
}

#[derive(Debug, Clone)]
pub struct FuncBody {
    pub pos: Position,
    pub params: ParamList,
    pub block: Block,
}

impl FuncBody {
    pub fn end(&self) -> Position {
        self.block.close.offset(3)
    }
}

#[derive(Debug, Clone)]
pub struct FuncLit {
    pub pos: Position,
    pub body: FuncBody,
}

#[derive(Debug, Clone)]
pub struct TableLit {
    pub open: Position,
    pub close: Position,
    /// Fields in source order; keyed fields are `Expr::KeyValueExpr`.
    pub fields: Vec<Expr>,
}

impl TableLit {
    /// Positional fields, the array part of the constructor.
    pub fn positional(&self) -> impl Iterator<Item = &Expr> {
        self.fields
            .iter()
            .filter(|f| !matches!(f, Expr::KeyValueExpr(_)))
    }

    /// Keyed fields, the hash part of the constructor.
    pub fn keyed(&self) -> impl Iterator<Item = &KeyValueExpr> {
        self.fields.iter().filter_map(|f| match f {
            Expr::KeyValueExpr(kv) => Some(kv.as_ref()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ParenExpr {
    pub open: Position,
    pub close: Position,
    pub inner: Expr,
}

#[derive(Debug, Clone)]
pub struct SelectorExpr {
    pub object: Expr,
    pub field: Name,
}

#[derive(Debug, Clone)]
pub struct IndexExpr {
    pub object: Expr,
    pub key: Expr,
    pub close: Position,
}

#[derive(Debug, Clone)]
pub struct CallExpr {
    pub func: Expr,
    /// Method name of a `recv:name(args)` call; `func` is then the receiver.
    pub method: Option<Name>,
    pub args: Vec<Expr>,
    pub close: Position,
}

#[derive(Debug, Clone)]
pub struct UnaryExpr {
    pub pos: Position,
    pub op: UnaryOperator,
    pub operand: Expr,
}

#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub op: BinaryOperator,
    pub op_pos: Position,
    pub left: Expr,
    pub right: Expr,
}

/// A keyed table field: `name = v` (key is a string literal) or `[k] = v`.
#[derive(Debug, Clone)]
pub struct KeyValueExpr {
    pub pos: Position,
    pub key: Expr,
    pub value: Expr,
    pub bracketed: bool,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Bad(Position, Position),
    Name(Name),
    Vararg(Position),
    BasicLit(BasicLit),
    FuncLit(Box<FuncLit>),
    TableLit(Box<TableLit>),
    ParenExpr(Box<ParenExpr>),
    SelectorExpr(Box<SelectorExpr>),
    IndexExpr(Box<IndexExpr>),
    CallExpr(Box<CallExpr>),
    UnaryExpr(Box<UnaryExpr>),
    BinaryExpr(Box<BinaryExpr>),
    KeyValueExpr(Box<KeyValueExpr>),
}

impl Expr {
    pub fn pos(&self) -> Position {
        match self {
            Expr::Bad(pos, _) => pos.clone(),
            Expr::Name(n) => n.pos.clone(),
            Expr::Vararg(pos) => pos.clone(),
            Expr::BasicLit(lit) => lit.pos.clone(),
            Expr::FuncLit(f) => f.pos.clone(),
            Expr::TableLit(t) => t.open.clone(),
            Expr::ParenExpr(p) => p.open.clone(),
            Expr::SelectorExpr(s) => s.object.pos(),
            Expr::IndexExpr(i) => i.object.pos(),
            Expr::CallExpr(c) => c.func.pos(),
            Expr::UnaryExpr(u) => u.pos.clone(),
            Expr::BinaryExpr(b) => b.left.pos(),
            Expr::KeyValueExpr(kv) => kv.pos.clone(),
        }
    }

    pub fn end(&self) -> Position {
        match self {
            Expr::Bad(_, end) => end.clone(),
            Expr::Name(n) => n.end(),
            Expr::Vararg(pos) => pos.offset(3),
            Expr::BasicLit(lit) => lit.end.clone(),
            Expr::FuncLit(f) => f.body.end(),
            Expr::TableLit(t) => t.close.offset(1),
            Expr::ParenExpr(p) => p.close.offset(1),
            Expr::SelectorExpr(s) => s.field.end(),
            Expr::IndexExpr(i) => i.close.offset(1),
            Expr::CallExpr(c) => c.close.offset(1),
            Expr::UnaryExpr(u) => u.operand.end(),
            Expr::BinaryExpr(b) => b.right.end(),
            Expr::KeyValueExpr(kv) => kv.value.end(),
        }
    }

    pub fn line(&self) -> u32 {
        self.pos().line
    }

    /// Calls and `...` can produce any number of values.
    pub fn is_multi(&self) -> bool {
        matches!(self, Expr::CallExpr(_) | Expr::Vararg(_))
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub open: Position,
    pub close: Position,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct LocalAssignStmt {
    pub pos: Position,
    pub names: Vec<Name>,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct LocalFuncStmt {
    pub pos: Position,
    pub name: Name,
    pub body: FuncBody,
}

/// `function a.b.c:m() ... end`; `target` is a Name or a selector chain.
#[derive(Debug, Clone)]
pub struct FuncStmt {
    pub pos: Position,
    pub target: Expr,
    pub method: Option<Name>,
    pub body: FuncBody,
}

#[derive(Debug, Clone)]
pub struct LabelStmt {
    pub pos: Position,
    pub name: Name,
}

#[derive(Debug, Clone)]
pub struct AssignStmt {
    pub targets: Vec<Expr>,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct GotoStmt {
    pub pos: Position,
    pub label: Name,
}

#[derive(Debug, Clone)]
pub struct CondBlock {
    pub cond: Expr,
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct IfStmt {
    pub pos: Position,
    pub cond: Expr,
    pub then_block: Block,
    pub else_ifs: Vec<CondBlock>,
    pub else_block: Option<Block>,
    pub end: Position,
}

#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub pos: Position,
    pub cond: Expr,
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct RepeatStmt {
    pub pos: Position,
    pub block: Block,
    pub cond: Expr,
}

#[derive(Debug, Clone)]
pub struct ReturnStmt {
    pub pos: Position,
    pub values: Vec<Expr>,
    pub end: Position,
}

#[derive(Debug, Clone)]
pub struct ForStmt {
    pub pos: Position,
    pub var: Name,
    pub start: Expr,
    pub limit: Expr,
    pub step: Option<Expr>,
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct ForEachStmt {
    pub pos: Position,
    pub names: Vec<Name>,
    pub exprs: Vec<Expr>,
    pub block: Block,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Bad(Position, Position),
    Empty(Position),
    LocalAssign(LocalAssignStmt),
    LocalFunc(LocalFuncStmt),
    Func(FuncStmt),
    Label(LabelStmt),
    Expr(Expr),
    Assign(AssignStmt),
    Goto(GotoStmt),
    Break(Position),
    If(IfStmt),
    Do(Block),
    While(WhileStmt),
    Repeat(RepeatStmt),
    Return(ReturnStmt),
    For(ForStmt),
    ForEach(ForEachStmt),
}

impl Stmt {
    pub fn pos(&self) -> Position {
        match self {
            Stmt::Bad(pos, _) => pos.clone(),
            Stmt::Empty(pos) => pos.clone(),
            Stmt::LocalAssign(s) => s.pos.clone(),
            Stmt::LocalFunc(s) => s.pos.clone(),
            Stmt::Func(s) => s.pos.clone(),
            Stmt::Label(s) => s.pos.clone(),
            Stmt::Expr(e) => e.pos(),
            Stmt::Assign(s) => s.targets.first().map(|t| t.pos()).unwrap_or_default(),
            Stmt::Goto(s) => s.pos.clone(),
            Stmt::Break(pos) => pos.clone(),
            Stmt::If(s) => s.pos.clone(),
            Stmt::Do(b) => b.open.clone(),
            Stmt::While(s) => s.pos.clone(),
            Stmt::Repeat(s) => s.pos.clone(),
            Stmt::Return(s) => s.pos.clone(),
            Stmt::For(s) => s.pos.clone(),
            Stmt::ForEach(s) => s.pos.clone(),
        }
    }

    pub fn end(&self) -> Position {
        match self {
            Stmt::Bad(_, end) => end.clone(),
            Stmt::Empty(pos) => pos.offset(1),
            Stmt::LocalAssign(s) => match s.values.last() {
                Some(v) => v.end(),
                None => s.names.last().map(|n| n.end()).unwrap_or_else(|| s.pos.clone()),
            },
            Stmt::LocalFunc(s) => s.body.end(),
            Stmt::Func(s) => s.body.end(),
            Stmt::Label(s) => s.name.end().offset(2),
            Stmt::Expr(e) => e.end(),
            Stmt::Assign(s) => s.values.last().map(|v| v.end()).unwrap_or_default(),
            Stmt::Goto(s) => s.label.end(),
            Stmt::Break(pos) => pos.offset(5),
            Stmt::If(s) => s.end.offset(3),
            Stmt::Do(b) => b.close.offset(3),
            Stmt::While(s) => s.block.close.offset(3),
            Stmt::Repeat(s) => s.cond.end(),
            Stmt::Return(s) => s.end.clone(),
            Stmt::For(s) => s.block.close.offset(3),
            Stmt::ForEach(s) => s.block.close.offset(3),
        }
    }
}

/// A parsed chunk.
#[derive(Debug, Clone)]
pub struct File {
    pub filename: SmolStr,
    pub shebang: Option<String>,
    pub chunk: Block,
    /// Every comment group in source order.
    pub comments: Vec<CommentGroup>,
    /// Lead comment groups by statement start (index into `comments`).
    pub lead_comments: Vec<(Position, usize)>,
    /// Trailing same-line comment groups by statement start.
    pub line_comments: Vec<(Position, usize)>,
}

impl File {
    pub fn lead_comment(&self, stmt: &Stmt) -> Option<&CommentGroup> {
        Self::lookup(&self.lead_comments, &self.comments, &stmt.pos())
    }

    pub fn line_comment(&self, stmt: &Stmt) -> Option<&CommentGroup> {
        Self::lookup(&self.line_comments, &self.comments, &stmt.pos())
    }

    fn lookup<'a>(
        map: &[(Position, usize)],
        comments: &'a [CommentGroup],
        pos: &Position,
    ) -> Option<&'a CommentGroup> {
        map.iter()
            .find(|(p, _)| p.line == pos.line && p.column == pos.column)
            .and_then(|(_, idx)| comments.get(*idx))
    }
}
