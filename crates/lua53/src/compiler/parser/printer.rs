//! Renders a syntax tree back to Lua source. The output re-parses to a tree
//! of the same shape; comments are emitted next to the statements they are
//! attached to and floating groups in source order.

use crate::compiler::parser::ast::*;
use crate::compiler::parser::lua_operator_kind::UnaryOperator;

const INDENT: &str = "    ";

pub fn print_file(file: &File) -> String {
    let mut printer = Printer {
        out: String::new(),
        indent: 0,
        file,
        printed: vec![false; file.comments.len()],
        open_expr: false,
    };
    if let Some(shebang) = &file.shebang {
        printer.out.push_str(shebang);
        printer.out.push('\n');
    }
    printer.block(&file.chunk);
    printer.flush_comments(None);
    printer.out
}

/// Renders one expression with no surrounding context.
pub fn print_expr(expr: &Expr) -> String {
    let file = File {
        filename: Default::default(),
        shebang: None,
        chunk: Block {
            open: Default::default(),
            close: Default::default(),
            stmts: Vec::new(),
        },
        comments: Vec::new(),
        lead_comments: Vec::new(),
        line_comments: Vec::new(),
    };
    let mut printer = Printer {
        out: String::new(),
        indent: 0,
        file: &file,
        printed: Vec::new(),
        open_expr: false,
    };
    printer.expr(expr);
    printer.out
}

struct Printer<'a> {
    out: String,
    indent: usize,
    file: &'a File,
    printed: Vec<bool>,
    /// The last statement ended with an expression.
    open_expr: bool,
}

impl Printer<'_> {
    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
    }

    fn start_line(&mut self) {
        if self.out.is_empty() || self.out.ends_with('\n') {
            for _ in 0..self.indent {
                self.out.push_str(INDENT);
            }
        } else {
            self.newline();
        }
    }

    fn comment_group(&mut self, idx: usize) {
        if self.printed.get(idx).copied().unwrap_or(true) {
            return;
        }
        self.printed[idx] = true;
        let group = &self.file.comments[idx];
        for comment in &group.list {
            self.start_line();
            self.out.push_str(&comment.text);
        }
    }

    /// Emits the groups that start before `limit` and are not attached as a
    /// line comment to a later statement.
    fn flush_comments(&mut self, limit: Option<&Stmt>) {
        let line_attached: Vec<usize> = self.file.line_comments.iter().map(|(_, i)| *i).collect();
        for idx in 0..self.file.comments.len() {
            if self.printed[idx] {
                continue;
            }
            if let Some(stmt) = limit {
                let group_pos = self.file.comments[idx].pos();
                if !group_pos.precedes(&stmt.pos()) || line_attached.contains(&idx) {
                    continue;
                }
            }
            self.comment_group(idx);
        }
    }

    fn block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.flush_comments(Some(stmt));
            self.stmt(stmt);
        }
    }

    fn nested_block(&mut self, block: &Block) {
        self.indent += 1;
        self.open_expr = false;
        self.block(block);
        self.indent -= 1;
        self.open_expr = false;
    }

    fn stmt(&mut self, stmt: &Stmt) {
        self.start_line();
        let mark = self.out.len();
        match stmt {
            Stmt::Bad(..) => self.out.push_str("--[[bad statement]]"),
            Stmt::Empty(_) => self.out.push(';'),
            Stmt::LocalAssign(s) => {
                self.out.push_str("local ");
                self.names(&s.names);
                if !s.values.is_empty() {
                    self.out.push_str(" = ");
                    self.expr_list(&s.values);
                }
            }
            Stmt::LocalFunc(s) => {
                self.out.push_str("local function ");
                self.out.push_str(&s.name.name);
                self.func_body(&s.body);
            }
            Stmt::Func(s) => {
                self.out.push_str("function ");
                self.expr(&s.target);
                if let Some(method) = &s.method {
                    self.out.push(':');
                    self.out.push_str(&method.name);
                }
                self.func_body(&s.body);
            }
            Stmt::Label(s) => {
                self.out.push_str("::");
                self.out.push_str(&s.name.name);
                self.out.push_str("::");
            }
            Stmt::Expr(e) => self.expr(e),
            Stmt::Assign(s) => {
                self.expr_list(&s.targets);
                self.out.push_str(" = ");
                self.expr_list(&s.values);
            }
            Stmt::Goto(s) => {
                self.out.push_str("goto ");
                self.out.push_str(&s.label.name);
            }
            Stmt::Break(_) => self.out.push_str("break"),
            Stmt::If(s) => {
                self.out.push_str("if ");
                self.expr(&s.cond);
                self.out.push_str(" then");
                self.nested_block(&s.then_block);
                for branch in &s.else_ifs {
                    self.start_line();
                    self.out.push_str("elseif ");
                    self.expr(&branch.cond);
                    self.out.push_str(" then");
                    self.nested_block(&branch.block);
                }
                if let Some(block) = &s.else_block {
                    self.start_line();
                    self.out.push_str("else");
                    self.nested_block(block);
                }
                self.start_line();
                self.out.push_str("end");
            }
            Stmt::Do(block) => {
                self.out.push_str("do");
                self.nested_block(block);
                self.start_line();
                self.out.push_str("end");
            }
            Stmt::While(s) => {
                self.out.push_str("while ");
                self.expr(&s.cond);
                self.out.push_str(" do");
                self.nested_block(&s.block);
                self.start_line();
                self.out.push_str("end");
            }
            Stmt::Repeat(s) => {
                self.out.push_str("repeat");
                self.nested_block(&s.block);
                self.start_line();
                self.out.push_str("until ");
                self.expr(&s.cond);
            }
            Stmt::Return(s) => {
                self.out.push_str("return");
                if !s.values.is_empty() {
                    self.out.push(' ');
                    self.expr_list(&s.values);
                }
            }
            Stmt::For(s) => {
                self.out.push_str("for ");
                self.out.push_str(&s.var.name);
                self.out.push_str(" = ");
                self.expr(&s.start);
                self.out.push_str(", ");
                self.expr(&s.limit);
                if let Some(step) = &s.step {
                    self.out.push_str(", ");
                    self.expr(step);
                }
                self.out.push_str(" do");
                self.nested_block(&s.block);
                self.start_line();
                self.out.push_str("end");
            }
            Stmt::ForEach(s) => {
                self.out.push_str("for ");
                self.names(&s.names);
                self.out.push_str(" in ");
                self.expr_list(&s.exprs);
                self.out.push_str(" do");
                self.nested_block(&s.block);
                self.start_line();
                self.out.push_str("end");
            }
        }
        // A statement opening with `(` would continue the previous expression.
        if self.open_expr && self.out[mark..].starts_with('(') {
            self.out.insert(mark, ';');
        }
        self.open_expr = match stmt {
            Stmt::LocalAssign(s) => !s.values.is_empty(),
            Stmt::Expr(_) | Stmt::Assign(_) | Stmt::Repeat(_) => true,
            _ => false,
        };
        if let Some(idx) = self.line_comment_index(stmt) {
            if !self.printed[idx] {
                self.printed[idx] = true;
                let text = self.file.comments[idx].text();
                let mut lines = text.lines();
                if let Some(first) = lines.next() {
                    self.out.push(' ');
                    self.out.push_str(first);
                }
                for rest in lines {
                    self.start_line();
                    self.out.push_str(rest);
                }
            }
        }
        self.out.push('\n');
    }

    fn line_comment_index(&self, stmt: &Stmt) -> Option<usize> {
        let pos = stmt.pos();
        self.file
            .line_comments
            .iter()
            .find(|(p, _)| p.line == pos.line && p.column == pos.column)
            .map(|(_, idx)| *idx)
    }

    fn names(&mut self, names: &[Name]) {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.out.push_str(&name.name);
        }
    }

    fn expr_list(&mut self, exprs: &[Expr]) {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(e);
        }
    }

    fn func_body(&mut self, body: &FuncBody) {
        self.out.push('(');
        self.names(&body.params.names);
        if body.params.vararg {
            if !body.params.names.is_empty() {
                self.out.push_str(", ");
            }
            self.out.push_str("...");
        }
        self.out.push(')');
        self.nested_block(&body.block);
        self.start_line();
        self.out.push_str("end");
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Bad(..) => self.out.push_str("nil --[[bad expression]]"),
            Expr::Name(n) => self.out.push_str(&n.name),
            Expr::Vararg(_) => self.out.push_str("..."),
            Expr::BasicLit(lit) => self.literal(lit),
            Expr::FuncLit(f) => {
                self.out.push_str("function");
                self.func_body(&f.body);
            }
            Expr::TableLit(t) => {
                if t.fields.is_empty() {
                    self.out.push_str("{}");
                    return;
                }
                self.out.push('{');
                for (i, field) in t.fields.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(field);
                }
                self.out.push('}');
            }
            Expr::ParenExpr(p) => {
                self.out.push('(');
                self.expr(&p.inner);
                self.out.push(')');
            }
            Expr::SelectorExpr(s) => {
                self.expr(&s.object);
                self.out.push('.');
                self.out.push_str(&s.field.name);
            }
            Expr::IndexExpr(i) => {
                self.expr(&i.object);
                self.out.push('[');
                self.expr(&i.key);
                self.out.push(']');
            }
            Expr::CallExpr(c) => {
                self.expr(&c.func);
                if let Some(method) = &c.method {
                    self.out.push(':');
                    self.out.push_str(&method.name);
                }
                self.out.push('(');
                self.expr_list(&c.args);
                self.out.push(')');
            }
            Expr::UnaryExpr(u) => {
                self.out.push_str(u.op.symbol());
                if u.op == UnaryOperator::OpNot {
                    self.out.push(' ');
                } else {
                    let mark = self.out.len();
                    self.expr(&u.operand);
                    // `- -x` must not turn into a comment
                    if self.out[mark..].starts_with('-') {
                        self.out.insert(mark, ' ');
                    }
                    return;
                }
                self.expr(&u.operand);
            }
            Expr::BinaryExpr(b) => {
                self.expr(&b.left);
                self.out.push(' ');
                self.out.push_str(b.op.symbol());
                self.out.push(' ');
                self.expr(&b.right);
            }
            Expr::KeyValueExpr(kv) => {
                match (&kv.key, kv.bracketed) {
                    (Expr::BasicLit(BasicLit { value: LitValue::String(s), .. }), false) => {
                        self.out.push_str(&String::from_utf8_lossy(s));
                    }
                    _ => {
                        self.out.push('[');
                        let mark = self.out.len();
                        self.expr(&kv.key);
                        // `[[` would open a long string
                        if self.out[mark..].starts_with('[') {
                            self.out.insert(mark, ' ');
                        }
                        self.out.push(']');
                    }
                }
                self.out.push_str(" = ");
                self.expr(&kv.value);
            }
        }
    }

    fn literal(&mut self, lit: &BasicLit) {
        match &lit.value {
            LitValue::Nil => self.out.push_str("nil"),
            LitValue::True => self.out.push_str("true"),
            LitValue::False => self.out.push_str("false"),
            LitValue::Integer(i) if lit.raw.is_empty() => {
                self.out.push_str(itoa::Buffer::new().format(*i));
            }
            LitValue::Float(f) if lit.raw.is_empty() => self.out.push_str(&float_literal(*f)),
            LitValue::Integer(_) | LitValue::Float(_) => self.out.push_str(&lit.raw),
            LitValue::String(bytes) => quote_string(&mut self.out, bytes),
        }
    }
}

fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "(0/0)".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "1e9999".to_string() } else { "-1e9999".to_string() }
    } else if f == f.trunc() && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{:e}", f)
    }
}

/// Writes `bytes` as a double-quoted Lua string literal.
pub fn quote_string(out: &mut String, bytes: &[u8]) {
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parser::parse_chunk;
    use crate::compiler::parser::scanner::ScanConfig;

    fn round_trip(src: &str) -> String {
        let config = ScanConfig {
            scan_comments: true,
        };
        let first = parse_chunk(src.as_bytes(), "=p", config).unwrap();
        let printed = print_file(&first);
        let second = parse_chunk(printed.as_bytes(), "=p", config).unwrap();
        let reprinted = print_file(&second);
        assert_eq!(printed, reprinted);
        printed
    }

    #[test]
    fn test_print_stable() {
        let src = r#"
local a, b = 1, 0x10
local function f(x, ...)
  return x .. "\n\0" , ...
end
function t.a:m(y) return - -y, not y, #y, ~y end
t[ [[k]] ] = {1, 2; x = 3, [4] = 5}
if a then f() elseif b then g() else h() end
while a < b do a = a + 1 end
repeat local z = 1 until z
for i = 1, 10, 2 do break end
for k, v in pairs(t) do goto next ::next:: end
f{1}; (f)()
do return end
"#;
        let printed = round_trip(src);
        assert!(printed.contains("return - -y, not y, #y, ~y"));
        assert!(printed.contains(";\n(f)()"));
        assert!(printed.contains("\"\\n\\000\""));
    }

    #[test]
    fn test_print_comments() {
        let src = "-- header\n\n-- lead\nlocal x = 1 -- tail\nreturn x\n-- footer\n";
        let printed = round_trip(src);
        assert_eq!(
            printed,
            "-- header\n-- lead\nlocal x = 1 -- tail\nreturn x\n-- footer"
        );
    }
}
