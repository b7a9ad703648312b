mod ast;
mod error;
mod lua_operator_kind;
mod lua_token;
mod lua_token_kind;
#[allow(clippy::module_inception)]
mod parser;
mod position;
mod printer;
mod scanner;

pub use crate::compiler::parser::{
    ast::*,
    error::SyntaxError,
    lua_operator_kind::*,
    lua_token::LuaToken,
    lua_token_kind::LuaTokenKind,
    parser::{Parser, parse_chunk},
    position::{Position, chunk_id},
    printer::{print_expr, print_file, quote_string},
    scanner::{ScanConfig, Scanner},
};
