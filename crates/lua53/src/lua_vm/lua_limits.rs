//! Centralized limits of the compiler and the VM.
//!
//! Mirrors Lua 5.3's `luaconf.h` / `llimits.h`. Every magic number that
//! shapes code generation or execution lives here.

// ===== Registers and scopes =====

/// Maximum number of registers in a Lua function (must fit in 8 bits).
pub const MAXREGS: u32 = 255;

/// Maximum number of local variables per function.
pub const MAXVARS: usize = 200;

/// Maximum number of upvalues per function.
pub const MAXUPVAL: usize = 255;

/// Maximum index for an R/K operand holding a constant.
pub const MAXINDEXRK: u32 = 255;

/// Marks an R/K operand as a constant index.
pub const BITRK: u32 = 1 << 8;

/// Maximum nesting of native-to-Lua calls.
pub const MAXCCALLS: usize = 200;

/// Maximum nesting of syntactic constructs. Parsing, folding and code
/// generation all recurse over the tree, so this bounds the native stack
/// they need; it must fit a 2 MB thread in unoptimized builds.
pub const MAX_SYNTAX_LEVELS: usize = 50;

/// Number of list items flushed per SETLIST.
pub const LFIELDS_PER_FLUSH: u32 = 50;

// ===== Expressions =====

/// Priority of unary operators.
pub const UNARY_PRIORITY: u8 = 12;

// ===== Runtime =====

/// Default maximum number of stack slots per coroutine.
pub const LUAI_MAXSTACK: usize = 1_000_000;

/// Default maximum number of active Lua frames per coroutine.
pub const MAX_CALL_DEPTH: usize = 200_000;

/// Maximum length of `__index` / `__newindex` chains.
pub const MAX_META_DEPTH: usize = 64;

/// Minimum stack size of any prototype.
pub const MIN_STACK_SIZE: u8 = 2;

/// Maximum length of a source name in messages.
pub const LUA_IDSIZE: usize = 60;

// ===== Pattern matching =====

/// Maximum number of captures in a pattern.
pub const LUA_MAXCAPTURES: usize = 32;

/// Upper bound of backtracking steps for a single match attempt.
pub const MAX_MATCH_STEPS: usize = 10_000_000;

// ===== Strings =====

/// Strings up to this length are dumped with the short string tag.
pub const LUAI_MAXSHORTLEN: usize = 40;

/// Maximum size of a string built by the library (1 GB).
pub const MAX_STRING_SIZE: usize = 1 << 30;
