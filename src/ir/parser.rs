//! Parser for the front end's textual IR dump
//!
//! The front end lowers each C or Fortran source file to a textual dump of
//! typed, fully lowered functions. This module turns one file's dump into an
//! [`IrUnit`]: record declarations, globals, and an ordered list of
//! functions whose bodies are basic-block graphs.
//!
//! ## Accepted dialect
//!
//! ```text
//! struct pair { double lo; double hi; };
//!
//! double eps = 1.0e-9;
//!
//! double dist (double x, double y)
//! {
//!   double d;
//!
//!   <bb 2>:
//!     d = x - y;
//!     if (d < 0.0) goto <bb 3>; else goto <bb 4>;
//!
//!   <bb 3>:
//!     d = -d;
//!     goto <bb 4>;
//!
//!   <bb 4>:
//!     return d;
//! }
//! ```
//!
//! Statements are three-address form: one operation per statement, operands
//! are variables, constants, dereferences, element or field accesses.
//! Comparisons appear only in `if` transfers. Every block ends in exactly one
//! control transfer. Pointer arithmetic is measured in elements, not bytes.
//! Lines starting with `;;` or `#` are front-end commentary and are skipped.
//!
//! Parsing is two-pass with respect to labels: blocks are collected first,
//! and transfer edges (including forward references) are checked against the
//! collected set once the whole function has been scanned. Unresolved labels
//! and unresolved variable references are parse-time errors carrying the
//! enclosing function name.

use super::expr::{BinOp, CmpOp, IrExpr, IrStatement, Terminator, UnaryOp};
use super::function::{BasicBlock, GlobalInit, IrDecl, IrFunction, IrGlobal, IrUnit};
use super::types::IrType;
use crate::error::{Error, Result};
use std::collections::HashMap;

// =============================================================================
// SCANNER
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// A `<bb N>` block reference
    Block(u32),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Colon,
    Assign,
    Star,
    Amp,
    Plus,
    Minus,
    Slash,
    Percent,
    Caret,
    Pipe,
    Tilde,
    Bang,
    Dot,
    Arrow,
    Shl,
    Shr,
    EqEq,
    NotEq,
    Le,
    Ge,
    Lt,
    Gt,
    Eof,
}

impl std::fmt::Display for Tok {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "'{}'", s),
            Tok::Int(v) => write!(f, "'{}'", v),
            Tok::Float(v) => write!(f, "'{}'", v),
            Tok::Str(_) => write!(f, "string literal"),
            Tok::Block(n) => write!(f, "<bb {}>", n),
            Tok::Eof => write!(f, "end of input"),
            other => write!(f, "{:?}", other),
        }
    }
}

struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn scan(mut self) -> Result<Vec<(Tok, usize)>> {
        let mut out = Vec::new();
        loop {
            // Whitespace and commentary
            while let Some(c) = self.peek() {
                if c.is_ascii_whitespace() {
                    self.bump();
                } else if c == b'#' {
                    self.skip_line();
                } else if c == b';' && self.peek_at(1) == Some(b';') {
                    self.skip_line();
                } else {
                    break;
                }
            }
            let line = self.line;
            let Some(c) = self.peek() else {
                out.push((Tok::Eof, line));
                return Ok(out);
            };
            let tok = match c {
                b'(' => self.single(Tok::LParen),
                b')' => self.single(Tok::RParen),
                b'{' => self.single(Tok::LBrace),
                b'}' => self.single(Tok::RBrace),
                b'[' => self.single(Tok::LBracket),
                b']' => self.single(Tok::RBracket),
                b';' => self.single(Tok::Semi),
                b',' => self.single(Tok::Comma),
                b':' => self.single(Tok::Colon),
                b'*' => self.single(Tok::Star),
                b'&' => self.single(Tok::Amp),
                b'+' => self.single(Tok::Plus),
                b'/' => self.single(Tok::Slash),
                b'%' => self.single(Tok::Percent),
                b'^' => self.single(Tok::Caret),
                b'|' => self.single(Tok::Pipe),
                b'~' => self.single(Tok::Tilde),
                b'.' => self.single(Tok::Dot),
                b'-' => {
                    self.bump();
                    if self.peek() == Some(b'>') {
                        self.bump();
                        Tok::Arrow
                    } else {
                        Tok::Minus
                    }
                }
                b'=' => {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        Tok::EqEq
                    } else {
                        Tok::Assign
                    }
                }
                b'!' => {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        Tok::NotEq
                    } else {
                        Tok::Bang
                    }
                }
                b'>' => {
                    self.bump();
                    match self.peek() {
                        Some(b'=') => {
                            self.bump();
                            Tok::Ge
                        }
                        Some(b'>') => {
                            self.bump();
                            Tok::Shr
                        }
                        _ => Tok::Gt,
                    }
                }
                b'<' => self.scan_angle(line)?,
                b'"' => self.scan_string(line)?,
                b'0'..=b'9' => self.scan_number(line)?,
                c if c == b'_' || c.is_ascii_alphabetic() => self.scan_ident(),
                other => {
                    return Err(Error::syntax(
                        line,
                        format!("unexpected character '{}'", other as char),
                    ))
                }
            };
            out.push((tok, line));
        }
    }

    fn single(&mut self, tok: Tok) -> Tok {
        self.bump();
        tok
    }

    /// `<` begins either a comparison/shift or a `<bb N>` block reference
    fn scan_angle(&mut self, line: usize) -> Result<Tok> {
        let starts_block = self.peek_at(1) == Some(b'b')
            && self.peek_at(2) == Some(b'b')
            && self
                .peek_at(3)
                .map_or(false, |c| c == b' ' || c.is_ascii_digit());
        if starts_block {
            // consume "<bb", optional whitespace, digits, ">"
            self.bump();
            self.bump();
            self.bump();
            while self.peek().map_or(false, |c| c == b' ') {
                self.bump();
            }
            let mut n: u32 = 0;
            let mut digits = 0;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    n = n * 10 + (c - b'0') as u32;
                    digits += 1;
                    self.bump();
                } else {
                    break;
                }
            }
            if digits == 0 || self.peek() != Some(b'>') {
                return Err(Error::syntax(line, "malformed block label, expected <bb N>"));
            }
            self.bump();
            Ok(Tok::Block(n))
        } else {
            self.bump();
            match self.peek() {
                Some(b'=') => {
                    self.bump();
                    Ok(Tok::Le)
                }
                Some(b'<') => {
                    self.bump();
                    Ok(Tok::Shl)
                }
                _ => Ok(Tok::Lt),
            }
        }
    }

    fn scan_string(&mut self, line: usize) -> Result<Tok> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(Error::syntax(line, "unterminated string literal")),
                Some(b'"') => return Ok(Tok::Str(s)),
                Some(b'\\') => match self.bump() {
                    Some(b'n') => s.push('\n'),
                    Some(b't') => s.push('\t'),
                    Some(b'0') => s.push('\0'),
                    Some(b'\\') => s.push('\\'),
                    Some(b'"') => s.push('"'),
                    other => {
                        return Err(Error::syntax(
                            line,
                            format!("unknown escape '\\{}'", other.unwrap_or(b'?') as char),
                        ))
                    }
                },
                Some(c) => s.push(c as char),
            }
        }
    }

    fn scan_number(&mut self, line: usize) -> Result<Tok> {
        let start = self.pos;
        let mut is_float = false;
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mut ahead = 1;
            if matches!(self.peek_at(1), Some(b'+') | Some(b'-')) {
                ahead = 2;
            }
            if self.peek_at(ahead).map_or(false, |c| c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..ahead {
                    self.bump();
                }
                while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| Error::syntax(line, format!("bad float literal '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| Error::syntax(line, format!("bad integer literal '{}'", text)))
        }
    }

    fn scan_ident(&mut self) -> Tok {
        let start = self.pos;
        while self
            .peek()
            .map_or(false, |c| c == b'_' || c.is_ascii_alphanumeric())
        {
            self.bump();
        }
        Tok::Ident(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }
}

// =============================================================================
// PARSER
// =============================================================================

/// Parser for one source file's IR dump
///
/// Stateless across files: every call to [`IrParser::parse_unit`] starts from
/// an empty scope, so units from different files never observe each other.
pub struct IrParser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    records: HashMap<String, IrType>,
    globals: Vec<IrGlobal>,
    /// Name of the function currently being parsed, for diagnostics
    current_function: String,
}

/// Parse one file's IR text into a unit
///
/// A file with no function definitions (headers or constants only) yields a
/// unit with an empty function list; that is not an error.
pub fn parse_unit(src: &str) -> Result<IrUnit> {
    IrParser::new(src)?.parse_unit()
}

impl IrParser {
    /// Scan `src` and prepare a parser over its token stream
    pub fn new(src: &str) -> Result<Self> {
        Ok(Self {
            tokens: Scanner::new(src).scan()?,
            pos: 0,
            records: HashMap::new(),
            globals: Vec::new(),
            current_function: String::new(),
        })
    }

    /// Parse the whole dump
    pub fn parse_unit(mut self) -> Result<IrUnit> {
        let mut functions = Vec::new();
        while !self.at_eof() {
            if self.peek_ident("struct") && self.is_record_definition() {
                self.parse_record()?;
                continue;
            }
            let ty = self.parse_type()?;
            let line = self.line();
            let name = self.expect_ident()?;
            if self.peek_tok() == &Tok::LParen {
                if let Some(function) = self.parse_function(ty, name)? {
                    functions.push(function);
                }
            } else {
                self.parse_global(ty, name, line)?;
            }
        }
        Ok(IrUnit {
            functions,
            globals: self.globals,
            records: self.records,
        })
    }

    // -------------------------------------------------------------------------
    // Token plumbing
    // -------------------------------------------------------------------------

    fn peek_tok(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn peek_tok_at(&self, ahead: usize) -> &Tok {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].0
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn bump(&mut self) -> Tok {
        let tok = self.peek_tok().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_tok(), Tok::Eof)
    }

    fn peek_ident(&self, word: &str) -> bool {
        matches!(self.peek_tok(), Tok::Ident(s) if s == word)
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.peek_ident(word) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        if self.peek_tok() == &tok {
            self.bump();
            Ok(())
        } else {
            Err(Error::syntax(
                self.line(),
                format!("expected {}, got {}", tok, self.peek_tok()),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.bump() {
            Tok::Ident(s) => Ok(s),
            other => Err(Error::syntax(
                self.line(),
                format!("expected identifier, got {}", other),
            )),
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<()> {
        if self.eat_ident(word) {
            Ok(())
        } else {
            Err(Error::syntax(
                self.line(),
                format!("expected '{}', got {}", word, self.peek_tok()),
            ))
        }
    }

    fn expect_block(&mut self) -> Result<u32> {
        match self.bump() {
            Tok::Block(n) => Ok(n),
            other => Err(Error::syntax(
                self.line(),
                format!("expected block label, got {}", other),
            )),
        }
    }

    // -------------------------------------------------------------------------
    // Declarations
    // -------------------------------------------------------------------------

    /// `struct name { ... }` introduces a record; `struct name var` uses it
    fn is_record_definition(&self) -> bool {
        matches!(self.peek_tok_at(1), Tok::Ident(_)) && self.peek_tok_at(2) == &Tok::LBrace
    }

    fn parse_record(&mut self) -> Result<()> {
        self.expect_keyword("struct")?;
        let name = self.expect_ident()?;
        self.expect(Tok::LBrace)?;
        let mut fields = Vec::new();
        while self.peek_tok() != &Tok::RBrace {
            let ty = self.parse_type()?;
            let field = self.expect_ident()?;
            let ty = self.parse_array_suffix(ty)?;
            self.expect(Tok::Semi)?;
            fields.push((field, ty));
        }
        self.expect(Tok::RBrace)?;
        self.expect(Tok::Semi)?;
        self.records
            .insert(name.clone(), IrType::Record { name, fields });
        Ok(())
    }

    /// Base type plus any pointer suffixes. Qualifiers (`static`, `const`,
    /// `extern`) are accepted and ignored.
    fn parse_type(&mut self) -> Result<IrType> {
        while self.eat_ident("static") || self.eat_ident("const") || self.eat_ident("extern") {}
        let line = self.line();
        let mut ty = if self.eat_ident("void") {
            IrType::Void
        } else if self.eat_ident("float") {
            IrType::Float { width: 32 }
        } else if self.eat_ident("double") {
            IrType::Float { width: 64 }
        } else if self.eat_ident("struct") {
            let name = self.expect_ident()?;
            self.records.get(&name).cloned().ok_or_else(|| {
                Error::syntax(line, format!("reference to undeclared record '{}'", name))
            })?
        } else {
            let signed = if self.eat_ident("unsigned") {
                false
            } else {
                self.eat_ident("signed");
                true
            };
            let width = if self.eat_ident("char") {
                8
            } else if self.eat_ident("short") {
                self.eat_ident("int");
                16
            } else if self.eat_ident("long") {
                self.eat_ident("int");
                64
            } else if self.eat_ident("int") {
                32
            } else if !signed {
                32 // bare "unsigned"
            } else {
                return Err(Error::syntax(
                    line,
                    format!("expected type, got {}", self.peek_tok()),
                ));
            };
            IrType::Int { width, signed }
        };
        while self.peek_tok() == &Tok::Star {
            self.bump();
            ty = IrType::Pointer(Box::new(ty));
        }
        Ok(ty)
    }

    /// `name[N]` suffixes on declarations turn the type into an array
    fn parse_array_suffix(&mut self, mut ty: IrType) -> Result<IrType> {
        let mut lengths = Vec::new();
        while self.peek_tok() == &Tok::LBracket {
            self.bump();
            let line = self.line();
            match self.bump() {
                Tok::Int(n) if n > 0 => lengths.push(n as usize),
                other => {
                    return Err(Error::syntax(
                        line,
                        format!("expected array length, got {}", other),
                    ))
                }
            }
            self.expect(Tok::RBracket)?;
        }
        for length in lengths.into_iter().rev() {
            ty = IrType::Array {
                element: Box::new(ty),
                length,
            };
        }
        Ok(ty)
    }

    fn parse_global(&mut self, ty: IrType, name: String, line: usize) -> Result<()> {
        let ty = self.parse_array_suffix(ty)?;
        let init = if self.peek_tok() == &Tok::Assign {
            self.bump();
            let neg = self.peek_tok() == &Tok::Minus;
            if neg {
                self.bump();
            }
            Some(match self.bump() {
                Tok::Int(v) => GlobalInit::Int(if neg { -v } else { v }),
                Tok::Float(v) => GlobalInit::Float(if neg { -v } else { v }),
                Tok::Str(s) if !neg => GlobalInit::Str(s),
                other => {
                    return Err(Error::syntax(
                        line,
                        format!("unsupported global initializer {}", other),
                    ))
                }
            })
        } else {
            None
        };
        self.expect(Tok::Semi)?;
        self.globals.push(IrGlobal {
            decl: IrDecl::new(name, ty),
            init,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Functions
    // -------------------------------------------------------------------------

    /// Returns `None` for prototypes (declaration without a body)
    fn parse_function(&mut self, return_type: IrType, name: String) -> Result<Option<IrFunction>> {
        self.expect(Tok::LParen)?;
        let mut params = Vec::new();
        if self.peek_tok() != &Tok::RParen {
            if self.peek_ident("void") && self.peek_tok_at(1) == &Tok::RParen {
                self.bump();
            } else {
                loop {
                    let ty = self.parse_type()?;
                    // Prototypes may omit parameter names
                    let pname = match self.peek_tok() {
                        Tok::Ident(_) => self.expect_ident()?,
                        _ => String::new(),
                    };
                    params.push(IrDecl::new(pname, ty));
                    if self.peek_tok() == &Tok::Comma {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        self.expect(Tok::RParen)?;

        if self.peek_tok() == &Tok::Semi {
            self.bump();
            return Ok(None); // prototype only
        }

        for (i, p) in params.iter().enumerate() {
            if p.name.is_empty() {
                return Err(Error::syntax(
                    self.line(),
                    format!("parameter {} of '{}' has no name", i + 1, name),
                ));
            }
        }

        self.current_function = name.clone();
        self.expect(Tok::LBrace)?;

        // Local declarations come before the first block label.
        let mut locals = Vec::new();
        while !matches!(self.peek_tok(), Tok::Block(_)) && self.peek_tok() != &Tok::RBrace {
            let ty = self.parse_type()?;
            let lname = self.expect_ident()?;
            let ty = self.parse_array_suffix(ty)?;
            self.expect(Tok::Semi)?;
            locals.push(IrDecl::new(lname, ty));
        }

        // Snapshot globals so the scope does not hold a borrow of the
        // parser across the block loop below.
        let globals = self.globals.clone();
        let scope = Scope {
            params: &params,
            locals: &locals,
            globals: &globals,
        };

        let mut blocks = Vec::new();
        while let Tok::Block(id) = self.peek_tok().clone() {
            self.bump();
            self.expect(Tok::Colon)?;
            blocks.push(self.parse_block(id, &scope)?);
        }
        self.expect(Tok::RBrace)?;

        let entry = blocks.first().map(|b| b.id).unwrap_or(0);
        let function = IrFunction {
            name,
            params,
            return_type,
            locals,
            blocks,
            entry,
        };
        // Second pass: forward label references and reachability.
        function.validate_graph()?;
        self.current_function.clear();
        Ok(Some(function))
    }

    fn parse_block(&mut self, id: u32, scope: &Scope<'_>) -> Result<BasicBlock> {
        let mut statements = Vec::new();
        loop {
            match self.peek_tok() {
                Tok::Block(_) | Tok::RBrace => {
                    return Err(Error::MalformedGraph {
                        function: self.current_function.clone(),
                        message: format!("block <bb {}> has no control transfer", id),
                    });
                }
                _ => {}
            }
            if let Some(terminator) = self.try_parse_terminator(scope)? {
                return Ok(BasicBlock {
                    id,
                    statements,
                    terminator,
                });
            }
            statements.push(self.parse_statement(scope)?);
        }
    }

    fn try_parse_terminator(&mut self, scope: &Scope<'_>) -> Result<Option<Terminator>> {
        if self.eat_ident("goto") {
            let target = self.expect_block()?;
            self.expect(Tok::Semi)?;
            return Ok(Some(Terminator::Goto(target)));
        }
        if self.eat_ident("return") {
            let value = if self.peek_tok() == &Tok::Semi {
                None
            } else {
                Some(self.parse_operand(scope)?)
            };
            self.expect(Tok::Semi)?;
            return Ok(Some(Terminator::Return(value)));
        }
        if self.eat_ident("if") {
            self.expect(Tok::LParen)?;
            let lhs = self.parse_operand(scope)?;
            let cmp = self.parse_cmp_op()?;
            let rhs = self.parse_operand(scope)?;
            self.expect(Tok::RParen)?;
            self.expect_keyword("goto")?;
            let then_block = self.expect_block()?;
            self.expect(Tok::Semi)?;
            self.expect_keyword("else")?;
            self.expect_keyword("goto")?;
            let else_block = self.expect_block()?;
            self.expect(Tok::Semi)?;
            return Ok(Some(Terminator::CondGoto {
                lhs,
                cmp,
                rhs,
                then_block,
                else_block,
            }));
        }
        if self.eat_ident("switch") {
            self.expect(Tok::LParen)?;
            let value = self.parse_operand(scope)?;
            self.expect(Tok::RParen)?;
            self.expect(Tok::LBrace)?;
            let mut cases = Vec::new();
            let mut default = None;
            loop {
                if self.eat_ident("case") {
                    let line = self.line();
                    let neg = self.peek_tok() == &Tok::Minus;
                    if neg {
                        self.bump();
                    }
                    let v = match self.bump() {
                        Tok::Int(v) => {
                            if neg {
                                -v
                            } else {
                                v
                            }
                        }
                        other => {
                            return Err(Error::syntax(
                                line,
                                format!("expected case value, got {}", other),
                            ))
                        }
                    };
                    self.expect(Tok::Colon)?;
                    self.expect_keyword("goto")?;
                    let target = self.expect_block()?;
                    self.expect(Tok::Semi)?;
                    cases.push((v, target));
                } else if self.eat_ident("default") {
                    self.expect(Tok::Colon)?;
                    self.expect_keyword("goto")?;
                    default = Some(self.expect_block()?);
                    self.expect(Tok::Semi)?;
                } else {
                    break;
                }
            }
            self.expect(Tok::RBrace)?;
            let default = default.ok_or_else(|| {
                Error::syntax(self.line(), "switch without a default transfer")
            })?;
            return Ok(Some(Terminator::Switch {
                value,
                cases,
                default,
            }));
        }
        Ok(None)
    }

    fn parse_cmp_op(&mut self) -> Result<CmpOp> {
        let line = self.line();
        match self.bump() {
            Tok::EqEq => Ok(CmpOp::Eq),
            Tok::NotEq => Ok(CmpOp::Ne),
            Tok::Lt => Ok(CmpOp::Lt),
            Tok::Le => Ok(CmpOp::Le),
            Tok::Gt => Ok(CmpOp::Gt),
            Tok::Ge => Ok(CmpOp::Ge),
            other => Err(Error::syntax(
                line,
                format!("expected comparison operator, got {}", other),
            )),
        }
    }

    // -------------------------------------------------------------------------
    // Statements
    // -------------------------------------------------------------------------

    fn parse_statement(&mut self, scope: &Scope<'_>) -> Result<IrStatement> {
        // Bare call statement: `callee (args);`
        if matches!(self.peek_tok(), Tok::Ident(_)) && self.peek_tok_at(1) == &Tok::LParen {
            let callee = self.expect_ident()?;
            let args = self.parse_call_args(scope)?;
            self.expect(Tok::Semi)?;
            return Ok(IrStatement::Call { callee, args });
        }

        let target = self.parse_place(scope)?;
        self.expect(Tok::Assign)?;
        let value = self.parse_rhs(scope, &target)?;
        self.expect(Tok::Semi)?;
        Ok(IrStatement::Assign { target, value })
    }

    /// Right-hand side of an assignment: one operation, a cast, a call, or a
    /// plain operand
    fn parse_rhs(&mut self, scope: &Scope<'_>, target: &IrExpr) -> Result<IrExpr> {
        // Cast: `(type) operand`
        if self.peek_tok() == &Tok::LParen {
            self.bump();
            let to = self.parse_type()?;
            self.expect(Tok::RParen)?;
            let value = self.parse_operand(scope)?;
            return Ok(IrExpr::Cast {
                to,
                value: Box::new(value),
            });
        }
        // Call: `callee (args)`
        if matches!(self.peek_tok(), Tok::Ident(_)) && self.peek_tok_at(1) == &Tok::LParen {
            let callee = self.expect_ident()?;
            let args = self.parse_call_args(scope)?;
            return Ok(IrExpr::Call { callee, args });
        }
        // Unary: `-x`, `~x`, `!x` (negative literals fold into constants)
        if matches!(self.peek_tok(), Tok::Minus | Tok::Tilde | Tok::Bang)
            && !matches!(self.peek_tok_at(1), Tok::Int(_) | Tok::Float(_))
        {
            let op = match self.bump() {
                Tok::Minus => UnaryOp::Neg,
                Tok::Tilde => UnaryOp::BitNot,
                _ => UnaryOp::Not,
            };
            let operand = self.parse_operand(scope)?;
            let ty = self
                .operand_type(&operand, scope)
                .unwrap_or_else(IrType::int64);
            return Ok(IrExpr::Unary {
                op,
                ty,
                operand: Box::new(operand),
            });
        }

        let lhs = self.parse_operand(scope)?;
        let op = match self.peek_tok() {
            Tok::Plus => Some(BinOp::Add),
            Tok::Minus => Some(BinOp::Sub),
            Tok::Star => Some(BinOp::Mul),
            Tok::Slash => Some(BinOp::Div),
            Tok::Percent => Some(BinOp::Rem),
            Tok::Amp => Some(BinOp::And),
            Tok::Pipe => Some(BinOp::Or),
            Tok::Caret => Some(BinOp::Xor),
            Tok::Shl => Some(BinOp::Shl),
            Tok::Shr => Some(BinOp::Shr),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(lhs);
        };
        self.bump();
        let rhs = self.parse_operand(scope)?;
        // The operation's type comes from its operands, falling back to the
        // assignment target for constant-only expressions.
        let ty = self
            .operand_type(&lhs, scope)
            .or_else(|| self.operand_type(&rhs, scope))
            .or_else(|| self.operand_type(target, scope))
            .unwrap_or_else(IrType::int64);
        Ok(IrExpr::Binary {
            op,
            ty,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_call_args(&mut self, scope: &Scope<'_>) -> Result<Vec<IrExpr>> {
        self.expect(Tok::LParen)?;
        let mut args = Vec::new();
        if self.peek_tok() != &Tok::RParen {
            loop {
                args.push(self.parse_operand(scope)?);
                if self.peek_tok() == &Tok::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;
        Ok(args)
    }

    // -------------------------------------------------------------------------
    // Operands and places
    // -------------------------------------------------------------------------

    /// A place: something assignable. `x`, `*p`, `a[i]`, `s.f`, `p->f`.
    fn parse_place(&mut self, scope: &Scope<'_>) -> Result<IrExpr> {
        if self.peek_tok() == &Tok::Star {
            self.bump();
            let base = self.parse_place(scope)?;
            return Ok(IrExpr::Deref(Box::new(base)));
        }
        let line = self.line();
        let name = self.expect_ident()?;
        let mut expr = self.resolve_var(name, scope, line)?;
        loop {
            match self.peek_tok() {
                Tok::LBracket => {
                    self.bump();
                    let index = self.parse_operand(scope)?;
                    self.expect(Tok::RBracket)?;
                    expr = IrExpr::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Tok::Dot => {
                    self.bump();
                    let field = self.expect_ident()?;
                    expr = self.resolve_field(expr, field, scope)?;
                }
                Tok::Arrow => {
                    self.bump();
                    let field = self.expect_ident()?;
                    let base = IrExpr::Deref(Box::new(expr));
                    expr = self.resolve_field(base, field, scope)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_operand(&mut self, scope: &Scope<'_>) -> Result<IrExpr> {
        match self.peek_tok().clone() {
            Tok::Int(v) => {
                self.bump();
                Ok(IrExpr::IntConst(v))
            }
            Tok::Float(v) => {
                self.bump();
                Ok(IrExpr::FloatConst(v))
            }
            Tok::Str(s) => {
                self.bump();
                Ok(IrExpr::StrConst(s))
            }
            Tok::Minus => {
                self.bump();
                let line = self.line();
                match self.bump() {
                    Tok::Int(v) => Ok(IrExpr::IntConst(-v)),
                    Tok::Float(v) => Ok(IrExpr::FloatConst(-v)),
                    other => Err(Error::syntax(
                        line,
                        format!("expected literal after '-', got {}", other),
                    )),
                }
            }
            Tok::Amp => {
                self.bump();
                let place = self.parse_place(scope)?;
                Ok(IrExpr::AddrOf(Box::new(place)))
            }
            Tok::Star | Tok::Ident(_) => self.parse_place(scope),
            other => Err(Error::syntax(
                self.line(),
                format!("expected operand, got {}", other),
            )),
        }
    }

    fn resolve_var(&self, name: String, scope: &Scope<'_>, _line: usize) -> Result<IrExpr> {
        if scope.lookup(&name).is_some() {
            Ok(IrExpr::Var(name))
        } else {
            Err(Error::UnresolvedSymbol {
                symbol: name,
                function: self.current_function.clone(),
            })
        }
    }

    fn resolve_field(&self, base: IrExpr, field: String, scope: &Scope<'_>) -> Result<IrExpr> {
        let base_ty = self.operand_type(&base, scope).ok_or_else(|| {
            Error::UnresolvedSymbol {
                symbol: field.clone(),
                function: self.current_function.clone(),
            }
        })?;
        let (offset, ty) = base_ty.field_offset(&field).ok_or_else(|| {
            Error::UnresolvedSymbol {
                symbol: format!("{}.{}", base_ty, field),
                function: self.current_function.clone(),
            }
        })?;
        Ok(IrExpr::Field {
            base: Box::new(base),
            field,
            offset,
            ty: ty.clone(),
        })
    }

    /// Static type of an operand, where one is determined by declarations.
    /// Integer literals have no inherent width; they adopt their use site's.
    fn operand_type(&self, expr: &IrExpr, scope: &Scope<'_>) -> Option<IrType> {
        match expr {
            IrExpr::IntConst(_) => None,
            IrExpr::FloatConst(_) => Some(IrType::double()),
            IrExpr::StrConst(_) => Some(IrType::Pointer(Box::new(IrType::char8()))),
            IrExpr::Var(name) => scope.lookup(name).cloned(),
            IrExpr::Deref(base) => self
                .operand_type(base, scope)
                .and_then(|t| t.element().cloned()),
            IrExpr::Index { base, .. } => self
                .operand_type(base, scope)
                .and_then(|t| t.element().cloned()),
            IrExpr::AddrOf(place) => self
                .operand_type(place, scope)
                .map(|t| IrType::Pointer(Box::new(t))),
            IrExpr::Field { ty, .. } => Some(ty.clone()),
            IrExpr::Unary { ty, .. } | IrExpr::Binary { ty, .. } => Some(ty.clone()),
            IrExpr::Cast { to, .. } => Some(to.clone()),
            IrExpr::Call { .. } => None,
        }
    }
}

/// Name resolution environment for one function body
struct Scope<'a> {
    params: &'a [IrDecl],
    locals: &'a [IrDecl],
    globals: &'a [IrGlobal],
}

impl Scope<'_> {
    fn lookup(&self, name: &str) -> Option<&IrType> {
        self.params
            .iter()
            .chain(self.locals.iter())
            .map(|d| (&d.name, &d.ty))
            .chain(self.globals.iter().map(|g| (&g.decl.name, &g.decl.ty)))
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, ty)| ty)
    }
}
