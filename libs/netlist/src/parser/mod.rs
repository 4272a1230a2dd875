//! Netlist parser.
//!
//! Parsing is a single pass over logical lines. A stack of open subcircuit
//! frames tracks nesting; reaching the end of input with an open frame is an error.
//! The resulting AST is converted into a [`NetlistDocument`] by [`conv`], which
//! resolves instance masters and checks port counts.

mod conv;

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use arcstr::{ArcStr, Substr};
use indexmap::IndexMap;
use nom::bytes::complete::{take_till, take_while};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{fold_name, DeviceKind, NetlistDocument, Params, Primitive};

use self::conv::DocumentBuilder;

/// The netlist dialect to parse.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Vanilla SPICE.
    ///
    /// Selected by default.
    #[default]
    Spice,
    /// CDL.
    Cdl,
    /// Spectre.
    Spectre,
}

/// Parses netlists.
#[derive(Clone, Debug)]
pub struct Parser {
    dialect: Dialect,
    buffer: Vec<Token>,
    buffer_line: usize,
    ast: Ast,
    state: ParserState,
}

#[derive(Clone, Default, Debug)]
struct ParserState {
    include_stack: Vec<PathBuf>,
    origin: Option<PathBuf>,
    open: Vec<Subckt>,
}

/// An error parsing a netlist dialect from a string.
#[derive(Copy, Clone, Debug, Error)]
#[error("error parsing netlist dialect")]
pub struct ParseDialectError;

impl Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spice => write!(f, "spice"),
            Self::Cdl => write!(f, "cdl"),
            Self::Spectre => write!(f, "spectre"),
        }
    }
}

impl FromStr for Dialect {
    type Err = ParseDialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spice" | "sp" => Ok(Self::Spice),
            "cdl" => Ok(Self::Cdl),
            "spectre" | "scs" => Ok(Self::Spectre),
            _ => Err(ParseDialectError),
        }
    }
}

impl Dialect {
    /// Guesses the dialect of a netlist from its file extension, then its contents.
    pub fn detect(path: Option<&Path>, text: &str) -> Self {
        let ext = path
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("scs") => return Self::Spectre,
            Some("cdl") => return Self::Cdl,
            Some("sp" | "spi" | "spice" | "cir" | "ckt") => return Self::Spice,
            _ => {}
        }
        for line in text.lines().map(str::trim) {
            let lower = line.to_ascii_lowercase();
            if lower.starts_with("simulator lang=spectre") || lower.starts_with("subckt ") {
                return Self::Spectre;
            }
            if lower.starts_with("*.pininfo") {
                return Self::Cdl;
            }
            if lower.starts_with(".subckt") {
                return Self::Spice;
            }
        }
        Self::Spice
    }

    fn leading_continuation(&self) -> bool {
        !matches!(self, Self::Spectre)
    }

    fn has_directives(&self) -> bool {
        !matches!(self, Self::Spectre)
    }
}

impl Parser {
    /// Makes a new parser for the given dialect.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            buffer: Vec::new(),
            buffer_line: 0,
            ast: Ast::default(),
            state: ParserState::default(),
        }
    }

    /// Sets the file the parsed text came from.
    ///
    /// Relative include paths are resolved against its directory. Without an origin,
    /// include statements are skipped.
    pub fn with_origin(mut self, path: impl Into<PathBuf>) -> Self {
        self.state.origin = Some(path.into());
        self
    }

    /// Parse the given file.
    pub fn parse_file(
        dialect: Dialect,
        path: impl AsRef<Path>,
    ) -> Result<NetlistDocument, ParserError> {
        let path = path.as_ref();
        tracing::debug!("reading netlist file: {:?}", path);
        let s = std::fs::read_to_string(path).map_err(|err| ParserError::FailedToRead {
            path: path.into(),
            err,
        })?;
        let name = path
            .file_name()
            .map(|n| ArcStr::from(&*n.to_string_lossy()))
            .unwrap_or_else(|| arcstr::literal!("netlist"));
        Self::new(dialect).with_origin(path).parse_document(name, s)
    }

    /// Parse the given string.
    pub fn parse(dialect: Dialect, data: impl Into<ArcStr>) -> Result<NetlistDocument, ParserError> {
        Self::new(dialect).parse_document(arcstr::literal!("netlist"), data)
    }

    /// Consumes the parser, parsing `data` into a document named `name`.
    pub fn parse_document(
        mut self,
        name: impl Into<ArcStr>,
        data: impl Into<ArcStr>,
    ) -> Result<NetlistDocument, ParserError> {
        let dialect = self.dialect;
        if let Some(origin) = self.state.origin.clone() {
            self.state.include_stack.push(origin);
        }
        self.parse_inner(data.into())?;
        if let Some(open) = self.state.open.last() {
            return Err(ParserError::Parse {
                line: open.line,
                reason: format!("unterminated subcircuit `{}`", open.name),
            });
        }
        DocumentBuilder::new(name.into(), dialect, self.ast).build()
    }

    fn parse_include(&mut self, path: &str) -> Result<(), ParserError> {
        let Some(root) = self.state.include_stack.last() else {
            tracing::warn!(path, "no origin file; skipping include");
            return Ok(());
        };
        let resolved = Path::new(path);
        let resolved = if resolved.is_relative() {
            match root.parent() {
                Some(parent) => parent.join(resolved),
                None => resolved.to_path_buf(),
            }
        } else {
            resolved.to_path_buf()
        };
        if self.state.include_stack.contains(&resolved) {
            return Err(ParserError::Parse {
                line: self.buffer_line,
                reason: format!("recursive include of {resolved:?}"),
            });
        }
        let s = match std::fs::read_to_string(&resolved) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(path = ?resolved, %err, "skipping unreadable include");
                return Ok(());
            }
        };
        tracing::debug!("including netlist file: {:?}", resolved);
        // Includes are parsed in the dialect active at the include site.
        let outer_line = self.buffer_line;
        self.state.include_stack.push(resolved);
        let res = self.parse_inner(ArcStr::from(s));
        self.state.include_stack.pop();
        self.buffer_line = outer_line;
        res
    }

    fn parse_inner(&mut self, data: ArcStr) -> Result<(), ParserError> {
        let mut tok = Tokenizer::new(self.dialect, data);
        while let Some(line) = self.parse_line(&mut tok)? {
            match line {
                Line::SubcktDecl {
                    name,
                    ports,
                    params,
                } => {
                    self.state.open.push(Subckt {
                        name,
                        ports,
                        params,
                        components: vec![],
                        line: self.buffer_line,
                    });
                }
                Line::EndSubckt { name } => {
                    let Some(subckt) = self.state.open.pop() else {
                        return Err(ParserError::Parse {
                            line: self.buffer_line,
                            reason: "end of subcircuit without a matching subcircuit".to_string(),
                        });
                    };
                    if let Some(name) = name {
                        if !name.eq_ignore_ascii_case(&subckt.name) {
                            return Err(ParserError::Parse {
                                line: self.buffer_line,
                                reason: format!(
                                    "`{name}` closes subcircuit `{}` opened on line {}",
                                    subckt.name, subckt.line
                                ),
                            });
                        }
                    }
                    self.ast.elems.push(Elem::Subckt(subckt));
                }
                Line::Component(c) => match self.state.open.last_mut() {
                    Some(subckt) => subckt.components.push(c),
                    None => self.ast.elems.push(Elem::Component(c)),
                },
                Line::Params(params) => {
                    if let Some(subckt) = self.state.open.last_mut() {
                        subckt.params.extend(params);
                    }
                }
                Line::Global { nets } => self.ast.globals.extend(nets),
                Line::Model { name, kind } => match kind {
                    Some(kind) => {
                        self.ast.models.insert(fold_name(&name), kind);
                    }
                    None => {
                        tracing::debug!(model = %name, line = self.buffer_line, "model of unknown device type");
                    }
                },
                Line::Include { path } => self.parse_include(&path)?,
                Line::Simulator(dialect) => {
                    tracing::debug!(%dialect, line = self.buffer_line, "switching dialect");
                    self.dialect = dialect;
                    tok.dialect = dialect;
                }
            }
        }
        Ok(())
    }

    fn parse_line(&mut self, tok: &mut Tokenizer) -> Result<Option<Line>, ParserError> {
        while let Some((token, line)) = tok.get()? {
            if token == Token::LineEnd {
                if self.buffer.is_empty() {
                    continue;
                }
                let parsed = self.parse_line_inner();
                self.buffer.clear();
                if let Some(line) = parsed? {
                    return Ok(Some(line));
                }
            } else {
                if self.buffer.is_empty() {
                    self.buffer_line = line;
                }
                self.buffer.push(token);
            }
        }

        Ok(None)
    }

    fn parse_line_inner(&mut self) -> Result<Option<Line>, ParserError> {
        if let Some(Token::Ident(first)) = self.buffer.first() {
            if first.eq_ignore_ascii_case("simulator") {
                return self.parse_simulator();
            }
        }
        match self.dialect {
            Dialect::Spice | Dialect::Cdl => self.parse_spice_line(),
            Dialect::Spectre => self.parse_spectre_line(),
        }
    }

    fn parse_simulator(&self) -> Result<Option<Line>, ParserError> {
        let params = self.parse_params(&self.buffer[1..])?;
        let Some(lang) = params.get("lang") else {
            return Ok(None);
        };
        let dialect = match lang.to_ascii_lowercase().as_str() {
            "spectre" => Dialect::Spectre,
            "spice" => match self.dialect {
                Dialect::Spectre => Dialect::Spice,
                d => d,
            },
            other => return Err(self.err(format!("unsupported simulator language `{other}`"))),
        };
        Ok(Some(Line::Simulator(dialect)))
    }

    fn parse_spice_line(&self) -> Result<Option<Line>, ParserError> {
        let line = match &self.buffer[0] {
            Token::Directive(d) => {
                let d = d.to_ascii_lowercase();
                match d.as_str() {
                    ".subckt" => {
                        let name = self.ident(1)?;
                        let (ports, params) = self.split_positional(2)?;
                        Line::SubcktDecl {
                            name,
                            ports: ports
                                .into_iter()
                                .filter(|p| !p.eq_ignore_ascii_case("params:"))
                                .collect(),
                            params,
                        }
                    }
                    ".ends" => Line::EndSubckt {
                        name: self.opt_ident(1)?,
                    },
                    ".include" | ".inc" => Line::Include {
                        path: self.ident(1)?,
                    },
                    ".global" => Line::Global {
                        nets: self.idents(1)?,
                    },
                    _ => {
                        tracing::debug!(directive = %d, line = self.buffer_line, "ignoring directive");
                        return Ok(None);
                    }
                }
            }
            Token::Ident(id) => {
                let Some(kind) = id.chars().next() else {
                    return Err(self.err("empty statement"));
                };
                if kind.eq_ignore_ascii_case(&'X') {
                    self.parse_spice_instance()?
                } else {
                    let kind = DeviceKind::from_letter(kind)
                        .ok_or_else(|| self.err(format!("unexpected component type `{kind}`")))?;
                    self.parse_spice_primitive(kind)?
                }
            }
            tok => return Err(self.err(format!("unexpected token `{tok}`"))),
        };
        Ok(Some(line))
    }

    fn parse_spice_instance(&self) -> Result<Line, ParserError> {
        // An X instance line looks like this:
        //
        // ```spice
        // Xname port0 port1 port2 child param1=value1 param2=value2
        // ```
        //
        // The child is the last positional token. CDL may separate the
        // ports from the child with a `/`.
        let (positional, params) = self.split_positional(0)?;
        let mut positional = if self.dialect == Dialect::Cdl {
            positional
                .into_iter()
                .filter_map(|x| match x.as_str() {
                    "/" => None,
                    s => Some(ArcStr::from(s.trim_start_matches('/'))),
                })
                .collect::<Vec<_>>()
        } else {
            positional
        };
        if positional.len() < 2 {
            return Err(self.err(format!(
                "instance `{}` names no subcircuit",
                positional.first().map(|s| s.as_str()).unwrap_or_default()
            )));
        }
        let child = positional.pop().unwrap_or_default();
        let name = positional.remove(0);
        Ok(Line::Component(Component {
            name,
            master: RawMaster::Subckt {
                name: child,
                strict: true,
            },
            connections: positional,
            params,
            line: self.buffer_line,
        }))
    }

    fn parse_spice_primitive(&self, kind: DeviceKind) -> Result<Line, ParserError> {
        let (mut positional, mut params) = self.split_positional(0)?;
        if positional.is_empty() {
            return Err(self.err("device statement without a name"));
        }
        let name = positional.remove(0);
        let terminals = match kind.terminals() {
            Some(n) => n,
            // Q elements may omit the substrate node; the model is the last positional token.
            None => positional.len().saturating_sub(1).clamp(3, 4),
        };
        if positional.len() < terminals {
            return Err(self.err(format!(
                "device `{name}` connects {} nets, expected {terminals}",
                positional.len()
            )));
        }
        let tail = positional.split_off(terminals);
        let connections = positional;
        let mut model = None;
        if kind.takes_model() {
            model = Some(
                tail.first()
                    .cloned()
                    .ok_or_else(|| self.err(format!("device `{name}` is missing its model")))?,
            );
        } else if let Some(first) = tail.first() {
            if matches!(kind, DeviceKind::Res | DeviceKind::Cap | DeviceKind::Ind)
                && !looks_numeric(first)
            {
                model = Some(first.clone());
                if let Some(value) = tail.get(1) {
                    params.insert("value", value.clone());
                }
            } else {
                params.insert("value", tail.join(" "));
            }
        }
        Ok(Line::Component(Component {
            name,
            master: RawMaster::Primitive(Primitive { kind, model }),
            connections,
            params,
            line: self.buffer_line,
        }))
    }

    fn parse_spectre_line(&self) -> Result<Option<Line>, ParserError> {
        let first = match &self.buffer[0] {
            Token::Ident(first) => first.clone(),
            tok => return Err(self.err(format!("unexpected token `{tok}`"))),
        };
        let keyword = first.to_ascii_lowercase();
        let inline = keyword == "inline"
            && matches!(self.buffer.get(1), Some(Token::Ident(s)) if s.eq_ignore_ascii_case("subckt"));
        let line = match keyword.as_str() {
            "inline" if inline => self.parse_spectre_subckt(2)?,
            "subckt" => self.parse_spectre_subckt(1)?,
            "ends" => Line::EndSubckt {
                name: self.opt_ident(1)?,
            },
            "global" => Line::Global {
                nets: self.idents(1)?,
            },
            "include" => Line::Include {
                path: self.ident(1)?,
            },
            "parameters" => Line::Params(self.parse_params(&self.buffer[1..])?),
            "model" => Line::Model {
                name: self.ident(1)?,
                kind: self.opt_ident(2)?.and_then(|ty| DeviceKind::from_model_type(&ty)),
            },
            "ahdl_include" | "section" | "endsection" | "library" | "endlibrary"
            | "statistics" | "save" | "ic" | "nodeset" | "real" | "export" | "paramset" => {
                tracing::debug!(statement = %keyword, line = self.buffer_line, "ignoring statement");
                return Ok(None);
            }
            _ => match self.parse_spectre_instance()? {
                Some(c) => Line::Component(c),
                None => return Ok(None),
            },
        };
        Ok(Some(line))
    }

    fn parse_spectre_subckt(&self, idx: usize) -> Result<Line, ParserError> {
        let name = self.ident(idx)?;
        let ports = match self.buffer.get(idx + 1) {
            Some(Token::LParen) => {
                let close = self.matching_paren(idx + 1)?;
                self.idents_in(idx + 2, close)?
            }
            _ => self.idents(idx + 1)?,
        };
        Ok(Line::SubcktDecl {
            name,
            ports,
            params: Params::new(),
        })
    }

    fn parse_spectre_instance(&self) -> Result<Option<Component>, ParserError> {
        let name = self.ident(0)?;
        let (connections, master, params) = match self.buffer.get(1) {
            Some(Token::LParen) => {
                let close = self.matching_paren(1)?;
                let connections = self.idents_in(2, close)?;
                let master = self
                    .opt_ident(close + 1)?
                    .ok_or_else(|| self.err(format!("instance `{name}` names no master")))?;
                let params = self.parse_params(&self.buffer[close + 2..])?;
                (connections, master, params)
            }
            _ => {
                // Outside a subcircuit, statements without a net list are analyses and
                // control statements.
                if self.state.open.is_empty() {
                    tracing::debug!(statement = %name, line = self.buffer_line, "ignoring statement");
                    return Ok(None);
                }
                let (mut positional, params) = self.split_positional(0)?;
                if positional.len() < 2 {
                    return Err(self.err(format!("instance `{name}` names no master")));
                }
                let master = positional.pop().unwrap_or_default();
                positional.remove(0);
                (positional, master, params)
            }
        };
        Ok(Some(Component {
            name,
            master: RawMaster::Subckt {
                name: master,
                strict: false,
            },
            connections,
            params,
            line: self.buffer_line,
        }))
    }

    /// Splits the buffer, starting at `start`, into positional tokens and parameters.
    ///
    /// The first parameter name is the token immediately before the first `=`.
    fn split_positional(&self, start: usize) -> Result<(Vec<ArcStr>, Params), ParserError> {
        let pos = self.buffer[start..]
            .iter()
            .position(|t| matches!(t, Token::Equals))
            .map(|p| p + start);
        let end = match pos {
            Some(0) => return Err(self.err("parameter assignment without a name")),
            Some(p) if p <= start => return Err(self.err("parameter assignment without a name")),
            Some(p) => p - 1,
            None => self.buffer.len(),
        };
        let positional = self.idents_in(start, end)?;
        let params = self.parse_params(&self.buffer[end..])?;
        Ok((positional, params))
    }

    fn parse_params(&self, toks: &[Token]) -> Result<Params, ParserError> {
        let mut params = Params::new();
        let mut i = 0;
        while i < toks.len() {
            let key = match &toks[i] {
                Token::Ident(k) => k,
                tok => {
                    return Err(self.err(format!(
                        "malformed parameter assignment near `{tok}`"
                    )))
                }
            };
            if key.eq_ignore_ascii_case("params:") {
                i += 1;
                continue;
            }
            if !matches!(toks.get(i + 1), Some(Token::Equals)) {
                return Err(self.err(format!("parameter `{key}` has no value")));
            }
            let (value, used) = match toks.get(i + 2) {
                Some(Token::Ident(v)) => (ArcStr::from(v.as_str()), 1),
                Some(Token::LParen) => {
                    let mut depth = 0usize;
                    let mut parts = Vec::new();
                    let mut used = 0;
                    for tok in toks[i + 2..].iter() {
                        used += 1;
                        match tok {
                            Token::LParen => depth += 1,
                            Token::RParen => depth -= 1,
                            _ => {}
                        }
                        parts.push(tok.to_string());
                        if depth == 0 {
                            break;
                        }
                    }
                    if depth != 0 {
                        return Err(self.err(format!("unbalanced parentheses in parameter `{key}`")));
                    }
                    (ArcStr::from(parts.join(" ")), used)
                }
                _ => return Err(self.err(format!("parameter `{key}` has no value"))),
            };
            params.insert(key.as_str(), value);
            i += 2 + used;
        }
        Ok(params)
    }

    fn matching_paren(&self, open: usize) -> Result<usize, ParserError> {
        self.buffer[open..]
            .iter()
            .position(|t| matches!(t, Token::RParen))
            .map(|p| p + open)
            .ok_or_else(|| self.err("unbalanced parentheses"))
    }

    fn ident(&self, idx: usize) -> Result<ArcStr, ParserError> {
        match self.buffer.get(idx) {
            Some(Token::Ident(s)) => Ok(ArcStr::from(s.as_str())),
            Some(tok) => Err(self.err(format!("expected identifier, found `{tok}`"))),
            None => Err(self.err("unexpected end of statement")),
        }
    }

    fn opt_ident(&self, idx: usize) -> Result<Option<ArcStr>, ParserError> {
        match self.buffer.get(idx) {
            None => Ok(None),
            Some(_) => self.ident(idx).map(Some),
        }
    }

    fn idents(&self, start: usize) -> Result<Vec<ArcStr>, ParserError> {
        self.idents_in(start, self.buffer.len())
    }

    fn idents_in(&self, start: usize, end: usize) -> Result<Vec<ArcStr>, ParserError> {
        (start..end).map(|i| self.ident(i)).collect()
    }

    fn err(&self, reason: impl Into<String>) -> ParserError {
        ParserError::Parse {
            line: self.buffer_line,
            reason: reason.into(),
        }
    }
}

/// The abstract syntax tree (AST) of a parsed netlist.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub(crate) struct Ast {
    /// The subcircuits and top-level components, in source order.
    pub(crate) elems: Vec<Elem>,
    /// Nets named by global declarations.
    pub(crate) globals: Vec<ArcStr>,
    /// Device kinds of Spectre `model` statements, keyed by folded model name.
    pub(crate) models: IndexMap<ArcStr, DeviceKind>,
}

/// A single logical line in a netlist.
///
/// A logical line may contain multiple lines in a file
/// if they are joined by the dialect's line continuation marker.
#[derive(Debug, Clone, Eq, PartialEq)]
enum Line {
    SubcktDecl {
        name: ArcStr,
        ports: Vec<ArcStr>,
        params: Params,
    },
    Component(Component),
    EndSubckt {
        name: Option<ArcStr>,
    },
    Include {
        path: ArcStr,
    },
    Global {
        nets: Vec<ArcStr>,
    },
    /// Subcircuit parameter defaults declared on their own line.
    Params(Params),
    /// A `simulator lang=...` statement.
    Simulator(Dialect),
    /// A Spectre `model` statement.
    Model {
        name: ArcStr,
        kind: Option<DeviceKind>,
    },
}

/// An element of a netlist AST.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum Elem {
    Subckt(Subckt),
    Component(Component),
}

/// The contents of a subcircuit, before masters are resolved.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub(crate) struct Subckt {
    pub(crate) name: ArcStr,
    pub(crate) ports: Vec<ArcStr>,
    pub(crate) params: Params,
    pub(crate) components: Vec<Component>,
    pub(crate) line: usize,
}

/// A component instantiation, before its master is resolved.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct Component {
    pub(crate) name: ArcStr,
    pub(crate) master: RawMaster,
    pub(crate) connections: Vec<ArcStr>,
    pub(crate) params: Params,
    pub(crate) line: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum RawMaster {
    /// A reference to a subcircuit by name.
    ///
    /// A strict reference must name a subcircuit of the document. A non-strict
    /// reference that names no subcircuit is a device model reference.
    Subckt { name: ArcStr, strict: bool },
    Primitive(Primitive),
}

/// An error arising from parsing a netlist.
#[derive(Debug, Error)]
pub enum ParserError {
    /// Malformed netlist syntax.
    #[error("line {line}: {reason}")]
    Parse {
        /// The line on which the offending statement starts.
        line: usize,
        /// Why the statement is malformed.
        reason: String,
    },
    /// An instance references a subcircuit that is never defined.
    #[error("instance `{instance}` references undefined subcircuit `{master}`")]
    UndefinedReference {
        /// The name of the instance.
        instance: ArcStr,
        /// The name of the missing subcircuit.
        master: ArcStr,
    },
    /// Error trying to read the given file.
    #[error("failed to read file at path `{path:?}`: {err:?}")]
    FailedToRead {
        /// The path we attempted to read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

#[inline]
fn is_newline(c: char) -> bool {
    c == '\n' || c == '\r'
}

#[inline]
fn is_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

#[inline]
fn is_special(c: char) -> bool {
    is_space(c) || is_newline(c) || matches!(c, '=' | '(' | ')' | '"' | '\'')
}

fn looks_numeric(s: &str) -> bool {
    let s = s.trim_start_matches(['+', '-']);
    s.starts_with(|c: char| c.is_ascii_digit())
        || (s.starts_with('.') && s[1..].starts_with(|c: char| c.is_ascii_digit()))
}

/// A netlist token.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum Token {
    /// A directive that starts with a leading dot.
    ///
    /// Examples: ".subckt", ".ends", ".include".
    ///
    /// The tokenizer returns tokens with case matching the input file.
    Directive(Substr),
    /// An identifier.
    Ident(Substr),
    /// A line end indicator.
    LineEnd,
    /// An equal sign token ('=').
    Equals,
    /// An opening parenthesis (Spectre only).
    LParen,
    /// A closing parenthesis (Spectre only).
    RParen,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directive(s) | Self::Ident(s) => write!(f, "{s}"),
            Self::LineEnd => write!(f, "<eol>"),
            Self::Equals => write!(f, "="),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
        }
    }
}

#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Debug)]
enum TokState {
    /// Initial state.
    #[default]
    Init,
    /// Parsing a line.
    Line,
}

struct Tokenizer {
    data: ArcStr,
    /// The byte offset of the unprocessed remainder of `data`.
    ofs: usize,
    /// The line number of the next character.
    line: usize,
    state: TokState,
    /// Tokens returned since the last line end.
    line_tokens: usize,
    dialect: Dialect,
}

impl Tokenizer {
    fn new(dialect: Dialect, data: ArcStr) -> Self {
        Self {
            data,
            ofs: 0,
            line: 1,
            state: TokState::Init,
            line_tokens: 0,
            dialect,
        }
    }

    fn get(&mut self) -> Result<Option<(Token, usize)>, ParserError> {
        let tok = self.get_inner()?;
        match &tok {
            Some((Token::LineEnd, _)) => self.line_tokens = 0,
            Some(_) => self.line_tokens += 1,
            None => {}
        }
        Ok(tok)
    }

    fn get_inner(&mut self) -> Result<Option<(Token, usize)>, ParserError> {
        loop {
            self.take_ws();
            let Some(c) = self.peek() else {
                // handle EOF
                if self.state == TokState::Line {
                    // At EOF, but have not yet returned a final LineEnd token.
                    self.state = TokState::Init;
                    return Ok(Some((Token::LineEnd, self.line)));
                } else {
                    return Ok(None);
                }
            };

            let line = self.line;
            match self.state {
                TokState::Init => {
                    if is_newline(c) {
                        self.take1();
                    } else if self.at_line_comment() {
                        self.take_until_newline();
                    } else if c == '+' && self.dialect.leading_continuation() {
                        return Err(ParserError::Parse {
                            line,
                            reason: "unexpected line continuation".to_string(),
                        });
                    } else {
                        self.state = TokState::Line;
                    }
                }
                TokState::Line => {
                    if is_newline(c) {
                        self.take_line_end();
                        if !self.continues() {
                            self.state = TokState::Init;
                            return Ok(Some((Token::LineEnd, line)));
                        }
                    } else if c == '\\' && self.dialect == Dialect::Spectre && self.at_escaped_newline() {
                        self.take1();
                        if self.peek() == Some('\r') {
                            self.take1();
                        }
                        self.take1();
                    } else if self.at_inline_comment() {
                        self.take_until_newline();
                    } else if c == '=' {
                        self.take1();
                        return Ok(Some((Token::Equals, line)));
                    } else if c == '(' || c == ')' {
                        self.take1();
                        if self.dialect == Dialect::Spectre {
                            let tok = if c == '(' { Token::LParen } else { Token::RParen };
                            return Ok(Some((tok, line)));
                        }
                    } else if c == ',' && self.dialect != Dialect::Spectre {
                        self.take1();
                    } else if c == '"' || c == '\'' {
                        let word = self.take_quoted(c)?;
                        return Ok(Some((Token::Ident(word), line)));
                    } else if c == '{' {
                        let word = self.take_braced()?;
                        return Ok(Some((Token::Ident(word), line)));
                    } else if c == '.' && self.line_tokens == 0 && self.dialect.has_directives() {
                        let word = self.take_ident();
                        return Ok(Some((Token::Directive(word), line)));
                    } else {
                        let word = self.take_ident();
                        return Ok(Some((Token::Ident(word), line)));
                    }
                }
            }
        }
    }

    /// Having consumed a newline, checks whether the logical line continues.
    ///
    /// For SPICE dialects, comment lines may sit between continuation lines.
    fn continues(&mut self) -> bool {
        if !self.dialect.leading_continuation() {
            return false;
        }
        loop {
            self.take_ws();
            match self.peek() {
                Some('+') => {
                    self.take1();
                    return true;
                }
                Some('*') => {
                    self.take_until_newline();
                    self.take_line_end();
                }
                _ => return false,
            }
        }
    }

    fn at_line_comment(&self) -> bool {
        let rem = self.rem();
        rem.starts_with('*') || (self.dialect == Dialect::Spectre && rem.starts_with("//"))
    }

    fn at_inline_comment(&self) -> bool {
        let rem = self.rem();
        match self.dialect {
            Dialect::Spice | Dialect::Cdl => rem.starts_with('$'),
            Dialect::Spectre => rem.starts_with("//"),
        }
    }

    fn at_escaped_newline(&self) -> bool {
        let rem = &self.rem()[1..];
        rem.starts_with('\n') || rem.starts_with("\r\n")
    }

    fn rem(&self) -> &str {
        &self.data[self.ofs..]
    }

    fn substr(&self, len: usize) -> Substr {
        self.data.substr(self.ofs..self.ofs + len)
    }

    fn advance(&mut self, len: usize) {
        self.line += self.data[self.ofs..self.ofs + len].matches('\n').count();
        self.ofs += len;
    }

    fn take1(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.advance(c.len_utf8());
        Some(c)
    }

    /// Consumes one line ending, treating `\r\n` as a unit.
    fn take_line_end(&mut self) {
        let rem = self.rem();
        let len = if rem.starts_with("\r\n") {
            2
        } else if rem.starts_with(is_newline) {
            1
        } else {
            0
        };
        self.advance(len);
    }

    fn take_until_newline(&mut self) {
        let rem = self.rem();
        let len = take_till::<_, _, ()>(is_newline)(rem)
            .map(|(_, comment): (&str, &str)| comment.len())
            .unwrap_or(rem.len());
        self.advance(len);
    }

    fn take_ident(&mut self) -> Substr {
        let rem = self.rem();
        let len = take_till::<_, _, ()>(is_special)(rem)
            .map(|(_, value): (&str, &str)| value.len())
            .unwrap_or(rem.len());
        // A lone special character that reaches here forms its own token.
        let len = if len == 0 {
            self.peek().map(char::len_utf8).unwrap_or(0)
        } else {
            len
        };
        let word = self.substr(len);
        self.advance(len);
        word
    }

    fn take_quoted(&mut self, quote: char) -> Result<Substr, ParserError> {
        let line = self.line;
        self.take1();
        let rem = self.rem();
        let len = take_till::<_, _, ()>(|c: char| c == quote || is_newline(c))(rem)
            .map(|(_, value): (&str, &str)| value.len())
            .unwrap_or(rem.len());
        if !rem[len..].starts_with(quote) {
            return Err(ParserError::Parse {
                line,
                reason: "unterminated quoted string".to_string(),
            });
        }
        let word = self.substr(len);
        self.advance(len);
        self.take1();
        Ok(word)
    }

    fn take_braced(&mut self) -> Result<Substr, ParserError> {
        let line = self.line;
        let rem = self.rem();
        let len = take_till::<_, _, ()>(|c: char| c == '}' || is_newline(c))(rem)
            .map(|(_, value): (&str, &str)| value.len())
            .unwrap_or(rem.len());
        if !rem[len..].starts_with('}') {
            return Err(ParserError::Parse {
                line,
                reason: "unterminated expression".to_string(),
            });
        }
        let word = self.substr(len + 1);
        self.advance(len + 1);
        Ok(word)
    }

    fn take_ws(&mut self) {
        let rem = self.rem();
        let len = take_while::<_, _, ()>(is_space)(rem)
            .map(|(_, ws): (&str, &str)| ws.len())
            .unwrap_or(0);
        self.advance(len);
    }

    fn peek(&self) -> Option<char> {
        self.rem().chars().next()
    }
}

#[cfg(test)]
impl Tokenizer {
    fn tokens(dialect: Dialect, data: &str) -> Result<Vec<Token>, ParserError> {
        let mut tok = Self::new(dialect, ArcStr::from(data));
        let mut out = Vec::new();
        while let Some((t, _)) = tok.get()? {
            out.push(t);
        }
        Ok(out)
    }
}
