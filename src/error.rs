use std::fmt;
use crate::source::{Pos, Source};

/// The failure classes a compile can abort with. Everything here is fatal;
/// the compile stops at the first one.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ErrorKind {
    Name,
    TypeMismatch,
    Arity,
    Unsupported,
    Structural,
    Attribute,
    Parse,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Name => "NameError",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::Arity => "ArityError",
            ErrorKind::Unsupported => "UnsupportedConstruct",
            ErrorKind::Structural => "StructuralError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::Parse => "ParseError",
        }
    }
}

#[derive(Debug)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Option<Pos>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, pos: Pos) -> CompileError {
        CompileError { kind, message: message.into(), pos: Some(pos) }
    }

    pub fn name(message: impl Into<String>, pos: Pos) -> CompileError {
        CompileError::new(ErrorKind::Name, message, pos)
    }

    pub fn type_mismatch(message: impl Into<String>, pos: Pos) -> CompileError {
        CompileError::new(ErrorKind::TypeMismatch, message, pos)
    }

    pub fn arity(message: impl Into<String>, pos: Pos) -> CompileError {
        CompileError::new(ErrorKind::Arity, message, pos)
    }

    pub fn unsupported(message: impl Into<String>, pos: Pos) -> CompileError {
        CompileError::new(ErrorKind::Unsupported, message, pos)
    }

    pub fn structural(message: impl Into<String>, pos: Pos) -> CompileError {
        CompileError::new(ErrorKind::Structural, message, pos)
    }

    pub fn attribute(message: impl Into<String>, pos: Pos) -> CompileError {
        CompileError::new(ErrorKind::Attribute, message, pos)
    }
}

/// Non-fatal diagnostics: soundness caveats the generated code still behaves
/// correctly under for common-case inputs.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WarningKind {
    Type,
    Syntax,
}

impl WarningKind {
    pub fn name(&self) -> &'static str {
        match self {
            WarningKind::Type => "TypeWarning",
            WarningKind::Syntax => "SyntaxWarning",
        }
    }
}

#[derive(Debug)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub pos: Pos,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>, pos: Pos) -> Warning {
        Warning { kind, message: message.into(), pos }
    }
}

/// Renders a diagnostic against the source it came from. The core only
/// produces the structured values; turning them into a caret-annotated
/// excerpt happens here, on the caller's side.
pub trait Report {
    fn write_into<W: fmt::Write>(&self, source: &Source, to: &mut W) -> fmt::Result;

    fn show_location<W: fmt::Write>(pos: &Pos, source: &Source, to: &mut W) -> fmt::Result {
        writeln!(to, "{: >4} | {}", pos.line, source.line(pos.line))?;
        writeln!(to, "       {}^", " ".repeat(pos.col as usize))
    }

    fn render(&self, source: &Source) -> String {
        let mut out = String::new();
        self.write_into(source, &mut out).unwrap();
        out
    }
}

impl Report for CompileError {
    fn write_into<W: fmt::Write>(&self, source: &Source, to: &mut W) -> fmt::Result {
        writeln!(to, "Error: [{}] {}", self.kind.name(), self.message)?;
        match &self.pos {
            Some(pos) => Self::show_location(pos, source, to),
            None => Ok(()),
        }
    }
}

impl Report for Warning {
    fn write_into<W: fmt::Write>(&self, source: &Source, to: &mut W) -> fmt::Result {
        writeln!(to, "Warning: [{}] {}", self.kind.name(), self.message)?;
        Self::show_location(&self.pos, source, to)
    }
}
