pub mod error;
pub mod lowering;
pub mod parsing;
pub mod source;
pub mod util;

pub use error::{CompileError, ErrorKind, Report, Warning, WarningKind};
pub use lowering::Builder;
pub use parsing::parse_module;
pub use source::{Pos, Source};
