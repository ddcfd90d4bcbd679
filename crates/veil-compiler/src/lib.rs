//! Veil Filter List Compiler
//!
//! Parses ABP/uBO filter lists, cancels `$badfilter` twins, removes
//! duplicates and writes a compiled text form that the core engine loads
//! directly.

pub mod builder;
pub mod compiled;
pub mod optimizer;

pub use builder::{build_engine, build_engine_from_lists, compile_filter_lists, CompileReport};
pub use compiled::{from_compiled_content, read_compiled, write_compiled, CompiledFormatError, COMPILED_HEADER};
pub use optimizer::{optimize_records, OptimizeStats};
