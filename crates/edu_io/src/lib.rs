//! Session script handling for the EDU host tools.
//!
//! Scripts describe a sequence of driver operations (submit, wait, re-arm,
//! probe) that the host CLI replays against a device.

/// Script file loading.
///
/// Reads a script from disk and attaches the path to any I/O or parse error.
pub mod loader;

/// Line-oriented script grammar.
///
/// Turns script text into [`parser::Step`]s tagged with their line numbers.
pub mod parser;

pub use loader::load_script_file;
pub use parser::{ScriptLine, Step, parse_script};
