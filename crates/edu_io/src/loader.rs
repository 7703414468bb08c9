use crate::parser::{ScriptLine, parse_script};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Reads and parses a session script file.
pub fn load_script_file<P: AsRef<Path>>(path: P) -> Result<Vec<ScriptLine>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to open script {}", path.display()))?;
    parse_script(&text).with_context(|| format!("Invalid script {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Step;
    use std::io::Write;

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "submit 4\nwait\nexpect 24").unwrap();
        let steps = load_script_file(file.path()).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].step, Step::Expect(24));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_script_file("/nonexistent/edu.script").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/edu.script"));
    }

    #[test]
    fn parse_failure_keeps_the_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wait\nbogus").unwrap();
        let err = load_script_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }
}
