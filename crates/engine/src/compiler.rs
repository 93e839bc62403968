// SnapStep - Step-by-step program state recorder
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Compilation of the target program.
//!
//! The target is compiled with debug information into its own directory before a
//! session starts. Diagnostics of a failed compile are reported verbatim.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    process::Command,
};

use snapstep_common::env::JAVA_HOME;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Source file extension of the target language
pub const SOURCE_EXTENSION: &str = "java";

/// Errors reported by a [`Compiler`]
#[derive(Debug, Error)]
pub enum CompileError {
    /// No compiler could be found
    #[error("Java compiler not available")]
    MissingToolchain,

    /// The compiler rejected the sources
    #[error("compilation failed:\n{diagnostics}")]
    CompileFailure {
        /// Compiler output
        diagnostics: String,
    },

    /// The compiler could not be run
    #[error("failed to run the compiler: {0}")]
    Io(#[from] io::Error),
}

/// Compiles target sources into a class directory
pub trait Compiler {
    /// Compile `sources` into `output_dir`
    fn compile(&self, sources: &[PathBuf], output_dir: &Path) -> Result<(), CompileError>;
}

/// The JDK `javac` compiler
#[derive(Debug, Clone, Default)]
pub struct Javac {
    program: Option<PathBuf>,
}

impl Javac {
    /// Locate `javac` through `JAVA_HOME` or `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit compiler binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Resolve the compiler binary
    pub fn locate(&self) -> Result<PathBuf, CompileError> {
        locate_jdk_tool("javac", self.program.as_deref()).ok_or(CompileError::MissingToolchain)
    }
}

impl Compiler for Javac {
    fn compile(&self, sources: &[PathBuf], output_dir: &Path) -> Result<(), CompileError> {
        let program = self.locate()?;
        info!(compiler = %program.display(), files = sources.len(), "Compiling target");

        let output = Command::new(&program)
            .arg("-g")
            .arg("-d")
            .arg(output_dir)
            .arg("-sourcepath")
            .arg(output_dir)
            .args(sources)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => CompileError::MissingToolchain,
                _ => CompileError::Io(e),
            })?;

        if output.status.success() {
            debug!("Compilation succeeded");
            return Ok(());
        }

        let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stdout));
        warn!(status = %output.status, "Compilation failed");
        Err(CompileError::CompileFailure { diagnostics })
    }
}

/// Find a JDK tool: an explicit path, then `$JAVA_HOME/bin`, then `PATH`
pub fn locate_jdk_tool(name: &str, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        // Bare names are resolved through PATH
        return which::which(path).ok();
    }

    if let Some(home) = env::var_os(JAVA_HOME) {
        let candidate = PathBuf::from(home).join("bin").join(name);
        if candidate.is_file() {
            debug!(tool = name, path = %candidate.display(), "Found tool in JAVA_HOME");
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let candidate = candidate.with_extension("exe");
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    which::which(name).ok()
}

/// All target sources under `root`, sorted by path.
///
/// Falls back to `entry` alone if the tree cannot be walked.
pub fn discover_sources(root: &Path, entry: &Path) -> Vec<PathBuf> {
    let mut sources = Vec::new();
    match collect_sources(root, &mut sources) {
        Ok(()) if !sources.is_empty() => {
            sources.sort();
            sources
        }
        Ok(()) => vec![entry.to_path_buf()],
        Err(e) => {
            warn!(
                root = %root.display(),
                error = %e,
                "Failed to walk sources, compiling entry only"
            );
            vec![entry.to_path_buf()]
        }
    }
}

fn collect_sources(dir: &Path, sources: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_sources(&path, sources)?;
        } else if path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
            sources.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_sources_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("util")).unwrap();
        fs::write(dir.path().join("Main.java"), "class Main {}").unwrap();
        fs::write(dir.path().join("util/Helper.java"), "class Helper {}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("Main.class"), "ignored").unwrap();

        let sources = discover_sources(dir.path(), &dir.path().join("Main.java"));
        assert_eq!(
            sources,
            vec![dir.path().join("Main.java"), dir.path().join("util/Helper.java")]
        );
    }

    #[test]
    fn test_discover_sources_falls_back_to_entry() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let entry = missing.join("Main.java");
        assert_eq!(discover_sources(&missing, &entry), vec![entry]);
    }

    #[test]
    fn test_missing_explicit_compiler() {
        let javac = Javac::new().with_program("/nonexistent/snapstep/javac");
        assert!(matches!(javac.locate(), Err(CompileError::MissingToolchain)));

        let dir = tempfile::tempdir().unwrap();
        let result = javac.compile(&[dir.path().join("Main.java")], dir.path());
        assert!(matches!(result, Err(CompileError::MissingToolchain)));
    }
}
