// SPDX-License-Identifier: AGPL-3.0-only

//! Kernel programs of the digit pipeline.
//!
//! Two named kernels, handed to the engine as opaque text:
//!
//! | Name | File | Bindings |
//! |------|------|----------|
//! | `term-evaluation` | `term_eval_f32.wgsl` | params, grid (rw) |
//! | `reduction` | `block_mean_f32.wgsl` | params, src (r), dst (rw) |
//!
//! [`KernelSet::builtin`] bundles the WGSL shipped with the crate;
//! [`KernelSet::from_dir`] loads replacements from a directory. The engine
//! owns its set for its whole lifetime; nothing is cached globally.
//!
//! [`term_eval`] and [`reduction`] hold the same math as pure host
//! functions, used by the CPU backend and as a reference in tests.

pub mod reduction;
pub mod term_eval;

use crate::error::PiSpringError;
use std::fmt;
use std::path::Path;

const TERM_EVAL_WGSL: &str = include_str!("shaders/term_eval_f32.wgsl");
const BLOCK_MEAN_WGSL: &str = include_str!("shaders/block_mean_f32.wgsl");

/// Identity of a kernel program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelName {
    TermEvaluation,
    Reduction,
}

impl KernelName {
    pub const ALL: [Self; 2] = [Self::TermEvaluation, Self::Reduction];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TermEvaluation => "term-evaluation",
            Self::Reduction => "reduction",
        }
    }

    /// Text of the program bundled with the crate.
    #[must_use]
    pub const fn builtin_text(self) -> &'static str {
        match self {
            Self::TermEvaluation => TERM_EVAL_WGSL,
            Self::Reduction => BLOCK_MEAN_WGSL,
        }
    }

    /// File name looked up by [`KernelSet::from_dir`].
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::TermEvaluation => "term_eval_f32.wgsl",
            Self::Reduction => "block_mean_f32.wgsl",
        }
    }
}

impl fmt::Display for KernelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One kernel program as source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    pub name: KernelName,
    pub text: String,
}

impl KernelSource {
    /// Whether this is the bundled program for its name, byte for byte.
    ///
    /// Backends that run host implementations instead of compiling the text
    /// can only honour the bundled programs.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.text == self.name.builtin_text()
    }
}

/// The two programs the pipeline dispatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSet {
    term_evaluation: KernelSource,
    reduction: KernelSource,
}

impl KernelSet {
    /// Kernels compiled into the crate.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            term_evaluation: KernelSource {
                name: KernelName::TermEvaluation,
                text: KernelName::TermEvaluation.builtin_text().to_string(),
            },
            reduction: KernelSource {
                name: KernelName::Reduction,
                text: KernelName::Reduction.builtin_text().to_string(),
            },
        }
    }

    /// Load both kernels from `dir` by their [`KernelName::file_name`].
    ///
    /// # Errors
    ///
    /// Returns [`PiSpringError::KernelSource`] if either file cannot be read.
    pub fn from_dir(dir: &Path) -> Result<Self, PiSpringError> {
        let read = |name: KernelName| -> Result<KernelSource, PiSpringError> {
            let path = dir.join(name.file_name());
            let text = std::fs::read_to_string(&path)
                .map_err(|source| PiSpringError::KernelSource { path, source })?;
            Ok(KernelSource { name, text })
        };
        let set = Self {
            term_evaluation: read(KernelName::TermEvaluation)?,
            reduction: read(KernelName::Reduction)?,
        };
        tracing::debug!(dir = %dir.display(), "loaded kernel sources");
        Ok(set)
    }

    #[must_use]
    pub const fn get(&self, name: KernelName) -> &KernelSource {
        match name {
            KernelName::TermEvaluation => &self.term_evaluation,
            KernelName::Reduction => &self.reduction,
        }
    }
}

impl Default for KernelSet {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builtin_kernels_define_main_entry_point() {
        let set = KernelSet::builtin();
        for name in KernelName::ALL {
            let src = set.get(name);
            assert_eq!(src.name, name);
            assert!(src.text.contains("fn main("), "{name} lacks entry point");
            assert!(src.text.contains("@workgroup_size(8, 8, 1)"));
        }
    }

    #[test]
    fn names_are_stable() {
        assert_eq!(KernelName::TermEvaluation.to_string(), "term-evaluation");
        assert_eq!(KernelName::Reduction.to_string(), "reduction");
    }

    #[test]
    fn from_dir_reads_both_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("term_eval_f32.wgsl"), "// terms").unwrap();
        std::fs::write(dir.path().join("block_mean_f32.wgsl"), "// mean").unwrap();
        let set = KernelSet::from_dir(dir.path()).unwrap();
        assert_eq!(set.get(KernelName::TermEvaluation).text, "// terms");
        assert_eq!(set.get(KernelName::Reduction).text, "// mean");
    }

    #[test]
    fn builtin_detection_is_exact() {
        let set = KernelSet::builtin();
        assert!(KernelName::ALL.iter().all(|&n| set.get(n).is_builtin()));
        let mut edited = set.get(KernelName::Reduction).clone();
        edited.text.push('\n');
        assert!(!edited.is_builtin());
    }

    #[test]
    fn from_dir_missing_file_is_kernel_source_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("term_eval_f32.wgsl"), "// terms").unwrap();
        let err = KernelSet::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, PiSpringError::KernelSource { .. }));
        assert!(err.to_string().contains("block_mean_f32.wgsl"));
    }
}
