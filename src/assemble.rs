//! Content assembly.
//!
//! Turns a root template file into its assembled, locale-independent text:
//!
//! 1. **Inclusion**: every `[% PROCESS "name" %]` directive is replaced by
//!    the raw text of `name`, resolved against the job's root directory (not
//!    the including file's directory). Included text is expanded the same way
//!    before it is spliced in.
//! 2. **Templating**: one [`template`](crate::template) pass over the result.
//!
//! The result is stored in the [`AssemblyCache`] under the root file's
//! canonical path, so every language rendering of the same template shares a
//! single assembly.
//!
//! Directives are found in a single forward scan per file, so text spliced
//! in is never rescanned by the pass that inserted it. The chain of files
//! currently being expanded is tracked and a file that (transitively)
//! includes itself fails with [`AssembleError::Cycle`].
//!
//! Expansion remembers which file each run of lines came from, so a template
//! error inside an included fragment names the fragment and its own line.

use crate::cache::{AssemblyCache, SourceCache};
use crate::template::{self, Delimiters, TemplateError};
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[%\s*PROCESS\s*"([^"\n]*)"\s*%\]"#).expect("directive pattern is valid")
});

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("cannot read {} (via {}): {source}", .path.display(), .via.display())]
    MissingResource {
        path: PathBuf,
        via: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("inclusion cycle: {}", display_chain(.chain))]
    Cycle { chain: Vec<PathBuf> },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

fn display_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Expands and templates root files through the shared caches.
pub struct Assembler<'a> {
    sources: &'a SourceCache,
    cache: &'a AssemblyCache,
    delimiters: &'a Delimiters,
}

impl<'a> Assembler<'a> {
    pub fn new(sources: &'a SourceCache, cache: &'a AssemblyCache, delimiters: &'a Delimiters) -> Self {
        Self {
            sources,
            cache,
            delimiters,
        }
    }

    /// Assemble `root_dir/name`, or return the cached assembly.
    ///
    /// `context` is only called on a cache miss.
    pub fn assemble(
        &self,
        root_dir: &Path,
        name: &str,
        context: impl FnOnce() -> Value,
    ) -> Result<Arc<str>, AssembleError> {
        let root = canonical(root_dir, name, None)?;
        self.cache.get_or_assemble(&root, || {
            let mut expansion = Expansion::new();
            self.expand_file(root_dir, &root, &mut Vec::new(), &mut expansion)?;
            let rendered = template::render(name, &expansion.text, self.delimiters, &context())
                .map_err(|err| expansion.attribute(err, root_dir))?;
            Ok::<_, AssembleError>(rendered)
        })
    }

    /// Expand inclusion directives in `root_dir/name` without templating.
    pub fn expand(&self, root_dir: &Path, name: &str) -> Result<String, AssembleError> {
        let root = canonical(root_dir, name, None)?;
        let mut expansion = Expansion::new();
        self.expand_file(root_dir, &root, &mut Vec::new(), &mut expansion)?;
        Ok(expansion.text)
    }

    fn expand_file(
        &self,
        root_dir: &Path,
        path: &Path,
        stack: &mut Vec<PathBuf>,
        out: &mut Expansion,
    ) -> Result<(), AssembleError> {
        if stack.iter().any(|open| open == path) {
            let mut chain = stack.clone();
            chain.push(path.to_path_buf());
            return Err(AssembleError::Cycle { chain });
        }

        let text = self
            .sources
            .read(path)
            .map_err(|source| AssembleError::MissingResource {
                path: path.to_path_buf(),
                via: stack.last().cloned().unwrap_or_else(|| path.to_path_buf()),
                source,
            })?;

        stack.push(path.to_path_buf());
        let mut last = 0;
        let mut line = 1;
        for caps in DIRECTIVE.captures_iter(&text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push(&text[last..whole.start()], path, line);
            let included = canonical(root_dir, name.as_str(), Some(path))?;
            self.expand_file(root_dir, &included, stack, out)?;
            line += text[last..whole.end()].matches('\n').count();
            last = whole.end();
        }
        out.push(&text[last..], path, line);
        stack.pop();
        Ok(())
    }
}

/// Expanded text plus the origin of every run of lines in it.
struct Expansion {
    text: String,
    /// 1-based line the next pushed run starts on.
    line: usize,
    segments: Vec<Segment>,
}

/// A run of expanded lines `first..=last` copied from `file` starting at
/// `file_line`.
struct Segment {
    first: usize,
    last: usize,
    file: PathBuf,
    file_line: usize,
}

impl Expansion {
    fn new() -> Self {
        Self {
            text: String::new(),
            line: 1,
            segments: Vec::new(),
        }
    }

    fn push(&mut self, run: &str, file: &Path, file_line: usize) {
        if run.is_empty() {
            return;
        }
        let first = self.line;
        self.line += run.matches('\n').count();
        self.segments.push(Segment {
            first,
            last: self.line,
            file: file.to_path_buf(),
            file_line,
        });
        self.text.push_str(run);
    }

    /// File and line that expanded line `line` came from. A line shared by
    /// several files is credited to the first of them.
    fn locate(&self, line: usize) -> Option<(&Path, usize)> {
        self.segments
            .iter()
            .find(|seg| seg.first <= line && line <= seg.last)
            .map(|seg| (seg.file.as_path(), seg.file_line + (line - seg.first)))
    }

    /// Point `err` at the file and line it came from, named relative to
    /// `root_dir` when possible.
    fn attribute(&self, mut err: TemplateError, root_dir: &Path) -> TemplateError {
        if let Some((file, line)) = self.locate(err.line) {
            let base = root_dir.canonicalize().unwrap_or_else(|_| root_dir.to_path_buf());
            err.name = file.strip_prefix(&base).unwrap_or(file).display().to_string();
            err.line = line;
        }
        err
    }
}

/// Canonical path of `root_dir/name`, the key for both caches.
fn canonical(root_dir: &Path, name: &str, via: Option<&Path>) -> Result<PathBuf, AssembleError> {
    let path = root_dir.join(name);
    path.canonicalize().map_err(|source| AssembleError::MissingResource {
        via: via.map_or_else(|| path.clone(), Path::to_path_buf),
        path,
        source,
    })
}
