//! # Polysite
//!
//! A multilingual static site builder. Every template artifact is rendered
//! once per target language: source fragments are spliced together, a small
//! template language fills in build metadata, `{{ text }}` markers are
//! replaced from gettext-style catalogs, and external tools post-process the
//! result.
//!
//! # Architecture: Render Pipeline
//!
//! ```text
//! catalogs ─┐
//!           ├─▶ enumerate jobs ─▶ bounded queue ─▶ N workers
//! artifacts ┘                                       │
//!                 ┌─────────────────────────────────┘
//!                 ▼
//!   assemble (PROCESS directives → template pass, cached per file)
//!       ─▶ translate ({{ markers }} → catalog)
//!       ─▶ post-process (/bin/sh steps in the output dir)
//! ```
//!
//! Catalogs are loaded once and shared read-only. Assembly is
//! locale-independent and cached, so a template rendered in twenty languages
//! is assembled once. The first failing job cancels the rest of the queue and
//! surfaces as a single error.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`catalog`] | Catalog file parsing, saving, completion statistics, the catalog set |
//! | [`cache`] | Compute-once source and assembly caches shared by all workers |
//! | [`template`] | The `[% … %]` template language: fields, variables, `if`/`with`/`range`, comparison functions |
//! | [`assemble`] | `PROCESS` inclusion with cycle detection, then the template pass |
//! | [`translate`] | `{{ … }}` marker substitution and marker harvesting |
//! | [`job`] | Render jobs, artifact types, job enumeration |
//! | [`scheduler`] | Bounded queue, worker pool, completion barrier, fail-fast cancellation |
//! | [`postprocess`] | Macro substitution and external post-processing steps |
//! | [`pipeline`] | The per-job runner tying assembly, translation and post-processing together |
//! | [`gitinfo`] | Git metadata exposed to templates |
//! | [`site`] | Whole build: output prep, render, copies, links, harvest |
//! | [`config`] | `config.toml` loading, merging, validation, stock defaults |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Fixed Pass Order
//!
//! Inclusion runs first, then the template pass, then translation. The two
//! text passes use disjoint syntaxes; running translation last lets templates
//! emit translatable markers of their own.
//!
//! ## Errors Are Values
//!
//! Workers never exit the process. Each job returns a `Result`; the queue
//! keeps the first error, skips every job not yet started, and hands the
//! error back from `wait`.
//!
//! ## Missing Translations Are Not Errors
//!
//! A marker with no catalog entry renders its own (normalized) text. A
//! half-translated catalog still produces a complete site.

pub mod assemble;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod gitinfo;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod postprocess;
pub mod scheduler;
pub mod site;
pub mod template;
pub mod translate;

#[cfg(test)]
pub(crate) mod test_helpers;
