//! Per-job render pipeline: assemble → translate → post-process.
//!
//! A [`Pipeline`] is shared by every worker of the [`JobQueue`](crate::scheduler::JobQueue).
//! It owns the source and assembly caches and the read-only data every job
//! needs (template context, delimiters, output directory).
//!
//! The templating pass runs before translation, so a template may emit
//! `{{ … }}` markers that are then translated like literal ones.
//!
//! Rendering reference-locale jobs also harvests every marker text it meets,
//! so a fresh reference catalog can be written after the build.

use crate::assemble::{AssembleError, Assembler};
use crate::cache::{AssemblyCache, SourceCache};
use crate::catalog::{Catalog, CatalogEntry, CatalogSet};
use crate::gitinfo::GitInfo;
use crate::job::Job;
use crate::postprocess::{self, PostProcessError};
use crate::scheduler::JobRunner;
use crate::template::Delimiters;
use crate::translate;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    PostProcess(#[from] PostProcessError),
}

pub struct Pipeline {
    reference: Arc<Catalog>,
    git: GitInfo,
    languages: Value,
    delimiters: Delimiters,
    output_dir: PathBuf,
    sources: SourceCache,
    assembly: AssemblyCache,
    /// msgid → artifact that first used it.
    harvest: Mutex<BTreeMap<String, String>>,
}

impl Pipeline {
    pub fn new(catalogs: &CatalogSet, git: GitInfo, delimiters: Delimiters, output_dir: &Path) -> Self {
        Self {
            reference: Arc::clone(&catalogs.reference),
            git,
            languages: catalogs.summary_value(),
            delimiters,
            output_dir: output_dir.to_path_buf(),
            sources: SourceCache::new(),
            assembly: AssemblyCache::new(),
            harvest: Mutex::new(BTreeMap::new()),
        }
    }

    /// Template data for `job`.
    pub fn context(&self, job: &Job) -> Value {
        let locale = job.locale();
        json!({
            "git": &self.git,
            "languages": &self.languages,
            "locale": locale.locale,
            "lang": locale.lang,
            "lang_uc": locale.lang_uc,
            "basename": job.basename(),
            "compress": job.compress,
        })
    }

    /// Assembled and translated text for `job`, before post-processing.
    pub fn render(&self, job: &Job) -> Result<String, RenderError> {
        let assembler = Assembler::new(&self.sources, &self.assembly, &self.delimiters);
        let assembled = assembler.assemble(&job.root_dir, &job.artifact, || self.context(job))?;

        if Arc::ptr_eq(&job.catalog, &self.reference) {
            self.record_markers(&assembled, &job.artifact);
        }
        Ok(translate::translate(&assembled, &job.catalog, &job.locale(), job.escape_quotes))
    }

    fn record_markers(&self, assembled: &str, artifact: &str) {
        let mut harvest = self.harvest.lock().unwrap_or_else(PoisonError::into_inner);
        for text in translate::markers(assembled) {
            harvest.entry(text).or_insert_with(|| artifact.to_string());
        }
    }

    /// Reference catalog of every marker met so far, sorted by msgid.
    pub fn harvested_catalog(&self) -> Catalog {
        let harvest = self.harvest.lock().unwrap_or_else(PoisonError::into_inner);
        let mut catalog = Catalog::new("");
        for (msgid, artifact) in harvest.iter() {
            catalog.insert(CatalogEntry {
                msgid: msgid.clone(),
                msgstr: String::new(),
                comment: artifact.clone(),
            });
        }
        catalog
    }

    pub fn assembly_cache(&self) -> &AssemblyCache {
        &self.assembly
    }

    pub fn source_cache(&self) -> &SourceCache {
        &self.sources
    }
}

impl JobRunner for Pipeline {
    type Error = RenderError;

    fn run(&self, job: &Job) -> Result<(), RenderError> {
        let text = self.render(job)?;
        postprocess::post_process(job, &text, &self.output_dir)?;
        tracing::info!(artifact = %job.artifact, language = %job.language(), "rendered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{catalog_set, git_info, job, write_file};
    use tempfile::TempDir;

    fn french_site() -> (TempDir, CatalogSet) {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("out")).unwrap();
        let catalogs = catalog_set(
            &["Hello", "Your IPv6 address"],
            &[("fr_FR", &[("Hello", "Bonjour"), ("Your IPv6 address", "Votre adresse IPv6")])],
        );
        (tmp, catalogs)
    }

    fn pipeline(tmp: &TempDir, catalogs: &CatalogSet) -> Pipeline {
        Pipeline::new(catalogs, git_info(), Delimiters::default(), &tmp.path().join("out"))
    }

    #[test]
    fn context_exposes_locale_git_and_languages() {
        let (tmp, catalogs) = french_site();
        let pipeline = pipeline(&tmp, &catalogs);
        let job = job(tmp.path(), "index.html", Arc::clone(&catalogs.by_language["fr_FR"]), &[], true);

        let ctx = pipeline.context(&job);
        assert_eq!(ctx["locale"], "fr_FR");
        assert_eq!(ctx["lang"], "fr");
        assert_eq!(ctx["lang_uc"], "FR");
        assert_eq!(ctx["basename"], "index");
        assert_eq!(ctx["git"]["version"], "1.2.42");
        assert_eq!(ctx["languages"]["fr_FR"]["percent"], 100);
    }

    #[test]
    fn templating_runs_before_translation() {
        let (tmp, catalogs) = french_site();
        write_file(tmp.path(), "index.html", "[% range .languages %]{{Hello}} [% .lang %];[% end %]{{lang}}");
        let pipeline = pipeline(&tmp, &catalogs);
        let job = job(tmp.path(), "index.html", Arc::clone(&catalogs.by_language["fr_FR"]), &[], true);

        assert_eq!(pipeline.render(&job).unwrap(), "Bonjour fr;fr");
    }

    #[test]
    fn run_writes_post_processed_output() {
        let (tmp, catalogs) = french_site();
        write_file(tmp.path(), "index.html", "<p>{{Hello}}</p>");
        let pipeline = pipeline(&tmp, &catalogs);
        let fr = job(
            tmp.path(),
            "index.html",
            Arc::clone(&catalogs.by_language["fr_FR"]),
            &["mv [INPUT] [OUTPUT]"],
            true,
        );

        pipeline.run(&fr).unwrap();
        let out = std::fs::read_to_string(tmp.path().join("out/index.html.fr_FR")).unwrap();
        assert_eq!(out, "<p>Bonjour</p>");
    }

    #[test]
    fn reference_jobs_feed_the_harvest() {
        let (tmp, catalogs) = french_site();
        write_file(tmp.path(), "index.html", "{{ Hello }} {{locale}} {{New\n text}}");
        write_file(tmp.path(), "faq.html", "{{Hello}} {{Another}}");
        let pipeline = pipeline(&tmp, &catalogs);

        let reference = Arc::clone(&catalogs.reference);
        pipeline.render(&job(tmp.path(), "index.html", Arc::clone(&reference), &[], true)).unwrap();
        pipeline.render(&job(tmp.path(), "faq.html", reference, &[], true)).unwrap();
        write_file(tmp.path(), "fr.html", "{{Only French}}");
        pipeline
            .render(&job(tmp.path(), "fr.html", Arc::clone(&catalogs.by_language["fr_FR"]), &[], true))
            .unwrap();

        let harvested = pipeline.harvested_catalog();
        let ids: Vec<_> = harvested.entries().map(|e| e.msgid.as_str()).collect();
        assert_eq!(ids, vec!["Another", "Hello", "New text"]);
        assert_eq!(harvested.get("Hello").unwrap().comment, "index.html");
        assert_eq!(harvested.get("Another").unwrap().comment, "faq.html");
    }

    #[test]
    fn failing_assembly_is_render_error() {
        let (tmp, catalogs) = french_site();
        let pipeline = pipeline(&tmp, &catalogs);
        let result = pipeline.run(&job(tmp.path(), "missing.html", Arc::clone(&catalogs.reference), &[], false));
        assert!(matches!(result, Err(RenderError::Assemble(AssembleError::MissingResource { .. }))));
    }
}
