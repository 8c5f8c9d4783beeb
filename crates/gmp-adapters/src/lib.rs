//! Source collectors: turn one upstream listing page into candidate records.
//!
//! Each collector reads its page either from a captured fixture bundle or from
//! the live site, then maps the page's table rows into [`CandidateRecord`]s.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gmp_core::{CandidateRecord, Source};
use gmp_storage::{FetchError, FetchPolicy, FetchedPage, PageFetcher};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::fs as async_fs;
use tracing::{debug, warn};

mod chittorgarh;
mod investorgain;
mod ipowatch;
pub mod table;

pub use chittorgarh::ChittorgarhCollector;
pub use investorgain::InvestorGainCollector;
pub use ipowatch::IpoWatchCollector;
pub use table::{extract_tables, HtmlCell, HtmlTable};

pub const CRATE_NAME: &str = "gmp-adapters";

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Where a collector reads its listing page from.
#[derive(Debug, Clone)]
pub enum PageOrigin {
    /// A captured `bundle.json` on disk.
    Fixture(PathBuf),
    /// The live listing page. With `capture_dir` set, every fetched page is
    /// also saved there as a replayable fixture bundle.
    Live {
        url: String,
        fetcher: Arc<PageFetcher>,
        policy: FetchPolicy,
        capture_dir: Option<PathBuf>,
    },
}

/// One listing page, regardless of where it came from.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub source: Source,
    pub url: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub fixture_id: String,
    pub source: Source,
    pub captured_from_url: String,
    pub fetched_at: DateTime<Utc>,
    pub raw_artifact: FixtureRawArtifact,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureRawArtifact {
    pub content_type: String,
    pub path: Option<String>,
    pub inline_text: Option<String>,
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    let path = path.as_ref();
    let mut bundle: FixtureBundle = read_json_file(path)?;
    hydrate_inline_raw_artifact(path, &mut bundle)?;
    Ok(bundle)
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn hydrate_inline_raw_artifact(bundle_path: &Path, bundle: &mut FixtureBundle) -> Result<()> {
    if bundle.raw_artifact.inline_text.is_some() {
        return Ok(());
    }
    let Some(rel_path) = &bundle.raw_artifact.path else {
        return Ok(());
    };
    let raw_path = bundle_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(rel_path);
    let raw = fs::read_to_string(&raw_path)
        .with_context(|| format!("reading fixture raw artifact {}", raw_path.display()))?;
    bundle.raw_artifact.inline_text = Some(raw);
    Ok(())
}

impl FixtureBundle {
    pub fn into_page(self) -> Result<RawPage, CollectorError> {
        let html = self.raw_artifact.inline_text.ok_or_else(|| {
            CollectorError::Message(format!("fixture {} has no raw page", self.fixture_id))
        })?;
        Ok(RawPage {
            source: self.source,
            url: self.captured_from_url,
            html,
            fetched_at: self.fetched_at,
        })
    }
}

/// Resolve `origin` to a page for `source`.
pub async fn load_page(source: Source, origin: &PageOrigin) -> Result<RawPage, CollectorError> {
    match origin {
        PageOrigin::Fixture(path) => {
            let bundle = load_fixture_bundle(path)?;
            if bundle.source != source {
                return Err(CollectorError::Message(format!(
                    "bundle source={} does not match collector source={}",
                    bundle.source, source
                )));
            }
            bundle.into_page()
        }
        PageOrigin::Live {
            url,
            fetcher,
            policy,
            capture_dir,
        } => {
            let fetched = fetcher.fetch_page(source, url, policy).await?;
            if let Some(dir) = capture_dir {
                match capture_fixture(dir, &fetched).await {
                    Ok(path) => debug!(source = %source, path = %path.display(), "captured page"),
                    Err(err) => warn!(source = %source, error = %err, "page capture failed"),
                }
            }
            Ok(RawPage {
                source,
                url: fetched.url.clone(),
                html: fetched.html(),
                fetched_at: fetched.fetched_at,
            })
        }
    }
}

/// Save a fetched page as `<dir>/<source>/<timestamp>-<hash>/bundle.json` plus
/// `raw/listing.html`, the layout [`load_fixture_bundle`] reads back.
/// Returns the bundle path; a bundle already on disk is left as is.
pub async fn capture_fixture(dir: &Path, page: &FetchedPage) -> Result<PathBuf> {
    let hash = page.content_hash();
    let fixture_id = format!(
        "{}-{}",
        page.fetched_at.format("%Y%m%dT%H%M%SZ"),
        &hash[..12]
    );
    let bundle_dir = dir.join(page.source.as_str()).join(&fixture_id);
    let bundle_path = bundle_dir.join("bundle.json");
    if async_fs::try_exists(&bundle_path).await.unwrap_or(false) {
        return Ok(bundle_path);
    }

    let raw_rel = "raw/listing.html";
    let raw_path = bundle_dir.join(raw_rel);
    if let Some(parent) = raw_path.parent() {
        async_fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    async_fs::write(&raw_path, &page.body)
        .await
        .with_context(|| format!("writing {}", raw_path.display()))?;

    let bundle = FixtureBundle {
        fixture_id,
        source: page.source,
        captured_from_url: page.url.clone(),
        fetched_at: page.fetched_at,
        raw_artifact: FixtureRawArtifact {
            content_type: "text/html".to_string(),
            path: Some(raw_rel.to_string()),
            inline_text: None,
        },
        notes: Some(format!("live capture after {} attempt(s)", page.attempts)),
    };
    let json = serde_json::to_vec_pretty(&bundle).context("serializing fixture bundle")?;
    async_fs::write(&bundle_path, json)
        .await
        .with_context(|| format!("writing {}", bundle_path.display()))?;
    Ok(bundle_path)
}

/// Ingress contract: one upstream source, one listing page, many candidates.
///
/// Implementations hold no state between runs; the same page always maps to
/// the same candidates.
#[async_trait]
pub trait Collector: Send + Sync {
    fn source(&self) -> Source;

    fn origin(&self) -> &PageOrigin;

    fn parse_page(&self, page: &RawPage) -> Result<Vec<CandidateRecord>, CollectorError>;

    async fn collect(&self) -> Result<Vec<CandidateRecord>, CollectorError> {
        let page = load_page(self.source(), self.origin()).await?;
        self.parse_page(&page)
    }
}

pub fn collector_for_source(source: Source, origin: PageOrigin) -> Box<dyn Collector> {
    match source {
        Source::IpoWatch => Box::new(IpoWatchCollector::new(origin)),
        Source::InvestorGain => Box::new(InvestorGainCollector::new(origin)),
        Source::Chittorgarh => Box::new(ChittorgarhCollector::new(origin)),
    }
}
