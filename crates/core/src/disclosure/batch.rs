use crate::disclosure::driver::PortalDriver;
use crate::disclosure::error::ScrapeError;
use crate::disclosure::metadata::{extract_filing_metadata, FilingMetadata};
use crate::disclosure::navigator::{NavigatorOptions, PortalNavigator};
use crate::disclosure::store::ContentStore;
use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// One company to scrape: `identifier` goes into the search URL, `label`
/// names the saved files (a ticker, usually).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTarget {
    pub identifier: String,
    pub label: String,
}

impl BatchTarget {
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            label: identifier.clone(),
            identifier,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub identifier: String,
    pub filing_datetime: Option<NaiveDateTime>,
    pub filing_title: Option<String>,
    pub edinet_code: Option<String>,
    pub issuer_name: Option<String>,
    pub remarks: Option<String>,
    pub status: BatchStatus,
    pub content_path: Option<String>,
    pub error: Option<String>,
}

impl BatchResult {
    fn new(target: &BatchTarget, meta: FilingMetadata, status: BatchStatus) -> Self {
        Self {
            identifier: target.identifier.clone(),
            filing_datetime: meta.filing_datetime,
            filing_title: meta.filing_title,
            edinet_code: meta.edinet_code,
            issuer_name: meta.issuer_name,
            remarks: meta.remarks,
            status,
            content_path: None,
            error: None,
        }
    }

    fn success(target: &BatchTarget, meta: FilingMetadata, path: &Path) -> Self {
        Self {
            content_path: Some(path.display().to_string()),
            ..Self::new(target, meta, BatchStatus::Success)
        }
    }

    fn failed(target: &BatchTarget, meta: Option<FilingMetadata>, err: &ScrapeError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::new(target, meta.unwrap_or_default(), BatchStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: usize,
    pub rows: usize,
    pub successes: usize,
    pub failures: usize,
}

impl BatchSummary {
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(self).context("serialize batch summary failed")?;
        std::fs::write(path, body).with_context(|| format!("write {} failed", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub menu_frames: Vec<String>,
    pub section_text: String,
    pub content_frames: Vec<String>,
    pub progress_every: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            menu_frames: vec!["viewFrame".to_string(), "menuFrame2".to_string()],
            section_text: "提出会社の状況".to_string(),
            content_frames: vec!["viewFrame".to_string(), "mainFrame".to_string()],
            progress_every: 10,
        }
    }
}

pub struct BatchRunner {
    nav_options: NavigatorOptions,
    options: BatchOptions,
    store: ContentStore,
}

impl BatchRunner {
    pub fn new(nav_options: NavigatorOptions, options: BatchOptions, store: ContentStore) -> Self {
        Self {
            nav_options,
            options,
            store,
        }
    }

    /// Scrapes every target in order, appending rows to `out`.
    ///
    /// Per-identifier failures become `FAILED` rows. Only a lost or
    /// unobtainable browser session is returned as an error; rows appended
    /// before that stay in `out`. The session is closed on every path.
    pub async fn run<D: PortalDriver>(
        &self,
        driver: D,
        targets: &[BatchTarget],
        out: &mut Vec<BatchResult>,
    ) -> Result<BatchSummary, ScrapeError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let first_row = out.len();

        let mut nav = PortalNavigator::new(driver, self.nav_options.clone());
        let outcome = match nav.open_session().await {
            Ok(()) => self.run_targets(&mut nav, targets, out).await,
            Err(err) => Err(err),
        };
        let closed = nav.close_session().await;

        if let Err(err) = outcome {
            tracing::error!(%run_id, error = %err, rows = out.len() - first_row, "batch aborted");
            return Err(err);
        }
        if let Err(err) = closed {
            tracing::warn!(%run_id, error = %err, "closing browser session failed");
        }

        let rows = &out[first_row..];
        let successes = rows
            .iter()
            .filter(|r| r.status == BatchStatus::Success)
            .count();
        let summary = BatchSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            targets: targets.len(),
            rows: rows.len(),
            successes,
            failures: rows.len() - successes,
        };
        tracing::info!(
            %run_id,
            targets = summary.targets,
            rows = summary.rows,
            successes = summary.successes,
            failures = summary.failures,
            "batch finished"
        );
        Ok(summary)
    }

    async fn run_targets<D: PortalDriver>(
        &self,
        nav: &mut PortalNavigator<D>,
        targets: &[BatchTarget],
        out: &mut Vec<BatchResult>,
    ) -> Result<(), ScrapeError> {
        let total = targets.len();
        let mut failed_targets = 0usize;

        for (idx, target) in targets.iter().enumerate() {
            let before = out.len();
            self.run_target(nav, target, out).await?;
            if out[before..].iter().any(|r| r.status == BatchStatus::Failed) {
                failed_targets += 1;
            }

            let n = idx + 1;
            let every = self.options.progress_every;
            if n == 1 || n == total || (every != 0 && n % every == 0) {
                tracing::info!(
                    processed = n,
                    total,
                    rows = out.len(),
                    failed_targets,
                    "filing scrape progress"
                );
            }
        }
        Ok(())
    }

    async fn run_target<D: PortalDriver>(
        &self,
        nav: &mut PortalNavigator<D>,
        target: &BatchTarget,
        out: &mut Vec<BatchResult>,
    ) -> Result<(), ScrapeError> {
        let texts = match self.collect_link_texts(nav, target).await {
            Ok(texts) => texts,
            Err(err) => return record_failure(target, None, err, out),
        };

        for text in &texts {
            let mut meta = None;
            match self.scrape_filing(nav, target, text, &mut meta).await {
                Ok((parsed, path)) => out.push(BatchResult::success(target, parsed, &path)),
                Err(err) => record_failure(target, meta, err, out)?,
            }
        }
        Ok(())
    }

    async fn collect_link_texts<D: PortalDriver>(
        &self,
        nav: &mut PortalNavigator<D>,
        target: &BatchTarget,
    ) -> Result<Vec<String>, ScrapeError> {
        nav.close_extra_windows().await?;
        nav.load_search_results(&target.identifier).await?;
        let texts: Vec<String> = nav
            .list_result_links()
            .await?
            .into_iter()
            .map(|link| link.display_text)
            .collect();
        if texts.is_empty() {
            return Err(ScrapeError::not_found(
                format!("original filing links for {}", target.identifier),
                Duration::ZERO,
            ));
        }
        tracing::debug!(identifier = %target.identifier, links = texts.len(), "filing links found");
        Ok(texts)
    }

    async fn scrape_filing<D: PortalDriver>(
        &self,
        nav: &mut PortalNavigator<D>,
        target: &BatchTarget,
        link_text: &str,
        meta: &mut Option<FilingMetadata>,
    ) -> Result<(FilingMetadata, PathBuf), ScrapeError> {
        nav.close_extra_windows().await?;
        let link = nav.find_result_link(link_text).await?;
        let raw = nav.link_metadata_text(&link).await?;
        let parsed = extract_filing_metadata(&raw)?;
        *meta = Some(parsed.clone());

        let menu_frames: Vec<&str> = self.options.menu_frames.iter().map(String::as_str).collect();
        let content_frames: Vec<&str> = self
            .options
            .content_frames
            .iter()
            .map(String::as_str)
            .collect();

        nav.open_link(&link).await?;
        nav.select_section(&menu_frames, &self.options.section_text)
            .await?;
        nav.enter_nested_frame(&content_frames).await?;
        let html = nav.capture_content().await?;
        let path = self
            .store
            .save(&target.label, parsed.filing_date(), &html)
            .await?;
        nav.close_extra_windows().await?;
        Ok((parsed, path))
    }
}

fn record_failure(
    target: &BatchTarget,
    meta: Option<FilingMetadata>,
    err: ScrapeError,
    out: &mut Vec<BatchResult>,
) -> Result<(), ScrapeError> {
    if err.is_fatal() {
        return Err(err);
    }
    tracing::warn!(identifier = %target.identifier, error = %err, "filing scrape failed");
    out.push(BatchResult::failed(target, meta, &err));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disclosure::fake::{test_options, FakeFiling, FakePortal};
    use chrono::NaiveDate;

    fn runner(dir: &Path) -> BatchRunner {
        BatchRunner::new(test_options(), BatchOptions::default(), ContentStore::new(dir))
    }

    fn fishery_portal() -> FakePortal {
        FakePortal::new().with_filings(
            "1301",
            vec![
                FakeFiling::annual(
                    105,
                    "R3.6.25 15:00\n有価証券報告書－第105期\nE00012\n株式会社極洋\n",
                    "<html>105</html>",
                ),
                FakeFiling::amendment(104, "R2.7.1\n訂正\nE00012\n株式会社極洋\n"),
                FakeFiling::annual(
                    104,
                    "R2.6.26 09:30\n有価証券報告書－第104期\nE00012\n株式会社極洋\n",
                    "<html>104</html>",
                ),
            ],
        )
    }

    #[tokio::test]
    async fn invalid_identifier_yields_one_failed_row() {
        let dir = tempfile::tempdir().unwrap();
        let targets = vec![BatchTarget::new("1301"), BatchTarget::new("9999-invalid")];
        let mut out = Vec::new();

        let summary = runner(dir.path())
            .run(fishery_portal(), &targets, &mut out)
            .await
            .unwrap();

        assert!(out.len() >= targets.len());
        assert_eq!(summary.rows, out.len());
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 1);

        let ok: Vec<_> = out.iter().filter(|r| r.identifier == "1301").collect();
        assert_eq!(ok.len(), 2, "the amendment is skipped");
        assert!(ok.iter().all(|r| r.status == BatchStatus::Success));
        assert_eq!(
            ok[0].filing_datetime.map(|d| d.date()),
            NaiveDate::from_ymd_opt(2021, 6, 25)
        );

        let bad: Vec<_> = out.iter().filter(|r| r.identifier == "9999-invalid").collect();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].status, BatchStatus::Failed);
        assert!(bad[0].filing_datetime.is_none());
        assert!(bad[0].filing_title.is_none());
        assert!(bad[0].edinet_code.is_none());
        assert!(bad[0].issuer_name.is_none());
        assert!(bad[0].error.is_some());
    }

    #[tokio::test]
    async fn saves_section_content_per_filing_date() {
        let dir = tempfile::tempdir().unwrap();
        let targets = vec![BatchTarget::new("1301").with_label("1301")];
        let mut out = Vec::new();
        runner(dir.path())
            .run(fishery_portal(), &targets, &mut out)
            .await
            .unwrap();

        let saved = std::fs::read_to_string(dir.path().join("1301_20210625.html")).unwrap();
        assert_eq!(saved, "<html>105</html>");
        let saved = std::fs::read_to_string(dir.path().join("1301_20200626.html")).unwrap();
        assert_eq!(saved, "<html>104</html>");
        assert!(out[0].content_path.as_deref().unwrap().ends_with("1301_20210625.html"));
    }

    #[tokio::test]
    async fn frame_failure_keeps_partial_metadata_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let portal = fishery_portal()
            .without_frame("mainFrame")
            .with_filings(
                "E00002",
                vec![FakeFiling::annual(1, "R1.6.28\nx\nE00002\nB\n", "<html>b</html>")],
            );
        let targets = vec![BatchTarget::new("1301"), BatchTarget::new("E00002")];
        let mut out = Vec::new();
        let summary = runner(dir.path()).run(portal, &targets, &mut out).await.unwrap();

        assert_eq!(summary.successes, 0);
        assert_eq!(out.len(), 3);
        for row in &out {
            assert_eq!(row.status, BatchStatus::Failed);
            assert!(row.filing_datetime.is_some(), "metadata was parsed before the failure");
            assert!(row.error.as_deref().unwrap().contains("mainFrame"));
        }
    }

    #[tokio::test]
    async fn malformed_row_text_is_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::new().with_filings(
            "E00003",
            vec![FakeFiling::annual(3, "提出日不明\nx", "<html></html>")],
        );
        let mut out = Vec::new();
        runner(dir.path())
            .run(portal, &[BatchTarget::new("E00003")], &mut out)
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].status, BatchStatus::Failed);
        assert!(out[0].filing_datetime.is_none());
        assert!(out[0].error.as_deref().unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn lost_session_aborts_but_keeps_rows_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let portal = fishery_portal().losing_session_on("E00009");
        let log = portal.log();
        let targets = vec![
            BatchTarget::new("1301"),
            BatchTarget::new("E00009"),
            BatchTarget::new("E00010"),
        ];
        let mut out = Vec::new();

        let err = runner(dir.path())
            .run(portal, &targets, &mut out)
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(out.len(), 2, "rows from 1301 survive the abort");
        let log = log.lock().unwrap();
        assert_eq!(log.quit_calls, 1);
        assert!(!log.visited.contains(&"E00010".to_string()));
    }

    #[tokio::test]
    async fn browser_without_home_window_aborts_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let portal = fishery_portal().failing_home();
        let log = portal.log();
        let mut out = Vec::new();

        let err = runner(dir.path())
            .run(portal, &[BatchTarget::new("1301")], &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::Session(_)), "{err}");
        assert!(out.is_empty());
        let log = log.lock().unwrap();
        assert_eq!(log.quit_calls, 1);
        assert!(log.visited.is_empty());
    }

    #[tokio::test]
    async fn navigation_failures_become_rows_and_the_run_finishes() {
        for portal in [
            fishery_portal().without_popup(),
            fishery_portal().without_section(),
            fishery_portal().failing_page_source(),
        ] {
            let dir = tempfile::tempdir().unwrap();
            let log = portal.log();
            let mut out = Vec::new();

            let summary = runner(dir.path())
                .run(portal, &[BatchTarget::new("1301")], &mut out)
                .await
                .unwrap();

            assert_eq!(summary.failures, 2);
            assert_eq!(summary.successes, 0);
            for row in &out {
                assert_eq!(row.status, BatchStatus::Failed);
                assert_eq!(row.edinet_code.as_deref(), Some("E00012"));
                assert!(row.content_path.is_none());
            }
            assert_eq!(log.lock().unwrap().quit_calls, 1);
        }
    }

    #[test]
    fn status_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&BatchStatus::Failed).unwrap(), "\"FAILED\"");
        assert_eq!(serde_json::to_string(&BatchStatus::Success).unwrap(), "\"SUCCESS\"");
    }
}
