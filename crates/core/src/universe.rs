use crate::disclosure::BatchTarget;
use crate::tabular::{self, CsvOptions, Location, Table, TextEncoding};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

pub const LISTED: &str = "上場";
pub const TOPIX_CODE_COLUMN: &str = "コード";
pub const TOPIX_NAME_COLUMN: &str = "銘柄名";
pub const TOPIX_WEIGHT_COLUMN: &str = "TOPIXに占める個別銘柄のウェイト";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EdinetListRow {
    #[serde(rename = "ＥＤＩＮＥＴコード", alias = "EDINETコード")]
    pub edinet_code: String,
    #[serde(rename = "上場区分", default)]
    pub listing: String,
    #[serde(rename = "提出者名", default)]
    pub issuer_name: String,
    #[serde(rename = "証券コード", default)]
    pub securities_code: String,
}

impl EdinetListRow {
    pub fn is_listed(&self) -> bool {
        self.listing == LISTED
    }

    pub fn ticker(&self) -> String {
        self.securities_code.chars().take(4).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopixWeight {
    pub ticker: String,
    pub name: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseRow {
    pub ticker: String,
    pub name: String,
    pub topix_weight: Option<f64>,
    pub edinet_code: Option<String>,
    pub issuer_name: Option<String>,
}

impl UniverseRow {
    pub fn batch_target(&self) -> Option<BatchTarget> {
        let code = self.edinet_code.as_deref().filter(|c| !c.is_empty())?;
        Some(BatchTarget::new(code).with_label(&self.ticker))
    }
}

pub fn parse_edinet_list(bytes: &[u8]) -> Result<Vec<EdinetListRow>> {
    let rows: Vec<EdinetListRow> = tabular::read_csv(
        bytes,
        &CsvOptions {
            encoding: TextEncoding::ShiftJis,
            skip_rows: 1,
            ..CsvOptions::default()
        },
    )
    .context("parse EDINET code list failed")?;
    let total = rows.len();
    let listed: Vec<_> = rows.into_iter().filter(EdinetListRow::is_listed).collect();
    tracing::debug!(total, listed = listed.len(), "EDINET code list parsed");
    Ok(listed)
}

pub fn parse_topix_weights(table: &Table) -> Result<Vec<TopixWeight>> {
    let code_col = table.require_column(TOPIX_CODE_COLUMN)?;
    let name_col = table.column(TOPIX_NAME_COLUMN);
    let weight_col = table.require_column(TOPIX_WEIGHT_COLUMN)?;

    let cell = |row: &[String], idx: usize| row.get(idx).map(|s| s.trim()).unwrap_or_default().to_string();

    let mut out = Vec::new();
    for row in &table.rows {
        let ticker = cell(row, code_col);
        if ticker.is_empty() {
            continue;
        }
        let raw_weight = cell(row, weight_col);
        let weight = parse_weight(&raw_weight);
        if weight.is_none() && !raw_weight.is_empty() {
            tracing::warn!(%ticker, weight = %raw_weight, "unparsable TOPIX weight");
        }
        out.push(TopixWeight {
            name: name_col.map(|i| cell(row, i)).unwrap_or_default(),
            ticker,
            weight,
        });
    }
    Ok(out)
}

fn parse_weight(s: &str) -> Option<f64> {
    let t = s.trim().trim_end_matches('%').trim();
    if t.is_empty() {
        return None;
    }
    t.parse().ok()
}

/// Left join of TOPIX constituents onto the EDINET list, heaviest first.
/// Constituents without a weight go last.
pub fn join_universe(topix: Vec<TopixWeight>, edinet: &[EdinetListRow]) -> Vec<UniverseRow> {
    let mut by_ticker: HashMap<String, &EdinetListRow> = HashMap::new();
    for row in edinet {
        // First listing wins on duplicate tickers.
        by_ticker.entry(row.ticker()).or_insert(row);
    }

    let mut out: Vec<UniverseRow> = topix
        .into_iter()
        .map(|t| {
            let hit = by_ticker.get(&t.ticker);
            UniverseRow {
                edinet_code: hit.map(|e| e.edinet_code.clone()),
                issuer_name: hit.map(|e| e.issuer_name.clone()),
                ticker: t.ticker,
                name: t.name,
                topix_weight: t.weight,
            }
        })
        .collect();

    out.sort_by(|a, b| match (a.topix_weight, b.topix_weight) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    out
}

pub async fn build_universe(
    http: &reqwest::Client,
    edinet_list: &Location,
    topix_weights: &Location,
) -> Result<Vec<UniverseRow>> {
    let edinet_bytes = tabular::fetch_bytes(http, edinet_list).await?;
    let edinet = parse_edinet_list(&edinet_bytes)?;

    let topix_bytes = tabular::fetch_bytes(http, topix_weights).await?;
    let table = tokio::task::spawn_blocking(move || tabular::read_xlsx_first_sheet(topix_bytes))
        .await
        .context("xlsx reader task failed")??;
    let topix = parse_topix_weights(&table)?;

    let rows = join_universe(topix, &edinet);
    let matched = rows.iter().filter(|r| r.edinet_code.is_some()).count();
    tracing::info!(
        constituents = rows.len(),
        matched,
        edinet_source = %edinet_list,
        topix_source = %topix_weights,
        "universe built"
    );
    Ok(rows)
}

pub fn read_universe_targets(path: &Path) -> Result<Vec<BatchTarget>> {
    let bytes = std::fs::read(path).with_context(|| format!("read {} failed", path.display()))?;
    let rows: Vec<UniverseRow> = tabular::read_csv(&bytes, &CsvOptions::default())?;

    let mut targets = Vec::with_capacity(rows.len());
    for row in &rows {
        match row.batch_target() {
            Some(t) => targets.push(t),
            None => tracing::warn!(ticker = %row.ticker, "no EDINET code; skipped"),
        }
    }
    Ok(targets)
}
