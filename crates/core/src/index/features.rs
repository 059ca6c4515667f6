use crate::index::master::IndexMembershipRecord;
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

pub const TOPIX: &str = "TOPIX";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    #[serde(rename = "topix_ffw_change")]
    TopixFfwChange,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TopixFfwChange => "topix_ffw_change",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A membership record together with its period-over-period features.
/// `prev_*`, `dffw` and `abs_dffw` are `None` for the first record of a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexFeatureRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub local_code: String,
    pub name: String,
    pub index_name: String,
    pub ffw: Option<f64>,
    pub shares: Option<f64>,
    pub share_change: Option<f64>,
    pub shares_before_ffw: Option<f64>,
    pub prev_index_name: Option<String>,
    pub prev_shares_before_ffw: Option<f64>,
    pub prev_ffw: Option<f64>,
    pub dffw: Option<f64>,
    pub abs_dffw: Option<f64>,
    pub old_shares: Option<f64>,
    pub event_type: Option<EventType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FfwChangeRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub name: String,
    pub share_change: Option<f64>,
    pub shares: Option<f64>,
    pub ffw: Option<f64>,
    pub prev_ffw: Option<f64>,
    pub dffw: Option<f64>,
    pub abs_dffw: Option<f64>,
}

impl From<&IndexFeatureRow> for FfwChangeRow {
    fn from(r: &IndexFeatureRow) -> Self {
        Self {
            date: r.date,
            ticker: r.ticker.clone(),
            name: r.name.clone(),
            share_change: r.share_change,
            shares: r.shares,
            ffw: r.ffw,
            prev_ffw: r.prev_ffw,
            dffw: r.dffw,
            abs_dffw: r.abs_dffw,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexFeatureTable {
    rows: Vec<IndexFeatureRow>,
}

impl IndexFeatureTable {
    pub fn derive(mut records: Vec<IndexMembershipRecord>) -> Self {
        records.sort_by(|a, b| {
            (a.date, &a.local_code, &a.index_name).cmp(&(b.date, &b.local_code, &b.index_name))
        });

        // Last seen (index_name, shares_before_ffw) per ticker.
        let mut by_ticker: HashMap<String, (String, Option<f64>)> = HashMap::new();
        // Last seen ffw per (ticker, index_name).
        let mut by_group: HashMap<(String, String), Option<f64>> = HashMap::new();

        let rows = records
            .into_iter()
            .map(|rec| {
                let ticker = rec.ticker();

                let (prev_index_name, prev_shares_before_ffw) = match by_ticker.insert(
                    ticker.clone(),
                    (rec.index_name.clone(), rec.shares_before_ffw),
                ) {
                    Some((name, shares)) => (Some(name), shares),
                    None => (None, None),
                };
                let prev_ffw = by_group
                    .insert((ticker.clone(), rec.index_name.clone()), rec.ffw)
                    .flatten();

                let dffw = match (rec.ffw, prev_ffw) {
                    (Some(cur), Some(prev)) => Some(cur - prev),
                    _ => None,
                };
                let old_shares = match (rec.shares, rec.share_change) {
                    (Some(shares), Some(change)) => Some(shares - change),
                    _ => None,
                };

                let mut row = IndexFeatureRow {
                    date: rec.date,
                    ticker,
                    local_code: rec.local_code,
                    name: rec.name,
                    index_name: rec.index_name,
                    ffw: rec.ffw,
                    shares: rec.shares,
                    share_change: rec.share_change,
                    shares_before_ffw: rec.shares_before_ffw,
                    prev_index_name,
                    prev_shares_before_ffw,
                    prev_ffw,
                    dffw,
                    abs_dffw: dffw.map(f64::abs),
                    old_shares,
                    event_type: None,
                };
                row.event_type = classify(&row);
                row
            })
            .collect();

        Self { rows }
    }

    pub fn rows(&self) -> &[IndexFeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn events_of_type(&self, event_type: EventType) -> Vec<FfwChangeRow> {
        let mut hits: Vec<&IndexFeatureRow> = self
            .rows
            .iter()
            .filter(|r| r.event_type == Some(event_type))
            .collect();
        hits.sort_by(|a, b| match (a.abs_dffw, b.abs_dffw) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        hits.into_iter().map(FfwChangeRow::from).collect()
    }
}

fn classify(row: &IndexFeatureRow) -> Option<EventType> {
    let stayed_in_topix =
        row.index_name == TOPIX && row.prev_index_name.as_deref() == Some(row.index_name.as_str());
    let had_shares = row.old_shares.is_some_and(|s| s > 0.0);
    (stayed_in_topix && had_shares).then_some(EventType::TopixFfwChange)
}
