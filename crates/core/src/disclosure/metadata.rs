use crate::disclosure::error::ScrapeError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Era {
    Heisei,
    Reiwa,
}

impl Era {
    pub const ALL: [Era; 2] = [Era::Heisei, Era::Reiwa];

    pub fn marker(self) -> char {
        match self {
            Era::Heisei => 'H',
            Era::Reiwa => 'R',
        }
    }

    pub fn offset(self) -> i64 {
        match self {
            Era::Heisei => 1988,
            Era::Reiwa => 2018,
        }
    }

    fn detect(line: &str) -> Option<Era> {
        Era::ALL.into_iter().find(|era| line.contains(era.marker()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingMetadata {
    pub filing_datetime: Option<NaiveDateTime>,
    pub filing_title: Option<String>,
    pub edinet_code: Option<String>,
    pub issuer_name: Option<String>,
    pub remarks: Option<String>,
}

impl FilingMetadata {
    pub fn filing_date(&self) -> Option<NaiveDate> {
        self.filing_datetime.map(|dt| dt.date())
    }
}

/// Parses the text of a search-result row: submission date on the first line,
/// then title, EDINET code, issuer name and a trailing remarks column.
///
/// A first line without a `<digits>.` prefix is an extraction error. A prefix
/// that does not form a valid date only nulls `filing_datetime`.
pub fn extract_filing_metadata(block: &str) -> Result<FilingMetadata, ScrapeError> {
    let mut lines = block.lines();
    let first = lines
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ScrapeError::Extraction("empty metadata block".to_string()))?;

    let gregorian = to_gregorian_date_string(first)?;
    let filing_datetime = parse_dotted_datetime(&gregorian);
    if filing_datetime.is_none() {
        tracing::debug!(raw = first, resolved = %gregorian, "unparsable filing date");
    }

    let mut next_field = || {
        lines
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(FilingMetadata {
        filing_datetime,
        filing_title: next_field(),
        edinet_code: next_field(),
        issuer_name: next_field(),
        remarks: next_field(),
    })
}

pub fn to_gregorian_date_string(line: &str) -> Result<String, ScrapeError> {
    let number = leading_number(line).ok_or_else(|| {
        ScrapeError::Extraction(format!("no numeric date prefix in {line:?}"))
    })?;

    let year = match Era::detect(line) {
        Some(era) => number.map(|n| n.saturating_add(era.offset())),
        None => number,
    };
    let rest = line.split_once('.').map(|(_, rest)| rest).unwrap_or("");

    Ok(match year {
        Some(year) => format!("{year}.{rest}"),
        // Too many digits for a year; the result will simply not parse.
        None => format!("overflow.{rest}"),
    })
}

/// First run of ASCII digits that is immediately followed by a dot. The inner
/// `None` means the digits exist but do not fit an `i64`.
fn leading_number(line: &str) -> Option<Option<i64>> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if bytes.get(i) == Some(&b'.') {
                return Some(line[start..i].parse::<i64>().ok());
            }
        } else {
            i += 1;
        }
    }
    None
}

fn parse_dotted_datetime(s: &str) -> Option<NaiveDateTime> {
    let mut parts = s.split_whitespace();
    let date_part = parts.next()?;
    let time_part = parts.next();
    if parts.next().is_some() {
        return None;
    }

    let mut ymd = date_part.split('.');
    let (y, m, d) = (ymd.next()?, ymd.next()?, ymd.next()?);
    if ymd.next().is_some() {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(
        y.parse::<i32>().ok()?,
        m.parse::<u32>().ok()?,
        d.parse::<u32>().ok()?,
    )?;

    let time = match time_part {
        None => NaiveTime::MIN,
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
            .ok()?,
    };
    Some(date.and_time(time))
}
