use crate::tabular::{self, CsvOptions, TextEncoding};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

const RENAMES: &[(&str, &str)] = &[("indexclassification", "indexname")];
const DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%Y-%m-%d", "%Y%m%d"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMembershipRecord {
    #[serde(deserialize_with = "de_date")]
    pub date: NaiveDate,
    #[serde(rename = "localcode")]
    pub local_code: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "indexname")]
    pub index_name: String,
    #[serde(default, deserialize_with = "de_number")]
    pub ffw: Option<f64>,
    #[serde(rename = "no.ofshares", default, deserialize_with = "de_number")]
    pub shares: Option<f64>,
    #[serde(rename = "changeinno.ofshares", default, deserialize_with = "de_number")]
    pub share_change: Option<f64>,
    #[serde(rename = "no.ofsharesbeforeffw", default, deserialize_with = "de_number")]
    pub shares_before_ffw: Option<f64>,
}

impl IndexMembershipRecord {
    /// Four-digit securities code; local codes carry a trailing check digit.
    pub fn ticker(&self) -> String {
        self.local_code.trim().chars().take(4).collect()
    }
}

fn de_date<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
    let s = String::deserialize(d)?;
    parse_date(&s).ok_or_else(|| serde::de::Error::custom(format!("unrecognized date {s:?}")))
}

fn de_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let s: Option<String> = Option::deserialize(d)?;
    match s.as_deref().map(str::trim) {
        None | Some("") | Some("-") => Ok(None),
        Some(t) => t
            .replace(',', "")
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("not a number: {t:?}"))),
    }
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let t = s.trim();
    // Some files carry a time component ("2021/06/28 0:00:00").
    let t = t.split_whitespace().next().unwrap_or(t);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(t, fmt).ok())
}

pub fn parse_index_master_csv(bytes: &[u8]) -> Result<Vec<IndexMembershipRecord>> {
    tabular::read_csv(
        bytes,
        &CsvOptions {
            encoding: TextEncoding::ShiftJis,
            skip_rows: 0,
            normalize_headers: true,
            renames: RENAMES,
        },
    )
}

/// Loads and concatenates every file of an index-master set. `path` is either
/// a directory of CSV files or a ZIP archive of them; files are read in name
/// order.
pub fn load_index_master(path: &Path) -> Result<Vec<IndexMembershipRecord>> {
    let files = if path.is_dir() {
        read_dir_files(path)?
    } else {
        read_zip_files(path)?
    };
    anyhow::ensure!(!files.is_empty(), "no index master files in {}", path.display());

    let mut out = Vec::new();
    for (name, bytes) in &files {
        let rows = parse_index_master_csv(bytes).with_context(|| format!("parse {name} failed"))?;
        tracing::debug!(file = %name, rows = rows.len(), "index master file loaded");
        out.extend(rows);
    }
    tracing::info!(files = files.len(), rows = out.len(), source = %path.display(), "index master loaded");
    Ok(out)
}

fn read_dir_files(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read dir {} failed", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            !p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
        })
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|p| {
            let bytes = std::fs::read(&p).with_context(|| format!("read {} failed", p.display()))?;
            Ok((p.display().to_string(), bytes))
        })
        .collect()
}

fn read_zip_files(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("open {} failed", path.display()))?;
    let mut zip = zip::ZipArchive::new(file).context("open zip archive failed")?;

    let mut out = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).context("open zip entry failed")?;
        let name = entry.name().to_string();
        if entry.is_dir() || !name.to_ascii_lowercase().ends_with(".csv") {
            continue;
        }
        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .with_context(|| format!("read zip entry {name} failed"))?;
        out.push((name, buf));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::SHIFT_JIS;
    use std::io::Write;

    const HEADER: &str = "Date,Local Code,Name,Index Classification,No. of Shares,Change in No. of Shares,FFW,No. of Shares before FFW\n";

    fn sjis(s: &str) -> Vec<u8> {
        SHIFT_JIS.encode(s).0.into_owned()
    }

    #[test]
    fn parses_normalized_shift_jis_file() {
        let text = format!("{HEADER}2021/06/28,13010,極洋,TOPIX,\"10,928,283\",0,0.7,\"10,928,283\"\n");
        let rows = parse_index_master_csv(&sjis(&text)).unwrap();
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.date, NaiveDate::from_ymd_opt(2021, 6, 28).unwrap());
        assert_eq!(r.ticker(), "1301");
        assert_eq!(r.name, "極洋");
        assert_eq!(r.index_name, "TOPIX");
        assert_eq!(r.shares, Some(10_928_283.0));
        assert_eq!(r.share_change, Some(0.0));
        assert_eq!(r.ffw, Some(0.7));
    }

    #[test]
    fn blank_numbers_are_null_and_garbage_is_an_error() {
        let ok = format!("{HEADER}20210628,13010,A,TOPIX,,,,\n");
        let rows = parse_index_master_csv(&sjis(&ok)).unwrap();
        assert_eq!(rows[0].ffw, None);
        assert_eq!(rows[0].shares, None);

        let bad = format!("{HEADER}2021-06-28,13010,A,TOPIX,lots,0,0.5,1\n");
        assert!(parse_index_master_csv(&sjis(&bad)).is_err());
    }

    #[test]
    fn accepts_several_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2021, 7, 30);
        assert_eq!(parse_date("2021/07/30"), expected);
        assert_eq!(parse_date("2021-07-30"), expected);
        assert_eq!(parse_date("20210730"), expected);
        assert_eq!(parse_date("2021/7/30 0:00:00"), expected);
        assert_eq!(parse_date("30.07.2021"), None);
    }

    #[test]
    fn loads_directory_and_zip_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            ("im_202107.csv", format!("{HEADER}2021/07/30,13010,A,TOPIX,100,0,0.6,100\n")),
            ("im_202106.csv", format!("{HEADER}2021/06/30,13010,A,TOPIX,100,0,0.5,100\n")),
        ];
        for (name, body) in &files {
            std::fs::write(dir.path().join(name), sjis(body)).unwrap();
        }

        let rows = load_index_master(dir.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ffw, Some(0.5));

        let zip_path = dir.path().join("set.zip");
        let mut zw = zip::ZipWriter::new(std::fs::File::create(&zip_path).unwrap());
        for (name, body) in &files {
            zw.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zw.write_all(&sjis(body)).unwrap();
        }
        zw.finish().unwrap();

        let rows = load_index_master(&zip_path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].ffw, Some(0.6));
    }
}
