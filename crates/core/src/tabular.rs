use anyhow::{Context, Result};
use encoding_rs::{SHIFT_JIS, UTF_8};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    ShiftJis,
}

impl TextEncoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        let enc = match self {
            TextEncoding::Utf8 => UTF_8,
            TextEncoding::ShiftJis => SHIFT_JIS,
        };
        let (cow, _, had_errors) = enc.decode(bytes);
        if had_errors {
            tracing::debug!(encoding = enc.name(), "replacement characters while decoding");
        }
        cow.into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Url(String),
    Path(PathBuf),
}

impl Location {
    pub fn parse(s: &str) -> Self {
        let t = s.trim();
        if t.starts_with("http://") || t.starts_with("https://") {
            Location::Url(t.to_string())
        } else {
            Location::Path(PathBuf::from(t))
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Url(u) => f.write_str(u),
            Location::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

pub async fn fetch_bytes(http: &reqwest::Client, location: &Location) -> Result<Vec<u8>> {
    match location {
        Location::Url(url) => {
            let res = http
                .get(url.as_str())
                .send()
                .await
                .with_context(|| format!("download failed: {url}"))?;
            let status = res.status();
            let bytes = res
                .bytes()
                .await
                .with_context(|| format!("read body failed: {url}"))?;
            if !status.is_success() {
                anyhow::bail!("download HTTP {status}: {url}");
            }
            Ok(bytes.to_vec())
        }
        Location::Path(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("read {} failed", path.display())),
    }
}

/// Lowercase and drop all whitespace, so `"Local Code"` becomes `"localcode"`.
pub fn normalize_header(h: &str) -> String {
    h.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone)]
pub struct CsvOptions<'a> {
    pub encoding: TextEncoding,
    pub skip_rows: usize,
    pub normalize_headers: bool,
    pub renames: &'a [(&'a str, &'a str)],
}

impl Default for CsvOptions<'_> {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::Utf8,
            skip_rows: 0,
            normalize_headers: false,
            renames: &[],
        }
    }
}

pub fn read_csv<T: DeserializeOwned>(bytes: &[u8], opts: &CsvOptions<'_>) -> Result<Vec<T>> {
    let text = opts.encoding.decode(bytes);
    let body = skip_lines(&text, opts.skip_rows);

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = rdr.headers().context("read csv header failed")?.clone();
    let headers: csv::StringRecord = headers
        .iter()
        .map(|h| {
            let h = h.trim_start_matches('\u{feff}');
            let h = if opts.normalize_headers {
                normalize_header(h)
            } else {
                h.to_string()
            };
            opts.renames
                .iter()
                .find(|(from, _)| *from == h)
                .map(|(_, to)| to.to_string())
                .unwrap_or(h)
        })
        .collect();
    rdr.set_headers(headers);

    let mut out = Vec::new();
    for (idx, row) in rdr.deserialize::<T>().enumerate() {
        // +2: one for the header line, one for 1-based numbering.
        let line = idx + opts.skip_rows + 2;
        out.push(row.with_context(|| format!("malformed csv row at line {line}"))?);
    }
    Ok(out)
}

fn skip_lines(text: &str, n: usize) -> &str {
    let mut rest = text;
    for _ in 0..n {
        match rest.find('\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return "",
        }
    }
    rest
}

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {} failed", parent.display()))?;
    }
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("open {} for writing failed", path.display()))?;
    for row in rows {
        wtr.serialize(row).context("serialize csv row failed")?;
    }
    wtr.flush()
        .with_context(|| format!("flush {} failed", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column(name)
            .with_context(|| format!("missing column {name:?} (have {:?})", self.headers))
    }
}

pub fn read_xlsx_first_sheet(bytes: Vec<u8>) -> Result<Table> {
    use calamine::{open_workbook_from_rs, Reader, Xlsx};
    use std::io::Cursor;

    let mut wb: Xlsx<_> =
        open_workbook_from_rs(Cursor::new(bytes)).context("open xlsx workbook failed")?;
    let range = wb
        .worksheet_range_at(0)
        .context("workbook has no sheets")?
        .context("read first worksheet failed")?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|r| r.iter().map(cell_to_string).collect())
        .unwrap_or_default();
    let rows = rows
        .map(|r| r.iter().map(cell_to_string).collect())
        .collect();
    Ok(Table { headers, rows })
}

fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        // Codes come back as floats; keep "1301" rather than "1301.0".
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}
