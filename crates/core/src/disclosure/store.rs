use crate::disclosure::error::ScrapeError;
use chrono::NaiveDate;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<identifier>_<YYYYMMDD>.html`, or `<identifier>_undated.html` when the
    /// filing date could not be parsed.
    pub fn file_name(identifier: &str, filing_date: Option<NaiveDate>) -> String {
        let id: String = identifier
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        match filing_date {
            Some(d) => format!("{id}_{}.html", d.format("%Y%m%d")),
            None => format!("{id}_undated.html"),
        }
    }

    pub fn path_for(&self, identifier: &str, filing_date: Option<NaiveDate>) -> PathBuf {
        self.dir.join(Self::file_name(identifier, filing_date))
    }

    pub async fn save(
        &self,
        identifier: &str,
        filing_date: Option<NaiveDate>,
        content: &str,
    ) -> Result<PathBuf, ScrapeError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(identifier, filing_date);
        tokio::fs::write(&path, content.as_bytes()).await?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "saved filing content");
        Ok(path)
    }

    pub async fn load(&self, identifier: &str, filing_date: Option<NaiveDate>) -> std::io::Result<String> {
        tokio::fs::read_to_string(self.path_for(identifier, filing_date)).await
    }
}
