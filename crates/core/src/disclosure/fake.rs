//! Scripted in-memory portal used by the navigator and batch tests.

use crate::disclosure::driver::{DriverError, PortalDriver};
use crate::disclosure::navigator::{
    NavigatorOptions, ANNUAL_REPORT_LINK_PATTERN, ORIGINAL_FILING_PREFIX,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const SECTION_TEXT: &str = "提出会社の状況";

pub(crate) fn test_options() -> NavigatorOptions {
    NavigatorOptions {
        url_template: "fake://search?sec={identifier}".to_string(),
        link_pattern: ANNUAL_REPORT_LINK_PATTERN.to_string(),
        link_prefix: ORIGINAL_FILING_PREFIX,
        wait_timeout: Duration::from_millis(30),
        poll_interval: Duration::from_millis(5),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeFiling {
    pub link_text: String,
    pub row_text: String,
    pub content: String,
}

impl FakeFiling {
    pub fn annual(term: u32, row_text: &str, content: &str) -> Self {
        Self {
            link_text: format!("有価証券報告書－第{term}期(令和2年4月1日－令和3年3月31日)"),
            row_text: row_text.to_string(),
            content: content.to_string(),
        }
    }

    pub fn amendment(term: u32, row_text: &str) -> Self {
        Self {
            link_text: format!("訂正有価証券報告書－第{term}期"),
            row_text: row_text.to_string(),
            content: "<html>amendment</html>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Page {
    Blank,
    Results(String),
    Filing {
        identifier: String,
        index: usize,
        section_selected: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum FakeElement {
    Result { identifier: String, index: usize },
    Section,
}

#[derive(Debug, Default)]
pub(crate) struct FakeLog {
    pub visited: Vec<String>,
    pub quit_calls: usize,
    pub max_open_windows: usize,
}

pub(crate) struct FakePortal {
    filings: HashMap<String, Vec<FakeFiling>>,
    missing_frames: HashSet<String>,
    lose_session_on: Option<String>,
    no_popup: bool,
    no_section: bool,
    failing_page_source: bool,
    failing_home: bool,
    windows: Vec<(u32, Page)>,
    focus: u32,
    next_window: u32,
    frames: Vec<String>,
    pub log: Arc<Mutex<FakeLog>>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self {
            filings: HashMap::new(),
            missing_frames: HashSet::new(),
            lose_session_on: None,
            no_popup: false,
            no_section: false,
            failing_page_source: false,
            failing_home: false,
            windows: vec![(1, Page::Blank)],
            focus: 1,
            next_window: 2,
            frames: Vec::new(),
            log: Arc::new(Mutex::new(FakeLog::default())),
        }
    }

    pub fn with_filings(mut self, identifier: &str, filings: Vec<FakeFiling>) -> Self {
        self.filings.insert(identifier.to_string(), filings);
        self
    }

    pub fn without_frame(mut self, name: &str) -> Self {
        self.missing_frames.insert(name.to_string());
        self
    }

    pub fn losing_session_on(mut self, identifier: &str) -> Self {
        self.lose_session_on = Some(identifier.to_string());
        self
    }

    pub fn without_popup(mut self) -> Self {
        self.no_popup = true;
        self
    }

    pub fn without_section(mut self) -> Self {
        self.no_section = true;
        self
    }

    pub fn failing_page_source(mut self) -> Self {
        self.failing_page_source = true;
        self
    }

    pub fn failing_home(mut self) -> Self {
        self.failing_home = true;
        self
    }

    pub fn in_top_document(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn log(&self) -> Arc<Mutex<FakeLog>> {
        Arc::clone(&self.log)
    }

    fn page(&self) -> Option<&Page> {
        self.windows
            .iter()
            .find(|(id, _)| *id == self.focus)
            .map(|(_, p)| p)
    }

    fn page_mut(&mut self) -> Result<&mut Page, DriverError> {
        let focus = self.focus;
        self.windows
            .iter_mut()
            .find(|(id, _)| *id == focus)
            .map(|(_, p)| p)
            .ok_or_else(|| DriverError::Command("no such window".to_string()))
    }

    fn filing(&self, identifier: &str, index: usize) -> Result<&FakeFiling, DriverError> {
        self.filings
            .get(identifier)
            .and_then(|f| f.get(index))
            .ok_or_else(|| DriverError::Command("stale element reference".to_string()))
    }

    fn frames_are(&self, path: &[&str]) -> bool {
        self.frames.iter().map(String::as_str).eq(path.iter().copied())
    }
}

#[async_trait::async_trait]
impl PortalDriver for FakePortal {
    type Window = u32;
    type Element = FakeElement;

    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        let identifier = url.rsplit("sec=").next().unwrap_or_default().to_string();
        self.log.lock().unwrap().visited.push(identifier.clone());
        if self.lose_session_on.as_deref() == Some(identifier.as_str()) {
            return Err(DriverError::SessionLost("chrome not reachable".to_string()));
        }
        self.frames.clear();
        *self.page_mut()? = Page::Results(identifier);
        Ok(())
    }

    async fn current_window(&mut self) -> Result<u32, DriverError> {
        if self.failing_home {
            return Err(DriverError::Command("no such window".to_string()));
        }
        Ok(self.focus)
    }

    async fn windows(&mut self) -> Result<Vec<u32>, DriverError> {
        Ok(self.windows.iter().map(|(id, _)| *id).collect())
    }

    async fn switch_to_window(&mut self, window: &u32) -> Result<(), DriverError> {
        if !self.windows.iter().any(|(id, _)| id == window) {
            return Err(DriverError::Command(format!("no such window {window}")));
        }
        self.focus = *window;
        self.frames.clear();
        Ok(())
    }

    async fn close_window(&mut self) -> Result<(), DriverError> {
        let focus = self.focus;
        self.windows.retain(|(id, _)| *id != focus);
        Ok(())
    }

    async fn find_links_containing(&mut self, text: &str) -> Result<Vec<FakeElement>, DriverError> {
        let out = match self.page() {
            Some(Page::Results(identifier)) if self.frames.is_empty() => self
                .filings
                .get(identifier)
                .map(|filings| {
                    filings
                        .iter()
                        .enumerate()
                        .filter(|(_, f)| f.link_text.contains(text))
                        .map(|(index, _)| FakeElement::Result {
                            identifier: identifier.clone(),
                            index,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Some(Page::Filing { .. })
                if self.frames_are(&["viewFrame", "menuFrame2"])
                    && !self.no_section
                    && SECTION_TEXT.contains(text) =>
            {
                vec![FakeElement::Section]
            }
            _ => Vec::new(),
        };
        Ok(out)
    }

    async fn element_text(&mut self, element: &FakeElement) -> Result<String, DriverError> {
        match element {
            FakeElement::Result { identifier, index } => {
                Ok(self.filing(identifier, *index)?.link_text.clone())
            }
            FakeElement::Section => Ok(SECTION_TEXT.to_string()),
        }
    }

    async fn row_text(&mut self, element: &FakeElement) -> Result<String, DriverError> {
        match element {
            FakeElement::Result { identifier, index } => {
                Ok(self.filing(identifier, *index)?.row_text.clone())
            }
            FakeElement::Section => Err(DriverError::Command("no result row".to_string())),
        }
    }

    async fn click(&mut self, element: &FakeElement) -> Result<(), DriverError> {
        match element {
            FakeElement::Result { identifier, index } => {
                self.filing(identifier, *index)?;
                if self.no_popup {
                    return Ok(());
                }
                let id = self.next_window;
                self.next_window += 1;
                self.windows.push((
                    id,
                    Page::Filing {
                        identifier: identifier.clone(),
                        index: *index,
                        section_selected: false,
                    },
                ));
                let mut log = self.log.lock().unwrap();
                log.max_open_windows = log.max_open_windows.max(self.windows.len());
            }
            FakeElement::Section => {
                if let Page::Filing {
                    section_selected, ..
                } = self.page_mut()?
                {
                    *section_selected = true;
                }
            }
        }
        Ok(())
    }

    async fn try_enter_frame(&mut self, name: &str) -> Result<bool, DriverError> {
        if self.missing_frames.contains(name) {
            return Ok(false);
        }
        let reachable = matches!(self.page(), Some(Page::Filing { .. }))
            && match self.frames.as_slice() {
                [] => name == "viewFrame",
                [outer] => outer == "viewFrame" && (name == "menuFrame2" || name == "mainFrame"),
                _ => false,
            };
        if reachable {
            self.frames.push(name.to_string());
        }
        Ok(reachable)
    }

    async fn enter_top_document(&mut self) -> Result<(), DriverError> {
        self.frames.clear();
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String, DriverError> {
        match self.page() {
            Some(Page::Filing {
                identifier,
                index,
                section_selected,
            }) if self.frames_are(&["viewFrame", "mainFrame"]) => {
                if self.failing_page_source {
                    Err(DriverError::Command("javascript error: document unavailable".to_string()))
                } else if *section_selected {
                    Ok(self.filing(identifier, *index)?.content.clone())
                } else {
                    Ok("<html>cover page</html>".to_string())
                }
            }
            _ => Ok("<html></html>".to_string()),
        }
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        self.log.lock().unwrap().quit_calls += 1;
        Ok(())
    }
}
