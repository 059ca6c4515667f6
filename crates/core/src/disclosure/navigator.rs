use crate::config::Settings;
use crate::disclosure::driver::PortalDriver;
use crate::disclosure::error::ScrapeError;
use std::time::{Duration, Instant};

pub const ANNUAL_REPORT_LINK_PATTERN: &str = "有価証券報告書－第";
pub const ORIGINAL_FILING_PREFIX: char = '有';

#[derive(Debug, Clone)]
pub struct NavigatorOptions {
    pub url_template: String,
    pub link_pattern: String,
    pub link_prefix: char,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
}

impl NavigatorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            url_template: settings.portal_url_template.clone(),
            link_pattern: ANNUAL_REPORT_LINK_PATTERN.to_string(),
            link_prefix: ORIGINAL_FILING_PREFIX,
            wait_timeout: settings.wait_timeout,
            poll_interval: settings.poll_interval,
        }
    }

    pub fn search_url(&self, identifier: &str) -> String {
        self.url_template.replace("{identifier}", identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalState {
    Idle,
    SessionOpen,
    SearchResultsLoaded { identifier: String },
    LinkOpened,
    FrameEntered { frames: Vec<String> },
    ContentCaptured,
}

/// A result link found on the search page. Only valid until focus leaves
/// the home window; re-resolve with [`PortalNavigator::find_result_link`].
#[derive(Debug, Clone)]
pub struct FilingLinkRecord<E> {
    pub display_text: String,
    pub element: E,
}

pub struct PortalNavigator<D: PortalDriver> {
    driver: D,
    options: NavigatorOptions,
    state: PortalState,
    home: Option<D::Window>,
    loaded: Option<String>,
    closed: bool,
}

impl<D: PortalDriver> PortalNavigator<D> {
    pub fn new(driver: D, options: NavigatorOptions) -> Self {
        Self {
            driver,
            options,
            state: PortalState::Idle,
            home: None,
            loaded: None,
            closed: false,
        }
    }

    pub fn state(&self) -> &PortalState {
        &self.state
    }

    fn ensure_state(&self, op: &str, allowed: bool) -> Result<(), ScrapeError> {
        if allowed {
            Ok(())
        } else {
            Err(ScrapeError::Navigation(format!(
                "{op} is not allowed in state {:?}",
                self.state
            )))
        }
    }

    fn at_filing_top(&self) -> bool {
        matches!(
            self.state,
            PortalState::LinkOpened | PortalState::ContentCaptured
        )
    }

    pub async fn open_session(&mut self) -> Result<(), ScrapeError> {
        self.ensure_state("open_session", self.state == PortalState::Idle)?;
        let home = self
            .driver
            .current_window()
            .await
            .map_err(|e| ScrapeError::Session(e.to_string()))?;
        tracing::debug!(?home, "portal session open");
        self.home = Some(home);
        self.state = PortalState::SessionOpen;
        Ok(())
    }

    pub async fn load_search_results(&mut self, identifier: &str) -> Result<(), ScrapeError> {
        self.ensure_state(
            "load_search_results",
            matches!(
                self.state,
                PortalState::SessionOpen | PortalState::SearchResultsLoaded { .. }
            ),
        )?;

        let url = self.options.search_url(identifier);
        // Until results show up the home page is in an unknown state.
        self.state = PortalState::SessionOpen;
        self.loaded = None;
        self.driver.goto(&url).await?;

        let deadline = Instant::now() + self.options.wait_timeout;
        loop {
            let links = self
                .driver
                .find_links_containing(&self.options.link_pattern)
                .await?;
            if !links.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::not_found(
                    format!("search results for {identifier}"),
                    self.options.wait_timeout,
                ));
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }

        self.loaded = Some(identifier.to_string());
        self.state = PortalState::SearchResultsLoaded {
            identifier: identifier.to_string(),
        };
        Ok(())
    }

    pub async fn list_result_links(
        &mut self,
    ) -> Result<Vec<FilingLinkRecord<D::Element>>, ScrapeError> {
        self.ensure_state(
            "list_result_links",
            matches!(self.state, PortalState::SearchResultsLoaded { .. }),
        )?;

        let elements = self
            .driver
            .find_links_containing(&self.options.link_pattern)
            .await?;
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            let display_text = self.driver.element_text(&element).await?.trim().to_string();
            if display_text.starts_with(self.options.link_prefix) {
                out.push(FilingLinkRecord {
                    display_text,
                    element,
                });
            }
        }
        Ok(out)
    }

    pub async fn find_result_link(
        &mut self,
        display_text: &str,
    ) -> Result<FilingLinkRecord<D::Element>, ScrapeError> {
        self.list_result_links()
            .await?
            .into_iter()
            .find(|link| link.display_text == display_text)
            .ok_or_else(|| {
                ScrapeError::not_found(format!("result link {display_text:?}"), Duration::ZERO)
            })
    }

    pub async fn link_metadata_text(
        &mut self,
        link: &FilingLinkRecord<D::Element>,
    ) -> Result<String, ScrapeError> {
        self.ensure_state(
            "link_metadata_text",
            matches!(self.state, PortalState::SearchResultsLoaded { .. }),
        )?;
        Ok(self.driver.row_text(&link.element).await?)
    }

    pub async fn open_link(
        &mut self,
        link: &FilingLinkRecord<D::Element>,
    ) -> Result<(), ScrapeError> {
        self.ensure_state(
            "open_link",
            matches!(self.state, PortalState::SearchResultsLoaded { .. }),
        )?;

        let before = self.driver.windows().await?;
        self.driver.click(&link.element).await?;

        let deadline = Instant::now() + self.options.wait_timeout;
        let opened = loop {
            let now = self.driver.windows().await?;
            if let Some(w) = now.into_iter().find(|w| !before.contains(w)) {
                break w;
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::Navigation(format!(
                    "no new window within {:?} after clicking {:?}",
                    self.options.wait_timeout, link.display_text
                )));
            }
            tokio::time::sleep(self.options.poll_interval).await;
        };

        self.driver.switch_to_window(&opened).await?;
        self.state = PortalState::LinkOpened;
        Ok(())
    }

    /// Descends through `frames` in order, starting at the top-level document
    /// of the filing window. On failure focus is back at the top level.
    pub async fn enter_nested_frame(&mut self, frames: &[&str]) -> Result<(), ScrapeError> {
        self.ensure_state("enter_nested_frame", self.at_filing_top())?;

        let mut entered = Vec::with_capacity(frames.len());
        for name in frames {
            if let Err(err) = self.wait_enter_frame(name).await {
                self.driver.enter_top_document().await?;
                self.state = PortalState::LinkOpened;
                return Err(err);
            }
            entered.push(name.to_string());
        }

        self.state = PortalState::FrameEntered { frames: entered };
        Ok(())
    }

    async fn wait_enter_frame(&mut self, name: &str) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + self.options.wait_timeout;
        loop {
            if self.driver.try_enter_frame(name).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::not_found(
                    format!("frame {name:?}"),
                    self.options.wait_timeout,
                ));
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Clicks the `section_text` entry of the filing's table of contents,
    /// which lives in `menu_frames`. Ends at the top-level document.
    pub async fn select_section(
        &mut self,
        menu_frames: &[&str],
        section_text: &str,
    ) -> Result<(), ScrapeError> {
        self.enter_nested_frame(menu_frames).await?;
        let clicked = self.wait_and_click_link(section_text).await;
        let top = self.driver.enter_top_document().await;
        self.state = PortalState::LinkOpened;
        clicked?;
        top?;
        Ok(())
    }

    async fn wait_and_click_link(&mut self, text: &str) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + self.options.wait_timeout;
        loop {
            let links = self.driver.find_links_containing(text).await?;
            if let Some(link) = links.first() {
                self.driver.click(link).await?;
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::not_found(
                    format!("section link {text:?}"),
                    self.options.wait_timeout,
                ));
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Page source of the focused frame. Focus returns to the top-level
    /// document whether or not the read succeeds.
    pub async fn capture_content(&mut self) -> Result<String, ScrapeError> {
        self.ensure_state(
            "capture_content",
            matches!(self.state, PortalState::FrameEntered { .. }),
        )?;

        let source = self.driver.page_source().await;
        let top = self.driver.enter_top_document().await;
        self.state = if source.is_ok() {
            PortalState::ContentCaptured
        } else {
            PortalState::LinkOpened
        };
        let source = source?;
        top?;
        Ok(source)
    }

    pub async fn close_extra_windows(&mut self) -> Result<(), ScrapeError> {
        let home = match (&self.state, &self.home) {
            (PortalState::Idle, _) | (_, None) => {
                return Err(ScrapeError::Navigation(
                    "close_extra_windows before open_session".to_string(),
                ))
            }
            (_, Some(home)) => home.clone(),
        };

        let windows = self.driver.windows().await?;
        let mut closed = 0usize;
        for w in windows.iter().filter(|w| **w != home) {
            self.driver.switch_to_window(w).await?;
            self.driver.close_window().await?;
            closed += 1;
        }
        self.driver.switch_to_window(&home).await?;

        if closed > 0 {
            tracing::debug!(closed, "closed extra windows");
        }

        // The home window never navigates away from the results page.
        self.state = match &self.loaded {
            Some(identifier) => PortalState::SearchResultsLoaded {
                identifier: identifier.clone(),
            },
            None => PortalState::SessionOpen,
        };
        Ok(())
    }

    pub async fn close_session(mut self) -> Result<(), ScrapeError> {
        self.closed = true;
        self.driver.quit().await?;
        tracing::debug!("portal session closed");
        Ok(())
    }
}

impl<D: PortalDriver> Drop for PortalNavigator<D> {
    fn drop(&mut self) {
        if !self.closed && self.state != PortalState::Idle {
            tracing::warn!(state = ?self.state, "portal navigator dropped without close_session");
        }
    }
}
