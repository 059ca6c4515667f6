use crate::config::Settings;
use crate::disclosure::error::ScrapeError;
use fantoccini::error::CmdError;
use fantoccini::wd::WindowHandle;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("webdriver session lost: {0}")]
    SessionLost(String),

    #[error("webdriver command failed: {0}")]
    Command(String),
}

impl From<DriverError> for ScrapeError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::SessionLost(msg) => ScrapeError::Session(msg),
            DriverError::Command(msg) => ScrapeError::Navigation(msg),
        }
    }
}

/// Browser primitives the portal navigator is built on. Implementations act
/// on whatever window and frame currently has focus; the navigator owns the
/// decision of what that focus should be.
#[async_trait::async_trait]
pub trait PortalDriver: Send {
    type Window: Clone + PartialEq + std::fmt::Debug + Send + Sync;
    type Element: Send + Sync;

    async fn goto(&mut self, url: &str) -> Result<(), DriverError>;

    async fn current_window(&mut self) -> Result<Self::Window, DriverError>;

    async fn windows(&mut self) -> Result<Vec<Self::Window>, DriverError>;

    async fn switch_to_window(&mut self, window: &Self::Window) -> Result<(), DriverError>;

    /// Closes the focused window. Focus is undefined afterwards.
    async fn close_window(&mut self) -> Result<(), DriverError>;

    async fn find_links_containing(&mut self, text: &str)
        -> Result<Vec<Self::Element>, DriverError>;

    async fn element_text(&mut self, element: &Self::Element) -> Result<String, DriverError>;

    /// Text of the table row around a result link (the grandparent element).
    async fn row_text(&mut self, element: &Self::Element) -> Result<String, DriverError>;

    async fn click(&mut self, element: &Self::Element) -> Result<(), DriverError>;

    /// Enters the child frame called `name`. `Ok(false)` if it does not exist (yet).
    async fn try_enter_frame(&mut self, name: &str) -> Result<bool, DriverError>;

    async fn enter_top_document(&mut self) -> Result<(), DriverError>;

    async fn page_source(&mut self) -> Result<String, DriverError>;

    async fn quit(&mut self) -> Result<(), DriverError>;
}

pub struct WebDriverPortal {
    client: Client,
}

impl WebDriverPortal {
    pub async fn connect(settings: &Settings) -> Result<Self, ScrapeError> {
        let mut args = vec![
            "--no-sandbox",
            "--start-maximized",
            "--disable-gpu",
            "--allow-insecure-localhost",
            "--ignore-certificate-errors",
            "--allow-running-insecure-content",
            "--disable-web-security",
        ];
        if settings.browser_headless {
            args.push("--headless");
        }

        let mut caps = serde_json::Map::new();
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
        caps.insert("acceptInsecureCerts".to_string(), json!(true));

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&settings.webdriver_url)
            .await
            .map_err(|e| {
                ScrapeError::Session(format!(
                    "cannot start browser via {}: {e}",
                    settings.webdriver_url
                ))
            })?;

        tracing::info!(webdriver_url = %settings.webdriver_url, headless = settings.browser_headless, "browser session started");
        Ok(Self { client })
    }
}

fn cmd_err(err: CmdError) -> DriverError {
    match err {
        CmdError::Lost(e) => DriverError::SessionLost(e.to_string()),
        other => {
            let msg = other.to_string();
            if msg.contains("invalid session id") {
                DriverError::SessionLost(msg)
            } else {
                DriverError::Command(msg)
            }
        }
    }
}

pub(crate) fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        return format!("'{s}'");
    }
    if !s.contains('"') {
        return format!("\"{s}\"");
    }
    let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

#[async_trait::async_trait]
impl PortalDriver for WebDriverPortal {
    type Window = WindowHandle;
    type Element = fantoccini::elements::Element;

    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.client.goto(url).await.map_err(cmd_err)
    }

    async fn current_window(&mut self) -> Result<Self::Window, DriverError> {
        self.client.window().await.map_err(cmd_err)
    }

    async fn windows(&mut self) -> Result<Vec<Self::Window>, DriverError> {
        self.client.windows().await.map_err(cmd_err)
    }

    async fn switch_to_window(&mut self, window: &Self::Window) -> Result<(), DriverError> {
        self.client
            .switch_to_window(window.clone())
            .await
            .map_err(cmd_err)
    }

    async fn close_window(&mut self) -> Result<(), DriverError> {
        self.client.close_window().await.map_err(cmd_err)
    }

    async fn find_links_containing(
        &mut self,
        text: &str,
    ) -> Result<Vec<Self::Element>, DriverError> {
        let xpath = format!("//a[contains(text(), {})]", xpath_literal(text));
        self.client
            .find_all(Locator::XPath(&xpath))
            .await
            .map_err(cmd_err)
    }

    async fn element_text(&mut self, element: &Self::Element) -> Result<String, DriverError> {
        element.text().await.map_err(cmd_err)
    }

    async fn row_text(&mut self, element: &Self::Element) -> Result<String, DriverError> {
        let row = element.find(Locator::XPath("../..")).await.map_err(cmd_err)?;
        row.text().await.map_err(cmd_err)
    }

    async fn click(&mut self, element: &Self::Element) -> Result<(), DriverError> {
        element.click().await.map_err(cmd_err)
    }

    async fn try_enter_frame(&mut self, name: &str) -> Result<bool, DriverError> {
        let lit = xpath_literal(name);
        let xpath = format!("//frame[@name={lit}] | //iframe[@name={lit}]");
        let mut frames = self
            .client
            .find_all(Locator::XPath(&xpath))
            .await
            .map_err(cmd_err)?;
        if frames.is_empty() {
            return Ok(false);
        }
        let frame = frames.swap_remove(0);
        frame.enter_frame().await.map_err(cmd_err)?;
        Ok(true)
    }

    async fn enter_top_document(&mut self) -> Result<(), DriverError> {
        self.client.enter_frame(None).await.map_err(cmd_err)
    }

    async fn page_source(&mut self) -> Result<String, DriverError> {
        self.client.source().await.map_err(cmd_err)
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        self.client.clone().close().await.map_err(cmd_err)
    }
}
