pub mod disclosure;
pub mod index;
pub mod tabular;
pub mod universe;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;
    use std::time::Duration;

    // EDINET full-text search, narrowed to a single submitter code. Returns the
    // latest filings of that submitter.
    pub const DEFAULT_PORTAL_URL_TEMPLATE: &str = "https://disclosure.edinet-fsa.go.jp/E01EW/BLMainController.jsp?uji.verb=W1E63021CXP002002DSPSch&uji.bean=ee.bean.parent.EECommonSearchBean&PID=W1E63021&TID=W1E63021&SESSIONKEY=1626160755834&lgKbn=2&pkbn=0&skbn=1&dskb=&askb=&dflg=0&iflg=0&preId=1&sec={identifier}&scc=&shb=&snm=&spf1=1&spf2=1&iec=&icc=&inm=&spf3=1&fdc=&fnm=&spf4=1&spf5=2&otd=120&cal=1&era=R&yer=&mon=&psr=1&pfs=5&row=100&idx=0&str=&kbn=1&flg=&syoruiKanriNo=";

    const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
    const DEFAULT_OUTPUT_DIR: &str = "output/kaishajokyo";
    const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 10;
    const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
    const MIN_POLL_INTERVAL_MS: u64 = 10;
    const DEFAULT_PROGRESS_EVERY: usize = 10;
    const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub webdriver_url: String,
        pub browser_headless: bool,
        pub portal_url_template: String,
        pub wait_timeout: Duration,
        pub poll_interval: Duration,
        pub progress_every: usize,
        pub output_dir: PathBuf,
        pub http_timeout: Duration,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let portal_url_template = std::env::var("PORTAL_URL_TEMPLATE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PORTAL_URL_TEMPLATE.to_string());
            anyhow::ensure!(
                portal_url_template.contains("{identifier}"),
                "PORTAL_URL_TEMPLATE must contain an {{identifier}} placeholder"
            );

            let browser_headless = match std::env::var("BROWSER_HEADLESS") {
                Ok(s) => parse_bool(&s).context("BROWSER_HEADLESS must be true/false")?,
                Err(_) => true,
            };

            Ok(Self {
                webdriver_url: std::env::var("WEBDRIVER_URL")
                    .unwrap_or_else(|_| DEFAULT_WEBDRIVER_URL.to_string()),
                browser_headless,
                portal_url_template,
                wait_timeout: Duration::from_secs(env_parse(
                    "PORTAL_WAIT_TIMEOUT_SECS",
                    DEFAULT_WAIT_TIMEOUT_SECS,
                )),
                poll_interval: poll_interval(env_parse(
                    "PORTAL_POLL_INTERVAL_MS",
                    DEFAULT_POLL_INTERVAL_MS,
                )),
                progress_every: env_parse("BATCH_PROGRESS_EVERY", DEFAULT_PROGRESS_EVERY),
                output_dir: std::env::var("OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                http_timeout: Duration::from_secs(env_parse(
                    "HTTP_TIMEOUT_SECS",
                    DEFAULT_HTTP_TIMEOUT_SECS,
                )),
                sentry_dsn: std::env::var("SENTRY_DSN").ok().filter(|s| !s.is_empty()),
            })
        }

        pub fn http_client(&self) -> anyhow::Result<reqwest::Client> {
            reqwest::Client::builder()
                .timeout(self.http_timeout)
                .build()
                .context("failed to build http client")
        }
    }

    fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
        std::env::var(key)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
            .unwrap_or(default)
    }

    // Waits poll the WebDriver; zero would spin for the whole timeout.
    fn poll_interval(ms: u64) -> Duration {
        Duration::from_millis(ms.max(MIN_POLL_INTERVAL_MS))
    }

    fn parse_bool(s: &str) -> Option<bool> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

}
