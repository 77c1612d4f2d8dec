//! Browser automation against the valuation portal.
//!
//! A [`SessionDriver`] hands out one [`PortalSession`] per run. The WebDriver-backed
//! implementation talks to chromedriver through `fantoccini` and records the portal's own
//! API traffic with a script installed before any page script runs.

use crate::config::Config;
use crate::errors::AppraisalError;
use crate::models::{CapturedResponse, VehicleRecord};
use crate::valuation::REQUIRED_FRAGMENTS;
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::key::Key;
use fantoccini::wd::WebDriverCompatibleCommand;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const LOGIN_WAIT: Duration = Duration::from_secs(20);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Grace period after the required exchanges arrive, for the trailing decode call.
const SETTLE: Duration = Duration::from_millis(750);

/// Portal login credentials.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn from_config(config: &Config) -> Self {
        Self {
            email: config.portal_email.clone(),
            password: config.portal_password.clone(),
        }
    }
}

/// Opens browser sessions. One session is held for the lifetime of a run.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PortalSession>, AppraisalError>;
}

/// An exclusively-owned browser session.
///
/// Callers must invoke [`PortalSession::close`] once they are done, whatever the outcome.
#[async_trait]
pub trait PortalSession: Send {
    /// Authenticates, or confirms an existing login.
    async fn login(&mut self, credentials: &Credentials) -> Result<(), AppraisalError>;

    /// Submits a VIN and returns the intercepted portal responses.
    async fn appraise(
        &mut self,
        vehicle: &VehicleRecord,
    ) -> Result<Vec<CapturedResponse>, AppraisalError>;

    /// Releases the browser. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<(), AppraisalError>;
}

/// Launches Chrome sessions through a WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverPortal {
    webdriver_url: String,
    portal_url: String,
    headless: bool,
    response_timeout: Duration,
}

impl WebDriverPortal {
    pub fn new(
        webdriver_url: String,
        portal_url: String,
        headless: bool,
        response_timeout: Duration,
    ) -> Self {
        Self {
            webdriver_url,
            portal_url: portal_url.trim_end_matches('/').to_string(),
            headless,
            response_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.webdriver_url.clone(),
            config.portal_url.clone(),
            config.headless,
            config.response_timeout(),
        )
    }

    fn capabilities(&self) -> serde_json::Map<String, Value> {
        let mut args = vec![
            "--window-size=1280,720".to_string(),
            format!("--user-agent={}", USER_AGENT),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }

        let mut caps = serde_json::Map::new();
        caps.insert("browserName".to_string(), json!("chrome"));
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
        caps
    }
}

#[async_trait]
impl SessionDriver for WebDriverPortal {
    async fn open(&self) -> Result<Box<dyn PortalSession>, AppraisalError> {
        tracing::info!("Connecting to WebDriver at {}", self.webdriver_url);
        let client = ClientBuilder::native()
            .capabilities(self.capabilities())
            .connect(&self.webdriver_url)
            .await?;

        let mut session = WebDriverSession {
            client: Some(client),
            portal_url: self.portal_url.clone(),
            response_timeout: self.response_timeout,
        };

        // Without the capture hook there is nothing to appraise, so release the browser.
        if let Err(e) = session.install_capture().await {
            let _ = session.close().await;
            return Err(e);
        }

        tracing::info!("✓ Browser session opened");
        Ok(Box::new(session))
    }
}

/// Chrome DevTools command sent through chromedriver's `goog/cdp/execute` extension.
#[derive(Debug)]
struct CdpCommand {
    cmd: &'static str,
    params: Value,
}

impl WebDriverCompatibleCommand for CdpCommand {
    fn endpoint(
        &self,
        base_url: &url::Url,
        session_id: Option<&str>,
    ) -> Result<url::Url, url::ParseError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&format!(
            "session/{}/goog/cdp/execute",
            session_id.unwrap_or_default()
        ))
    }

    fn method_and_body(&self, _request_url: &url::Url) -> (http::Method, Option<String>) {
        let body = json!({ "cmd": self.cmd, "params": self.params });
        (http::Method::POST, Some(body.to_string()))
    }
}

/// Registrable domain used to recognise portal API traffic, e.g. `signal.vin` for
/// `https://app.signal.vin`.
pub fn capture_domain(portal_url: &str) -> String {
    let host = url::Url::parse(portal_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() > 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        host
    }
}

/// Script evaluated on every new document: wraps `fetch` and `XMLHttpRequest` and appends
/// matching responses to `window.__vinCaptured`.
pub fn capture_script(domain: &str) -> String {
    let domain_literal = serde_json::to_string(domain).unwrap_or_else(|_| "\"\"".to_string());
    CAPTURE_SCRIPT.replace("__CAPTURE_DOMAIN__", &domain_literal)
}

const CAPTURE_SCRIPT: &str = r#"
(function () {
  if (window.__vinCaptureInstalled) { return; }
  window.__vinCaptureInstalled = true;
  window.__vinCaptured = [];
  var domain = __CAPTURE_DOMAIN__;

  function wanted(url) {
    if (typeof url !== 'string') { return false; }
    return (domain && url.indexOf(domain) !== -1) || url.toLowerCase().indexOf('export') !== -1;
  }

  function record(url, status, body) {
    try { window.__vinCaptured.push({ url: url, status: status, body: body || '' }); } catch (e) {}
  }

  var originalFetch = window.fetch;
  if (originalFetch) {
    window.fetch = function () {
      return originalFetch.apply(this, arguments).then(function (response) {
        try {
          if (wanted(response.url)) {
            response.clone().text().then(function (body) {
              record(response.url, response.status, body);
            }, function () {});
          }
        } catch (e) {}
        return response;
      });
    };
  }

  var originalOpen = XMLHttpRequest.prototype.open;
  var originalSend = XMLHttpRequest.prototype.send;
  XMLHttpRequest.prototype.open = function (method, url) {
    this.__vinUrl = String(url);
    return originalOpen.apply(this, arguments);
  };
  XMLHttpRequest.prototype.send = function () {
    var xhr = this;
    xhr.addEventListener('load', function () {
      var url = xhr.responseURL || xhr.__vinUrl;
      if (!wanted(url)) { return; }
      var body = '';
      try {
        if (xhr.response instanceof ArrayBuffer) {
          body = new TextDecoder('utf-8').decode(xhr.response);
        } else if (xhr.responseType === '' || xhr.responseType === 'text') {
          body = xhr.responseText;
        } else if (typeof xhr.response === 'string') {
          body = xhr.response;
        } else if (xhr.response) {
          body = JSON.stringify(xhr.response);
        }
      } catch (e) {}
      record(url, xhr.status, body);
    });
    return originalSend.apply(this, arguments);
  };
})();
"#;

/// True once every exchange the valuation needs has been captured with a body.
pub fn has_required_exchanges(captured: &[CapturedResponse]) -> bool {
    REQUIRED_FRAGMENTS.iter().all(|fragment| {
        captured
            .iter()
            .any(|c| c.url.contains(fragment) && !c.body.trim().is_empty())
    })
}

/// Portal pages that are only reachable after authentication.
pub fn is_authenticated_url(url: &str) -> bool {
    url.contains("dashboard") || url.contains("appraisal")
}

/// Page URL for appraising one vehicle.
pub fn appraisal_url(portal_url: &str, vehicle: &VehicleRecord) -> Result<url::Url, AppraisalError> {
    url::Url::parse_with_params(
        &format!("{}/appraisal/calculate-export", portal_url.trim_end_matches('/')),
        &[
            ("vin", vehicle.vin.as_str()),
            ("odometer", vehicle.odometer_km.as_str()),
            ("is-km", "true"),
        ],
    )
    .map_err(|e| AppraisalError::Browser(format!("Failed to build appraisal URL: {}", e)))
}

pub struct WebDriverSession {
    client: Option<Client>,
    portal_url: String,
    response_timeout: Duration,
}

impl WebDriverSession {
    fn client(&self) -> Result<&Client, AppraisalError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppraisalError::Browser("Browser session already closed".to_string()))
    }

    async fn install_capture(&self) -> Result<(), AppraisalError> {
        let script = capture_script(&capture_domain(&self.portal_url));
        self.client()?
            .issue_cmd(CdpCommand {
                cmd: "Page.addScriptToEvaluateOnNewDocument",
                params: json!({ "source": script }),
            })
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AppraisalError> {
        Ok(self.client()?.current_url().await?.to_string())
    }

    async fn captured(&self) -> Result<Vec<CapturedResponse>, AppraisalError> {
        let value = self
            .client()?
            .execute("return window.__vinCaptured || [];", vec![])
            .await?;
        serde_json::from_value(value)
            .map_err(|e| AppraisalError::Browser(format!("Unreadable capture buffer: {}", e)))
    }

    /// First displayed element matching `locator`, if any.
    async fn find_displayed(&self, locator: Locator<'_>) -> Option<Element> {
        let elements = self.client().ok()?.find_all(locator).await.ok()?;
        for element in elements {
            if element.is_displayed().await.unwrap_or(false) {
                return Some(element);
            }
        }
        None
    }

    async fn wait_for_dashboard(&self) -> Result<bool, AppraisalError> {
        let deadline = Instant::now() + LOGIN_WAIT;
        while Instant::now() < deadline {
            if is_authenticated_url(&self.current_url().await?) {
                return Ok(true);
            }
            sleep(Duration::from_secs(1)).await;
        }
        Ok(false)
    }
}

#[async_trait]
impl PortalSession for WebDriverSession {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), AppraisalError> {
        tracing::info!("🔐 Logging in to {}", self.portal_url);
        let client = self.client()?;
        client.goto(&self.portal_url).await?;
        sleep(Duration::from_secs(3)).await;

        if is_authenticated_url(&self.current_url().await?) {
            tracing::info!("✓ Already logged in");
            return Ok(());
        }

        if let Some(link) = self
            .find_displayed(Locator::XPath(
                "//a[contains(normalize-space(.), 'Login')] | //button[contains(normalize-space(.), 'Login')]",
            ))
            .await
        {
            link.click().await?;
            sleep(Duration::from_secs(3)).await;
        }

        let inputs = client.find_all(Locator::Css("input")).await?;
        let text_inputs: Vec<&Element> = {
            let mut visible = Vec::new();
            for input in &inputs {
                let kind = input.attr("type").await?.unwrap_or_default();
                if kind != "checkbox" && kind != "hidden" {
                    visible.push(input);
                }
            }
            visible
        };
        let [email_field, password_field, ..] = text_inputs.as_slice() else {
            return Err(AppraisalError::AuthenticationFailure(
                "Login form not found".to_string(),
            ));
        };

        email_field.click().await?;
        email_field.clear().await?;
        email_field.send_keys(&credentials.email).await?;
        password_field.click().await?;
        password_field.send_keys(&credentials.password).await?;

        if let Some(checkbox) = self
            .find_displayed(Locator::Css("input[type=\"checkbox\"]"))
            .await
        {
            checkbox.click().await?;
        }

        match self
            .find_displayed(Locator::XPath(
                "//button[contains(normalize-space(.), 'Login') or contains(normalize-space(.), 'Sign in')]",
            ))
            .await
        {
            Some(submit) => submit.click().await?,
            None => {
                let enter: char = Key::Enter.into();
                password_field.send_keys(&enter.to_string()).await?;
            }
        }

        if self.wait_for_dashboard().await? {
            tracing::info!("✓ Login successful");
            Ok(())
        } else {
            Err(AppraisalError::AuthenticationFailure(
                "Portal did not reach the dashboard, check credentials".to_string(),
            ))
        }
    }

    async fn appraise(
        &mut self,
        vehicle: &VehicleRecord,
    ) -> Result<Vec<CapturedResponse>, AppraisalError> {
        let url = appraisal_url(&self.portal_url, vehicle)?;
        tracing::info!("🌐 Processing {}", vehicle.vin);
        self.client()?.goto(url.as_str()).await?;

        let started = Instant::now();
        let deadline = started + self.response_timeout;
        loop {
            if self.current_url().await?.to_lowercase().contains("login") {
                return Err(AppraisalError::SessionExpired);
            }

            let captured = self.captured().await?;
            if has_required_exchanges(&captured) {
                sleep(SETTLE).await;
                let captured = self.captured().await?;
                tracing::debug!(
                    "Captured {} portal responses for {} in {:?}",
                    captured.len(),
                    vehicle.vin,
                    started.elapsed()
                );
                return Ok(captured);
            }

            if Instant::now() >= deadline {
                return Err(AppraisalError::Timeout {
                    vin: vehicle.vin.clone(),
                    waited_secs: self.response_timeout.as_secs(),
                });
            }

            // Lazy sections only load once scrolled into view.
            let _ = self
                .client()?
                .execute("window.scrollTo(0, document.body.scrollHeight);", vec![])
                .await;
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&mut self) -> Result<(), AppraisalError> {
        if let Some(client) = self.client.take() {
            tracing::info!("Closing browser session");
            client.close().await?;
        }
        Ok(())
    }
}
