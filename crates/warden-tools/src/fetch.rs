use std::time::Duration;

use url::Url;

use crate::config::FetchConfig;
use crate::error::ToolError;
use crate::file::looks_binary;
use crate::html::{html_to_text, is_html};

/// HTTP(S) client for the `web_fetch` tool with an SSRF guard on every hop.
///
/// If the client cannot be built, every fetch fails instead of falling back to an unguarded
/// default client.
#[derive(Debug, Clone)]
pub struct WebFetcher {
    client: Result<reqwest::Client, String>,
    max_body_bytes: u64,
}

impl WebFetcher {
    #[must_use]
    pub fn new(config: &FetchConfig, max_body_bytes: u64) -> Self {
        let max_redirects = config.max_redirects;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                return attempt.error(format!("more than {max_redirects} redirects"));
            }
            match check_url(attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(reason) => attempt.error(format!("redirect blocked: {reason}")),
            }
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(config.user_agent.clone())
            .redirect(policy)
            .build()
            .map_err(|e| {
                tracing::error!("failed to build HTTP client, web_fetch disabled: {e}");
                e.to_string()
            });

        Self {
            client,
            max_body_bytes,
        }
    }

    /// Fetch `raw_url` and return its body as text, HTML reduced to plain text.
    ///
    /// # Errors
    ///
    /// [`ToolError::InvalidPath`] for a malformed, non-http(s), or private/local URL (checked
    /// before any connection), [`ToolError::ResourceLimitExceeded`] above the size ceiling,
    /// [`ToolError::BinaryFileUnsupported`] for binary bodies and
    /// [`ToolError::FileNotReadable`] for transport failures and non-2xx statuses.
    pub async fn fetch(&self, raw_url: &str) -> Result<String, ToolError> {
        let url = validate_url(raw_url)?;
        self.fetch_unchecked(&url).await
    }

    async fn fetch_unchecked(&self, url: &Url) -> Result<String, ToolError> {
        let unreadable = |reason: String| ToolError::FileNotReadable {
            path: url.to_string(),
            reason,
        };

        let client = self
            .client
            .as_ref()
            .map_err(|e| unreadable(format!("HTTP client unavailable: {e}")))?;

        let mut resp = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| unreadable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(unreadable(format!("HTTP {}", resp.status())));
        }

        if let Some(len) = resp.content_length()
            && len > self.max_body_bytes
        {
            return Err(self.too_large(url, len));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| unreadable(e.to_string()))? {
            body.extend_from_slice(&chunk);
            let received = body.len() as u64;
            if received > self.max_body_bytes {
                return Err(self.too_large(url, received));
            }
        }

        if looks_binary(&body) {
            return Err(ToolError::BinaryFileUnsupported {
                path: url.to_string(),
            });
        }

        let text = String::from_utf8_lossy(&body);
        if is_html(content_type.as_deref(), &text) {
            Ok(html_to_text(&text))
        } else {
            Ok(text.into_owned())
        }
    }

    fn too_large(&self, url: &Url, actual: u64) -> ToolError {
        ToolError::ResourceLimitExceeded {
            resource: url.to_string(),
            actual,
            limit: self.max_body_bytes,
        }
    }
}

/// Parse `raw` and apply the scheme and host checks.
///
/// # Errors
///
/// Returns [`ToolError::InvalidPath`] naming the rejected URL.
pub fn validate_url(raw: &str) -> Result<Url, ToolError> {
    let invalid = |reason: String| ToolError::InvalidPath {
        path: raw.to_owned(),
        reason,
    };
    let parsed = Url::parse(raw.trim()).map_err(|e| invalid(format!("invalid URL: {e}")))?;
    check_url(&parsed).map_err(invalid)?;
    Ok(parsed)
}

fn check_url(url: &Url) -> Result<(), String> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("scheme not allowed: {}", url.scheme()));
    }
    match url.host() {
        None => Err("URL has no host".into()),
        Some(host) if is_private_host(&host) => Err(format!(
            "private/local host blocked: {}",
            url.host_str().unwrap_or("")
        )),
        Some(_) => Ok(()),
    }
}

fn is_private_v4(v4: std::net::Ipv4Addr) -> bool {
    let octets = v4.octets();
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        // 0.0.0.0/8
        || octets[0] == 0
        // 100.64.0.0/10, carrier-grade NAT
        || (octets[0] == 100 && octets[1] & 0xc0 == 64)
}

fn is_private_host(host: &url::Host<&str>) -> bool {
    match host {
        url::Host::Domain(d) => {
            let d = d.trim_end_matches('.').to_ascii_lowercase();
            d == "localhost" || d.ends_with(".localhost")
        }
        url::Host::Ipv4(v4) => is_private_v4(*v4),
        url::Host::Ipv6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            let seg = v6.segments();
            // fe80::/10, link-local
            if seg[0] & 0xffc0 == 0xfe80 {
                return true;
            }
            // fc00::/7, unique local
            if seg[0] & 0xfe00 == 0xfc00 {
                return true;
            }
            // ::ffff:x.x.x.x, IPv4-mapped
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_v4(v4);
            }
            false
        }
    }
}
