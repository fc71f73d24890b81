use std::time::Duration;

pub const SYSTEM_PROXY_ENV: &str = "BANTER_ENABLE_SYSTEM_PROXY";

pub fn build_http_client() -> reqwest::Client {
    build_http_client_with_timeout(None)
}

/// Build a client that skips system proxy discovery unless explicitly enabled.
///
/// Falls back to a default client if the builder fails, so callers never see
/// a construction error.
pub fn build_http_client_with_timeout(timeout: Option<Duration>) -> reqwest::Client {
    let allow_system_proxy = system_proxy_enabled(std::env::var(SYSTEM_PROXY_ENV).ok().as_deref());

    if allow_system_proxy {
        match attempt_build(timeout, false) {
            Ok(client) => return client,
            Err(error) => tracing::warn!(
                "HTTP client with system proxy discovery failed ({}); retrying with no_proxy",
                error
            ),
        }
    }

    match attempt_build(timeout, true) {
        Ok(client) => client,
        Err(error) => {
            tracing::error!("Failed to initialize HTTP client: {}; using defaults", error);
            reqwest::Client::new()
        }
    }
}

fn system_proxy_enabled(value: Option<&str>) -> bool {
    value
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
