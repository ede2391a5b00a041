use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("base-persona/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to build HTTP client")
});

/// Shared connection pool for all provider adapters. Per-call deadlines are
/// applied on each request builder, not here.
pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
