// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Host identity sent to the check endpoint

use crate::config::UpgradeConfig;
use crate::fetch::Fetcher;

/// Configured identity, else the public IP, else an empty string
pub async fn resolve_identity(config: &UpgradeConfig, fetcher: &dyn Fetcher) -> String {
    if let Some(identity) = config.identity.as_deref().map(str::trim)
        && !identity.is_empty()
    {
        return identity.to_owned();
    }

    match fetcher
        .get_text(&config.public_ip_url, &[], config.check_timeout())
        .await
    {
        Ok(body) => body.trim().to_owned(),
        Err(e) => {
            tracing::warn!("Failed to resolve public IP, checking without identity: {e}");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpFetcher;
    use mockito::Server;

    #[tokio::test]
    async fn test_configured_identity_wins() {
        let mut server = Server::new_async().await;
        let mock = server.mock("GET", "/").expect(0).create_async().await;

        let config = UpgradeConfig {
            identity: Some("edge-07".to_owned()),
            public_ip_url: server.url(),
            ..Default::default()
        };
        let fetcher = HttpFetcher::new().unwrap();
        assert_eq!(resolve_identity(&config, &fetcher).await, "edge-07");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_public_ip_fallback() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_body("203.0.113.9\n")
            .create_async()
            .await;

        let config = UpgradeConfig {
            identity: Some("   ".to_owned()),
            public_ip_url: server.url(),
            ..Default::default()
        };
        let fetcher = HttpFetcher::new().unwrap();
        assert_eq!(resolve_identity(&config, &fetcher).await, "203.0.113.9");
    }

    #[tokio::test]
    async fn test_unreachable_public_ip_gives_empty_identity() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(500)
            .create_async()
            .await;

        let config = UpgradeConfig {
            public_ip_url: server.url(),
            ..Default::default()
        };
        let fetcher = HttpFetcher::new().unwrap();
        assert_eq!(resolve_identity(&config, &fetcher).await, "");
    }
}
