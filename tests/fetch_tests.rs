//! HTTP fetch tests
//!
//! Serves manifests and plugin configuration from a mock server and loads
//! them through the default fetcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use plugin_runtime::{
    DefaultFetcher, Error, FetchError, FnPlugin, ModuleCatalog, PluginSpec, ResourceFetcher,
    Runtime,
};
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_json(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn root(server: &MockServer) -> Url {
    Url::parse(&format!("{}/plugins/", server.uri())).unwrap()
}

// ============================================================================
// Default fetcher
// ============================================================================

mod fetcher_tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_json() {
        let server = MockServer::start().await;
        serve_json(&server, "/plugins/plugins.json", json!({"e": {}})).await;

        let url = root(&server).join("plugins.json").unwrap();
        let value = DefaultFetcher::new().fetch_json(&url).await.unwrap();

        assert_eq!(value, json!({"e": {}}));
    }

    #[tokio::test]
    async fn test_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins/plugins.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = root(&server).join("plugins.json").unwrap();
        let err = DefaultFetcher::new().fetch_text(&url).await.unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        assert!(Error::from(err).is_retryable());
    }

    #[tokio::test]
    async fn test_missing_document() {
        let server = MockServer::start().await;

        let url = root(&server).join("absent.json").unwrap();
        let err = DefaultFetcher::new().fetch_text(&url).await.unwrap_err();

        assert!(err.is_not_found());
    }
}

// ============================================================================
// Runtime over HTTP roots
// ============================================================================

mod http_root_tests {
    use super::*;

    #[tokio::test]
    async fn test_plugin_loaded_from_http_root() {
        let server = MockServer::start().await;
        serve_json(
            &server,
            "/plugins/plugins.json",
            json!({
                "word-selected": {
                    "dict.lookup": {"package": "dict", "pluginPath": "lookup.js"}
                }
            }),
        )
        .await;
        serve_json(
            &server,
            "/plugins/dict/configuration.json",
            json!({"endpoint": "https://dictionary.example/api"}),
        )
        .await;

        let instantiations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&instantiations);
        let modules = ModuleCatalog::new().module("dict.lookup", move |descriptor| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![PluginSpec::from_descriptor(
                descriptor,
                FnPlugin::new().on_run(|params, configuration, _| {
                    Ok(json!({"word": params, "endpoint": configuration["endpoint"]}))
                }),
            )]
        });
        let runtime = Runtime::builder().modules(modules).build().unwrap();

        runtime.init(&[root(&server)]).await.unwrap();
        let outcomes = runtime
            .fire("word-selected", json!("hello"), None)
            .await
            .settled()
            .await;

        assert_eq!(instantiations.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcomes[0].value(),
            Some(&json!({"word": "hello", "endpoint": "https://dictionary.example/api"}))
        );
    }

    #[tokio::test]
    async fn test_unreachable_root_is_reported() {
        let server = MockServer::start().await;
        let runtime = Runtime::new();

        let err = runtime.init(&[root(&server)]).await.unwrap_err();

        assert!(matches!(&err, Error::DescriptorFetch { failures } if failures.len() == 1));
        assert!(err.to_string().contains(root(&server).as_str()));
    }
}
