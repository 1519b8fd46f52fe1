//! Shared fixtures for the end-to-end scenarios.

use std::sync::Once;
use std::time::Duration;

use treillis::{Provider, RemoteError};

/// Install a subscriber once so `RUST_LOG=debug` surfaces link traffic
/// while the scenarios run.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    });
}

/// The provider every scenario calls into.
pub fn scenario_provider() -> Provider {
    Provider::builder()
        .function("echo", |text: String| async move { Ok(text) })
        .namespace("a", |a| {
            a.namespace("b", |b| {
                b.function("c", |x: i64, y: i64| async move { Ok(x + y) })
            })
        })
        .function("fail", |message: String| async move {
            Err::<(), _>(RemoteError::new("Error", message).detail("code", 7))
        })
        .function("slow", |value: i64| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(value)
        })
        .function("fast", |value: i64| async move { Ok(value) })
        .raw("hang", |_parameters| async move {
            std::future::pending::<()>().await;
            unreachable!()
        })
        .build()
}
