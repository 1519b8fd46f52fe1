//! End-to-end scenarios over the websocket transport.

use std::net::SocketAddr;
use std::time::Duration;

use treillis::{LinkState, Provider, RemoteError, RpcError};
use treillis_tests::{init_tracing, scenario_provider};
use treillis_websocket::{WebSocketConnector, WebSocketServer, WsError};

/// A server that accepts every connection with the scenario provider,
/// except connectors announcing `reject-me`.
async fn open_server() -> (WebSocketServer, String) {
    init_tracing();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = WebSocketServer::open(addr, |acceptor| async move {
        if acceptor.arguments().contains(&"reject-me".to_owned()) {
            acceptor.reject().await.unwrap();
        } else {
            acceptor.accept(scenario_provider()).await.unwrap();
            acceptor.join().await.unwrap();
        }
    })
    .await
    .unwrap();
    let url = format!("ws://{}", server.local_addr());
    (server, url)
}

#[tokio::test]
async fn echo_round_trips_a_value() {
    let (server, url) = open_server().await;
    let connector = WebSocketConnector::connect(&url, &[], None).await.unwrap();

    let text: String = connector.driver().entry("echo").invoke(("hi",)).await.unwrap();
    assert_eq!(text, "hi");

    connector.close().await.unwrap();
    server.close().await;
}

#[tokio::test]
async fn dotted_paths_reach_nested_functions() {
    let (server, url) = open_server().await;
    let connector = WebSocketConnector::connect(&url, &[], None).await.unwrap();

    let sum: i64 = connector
        .driver()
        .entry("a")
        .entry("b")
        .entry("c")
        .invoke((2, 3))
        .await
        .unwrap();
    assert_eq!(sum, 5);

    connector.close().await.unwrap();
    server.close().await;
}

#[tokio::test]
async fn remote_failures_preserve_name_message_and_details() {
    let (server, url) = open_server().await;
    let connector = WebSocketConnector::connect(&url, &[], None).await.unwrap();

    let error = connector
        .driver()
        .entry("fail")
        .invoke_value(("boom",))
        .await
        .unwrap_err();
    let remote = error.remote().expect("a remote failure");
    assert_eq!(remote.name, "Error");
    assert_eq!(remote.message, "boom");
    assert_eq!(remote.details["code"], serde_json::json!(7));

    connector.close().await.unwrap();
    server.close().await;
}

#[tokio::test]
async fn completions_arrive_out_of_issue_order() {
    let (server, url) = open_server().await;
    let connector = WebSocketConnector::connect(&url, &[], None).await.unwrap();

    let slow_driver = connector.driver().entry("slow");
    let slow = tokio::spawn(async move { slow_driver.invoke::<i64>((1,)).await });
    let fast_driver = connector.driver().entry("fast");
    let fast = tokio::spawn(async move { fast_driver.invoke::<i64>((2,)).await });

    assert_eq!(fast.await.unwrap().unwrap(), 2);
    assert!(!slow.is_finished(), "slow completed before its delay");
    assert_eq!(slow.await.unwrap().unwrap(), 1);

    connector.close().await.unwrap();
    server.close().await;
}

#[tokio::test]
async fn closing_mid_flight_rejects_and_releases_joiners() {
    let (server, url) = open_server().await;
    let connector = WebSocketConnector::connect(&url, &[], None).await.unwrap();

    let hang_driver = connector.driver().entry("hang");
    let hanging = tokio::spawn(async move { hang_driver.invoke_value(()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.close().await;

    assert_eq!(hanging.await.unwrap().unwrap_err(), RpcError::Disconnected);
    connector.join().await.unwrap();
    assert_eq!(connector.state(), LinkState::Closed);
}

#[tokio::test]
async fn join_times_out_on_an_idle_open_link() {
    let (server, url) = open_server().await;
    let connector = WebSocketConnector::connect(&url, &[], None).await.unwrap();

    assert!(!connector.join_for(Duration::from_millis(10)).await.unwrap());
    assert!(
        !connector
            .join_until(tokio::time::Instant::now() + Duration::from_millis(10))
            .await
            .unwrap()
    );
    assert_eq!(connector.state(), LinkState::Open);

    connector.close().await.unwrap();
    assert!(connector.join_for(Duration::from_millis(100)).await.unwrap());
    server.close().await;
}

#[tokio::test]
async fn rejected_handshakes_fail_the_connect() {
    let (server, url) = open_server().await;
    let error = WebSocketConnector::connect(&url, &["reject-me".to_owned()], None)
        .await
        .unwrap_err();
    assert!(matches!(error, WsError::Rejected), "{error}");
    server.close().await;
}

#[tokio::test]
async fn calls_flow_in_both_directions() {
    init_tracing();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    // The server's `relay` calls back into the connector's `shout`.
    let server = WebSocketServer::open(addr, |acceptor| async move {
        let driver = acceptor.driver();
        let provider = Provider::builder()
            .function("relay", move |text: String| {
                let driver = driver.clone();
                async move {
                    driver
                        .entry("shout")
                        .invoke::<String>((text,))
                        .await
                        .map_err(|error| RemoteError::new("RelayError", error.to_string()))
                }
            })
            .build();
        acceptor.accept(provider).await.unwrap();
        let _ = acceptor.join().await;
    })
    .await
    .unwrap();
    let url = format!("ws://{}", server.local_addr());

    let connector_provider = Provider::builder()
        .function("shout", |text: String| async move { Ok(text.to_uppercase()) })
        .build();
    let connector = WebSocketConnector::connect(&url, &[], Some(connector_provider))
        .await
        .unwrap();

    let relayed: String = connector
        .driver()
        .entry("relay")
        .invoke(("quiet",))
        .await
        .unwrap();
    assert_eq!(relayed, "QUIET");

    connector.close().await.unwrap();
    server.close().await;
}

#[tokio::test]
async fn arguments_reach_the_acceptor() {
    init_tracing();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = WebSocketServer::open(addr, |acceptor| async move {
        let provider = Provider::builder()
            .function("arguments", {
                let arguments = acceptor.arguments().to_vec();
                move || {
                    let arguments = arguments.clone();
                    async move { Ok(arguments) }
                }
            })
            .build();
        acceptor.accept(provider).await.unwrap();
        let _ = acceptor.join().await;
    })
    .await
    .unwrap();
    let url = format!("ws://{}", server.local_addr());

    let arguments = vec!["room=alpha".to_owned(), "user=bea".to_owned()];
    let connector = WebSocketConnector::connect(&url, &arguments, None)
        .await
        .unwrap();
    let echoed: Vec<String> = connector
        .driver()
        .entry("arguments")
        .invoke(())
        .await
        .unwrap();
    assert_eq!(echoed, arguments);

    connector.close().await.unwrap();
    server.close().await;
}
