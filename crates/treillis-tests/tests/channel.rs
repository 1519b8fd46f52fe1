//! The same scenarios over the in-process channel transport.

use std::time::Duration;

use treillis::channel;
use treillis::{LinkState, RpcError};
use treillis_tests::{init_tracing, scenario_provider};

async fn open_pair() -> (channel::ChannelAcceptor, channel::ChannelConnector) {
    init_tracing();
    let (acceptor, connector) = channel::pair(vec![]);
    acceptor.accept(scenario_provider()).await.unwrap();
    connector.connect(None).await.unwrap();
    (acceptor, connector)
}

#[tokio::test]
async fn echo_and_dotted_paths() {
    let (_acceptor, connector) = open_pair().await;

    let text: String = connector.driver().entry("echo").invoke(("hi",)).await.unwrap();
    assert_eq!(text, "hi");

    let sum: i64 = connector
        .driver()
        .entry("a")
        .entry("b")
        .entry("c")
        .invoke((2, 3))
        .await
        .unwrap();
    assert_eq!(sum, 5);
}

#[tokio::test]
async fn remote_failures_keep_their_shape() {
    let (_acceptor, connector) = open_pair().await;

    let error = connector
        .driver()
        .entry("fail")
        .invoke_value(("boom",))
        .await
        .unwrap_err();
    let remote = error.remote().expect("a remote failure");
    assert_eq!((remote.name.as_str(), remote.message.as_str()), ("Error", "boom"));
    assert_eq!(remote.details["code"], serde_json::json!(7));
}

#[tokio::test]
async fn completions_arrive_out_of_issue_order() {
    let (_acceptor, connector) = open_pair().await;

    let slow_driver = connector.driver().entry("slow");
    let slow = tokio::spawn(async move { slow_driver.invoke::<i64>((1,)).await });
    let fast_driver = connector.driver().entry("fast");
    let fast = tokio::spawn(async move { fast_driver.invoke::<i64>((2,)).await });

    assert_eq!(fast.await.unwrap().unwrap(), 2);
    assert!(!slow.is_finished(), "slow completed before its delay");
    assert_eq!(slow.await.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn closing_mid_flight_rejects_and_releases_joiners() {
    let (acceptor, connector) = open_pair().await;

    let hang_driver = connector.driver().entry("hang");
    let hanging = tokio::spawn(async move { hang_driver.invoke_value(()).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    acceptor.close().await.unwrap();

    assert_eq!(hanging.await.unwrap().unwrap_err(), RpcError::Disconnected);
    connector.join().await.unwrap();
    assert_eq!(connector.state(), LinkState::Closed);
}

#[tokio::test]
async fn join_times_out_on_an_idle_open_link() {
    let (acceptor, connector) = open_pair().await;

    assert!(!connector.join_for(Duration::from_millis(10)).await.unwrap());
    assert_eq!(connector.state(), LinkState::Open);

    let waiter = tokio::spawn(async move {
        connector.join().await.unwrap();
        connector
    });
    acceptor.close().await.unwrap();
    let connector = waiter.await.unwrap();
    assert_eq!(connector.state(), LinkState::Closed);
}
