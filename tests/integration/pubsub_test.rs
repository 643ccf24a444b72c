// tests/integration/pubsub_test.rs

//! Integration tests for Pub/Sub over live connections
//! Tests: SUBSCRIBE, UNSUBSCRIBE, PSUBSCRIBE, PUNSUBSCRIBE, PUBLISH, PUBSUB, MONITOR

use super::test_helpers::{TestServer, bulk, simple, sub_reply};
use respconn::core::protocol::RespFrame;

// ===== SUBSCRIBE / PUBLISH =====

#[tokio::test]
async fn test_publish_reaches_subscriber() {
    let server = TestServer::new();
    let mut subscriber = server.connect();
    let mut publisher = server.connect();

    assert_eq!(
        subscriber.request(&["SUBSCRIBE", "news"]).await,
        sub_reply("subscribe", "news", 1)
    );
    assert_eq!(
        publisher.request(&["PUBLISH", "news", "hello"]).await,
        RespFrame::Integer(1)
    );
    assert_eq!(
        subscriber.recv().await,
        RespFrame::Array(vec![bulk("message"), bulk("news"), bulk("hello")])
    );
}

#[tokio::test]
async fn test_publish_to_empty_channel() {
    let server = TestServer::new();
    let mut publisher = server.connect();

    assert_eq!(
        publisher.request(&["PUBLISH", "nobody", "hi"]).await,
        RespFrame::Integer(0)
    );
}

#[tokio::test]
async fn test_duplicate_subscribe_keeps_count() {
    let server = TestServer::new();
    let mut client = server.connect();

    client.send(&["SUBSCRIBE", "a", "a", "b"]).await;
    assert_eq!(client.recv().await, sub_reply("subscribe", "a", 1));
    assert_eq!(client.recv().await, sub_reply("subscribe", "a", 1));
    assert_eq!(client.recv().await, sub_reply("subscribe", "b", 2));
    assert_eq!(server.state.pubsub.numsub(b"a"), 1);
}

#[tokio::test]
async fn test_pattern_publish() {
    let server = TestServer::new();
    let mut subscriber = server.connect();
    let mut publisher = server.connect();

    assert_eq!(
        subscriber.request(&["PSUBSCRIBE", "news.*"]).await,
        sub_reply("psubscribe", "news.*", 1)
    );
    assert_eq!(
        publisher.request(&["PUBLISH", "news.tech", "rust"]).await,
        RespFrame::Integer(1)
    );
    assert_eq!(
        subscriber.recv().await,
        RespFrame::Array(vec![
            bulk("pmessage"),
            bulk("news.*"),
            bulk("news.tech"),
            bulk("rust")
        ])
    );
    assert_eq!(
        publisher.request(&["PUBLISH", "weather", "rain"]).await,
        RespFrame::Integer(0)
    );
}

#[tokio::test]
async fn test_channel_and_pattern_both_deliver() {
    let server = TestServer::new();
    let mut subscriber = server.connect();
    let mut publisher = server.connect();

    subscriber.request(&["SUBSCRIBE", "log"]).await;
    subscriber.request(&["PSUBSCRIBE", "l*"]).await;

    assert_eq!(
        publisher.request(&["PUBLISH", "log", "x"]).await,
        RespFrame::Integer(2)
    );
}

#[tokio::test]
async fn test_subscriber_that_never_reads_stays_bounded() {
    let server = TestServer::new();
    let mut subscriber = server.connect();
    let mut publisher = server.connect();
    let id = subscriber.id;

    subscriber.request(&["SUBSCRIBE", "slow"]).await;

    let payload = "x".repeat(1024);
    let mut delivered = 0;
    for _ in 0..2_000 {
        let RespFrame::Integer(n) = publisher.request(&["PUBLISH", "slow", &payload]).await
        else {
            panic!("PUBLISH should return an integer");
        };
        delivered += n;
    }

    // The push queue plus whatever fits in the pipe and the write buffer.
    assert!(delivered < 400, "{delivered} of 2000 messages were queued");
    assert!(server.state.has_client(id));
    assert_eq!(
        subscriber.recv().await,
        RespFrame::Array(vec![bulk("message"), bulk("slow"), bulk(&payload)])
    );
}

// ===== UNSUBSCRIBE / PUNSUBSCRIBE =====

#[tokio::test]
async fn test_unsubscribe_all_counts_down() {
    let server = TestServer::new();
    let mut client = server.connect();

    client.send(&["SUBSCRIBE", "foo", "bar"]).await;
    client.recv().await;
    client.recv().await;

    client.send(&["UNSUBSCRIBE"]).await;
    assert_eq!(client.recv().await, sub_reply("unsubscribe", "foo", 1));
    assert_eq!(client.recv().await, sub_reply("unsubscribe", "bar", 0));
    assert_eq!(server.state.pubsub.channel_count(), 0);

    // With nothing left the reply carries a null name.
    assert_eq!(
        client.request(&["UNSUBSCRIBE"]).await,
        RespFrame::Array(vec![bulk("unsubscribe"), RespFrame::Null, RespFrame::Integer(0)])
    );
}

#[tokio::test]
async fn test_punsubscribe_does_not_touch_channels() {
    let server = TestServer::new();
    let mut client = server.connect();
    let id = client.id;

    client.request(&["SUBSCRIBE", "news"]).await;
    client.request(&["PSUBSCRIBE", "news"]).await;

    assert_eq!(
        client.request(&["PUNSUBSCRIBE", "news"]).await,
        sub_reply("punsubscribe", "news", 1)
    );
    assert!(server.state.pubsub.is_channel_subscriber(b"news", id));
    assert!(!server.state.pubsub.is_pattern_subscriber(b"news", id));
    assert_eq!(server.state.pubsub.numpat(), 0);
}

// ===== Subscribed context =====

#[tokio::test]
async fn test_subscribed_client_is_restricted() {
    let server = TestServer::new();
    let mut client = server.connect();

    client.request(&["SUBSCRIBE", "a"]).await;

    let RespFrame::Error(msg) = client.request(&["ECHO", "hi"]).await else {
        panic!("ECHO should be rejected while subscribed");
    };
    assert!(msg.starts_with("ERR Can't execute 'echo'"));

    assert_eq!(
        client.request(&["PING"]).await,
        RespFrame::Array(vec![bulk("pong"), bulk("")])
    );

    client.request(&["UNSUBSCRIBE", "a"]).await;
    assert_eq!(client.request(&["ECHO", "hi"]).await, bulk("hi"));
}

// ===== PUBSUB introspection =====

#[tokio::test]
async fn test_pubsub_introspection() {
    let server = TestServer::new();
    let mut a = server.connect();
    let mut b = server.connect();
    let mut observer = server.connect();

    a.request(&["SUBSCRIBE", "news.tech"]).await;
    b.request(&["SUBSCRIBE", "news.tech", "sports"]).await;
    b.recv().await;
    a.request(&["PSUBSCRIBE", "x*"]).await;
    b.request(&["PSUBSCRIBE", "x*"]).await;

    let RespFrame::Array(channels) = observer.request(&["PUBSUB", "CHANNELS", "news.*"]).await
    else {
        panic!("PUBSUB CHANNELS should return an array");
    };
    assert_eq!(channels, vec![bulk("news.tech")]);

    assert_eq!(
        observer
            .request(&["PUBSUB", "NUMSUB", "news.tech", "sports", "none"])
            .await,
        RespFrame::Array(vec![
            bulk("news.tech"),
            RespFrame::Integer(2),
            bulk("sports"),
            RespFrame::Integer(1),
            bulk("none"),
            RespFrame::Integer(0),
        ])
    );
    assert_eq!(
        observer.request(&["PUBSUB", "NUMPAT"]).await,
        RespFrame::Integer(1)
    );
    assert_eq!(
        observer.request(&["PUBSUB", "HELP", "ME"]).await,
        RespFrame::Error("ERR unknown subcommand 'help'".to_string())
    );
}

// ===== MONITOR =====

#[tokio::test]
async fn test_monitor_sees_other_clients_commands() {
    let server = TestServer::new();
    let mut monitor = server.connect();
    let mut client = server.connect();

    assert_eq!(monitor.request(&["MONITOR"]).await, simple("OK"));
    client.request(&["ECHO", "watched"]).await;

    let RespFrame::SimpleString(line) = monitor.recv().await else {
        panic!("monitor lines are simple strings");
    };
    assert!(line.contains("\"ECHO\" \"watched\""));
    assert!(line.contains("127.0.0.1:50000"));
}

#[tokio::test]
async fn test_monitor_removed_on_disconnect() {
    let server = TestServer::new();
    let mut monitor = server.connect();

    monitor.request(&["MONITOR"]).await;
    assert!(server.state.pubsub.has_monitors());

    monitor.hang_up().await;
    monitor.finish().await;
    assert!(!server.state.pubsub.has_monitors());
}
