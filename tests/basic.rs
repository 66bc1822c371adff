mod common;

use bytes::Bytes;
use http2::{Config, H2Error, Request};

#[tokio::test]
async fn simple_get_round_trips_over_a_duplex_connection() {
    let ((client, client_driver), (server, mut server_driver)) = common::connection_pair(Config::default()).await;

    let server_task = tokio::spawn(async move {
        let request = server_driver.incoming.recv().await.expect("request never arrived");
        assert_eq!(request.headers.iter().find(|(k, _)| k == ":method").unwrap().1, "GET");
        server
            .respond(
                request.stream_id,
                vec![(":status".to_owned(), "200".to_owned())],
                Bytes::from_static(b"hello, world"),
            )
            .await
            .unwrap();
    });

    let response = client
        .request(Request::get("https://example.test/".parse().unwrap(), None))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "hello, world");

    server_task.await.unwrap();
    drop(client_driver);
}

#[tokio::test]
async fn a_body_larger_than_one_frame_is_reassembled() {
    let config = Config::builder().max_frame_size(16_384).build();
    let ((client, client_driver), (server, mut server_driver)) = common::connection_pair(config).await;
    let body = Bytes::from(vec![b'x'; 100_000]);
    let expected = body.clone();

    let server_task = tokio::spawn(async move {
        let request = server_driver.incoming.recv().await.expect("request never arrived");
        server
            .respond(request.stream_id, vec![(":status".to_owned(), "200".to_owned())], body)
            .await
            .unwrap();
    });

    let response = client
        .request(Request::get("https://example.test/big".parse().unwrap(), None))
        .await
        .unwrap();

    assert_eq!(response.body, expected);
    server_task.await.unwrap();
    drop(client_driver);
}

#[tokio::test]
async fn exceeding_max_concurrent_streams_refuses_the_new_stream() {
    let config = Config::builder().max_concurrent_streams(1).build();
    let ((client, client_driver), (server, mut server_driver)) = common::connection_pair(config).await;

    let first_client = client.clone();
    let first = tokio::spawn(async move {
        first_client
            .request(Request::get("https://example.test/a".parse().unwrap(), None))
            .await
    });

    // Wait for the first stream's HEADERS to actually be processed (and thus
    // counted as active) before opening the second.
    let first_request = server_driver.incoming.recv().await.expect("first request never arrived");

    let second = client
        .request(Request::get("https://example.test/b".parse().unwrap(), None))
        .await;
    assert!(matches!(second, Err(H2Error::Stream { .. })));

    server
        .respond(first_request.stream_id, vec![(":status".to_owned(), "200".to_owned())], Bytes::new())
        .await
        .unwrap();
    first.await.unwrap().unwrap();
    drop(client_driver);
}
