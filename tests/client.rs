mod common;

use bytes::Bytes;
use http2::{Config, Request};

#[tokio::test]
async fn redirect_follows_the_location_header_on_the_same_connection() {
    let ((client, client_driver), (server, mut server_driver)) = common::connection_pair(Config::default()).await;

    let server_task = tokio::spawn(async move {
        for _ in 0..2 {
            let request = server_driver.incoming.recv().await.expect("request never arrived");
            let path = request.headers.iter().find(|(k, _)| k == ":path").unwrap().1.clone();
            let (headers, body) = if path == "/start" {
                (
                    vec![
                        (":status".to_owned(), "301".to_owned()),
                        ("location".to_owned(), "/final".to_owned()),
                    ],
                    Bytes::new(),
                )
            } else {
                assert_eq!(path, "/final");
                (vec![(":status".to_owned(), "200".to_owned())], Bytes::from_static(b"arrived"))
            };
            server.respond(request.stream_id, headers, body).await.unwrap();
        }
    });

    let request = Request::get("https://example.test/start".parse().unwrap(), None);
    let first = client.request(request.clone()).await.unwrap();
    assert_eq!(first.status(), 301);

    let follow_up = request.redirect(&first).unwrap();
    let second = client.request(follow_up).await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.text(), "arrived");

    server_task.await.unwrap();
    drop(client_driver);
}
