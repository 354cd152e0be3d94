//! Serves over a real socket on an ephemeral port and talks raw HTTP/1.1.

use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use fileshare::FileShare;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn ephemeral() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

async fn get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    response
}

fn body(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .expect("response has a body separator")
}

fn spawn(share: FileShare) -> (oneshot::Sender<()>, JoinHandle<anyhow::Result<()>>) {
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(share.serve(async {
        let _ = stopped.await;
    }));
    (stop, handle)
}

#[tokio::test]
async fn content_is_returned_for_every_path() {
    let share = FileShare::bind_content("foobar", ephemeral())
        .await
        .expect("bind");
    let addr = share.local_addr().expect("addr");
    let (stop, handle) = spawn(share);

    for path in ["/", "/config.yaml", "/deeply/nested?x=1"] {
        let response = get(addr, path).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert_eq!(body(&response), "foobar");
    }

    stop.send(()).expect("signal shutdown");
    handle.await.expect("join").expect("serve");
}

#[tokio::test]
async fn directory_files_are_served_and_missing_ones_are_404() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir(temp.path().join("images")).expect("mkdir");
    fs::write(temp.path().join("images").join("seed.iso"), "iso-bytes").expect("write file");
    fs::write(temp.path().join("index.html"), "<h1>share</h1>").expect("write index");

    let share = FileShare::bind_dir(temp.path(), ephemeral())
        .await
        .expect("bind");
    let addr = share.local_addr().expect("addr");
    let (stop, handle) = spawn(share);

    let response = get(addr, "/images/seed.iso").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(body(&response), "iso-bytes");

    let response = get(addr, "/").await;
    assert_eq!(body(&response), "<h1>share</h1>");

    let response = get(addr, "/images/missing.iso").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    stop.send(()).expect("signal shutdown");
    handle.await.expect("join").expect("serve");
}

#[tokio::test]
async fn directories_without_index_are_listed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let images = temp.path().join("images");
    fs::create_dir_all(images.join("arm64")).expect("mkdir");
    fs::write(images.join("seed.iso"), "iso-bytes").expect("write file");

    let share = FileShare::bind_dir(temp.path(), ephemeral())
        .await
        .expect("bind");
    let addr = share.local_addr().expect("addr");
    let (stop, handle) = spawn(share);

    let response = get(addr, "/images/").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(
        body(&response),
        "<pre>\n<a href=\"arm64/\">arm64/</a>\n<a href=\"seed.iso\">seed.iso</a>\n</pre>\n"
    );

    let response = get(addr, "/").await;
    assert!(body(&response).contains("<a href=\"images/\">images/</a>"));

    let response = get(addr, "/missing/").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    stop.send(()).expect("signal shutdown");
    handle.await.expect("join").expect("serve");
}

#[tokio::test]
async fn server_stops_accepting_after_shutdown() {
    let share = FileShare::bind_content("bye", ephemeral())
        .await
        .expect("bind");
    let addr = share.local_addr().expect("addr");
    let (stop, handle) = spawn(share);

    assert_eq!(body(&get(addr, "/").await), "bye");

    stop.send(()).expect("signal shutdown");
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("server stops")
        .expect("join")
        .expect("serve");

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn bind_dir_rejects_a_file() {
    let temp = tempfile::NamedTempFile::new().expect("tempfile");
    let err = match FileShare::bind_dir(temp.path(), ephemeral()).await {
        Ok(_) => panic!("file is not a directory"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("is not a directory"));
}

#[tokio::test]
async fn serve_content_helper_runs_until_shutdown() {
    let (stop, stopped) = oneshot::channel::<()>();
    stop.send(()).expect("signal shutdown");
    fileshare::serve_content("x", ephemeral(), async {
        let _ = stopped.await;
    })
    .await
    .expect("serve returns after shutdown");
}
