mod common;

use common::*;

fn secret_site() -> TestSite {
    let site = TestSite::new();
    site.write_page("landing.html", b"public");
    // A file outside the content root that must never be reachable.
    std::fs::write(site.webroot().join("secret.txt"), b"webroot secret").unwrap();
    site
}

#[tokio::test]
async fn parent_traversal_is_forbidden() {
    let site = secret_site();
    let server = start_server(&site).await;

    let (head, body) = send_request(
        server.http,
        "GET /../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n",
    )
    .await;
    assert_eq!(status_of(&head), 403);
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("403 Forbidden"));

    server.stop().await;
}

#[tokio::test]
async fn traversal_cannot_escape_the_content_root() {
    let site = secret_site();
    let server = start_server(&site).await;

    for target in ["/../secret.txt", "/a/../../secret.txt", "/..%2Fsecret.txt/.."] {
        let raw = format!("GET {} HTTP/1.1\r\nHost: x\r\n\r\n", target);
        let (head, body) = send_request(server.http, &raw).await;
        assert_eq!(status_of(&head), 403, "for {:?}", target);
        assert!(!body.windows(6).any(|w| w == b"secret"));
    }

    server.stop().await;
}

#[tokio::test]
async fn empty_segments_are_forbidden() {
    let site = secret_site();
    let server = start_server(&site).await;

    let (head, _) =
        send_request(server.http, "GET //etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(status_of(&head), 403);

    server.stop().await;
}

#[tokio::test]
async fn embedded_nul_is_forbidden() {
    let site = secret_site();
    let server = start_server(&site).await;

    let raw = b"GET /landing.html\0.txt HTTP/1.1\r\nHost: x\r\n\r\n";
    let mut stream = tokio::net::TcpStream::connect(server.http).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut stream, raw)
        .await
        .unwrap();
    let (head, _) = read_response(&mut stream).await;
    assert_eq!(status_of(&head), 403);

    server.stop().await;
}

#[tokio::test]
async fn dotfiles_inside_the_root_still_serve() {
    // Traversal filtering is substring-based, not dot-based.
    let site = TestSite::new();
    site.write_page("landing.html", b"home");
    site.write_page(".wellknown.txt", b"ok");
    let server = start_server(&site).await;

    let (head, body) =
        send_request(server.http, "GET /.wellknown.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(status_of(&head), 200);
    assert_eq!(body, b"ok");

    server.stop().await;
}
