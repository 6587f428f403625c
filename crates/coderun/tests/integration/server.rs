use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use coderun::Server;
use coderun::config::Config;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{shell_config, wait_until_dead};

/// A server running on an ephemeral loopback port
struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let server = Server::new(config);
        let handle = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
                .expect("server failed");
        });

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not shut down")
            .unwrap();
    }
}

/// A parsed response
#[derive(Debug)]
struct Reply {
    status: u16,
    head: String,
    body: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body is not JSON")
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn parse_reply(raw: &[u8]) -> Reply {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator in response");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("no status code");
    Reply {
        status,
        head,
        body: raw[split + 4..].to_vec(),
    }
}

async fn send(addr: SocketAddr, raw: &[u8]) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    parse_reply(&response)
}

fn post(path: &str, body: &[u8]) -> Vec<u8> {
    let mut raw = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(body);
    raw
}

fn get(path: &str) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").into_bytes()
}

fn run_body(code: &str, input: &str) -> Vec<u8> {
    json!({ "code": code, "input": input }).to_string().into_bytes()
}

async fn start(root: &Path) -> TestServer {
    TestServer::start(shell_config(root)).await
}

#[tokio::test]
async fn test_run_success() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let reply = send(
        server.addr,
        &post("/run", &run_body("read x\necho \"got $x\"\nexit 3\n", "42\n")),
    )
    .await;

    assert_eq!(reply.status, 200);
    assert!(reply.head.contains("Content-Type: application/json"));
    assert!(reply.head.contains("Connection: close"));
    assert_eq!(
        reply.json(),
        json!({"ok": true, "exit_code": 3, "timed_out": false, "output": "got 42\n"})
    );
    server.stop().await;
}

#[tokio::test]
async fn test_run_compile_failure() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let reply = send(server.addr, &post("/run", &run_body("if then (\n", ""))).await;
    assert_eq!(reply.status, 200);

    let body = reply.json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["stage"], "compile");
    assert!(!body["output"].as_str().unwrap().is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_run_timeout() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let start = Instant::now();
    let reply = send(server.addr, &post("/run", &run_body("while :; do :; done\n", ""))).await;

    assert_eq!(reply.status, 200);
    assert_eq!(
        reply.json(),
        json!({"ok": true, "exit_code": 124, "timed_out": true, "output": ""})
    );
    assert!(start.elapsed() < Duration::from_secs(4));
    server.stop().await;
}

#[tokio::test]
async fn test_run_output_is_escaped() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let code = "printf 'quote\" back\\\\ tab\\t bell\\a end\\n'\n";
    let reply = send(server.addr, &post("/run", &run_body(code, ""))).await;

    assert_eq!(reply.status, 200);
    assert_eq!(reply.json()["output"], "quote\" back\\ tab\t bell end\n");
    server.stop().await;
}

#[tokio::test]
async fn test_run_rejects_invalid_json() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let reply = send(server.addr, &post("/run", b"{not json")).await;
    assert_eq!(reply.status, 400);
    let body = reply.json();
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON: "));

    let reply = send(server.addr, &post("/run", br#"{"input":"x"}"#)).await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.json(), json!({"ok": false, "error": "Missing 'code'"}));
    server.stop().await;
}

#[tokio::test]
async fn test_save_and_load() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let content = b"echo saved\n\x01binary\xff";
    let reply = send(server.addr, &post("/save?name=my_script.sh", content)).await;
    assert_eq!(reply.status, 200);
    assert_eq!(
        reply.json(),
        json!({"ok": true, "savedAs": "my_script.sh", "bytes": content.len()})
    );

    let reply = send(server.addr, &get("/load?name=my_script.sh")).await;
    assert_eq!(reply.status, 200);
    assert!(reply.head.contains("Content-Type: text/plain"));
    assert_eq!(reply.body, content);

    // Defaults to star_code.<ext>
    send(server.addr, &post("/save", b"default")).await;
    assert_eq!(
        std::fs::read(root.path().join("user_codes/star_code.sh")).unwrap(),
        b"default"
    );
    let reply = send(server.addr, &get("/load")).await;
    assert_eq!(reply.body, b"default");
    server.stop().await;
}

#[tokio::test]
async fn test_snippet_name_validation() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let reply = send(server.addr, &post("/save?name=..%2Fescape.sh", b"x")).await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.json()["ok"], false);
    assert!(!root.path().join("escape.sh").exists());

    let reply = send(server.addr, &get("/load?name=a%20b.sh")).await;
    assert_eq!(reply.status, 400);

    let reply = send(server.addr, &get("/load?name=missing.sh")).await;
    assert_eq!(reply.status, 404);
    assert!(reply.text().contains("missing.sh"));
    server.stop().await;
}

#[tokio::test]
async fn test_static_page() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let reply = send(server.addr, &get("/")).await;
    assert_eq!(reply.status, 404);

    std::fs::create_dir_all(root.path().join("public")).unwrap();
    std::fs::write(root.path().join("public/index.html"), "<!doctype html>").unwrap();

    let reply = send(server.addr, &get("/index.html")).await;
    assert_eq!(reply.status, 200);
    assert!(reply.head.contains("Content-Type: text/html; charset=utf-8"));
    assert_eq!(reply.body, b"<!doctype html>");
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_route() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let reply = send(server.addr, &get("/admin")).await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.text(), "Not Found\n");
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_request() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let reply = send(server.addr, b"GARBAGE\r\n\r\n").await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.text(), "Bad Request\n");
    server.stop().await;
}

#[tokio::test]
async fn test_truncated_request() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert_eq!(parse_reply(&response).status, 400);
    server.stop().await;
}

#[tokio::test]
async fn test_oversized_body_rejected_early() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"POST /run HTTP/1.1\r\nContent-Length: 100000000\r\n\r\n")
        .await
        .unwrap();

    // The body is never sent; the server must answer anyway.
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(1), stream.read_to_end(&mut response))
        .await
        .expect("server waited for the body")
        .unwrap();
    assert_eq!(parse_reply(&response).status, 400);
    server.stop().await;
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let start = Instant::now();
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();

    // read_timeout is two seconds in the shell config
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(parse_reply(&response).status, 400);
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;
    let addr = server.addr;

    let start = Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            tokio::spawn(async move {
                let code = format!("sleep 0.5\necho {i}\nexit {i}\n");
                send(addr, &post("/run", &run_body(&code, ""))).await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let reply = handle.await.unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.json(),
            json!({"ok": true, "exit_code": i, "timed_out": false, "output": format!("{i}\n")})
        );
    }
    // The runs overlap instead of queueing one after another
    assert!(start.elapsed() < Duration::from_millis(1800));
    server.stop().await;
}

#[tokio::test]
async fn test_half_closed_client_gets_run_reply() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(&post("/run", &run_body("sleep 0.2\necho hi\n", "")))
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let reply = parse_reply(&response);
    assert_eq!(reply.status, 200);
    assert_eq!(
        reply.json(),
        json!({ "ok": true, "exit_code": 0, "timed_out": false, "output": "hi\n" })
    );
    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_cancels_run() {
    let root = tempfile::tempdir().unwrap();
    let mut config = shell_config(root.path());
    config.toolchain.run.timeout = 30.0;
    config.server.cancel_on_disconnect = true;
    let server = TestServer::start(config).await;

    let pid_file = root.path().join("pid");
    let code = format!("echo $$ > '{}'\nexec sleep 30\n", pid_file.display());
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(&post("/run", &run_body(&code, "")))
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let pid = loop {
        if let Ok(content) = std::fs::read_to_string(&pid_file)
            && let Ok(pid) = content.trim().parse::<u32>()
        {
            break pid;
        }
        assert!(Instant::now() < deadline, "program never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    drop(stream);
    assert!(
        wait_until_dead(pid, Duration::from_secs(3)).await,
        "program {pid} outlived its client"
    );

    // The abandoned workspace is removed too
    tokio::time::sleep(Duration::from_millis(100)).await;
    let scratch = root.path().join("scratch");
    assert_eq!(std::fs::read_dir(scratch).unwrap().count(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let root = tempfile::tempdir().unwrap();
    let server = start(root.path()).await;
    let addr = server.addr;

    server.stop().await;
    assert!(TcpStream::connect(addr).await.is_err());
}
