use etude_core::{EtudeResult, ReactorMetrics, Server, SignalSender};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;

struct TestServer {
    addr: SocketAddr,
    stop: SignalSender,
    metrics: Arc<ReactorMetrics>,
    handle: JoinHandle<EtudeResult<()>>,
    _root: TempDir,
}

impl TestServer {
    fn start(max_connections: usize) -> Self {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "index.html", b"<h1>etude</h1>", 0o644);
        publish(root.path(), "hello.txt", b"Hello, World!", 0o644);
        publish(root.path(), "private.txt", b"secret", 0o600);
        fs::create_dir(root.path().join("docs")).unwrap();
        fs::set_permissions(root.path().join("docs"), fs::Permissions::from_mode(0o755)).unwrap();

        let reactor = Server::init(0)
            .host(Ipv4Addr::LOCALHOST)
            .doc_root(root.path())
            .max_connections(max_connections)
            .listen()
            .unwrap();
        let addr = reactor.local_addr();
        let stop = reactor.stop_handle().unwrap();
        let metrics = reactor.metrics();
        let handle = thread::spawn(move || {
            let mut reactor = reactor;
            reactor.run()
        });

        Self {
            addr,
            stop,
            metrics,
            handle,
            _root: root,
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    /// One request on a fresh connection, read until the server closes it.
    fn fetch(&self, request: &[u8]) -> String {
        let mut stream = self.connect();
        stream.write_all(request).unwrap();
        let mut res = String::new();
        stream.read_to_string(&mut res).unwrap();
        res
    }

    fn shutdown(self) -> Arc<ReactorMetrics> {
        self.stop.stop().unwrap();
        self.handle.join().unwrap().unwrap();
        self.metrics
    }
}

fn publish(root: &Path, name: &str, data: &[u8], mode: u32) {
    let path = root.join(name);
    fs::write(&path, data).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
}

/// Read one response off a keep-alive stream using its Content-Length.
fn read_response(reader: &mut BufReader<TcpStream>) -> (String, Vec<u8>) {
    let mut head = String::new();
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        if let Some(v) = line.strip_prefix("Content-Length: ") {
            content_length = v.trim().parse().unwrap();
        }
        head.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).unwrap();
    (head, body)
}

#[test]
fn test_serves_files_and_errors() {
    let server = TestServer::start(64);

    let res = server.fetch(b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.contains("Content-Length: 13\r\n"));
    assert!(res.contains("Connection: close\r\n"));
    assert!(res.ends_with("\r\n\r\nHello, World!"));

    let res = server.fetch(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.contains("Content-Type: text/html\r\n"));
    assert!(res.ends_with("<h1>etude</h1>"));

    let res = server.fetch(b"GET /missing.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(res.ends_with("The requested file was not found on this server.\n"));

    let res = server.fetch(b"GET /private.txt HTTP/1.1\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    let res = server.fetch(b"GET /../etc/passwd HTTP/1.1\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    let res = server.fetch(b"GET /docs HTTP/1.1\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    let res = server.fetch(b"GET\r\n");
    assert!(res.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(res.contains("Connection: close\r\n"));

    let metrics = server.shutdown();
    let snap = metrics.snapshot();
    assert_eq!(snap.req_count, 7);
    assert_eq!(snap.active_conns, 0);
}

#[test]
fn test_keep_alive_serves_several_requests() {
    let server = TestServer::start(64);
    let stream = server.connect();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    for _ in 0..3 {
        writer
            .write_all(b"GET /hello.txt HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();
        let (head, body) = read_response(&mut reader);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert_eq!(body, b"Hello, World!");
    }

    // Split request on the same connection.
    writer.write_all(b"GET /missing HTTP/1.1\r\nConn").unwrap();
    writer.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    writer.write_all(b"ection: keep-alive\r\n\r\n").unwrap();
    let (head, _) = read_response(&mut reader);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));

    let metrics = server.metrics.clone();
    assert_eq!(metrics.snapshot().active_conns, 1);
    drop(writer);
    drop(reader);
    server.shutdown();
}

#[test]
fn test_full_table_rejects_with_busy_message() {
    let server = TestServer::start(1);

    let first = server.connect();
    let mut second = server.connect();
    let mut res = String::new();
    second.read_to_string(&mut res).unwrap();
    assert_eq!(res, "Internal server busy");

    drop(first);
    let metrics = server.shutdown();
    assert_eq!(metrics.snapshot().rejected_busy, 1);
}

#[test]
fn test_stop_retires_open_connections() {
    let server = TestServer::start(8);
    let mut idle = server.connect();
    // Make sure the connection has been admitted before stopping.
    idle.write_all(b"GET /hello.txt HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let mut reader = BufReader::new(idle.try_clone().unwrap());
    let (head, _) = read_response(&mut reader);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));

    let metrics = server.shutdown();
    assert_eq!(metrics.snapshot().active_conns, 0);

    let mut rest = Vec::new();
    assert_eq!(idle.read_to_end(&mut rest).unwrap(), 0);
}
