//! Loopback HTTP server backing the artifact sandbox.
//!
//! Serves exactly one render at a time: a shell page at `/play/{token}` and
//! the raw artifact at `/frame/{token}`. Tokens are single-use per render;
//! a superseded token answers `410 Gone`, so a stale preview tab cannot keep
//! executing against the current session.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(10);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One prepared render: the shell page shown to the user and the artifact
/// frame it embeds, both keyed by the same token.
#[derive(Debug, Clone)]
pub(super) struct Render {
    pub token: String,
    pub shell: String,
    pub frame: String,
}

#[derive(Debug)]
pub(super) struct HttpResponse {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl HttpResponse {
    fn html(status: u16, reason: &'static str, body: String) -> Self {
        Self {
            status,
            reason,
            headers: vec![
                ("Content-Type", "text/html; charset=utf-8".to_string()),
                ("Cache-Control", "no-store".to_string()),
                ("Referrer-Policy", "no-referrer".to_string()),
            ],
            body,
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    #[cfg(test)]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[cfg(test)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[cfg(test)]
    pub fn body(&self) -> &str {
        &self.body
    }

    fn write_to(&self, stream: &mut TcpStream) -> io::Result<()> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));
        out.push_str(&self.body);
        stream.write_all(out.as_bytes())?;
        stream.flush()
    }
}

/// Decide the response for a request path against the current render.
pub(super) fn route(path: &str, render: Option<&Render>) -> HttpResponse {
    let (kind, token) = if let Some(token) = path.strip_prefix("/play/") {
        ("play", token)
    } else if let Some(token) = path.strip_prefix("/frame/") {
        ("frame", token)
    } else {
        return HttpResponse::html(404, "Not Found", not_found_page());
    };

    match render {
        Some(r) if r.token == token => match kind {
            "play" => HttpResponse::html(200, "OK", r.shell.clone())
                // The shell itself runs no foreign code; lock it down to its
                // own inline loader and the artifact frame.
                .with_header(
                    "Content-Security-Policy",
                    "default-src 'none'; frame-src 'self'; script-src 'unsafe-inline'; style-src 'unsafe-inline'",
                ),
            _ => HttpResponse::html(200, "OK", r.frame.clone())
                // Opaque origin for the artifact: scripts run, but there is
                // no parent access, storage, credentialed egress, top-level
                // navigation, or popups.
                .with_header("Content-Security-Policy", "sandbox allow-scripts"),
        },
        _ => HttpResponse::html(410, "Gone", gone_page()),
    }
}

fn not_found_page() -> String {
    "<!doctype html><html><body><p>Not found.</p></body></html>".to_string()
}

fn gone_page() -> String {
    "<!doctype html><html><body><p>This preview has been replaced. \
     Return to the builder for the latest version.</p></body></html>"
        .to_string()
}

/// The server proper: a non-blocking accept loop on a worker thread.
pub(super) struct PreviewServer {
    port: u16,
    render: Arc<Mutex<Option<Render>>>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Bind an ephemeral loopback port and start serving.
    pub fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;

        let render: Arc<Mutex<Option<Render>>> = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = thread::spawn({
            let render = Arc::clone(&render);
            let stop = Arc::clone(&stop);
            move || serve(&listener, &render, &stop)
        });

        tracing::info!(port, "preview server listening");
        Ok(Self {
            port,
            render,
            stop,
            worker: Some(worker),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Install a new render, invalidating the previous token.
    pub fn set_render(&self, render: Render) {
        *self.render.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(render);
    }

    /// Drop the current render; all tokens answer `410 Gone`.
    pub fn clear(&self) {
        *self.render.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    /// Stop the accept loop and close the listener. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            tracing::info!(port = self.port, "preview server stopped");
        }
    }
}

impl Drop for PreviewServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(listener: &TcpListener, render: &Mutex<Option<Render>>, stop: &AtomicBool) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((mut stream, _)) => {
                if let Err(e) = handle_connection(&mut stream, render) {
                    tracing::debug!(error = %e, "preview connection error");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "preview server accept failed");
                break;
            }
        }
    }
}

fn handle_connection(stream: &mut TcpStream, render: &Mutex<Option<Render>>) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer)?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    let path = request.lines().next().and_then(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("GET"), Some(path)) => Some(path.to_string()),
            _ => None,
        }
    });

    let response = match path {
        Some(path) => {
            let guard = render.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            route(&path, guard.as_ref())
        }
        None => HttpResponse::html(405, "Method Not Allowed", not_found_page()),
    };

    response.write_to(stream)
}
