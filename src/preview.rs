//! Display sinks.
//!
//! The annotator pushes every annotated frame to a `DisplaySink`. The browser
//! preview keeps only the latest frame (as JPEG) and the running summary in
//! shared state; a background thread serves them over loopback HTTP.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;

use crate::annotator::RunSummary;
use crate::frame::Frame;

const MAX_REQUEST_BYTES: usize = 8192;
const JPEG_QUALITY: u8 = 80;
pub const PAGE_TITLE: &str = "Helmet Detection System";

/// Receives each annotated frame after it has been written to the output.
pub trait DisplaySink {
    fn show(&mut self, frame: &Frame, summary: &RunSummary) -> Result<()>;

    fn close(&mut self) {}
}

impl<D: DisplaySink + ?Sized> DisplaySink for Box<D> {
    fn show(&mut self, frame: &Frame, summary: &RunSummary) -> Result<()> {
        (**self).show(frame, summary)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Fan-out to several displays.
impl DisplaySink for Vec<Box<dyn DisplaySink>> {
    fn show(&mut self, frame: &Frame, summary: &RunSummary) -> Result<()> {
        for display in self.iter_mut() {
            display.show(frame, summary)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        for display in self.iter_mut() {
            display.close();
        }
    }
}

#[derive(Debug, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn show(&mut self, _frame: &Frame, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PreviewState {
    jpeg: Option<Vec<u8>>,
    summary: RunSummary,
    finished: bool,
}

type SharedState = Arc<Mutex<PreviewState>>;

fn lock(state: &SharedState) -> Result<std::sync::MutexGuard<'_, PreviewState>> {
    state
        .lock()
        .map_err(|_| anyhow!("preview state lock poisoned"))
}

pub struct PreviewServer {
    addr: String,
}

impl PreviewServer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn spawn(self) -> Result<PreviewHandle> {
        let configured_addr: SocketAddr = self
            .addr
            .parse()
            .with_context(|| format!("invalid preview address '{}'", self.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind preview server on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "preview configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let state = SharedState::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state_thread = state.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = serve(listener, state_thread, shutdown_thread) {
                log::error!("preview server stopped: {}", err);
            }
        });
        log::info!("preview available at http://{}/", addr);

        Ok(PreviewHandle {
            addr,
            state,
            shutdown,
            join: Some(join),
        })
    }
}

#[derive(Debug)]
pub struct PreviewHandle {
    pub addr: SocketAddr,
    state: SharedState,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PreviewHandle {
    /// Display sink feeding this server.
    pub fn display(&self) -> PreviewDisplay {
        PreviewDisplay {
            state: self.state.clone(),
        }
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("preview server thread panicked"))?;
        }
        Ok(())
    }
}

/// Publishes frames to a running `PreviewServer`.
#[derive(Clone, Debug)]
pub struct PreviewDisplay {
    state: SharedState,
}

impl DisplaySink for PreviewDisplay {
    fn show(&mut self, frame: &Frame, summary: &RunSummary) -> Result<()> {
        let jpeg = encode_jpeg(frame)?;
        let mut state = lock(&self.state)?;
        state.jpeg = Some(jpeg);
        state.summary = *summary;
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut state) = lock(&self.state) {
            state.finished = true;
        }
    }
}

pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let rgb = frame.to_rgb_image()?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .context("encode preview JPEG")?;
    Ok(out)
}

fn serve(listener: TcpListener, state: SharedState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &state) {
                    log::debug!("preview request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &SharedState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return write_response(&mut stream, &Response::json(403, r#"{"error":"forbidden"}"#));
    }

    let request = read_request(&mut stream)?;
    let response = route(&request, state)?;
    write_response(&mut stream, &response)
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[derive(Debug)]
struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.as_bytes().to_vec(),
        }
    }
}

fn route(request: &HttpRequest, state: &SharedState) -> Result<Response> {
    if request.method != "GET" {
        return Ok(Response::json(405, r#"{"error":"method_not_allowed"}"#));
    }
    let response = match request.path.as_str() {
        "/" | "/index.html" => Response {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: index_page().into_bytes(),
        },
        "/health" => Response::json(200, r#"{"status":"ok"}"#),
        "/stats" => {
            let state = lock(state)?;
            let body = serde_json::json!({
                "summary": state.summary,
                "finished": state.finished,
            });
            Response {
                status: 200,
                content_type: "application/json",
                body: serde_json::to_vec(&body)?,
            }
        }
        "/frame.jpg" => match lock(state)?.jpeg.clone() {
            Some(jpeg) => Response {
                status: 200,
                content_type: "image/jpeg",
                body: jpeg,
            },
            None => Response::json(404, r#"{"error":"no_frame"}"#),
        },
        _ => Response::json(404, r#"{"error":"not_found"}"#),
    };
    Ok(response)
}

fn index_page() -> String {
    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
img {{ max-width: 100%; border: 1px solid #ccc; }}
#stats {{ margin-top: 1em; }}
</style>
</head>
<body>
<h1>{title}</h1>
<img id="frame" alt="waiting for frames">
<div id="stats">waiting for frames</div>
<script>
function refresh() {{
  const img = new Image();
  img.onload = () => {{ document.getElementById('frame').src = img.src; }};
  img.src = '/frame.jpg?t=' + Date.now();
  fetch('/stats').then(r => r.json()).then(s => {{
    const m = s.summary;
    document.getElementById('stats').textContent =
      'frames ' + m.frames_processed + ' | detections ' + m.detections_drawn +
      ' | violations ' + m.violations + ' | snapshots ' + m.snapshots_written +
      (s.finished ? ' | finished' : '');
  }}).catch(() => {{}});
}}
setInterval(refresh, 200);
</script>
</body>
</html>
"#,
        title = PAGE_TITLE
    )
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path);
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
    })
}

fn write_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let status_line = match response.status {
        200 => "HTTP/1.1 200 OK",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        content_type = response.content_type,
        len = response.body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&response.body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Bgr;

    fn get(path: &str) -> HttpRequest {
        HttpRequest {
            method: "GET".to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn frame_route_waits_for_first_frame() -> Result<()> {
        let state = SharedState::default();
        assert_eq!(route(&get("/frame.jpg"), &state)?.status, 404);

        let mut display = PreviewDisplay {
            state: state.clone(),
        };
        let summary = RunSummary {
            frames_processed: 1,
            ..RunSummary::default()
        };
        display.show(&Frame::filled(16, 16, Bgr::GREEN, 0)?, &summary)?;

        let response = route(&get("/frame.jpg"), &state)?;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "image/jpeg");
        assert_eq!(&response.body[..2], &[0xFF, 0xD8]);

        let stats: serde_json::Value = serde_json::from_slice(&route(&get("/stats"), &state)?.body)?;
        assert_eq!(stats["summary"]["frames_processed"], 1);
        assert_eq!(stats["finished"], false);
        Ok(())
    }

    #[test]
    fn rejects_other_methods_and_paths() -> Result<()> {
        let state = SharedState::default();
        let post = HttpRequest {
            method: "POST".to_string(),
            path: "/".to_string(),
        };
        assert_eq!(route(&post, &state)?.status, 405);
        assert_eq!(route(&get("/admin"), &state)?.status, 404);
        assert_eq!(route(&get("/health"), &state)?.status, 200);
        Ok(())
    }

    #[test]
    fn index_page_carries_title() -> Result<()> {
        let body = route(&get("/"), &SharedState::default())?.body;
        let html = String::from_utf8(body)?;
        assert!(html.contains("<title>Helmet Detection System</title>"));
        assert!(html.contains("/frame.jpg"));
        Ok(())
    }
}
