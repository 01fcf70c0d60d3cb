//! Artifact sandbox: isolated execution and display of untrusted game markup.
//!
//! The isolation primitive is a loopback preview server plus browser-side
//! restrictions. Each render gets a fresh single-use token, so successive
//! previews are independent browsing contexts with no shared globals, timers,
//! or listeners. The artifact itself is served under
//! `Content-Security-Policy: sandbox allow-scripts`: its scripts run, but it
//! has an opaque origin with no access to the host's storage, cookies, or
//! credentials, and it cannot navigate the top-level page or open windows.
//!
//! Degraded content never propagates: empty markup and frames that miss the
//! load grace period both fall back to a neutral placeholder.

mod server;

use crate::session::Artifact;
use rand::Rng;
use rand::distr::Alphanumeric;
use server::{PreviewServer, Render};
use std::time::Duration;
use thiserror::Error;

/// How long the shell waits for the artifact frame before keeping the
/// placeholder.
const DEFAULT_GRACE: Duration = Duration::from_millis(4000);

const TOKEN_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("preview server unavailable: {0}")]
    Server(#[from] std::io::Error),

    #[error("failed to open preview: {0}")]
    Open(std::io::Error),
}

/// Address of one render. The URL is only valid until the next render or
/// teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderHandle {
    pub token: String,
    pub url: String,
}

/// Owns the preview server and the current render.
pub struct Sandbox {
    server: PreviewServer,
    grace: Duration,
}

impl Sandbox {
    /// Start a sandbox with the default load grace period.
    pub fn start() -> Result<Self, SandboxError> {
        Self::with_grace_period(DEFAULT_GRACE)
    }

    pub fn with_grace_period(grace: Duration) -> Result<Self, SandboxError> {
        Ok(Self {
            server: PreviewServer::bind()?,
            grace,
        })
    }

    /// Install `artifact` as the current render, replacing and invalidating
    /// any previous one. Empty markup renders the placeholder instead of a
    /// blank surface.
    pub fn render(&self, artifact: &Artifact) -> RenderHandle {
        let token = fresh_token();
        let frame = if artifact.source_markup.trim().is_empty() {
            tracing::warn!("empty artifact markup; rendering placeholder");
            placeholder_page()
        } else {
            artifact.source_markup.clone()
        };

        self.server.set_render(Render {
            token: token.clone(),
            shell: shell_page(&token, self.grace),
            frame,
        });

        let url = format!("http://127.0.0.1:{}/play/{token}", self.server.port());
        tracing::info!(%url, "artifact rendered");
        RenderHandle { token, url }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Drop the current render; outstanding preview URLs answer `410 Gone`.
    pub fn clear(&self) {
        self.server.clear();
    }

    /// Open a render in the system browser. Only ever called from an
    /// explicit user action.
    pub fn play(&self, handle: &RenderHandle) -> Result<(), SandboxError> {
        open::that(&handle.url).map_err(SandboxError::Open)
    }

    /// Tear the sandbox down, closing the server and invalidating all tokens.
    pub fn shutdown(mut self) {
        self.server.shutdown();
    }
}

fn fresh_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// The page the user actually opens: a placeholder that yields to the
/// artifact frame only once it loads within the grace period.
fn shell_page(token: &str, grace: Duration) -> String {
    let grace_ms = grace.as_millis();
    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>GameForge Preview</title>
<style>
  html, body {{ margin: 0; height: 100%; background: #111; color: #ddd;
                font-family: system-ui, sans-serif; }}
  #placeholder {{ display: flex; align-items: center; justify-content: center;
                  height: 100%; }}
  #game {{ border: 0; width: 100%; height: 100%; }}
</style>
</head>
<body>
<div id="placeholder"><p>Your game will appear here.</p></div>
<iframe id="game" src="/frame/{token}" sandbox="allow-scripts" hidden></iframe>
<script>
  const frame = document.getElementById("game");
  const placeholder = document.getElementById("placeholder");
  const timer = setTimeout(() => frame.remove(), {grace_ms});
  frame.addEventListener("load", () => {{
    clearTimeout(timer);
    frame.hidden = false;
    placeholder.hidden = true;
  }});
</script>
</body>
</html>
"#
    )
}

fn placeholder_page() -> String {
    "<!doctype html><html><body style=\"background:#111;color:#ddd;\
     font-family:system-ui,sans-serif;display:flex;align-items:center;\
     justify-content:center;height:100vh;margin:0\">\
     <p>Your game will appear here.</p></body></html>"
        .to_string()
}
