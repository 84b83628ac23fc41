mod calc;
mod config;
mod consolidation;
mod db;
mod error;
mod invalidation;
mod ipc;
mod model;
mod plan;
mod store;

use clap::Parser;
use serde_json::json;
use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};

fn main() {
    let cfg = config::Config::parse();
    cfg.init_tracing();

    let mut state = ipc::AppState::default();
    if let Some(ws) = cfg.workspace.as_deref() {
        if let Err(e) = ipc::open_workspace(&mut state, ws) {
            // Still serve; the host can retry with workspace.select.
            warn!(workspace = %ws.display(), error = %e, "startup workspace not opened");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "gradebookd ready");

    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match stdin.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        }

        let resp = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => match serde_json::from_str::<ipc::Request>(line.trim()) {
                Ok(req) => ipc::handle_request(&mut state, req),
                Err(e) => bad_json(e.to_string()),
            },
            Err(e) => bad_json(e.to_string()),
        };

        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

/// Reply for a line that is not a JSON request; no id can be recovered.
fn bad_json(message: String) -> serde_json::Value {
    warn!(error = %message, "malformed request line");
    json!({
        "ok": false,
        "error": { "code": "bad_json", "message": message },
    })
}
