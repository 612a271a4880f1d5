mod backup;
mod calc;
mod db;
mod ipc;

use std::io::{self, BufRead, Write};

fn bad_json_response(e: &serde_json::Error) -> serde_json::Value {
    serde_json::json!({
        "id": null,
        "ok": false,
        "error": { "code": "bad_json", "message": e.to_string() },
    })
}

fn main() {
    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        // One response line per request line, even for garbage input. The
        // request id is unknown here, so the error carries a null id.
        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => bad_json_response(&e),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
