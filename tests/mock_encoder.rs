//! Stand-in encoder binary for integration tests (no test harness: this is
//! a plain `fn main`, invoked as a child process the way `ffmpeg` would
//! be). Captures its argv to a file so tests can assert on exactly what
//! the ArgumentBuilder produced, and optionally emits a synthetic
//! `-progress pipe:1` stream.
//!
//! Adapted from the `tests/ffui_mock_ffmpeg.rs` capture-argv-to-env-var-
//! path-then-exit shape, renamed and re-keyed to this crate's own env var
//! names.

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;

#[derive(Serialize)]
struct CapturedInvocation {
    argv: Vec<String>,
}

fn main() {
    let argv: Vec<String> = env::args().skip(1).collect();

    if let Ok(capture_path) = env::var("MOCK_ENCODER_CAPTURE_PATH") {
        let path = PathBuf::from(capture_path);
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let payload = CapturedInvocation { argv: argv.clone() };
        let json = serde_json::to_string(&payload).expect("mock encoder capture must serialize");
        fs::write(&path, json).expect("mock encoder must write capture file");
    }

    if env::var("MOCK_ENCODER_EMIT_PROGRESS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        println!("out_time_ms=0");
        println!("progress=continue");
        println!("out_time_ms=1000000");
        println!("progress=end");
    }

    if let Ok(sleep_ms) = env::var("MOCK_ENCODER_SLEEP_MS")
        && let Ok(ms) = sleep_ms.parse::<u64>()
    {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }

    let exit_code: i32 = env::var("MOCK_ENCODER_EXIT_CODE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    std::process::exit(exit_code);
}
