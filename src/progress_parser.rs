//! Incremental parser for ffmpeg's `-progress pipe:1` key=value stream.
//! Grounded on
//! `engine/ffmpeg_args/progress.rs` (`parse_ffmpeg_progress_line`,
//! `parse_ffmpeg_time_to_seconds`, `compute_progress_percent`), extended
//! here into a stateful, chunk-tolerant line assembler: `-progress` output
//! arrives as repeated blocks of `key=value\n` lines terminated by a
//! `progress=continue` or `progress=end` line, and pipe reads never
//! guarantee one read per line.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub time_seconds: Option<f64>,
    pub speed: Option<f64>,
    pub size_bytes: Option<u64>,
    pub progress_percent: u8,
    pub done: bool,
}

/// Buffers partial lines across chunk boundaries and accumulates key=value
/// pairs into a [`Progress`] snapshot, emitted once per `progress=` line.
#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: String,
    current: Progress,
    total_duration_seconds: Option<f64>,
}

impl ProgressParser {
    pub fn new(total_duration_seconds: Option<f64>) -> Self {
        ProgressParser {
            pending: String::new(),
            current: Progress::default(),
            total_duration_seconds,
        }
    }

    /// Feeds a raw chunk of stdout bytes (already assumed UTF-8-lossy
    /// decoded by the caller) and returns any `Progress` snapshots
    /// completed by a `progress=` terminator line within this chunk.
    pub fn feed(&mut self, chunk: &str) -> Vec<Progress> {
        self.pending.push_str(chunk);
        let mut completed = Vec::new();

        while let Some(newline_idx) = self.pending.find('\n') {
            let line = self.pending[..newline_idx].trim_end_matches('\r').to_string();
            self.pending.drain(..=newline_idx);
            if let Some(snapshot) = self.apply_line(&line) {
                completed.push(snapshot);
            }
        }

        completed
    }

    /// Flushes a final snapshot for a trailing line with no terminating
    /// newline, if one is pending — a dropped final newline
    /// must not silently discard the last progress update.
    pub fn finish(&mut self) -> Option<Progress> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        self.apply_line(&line)
    }

    fn apply_line(&mut self, line: &str) -> Option<Progress> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some((key, value)) = line.split_once('=') else {
            return None;
        };
        let value = value.trim();

        match key {
            "frame" => self.current.frame = value.parse::<u64>().ok(),
            "fps" => self.current.fps = value.parse::<f64>().ok(),
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.current.time_seconds = Some(us / 1_000_000.0);
                }
            }
            "out_time" => {
                self.current.time_seconds = Some(parse_ffmpeg_time_to_seconds(value));
            }
            "total_size" => self.current.size_bytes = value.parse::<u64>().ok(),
            "speed" => {
                let trimmed = value.trim_end_matches('x');
                self.current.speed = trimmed.parse::<f64>().ok();
            }
            "progress" => {
                self.current.done = value.eq_ignore_ascii_case("end");
                self.current.progress_percent = compute_progress_percent(
                    self.total_duration_seconds,
                    self.current.time_seconds.unwrap_or(0.0),
                    self.current.done,
                );
                let snapshot = std::mem::take(&mut self.current);
                return Some(snapshot);
            }
            // Unknown/irrelevant keys (bitrate, dup_frames, drop_frames, ...)
            // are ignored rather than treated as malformed input.
            _ => {}
        }

        None
    }
}

fn compute_progress_percent(total_duration: Option<f64>, elapsed_seconds: f64, done: bool) -> u8 {
    if done {
        return 100;
    }
    match total_duration {
        Some(total) if total.is_finite() && total > 0.0 => {
            let elapsed = if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
                elapsed_seconds
            } else {
                0.0
            };
            let ratio = (elapsed / total * 100.0).clamp(0.0, 99.0);
            if ratio.is_finite() { ratio as u8 } else { 0 }
        }
        _ => 0,
    }
}

fn parse_ffmpeg_time_to_seconds(s: &str) -> f64 {
    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h = parts[0].parse::<f64>().unwrap_or(0.0);
            let m = parts[1].parse::<f64>().unwrap_or(0.0);
            let sec = parts[2].parse::<f64>().unwrap_or(0.0);
            return h * 3600.0 + m * 60.0 + sec;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Extracts the container duration from ffmpeg's stderr banner
/// (`Duration: 00:01:23.45, start: 0.0, bitrate: ...`), used to seed
/// `ProgressParser::new` before the first progress block arrives.
pub fn parse_duration_from_stderr_banner(stderr: &str) -> Option<f64> {
    let idx = stderr.find("Duration:")?;
    let rest = &stderr[idx + "Duration:".len()..];
    let time_str = rest.trim().split(',').next().unwrap_or("").trim();
    if time_str.is_empty() {
        return None;
    }
    let seconds = parse_ffmpeg_time_to_seconds(time_str);
    if seconds > 0.0 { Some(seconds) } else { None }
}
