//! Environment-driven configuration. Read once at startup the
//! way `tools.rs`/`network_proxy.rs`-style modules read individual
//! `std::env::var` overrides, but collected into a single struct validated
//! eagerly by the `Coordinator`.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceMode {
    Standalone,
    Leader,
    Follower,
}

impl InstanceMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "leader" => InstanceMode::Leader,
            "follower" => InstanceMode::Follower,
            _ => InstanceMode::Standalone,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub check_interval_ms: u64,
    pub discord_webhook_url: Option<String>,
    pub pushover_api_token: Option<String>,
    pub pushover_user_key: Option<String>,
    pub instance_mode: InstanceMode,
    pub followers: Vec<String>,
    pub leader_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            upload_dir: PathBuf::from("./uploads"),
            output_dir: PathBuf::from("./outputs"),
            check_interval_ms: 60_000,
            discord_webhook_url: None,
            pushover_api_token: None,
            pushover_user_key: None,
            instance_mode: InstanceMode::Standalone,
            followers: Vec::new(),
            leader_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHECK_INTERVAL_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            config.check_interval_ms = parsed;
        }
        config.discord_webhook_url = std::env::var("DISCORD_WEBHOOK_URL").ok();
        config.pushover_api_token = std::env::var("PUSHOVER_API_TOKEN").ok();
        config.pushover_user_key = std::env::var("PUSHOVER_USER_KEY").ok();
        if let Ok(v) = std::env::var("INSTANCE_MODE") {
            config.instance_mode = InstanceMode::parse(&v);
        }
        if let Ok(v) = std::env::var("FOLLOWERS") {
            config.followers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        config.leader_url = std::env::var("LEADER_URL").ok();

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert_eq!(config.output_dir, PathBuf::from("./outputs"));
        assert_eq!(config.check_interval_ms, 60_000);
        assert_eq!(config.instance_mode, InstanceMode::Standalone);
    }

    #[test]
    fn instance_mode_parse_falls_back_to_standalone_on_garbage() {
        assert_eq!(InstanceMode::parse("bogus"), InstanceMode::Standalone);
        assert_eq!(InstanceMode::parse("Leader"), InstanceMode::Leader);
        assert_eq!(InstanceMode::parse(" follower "), InstanceMode::Follower);
    }
}
