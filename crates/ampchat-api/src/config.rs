use std::env;

use tracing::warn;

/// Secrets that ship in sample `.env` files and must never sign real links.
pub const PLACEHOLDER_SECRETS: &[&str] = &["change-me", "dev-secret-change-me", "amp-secret"];

const DEFAULT_PLAYGROUND_DOMAINS: &str = "gmail.dev";

/// Settings for the message list shown inside the email.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// How many earlier messages the email shows.
    pub limit: u32,
    /// Display name for users with no name on file.
    pub default_name: String,
    /// Avatar for users with no image on file.
    pub default_image: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            limit: 5,
            default_name: "Member".into(),
            default_image: "/defaultprofile.png".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub amp_secret: Option<String>,
    /// First-party sending domains (ours).
    pub sender_domains: Vec<String>,
    /// Email-client test playgrounds allowed to call the bridge.
    pub playground_domains: Vec<String>,
    pub feed: FeedSettings,
}

impl AppConfig {
    /// Read `AMPCHAT_*` variables. Call after `dotenvy::dotenv()`.
    pub fn from_env() -> anyhow::Result<Self> {
        let host = env::var("AMPCHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env::var("AMPCHAT_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()?;
        let db_path = env::var("AMPCHAT_DB_PATH").unwrap_or_else(|_| "ampchat.db".into());

        let amp_secret = env::var("AMPCHAT_AMP_SECRET")
            .or_else(|_| env::var("AMP_SECRET"))
            .ok()
            .filter(|s| !s.is_empty());

        let sender_domains = split_list(&env::var("AMPCHAT_SENDER_DOMAINS").unwrap_or_default());
        let playground_domains = split_list(
            &env::var("AMPCHAT_PLAYGROUND_DOMAINS")
                .unwrap_or_else(|_| DEFAULT_PLAYGROUND_DOMAINS.into()),
        );

        let defaults = FeedSettings::default();
        let feed = FeedSettings {
            limit: env::var("AMPCHAT_FEED_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.limit),
            default_name: env::var("AMPCHAT_DEFAULT_NAME").unwrap_or(defaults.default_name),
            default_image: env::var("AMPCHAT_DEFAULT_IMAGE").unwrap_or(defaults.default_image),
        };

        if sender_domains.is_empty() {
            warn!("AMPCHAT_SENDER_DOMAINS is empty; only playground senders will be accepted");
        }

        Ok(Self {
            host,
            port,
            db_path,
            amp_secret,
            sender_domains,
            playground_domains,
            feed,
        })
    }

    /// Every domain the origin guard accepts.
    pub fn allowed_domains(&self) -> Vec<String> {
        self.sender_domains
            .iter()
            .chain(self.playground_domains.iter())
            .cloned()
            .collect()
    }

    pub fn secret_is_placeholder(&self) -> bool {
        self.amp_secret
            .as_deref()
            .is_some_and(|s| PLACEHOLDER_SECRETS.contains(&s))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
