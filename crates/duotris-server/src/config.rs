/// Server configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// HMAC secret for bearer validation. Absent means token auth cannot
    /// succeed (bypass mode still can).
    pub jwt_secret: Option<String>,
    /// Test mode: mint a random identity per request instead of validating.
    pub bypass_auth: bool,
    /// Test mode: let one participant hold several live connections.
    pub allow_parallel_connections: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:duotris.db?mode=rwc".to_string()),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            bypass_auth: flag("BYPASS_AUTH"),
            allow_parallel_connections: flag("ALLOW_SAME_USER_JOIN"),
        }
    }
}

fn flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "true").unwrap_or(false)
}
