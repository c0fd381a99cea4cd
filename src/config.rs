use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub token_ttl_hours: i64,
    pub db_max_connections: u32,
    /// Attempts per transaction before a serialization conflict is surfaced.
    pub tx_max_attempts: u32,
    /// Existing account promoted to admin at startup, if set.
    pub bootstrap_admin_email: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "50051".to_string())
                .parse()
                .unwrap_or(50051),
            token_ttl_hours: env::var("TOKEN_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24 * 7),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            tx_max_attempts: env::var("TX_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(3),
            bootstrap_admin_email: env::var("BOOTSTRAP_ADMIN_EMAIL")
                .ok()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty()),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_addr() {
        let config = Config {
            database_url: "postgres://localhost/campus".to_string(),
            jwt_secret: "secret".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            token_ttl_hours: 1,
            db_max_connections: 1,
            tx_max_attempts: 1,
            bootstrap_admin_email: None,
        };
        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }
}
