use std::env;

/// Application configuration, loaded once at startup and passed explicitly
/// into the components that need it. Gateway credentials and mail settings
/// are never read from the environment after boot.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub paystack: PaystackConfig,
    pub flutterwave: FlutterwaveConfig,
    pub smtp: SmtpConfig,
    pub renderer: RendererConfig,
    /// Base URL learners use to reach the platform, embedded in
    /// notification links.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    /// Value Flutterwave echoes back in the `verif-hash` webhook header.
    pub secret_hash: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub base_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://learn:@localhost:5432/learnserver".to_string()),
        };
        let paystack = PaystackConfig {
            secret_key: env::var("PAYSTACK_SECRET_KEY").unwrap_or_default(),
            base_url: env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
        };
        let flutterwave = FlutterwaveConfig {
            secret_key: env::var("FLUTTERWAVE_SECRET_KEY").unwrap_or_default(),
            secret_hash: env::var("FLUTTERWAVE_SECRET_HASH").unwrap_or_default(),
            base_url: env::var("FLUTTERWAVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
        };
        let smtp = SmtpConfig {
            host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(587),
            username: env::var("SMTP_USER").unwrap_or_default(),
            password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            from_address: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "noreply@learnserver.local".to_string()),
        };
        let renderer = RendererConfig {
            base_url: env::var("CERTIFICATE_RENDERER_URL")
                .unwrap_or_else(|_| "http://localhost:9400".to_string()),
        };
        Ok(AppConfig {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
            },
            database,
            paystack,
            flutterwave,
            smtp,
            renderer,
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}
