// Application configuration, loaded from environment variables and CLI flags.

use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// API key for the insight provider. When unset, the dashboard serves
    /// the static fallback greeting.
    pub insight_api_key: Option<String>,
    /// Model name used for insight generation.
    pub insight_model: String,
    /// Directory containing pre-built frontend files to serve.
    /// When set, the backend serves static files from this path.
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:nexus.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `GEMINI_API_KEY` - insight provider key (optional)
    /// - `INSIGHT_MODEL` - insight model name (default: `gemini-3-flash-preview`)
    /// - `STATIC_DIR` - Path to frontend dist directory for static file serving
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:nexus.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let insight_api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());

        let insight_model = std::env::var("INSIGHT_MODEL")
            .unwrap_or_else(|_| "gemini-3-flash-preview".to_string());

        let static_dir = std::env::var("STATIC_DIR").ok().map(PathBuf::from);

        Config {
            database_url,
            port,
            insight_api_key,
            insight_model,
            static_dir,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}
