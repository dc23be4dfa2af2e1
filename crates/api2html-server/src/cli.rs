use api2html::EngineOptions;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "api2html")]
#[command(
    version,
    about = "Serve HTML pages rendered from backend API responses",
    long_about = None
)]
pub struct Cli {
    /// Route table (JSON, or TOML with a .toml extension)
    #[arg(short, long, env = "API2HTML_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Address to bind
    #[arg(long, env = "API2HTML_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "API2HTML_PORT", default_value = "8080")]
    pub port: u16,

    /// Directory with static txt files, robots.txt, sitemap.xml, 404 and 500
    #[arg(long, env = "API2HTML_STATIC_DIR", default_value = "./static")]
    pub static_dir: PathBuf,

    /// Watch templates and layouts, and reload the browser when they change
    #[arg(long, env = "API2HTML_LIVE_RELOAD")]
    pub live_reload: bool,

    /// How often template files are re-checked, in milliseconds
    #[arg(long, env = "API2HTML_RELOAD_INTERVAL_MS", default_value = "1000")]
    pub reload_interval_ms: u64,

    /// Upper bound for one backend call, in milliseconds
    #[arg(long, env = "API2HTML_BACKEND_TIMEOUT_MS", default_value = "10000")]
    pub backend_timeout_ms: u64,
}

impl Cli {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            static_dir: self.static_dir.clone(),
            reload_interval: Duration::from_millis(self.reload_interval_ms),
            backend_timeout: Duration::from_millis(self.backend_timeout_ms),
            error_pages: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["api2html"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert_eq!(cli.addr(), "127.0.0.1:8080");
        assert!(!cli.live_reload);

        let options = cli.engine_options();
        assert_eq!(options.static_dir, PathBuf::from("./static"));
        assert_eq!(options.reload_interval, Duration::from_secs(1));
        assert_eq!(options.backend_timeout, Duration::from_secs(10));
    }

    #[rstest]
    #[case(&["api2html", "--port", "3000"], "127.0.0.1:3000")]
    #[case(&["api2html", "-p", "9000", "--host", "0.0.0.0"], "0.0.0.0:9000")]
    fn test_addr(#[case] args: &[&str], #[case] expected: &str) {
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.addr(), expected);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "api2html",
            "--config",
            "site.toml",
            "--live-reload",
            "--reload-interval-ms",
            "250",
            "--backend-timeout-ms",
            "1500",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("site.toml"));
        assert!(cli.live_reload);
        let options = cli.engine_options();
        assert_eq!(options.reload_interval, Duration::from_millis(250));
        assert_eq!(options.backend_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Cli::try_parse_from(["api2html", "--port", "http"]).is_err());
    }
}
