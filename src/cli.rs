use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "skiff",
    version,
    about = "A tabbed terminal browser for Kubernetes clusters."
)]
pub struct CliArgs {
    /// Page refresh interval in milliseconds
    #[arg(long, default_value_t = 2_000)]
    pub refresh_ms: u64,

    /// Kube context to treat as active instead of the kubeconfig's current one
    #[arg(short, long)]
    pub context: Option<String>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file; logs are discarded otherwise
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Where open tabs are saved between runs
    #[arg(long)]
    pub tabs_file: Option<PathBuf>,

    /// Key binding config file; discovered from SKIFF_CONFIG, the working
    /// directory and ~/.config/skiff otherwise
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Do not load or save open tabs
    #[arg(long)]
    pub no_persist: bool,
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;

    #[test]
    fn defaults_without_flags() {
        let args = CliArgs::parse_from(["skiff"]);
        assert_eq!(args.refresh_ms, 2_000);
        assert_eq!(args.log_filter, "info");
        assert!(args.context.is_none());
        assert!(!args.no_persist);
    }

    #[test]
    fn flags_parse() {
        let args = CliArgs::parse_from([
            "skiff",
            "--context",
            "kind",
            "--tabs-file",
            "/tmp/tabs.yml",
            "--no-persist",
            "--config",
            "keys.yaml",
            "--refresh-ms",
            "500",
        ]);
        assert_eq!(args.context.as_deref(), Some("kind"));
        assert_eq!(args.tabs_file.as_deref(), Some(std::path::Path::new("/tmp/tabs.yml")));
        assert!(args.no_persist);
        assert_eq!(args.config.as_deref(), Some(std::path::Path::new("keys.yaml")));
        assert_eq!(args.refresh_ms, 500);
    }
}
