use tracing_subscriber::EnvFilter;

/// Logs go to stderr so progress lines on stdout stay clean.
pub fn init(if_verbose: bool) {
    let c_default = if if_verbose {
        "info,dircopy_io_fs=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(c_default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
