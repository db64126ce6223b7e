use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("fx-relay")
        .about("Rewrites USD amounts in chat messages into JPY (stdio JSON lines)")
        .disable_version_flag(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .num_args(1)
                .help("Override RUST_LOG level (e.g., info, debug)"),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .help("Print version and exit")
                .action(ArgAction::SetTrue),
        )
}

/// Logs go to stderr; stdout carries protocol lines only.
pub fn init_logging(level: Option<&str>) {
    // Explicit level wins over RUST_LOG, which wins over the info default.
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(lvl) = level {
        builder.parse_filters(lvl);
    }
    builder.target(env_logger::Target::Stderr).init();
}
