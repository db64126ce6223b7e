mod cli;

use fx_relay::config::Config;
use fx_relay::relay;

#[tokio::main(flavor = "current_thread")] // one message at a time, no concurrent resolutions
async fn main() -> anyhow::Result<()> {
    let cmd = cli::build_cli();
    let matches = cmd.get_matches();
    let log_level = matches.get_one::<String>("log-level").cloned();
    let version_flag = matches.get_flag("version");

    cli::init_logging(log_level.as_deref());

    if version_flag {
        println!("fx-relay {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let cfg = Config::from_env().map_err(anyhow::Error::msg)?;
    relay::run_stdio_relay(cfg).await
}
