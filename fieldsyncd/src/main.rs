use fieldsyncd::config::SyncConfig;
use fieldsyncd::daemon::DaemonRuntime;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => mode = CliMode::Once,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: fieldsyncd [--once]");
        println!("  --once     Run a single upload pass and exit");
        return Ok(());
    }
    if let Err(err) = fieldsyncd::logging::init() {
        eprintln!("[fieldsyncd] warning: failed to initialize logging: {err}");
    }

    let config = SyncConfig::from_env()?;
    let runtime = DaemonRuntime::bootstrap(config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[fieldsyncd] interrupt received, finishing current batch");
            on_signal.cancel();
        }
    });

    runtime.run(mode == CliMode::Once, cancel).await
}
