use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    sync::OnceLock,
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

mod client;
mod keychain_wallet;
mod near_cli;
mod rpc_client;
mod session_store;
mod ui;
mod wallets;

const LOG_FILE_NAME: &str = "berryclub.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: berryclub [--mainnet | --testnet] [--rpc-url <url>] [--contract <id>]\n\
         [--credentials-dir <path>] [--data-dir <path>] [--near-cli <path>]\n\
         [--refresh-secs <n>]\n\
         \n\
         Flags:\n\
           --mainnet               Connect to NEAR mainnet (default RPC {})\n\
           --testnet               Connect to NEAR testnet (default RPC {})\n\
           --rpc-url <url>         Override the RPC URL for the selected network\n\
           --contract <id>         Board contract (default {})\n\
           --credentials-dir <path> Key files to sign in with (defaults to ~/.near-credentials/<network>)\n\
           --data-dir <path>       Session and log directory (default {})\n\
           --near-cli <path>       NEAR CLI used for signing (default {})\n\
           --refresh-secs <n>      Refresh the board every n seconds",
        rpc_client::DEFAULT_MAINNET_RPC_URL,
        rpc_client::DEFAULT_TESTNET_RPC_URL,
        berryclub::ledger::DEFAULT_CONTRACT_ID,
        client::DEFAULT_DATA_DIR,
        client::DEFAULT_NEAR_CLI,
    );
    std::process::exit(0);
}

fn parse_cli_args() -> Result<client::AppConfig> {
    parse_cli_args_from(std::env::args().skip(1))
}

fn parse_cli_args_from(args: impl IntoIterator<Item = String>) -> Result<client::AppConfig> {
    #[derive(Clone, Copy)]
    enum NetworkFlag {
        Mainnet,
        Testnet,
    }

    let mut args = args.into_iter();
    let mut network_flag: Option<NetworkFlag> = None;
    let mut custom_url: Option<String> = None;
    let mut contract_id: Option<String> = None;
    let mut credentials_dir: Option<String> = None;
    let mut data_dir: Option<String> = None;
    let mut near_cli: Option<String> = None;
    let mut refresh_secs: Option<u64> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mainnet" => {
                if network_flag.is_some() {
                    return Err(eyre!(
                        "Multiple network flags provided; choose one of --mainnet/--testnet"
                    ));
                }
                network_flag = Some(NetworkFlag::Mainnet);
            }
            "--testnet" => {
                if network_flag.is_some() {
                    return Err(eyre!(
                        "Multiple network flags provided; choose one of --mainnet/--testnet"
                    ));
                }
                network_flag = Some(NetworkFlag::Testnet);
            }
            "--rpc-url" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--rpc-url requires a URL argument"))?;
                if custom_url.is_some() {
                    return Err(eyre!("--rpc-url may only be specified once"));
                }
                if network_flag.is_none() {
                    return Err(eyre!(
                        "--rpc-url must follow a network flag (--mainnet/--testnet)"
                    ));
                }
                custom_url = Some(url);
            }
            "--contract" => {
                let id = args
                    .next()
                    .ok_or_else(|| eyre!("--contract requires an account id"))?;
                if contract_id.is_some() {
                    return Err(eyre!("--contract may only be specified once"));
                }
                contract_id = Some(id);
            }
            "--credentials-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--credentials-dir requires a path argument"))?;
                if credentials_dir.is_some() {
                    return Err(eyre!("--credentials-dir may only be specified once"));
                }
                credentials_dir = Some(dir);
            }
            "--data-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--data-dir requires a path argument"))?;
                if data_dir.is_some() {
                    return Err(eyre!("--data-dir may only be specified once"));
                }
                data_dir = Some(dir);
            }
            "--near-cli" => {
                let path = args
                    .next()
                    .ok_or_else(|| eyre!("--near-cli requires a path argument"))?;
                if near_cli.is_some() {
                    return Err(eyre!("--near-cli may only be specified once"));
                }
                near_cli = Some(path);
            }
            "--refresh-secs" => {
                let raw = args
                    .next()
                    .ok_or_else(|| eyre!("--refresh-secs requires a number of seconds"))?;
                if refresh_secs.is_some() {
                    return Err(eyre!("--refresh-secs may only be specified once"));
                }
                let secs = raw
                    .parse::<u64>()
                    .wrap_err_with(|| format!("invalid --refresh-secs value '{raw}'"))?;
                if secs == 0 {
                    return Err(eyre!("--refresh-secs must be at least 1"));
                }
                refresh_secs = Some(secs);
            }
            "--help" | "-h" => print_usage_and_exit(),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    let network = match network_flag {
        None => return Err(eyre!("Select a network with --mainnet or --testnet")),
        Some(NetworkFlag::Mainnet) => client::NetworkTarget::mainnet(custom_url),
        Some(NetworkFlag::Testnet) => client::NetworkTarget::testnet(custom_url),
    };

    let credentials_dir =
        wallets::resolve_credentials_dir(credentials_dir.as_deref(), network.name())?;
    let data_dir = PathBuf::from(
        shellexpand::tilde(data_dir.as_deref().unwrap_or(client::DEFAULT_DATA_DIR)).into_owned(),
    );

    let mut config = client::AppConfig::new(network, credentials_dir, data_dir);
    if let Some(contract_id) = contract_id {
        config.contract_id = contract_id;
    }
    if let Some(near_cli) = near_cli {
        config.near_cli = PathBuf::from(shellexpand::tilde(&near_cli).into_owned());
    }
    config.refresh_interval = refresh_secs.map(Duration::from_secs);
    Ok(config)
}

/// Log to a daily file in the data directory; the terminal belongs to the UI.
fn init_tracing(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .wrap_err_with(|| format!("Failed to create data directory {}", data_dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(data_dir, LOG_FILE_NAME));
    let _ = LOG_GUARD.set(guard);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("failed to install tracing subscriber: {e}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let app_config = parse_cli_args()?;
    init_tracing(&app_config.data_dir)?;
    tracing::info!("starting berryclub client");
    client::run_app(app_config).await
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parse_cli_args__testnet_with_overrides() {
        // when
        let config = parse_cli_args_from(args(&[
            "--testnet",
            "--rpc-url",
            "http://localhost:3030",
            "--credentials-dir",
            "/tmp/keys",
            "--data-dir",
            "/tmp/berryclub",
            "--contract",
            "board.testnet",
            "--refresh-secs",
            "15",
        ]))
        .unwrap();

        // then
        assert_eq!(
            config.network,
            client::NetworkTarget::Testnet {
                url: "http://localhost:3030".to_string()
            }
        );
        assert_eq!(config.credentials_dir, PathBuf::from("/tmp/keys"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/berryclub"));
        assert_eq!(config.contract_id, "board.testnet");
        assert_eq!(config.near_cli, PathBuf::from("near"));
        assert_eq!(config.refresh_interval, Some(Duration::from_secs(15)));
    }

    #[test]
    fn parse_cli_args__defaults_contract_and_rpc() {
        let config = parse_cli_args_from(args(&["--mainnet", "--credentials-dir", "/k"])).unwrap();

        assert_eq!(config.contract_id, "berryclub.ek.near");
        assert_eq!(config.network.rpc_url(), rpc_client::DEFAULT_MAINNET_RPC_URL);
        assert_eq!(config.refresh_interval, None);
    }

    #[test]
    fn parse_cli_args__requires_a_network() {
        let err = parse_cli_args_from(args(&["--credentials-dir", "/k"])).unwrap_err();

        assert!(err.to_string().contains("--mainnet or --testnet"));
    }

    #[test]
    fn parse_cli_args__rejects_conflicting_networks() {
        let err = parse_cli_args_from(args(&["--mainnet", "--testnet"])).unwrap_err();

        assert!(err.to_string().contains("Multiple network flags"));
    }

    #[test]
    fn parse_cli_args__rpc_url_must_follow_network() {
        let err =
            parse_cli_args_from(args(&["--rpc-url", "http://x", "--mainnet"])).unwrap_err();

        assert!(err.to_string().contains("must follow a network flag"));
    }

    #[test]
    fn parse_cli_args__rejects_duplicates_and_unknown_flags() {
        let duplicate = parse_cli_args_from(args(&[
            "--mainnet",
            "--data-dir",
            "/a",
            "--data-dir",
            "/b",
        ]))
        .unwrap_err();
        let unknown = parse_cli_args_from(args(&["--mainnet", "--wallet", "x"])).unwrap_err();

        assert!(duplicate.to_string().contains("only be specified once"));
        assert!(unknown.to_string().contains("Unknown argument: --wallet"));
    }

    #[test]
    fn parse_cli_args__rejects_zero_refresh() {
        let err = parse_cli_args_from(args(&[
            "--mainnet",
            "--credentials-dir",
            "/k",
            "--refresh-secs",
            "0",
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("at least 1"));
    }
}
