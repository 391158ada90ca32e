use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = mousedamper_lib::config::APP_NAME)]
#[command(bin_name = mousedamper_lib::config::APP_COMMAND_NAME)]
#[command(author = mousedamper_lib::config::APP_AUTHORS)]
#[command(version = mousedamper_lib::config::APP_VERSION_STR)]
#[command(about = mousedamper_lib::config::APP_ABOUT, long_about = mousedamper_lib::config::APP_LONG_ABOUT)]
struct Cli {
    #[arg(short, long, default_value = mousedamper_lib::config::APP_DEFAULT_CONFIG_FILE,
    help = "Path to config file, including filename.")]
    cfg_file_path: std::path::PathBuf,
    #[arg(long, default_value = mousedamper_lib::config::APP_DEFAULT_NO_HOT_RELOAD,
    help = "Disable automatic filter restart on configuration file change.")]
    no_hot_reload: bool,
    #[arg(short, long, help = "Enable debug information output.")]
    debug: bool,
    #[arg(
        short,
        long,
        help = "Log every filter state transition, \
        regardless of the verbose option in the config file."
    )]
    verbose: bool,
    #[arg(long, default_value = mousedamper_lib::config::APP_DEFAULT_MAX_LOG_LEVEL, help = "Limit max log level.")]
    log_level: String,

    #[command(subcommand)]
    aux_task: Option<mousedamper_lib::driver::AuxDriverTask>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .filter_module("notify", log::LevelFilter::Warn)
        .init();
    log::info!("------------====--=-=--=--==--====-=-=--==-=--===-=---=------------");
    log::info!("Starting {}.", mousedamper_lib::config::APP_LONG_NAME);
    log::info!("Re-run with -h if any help required.");
    if cli.debug {
        log::debug!("General debug output enabled.");
    }
    if cli.verbose {
        log::info!("Filter transition output enabled.");
    }
    log::info!("------------====--=-=--=--==--====-=-=--==-=--===-=---=------------");

    if cfg!(target_os = "linux") {
        mousedamper_lib::driver::check_linux_system_requirements()?;
    } else {
        bail!("This application requires Linux.");
    }

    if let Some(ref aux_task) = cli.aux_task {
        return mousedamper_lib::driver::run_aux_task(aux_task, &cli.cfg_file_path, cli.debug).await;
    }

    mousedamper_lib::driver::run_damper(
        &cli.cfg_file_path,
        cli.no_hot_reload,
        cli.debug,
        cli.verbose,
    )
    .await
}
