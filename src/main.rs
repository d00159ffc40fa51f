// src/main.rs
use clap::Parser;
use gpu_miner_rs::utils::logging::init_verbose_logging;
use gpu_miner_rs::{self, *};
use std::time::Duration;

/// Pause between work requests of the monitor, standing in for kernel run time
const WORK_MONITOR_PACE: Duration = Duration::from_millis(250);

/// Main entry point for the GPU miner
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails
///
/// # Flow
/// 1. Parses command line arguments
/// 2. Delegates to appropriate subcommand handler
/// 3. Propagates any errors upward
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Start(opts) => start(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Connects to the configured pools and hands out work
///
/// # Arguments
/// * `opts` - Command line options
///
/// # Operations
/// 1. Initializes logging
/// 2. Loads and validates configuration
/// 3. Builds every pool through the registry and adds it to the switcher
/// 4. Sets up statistics reporting
/// 5. Runs the work monitor until the process is killed
fn start(opts: cli::StartOptions) -> Result<(), MinerError> {
    if opts.verbose {
        init_verbose_logging();
    } else {
        utils::init_logging();
    }

    let config = config::load(&opts.config)?;
    let pow_type = config.pow_type()?;
    let registry = PoolRegistry::with_defaults();
    let switcher = PoolSwitcher::new(pow_type, config.switcher.settings())?;

    for pool_cfg in &config.pools {
        let args = pool_cfg.construction_args(config.work_queue.settings())?;
        let pool = registry.make_pool_for(pool_cfg.pow_type, &pool_cfg.protocol, args)?;
        switcher.push(pool)?;
    }
    log::info!(
        "Mining {} on {} pool(s), primary: {}",
        pow_type,
        switcher.pool_count(),
        config.pools[0].url
    );

    let _reporter = StatsReporter::start(switcher.records().clone(), config.stats.report_interval());
    monitor_work(&switcher)
}

/// Pulls work like a device would and logs every job change
fn monitor_work(provider: &dyn Pool) -> ! {
    let mut last_job: Option<(u64, String)> = None;
    loop {
        let Some(work) = provider.try_get_work() else {
            log::trace!("No work available yet");
            continue;
        };

        let key = (work.pool_uid(), work.job.job_id.clone());
        if last_job.as_ref() != Some(&key) {
            log::info!(
                "Working on job {} (difficulty {:.2}) from pool uid {}",
                key.1,
                work.job.difficulty,
                key.0
            );
            last_job = Some(key);
        }
        std::thread::sleep(WORK_MONITOR_PACE);
    }
}

/// Generates configuration template file
///
/// # Arguments
/// * `opts` - Configuration generation options
///
/// # Operations
/// 1. Generates template content for the requested pow type
/// 2. Writes template to specified output file
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    let config = config::generate_template(opts.pow_type);
    std::fs::write(&opts.output, config)?;
    log::info!("Wrote configuration template to {}", opts.output.display());
    Ok(())
}
