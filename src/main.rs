use std::sync::Arc;

use clap::Parser;

use rubyfy_ssh::{
    build_jobs, read_hosts, report_summary, Cli, Config, Dispatcher, Executor, ExecutorSettings,
    Logger, RubyfyError, Severity, SshConnector,
};

#[tokio::main]
async fn main() -> Result<(), RubyfyError> {
    let (config, config_path) = Config::load(Cli::parse())?;

    std::fs::create_dir_all(&config.outdir)?;
    let logger = Arc::new(Logger::new(config.log_settings(), Some(config.outfile())));
    if let Some(path) = &config_path {
        logger.log(Severity::Verbose, format!("-::Read {}", path.display()));
    }
    logger.log(Severity::Debug, format!("-::{:?}", config));

    let hosts = read_hosts(std::io::stdin().lock())?;
    logger.log(Severity::Verbose, format!("-::Server list: {:?}", hosts));

    let settings = ExecutorSettings {
        silent: config.silent,
        ..Default::default()
    };
    let executor = Executor::new(Arc::new(SshConnector), Arc::clone(&logger), settings);
    let dispatcher = Dispatcher::new(Arc::new(executor), config.parallel);

    let jobs = dispatcher.run(build_jobs(&config.job, hosts)).await;
    report_summary(&jobs, &logger);

    logger.log(
        Severity::ConsoleOnly,
        format!("Wrote results to {}", config.outfile().display()),
    );
    Ok(())
}
