use dispatch_runner::RunConfig;

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let config = RunConfig::from_env()?;
    let report = dispatch_runner::run_with(&config)?;
    log::debug!("{report:?}");

    Ok(())
}
