use bitesize_config::OperatorConfig;
use bitesize_telemetry::init_tracing;

mod core;

fn main() -> anyhow::Result<()> {
    // Load operator config; an incomplete configuration refuses to start.
    let config = OperatorConfig::load()?;

    init_tracing(env!("CARGO_BIN_NAME"), config.debug)?;

    // We start the runtime.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(core::start_operator(config))?;

    Ok(())
}
