use anyhow::Context;
use anyhow::anyhow;
use tb_app::cli;
use tb_app::config_loader;
use tb_app::replay::Replayer;
use tb_app::tracing_setup;
use tb_app::tracing_setup::LogSettings;
use tracing::info;
use tracing::warn;

fn main() -> anyhow::Result<()> {
    let args = cli::parse_args(std::env::args().skip(1)).map_err(|e| anyhow!(e))?;
    // Logging depends on the config, so report load failures once the subscriber is up
    let (config, load_error) = config_loader::load_throttle_config_or_default(&args.config_path);
    let _guard = tracing_setup::init("throttle_replay", &LogSettings::from_config(&config));

    info!("=== Throttle Replay ===");
    if let Some(err) = load_error {
        warn!("Failed to load throttle config from {}: {}. Using defaults.", args.config_path, err);
    }
    info!("Config: {}", args.config_path);
    info!("Steps: {}", args.steps.len());

    let replayer = Replayer::new(config.throttle).context("invalid throttle configuration")?;

    for step in &args.steps {
        let record = replayer.step(step).with_context(|| format!("step {step} failed"))?;
        match record.verdict {
            Some(verdict) => println!("{:>6}ms  {:<24} {}", record.at_millis, record.step.to_string(), verdict),
            None => println!("{:>6}ms  {}", record.at_millis, record.step),
        }
    }

    Ok(())
}
