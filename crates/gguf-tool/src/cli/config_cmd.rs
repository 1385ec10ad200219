use crate::cli::{ConfigAction, ConfigArgs};
use crate::config::ToolConfig;

pub fn execute(args: ConfigArgs) -> anyhow::Result<()> {
    match args.action {
        ConfigAction::Show => {
            let cfg = ToolConfig::load_or_default()?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        ConfigAction::Set { key, value } => {
            let mut cfg = ToolConfig::load_or_default()?;
            cfg.set(&key, value)?;
            cfg.save()?;
            tracing::debug!(path = %ToolConfig::config_dir().display(), %key, "saved config");
            println!("Configuration updated.");
        }
    }
    Ok(())
}
