//! Config command implementation.

use anyhow::Result;
use console::style;

use crate::{Cli, ConfigAction, config_dir, effective_settings};

/// Config command implementation.
pub(crate) fn cmd_config(cli: &Cli, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", config_dir(cli)?.display());
            Ok(())
        },
        ConfigAction::Show => {
            let settings = effective_settings(cli)?;
            println!("port:  {}", settings.port.as_deref().unwrap_or("(none)"));
            println!("baud:  {}", settings.baud);
            println!("mode:  {}", settings.mode);
            println!("erase: {}", if settings.erase { "Yes" } else { "No" });
            Ok(())
        },
        ConfigAction::Set => {
            // Persists the effective selection, CLI overrides included,
            // like the original settings panel's explicit Save.
            let dir = config_dir(cli)?;
            let settings = effective_settings(cli)?;
            settings.save_to(&dir)?;
            if !cli.quiet {
                eprintln!(
                    "{} Saved settings to {}",
                    style("✓").green(),
                    dir.display()
                );
            }
            Ok(())
        },
    }
}
