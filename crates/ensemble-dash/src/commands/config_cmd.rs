//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = config::config_path(global);
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config(global)?;
            let toml = cfg.to_toml()?;
            let rendered = output::render_single(global.output, &cfg, |_| toml.clone())?;
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }
    }
}
