use clap::Subcommand;
use choreboard_core::storage::Config;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file if none exists
    Init,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Show => {
            let config = Config::load()?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init => {
            let config = Config::load()?;
            config.save()?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
