use clap::Subcommand;
use choreboard_core::Role;

use super::{now, open_engine};

#[derive(Subcommand)]
pub enum AccountAction {
    /// Register an account
    Create {
        /// Stable account identifier
        id: String,
        /// Display name
        name: String,
        /// Role: guardian or dependent
        #[arg(long, default_value = "dependent")]
        role: String,
        /// Family identifier
        #[arg(long)]
        family: String,
    },
    /// Show an account
    Show { id: String },
    /// Show an account's streak record
    Streak { id: String },
}

pub fn run(action: AccountAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = open_engine()?;

    match action {
        AccountAction::Create {
            id,
            name,
            role,
            family,
        } => {
            let role = match role.as_str() {
                "guardian" => Role::Guardian,
                "dependent" => Role::Dependent,
                other => return Err(format!("unknown role '{other}'").into()),
            };
            let account = engine.register_account(&id, &name, role, &family, now())?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        AccountAction::Show { id } => {
            let account = engine
                .db()
                .account(&id)?
                .ok_or_else(|| format!("account '{id}' not found"))?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        AccountAction::Streak { id } => {
            let streak = engine
                .streak_of(&id)?
                .ok_or_else(|| format!("no streak record for '{id}'"))?;
            println!("{}", serde_json::to_string_pretty(&streak)?);
        }
    }
    Ok(())
}
