use clap::Subcommand;

use super::{now, open_engine};

#[derive(Subcommand)]
pub enum LedgerAction {
    /// Current balance of an account
    Balance { account: String },
    /// Full ledger history of an account
    History { account: String },
    /// Guardian-granted award
    Award {
        account: String,
        #[arg(long)]
        amount: i64,
        /// Correlation id making retries idempotent
        #[arg(long)]
        correlation: String,
    },
    /// Debit points for a store redemption
    Redeem {
        account: String,
        #[arg(long)]
        amount: i64,
        /// Redemption identifier
        #[arg(long)]
        redemption: String,
    },
    /// Debit back an approved instance's awarded points
    Reverse { instance: String },
}

pub fn run(action: LedgerAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = open_engine()?;

    match action {
        LedgerAction::Balance { account } => {
            let balance = engine.balance_of(&account)?;
            println!("{balance}");
        }
        LedgerAction::History { account } => {
            let entries = engine.ledger_of(&account)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        LedgerAction::Award {
            account,
            amount,
            correlation,
        } => {
            let entry = engine.award(&account, amount, &correlation, now())?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        LedgerAction::Redeem {
            account,
            amount,
            redemption,
        } => {
            let entry = engine.redeem(&account, amount, &redemption, now())?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        LedgerAction::Reverse { instance } => {
            let entry = engine.reverse_approval(&instance, now())?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
    }
    Ok(())
}
