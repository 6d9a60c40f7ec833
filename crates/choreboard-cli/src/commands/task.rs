use chrono::{NaiveTime, Weekday};
use clap::Subcommand;
use choreboard_core::{Cadence, NewTaskDefinition, ReviewDecision, SubmitOptions};

use super::{now, open_engine, parse_date, parse_status};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a recurring task definition
    Define {
        /// Owning guardian account id
        #[arg(long)]
        guardian: String,
        /// Display name (also the auto-approval key)
        name: String,
        /// Points per approved instance
        #[arg(long)]
        points: i64,
        /// Cadence: daily or weekly
        #[arg(long, default_value = "daily")]
        cadence: String,
        /// Weekday for weekly cadence (mon..sun)
        #[arg(long)]
        weekday: Option<String>,
        /// Due time-of-day, HH:MM:SS
        #[arg(long)]
        due_time: Option<String>,
        /// Eligible assignees, in rotation order
        #[arg(long, required = true, num_args = 1..)]
        assignee: Vec<String>,
        /// Rotation anchor date, YYYY-MM-DD
        #[arg(long)]
        anchor: String,
        /// Pre-stage future occurrences as scheduled
        #[arg(long)]
        prestage: bool,
    },
    /// List definitions
    Definitions {
        #[arg(long)]
        all: bool,
    },
    /// Expand a definition into dated instances
    Generate {
        definition: String,
        /// Start date, YYYY-MM-DD
        #[arg(long)]
        start: String,
        /// Horizon in days (default from config)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Activate pre-staged instances due on or before a date
    Activate {
        /// Today's date, YYYY-MM-DD
        date: String,
    },
    /// List instances for an assignee
    List {
        assignee: String,
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },
    /// Submit a completed instance
    Submit {
        instance: String,
        /// Submitting account id
        #[arg(long)]
        by: String,
        #[arg(long)]
        notes: Option<String>,
        /// Minutes spent, feeds the effort bonus
        #[arg(long)]
        minutes: Option<u32>,
    },
    /// Review a pending instance
    Review {
        instance: String,
        /// Reviewing guardian account id
        #[arg(long)]
        by: String,
        /// Decision: approve or reject
        decision: String,
    },
    /// Skip a scheduled or assigned instance
    Skip { instance: String },
    /// Replace a definition's assignee rotation
    SetAssignees {
        definition: String,
        /// Expected definition version (optimistic concurrency)
        #[arg(long)]
        version: i64,
        #[arg(long, required = true, num_args = 1..)]
        assignee: Vec<String>,
    },
    /// Soft-deactivate a definition
    Deactivate {
        definition: String,
        #[arg(long)]
        version: i64,
    },
}

fn parse_weekday(value: &str) -> Result<Weekday, Box<dyn std::error::Error>> {
    value
        .parse::<Weekday>()
        .map_err(|_| format!("unknown weekday '{value}'").into())
}

pub fn run(action: TaskAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = open_engine()?;

    match action {
        TaskAction::Define {
            guardian,
            name,
            points,
            cadence,
            weekday,
            due_time,
            assignee,
            anchor,
            prestage,
        } => {
            let cadence = match cadence.as_str() {
                "daily" => Cadence::Daily,
                "weekly" => Cadence::Weekly,
                other => return Err(format!("unknown cadence '{other}'").into()),
            };
            let weekday = weekday.as_deref().map(parse_weekday).transpose()?;
            let due_time = due_time
                .as_deref()
                .map(|s| NaiveTime::parse_from_str(s, "%H:%M:%S"))
                .transpose()
                .map_err(|e| format!("invalid due time: {e}"))?;
            let definition = engine.define_task(
                NewTaskDefinition {
                    guardian_id: guardian,
                    name,
                    points,
                    cadence,
                    weekday,
                    due_time,
                    assignees: assignee,
                    anchor_date: parse_date(&anchor)?,
                    prestage,
                },
                now(),
            )?;
            println!("{}", serde_json::to_string_pretty(&definition)?);
        }
        TaskAction::Definitions { all } => {
            let definitions = engine.db().definitions(!all)?;
            println!("{}", serde_json::to_string_pretty(&definitions)?);
        }
        TaskAction::Generate {
            definition,
            start,
            days,
        } => {
            let instances = engine.generate(&definition, parse_date(&start)?, days, now())?;
            println!("{}", serde_json::to_string_pretty(&instances)?);
        }
        TaskAction::Activate { date } => {
            let activated = engine.activate_due(parse_date(&date)?, now())?;
            println!("{}", serde_json::to_string_pretty(&activated)?);
        }
        TaskAction::List { assignee, status } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let instances = engine.db().instances_by_assignee(&assignee, status)?;
            println!("{}", serde_json::to_string_pretty(&instances)?);
        }
        TaskAction::Submit {
            instance,
            by,
            notes,
            minutes,
        } => {
            let submitted = engine.submit(
                &instance,
                &by,
                SubmitOptions {
                    notes,
                    effort_minutes: minutes,
                },
                now(),
            )?;
            println!("{}", serde_json::to_string_pretty(&submitted)?);
        }
        TaskAction::Review {
            instance,
            by,
            decision,
        } => {
            let decision = match decision.as_str() {
                "approve" => ReviewDecision::Approve,
                "reject" => ReviewDecision::Reject,
                other => return Err(format!("unknown decision '{other}'").into()),
            };
            let reviewed = engine.review(&instance, &by, decision, now())?;
            println!("{}", serde_json::to_string_pretty(&reviewed)?);
        }
        TaskAction::Skip { instance } => {
            let skipped = engine.skip(&instance, now())?;
            println!("{}", serde_json::to_string_pretty(&skipped)?);
        }
        TaskAction::SetAssignees {
            definition,
            version,
            assignee,
        } => {
            engine.set_assignees(&definition, assignee, version, now())?;
            let updated = engine
                .db()
                .definition(&definition)?
                .ok_or_else(|| format!("definition '{definition}' not found"))?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        TaskAction::Deactivate {
            definition,
            version,
        } => {
            engine.deactivate_definition(&definition, version, now())?;
            println!("deactivated {definition}");
        }
    }
    Ok(())
}
