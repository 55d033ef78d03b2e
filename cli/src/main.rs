use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use habitbloom::habits::{Frequency, HabitDraft, level_for_points};
use habitbloom::transport::TransportError;
use habitbloom::{ApiError, ClientConfig, ConfigError, FileStore, HabitsApi, SessionController};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const CREDENTIALS_DIR: &str = ".habitbloom";
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("http client setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("{}", .0.user_message())]
    Api(#[from] ApiError),
    #[error("not signed in; run `habitbloom login <email>` first")]
    NotSignedIn,
    #[error("cannot locate credentials file; pass --credentials or set HOME")]
    NoCredentialsPath,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("nothing to update; pass at least one field")]
    EmptyUpdate,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("interrupted")]
    Interrupted,
}

#[derive(Parser, Debug)]
#[command(name = "habitbloom", about = "HabitBloom command-line client")]
struct Cli {
    /// API base URL (overrides HABITBLOOM_API_URL).
    #[arg(long)]
    api_url: Option<String>,

    #[arg(long, env = "HABITBLOOM_CREDENTIALS_FILE")]
    credentials: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session tokens.
    Login {
        email: String,
        #[arg(long, env = "HABITBLOOM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and sign in.
    Register {
        email: String,
        username: String,
        #[arg(long, env = "HABITBLOOM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long)]
        password_confirm: Option<String>,
    },
    /// Sign out and forget the stored tokens.
    Logout,
    /// Show the signed-in profile.
    Whoami,
    Dashboard,
    Habits(HabitsCommand),
    Categories,
    Completions,
}

#[derive(Args, Debug)]
struct HabitsCommand {
    #[command(subcommand)]
    command: HabitsSubcommand,
}

#[derive(Subcommand, Debug)]
enum HabitsSubcommand {
    List,
    Show {
        id: u64,
    },
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        category: Option<u64>,
        #[arg(long, default_value = "daily")]
        frequency: Frequency,
        #[arg(long, default_value_t = HabitDraft::DEFAULT_POINTS)]
        points: i64,
    },
    Update {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<u64>,
        #[arg(long)]
        frequency: Option<Frequency>,
        #[arg(long)]
        points: Option<i64>,
    },
    Delete {
        id: u64,
    },
    /// Mark a habit done for today.
    Complete {
        id: u64,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => Err(CliError::Interrupted),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        config.api_url = ClientConfig::with_api_url(url)?.api_url;
    }
    let path = credentials_path(cli.credentials)?;
    tracing::debug!(api_url = %config.api_url, credentials = %path.display(), "starting");

    let store = Arc::new(FileStore::new(path));
    let session = SessionController::from_config(&config, store)?;
    let habits = HabitsApi::new(session.client().clone());

    match cli.command {
        Command::Login { email, password } => {
            let password = password_or_prompt(password, "Password: ")?;
            let user = session.login(&email, &password).await?;
            println!("Signed in as {}", user.username().unwrap_or(&email));
            Ok(())
        }
        Command::Register { email, username, password, password_confirm } => {
            let password = password_or_prompt(password, "Password: ")?;
            let confirm = match password_confirm {
                Some(confirm) => confirm,
                None => password_or_prompt(None, "Confirm password: ")?,
            };
            if password != confirm {
                return Err(CliError::PasswordMismatch);
            }
            let user = session.register(&email, &username, &password, &confirm).await?;
            println!("Welcome, {}!", user.username().unwrap_or(&username));
            Ok(())
        }
        Command::Logout => {
            session.logout().await;
            println!("Signed out");
            Ok(())
        }
        Command::Whoami => {
            require_session(&session).await?;
            let user = session.session().user.ok_or(CliError::NotSignedIn)?;
            print_json(&user)
        }
        Command::Dashboard => {
            require_session(&session).await?;
            print_json(&habits.dashboard().await?)
        }
        Command::Habits(command) => {
            require_session(&session).await?;
            run_habits(&session, &habits, command).await
        }
        Command::Categories => {
            require_session(&session).await?;
            print_json(&habits.list_categories().await?)
        }
        Command::Completions => {
            require_session(&session).await?;
            print_json(&habits.list_completions().await?)
        }
    }
}

async fn run_habits(session: &SessionController, habits: &HabitsApi, command: HabitsCommand) -> Result<(), CliError> {
    match command.command {
        HabitsSubcommand::List => print_json(&habits.list_habits().await?),
        HabitsSubcommand::Show { id } => print_json(&habits.get_habit(id).await?),
        HabitsSubcommand::Create { name, description, category, frequency, points } => {
            let draft = HabitDraft { name, description, category, frequency, points_per_completion: points };
            print_json(&habits.create_habit(&draft).await?)
        }
        HabitsSubcommand::Update { id, name, description, category, frequency, points } => {
            if name.is_none() && description.is_none() && category.is_none() && frequency.is_none() && points.is_none() {
                return Err(CliError::EmptyUpdate);
            }
            let current = habits.get_habit(id).await?;
            let mut draft = HabitDraft::from(&current);
            if let Some(name) = name {
                draft.name = name;
            }
            if let Some(description) = description {
                draft.description = description;
            }
            if category.is_some() {
                draft.category = category;
            }
            if let Some(frequency) = frequency {
                draft.frequency = frequency;
            }
            if let Some(points) = points {
                draft.points_per_completion = points;
            }
            print_json(&habits.update_habit(id, &draft).await?)
        }
        HabitsSubcommand::Delete { id } => {
            habits.delete_habit(id).await?;
            println!("Deleted habit {id}");
            Ok(())
        }
        HabitsSubcommand::Complete { id, notes } => {
            let habit = habits.get_habit(id).await?;
            let completion = habits.complete_habit(id, notes.as_deref()).await?;
            let before = session.session().user.and_then(|u| u.total_points()).unwrap_or_default();
            let total = before + habit.points_per_completion;
            session.update_local_stats(total, level_for_points(total));
            println!(
                "Completed {} (+{} pts, {} total, level {})",
                completion.habit_name.as_deref().unwrap_or(&habit.name),
                habit.points_per_completion,
                total,
                level_for_points(total)
            );
            Ok(())
        }
    }
}

/// Restore the stored session, failing when nobody is signed in.
async fn require_session(session: &SessionController) -> Result<(), CliError> {
    if session.init().await.is_authenticated() { Ok(()) } else { Err(CliError::NotSignedIn) }
}

fn credentials_path(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let home = std::env::var_os("HOME").ok_or(CliError::NoCredentialsPath)?;
    Ok(PathBuf::from(home).join(CREDENTIALS_DIR).join(CREDENTIALS_FILE))
}

fn password_or_prompt(given: Option<String>, prompt: &str) -> Result<String, CliError> {
    if let Some(password) = given {
        return Ok(password);
    }
    // Reads from the terminal with echo off.
    Ok(rpassword::prompt_password(prompt)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
