use anyhow::Result;
use clap::{Parser, Subcommand};

use foreman::api::Collaborators;
use foreman::checkpoint::CheckpointStore;
use foreman::config::Config;
use foreman::engine::{RunStatus, WorkflowEngine};
use foreman::logging::init_logging;
use foreman::state::SharedState;

#[derive(Parser)]
#[command(
    name = "foreman",
    about = "Human-in-the-loop software delivery pipeline orchestrator"
)]
struct Cli {
    /// Path to an explicit config file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new run for the given request
    Run {
        /// What to build
        prompt: String,

        /// Approve every review gate automatically (non-interactive mode)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Resume a suspended or interrupted run
    Resume {
        /// Run id printed when the run suspended
        run_id: String,

        /// Answer to the pending review question. Omit to retry a failed
        /// step with the same inputs.
        answer: Option<String>,
    },
    /// Show the status of a checkpointed run
    Status {
        /// Run id to inspect
        run_id: String,
    },
    /// List checkpointed runs
    List,
    /// Abandon a run by discarding its checkpoint
    Abandon {
        /// Run id to abandon
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let _logging = init_logging(&config, cli.debug)?;

    match cli.command {
        Command::Run {
            prompt,
            auto_approve,
        } => {
            let engine = build_engine(&config)?;
            let mut state = SharedState::new(&prompt);
            state.auto_approve = auto_approve;
            let report = engine.start(state).await?;
            print_report(&report.run_id, &report.status);
        }
        Command::Resume { run_id, answer } => {
            let engine = build_engine(&config)?;
            let report = engine.resume(&run_id, answer.as_deref()).await?;
            print_report(&report.run_id, &report.status);
        }
        Command::Status { run_id } => {
            let checkpoints = CheckpointStore::open(config.checkpoints_path())?;
            let checkpoint = checkpoints.load(&run_id)?;
            println!("run:         {}", checkpoint.run_id);
            println!("resume step: {}", checkpoint.resume_step);
            println!("saved at:    {}", checkpoint.saved_at);
            println!(
                "tasks:       {} defined, {} live",
                checkpoint.state.task_definitions.len(),
                checkpoint.state.live_tasks.len()
            );
            if let Some(question) = &checkpoint.state.pending_review {
                println!("\nawaiting answer to:\n{}", question);
            }
            if let Some(failure) = &checkpoint.state.failure {
                println!("\nfailed: {}", failure);
            }
        }
        Command::List => {
            let checkpoints = CheckpointStore::open(config.checkpoints_path())?;
            for run_id in checkpoints.list()? {
                println!("{}", run_id);
            }
        }
        Command::Abandon { run_id } => {
            let checkpoints = CheckpointStore::open(config.checkpoints_path())?;
            checkpoints.delete(&run_id)?;
            println!("Run {} abandoned.", run_id);
        }
    }

    Ok(())
}

fn build_engine(config: &Config) -> Result<WorkflowEngine> {
    let clients = Collaborators::from_env(config)?;
    let checkpoints = CheckpointStore::open(config.checkpoints_path())?;
    WorkflowEngine::new(config.clone(), clients, checkpoints)
}

fn print_report(run_id: &str, status: &RunStatus) {
    match status {
        RunStatus::Suspended { question } => {
            println!("{}", question);
            println!();
            println!("Run suspended. Reply with:");
            println!("  foreman resume {} \"<your answer>\"", run_id);
        }
        RunStatus::Interrupted { reason } => {
            println!("Run interrupted: {}", reason);
            println!("Retry with:");
            println!("  foreman resume {}", run_id);
        }
        RunStatus::Completed => {
            println!("Run {} completed.", run_id);
        }
        RunStatus::Failed { reason } => {
            println!("Run {} failed: {}", run_id, reason);
        }
    }
}
