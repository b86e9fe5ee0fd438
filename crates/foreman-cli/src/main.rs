//! Foreman CLI - agent behavior scheduler.
//!
//! Single binary that provides:
//! - `foreman run` - drive the demo agent through a scripted session
//! - `foreman status` - persisted failure, knowledge and event summaries
//! - `foreman failures` / `foreman insights` - inspect learned state
//! - `foreman analyze` - run a learning pass over the failure log

mod demo;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use foreman_core::{ActionRegistry, TickContext};
use foreman_kernel::config::CONFIG_PATH;
use foreman_kernel::{
    AgentExecutor, EventEmitter, FailureTracker, ForemanConfig, KnowledgeBase, LearningSystem,
    Outcome, OutcomeKind,
};

use crate::demo::{DemoFactory, DemoWorld};

#[derive(Parser)]
#[command(name = "foreman")]
#[command(about = "Agent behavior scheduler", version)]
struct Cli {
    /// Project root directory
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo agent
    Run {
        /// Stop after this many ticks
        #[arg(long, default_value_t = 400)]
        ticks: u64,

        /// Don't pace ticks to the configured rate
        #[arg(long)]
        fast: bool,
    },

    /// Show learned state and recent events
    Status,

    /// List the most common failures
    Failures {
        #[arg(long, default_value_t = 5)]
        top: usize,

        /// Print the retained records as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List stored insights
    Insights {
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,
    },

    /// Mine the failure log for new insights
    Analyze,

    /// Initialize a new project
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let project_root = match cli.project {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Some(Commands::Run { ticks, fast }) => run_agent(&project_root, ticks, fast).await,
        Some(Commands::Status) => show_status(&project_root),
        Some(Commands::Failures { top, json }) => show_failures(&project_root, top, json),
        Some(Commands::Insights { min_confidence }) => {
            show_insights(&project_root, min_confidence)
        }
        Some(Commands::Analyze) => analyze(&project_root),
        Some(Commands::Init) => init_project(&project_root),
        None => {
            println!("Foreman - Agent Behavior Scheduler");
            println!();
            println!("Usage: foreman <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run       Run the demo agent");
            println!("  status    Show learned state and recent events");
            println!("  failures  List the most common failures");
            println!("  insights  List stored insights");
            println!("  analyze   Mine the failure log for new insights");
            println!("  init      Initialize a new project");
            println!();
            println!("Run 'foreman --help' for more information.");
            Ok(())
        }
    }
}

fn load_config(project_root: &Path) -> Result<ForemanConfig> {
    let mut config = ForemanConfig::load_from_project(project_root)?;
    config.resolve_paths(project_root);
    Ok(config)
}

fn open_tracker(config: &ForemanConfig) -> Result<FailureTracker> {
    let path = config.failure_log_path();
    FailureTracker::open(&config.agent, &path, config.learning.max_failures)
        .with_context(|| format!("Failed to open failure log {}", path.display()))
}

fn open_knowledge(config: &ForemanConfig) -> Result<KnowledgeBase> {
    let path = config.knowledge_path();
    KnowledgeBase::open(
        &config.agent,
        &path,
        config.learning.max_insights,
        config.learning.max_tips_per_action,
    )
    .with_context(|| format!("Failed to open knowledge base {}", path.display()))
}

async fn run_agent(project_root: &Path, ticks: u64, fast: bool) -> Result<()> {
    let config = load_config(project_root)?;
    tracing::info!(
        project = %project_root.display(),
        agent = %config.agent,
        tick_hz = config.tick_hz,
        "Starting agent"
    );

    let factory = DemoFactory::new(ActionRegistry::with_builtin());
    let mut executor = AgentExecutor::open(&config, factory)
        .with_context(|| format!("Failed to open agent state in {}", config.data_dir.display()))?;
    let mut world = DemoWorld {
        hostiles: 1,
        ..DemoWorld::default()
    };

    let mut script = demo::script().into_iter().peekable();
    let period = Duration::from_millis(1000 / u64::from(config.tick_hz.max(1)));
    let mut interval = tokio::time::interval(period);

    for tick in 0..ticks {
        if !fast {
            interval.tick().await;
        }

        while let Some(next) = script.next_if(|s| s.at_tick <= tick) {
            let kind = next.task.kind.clone();
            if let Err(error) = executor.submit(next.task, next.priority) {
                tracing::warn!(kind = %kind, %error, "Task rejected");
            }
        }

        executor.tick(&TickContext::at_rate(tick, config.tick_hz), &mut world);
        for outcome in executor.take_outcomes() {
            log_outcome(&outcome);
        }

        if script.peek().is_none() && executor.is_idle() {
            tracing::info!(tick, "All work finished");
            break;
        }
    }

    executor.stop(&mut world);
    for outcome in executor.take_outcomes() {
        log_outcome(&outcome);
    }

    println!();
    print!("{}", executor.status());
    println!();
    println!("Inventory:");
    for (item, count) in &world.inventory {
        println!("  {item}: {count}");
    }
    println!();
    println!("Recommendations:");
    for recommendation in executor.recommendations() {
        println!("  - {recommendation}");
    }
    println!();
    println!("{}", executor.failure_tracker().summary());

    Ok(())
}

fn log_outcome(outcome: &Outcome) {
    let kind = &outcome.task.kind;
    let task = outcome.task.id.0;
    match outcome.kind {
        OutcomeKind::Succeeded => tracing::info!(
            task,
            kind = %kind,
            retries = outcome.retries,
            result = %outcome.result,
            "Task succeeded"
        ),
        OutcomeKind::Cancelled => tracing::info!(task, kind = %kind, "Task cancelled"),
        OutcomeKind::Failed | OutcomeKind::GaveUp => tracing::warn!(
            task,
            kind = %kind,
            retries = outcome.retries,
            result = %outcome.result,
            gave_up = outcome.kind == OutcomeKind::GaveUp,
            "Task failed"
        ),
    }
}

fn show_status(project_root: &Path) -> Result<()> {
    let config = load_config(project_root)?;
    let tracker = open_tracker(&config)?;
    let knowledge = open_knowledge(&config)?;
    let events = EventEmitter::new(config.events_path());
    let recent_events = events.read_recent(10);

    println!("Foreman Status");
    println!("==============");
    println!();
    println!("Project: {}", project_root.display());
    println!("Agent: {}", config.agent);
    println!();
    println!("{}", tracker.summary());
    println!("{}", knowledge.summary());
    println!();
    println!("Recent events:");
    if recent_events.is_empty() {
        println!("  (none)");
    }
    for event in &recent_events {
        let at = event.timestamp.with_timezone(&chrono::Local);
        println!(
            "  {} [{}] {}",
            at.format("%H:%M:%S"),
            event.event_type,
            event.message
        );
    }

    Ok(())
}

fn show_failures(project_root: &Path, top: usize, json: bool) -> Result<()> {
    let config = load_config(project_root)?;
    let tracker = open_tracker(&config)?;

    if json {
        for record in tracker.records() {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    println!("Failures tracked: {}", tracker.total_failures());
    println!();
    println!("By action:");
    for (action, count) in tracker.most_common_failures(top) {
        let rate = tracker.failure_rate(&action, config.learning.rate_window);
        println!("  {action}: {count} ({rate:.1}% of recent failures)");
    }
    println!();
    println!("By error:");
    for (error, count) in tracker.most_common_errors(top) {
        println!("  {error}: {count}");
    }

    Ok(())
}

fn show_insights(project_root: &Path, min_confidence: f64) -> Result<()> {
    let config = load_config(project_root)?;
    let knowledge = open_knowledge(&config)?;

    let insights = knowledge.high_confidence_insights(min_confidence);
    println!("Insights: {} of {}", insights.len(), knowledge.insight_count());
    for insight in insights {
        println!("  [{}] {}", insight.category, insight);
    }

    Ok(())
}

fn analyze(project_root: &Path) -> Result<()> {
    let config = load_config(project_root)?;
    let tracker = open_tracker(&config)?;
    let mut knowledge = open_knowledge(&config)?;
    let learning = LearningSystem::new(config.learning.clone());

    let insights = learning.generate_insights(&tracker, &mut knowledge);
    knowledge
        .save()
        .with_context(|| format!("Failed to save {}", config.knowledge_path().display()))?;
    tracing::info!(
        failures = tracker.total_failures(),
        insights = insights.len(),
        "Learning pass complete"
    );

    println!("Generated {} insights:", insights.len());
    for insight in &insights {
        println!("  {insight}");
    }
    println!();
    println!("Recommendations:");
    for recommendation in learning.recommendations(&knowledge) {
        println!("  - {recommendation}");
    }

    Ok(())
}

fn init_project(project_root: &Path) -> Result<()> {
    let config_path = project_root.join(CONFIG_PATH);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    ForemanConfig::default().save(&config_path)?;

    println!("Initialized Foreman project at {}", project_root.display());
    println!();
    println!("Created:");
    println!("  {CONFIG_PATH} - scheduler, learning and retry settings");
    println!();
    println!("Next steps:");
    println!("  1. Tune thresholds in {CONFIG_PATH}");
    println!("  2. Run: foreman run --fast");

    Ok(())
}
