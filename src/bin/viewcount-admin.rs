use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use viewcount::config::Config;
use viewcount::context::AppContext;
use viewcount::models::CounterTarget;

#[derive(Parser)]
#[command(name = "viewcount-admin")]
#[command(about = "View counter administration CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Owner of the counter
    username: String,
    /// Repository name (omit for the profile counter)
    #[arg(long)]
    repo: Option<String>,
    /// Page identifier (omit for the main page)
    #[arg(long)]
    page: Option<String>,
}

impl TargetArgs {
    fn target(&self) -> Result<CounterTarget> {
        Ok(CounterTarget::new(
            self.username.as_str(),
            self.repo.as_deref(),
            self.page.as_deref(),
        )?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Zero a counter and delete its history
    Reset {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Set a counter to a starting value
    SetCount {
        #[command(flatten)]
        target: TargetArgs,
        /// New count (0 to 999,999,999)
        count: i64,
    },
    /// Show total, today and the last seven days
    Stats {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show the live count
    Count {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Copy the live count into the database
    Sync {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List all counters of a user
    List {
        /// Owner of the counters
        username: String,
    },
    /// Show the most recent counted views
    Logs {
        #[command(flatten)]
        target: TargetArgs,
        /// Maximum number of rows
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show how long a visitor stays in cooldown
    Cooldown {
        #[command(flatten)]
        target: TargetArgs,
        /// Visitor IP address
        #[arg(long)]
        ip: String,
        /// Visitor user agent
        #[arg(long)]
        user_agent: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let ctx = AppContext::connect(config).await?;

    let result = run(&ctx, cli.command).await;
    ctx.shutdown().await;
    result
}

async fn run(ctx: &AppContext, command: Commands) -> Result<()> {
    let tracker = &ctx.tracker;

    match command {
        Commands::Reset { target } => {
            let target = target.target()?;
            tracker.reset_counter(&target).await?;
            println!("✓ Reset counter '{}'", target);
        }
        Commands::SetCount { target, count } => {
            let target = target.target()?;
            let count = tracker.set_initial_count(&target, count).await?;
            println!("✓ Counter '{}' set to {}", target, count);
        }
        Commands::Stats { target } => {
            let stats = tracker.get_stats(&target.target()?).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Count { target } => {
            let count = tracker.current_count(&target.target()?).await?;
            println!("{}", count);
        }
        Commands::Sync { target } => {
            let target = target.target()?;
            match tracker.sync_counter(&target).await? {
                Some(count) => println!("✓ Synced counter '{}' at {}", target, count),
                None => println!("⚠ Counter '{}' has no live count to sync", target),
            }
        }
        Commands::List { username } => {
            let counters = tracker.list_counters(&username).await?;
            if counters.is_empty() {
                println!("No counters found for '{}'.", username);
            } else {
                println!("{:<50} {:>12} {:>8}", "Counter", "Total", "Today");
                println!("{}", "-".repeat(72));
                for summary in counters {
                    println!(
                        "{:<50} {:>12} {:>8}",
                        summary.counter.canonical_key, summary.counter.total_views, summary.today
                    );
                }
            }
        }
        Commands::Logs { target, limit } => {
            let target = target.target()?;
            let views = tracker.recent_views(&target, limit).await?;
            if views.is_empty() {
                println!("No views recorded for '{}'.", target);
            } else {
                println!("{:<25} {:<32}", "Viewed at (UTC)", "Visitor");
                println!("{}", "-".repeat(58));
                for view in views {
                    let viewed_at = chrono::DateTime::from_timestamp(view.viewed_at, 0)
                        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| view.viewed_at.to_string());
                    println!("{:<25} {:<32}", viewed_at, view.visitor_hash);
                }
            }
        }
        Commands::Cooldown {
            target,
            ip,
            user_agent,
        } => {
            let target = target.target()?;
            match tracker
                .cooldown_remaining(&target, &ip, user_agent.as_deref())
                .await?
            {
                Some(left) => println!("In cooldown for {}s more", left.as_secs()),
                None => println!("Not in cooldown, the next view counts"),
            }
        }
    }

    Ok(())
}
