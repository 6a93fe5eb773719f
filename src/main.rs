use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use task_scout::core::config::{AppPaths, BrowserFamily};
use task_scout::db::TaskFilter;
use task_scout::tools::{background_scanner, diagnose, scan};
use task_scout::{AppState, Priority, StoredTask, TaskOrigin, TaskStatus};

/// Mine actionable tasks out of WhatsApp Web conversations.
#[derive(Parser, Debug)]
#[command(name = "task-scout", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show or change the scraper configuration.
    Configure(ConfigureArgs),
    /// Scan monitored conversations once.
    Scan {
        /// Only this conversation.
        #[arg(long)]
        group: Option<String>,
        /// Read chat exports instead of the live browser.
        #[arg(long)]
        export: bool,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Import one WhatsApp "Export chat" text file.
    Import {
        file: PathBuf,
        /// Conversation name; defaults to the file name.
        #[arg(long)]
        group: Option<String>,
    },
    /// Run the background scanner until Ctrl-C or until auto scan is disabled.
    Watch,
    /// Open WhatsApp Web and report which selector alternatives match.
    Diagnose,
    /// Manage extracted tasks.
    #[command(subcommand)]
    Tasks(TaskCommands),
}

#[derive(Args, Debug, Default)]
struct ConfigureArgs {
    #[arg(long, conflicts_with = "disable")]
    enable: bool,
    #[arg(long)]
    disable: bool,
    #[arg(long = "add-group", value_name = "NAME")]
    add_group: Vec<String>,
    #[arg(long = "remove-group", value_name = "NAME")]
    remove_group: Vec<String>,
    #[arg(long)]
    max_messages: Option<usize>,
    #[arg(long)]
    min_words: Option<usize>,
    /// chrome | edge | firefox
    #[arg(long)]
    browser: Option<BrowserFamily>,
    #[arg(long)]
    headless: Option<bool>,
    #[arg(long)]
    auto_scan: Option<bool>,
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,
    #[arg(long)]
    use_export: Option<bool>,
    #[arg(long, value_name = "PATH")]
    export_path: Option<String>,
    #[arg(long)]
    debug: Option<bool>,
    #[arg(long)]
    screenshot_on_error: Option<bool>,
    #[arg(long, value_name = "SECONDS")]
    auth_timeout: Option<u64>,
    #[arg(long)]
    demo_fallback: Option<bool>,
}

#[derive(Subcommand, Debug)]
enum TaskCommands {
    /// List tasks, newest first.
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        origin: Option<TaskOrigin>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    View { id: i64 },
    /// Link a task to a problem.
    Assign { id: i64, problem_id: i64 },
    /// Turn an assigned task into an action step of its problem.
    Convert { id: i64 },
    Complete { id: i64 },
    Delete { id: i64 },
    Priority { id: i64, priority: Priority },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let http_client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .gzip(true)
        .build()?;
    let paths = AppPaths::resolve()?;
    let state = AppState::new(http_client, paths)?;

    match cli.command {
        Commands::Configure(args) => configure(&state, args),
        Commands::Scan { group, export, json } => {
            let request = scan::ScanRequest {
                group,
                force_export: export,
            };
            let report = scan::run_scan(&state, request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Commands::Import { file, group } => {
            let report = scan::import_export_file(&state, &file, group.as_deref()).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Watch => watch(state).await,
        Commands::Diagnose => {
            let probes = diagnose::run_diagnose(&state).await?;
            for p in probes {
                match p.matched {
                    Some(i) => println!("{:<18} alternative #{} of {}", p.key, i, p.alternatives),
                    None => println!("{:<18} NOT FOUND ({} alternatives)", p.key, p.alternatives),
                }
            }
            Ok(())
        }
        Commands::Tasks(cmd) => tasks(&state, cmd).await,
    }
}

fn configure(state: &AppState, args: ConfigureArgs) -> anyhow::Result<()> {
    let mut cfg = state.load_config();

    if args.enable {
        cfg.enabled = true;
    }
    if args.disable {
        cfg.enabled = false;
    }
    for g in &args.add_group {
        if !cfg.add_group(g) {
            warn!("configure: '{}' is empty or already monitored", g);
        }
    }
    for g in &args.remove_group {
        if !cfg.remove_group(g) {
            warn!("configure: '{}' was not monitored", g);
        }
    }
    if let Some(v) = args.max_messages {
        cfg.max_messages_per_chat = v;
    }
    if let Some(v) = args.min_words {
        cfg.min_words = v;
    }
    if let Some(v) = args.browser {
        cfg.browser_type = v;
    }
    if let Some(v) = args.headless {
        cfg.headless = v;
    }
    if let Some(v) = args.auto_scan {
        cfg.auto_scan = v;
    }
    if let Some(v) = args.interval {
        cfg.scan_interval_seconds = v;
    }
    if let Some(v) = args.use_export {
        cfg.use_export = v;
    }
    if let Some(v) = args.export_path {
        cfg.export_path = v;
    }
    if let Some(v) = args.debug {
        cfg.debug_mode = v;
    }
    if let Some(v) = args.screenshot_on_error {
        cfg.screenshot_on_error = v;
    }
    if let Some(v) = args.auth_timeout {
        cfg.auth_timeout_seconds = v;
    }
    if let Some(v) = args.demo_fallback {
        cfg.demo_fallback = v;
    }

    state.save_config(&cfg)?;
    info!("configure: saved {}", state.paths.config_file.display());

    // Never echo the API key.
    let mut shown = cfg.clone();
    if let Some(llm) = shown.llm.as_mut() {
        if llm.api_key.is_some() {
            llm.api_key = Some("<set>".to_string());
        }
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

async fn watch(state: AppState) -> anyhow::Result<()> {
    let cfg = state.load_config();
    if !(cfg.enabled && cfg.auto_scan) {
        bail!("auto scan is off; run `configure --enable --auto-scan true` first");
    }
    let handle = background_scanner::start(state);
    let interrupted = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl-C")?;
            true
        }
        _ = wait_until_finished(&handle) => false,
    };
    if interrupted {
        info!("watch: Ctrl-C received; stopping");
        handle.stop().await;
    } else {
        handle.join().await;
    }
    Ok(())
}

async fn wait_until_finished(handle: &background_scanner::ScannerHandle) {
    while !handle.is_finished() {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

async fn tasks(state: &AppState, cmd: TaskCommands) -> anyhow::Result<()> {
    let db = &state.db;
    match cmd {
        TaskCommands::List {
            status,
            group,
            origin,
            limit,
            json,
        } => {
            let tasks = db
                .list_tasks(TaskFilter {
                    status,
                    group_name: group,
                    origin,
                    limit,
                })
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("no tasks");
            } else {
                for t in &tasks {
                    println!(
                        "#{:<5} [{:<6}] {:<9} {}  ({} / {}){}",
                        t.id,
                        t.priority,
                        t.status,
                        t.task_description,
                        t.group_name,
                        t.sender,
                        if t.origin == TaskOrigin::Live {
                            String::new()
                        } else {
                            format!(" <{}>", t.origin)
                        }
                    );
                }
            }
        }
        TaskCommands::View { id } => {
            let task = require_task(state, id).await?;
            print_task(&task);
        }
        TaskCommands::Assign { id, problem_id } => {
            if !db.assign_task(id, problem_id).await? {
                bail!("task {id} not found");
            }
            println!("task {id} assigned to problem {problem_id}");
        }
        TaskCommands::Convert { id } => {
            let task = db.convert_task(id).await?;
            println!(
                "task {} converted into an action step of problem {}",
                task.id,
                task.problem_id
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "?".to_string())
            );
        }
        TaskCommands::Complete { id } => {
            if !db.complete_task(id).await? {
                bail!("task {id} not found");
            }
            println!("task {id} completed");
        }
        TaskCommands::Delete { id } => {
            if !db.delete_task(id).await? {
                bail!("task {id} not found");
            }
            println!("task {id} deleted");
        }
        TaskCommands::Priority { id, priority } => {
            if !db.set_task_priority(id, priority).await? {
                bail!("task {id} not found");
            }
            println!("task {id} priority set to {priority}");
        }
    }
    Ok(())
}

async fn require_task(state: &AppState, id: i64) -> anyhow::Result<StoredTask> {
    state
        .db
        .get_task(id)
        .await?
        .ok_or_else(|| anyhow!("task {id} not found"))
}

fn print_task(t: &StoredTask) {
    println!("Task #{}", t.id);
    println!("  description : {}", t.task_description);
    println!("  priority    : {}", t.priority);
    println!("  status      : {}", t.status);
    println!("  origin      : {}", t.origin);
    println!("  conversation: {}", t.group_name);
    println!("  sender      : {}", t.sender);
    println!("  timestamp   : {}", t.timestamp.to_rfc3339());
    if let Some(p) = t.problem_id {
        println!("  problem     : {}", p);
    }
    println!("  message     :");
    for line in t.message.lines() {
        println!("    {}", line);
    }
}

fn print_report(report: &scan::ScanReport) {
    println!("source              : {:?}", report.source);
    println!("conversations opened: {}", report.conversations_opened);
    if !report.conversations_skipped.is_empty() {
        println!(
            "conversations skipped: {}",
            report.conversations_skipped.join(", ")
        );
    }
    println!(
        "messages            : {} seen, {} new, {} too short",
        report.messages_seen, report.messages_new, report.filtered_short
    );
    println!(
        "tasks               : {} extracted, {} stored, {} duplicates",
        report.tasks_extracted, report.stored, report.skipped
    );
    if let Some(reason) = &report.aborted {
        println!("aborted             : {}", reason);
    }
    for w in &report.warnings {
        println!("warning             : {}", w);
    }
}
