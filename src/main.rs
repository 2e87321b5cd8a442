//! Retrai 命令行
//!
//! 入口：初始化日志、加载配置，执行目标检查 / 查看记忆库 / 查看断点。

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use retrai::agent::RunState;
use retrai::config::load_config;
use retrai::goals::registry::get_goal_with;
use retrai::memory::MemoryStore;

#[derive(Parser)]
#[command(name = "retrai")]
#[command(about = "Checkpoint, memory and goal-evaluation core of the retrai coding agent")]
struct Cli {
    /// 额外的 TOML 配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one goal check against a project directory
    Check {
        /// Goal name (api-test, sql-benchmark)
        goal: String,
        /// Project directory
        #[arg(default_value = ".")]
        cwd: PathBuf,
    },

    /// Print the system prompt a goal would give the agent, with past learnings
    Prompt {
        goal: String,
        #[arg(default_value = ".")]
        cwd: PathBuf,
    },

    /// Inspect or clear the project memory store
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// List saved checkpoints
    Checkpoints {
        /// Checkpoint directory (defaults to [checkpoint] dir)
        dir: Option<PathBuf>,
    },

    /// Show a saved checkpoint
    Show {
        run_id: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    List {
        #[arg(default_value = ".")]
        cwd: PathBuf,
    },
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[arg(long, default_value = ".")]
        cwd: PathBuf,
    },
    Clear {
        #[arg(default_value = ".")]
        cwd: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    retrai::observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;

    match cli.command {
        Commands::Check { goal, cwd } => {
            let goal = get_goal_with(&goal, &cfg.goals)?;
            let state = RunState::new("", "cli", cwd.clone());
            let result = goal.check(&state, &cwd).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.achieved {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Prompt { goal, cwd } => {
            let goal = get_goal_with(&goal, &cfg.goals)?;
            let mut prompt = goal.system_prompt(&cwd);
            let memories = MemoryStore::open(&cwd, cfg.memory.settings()).format_for_prompt(cfg.memory.prompt_limit);
            if !memories.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(&memories);
            }
            println!("{}", prompt);
        }
        Commands::Memory { action } => match action {
            MemoryAction::List { cwd } => {
                let store = MemoryStore::open(&cwd, cfg.memory.settings());
                for m in store.get_all() {
                    println!("{} [{}] {}", m.category.marker(), m.category, m.insight);
                }
                println!("{} / {} memories", store.len(), store.capacity());
            }
            MemoryAction::Search { query, limit, cwd } => {
                let store = MemoryStore::open(&cwd, cfg.memory.settings());
                for m in store.search(&query, limit) {
                    println!("{} [{}] {}", m.category.marker(), m.category, m.insight);
                }
            }
            MemoryAction::Clear { cwd } => {
                let mut store = MemoryStore::open(&cwd, cfg.memory.settings());
                store.clear().context("Failed to clear memory store")?;
                println!("Cleared {}", store.path().display());
            }
        },
        Commands::Checkpoints { dir } => {
            let store = dir.map(retrai::CheckpointStore::new).unwrap_or_else(|| cfg.checkpoint.store());
            for run_id in store.list_checkpoints()? {
                println!("{}", run_id);
            }
        }
        Commands::Show { run_id, dir } => {
            let store = dir.map(retrai::CheckpointStore::new).unwrap_or_else(|| cfg.checkpoint.store());
            let state = store.load(&run_id)?;
            println!("run_id:      {}", state.run_id);
            println!("model:       {}", state.model_name);
            println!("iteration:   {}/{}", state.iteration, state.max_iterations);
            println!("stop_mode:   {:?}", state.stop_mode);
            println!("achieved:    {}", state.goal_achieved);
            println!("reason:      {}", state.goal_reason);
            println!("tokens:      {}", state.total_tokens);
            println!("cost (USD):  {:.4}", state.estimated_cost_usd);
            println!("messages:    {}", state.messages.len());
            if let Some(last) = state.messages.last() {
                println!("last turn ({:?}):\n{}", last.role(), last.content());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
