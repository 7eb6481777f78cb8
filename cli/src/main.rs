mod prompt;
mod tree_view;

use std::{io::IsTerminal, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    select,
    sync::mpsc,
};
use wss_client::{
    config::ClientConfig,
    explorer::{
        AutoPrompter, Confirmation, CreateOutcome, DeleteOutcome, MoveOutcome, Prompter,
        RenameOutcome, SaveOutcome,
    },
    AppContext, LinkState,
};
use wss_protocol::Kind;

use crate::prompt::TerminalPrompter;

#[derive(Parser)]
#[command(name = "wss", version, about = "Terminal front end for a wss backend")]
struct Cli {
    /// Config file, defaults to client.toml in the config dir
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend url, overrides the config
    #[arg(short, long)]
    url: Option<String>,

    /// Answer yes to every question
    #[arg(short, long)]
    yes: bool,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Read commands line by line and print their output (default)
    Shell,
    /// Run a single command
    Run {
        #[arg(required = true)]
        command: Vec<String>,
    },
    /// Send a message to every other client
    Broadcast { message: String },
    /// Print pushes from the backend until interrupted
    Watch {
        /// Also show echoes of this client's broadcasts
        #[arg(long)]
        own: bool,
    },
    /// Print the file tree
    Tree {
        /// Directories to open
        #[arg(short, long)]
        expand: Vec<String>,
        /// Open everything down to this depth
        #[arg(short, long, default_value_t = 0)]
        depth: usize,
    },
    /// Create a file, or a directory if the name ends with '/'
    New { dir: String, name: String },
    Rename { path: String, name: String },
    Delete { path: String },
    /// Move a file or directory into another directory
    Move { source: String, target: String },
    /// Print a file
    Cat { path: String },
    /// Write stdin to a file
    Save { path: String },
}

fn init_logger(verbose: u8) {
    use log::LevelFilter;

    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    fern::Dispatch::new()
        .level(LevelFilter::Off)
        .level_for("wss", level)
        .level_for("wss_client", level)
        .format(|out, message, record| {
            let level = match record.level() {
                log::Level::Error => "ERROR".red(),
                log::Level::Warn => "WARN".yellow(),
                log::Level::Info => "INFO".green(),
                log::Level::Debug => "DEBUG".blue(),
                log::Level::Trace => "TRACE".magenta(),
            };
            out.finish(format_args!("[{}] {}", level, message))
        })
        .chain(std::io::stderr())
        .apply()
        .expect("no logger should have been set yet");
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let path = cli.config.clone().or_else(ClientConfig::default_path);
    let mut config = match path {
        Some(path) => ClientConfig::load(&path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    Ok(config)
}

async fn log_link_states(ctx: &AppContext) {
    let mut state = ctx.channel().watch_state();
    while state.changed().await.is_ok() {
        match *state.borrow_and_update() {
            LinkState::Ready => log::info!("Connected"),
            LinkState::Reconnecting { attempt, delay } => {
                log::warn!("Connection lost, retry {} in {:?}", attempt, delay)
            }
            LinkState::Failed { attempts } => {
                log::error!("Giving up after {} attempts", attempts);
                break;
            }
            LinkState::Closed => break,
            LinkState::Connecting => (),
        }
    }
}

async fn shell(ctx: &AppContext) -> anyhow::Result<()> {
    let mut broadcasts = ctx.channel().subscribe(Kind::Broadcast);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = select! {
            line = lines.next_line() => line.context("reading stdin")?,
            Some(push) = broadcasts.recv_foreign() => {
                eprintln!("{} {}", "broadcast:".cyan(), push.envelope.body().as_text());
                continue;
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            _ => (),
        }
        match ctx.channel().run(line).await {
            Ok(output) => print!("{}", output),
            Err(e) => eprintln!("{}", e.to_string().red()),
        }
    }
    Ok(())
}

async fn watch(ctx: &AppContext, own: bool) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    for kind in [
        Kind::Broadcast,
        Kind::HmrReload,
        Kind::HmrCssUpdate,
        Kind::HmrJsUpdate,
        Kind::NotifyUpdate,
    ] {
        let mut sub = ctx.channel().subscribe(kind);
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(push) = sub.recv().await {
                if (own || !push.own) && tx.send(push).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut errors = ctx.channel().subscribe_errors();
    let interrupted = tokio::signal::ctrl_c();
    let link_down = log_link_states(ctx);
    tokio::pin!(interrupted, link_down);
    loop {
        select! {
            _ = &mut interrupted => break,
            _ = &mut link_down => break,
            Some(e) = errors.recv() => log::warn!("{}", e),
            push = rx.recv() => {
                let Some(push) = push else { break };
                println!(
                    "{} {}",
                    push.envelope.type_str().cyan(),
                    push.envelope.body().as_text()
                );
            }
        }
    }
    Ok(())
}

async fn tree(ctx: &AppContext, expand: &[String], depth: usize) -> anyhow::Result<()> {
    let explorer = ctx.explorer();
    explorer.load_root().await?;
    for level in 0..depth {
        let closed: Vec<String> = explorer
            .snapshot()
            .iter()
            .filter(|e| e.is_dir() && !e.open && e.depth == level)
            .map(|e| e.path())
            .collect();
        for dir in closed {
            explorer.expand(&dir).await?;
        }
    }
    for dir in expand {
        explorer.reveal(dir).await?;
        explorer.expand(dir).await?;
    }
    let color = std::io::stdout().is_terminal();
    print!("{}", tree_view::render(&explorer.snapshot(), color));
    Ok(())
}

async fn run_command(ctx: &AppContext, command: Commands) -> anyhow::Result<()> {
    let explorer = ctx.explorer();
    match command {
        Commands::Shell => shell(ctx).await?,
        Commands::Run { command } => {
            let output = ctx.channel().run(command.join(" ")).await?;
            print!("{}", output);
        }
        Commands::Broadcast { message } => ctx.channel().broadcast(message).await?,
        Commands::Watch { own } => watch(ctx, own).await?,
        Commands::Tree { expand, depth } => tree(ctx, &expand, depth).await?,
        Commands::New { dir, name } => {
            explorer.reveal(&dir).await?;
            let pending = explorer.begin_create(&dir).await?;
            match explorer.commit_create(&pending, &name).await? {
                CreateOutcome::Created(path) => println!("Created {}", path),
                CreateOutcome::Conflict(path) => anyhow::bail!("'{}' already exists", path),
                CreateOutcome::Cancelled => println!("Nothing created"),
            }
        }
        Commands::Rename { path, name } => {
            explorer.reveal(&path).await?;
            match explorer.rename(&path, &name).await? {
                RenameOutcome::Renamed(path) => println!("Renamed to {}", path),
                RenameOutcome::Unchanged => println!("Nothing to do"),
                RenameOutcome::Conflict(path) => anyhow::bail!("'{}' already exists", path),
            }
        }
        Commands::Delete { path } => {
            explorer.reveal(&path).await?;
            match explorer.delete(&path).await? {
                DeleteOutcome::Deleted => println!("Deleted {}", path),
                DeleteOutcome::Cancelled => println!("Kept {}", path),
            }
        }
        Commands::Move { source, target } => {
            explorer.reveal(&source).await?;
            explorer.reveal(&target).await?;
            match explorer.drop_onto(&source, &target).await? {
                MoveOutcome::Moved(path) => println!("Moved to {}", path),
                MoveOutcome::Unchanged => println!("Nothing to do"),
                MoveOutcome::Rejected(e) => anyhow::bail!(e),
                MoveOutcome::Conflict(path) => anyhow::bail!("'{}' already exists", path),
            }
        }
        Commands::Cat { path } => print!("{}", explorer.read_file(&path).await?),
        Commands::Save { path } => {
            let mut content = String::new();
            tokio::io::stdin()
                .read_to_string(&mut content)
                .await
                .context("reading stdin")?;
            match explorer.save_as(&path, &content).await? {
                SaveOutcome::Saved(path) => println!("Saved {}", path),
                SaveOutcome::Cancelled => println!("Not saved"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let prompter: Arc<dyn Prompter> = if cli.yes {
        Arc::new(AutoPrompter(Confirmation::Confirmed))
    } else {
        Arc::new(TerminalPrompter)
    };

    log::info!("Connecting to {}", config.url);
    let ctx = AppContext::connect(config, prompter)?;
    let res = run_command(&ctx, cli.command.unwrap_or(Commands::Shell)).await;
    ctx.shutdown().await;
    res
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    if let Err(e) = async_main(cli) {
        log::error!("{:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
