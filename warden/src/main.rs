use clap::{Parser, Subcommand};
use log::{error, info, warn};
use shared::{timestamp, AdminCommand, BanExpiry, CommandKind, ListKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use warden::config::Config;
use warden::list_store::ListEntries;
use warden::process::{ChildProcess, ServerHandle, ServerProcess};
use warden::registry::{ProcessTable, Warden};

/// Id the single server managed by this binary is registered under
const SERVER_ID: &str = "local";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server working directory holding the list files
    #[arg(short = 'd', long, default_value = ".")]
    dir: PathBuf,

    /// TOML config file; defaults apply when it does not exist
    #[arg(short = 'c', long, default_value = "warden.toml")]
    config: PathBuf,

    /// Overrides the configured console response timeout
    #[arg(short = 't', long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a list: whitelist, bans or ops
    List { kind: ListKind },
    /// Edit the whitelist
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },
    Ban {
        name: String,
        /// Free text; the configured default is used when empty
        reason: Vec<String>,
    },
    Pardon { name: String },
    Op { name: String },
    Deop { name: String },
    /// Kick needs a running server, so only works from the console
    Kick { name: String, reason: Vec<String> },
    /// Launch the server and manage it interactively.
    ///
    /// Lines starting with `!` are handled here (`!ban Steve griefing`,
    /// `!list ops`, `!reconcile`); everything else goes to the server as-is.
    Console {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        launch: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum WhitelistAction {
    Add { name: String },
    Remove { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.channel.response_timeout_ms = timeout_ms;
    }

    let table = Arc::new(ProcessTable::new());
    table.register(SERVER_ID, &args.dir);
    let warden = Warden::new(table.clone(), config);
    info!("Managing lists in {}", args.dir.display());

    let command = match args.command {
        Command::List { kind } => {
            let entries = warden.list(SERVER_ID, kind).await?;
            print_entries(&entries);
            return Ok(());
        }
        Command::Console { launch } => {
            return run_console(&warden, &table, &args.dir, &launch).await;
        }
        Command::Whitelist {
            action: WhitelistAction::Add { name },
        } => AdminCommand::new(CommandKind::WhitelistAdd, name),
        Command::Whitelist {
            action: WhitelistAction::Remove { name },
        } => AdminCommand::new(CommandKind::WhitelistRemove, name),
        Command::Ban { name, reason } => {
            AdminCommand::new(CommandKind::Ban, name).with_reason(Some(&reason.join(" ")))
        }
        Command::Pardon { name } => AdminCommand::new(CommandKind::Pardon, name),
        Command::Op { name } => AdminCommand::new(CommandKind::Op, name),
        Command::Deop { name } => AdminCommand::new(CommandKind::Deop, name),
        Command::Kick { name, reason } => {
            AdminCommand::new(CommandKind::Kick, name).with_reason(Some(&reason.join(" ")))
        }
    };

    let receipt = warden.execute(SERVER_ID, command).await?;
    println!("{}", receipt.message);
    Ok(())
}

/// Runs the server as a child process and relays the terminal to it.
async fn run_console(
    warden: &Warden,
    table: &ProcessTable,
    dir: &Path,
    launch: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let (program, program_args) = launch.split_first().ok_or("missing launch command")?;
    let process = Arc::new(ChildProcess::spawn(program, program_args, dir)?);
    let handle: ServerHandle = process.clone();
    table.set_process(SERVER_ID, Some(handle.clone()));

    // Echo server output to the terminal
    let mut output = process.subscribe();
    tokio::spawn(async move {
        loop {
            match output.recv().await {
                Ok(line) => println!("{}", line),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} output line(s)", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = input.next_line() => match line? {
                Some(line) => handle_input(warden, &handle, line.trim()).await,
                None => break,
            },
            status = process.wait() => {
                info!("Server exited with {}", status?);
                break;
            }
        }
    }

    table.set_process(SERVER_ID, None);
    Ok(())
}

async fn handle_input(warden: &Warden, process: &ServerHandle, line: &str) {
    if line.is_empty() {
        return;
    }

    let Some(request) = line.strip_prefix('!') else {
        if let Err(e) = process.send_line(line).await {
            error!("Failed to write to server: {}", e);
        }
        return;
    };

    if request == "reconcile" {
        match warden.reconcile(SERVER_ID).await {
            Ok(()) => println!("Lists reloaded from disk"),
            Err(e) => eprintln!("{}", e),
        }
        return;
    }

    if let Some(kind) = request.strip_prefix("list ") {
        match kind.trim().parse::<ListKind>() {
            Ok(kind) => match warden.list(SERVER_ID, kind).await {
                Ok(entries) => print_entries(&entries),
                Err(e) => eprintln!("{}", e),
            },
            Err(e) => eprintln!("{}", e),
        }
        return;
    }

    match AdminCommand::parse(request) {
        Some(command) => match warden.execute(SERVER_ID, command).await {
            Ok(receipt) => println!("{}", receipt.message),
            Err(e) if e.is_ambiguous() => eprintln!("{} (try !reconcile)", e),
            Err(e) => eprintln!("{}", e),
        },
        None => eprintln!("Unrecognised command: {}", request),
    }
}

fn print_entries(entries: &ListEntries) {
    if entries.is_empty() {
        println!("(no {} entries)", entries.kind());
        return;
    }

    match entries {
        ListEntries::Whitelist(list) => {
            for entry in list {
                println!("{}  {}", entry.player.name, entry.player.uuid);
            }
        }
        ListEntries::Bans(list) => {
            for entry in list {
                let expires = match entry.expires {
                    BanExpiry::Never => timestamp::FOREVER.to_string(),
                    BanExpiry::At(at) => timestamp::format(&at),
                };
                println!(
                    "{}  by {} until {}: {}",
                    entry.player.name, entry.source, expires, entry.reason
                );
            }
        }
        ListEntries::Ops(list) => {
            for entry in list {
                println!("{}  level {}", entry.player.name, entry.level.value());
            }
        }
    }
}
