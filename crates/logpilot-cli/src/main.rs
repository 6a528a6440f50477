use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use logpilot_agent::Router;
use logpilot_core::{AppConfig, EventEnvelope, EventKind, Session};
use logpilot_llm::HttpReasoningClient;
use logpilot_observe::Observer;
use logpilot_policy::SafetyGuard;
use logpilot_remote::{HostRegistry, RemoteSession};
use logpilot_tools::ToolRegistry;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "logpilot")]
#[command(about = "Sysadmin chat agent with guarded remote command execution", long_about = None)]
struct Cli {
    /// Workspace directory holding .logpilot/ config and logs.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Mirror the event log to stderr.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and print the answer.
    Ask { prompt: String },
    /// Interactive chat session.
    Chat,
    /// List the registered remote hosts.
    Hosts,
    /// Fetch one file from a registered host to a local path.
    Fetch {
        host: String,
        remote_path: String,
        local_path: PathBuf,
    },
    /// Write a default config file to the workspace.
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Ask { ref prompt } => {
            let (router, hosts) = build_router(&cli)?;
            let mut session = Session::new();
            if cli.verbose {
                announce_host_hint(&router, &hosts, &prompt);
            }
            let answer = router.handle_turn(&mut session, &prompt)?;
            println!("{answer}");
            Ok(())
        }
        Commands::Chat => run_chat(&cli),
        Commands::Hosts => run_hosts(&cli),
        Commands::Fetch {
            ref host,
            ref remote_path,
            ref local_path,
        } => run_fetch(&cli, host, remote_path, local_path),
        Commands::Init => run_init(&cli),
    }
}

fn build_router(cli: &Cli) -> Result<(Router, HostRegistry)> {
    let cfg = AppConfig::load(&cli.workspace).context("failed to load config")?;
    let hosts_path = cfg.hosts_path(&cli.workspace);
    let hosts = if hosts_path.exists() {
        HostRegistry::load(&hosts_path)?
    } else {
        HostRegistry::default()
    };

    let client = Arc::new(HttpReasoningClient::new(cfg.llm.clone())?);
    let guard = SafetyGuard::new(client.clone(), &cfg.llm.model, &cfg.guard);
    let tools = ToolRegistry::new(hosts.clone(), cfg.tools.clone());

    let mut observer = Observer::new(&cli.workspace)?;
    observer.set_verbose(cli.verbose);

    let router = Router::new(client, tools, guard, cfg.llm).with_observer(observer);
    Ok((router, hosts))
}

/// Say which server the question seems to be about, and flag names missing
/// from the host book before a tool call ever fails on them.
fn announce_host_hint(router: &Router, hosts: &HostRegistry, prompt: &str) {
    if hosts.is_empty() {
        return;
    }
    match router.identify_host(prompt) {
        Ok(Some(name)) if hosts.lookup(&name).is_err() => {
            eprintln!("[logpilot] host {name:?} is not in the host book");
        }
        Ok(Some(name)) => eprintln!("[logpilot] question concerns host {name}"),
        Ok(None) => {}
        Err(e) => eprintln!("[logpilot] host identification failed: {e:#}"),
    }
}

fn run_chat(cli: &Cli) -> Result<()> {
    let (router, hosts) = build_router(cli)?;
    let mut session = Session::new();
    let stdin = io::stdin();
    println!("logpilot chat — empty line or Ctrl-D to exit");
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            break;
        }
        if cli.verbose {
            announce_host_hint(&router, &hosts, prompt);
        }
        match router.handle_turn(&mut session, prompt) {
            Ok(answer) => println!("{answer}"),
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}

fn run_hosts(cli: &Cli) -> Result<()> {
    let cfg = AppConfig::load(&cli.workspace)?;
    let hosts_path = cfg.hosts_path(&cli.workspace);
    if !hosts_path.exists() {
        bail!("no host book at {}", hosts_path.display());
    }
    let hosts = HostRegistry::load(&hosts_path)?;
    if hosts.is_empty() {
        println!("host book is empty");
        return Ok(());
    }
    for name in hosts.host_names() {
        println!("{name}");
    }
    Ok(())
}

fn run_fetch(cli: &Cli, host: &str, remote_path: &str, local_path: &Path) -> Result<()> {
    let cfg = AppConfig::load(&cli.workspace)?;
    let hosts = HostRegistry::load(&cfg.hosts_path(&cli.workspace))?;
    let entry = hosts.lookup(host)?;

    let mut observer = Observer::new(&cli.workspace)?;
    observer.set_verbose(cli.verbose);

    let mut session = RemoteSession::open(host, &entry.username, Path::new(&entry.key_path))?;
    let bytes = session.fetch(remote_path, local_path)?;
    session.close();

    let _ = observer.record_event(&EventEnvelope::now(
        Uuid::now_v7(),
        EventKind::FileFetched {
            remote_path: remote_path.to_string(),
            bytes,
        },
    ));
    if bytes == 0 {
        eprintln!("warning: {remote_path} transferred 0 bytes");
    }
    println!("fetched {remote_path} to {} ({bytes} bytes)", local_path.display());
    Ok(())
}

fn run_init(cli: &Cli) -> Result<()> {
    let path = AppConfig::config_path(&cli.workspace);
    if path.exists() {
        bail!("config already exists at {}", path.display());
    }
    AppConfig::default().save(&cli.workspace)?;
    println!("wrote {}", path.display());
    Ok(())
}
