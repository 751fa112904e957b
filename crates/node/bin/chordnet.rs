use std::sync::Arc;

use bytes::Bytes;
use chordnet_core::swarm::RingConfig;
use chordnet_core::swarm::Swarm;
use chordnet_core::swarm::SwarmBuilder;
use chordnet_node::config::Config;
use chordnet_node::config::DEFAULT_CONFIG_PATH;
use chordnet_node::config::DEFAULT_NODE_KEY_PATH;
use chordnet_node::logging::init_logging;
use chordnet_node::logging::LogLevel;
use chordnet_transport::connections::TcpTransport;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(about, version, author)]
struct Cli {
    #[arg(long, default_value_t = LogLevel::Info, value_enum, env)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Write a config file and a fresh node key.
    Init(InitCommand),
    /// Start a node and read commands from stdin.
    Run(RunCommand),
}

#[derive(Args, Debug)]
struct InitCommand {
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_PATH, env)]
    config: String,

    #[arg(long, default_value = DEFAULT_NODE_KEY_PATH, env)]
    node_key: String,

    #[arg(long, env)]
    bind_addr: Option<String>,

    #[arg(long, env)]
    bootstrap: Option<String>,

    #[arg(long)]
    origin: bool,
}

#[derive(Args, Debug)]
struct RunCommand {
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_PATH, env)]
    config: String,

    #[arg(long, env)]
    bind_addr: Option<String>,

    #[arg(long, env, help = "endpoint announced to peers")]
    external_addr: Option<String>,

    #[arg(long, env, help = "endpoint of a node of the ring to join")]
    bootstrap: Option<String>,

    #[arg(long, help = "start a new ring")]
    origin: bool,
}

fn init(args: InitCommand) -> anyhow::Result<()> {
    let mut config = Config::new(&args.node_key);
    if let Some(addr) = args.bind_addr {
        config.bind_addr = addr;
    }
    config.bootstrap = args.bootstrap;
    config.origin = args.origin;

    let key = config.generate_node_key()?;
    let path = config.write_fs(&args.config)?;
    println!("Your config file is saved to: {}", path);
    println!("Your node public key is: {}", hex::encode(key.public_key()));
    Ok(())
}

async fn run(args: RunCommand) -> anyhow::Result<()> {
    let mut config = Config::read_fs(&args.config)?;
    if let Some(addr) = args.bind_addr {
        config.bind_addr = addr;
    }
    if args.external_addr.is_some() {
        config.external_addr = args.external_addr;
    }
    if args.bootstrap.is_some() {
        config.bootstrap = args.bootstrap;
    }
    config.origin |= args.origin;
    if !config.origin && config.bootstrap.is_none() {
        anyhow::bail!("either --origin or --bootstrap is required");
    }

    let node_key = config.load_node_key()?;
    let transport = TcpTransport::bind(&config.bind_addr, config.external_addr.clone()).await?;
    let swarm = Arc::new(
        SwarmBuilder::new(Arc::new(transport))
            .config(RingConfig::from(&config))
            .node_key(node_key)
            .build()?,
    );
    tokio::spawn(swarm.clone().listen());

    if let Some(bootstrap) = config.bootstrap.as_deref().filter(|_| !config.origin) {
        let known = swarm.join(bootstrap).await?;
        tracing::info!("joined through {}", known);
    }

    let stabilizer = swarm.stabilizer();
    tokio::spawn(stabilizer.wait(swarm.stabilize_intervals()));
    println!("node {} listening on {}", swarm.did(), swarm.transport().endpoint());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = handle_command(&swarm, line.trim()).await {
                        println!("error: {}", e);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn handle_command(swarm: &Swarm, line: &str) -> anyhow::Result<()> {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let key = parts.next();
    let value = parts.next();

    match (command, key, value) {
        ("", _, _) => {}
        ("store", Some(key), Some(value)) => {
            let status = swarm.store(key, Bytes::from(value.to_string())).await?;
            println!("{}", status);
        }
        ("update", Some(key), Some(value)) => {
            let status = swarm.update(key, Bytes::from(value.to_string())).await?;
            println!("{}", status);
        }
        ("get", Some(key), None) => match swarm.retrieve(key).await? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("not found"),
        },
        ("drop", Some(key), None) => {
            let dropped = swarm.drop_ownership(key)?;
            println!("{}", if dropped { "dropped" } else { "not owned" });
        }
        ("inspect", None, None) => {
            let inspect = swarm.inspect().await;
            println!("{}", serde_json::to_string_pretty(&inspect)?);
        }
        _ => println!("usage: store <key> <value> | update <key> <value> | get <key> | drop <key> | inspect"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command {
        Command::Init(args) => init(args),
        Command::Run(args) => run(args).await,
    }
}
