use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use identity_counter::{
    CounterKey, CounterRegistry, DurabilityMode, MemoryCounterStore, RegistryConfig,
    SequenceOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "counterctl")]
#[command(about = "Inspect and maintain a durable identity counter store")]
struct Cli {
    /// Directory holding counters.wal / counters.snapshot
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON registry config; --data-dir and --collection override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CounterArgs {
    #[arg(long)]
    entity: String,
    #[arg(long, default_value = "_id")]
    field: String,
}

#[derive(Args)]
struct SequenceArgs {
    #[command(flatten)]
    counter: CounterArgs,
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    start_at: i64,
    #[arg(long, default_value_t = 1)]
    increment_by: i64,
}

impl SequenceArgs {
    fn options(&self) -> SequenceOptions {
        SequenceOptions::new(self.counter.entity.clone())
            .field(self.counter.field.clone())
            .start_at(self.start_at)
            .increment_by(self.increment_by)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print every counter
    List,
    /// Print the stored count of one counter
    Peek {
        #[command(flatten)]
        counter: CounterArgs,
    },
    /// Print the value the next created entity would receive
    Next {
        #[command(flatten)]
        sequence: SequenceArgs,
    },
    /// Rewind a counter so the next entity receives --start-at
    Reset {
        #[command(flatten)]
        sequence: SequenceArgs,
    },
    /// Raise a counter's watermark to --value if it is lower
    Raise {
        #[command(flatten)]
        counter: CounterArgs,
        #[arg(long, allow_hyphen_values = true)]
        value: i64,
    },
    /// Write a snapshot and truncate the WAL
    Checkpoint,
}

fn load_config(cli: &Cli) -> Result<RegistryConfig> {
    let mut config = match &cli.config {
        Some(path) => RegistryConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => RegistryConfig::new().durability_mode(DurabilityMode::Sync),
    };
    if let Some(dir) = &cli.data_dir {
        config = config.data_dir(dir);
    }
    if let Some(collection) = &cli.collection {
        config = config.collection(collection);
    }
    if config.data_dir.is_none() {
        bail!("no data directory: pass --data-dir or a config with dataDir");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = Arc::new(MemoryCounterStore::open(&config).context("opening counter store")?);
    let registry = CounterRegistry::open(store.clone(), config)
        .await
        .context("initializing counter registry")?;

    match cli.command {
        Command::List => {
            for record in registry.counters().await? {
                println!("{}\t{}\t{}", record.entity_type, record.field, record.count);
            }
        }
        Command::Peek { counter } => {
            let key = CounterKey::new(counter.entity, counter.field);
            match registry.peek(&key).await? {
                Some(count) => println!("{}", count),
                None => bail!("no counter for {}", key),
            }
        }
        Command::Next { sequence } => {
            let options = sequence.options();
            options.validate()?;
            let next = registry
                .preview_next(&options)
                .await
                .with_context(|| format!("previewing {}", options.key()))?;
            println!("{}", next);
        }
        Command::Reset { sequence } => {
            let options = sequence.options();
            options.validate()?;
            registry
                .reset_to(&options.key(), options.initial_count()?)
                .await
                .with_context(|| format!("resetting {}", options.key()))?;
            println!("{}", options.start_at);
        }
        Command::Raise { counter, value } => {
            let key = CounterKey::new(counter.entity, counter.field);
            if registry.peek(&key).await?.is_none() {
                bail!("no counter for {}", key);
            }
            let raised = registry.raise_to(&key, value).await?;
            println!("{}", if raised { "raised" } else { "unchanged" });
        }
        Command::Checkpoint => {
            store.checkpoint().await?;
            println!("ok");
        }
    }

    Ok(())
}
