use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use fetched_results::{
    CheckpointTokenStore, ControllerConfig, EntityId, FetchDescriptor, FetchedResultsController,
    FileTokenStore, HistoryToken, IndexPath, ModelStore, PersistentModel, SortDescriptor,
    StoreConfiguration, TokenEncoding, TokenLocation,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "history-tool")]
#[command(about = "Inspect and manage fetched-results history checkpoints")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Encoding {
    Json,
    Msgpack,
}

impl From<Encoding> for TokenEncoding {
    fn from(value: Encoding) -> Self {
        match value {
            Encoding::Json => TokenEncoding::Json,
            Encoding::Msgpack => TokenEncoding::MessagePack,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the checkpoint stored for a configuration
    Show {
        #[arg(long)]
        store_dir: PathBuf,
        #[arg(long, default_value = "Default")]
        configuration: String,
        #[arg(long, value_enum, default_value_t = Encoding::Json)]
        encoding: Encoding,
    },
    /// Overwrite the checkpoint, or remove it so history replays from the start
    Reset {
        #[arg(long)]
        store_dir: PathBuf,
        #[arg(long, default_value = "Default")]
        configuration: String,
        #[arg(long, value_enum, default_value_t = Encoding::Json)]
        encoding: Encoding,
        #[arg(long)]
        token: Option<u64>,
    },
    /// Run a small in-memory session and print the resulting sections
    Demo {
        #[arg(long)]
        store_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Show {
            store_dir,
            configuration,
            encoding,
        } => show(store(&store_dir, &configuration, encoding)).await,
        Command::Reset {
            store_dir,
            configuration,
            encoding,
            token,
        } => reset(store(&store_dir, &configuration, encoding), token).await,
        Command::Demo { store_dir } => demo(store_dir).await,
    }
}

fn store(store_dir: &Path, configuration: &str, encoding: Encoding) -> FileTokenStore {
    FileTokenStore::new(TokenLocation::new(store_dir, configuration)).with_encoding(encoding.into())
}

async fn show(store: FileTokenStore) -> Result<()> {
    let path = store.path();
    if !path.exists() {
        println!("No checkpoint at {}", path.display());
        return Ok(());
    }
    match store.read().await {
        Some(token) => println!("Checkpoint {} ({})", token, path.display()),
        None => println!("Checkpoint at {} is unreadable; replay restarts from the beginning", path.display()),
    }
    Ok(())
}

async fn reset(store: FileTokenStore, token: Option<u64>) -> Result<()> {
    match token {
        Some(sequence) => {
            store
                .write(HistoryToken::new(sequence))
                .await
                .with_context(|| format!("Failed to write checkpoint to '{}'", store.path().display()))?;
            println!("Checkpoint set to #{}", sequence);
        }
        None => {
            store
                .reset()
                .await
                .with_context(|| format!("Failed to remove '{}'", store.path().display()))?;
            println!("Checkpoint removed");
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Person {
    id: EntityId,
    name: String,
    role: String,
}

impl PersistentModel for Person {
    fn persistent_id(&self) -> EntityId {
        self.id.clone()
    }

    fn value_for_key_path(&self, key_path: &str) -> Option<String> {
        match key_path {
            "name" => Some(self.name.clone()),
            "role" => Some(self.role.clone()),
            _ => None,
        }
    }
}

fn person(name: &str, role: &str) -> Person {
    Person {
        id: EntityId::generate(),
        name: name.to_string(),
        role: role.to_string(),
    }
}

async fn demo(store_dir: PathBuf) -> Result<()> {
    let configuration = StoreConfiguration::new("Default", "People", store_dir.join("people.store"));
    let store = Arc::new(ModelStore::<Person>::new("People", vec![configuration]));
    let tokens = FileTokenStore::for_configurations(store.configurations(), store.schema())?;
    // The demo store starts with empty history, so a stale checkpoint would hide it.
    tokens.reset().await?;
    println!("Checkpoint file: {}", tokens.path().display());

    for (name, role) in [("Ada", "admin"), ("Grace", "user"), ("Linus", "user")] {
        store.insert(person(name, role))?;
    }
    store.save_as(Some("demo"))?;

    let controller = FetchedResultsController::with_config(
        FetchDescriptor::new().sort_by(SortDescriptor::by_key(|p: &Person| p.name.clone())),
        store.clone(),
        Arc::new(tokens),
        ControllerConfig::new().section_key_path("role"),
    );
    controller.fetch().await?;
    let mut changes = controller.changes();

    store.insert(person("Barbara", "admin"))?;
    store.save_as(Some("demo"))?;
    let kind = tokio::time::timeout(Duration::from_secs(5), changes.next())
        .await
        .map_err(|_| anyhow!("Timed out waiting for the replay"))?;
    println!("Observed change: {:?}", kind);

    for (section_index, section) in controller.sections().iter().enumerate() {
        println!("[{}]", section.name);
        for item in 0..section.number_of_objects() {
            let model = controller.object(IndexPath::new(section_index, item))?;
            println!("  {}", model.name);
        }
    }
    println!("Stats: {:?}", controller.stats());
    controller.stop_monitoring().await?;
    Ok(())
}
