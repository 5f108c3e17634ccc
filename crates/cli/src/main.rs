use clap::{Parser, Subcommand};
use herbarium_files::{root_dir_from_env_value, FileClient, FilesConfig, FILES_ROOT_ENV};
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CAT_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "herbarium")]
#[command(about = "Herbarium attachment store CLI")]
struct Cli {
    /// Storage root (defaults to $HERBARIUM_FILES_ROOT, then ./files)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print file metadata as JSON
    Stat {
        /// Path relative to the storage root
        path: String,
    },
    /// Write file contents to stdout
    Cat {
        /// Path relative to the storage root
        path: String,
        /// Start reading at this byte offset
        #[arg(long)]
        offset: Option<u64>,
        /// Read at most this many bytes
        #[arg(long)]
        length: Option<usize>,
    },
    /// Store a local file (or stdin when SOURCE is "-")
    Put {
        /// Path relative to the storage root
        path: String,
        /// Local file to upload
        source: PathBuf,
    },
    /// Delete a file
    Delete {
        /// Path relative to the storage root
        path: String,
    },
    /// Create a directory
    Mkdir {
        /// Path relative to the storage root
        path: String,
    },
}

/// Entry point for the Herbarium attachment CLI
///
/// # Environment Variables
/// - `HERBARIUM_FILES_ROOT`: storage root (default: "files"), overridden by `--root`
/// - `RUST_LOG`: log filter (default directive: "herbarium=info")
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("herbarium=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let root = cli
        .root
        .unwrap_or_else(|| root_dir_from_env_value(std::env::var(FILES_ROOT_ENV).ok()));
    tracing::info!("++ Using attachment root {}", root.display());

    let client = FileClient::new(FilesConfig::with_root(root))?;

    match cli.command {
        Commands::Stat { path } => {
            let info = client.stat(&path).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Cat {
            path,
            offset,
            length,
        } => {
            let mut stdout = tokio::io::stdout();
            cat(&client, &path, offset, length, &mut stdout).await?;
            stdout.flush().await?;
        }
        Commands::Put { path, source } => {
            let written = if source.as_os_str() == "-" {
                client.put(&path, &mut tokio::io::stdin()).await?
            } else {
                let mut file = tokio::fs::File::open(&source).await?;
                client.put(&path, &mut file).await?
            };
            tracing::info!("stored {} bytes at {}", written, path);
        }
        Commands::Delete { path } => {
            client.delete(&path).await?;
            tracing::info!("deleted {}", path);
        }
        Commands::Mkdir { path } => {
            client.mkdir(&path).await?;
            tracing::info!("created directory {}", path);
        }
    }

    Ok(())
}

/// Streams `path` to `out`, optionally starting at `offset` and stopping after `length` bytes.
async fn cat<W>(
    client: &FileClient,
    path: &str,
    offset: Option<u64>,
    length: Option<usize>,
    out: &mut W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut handle = client.get(path).await?;
    if let Some(offset) = offset {
        handle.seek(offset).await?;
    }

    let mut remaining = length.unwrap_or(usize::MAX);
    let mut buf = vec![0u8; CAT_BUFFER_SIZE];

    while remaining > 0 {
        let want = remaining.min(buf.len());
        let outcome = handle.read(&mut buf[..want]).await?;
        out.write_all(&buf[..outcome.n]).await?;
        remaining -= outcome.n;
        if outcome.eof {
            break;
        }
    }

    handle.close().await?;
    Ok(())
}
