//! filecrypt CLI - Command line interface for file encryption.
//!
//! Encrypts and decrypts files on any configured storage backend. Without a
//! configuration file, files are resolved relative to the working directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use filecrypt_common::FileRef;
use filecrypt_crypto::{CipherSpec, Key};
use filecrypt_storage::create_default_registry;
use filecrypt_transform::{CryptConfig, FileCrypt, SourceDisposition, TransformReport};

#[derive(Parser)]
#[command(name = "filecrypt")]
#[command(about = "filecrypt - Encrypt files on local or remote storage")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/filecrypt/config.json if present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend to operate on (default: the configured default backend).
    #[arg(short, long, global = true)]
    backend: Option<String>,

    /// File holding the base64-encoded key.
    #[arg(short, long, global = true)]
    key_file: Option<PathBuf>,

    /// Base64-encoded key, used when no key file is given.
    #[arg(long, env = "FILECRYPT_KEY", hide_env_values = true, global = true)]
    key: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file, deleting the source on success.
    Encrypt {
        /// Source file identifier.
        source: String,

        /// Destination identifier (default: source + ".enc").
        dest: Option<String>,

        /// Keep the source file.
        #[arg(long)]
        keep_source: bool,
    },

    /// Decrypt a file, deleting the source on success.
    Decrypt {
        /// Source file identifier.
        source: String,

        /// Destination identifier (default: source without ".enc", or + ".dec").
        dest: Option<String>,

        /// Keep the source file.
        #[arg(long)]
        keep_source: bool,
    },

    /// Encrypt a file, always keeping the source.
    EncryptCopy {
        /// Source file identifier.
        source: String,

        /// Destination identifier.
        dest: Option<String>,
    },

    /// Decrypt a file, always keeping the source.
    DecryptCopy {
        /// Source file identifier.
        source: String,

        /// Destination identifier.
        dest: Option<String>,
    },

    /// Decrypt a file to standard output.
    Cat {
        /// Source file identifier.
        source: String,
    },

    /// Generate a new random key and print it as base64.
    GenerateKey {
        /// Cipher to size the key for (default: the configured cipher).
        #[arg(long)]
        cipher: Option<CipherSpec>,
    },

    /// Show where an identifier resolves to on the backend.
    Resolve {
        /// File identifier.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `cat` output stays clean.
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;
    let crypt = FileCrypt::from_config(&config, &create_default_registry())
        .context("Failed to configure backends")?;
    let backend = cli
        .backend
        .clone()
        .unwrap_or_else(|| config.default_backend.clone());

    match &cli.command {
        Commands::Encrypt {
            source,
            dest,
            keep_source,
        } => {
            let key = load_key(&cli)?;
            cmd_encrypt(&crypt, &backend, source, dest.as_deref(), &key, !keep_source).await
        }

        Commands::Decrypt {
            source,
            dest,
            keep_source,
        } => {
            let key = load_key(&cli)?;
            cmd_decrypt(&crypt, &backend, source, dest.as_deref(), &key, !keep_source).await
        }

        Commands::EncryptCopy { source, dest } => {
            let key = load_key(&cli)?;
            cmd_encrypt(&crypt, &backend, source, dest.as_deref(), &key, false).await
        }

        Commands::DecryptCopy { source, dest } => {
            let key = load_key(&cli)?;
            cmd_decrypt(&crypt, &backend, source, dest.as_deref(), &key, false).await
        }

        Commands::Cat { source } => {
            let key = load_key(&cli)?;
            cmd_cat(&crypt, &backend, source, &key).await
        }

        Commands::GenerateKey { cipher } => cmd_generate_key(cipher.unwrap_or(crypt.cipher())),

        Commands::Resolve { id } => cmd_resolve(&crypt, &backend, id),
    }
}

/// Load the configuration file, or fall back to a local backend rooted at
/// the working directory.
fn load_config(explicit: Option<&Path>) -> Result<CryptConfig> {
    if let Some(path) = explicit {
        return CryptConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }

    if let Some(path) = dirs::config_dir().map(|dir| dir.join("filecrypt").join("config.json")) {
        if path.is_file() {
            debug!("Using configuration at {}", path.display());
            return CryptConfig::load(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()));
        }
    }

    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    debug!("No configuration file; using local backend at {}", cwd.display());
    Ok(CryptConfig::default_local(cwd))
}

/// Read the key from `--key-file`, or `--key`/`FILECRYPT_KEY`.
fn load_key(cli: &Cli) -> Result<Key> {
    let encoded = match (&cli.key_file, &cli.key) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?,
        (None, Some(key)) => key.clone(),
        (None, None) => {
            anyhow::bail!("No key given. Use --key-file or set FILECRYPT_KEY");
        }
    };
    Key::from_base64(&encoded).context("Invalid key")
}

fn file_ref(id: &str) -> Result<FileRef> {
    FileRef::new(id).with_context(|| format!("Invalid file identifier '{}'", id))
}

fn print_report(verb: &str, report: &TransformReport) {
    println!(
        "{} {} -> {} ({} bytes)",
        verb, report.source, report.destination, report.stats.bytes_written
    );
    match &report.source_disposition {
        SourceDisposition::Kept => {}
        SourceDisposition::Deleted => println!("  Source removed."),
        SourceDisposition::Failed(e) => warn!("{}", e),
    }
}

/// Encrypt a file.
async fn cmd_encrypt(
    crypt: &FileCrypt,
    backend: &str,
    source: &str,
    dest: Option<&str>,
    key: &Key,
    delete_source: bool,
) -> Result<()> {
    info!("Encrypting {} on backend {}", source, backend);

    let source = file_ref(source)?;
    let dest = dest.map(file_ref).transpose()?;

    let report = crypt
        .encrypt(backend, &source, dest.as_ref(), key, delete_source)
        .await
        .context("Encryption failed")?;

    print_report("Encrypted", &report);
    Ok(())
}

/// Decrypt a file.
async fn cmd_decrypt(
    crypt: &FileCrypt,
    backend: &str,
    source: &str,
    dest: Option<&str>,
    key: &Key,
    delete_source: bool,
) -> Result<()> {
    info!("Decrypting {} on backend {}", source, backend);

    let source = file_ref(source)?;
    let dest = dest.map(file_ref).transpose()?;

    let report = crypt
        .decrypt(backend, &source, dest.as_ref(), key, delete_source)
        .await
        .context("Decryption failed")?;

    print_report("Decrypted", &report);
    Ok(())
}

/// Decrypt to stdout.
async fn cmd_cat(crypt: &FileCrypt, backend: &str, source: &str, key: &Key) -> Result<()> {
    let source = file_ref(source)?;
    let stats = crypt
        .decrypt_to_writer(backend, &source, key, tokio::io::stdout())
        .await
        .context("Decryption failed")?;

    debug!("Wrote {} bytes", stats.bytes_written);
    Ok(())
}

fn cmd_generate_key(cipher: CipherSpec) -> Result<()> {
    let key = Key::generate(cipher);
    println!("{}", key.to_base64());
    Ok(())
}

/// Show resolution without touching storage.
fn cmd_resolve(crypt: &FileCrypt, backend: &str, id: &str) -> Result<()> {
    let id = file_ref(id)?;
    let descriptor = crypt
        .resolve(backend, &id)
        .with_context(|| format!("Failed to resolve {}", id))?;

    println!("{}", descriptor);
    Ok(())
}
