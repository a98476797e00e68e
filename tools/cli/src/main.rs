//! MarkVault CLI - Command line interface for the encrypted bookmark vault.
//!
//! This tool creates and unlocks a vault, edits its bookmark tree, moves
//! encrypted backups in and out, and offers an interactive shell that locks
//! itself after a period of inactivity.

mod shell;

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use markvault_common::{Error, IndexPath};
use markvault_crypto::KdfParams;
use markvault_storage::create_default_registry;
use markvault_vault::{Node, Position, Scope, Session, Tree, Vault, VaultSettings};

#[derive(Parser)]
#[command(name = "markvault")]
#[command(about = "MarkVault - Encrypted bookmark vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the vault (default: platform data directory).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// JSON settings file.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Init {
        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long)]
        strength: Option<String>,
    },

    /// List bookmarks, one page at a time.
    List {
        /// Folder path (default: whole tree).
        #[arg(short, long, default_value = "/")]
        folder: String,

        /// Only bookmarks whose title or URL contains this text.
        #[arg(short, long, default_value = "")]
        query: String,

        /// Page number, starting at 1.
        #[arg(short, long, default_value_t = 1)]
        page: usize,
    },

    /// Show the folder structure with paths.
    Tree {
        /// Folder path (default: whole tree).
        #[arg(default_value = "/")]
        folder: String,
    },

    /// Add a bookmark.
    Add {
        /// Bookmark URL.
        url: String,

        /// Bookmark title (default: the URL).
        #[arg(short, long, default_value = "")]
        title: String,

        /// Parent folder path.
        #[arg(short, long, default_value = "/")]
        parent: String,
    },

    /// Create a folder.
    Mkdir {
        /// Folder name.
        name: String,

        /// Parent folder path.
        #[arg(short, long, default_value = "/")]
        parent: String,
    },

    /// Rename a folder or retitle a bookmark.
    Rename {
        /// Path of the node.
        path: String,

        /// New name.
        name: String,
    },

    /// Change a bookmark's title and URL.
    Edit {
        /// Path of the bookmark.
        path: String,

        /// New URL.
        #[arg(short, long)]
        url: String,

        /// New title.
        #[arg(short, long)]
        title: String,
    },

    /// Remove folders or bookmarks.
    Remove {
        /// Paths to remove.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Move folders or bookmarks.
    Move {
        /// Paths to move.
        #[arg(required = true)]
        sources: Vec<String>,

        /// Destination path.
        #[arg(short, long)]
        to: String,

        /// "before", "after", or "inside" the destination.
        #[arg(short, long, default_value = "inside")]
        position: String,
    },

    /// Search bookmark titles and URLs.
    Search {
        /// Text to look for (case-insensitive).
        query: String,

        /// Restrict to a folder.
        #[arg(short, long, default_value = "/")]
        folder: String,
    },

    /// Count bookmarks and folders.
    Count {
        /// Folder path (default: whole tree).
        #[arg(default_value = "/")]
        folder: String,
    },

    /// Check a password without changing anything.
    Verify,

    /// Change the master password.
    ChangePassword,

    /// Write the encrypted vault to a backup file.
    Export {
        /// Output file.
        output: PathBuf,
    },

    /// Replace the vault with an encrypted backup file.
    Import {
        /// Backup file.
        input: PathBuf,
    },

    /// Import a Chromium "Bookmarks" file.
    ImportChrome {
        /// Path of the Bookmarks file.
        input: PathBuf,
    },

    /// Unlock once and run commands interactively.
    Shell,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "markvault", &mut std::io::stdout());
        return Ok(());
    }

    let settings = load_settings(cli.settings.as_deref())?;
    let vault = open_vault(cli.store.as_deref(), settings)?;

    match cli.command {
        Commands::Init { strength } => cmd_init(vault, strength.as_deref()).await,

        Commands::List {
            folder,
            query,
            page,
        } => cmd_list(&vault, &folder, &query, page).await,

        Commands::Tree { folder } => cmd_tree(&vault, &folder).await,

        Commands::Add { url, title, parent } => cmd_add(&vault, &parent, &title, &url).await,

        Commands::Mkdir { name, parent } => cmd_mkdir(&vault, &parent, &name).await,

        Commands::Rename { path, name } => cmd_rename(&vault, &path, &name).await,

        Commands::Edit { path, url, title } => cmd_edit(&vault, &path, &title, &url).await,

        Commands::Remove { paths } => cmd_remove(&vault, &paths).await,

        Commands::Move {
            sources,
            to,
            position,
        } => cmd_move(&vault, &sources, &to, &position).await,

        Commands::Search { query, folder } => cmd_search(&vault, &query, &folder).await,

        Commands::Count { folder } => cmd_count(&vault, &folder).await,

        Commands::Verify => cmd_verify(&vault).await,

        Commands::ChangePassword => cmd_change_password(&vault).await,

        Commands::Export { output } => cmd_export(&vault, &output).await,

        Commands::Import { input } => cmd_import(&vault, &input).await,

        Commands::ImportChrome { input } => cmd_import_chrome(&vault, &input).await,

        Commands::Shell => shell::run(&vault).await,

        Commands::Completions { .. } => Ok(()),
    }
}

/// Read settings from a JSON file, or use the defaults.
fn load_settings(path: Option<&Path>) -> Result<VaultSettings> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings {}", path.display()))?;
            VaultSettings::from_json(&json).context("Invalid settings file")
        }
        None => Ok(VaultSettings::default()),
    }
}

/// Resolve the local store and wrap it in a vault.
fn open_vault(store: Option<&Path>, settings: VaultSettings) -> Result<Vault> {
    let root = match store {
        Some(path) => path.to_path_buf(),
        None => dirs::data_dir()
            .map(|dir| dir.join("markvault"))
            .context("Cannot determine the data directory; pass --store")?,
    };

    let store_config = serde_json::json!({
        "root": root.to_string_lossy()
    });
    let store = create_default_registry()
        .resolve("local", store_config)
        .context("Failed to open vault store")?;

    Ok(Vault::new(store, settings))
}

/// Prompt for password securely.
pub(crate) fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

/// Prompt twice for a new password.
fn prompt_new_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = prompt_password(prompt)?;
    let confirm = prompt_password("Confirm password: ")?;

    if *password != *confirm {
        bail!("Passwords do not match");
    }
    Ok(password)
}

/// Convert a vault error for display, hiding why authentication failed.
pub(crate) fn user_error(error: Error) -> anyhow::Error {
    match error {
        Error::AuthenticationFailure => anyhow!("Wrong password"),
        other => anyhow!(other),
    }
}

pub(crate) fn parse_path(text: &str) -> Result<IndexPath> {
    IndexPath::parse(text).map_err(user_error)
}

/// Prompt for the password and unlock.
async fn unlock(vault: &Vault) -> Result<Session> {
    let password = prompt_password("Enter password: ")?;
    vault
        .unlock(&password)
        .await
        .map_err(user_error)
        .context("Failed to unlock vault")
}

/// Create a new vault.
async fn cmd_init(vault: Vault, strength: Option<&str>) -> Result<()> {
    let mut settings = vault.settings().clone();
    if let Some(strength) = strength {
        settings.kdf = KdfParams::preset(strength).map_err(user_error)?;
    }
    let vault = Vault::new(vault.store().clone(), settings);

    if vault.exists().await.map_err(user_error)? {
        bail!("A vault already exists in this store");
    }

    let password = prompt_new_password("Enter new password: ")?;
    vault
        .create(&password)
        .await
        .map_err(user_error)
        .context("Failed to create vault")?;

    println!("Vault created successfully!");
    println!("  Store: {}", vault.store().name());
    println!("  KDF memory: {} KiB", vault.settings().kdf.memory_cost);

    Ok(())
}

/// Print one page of bookmarks.
pub(crate) fn print_page(session: &Session, folder: &str, query: &str, page: usize) -> Result<()> {
    let scope = Scope::from(parse_path(folder)?);
    let index = page.max(1) - 1;
    let page = session.page(&scope, query, index).map_err(user_error)?;

    if page.total == 0 {
        println!("No bookmarks.");
        return Ok(());
    }

    for bookmark in &page.items {
        println!("  {}", bookmark.title);
        println!("      {}", bookmark.url);
    }

    let first = index * page.per_page + 1;
    let last = index * page.per_page + page.items.len();
    if page.items.is_empty() {
        println!("Page {} is past the end ({} bookmarks).", index + 1, page.total);
    } else {
        println!("Showing {}-{} of {}.", first, last, page.total);
    }
    if page.has_more {
        println!("More on page {}.", index + 2);
    }
    Ok(())
}

/// Render the folder structure below `folder`.
pub(crate) fn print_tree(session: &Session, folder: &str) -> Result<()> {
    let base = parse_path(folder)?;
    let lines = session
        .read(|tree| render_tree(tree, &base))
        .map_err(user_error)?
        .map_err(user_error)?;

    if lines.is_empty() {
        println!("Folder is empty.");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn render_tree(tree: &Tree, base: &IndexPath) -> markvault_common::Result<Vec<String>> {
    let scope = Scope::from(base.clone());
    let lines = tree
        .walk_scope(&scope)?
        .map(|(path, node)| {
            let indent = "  ".repeat(path.depth() - base.depth() - 1);
            match node {
                Node::Folder(folder) => format!("{}[{}] {}/", indent, path, folder.name),
                Node::Bookmark(bookmark) => {
                    format!("{}[{}] {} <{}>", indent, path, bookmark.title, bookmark.url)
                }
            }
        })
        .collect();
    Ok(lines)
}

/// Print bookmark and folder counts.
pub(crate) fn print_counts(session: &Session, folder: &str) -> Result<()> {
    let path = parse_path(folder)?;
    let bookmarks = session
        .count_bookmarks(&Scope::from(path.clone()))
        .map_err(user_error)?;
    let folders = session.count_folders(&path).map_err(user_error)?;

    println!("{} bookmarks in {} folders", bookmarks, folders);
    Ok(())
}

/// Apply a move of one or several nodes.
pub(crate) async fn apply_move(
    session: &Session,
    sources: &[String],
    to: &str,
    position: &str,
) -> Result<()> {
    let position: Position = position.parse().map_err(user_error)?;
    let destination = parse_path(to)?;
    let sources = sources
        .iter()
        .map(|s| parse_path(s))
        .collect::<Result<Vec<_>>>()?;

    match sources.as_slice() {
        [source] => {
            let new_path = session
                .move_node(source, &destination, position)
                .await
                .map_err(user_error)
                .context("Failed to move")?;
            println!("Moved {} to {}", source, new_path);
        }
        _ => {
            if position != Position::Inside {
                bail!("Several nodes can only be moved inside a folder");
            }
            let moved = session
                .move_many(&sources, &destination)
                .await
                .map_err(user_error)
                .context("Failed to move")?;
            println!("Moved {} items into {}", moved, destination);
        }
    }
    Ok(())
}

/// Remove one or several nodes.
pub(crate) async fn apply_remove(session: &Session, paths: &[String]) -> Result<()> {
    let paths = paths
        .iter()
        .map(|s| parse_path(s))
        .collect::<Result<Vec<_>>>()?;

    match paths.as_slice() {
        [path] => {
            let node = session
                .remove(path)
                .await
                .map_err(user_error)
                .context("Failed to remove")?;
            println!("Removed: {}", node.label());
        }
        _ => {
            let removed = session
                .remove_many(&paths)
                .await
                .map_err(user_error)
                .context("Failed to remove")?;
            println!("Removed {} items", removed);
        }
    }
    Ok(())
}

/// List bookmarks.
async fn cmd_list(vault: &Vault, folder: &str, query: &str, page: usize) -> Result<()> {
    let session = unlock(vault).await?;
    print_page(&session, folder, query, page)
}

/// Show the folder structure.
async fn cmd_tree(vault: &Vault, folder: &str) -> Result<()> {
    let session = unlock(vault).await?;
    print_tree(&session, folder)
}

/// Add a bookmark.
async fn cmd_add(vault: &Vault, parent: &str, title: &str, url: &str) -> Result<()> {
    let parent = parse_path(parent)?;
    let session = unlock(vault).await?;

    let path = session
        .add_bookmark(&parent, title, url)
        .await
        .map_err(user_error)
        .context("Failed to add bookmark")?;

    println!("Bookmark added at {}", path);
    Ok(())
}

/// Create a folder.
async fn cmd_mkdir(vault: &Vault, parent: &str, name: &str) -> Result<()> {
    let parent = parse_path(parent)?;
    let session = unlock(vault).await?;

    let path = session
        .add_folder(&parent, name)
        .await
        .map_err(user_error)
        .context("Failed to create folder")?;

    println!("Folder created at {}", path);
    Ok(())
}

/// Rename a node.
async fn cmd_rename(vault: &Vault, path: &str, name: &str) -> Result<()> {
    let path = parse_path(path)?;
    let session = unlock(vault).await?;

    session
        .rename(&path, name)
        .await
        .map_err(user_error)
        .context("Failed to rename")?;

    println!("Renamed {}", path);
    Ok(())
}

/// Edit a bookmark.
async fn cmd_edit(vault: &Vault, path: &str, title: &str, url: &str) -> Result<()> {
    let path = parse_path(path)?;
    let session = unlock(vault).await?;

    session
        .update_bookmark(&path, title, url)
        .await
        .map_err(user_error)
        .context("Failed to edit bookmark")?;

    println!("Bookmark updated: {}", path);
    Ok(())
}

/// Remove nodes.
async fn cmd_remove(vault: &Vault, paths: &[String]) -> Result<()> {
    let session = unlock(vault).await?;
    apply_remove(&session, paths).await
}

/// Move nodes.
async fn cmd_move(vault: &Vault, sources: &[String], to: &str, position: &str) -> Result<()> {
    let session = unlock(vault).await?;
    apply_move(&session, sources, to, position).await
}

/// Search bookmarks.
async fn cmd_search(vault: &Vault, query: &str, folder: &str) -> Result<()> {
    let session = unlock(vault).await?;
    print_page(&session, folder, query, 1)
}

/// Count bookmarks and folders.
async fn cmd_count(vault: &Vault, folder: &str) -> Result<()> {
    let session = unlock(vault).await?;
    print_counts(&session, folder)
}

/// Verify a password.
async fn cmd_verify(vault: &Vault) -> Result<()> {
    let password = prompt_password("Enter password: ")?;
    if vault.verify_password(&password).await.map_err(user_error)? {
        println!("Password is correct.");
        Ok(())
    } else {
        bail!("Wrong password")
    }
}

/// Change vault password.
async fn cmd_change_password(vault: &Vault) -> Result<()> {
    info!("Changing vault password");

    let old_password = prompt_password("Enter current password: ")?;
    let session = vault
        .unlock(&old_password)
        .await
        .map_err(user_error)
        .context("Failed to unlock vault")?;

    let new_password = prompt_new_password("Enter new password: ")?;
    session
        .change_password(&old_password, &new_password)
        .await
        .map_err(user_error)
        .context("Failed to change password")?;

    println!("Password changed successfully!");
    Ok(())
}

/// Export the encrypted vault.
async fn cmd_export(vault: &Vault, output: &Path) -> Result<()> {
    let backup = vault.export().await.map_err(user_error)?;
    tokio::fs::write(output, &backup)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Backup written to {} ({} bytes)", output.display(), backup.len());
    Ok(())
}

/// Import an encrypted backup.
async fn cmd_import(vault: &Vault, input: &Path) -> Result<()> {
    let backup = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    vault
        .import(&backup)
        .await
        .map_err(user_error)
        .context("Failed to import backup")?;

    println!("Backup imported. Unlock it with the password it was created with.");
    Ok(())
}

/// Import a Chromium bookmarks file.
async fn cmd_import_chrome(vault: &Vault, input: &Path) -> Result<()> {
    let json = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let session = unlock(vault).await?;

    let before = session.count_bookmarks(&Scope::All).map_err(user_error)?;
    let folders = vault
        .import_chromium(&session, &json)
        .await
        .map_err(user_error)
        .context("Failed to import bookmarks")?;
    let after = session.count_bookmarks(&Scope::All).map_err(user_error)?;

    println!(
        "Imported {} bookmarks in {} top-level folders",
        after - before,
        folders
    );
    Ok(())
}
