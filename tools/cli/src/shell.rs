//! Interactive shell over one unlocked session.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use markvault_vault::{SessionGuard, Vault};

use crate::{
    apply_move, apply_remove, parse_path, print_counts, print_page, print_tree, prompt_password,
    user_error,
};

#[derive(Parser)]
#[command(name = "markvault", no_binary_name = true)]
enum ShellCommand {
    /// List bookmarks.
    Ls {
        /// Folder path.
        #[arg(default_value = "/")]
        folder: String,

        /// Page number, starting at 1.
        #[arg(default_value_t = 1)]
        page: usize,

        /// Only bookmarks containing this text.
        #[arg(short, long, default_value = "")]
        query: String,
    },

    /// Show the folder structure.
    Tree {
        #[arg(default_value = "/")]
        folder: String,
    },

    /// Add a bookmark: add <parent> <url> [title...]
    Add {
        parent: String,
        url: String,
        title: Vec<String>,
    },

    /// Create a folder: mkdir <parent> <name...>
    Mkdir {
        parent: String,
        #[arg(required = true)]
        name: Vec<String>,
    },

    /// Rename a node: rename <path> <name...>
    Rename {
        path: String,
        #[arg(required = true)]
        name: Vec<String>,
    },

    /// Edit a bookmark: edit <path> <url> <title...>
    Edit {
        path: String,
        url: String,
        #[arg(required = true)]
        title: Vec<String>,
    },

    /// Remove nodes.
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Move nodes: mv <paths...> --to <path> [--position before|after|inside]
    Mv {
        #[arg(required = true)]
        sources: Vec<String>,
        #[arg(short, long)]
        to: String,
        #[arg(short, long, default_value = "inside")]
        position: String,
    },

    /// Search titles and URLs.
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Count bookmarks and folders.
    Count {
        #[arg(default_value = "/")]
        folder: String,
    },

    /// Show the identifier of a folder.
    Id { path: String },

    /// Change the master password.
    Passwd,

    /// Lock the vault and leave.
    #[command(visible_aliases = ["exit", "quit"])]
    Lock,
}

enum Flow {
    Continue,
    Exit,
}

/// Split a command line into words, honouring single and double quotes.
fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        bail!("Unterminated quote");
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

async fn execute(guard: &SessionGuard, command: ShellCommand) -> Result<Flow> {
    let session = guard.session();

    match command {
        ShellCommand::Ls {
            folder,
            page,
            query,
        } => print_page(session, &folder, &query, page)?,

        ShellCommand::Tree { folder } => print_tree(session, &folder)?,

        ShellCommand::Add { parent, url, title } => {
            let path = session
                .add_bookmark(&parse_path(&parent)?, &title.join(" "), &url)
                .await
                .map_err(user_error)?;
            println!("Bookmark added at {}", path);
        }

        ShellCommand::Mkdir { parent, name } => {
            let path = session
                .add_folder(&parse_path(&parent)?, &name.join(" "))
                .await
                .map_err(user_error)?;
            println!("Folder created at {}", path);
        }

        ShellCommand::Rename { path, name } => {
            session
                .rename(&parse_path(&path)?, &name.join(" "))
                .await
                .map_err(user_error)?;
            println!("Renamed {}", path);
        }

        ShellCommand::Edit { path, url, title } => {
            session
                .update_bookmark(&parse_path(&path)?, &title.join(" "), &url)
                .await
                .map_err(user_error)?;
            println!("Bookmark updated: {}", path);
        }

        ShellCommand::Rm { paths } => apply_remove(session, &paths).await?,

        ShellCommand::Mv {
            sources,
            to,
            position,
        } => apply_move(session, &sources, &to, &position).await?,

        ShellCommand::Search { query } => print_page(session, "/", &query.join(" "), 1)?,

        ShellCommand::Count { folder } => print_counts(session, &folder)?,

        ShellCommand::Id { path } => {
            let id = session.folder_id(&parse_path(&path)?).map_err(user_error)?;
            println!("{}", id);
        }

        ShellCommand::Passwd => {
            let old_password = prompt_password("Enter current password: ")?;
            let new_password = prompt_password("Enter new password: ")?;
            let confirm = prompt_password("Confirm password: ")?;
            if *new_password != *confirm {
                bail!("Passwords do not match");
            }
            session
                .change_password(&old_password, &new_password)
                .await
                .map_err(user_error)
                .context("Failed to change password")?;
            println!("Password changed successfully!");
        }

        ShellCommand::Lock => return Ok(Flow::Exit),
    }

    Ok(Flow::Continue)
}

/// Unlock the vault and read commands until `lock`, end of input or
/// inactivity.
pub async fn run(vault: &Vault) -> Result<()> {
    let session = {
        let password = prompt_password("Enter password: ")?;
        vault
            .unlock(&password)
            .await
            .map_err(user_error)
            .context("Failed to unlock vault")?
    };

    let timeout = vault.settings().inactivity_timeout();
    let guard = SessionGuard::spawn(session, timeout);
    println!(
        "Vault unlocked. Type 'help' for commands. Locks after {} seconds without activity.",
        timeout.as_secs()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("markvault> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        if guard.is_locked() {
            println!("Session locked after inactivity.");
            break;
        }

        let words = match split_words(&line) {
            Ok(words) if words.is_empty() => continue,
            Ok(words) => words,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };

        let command = match ShellCommand::try_parse_from(words) {
            Ok(command) => command,
            Err(e) => {
                let _ = e.print();
                continue;
            }
        };

        match execute(&guard, command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => break,
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }

    guard.lock();
    println!("Vault locked.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words(r#"add 0 https://a.example "Rust  book""#).unwrap(),
            vec!["add", "0", "https://a.example", "Rust  book"]
        );
        assert_eq!(split_words("  ls   ").unwrap(), vec!["ls"]);
        assert_eq!(split_words("rename 1 ''").unwrap(), vec!["rename", "1", ""]);
        assert!(split_words("  ").unwrap().is_empty());
        assert!(split_words("mkdir / 'open").is_err());
    }

    #[test]
    fn test_parse_shell_commands() {
        let command = ShellCommand::try_parse_from(["mv", "0/1", "2", "--to", "3"]).unwrap();
        assert!(matches!(command, ShellCommand::Mv { ref sources, .. } if sources.len() == 2));

        assert!(matches!(
            ShellCommand::try_parse_from(["quit"]).unwrap(),
            ShellCommand::Lock
        ));
        assert!(ShellCommand::try_parse_from(["frobnicate"]).is_err());
    }
}
