//! Command line surface and access-token resolution.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

/// Where a token entered interactively is persisted for next time.
pub const DEFAULT_TOKEN_PATH: &str = "./dropbox_token";

/// Environment variable consulted when no token file is given.
pub const TOKEN_ENV_VAR: &str = "DROPBOX_ACCESS_TOKEN";

/// Port the status endpoint binds when enabled.
pub const STATUS_PORT: u16 = 8080;

#[derive(Parser, Debug, Clone)]
#[command(name = "dropboxfs")]
#[command(about = "Mount a Dropbox account as a FUSE filesystem")]
#[command(version)]
pub struct Cli {
    /// Path to the FUSE mountpoint
    #[arg(short = 'm', long = "mountpoint")]
    pub mountpoint: PathBuf,

    /// Path to a file containing the Dropbox access token
    #[arg(short = 't', long = "token-file")]
    pub token_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Expose runtime metrics over HTTP on port 8080
    #[arg(short = 'e', long = "expose-metrics")]
    pub expose_metrics: bool,
}

/// Resolve the access token: explicit file, then environment, then an
/// interactive prompt whose answer is persisted for next time.
pub fn resolve_token(cli: &Cli) -> Result<String> {
    if let Some(path) = &cli.token_file {
        return read_token_file(path);
    }

    if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let token = prompt_for_token()?;
    persist_token(Path::new(DEFAULT_TOKEN_PATH), &token)?;
    eprintln!(
        "Saved your token to {DEFAULT_TOKEN_PATH}\n\
         dropboxfs can use this file later by providing the flag `-t {DEFAULT_TOKEN_PATH}`"
    );
    Ok(token)
}

/// Read a token file, trimming the trailing newline editors leave behind.
pub fn read_token_file(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("unable to open token file {}", path.display()))?;
    let token = raw.trim().to_string();
    anyhow::ensure!(!token.is_empty(), "token file {} is empty", path.display());
    Ok(token)
}

fn prompt_for_token() -> Result<String> {
    eprint!("Enter Dropbox access token: ");
    std::io::stderr().flush().ok();

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("unable to read token from stdin")?;
    let token = line.trim().to_string();
    anyhow::ensure!(!token.is_empty(), "no token entered");
    Ok(token)
}

/// Persist the token with owner-only permissions.
fn persist_token(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, token)
        .with_context(|| format!("unable to write token into {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("unable to set permissions on {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "sl.abc123\n").unwrap();

        assert_eq!(read_token_file(&path).unwrap(), "sl.abc123");
    }

    #[test]
    fn empty_token_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "\n").unwrap();

        assert!(read_token_file(&path).is_err());
    }

    #[test]
    fn missing_token_file_is_an_error() {
        assert!(read_token_file(Path::new("/nonexistent/token")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn persisted_token_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        persist_token(&path, "sl.abc").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(read_token_file(&path).unwrap(), "sl.abc");
    }
}
