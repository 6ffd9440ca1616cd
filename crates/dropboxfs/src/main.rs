//! dropboxfs binary: parse flags, resolve the token, mount, serve until a
//! signal asks us to unmount.

use std::path::Path;
use std::process::Command;
use std::sync::{mpsc, Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dropboxfs::config::{self, Cli, STATUS_PORT};
use dropboxfs::dropbox::{DropboxClient, FolderMeta, RemoteClient};
use dropboxfs::fs::{DropboxFs, NodeCache};
use dropboxfs::http_server::{self, StatusState};
use dropboxfs::sync::ChangeNotifier;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let token = config::resolve_token(&cli)?;

    anyhow::ensure!(
        cli.mountpoint.exists(),
        "mountpoint does not exist: {}",
        cli.mountpoint.display()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;
    let _guard = runtime.enter();

    let client: Arc<dyn RemoteClient> =
        Arc::new(DropboxClient::new(&token).context("failed to build Dropbox client")?);
    let cache = NodeCache::new(client.clone());
    let root = cache.get_or_create_directory(FolderMeta::root());

    let notifier = ChangeNotifier::new(client, cache.clone());
    runtime
        .block_on(notifier.start(""))
        .context("failed to start change polling")?;

    if cli.expose_metrics {
        let state = StatusState {
            cache: cache.clone(),
            notifier: notifier.clone(),
        };
        runtime.spawn(async move {
            if let Err(err) = http_server::serve(state, STATUS_PORT).await {
                warn!(error = %err, "status endpoint stopped");
            }
        });
    }

    let fs = DropboxFs::new(runtime.handle().clone(), cache, root);

    // Clear any stale mount left over from a dirty exit.
    best_effort_unmount(&cli.mountpoint);

    let options = [
        fuser::MountOption::FSName("dropboxfs".to_string()),
        fuser::MountOption::AutoUnmount,
        fuser::MountOption::DefaultPermissions,
    ];

    info!(mountpoint = %cli.mountpoint.display(), "mounting");
    let session = fuser::spawn_mount2(fs, &cli.mountpoint, &options)
        .with_context(|| format!("unable to mount {}", cli.mountpoint.display()))?;
    info!("mount successful, serving");

    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to install signal handler")?;

    match rx.recv() {
        Ok(()) => info!("signal received, unmounting"),
        Err(_) => warn!("signal channel closed unexpectedly"),
    }

    drop(session);
    info!("shut down gracefully");
    Ok(())
}

/// Try to unmount a leftover mount at `mountpoint`; failure just means there
/// was nothing to clean up.
fn best_effort_unmount(mountpoint: &Path) {
    #[cfg(target_os = "linux")]
    let status = Command::new("fusermount").arg("-u").arg(mountpoint).status();

    #[cfg(target_os = "macos")]
    let status = Command::new("umount").arg(mountpoint).status();

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    let status: std::io::Result<std::process::ExitStatus> = Err(std::io::Error::other(
        "no unmount helper for this platform",
    ));

    if let Ok(status) = status {
        if status.success() {
            info!(mountpoint = %mountpoint.display(), "cleaned up stale mount");
        }
    }
}
