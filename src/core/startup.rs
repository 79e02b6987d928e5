use anyhow::{Context, Result};
use std::path::Path;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::state::AppState;

/// Create the directories the node reads from and writes to
pub async fn prepare_directories(state: &AppState) -> Result<()> {
    let library = &state.config.library;

    state
        .node
        .store()
        .init()
        .await
        .with_context(|| {
            format!("Failed to create shared directory {}", library.shared_dir.display())
        })?;

    create_dir(&library.download_dir).await?;

    let restored = state
        .node
        .rescan_library()
        .await
        .context("Failed to scan library directories")?;

    info!(
        shared_dir = %library.shared_dir.display(),
        download_dir = %library.download_dir.display(),
        restored_files = restored.len(),
        "Library directories ready"
    );

    Ok(())
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory {}", path.display()))
}

/// Start the node's periodic tasks and its peer protocol listener
pub async fn start_services(
    state: &AppState,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let server = &state.config.server;
    let addr = format!("{}:{}", server.bind_address, server.peer_port);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind peer listener to {}", addr))?;

    info!(address = %addr, "Peer listener bound successfully");

    let mut handles = state.node.start(shutdown.clone());
    handles.push(state.node.start_listener(listener, shutdown));

    info!(
        node_id = %state.node.local_peer().id,
        tasks = handles.len(),
        "Background services started"
    );

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use tempfile::TempDir;

    fn create_test_config(dir: &TempDir) -> Config {
        let toml = format!(
            r#"
            [server]
            bind_address = "127.0.0.1"
            http_port = 0
            peer_port = 0
            api_key = "test-api-key"

            [library]
            shared_dir = "{}"
            download_dir = "{}"
            "#,
            dir.path().join("shared").display(),
            dir.path().join("downloads").display()
        );
        toml::from_str(&toml).unwrap()
    }

    #[tokio::test]
    async fn test_prepare_directories() {
        let dir = TempDir::new().unwrap();
        let state = AppState::from_config(create_test_config(&dir));

        prepare_directories(&state).await.unwrap();

        assert!(dir.path().join("shared").is_dir());
        assert!(dir.path().join("downloads").is_dir());
    }

    #[tokio::test]
    async fn test_prepare_directories_indexes_existing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("shared")).unwrap();
        std::fs::write(dir.path().join("shared").join("reading-list.txt"), b"chapter 4").unwrap();
        let state = AppState::from_config(create_test_config(&dir));

        prepare_directories(&state).await.unwrap();

        let files = state.node.index().all();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "reading-list.txt");
        assert!(state.node.store().contains(&files[0].cid));
    }

    #[tokio::test]
    async fn test_start_services_binds_listener() {
        let dir = TempDir::new().unwrap();
        let state = AppState::from_config(create_test_config(&dir));
        let (shutdown, rx) = watch::channel(false);

        let handles = start_services(&state, rx).await.unwrap();
        assert!(!handles.is_empty());

        shutdown.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(std::time::Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
