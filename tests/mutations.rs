use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use asset_vfs::{
    BroadcastPort, MutationRequest, RetryPolicy, SyncConfig, SyncError, SyncSession,
};
use tempfile::TempDir;

fn write(path: impl AsRef<Path>, bytes: &[u8]) {
    let path = path.as_ref();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        retry: RetryPolicy::fixed(2, Duration::from_millis(10)),
        ..Default::default()
    }
}

async fn setup() -> Result<(TempDir, PathBuf, SyncSession)> {
    let temp = TempDir::new()?;
    let ws = dunce::canonicalize(temp.path())?;
    write(
        ws.join("games/demo/thing-project.json"),
        br#"{"libs": ["libs/one", "libs/two"]}"#,
    );
    write(ws.join("libs/one/img/a.png"), b"H1");
    write(ws.join("libs/two/img/a.png"), b"H2 differs");
    write(ws.join("games/demo/img/hero.png"), b"hero");

    let port = Arc::new(BroadcastPort::new());
    let session = SyncSession::open(&ws, "demo", fast_config(), port).await?;
    Ok((temp, ws, session))
}

fn backups_in(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("~deleted("))
        .collect()
}

#[tokio::test]
async fn saving_a_new_file_indexes_it() -> Result<()> {
    let (_temp, ws, session) = setup().await?;

    let outcome = session
        .mutate(MutationRequest::Save {
            path: "/demo/scenes/level1.json".into(),
            bytes: b"{\"objects\": []}".to_vec(),
        })
        .await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(serde_json::to_string(&outcome)?, "{}");

    let physical = ws.join("games/demo/scenes/level1.json");
    assert!(physical.is_file());
    assert!(session.namespace().contains("/demo/scenes/level1.json"));
    let folders = session.namespace().folders().to_vec();
    assert!(folders.iter().any(|f| f.path == physical.parent().unwrap()));

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn saving_a_library_asset_writes_through() -> Result<()> {
    let (_temp, ws, session) = setup().await?;

    session
        .apply(MutationRequest::Save {
            path: "/demo/img/a.png".into(),
            bytes: b"edited".to_vec(),
        })
        .await?;
    assert_eq!(fs::read(ws.join("libs/one/img/a.png"))?, b"edited");
    assert_eq!(session.read("/demo/img/a.png").await?, b"edited");

    // the entry is refreshed in place
    let ns = session.namespace();
    let entry = ns.get("/demo/img/a.png").unwrap();
    let meta = fs::metadata(ws.join("libs/one/img/a.png"))?;
    assert_eq!(entry.size, 6);
    assert_eq!(entry.modified, meta.modified()?);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn deleting_reveals_the_shadowed_copy() -> Result<()> {
    let (_temp, ws, session) = setup().await?;

    session
        .apply(MutationRequest::Delete {
            path: "/demo/img/a.png".into(),
            backup: true,
        })
        .await?;

    assert!(!ws.join("libs/one/img/a.png").exists());
    let backups = backups_in(&ws.join("libs/one/img"));
    assert_eq!(backups.len(), 1);
    assert!(backups[0].starts_with("~deleted(a.png)"));

    assert_eq!(session.resolve_physical("/demo/img/a.png"), ws.join("libs/two/img/a.png"));
    assert!(session.collisions().is_empty());
    assert_eq!(session.read("/demo/img/a.png").await?, b"H2 differs");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn deleting_a_missing_file_reports_an_error() -> Result<()> {
    let (_temp, _ws, session) = setup().await?;

    let outcome = session
        .mutate(MutationRequest::Delete {
            path: "/demo/img/nope.png".into(),
            backup: true,
        })
        .await;
    let message = outcome.error.expect("delete should fail");
    assert!(message.contains("does not exist"), "{message}");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn copy_into_the_project() -> Result<()> {
    let (_temp, ws, session) = setup().await?;

    session
        .apply(MutationRequest::Copy {
            from: "/demo/img/hero.png".into(),
            to: "/demo/prefabs/hero-copy.png".into(),
        })
        .await?;
    assert_eq!(fs::read(ws.join("games/demo/prefabs/hero-copy.png"))?, b"hero");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn copying_a_library_asset_creates_a_project_override() -> Result<()> {
    let (_temp, ws, session) = setup().await?;

    session
        .apply(MutationRequest::Copy {
            from: "/demo/img/a.png".into(),
            to: "/demo/img/a.png".into(),
        })
        .await?;

    assert_eq!(fs::read(ws.join("libs/one/img/a.png"))?, b"H1");
    assert_eq!(fs::read(ws.join("games/demo/img/a.png"))?, b"H1");
    assert_eq!(session.resolve_physical("/demo/img/a.png"), ws.join("games/demo/img/a.png"));
    assert_eq!(session.read("/demo/img/a.png").await?, b"H1");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn copying_a_project_file_onto_itself_keeps_it() -> Result<()> {
    let (_temp, ws, session) = setup().await?;

    session
        .apply(MutationRequest::Copy {
            from: "/demo/img/hero.png".into(),
            to: "/demo/img/hero.png".into(),
        })
        .await?;
    assert_eq!(fs::read(ws.join("games/demo/img/hero.png"))?, b"hero");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_surface_the_attempt_count() -> Result<()> {
    let (_temp, ws, session) = setup().await?;
    write(ws.join("games/demo/scripts"), b"a file where a folder should be");

    let err = session
        .apply(MutationRequest::Save {
            path: "/demo/scripts/boot.js".into(),
            bytes: b"boot()".to_vec(),
        })
        .await
        .unwrap_err();
    match err {
        SyncError::FileOperation { attempts, path, .. } => {
            assert_eq!(attempts, 2);
            assert_eq!(path, ws.join("games/demo/scripts/boot.js"));
        }
        other => panic!("unexpected error: {other}"),
    }

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn reload_picks_up_new_libraries() -> Result<()> {
    let (_temp, ws, session) = setup().await?;
    write(ws.join("libs/three/img/extra.png"), b"extra");
    assert!(!session.namespace().contains("/demo/img/extra.png"));

    write(
        ws.join("games/demo/thing-project.json"),
        br#"{"libs": ["libs/one", "libs/two", "libs/three"]}"#,
    );
    let descriptor = session.reload_project().await?;
    assert_eq!(descriptor.libs.len(), 3);
    assert!(session.namespace().contains("/demo/img/extra.png"));

    // a broken reload keeps the previous state
    write(
        ws.join("games/demo/thing-project.json"),
        br#"{"libs": ["libs/one", "libs/missing"]}"#,
    );
    let err = session.reload_project().await.unwrap_err();
    assert!(matches!(err, SyncError::MissingLibrary { .. }));
    assert_eq!(session.descriptor().libs.len(), 3);
    assert!(session.namespace().contains("/demo/img/extra.png"));

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn closed_sessions_refuse_commands() -> Result<()> {
    let (_temp, _ws, session) = setup().await?;
    session.close().await;
    session.close().await;

    assert!(session.is_closed());
    assert!(matches!(session.rebuild().await, Err(SyncError::SessionClosed)));
    // lookups keep working on the last snapshot
    assert!(session.namespace().contains("/demo/img/hero.png"));
    Ok(())
}
