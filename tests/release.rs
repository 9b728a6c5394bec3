// ABOUTME: Integration tests for release publishing and activation.
// ABOUTME: Runs real shell commands in a temp directory to observe the current pointer during swaps.

mod support;

use slipway::config::DeploymentConfig;
use slipway::error::Error;
use slipway::release::{CurrentPointer, PublishError, ReleasePublisher, ReleaseStamp};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use support::{FakeHost, LocalHost};

fn local_config(base: &Path, source: &Path) -> DeploymentConfig {
    let mut config = support::config(source);
    config.app_base = base.to_string_lossy().into_owned();
    config.target.user = support::current_user();
    config
}

fn stamp(s: &str) -> ReleaseStamp {
    ReleaseStamp::parse(s).unwrap()
}

#[tokio::test]
async fn first_publish_creates_release_and_pointer() {
    support::init_tracing();
    let base = tempfile::tempdir().unwrap();
    let source = support::source_tree(&[
        ("Dockerfile", "FROM scratch\n"),
        ("app/main.py", "print()\n"),
    ]);
    let config = local_config(base.path(), source.path());

    let release = ReleasePublisher::new(&config)
        .publish(&LocalHost, source.path(), &stamp("20250101000000"))
        .await
        .unwrap();

    assert_eq!(release.name, "main-20250101000000");
    let dir = base.path().join("releases/main-20250101000000");
    assert!(dir.join("app/main.py").exists());

    let current = base.path().join("current");
    assert_eq!(std::fs::read_link(&current).unwrap(), dir);
    assert!(current.join("Dockerfile").exists());

    // Group-readable, world-denied.
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(dir.join("Dockerfile")).unwrap().permissions().mode();
    assert_eq!(mode & 0o007, 0);
    assert_eq!(mode & 0o040, 0o040);

    assert_eq!(
        CurrentPointer::read(&LocalHost, &config).await.unwrap(),
        Some(dir.to_string_lossy().into_owned())
    );
}

#[tokio::test]
async fn current_is_never_missing_or_partial() {
    let base = tempfile::tempdir().unwrap();
    let source = support::source_tree(&[
        ("marker", "ready\n"),
        ("a/b/c.txt", "nested\n"),
        ("big.bin", &"x".repeat(256 * 1024)),
    ]);
    let config = local_config(base.path(), source.path());
    let current: PathBuf = base.path().join("current");

    let stop = Arc::new(AtomicBool::new(false));
    let observer = {
        let stop = stop.clone();
        let current = current.clone();
        std::thread::spawn(move || {
            let mut seen = false;
            let mut observations = 0u64;
            while !stop.load(Ordering::SeqCst) {
                match std::fs::read_link(&current) {
                    Ok(target) => {
                        seen = true;
                        let marker = std::fs::read_to_string(target.join("marker"))
                            .expect("current points at a release without its files");
                        assert_eq!(marker, "ready\n");
                        observations += 1;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        assert!(!seen, "current disappeared after it was created");
                    }
                    Err(e) => panic!("unexpected error reading current: {e}"),
                }
            }
            observations
        })
    };

    let publisher = ReleasePublisher::new(&config);
    let stamps = [
        "20250101000000",
        "20250101000001",
        "20250101000002",
        "20250101000003",
        "20250101000004",
        "20250101000005",
    ];
    for s in stamps {
        publisher
            .publish(&LocalHost, source.path(), &stamp(s))
            .await
            .unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    let observations = observer.join().expect("observer saw a broken pointer");
    assert!(observations > 0);

    assert_eq!(
        std::fs::read_link(&current).unwrap(),
        base.path().join("releases/main-20250101000005")
    );
    // Older releases stay on disk.
    for s in stamps {
        assert!(base.path().join(format!("releases/main-{s}")).is_dir());
    }
    // No staging links left behind.
    let leftovers: Vec<_> = std::fs::read_dir(base.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(".current-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn existing_release_is_refused() {
    let base = tempfile::tempdir().unwrap();
    let source = support::source_tree(&[("marker", "v1\n")]);
    let config = local_config(base.path(), source.path());
    let publisher = ReleasePublisher::new(&config);

    publisher
        .publish(&LocalHost, source.path(), &stamp("20250101000000"))
        .await
        .unwrap();
    std::fs::write(source.path().join("marker"), "v2\n").unwrap();

    let err = publisher
        .publish(&LocalHost, source.path(), &stamp("20250101000000"))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::ReleaseExists { .. }));
    assert_eq!(Error::from(err).exit_code(), 45);

    let marker = base.path().join("releases/main-20250101000000/marker");
    assert_eq!(std::fs::read_to_string(marker).unwrap(), "v1\n");
}

#[tokio::test]
async fn failed_transfer_keeps_previous_release_active() {
    let base = tempfile::tempdir().unwrap();
    let source = support::source_tree(&[("marker", "v1\n")]);
    let config = local_config(base.path(), source.path());
    let publisher = ReleasePublisher::new(&config);

    publisher
        .publish(&LocalHost, source.path(), &stamp("20250101000000"))
        .await
        .unwrap();

    let missing = base.path().join("no-such-tree");
    let err = publisher
        .publish(&LocalHost, &missing, &stamp("20250102000000"))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Transfer { .. }));
    assert_eq!(Error::from(err).exit_code(), 41);

    assert_eq!(
        std::fs::read_link(base.path().join("current")).unwrap(),
        base.path().join("releases/main-20250101000000")
    );
    // The abandoned release directory is left for inspection.
    assert!(base.path().join("releases/main-20250102000000").is_dir());
}

#[tokio::test]
async fn publish_commands_run_in_order() {
    let source = support::source_tree(&[("Dockerfile", "FROM scratch\n")]);
    let config = support::config(source.path());
    let host = FakeHost::new();

    ReleasePublisher::new(&config)
        .publish(&host, source.path(), &stamp("20250101000000"))
        .await
        .unwrap();

    let mkdir = host.position("mkdir /opt/shop/releases/main-20250101000000").unwrap();
    let rsync = host.position("rsync ").unwrap();
    let chmod = host.position("chmod -R u=rwX,g=rX,o=").unwrap();
    let swap = host.position("mv -Tf").unwrap();
    assert!(mkdir < rsync && rsync < chmod && chmod < swap);

    host.with_state(|state| {
        let transfer = &state.transfers[0];
        assert!(transfer.mirror_delete);
        assert!(transfer.excludes.contains(&".git/".to_string()));
        assert_eq!(transfer.remote, "/opt/shop/releases/main-20250101000000");
        assert_eq!(
            state.links.get("/opt/shop/current").map(String::as_str),
            Some("/opt/shop/releases/main-20250101000000")
        );
    });
}

#[tokio::test]
async fn failed_activation_maps_to_publish_band() {
    let source = support::source_tree(&[("Dockerfile", "FROM scratch\n")]);
    let config = support::config(source.path());
    let host = FakeHost::new();
    host.respond("mv -Tf", support::failed(1, "mv: cannot move"));

    let err = ReleasePublisher::new(&config)
        .publish(&host, source.path(), &stamp("20250101000000"))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Activation { .. }));
    assert_eq!(Error::from(err).exit_code(), 43);
    host.with_state(|state| assert!(state.links.is_empty()));
}
