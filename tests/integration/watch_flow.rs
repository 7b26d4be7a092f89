use std::time::Duration;

use workgraph::watch::watcher::{process_batch, FsWatcher, WatchOptions};
use workgraph::workspace::Workspace;

use crate::write_workspace;

fn start(root: &std::path::Path) -> (Workspace, FsWatcher) {
    let ws = Workspace::load(root).unwrap();
    let watcher = FsWatcher::start(
        &ws.root,
        &WatchOptions {
            debounce: Duration::from_millis(150),
            extra_ignore: Vec::new(),
        },
    )
    .unwrap();
    // Let the backend arm before mutating the tree.
    std::thread::sleep(Duration::from_millis(250));
    (ws, watcher)
}

#[test]
fn burst_of_changes_coalesces_into_one_batch() {
    let tmp = tempfile::tempdir().unwrap();
    write_workspace(
        tmp.path(),
        &["packages/*"],
        &[
            ("packages/a", r#"{ "name": "a" }"#),
            ("packages/b", r#"{ "name": "b" }"#),
        ],
    );
    let (ws, watcher) = start(tmp.path());

    for i in 0..5 {
        std::fs::write(
            ws.projects["a"].abs_path.join(format!("f{}.ts", i)),
            "export {};",
        )
        .unwrap();
    }
    for i in 0..5 {
        std::fs::write(
            ws.projects["b"].abs_path.join(format!("g{}.ts", i)),
            "export {};",
        )
        .unwrap();
    }

    let paths = watcher
        .batches
        .recv_timeout(Duration::from_secs(5))
        .expect("no batch arrived");
    let batch = process_batch(&ws, &paths);
    assert_eq!(batch.projects.iter().collect::<Vec<_>>(), ["a", "b"]);
    assert!(!batch.escalated);

    // The burst produced exactly one batch.
    assert!(watcher
        .batches
        .recv_timeout(Duration::from_millis(400))
        .is_err());
}

#[test]
fn root_manifest_change_escalates_to_all_projects() {
    let tmp = tempfile::tempdir().unwrap();
    write_workspace(
        tmp.path(),
        &["packages/*"],
        &[
            ("packages/a", r#"{ "name": "a" }"#),
            ("packages/b", r#"{ "name": "b" }"#),
        ],
    );
    let (ws, watcher) = start(tmp.path());

    std::fs::write(
        ws.root.join("package.json"),
        r#"{ "name": "root", "workspaces": ["packages/*"], "private": true }"#,
    )
    .unwrap();

    let paths = watcher
        .batches
        .recv_timeout(Duration::from_secs(5))
        .expect("no batch arrived");
    let batch = process_batch(&ws, &paths);
    assert!(batch.escalated);
    assert_eq!(batch.projects.len(), ws.projects.len());
}

#[test]
fn ignored_trees_produce_no_batches() {
    let tmp = tempfile::tempdir().unwrap();
    write_workspace(
        tmp.path(),
        &["packages/*"],
        &[("packages/a", r#"{ "name": "a" }"#)],
    );
    let (ws, watcher) = start(tmp.path());

    let vendored = ws.projects["a"].abs_path.join("node_modules/dep");
    std::fs::create_dir_all(&vendored).unwrap();
    std::fs::write(vendored.join("index.js"), "module.exports = 1;").unwrap();

    // Directory creation events for node_modules itself are ignored, so
    // nothing should flush.
    assert!(watcher
        .batches
        .recv_timeout(Duration::from_millis(600))
        .is_err());
}
