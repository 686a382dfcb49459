//! Engine tests against the real inotify backend
//!
//! Each test watches a fresh temp directory and waits (with generous
//! deadlines) for the normalized events to come out of the poller.

#![cfg(target_os = "linux")]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use dirmon::{DirmonError, Engine, EngineConfig, WatchAction, WatchEvent, WatchFlags};
use tempfile::tempdir;

type Seen = Arc<Mutex<Vec<WatchEvent>>>;

fn engine() -> Engine {
    Engine::with_config(EngineConfig {
        debounce_ms: 50,
        ..EngineConfig::default()
    })
    .unwrap()
}

fn watch(engine: &Engine, root: &Path, flags: WatchFlags) -> (dirmon::WatchId, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = engine
        .watch(&root.to_string_lossy(), flags, move |event| {
            sink.lock().unwrap().push(event.clone());
        })
        .unwrap();
    // the poller needs a moment before the first change is observable
    thread::sleep(Duration::from_millis(50));
    (id, seen)
}

fn wait_for(seen: &Seen, pred: impl Fn(&WatchEvent) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if seen.lock().unwrap().iter().any(&pred) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn settle() {
    thread::sleep(Duration::from_millis(400));
}

#[test]
fn test_create_is_reported() {
    let dir = tempdir().unwrap();
    let engine = engine();
    let (id, seen) = watch(&engine, dir.path(), WatchFlags::empty());

    fs::write(dir.path().join("hello.txt"), "hi").unwrap();

    assert!(wait_for(&seen, |e| {
        e.watch_id == id && e.action == WatchAction::Create && e.path == "hello.txt"
    }));
    let root = engine.root_dir(id).unwrap();
    assert!(seen.lock().unwrap().iter().all(|e| e.root_dir == root));
}

#[test]
fn test_repeated_writes_coalesce() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("log.txt");
    fs::write(&file, "").unwrap();
    let engine = engine();
    let (_, seen) = watch(&engine, dir.path(), WatchFlags::empty());

    for i in 0..5 {
        fs::write(&file, format!("line {i}")).unwrap();
    }

    assert!(wait_for(&seen, |e| e.action == WatchAction::Modify && e.path == "log.txt"));
    settle();
    let modifies = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.action == WatchAction::Modify && e.path == "log.txt")
        .count();
    // writes within one debounce window collapse
    assert!(modifies < 5, "got {modifies} MODIFY events");
}

#[test]
fn test_rename_is_reported_as_move() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("before.txt"), "x").unwrap();
    let engine = engine();
    let (_, seen) = watch(&engine, dir.path(), WatchFlags::empty());

    fs::rename(dir.path().join("before.txt"), dir.path().join("after.txt")).unwrap();

    assert!(wait_for(&seen, |e| {
        e.action == WatchAction::Move
            && e.path == "after.txt"
            && e.old_path.as_deref() == Some("before.txt")
    }));
}

#[test]
fn test_move_out_of_watch_is_delete() {
    let dir = tempdir().unwrap();
    let outside = tempdir().unwrap();
    fs::write(dir.path().join("leaving.txt"), "x").unwrap();
    let engine = engine();
    let (_, seen) = watch(&engine, dir.path(), WatchFlags::empty());

    fs::rename(dir.path().join("leaving.txt"), outside.path().join("leaving.txt")).unwrap();

    assert!(wait_for(&seen, |e| e.action == WatchAction::Delete && e.path == "leaving.txt"));
}

#[test]
fn test_delete_is_reported() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("doomed.txt"), "x").unwrap();
    let engine = engine();
    let (_, seen) = watch(&engine, dir.path(), WatchFlags::empty());

    fs::remove_file(dir.path().join("doomed.txt")).unwrap();

    assert!(wait_for(&seen, |e| e.action == WatchAction::Delete && e.path == "doomed.txt"));
}

#[test]
fn test_recursive_watch_sees_nested_changes() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("a/b")).unwrap();
    let engine = engine();
    let (id, seen) = watch(&engine, dir.path(), WatchFlags::RECURSIVE);

    fs::write(dir.path().join("a/b/deep.txt"), "x").unwrap();
    assert!(wait_for(&seen, |e| e.action == WatchAction::Create && e.path == "a/b/deep.txt"));

    // directories created after the watch started are enrolled too
    fs::create_dir(dir.path().join("later")).unwrap();
    assert!(wait_for(&seen, |e| e.action == WatchAction::Create && e.path == "later"));
    settle();
    fs::write(dir.path().join("later/inner.txt"), "x").unwrap();
    assert!(wait_for(&seen, |e| e.path == "later/inner.txt"));

    let subdirs = engine.subdirs(id).unwrap();
    assert!(subdirs.contains(&"a/b/".to_string()));
    assert!(subdirs.contains(&"later/".to_string()));
}

#[test]
fn test_non_recursive_watch_ignores_nested_changes() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let engine = engine();
    let (_, seen) = watch(&engine, dir.path(), WatchFlags::empty());

    fs::write(dir.path().join("sub/hidden.txt"), "x").unwrap();
    fs::write(dir.path().join("marker.txt"), "x").unwrap();

    assert!(wait_for(&seen, |e| e.path == "marker.txt"));
    settle();
    assert!(seen.lock().unwrap().iter().all(|e| e.path != "sub/hidden.txt"));
}

#[test]
fn test_added_subdir_is_observed_until_removed() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let engine = engine();
    let (id, seen) = watch(&engine, dir.path(), WatchFlags::empty());

    engine.watch_add_subdir(id, "sub").unwrap();
    fs::write(dir.path().join("sub/one.txt"), "x").unwrap();
    assert!(wait_for(&seen, |e| e.path == "sub/one.txt"));

    engine.watch_remove_subdir(id, "sub").unwrap();
    settle();
    fs::write(dir.path().join("sub/two.txt"), "x").unwrap();
    fs::write(dir.path().join("marker.txt"), "x").unwrap();
    assert!(wait_for(&seen, |e| e.path == "marker.txt"));
    settle();
    assert!(seen.lock().unwrap().iter().all(|e| e.path != "sub/two.txt"));
}

#[test]
fn test_subdir_validation() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("file.txt"), "x").unwrap();
    let engine = engine();
    let (id, _) = watch(&engine, dir.path(), WatchFlags::empty());

    assert!(matches!(
        engine.watch_add_subdir(id, "missing"),
        Err(DirmonError::InvalidSubdir { .. })
    ));
    assert!(matches!(
        engine.watch_add_subdir(id, "file.txt"),
        Err(DirmonError::InvalidSubdir { .. })
    ));
    engine.watch_add_subdir(id, "sub").unwrap();
    assert!(matches!(
        engine.watch_add_subdir(id, "sub/"),
        Err(DirmonError::DuplicateSubdir { .. })
    ));
    assert!(matches!(
        engine.watch_remove_subdir(id, "never"),
        Err(DirmonError::SubdirNotWatched { .. })
    ));
}

#[test]
fn test_unwatch_stops_events() {
    let dir = tempdir().unwrap();
    let engine = engine();
    let (id, seen) = watch(&engine, dir.path(), WatchFlags::empty());

    engine.unwatch(id).unwrap();
    assert_eq!(engine.watch_count(), 0);
    fs::write(dir.path().join("quiet.txt"), "x").unwrap();
    settle();
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_invalid_roots_rejected() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("file.txt"), "x").unwrap();
    let engine = engine();

    for bad in [dir.path().join("missing"), dir.path().join("file.txt")] {
        let err = engine
            .watch(&bad.to_string_lossy(), WatchFlags::empty(), |_| {})
            .unwrap_err();
        assert!(matches!(err, DirmonError::InvalidRoot { .. }), "{err}");
    }
    assert!(matches!(
        engine.watch("", WatchFlags::empty(), |_| {}),
        Err(DirmonError::EmptyRoot)
    ));
    assert_eq!(engine.watch_count(), 0);
}

#[test]
fn test_symlinked_root_needs_follow_flag() {
    let dir = tempdir().unwrap();
    let real = dir.path().join("real");
    let link = dir.path().join("link");
    fs::create_dir(&real).unwrap();
    std::os::unix::fs::symlink(&real, &link).unwrap();
    let engine = engine();

    assert!(matches!(
        engine.watch(&link.to_string_lossy(), WatchFlags::empty(), |_| {}),
        Err(DirmonError::InvalidRoot { .. })
    ));

    let (id, seen) = watch(&engine, &link, WatchFlags::FOLLOW_SYMLINKS);
    assert!(engine.root_dir(id).unwrap().ends_with("/real/"));
    fs::write(real.join("via-link.txt"), "x").unwrap();
    assert!(wait_for(&seen, |e| e.path == "via-link.txt"));
}

#[test]
fn test_ignore_directories_flag() {
    let dir = tempdir().unwrap();
    let engine = engine();
    let (_, seen) = watch(&engine, dir.path(), WatchFlags::IGNORE_DIRECTORIES);

    fs::create_dir(dir.path().join("folder")).unwrap();
    fs::write(dir.path().join("plain.txt"), "x").unwrap();

    assert!(wait_for(&seen, |e| e.path == "plain.txt"));
    settle();
    assert!(seen.lock().unwrap().iter().all(|e| e.path != "folder"));
}

#[test]
fn test_capacity_from_config() {
    let dir = tempdir().unwrap();
    let engine = Engine::with_config(EngineConfig {
        max_watches: 1,
        ..EngineConfig::default()
    })
    .unwrap();
    let root = dir.path().to_string_lossy();

    engine.watch(&root, WatchFlags::empty(), |_| {}).unwrap();
    assert!(matches!(
        engine.watch(&root, WatchFlags::empty(), |_| {}),
        Err(DirmonError::CapacityExceeded { max: 1 })
    ));
    engine.deinit();
}
