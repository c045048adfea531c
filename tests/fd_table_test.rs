/*!
 * Descriptor Table Integration Tests
 *
 * End-to-end coverage of the allocation protocol, growth, close-on-exec,
 * sharing, and the reference-count contract on stored handles.
 */

use fd_table::{Fd, FdError, FdManager, ProcessFiles, WORD_BITS};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[derive(Debug, PartialEq)]
struct FileHandle {
    path: String,
    flags: u32,
}

fn open_handle(path: &str) -> Arc<FileHandle> {
    Arc::new(FileHandle {
        path: path.to_string(),
        flags: 0,
    })
}

/// Route `log` output through the test harness, honoring `RUST_LOG`
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_open_close_lifecycle() {
    init_logging();
    let table: FdManager<FileHandle> = FdManager::new();

    let fd = table.insert(open_handle("/etc/hosts")).unwrap();
    assert_eq!(table.get(fd).unwrap().path, "/etc/hosts");
    assert_eq!(table.with_handle(fd, |h| h.path.clone()).unwrap(), "/etc/hosts");

    let closed = table.remove(fd).unwrap();
    assert_eq!(closed.path, "/etc/hosts");
    assert!(table.get(fd).is_none());
}

#[test]
fn test_growth_keeps_all_descriptors_lookupable() {
    init_logging();
    // Starts at one bitmap word; opening well past that forces at least
    // one growth and must preserve every descriptor at its index.
    let table: FdManager<FileHandle> = FdManager::new();
    assert_eq!(table.capacity(), WORD_BITS);

    let total = WORD_BITS + 36;
    for i in 0..total {
        let fd = table.allocate_fd().unwrap();
        assert_eq!(fd as usize, i);
        table.install(fd, open_handle(&format!("/file/{i}"))).unwrap();
    }

    assert!(table.capacity() >= total);
    for i in 0..total {
        assert_eq!(table.get(i as Fd).unwrap().path, format!("/file/{i}"));
    }
}

#[test]
fn test_failed_open_rolls_back_reservation() {
    init_logging();
    let table: FdManager<FileHandle> = FdManager::new();
    for i in 0..3 {
        table.insert(open_handle(&format!("/f{i}"))).unwrap();
    }

    let fd = table.allocate_fd().unwrap();
    assert_eq!(fd, 3);
    assert!(table.get(3).is_none());

    // The underlying open failed; the slot must become allocatable again
    table.release_reservation(fd);
    assert!(table.get(3).is_none());
    assert_eq!(table.allocate_fd().unwrap(), 3);
    assert!(table.get(3).is_none());
    table.release_reservation(3);
}

#[test]
fn test_shared_owner_mutations_visible_everywhere() {
    init_logging();
    let parent: Arc<FdManager<FileHandle>> = Arc::new(FdManager::new());
    let child = Arc::clone(&parent); // shared fork

    let fd = parent.insert(open_handle("/shared")).unwrap();
    assert_eq!(child.get(fd).unwrap().path, "/shared");

    child.remove(fd).unwrap();
    assert!(parent.get(fd).is_none());
}

#[test]
fn test_unshared_fork_reference_counts() {
    init_logging();
    let parent: FdManager<FileHandle> = FdManager::new();
    let handle = open_handle("/counted");
    let fd = parent.insert(Arc::clone(&handle)).unwrap();
    assert_eq!(Arc::strong_count(&handle), 2); // test + parent slot

    let child = parent.fork().unwrap();
    assert_eq!(Arc::strong_count(&handle), 3); // + child slot

    // Removing through the copy releases exactly one reference and
    // leaves the original slot installed
    child.remove(fd).unwrap();
    assert_eq!(Arc::strong_count(&handle), 2);
    assert!(parent.get(fd).is_some());

    drop(parent);
    assert_eq!(Arc::strong_count(&handle), 1);
}

#[test]
fn test_exec_sweep_closes_flagged_descriptors() {
    init_logging();
    let table: FdManager<FileHandle> = FdManager::new();
    let stdin = table.insert(open_handle("/dev/stdin")).unwrap();
    let secret = table.insert(open_handle("/run/secret")).unwrap();
    let log = table.insert(open_handle("/var/log/app")).unwrap();
    table.set_close_on_exec(secret, true).unwrap();
    table.set_close_on_exec(log, true).unwrap();

    let closed = table.drain_close_on_exec();
    assert_eq!(closed.len(), 2);
    assert!(table.get(stdin).is_some());
    assert!(table.get(secret).is_none());
    assert!(table.get(log).is_none());

    // Clearing a descriptor also clears its flag; the swept descriptors
    // come back unflagged on reuse
    let reused = table.insert(open_handle("/tmp/new")).unwrap();
    assert_eq!(reused, secret);
    assert!(!table.is_close_on_exec(reused).unwrap());
}

#[test]
fn test_process_cell_share_and_unshare() {
    init_logging();
    let proc_a = ProcessFiles::new(FdManager::<FileHandle>::new());
    let fd = proc_a.manager().insert(open_handle("/inherited")).unwrap();

    // clone(CLONE_FILES) analog: same owner, same table
    let proc_b = ProcessFiles::from_shared(proc_a.manager());
    assert_eq!(proc_b.manager().get(fd).unwrap().path, "/inherited");

    // unshare(CLONE_FILES) analog: independent copy from here on
    proc_b.unshare().unwrap();
    proc_b.manager().remove(fd).unwrap();
    assert_eq!(proc_a.manager().get(fd).unwrap().path, "/inherited");
}

#[test]
fn test_ceiling_reports_exhaustion() {
    init_logging();
    let table: FdManager<FileHandle> = FdManager::with_limits(WORD_BITS, 2 * WORD_BITS);

    for _ in 0..2 * WORD_BITS {
        table.insert(open_handle("/x")).unwrap();
    }
    match table.insert(open_handle("/one-too-many")) {
        Err(FdError::ResourceExhausted { limit, .. }) => assert_eq!(limit, 2 * WORD_BITS),
        other => panic!("expected ResourceExhausted, got {other:?}"),
    }

    // The table is untouched by the failed allocation
    assert_eq!(table.open_count(), 2 * WORD_BITS);
    assert_eq!(table.capacity(), 2 * WORD_BITS);
}

#[test]
fn test_dup_shares_one_handle() {
    init_logging();
    let table: FdManager<FileHandle> = FdManager::new();
    let handle = open_handle("/dup-me");
    let a = table.insert(Arc::clone(&handle)).unwrap();

    let b = table.dup(a).unwrap();
    let c = table.dup_at(a, 17).unwrap();
    assert_eq!(Arc::strong_count(&handle), 4); // test + three slots

    table.remove(a).unwrap();
    assert_eq!(table.get(b).unwrap().path, "/dup-me");
    assert_eq!(table.get(c).unwrap().path, "/dup-me");
    assert_eq!(Arc::strong_count(&handle), 3);
}

#[test]
fn test_error_values_serialize() {
    init_logging();
    let err = FdError::BadDescriptor(9);
    let json = serde_json::to_string(&err).unwrap();
    let back: FdError = serde_json::from_str(&json).unwrap();
    assert_eq!(err, back);
}
