use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use ypw_storage::{StorageError, acquire_container_lock, lock_file_path};

fn temp_container_path() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "ypw-storage-lock-test-{}-{nanos}.ypw",
        std::process::id()
    ))
}

#[test]
fn lock_is_refused_while_another_process_holds_it() {
    let path = temp_container_path();

    let mut child = Command::new(env!("CARGO_BIN_EXE_lock_holder"))
        .arg(&path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn lock holder");

    let stdout = child.stdout.take().expect("child stdout");
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let start = Instant::now();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).expect("read lock holder output");
        assert!(read > 0, "lock holder exited before taking the lock");
        if line.contains("LOCK_ACQUIRED") {
            break;
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timed out waiting for lock holder"
        );
    }

    assert!(matches!(
        acquire_container_lock(&path),
        Err(StorageError::Locked)
    ));

    drop(child.stdin.take());
    let _ = child.wait();

    let lock = acquire_container_lock(&path).expect("lock is free once the holder exits");
    drop(lock);
    let _ = std::fs::remove_file(lock_file_path(&path));
}
