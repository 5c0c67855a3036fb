use std::env;
use std::io::{self, Read, Write};
use std::path::PathBuf;

// Test helper: holds a container lock until its stdin is closed.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let container_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or("usage: lock_holder <container_path>")?;
    let _lock = ypw_storage::acquire_container_lock(&container_path)?;

    println!("LOCK_ACQUIRED");
    io::stdout().flush()?;

    let mut sink = Vec::new();
    let _ = io::stdin().read_to_end(&mut sink);
    Ok(())
}
