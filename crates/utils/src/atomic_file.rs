//! Atomic file replacement so readers never observe a half-written journal

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use uuid::Uuid;

/// Replace `path` with `content` by writing a sibling temporary file and
/// renaming it over the target
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path '{}' has no parent directory", path.display()),
        )
    })?;

    fs::create_dir_all(parent)?;

    // Same directory keeps the rename on one file system
    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));

    let result = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        e
    })
}

/// Replace `path` with the given lines, each terminated by a newline
pub fn write_lines_atomic<L: AsRef<[u8]>>(path: &Path, lines: &[L]) -> io::Result<()> {
    let capacity = lines.iter().map(|line| line.as_ref().len() + 1).sum();
    let mut content = Vec::with_capacity(capacity);
    for line in lines {
        content.extend_from_slice(line.as_ref());
        content.push(b'\n');
    }
    write_atomic(path, &content)
}
