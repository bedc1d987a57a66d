//! Commit of staged rendition files to the shared store.
//!
//! Shared network storage gives no crash-consistency guarantees for
//! half-written files, so every file travels through a dot-prefixed
//! temporary name in the destination directory: copy, fsync, then rename
//! into place. A file is either fully visible under its final name or not
//! visible at all.

use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Copy one staged file into `dest_dir` under its final name, durably.
///
/// The rename is the commit point; the fsync before it guarantees the
/// bytes are on stable storage by then.
fn commit_file(src: &Path, dest_dir: &Path, file_name: &str) -> io::Result<()> {
    let tmp_path = dest_dir.join(format!(".{}.partial", file_name));
    let final_path = dest_dir.join(file_name);

    let mut reader = File::open(src)?;
    let mut writer = File::create(&tmp_path)?;
    io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    drop(writer);

    if let Err(e) = fs::rename(&tmp_path, &final_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    Ok(())
}

/// Commit every staged file of one rendition into its destination.
///
/// Creates the destination directory if missing. Files are committed in
/// directory-listing order; on the first error the partial temp file is
/// removed and the error propagates, leaving earlier files committed and
/// later files absent.
///
/// Returns the number of files committed.
pub fn commit_rendition(staging_dir: &Path, dest_dir: &Path) -> io::Result<usize> {
    fs::create_dir_all(dest_dir)?;

    let mut committed = 0;
    for entry in fs::read_dir(staging_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        commit_file(&entry.path(), dest_dir, &file_name)?;
        committed += 1;
    }

    Ok(committed)
}
