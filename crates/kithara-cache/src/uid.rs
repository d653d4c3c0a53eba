#![forbid(unsafe_code)]

use std::{fs::File, path::Path};

use rand::Rng;

use crate::error::CacheResult;

pub(crate) const UID_FILE_SUFFIX: &str = ".uid";

pub(crate) fn is_uid_file(name: &str) -> bool {
    name.ends_with(UID_FILE_SUFFIX)
}

/// Read the uid stored in `dir` as an empty `<hex>.uid` file, creating one if
/// none is readable. Unparsable uid files are deleted.
pub(crate) fn load_or_create(dir: &Path) -> CacheResult<u64> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(hex) = name.to_str().and_then(|n| n.strip_suffix(UID_FILE_SUFFIX)) else {
            continue;
        };
        match u64::from_str_radix(hex, 16) {
            Ok(uid) => return Ok(uid),
            Err(_) => {
                tracing::warn!(path = ?entry.path(), "malformed uid file; deleting");
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    tracing::warn!(path = ?entry.path(), error = %e, "failed to delete uid file");
                }
            }
        }
    }

    let uid: u64 = rand::thread_rng().r#gen();
    File::create_new(dir.join(format!("{uid:x}{UID_FILE_SUFFIX}")))?;
    tracing::debug!(dir = ?dir, uid = %format!("{uid:x}"), "cache uid created");
    Ok(uid)
}
