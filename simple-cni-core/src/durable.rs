use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

/// Replaces `path` with `contents` so that readers see either the old or the
/// new document, even across a crash.
///
/// The contents are flushed to disk before the rename, and the directory
/// entry is flushed after it.
pub fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut staging_name = path.as_os_str().to_owned();
    staging_name.push(".tmp");
    let staging_file = Path::new(&staging_name);

    let mut file = File::create(staging_file)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(staging_file, path)?;

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::write_atomically;

    #[test]
    fn write_replaces_the_file_and_leaves_no_staging_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubenet.json");

        write_atomically(&path, br#"{"ips":{}}"#).unwrap();
        write_atomically(&path, br#"{"ips":{},"last":"10.244.1.2"}"#).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            r#"{"ips":{},"last":"10.244.1.2"}"#
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();

        assert!(write_atomically(&dir.path().join("missing").join("subnet.json"), b"{}").is_err());
    }
}
