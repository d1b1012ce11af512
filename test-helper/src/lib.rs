use std::path::PathBuf;

/// Creates a new, uniquely named directory under the system temp directory.
pub fn temp_dir() -> PathBuf {
    let path = std::env::temp_dir().join(uuid::Uuid::new_v4().to_string());
    std::fs::create_dir_all(&path).unwrap();
    path
}
