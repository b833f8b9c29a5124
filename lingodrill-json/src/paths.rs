use directories::ProjectDirs;
use std::path::PathBuf;

/// `$LINGODRILL_DATA_DIR` if set, else the platform data dir, else `./.lingodrill`.
pub fn data_root() -> PathBuf {
    if let Some(dir) = std::env::var_os("LINGODRILL_DATA_DIR") {
        return PathBuf::from(dir);
    }
    ProjectDirs::from("com", "lingodrill", "lingodrill")
        .map(|pd| pd.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".lingodrill"))
}

/// The JSON store file and its backups directory under [`data_root`].
pub fn default_store_file() -> (PathBuf, PathBuf) {
    let root = data_root();
    (root.join("lingodrill.json"), root.join("backups"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_override_places_store_and_backups() {
        let dir = std::env::temp_dir().join("lingodrill-paths-test");
        std::env::set_var("LINGODRILL_DATA_DIR", &dir);
        let (file, backups) = default_store_file();
        std::env::remove_var("LINGODRILL_DATA_DIR");

        assert_eq!(file, dir.join("lingodrill.json"));
        assert_eq!(backups, dir.join("backups"));
        assert_ne!(data_root(), dir);
    }
}
