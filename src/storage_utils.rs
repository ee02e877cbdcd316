use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

// STORAGE MANAGER
// Holds the dashboard's config file. Scores and the notified set are never written here.

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates a manager rooted next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new_at(base_dir).await
    }

    /// Creates a manager rooted at an explicit directory, creating it if needed.
    pub async fn new_at<P: Into<PathBuf>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    /// Serializes `data` as pretty JSON into `<filename>.json`.
    /// Writes to a `.tmp` sibling first and renames it over the target.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let file_name = format!("{}.json", filename);
        let final_path = self.base_dir.join(&file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));
        // serde_json validates UTF-8 while parsing, so read raw bytes.
        let content = fs::read(path).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads `<filename>.json`, or writes `default` there first if the file is missing.
    pub async fn load_or_init<T>(&self, filename: &str, default: T) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let path = self.base_dir.join(format!("{}.json", filename));
        if fs::try_exists(&path).await? {
            return self.load(filename).await;
        }
        self.save(filename, &default).await?;
        info!(path = %path.display(), "wrote default file");
        Ok(default)
    }
}
