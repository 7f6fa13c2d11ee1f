use std::path::PathBuf;

use anyhow::Result;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

/// On-disk avatar storage. One image per user, stored flat as
/// `{dir}/{user_id}.{ext}`; re-uploading replaces the previous file.
#[derive(Clone)]
pub struct AvatarStorage {
    dir: PathBuf,
}

impl AvatarStorage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Avatar storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Write the avatar bytes and return the filename. Any previous avatar
    /// with a different extension is left behind; the profile row only ever
    /// points at the latest upload.
    pub async fn save(&self, user_id: Uuid, ext: &str, data: &[u8]) -> Result<String> {
        let filename = format!("{user_id}.{ext}");
        fs::write(self.dir.join(&filename), data).await?;
        Ok(filename)
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_writes_file_and_returns_name() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = AvatarStorage::new(tmp.path().join("avatars")).await.unwrap();

        let user = Uuid::new_v4();
        let name = storage.save(user, "png", b"not-really-a-png").await.unwrap();

        assert_eq!(name, format!("{user}.png"));
        let stored = fs::read(storage.dir().join(&name)).await.unwrap();
        assert_eq!(stored, b"not-really-a-png");
    }

    #[tokio::test]
    async fn reupload_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = AvatarStorage::new(tmp.path().to_path_buf()).await.unwrap();

        let user = Uuid::new_v4();
        storage.save(user, "jpg", b"first").await.unwrap();
        let name = storage.save(user, "jpg", b"second").await.unwrap();

        let stored = fs::read(storage.dir().join(&name)).await.unwrap();
        assert_eq!(stored, b"second");
    }
}
