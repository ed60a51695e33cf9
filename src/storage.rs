use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info};

/// Extensión de los archivos de audio descargados (yt-dlp extrae a Opus)
pub const MEDIA_EXTENSION: &str = "opus";

/// Directorio de trabajo con el audio descargado.
///
/// Nada sobrevive a un reinicio: cada archivo se nombra por el id del medio y
/// se elimina después de reproducirse, así que lo que quede al arrancar es
/// basura de una ejecución anterior.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("📁 Directorio de descargas: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ruta final de un medio: `<dir>/<id>.opus`
    pub fn path_for(&self, media_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sanitize_id(media_id), MEDIA_EXTENSION))
    }

    /// Plantilla de salida para yt-dlp dentro del directorio de descargas
    pub fn output_template(&self) -> String {
        self.dir.join("%(id)s.%(ext)s").to_string_lossy().into_owned()
    }

    /// Elimina los archivos huérfanos que dejó una ejecución anterior
    pub async fn sweep(&self) -> Result<usize> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => error!("Error eliminando archivo huérfano {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("🧹 Eliminados {} archivos huérfanos de descargas anteriores", removed);
        }

        Ok(removed)
    }
}

/// Los ids vienen de fuera; sólo se permiten caracteres seguros para un nombre de archivo
fn sanitize_id(media_id: &str) -> String {
    media_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_for_uses_id_and_opus_extension() {
        let store = MediaStore {
            dir: PathBuf::from("/tmp/downloads"),
        };
        assert_eq!(
            store.path_for("dQw4w9WgXcQ"),
            PathBuf::from("/tmp/downloads/dQw4w9WgXcQ.opus")
        );
    }

    #[test]
    fn path_for_cannot_escape_the_directory() {
        let store = MediaStore {
            dir: PathBuf::from("/tmp/downloads"),
        };
        let path = store.path_for("../../etc/passwd");
        assert_eq!(path.parent(), Some(Path::new("/tmp/downloads")));
    }

    #[tokio::test]
    async fn sweep_removes_leftover_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().join("downloads")).await.unwrap();
        std::fs::write(store.path_for("a"), b"x").unwrap();
        std::fs::write(store.path_for("b"), b"x").unwrap();
        std::fs::create_dir(store.dir().join("nested")).unwrap();

        assert_eq!(store.sweep().await.unwrap(), 2);
        assert!(!store.path_for("a").exists());
        assert!(store.dir().join("nested").exists());
    }
}
