use async_trait::async_trait;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use super::{FetchError, FetchedTrack, Fetcher};
use crate::storage::MediaStore;

/// Metadata mínima de un medio antes de descargarlo
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub duration: Option<Duration>,
}

/// Herramienta externa que sabe inspeccionar y descargar un medio
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn probe(&self, identifier: &str) -> Result<MediaInfo, FetchError>;

    /// Descarga el audio usando la plantilla de salida `<dir>/%(id)s.%(ext)s`
    async fn download(&self, identifier: &str, output_template: &str) -> Result<(), FetchError>;
}

/// Fetcher que deja el audio en el directorio de descargas.
///
/// No serializa por sí mismo: quien lo llama debe tener el lock de descarga
/// de la sesión.
pub struct DiskFetcher<E> {
    extractor: E,
    store: MediaStore,
    max_duration: Option<Duration>,
}

impl<E: MediaExtractor> DiskFetcher<E> {
    pub fn new(extractor: E, store: MediaStore, max_duration: Option<Duration>) -> Self {
        Self {
            extractor,
            store,
            max_duration,
        }
    }
}

#[async_trait]
impl<E: MediaExtractor> Fetcher for DiskFetcher<E> {
    async fn fetch(&self, identifier: &str) -> Result<FetchedTrack, FetchError> {
        let info = self.extractor.probe(identifier).await?;

        if let (Some(duration), Some(max)) = (info.duration, self.max_duration) {
            if duration > max {
                return Err(FetchError::TooLong { duration, max });
            }
        }

        let path = self.store.path_for(&info.id);
        if fs::try_exists(&path).await? {
            debug!("♻️ Reutilizando archivo existente: {}", path.display());
        } else {
            self.extractor
                .download(identifier, &self.store.output_template())
                .await?;
        }

        if !fs::try_exists(&path).await? {
            return Err(FetchError::NotFound(format!(
                "la descarga de {} no produjo {}",
                identifier,
                path.display()
            )));
        }

        info!("✅ Descarga lista: '{}' -> {}", info.title, path.display());
        Ok(FetchedTrack {
            title: info.title,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Extractor falso: escribe un archivo vacío en lugar de bajar nada
    struct FakeExtractor {
        dir: std::path::PathBuf,
        duration: Option<Duration>,
        produce_file: bool,
        downloads: AtomicUsize,
    }

    impl FakeExtractor {
        fn new(dir: &std::path::Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                duration: Some(Duration::from_secs(200)),
                produce_file: true,
                downloads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaExtractor for Arc<FakeExtractor> {
        async fn probe(&self, identifier: &str) -> Result<MediaInfo, FetchError> {
            if identifier.contains("missing") {
                return Err(FetchError::NotFound(identifier.to_string()));
            }
            Ok(MediaInfo {
                id: identifier.rsplit('=').next().unwrap_or(identifier).to_string(),
                title: format!("Title of {}", identifier),
                duration: self.duration,
            })
        }

        async fn download(&self, identifier: &str, _output_template: &str) -> Result<(), FetchError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if self.produce_file {
                let id = identifier.rsplit('=').next().unwrap_or(identifier);
                std::fs::write(self.dir.join(format!("{}.opus", id)), b"audio")?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_fetch_reuses_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf()).await.unwrap();
        let extractor = Arc::new(FakeExtractor::new(dir.path()));
        let fetcher = DiskFetcher::new(extractor.clone(), store.clone(), None);

        let url = "https://www.youtube.com/watch?v=abc";
        let first = fetcher.fetch(url).await.unwrap();
        let second = fetcher.fetch(url).await.unwrap();

        assert_eq!(first.path, store.path_for("abc"));
        assert_eq!(first.path, second.path);
        assert_eq!(extractor.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn probe_failure_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf()).await.unwrap();
        let extractor = Arc::new(FakeExtractor::new(dir.path()));
        let fetcher = DiskFetcher::new(extractor.clone(), store, None);

        let result = fetcher.fetch("https://www.youtube.com/watch?v=missing").await;
        assert!(matches!(result, Err(FetchError::NotFound(_))));
        assert_eq!(extractor.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn download_without_output_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf()).await.unwrap();
        let mut extractor = FakeExtractor::new(dir.path());
        extractor.produce_file = false;
        let fetcher = DiskFetcher::new(Arc::new(extractor), store, None);

        let result = fetcher.fetch("https://www.youtube.com/watch?v=ghost").await;
        assert!(matches!(result, Err(FetchError::NotFound(_))));
    }

    #[tokio::test]
    async fn rejects_media_over_the_duration_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf()).await.unwrap();
        let mut extractor = FakeExtractor::new(dir.path());
        extractor.duration = Some(Duration::from_secs(3 * 3600));
        let extractor = Arc::new(extractor);
        let fetcher =
            DiskFetcher::new(extractor.clone(), store, Some(Duration::from_secs(900)));

        let result = fetcher.fetch("https://www.youtube.com/watch?v=long").await;
        assert!(matches!(result, Err(FetchError::TooLong { .. })));
        assert_eq!(extractor.downloads.load(Ordering::SeqCst), 0);
    }
}
