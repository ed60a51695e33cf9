//! # Sources Module
//!
//! Everything that turns a user query into something playable.
//!
//! - [`resolver`] maps a raw query (search text, Spotify track, Spotify
//!   playlist/album) to queued [`TrackDescriptor`]s without downloading
//!   anything.
//! - [`spotify`] talks to the Spotify Web API for track/collection metadata.
//! - [`youtube`] drives `yt-dlp` for search, probing and downloads.
//! - [`fetcher`] downloads a descriptor's media into the working directory.
//!
//! The collaborator traits ([`MetadataLookup`], [`VideoSearch`], [`Fetcher`])
//! are the seams the playback session is tested through.

pub mod fetcher;
pub mod resolver;
pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

pub use fetcher::DiskFetcher;
pub use resolver::QueryResolver;
pub use spotify::SpotifyClient;
pub use youtube::YtDlp;

/// Unidad de trabajo en la cola: una canción antes o después de descargarse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    /// Identificador para el fetcher (URL del video o término de búsqueda)
    pub query: String,
    /// Título para mostrar; puede ser provisional hasta la descarga
    pub title: String,
    /// Archivo local; `None` mientras no se haya descargado
    pub filepath: Option<PathBuf>,
}

impl TrackDescriptor {
    pub fn new(query: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            title: title.into(),
            filepath: None,
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.filepath.is_some()
    }
}

/// Resultado de resolver una consulta del usuario
#[derive(Debug, Clone)]
pub struct Resolution {
    pub tracks: Vec<TrackDescriptor>,
    pub message: String,
}

impl Resolution {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            tracks: Vec::new(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Resolution;
}

/// Audio ya disponible en disco
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedTrack {
    pub title: String,
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no se encontró el medio: {0}")]
    NotFound(String),
    #[error("duración {duration:?} supera el máximo permitido ({max:?})")]
    TooLong { duration: Duration, max: Duration },
    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
    #[error("la tarea de descarga falló: {0}")]
    Worker(String),
}

/// Descarga el medio de un identificador al almacenamiento local
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, identifier: &str) -> Result<FetchedTrack, FetchError>;
}

/// Primer resultado de una búsqueda de video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoHit {
    pub url: String,
    pub title: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("yt-dlp falló: {0}")]
    Process(String),
    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoSearch: Send + Sync {
    async fn search(&self, term: &str) -> Result<Option<VideoHit>, SearchError>;
}

/// Metadata de una canción en el servicio de streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMeta {
    pub name: String,
    pub artists: Vec<String>,
    /// Código ISRC, identificador estable entre servicios
    pub isrc: Option<String>,
}

impl TrackMeta {
    /// Término para la búsqueda de video: el ISRC si existe, si no "nombre artista"
    pub fn search_term(&self) -> String {
        match &self.isrc {
            Some(isrc) if !isrc.trim().is_empty() => isrc.clone(),
            _ => match self.artists.first() {
                Some(artist) => format!("{} {}", self.name, artist),
                None => self.name.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Playlist,
    Album,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Playlist => "playlist",
            CollectionKind::Album => "álbum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMeta {
    pub name: String,
    pub tracks: Vec<TrackMeta>,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("no encontrado: {0}")]
    NotFound(String),
    #[error("credenciales rechazadas: {0}")]
    Auth(String),
    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("respuesta inesperada: {0}")]
    Decode(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn track(&self, id: &str) -> Result<TrackMeta, LookupError>;

    async fn collection(&self, kind: CollectionKind, id: &str)
        -> Result<CollectionMeta, LookupError>;
}
