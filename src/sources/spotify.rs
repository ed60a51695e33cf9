use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CollectionKind, CollectionMeta, LookupError, MetadataLookup, TrackMeta};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

/// Margen para renovar el token antes de que expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Enlace de Spotify reconocido en una consulta
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotifyLink {
    Track(String),
    Collection(CollectionKind, String),
}

impl SpotifyLink {
    /// Acepta enlaces con prefijo de idioma (`/intl-es/`)
    pub fn parse(query: &str) -> Option<Self> {
        static LINK: OnceLock<Regex> = OnceLock::new();
        let regex = LINK.get_or_init(|| {
            Regex::new(
                r"^https?://open\.spotify\.com/(?:[a-z\-]+/)?(?P<type>track|playlist|album)/(?P<id>[a-zA-Z0-9]+)",
            )
            .expect("regex de Spotify válida")
        });

        let captures = regex.captures(query.trim())?;
        let id = captures.name("id")?.as_str().to_string();

        match captures.name("type")?.as_str() {
            "track" => Some(Self::Track(id)),
            "playlist" => Some(Self::Collection(CollectionKind::Playlist, id)),
            "album" => Some(Self::Collection(CollectionKind::Album, id)),
            _ => None,
        }
    }
}

/// Cliente de la Web API de Spotify con el flujo client credentials
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Result<Self, LookupError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    /// Obtiene un token para validar las credenciales al arrancar
    pub async fn verify(&self) -> Result<(), LookupError> {
        self.access_token().await.map(|_| ())
    }

    async fn access_token(&self) -> Result<String, LookupError> {
        let mut token = self.token.lock().await;

        if let Some(cached) = token.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        debug!("🔑 Solicitando token de Spotify");
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.client_id, self.client_secret));

        let response = self
            .http
            .post(TOKEN_URL)
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", credentials))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if matches!(response.status(), StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
            return Err(LookupError::Auth(response.text().await.unwrap_or_default()));
        }

        let body: TokenResponse = response.error_for_status()?.json().await?;
        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);

        *token = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        info!("🔑 Token de Spotify renovado");
        Ok(body.access_token)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, LookupError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}{}", API_BASE, path))
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                Err(LookupError::NotFound(path.to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                // Token revocado o credenciales sin acceso; forzar uno nuevo la próxima vez
                self.token.lock().await.take();
                Err(LookupError::Auth(format!("{} en {}", response.status(), path)))
            }
            _ => Ok(response.error_for_status()?.json().await?),
        }
    }
}

#[async_trait]
impl MetadataLookup for SpotifyClient {
    async fn track(&self, id: &str) -> Result<TrackMeta, LookupError> {
        let track: ApiTrack = self.get(&format!("/tracks/{}", id)).await?;
        Ok(track.into())
    }

    async fn collection(
        &self,
        kind: CollectionKind,
        id: &str,
    ) -> Result<CollectionMeta, LookupError> {
        match kind {
            CollectionKind::Playlist => {
                let playlist: ApiPlaylist = self.get(&format!("/playlists/{}", id)).await?;
                Ok(playlist.into())
            }
            CollectionKind::Album => {
                let album: ApiAlbum = self.get(&format!("/albums/{}", id)).await?;
                Ok(album.into())
            }
        }
    }
}

// Formas de la Web API (sólo los campos que se usan)

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    external_ids: Option<ExternalIds>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylist {
    name: String,
    tracks: Page<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    name: String,
    tracks: Page<ApiTrack>,
}

impl From<ApiTrack> for TrackMeta {
    fn from(track: ApiTrack) -> Self {
        Self {
            name: track.name,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            isrc: track.external_ids.and_then(|ids| ids.isrc),
        }
    }
}

impl From<ApiPlaylist> for CollectionMeta {
    fn from(playlist: ApiPlaylist) -> Self {
        let total = playlist.tracks.items.len();
        let tracks: Vec<TrackMeta> = playlist
            .tracks
            .items
            .into_iter()
            .filter_map(|item| item.track)
            .map(TrackMeta::from)
            .collect();

        if tracks.len() < total {
            warn!(
                "⚠️ Playlist '{}': {} elementos sin canción (eliminados o locales)",
                playlist.name,
                total - tracks.len()
            );
        }

        Self {
            name: playlist.name,
            tracks,
        }
    }
}

impl From<ApiAlbum> for CollectionMeta {
    fn from(album: ApiAlbum) -> Self {
        Self {
            name: album.name,
            tracks: album.tracks.items.into_iter().map(TrackMeta::from).collect(),
        }
    }
}
