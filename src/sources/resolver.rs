use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::spotify::SpotifyLink;
use super::youtube::YtDlp;
use super::{
    CollectionKind, MetadataLookup, Resolution, Resolver, TrackDescriptor, TrackMeta, VideoHit,
    VideoSearch,
};

/// Búsquedas de YouTube simultáneas al resolver una playlist/álbum
const COLLECTION_CONCURRENCY: usize = 4;

/// Convierte consultas de usuario en descriptores listos para encolar
pub struct QueryResolver {
    metadata: Option<Arc<dyn MetadataLookup>>,
    search: Arc<dyn VideoSearch>,
    max_collection_size: usize,
}

impl QueryResolver {
    /// `metadata` es `None` cuando no hay credenciales de Spotify; en ese caso
    /// los enlaces de Spotify se buscan como texto.
    pub fn new(
        metadata: Option<Arc<dyn MetadataLookup>>,
        search: Arc<dyn VideoSearch>,
        max_collection_size: usize,
    ) -> Self {
        Self {
            metadata,
            search,
            max_collection_size,
        }
    }

    async fn find_video(&self, term: &str) -> Option<VideoHit> {
        match self.search.search(term).await {
            Ok(hit) => hit,
            Err(e) => {
                error!("❌ Error buscando '{}' en YouTube: {}", term, e);
                None
            }
        }
    }

    async fn resolve_search(&self, query: &str) -> Resolution {
        match self.find_video(query).await {
            Some(hit) => {
                let message = format!("**Agregado a la cola:** `{}`", hit.title);
                Resolution {
                    tracks: vec![TrackDescriptor::new(hit.url, hit.title)],
                    message,
                }
            }
            None => Resolution::failed(format!(
                "❌ No encontré ningún resultado en YouTube para: `{}`",
                query
            )),
        }
    }

    async fn resolve_spotify_track(&self, metadata: &dyn MetadataLookup, id: &str) -> Resolution {
        let track = match metadata.track(id).await {
            Ok(track) => track,
            Err(e) => {
                error!("❌ Error procesando canción de Spotify {}: {}", id, e);
                return Resolution::failed("❌ No pude encontrar esa canción en Spotify.");
            }
        };

        match self.find_video(&track.search_term()).await {
            Some(hit) => {
                let message = format!("**Agregado desde Spotify:** `{}`", hit.title);
                Resolution {
                    tracks: vec![TrackDescriptor::new(hit.url, hit.title)],
                    message,
                }
            }
            None => Resolution::failed(format!("❌ No encontré '{}' en YouTube.", track.name)),
        }
    }

    async fn resolve_spotify_collection(
        &self,
        metadata: &dyn MetadataLookup,
        kind: CollectionKind,
        id: &str,
    ) -> Resolution {
        let collection = match metadata.collection(kind, id).await {
            Ok(collection) => collection,
            Err(e) => {
                error!("❌ Error procesando {} de Spotify {}: {}", kind.as_str(), id, e);
                return Resolution::failed(format!(
                    "❌ No pude procesar esa {} de Spotify.",
                    kind.as_str()
                ));
            }
        };

        let total = collection.tracks.len();
        if total > self.max_collection_size {
            warn!(
                "📋 {} '{}' tiene {} canciones, se usarán las primeras {}",
                kind.as_str(),
                collection.name,
                total,
                self.max_collection_size
            );
        }

        let members: Vec<TrackMeta> = collection
            .tracks
            .into_iter()
            .take(self.max_collection_size)
            .collect();

        // `buffered` conserva el orden de la colección
        let tracks: Vec<TrackDescriptor> = stream::iter(members)
            .map(|member| async move {
                let hit = self.find_video(&member.search_term()).await;
                if hit.is_none() {
                    warn!("⚠️ Sin resultado en YouTube para '{}', se omite", member.name);
                }
                hit
            })
            .buffered(COLLECTION_CONCURRENCY)
            .filter_map(|hit| async move { hit })
            .map(|hit| TrackDescriptor::new(hit.url, hit.title))
            .collect()
            .await;

        if tracks.is_empty() {
            return Resolution::failed(format!(
                "❌ No encontré resultados en YouTube para las canciones de la {} '{}'.",
                kind.as_str(),
                collection.name
            ));
        }

        info!(
            "📋 {} '{}': {} de {} canciones resueltas",
            kind.as_str(),
            collection.name,
            tracks.len(),
            total.min(self.max_collection_size)
        );

        let message = format!(
            "✅ Se agregaron **{}** canciones de la {} **'{}'** a la cola!",
            tracks.len(),
            kind.as_str(),
            collection.name
        );
        Resolution { tracks, message }
    }
}

#[async_trait]
impl Resolver for QueryResolver {
    async fn resolve(&self, query: &str) -> Resolution {
        let query = query.trim();

        if let (Some(metadata), Some(link)) = (self.metadata.as_deref(), SpotifyLink::parse(query))
        {
            return match link {
                SpotifyLink::Track(id) => self.resolve_spotify_track(metadata, &id).await,
                SpotifyLink::Collection(kind, id) => {
                    self.resolve_spotify_collection(metadata, kind, &id).await
                }
            };
        }

        // Un enlace directo no necesita búsqueda; el título real llega con la descarga
        if YtDlp::is_youtube_url(query) {
            let title = YtDlp::extract_video_id(query).unwrap_or_else(|| query.to_string());
            return Resolution {
                message: format!("**Agregado a la cola:** `{}`", query),
                tracks: vec![TrackDescriptor::new(query, title)],
            };
        }

        self.resolve_search(query).await
    }
}
