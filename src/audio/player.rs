use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::File,
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::voice::{Completion, VoiceConnector, VoiceError, VoiceLink};

/// Conecta sesiones a canales de voz a través de songbird
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceLink>, VoiceError> {
        let call = self.manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error al obtener handler de voz: {:?}", e);
            VoiceError::Join(e.to_string())
        })?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdLink {
            guild_id,
            manager: self.manager.clone(),
            call,
            current: SyncMutex::new(None),
        }))
    }
}

/// Llamada de songbird de una guild
pub struct SongbirdLink {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    current: SyncMutex<Option<TrackHandle>>,
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    async fn play_file(&self, path: &Path, completion: Completion) {
        let input = File::new(path.to_path_buf());
        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input.into())
        };

        // Un solo aviso compartido por los eventos End y Error
        let completion = Arc::new(SyncMutex::new(Some(completion)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            let handler = TrackEndHandler {
                completion: completion.clone(),
            };
            if let Err(e) = handle.add_event(Event::Track(event), handler) {
                error!("Error al agregar event handler: {}", e);
                // Sin eventos nadie avisará; se dispara aquí con el error
                if let Some(completion) = completion.lock().take() {
                    completion.finish(Some(e.to_string()));
                }
                let _ = handle.stop();
                return;
            }
        }

        debug!("▶️ Reproduciendo archivo {}", path.display());
        *self.current.lock() = Some(handle);
    }

    async fn stop(&self) {
        if let Some(handle) = self.current.lock().take() {
            let _ = handle.stop();
        }
    }

    async fn disconnect(&self) {
        self.stop().await;
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("⚠️ Error al salir del canal de voz en guild {}: {:?}", self.guild_id, e);
        } else {
            info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        }
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_channel().is_some()
    }
}

/// Handler para cuando termina (o falla) una canción
struct TrackEndHandler {
    completion: Arc<SyncMutex<Option<Completion>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{:?}", e)),
                _ => None,
            }),
            _ => None,
        };

        if let Some(completion) = self.completion.lock().take() {
            debug!("Track terminado (error: {:?})", error);
            completion.finish(error);
        }

        None
    }
}
