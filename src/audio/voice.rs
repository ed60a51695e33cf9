use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::path::Path;
use std::sync::Arc;

/// Aviso de fin de reproducción.
///
/// Se dispara exactamente una vez: con `finish`, o al soltarse sin haberse
/// usado (en ese caso con error).
pub struct Completion {
    notify: Option<Box<dyn FnOnce(Option<String>) + Send>>,
}

impl Completion {
    pub fn new(notify: impl FnOnce(Option<String>) + Send + 'static) -> Self {
        Self {
            notify: Some(Box::new(notify)),
        }
    }

    /// `error` es `None` si la pista terminó normalmente
    pub fn finish(mut self, error: Option<String>) {
        if let Some(notify) = self.notify.take() {
            notify(error);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(notify) = self.notify.take() {
            notify(Some("la pista se descartó sin terminar".to_string()));
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.notify.is_some())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("no pude conectarme al canal de voz: {0}")]
    Join(String),
}

/// Conexión de voz de una sesión
#[async_trait]
pub trait VoiceLink: Send + Sync {
    /// Reproduce un archivo local. `completion` se dispara al terminar o fallar,
    /// incluso si la reproducción ni siquiera pudo empezar.
    async fn play_file(&self, path: &Path, completion: Completion);

    async fn stop(&self);

    async fn disconnect(&self);

    async fn is_connected(&self) -> bool;
}

#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceLink>, VoiceError>;
}

/// Mensajes para el canal de texto de quien pidió la música
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn say(&self, text: &str);
}
