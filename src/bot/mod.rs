//! # Bot Module
//!
//! Discord side of Quack Music.
//!
//! [`QuackBot`] implements Serenity's [`EventHandler`]:
//!
//! - `ready` builds the [`MusicManager`] (Spotify client, yt-dlp search and
//!   downloads, songbird connector) and registers the slash commands.
//! - `interaction_create` dispatches slash commands to [`handlers`].
//! - `voice_state_update` tears down the session when the bot is removed from
//!   its voice channel from outside.
//!
//! Commands that arrive before `ready` has finished get a "still starting"
//! reply instead of failing.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{player::SongbirdConnector, MusicManager},
    config::Config,
    sources::{DiskFetcher, MetadataLookup, QueryResolver, SpotifyClient, YtDlp},
    storage::MediaStore,
};

pub struct QuackBot {
    config: Arc<Config>,
    store: MediaStore,
    /// Se construye una sola vez en el primer `ready`
    manager: OnceCell<Arc<MusicManager>>,
}

impl QuackBot {
    pub fn new(config: Config, store: MediaStore) -> Self {
        Self {
            config: Arc::new(config),
            store,
            manager: OnceCell::new(),
        }
    }

    pub fn manager(&self) -> Option<&MusicManager> {
        self.manager.get().map(|m| m.as_ref())
    }

    async fn build_manager(&self, ctx: &Context) -> Result<MusicManager> {
        let songbird = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        let metadata = self.spotify_client().await;
        let ytdlp = YtDlp::new(self.config.cookies_file.clone());

        let resolver = QueryResolver::new(
            metadata,
            Arc::new(ytdlp.clone()),
            self.config.max_playlist_size,
        );
        let fetcher = DiskFetcher::new(
            ytdlp,
            self.store.clone(),
            Some(self.config.max_song_duration),
        );

        Ok(MusicManager::new(
            Arc::new(SongbirdConnector::new(songbird)),
            Arc::new(resolver),
            Arc::new(fetcher),
            self.config.session_settings(),
        ))
    }

    /// Cliente de Spotify si hay credenciales válidas
    async fn spotify_client(&self) -> Option<Arc<dyn MetadataLookup>> {
        let Some((id, secret)) = self.config.spotify_credentials() else {
            info!("🎧 Spotify no configurado; los enlaces se buscarán como texto");
            return None;
        };

        let client = match SpotifyClient::new(id, secret) {
            Ok(client) => client,
            Err(e) => {
                error!("❌ No se pudo crear el cliente de Spotify: {}", e);
                return None;
            }
        };

        match client.verify().await {
            Ok(()) => {
                info!("✅ Credenciales de Spotify verificadas");
                Some(Arc::new(client))
            }
            Err(e) => {
                error!("❌ Credenciales de Spotify rechazadas: {}", e);
                None
            }
        }
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for QuackBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🦆 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        // `ready` se repite al reconectar; el manager se conserva
        if !self.manager.initialized() {
            match self.build_manager(&ctx).await {
                Ok(manager) => {
                    if self.manager.set(Arc::new(manager)).is_err() {
                        warn!("⚠️ El módulo de música ya estaba inicializado");
                    } else {
                        info!("🎶 Módulo de música listo");
                    }
                }
                Err(e) => error!("❌ Error inicializando el módulo de música: {:?}", e),
            }
        }

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        // Sólo interesa el propio bot saliendo de un canal
        if new.user_id != ctx.cache.current_user().id {
            return;
        }

        if old.is_some() && new.channel_id.is_none() {
            if let (Some(guild_id), Some(manager)) = (new.guild_id, self.manager()) {
                manager.voice_disconnected(guild_id);
            }
        }
    }
}
