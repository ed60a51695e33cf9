use anyhow::Result;
use async_trait::async_trait;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup,
        CreateInteractionResponseMessage, EditInteractionResponse,
    },
    http::Http,
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::{voice::Notifier, MusicManager},
    bot::QuackBot,
    ui::embeds,
};

pub const NOT_READY: &str = "El módulo de música aún se está inicializando.";
pub const GUILD_ONLY: &str = "❌ Este comando sólo funciona dentro de un servidor.";

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &QuackBot) -> Result<()> {
    let guild_id = match require_guild(command.guild_id) {
        Ok(guild_id) => guild_id,
        Err(message) => {
            warn!("🚫 Comando /{} usado fuera de un servidor por {}", command.data.name, command.user.name);
            return reply_ephemeral(ctx, &command, message).await;
        }
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let Some(manager) = bot.manager() else {
        warn!("⏳ Comando /{} antes de terminar la inicialización", command.data.name);
        return reply(ctx, &command, NOT_READY).await;
    };

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, manager, guild_id).await?,
        "skip" => reply(ctx, &command, &manager.skip(guild_id).await).await?,
        "stop" => reply(ctx, &command, &manager.stop(guild_id).await).await?,
        "queue" => handle_queue(ctx, &command, manager, guild_id).await?,
        "join" => {
            let channel = user_voice_channel(ctx, guild_id, command.user.id);
            let notifier = ChannelNotifier::for_command(ctx, &command);
            let message = manager.join(guild_id, channel, notifier).await;
            reply(ctx, &command, &message).await?;
        }
        "leave" => reply(ctx, &command, &manager.leave(guild_id).await).await?,
        _ => reply_ephemeral(ctx, &command, "❌ Comando no reconocido").await?,
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    manager: &MusicManager,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    let channel = user_voice_channel(ctx, guild_id, command.user.id);
    if channel.is_none() {
        return reply(ctx, command, crate::audio::manager::NOT_IN_VOICE).await;
    }

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().content("🔎 Procesando tu búsqueda…"),
        )
        .await?;

    let notifier = ChannelNotifier::for_command(ctx, command);
    let message = manager.play(guild_id, channel, &query, notifier).await;

    command
        .create_followup(
            &ctx.http,
            CreateInteractionResponseFollowup::new().content(message),
        )
        .await?;

    Ok(())
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    manager: &MusicManager,
    guild_id: GuildId,
) -> Result<()> {
    let page = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "page")
        .and_then(|opt| opt.value.as_i64())
        .unwrap_or(1)
        .max(1) as usize;

    let Some(snapshot) = manager.queue(guild_id).await else {
        return reply(ctx, command, embeds::EMPTY_QUEUE).await;
    };

    let embed = embeds::create_queue_embed(&snapshot, page);
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;

    Ok(())
}

async fn reply(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;

    Ok(())
}

async fn reply_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}

// Funciones auxiliares

/// Los comandos de música sólo tienen sentido dentro de un servidor
fn require_guild(guild_id: Option<GuildId>) -> Result<GuildId, &'static str> {
    guild_id.ok_or(GUILD_ONLY)
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// Envía los avisos de la sesión al canal donde se usó el comando
pub struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelNotifier {
    fn for_command(ctx: &Context, command: &CommandInteraction) -> Arc<dyn Notifier> {
        Arc::new(Self {
            http: ctx.http.clone(),
            channel_id: command.channel_id,
        })
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn say(&self, text: &str) {
        if let Err(e) = self.channel_id.say(&self.http, text).await {
            warn!("⚠️ No pude enviar mensaje al canal {}: {}", self.channel_id, e);
        }
    }
}
