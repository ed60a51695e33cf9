use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::queue::QueueFull;
use super::session::{QueueSnapshot, SessionError, SessionHandle, SessionSettings};
use super::voice::{Notifier, VoiceConnector};
use crate::sources::{Fetcher, Resolver};

pub const NOT_IN_VOICE: &str = "❌ Debes estar en un canal de voz para usar este comando.";
pub const NOTHING_PLAYING: &str = "❌ No hay nada reproduciéndose.";
pub const NO_SESSION: &str = "❌ No estoy en un canal de voz.";
const JOIN_FAILED: &str = "❌ No pude conectarme al canal de voz.";
const SESSION_GONE: &str = "❌ La sesión de voz terminó, intenta de nuevo.";

/// Registro de sesiones por guild; un método por comando
pub struct MusicManager {
    sessions: DashMap<GuildId, SessionHandle>,
    /// Serializa la creación de sesiones
    connect_lock: Mutex<()>,
    connector: Arc<dyn VoiceConnector>,
    resolver: Arc<dyn Resolver>,
    fetcher: Arc<dyn Fetcher>,
    settings: SessionSettings,
}

impl MusicManager {
    pub fn new(
        connector: Arc<dyn VoiceConnector>,
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn Fetcher>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            connect_lock: Mutex::new(()),
            connector,
            resolver,
            fetcher,
            settings,
        }
    }

    /// `/play`: conecta si hace falta, resuelve y encola
    pub async fn play(
        &self,
        guild_id: GuildId,
        voice_channel: Option<ChannelId>,
        query: &str,
        notifier: Arc<dyn Notifier>,
    ) -> String {
        let Some(channel_id) = voice_channel else {
            return NOT_IN_VOICE.to_string();
        };

        let session = match self.ensure_session(guild_id, channel_id, notifier.clone()).await {
            Ok(session) => session,
            Err(message) => return message,
        };
        // Sin desconexión por inactividad mientras se resuelve la consulta
        let _ = session.touch();

        info!("🔎 Resolviendo '{}' en guild {}", query, guild_id);
        let resolution = self.resolver.resolve(query).await;
        if resolution.tracks.is_empty() {
            let _ = session.release();
            return resolution.message;
        }

        let enqueued = session.enqueue(resolution.tracks, Some(notifier)).await;
        let _ = session.release();

        match enqueued {
            Ok(report) if report.accepted == 0 => format!(
                "❌ {}.",
                QueueFull {
                    max: self.settings.max_queue_size
                }
            ),
            Ok(report) if report.rejected > 0 => format!(
                "{}\n⚠️ La cola está llena: {} canciones no se agregaron.",
                resolution.message, report.rejected
            ),
            Ok(_) => resolution.message,
            Err(SessionError::Closed) => SESSION_GONE.to_string(),
        }
    }

    pub async fn skip(&self, guild_id: GuildId) -> String {
        let Some(session) = self.live_session(guild_id) else {
            return NOTHING_PLAYING.to_string();
        };

        match session.skip().await {
            Ok(true) => "⏭️ Canción saltada.".to_string(),
            Ok(false) | Err(_) => NOTHING_PLAYING.to_string(),
        }
    }

    pub async fn stop(&self, guild_id: GuildId) -> String {
        let Some(session) = self.live_session(guild_id) else {
            return NO_SESSION.to_string();
        };

        match session.stop().await {
            Ok(report) => {
                debug!(
                    "⏹️ Stop en guild {}: {} canciones eliminadas",
                    guild_id, report.cleared
                );
                "⏹️ Reproducción detenida y cola limpiada.".to_string()
            }
            Err(_) => NO_SESSION.to_string(),
        }
    }

    /// Estado de la cola; `None` si no hay sesión
    pub async fn queue(&self, guild_id: GuildId) -> Option<QueueSnapshot> {
        self.live_session(guild_id)?.snapshot().await.ok()
    }

    pub async fn join(
        &self,
        guild_id: GuildId,
        voice_channel: Option<ChannelId>,
        notifier: Arc<dyn Notifier>,
    ) -> String {
        let Some(channel_id) = voice_channel else {
            return NOT_IN_VOICE.to_string();
        };

        match self.ensure_session(guild_id, channel_id, notifier).await {
            Ok(session) => {
                // Reinicia el plazo de inactividad de una sesión ya existente
                let _ = session.touch();
                let _ = session.release();
                format!("✅ Conectado a <#{}>", channel_id)
            }
            Err(message) => message,
        }
    }

    pub async fn leave(&self, guild_id: GuildId) -> String {
        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            return NO_SESSION.to_string();
        };

        match session.leave().await {
            Ok(()) => "👋 Desconectado del canal de voz.".to_string(),
            Err(_) => NO_SESSION.to_string(),
        }
    }

    /// El bot salió del canal por fuera de los comandos (kick, desconexión)
    pub fn voice_disconnected(&self, guild_id: GuildId) {
        if let Some((_, session)) = self.sessions.remove(&guild_id) {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            session.detach();
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| !s.is_closed()).count()
    }

    fn live_session(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions
            .get(&guild_id)
            .map(|s| s.clone())
            .filter(|s| !s.is_closed())
    }

    async fn ensure_session(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        notifier: Arc<dyn Notifier>,
    ) -> Result<SessionHandle, String> {
        let _guard = self.connect_lock.lock().await;

        if let Some(session) = self.live_session(guild_id) {
            return Ok(session);
        }

        let link = self
            .connector
            .connect(guild_id, channel_id)
            .await
            .map_err(|e| {
                error!("❌ {}", e);
                JOIN_FAILED.to_string()
            })?;

        let session = SessionHandle::spawn(
            guild_id,
            link,
            self.fetcher.clone(),
            Some(notifier),
            self.settings.clone(),
        );
        // Reemplaza una sesión cerrada si la había
        self.sessions.insert(guild_id, session.clone());
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::voice::{Completion, VoiceError, VoiceLink};
    use crate::sources::{FetchError, FetchedTrack, Resolution, TrackDescriptor};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeLink {
        completion: SyncMutex<Option<Completion>>,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl VoiceLink for FakeLink {
        async fn play_file(&self, _path: &Path, completion: Completion) {
            *self.completion.lock() = Some(completion);
        }

        async fn stop(&self) {
            let completion = self.completion.lock().take();
            if let Some(completion) = completion {
                completion.finish(None);
            }
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        async fn is_connected(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        links: SyncMutex<Vec<Arc<FakeLink>>>,
        refuse: bool,
    }

    #[async_trait]
    impl VoiceConnector for FakeConnector {
        async fn connect(
            &self,
            _guild_id: GuildId,
            _channel_id: ChannelId,
        ) -> Result<Arc<dyn VoiceLink>, VoiceError> {
            if self.refuse {
                return Err(VoiceError::Join("sin permisos".to_string()));
            }
            // Una conexión real tarda; deja pasar a otras tareas
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.connects.fetch_add(1, Ordering::SeqCst);
            let link = Arc::new(FakeLink::default());
            self.links.lock().push(link.clone());
            Ok(link)
        }
    }

    /// Cada consulta es un track; "nada" no encuentra nada y las que empiezan
    /// con "lenta" tardan 70 s en resolverse
    struct FakeResolver;

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn resolve(&self, query: &str) -> Resolution {
            if query.starts_with("lenta") {
                tokio::time::sleep(Duration::from_secs(70)).await;
            }
            if query.starts_with("lenta-nada") {
                return Resolution::failed("❌ Sin resultados");
            }
            if query == "nada" {
                return Resolution::failed("❌ Sin resultados");
            }
            Resolution {
                tracks: query
                    .split(',')
                    .map(|q| TrackDescriptor::new(q, q))
                    .collect(),
                message: format!("**Agregado a la cola:** `{}`", query),
            }
        }
    }

    struct FakeFetcher {
        dir: PathBuf,
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, identifier: &str) -> Result<FetchedTrack, FetchError> {
            let path = self.dir.join(format!("{}.opus", identifier));
            std::fs::write(&path, b"audio")?;
            Ok(FetchedTrack {
                title: identifier.to_string(),
                path,
            })
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl Notifier for SilentNotifier {
        async fn say(&self, _text: &str) {}
    }

    fn manager(connector: Arc<FakeConnector>, dir: &Path, max_queue_size: usize) -> MusicManager {
        MusicManager::new(
            connector,
            Arc::new(FakeResolver),
            Arc::new(FakeFetcher {
                dir: dir.to_path_buf(),
            }),
            SessionSettings {
                max_queue_size,
                ..SessionSettings::default()
            },
        )
    }

    fn notifier() -> Arc<dyn Notifier> {
        Arc::new(SilentNotifier)
    }

    const GUILD: GuildId = GuildId::new(10);
    const CHANNEL: ChannelId = ChannelId::new(20);

    #[tokio::test(start_paused = true)]
    async fn play_requires_a_voice_channel() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(connector.clone(), dir.path(), 10);

        let reply = manager.play(GUILD, None, "song", notifier()).await;

        assert_eq!(reply, NOT_IN_VOICE);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn plays_reuse_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(connector.clone(), dir.path(), 10);

        let first = manager.play(GUILD, Some(CHANNEL), "a", notifier()).await;
        let second = manager.play(GUILD, Some(CHANNEL), "b", notifier()).await;

        assert!(first.contains("`a`"));
        assert!(second.contains("`b`"));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = manager.queue(GUILD).await.unwrap();
        assert_eq!(snapshot.now_playing.as_deref(), Some("a"));
        assert_eq!(snapshot.upcoming.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_plays_create_a_single_session() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(connector.clone(), dir.path(), 10);

        tokio::join!(
            manager.play(GUILD, Some(CHANNEL), "a", notifier()),
            manager.play(GUILD, Some(CHANNEL), "b", notifier()),
        );

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_resolution_returns_the_resolver_message() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(FakeConnector::default()), dir.path(), 10);

        let reply = manager.play(GUILD, Some(CHANNEL), "nada", notifier()).await;
        assert_eq!(reply, "❌ Sin resultados");
    }

    #[tokio::test(start_paused = true)]
    async fn reports_tracks_that_did_not_fit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(FakeConnector::default()), dir.path(), 2);

        // Caben dos; "a" sale de la cola al empezar a descargarse
        let reply = manager
            .play(GUILD, Some(CHANNEL), "a,b,c,d", notifier())
            .await;
        assert!(reply.contains("2 canciones no se agregaron"), "{}", reply);

        let partial = manager.play(GUILD, Some(CHANNEL), "e,f", notifier()).await;
        assert!(partial.contains("1 canciones no se agregaron"), "{}", partial);

        let full = manager.play(GUILD, Some(CHANNEL), "g", notifier()).await;
        assert!(full.contains("La cola está llena (máximo 2"), "{}", full);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector {
            refuse: true,
            ..FakeConnector::default()
        });
        let manager = manager(connector, dir.path(), 10);

        let reply = manager.join(GUILD, Some(CHANNEL), notifier()).await;
        assert_eq!(reply, JOIN_FAILED);
        assert_eq!(manager.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_without_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(FakeConnector::default()), dir.path(), 10);

        assert_eq!(manager.skip(GUILD).await, NOTHING_PLAYING);
        assert_eq!(manager.stop(GUILD).await, NO_SESSION);
        assert_eq!(manager.leave(GUILD).await, NO_SESSION);
        assert!(manager.queue(GUILD).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_and_stop_reach_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(FakeConnector::default()), dir.path(), 10);

        manager.play(GUILD, Some(CHANNEL), "a,b", notifier()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.skip(GUILD).await, "⏭️ Canción saltada.");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = manager.queue(GUILD).await.unwrap();
        assert_eq!(snapshot.now_playing.as_deref(), Some("b"));

        assert!(manager.stop(GUILD).await.contains("detenida"));
        let snapshot = manager.queue(GUILD).await.unwrap();
        assert!(snapshot.now_playing.is_none());
        assert_eq!(manager.skip(GUILD).await, NOTHING_PLAYING);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_then_play_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(connector.clone(), dir.path(), 10);

        manager.join(GUILD, Some(CHANNEL), notifier()).await;
        assert!(manager.leave(GUILD).await.contains("Desconectado"));
        assert_eq!(connector.links.lock()[0].disconnects.load(Ordering::SeqCst), 1);

        manager.play(GUILD, Some(CHANNEL), "a", notifier()).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn external_disconnect_drops_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(connector.clone(), dir.path(), 10);

        manager.join(GUILD, Some(CHANNEL), notifier()).await;
        manager.voice_disconnected(GUILD);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.active_sessions(), 0);
        // No se vuelve a desconectar lo que ya se cayó
        assert_eq!(connector.links.lock()[0].disconnects.load(Ordering::SeqCst), 0);

        manager.join(GUILD, Some(CHANNEL), notifier()).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_replaced_on_next_use() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(connector.clone(), dir.path(), 10);

        manager.join(GUILD, Some(CHANNEL), notifier()).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(manager.active_sessions(), 0);

        manager.play(GUILD, Some(CHANNEL), "a", notifier()).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(manager.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_resolution_does_not_trip_the_idle_timer() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(connector.clone(), dir.path(), 10);

        let reply = manager
            .play(GUILD, Some(CHANNEL), "lenta-playlist", notifier())
            .await;

        assert!(reply.contains("Agregado"), "{}", reply);
        assert_eq!(manager.active_sessions(), 1);
        assert_eq!(connector.links.lock()[0].disconnects.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = manager.queue(GUILD).await.unwrap();
        assert_eq!(snapshot.now_playing.as_deref(), Some("lenta-playlist"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_slow_resolution_rearms_the_idle_timer() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(connector.clone(), dir.path(), 10);

        let reply = manager
            .play(GUILD, Some(CHANNEL), "lenta-nada", notifier())
            .await;
        assert_eq!(reply, "❌ Sin resultados");
        assert_eq!(manager.active_sessions(), 1);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(manager.active_sessions(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.active_sessions(), 0);
        assert_eq!(connector.links.lock()[0].disconnects.load(Ordering::SeqCst), 1);
    }
}
