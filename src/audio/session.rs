//! Playback session actor.
//!
//! One tokio task per voice connection owns the queue, the player state and
//! the idle timer. Everything that touches that state (user commands,
//! playback completions, fetch results, timers) arrives as a
//! [`SessionCommand`] on its mailbox, so there is exactly one mutator and
//! re-entry into the scheduler is always a posted message, never recursion.
//!
//! Downloads run in spawned tasks that hold the session's download lock, so a
//! session never has two fetches in flight no matter whether the player or the
//! prefetch tick asked for them.

use serenity::model::id::GuildId;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{QueuedTrack, TrackQueue};
use super::voice::{Completion, Notifier, VoiceLink};
use crate::sources::{FetchError, FetchedTrack, Fetcher, TrackDescriptor};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub prefetch_interval: Duration,
    pub idle_timeout: Duration,
    pub cleanup_delay: Duration,
    pub max_queue_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            prefetch_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            cleanup_delay: Duration::from_secs(2),
            max_queue_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Fetching,
    Playing,
    CleaningUp,
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlayerState::Fetching | PlayerState::Playing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReport {
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub cleared: usize,
    pub was_playing: bool,
}

#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub now_playing: Option<String>,
    pub state: PlayerState,
    pub upcoming: Vec<TrackDescriptor>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("la sesión de voz ya terminó")]
    Closed,
}

enum SessionCommand {
    Enqueue {
        tracks: Vec<TrackDescriptor>,
        notifier: Option<Arc<dyn Notifier>>,
        reply: oneshot::Sender<EnqueueReport>,
    },
    Touch,
    Release,
    Skip {
        reply: oneshot::Sender<bool>,
    },
    Stop {
        reply: oneshot::Sender<StopReport>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    Detached,
    Advance,
    PlaybackFinished {
        generation: u64,
        error: Option<String>,
    },
    PlayFetchDone {
        epoch: u64,
        item: QueuedTrack,
        result: Result<FetchedTrack, FetchError>,
    },
    PrefetchDone {
        epoch: u64,
        ticket: u64,
        query: String,
        result: Result<FetchedTrack, FetchError>,
    },
    CleanupDue {
        path: PathBuf,
    },
    IdleTimeout {
        generation: u64,
    },
}

/// Handle clonable hacia el actor de una sesión
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Arranca el actor de la sesión y arma el temporizador de inactividad
    pub fn spawn(
        guild_id: GuildId,
        link: Arc<dyn VoiceLink>,
        fetcher: Arc<dyn Fetcher>,
        notifier: Option<Arc<dyn Notifier>>,
        settings: SessionSettings,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            guild_id,
            tx: tx.clone(),
            rx,
            queue: TrackQueue::new(settings.max_queue_size),
            state: PlayerState::Idle,
            current: None,
            link,
            fetcher,
            notifier,
            download_lock: Arc::new(Mutex::new(())),
            prefetch_in_flight: false,
            pending_requests: 0,
            epoch: 0,
            play_generation: 0,
            idle_timer: None,
            idle_generation: 0,
            settings,
        };

        tokio::spawn(session.run());
        Self { tx }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn enqueue(
        &self,
        tracks: Vec<TrackDescriptor>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<EnqueueReport, SessionError> {
        self.request(|reply| SessionCommand::Enqueue {
            tracks,
            notifier,
            reply,
        })
        .await
    }

    /// Empieza una petición de usuario: la sesión no se desconecta por
    /// inactividad hasta el `release` correspondiente
    pub fn touch(&self) -> Result<(), SessionError> {
        self.tx
            .send(SessionCommand::Touch)
            .map_err(|_| SessionError::Closed)
    }

    /// Termina una petición empezada con `touch`
    pub fn release(&self) -> Result<(), SessionError> {
        self.tx
            .send(SessionCommand::Release)
            .map_err(|_| SessionError::Closed)
    }

    /// Detiene la canción actual; `false` si no había nada sonando
    pub async fn skip(&self) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::Skip { reply }).await
    }

    pub async fn stop(&self) -> Result<StopReport, SessionError> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Desconecta del canal de voz y termina la sesión
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Leave { reply }).await
    }

    /// La conexión de voz se perdió desde fuera; sólo termina la sesión
    pub fn detach(&self) {
        let _ = self.tx.send(SessionCommand::Detached);
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }
}

struct NowPlaying {
    title: String,
    path: PathBuf,
}

struct Session {
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<SessionCommand>,
    rx: mpsc::UnboundedReceiver<SessionCommand>,
    queue: TrackQueue,
    state: PlayerState,
    current: Option<NowPlaying>,
    link: Arc<dyn VoiceLink>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Option<Arc<dyn Notifier>>,
    download_lock: Arc<Mutex<()>>,
    prefetch_in_flight: bool,
    /// Peticiones entre `touch` y `release`; mientras haya alguna no hay desconexión
    pending_requests: usize,
    /// Sube con cada `stop`; invalida descargas en curso
    epoch: u64,
    /// Identifica la reproducción actual; los avisos de otras se ignoran
    play_generation: u64,
    idle_timer: Option<CancellationToken>,
    idle_generation: u64,
    settings: SessionSettings,
}

impl Session {
    async fn run(mut self) {
        info!("🎶 Sesión de música iniciada en guild {}", self.guild_id);

        let mut ticker = tokio::time::interval(self.settings.prefetch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // El primer tick es inmediato
        ticker.tick().await;

        self.arm_idle_timer();

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    let Some(command) = command else { break };
                    if self.handle(command).await.is_break() {
                        break;
                    }
                }
                _ = ticker.tick() => self.prefetch_tick(),
            }
        }

        self.shutdown();
        info!("🛑 Sesión de música terminada en guild {}", self.guild_id);
    }

    async fn handle(&mut self, command: SessionCommand) -> ControlFlow<()> {
        match command {
            SessionCommand::Enqueue {
                tracks,
                notifier,
                reply,
            } => {
                if notifier.is_some() {
                    self.notifier = notifier;
                }
                let report = self.enqueue(tracks).await;
                let _ = reply.send(report);
            }
            SessionCommand::Touch => {
                self.pending_requests += 1;
                self.cancel_idle_timer();
            }
            SessionCommand::Release => {
                self.pending_requests = self.pending_requests.saturating_sub(1);
                if self.pending_requests == 0
                    && self.state == PlayerState::Idle
                    && self.queue.is_empty()
                {
                    self.arm_idle_timer();
                }
            }
            SessionCommand::Skip { reply } => {
                let skipped = self.state == PlayerState::Playing;
                if skipped {
                    info!("⏭️ Saltando canción en guild {}", self.guild_id);
                    // La finalización de la pista avanza la cola
                    self.link.stop().await;
                }
                let _ = reply.send(skipped);
            }
            SessionCommand::Stop { reply } => {
                let report = self.stop().await;
                let _ = reply.send(report);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(QueueSnapshot {
                    now_playing: self.current.as_ref().map(|np| np.title.clone()),
                    state: self.state,
                    upcoming: self.queue.snapshot(),
                });
            }
            SessionCommand::Leave { reply } => {
                self.cancel_idle_timer();
                self.link.disconnect().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
            SessionCommand::Detached => {
                info!("🔌 Conexión de voz perdida en guild {}", self.guild_id);
                return ControlFlow::Break(());
            }
            SessionCommand::Advance => self.advance().await,
            SessionCommand::PlaybackFinished { generation, error } => {
                self.playback_finished(generation, error);
            }
            SessionCommand::PlayFetchDone {
                epoch,
                item,
                result,
            } => self.play_fetch_done(epoch, item, result).await,
            SessionCommand::PrefetchDone {
                epoch,
                ticket,
                query,
                result,
            } => self.prefetch_done(epoch, ticket, query, result),
            SessionCommand::CleanupDue { path } => self.cleanup_due(&path),
            SessionCommand::IdleTimeout { generation } => {
                return self.idle_timeout(generation).await;
            }
        }

        ControlFlow::Continue(())
    }

    async fn enqueue(&mut self, tracks: Vec<TrackDescriptor>) -> EnqueueReport {
        let total = tracks.len();
        let rejected = self.queue.extend(tracks);
        let accepted = total - rejected.len();

        if !rejected.is_empty() {
            warn!(
                "📋 Cola llena en guild {}: {} canciones rechazadas",
                self.guild_id,
                rejected.len()
            );
        }

        if accepted > 0 {
            self.cancel_idle_timer();
            // Cola vacía y nada sonando: arranca ya, sin esperar al tick
            self.advance().await;
        }

        EnqueueReport {
            accepted,
            rejected: rejected.len(),
        }
    }

    /// Saca el siguiente track y lo pone a sonar (o lo descarga primero)
    async fn advance(&mut self) {
        if self.state.is_playing() {
            return;
        }

        let Some(item) = self.queue.pop_front() else {
            if self.state != PlayerState::Idle {
                info!("📭 Cola vacía en guild {}", self.guild_id);
            }
            self.state = PlayerState::Idle;
            self.arm_idle_timer();
            return;
        };

        self.cancel_idle_timer();

        match item.track.filepath.clone() {
            None => {
                debug!("⬇️ [{}] Descargando para reproducir: {}", item.ticket, item.track.query);
                self.state = PlayerState::Fetching;
                self.spawn_play_fetch(item);
            }
            Some(path) if !path.exists() => {
                warn!(
                    "⚠️ El archivo de '{}' ya no existe: {}",
                    item.track.title,
                    path.display()
                );
                self.notify(format!("❌ No se pudo reproducir `{}`.", item.track.title));
                self.post(SessionCommand::Advance);
            }
            Some(path) => self.start_playback(item.track.title, path).await,
        }
    }

    async fn start_playback(&mut self, title: String, path: PathBuf) {
        self.play_generation += 1;
        let generation = self.play_generation;
        self.state = PlayerState::Playing;
        self.current = Some(NowPlaying {
            title: title.clone(),
            path: path.clone(),
        });

        let tx = self.tx.clone();
        let completion = Completion::new(move |error| {
            let _ = tx.send(SessionCommand::PlaybackFinished { generation, error });
        });
        self.link.play_file(&path, completion).await;

        info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, title);
        self.notify(format!("**Reproduciendo ahora:** `{}`", title));
    }

    fn playback_finished(&mut self, generation: u64, error: Option<String>) {
        if generation != self.play_generation || self.state != PlayerState::Playing {
            debug!("Aviso de fin obsoleto ({}), ignorado", generation);
            return;
        }

        if let Some(error) = error {
            error!("❌ Error de reproducción en guild {}: {}", self.guild_id, error);
        }

        self.state = PlayerState::CleaningUp;
        if let Some(finished) = self.current.take() {
            self.schedule_cleanup(finished.path);
        }
        self.post(SessionCommand::Advance);
    }

    fn spawn_play_fetch(&self, item: QueuedTrack) {
        let epoch = self.epoch;
        let tx = self.tx.clone();
        let fetcher = self.fetcher.clone();
        let lock = self.download_lock.clone();

        tokio::spawn(async move {
            let result = fetch_locked(fetcher, lock, item.track.query.clone()).await;
            let done = SessionCommand::PlayFetchDone {
                epoch,
                item,
                result,
            };
            if let Err(unsent) = tx.send(done) {
                if let SessionCommand::PlayFetchDone {
                    result: Ok(fetched),
                    ..
                } = unsent.0
                {
                    remove_media_file(&fetched.path);
                }
            }
        });
    }

    async fn play_fetch_done(
        &mut self,
        epoch: u64,
        item: QueuedTrack,
        result: Result<FetchedTrack, FetchError>,
    ) {
        if epoch != self.epoch {
            debug!("Descarga de '{}' descartada tras stop", item.track.title);
            if let Ok(fetched) = result {
                self.schedule_cleanup(fetched.path);
            }
            return;
        }

        match result {
            Ok(fetched) if !fetched.path.exists() => {
                warn!(
                    "⚠️ El archivo de '{}' desapareció tras la descarga: {}",
                    fetched.title,
                    fetched.path.display()
                );
                self.notify(format!("❌ No se pudo reproducir `{}`.", fetched.title));
                self.state = PlayerState::Idle;
                self.post(SessionCommand::Advance);
            }
            Ok(fetched) => self.start_playback(fetched.title, fetched.path).await,
            Err(e) => {
                warn!("❌ No se pudo descargar '{}': {}", item.track.query, e);
                self.notify(format!("❌ No se pudo descargar `{}`: {}", item.track.title, e));
                self.state = PlayerState::Idle;
                self.post(SessionCommand::Advance);
            }
        }
    }

    /// Precarga el frente de la cola; nunca hay dos precargas a la vez
    fn prefetch_tick(&mut self) {
        if self.prefetch_in_flight {
            return;
        }

        let Some(front) = self.queue.peek_front() else {
            return;
        };
        if front.track.is_fetched() {
            return;
        }

        let ticket = front.ticket;
        let query = front.track.query.clone();
        debug!("📥 [{}] Precargando: {}", ticket, query);

        self.prefetch_in_flight = true;
        let epoch = self.epoch;
        let tx = self.tx.clone();
        let fetcher = self.fetcher.clone();
        let lock = self.download_lock.clone();

        tokio::spawn(async move {
            let result = fetch_locked(fetcher, lock, query.clone()).await;
            let done = SessionCommand::PrefetchDone {
                epoch,
                ticket,
                query,
                result,
            };
            // Sesión terminada: el archivo ya no es de nadie
            if let Err(unsent) = tx.send(done) {
                if let SessionCommand::PrefetchDone {
                    result: Ok(fetched),
                    ..
                } = unsent.0
                {
                    remove_media_file(&fetched.path);
                }
            }
        });
    }

    fn prefetch_done(
        &mut self,
        epoch: u64,
        ticket: u64,
        query: String,
        result: Result<FetchedTrack, FetchError>,
    ) {
        self.prefetch_in_flight = false;
        let current_epoch = epoch == self.epoch;

        match result {
            Ok(fetched) => {
                let path = fetched.path.clone();
                if current_epoch && self.queue.fill_front(ticket, &query, fetched.title, fetched.path) {
                    info!("✅ [{}] Precargada: {}", ticket, path.display());
                } else {
                    debug!("[{}] La cola cambió durante la precarga, resultado descartado", ticket);
                    // Tras un stop nadie más va a usar el archivo
                    if !current_epoch {
                        self.schedule_cleanup(path);
                    }
                }
            }
            Err(e) => {
                warn!("⚠️ [{}] Falló la precarga de '{}': {}", ticket, query, e);
                if current_epoch && self.queue.remove_front(ticket, &query).is_some() {
                    info!("🗑️ [{}] Eliminada de la cola: {}", ticket, query);
                }
            }
        }
    }

    async fn stop(&mut self) -> StopReport {
        let was_playing = self.state.is_playing();
        let cleared = self.queue.clear();
        let report = StopReport {
            cleared: cleared.len(),
            was_playing,
        };

        for item in cleared {
            if let Some(path) = item.track.filepath {
                self.schedule_cleanup(path);
            }
        }

        // Descargas en curso y el aviso de fin del stop quedan obsoletos
        self.epoch += 1;
        self.play_generation += 1;

        if let Some(current) = self.current.take() {
            self.schedule_cleanup(current.path);
        }
        self.link.stop().await;

        self.state = PlayerState::Idle;
        self.arm_idle_timer();

        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
        report
    }

    fn schedule_cleanup(&self, path: PathBuf) {
        let tx = self.tx.clone();
        let delay = self.settings.cleanup_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(unsent) = tx.send(SessionCommand::CleanupDue { path }) {
                // La sesión ya terminó: nadie puede estar usando el archivo
                if let SessionCommand::CleanupDue { path } = unsent.0 {
                    remove_media_file(&path);
                }
            }
        });
    }

    fn cleanup_due(&self, path: &Path) {
        // La descarga en curso puede estar devolviendo este mismo archivo
        if self.state == PlayerState::Fetching {
            debug!("⏳ {} se revisará tras la descarga en curso", path.display());
            self.schedule_cleanup(path.to_path_buf());
            return;
        }

        let playing = self.current.as_ref().is_some_and(|np| np.path == path);
        if playing || self.queue.references(path) {
            debug!("♻️ {} sigue en uso, no se borra", path.display());
            return;
        }
        remove_media_file(path);
    }

    fn arm_idle_timer(&mut self) {
        self.cancel_idle_timer();
        self.idle_generation += 1;

        let generation = self.idle_generation;
        let token = CancellationToken::new();
        self.idle_timer = Some(token.clone());

        let tx = self.tx.clone();
        let timeout = self.settings.idle_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let _ = tx.send(SessionCommand::IdleTimeout { generation });
                }
            }
        });
    }

    fn cancel_idle_timer(&mut self) {
        if let Some(token) = self.idle_timer.take() {
            token.cancel();
        }
    }

    async fn idle_timeout(&mut self, generation: u64) -> ControlFlow<()> {
        if generation != self.idle_generation
            || self.idle_timer.is_none()
            || self.state != PlayerState::Idle
            || !self.queue.is_empty()
        {
            return ControlFlow::Continue(());
        }

        // Se vuelve a armar con el último `release`
        if self.pending_requests > 0 {
            self.idle_timer = None;
            return ControlFlow::Continue(());
        }

        self.idle_timer = None;
        if self.link.is_connected().await {
            info!("💤 Desconectando por inactividad en guild {}", self.guild_id);
            self.notify("👋 Me desconecté por inactividad.".to_string());
            self.link.disconnect().await;
        }

        ControlFlow::Break(())
    }

    fn shutdown(&mut self) {
        self.cancel_idle_timer();
        self.epoch += 1;
        self.play_generation += 1;

        for item in self.queue.clear() {
            if let Some(path) = item.track.filepath {
                self.schedule_cleanup(path);
            }
        }
        if let Some(current) = self.current.take() {
            self.schedule_cleanup(current.path);
        }
    }

    fn post(&self, command: SessionCommand) {
        let _ = self.tx.send(command);
    }

    fn notify(&self, text: String) {
        if let Some(notifier) = self.notifier.clone() {
            tokio::spawn(async move {
                notifier.say(&text).await;
            });
        }
    }
}

/// Descarga bajo el lock de la sesión; un pánico del fetcher se vuelve error
async fn fetch_locked(
    fetcher: Arc<dyn Fetcher>,
    lock: Arc<Mutex<()>>,
    query: String,
) -> Result<FetchedTrack, FetchError> {
    let _guard = lock.lock().await;
    tokio::spawn(async move { fetcher.fetch(&query).await })
        .await
        .map_err(|e| FetchError::Worker(e.to_string()))?
}

fn remove_media_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("🧹 Archivo eliminado: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("⚠️ No se pudo eliminar {}: {}", path.display(), e),
    }
}
