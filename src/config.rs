use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::audio::session::SessionSettings;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Spotify (opcional; sin credenciales los enlaces se buscan como texto)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,

    // Descargas
    pub download_dir: PathBuf,
    pub cookies_file: Option<PathBuf>,

    // Límites
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
    pub max_song_duration: Duration,

    // Sesión
    pub prefetch_interval: Duration,
    pub idle_timeout: Duration,
    pub cleanup_delay: Duration,
}

impl Config {
    /// Carga `.env` (o el archivo en `ENV_FILE`) y lee el entorno
    pub fn load() -> Result<Self> {
        match std::env::var("ENV_FILE") {
            Ok(file) => {
                dotenvy::from_filename(&file)
                    .with_context(|| format!("No se pudo leer ENV_FILE={}", file))?;
            }
            Err(_) => {
                dotenvy::dotenv().ok();
            }
        }

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Construye la configuración a partir de una función de búsqueda de variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            discord_token: var("DISCORD_TOKEN").context("Falta DISCORD_TOKEN")?,
            application_id: var("APPLICATION_ID")
                .context("Falta APPLICATION_ID")?
                .parse::<u64>()
                .context("APPLICATION_ID inválido")?,
            guild_id: var("GUILD_ID").and_then(|s| s.parse().ok()),

            spotify_client_id: var("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: var("SPOTIFY_CLIENT_SECRET"),

            download_dir: var("DOWNLOAD_DIR")
                .unwrap_or_else(|| "downloads".to_string())
                .into(),
            cookies_file: var("COOKIES_FILE").map(PathBuf::from),

            max_queue_size: parse_or(&var, "MAX_QUEUE_SIZE", 100)?,
            max_playlist_size: parse_or(&var, "MAX_PLAYLIST_SIZE", 100)?,
            max_song_duration: Duration::from_secs(parse_or(&var, "MAX_SONG_DURATION", 900)?),

            prefetch_interval: Duration::from_secs(parse_or(&var, "PREFETCH_INTERVAL_SECS", 5)?),
            idle_timeout: Duration::from_secs(parse_or(&var, "IDLE_TIMEOUT_SECS", 60)?),
            cleanup_delay: Duration::from_secs(parse_or(&var, "CLEANUP_DELAY_SECS", 2)?),
        })
    }

    /// Validates configuration values for correctness.
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.max_song_duration.is_zero() {
            anyhow::bail!("Max song duration must be greater than 0");
        }

        if self.prefetch_interval.is_zero() {
            anyhow::bail!("Prefetch interval must be greater than 0");
        }

        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together");
        }

        Ok(())
    }

    pub fn spotify_credentials(&self) -> Option<(String, String)> {
        Some((
            self.spotify_client_id.clone()?,
            self.spotify_client_secret.clone()?,
        ))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            prefetch_interval: self.prefetch_interval,
            idle_timeout: self.idle_timeout,
            cleanup_delay: self.cleanup_delay,
            max_queue_size: self.max_queue_size,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and secrets are never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Spotify: {}\n  \
            Downloads: {} (cookies: {})\n  \
            Limits: {} queue, {} playlist, {} max duration\n  \
            Session: prefetch every {}, idle {}, cleanup after {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            if self.spotify_credentials().is_some() { "enabled" } else { "disabled" },
            self.download_dir.display(),
            self.cookies_file
                .as_ref()
                .map_or("none".to_string(), |p| p.display().to_string()),
            self.max_queue_size,
            self.max_playlist_size,
            humantime::format_duration(self.max_song_duration),
            humantime::format_duration(self.prefetch_interval),
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.cleanup_delay),
        )
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} inválido: '{}'", key, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [("DISCORD_TOKEN", "token"), ("APPLICATION_ID", "1234")];

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&REQUIRED).unwrap();

        assert_eq!(config.application_id, 1234);
        assert_eq!(config.guild_id, None);
        assert_eq!(config.download_dir, PathBuf::from("downloads"));
        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.max_song_duration, Duration::from_secs(900));
        assert_eq!(config.prefetch_interval, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.cleanup_delay, Duration::from_secs(2));
        assert!(config.spotify_credentials().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn reads_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("GUILD_ID", "42"),
            ("SPOTIFY_CLIENT_ID", "id"),
            ("SPOTIFY_CLIENT_SECRET", "secret"),
            ("IDLE_TIMEOUT_SECS", "120"),
            ("COOKIES_FILE", "/secrets/cookies.txt"),
        ]);
        let config = config_from(&pairs).unwrap();

        assert_eq!(config.guild_id, Some(42));
        assert_eq!(
            config.spotify_credentials(),
            Some(("id".to_string(), "secret".to_string()))
        );
        assert_eq!(config.session_settings().idle_timeout, Duration::from_secs(120));
        assert_eq!(config.cookies_file, Some(PathBuf::from("/secrets/cookies.txt")));
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(config_from(&[("APPLICATION_ID", "1")]).is_err());
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_QUEUE_SIZE", "lots"));
        let error = config_from(&pairs).unwrap_err();
        assert!(error.to_string().contains("MAX_QUEUE_SIZE"));
    }

    #[test]
    fn validation_rejects_half_spotify_credentials() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SPOTIFY_CLIENT_ID", "id"));
        let config = config_from(&pairs).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_hides_secrets() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("SPOTIFY_CLIENT_ID", "id"), ("SPOTIFY_CLIENT_SECRET", "hunter2")]);
        let summary = config_from(&pairs).unwrap().summary();

        assert!(!summary.contains("token"));
        assert!(!summary.contains("hunter2"));
        assert!(summary.contains("1m"));
    }
}
