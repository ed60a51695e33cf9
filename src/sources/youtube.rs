use async_process::{Command, Output};
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::fetcher::{MediaExtractor, MediaInfo};
use super::{FetchError, SearchError, VideoHit, VideoSearch};

/// Cliente de yt-dlp: búsqueda, metadata y descarga de audio.
///
/// Cada llamada lanza un proceso; si el futuro se descarta, el proceso muere.
#[derive(Debug, Clone, Default)]
pub struct YtDlp {
    cookies: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(cookies: Option<PathBuf>) -> Self {
        let cookies = cookies.filter(|path| {
            let exists = path.exists();
            if exists {
                info!("🍪 Cookies encontradas en: {}", path.display());
            } else {
                warn!("🍪 No se encontraron cookies en: {}", path.display());
            }
            exists
        });

        Self { cookies }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("yt-dlp");
        cmd.kill_on_drop(true);
        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd
    }

    /// Verifica si la URL es válida para YouTube
    pub fn is_youtube_url(url: &str) -> bool {
        static YOUTUBE: OnceLock<Regex> = OnceLock::new();
        YOUTUBE
            .get_or_init(|| {
                Regex::new(
                    r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/)|youtu\.be/|music\.youtube\.com/)",
                )
                .expect("regex de YouTube válida")
            })
            .is_match(url)
    }

    /// Extrae el id de video de una URL de YouTube
    pub fn extract_video_id(url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;

        // youtu.be/VIDEO_ID
        if parsed.host_str() == Some("youtu.be") {
            return parsed
                .path_segments()?
                .next()
                .filter(|id| !id.is_empty())
                .map(str::to_string);
        }

        // youtube.com/watch?v=VIDEO_ID
        parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
            .filter(|id| !id.is_empty())
    }
}

#[async_trait]
impl VideoSearch for YtDlp {
    async fn search(&self, term: &str) -> Result<Option<VideoHit>, SearchError> {
        info!("🔍 Buscando en YouTube: {}", term);
        let search_query = format!("ytsearch1:{}", term);

        let output = self
            .command()
            .args([
                "--print",
                "%(id)s|%(title)s",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                "--quiet",
                "--socket-timeout",
                "15",
                search_query.as_str(),
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(SearchError::Process(stderr_of(&output)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let hit = stdout.lines().find_map(parse_search_line);
        debug!("🔍 Resultado yt-dlp para '{}': {:?}", term, hit);
        Ok(hit)
    }
}

#[async_trait]
impl MediaExtractor for YtDlp {
    async fn probe(&self, identifier: &str) -> Result<MediaInfo, FetchError> {
        let output = self
            .command()
            .args([
                "--print",
                "%(id)s|%(duration)s|%(title)s",
                "--skip-download",
                "--no-playlist",
                "--no-warnings",
                "--quiet",
                "--default-search",
                "ytsearch",
                identifier,
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(FetchError::NotFound(stderr_of(&output)));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find_map(parse_probe_line)
            .ok_or_else(|| FetchError::NotFound(format!("yt-dlp no devolvió metadata para {}", identifier)))
    }

    async fn download(&self, identifier: &str, output_template: &str) -> Result<(), FetchError> {
        info!("⬇️ Descargando audio: {}", identifier);

        let output = self
            .command()
            .args([
                "--format",
                "bestaudio/best",
                "--extract-audio",
                "--audio-format",
                "opus",
                "--no-playlist",
                "--restrict-filenames",
                "--no-warnings",
                "--quiet",
                "--socket-timeout",
                "30",
                "--retries",
                "3",
                "--output",
                output_template,
                identifier,
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(FetchError::NotFound(stderr_of(&output)));
        }

        Ok(())
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// `id|title` → URL canónica de YouTube
fn parse_search_line(line: &str) -> Option<VideoHit> {
    let (id, title) = line.trim().split_once('|')?;
    if id.is_empty() || id == "NA" {
        return None;
    }

    Some(VideoHit {
        url: format!("https://www.youtube.com/watch?v={}", id),
        title: title.to_string(),
    })
}

/// `id|duration|title`; el título va al final porque puede contener `|`
fn parse_probe_line(line: &str) -> Option<MediaInfo> {
    let mut parts = line.trim().splitn(3, '|');
    let id = parts.next().filter(|id| !id.is_empty() && *id != "NA")?;
    let duration = parts
        .next()
        .and_then(|d| d.parse::<f64>().ok())
        .map(Duration::from_secs_f64);
    let title = parts.next().unwrap_or("Título desconocido");

    Some(MediaInfo {
        id: id.to_string(),
        title: title.to_string(),
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_youtube_url_detection() {
        assert!(YtDlp::is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(YtDlp::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YtDlp::is_youtube_url("https://music.youtube.com/watch?v=test"));
        assert!(!YtDlp::is_youtube_url("https://example.com/video"));
    }

    #[test]
    fn extracts_video_ids() {
        assert_eq!(
            YtDlp::extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            YtDlp::extract_video_id("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(YtDlp::extract_video_id("lofi hip hop"), None);
    }

    #[test]
    fn search_line_becomes_watch_url() {
        assert_eq!(
            parse_search_line("abc123|Some Song | Live\n"),
            Some(VideoHit {
                url: "https://www.youtube.com/watch?v=abc123".to_string(),
                title: "Some Song | Live".to_string(),
            })
        );
        assert_eq!(parse_search_line("NA|nothing"), None);
        assert_eq!(parse_search_line("garbage"), None);
    }

    #[test]
    fn probe_line_keeps_pipes_in_title() {
        let info = parse_probe_line("abc123|215.0|A | B").unwrap();
        assert_eq!(info.id, "abc123");
        assert_eq!(info.duration, Some(Duration::from_secs(215)));
        assert_eq!(info.title, "A | B");

        let live = parse_probe_line("xyz|NA|Stream").unwrap();
        assert_eq!(live.duration, None);
    }
}
