use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::audio::session::{PlayerState, QueueSnapshot};
use crate::sources::TrackDescriptor;

/// Paleta de colores del bot
pub mod colors {
    use super::Colour;

    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🦆 Quack Music";
pub const ITEMS_PER_PAGE: usize = 10;
pub const EMPTY_QUEUE: &str = "La cola está vacía.";

/// Una página de la cola ya formateada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePage {
    pub lines: Vec<String>,
    pub current_page: usize,
    pub total_pages: usize,
}

pub fn queue_page(upcoming: &[TrackDescriptor], page: usize) -> QueuePage {
    let total_pages = upcoming.len().div_ceil(ITEMS_PER_PAGE).max(1);
    let current_page = page.clamp(1, total_pages);
    let start = (current_page - 1) * ITEMS_PER_PAGE;

    let lines = upcoming
        .iter()
        .enumerate()
        .skip(start)
        .take(ITEMS_PER_PAGE)
        .map(|(i, track)| format!("**{}**. {} {}", i + 1, track.title, track_status(track)))
        .collect();

    QueuePage {
        lines,
        current_page,
        total_pages,
    }
}

fn track_status(track: &TrackDescriptor) -> &'static str {
    if track.is_fetched() {
        "✅ Precargada"
    } else {
        "⏳ Esperando descarga"
    }
}

fn now_playing_line(snapshot: &QueueSnapshot) -> Option<String> {
    match (&snapshot.now_playing, snapshot.state) {
        (Some(title), _) => Some(format!("**{}**", title)),
        (None, PlayerState::Fetching) => Some("⬇️ Descargando la siguiente canción...".to_string()),
        _ => None,
    }
}

pub fn create_queue_embed(snapshot: &QueueSnapshot, page: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now());

    if let Some(line) = now_playing_line(snapshot) {
        embed = embed.field("▶️ Reproduciendo", line, false);
    }

    if snapshot.upcoming.is_empty() {
        return embed
            .description(format!(
                "😴 **{}**\n\n💡 Usa `/play <canción>` para agregar música",
                EMPTY_QUEUE
            ))
            .color(colors::NEUTRAL_GRAY);
    }

    let page = queue_page(&snapshot.upcoming, page);
    embed
        .field("Próximas canciones", page.lines.join("\n"), false)
        .field(
            "Información",
            format!(
                "**Total:** {} canciones • Página {}/{}",
                snapshot.upcoming.len(),
                page.current_page,
                page.total_pages
            ),
            false,
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn tracks(n: usize) -> Vec<TrackDescriptor> {
        (1..=n)
            .map(|i| TrackDescriptor::new(format!("q{}", i), format!("Song {}", i)))
            .collect()
    }

    #[test]
    fn marks_buffered_entries() {
        let mut upcoming = tracks(2);
        upcoming[0].filepath = Some(PathBuf::from("/tmp/q1.opus"));

        let page = queue_page(&upcoming, 1);
        assert_eq!(
            page.lines,
            vec![
                "**1**. Song 1 ✅ Precargada".to_string(),
                "**2**. Song 2 ⏳ Esperando descarga".to_string(),
            ]
        );
    }

    #[test]
    fn pages_are_clamped() {
        let upcoming = tracks(25);

        let last = queue_page(&upcoming, 9);
        assert_eq!(last.current_page, 3);
        assert_eq!(last.total_pages, 3);
        assert_eq!(last.lines.len(), 5);
        assert!(last.lines[0].starts_with("**21**."));

        let empty = queue_page(&[], 0);
        assert_eq!(empty.current_page, 1);
        assert!(empty.lines.is_empty());
    }

    #[test]
    fn now_playing_reflects_fetching_state() {
        let snapshot = QueueSnapshot {
            now_playing: None,
            state: PlayerState::Fetching,
            upcoming: Vec::new(),
        };
        assert!(now_playing_line(&snapshot).is_some());

        let idle = QueueSnapshot {
            state: PlayerState::Idle,
            ..snapshot
        };
        assert_eq!(now_playing_line(&idle), None);
    }
}
