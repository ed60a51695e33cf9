use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::sources::TrackDescriptor;

/// Entrada de la cola con su ticket de llegada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTrack {
    /// Posición absoluta en el flujo de inserciones de la sesión
    pub ticket: u64,
    pub track: TrackDescriptor,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("La cola está llena (máximo {max} canciones)")]
pub struct QueueFull {
    pub max: usize,
}

/// Cola FIFO estricta de la sesión.
///
/// Sólo el actor de la sesión la toca; por eso no lleva sincronización.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<QueuedTrack>,
    next_ticket: u64,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            next_ticket: 0,
            max_size,
        }
    }

    /// Agrega un track al final y devuelve su ticket
    pub fn append(&mut self, track: TrackDescriptor) -> Result<u64, QueueFull> {
        if self.items.len() >= self.max_size {
            return Err(QueueFull { max: self.max_size });
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        debug!("➕ [{}] Agregado a la cola: {}", ticket, track.title);
        self.items.push_back(QueuedTrack { ticket, track });
        Ok(ticket)
    }

    /// Agrega varios tracks hasta llenar la cola; devuelve los que no cupieron
    pub fn extend(&mut self, tracks: Vec<TrackDescriptor>) -> Vec<TrackDescriptor> {
        let available = self.max_size.saturating_sub(self.items.len());
        let mut tracks = tracks;
        let rejected = tracks.split_off(available.min(tracks.len()));
        let accepted = tracks.len();

        for track in tracks {
            // No puede fallar: hay espacio reservado para cada uno
            let _ = self.append(track);
        }

        if accepted > 0 {
            info!("➕ Agregadas {} canciones a la cola", accepted);
        }
        rejected
    }

    pub fn peek_front(&self) -> Option<&QueuedTrack> {
        self.items.front()
    }

    pub fn pop_front(&mut self) -> Option<QueuedTrack> {
        let next = self.items.pop_front();
        if let Some(item) = &next {
            debug!("➡️ [{}] Siguiente en cola: {}", item.ticket, item.track.title);
        }
        next
    }

    /// Vacía la cola y devuelve lo eliminado para limpiar sus archivos
    pub fn clear(&mut self) -> Vec<QueuedTrack> {
        let removed: Vec<_> = self.items.drain(..).collect();
        if !removed.is_empty() {
            info!("🗑️ Cola limpiada ({} canciones)", removed.len());
        }
        removed
    }

    /// Copia de la cola para mostrar
    pub fn snapshot(&self) -> Vec<TrackDescriptor> {
        self.items.iter().map(|item| item.track.clone()).collect()
    }

    /// Completa el frente con el resultado de una descarga.
    ///
    /// Sólo aplica si el frente sigue siendo la misma entrada (ticket y query).
    pub fn fill_front(&mut self, ticket: u64, query: &str, title: String, path: PathBuf) -> bool {
        match self.items.front_mut() {
            Some(front) if front.ticket == ticket && front.track.query == query => {
                front.track.title = title;
                front.track.filepath = Some(path);
                true
            }
            _ => false,
        }
    }

    /// Quita el frente si sigue siendo la misma entrada
    pub fn remove_front(&mut self, ticket: u64, query: &str) -> Option<QueuedTrack> {
        match self.items.front() {
            Some(front) if front.ticket == ticket && front.track.query == query => {
                self.items.pop_front()
            }
            _ => None,
        }
    }

    /// ¿Alguna entrada apunta a este archivo?
    pub fn references(&self, path: &Path) -> bool {
        self.items
            .iter()
            .any(|item| item.track.filepath.as_deref() == Some(path))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
