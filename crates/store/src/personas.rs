//! Persona list loading.

use std::collections::HashSet;
use std::path::Path;

use tokio::fs;
use tracing::info;

use pipeline::{Persona, StorageError, StorageResult};

use crate::fs::file_name_problem;

/// Loads a JSON array of personas from `path`.
///
/// Rejects personas without hidden traits, duplicate persona ids, and ids
/// that cannot name a session file (path separators, `..`, control
/// characters).
pub async fn load_personas(path: impl AsRef<Path>) -> StorageResult<Vec<Persona>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .await
        .map_err(|e| StorageError::file_io(path, e))?;
    let personas: Vec<Persona> = serde_json::from_str(&contents)
        .map_err(|e| StorageError::file_deserialization(path, e.to_string()))?;

    let mut seen = HashSet::new();
    for persona in &personas {
        if let Some(reason) = file_name_problem(persona.id.as_str()) {
            return Err(StorageError::invalid("persona", persona.id.as_str(), reason));
        }
        if persona.hidden_traits.iter().all(|t| t.trim().is_empty()) {
            return Err(StorageError::invalid(
                "persona",
                persona.id.as_str(),
                "hidden_traits must not be empty",
            ));
        }
        if !seen.insert(&persona.id) {
            return Err(StorageError::invalid(
                "persona",
                persona.id.as_str(),
                "duplicate persona id",
            ));
        }
    }

    info!(path = %path.display(), count = personas.len(), "loaded personas");
    Ok(personas)
}
