//! Character catalog loading.
//!
//! Personas live on disk as a JSON index plus one asset directory per
//! character: `intro.txt` holds the system prompt, `examples.txt` holds
//! seed dialogue (one `user,assistant` pair per line). The whole catalog
//! is read and validated once at startup and is immutable afterwards, so
//! session creation never touches the filesystem.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error from catalog loading.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid character index {path}: {source}")]
    MalformedIndex {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("character '{id}': examples line {line} is not a 'user,assistant' pair")]
    MalformedExample { id: String, line: usize },
}

/// One seed exchange shipped with a character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueExample {
    pub user: String,
    pub assistant: String,
}

/// A fully loaded persona.
#[derive(Debug, Clone)]
pub struct Character {
    /// Index key, used in commands and session labels.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short blurb for character pickers.
    pub description: String,
    /// First message sent into a freshly opened thread.
    pub greeting: String,
    /// Persona instructions, becomes the session system message.
    pub system_prompt: String,
    /// Seed dialogue prepended to new sessions.
    pub examples: Vec<DialogueExample>,
}

/// Entry shape of the on-disk index file.
#[derive(Debug, Deserialize)]
struct IndexEntry {
    name: String,
    description: String,
    greeting: String,
    path: PathBuf,
}

/// All characters known to the bot, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct CharacterCatalog {
    characters: BTreeMap<String, Arc<Character>>,
}

impl CharacterCatalog {
    /// Load and validate the catalog from a JSON index file.
    ///
    /// Relative `path` entries in the index resolve against the index
    /// file's own directory. Any unreadable asset or malformed example
    /// line fails the whole load; a broken persona should stop the bot
    /// at startup, not surface mid-chat.
    pub fn load(index_path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(index_path).map_err(|source| CatalogError::Io {
            path: index_path.to_path_buf(),
            source,
        })?;
        let index: BTreeMap<String, IndexEntry> =
            serde_json::from_str(&raw).map_err(|source| CatalogError::MalformedIndex {
                path: index_path.to_path_buf(),
                source,
            })?;

        let base = index_path.parent().unwrap_or_else(|| Path::new("."));
        let mut characters = BTreeMap::new();
        for (id, entry) in index {
            let dir = if entry.path.is_absolute() {
                entry.path.clone()
            } else {
                base.join(&entry.path)
            };

            let system_prompt = read_asset(&dir.join("intro.txt"))?;
            let examples_raw = read_asset(&dir.join("examples.txt"))?;
            let examples = parse_examples(&id, &examples_raw)?;

            tracing::debug!(
                character = %id,
                examples = examples.len(),
                "Loaded character assets"
            );

            characters.insert(
                id.clone(),
                Arc::new(Character {
                    id,
                    name: entry.name,
                    description: entry.description,
                    greeting: entry.greeting,
                    system_prompt,
                    examples,
                }),
            );
        }

        tracing::info!(
            characters = characters.len(),
            index = %index_path.display(),
            "Character catalog loaded"
        );
        Ok(Self { characters })
    }

    /// Look up a character by id.
    pub fn get(&self, id: &str) -> Option<Arc<Character>> {
        self.characters.get(id).cloned()
    }

    /// All characters, id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Character>> {
        self.characters.values()
    }

    /// All character ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        self.characters.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

fn read_asset(path: &Path) -> Result<String, CatalogError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim_end().to_string())
        .map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Parse `examples.txt`: one `user,assistant` pair per line, first comma
/// splits, blank lines skipped. Line numbers in errors are 1-based.
fn parse_examples(id: &str, raw: &str) -> Result<Vec<DialogueExample>, CatalogError> {
    let mut examples = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (user, assistant) = line
            .split_once(',')
            .map(|(u, a)| (u.trim(), a.trim()))
            .filter(|(u, a)| !u.is_empty() && !a.is_empty())
            .ok_or(CatalogError::MalformedExample {
                id: id.to_string(),
                line: idx + 1,
            })?;
        examples.push(DialogueExample {
            user: user.to_string(),
            assistant: assistant.to_string(),
        });
    }
    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_character(dir: &Path, id: &str, intro: &str, examples: &str) {
        let char_dir = dir.join(id);
        fs::create_dir_all(&char_dir).unwrap();
        fs::write(char_dir.join("intro.txt"), intro).unwrap();
        fs::write(char_dir.join("examples.txt"), examples).unwrap();
    }

    fn write_index(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let mut map = serde_json::Map::new();
        for (id, name) in entries {
            map.insert(
                (*id).to_string(),
                serde_json::json!({
                    "name": name,
                    "description": format!("{name} desc"),
                    "greeting": format!("{name} says hi"),
                    "path": id,
                }),
            );
        }
        let path = dir.join("characters.json");
        fs::write(&path, serde_json::to_string_pretty(&map).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_load_catalog() {
        let tmp = TempDir::new().unwrap();
        write_character(
            tmp.path(),
            "aki",
            "你是一個害羞的吉他手。\n",
            "你好,欸...你好。\n今天天氣不錯,嗯、嗯。\n",
        );
        let index = write_index(tmp.path(), &[("aki", "小秋")]);

        let catalog = CharacterCatalog::load(&index).unwrap();
        assert_eq!(catalog.len(), 1);

        let aki = catalog.get("aki").unwrap();
        assert_eq!(aki.name, "小秋");
        assert_eq!(aki.greeting, "小秋 says hi");
        assert_eq!(aki.system_prompt, "你是一個害羞的吉他手。");
        assert_eq!(aki.examples.len(), 2);
        assert_eq!(aki.examples[0].user, "你好");
        assert_eq!(aki.examples[0].assistant, "欸...你好。");
    }

    #[test]
    fn test_blank_lines_skipped_and_commas_kept() {
        let tmp = TempDir::new().unwrap();
        write_character(
            tmp.path(),
            "aki",
            "intro",
            "\nhow are you,fine, thanks, really\n\n",
        );
        let index = write_index(tmp.path(), &[("aki", "Aki")]);

        let catalog = CharacterCatalog::load(&index).unwrap();
        let aki = catalog.get("aki").unwrap();
        assert_eq!(aki.examples.len(), 1);
        // Only the first comma splits.
        assert_eq!(aki.examples[0].assistant, "fine, thanks, really");
    }

    #[test]
    fn test_malformed_example_line_reported() {
        let tmp = TempDir::new().unwrap();
        write_character(tmp.path(), "aki", "intro", "fine,ok\nno delimiter here\n");
        let index = write_index(tmp.path(), &[("aki", "Aki")]);

        let err = CharacterCatalog::load(&index).unwrap_err();
        match err {
            CatalogError::MalformedExample { id, line } => {
                assert_eq!(id, "aki");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_intro_fails_load() {
        let tmp = TempDir::new().unwrap();
        let char_dir = tmp.path().join("aki");
        fs::create_dir_all(&char_dir).unwrap();
        fs::write(char_dir.join("examples.txt"), "a,b\n").unwrap();
        let index = write_index(tmp.path(), &[("aki", "Aki")]);

        let err = CharacterCatalog::load(&index).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }

    #[test]
    fn test_unknown_id_is_none() {
        let tmp = TempDir::new().unwrap();
        write_character(tmp.path(), "aki", "intro", "a,b\n");
        let index = write_index(tmp.path(), &[("aki", "Aki")]);

        let catalog = CharacterCatalog::load(&index).unwrap();
        assert!(catalog.get("bocchi").is_none());
    }

    #[test]
    fn test_ids_sorted() {
        let tmp = TempDir::new().unwrap();
        write_character(tmp.path(), "yuki", "intro", "a,b\n");
        write_character(tmp.path(), "aki", "intro", "a,b\n");
        let index = write_index(tmp.path(), &[("yuki", "Yuki"), ("aki", "Aki")]);

        let catalog = CharacterCatalog::load(&index).unwrap();
        assert_eq!(catalog.ids(), vec!["aki", "yuki"]);
    }
}
