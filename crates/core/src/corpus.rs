//! In-memory chunk table with a CSV snapshot on disk.
//!
//! The file has the columns `name,text,embedding,chunk`. Embeddings are
//! written as JSON arrays. Rows with empty `embedding` and `chunk` cells hold
//! raw extracted text that has not been chunked yet; [`Corpus::load`] hands
//! those back as pending documents.

use crate::error::CorpusError;
use crate::models::{Chunk, ExtractedDocument};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CorpusRow {
    name: String,
    text: String,
    #[serde(default)]
    embedding: Option<String>,
    #[serde(default)]
    chunk: Option<u64>,
}

#[derive(Debug, Default)]
pub struct LoadedCorpus {
    pub corpus: Corpus,
    pub pending: Vec<ExtractedDocument>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    chunks: Vec<Chunk>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn contains_document(&self, name: &str) -> bool {
        self.chunks.iter().any(|chunk| chunk.name == name)
    }

    pub fn document_names(&self) -> BTreeSet<String> {
        self.chunks.iter().map(|chunk| chunk.name.clone()).collect()
    }

    /// Appends a document's chunks, numbering them from 0 in the given order.
    pub fn push_document(
        &mut self,
        name: &str,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<usize, CorpusError> {
        if texts.len() != embeddings.len() {
            return Err(CorpusError::CountMismatch {
                name: name.to_string(),
                chunks: texts.len(),
                embeddings: embeddings.len(),
            });
        }
        if self.contains_document(name) {
            return Err(CorpusError::DuplicateChunk {
                name: name.to_string(),
                chunk: 0,
            });
        }

        let added = texts.len();
        self.chunks.extend(
            texts
                .into_iter()
                .zip(embeddings)
                .enumerate()
                .map(|(index, (text, embedding))| Chunk {
                    name: name.to_string(),
                    chunk: index as u64,
                    text,
                    embedding,
                }),
        );
        Ok(added)
    }

    /// Drops any chunks stored under `name`, then appends the new set.
    pub fn replace_document(
        &mut self,
        name: &str,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<usize, CorpusError> {
        if texts.len() != embeddings.len() {
            return Err(CorpusError::CountMismatch {
                name: name.to_string(),
                chunks: texts.len(),
                embeddings: embeddings.len(),
            });
        }
        self.chunks.retain(|chunk| chunk.name != name);
        self.push_document(name, texts, embeddings)
    }

    /// Appends every chunk of `other`, rejecting any `(name, chunk)` already present.
    pub fn merge(&mut self, other: Corpus) -> Result<(), CorpusError> {
        let existing: HashSet<(String, u64)> = self
            .chunks
            .iter()
            .map(|chunk| (chunk.name.clone(), chunk.chunk))
            .collect();

        if let Some(duplicate) = other
            .chunks
            .iter()
            .find(|chunk| existing.contains(&(chunk.name.clone(), chunk.chunk)))
        {
            return Err(CorpusError::DuplicateChunk {
                name: duplicate.name.clone(),
                chunk: duplicate.chunk,
            });
        }

        self.chunks.extend(other.chunks);
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), CorpusError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(path)?;
        for chunk in &self.chunks {
            writer.serialize(CorpusRow {
                name: chunk.name.clone(),
                text: chunk.text.clone(),
                embedding: Some(serde_json::to_string(&chunk.embedding)?),
                chunk: Some(chunk.chunk),
            })?;
        }
        writer.flush()?;

        info!(path = %path.display(), chunk_count = self.chunks.len(), "saved corpus");
        Ok(())
    }

    /// Every document's ordinals must run 0..n. Duplicates are rejected while
    /// reading, so a highest ordinal of n - 1 means there is no gap.
    fn check_dense_ordinals(&self) -> Result<(), CorpusError> {
        let mut documents: HashMap<&str, (usize, u64)> = HashMap::new();
        for chunk in &self.chunks {
            let (count, highest) = documents.entry(chunk.name.as_str()).or_insert((0, 0));
            *count += 1;
            *highest = (*highest).max(chunk.chunk);
        }

        match documents
            .into_iter()
            .find(|(_, (count, highest))| *highest + 1 != *count as u64)
        {
            Some((name, (chunks, highest))) => {
                warn!(document = name, chunks, highest, "stored chunk numbers have a gap");
                Err(CorpusError::ChunkGap {
                    name: name.to_string(),
                    chunks,
                    highest,
                })
            }
            None => Ok(()),
        }
    }

    /// Reads a snapshot written by [`Corpus::save`]. A missing file yields an
    /// empty corpus.
    pub fn load(path: &Path) -> Result<LoadedCorpus, CorpusError> {
        if !path.exists() {
            warn!(path = %path.display(), "database file does not exist");
            return Ok(LoadedCorpus::default());
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut corpus = Corpus::new();
        let mut seen = HashSet::new();
        let mut pending_order = Vec::new();
        let mut pending_text: HashMap<String, String> = HashMap::new();

        for row in reader.deserialize::<CorpusRow>() {
            let row = row?;
            let embedding = row.embedding.as_deref().map(str::trim).unwrap_or_default();

            match row.chunk {
                Some(ordinal) if !embedding.is_empty() => {
                    if !seen.insert((row.name.clone(), ordinal)) {
                        return Err(CorpusError::DuplicateChunk {
                            name: row.name,
                            chunk: ordinal,
                        });
                    }
                    corpus.chunks.push(Chunk {
                        name: row.name,
                        chunk: ordinal,
                        text: row.text,
                        embedding: serde_json::from_str(embedding)?,
                    });
                }
                _ => {
                    let text = pending_text.entry(row.name.clone()).or_insert_with(|| {
                        pending_order.push(row.name.clone());
                        String::new()
                    });
                    text.push_str(&row.text);
                }
            }
        }

        corpus.check_dense_ordinals()?;

        let pending = pending_order
            .into_iter()
            .filter_map(|name| {
                let text = pending_text.remove(&name)?;
                Some(ExtractedDocument { name, text })
            })
            .filter(|document| !corpus.contains_document(&document.name))
            .collect::<Vec<_>>();

        info!(
            path = %path.display(),
            chunk_count = corpus.len(),
            pending_documents = pending.len(),
            "loaded corpus"
        );
        Ok(LoadedCorpus { corpus, pending })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample() -> Corpus {
        let mut corpus = Corpus::new();
        corpus
            .push_document(
                "a.pdf",
                vec!["cats are mammals".to_string(), "cats, \"quoted\"\nline".to_string()],
                vec![vec![0.1, 0.2, 0.3], vec![1.0e-7, -3.5, 0.333_333_34]],
            )
            .unwrap();
        corpus
            .push_document(
                "b.pdf",
                vec!["dogs are mammals".to_string()],
                vec![vec![0.9, 0.1, 0.0]],
            )
            .unwrap();
        corpus
    }

    #[test]
    fn push_assigns_dense_ordinals() {
        let corpus = sample();
        let ordinals: Vec<(String, u64)> = corpus
            .iter()
            .map(|chunk| (chunk.name.clone(), chunk.chunk))
            .collect();
        assert_eq!(
            ordinals,
            vec![
                ("a.pdf".to_string(), 0),
                ("a.pdf".to_string(), 1),
                ("b.pdf".to_string(), 0)
            ]
        );
    }

    #[test]
    fn adding_a_document_keeps_existing_chunks() {
        let mut corpus = sample();
        let before = corpus.chunks().to_vec();

        corpus
            .push_document("c.txt", vec!["birds".to_string()], vec![vec![0.0, 0.0, 1.0]])
            .unwrap();

        assert_eq!(&corpus.chunks()[..before.len()], before.as_slice());
        assert_eq!(corpus.chunks()[before.len()].chunk, 0);
    }

    #[test]
    fn pushing_a_known_document_is_rejected() {
        let mut corpus = sample();
        let result = corpus.push_document("b.pdf", vec!["x".to_string()], vec![vec![1.0]]);
        assert!(matches!(result, Err(CorpusError::DuplicateChunk { .. })));
        assert_eq!(corpus.len(), 3);
    }

    #[test]
    fn replace_swaps_a_document_chunk_set() {
        let mut corpus = sample();
        corpus
            .replace_document(
                "a.pdf",
                vec!["new text".to_string()],
                vec![vec![0.5, 0.5, 0.5]],
            )
            .unwrap();

        let a_chunks: Vec<&Chunk> = corpus.iter().filter(|chunk| chunk.name == "a.pdf").collect();
        assert_eq!(a_chunks.len(), 1);
        assert_eq!(a_chunks[0].text, "new text");
        assert_eq!(corpus.len(), 2);
    }

    #[test]
    fn mismatched_counts_are_rejected() {
        let mut corpus = Corpus::new();
        let result = corpus.push_document("a.pdf", vec!["x".to_string()], Vec::new());
        assert!(matches!(result, Err(CorpusError::CountMismatch { .. })));
    }

    #[test]
    fn merge_rejects_duplicate_keys() {
        let mut corpus = sample();
        assert!(matches!(
            corpus.merge(sample()),
            Err(CorpusError::DuplicateChunk { .. })
        ));
        assert_eq!(corpus.len(), 3);
    }

    #[test]
    fn save_then_load_round_trips() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("data.csv");
        let corpus = sample();

        corpus.save(&path)?;
        let loaded = Corpus::load(&path)?;

        assert!(loaded.pending.is_empty());
        assert_eq!(loaded.corpus, corpus);
        Ok(())
    }

    #[test]
    fn missing_file_loads_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let loaded = Corpus::load(&dir.path().join("absent.csv"))?;
        assert!(loaded.corpus.is_empty());
        assert!(loaded.pending.is_empty());
        Ok(())
    }

    #[test]
    fn raw_rows_load_as_pending_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("data.csv");
        fs::write(
            &path,
            "name,text,embedding,chunk\n\
             a.pdf,cats are mammals,\"[1.0,0.0]\",0\n\
             new.pdf,first half ,,\n\
             new.pdf,second half,,\n",
        )?;

        let loaded = Corpus::load(&path)?;
        assert_eq!(loaded.corpus.len(), 1);
        assert_eq!(
            loaded.pending,
            vec![ExtractedDocument {
                name: "new.pdf".to_string(),
                text: "first half second half".to_string(),
            }]
        );
        Ok(())
    }

    #[test]
    fn gaps_in_chunk_numbers_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("data.csv");
        fs::write(
            &path,
            "name,text,embedding,chunk\n\
             a.pdf,cats are mammals,\"[1.0,0.0]\",0\n\
             a.pdf,dogs are mammals,\"[0.0,1.0]\",2\n",
        )?;

        let result = Corpus::load(&path);
        assert!(matches!(
            result,
            Err(CorpusError::ChunkGap { ref name, chunks: 2, highest: 2 }) if name == "a.pdf"
        ));
        Ok(())
    }

    #[test]
    fn files_without_chunk_column_are_pending() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("data.csv");
        fs::write(&path, "name,text,embedding\nnotes.txt,plain words,\n")?;

        let loaded = Corpus::load(&path)?;
        assert!(loaded.corpus.is_empty());
        assert_eq!(loaded.pending.len(), 1);
        assert_eq!(loaded.pending[0].name, "notes.txt");
        Ok(())
    }
}
