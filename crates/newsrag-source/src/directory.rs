use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use newsrag_core::traits::DocumentSource;
use newsrag_core::types::Document;
use newsrag_core::{Error, Result};

/// Serves `.txt` files below `root`. Search "URLs" are file paths.
pub struct DirectorySource {
    root: PathBuf,
    max_files: Option<usize>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into(), max_files: None } }

    /// Cap the number of paths `search` returns.
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = Some(max_files);
        self
    }

    pub fn root(&self) -> &Path { &self.root }

    fn list_txt_files(&self) -> Vec<PathBuf> {
        let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("txt"))
            .collect();
        txt_files.sort();
        txt_files
    }

    /// Relative path without the `.txt` extension, `/`-separated.
    fn document_id(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.with_extension("").to_string_lossy().replace('\\', "/")
    }
}

fn read_file_content(path: &Path) -> std::io::Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

fn topic_words(topic: &str) -> Vec<String> {
    topic
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl DocumentSource for DirectorySource {
    /// Every `.txt` file, those mentioning more topic words first; path order
    /// breaks ties.
    async fn search(&self, topic: &str) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Err(Error::Source {
                message: format!("{} is not a directory", self.root.display()),
                retryable: false,
            });
        }
        let words = topic_words(topic);
        let mut scored: Vec<(usize, PathBuf)> = self
            .list_txt_files()
            .into_iter()
            .map(|path| {
                let hits = match read_file_content(&path) {
                    Ok(text) => {
                        let text = text.to_lowercase();
                        words.iter().filter(|w| text.contains(w.as_str())).count()
                    }
                    Err(_) => 0,
                };
                (hits, path)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        let limit = self.max_files.unwrap_or(scored.len());
        let paths: Vec<String> = scored.into_iter().take(limit).map(|(_, p)| p.to_string_lossy().to_string()).collect();
        debug!(root = %self.root.display(), files = paths.len(), "directory search");
        Ok(paths)
    }

    async fn fetch(&self, urls: &[String]) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(urls.len());
        let mut seen = HashSet::new();
        for url in urls {
            let path = PathBuf::from(url);
            if !seen.insert(path.clone()) {
                continue;
            }
            let id = self.document_id(&path);
            match read_file_content(&path) {
                Ok(text) => documents.push(Document::new(id, url.clone(), text)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
            }
        }
        Ok(documents)
    }
}
