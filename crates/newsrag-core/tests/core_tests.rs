use figment::{
    providers::{Format, Toml},
    Figment,
};

use newsrag_core::chunker::split;
use newsrag_core::config::{ChunkingSettings, Config, EmbeddingBackend};
use newsrag_core::types::Document;
use newsrag_core::Error;

fn doc(id: &str, text: &str) -> Document {
    Document::new(id, format!("https://example.com/{id}"), text)
}

fn long_text() -> String {
    let mut text = String::new();
    for i in 0..60 {
        text.push_str(&format!("Sentence number {i} talks about markets and rates. "));
        if i % 7 == 6 {
            text.push_str("\n\n");
        }
    }
    text
}

#[test]
fn short_documents_become_one_chunk_each() {
    let docs = vec![doc("a", "Cats are mammals."), doc("b", "Dogs are mammals too.")];
    let chunks = split(&docs, &ChunkingSettings::new(50, 0)).expect("split");

    assert_eq!(chunks.len(), 2, "one chunk per short document");
    assert_eq!(chunks[0].text, "Cats are mammals.");
    assert_eq!(chunks[0].document_id, "a");
    assert_eq!(chunks[1].document_id, "b");
    assert_eq!(chunks[1].end_offset, "Dogs are mammals too.".chars().count());
}

#[test]
fn consecutive_chunks_share_exactly_the_overlap() {
    let settings = ChunkingSettings::new(200, 40);
    let text = long_text();
    let chunks = split(&[doc("long", &text)], &settings).expect("split");
    assert!(chunks.len() > 3, "long text splits into several windows");

    let chars: Vec<char> = text.chars().collect();
    for pair in chunks.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        assert_eq!(prev.end_offset - next.start_offset, settings.overlap);
        let shared_prev: String = chars[next.start_offset..prev.end_offset].iter().collect();
        assert!(prev.text.ends_with(&shared_prev));
        assert!(next.text.starts_with(&shared_prev));
    }
    for chunk in &chunks {
        assert!(chunk.len() <= settings.max_size);
        assert_eq!(chunk.text.chars().count(), chunk.len());
    }
    assert_eq!(chunks.last().map(|c| c.end_offset), Some(chars.len()));
}

#[test]
fn windows_prefer_sentence_boundaries() {
    let settings = ChunkingSettings::new(200, 0);
    let chunks = split(&[doc("long", &long_text())], &settings).expect("split");
    for chunk in &chunks[..chunks.len() - 1] {
        let trimmed = chunk.text.trim_end();
        assert!(trimmed.ends_with('.'), "chunk should end on a sentence: {:?}", chunk.text);
    }
}

#[test]
fn unbroken_text_is_cut_hard() {
    let text = "x".repeat(250);
    let chunks = split(&[doc("x", &text)], &ChunkingSettings::new(100, 20)).expect("split");
    let spans: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start_offset, c.end_offset)).collect();
    assert_eq!(spans, vec![(0, 100), (80, 180), (160, 250)]);
}

#[test]
fn chunk_ids_are_scoped_by_document() {
    let text = "y".repeat(120);
    let chunks = split(&[doc("d1", &text)], &ChunkingSettings::new(50, 10)).expect("split");
    let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["d1:0", "d1:1", "d1:2"]);
}

#[test]
fn multibyte_text_uses_character_offsets() {
    let text = "é".repeat(30);
    let chunks = split(&[doc("u", &text)], &ChunkingSettings::new(20, 5)).expect("split");
    assert_eq!(chunks[0].text.chars().count(), 20);
    assert_eq!(chunks[1].start_offset, 15);
}

#[test]
fn blank_documents_yield_no_chunks() {
    let docs = vec![doc("empty", ""), doc("blank", "  \n\t  ")];
    let chunks = split(&docs, &ChunkingSettings::default()).expect("split");
    assert!(chunks.is_empty());
}

#[test]
fn overlap_must_be_smaller_than_window() {
    let err = split(&[doc("a", "text")], &ChunkingSettings::new(100, 100)).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    let err = split(&[doc("a", "text")], &ChunkingSettings::new(0, 0)).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn settings_defaults_match_research_defaults() {
    let config = Config::from_figment(Figment::new());
    let settings = config.settings().expect("settings");
    assert_eq!(settings.chunking, ChunkingSettings::new(1000, 200));
    assert_eq!(settings.retrieval.top_k, 4);
    assert_eq!(settings.source.max_links, 2);
    assert_eq!(settings.embedding.backend, EmbeddingBackend::Local);
    assert!((settings.synthesis.temperature - 0.7).abs() < f32::EPSILON);
}

#[test]
fn settings_overrides_are_validated() {
    let figment = Figment::new().merge(Toml::string("[retrieval]\ntop_k = 0"));
    let err = Config::from_figment(figment).settings().unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));

    let figment = Figment::new().merge(Toml::string("[embedding]\nbackend = \"hashed\""));
    let settings = Config::from_figment(figment).settings().expect("settings");
    assert_eq!(settings.embedding.backend, EmbeddingBackend::Hashed);
    let backend: String = Config::from_figment(Figment::new()).get("embedding.backend").expect("get");
    assert_eq!(backend, "local");
}

#[test]
fn figment_env_overrides_nested_keys() {
    figment::Jail::expect_with(|jail| {
        jail.set_env("APP_CHUNKING__MAX_SIZE", "300");
        jail.set_env("APP_CHUNKING__OVERLAP", "30");
        let config = Config::load().map_err(|e| e.to_string())?;
        let settings = config.settings().map_err(|e| e.to_string())?;
        assert_eq!(settings.chunking, ChunkingSettings::new(300, 30));
        Ok(())
    });
}
