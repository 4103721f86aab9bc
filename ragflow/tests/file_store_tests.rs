//! Persistence tests for the file-backed vector store.

use ragflow::{DistanceMetric, Document, FileVectorStore, RagError, SearchQuery, VectorStore};

fn sample_documents() -> Vec<Document> {
    vec![
        Document::from_text("rust", "Rust is a systems language.")
            .with_vector(vec![1.0, 0.0, 0.0])
            .with_metadata("topic", "lang"),
        Document::from_text("tokio", "Tokio is an async runtime.").with_vector(vec![0.0, 1.0, 0.0]),
        Document::from_text("serde", "Serde serializes data.").with_vector(vec![0.6, 0.8, 0.0]),
    ]
}

#[tokio::test]
async fn collections_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileVectorStore::open(dir.path()).await.unwrap();
        store.create_collection("docs", 3, DistanceMetric::Cosine).await.unwrap();
        store.add("docs", sample_documents()).await.unwrap();
        store.delete("docs", &["tokio"]).await.unwrap();
    }

    let store = FileVectorStore::open(dir.path()).await.unwrap();
    let info = store.collection("docs").await.unwrap().unwrap();
    assert_eq!(info.dimension, 3);
    assert_eq!(info.metric, DistanceMetric::Cosine);
    assert_eq!(store.count("docs").await.unwrap(), 2);

    let fetched = store.get("docs", &["rust"]).await.unwrap();
    assert_eq!(fetched[0].text(), "Rust is a systems language.");
    assert_eq!(fetched[0].metadata["topic"], "lang");

    let results = store.search("docs", &SearchQuery::new(vec![1.0, 0.0, 0.0], 5)).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
    assert_eq!(ids, vec!["rust", "serde"]);
}

#[tokio::test]
async fn insertion_order_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileVectorStore::open(dir.path()).await.unwrap();
        store.create_collection("ties", 2, DistanceMetric::Dot).await.unwrap();
        for id in ["zeta", "alpha", "mid"] {
            store
                .add("ties", vec![Document::from_text(id, id).with_vector(vec![1.0, 0.0])])
                .await
                .unwrap();
        }
    }

    let store = FileVectorStore::open(dir.path()).await.unwrap();
    let results = store.search("ties", &SearchQuery::new(vec![1.0, 0.0], 10)).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
    assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn one_file_per_collection() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileVectorStore::open(dir.path()).await.unwrap();
    store.create_collection("first", 3, DistanceMetric::Cosine).await.unwrap();
    store.create_collection("second", 3, DistanceMetric::Euclidean).await.unwrap();
    store.add("first", sample_documents()).await.unwrap();

    assert!(dir.path().join("first.json").exists());
    assert!(dir.path().join("second.json").exists());
    assert!(!dir.path().join("first.json.tmp").exists());

    let raw = std::fs::read_to_string(dir.path().join("first.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["documents"].as_object().unwrap().len(), 3);
    assert_eq!(json["vectors"]["rust"], serde_json::json!([1.0, 0.0, 0.0]));
    assert_eq!(json["metadata"]["rust"]["topic"], "lang");

    store.delete_collection("second").await.unwrap();
    assert!(!dir.path().join("second.json").exists());
}

#[tokio::test]
async fn failed_mutation_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileVectorStore::open(dir.path()).await.unwrap();
    store.create_collection("docs", 3, DistanceMetric::Cosine).await.unwrap();
    store.add("docs", sample_documents()).await.unwrap();
    let before = std::fs::read(dir.path().join("docs.json")).unwrap();

    let err = store
        .add("docs", vec![Document::from_text("bad", "x").with_vector(vec![1.0])])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));
    assert_eq!(std::fs::read(dir.path().join("docs.json")).unwrap(), before);
}

#[tokio::test]
async fn rejects_unsafe_collection_names() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileVectorStore::open(dir.path()).await.unwrap();
    for name in ["", "../escape", "with space", "dot.json"] {
        let err = store.create_collection(name, 3, DistanceMetric::Cosine).await.unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)), "accepted {name:?}");
    }
}

#[tokio::test]
async fn corrupt_collection_file_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();
    let err = FileVectorStore::open(dir.path()).await.unwrap_err();
    assert!(matches!(err, RagError::Serialization(_)));
}

#[tokio::test]
async fn failed_write_keeps_memory_in_step_with_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileVectorStore::open(dir.path()).await.unwrap();
    store.create_collection("docs", 3, DistanceMetric::Cosine).await.unwrap();
    let mut documents = sample_documents();
    let retry = documents.pop().unwrap();
    store.add("docs", documents).await.unwrap();

    std::fs::remove_dir_all(dir.path()).unwrap();
    let err = store.add("docs", vec![retry.clone()]).await.unwrap_err();
    assert!(matches!(err, RagError::Io(_)));
    assert_eq!(store.count("docs").await.unwrap(), 2);
    assert!(store.get("docs", &["serde"]).await.unwrap().is_empty());

    std::fs::create_dir_all(dir.path()).unwrap();
    store.add("docs", vec![retry]).await.unwrap();
    assert_eq!(store.count("docs").await.unwrap(), 3);

    let reopened = FileVectorStore::open(dir.path()).await.unwrap();
    assert_eq!(reopened.count("docs").await.unwrap(), 3);
}
