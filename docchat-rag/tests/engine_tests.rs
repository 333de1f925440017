//! End-to-end scenarios through the `ChatEngine` facade.

use std::sync::Arc;

use async_trait::async_trait;
use docchat_rag::{
    AnswerStrategy, ChatEngine, DocumentMetadata, EmbeddingProvider, HashingEmbeddingProvider,
    INSUFFICIENT_INFORMATION, InMemoryVectorStore, MetadataFilter, PROCESSING_ERROR, RagError,
    Result, Role, SessionStore, TextGenerator,
};

struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(RagError::GenerationFailed { backend: "failing".into(), message: "502 bad gateway".into() })
    }
}

struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::EmbeddingUnavailable { provider: "down".into(), message: "model not loaded".into() })
    }

    fn dimensions(&self) -> usize {
        384
    }
}

async fn engine() -> ChatEngine {
    ChatEngine::builder()
        .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
        .build()
        .await
        .unwrap()
}

fn policy_text(sentences: usize) -> String {
    (0..sentences).map(|i| format!("Clause {i:03} says refunds are paid within ten days. ")).collect()
}

#[tokio::test]
async fn inserted_chunk_is_found_first() {
    let engine = engine().await;
    let content = "Refunds are paid within ten days of the return.";
    engine.ingest(content, DocumentMetadata::new("refunds", "refunds.txt")).await.unwrap();
    engine
        .ingest("The cafeteria serves pasta on Fridays.", DocumentMetadata::new("menu", "menu.txt"))
        .await
        .unwrap();

    let hits = engine.search(content, 1, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, content);

    let unrelated = engine
        .search("quarterly revenue forecast", 2, Some(&MetadataFilter::default().document_id("refunds")))
        .await
        .unwrap();
    assert!(hits[0].score > unrelated[0].score);
}

#[tokio::test]
async fn deleting_twice_is_harmless() {
    let engine = engine().await;
    engine.ingest("Warranty covers two years.", DocumentMetadata::new("w", "warranty.txt")).await.unwrap();

    assert!(engine.remove_document("w").await.unwrap());
    assert!(!engine.remove_document("w").await.unwrap());
    assert!(!engine.remove_document("never-existed").await.unwrap());
}

#[tokio::test]
async fn deleted_document_is_not_retrieved() {
    let engine = engine().await;
    engine.ingest("Refunds take ten days.", DocumentMetadata::new("a", "a.txt")).await.unwrap();
    engine.ingest("Refunds need a receipt.", DocumentMetadata::new("b", "b.txt")).await.unwrap();

    engine.remove_document("a").await.unwrap();

    let hits = engine.search("refunds", 10, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits.iter().all(|hit| hit.metadata.document_id != "a"));
}

#[tokio::test]
async fn reused_document_id_is_rejected() {
    let engine = engine().await;
    engine.ingest("Refunds take ten days.", DocumentMetadata::new("doc", "a.txt")).await.unwrap();

    let err = engine
        .ingest("Shipping is free over fifty dollars.", DocumentMetadata::new("doc", "b.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
    assert!(err.is_client_error());

    let filter = MetadataFilter::default().document_id("doc");
    let hits = engine.search("shipping", 10, Some(&filter)).await.unwrap();
    let found: Vec<(usize, &str)> =
        hits.iter().map(|hit| (hit.metadata.chunk_index, hit.metadata.filename.as_str())).collect();
    assert_eq!(found, vec![(0, "a.txt")]);

    let docs = engine.list_documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].chunk_count, 1);
    assert_eq!(docs[0].metadata.filename, "a.txt");

    assert!(engine.remove_document("doc").await.unwrap());
    engine.ingest("Shipping is free over fifty dollars.", DocumentMetadata::new("doc", "b.txt")).await.unwrap();
    assert_eq!(engine.list_documents().await.unwrap()[0].metadata.filename, "b.txt");
}

#[tokio::test]
async fn three_thousand_char_document_yields_four_ordered_chunks() {
    let engine = engine().await;
    let ids = engine.ingest(&policy_text(60), DocumentMetadata::new("policy", "policy.txt")).await.unwrap();
    assert_eq!(ids.len(), 4);

    let filter = MetadataFilter::default().document_id("policy");
    let mut hits = engine.search("refunds", 10, Some(&filter)).await.unwrap();
    assert_eq!(hits.len(), 4);
    hits.sort_by_key(|hit| hit.metadata.chunk_index);
    let indexes: Vec<usize> = hits.iter().map(|hit| hit.metadata.chunk_index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3]);
    let by_index: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
    assert_eq!(by_index, ids.iter().map(String::as_str).collect::<Vec<_>>());

    let docs = engine.list_documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].chunk_count, 4);
    assert_eq!(docs[0].metadata.chunk_index, 0);
}

#[tokio::test]
async fn empty_index_answers_with_insufficient_information() {
    let engine = engine().await;
    let reply = engine.ask("What is the refund policy?", None).await.unwrap();
    assert_eq!(reply.response, INSUFFICIENT_INFORMATION);
    assert!(reply.sources.is_empty());
    assert_eq!(reply.strategy, AnswerStrategy::NoContext);
}

#[tokio::test]
async fn failing_generator_still_answers() {
    let engine = ChatEngine::builder()
        .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
        .generator(Arc::new(FailingGenerator))
        .build()
        .await
        .unwrap();
    engine
        .ingest("Refunds are paid within ten days.", DocumentMetadata::new("r", "refunds.txt"))
        .await
        .unwrap();

    let reply = engine.ask("What is the refund policy?", None).await.unwrap();
    assert!(!reply.response.is_empty());
    assert_eq!(reply.strategy, AnswerStrategy::Extractive);
    assert!(reply.sources.contains("refunds.txt"));
    assert_eq!(engine.stats().await.unwrap().answer_mode, "generative");
}

#[tokio::test]
async fn generation_fallback_is_logged_as_warning() {
    let (events, _guard) = docchat_telemetry::capture_events();
    let engine = ChatEngine::builder()
        .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
        .generator(Arc::new(FailingGenerator))
        .build()
        .await
        .unwrap();
    engine.ingest("Refunds are paid within ten days.", DocumentMetadata::new("r", "r.txt")).await.unwrap();

    let reply = engine.ask("refunds?", None).await.unwrap();
    assert!(events.contains("warn", "generation failed"));
    let session_events = events.session_events(&reply.session_id);
    assert!(session_events.iter().any(|e| e.message == "answered message"));
}

#[tokio::test]
async fn purge_empties_the_listing() {
    let engine = engine().await;
    engine.ingest("Office hours are nine to five.", DocumentMetadata::new("h", "hours.txt")).await.unwrap();
    engine.ingest(&policy_text(30), DocumentMetadata::new("p", "policy.txt")).await.unwrap();

    assert!(engine.purge().await.unwrap() >= 2);
    assert!(engine.list_documents().await.unwrap().is_empty());
    assert_eq!(engine.ask("office hours?", None).await.unwrap().response, INSUFFICIENT_INFORMATION);
}

#[tokio::test]
async fn conversation_is_recorded_in_order() {
    let engine = engine().await;
    let first = engine.ask("hello?", None).await.unwrap();
    let second = engine.ask("anyone there?", Some(&first.session_id)).await.unwrap();
    assert_eq!(second.session_id, first.session_id);

    let history = engine.history(&first.session_id).await;
    let roles: Vec<Role> = history.iter().map(|turn| turn.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(history[2].content, "anyone there?");

    assert!(engine.end_session(&first.session_id));
    assert!(engine.history(&first.session_id).await.is_empty());

    let third = engine.ask("hello again", Some(&first.session_id)).await.unwrap();
    assert_ne!(third.session_id, first.session_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_keep_their_own_order() {
    let store = Arc::new(SessionStore::default());
    let ids: Vec<String> = (0..8).map(|_| store.get_or_create(None)).collect();

    let tasks: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    store.append(&id, Role::User, format!("msg {i}")).await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    for id in &ids {
        let contents: Vec<String> = store.history(id).await.into_iter().map(|t| t.content).collect();
        let expected: Vec<String> = (0..50).map(|i| format!("msg {i}")).collect();
        assert_eq!(contents, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handed_off_appends_to_one_session_keep_their_order() {
    let store = Arc::new(SessionStore::default());
    let id = store.get_or_create(None);

    // Task i appends once it holds the baton, then passes it to task i + 1.
    let (first_tx, mut baton) = tokio::sync::oneshot::channel::<()>();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let (next_tx, next_rx) = tokio::sync::oneshot::channel::<()>();
        let rx = std::mem::replace(&mut baton, next_rx);
        let (store, id) = (store.clone(), id.clone());
        tasks.push(tokio::spawn(async move {
            rx.await.unwrap();
            store.append(&id, Role::User, format!("turn {i}")).await;
            let _ = next_tx.send(());
        }));
    }
    first_tx.send(()).unwrap();
    for task in tasks {
        task.await.unwrap();
    }

    let contents: Vec<String> = store.history(&id).await.into_iter().map(|t| t.content).collect();
    let expected: Vec<String> = (0..16).map(|i| format!("turn {i}")).collect();
    assert_eq!(contents, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_appends_to_one_session_lose_nothing() {
    let store = Arc::new(SessionStore::default());
    let id = store.get_or_create(None);

    let tasks: Vec<_> = (0..8)
        .map(|t| {
            let (store, id) = (store.clone(), id.clone());
            tokio::spawn(async move {
                for i in 0..25 {
                    store.append(&id, Role::User, format!("{t}:{i}")).await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let history = store.history(&id).await;
    assert_eq!(history.len(), 200);
    for t in 0..8 {
        let prefix = format!("{t}:");
        let mine: Vec<&str> = history
            .iter()
            .filter_map(|turn| turn.content.strip_prefix(prefix.as_str()))
            .collect();
        let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
        assert_eq!(mine, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queries_racing_a_delete_see_all_or_none_of_the_document() {
    let engine = Arc::new(engine().await);
    let ids = engine.ingest(&policy_text(60), DocumentMetadata::new("policy", "policy.txt")).await.unwrap();
    engine.ingest("Office hours are nine to five.", DocumentMetadata::new("hours", "hours.txt")).await.unwrap();
    let filter = MetadataFilter::default().document_id("policy");

    let queries: Vec<_> = (0..32)
        .map(|_| {
            let (engine, filter) = (engine.clone(), filter.clone());
            tokio::spawn(async move { engine.search("refunds", 10, Some(&filter)).await.unwrap().len() })
        })
        .collect();
    let deleter = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.remove_document("policy").await.unwrap() })
    };

    assert!(deleter.await.unwrap());
    for query in queries {
        let seen = query.await.unwrap();
        assert!(seen == 0 || seen == ids.len(), "saw {seen} of {} chunks", ids.len());
    }
    assert!(engine.search("refunds", 10, Some(&filter)).await.unwrap().is_empty());
    assert_eq!(engine.list_documents().await.unwrap().len(), 1);
}

#[tokio::test]
async fn embedding_outage_stores_nothing_and_answers_with_apology() {
    let engine = ChatEngine::builder().embedding_provider(Arc::new(DownEmbedder)).build().await.unwrap();

    let err = engine.ingest_file(b"Refunds are paid within ten days.", "refunds.txt").await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingUnavailable { .. }));
    assert_eq!(err.user_message(), "could not process this document");
    assert!(engine.list_documents().await.unwrap().is_empty());

    let reply = engine.ask("What is the refund policy?", None).await.unwrap();
    assert_eq!(reply.response, PROCESSING_ERROR);
    assert!(reply.sources.is_empty());
}

#[tokio::test]
async fn persisted_index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index").join("chunks.json");

    let open = |path: std::path::PathBuf| async move {
        let store = InMemoryVectorStore::open(path).await.unwrap();
        ChatEngine::builder()
            .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
            .vector_store(Arc::new(store))
            .build()
            .await
            .unwrap()
    };

    let report = {
        let engine = open(path.clone()).await;
        engine.ingest_file(b"Support is available around the clock.", "support.txt").await.unwrap()
    };

    let engine = open(path.clone()).await;
    let docs = engine.list_documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].document_id, report.document_id);
    let hits = engine.search("support available", 1, None).await.unwrap();
    assert_eq!(hits[0].metadata.filename, "support.txt");

    assert!(engine.remove_document(&report.document_id).await.unwrap());
    drop(engine);
    let engine = open(path).await;
    assert!(engine.list_documents().await.unwrap().is_empty());
}
