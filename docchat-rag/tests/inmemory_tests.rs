//! Property tests for in-memory vector store search ordering and deletes.

use docchat_rag::document::{Chunk, ChunkMetadata, DocumentMetadata};
use docchat_rag::inmemory::InMemoryVectorStore;
use docchat_rag::vectorstore::VectorStore;
use proptest::prelude::*;

const DIM: usize = 16;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map("non-zero embedding", |mut v| {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < 1e-8 {
            return None;
        }
        for val in &mut v {
            *val /= norm;
        }
        Some(v)
    })
}

/// Build chunks numbered in insertion order, assigned to `documents`
/// round-robin.
fn chunks_from(embeddings: Vec<Vec<f32>>, documents: usize) -> Vec<Chunk> {
    embeddings
        .into_iter()
        .enumerate()
        .map(|(i, embedding)| {
            let doc = DocumentMetadata::new(format!("doc_{}", i % documents), "notes.txt");
            Chunk {
                id: format!("{i:04}"),
                content: format!("chunk {i}"),
                embedding,
                metadata: ChunkMetadata::for_chunk(&doc, i / documents),
            }
        })
        .collect()
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(future)
}

/// Results are ordered by descending cosine similarity, bounded by `top_k`
/// and by the number of stored chunks.
mod prop_inmemory_search_ordering {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
        ) {
            let count = embeddings.len();
            let results = block_on(async {
                let store = InMemoryVectorStore::new();
                store.insert(chunks_from(embeddings, 3)).await.unwrap();
                store.search(&query, top_k, None).await.unwrap()
            });

            prop_assert_eq!(results.len(), top_k.min(count));
            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }

        /// Drawing embeddings from a tiny pool forces ties, which must come
        /// back in insertion order.
        #[test]
        fn ties_resolve_to_earlier_insertion(
            pool in proptest::collection::vec(arb_normalized_embedding(DIM), 1..3),
            picks in proptest::collection::vec(0usize..3, 2..20),
            query in arb_normalized_embedding(DIM),
        ) {
            let embeddings: Vec<Vec<f32>> =
                picks.iter().map(|&p| pool[p % pool.len()].clone()).collect();
            let count = embeddings.len();
            let results = block_on(async {
                let store = InMemoryVectorStore::new();
                store.insert(chunks_from(embeddings, 1)).await.unwrap();
                store.search(&query, count, None).await.unwrap()
            });

            for window in results.windows(2) {
                if window[0].score == window[1].score {
                    prop_assert!(window[0].id < window[1].id);
                }
            }
        }
    }
}

/// After deleting a document no search returns its chunks, and a second
/// delete of the same document removes nothing.
mod prop_inmemory_document_delete {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn deleted_document_never_resurfaces(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..30),
            query in arb_normalized_embedding(DIM),
            victim in 0usize..3,
        ) {
            let victim = format!("doc_{victim}");
            let chunks = chunks_from(embeddings, 3);
            let expected_removed =
                chunks.iter().filter(|c| c.metadata.document_id == victim).count();
            let total = chunks.len();

            let (removed, removed_again, results) = block_on(async {
                let store = InMemoryVectorStore::new();
                store.insert(chunks).await.unwrap();
                let removed = store.delete_document(&victim).await.unwrap();
                let removed_again = store.delete_document(&victim).await.unwrap();
                let results = store.search(&query, total, None).await.unwrap();
                (removed, removed_again, results)
            });

            prop_assert_eq!(removed, expected_removed);
            prop_assert_eq!(removed_again, 0);
            prop_assert_eq!(results.len(), total - expected_removed);
            prop_assert!(results.iter().all(|r| r.metadata.document_id != victim));
        }
    }
}
