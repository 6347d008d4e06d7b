mod helpers;

use std::sync::Arc;

use embed_server::service::{EmbeddingService, ServiceError, ServiceState};
use embed_server::types::EmbeddingRequest;
use helpers::{limits, norm, provider, ready_service, texts, FakeModel, TEST_DIM};

#[tokio::test]
async fn embed_returns_one_vector_per_text_in_order() {
    let service = ready_service(FakeModel::new());
    let input = texts(7);

    let result = service.embed(EmbeddingRequest::new(input.clone())).await.unwrap();

    assert_eq!(result.embeddings.len(), input.len());
    assert_eq!(result.dimension, TEST_DIM);
    assert_eq!(result.model, "fake-e5");
    assert_eq!(result.device, "cpu");
    assert!(result.processing_time >= 0.0);

    // Each position matches the text embedded on its own.
    for (text, vector) in input.iter().zip(&result.embeddings) {
        let single = service
            .embed(EmbeddingRequest::new([text.clone()]))
            .await
            .unwrap();
        assert_eq!(&single.embeddings[0], vector);
    }
}

#[tokio::test]
async fn normalized_vectors_have_unit_norm() {
    let service = ready_service(FakeModel::new());
    let result = service.embed(EmbeddingRequest::new(texts(10))).await.unwrap();
    for v in &result.embeddings {
        assert!((norm(v) - 1.0).abs() < 1e-3, "norm was {}", norm(v));
    }
}

#[tokio::test]
async fn raw_vectors_keep_model_magnitude() {
    let service = ready_service(FakeModel::new());
    let request = EmbeddingRequest {
        normalize: false,
        ..EmbeddingRequest::new(["vitamin D"])
    };
    let result = service.embed(request).await.unwrap();
    assert!(norm(&result.embeddings[0]) > 1.5);
}

#[tokio::test]
async fn embed_applies_passage_prefix_only_when_missing() {
    let model = FakeModel::new();
    let seen = Arc::clone(&model.seen);
    let service = ready_service(model);
    seen.lock().unwrap().clear(); // drop the warm-up text

    service
        .embed(EmbeddingRequest::new([
            "vitamin D",
            "query: best form of magnesium",
            "passage: omega-3 lowers triglycerides",
        ]))
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "passage: vitamin D",
            "query: best form of magnesium",
            "passage: omega-3 lowers triglycerides",
        ]
    );
}

#[tokio::test]
async fn similarity_always_prefixes_passage() {
    let model = FakeModel::new();
    let seen = Arc::clone(&model.seen);
    let service = ready_service(model);
    seen.lock().unwrap().clear();

    let result = service
        .similarity(EmbeddingRequest::new(["query: zinc", "zinc"]))
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["passage: query: zinc", "passage: zinc"]);
    // Texts are echoed as submitted.
    assert_eq!(result.texts, vec!["query: zinc", "zinc"]);
    assert_eq!(result.model, "fake-e5");
}

#[tokio::test]
async fn similarity_matrix_is_symmetric_with_unit_diagonal() {
    let service = ready_service(FakeModel::new());
    let input = texts(5);
    let request = EmbeddingRequest {
        // similarity ignores this and normalizes anyway
        normalize: false,
        ..EmbeddingRequest::new(input.clone())
    };
    let result = service.similarity(request).await.unwrap();
    let m = &result.similarities;

    assert_eq!(m.len(), input.len());
    for i in 0..m.len() {
        assert_eq!(m[i].len(), input.len());
        assert_eq!(m[i][i], 1.0);
        for j in 0..m.len() {
            assert_eq!(m[i][j], m[j][i]);
            assert!(m[i][j] <= 1.0 + 1e-5 && m[i][j] >= -1.0 - 1e-5);
        }
    }
}

#[tokio::test]
async fn identical_texts_have_similarity_one() {
    let service = ready_service(FakeModel::new());
    let result = service
        .similarity(EmbeddingRequest::new(["kreatyna", "kreatyna"]))
        .await
        .unwrap();
    assert!((result.similarities[0][1] - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn embed_rejects_empty_and_oversized_requests() {
    let service = ready_service(FakeModel::new());

    let empty = service.embed(EmbeddingRequest::new(texts(0))).await;
    assert!(matches!(empty, Err(ServiceError::Validation(_))));

    let too_many = service.embed(EmbeddingRequest::new(texts(101))).await;
    assert!(matches!(too_many, Err(ServiceError::Validation(_))));

    let max = service.embed(EmbeddingRequest::new(texts(100))).await.unwrap();
    assert_eq!(max.embeddings.len(), 100);
}

#[tokio::test]
async fn validation_happens_before_inference() {
    let model = FakeModel::new();
    let seen = Arc::clone(&model.seen);
    let service = ready_service(model);
    seen.lock().unwrap().clear();

    let _ = service.embed(EmbeddingRequest::new(texts(101))).await;
    let _ = service.similarity(EmbeddingRequest::new(["a"])).await;

    assert!(seen.lock().unwrap().is_empty(), "model must not be touched");
}

#[tokio::test]
async fn similarity_needs_two_texts() {
    let service = ready_service(FakeModel::new());
    let err = service
        .similarity(EmbeddingRequest::new(["a"]))
        .await
        .unwrap_err();
    match err {
        ServiceError::Validation(msg) => assert!(msg.contains("at least 2")),
        other => panic!("expected validation failure, got {other:?}"),
    }

    let too_many = service.similarity(EmbeddingRequest::new(texts(101))).await;
    assert!(matches!(too_many, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn inference_failure_fails_whole_request() {
    let model = FakeModel {
        fail_on: Some("boom"),
        ..FakeModel::new()
    };
    let service = ready_service(model);

    let mut input = texts(40);
    input[35] = "boom".into(); // lands in the second batch of 32
    let err = service.embed(EmbeddingRequest::new(input)).await.unwrap_err();

    match err {
        ServiceError::Inference(msg) => assert!(msg.contains("out of memory")),
        other => panic!("expected inference failure, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_model_output_is_inference_failure() {
    let model = FakeModel {
        truncate_on: Some("short"),
        ..FakeModel::new()
    };
    let service = ready_service(model);

    let mut input = texts(5);
    input[3] = "short".into();
    let err = service.embed(EmbeddingRequest::new(input)).await.unwrap_err();
    match err {
        ServiceError::Inference(msg) => {
            assert!(msg.contains(&format!("expected {TEST_DIM}")), "{msg}")
        }
        other => panic!("expected inference failure, got {other:?}"),
    }

    // Similarity goes through the same check.
    let sim = service
        .similarity(EmbeddingRequest::new(["fine", "short text"]))
        .await;
    assert!(matches!(sim, Err(ServiceError::Inference(_))));

    // The service stays usable for well-formed input.
    assert!(service.embed(EmbeddingRequest::new(texts(3))).await.is_ok());
}

#[tokio::test]
async fn not_ready_until_marked_ready() {
    let service = EmbeddingService::new(limits(1, 1_000));

    assert!(matches!(service.health().await, Err(ServiceError::NotReady)));
    assert!(matches!(
        service.embed(EmbeddingRequest::new(["a"])).await,
        Err(ServiceError::NotReady)
    ));
    assert!(matches!(
        service.similarity(EmbeddingRequest::new(["a", "b"])).await,
        Err(ServiceError::NotReady)
    ));

    service.mark_ready(provider(FakeModel::new())).unwrap();

    let health = service.health().await.unwrap();
    assert_eq!(service.state(), ServiceState::Ready);
    assert!(health.model_loaded);
    assert_eq!(health.status, ServiceState::Ready);
    assert_eq!(health.dimension, TEST_DIM);
    assert_eq!(health.device, "cpu");
    assert!(health.memory.is_empty());
}

#[tokio::test]
async fn declared_dimension_is_reported() {
    let model = FakeModel {
        dim: 1024,
        ..FakeModel::new()
    };
    let service = ready_service(model);
    assert_eq!(service.health().await.unwrap().dimension, 1024);
    let result = service.embed(EmbeddingRequest::new(["a"])).await.unwrap();
    assert_eq!(result.embeddings[0].len(), 1024);
}

#[tokio::test]
async fn shutdown_is_terminal() {
    let service = ready_service(FakeModel::new());

    let released = service.begin_shutdown();
    assert!(released.is_some());
    assert_eq!(service.state(), ServiceState::ShuttingDown);

    assert!(matches!(service.health().await, Err(ServiceError::NotReady)));
    assert!(matches!(
        service.embed(EmbeddingRequest::new(["a"])).await,
        Err(ServiceError::NotReady)
    ));
    assert!(service.mark_ready(provider(FakeModel::new())).is_err());
}

#[tokio::test]
async fn mark_ready_twice_is_rejected() {
    let service = ready_service(FakeModel::new());
    assert!(service.mark_ready(provider(FakeModel::new())).is_err());
    assert_eq!(service.state(), ServiceState::Ready);
}

#[test]
fn list_models_ignores_load_state() {
    let cold = EmbeddingService::new(limits(1, 1_000));
    let warm = ready_service(FakeModel::new());

    let models = cold.list_models();
    assert!(!models.models.is_empty());
    assert_eq!(models, warm.list_models());
    assert_eq!(models, cold.list_models());
}

#[tokio::test]
async fn model_name_override_is_accepted_but_ignored() {
    let service = ready_service(FakeModel::new());
    let request = EmbeddingRequest {
        model_name: Some("some-other-model".into()),
        ..EmbeddingRequest::new(["a"])
    };
    let result = service.embed(request).await.unwrap();
    assert_eq!(result.model, "fake-e5");
}
