use serde_json::json;

use crate::{
    domain::{
        AnalysisResult, HistoryKind, InferenceResult, ModelDescriptor, ModelKind, ModelType,
        PredictedLabel,
    },
    error::{ErrorBody, ProtocolError},
    protocol::{AnalyzeResponse, HistoryResponse, PredictResponse, TrainResponse},
};

fn analyze_payload(target: serde_json::Value) -> serde_json::Value {
    json!({
        "summary": {
            "shape": [120, 4],
            "missing": {"age": 3, "income": 0, "label": 0, "region": 1},
            "duplicates": 2,
            "outliers": {"age": 1, "income": 4},
            "head": [{"age": 31, "income": 5200.5, "label": 1, "region": "north"}]
        },
        "target_detected": target,
        "saved_path": "/srv/uploads/1a2b3c4d_data.csv"
    })
}

#[test]
fn analyze_response_maps_to_analysis_result() {
    let response: AnalyzeResponse =
        serde_json::from_value(analyze_payload(json!("label"))).expect("decode");
    let analysis = AnalysisResult::from(response);

    assert_eq!(analysis.summary.rows(), 120);
    assert_eq!(analysis.summary.columns(), 4);
    assert_eq!(analysis.summary.duplicates, 2);
    assert_eq!(analysis.summary.total_outliers(), 5);
    assert_eq!(analysis.summary.preview.len(), 1);
    assert_eq!(analysis.detected_target.as_deref(), Some("label"));
    assert_eq!(
        analysis.reference.as_str(),
        "/srv/uploads/1a2b3c4d_data.csv"
    );
    assert_eq!(
        analysis.expected_model_kind(),
        ModelKind::Supervised {
            target: "label".into()
        }
    );
}

#[test]
fn null_target_expects_unsupervised_model() {
    let response: AnalyzeResponse =
        serde_json::from_value(analyze_payload(json!(null))).expect("decode");
    let analysis = AnalysisResult::from(response);

    assert_eq!(analysis.detected_target, None);
    assert_eq!(analysis.expected_model_kind(), ModelKind::Unsupervised);
}

#[test]
fn missing_value_view_skips_complete_columns() {
    let response: AnalyzeResponse =
        serde_json::from_value(analyze_payload(json!(null))).expect("decode");
    let summary = response.summary;

    let missing: Vec<_> = summary.columns_with_missing().collect();
    assert_eq!(missing, vec![("age", 3), ("region", 1)]);
    assert!(!summary.is_complete());
}

#[test]
fn supervised_train_response_requires_target() {
    let response: TrainResponse = serde_json::from_value(json!({
        "model_id": "9f8e7d6c",
        "type": "supervised",
        "model_path": "/srv/model_store/9f8e7d6c.joblib"
    }))
    .expect("decode");

    let err = ModelDescriptor::try_from(response).expect_err("must reject");
    assert!(matches!(err, ProtocolError::MissingTarget { .. }));
}

#[test]
fn unsupervised_train_response_has_no_target() {
    let response: TrainResponse = serde_json::from_value(json!({
        "model_id": "0a1b2c3d",
        "type": "unsupervised"
    }))
    .expect("decode");

    let model = ModelDescriptor::try_from(response).expect("descriptor");
    assert_eq!(model.id.as_str(), "0a1b2c3d");
    assert_eq!(model.kind, ModelKind::Unsupervised);
    assert_eq!(model.kind.target(), None);
}

#[test]
fn unknown_model_type_fails_to_decode() {
    let decoded = serde_json::from_value::<TrainResponse>(json!({
        "model_id": "0a1b2c3d",
        "type": "reinforcement"
    }));
    assert!(decoded.is_err());
}

#[test]
fn predict_response_resolves_supervised_variant() {
    let response: PredictResponse = serde_json::from_value(json!({
        "predictions": [1, 0, "yes", 0.5],
        "history": [{"timestamp": "2024-03-01T10:00:00", "value": 0.5, "type": "prediction"}]
    }))
    .expect("decode");

    let (result, history) = response
        .into_inference(ModelType::Supervised)
        .expect("inference");
    assert_eq!(
        result,
        InferenceResult::Supervised {
            predictions: vec![
                PredictedLabel::Integer(1),
                PredictedLabel::Integer(0),
                PredictedLabel::Text("yes".into()),
                PredictedLabel::Number(0.5),
            ]
        }
    );
    assert_eq!(history.map(|records| records.len()), Some(1));
}

#[test]
fn predict_response_without_expected_field_is_rejected() {
    let response: PredictResponse = serde_json::from_value(json!({
        "predictions": [1, 0]
    }))
    .expect("decode");

    let err = response
        .into_inference(ModelType::Unsupervised)
        .expect_err("must reject");
    assert_eq!(
        err,
        ProtocolError::MissingInference {
            expected: ModelType::Unsupervised,
            field: "anomaly_score"
        }
    );
}

#[test]
fn predict_response_with_both_variants_is_rejected() {
    let response: PredictResponse = serde_json::from_value(json!({
        "predictions": [1],
        "anomaly_score": [0.12]
    }))
    .expect("decode");

    assert_eq!(
        response.into_inference(ModelType::Supervised),
        Err(ProtocolError::AmbiguousInference)
    );
}

#[test]
fn history_response_requires_history_field() {
    assert!(serde_json::from_value::<HistoryResponse>(json!({})).is_err());
    let empty: HistoryResponse =
        serde_json::from_value(json!({"history": []})).expect("decode");
    assert!(empty.history.is_empty());
}

#[test]
fn error_body_prefers_error_over_detail() {
    let body = ErrorBody::parse(br#"{"error": "Model not found", "detail": "ignored"}"#)
        .expect("parse");
    assert_eq!(body.message().as_deref(), Some("Model not found"));

    let body = ErrorBody::parse(br#"{"detail": "saved_path is required"}"#).expect("parse");
    assert_eq!(body.message().as_deref(), Some("saved_path is required"));
}

#[test]
fn error_body_renders_structured_detail_and_skips_blank_fields() {
    let body = ErrorBody::parse(br#"{"error": "  ", "detail": [{"loc": ["body", "file"]}]}"#)
        .expect("parse");
    assert_eq!(
        body.message().as_deref(),
        Some(r#"[{"loc":["body","file"]}]"#)
    );

    assert!(ErrorBody::parse(b"<html>502</html>").is_none());
    assert_eq!(ErrorBody::default().message(), None);
}

#[test]
fn inference_preview_is_bounded_and_formats_scores() {
    let result = InferenceResult::Unsupervised {
        anomaly_scores: vec![0.123456, -0.05, 0.2],
    };
    assert_eq!(result.len(), 3);
    assert_eq!(result.preview(2), vec!["0.1235", "-0.0500"]);
}

#[test]
fn history_kind_defaults_to_prediction() {
    assert_eq!(
        HistoryKind::from_wire(Some("anomaly_score")),
        HistoryKind::AnomalyScore
    );
    assert_eq!(HistoryKind::from_wire(Some("score")), HistoryKind::Prediction);
    assert_eq!(HistoryKind::from_wire(None), HistoryKind::Prediction);
    assert_eq!(HistoryKind::AnomalyScore.series_label(), "Anomaly Score");
}
