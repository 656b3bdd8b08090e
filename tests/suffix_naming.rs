use markbridge::engine::{ConversionEngine, ConversionOptions, OcrBackend, output_suffix};
use markbridge::orchestrator::expand_requests;
use std::path::Path;

#[test]
fn suffix_is_total_and_never_empty() {
    let backends = [None, Some(OcrBackend::RapidOcr), Some(OcrBackend::PpOcrV5)];
    for engine in ConversionEngine::ALL {
        for backend in backends {
            let suffix = output_suffix(engine, backend);
            assert!(!suffix.is_empty(), "{engine:?}/{backend:?}");
            assert!(suffix.starts_with('_'), "{engine:?}/{backend:?}");
        }
    }
}

#[test]
fn engines_get_distinct_suffixes() {
    let mut suffixes: Vec<&str> = ConversionEngine::ALL
        .iter()
        .map(|&e| output_suffix(e, None))
        .collect();
    suffixes.sort();
    suffixes.dedup();
    assert_eq!(suffixes.len(), ConversionEngine::ALL.len());
}

#[test]
fn ppocr_v5_gets_its_own_suffix() {
    assert_eq!(
        output_suffix(ConversionEngine::DoclingCpu, Some(OcrBackend::PpOcrV5)),
        "_docling_v5_cpu"
    );
    assert_eq!(
        output_suffix(ConversionEngine::DoclingCpu, Some(OcrBackend::RapidOcr)),
        "_docling_cpu"
    );
}

#[test]
fn engine_labels_round_trip() {
    for engine in ConversionEngine::ALL {
        let parsed: ConversionEngine = engine.label().parse().expect("parse label");
        assert_eq!(parsed, engine);
    }
    assert!("docling".parse::<ConversionEngine>().is_err());
}

#[test]
fn multiple_ocr_backends_fan_out() {
    let options = ConversionOptions {
        ocr_backends: vec![OcrBackend::RapidOcr, OcrBackend::PpOcrV5],
        ..Default::default()
    };
    let reqs = expand_requests(
        Path::new("doc.pdf"),
        &[ConversionEngine::DoclingCpu],
        &options,
        Path::new("out"),
    );
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0].backend, Some(OcrBackend::RapidOcr));
    assert_eq!(reqs[1].backend, Some(OcrBackend::PpOcrV5));
    assert_ne!(reqs[0].output_name(), reqs[1].output_name());
}

#[test]
fn duplicate_backends_collapse() {
    let options = ConversionOptions {
        ocr_backends: vec![OcrBackend::RapidOcr, OcrBackend::RapidOcr],
        ..Default::default()
    };
    let reqs = expand_requests(
        Path::new("doc.pdf"),
        &[ConversionEngine::DoclingCpu],
        &options,
        Path::new("out"),
    );
    assert_eq!(reqs.len(), 1);
}

#[test]
fn ocr_without_backends_fails_closed() {
    let options = ConversionOptions {
        ocr_enabled: true,
        ocr_backends: Vec::new(),
        ..Default::default()
    };
    let reqs = expand_requests(
        Path::new("doc.pdf"),
        &[ConversionEngine::DoclingCpu],
        &options,
        Path::new("out"),
    );
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].backend, None);
    assert!(!reqs[0].options.ocr_enabled);
}

#[test]
fn non_structured_engines_never_fan_out() {
    let options = ConversionOptions {
        ocr_backends: vec![OcrBackend::RapidOcr, OcrBackend::PpOcrV5],
        ..Default::default()
    };
    let reqs = expand_requests(
        Path::new("doc.pdf"),
        &[ConversionEngine::MarkItDown, ConversionEngine::MarkerCpu],
        &options,
        Path::new("out"),
    );
    assert_eq!(reqs.len(), 2);
    assert!(reqs.iter().all(|r| r.backend.is_none()));
}
