//! End-to-end conversions over synthetic anchor containers.

use anchor_pre_processing::bin_writer::read_f32_bin;
use anchor_pre_processing::ply::{PlyTable, write_float_element};
use anchor_pre_processing::{
    AnchorConverter, ConversionConfig, ConvertError, DegeneratePolicy, FeatureBatch,
    MlpEvaluator, ModelEvaluator, Result,
};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const K: usize = 10;
const FEATURES: usize = 32;

struct Anchor {
    position: [f32; 3],
    level: f32,
    extra_level: f32,
    scales: [f32; 6],
    offsets: [f32; 3 * K],
}

impl Anchor {
    fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            level: 0.0,
            extra_level: 0.0,
            scales: [0.0; 6],
            offsets: [0.0; 3 * K],
        }
    }
}

/// Writes `point_cloud.ply` with offsets declared in lexical order
/// (`f_offset_0, f_offset_1, f_offset_10, ...`).
fn write_container(dir: &Path, anchors: &[Anchor], with_info: bool) {
    let mut names: Vec<String> = ["x", "y", "z", "level", "extra_level"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if with_info {
        names.push("info".into());
    }
    names.extend((0..6).map(|i| format!("scale_{}", i)));
    names.extend((0..FEATURES).map(|i| format!("f_anchor_feat_{}", i)));
    let mut offset_names: Vec<String> = (0..3 * K).map(|i| format!("f_offset_{}", i)).collect();
    offset_names.sort();
    names.extend(offset_names.iter().cloned());

    let rows: Vec<Vec<f32>> = anchors
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let mut row = vec![a.position[0], a.position[1], a.position[2], a.level, a.extra_level];
            if with_info {
                row.push(100.0 + i as f32);
            }
            row.extend_from_slice(&a.scales);
            row.extend((0..FEATURES).map(|f| (i * FEATURES + f) as f32 * 0.01));
            for name in &offset_names {
                let index: usize = name["f_offset_".len()..].parse().unwrap();
                row.push(a.offsets[index]);
            }
            row
        })
        .collect();

    let mut bytes = Vec::new();
    write_float_element(
        &mut bytes,
        "vertex",
        &names,
        rows.len(),
        rows.iter().map(|row| row.as_slice()),
    )
    .unwrap();
    fs::write(dir.join("point_cloud.ply"), bytes).unwrap();
}

fn scattered_anchors(count: usize) -> Vec<Anchor> {
    let mut state = 12345u32;
    let mut next = move || {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (state >> 8) as f32 / (1u32 << 24) as f32
    };
    (0..count)
        .map(|i| {
            let mut anchor = Anchor::at([next() * 10.0, next() * 10.0, next() * 10.0]);
            anchor.level = (i % 3) as f32;
            anchor.extra_level = (i % 2) as f32;
            anchor.scales = [0.0, 0.0, 0.0, -1.0, -2.0, -3.0];
            for (j, offset) in anchor.offsets.iter_mut().enumerate() {
                *offset = j as f32 * 0.01;
            }
            anchor
        })
        .collect()
}

/// Deterministic model: fixed colour and covariance, opacity per child.
struct StubModel {
    color: f32,
    covariance: [f32; 7],
    opacity: Vec<f32>,
}

impl StubModel {
    fn new(opacity: Vec<f32>) -> Self {
        Self {
            color: 0.5,
            covariance: [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            opacity,
        }
    }
}

impl ModelEvaluator for StubModel {
    fn color(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
        Ok(vec![self.color; batch.len() * K * 3])
    }

    fn covariance(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
        Ok((0..batch.len() * K)
            .flat_map(|_| self.covariance)
            .collect())
    }

    fn opacity(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
        Ok((0..batch.len())
            .flat_map(|_| self.opacity.iter().copied())
            .collect())
    }
}

fn fallback_config() -> ConversionConfig {
    ConversionConfig {
        degenerate_policy: DegeneratePolicy::Fallback,
        ..ConversionConfig::default()
    }
}

#[test]
fn flat_outputs_share_anchor_count() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let anchors = scattered_anchors(50);
    write_container(source.path(), &anchors, true);

    let converter = AnchorConverter::new(source.path(), output.path(), ConversionConfig::default());
    let manifest = converter.convert_flat().unwrap();

    assert_eq!(manifest.anchor_count, 50);
    assert_eq!(manifest.info, vec![100.0, 101.0]);
    assert_eq!(manifest.files.len(), 7);
    for file in &manifest.files {
        let data = read_f32_bin(&output.path().join(&file.file)).unwrap();
        assert_eq!(data.len(), file.float_count, "{}", file.file);
        if file.floats_per_anchor > 0 {
            assert_eq!(data.len(), 50 * file.floats_per_anchor, "{}", file.file);
        }
    }
    assert_eq!(manifest.level_histogram.values().sum::<usize>(), 50);
    assert!(output.path().join("manifest.json").exists());

    let info = read_f32_bin(&output.path().join("anchor_info.bin")).unwrap();
    assert_eq!(info, vec![100.0, 101.0]);
}

#[test]
fn flat_positions_are_a_permutation_of_the_input() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let anchors = scattered_anchors(64);
    write_container(source.path(), &anchors, true);

    AnchorConverter::new(source.path(), output.path(), ConversionConfig::default())
        .convert_flat()
        .unwrap();

    let positions = read_f32_bin(&output.path().join("anchor_positions.bin")).unwrap();
    let mut sorted: Vec<[u32; 3]> = positions
        .chunks_exact(3)
        .map(|p| [p[0].to_bits(), p[1].to_bits(), p[2].to_bits()])
        .collect();
    let mut expected: Vec<[u32; 3]> = anchors
        .iter()
        .map(|a| a.position.map(f32::to_bits))
        .collect();
    sorted.sort();
    expected.sort();
    assert_eq!(sorted, expected);
}

#[test]
fn flat_child_positions_follow_offsets_and_scales() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let mut anchor = Anchor::at([1.0, 2.0, 3.0]);
    anchor.scales = [0.0, (2.0f32).ln(), 0.0, 0.0, 0.0, 0.0];
    anchor.offsets[0] = 0.5; // axis 0, child 0
    anchor.offsets[K] = 0.25; // axis 1, child 0
    anchor.offsets[2 * K + 1] = -1.0; // axis 2, child 1
    write_container(source.path(), &[anchor], true);

    AnchorConverter::new(source.path(), output.path(), ConversionConfig::default())
        .convert_flat()
        .unwrap();

    let children = read_f32_bin(&output.path().join("gsplat_positions.bin")).unwrap();
    assert_eq!(children.len(), 3 * K);
    let close = |a: f32, b: f32| (a - b).abs() < 1e-5;
    assert!(close(children[0], 1.5));
    assert!(close(children[1], 2.5));
    assert!(close(children[2], 3.0));
    assert!(close(children[5], 2.0));

    let extents = read_f32_bin(&output.path().join("anchor_scales.bin")).unwrap();
    assert_eq!(extents, vec![1.0, 1.0, 1.0]);
}

#[test]
fn empty_container_produces_empty_outputs() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_container(source.path(), &[], true);

    let flat = AnchorConverter::new(source.path(), output.path(), ConversionConfig::default());
    let manifest = flat.convert_flat().unwrap();
    assert_eq!(manifest.anchor_count, 0);
    assert!(manifest.bounds.is_none());
    assert!(manifest.info.is_empty());
    for file in &manifest.files {
        assert_eq!(fs::metadata(output.path().join(&file.file)).unwrap().len(), 0);
    }

    let written = flat
        .convert_structured(&StubModel::new(vec![0.5; K]), None)
        .unwrap();
    assert_eq!(written, 0);
    let table = PlyTable::open(&output.path().join("output.ply"), "vertex").unwrap();
    assert!(table.is_empty());
}

#[test]
fn flat_mode_requires_info() {
    let source = tempfile::tempdir().unwrap();
    let output = source.path().join("out");
    write_container(source.path(), &scattered_anchors(3), false);

    let result = AnchorConverter::new(source.path(), &output, ConversionConfig::default())
        .convert_flat();
    assert!(matches!(result, Err(ConvertError::Format { ref field, .. }) if field == "info"));
    assert!(!output.exists());
}

#[test]
fn single_anchor_near_camera_expands_at_origin() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_container(source.path(), &[Anchor::at([0.0, 0.0, 0.0])], false);

    let config = ConversionConfig {
        camera_position: [0.0, 0.0, 1e-3],
        ..ConversionConfig::default()
    };
    let mut model = StubModel::new(vec![0.5; K]);
    model.covariance = [0.0, 1.0, -1.0, 0.0, 0.0, 3.0, 4.0];

    let converter = AnchorConverter::new(source.path(), output.path(), config);
    assert_eq!(converter.convert_structured(&model, None).unwrap(), K);

    let table = PlyTable::open(&output.path().join("output.ply"), "vertex").unwrap();
    assert_eq!(table.len(), K);
    for axis in ["x", "y", "z"] {
        assert!(table.values(axis).unwrap().iter().all(|&v| v == 0.0));
    }

    let sigmoid = |x: f64| 1.0 / (1.0 + (-x).exp());
    for (k, raw) in [0.0, 1.0, -1.0].into_iter().enumerate() {
        let expected = sigmoid(raw).ln();
        let values = table.values(&format!("scale_{}", k)).unwrap();
        assert!(values.iter().all(|v| (v - expected).abs() < 1e-5));
    }

    let rot2 = table.values("rot_2").unwrap();
    let rot3 = table.values("rot_3").unwrap();
    assert!(rot2.iter().all(|v| (v - 0.6).abs() < 1e-6));
    assert!(rot3.iter().all(|v| (v - 0.8).abs() < 1e-6));

    let f_dc = table.values("f_dc_0").unwrap();
    assert!(f_dc.iter().all(|&v| v == 0.0));
    assert!(table.values("opacity").unwrap().iter().all(|&v| v.abs() < 1e-6));
}

#[test]
fn structured_quaternions_are_unit_length() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_container(source.path(), &scattered_anchors(20), false);

    let mut model = StubModel::new(vec![0.9; K]);
    model.covariance = [0.1, 0.2, 0.3, 0.4, -1.3, 2.2, 0.05];
    let written = AnchorConverter::new(source.path(), output.path(), ConversionConfig::default())
        .convert_structured(&model, Some("splats.ply"))
        .unwrap();
    assert_eq!(written, 20 * K);

    let table = PlyTable::open(&output.path().join("splats.ply"), "vertex").unwrap();
    let rot: Vec<&[f64]> = (0..4)
        .map(|i| table.values(&format!("rot_{}", i)).unwrap())
        .collect();
    for row in 0..table.len() {
        let norm = (0..4).map(|i| rot[i][row] * rot[i][row]).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}

#[test]
fn zero_opacity_children_are_filtered() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_container(source.path(), &scattered_anchors(4), false);

    let opacity = (0..K).map(|j| if j % 2 == 0 { 0.0 } else { 0.25 }).collect();
    let written = AnchorConverter::new(source.path(), output.path(), ConversionConfig::default())
        .convert_structured(&StubModel::new(opacity), None)
        .unwrap();
    assert_eq!(written, 4 * K / 2);

    let table = PlyTable::open(&output.path().join("output.ply"), "vertex").unwrap();
    assert_eq!(table.len(), written);
    let expected = -(1.0f64 / 0.25 - 1.0).ln();
    assert!(table
        .values("opacity")
        .unwrap()
        .iter()
        .all(|v| (v - expected).abs() < 1e-5));
}

#[test]
fn anchor_at_camera_fails_unless_fallback() {
    let source = tempfile::tempdir().unwrap();
    let output = source.path().join("out");
    write_container(source.path(), &[Anchor::at([0.0, 0.0, 0.0])], false);
    let model = StubModel::new(vec![0.5; K]);

    let strict = AnchorConverter::new(source.path(), &output, ConversionConfig::default());
    assert!(matches!(
        strict.convert_structured(&model, None),
        Err(ConvertError::DegenerateGeometry { anchor: 0, .. })
    ));
    assert!(!output.exists());

    let lenient = AnchorConverter::new(source.path(), &output, fallback_config());
    assert_eq!(lenient.convert_structured(&model, None).unwrap(), K);
}

#[test]
fn zero_rotation_fails_unless_fallback() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_container(source.path(), &[Anchor::at([1.0, 1.0, 1.0])], false);
    let mut model = StubModel::new(vec![0.5; K]);
    model.covariance = [0.0; 7];

    let strict = AnchorConverter::new(source.path(), output.path(), ConversionConfig::default());
    assert!(matches!(
        strict.convert_structured(&model, None),
        Err(ConvertError::DegenerateGeometry { .. })
    ));
    assert!(!output.path().join("output.ply").exists());

    let lenient = AnchorConverter::new(source.path(), output.path(), fallback_config());
    lenient.convert_structured(&model, None).unwrap();
    let table = PlyTable::open(&output.path().join("output.ply"), "vertex").unwrap();
    assert!(table.values("rot_0").unwrap().iter().all(|&v| v == 1.0));
    assert!(table.values("rot_1").unwrap().iter().all(|&v| v == 0.0));
}

#[test]
fn short_model_output_is_rejected() {
    struct Truncated;
    impl ModelEvaluator for Truncated {
        fn color(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
            Ok(vec![0.5; batch.len() * K * 3])
        }
        fn covariance(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
            Ok(vec![1.0; batch.len() * K * 7 - 1])
        }
        fn opacity(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
            Ok(vec![0.5; batch.len() * K])
        }
    }

    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_container(source.path(), &scattered_anchors(2), false);

    let result = AnchorConverter::new(source.path(), output.path(), ConversionConfig::default())
        .convert_structured(&Truncated, None);
    assert!(matches!(result, Err(ConvertError::ModelEvaluation { ref model, .. }) if model == "covariance"));
}

fn write_mlp(path: &Path, inputs: usize, bias: &[f32], activation: &str) {
    let weights: Vec<Vec<f32>> = bias.iter().map(|_| vec![0.0; inputs]).collect();
    let json = serde_json::json!({
        "layers": [{ "weights": weights, "bias": bias, "activation": activation }]
    });
    fs::write(path, serde_json::to_string(&json).unwrap()).unwrap();
}

#[test]
fn json_mlps_drive_structured_conversion() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_container(source.path(), &scattered_anchors(5), false);

    let inputs = FEATURES + 3;
    write_mlp(&source.path().join("color_mlp.json"), inputs, &[0.5; 3 * K], "identity");
    let cov: Vec<f32> = (0..K).flat_map(|_| [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0]).collect();
    write_mlp(&source.path().join("cov_mlp.json"), inputs, &cov, "identity");
    write_mlp(&source.path().join("opacity_mlp.json"), inputs, &[0.0; K], "sigmoid");

    let config = ConversionConfig::default();
    let model = MlpEvaluator::load_dir(source.path(), config.model_input_dim(), K).unwrap();
    let written = AnchorConverter::new(source.path(), output.path(), config)
        .convert_structured(&model, None)
        .unwrap();
    assert_eq!(written, 5 * K);

    let table = PlyTable::open(&output.path().join("output.ply"), "vertex").unwrap();
    assert!(table.values("rot_3").unwrap().iter().all(|&v| v == 1.0));
    assert!(table.values("opacity").unwrap().iter().all(|v| v.abs() < 1e-6));
}

#[test]
fn mlp_with_wrong_width_is_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    write_mlp(&dir.path().join("color_mlp.json"), 34, &[0.5; 3 * K], "identity");
    write_mlp(&dir.path().join("cov_mlp.json"), 35, &[0.0; 7 * K], "identity");
    write_mlp(&dir.path().join("opacity_mlp.json"), 35, &[0.0; K], "sigmoid");

    assert!(matches!(
        MlpEvaluator::load_dir(dir.path(), 35, K),
        Err(ConvertError::ModelEvaluation { .. })
    ));
}

#[test]
fn missing_offsets_fail_before_output() {
    let source = tempfile::tempdir().unwrap();
    let output = source.path().join("out");
    let config = ConversionConfig {
        gaussians_per_anchor: 12,
        ..ConversionConfig::default()
    };
    write_container(source.path(), &scattered_anchors(3), true);

    let result = AnchorConverter::new(source.path(), &output, config).convert_flat();
    assert!(matches!(result, Err(ConvertError::Format { .. })));
    assert!(!output.exists());
}

#[test]
fn config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{ "camera_position": [1.0, 2.0, 3.0], "degenerate_policy": "fallback" }"#,
    )
    .unwrap();

    let config = ConversionConfig::load(&path).unwrap();
    assert_eq!(config.camera_position, [1.0, 2.0, 3.0]);
    assert_eq!(config.degenerate_policy, DegeneratePolicy::Fallback);
    assert_eq!(config.gaussians_per_anchor, K);
}

/// Anchors with distinct levels, extents and offsets so every output row can
/// be traced back to its source anchor.
fn traceable_anchors(count: usize) -> Vec<Anchor> {
    let mut anchors = scattered_anchors(count);
    for (i, anchor) in anchors.iter_mut().enumerate() {
        anchor.level = i as f32;
        anchor.extra_level = (count - i) as f32;
        anchor.scales = [0.0, 0.0, 0.0, -0.01 * i as f32, 0.02 * i as f32, -0.5];
        for (j, offset) in anchor.offsets.iter_mut().enumerate() {
            *offset = i as f32 + j as f32 * 0.001;
        }
    }
    anchors
}

fn source_index(anchors: &[Anchor]) -> HashMap<[u32; 3], usize> {
    let index: HashMap<[u32; 3], usize> = anchors
        .iter()
        .enumerate()
        .map(|(i, a)| (a.position.map(f32::to_bits), i))
        .collect();
    assert_eq!(index.len(), anchors.len());
    index
}

fn expected_children(anchor: &Anchor) -> Vec<f32> {
    let mut out = Vec::with_capacity(3 * K);
    for j in 0..K {
        for axis in 0..3 {
            let value = anchor.position[axis] as f64
                + anchor.offsets[axis * K + j] as f64 * (anchor.scales[axis] as f64).exp();
            out.push(value as f32);
        }
    }
    out
}

#[test]
fn every_flat_file_follows_the_same_order() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let anchors = traceable_anchors(64);
    write_container(source.path(), &anchors, true);
    let index = source_index(&anchors);

    AnchorConverter::new(source.path(), output.path(), ConversionConfig::default())
        .convert_flat()
        .unwrap();

    let read = |name: &str| read_f32_bin(&output.path().join(name)).unwrap();
    let positions = read("anchor_positions.bin");
    let levels = read("anchor_levels.bin");
    let extra_levels = read("anchor_extra_levels.bin");
    let features = read("anchor_features.bin");
    let extents = read("anchor_scales.bin");
    let children = read("gsplat_positions.bin");

    for row in 0..anchors.len() {
        let p = &positions[3 * row..3 * row + 3];
        let src = index[&[p[0].to_bits(), p[1].to_bits(), p[2].to_bits()]];
        let anchor = &anchors[src];

        assert_eq!(levels[row], anchor.level, "row {}", row);
        assert_eq!(extra_levels[row], anchor.extra_level, "row {}", row);

        let expected_features: Vec<f32> =
            (0..FEATURES).map(|f| (src * FEATURES + f) as f32 * 0.01).collect();
        assert_eq!(&features[FEATURES * row..FEATURES * (row + 1)], &expected_features[..]);

        for k in 0..3 {
            let expected = (anchor.scales[3 + k] as f64).exp() as f32;
            assert!((extents[3 * row + k] - expected).abs() < 1e-6, "row {}", row);
        }

        let got = &children[3 * K * row..3 * K * (row + 1)];
        for (g, e) in got.iter().zip(expected_children(anchor)) {
            assert!((g - e).abs() < 1e-4, "row {}: {} vs {}", row, g, e);
        }
    }
}

#[test]
fn structured_children_follow_the_flat_order() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let anchors = traceable_anchors(64);
    write_container(source.path(), &anchors, true);
    let index = source_index(&anchors);

    let converter =
        AnchorConverter::new(source.path(), output.path(), ConversionConfig::default());
    converter.convert_flat().unwrap();
    let written = converter
        .convert_structured(&StubModel::new(vec![0.5; K]), None)
        .unwrap();
    assert_eq!(written, anchors.len() * K);

    let positions = read_f32_bin(&output.path().join("anchor_positions.bin")).unwrap();
    let table = PlyTable::open(&output.path().join("output.ply"), "vertex").unwrap();
    let [x, y, z] = ["x", "y", "z"].map(|axis| table.values(axis).unwrap());

    for row in 0..anchors.len() {
        let p = &positions[3 * row..3 * row + 3];
        let anchor = &anchors[index[&[p[0].to_bits(), p[1].to_bits(), p[2].to_bits()]]];
        let expected = expected_children(anchor);
        for j in 0..K {
            let record = row * K + j;
            let got = [x[record], y[record], z[record]];
            for axis in 0..3 {
                assert!(
                    (got[axis] as f32 - expected[3 * j + axis]).abs() < 1e-4,
                    "anchor row {} child {}",
                    row,
                    j
                );
            }
        }
    }
}

#[test]
fn non_finite_level_is_a_format_error() {
    let source = tempfile::tempdir().unwrap();
    let output = source.path().join("out");
    let mut anchors = scattered_anchors(3);
    anchors[1].level = f32::NAN;
    write_container(source.path(), &anchors, true);

    let result = AnchorConverter::new(source.path(), &output, ConversionConfig::default())
        .convert_flat();
    assert!(matches!(result, Err(ConvertError::Format { ref field, .. }) if field == "level"));
    assert!(!output.exists());
}
