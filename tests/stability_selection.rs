use genopred::evaluate::{MetricReport, pearson};
use genopred::predict::{GenomicPredictor, RrBlup};
use genopred::select::{
    FeatureReducer, NoOpReducer, StabilityConfig, StabilitySelector, train_test_split,
};
use genopred::table::{read_feature_table, write_matrix};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use tempfile::TempDir;

const CAUSAL: [(usize, f64); 3] = [(3, 1.5), (11, -1.0), (24, 0.8)];

/// Signed genotypes for 30 markers, three of which drive the phenotype.
fn simulate(n_samples: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let x = Array2::from_shape_fn((n_samples, 30), |_| rng.gen_range(-1..=1) as f64);
    let y = Array1::from_shape_fn(n_samples, |i| {
        CAUSAL
            .iter()
            .map(|&(column, effect)| effect * x[[i, column]])
            .sum::<f64>()
            + rng.sample(noise)
    });
    (x, y)
}

fn selection_config() -> StabilityConfig {
    StabilityConfig {
        alpha: 0.1,
        threshold: 0.6,
        repetitions: 50,
        ..Default::default()
    }
}

#[test]
fn causal_markers_survive_stability_selection() {
    let (x, y) = simulate(200, 2024);
    let mut selector = StabilitySelector::new(selection_config()).unwrap();
    selector.fit(x.view(), y.view()).unwrap();

    let retained = selector.retained_features().unwrap();
    assert!(!retained.fell_back);
    let kept = retained.indices();
    for (column, _) in CAUSAL {
        assert!(kept.contains(&column), "marker {column} missing from {kept:?}");
        assert_eq!(retained.counts[column], 50);
    }
    assert!(kept.len() < 10, "too many markers kept: {kept:?}");

    let reduced = selector.transform(x.view()).unwrap();
    assert_eq!(reduced.dim(), (200, kept.len()));
    for (position, &column) in kept.iter().enumerate() {
        assert_eq!(reduced.column(position), x.column(column));
    }
}

#[test]
fn selection_from_a_feature_file_and_reload() {
    let dir = TempDir::new().unwrap();
    let (x, y) = simulate(120, 7);
    let ids: Vec<String> = (0..120).map(|i| format!("plant{i}")).collect();
    let names: Vec<String> = (0..30).map(|j| format!("m{j}")).collect();
    let features_path = dir.path().join("features.tsv");
    write_matrix(&features_path, &ids, &names, x.view(), Some(y.view())).unwrap();

    let file = read_feature_table(&features_path, true).unwrap();
    assert_eq!(file.features, x);
    let phenotype = file.phenotype.unwrap();

    let mut selector = StabilitySelector::new(selection_config()).unwrap();
    let fitted = selector
        .fit(file.features.view(), phenotype.view())
        .unwrap()
        .clone();

    let model_path = dir.path().join("selector.toml");
    selector.save(&model_path).unwrap();
    let restored = StabilitySelector::load(&model_path).unwrap();
    assert_eq!(restored.history(), Some(&fitted));
    assert_eq!(
        restored.transform(file.features.view()).unwrap(),
        selector.transform(file.features.view()).unwrap()
    );
}

#[test]
fn reducers_share_one_interface() {
    fn width_after<R: FeatureReducer>(reducer: &mut R, x: &Array2<f64>, y: &Array1<f64>) -> usize {
        reducer.fit_transform(x.view(), y.view()).unwrap().ncols()
    }

    let (x, y) = simulate(100, 99);
    assert_eq!(width_after(&mut NoOpReducer, &x, &y), 30);

    let mut selector = StabilitySelector::new(selection_config()).unwrap();
    let width = width_after(&mut selector, &x, &y);
    assert!((3..30).contains(&width));
}

#[test]
fn selected_markers_feed_an_rrblup_model() {
    let (x, y) = simulate(260, 11);
    let split = train_test_split(260, 0.25, 5).unwrap();
    let x_train = x.select(Axis(0), &split.train);
    let y_train = y.select(Axis(0), &split.train);
    let x_test = x.select(Axis(0), &split.test);
    let y_test = y.select(Axis(0), &split.test);

    let mut selector = StabilitySelector::new(selection_config()).unwrap();
    let reduced_train = selector
        .fit_transform(x_train.view(), y_train.view())
        .unwrap();
    let reduced_test = selector.transform(x_test.view()).unwrap();

    let mut model = RrBlup::new();
    model
        .fit(reduced_train.view(), y_train.view())
        .unwrap();
    let predicted = model.predict(reduced_test.view()).unwrap();

    let report = MetricReport::compute(y_test.view(), predicted.view(), 0.25).unwrap();
    assert!(report.pearson > 0.8, "{report}");
    assert_eq!(report.pearson, pearson(y_test.view(), predicted.view()).unwrap());
}
