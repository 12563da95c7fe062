use crate::filter::{filter_matrix, Threshold};
use crate::knee::{estimate_knee_inflection, Confidence};
use crate::rank_curve::{compute_rank_curve, DEFAULT_LOWER};
use crate::sim::{random_feature_barcode_matrix, random_totals, DropletPopulation};
use crate::{call_cells, BarcodeRankParams};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// 50 features x 10000 barcodes: 9000 empty droplets with at most 3 UMIs, 1000 cells with
/// 2000 to 5000 UMIs.
fn droplet_matrix(seed: u64) -> droplet_types::FeatureBarcodeMatrix {
    let mut rng = SmallRng::seed_from_u64(seed);
    random_feature_barcode_matrix(
        &mut rng,
        50,
        &[
            DropletPopulation::new(9000, 0..=3),
            DropletPopulation::new(1000, 2000..=5000),
        ],
    )
}

#[test]
fn test_empty_droplets_end_to_end() {
    for seed in 0..3 {
        let fbm = droplet_matrix(seed);
        let totals = fbm.barcode_totals();
        let curve = compute_rank_curve(&totals, DEFAULT_LOWER);
        let est = estimate_knee_inflection(&curve).unwrap();

        assert!(est.inflection > 3.0 && est.inflection < 2000.0, "{est:?}");
        assert!(est.inflection <= est.knee);

        let cells = filter_matrix(&fbm, &totals, est.inflection, true).unwrap();
        assert!((950..=1050).contains(&cells.num_barcodes()), "{}", cells.num_barcodes());
        assert!(cells.barcode_totals().iter().all(|&t| t as f64 > est.inflection));
        assert!(cells.num_features() <= fbm.num_features());
    }
}

#[test]
fn test_knee_above_inflection() {
    let mut rng = SmallRng::seed_from_u64(11);
    for (num_cells, num_empty) in [(100, 10_000), (500, 20_000), (2000, 50_000)] {
        let totals = random_totals(
            &mut rng,
            &[
                DropletPopulation::new(num_cells, 4500..=5500),
                DropletPopulation::new(num_empty, 4..=6),
            ],
        );
        let est = estimate_knee_inflection(&compute_rank_curve(&totals, DEFAULT_LOWER)).unwrap();
        assert!(est.inflection <= est.knee, "{est:?}");
        assert_eq!(est.confidence, Confidence::High);
    }
}

#[test]
fn test_filter_properties() {
    let fbm = droplet_matrix(5);
    let totals = fbm.barcode_totals();
    for threshold in [0.0, 3.0, 1000.0, 4999.0] {
        let once = filter_matrix(&fbm, &totals, threshold, true).unwrap();
        assert!(once.num_barcodes() <= fbm.num_barcodes());
        assert!(once.barcode_totals().iter().all(|&t| t as f64 > threshold));
        // every retained barcode comes from the input
        assert!(once.barcodes.iter().all(|bc| fbm.barcodes.contains(bc)));

        let twice = filter_matrix(&once, &once.barcode_totals(), threshold, true).unwrap();
        assert_eq!(once.barcodes, twice.barcodes);
        assert_eq!(once.matrix, twice.matrix);
    }
}

#[test]
fn test_shuffled_barcodes() {
    let fbm = droplet_matrix(8);
    let mut totals = fbm.barcode_totals();
    let before = estimate_knee_inflection(&compute_rank_curve(&totals, DEFAULT_LOWER)).unwrap();
    totals.shuffle(&mut SmallRng::seed_from_u64(1));
    let after = estimate_knee_inflection(&compute_rank_curve(&totals, DEFAULT_LOWER)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_call_cells_at_knee() {
    let fbm = droplet_matrix(13);
    let params = BarcodeRankParams::default();
    let knee = call_cells(&fbm, &params, Threshold::Knee, false).unwrap();
    let inflection = call_cells(&fbm, &params, Threshold::Inflection, false).unwrap();

    // the knee is the stricter of the two
    assert!(knee.summary.num_cells <= inflection.summary.num_cells);
    assert_eq!(knee.summary.num_features, 50);
    assert_eq!(knee.matrix.num_features(), 50);
    assert_eq!(knee.summary.knee, inflection.summary.knee);
}
