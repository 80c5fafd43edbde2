//! Block operations against their one- and two-row counterparts, plus the
//! journal and configuration surfaces.

use det_manip::kernel::{modulus, PhaseKernel, PropagatorKernel};
use det_manip::provenance::CommitJournal;
use det_manip::{DetManip, DetManipConfig, DetManipError};

const TOL: f64 = 1e-9;

fn base() -> DetManip<f64, f64, PropagatorKernel> {
    DetManip::from_args(
        PropagatorKernel::default(),
        vec![0.4, 2.3, 5.1, 7.9],
        vec![1.2, 3.8, 6.6, 9.0],
        DetManipConfig::default(),
    )
    .unwrap()
}

#[test]
fn insert_k_of_two_matches_insert2() {
    let mut a = base();
    let mut b = base();
    let ra = a.try_insert2(5, 1, 0, 3, 8.8, 1.7, 0.3, 4.9).unwrap();
    let rb = b
        .try_insert_k(vec![(5, 8.8), (1, 1.7)], vec![(0, 0.3), (3, 4.9)])
        .unwrap();
    assert!((ra - rb).abs() < TOL * ra.abs().max(1.0));
    a.complete_operation().unwrap();
    b.complete_operation().unwrap();
    assert_eq!(a.matrix(), b.matrix());
    assert!((a.inverse_matrix() - b.inverse_matrix()).amax() < TOL);
}

#[test]
fn insert_k_matches_sequential_inserts() {
    let mut block = base();
    let mut single = base();
    let rows = vec![(6, 9.6), (0, 0.1), (3, 3.3)];
    let cols = vec![(2, 2.2), (6, 9.9), (4, 5.5)];

    let ratio = block.try_insert_k(rows.clone(), cols.clone()).unwrap();
    block.complete_operation().unwrap();

    let mut sorted_rows = rows;
    let mut sorted_cols = cols;
    sorted_rows.sort_by_key(|r| r.0);
    sorted_cols.sort_by_key(|c| c.0);
    let mut product = 1.0;
    for ((i, x), (j, y)) in sorted_rows.into_iter().zip(sorted_cols) {
        product *= single.insert(i, j, x, y).unwrap();
    }

    assert_eq!(block.matrix(), single.matrix());
    assert!((ratio - product).abs() < TOL * ratio.abs().max(1.0));
    assert!((block.determinant() - single.determinant()).abs() < TOL * block.determinant().abs());
}

#[test]
fn remove_k_matches_remove2() {
    let mut a = base();
    let mut b = base();
    let ra = a.try_remove2(3, 1, 0, 2).unwrap();
    let rb = b.try_remove_k(vec![1, 3], vec![2, 0]).unwrap();
    assert!((ra - rb).abs() < TOL * ra.abs().max(1.0));
    a.complete_operation().unwrap();
    b.complete_operation().unwrap();
    assert_eq!(a.matrix(), b.matrix());
    assert_eq!(a.size(), 2);
    assert!(a.check_consistency().is_within(TOL));
}

#[test]
fn removing_everything_returns_to_the_empty_matrix() {
    let mut engine = base();
    engine.try_remove_k(vec![0, 1, 2, 3], vec![3, 2, 1, 0]).unwrap();
    engine.complete_operation().unwrap();
    assert_eq!(engine.size(), 0);
    assert!((engine.determinant() - 1.0).abs() < TOL);
    engine.insert(0, 0, 1.0, 2.0).unwrap();
    assert!(engine.check_consistency().is_within(TOL));
}

#[test]
fn change_row_col_matches_separate_changes() {
    let mut together = base();
    let mut apart = base();
    let ratio = together.change_row_col(2, 1, 4.4, 8.1).unwrap();
    let r1 = apart.change_row(2, 4.4).unwrap();
    let r2 = apart.change_col(1, 8.1).unwrap();
    assert_eq!(together.matrix(), apart.matrix());
    assert!((ratio - r1 * r2).abs() < 1e-8 * ratio.abs().max(1.0));
    assert!(together.check_consistency().is_within(1e-8));
}

#[test]
fn complex_scalar_edits() {
    let mut engine = DetManip::from_args(
        PhaseKernel { omega: 2.1 },
        vec![0.3, 1.9, 4.2],
        vec![0.8, 2.6, 3.7],
        DetManipConfig::default(),
    )
    .unwrap();
    let det_old = engine.determinant();
    let ratio = engine.insert(1, 3, 5.5, 6.1).unwrap();
    assert!(modulus(engine.determinant() - det_old * ratio) < TOL);
    assert!(ratio.im.abs() > 0.0);

    engine.swap_rows(0, 2).unwrap();
    engine.remove(0, 0).unwrap();
    let expected = engine.matrix().try_inverse().unwrap();
    assert!((engine.inverse_matrix() - expected).camax() < 1e-8);
}

#[test]
fn journal_survives_json() {
    let mut engine = base();
    engine.enable_journal();
    engine.insert(0, 0, 3.0, 4.0).unwrap();
    engine.remove(1, 2).unwrap();
    engine.change_col(0, 7.5).unwrap();

    let json = engine.journal().unwrap().to_json().unwrap();
    let restored = CommitJournal::from_json(&json).unwrap();
    let operations: Vec<&str> = restored.records().iter().map(|r| r.operation.as_str()).collect();
    assert_eq!(operations, vec!["insert", "remove", "change_col"]);
    assert_eq!(restored.records()[2].size, 4);
    assert!(restored.verify_chain());
}

#[test]
fn config_from_json_drives_the_engine() {
    let config = DetManipConfig::from_json(r#"{ "initial_capacity": 2, "singular_threshold": 1e-300, "relative_threshold": 1e-12 }"#).unwrap();
    let mut engine = DetManip::with_config(PropagatorKernel::default(), config).unwrap();
    for k in 0..5 {
        engine.insert(k, k, 1.7 * k as f64, 1.7 * k as f64 + 0.9).unwrap();
    }
    assert!(engine.capacity() >= 5);
    assert_eq!(engine.config().singular_threshold, 1e-300);
    assert_eq!(engine.config().relative_threshold, 1e-12);

    let bad = DetManipConfig {
        precision_warning: 1.0,
        precision_error: 0.5,
        ..DetManipConfig::default()
    };
    assert!(matches!(
        DetManip::<f64, f64, _>::with_config(PropagatorKernel::default(), bad),
        Err(DetManipError::InvalidConfig(_))
    ));
}
