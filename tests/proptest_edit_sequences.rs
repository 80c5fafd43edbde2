//! Property-based tests over random edit sequences.
//!
//! Every committed edit must multiply the determinant by the ratio its
//! proposal reported, the maintained inverse must stay the inverse of the
//! kernel matrix, and a rejected proposal must leave no trace.

use proptest::prelude::*;

use det_manip::kernel::PropagatorKernel;
use det_manip::{DetManip, DetManipError};

type Engine = DetManip<f64, f64, PropagatorKernel>;

const TOL: f64 = 1e-6;
const FLOOR: f64 = 1e-3;

type Edit = (u8, [usize; 4], [f64; 4]);

fn edits(max_len: usize) -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(
        (0u8..7, prop::array::uniform4(0usize..64), prop::array::uniform4(0.0f64..10.0)),
        1..max_len,
    )
}

fn base_args() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.0f64..10.0, 0.0f64..10.0), 3..8)
}

/// Grows an engine by appending, skipping points that would leave it
/// nearly singular.
fn engine_from(args: &[(f64, f64)]) -> Engine {
    let mut engine = DetManip::new(PropagatorKernel::default(), 4);
    for &(x, y) in args {
        let n = engine.size();
        let det_old = engine.determinant();
        match engine.try_insert(n, n, x, y) {
            Ok(ratio) if (ratio * det_old).abs() > FLOOR => engine.complete_operation().unwrap(),
            Ok(_) => {
                engine.reject_last_try();
            }
            Err(DetManipError::DegenerateMatrix { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    engine
}

/// Turns raw draws into a valid proposal, or `None` when the move does not
/// apply at the current size.
fn propose(engine: &mut Engine, (op, idx, args): Edit) -> Option<Result<f64, DetManipError>> {
    let s = engine.size();
    match op {
        0 => Some(engine.try_insert(idx[0] % (s + 1), idx[1] % (s + 1), args[0], args[1])),
        1 if s >= 1 => Some(engine.try_remove(idx[0] % s, idx[1] % s)),
        2 => {
            let (i0, i1) = (idx[0] % (s + 2), idx[1] % (s + 2));
            let (j0, j1) = (idx[2] % (s + 2), idx[3] % (s + 2));
            if i0 == i1 || j0 == j1 {
                return None;
            }
            Some(engine.try_insert2(i0, i1, j0, j1, args[0], args[1], args[2], args[3]))
        }
        3 if s >= 2 => {
            let (i0, i1) = (idx[0] % s, idx[1] % s);
            let (j0, j1) = (idx[2] % s, idx[3] % s);
            if i0 == i1 || j0 == j1 {
                return None;
            }
            Some(engine.try_remove2(i0, i1, j0, j1))
        }
        4 if s >= 1 => Some(engine.try_change_row(idx[0] % s, args[0])),
        5 if s >= 1 => Some(engine.try_change_col(idx[1] % s, args[1])),
        6 if s >= 1 => Some(engine.try_change_row_col(idx[0] % s, idx[1] % s, args[0], args[1])),
        _ => None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn committed_ratios_match_determinant_changes(base in base_args(), sequence in edits(40)) {
        let mut engine = engine_from(&base);
        for edit in sequence {
            let det_old = engine.determinant();
            let ratio = match propose(&mut engine, edit) {
                None | Some(Err(DetManipError::DegenerateMatrix { .. })) => continue,
                Some(Err(e)) => panic!("unexpected error: {}", e),
                Some(Ok(ratio)) => ratio,
            };
            prop_assert!(engine.is_pending());
            if (ratio * det_old).abs() <= FLOOR {
                prop_assert!(engine.reject_last_try());
                continue;
            }
            engine.complete_operation().unwrap();

            let det_new = engine.determinant();
            prop_assert!((det_new - det_old * ratio).abs() <= TOL * det_new.abs().max(1.0));
            let report = engine.check_consistency();
            prop_assert!(report.is_within(TOL), "{:?}", report);
        }
    }

    #[test]
    fn rejected_proposals_leave_no_trace(base in base_args(), sequence in edits(12)) {
        let mut engine = engine_from(&base);
        let before = engine.fingerprint().unwrap();
        for edit in sequence {
            if let Some(Ok(_)) = propose(&mut engine, edit) {
                prop_assert!(engine.reject_last_try());
            }
            prop_assert!(!engine.is_pending());
            prop_assert_eq!(&engine.fingerprint().unwrap(), &before);
        }
    }

    #[test]
    fn insert_then_remove_is_identity(
        base in base_args(),
        i in 0usize..16,
        j in 0usize..16,
        x in 0.0f64..10.0,
        y in 0.0f64..10.0,
    ) {
        let mut engine = engine_from(&base);
        let n = engine.size();
        let (i, j) = (i % (n + 1), j % (n + 1));
        let inverse = engine.inverse_matrix();
        let rows: Vec<f64> = engine.row_args().copied().collect();
        let cols: Vec<f64> = engine.col_args().copied().collect();

        let det_old = engine.determinant();
        match engine.try_insert(i, j, x, y) {
            Ok(ratio) if (ratio * det_old).abs() > FLOOR => engine.complete_operation().unwrap(),
            Ok(_) => {
                engine.reject_last_try();
                return Ok(());
            }
            Err(_) => return Ok(()),
        }
        engine.remove(i, j).unwrap();

        prop_assert_eq!(engine.row_args().copied().collect::<Vec<_>>(), rows);
        prop_assert_eq!(engine.col_args().copied().collect::<Vec<_>>(), cols);
        prop_assert!((engine.inverse_matrix() - inverse).amax() < TOL);
    }

    #[test]
    fn out_of_range_indices_are_rejected(base in base_args(), extra in 1usize..10) {
        let mut engine = engine_from(&base);
        let n = engine.size();
        prop_assume!(n >= 2);
        let before = engine.fingerprint().unwrap();

        let is_invalid = |r: Result<f64, DetManipError>| matches!(r, Err(DetManipError::InvalidIndices { .. }));
        prop_assert!(is_invalid(engine.try_insert(n + extra, 0, 1.0, 1.0)));
        prop_assert!(is_invalid(engine.try_remove(0, n - 1 + extra)));
        prop_assert!(is_invalid(engine.try_change_row(n - 1 + extra, 1.0)));
        prop_assert!(is_invalid(engine.try_change_col(n - 1 + extra, 1.0)));
        prop_assert!(is_invalid(engine.try_remove2(0, n - 1 + extra, 0, 1)));
        let out_of_range = matches!(engine.inverse_entry(n, 0), Err(DetManipError::IndexOutOfRange { .. }));
        prop_assert!(out_of_range);

        prop_assert!(!engine.is_pending());
        prop_assert_eq!(engine.fingerprint().unwrap(), before);
    }
}
