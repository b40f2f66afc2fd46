// tests/discretizer_tests.rs
//
// Bounds and boundary behaviour of the joint action index.

use ditto::config::DiscretizationConfig;
use ditto::rl::discretize::ActionDiscretizer;

fn default_discretizer() -> ActionDiscretizer {
    ActionDiscretizer::new(&DiscretizationConfig::default())
}

#[test]
fn index_never_exceeds_max_index() {
    let d = default_discretizer();
    assert_eq!(d.max_index(), 12 * 14 + 14);
    let mut acc = -20.0_f32;
    while acc <= 20.0 {
        let mut steer = -2.0_f32;
        while steer <= 2.0 {
            let a = d.discretize(acc, steer);
            assert!(a.index <= d.max_index(), "acc={acc} steer={steer}");
            assert_eq!(a.index, a.acc_index * 14 + a.steer_index);
            steer += 0.05;
        }
        acc += 0.25;
    }
}

#[test]
fn out_of_range_inputs_clamp() {
    let d = default_discretizer();
    assert_eq!(d.discretize(-100.0, -100.0).index, 0);
    let top = d.discretize(100.0, 100.0);
    assert_eq!(top.acc_index, 12);
    assert_eq!(top.steer_index, 14);
    assert_eq!(top.index, d.max_index());
}

#[test]
fn nan_maps_to_lower_bound() {
    let d = default_discretizer();
    let a = d.discretize(f32::NAN, f32::NAN);
    assert_eq!((a.acc_index, a.steer_index, a.index), (0, 0, 0));
}

#[test]
fn deterministic_for_same_input() {
    let d = default_discretizer();
    for &(acc, steer) in &[(1.3_f32, 0.12_f32), (-2.7, -0.33), (0.0, 0.0)] {
        assert_eq!(d.discretize(acc, steer), d.discretize(acc, steer));
    }
}

#[test]
fn custom_ranges_respected() {
    let d = ActionDiscretizer::new(&DiscretizationConfig {
        acc_range: (-2.0, 2.0),
        acc_buckets: 4,
        steering_range: (-1.0, 1.0),
        steering_buckets: 4,
    });
    assert_eq!(d.max_index(), 4 * 4 + 4);
    assert_eq!(d.acc_index(0.0), 2);
    assert_eq!(d.steer_index(-1.0), 0);
    assert_eq!(d.steer_index(0.0), 2);
    assert_eq!(d.steer_index(5.0), 4);
}

#[test]
fn steering_tenths_golden_table() {
    let d = default_discretizer();
    // steer_index for k / 10, k in -10..=10, under the default (-0.7, 0.7) / 14 binning.
    let expected: [usize; 21] = [
        0, 0, 0, 0, 0, 1, 2, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 14, 14, 14,
    ];
    for (i, k) in (-10..=10).enumerate() {
        let steer = k as f32 / 10.0;
        assert_eq!(d.steer_index(steer), expected[i], "steer={steer}");
    }
}

#[test]
fn zero_action_joint_index() {
    let d = default_discretizer();
    let a = d.discretize(0.0, 0.0);
    assert_eq!((a.acc_index, a.steer_index, a.index), (6, 7, 91));
}
