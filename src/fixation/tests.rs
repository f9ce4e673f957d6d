use approx::assert_relative_eq;
use rand::Rng;
use rstest::*;

use crate::fixation::{
    CustomFixation, FixationModel, FixationProbability, FixationType, DEFAULT_POPULATION_SIZE,
};

#[cfg(test)]
fn random_capitalise(input: &str) -> String {
    let mut rng = rand::thread_rng();
    input
        .chars()
        .map(|c| {
            if c.is_alphabetic() && rng.gen_bool(0.5) {
                c.to_uppercase().collect::<String>()
            } else {
                c.to_string()
            }
        })
        .collect()
}

#[rstest]
#[case::neutral("neutral", FixationType::Neutral, &["neutra", "neutral1"])]
#[case::moran("moran", FixationType::Moran, &["moron", "m0ran"])]
#[case::mccandlish("mccandlish", FixationType::McCandlish, &["mccandless", "mc"])]
#[case::kimura("kimura", FixationType::McCandlish, &["kimora"])]
#[case::metropolis("metropolis", FixationType::Metropolis, &["metro", "metropolis-hastings"])]
#[case::sswm("sswm", FixationType::StrongSelection, &["ssw", "sswm2"])]
fn fixation_type_by_name(
    #[case] name: &str,
    #[case] fixation_type: FixationType,
    #[case] wrong_names: &[&str],
) {
    assert_eq!(FixationType::from(name), fixation_type);
    assert_eq!(
        FixationType::from(name.to_ascii_uppercase().as_str()),
        fixation_type
    );
    for _ in 0..10 {
        assert_eq!(
            FixationType::from(random_capitalise(name).as_str()),
            fixation_type
        );
    }
    for &name in wrong_names {
        assert_eq!(FixationType::from(name), FixationType::Undef);
    }
}

#[test]
fn fixation_model_default_population() {
    let model = FixationModel::new(FixationType::Moran, &[]).unwrap();
    assert_eq!(
        model,
        FixationModel::Moran {
            population_size: DEFAULT_POPULATION_SIZE
        }
    );
    let model = FixationModel::new(FixationType::McCandlish, &[50.0, 2.0]).unwrap();
    assert_eq!(
        model,
        FixationModel::McCandlish {
            population_size: 50.0
        }
    );
    let model = FixationModel::new(FixationType::StrongSelection, &[50.0]).unwrap();
    assert_eq!(model, FixationModel::StrongSelection);
    assert_eq!(model.fixation_type(), FixationType::StrongSelection);
}

#[rstest]
#[case::undefined(FixationType::Undef, &[])]
#[case::zero_population(FixationType::Moran, &[0.0])]
#[case::fractional_population(FixationType::Neutral, &[0.5])]
#[case::nan_population(FixationType::Metropolis, &[f64::NAN])]
#[case::inf_population(FixationType::McCandlish, &[f64::INFINITY])]
fn fixation_model_incorrect(#[case] fixation_type: FixationType, #[case] params: &[f64]) {
    assert!(FixationModel::new(fixation_type, params).is_err());
}

#[rstest]
#[case::small(10.0)]
#[case::large(1000.0)]
fn neutral_limits(#[case] population_size: f64) {
    let neutral = FixationModel::Neutral { population_size };
    let moran = FixationModel::Moran { population_size };
    let mccandlish = FixationModel::McCandlish { population_size };
    assert_relative_eq!(neutral.probability(1.0, 5.0), 1.0 / population_size);
    assert_relative_eq!(moran.probability(1.3, 1.3), 1.0 / population_size);
    assert_relative_eq!(mccandlish.probability(0.4, 0.4), 1.0 / population_size);
}

#[test]
fn moran_values() {
    let moran = FixationModel::Moran {
        population_size: 10.0,
    };
    let r: f64 = 1.1;
    let expected = (1.0 - 1.0 / r) / (1.0 - r.powf(-10.0));
    assert_relative_eq!(moran.probability(1.0, 1.1), expected, epsilon = 1e-12);
    assert!(moran.probability(1.1, 1.0) < moran.probability(1.0, 1.0));
    assert!(moran.probability(1.0, 1.1) > moran.probability(1.0, 1.0));
    assert!(moran.probability(0.0, 1.0).is_nan());
    assert!(moran.probability(1.0, -1.0).is_nan());
}

#[test]
fn moran_large_population_is_stable() {
    let moran = FixationModel::Moran {
        population_size: 1e6,
    };
    assert_eq!(moran.probability(2.0, 1.0), 0.0);
    assert_relative_eq!(moran.probability(1.0, 2.0), 0.5, epsilon = 1e-12);
}

#[test]
fn mccandlish_values() {
    let mccandlish = FixationModel::McCandlish {
        population_size: 100.0,
    };
    let s: f64 = 0.01;
    let expected = (1.0 - (-2.0 * s).exp()) / (1.0 - (-200.0 * s).exp());
    assert_relative_eq!(mccandlish.probability(1.0, 1.01), expected, epsilon = 1e-9);
    assert_eq!(mccandlish.probability(1000.0, 0.0), 0.0);
    assert_relative_eq!(mccandlish.probability(0.0, 1000.0), 1.0);
}

#[test]
fn metropolis_values() {
    let metropolis = FixationModel::Metropolis {
        population_size: 2.0,
    };
    assert_eq!(metropolis.probability(1.0, 1.0), 1.0);
    assert_eq!(metropolis.probability(1.0, 2.0), 1.0);
    assert_relative_eq!(metropolis.probability(2.0, 1.5), (-1.0_f64).exp());
}

#[test]
fn strong_selection_values() {
    let sswm = FixationModel::StrongSelection;
    assert_eq!(sswm.probability(1.0, 1.0), 0.0);
    assert_eq!(sswm.probability(2.0, 1.0), 0.0);
    assert_relative_eq!(sswm.probability(1.0, 1.5), 1.0 - (-0.5_f64).exp());
    assert!(sswm.probability(0.0, 1.0).is_nan());
}

#[rstest]
#[case::neutral(FixationModel::Neutral { population_size: 20.0 })]
#[case::moran(FixationModel::Moran { population_size: 20.0 })]
#[case::mccandlish(FixationModel::McCandlish { population_size: 20.0 })]
#[case::metropolis(FixationModel::Metropolis { population_size: 20.0 })]
#[case::sswm(FixationModel::StrongSelection)]
fn fixation_is_probability(#[case] model: FixationModel) {
    let fitness = [0.1, 0.5, 0.9, 1.0, 1.1, 2.0, 10.0];
    for &from in &fitness {
        for &to in &fitness {
            let p = model.probability(from, to);
            assert!((0.0..=1.0).contains(&p), "{} gave {} for {} -> {}", model, p, from, to);
        }
    }
}

#[test]
fn custom_fixation_boxed() {
    let custom: Box<dyn FixationProbability> = Box::new(CustomFixation::new("half", |_, _| 0.5));
    let cloned = custom.clone();
    assert_eq!(custom.probability(1.0, 2.0), 0.5);
    assert_eq!(cloned.probability(3.0, 0.0), 0.5);
    assert!(format!("{:?}", cloned).contains("half"));
}

#[test]
fn fixation_display() {
    assert_eq!(
        FixationModel::Moran {
            population_size: 10.0
        }
        .to_string(),
        "Moran [N = 10]"
    );
    assert_eq!(FixationModel::StrongSelection.to_string(), "SSWM");
}
