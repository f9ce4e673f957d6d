use approx::assert_relative_eq;
use assert_matches::assert_matches;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::*;

use crate::errors::MsmError;
use crate::fixation::{CustomFixation, FixationModel, FixationProbability};
use crate::landscape::{Genotype, Landscape, LandscapeGraph};
use crate::transition_model::{
    NeighbourWeighting, RowOverflow, TransitionMatrix, TransitionModelBuilder, DEFAULT_EPSILON,
};

#[cfg(test)]
fn downcast_error(result: &Result<TransitionMatrix, anyhow::Error>) -> &MsmError {
    (result.as_ref().unwrap_err())
        .downcast_ref::<MsmError>()
        .unwrap()
}

fn random_hypercube(sites: u32, seed: u64) -> LandscapeGraph {
    let mut rng = StdRng::seed_from_u64(seed);
    let fitness = (0..2_usize.pow(sites))
        .map(|_| rng.gen_range(0.5..1.5))
        .collect::<Vec<f64>>();
    LandscapeGraph::hypercube(&fitness).unwrap()
}

fn linear_landscape() -> LandscapeGraph {
    LandscapeGraph::new(
        vec![
            Genotype::new(b"0", 1.0),
            Genotype::new(b"1", 1.5),
            Genotype::new(b"2", 2.0),
        ],
        &[(0, 1), (1, 2)],
    )
    .unwrap()
}

#[rstest]
#[case::neutral(FixationModel::Neutral { population_size: 10.0 })]
#[case::moran(FixationModel::Moran { population_size: 10.0 })]
#[case::mccandlish(FixationModel::McCandlish { population_size: 10.0 })]
#[case::metropolis(FixationModel::Metropolis { population_size: 10.0 })]
#[case::sswm(FixationModel::StrongSelection)]
fn rows_are_stochastic(#[case] fixation: FixationModel) {
    let landscape = random_hypercube(4, 7);
    for weighting in [
        NeighbourWeighting::Uniform,
        NeighbourWeighting::MutationRate(0.05),
    ] {
        let t = TransitionModelBuilder::new(fixation)
            .weighting(weighting)
            .build(&landscape)
            .unwrap();
        assert_eq!(t.nrows(), landscape.len());
        assert_eq!(t.ncols(), landscape.len());
        for row in t.row_iter() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = DEFAULT_EPSILON);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }
}

#[test]
fn uniform_weighting_values() {
    let landscape = LandscapeGraph::hypercube(&[1.0, 1.2, 0.9, 1.5]).unwrap();
    let fixation = FixationModel::Moran {
        population_size: 10.0,
    };
    let t = TransitionModelBuilder::new(fixation)
        .build(&landscape)
        .unwrap();
    assert_relative_eq!(t[(0, 1)], fixation.probability(1.0, 1.2) / 2.0);
    assert_relative_eq!(t[(0, 2)], fixation.probability(1.0, 0.9) / 2.0);
    assert_eq!(t[(0, 3)], 0.0);
    assert_relative_eq!(t[(0, 0)], 1.0 - t[(0, 1)] - t[(0, 2)]);
    assert_relative_eq!(t[(3, 1)], fixation.probability(1.5, 1.2) / 2.0);
}

#[test]
fn mutation_rate_weighting_values() {
    let landscape = LandscapeGraph::hypercube(&[1.0, 1.2, 0.9, 1.5]).unwrap();
    let fixation = FixationModel::McCandlish {
        population_size: 10.0,
    };
    let t = TransitionModelBuilder::new(fixation)
        .weighting(NeighbourWeighting::MutationRate(0.01))
        .build(&landscape)
        .unwrap();
    assert_relative_eq!(t[(2, 3)], 0.01 * fixation.probability(0.9, 1.5));
    assert_relative_eq!(t[(2, 0)], 0.01 * fixation.probability(0.9, 1.0));
    assert_relative_eq!(t[(2, 2)], 1.0 - t[(2, 0)] - t[(2, 3)]);
}

#[test]
fn linear_landscape_uniform() {
    let t = TransitionModelBuilder::new(CustomFixation::new("uniform", |_, _| 1.0))
        .build(&linear_landscape())
        .unwrap();
    assert_eq!(
        t,
        TransitionMatrix::from_row_slice(3, 3, &[0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0])
    );
}

#[test]
fn single_genotype_is_absorbing() {
    let landscape = LandscapeGraph::hypercube(&[3.0]).unwrap();
    let t = TransitionModelBuilder::new(FixationModel::StrongSelection)
        .build(&landscape)
        .unwrap();
    assert_eq!(t, TransitionMatrix::from_row_slice(1, 1, &[1.0]));
}

#[test]
fn peak_without_neighbours_is_absorbing() {
    let t = TransitionModelBuilder::new(FixationModel::Neutral {
        population_size: 4.0,
    })
    .build(&linear_landscape())
    .unwrap();
    assert_eq!(t[(2, 2)], 1.0);
    assert_eq!(t[(0, 1)], 0.25);
    assert_eq!(t[(0, 0)], 0.75);
}

#[test]
fn overflowing_rows_fail() {
    let landscape = LandscapeGraph::hypercube(&[1.0; 8]).unwrap();
    let result = TransitionModelBuilder::new(CustomFixation::new("certain", |_, _| 1.0))
        .weighting(NeighbourWeighting::MutationRate(0.5))
        .build(&landscape);
    assert_matches!(
        downcast_error(&result),
        MsmError::InvalidRate { row: 0, outgoing } if (*outgoing - 1.5).abs() < 1e-12
    );
}

#[test]
fn overflowing_rows_renormalise() {
    let landscape = LandscapeGraph::hypercube(&[1.0; 8]).unwrap();
    let t = TransitionModelBuilder::new(CustomFixation::new("certain", |_, _| 1.0))
        .weighting(NeighbourWeighting::MutationRate(0.5))
        .row_overflow(RowOverflow::Renormalise)
        .build(&landscape)
        .unwrap();
    for (i, row) in t.row_iter().enumerate() {
        assert_relative_eq!(row.sum(), 1.0);
        assert_eq!(row[i], 0.0);
        for &j in landscape.neighbours(i) {
            assert_relative_eq!(row[j], 1.0 / 3.0);
        }
    }
}

#[test]
fn overflow_within_tolerance_is_accepted() {
    let landscape = LandscapeGraph::hypercube(&[1.0; 4]).unwrap();
    let t = TransitionModelBuilder::new(CustomFixation::new("certain", |_, _| 1.0))
        .weighting(NeighbourWeighting::MutationRate(0.5 + 1e-10))
        .build(&landscape)
        .unwrap();
    assert_eq!(t[(0, 0)], 0.0);
}

#[rstest]
#[case::negative(-0.1)]
#[case::above_one(1.2)]
#[case::nan(f64::NAN)]
fn invalid_fixation_probability(#[case] value: f64) {
    let result = TransitionModelBuilder::new(CustomFixation::new("broken", move |_, _| value))
        .build(&linear_landscape());
    assert_matches!(
        downcast_error(&result),
        MsmError::InvalidFixation { from: 0, to: 1, .. }
    );
}

#[test]
fn non_positive_fitness_with_moran() {
    let landscape = LandscapeGraph::hypercube(&[1.0, 0.0]).unwrap();
    let result = TransitionModelBuilder::new(FixationModel::Moran {
        population_size: 10.0,
    })
    .build(&landscape);
    assert_matches!(downcast_error(&result), MsmError::InvalidFixation { .. });
}

#[rstest]
#[case::negative(-0.01)]
#[case::nan(f64::NAN)]
fn invalid_mutation_rate(#[case] rate: f64) {
    let result = TransitionModelBuilder::new(FixationModel::StrongSelection)
        .weighting(NeighbourWeighting::MutationRate(rate))
        .build(&linear_landscape());
    assert!(result.is_err());
}

#[test]
fn builder_from_boxed_rule() {
    let rule: Box<dyn FixationProbability> = Box::new(FixationModel::Neutral {
        population_size: 2.0,
    });
    let builder = TransitionModelBuilder::from_boxed(rule);
    let t1 = builder.clone().build(&linear_landscape()).unwrap();
    let t2 = builder.build(&linear_landscape()).unwrap();
    assert_eq!(t1, t2);
    assert_eq!(t1[(1, 2)], 0.5);
}

struct ListedLandscape {
    fitness: Vec<f64>,
    neighbours: Vec<Vec<usize>>,
}

impl Landscape for ListedLandscape {
    fn len(&self) -> usize {
        self.fitness.len()
    }

    fn fitness(&self, idx: usize) -> f64 {
        self.fitness[idx]
    }

    fn neighbours(&self, idx: usize) -> &[usize] {
        &self.neighbours[idx]
    }
}

#[rstest]
#[case::out_of_range(vec![vec![1], vec![2]])]
#[case::self_loop(vec![vec![0, 1], vec![0]])]
fn invalid_neighbours(#[case] neighbours: Vec<Vec<usize>>) {
    let landscape = ListedLandscape {
        fitness: vec![1.0, 1.2],
        neighbours,
    };
    let result = TransitionModelBuilder::new(FixationModel::Moran {
        population_size: 10.0,
    })
    .build(&landscape);
    assert_matches!(downcast_error(&result), MsmError::InvalidLandscape { .. });
}

#[test]
fn custom_landscape() {
    let landscape = ListedLandscape {
        fitness: vec![1.0, 1.0],
        neighbours: vec![vec![1], vec![0]],
    };
    let t = TransitionModelBuilder::new(FixationModel::Neutral {
        population_size: 4.0,
    })
    .build(&landscape)
    .unwrap();
    assert_relative_eq!(t[(0, 1)], 0.25);
    assert_relative_eq!(t[(0, 0)], 0.75);
}
