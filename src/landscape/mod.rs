use std::fmt::Display;

use anyhow::bail;
use hashbrown::HashMap;
use itertools::Itertools;
use log::{info, warn};

use crate::errors::MsmError;
use crate::Result;

/// Read-only adjacency view of a genotype-phenotype landscape.
///
/// Genotypes are addressed by their index in `0..len()`, `neighbours(i)` lists the genotypes
/// reachable from `i` with a single mutational step.
pub trait Landscape {
    fn len(&self) -> usize;
    fn fitness(&self, idx: usize) -> f64;
    fn neighbours(&self, idx: usize) -> &[usize];

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Genotype {
    sequence: Vec<u8>,
    fitness: f64,
}

impl Genotype {
    pub fn new(sequence: &[u8], fitness: f64) -> Self {
        Self {
            sequence: sequence.to_vec(),
            fitness,
        }
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn fitness(&self) -> f64 {
        self.fitness
    }
}

impl Display for Genotype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.sequence))
    }
}

/// Bijective mapping between genotype sequences and matrix indices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenotypeIndex {
    sequences: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, usize>,
}

impl GenotypeIndex {
    pub fn new(genotypes: &[Genotype]) -> Result<Self> {
        let mut index = HashMap::with_capacity(genotypes.len());
        for (i, genotype) in genotypes.iter().enumerate() {
            if let Some(prev) = index.insert(genotype.sequence.clone(), i) {
                bail!(MsmError::InvalidLandscape {
                    message: format!("genotype {} appears at indices {} and {}", genotype, prev, i)
                });
            }
        }
        Ok(Self {
            sequences: genotypes.iter().map(|g| g.sequence.clone()).collect(),
            index,
        })
    }

    pub fn get(&self, sequence: &[u8]) -> Option<usize> {
        self.index.get(sequence).copied()
    }

    pub fn sequence(&self, idx: usize) -> Option<&[u8]> {
        self.sequences.get(idx).map(|s| s.as_slice())
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandscapeGraph {
    genotypes: Vec<Genotype>,
    neighbours: Vec<Vec<usize>>,
    index: GenotypeIndex,
}

impl LandscapeGraph {
    /// Creates a landscape from genotypes and directed single-mutation edges `(from, to)`.
    /// Neighbour lists are kept sorted, repeated edges are merged.
    ///
    /// Bails if there are no genotypes, if a fitness value is not finite, if two genotypes share
    /// a sequence, or if an edge is a self-loop or points outside of the genotype list.
    ///
    /// # Example
    /// ```
    /// use gpmsm::landscape::{Genotype, Landscape, LandscapeGraph};
    /// let landscape = LandscapeGraph::new(
    ///     vec![Genotype::new(b"00", 1.0), Genotype::new(b"01", 1.1), Genotype::new(b"11", 1.3)],
    ///     &[(0, 1), (1, 2), (1, 0)],
    /// )
    /// .unwrap();
    /// assert_eq!(landscape.len(), 3);
    /// assert_eq!(landscape.neighbours(1), &[0, 2]);
    /// ```
    pub fn new(genotypes: Vec<Genotype>, edges: &[(usize, usize)]) -> Result<Self> {
        if genotypes.is_empty() {
            bail!(MsmError::InvalidLandscape {
                message: String::from("no genotypes provided")
            });
        }
        if let Some(genotype) = genotypes.iter().find(|g| !g.fitness.is_finite()) {
            bail!(MsmError::InvalidLandscape {
                message: format!("genotype {} has fitness {}", genotype, genotype.fitness)
            });
        }
        let index = GenotypeIndex::new(&genotypes)?;

        let n = genotypes.len();
        let mut neighbours = vec![Vec::new(); n];
        for &(from, to) in edges {
            if from >= n || to >= n {
                bail!(MsmError::InvalidLandscape {
                    message: format!("edge ({}, {}) is out of range for {} genotypes", from, to, n)
                });
            }
            if from == to {
                bail!(MsmError::InvalidLandscape {
                    message: format!("self-loop on genotype {}", from)
                });
            }
            neighbours[from].push(to);
        }
        let mut merged = 0;
        for list in neighbours.iter_mut() {
            let before = list.len();
            list.sort_unstable();
            list.dedup();
            merged += before - list.len();
        }
        if merged > 0 {
            warn!("Merged {} repeated edge(s) in the landscape.", merged);
        }
        info!(
            "Landscape with {} genotypes and {} edges.",
            n,
            neighbours.iter().map(Vec::len).sum::<usize>()
        );
        Ok(Self {
            genotypes,
            neighbours,
            index,
        })
    }

    /// Builds the binary hypercube landscape over `log2(fitness.len())` sites.
    /// Genotype `i` is the binary representation of `i` (most significant site first) and is
    /// connected in both directions to every genotype that differs at exactly one site.
    ///
    /// # Example
    /// ```
    /// use gpmsm::landscape::{Landscape, LandscapeGraph};
    /// let landscape = LandscapeGraph::hypercube(&[1.0, 1.1, 1.2, 1.5]).unwrap();
    /// assert_eq!(landscape.genotype(2).to_string(), "10");
    /// assert_eq!(landscape.neighbours(0), &[1, 2]);
    /// ```
    pub fn hypercube(fitness: &[f64]) -> Result<Self> {
        if fitness.is_empty() || !fitness.len().is_power_of_two() {
            bail!(MsmError::InvalidLandscape {
                message: format!(
                    "a binary hypercube needs a power of two fitness values, got {}",
                    fitness.len()
                )
            });
        }
        let sites = fitness.len().trailing_zeros() as usize;
        let genotypes = fitness
            .iter()
            .enumerate()
            .map(|(i, &f)| {
                let sequence = (0..sites)
                    .rev()
                    .map(|site| if (i >> site) & 1 == 1 { b'1' } else { b'0' })
                    .collect::<Vec<u8>>();
                Genotype::new(&sequence, f)
            })
            .collect();
        let edges = (0..fitness.len())
            .flat_map(|i| (0..sites).map(move |site| (i, i ^ (1 << site))))
            .collect::<Vec<_>>();
        Self::new(genotypes, &edges)
    }

    pub fn genotypes(&self) -> &[Genotype] {
        &self.genotypes
    }

    pub fn genotype(&self, idx: usize) -> &Genotype {
        &self.genotypes[idx]
    }

    pub fn index(&self) -> &GenotypeIndex {
        &self.index
    }

    pub fn index_of(&self, sequence: &[u8]) -> Option<usize> {
        self.index.get(sequence)
    }

    pub fn edges(&self) -> Vec<(usize, usize)> {
        self.neighbours
            .iter()
            .enumerate()
            .flat_map(|(from, list)| list.iter().map(move |&to| (from, to)))
            .collect()
    }
}

impl Landscape for LandscapeGraph {
    fn len(&self) -> usize {
        self.genotypes.len()
    }

    fn fitness(&self, idx: usize) -> f64 {
        self.genotypes[idx].fitness
    }

    fn neighbours(&self, idx: usize) -> &[usize] {
        &self.neighbours[idx]
    }
}

impl Display for LandscapeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (genotype, list) in self.genotypes.iter().zip(&self.neighbours) {
            writeln!(
                f,
                "{} ({}) -> [{}]",
                genotype,
                genotype.fitness,
                list.iter().map(|&j| &self.genotypes[j]).join(", ")
            )?;
        }
        Ok(())
    }
}
