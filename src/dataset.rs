//! Array-dataset input and output.
//!
//! Regions, transition-probability matrices, dynamics, and barrier results
//! are exchanged as JSON array datasets carrying the conventional variable
//! names (`partitions`, `matrix_prob_lower`, ...). Probability matrices are
//! accepted either dense, shape `(N, N)` indexed `[to][from]` with separate
//! unsafe vectors, or sparse as per-column `(indices, values)` lists with an
//! explicit `N`-th unsafe slot. Barrier vectors additionally export as plain
//! text, one value per line.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use faer::{Col, Mat};
use serde::{Deserialize, Serialize};

use crate::barrier::BarrierCertificate;
use crate::geometry::Hyperrectangle;
use crate::system::{AffineMap, LinearGaussian, PwaPiece, System, UncertainPwaGaussian};
use crate::transition::{RegionWithProbabilities, TransitionColumn};
use crate::{E, Error, I};

/// `partitions`, shape `(N, 2, m)`: each region's per-coordinate
/// `(low, high)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub partitions: Vec<[Vec<E>; 2]>,
}

impl PartitionRecord {
    pub fn from_regions(regions: &[Hyperrectangle]) -> Self {
        let partitions = regions
            .iter()
            .map(|r| {
                let m = r.dim();
                [
                    (0..m).map(|d| r.low()[d]).collect(),
                    (0..m).map(|d| r.high()[d]).collect(),
                ]
            })
            .collect();
        Self { partitions }
    }

    pub fn into_regions(self) -> Result<Vec<Hyperrectangle>, Error> {
        if self.partitions.is_empty() {
            return Err(Error::Dataset("partition dataset is empty".into()));
        }
        self.partitions
            .into_iter()
            .enumerate()
            .map(|(j, [low, high])| {
                if low.len() != high.len() {
                    return Err(Error::Dataset(format!(
                        "partition {j} has mismatched bound lengths"
                    )));
                }
                Hyperrectangle::from_bounds(&low, &high)
            })
            .collect()
    }
}

/// Dense probability bounds, `matrix_prob_*` shape `(N, N)` indexed
/// `[to][from]` and `matrix_prob_unsafe_*` shape `(N,)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseProbabilityRecord {
    pub matrix_prob_lower: Vec<Vec<E>>,
    pub matrix_prob_upper: Vec<Vec<E>>,
    pub matrix_prob_unsafe_lower: Vec<E>,
    pub matrix_prob_unsafe_upper: Vec<E>,
}

/// Sparse probability bounds: per source column, the target indices (with
/// `n_regions` as the unsafe slot) and the paired bound values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseProbabilityRecord {
    pub n_regions: usize,
    pub indices: Vec<Vec<I>>,
    pub lower: Vec<Vec<E>>,
    pub upper: Vec<Vec<E>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProbabilityRecord {
    Dense(DenseProbabilityRecord),
    Sparse(SparseProbabilityRecord),
}

impl ProbabilityRecord {
    pub fn from_regions(regions: &[RegionWithProbabilities]) -> Self {
        let n = regions.len();
        let mut record = DenseProbabilityRecord {
            matrix_prob_lower: vec![vec![0.0; n]; n],
            matrix_prob_upper: vec![vec![0.0; n]; n],
            matrix_prob_unsafe_lower: vec![0.0; n],
            matrix_prob_unsafe_upper: vec![0.0; n],
        };
        for (j, region) in regions.iter().enumerate() {
            let column = region.transitions();
            for (k, &i) in column.indices().iter().enumerate() {
                record.matrix_prob_lower[i][j] = column.lower_values()[k];
                record.matrix_prob_upper[i][j] = column.upper_values()[k];
            }
            let (unsafe_lower, unsafe_upper) = column.unsafe_bounds();
            record.matrix_prob_unsafe_lower[j] = unsafe_lower;
            record.matrix_prob_unsafe_upper[j] = unsafe_upper;
        }
        ProbabilityRecord::Dense(record)
    }

    /// Reassembles the per-region probability columns over `regions`.
    pub fn into_columns(self, regions: &[Hyperrectangle]) -> Result<Vec<RegionWithProbabilities>, Error> {
        let n = regions.len();
        let columns = match self {
            ProbabilityRecord::Dense(record) => {
                if record.matrix_prob_lower.len() != n
                    || record.matrix_prob_upper.len() != n
                    || record.matrix_prob_unsafe_lower.len() != n
                    || record.matrix_prob_unsafe_upper.len() != n
                    || record.matrix_prob_lower.iter().any(|row| row.len() != n)
                    || record.matrix_prob_upper.iter().any(|row| row.len() != n)
                {
                    return Err(Error::Dataset(format!(
                        "probability matrices do not have shape ({n}, {n})"
                    )));
                }
                (0..n)
                    .map(|j| {
                        let mut idx = Vec::new();
                        let mut lower = Vec::new();
                        let mut upper = Vec::new();
                        for i in 0..n {
                            let up = record.matrix_prob_upper[i][j];
                            if up > 0.0 {
                                idx.push(i);
                                lower.push(record.matrix_prob_lower[i][j]);
                                upper.push(up);
                            }
                        }
                        TransitionColumn::new(
                            n,
                            idx,
                            lower,
                            upper,
                            record.matrix_prob_unsafe_lower[j],
                            record.matrix_prob_unsafe_upper[j],
                        )
                    })
                    .collect::<Result<Vec<_>, Error>>()?
            }
            ProbabilityRecord::Sparse(record) => {
                if record.n_regions != n {
                    return Err(Error::Dataset(format!(
                        "sparse dataset covers {} regions, expected {n}",
                        record.n_regions
                    )));
                }
                if record.indices.len() != n
                    || record.lower.len() != n
                    || record.upper.len() != n
                {
                    return Err(Error::Dataset(
                        "sparse dataset does not have one column per region".into(),
                    ));
                }
                (0..n)
                    .map(|j| {
                        let mut idx = Vec::new();
                        let mut lower = Vec::new();
                        let mut upper = Vec::new();
                        let mut unsafe_bounds = (0.0, 0.0);
                        for (pos, &i) in record.indices[j].iter().enumerate() {
                            let lo = *record.lower[j].get(pos).ok_or_else(|| {
                                Error::Dataset(format!("column {j} is shorter than its indices"))
                            })?;
                            let up = *record.upper[j].get(pos).ok_or_else(|| {
                                Error::Dataset(format!("column {j} is shorter than its indices"))
                            })?;
                            if i == n {
                                unsafe_bounds = (lo, up);
                            } else {
                                idx.push(i);
                                lower.push(lo);
                                upper.push(up);
                            }
                        }
                        TransitionColumn::new(n, idx, lower, upper, unsafe_bounds.0, unsafe_bounds.1)
                    })
                    .collect::<Result<Vec<_>, Error>>()?
            }
        };
        Ok(regions
            .iter()
            .zip(columns)
            .map(|(region, column)| RegionWithProbabilities::new(region.clone(), column))
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffineMapRecord {
    pub a: Vec<Vec<E>>,
    pub b: Vec<E>,
}

impl AffineMapRecord {
    fn into_map(self, dim: usize) -> Result<AffineMap, Error> {
        if self.a.len() != dim || self.a.iter().any(|row| row.len() != dim) {
            return Err(Error::Dataset(format!(
                "dynamics matrix does not have shape ({dim}, {dim})"
            )));
        }
        if self.b.len() != dim {
            return Err(Error::Dataset(format!(
                "dynamics offset does not have length {dim}"
            )));
        }
        AffineMap::new(
            Mat::from_fn(dim, dim, |i, j| self.a[i][j]),
            Col::from_fn(dim, |i| self.b[i]),
        )
    }
}

/// A single linear Gaussian system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSystemRecord {
    pub a: Vec<Vec<E>>,
    pub b: Vec<E>,
    pub sigma: Vec<E>,
    pub safe_set: [Vec<E>; 2],
}

/// An uncertain piecewise-affine Gaussian system: per region, the vertex
/// list of its uncertain affine dynamics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwaSystemRecord {
    pub sigma: Vec<E>,
    pub safe_set: [Vec<E>; 2],
    pub pieces: Vec<PwaPieceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwaPieceRecord {
    pub region: [Vec<E>; 2],
    pub maps: Vec<AffineMapRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemRecord {
    Pwa(PwaSystemRecord),
    Linear(LinearSystemRecord),
}

impl SystemRecord {
    pub fn into_system(self) -> Result<System, Error> {
        match self {
            SystemRecord::Linear(record) => {
                let dim = record.sigma.len();
                let map = AffineMapRecord {
                    a: record.a,
                    b: record.b,
                }
                .into_map(dim)?;
                let safe_set = Hyperrectangle::from_bounds(&record.safe_set[0], &record.safe_set[1])?;
                Ok(LinearGaussian::new(
                    map.matrix().clone(),
                    map.offset().clone(),
                    Col::from_fn(dim, |i| record.sigma[i]),
                    safe_set,
                )?
                .into())
            }
            SystemRecord::Pwa(record) => {
                let dim = record.sigma.len();
                let safe_set = Hyperrectangle::from_bounds(&record.safe_set[0], &record.safe_set[1])?;
                let pieces = record
                    .pieces
                    .into_iter()
                    .map(|piece| {
                        let region =
                            Hyperrectangle::from_bounds(&piece.region[0], &piece.region[1])?;
                        let maps = piece
                            .maps
                            .into_iter()
                            .map(|m| m.into_map(dim))
                            .collect::<Result<Vec<_>, Error>>()?;
                        PwaPiece::new(region, maps)
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                Ok(UncertainPwaGaussian::new(
                    pieces,
                    Col::from_fn(dim, |i| record.sigma[i]),
                    safe_set,
                )?
                .into())
            }
        }
    }
}

/// Barrier synthesis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierRecord {
    pub b: Vec<E>,
    pub eta: E,
    pub beta: E,
    pub beta_per_region: Vec<E>,
}

impl BarrierRecord {
    pub fn from_certificate(certificate: &BarrierCertificate) -> Self {
        let n = certificate.b().nrows();
        Self {
            b: (0..n).map(|j| certificate.b()[j]).collect(),
            eta: certificate.eta(),
            beta: certificate.beta(),
            beta_per_region: (0..n).map(|j| certificate.beta_per_region()[j]).collect(),
        }
    }
}

pub fn load_regions(path: impl AsRef<Path>) -> Result<Vec<Hyperrectangle>, Error> {
    let reader = BufReader::new(File::open(path)?);
    let record: PartitionRecord = serde_json::from_reader(reader)?;
    record.into_regions()
}

pub fn save_regions(path: impl AsRef<Path>, regions: &[Hyperrectangle]) -> Result<(), Error> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &PartitionRecord::from_regions(regions))?;
    Ok(())
}

pub fn load_probabilities(
    path: impl AsRef<Path>,
    regions: &[Hyperrectangle],
) -> Result<Vec<RegionWithProbabilities>, Error> {
    let reader = BufReader::new(File::open(path)?);
    let record: ProbabilityRecord = serde_json::from_reader(reader)?;
    record.into_columns(regions)
}

pub fn save_probabilities(
    path: impl AsRef<Path>,
    regions: &[RegionWithProbabilities],
) -> Result<(), Error> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &ProbabilityRecord::from_regions(regions))?;
    Ok(())
}

pub fn load_system(path: impl AsRef<Path>) -> Result<System, Error> {
    let reader = BufReader::new(File::open(path)?);
    let record: SystemRecord = serde_json::from_reader(reader)?;
    record.into_system()
}

pub fn save_barrier(
    path: impl AsRef<Path>,
    certificate: &BarrierCertificate,
) -> Result<(), Error> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &BarrierRecord::from_certificate(certificate))?;
    Ok(())
}

/// Writes the barrier vector as plain text, one value per line.
pub fn save_barrier_text(
    path: impl AsRef<Path>,
    certificate: &BarrierCertificate,
) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    for j in 0..certificate.b().nrows() {
        writeln!(writer, "{}", certificate.b()[j])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(low: E, high: E) -> Hyperrectangle {
        Hyperrectangle::from_bounds(&[low], &[high]).unwrap()
    }

    #[test]
    fn partitions_round_trip() {
        let regions = vec![segment(-1.0, 0.0), segment(0.0, 1.0)];
        let record = PartitionRecord::from_regions(&regions);
        let text = serde_json::to_string(&record).unwrap();
        let parsed: PartitionRecord = serde_json::from_str(&text).unwrap();
        let restored = parsed.into_regions().unwrap();
        assert_eq!(restored, regions);
    }

    #[test]
    fn dense_probabilities_round_trip() {
        let regions = vec![segment(-1.0, 0.0), segment(0.0, 1.0)];
        let columns = vec![
            RegionWithProbabilities::new(
                regions[0].clone(),
                TransitionColumn::new(2, vec![0, 1], vec![0.5, 0.1], vec![0.7, 0.3], 0.0, 0.2)
                    .unwrap(),
            ),
            RegionWithProbabilities::new(
                regions[1].clone(),
                TransitionColumn::new(2, vec![1], vec![0.8], vec![0.9], 0.05, 0.2).unwrap(),
            ),
        ];
        let record = ProbabilityRecord::from_regions(&columns);
        let text = serde_json::to_string(&record).unwrap();
        let parsed: ProbabilityRecord = serde_json::from_str(&text).unwrap();
        let restored = parsed.into_columns(&regions).unwrap();
        for (a, b) in columns.iter().zip(restored.iter()) {
            assert_eq!(a.transitions(), b.transitions());
        }
    }

    #[test]
    fn sparse_probabilities_use_the_tail_slot() {
        let regions = vec![segment(-1.0, 0.0), segment(0.0, 1.0)];
        let record = ProbabilityRecord::Sparse(SparseProbabilityRecord {
            n_regions: 2,
            indices: vec![vec![0, 2], vec![1, 2]],
            lower: vec![vec![0.6, 0.1], vec![0.7, 0.0]],
            upper: vec![vec![0.9, 0.3], vec![1.0, 0.2]],
        });
        let restored = record.into_columns(&regions).unwrap();
        assert_eq!(restored[0].transitions().unsafe_bounds(), (0.1, 0.3));
        assert_eq!(restored[1].transitions().upper_of(1), 1.0);
    }

    #[test]
    fn linear_system_record_parses() {
        let text = r#"{
            "a": [[0.95]],
            "b": [0.0],
            "sigma": [0.1],
            "safe_set": [[-1.0], [1.0]]
        }"#;
        let record: SystemRecord = serde_json::from_str(text).unwrap();
        let system = record.into_system().unwrap();
        use crate::system::StochasticSystem;
        assert_eq!(system.dimensionality(), 1);
    }

    #[test]
    fn malformed_probability_shape_is_rejected() {
        let regions = vec![segment(-1.0, 0.0), segment(0.0, 1.0)];
        let record = ProbabilityRecord::Dense(DenseProbabilityRecord {
            matrix_prob_lower: vec![vec![0.0; 2]; 3],
            matrix_prob_upper: vec![vec![0.0; 2]; 3],
            matrix_prob_unsafe_lower: vec![0.0; 2],
            matrix_prob_unsafe_upper: vec![0.0; 2],
        });
        assert!(record.into_columns(&regions).is_err());
    }

    #[test]
    fn barrier_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let certificate = BarrierCertificate::new(
            Col::from_fn(2, |j| [0.25, 1.0][j]),
            0.25,
            0.01,
            Col::from_fn(2, |_| 0.01),
        );
        let json_path = dir.path().join("barrier.json");
        let text_path = dir.path().join("barrier.txt");
        save_barrier(&json_path, &certificate).unwrap();
        save_barrier_text(&text_path, &certificate).unwrap();

        let text = std::fs::read_to_string(&text_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "0.25");

        let parsed: BarrierRecord =
            serde_json::from_reader(BufReader::new(File::open(&json_path).unwrap())).unwrap();
        assert_eq!(parsed.b.len(), 2);
        assert_eq!(parsed.eta, 0.25);
    }
}
