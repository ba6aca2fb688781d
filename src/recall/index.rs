use super::RecallError;

/// Brute-force squared-L2 index. Rebuilt from scratch for every lookup.
#[derive(Debug)]
pub struct FlatL2Index {
    dimension: usize,
    vectors: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    /// Appends one vector; its offset is the current `len()`.
    pub fn add(&mut self, vector: &[f32]) -> Result<(), RecallError> {
        self.check_dimension(vector)?;
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    /// Returns up to `k` `(offset, squared distance)` pairs, nearest first.
    /// Equal distances keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, RecallError> {
        self.check_dimension(query)?;
        if self.dimension == 0 {
            return Ok(Vec::new());
        }

        let mut scored = self
            .vectors
            .chunks_exact(self.dimension)
            .map(|stored| squared_l2(query, stored))
            .enumerate()
            .collect::<Vec<_>>();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), RecallError> {
        if vector.len() != self.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
