use crate::{Error, Result};

// -----------------------------------------------------------------------------
// Place
// -----------------------------------------------------------------------------
/// Placement which all the operators recorded on a tape execute under.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum Place {
    #[default]
    Cpu,
}

// -----------------------------------------------------------------------------
// Tensor
// -----------------------------------------------------------------------------
/// Dense row-major tensor.
///
/// [`Tensor::default`] is the uninitialized tensor which has neither shape nor data.
/// Every initialized tensor has at least one dimension, so scalars are `[1]`-shaped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

#[inline]
fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

//
// ctor
//
impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        if shape.is_empty() || numel(&shape) != data.len() {
            return Err(Error::InvalidShape {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Tensor of `shape` filled with `value`. An empty `shape` gives the uninitialized tensor.
    #[inline]
    pub fn full(shape: &[usize], value: f64) -> Self {
        if shape.is_empty() {
            return Self::default();
        }
        Self {
            shape: shape.to_vec(),
            data: vec![value; numel(shape)],
        }
    }

    #[inline]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    #[inline]
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    #[inline]
    pub fn scalar(value: f64) -> Self {
        Self::full(&[1], value)
    }
}

//
// methods
//
impl Tensor {
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.shape.is_empty()
    }

    #[inline]
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        self.sum() / self.data.len() as f64
    }

    #[inline]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }

    /// Elementwise binary operation on tensors of the same shape.
    pub fn zip_map(&self, other: &Tensor, op: &str, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        if self.shape != other.shape {
            return Err(self._mismatch(other, op));
        }
        Ok(Self {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(l, r)| f(*l, *r))
                .collect(),
        })
    }

    /// Elementwise binary operation where `other` is broadcast onto `self`.
    ///
    /// The dimensions of `other` must match a contiguous run of dimensions of `self`
    /// starting at `axis`. Negative `axis` aligns `other` to the trailing dimensions.
    pub fn broadcast_map(
        &self,
        other: &Tensor,
        axis: i64,
        op: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Self> {
        let (pre, mid, post) = self._broadcast_dims(other, axis, op)?;
        let mut data = Vec::with_capacity(self.data.len());
        for i in 0..pre {
            for j in 0..mid {
                let rhs = other.data[j];
                let base = (i * mid + j) * post;
                data.extend(self.data[base..base + post].iter().map(|lhs| f(*lhs, rhs)));
            }
        }
        Ok(Self {
            shape: self.shape.clone(),
            data,
        })
    }

    /// Sum `self` back into `shape`, the reverse of [`Tensor::broadcast_map`].
    pub fn reduce_like(&self, shape: &[usize], axis: i64, op: &str) -> Result<Self> {
        let target = Self::zeros(shape);
        let (pre, mid, post) = self._broadcast_dims(&target, axis, op)?;
        let mut data = target.data;
        for i in 0..pre {
            for (j, acc) in data.iter_mut().enumerate() {
                let base = (i * mid + j) * post;
                *acc += self.data[base..base + post].iter().sum::<f64>();
            }
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Matrix product of 2-D tensors, `[m, k] x [k, n] -> [m, n]`.
    pub fn matmul(&self, other: &Tensor, op: &str) -> Result<Self> {
        let (m, k, n) = match (self.shape.as_slice(), other.shape.as_slice()) {
            ([m, k1], [k2, n]) if k1 == k2 => (*m, *k1, *n),
            _ => return Err(self._mismatch(other, op)),
        };
        let mut data = vec![0.0; m * n];
        for i in 0..m {
            for p in 0..k {
                let lhs = self.data[i * k + p];
                let row = &other.data[p * n..(p + 1) * n];
                for (out, rhs) in data[i * n..(i + 1) * n].iter_mut().zip(row) {
                    *out += lhs * rhs;
                }
            }
        }
        Ok(Self {
            shape: vec![m, n],
            data,
        })
    }

    pub fn transpose(&self, op: &str) -> Result<Self> {
        let [m, n] = self.shape[..] else {
            return Err(Error::ShapeMismatch {
                op: op.to_string(),
                lhs: self.shape.clone(),
                rhs: vec![0, 0],
            });
        };
        let mut data = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                data[j * m + i] = self.data[i * n + j];
            }
        }
        Ok(Self {
            shape: vec![n, m],
            data,
        })
    }
}

// impls
impl Tensor {
    #[inline]
    fn _mismatch(&self, other: &Tensor, op: &str) -> Error {
        Error::ShapeMismatch {
            op: op.to_string(),
            lhs: self.shape.clone(),
            rhs: other.shape.clone(),
        }
    }

    fn _broadcast_dims(&self, other: &Tensor, axis: i64, op: &str) -> Result<(usize, usize, usize)> {
        let (n, m) = (self.shape.len(), other.shape.len());
        if n < m {
            return Err(self._mismatch(other, op));
        }
        let axis = if axis < 0 { n - m } else { axis as usize };
        if n < axis + m || self.shape[axis..axis + m] != other.shape[..] {
            return Err(self._mismatch(other, op));
        }
        Ok((
            numel(&self.shape[..axis]),
            numel(&other.shape),
            numel(&self.shape[axis + m..]),
        ))
    }
}
