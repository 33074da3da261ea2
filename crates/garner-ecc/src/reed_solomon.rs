//! Systematic Reed-Solomon erasure codec over GF(2^8).
//!
//! The generator matrix is derived from a Vandermonde matrix with distinct
//! evaluation points, normalized so its top D rows are the identity: data
//! fragments are the original shards, parity fragments are linear
//! combinations. Any D of the M = D + P fragments reconstruct the data,
//! because every D-row submatrix of a normalized Vandermonde matrix stays
//! invertible.

use crate::gf256;
use crate::{EccError, Result};

/// Largest supported fragment count per block.
pub const MAX_TOTAL_SHARDS: usize = 255;

/// A Reed-Solomon codec for a fixed (data, parity) layout.
#[derive(Clone, Debug)]
pub struct ReedSolomon {
    data_count: usize,
    parity_count: usize,
    /// The bottom P rows of the systematic generator matrix (P x D).
    parity_rows: Vec<Vec<u8>>,
}

impl ReedSolomon {
    /// Build a codec for `data_count` data and `parity_count` parity shards.
    pub fn new(data_count: usize, parity_count: usize) -> Result<Self> {
        if data_count == 0 || parity_count == 0 {
            return Err(EccError::InvalidLayout(
                "data and parity counts must be positive".to_string(),
            ));
        }
        let total = data_count + parity_count;
        if total > MAX_TOTAL_SHARDS {
            return Err(EccError::InvalidLayout(format!(
                "{total} total shards, max {MAX_TOTAL_SHARDS}"
            )));
        }

        // Vandermonde matrix over points 0..total, then normalize the top
        // square to the identity so the code is systematic.
        let vandermonde: Vec<Vec<u8>> = (0..total)
            .map(|r| (0..data_count).map(|c| gf256::pow(r as u8, c)).collect())
            .collect();
        let top_inv = invert(&vandermonde[..data_count])?;
        let parity_rows = vandermonde[data_count..]
            .iter()
            .map(|row| mat_vec_rows(row, &top_inv))
            .collect();

        Ok(Self {
            data_count,
            parity_count,
            parity_rows,
        })
    }

    /// Number of data shards (D).
    pub fn data_count(&self) -> usize {
        self.data_count
    }

    /// Number of parity shards (P).
    pub fn parity_count(&self) -> usize {
        self.parity_count
    }

    /// Total shards (M = D + P).
    pub fn total_count(&self) -> usize {
        self.data_count + self.parity_count
    }

    /// Encode D equal-length data shards into P parity shards.
    ///
    /// The caller retains the data shards; the full fragment set is
    /// `data ++ parity`, indexed by supplier position.
    pub fn encode(&self, data_shards: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        if data_shards.len() != self.data_count {
            return Err(EccError::Encode(format!(
                "expected {} data shards, got {}",
                self.data_count,
                data_shards.len()
            )));
        }
        let shard_len = data_shards[0].len();
        if shard_len == 0 {
            return Err(EccError::Encode("data shards are empty".to_string()));
        }
        for (i, shard) in data_shards.iter().enumerate() {
            if shard.len() != shard_len {
                return Err(EccError::Encode(format!(
                    "shard {i} has length {}, expected {shard_len}",
                    shard.len()
                )));
            }
        }

        let parity = self
            .parity_rows
            .iter()
            .map(|row| {
                let mut out = vec![0u8; shard_len];
                for (c, shard) in data_shards.iter().enumerate() {
                    gf256::mul_acc(&mut out, shard, row[c]);
                }
                out
            })
            .collect();
        Ok(parity)
    }

    /// Reconstruct the D data shards from any >= D surviving fragments.
    ///
    /// `shards` is indexed by supplier position: `0..D` data, `D..M`
    /// parity. Present data shards are used directly; missing ones are
    /// solved from parity.
    pub fn reconstruct(&self, shards: &[Option<Vec<u8>>]) -> Result<Vec<Vec<u8>>> {
        let total = self.total_count();
        if shards.len() != total {
            return Err(EccError::Decode(format!(
                "expected {total} fragment slots, got {}",
                shards.len()
            )));
        }

        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.data_count {
            return Err(EccError::Decode(format!(
                "need at least {} fragments, have {present}",
                self.data_count
            )));
        }

        let shard_len = match shards.iter().flatten().next() {
            Some(s) => s.len(),
            None => return Err(EccError::Decode("no fragments present".to_string())),
        };
        for (pos, shard) in shards.iter().enumerate() {
            if let Some(s) = shard {
                if s.len() != shard_len {
                    return Err(EccError::Decode(format!(
                        "fragment {pos} has length {}, expected {shard_len}",
                        s.len()
                    )));
                }
            }
        }

        // Pick D fragments, data positions first so the solve degenerates
        // to a copy when no data is missing.
        let mut chosen: Vec<(usize, &Vec<u8>)> = Vec::with_capacity(self.data_count);
        for (pos, shard) in shards.iter().enumerate().take(self.data_count) {
            if let Some(s) = shard {
                chosen.push((pos, s));
            }
        }
        if chosen.len() < self.data_count {
            for (pos, shard) in shards.iter().enumerate().skip(self.data_count) {
                if chosen.len() == self.data_count {
                    break;
                }
                if let Some(s) = shard {
                    chosen.push((pos, s));
                }
            }
        }

        // Rows of the generator matrix matching the chosen fragments.
        let rows: Vec<Vec<u8>> = chosen
            .iter()
            .map(|(pos, _)| {
                if *pos < self.data_count {
                    unit_row(self.data_count, *pos)
                } else {
                    self.parity_rows[*pos - self.data_count].clone()
                }
            })
            .collect();
        let decode = invert(&rows)?;

        let data = (0..self.data_count)
            .map(|c| {
                let mut out = vec![0u8; shard_len];
                for (r, (_, shard)) in chosen.iter().enumerate() {
                    gf256::mul_acc(&mut out, shard, decode[c][r]);
                }
                out
            })
            .collect();
        Ok(data)
    }
}

/// Split raw data into `data_count` equal-length shards, zero-padded.
///
/// Returns the shards and the original (unpadded) length.
pub fn split_into_shards(data: &[u8], data_count: usize) -> Result<(Vec<Vec<u8>>, usize)> {
    if data.is_empty() {
        return Err(EccError::Encode("data is empty".to_string()));
    }
    if data_count == 0 {
        return Err(EccError::Encode("data count must be positive".to_string()));
    }

    let original_len = data.len();
    let shard_len = original_len.div_ceil(data_count);

    let mut padded = data.to_vec();
    padded.resize(shard_len * data_count, 0);

    let shards = padded.chunks(shard_len).map(<[u8]>::to_vec).collect();
    Ok((shards, original_len))
}

/// Join reconstructed data shards back into the original bytes.
pub fn join_shards(shards: &[Vec<u8>], original_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(original_len);
    for shard in shards {
        out.extend_from_slice(shard);
    }
    out.truncate(original_len);
    out
}

/// A row of the identity matrix.
fn unit_row(len: usize, one_at: usize) -> Vec<u8> {
    let mut row = vec![0u8; len];
    row[one_at] = 1;
    row
}

/// Multiply a row vector by a square matrix: `out[c] = sum row[k] * m[k][c]`.
fn mat_vec_rows(row: &[u8], m: &[Vec<u8>]) -> Vec<u8> {
    let n = m.len();
    (0..n)
        .map(|c| {
            let mut acc = 0u8;
            for (k, &coeff) in row.iter().enumerate() {
                acc = gf256::add(acc, gf256::mul(coeff, m[k][c]));
            }
            acc
        })
        .collect()
}

/// Invert a square matrix over GF(2^8) by Gauss-Jordan elimination.
fn invert(rows: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
    let n = rows.len();
    let mut work: Vec<Vec<u8>> = rows.to_vec();
    let mut out: Vec<Vec<u8>> = (0..n).map(|i| unit_row(n, i)).collect();

    for col in 0..n {
        // Find a pivot row.
        let pivot = (col..n)
            .find(|&r| work[r][col] != 0)
            .ok_or_else(|| EccError::Decode("singular decode matrix".to_string()))?;
        work.swap(col, pivot);
        out.swap(col, pivot);

        // Normalize the pivot row.
        let p = work[col][col];
        if p != 1 {
            let p_inv = gf256::inv(p);
            for v in work[col].iter_mut() {
                *v = gf256::mul(*v, p_inv);
            }
            for v in out[col].iter_mut() {
                *v = gf256::mul(*v, p_inv);
            }
        }

        // Eliminate the column from every other row.
        for r in 0..n {
            if r == col || work[r][col] == 0 {
                continue;
            }
            let factor = work[r][col];
            let (w_pivot, o_pivot) = (work[col].clone(), out[col].clone());
            gf256::mul_acc(&mut work[r], &w_pivot, factor);
            gf256::mul_acc(&mut out[r], &o_pivot, factor);
        }
    }
    Ok(out)
}
