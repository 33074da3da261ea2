//! Named erasure layouts.
//!
//! A layout name `ecc/{D}x{P}` fixes the whole geometry of a version: D
//! data fragments, P parity fragments, M = D + P supplier positions. The
//! name is recorded with every sealed version, so the fragment kind at any
//! supplier position is a pure function of the name alone.

use std::fmt;

use garner_types::FragmentKind;
use serde::{Deserialize, Serialize};

use crate::reed_solomon::ReedSolomon;
use crate::{EccError, Result};

/// Layout names every node knows out of the box.
pub const KNOWN_LAYOUTS: &[&str] = &["ecc/2x2", "ecc/2x4", "ecc/4x4", "ecc/7x7"];

/// A named erasure layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EccMap {
    name: String,
    data_count: usize,
    parity_count: usize,
}

impl EccMap {
    /// Parse a layout name of the form `ecc/{data}x{parity}`.
    pub fn from_name(name: &str) -> Result<Self> {
        let unknown = || EccError::UnknownLayout(name.to_string());
        let spec = name.strip_prefix("ecc/").ok_or_else(unknown)?;
        let (d_raw, p_raw) = spec.split_once('x').ok_or_else(unknown)?;
        let data_count: usize = d_raw.parse().map_err(|_| unknown())?;
        let parity_count: usize = p_raw.parse().map_err(|_| unknown())?;
        // Validate the geometry eagerly so later codec construction cannot
        // fail for a map that was accepted here.
        ReedSolomon::new(data_count, parity_count)?;
        Ok(Self {
            name: name.to_string(),
            data_count,
            parity_count,
        })
    }

    /// The layout name, e.g. `ecc/4x4`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of data fragments per block (D).
    pub fn data_count(&self) -> usize {
        self.data_count
    }

    /// Number of parity fragments per block (P).
    pub fn parity_count(&self) -> usize {
        self.parity_count
    }

    /// Number of supplier positions (M = D + P).
    pub fn total_count(&self) -> usize {
        self.data_count + self.parity_count
    }

    /// The fragment kind held by the supplier at `position`.
    pub fn fragment_kind(&self, position: u32) -> FragmentKind {
        if (position as usize) < self.data_count {
            FragmentKind::Data
        } else {
            FragmentKind::Parity
        }
    }

    /// Build the Reed-Solomon codec for this layout.
    pub fn codec(&self) -> Result<ReedSolomon> {
        ReedSolomon::new(self.data_count, self.parity_count)
    }
}

impl fmt::Display for EccMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<String> for EccMap {
    type Error = EccError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_name(&value)
    }
}

impl From<EccMap> for String {
    fn from(map: EccMap) -> Self {
        map.name
    }
}
