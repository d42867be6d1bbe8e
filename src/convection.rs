//! Convection stabilization schemes and the per-binding velocity data they consume.
use crate::{check_dimension, Error, Result};
use itertools::Itertools;
use nalgebra::{DVector, Vector3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Discretization of the convection term `∫ β·∇u v`.
///
/// Every scheme is the centered Galerkin operator plus a correction:
///
/// | Method             | Correction                                                      |
/// |--------------------|-----------------------------------------------------------------|
/// | `Supg`             | test functions evaluated at a downwind point, plus upwind jumps |
/// | `SupgAlt`          | as `Supg`, with the point derived from outgoing face fluxes     |
/// | `Upwind`           | upwind interior-face jumps                                      |
/// | `UpwindAlt`        | same operator, derived from the transposed (dual) form          |
/// | `UpwindAlgebraic`  | algebraic diffusion removing positive off-diagonal entries      |
/// | `LocalProjection`  | penalty on interior-face jumps of the gradient                  |
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConvectionMethod {
    Supg,
    SupgAlt,
    Upwind,
    UpwindAlt,
    UpwindAlgebraic,
    LocalProjection,
}

impl ConvectionMethod {
    pub const ALL: [ConvectionMethod; 6] = [
        Self::Supg,
        Self::SupgAlt,
        Self::Upwind,
        Self::UpwindAlt,
        Self::UpwindAlgebraic,
        Self::LocalProjection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supg => "supg",
            Self::SupgAlt => "supg-alt",
            Self::Upwind => "upwind",
            Self::UpwindAlt => "upwind-alt",
            Self::UpwindAlgebraic => "upwind-algebraic",
            Self::LocalProjection => "local-projection",
        }
    }
}

impl Display for ConvectionMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConvectionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| Error::Configuration(format!("unknown convection method '{}'", s)))
    }
}

/// Coupling of the two cells sharing an interior face by the jump operator.
///
/// With `m = min(β·n, 0)` and `M = max(β·n, 0)` on the face, and `u0`, `u1` the traces from
/// the first and second cell:
///
/// - `Primal`: `∫ -m (u0 - u1) v0 - M (u0 - u1) v1`, the inflow penalty of the cell-wise form,
/// - `Dual`: `∫ (M u0 + m u1)(v0 - v1)`, the upwind flux of the integrated-by-parts form,
/// - `Centered`: `∫ β·n (u0 v0 - u1 v1)`.
///
/// These satisfy `Dual - Centered = Primal`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JumpMode {
    Primal,
    Dual,
    Centered,
}

/// Derivation used for the centered Galerkin convection operator `C - M_in`.
///
/// `CellWise` integrates `β·∇u v` on each cell. `FaceJump` assembles `-Cᵀ + M_out` plus the
/// centered interior-face jump. Both agree when the face velocity is discretely divergence free.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CenteredDerivation {
    CellWise,
    FaceJump,
}

/// Velocity field and scheme-specific auxiliary data, prepared once per mesh binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvectionData {
    method: ConvectionMethod,
    nloc: usize,
    face_velocity: DVector<f64>,
    cell_velocity: Vec<Vector3<f64>>,
    moved_point_weights: Option<Vec<f64>>,
    algebraic_diffusion: Option<CsrMatrix<f64>>,
    lps_parameter: f64,
}

impl ConvectionData {
    pub(crate) fn new(
        method: ConvectionMethod,
        nloc: usize,
        face_velocity: DVector<f64>,
        cell_velocity: Vec<Vector3<f64>>,
        lps_parameter: f64,
    ) -> Self {
        Self {
            method,
            nloc,
            face_velocity,
            cell_velocity,
            moved_point_weights: None,
            algebraic_diffusion: None,
            lps_parameter,
        }
    }

    pub fn method(&self) -> ConvectionMethod {
        self.method
    }

    /// Normal velocity at each face, relative to the stored face normal.
    pub fn face_velocity(&self) -> &DVector<f64> {
        &self.face_velocity
    }

    /// Constant velocity of each cell, reconstructed from the face velocities.
    pub fn cell_velocity(&self) -> &[Vector3<f64>] {
        &self.cell_velocity
    }

    /// Barycentric weights of the moved evaluation point of each cell, `dim + 1` per cell.
    pub fn moved_point_weights(&self) -> Result<&[f64]> {
        self.moved_point_weights.as_deref().ok_or_else(|| {
            Error::Configuration(format!("convection method '{}' has no moved-point weights", self.method))
        })
    }

    /// Replaces the moved-point weights, e.g. by externally computed ones.
    pub fn with_moved_point_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        check_dimension("moved-point weights", self.nloc * self.cell_velocity.len(), weights.len())?;
        self.moved_point_weights = Some(weights);
        Ok(self)
    }

    pub(crate) fn set_algebraic_diffusion(&mut self, diffusion: CsrMatrix<f64>) {
        self.algebraic_diffusion = Some(diffusion);
    }

    pub fn algebraic_diffusion(&self) -> Result<&CsrMatrix<f64>> {
        self.algebraic_diffusion.as_ref().ok_or_else(|| {
            Error::Configuration(format!("convection method '{}' has no algebraic diffusion", self.method))
        })
    }

    pub fn lps_parameter(&self) -> f64 {
        self.lps_parameter
    }

    pub fn with_lps_parameter(mut self, lps_parameter: f64) -> Self {
        self.lps_parameter = lps_parameter;
        self
    }
}

/// Computes the algebraic diffusion `D` of a convection matrix `A`, with
/// `d_ij = -max(0, a_ij, a_ji)` for `i != j` and zero row sums.
///
/// `A + D` has no positive off-diagonal entries and `D` is symmetric.
pub fn algebraic_diffusion(matrix: &CsrMatrix<f64>) -> CsrMatrix<f64> {
    let transpose = matrix.transpose();
    let mut coo = CooMatrix::new(matrix.nrows(), matrix.ncols());
    for (i, (row, row_t)) in matrix.row_iter().zip(transpose.row_iter()).enumerate() {
        let entries = row
            .col_indices()
            .iter()
            .zip(row.values())
            .merge_by(row_t.col_indices().iter().zip(row_t.values()), |a, b| a.0 <= b.0)
            .map(|(&j, &v)| (j, v))
            .coalesce(|(j0, v0), (j1, v1)| {
                if j0 == j1 {
                    Ok((j0, v0.max(v1)))
                } else {
                    Err(((j0, v0), (j1, v1)))
                }
            });
        for (j, v) in entries {
            if i != j && v > 0.0 {
                coo.push(i, j, -v);
                coo.push(i, i, v);
            }
        }
    }
    CsrMatrix::from(&coo)
}
