//! Crouzeix–Raviart finite element discretization of diffusion–convection–reaction problems.
//!
//! The crate assembles sparse operators and right-hand sides for the non-conforming
//! face-based element CR1 on simplicial meshes of dimension 1, 2 and 3, for scalar problems
//! ([`cr1::Cr1`]) and for interleaved multi-component systems ([`cr1sys::Cr1Sys`]).
//!
//! Every operator comes in two flavors sharing one local kernel: an `assemble_*` method
//! producing a [`CsrMatrix`](nalgebra_sparse::CsrMatrix) and an `apply_*` method
//! accumulating the matrix-vector product without forming the matrix.
//!
//! Boundary conditions can be enforced strongly by static condensation (see
//! [`boundary::BoundaryData`]) or weakly by Nitsche's method. Convection terms are
//! stabilized by one of the schemes in [`convection::ConvectionMethod`].

use std::fmt;
use std::fmt::{Display, Formatter};

pub mod assembly;
pub mod boundary;
pub mod coefficient;
pub mod convection;
pub mod cr1;
pub mod cr1sys;
pub mod error;
pub mod fem;

pub use crfem_mesh as mesh;
pub use nalgebra;
pub use nalgebra_sparse;

use crfem_mesh::MeshError;

/// Library-wide error type.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid strategy, coefficient or boundary condition configuration.
    Configuration(String),
    /// A vector or matrix does not have the size implied by the degrees of freedom.
    Dimension {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A matrix-free evaluation disagrees with the assembled matrix.
    Consistency { context: String, deviation: f64 },
    /// The mesh could not be bound or queried.
    Mesh(MeshError),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::Dimension {
                context,
                expected,
                actual,
            } => write!(f, "Dimension mismatch in {}: expected {}, got {}", context, expected, actual),
            Self::Consistency { context, deviation } => write!(
                f,
                "Matrix-free evaluation of {} deviates from assembled matrix by {:e}",
                context, deviation
            ),
            Self::Mesh(err) => write!(f, "Mesh error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Mesh(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MeshError> for Error {
    fn from(err: MeshError) -> Self {
        Self::Mesh(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn check_dimension(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::Dimension {
            context,
            expected,
            actual,
        })
    }
}
