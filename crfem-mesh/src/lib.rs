//! Simplicial meshes with the face topology needed by face-based finite elements.
//!
//! A [`SimplexMesh`] stores segments, triangles or tetrahedra together with the derived
//! face numbering, outward face normals, cell volumes, boundary colors and interior-face
//! adjacency. All quantities are computed once at construction and the mesh is immutable
//! afterwards.
//!
//! Points are always stored as [`nalgebra::Point3`]. For one- and two-dimensional meshes the
//! unused trailing coordinates are expected to be zero.

use std::fmt;
use std::fmt::{Display, Formatter};

mod mesh;
pub mod procedural;

pub use mesh::{Color, SimplexMesh};

/// Errors that may occur when constructing a [`SimplexMesh`] or querying its boundary.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MeshError {
    /// Only meshes of dimension 1, 2 or 3 are supported.
    UnsupportedDimension(usize),
    /// The flat connectivity array is not a multiple of the number of vertices per cell.
    MalformedConnectivity { len: usize, vertices_per_cell: usize },
    /// A cell references a vertex that does not exist.
    VertexOutOfBounds { cell: usize, vertex: usize },
    /// A cell has (numerically) zero volume.
    DegenerateCell(usize),
    /// A face, given by its sorted vertices, is shared by more than two cells.
    NonManifoldFace(Vec<usize>),
    /// A boundary face was not assigned a color.
    UnlabeledBoundaryFace(usize),
    /// A color was assigned to vertices that do not form a boundary face.
    NotABoundaryFace(Vec<usize>),
    /// A boundary color was requested that no face carries.
    UnknownColor(Color),
}

impl Display for MeshError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedDimension(dim) => write!(f, "Unsupported mesh dimension {}", dim),
            Self::MalformedConnectivity { len, vertices_per_cell } => write!(
                f,
                "Connectivity of length {} is not a multiple of {} vertices per cell",
                len, vertices_per_cell
            ),
            Self::VertexOutOfBounds { cell, vertex } => {
                write!(f, "Cell {} references vertex {} which is out of bounds", cell, vertex)
            }
            Self::DegenerateCell(cell) => write!(f, "Cell {} is degenerate", cell),
            Self::NonManifoldFace(vertices) => {
                write!(f, "Face {:?} is shared by more than two cells", vertices)
            }
            Self::UnlabeledBoundaryFace(face) => write!(f, "Boundary face {} has no color", face),
            Self::NotABoundaryFace(vertices) => {
                write!(f, "Vertices {:?} do not form a boundary face", vertices)
            }
            Self::UnknownColor(color) => write!(f, "No boundary face has color {}", color),
        }
    }
}

impl std::error::Error for MeshError {}
