//! Physical coefficients of the discretized operators.
use crate::{Error, Result};
use crfem_mesh::{Color, SimplexMesh};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A coefficient that is constant on each cell.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CellCoefficient<'a> {
    Uniform(f64),
    PerCell(&'a [f64]),
}

impl<'a> CellCoefficient<'a> {
    pub(crate) fn validate(&self, mesh: &SimplexMesh) -> Result<()> {
        match self {
            Self::PerCell(values) if values.len() != mesh.num_cells() => Err(Error::Configuration(format!(
                "cell coefficient has {} values for {} cells",
                values.len(),
                mesh.num_cells()
            ))),
            _ => Ok(()),
        }
    }

    /// Value on the given cell. The coefficient must have been validated against the mesh.
    pub fn value(&self, cell: usize) -> f64 {
        match self {
            Self::Uniform(value) => *value,
            Self::PerCell(values) => values[cell],
        }
    }

    /// The larger of the values on two cells.
    pub(crate) fn max_of(&self, c0: usize, c1: usize) -> f64 {
        self.value(c0).max(self.value(c1))
    }
}

impl From<f64> for CellCoefficient<'static> {
    fn from(value: f64) -> Self {
        Self::Uniform(value)
    }
}

impl<'a> From<&'a [f64]> for CellCoefficient<'a> {
    fn from(values: &'a [f64]) -> Self {
        Self::PerCell(values)
    }
}

impl<'a> From<&'a DVector<f64>> for CellCoefficient<'a> {
    fn from(values: &'a DVector<f64>) -> Self {
        Self::PerCell(values.as_slice())
    }
}

/// A coefficient of a boundary integral.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum BoundaryCoefficient<'a> {
    Uniform(f64),
    /// One value for every face of the mesh. Only boundary entries are used.
    PerFace(&'a [f64]),
    /// One value per boundary color.
    PerColor(&'a BTreeMap<Color, f64>),
}

impl<'a> BoundaryCoefficient<'a> {
    /// Resolves the coefficient on each of the given boundary faces.
    pub(crate) fn resolve(&self, mesh: &SimplexMesh, faces: &[usize]) -> Result<Vec<f64>> {
        if let Some(face) = faces
            .iter()
            .find(|&&face| face >= mesh.num_faces() || !mesh.is_boundary_face(face))
        {
            return Err(Error::Configuration(format!("face {} is not a boundary face", face)));
        }
        match self {
            Self::Uniform(value) => Ok(vec![*value; faces.len()]),
            Self::PerFace(values) => {
                if values.len() != mesh.num_faces() {
                    return Err(Error::Configuration(format!(
                        "boundary coefficient has {} values for {} faces",
                        values.len(),
                        mesh.num_faces()
                    )));
                }
                Ok(faces.iter().map(|&face| values[face]).collect())
            }
            Self::PerColor(map) => faces
                .iter()
                .map(|&face| {
                    mesh.face_color(face)
                        .and_then(|color| map.get(&color).copied())
                        .ok_or_else(|| {
                            Error::Configuration(format!("no boundary coefficient for the color of face {}", face))
                        })
                })
                .collect(),
        }
    }
}

impl From<f64> for BoundaryCoefficient<'static> {
    fn from(value: f64) -> Self {
        Self::Uniform(value)
    }
}

impl<'a> From<&'a BTreeMap<Color, f64>> for BoundaryCoefficient<'a> {
    fn from(map: &'a BTreeMap<Color, f64>) -> Self {
        Self::PerColor(map)
    }
}

/// Lamé parameters of an isotropic linear elastic material.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LameParameters {
    pub mu: f64,
    pub lambda: f64,
}

impl LameParameters {
    /// Converts Young's modulus and Poisson's ratio to Lamé parameters.
    pub fn from_young_poisson(young: f64, poisson: f64) -> Self {
        let mu = young / (2.0 * (1.0 + poisson));
        let lambda = young * poisson / ((1.0 + poisson) * (1.0 - 2.0 * poisson));
        Self { mu, lambda }
    }
}
