use super::Cr1;
use crate::boundary::{BoundaryConditions, BoundaryType};
use crate::coefficient::CellCoefficient;
use crate::convection::{ConvectionData, ConvectionMethod};
use crate::fem::Fem;
use crate::{check_dimension, Error, Result};
use crfem_mesh::Color;
use log::debug;
use nalgebra::{DVector, Point3, Vector3};

/// Normal velocities below this threshold mark a face as inflow.
const INFLOW_TOLERANCE: f64 = 1e-10;

impl Cr1 {
    /// Normal component `β·n` of a velocity field at each face barycenter, relative to the
    /// stored face normal.
    pub fn face_velocity<V>(&self, velocity: V) -> DVector<f64>
    where
        V: Fn(&Point3<f64>) -> Vector3<f64>,
    {
        DVector::from_iterator(
            self.mesh.num_faces(),
            (0..self.mesh.num_faces())
                .map(|face| velocity(self.mesh.face_center(face)).dot(&self.mesh.unit_normal(face))),
        )
    }

    /// Prepares and stores the convection data of a velocity field for the given scheme.
    pub fn prepare_convection<V>(&mut self, velocity: V, method: ConvectionMethod) -> Result<&ConvectionData>
    where
        V: Fn(&Point3<f64>) -> Vector3<f64>,
    {
        let face_velocity = self.face_velocity(velocity);
        let data = self.prepare_convection_data(face_velocity, method, self.parameters.lps_parameter)?;
        debug!("Prepared convection data for method {}", method);
        Ok(self.convection_data.insert(data))
    }

    pub fn convection_data(&self) -> Result<&ConvectionData> {
        self.convection_data
            .as_ref()
            .ok_or_else(|| Error::Configuration("convection data has not been prepared".to_string()))
    }

    /// Accumulates the correction of the right-hand side `∫ c f v` that evaluates the test
    /// functions at the moved points instead of the barycenters.
    pub fn mass_dot_supg(&self, b: &mut DVector<f64>, f: &DVector<f64>, coefficient: CellCoefficient) -> Result<()> {
        check_dimension("right-hand side", self.mesh.num_faces(), b.len())?;
        check_dimension("source", self.mesh.num_faces(), f.len())?;
        coefficient.validate(&self.mesh)?;
        let weights = self.convection_data()?.moved_point_weights()?;
        let nloc = self.num_local_dofs();
        let d = self.mesh.dim() as f64;
        let centered = d / (d + 1.0);
        for cell in 0..self.mesh.num_cells() {
            let value = coefficient.value(cell) * self.mesh.cell_volume(cell) * self.cell_mean(f, cell);
            for (i, &face) in self.mesh.faces_of_cell(cell).iter().enumerate() {
                b[face] += value * (centered - d * weights[nloc * cell + i]);
            }
        }
        Ok(())
    }

    /// Colors containing at least one face with incoming velocity.
    pub fn find_inflow_colors(&self) -> Result<Vec<Color>> {
        let face_velocity = self.convection_data()?.face_velocity();
        Ok(self
            .mesh
            .boundary_colors()
            .iter()
            .filter(|(_, faces)| faces.iter().any(|&face| face_velocity[face] < -INFLOW_TOLERANCE))
            .map(|(&color, _)| color)
            .collect())
    }

    /// Checks that the inflow boundary carries Dirichlet conditions.
    pub fn check_inflow_boundary(&self, conditions: &BoundaryConditions) -> Result<()> {
        let dirichlet = conditions.colors_of_type(BoundaryType::Dirichlet);
        match self
            .find_inflow_colors()?
            .into_iter()
            .find(|color| !dirichlet.contains(color))
        {
            Some(color) => Err(Error::Configuration(format!(
                "inflow color {} has no Dirichlet condition",
                color
            ))),
            None => Ok(()),
        }
    }
}
