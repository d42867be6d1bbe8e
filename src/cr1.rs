//! The lowest-order Crouzeix–Raviart element.
//!
//! The element has one degree of freedom per mesh face, the value at the face barycenter. On a
//! cell with faces `f_0, ..., f_d`, where `f_i` is opposite to vertex `i`, the basis function of
//! `f_i` is `1 - d λ_i` with `λ_i` the barycentric coordinate of vertex `i`. Its gradient is the
//! constant `σ_i n_{f_i} / |K|`, with `n_{f_i}` the scaled face normal and `σ_i` the orientation
//! of the normal relative to the cell.
use crate::assembly::global::Stencil;
use crate::assembly::local::{ElementConnectivityAssembler, ElementMatrixAssembler};
use crate::boundary::BoundaryData;
use crate::coefficient::CellCoefficient;
use crate::convection::ConvectionData;
use crate::fem::{impl_cell_connectivity, Fem};
use crate::{check_dimension, Result};
use crfem_mesh::SimplexMesh;
use log::debug;
use nalgebra::{DMatrixViewMut, DVector, Point3, Vector3};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod boundary;
mod convection;

/// Tunable constants of the discretization.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cr1Parameters {
    /// Scale of the kept Dirichlet block under penalized strong elimination.
    pub dirichlet_penalty: f64,
    /// Penalty `γ` of Nitsche's method.
    pub nitsche_penalty: f64,
    /// Scale `τ` of the local projection stabilization.
    pub lps_parameter: f64,
    /// Scale of the interior-face jump penalty stabilizing CR1 elasticity.
    pub korn_factor: f64,
}

impl Default for Cr1Parameters {
    fn default() -> Self {
        Self {
            dirichlet_penalty: 1.0,
            nitsche_penalty: 2.0,
            lps_parameter: 0.1,
            korn_factor: 8.0,
        }
    }
}

/// Scalar CR1 discretization bound to a mesh.
#[derive(Debug, Clone)]
pub struct Cr1 {
    mesh: Arc<SimplexMesh>,
    parameters: Cr1Parameters,
    cell_gradients: Vec<Vector3<f64>>,
    stencil: Stencil,
    boundary_data: Option<BoundaryData>,
    convection_data: Option<ConvectionData>,
}

/// Connectivity of cells and their faces.
struct CellFaces<'a>(&'a SimplexMesh);

impl<'a> ElementConnectivityAssembler for CellFaces<'a> {
    fn solution_dim(&self) -> usize {
        1
    }

    fn num_elements(&self) -> usize {
        self.0.num_cells()
    }

    fn num_nodes(&self) -> usize {
        self.0.num_faces()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        self.0.dim() + 1
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(self.0.faces_of_cell(element_index));
    }
}

fn compute_cell_gradients(mesh: &SimplexMesh) -> Vec<Vector3<f64>> {
    (0..mesh.num_cells())
        .flat_map(|cell| {
            let volume = mesh.cell_volume(cell);
            mesh.faces_of_cell(cell)
                .iter()
                .zip(mesh.cell_orientation(cell))
                .map(move |(&face, &sigma)| mesh.face_normal(face) * (sigma / volume))
        })
        .collect()
}

impl Cr1 {
    pub fn new(mesh: Arc<SimplexMesh>) -> Self {
        let cell_gradients = compute_cell_gradients(&mesh);
        let stencil = Stencil::from_assembler(&CellFaces(&mesh));
        debug!(
            "Bound CR1 to mesh with {} cells and {} faces ({} non-zeros per operator)",
            mesh.num_cells(),
            mesh.num_faces(),
            stencil.nnz()
        );
        Self {
            mesh,
            parameters: Cr1Parameters::default(),
            cell_gradients,
            stencil,
            boundary_data: None,
            convection_data: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Cr1Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn parameters(&self) -> &Cr1Parameters {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: Cr1Parameters) {
        self.parameters = parameters;
    }

    /// Rebinds the element to a new mesh. Boundary and convection data are discarded.
    pub fn set_mesh(&mut self, mesh: Arc<SimplexMesh>) {
        *self = Self::new(mesh).with_parameters(self.parameters);
    }

    pub fn mesh_arc(&self) -> &Arc<SimplexMesh> {
        &self.mesh
    }

    pub fn dim(&self) -> usize {
        self.mesh.dim()
    }

    /// Interpolates a function at the face barycenters.
    pub fn interpolate<F>(&self, f: F) -> DVector<f64>
    where
        F: Fn(&Point3<f64>) -> f64,
    {
        DVector::from_iterator(
            self.mesh.num_faces(),
            (0..self.mesh.num_faces()).map(|face| f(self.mesh.face_center(face))),
        )
    }

    /// Interpolates a function at the cell barycenters.
    pub fn interpolate_cell<F>(&self, f: F) -> DVector<f64>
    where
        F: Fn(&Point3<f64>) -> f64,
    {
        DVector::from_iterator(
            self.mesh.num_cells(),
            (0..self.mesh.num_cells()).map(|cell| f(self.mesh.cell_center(cell))),
        )
    }

    /// Assembles the mass matrix `∫ c u v`, either exactly or lumped onto the diagonal.
    pub fn assemble_mass(&self, coefficient: CellCoefficient, lumped: bool) -> Result<CsrMatrix<f64>> {
        coefficient.validate(&self.mesh)?;
        self.stencil.assemble(&MassKernel {
            fem: self,
            coefficient,
            lumped,
        })
    }

    pub fn apply_mass(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        coefficient: CellCoefficient,
        lumped: bool,
    ) -> Result<()> {
        coefficient.validate(&self.mesh)?;
        crate::assembly::global::apply_element_matrices(
            du,
            u,
            &MassKernel {
                fem: self,
                coefficient,
                lumped,
            },
        )
    }

    /// Accumulates the right-hand side `∫ c f v` of a face interpolant `f`.
    pub fn mass_dot(&self, b: &mut DVector<f64>, f: &DVector<f64>, coefficient: CellCoefficient) -> Result<()> {
        self.apply_mass(b, f, coefficient, false)
    }

    /// Accumulates the right-hand side `∫ c f v` of a cellwise constant `f`.
    pub fn mass_dot_cell(&self, b: &mut DVector<f64>, f: &DVector<f64>, coefficient: CellCoefficient) -> Result<()> {
        check_dimension("right-hand side", self.mesh.num_faces(), b.len())?;
        check_dimension("cellwise source", self.mesh.num_cells(), f.len())?;
        coefficient.validate(&self.mesh)?;
        let scale = 1.0 / self.num_local_dofs() as f64;
        for cell in 0..self.mesh.num_cells() {
            let value = scale * coefficient.value(cell) * self.mesh.cell_volume(cell) * f[cell];
            for &face in self.mesh.faces_of_cell(cell) {
                b[face] += value;
            }
        }
        Ok(())
    }

    /// Constant gradient of a solution on a cell.
    pub fn cell_gradient(&self, u: &DVector<f64>, cell: usize) -> Vector3<f64> {
        self.mesh
            .faces_of_cell(cell)
            .iter()
            .zip(self.cell_gradients(cell))
            .map(|(&face, g)| g * u[face])
            .sum()
    }

    /// Mean value of a solution on a cell, attained at the cell barycenter.
    pub fn cell_mean(&self, u: &DVector<f64>, cell: usize) -> f64 {
        let faces = self.mesh.faces_of_cell(cell);
        faces.iter().map(|&face| u[face]).sum::<f64>() / faces.len() as f64
    }
}

impl Fem for Cr1 {
    fn mesh(&self) -> &SimplexMesh {
        &self.mesh
    }

    fn num_dofs(&self) -> usize {
        self.mesh.num_faces()
    }

    fn cell_dofs(&self, cell: usize) -> &[usize] {
        self.mesh.faces_of_cell(cell)
    }

    fn cell_gradients(&self, cell: usize) -> &[Vector3<f64>] {
        let nloc = self.num_local_dofs();
        &self.cell_gradients[nloc * cell..nloc * (cell + 1)]
    }

    fn stencil(&self) -> &Stencil {
        &self.stencil
    }

    fn boundary_coupling(&self) -> (f64, f64) {
        let d = self.mesh.dim() as f64;
        ((d - 1.0) / (d + 1.0), -1.0 / (d + 1.0))
    }
}

struct MassKernel<'a, F: ?Sized> {
    fem: &'a F,
    coefficient: CellCoefficient<'a>,
    lumped: bool,
}

impl_cell_connectivity!(MassKernel);

impl<'a, F: Fem + ?Sized> ElementMatrixAssembler for MassKernel<'a, F> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) {
        let cell = element_index;
        let d = self.fem.mesh().dim() as f64;
        let nloc = self.fem.num_local_dofs();
        let scale = self.coefficient.value(cell) * self.fem.mesh().cell_volume(cell);
        if self.lumped {
            output.fill_diagonal(scale / (d + 1.0));
        } else {
            let denominator = (d + 1.0) * (d + 2.0);
            let diagonal = (2.0 - d + d * d) / denominator;
            let off_diagonal = (2.0 - d) / denominator;
            for i in 0..nloc {
                for j in 0..nloc {
                    output[(i, j)] = scale * if i == j { diagonal } else { off_diagonal };
                }
            }
        }
    }
}
