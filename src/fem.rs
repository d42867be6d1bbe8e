//! Kernels shared by face-based elements.
//!
//! The [`Fem`] trait is implemented by elements whose degrees of freedom are attached to mesh
//! faces and whose basis functions have constant gradients on each cell. From a small set of
//! element hooks it derives diffusion, boundary mass, interior-face jump and convection
//! operators, each available both as an assembled matrix and as a matrix-free product.
use crate::assembly::global::{apply_element_matrices, assemble_csr, spmv, Stencil};
use crate::assembly::local::{ElementConnectivityAssembler, ElementMatrixAssembler};
use crate::coefficient::{BoundaryCoefficient, CellCoefficient};
use crate::convection::{algebraic_diffusion, CenteredDerivation, ConvectionData, ConvectionMethod, JumpMode};
use crate::{check_dimension, Result};
use crfem_mesh::SimplexMesh;
use log::warn;
use nalgebra::{DMatrixViewMut, DVector, Vector3};
use nalgebra_sparse::CsrMatrix;

pub trait Fem {
    fn mesh(&self) -> &SimplexMesh;

    fn num_dofs(&self) -> usize;

    /// Degrees of freedom of a cell, ordered like the faces of the cell.
    fn cell_dofs(&self, cell: usize) -> &[usize];

    /// Constant gradients of the local basis functions of a cell.
    fn cell_gradients(&self, cell: usize) -> &[Vector3<f64>];

    /// Stencil of the cell-based operators, built once per mesh binding.
    fn stencil(&self) -> &Stencil;

    /// Entries `(diagonal, off_diagonal)` of `∫_F φ_i φ_j / |F|` for two basis functions of a
    /// boundary cell that are not attached to the face `F`.
    fn boundary_coupling(&self) -> (f64, f64);

    fn num_local_dofs(&self) -> usize {
        self.mesh().dim() + 1
    }

    /// Assembles `∫ k ∇u·∇v`.
    fn assemble_diffusion(&self, coefficient: CellCoefficient) -> Result<CsrMatrix<f64>> {
        coefficient.validate(self.mesh())?;
        self.stencil().assemble(&DiffusionKernel { fem: self, coefficient })
    }

    fn apply_diffusion(&self, du: &mut DVector<f64>, u: &DVector<f64>, coefficient: CellCoefficient) -> Result<()> {
        coefficient.validate(self.mesh())?;
        apply_element_matrices(du, u, &DiffusionKernel { fem: self, coefficient })
    }

    /// Assembles `∫_Γ c u v` over the given boundary faces.
    fn assemble_boundary_mass(&self, faces: &[usize], coefficient: BoundaryCoefficient) -> Result<CsrMatrix<f64>> {
        let coefficients = coefficient.resolve(self.mesh(), faces)?;
        assemble_csr(&BoundaryMassKernel::new(self, faces.to_vec(), coefficients))
    }

    fn apply_boundary_mass(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        faces: &[usize],
        coefficient: BoundaryCoefficient,
    ) -> Result<()> {
        let coefficients = coefficient.resolve(self.mesh(), faces)?;
        apply_element_matrices(du, u, &BoundaryMassKernel::new(self, faces.to_vec(), coefficients))
    }

    /// Assembles the interior-face jump operator for the given normal face velocity.
    fn assemble_jump(&self, face_velocity: &DVector<f64>, mode: JumpMode) -> Result<CsrMatrix<f64>> {
        check_dimension("face velocity", self.mesh().num_faces(), face_velocity.len())?;
        assemble_csr(&JumpKernel {
            fem: self,
            face_velocity,
            mode,
        })
    }

    fn apply_jump(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        face_velocity: &DVector<f64>,
        mode: JumpMode,
    ) -> Result<()> {
        check_dimension("face velocity", self.mesh().num_faces(), face_velocity.len())?;
        let kernel = JumpKernel {
            fem: self,
            face_velocity,
            mode,
        };
        apply_element_matrices(du, u, &kernel)
    }

    /// Reconstructs the constant velocity of each cell from the normal face velocities.
    ///
    /// The reconstruction is the lowest-order Raviart–Thomas field with the given normal
    /// components, evaluated at the cell centroid.
    fn cell_velocities(&self, face_velocity: &DVector<f64>) -> Vec<Vector3<f64>> {
        let mesh = self.mesh();
        let d = mesh.dim() as f64;
        (0..mesh.num_cells())
            .map(|cell| {
                let center = mesh.cell_center(cell);
                let scale = 1.0 / (d * mesh.cell_volume(cell));
                mesh.faces_of_cell(cell)
                    .iter()
                    .zip(mesh.cell_orientation(cell))
                    .zip(mesh.simplex(cell))
                    .fold(Vector3::zeros(), |beta, ((&face, &sigma), &vertex)| {
                        let flux = sigma * mesh.face_area(face) * face_velocity[face];
                        beta + flux * scale * (center - mesh.points()[vertex])
                    })
            })
            .collect()
    }

    /// Barycentric coordinates of the point reached by moving the centroid of each cell along
    /// the cell velocity until it hits the cell boundary.
    fn moved_point_weights(&self, cell_velocity: &[Vector3<f64>]) -> Vec<f64> {
        let nloc = self.num_local_dofs();
        let d = self.mesh().dim() as f64;
        let centered = 1.0 / (d + 1.0);
        let mut weights = Vec::with_capacity(nloc * cell_velocity.len());
        for (cell, beta) in cell_velocity.iter().enumerate() {
            let rates: Vec<f64> = self.cell_gradients(cell).iter().map(|g| g.dot(beta)).collect();
            // Barycentric coordinate i decreases at rate g_i·β / d along β
            let step = rates
                .iter()
                .filter(|&&rate| rate > 0.0)
                .map(|&rate| d * centered / rate)
                .fold(f64::INFINITY, f64::min);
            if step.is_finite() {
                weights.extend(rates.iter().map(|&rate| (centered - step * rate / d).max(0.0)));
            } else {
                weights.extend(std::iter::repeat(centered).take(nloc));
            }
        }
        weights
    }

    /// Barycentric downwind weights from outgoing face fluxes, `(1 - q_i / Σ q) / dim` with
    /// `q_i` the positive part of the outward flux through face `i`.
    ///
    /// A cell without outflow, such as a sink cell of a compressible velocity or a cell at rest,
    /// has no downwind point. It keeps the centroid, so its cell term matches the upwind one.
    /// The fallback is logged at `warn` level.
    fn downwind_weights(&self, face_velocity: &DVector<f64>) -> Vec<f64> {
        let mesh = self.mesh();
        let nloc = self.num_local_dofs();
        let d = mesh.dim() as f64;
        let mut weights = Vec::with_capacity(nloc * mesh.num_cells());
        for cell in 0..mesh.num_cells() {
            let outflow: Vec<f64> = mesh
                .faces_of_cell(cell)
                .iter()
                .zip(mesh.cell_orientation(cell))
                .map(|(&face, &sigma)| (sigma * mesh.face_area(face) * face_velocity[face]).max(0.0))
                .collect();
            let total: f64 = outflow.iter().sum();
            if total > 0.0 {
                weights.extend(outflow.iter().map(|q| (1.0 - q / total) / d));
            } else {
                warn!("Cell {} has no outflow, using centroid as downwind point", cell);
                weights.extend(std::iter::repeat(1.0 / (d + 1.0)).take(nloc));
            }
        }
        weights
    }

    /// Builds the convection data for a normal face velocity, including the auxiliary data
    /// required by `method`.
    fn prepare_convection_data(
        &self,
        face_velocity: DVector<f64>,
        method: ConvectionMethod,
        lps_parameter: f64,
    ) -> Result<ConvectionData> {
        check_dimension("face velocity", self.mesh().num_faces(), face_velocity.len())?;
        let cell_velocity = self.cell_velocities(&face_velocity);
        let moved_points = match method {
            ConvectionMethod::Supg => Some(self.moved_point_weights(&cell_velocity)),
            ConvectionMethod::SupgAlt => Some(self.downwind_weights(&face_velocity)),
            _ => None,
        };
        let mut data = ConvectionData::new(
            method,
            self.num_local_dofs(),
            face_velocity,
            cell_velocity,
            lps_parameter,
        );
        if let Some(weights) = moved_points {
            data = data.with_moved_point_weights(weights)?;
        }
        if method == ConvectionMethod::UpwindAlgebraic {
            let centered = self.assemble_convection_centered(&data, CenteredDerivation::CellWise)?;
            data.set_algebraic_diffusion(algebraic_diffusion(&centered));
        }
        Ok(data)
    }

    /// Assembles the stabilized convection operator selected by the method of `data`.
    fn assemble_convection(&self, data: &ConvectionData) -> Result<CsrMatrix<f64>> {
        assemble_terms(self.num_dofs(), &self.convection_terms(data)?)
    }

    fn apply_convection(&self, du: &mut DVector<f64>, u: &DVector<f64>, data: &ConvectionData) -> Result<()> {
        apply_terms(du, u, &self.convection_terms(data)?)
    }

    /// Assembles the centered Galerkin convection operator, including the inflow boundary term.
    fn assemble_convection_centered(
        &self,
        data: &ConvectionData,
        derivation: CenteredDerivation,
    ) -> Result<CsrMatrix<f64>> {
        assemble_terms(self.num_dofs(), &self.centered_terms(data, derivation)?)
    }

    fn apply_convection_centered(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        data: &ConvectionData,
        derivation: CenteredDerivation,
    ) -> Result<()> {
        apply_terms(du, u, &self.centered_terms(data, derivation)?)
    }

    #[doc(hidden)]
    fn centered_terms<'a>(
        &'a self,
        data: &'a ConvectionData,
        derivation: CenteredDerivation,
    ) -> Result<Vec<OperatorTerm<'a>>> {
        self.check_convection_data(data)?;
        let terms = match derivation {
            CenteredDerivation::CellWise => vec![
                OperatorTerm::kernel(CellConvectionKernel::new(self, data, Transport::CellVelocity)),
                OperatorTerm::kernel(self.inflow_outflow_kernel(data, Boundary::Inflow)),
            ],
            CenteredDerivation::FaceJump => vec![
                OperatorTerm::kernel(CellConvectionKernel::new(self, data, Transport::FaceVelocity).transposed()),
                OperatorTerm::kernel(self.inflow_outflow_kernel(data, Boundary::Outflow)),
                OperatorTerm::kernel(JumpKernel {
                    fem: self,
                    face_velocity: data.face_velocity(),
                    mode: JumpMode::Centered,
                }),
            ],
        };
        Ok(terms)
    }

    #[doc(hidden)]
    fn convection_terms<'a>(&'a self, data: &'a ConvectionData) -> Result<Vec<OperatorTerm<'a>>> {
        use ConvectionMethod::*;
        self.check_convection_data(data)?;
        let jump = |mode| {
            OperatorTerm::kernel(JumpKernel {
                fem: self,
                face_velocity: data.face_velocity(),
                mode,
            })
        };
        let inflow = || OperatorTerm::kernel(self.inflow_outflow_kernel(data, Boundary::Inflow));
        let terms = match data.method() {
            Supg => {
                let weights = self.checked_moved_point_weights(data)?;
                let cell = CellConvectionKernel::new(self, data, Transport::CellVelocity).with_moved_point(weights);
                vec![OperatorTerm::kernel(cell), inflow(), jump(JumpMode::Primal)]
            }
            SupgAlt => {
                let weights = self.checked_moved_point_weights(data)?;
                let cell = CellConvectionKernel::new(self, data, Transport::FaceVelocity).with_moved_point(weights);
                vec![OperatorTerm::kernel(cell), inflow(), jump(JumpMode::Primal)]
            }
            Upwind => vec![
                OperatorTerm::kernel(CellConvectionKernel::new(self, data, Transport::FaceVelocity)),
                inflow(),
                jump(JumpMode::Primal),
            ],
            UpwindAlt => vec![
                OperatorTerm::kernel(CellConvectionKernel::new(self, data, Transport::FaceVelocity).transposed()),
                OperatorTerm::kernel(self.inflow_outflow_kernel(data, Boundary::Outflow)),
                jump(JumpMode::Dual),
            ],
            UpwindAlgebraic => vec![
                OperatorTerm::kernel(CellConvectionKernel::new(self, data, Transport::CellVelocity)),
                inflow(),
                OperatorTerm::Matrix(data.algebraic_diffusion()?),
            ],
            LocalProjection => vec![
                OperatorTerm::kernel(CellConvectionKernel::new(self, data, Transport::CellVelocity)),
                inflow(),
                OperatorTerm::kernel(LpsKernel {
                    fem: self,
                    face_velocity: data.face_velocity(),
                    tau: data.lps_parameter(),
                }),
            ],
        };
        Ok(terms)
    }

    /// Checks that `data` was prepared on a mesh with the topology of the bound mesh.
    #[doc(hidden)]
    fn check_convection_data(&self, data: &ConvectionData) -> Result<()> {
        check_dimension("face velocity", self.mesh().num_faces(), data.face_velocity().len())?;
        check_dimension("cell velocity", self.mesh().num_cells(), data.cell_velocity().len())
    }

    #[doc(hidden)]
    fn checked_moved_point_weights<'a>(&self, data: &'a ConvectionData) -> Result<&'a [f64]> {
        let weights = data.moved_point_weights()?;
        let expected = self.num_local_dofs() * self.mesh().num_cells();
        check_dimension("moved-point weights", expected, weights.len())?;
        Ok(weights)
    }

    /// Boundary mass weighted by the negative (inflow) or positive (outflow) part of the normal
    /// velocity, with a sign such that adding it to the convection matrix yields the boundary
    /// term of the respective derivation.
    #[doc(hidden)]
    fn inflow_outflow_kernel<'a>(&'a self, data: &'a ConvectionData, boundary: Boundary) -> BoundaryMassKernel<'a, Self> {
        let mesh = self.mesh();
        let faces: Vec<usize> = (0..mesh.num_faces()).filter(|&f| mesh.is_boundary_face(f)).collect();
        let coefficients = faces
            .iter()
            .map(|&face| {
                let bn = data.face_velocity()[face];
                match boundary {
                    Boundary::Inflow => -bn.min(0.0),
                    Boundary::Outflow => bn.max(0.0),
                }
            })
            .collect();
        BoundaryMassKernel::new(self, faces, coefficients)
    }
}

/// A summand of a composite operator.
pub enum OperatorTerm<'a> {
    Kernel(Box<dyn ElementMatrixAssembler + 'a>),
    Matrix(&'a CsrMatrix<f64>),
}

impl<'a> OperatorTerm<'a> {
    fn kernel(kernel: impl ElementMatrixAssembler + 'a) -> Self {
        Self::Kernel(Box::new(kernel))
    }
}

fn assemble_terms(num_dofs: usize, terms: &[OperatorTerm]) -> Result<CsrMatrix<f64>> {
    let mut total = CsrMatrix::zeros(num_dofs, num_dofs);
    for term in terms {
        let matrix = match term {
            OperatorTerm::Kernel(kernel) => assemble_csr(kernel.as_ref())?,
            OperatorTerm::Matrix(matrix) => (*matrix).clone(),
        };
        check_dimension("operator term", num_dofs, matrix.nrows())?;
        total = &total + &matrix;
    }
    Ok(total)
}

fn apply_terms(du: &mut DVector<f64>, u: &DVector<f64>, terms: &[OperatorTerm]) -> Result<()> {
    for term in terms {
        match term {
            OperatorTerm::Kernel(kernel) => apply_element_matrices(du, u, kernel.as_ref())?,
            OperatorTerm::Matrix(matrix) => {
                check_dimension("operator argument", matrix.ncols(), u.len())?;
                check_dimension("operator result", matrix.nrows(), du.len())?;
                *du += spmv(matrix, u)?;
            }
        }
    }
    Ok(())
}

#[doc(hidden)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Boundary {
    Inflow,
    Outflow,
}

/// Cell-based kernels share the connectivity of the cached stencil.
macro_rules! impl_cell_connectivity {
    ($kernel:ident) => {
        impl<'a, F: $crate::fem::Fem + ?Sized> $crate::assembly::local::ElementConnectivityAssembler
            for $kernel<'a, F>
        {
            fn solution_dim(&self) -> usize {
                1
            }

            fn num_elements(&self) -> usize {
                self.fem.mesh().num_cells()
            }

            fn num_nodes(&self) -> usize {
                self.fem.num_dofs()
            }

            fn element_node_count(&self, _element_index: usize) -> usize {
                self.fem.num_local_dofs()
            }

            fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
                output.copy_from_slice(self.fem.cell_dofs(element_index));
            }
        }
    };
}

pub(crate) use impl_cell_connectivity;

pub(crate) struct DiffusionKernel<'a, F: ?Sized> {
    pub fem: &'a F,
    pub coefficient: CellCoefficient<'a>,
}

impl_cell_connectivity!(DiffusionKernel);

impl<'a, F: Fem + ?Sized> ElementMatrixAssembler for DiffusionKernel<'a, F> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) {
        let cell = element_index;
        let scale = self.coefficient.value(cell) * self.fem.mesh().cell_volume(cell);
        let grads = self.fem.cell_gradients(cell);
        for (i, g_i) in grads.iter().enumerate() {
            for (j, g_j) in grads.iter().enumerate() {
                output[(i, j)] = scale * g_i.dot(g_j);
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Transport {
    /// Fluxes from the reconstructed cell velocity.
    CellVelocity,
    /// Fluxes from the normal face velocities.
    FaceVelocity,
}

/// `∫_K β·∇u v` with one-point quadrature, `v` evaluated at the centroid or at a moved point.
struct CellConvectionKernel<'a, F: ?Sized> {
    fem: &'a F,
    data: &'a ConvectionData,
    transport: Transport,
    moved_point: Option<&'a [f64]>,
    transposed: bool,
}

impl<'a, F: Fem + ?Sized> CellConvectionKernel<'a, F> {
    fn new(fem: &'a F, data: &'a ConvectionData, transport: Transport) -> Self {
        Self {
            fem,
            data,
            transport,
            moved_point: None,
            transposed: false,
        }
    }

    fn with_moved_point(self, weights: &'a [f64]) -> Self {
        Self {
            moved_point: Some(weights),
            ..self
        }
    }

    /// Assembles `-Cᵀ` instead of `C`.
    fn transposed(self) -> Self {
        Self {
            transposed: true,
            ..self
        }
    }
}

impl_cell_connectivity!(CellConvectionKernel);

impl<'a, F: Fem + ?Sized> ElementMatrixAssembler for CellConvectionKernel<'a, F> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) {
        let cell = element_index;
        let mesh = self.fem.mesh();
        let nloc = self.fem.num_local_dofs();
        let d = mesh.dim() as f64;
        let faces = mesh.faces_of_cell(cell);
        let sigma = mesh.cell_orientation(cell);

        let flux = |j: usize| match self.transport {
            Transport::CellVelocity => sigma[j] * mesh.face_normal(faces[j]).dot(&self.data.cell_velocity()[cell]),
            Transport::FaceVelocity => sigma[j] * mesh.face_area(faces[j]) * self.data.face_velocity()[faces[j]],
        };
        let weight = |i: usize| match self.moved_point {
            Some(mu) => 1.0 - d * mu[nloc * cell + i],
            None => 1.0 / (d + 1.0),
        };
        for i in 0..nloc {
            for j in 0..nloc {
                output[(i, j)] = if self.transposed {
                    -flux(i) * weight(j)
                } else {
                    flux(j) * weight(i)
                };
            }
        }
    }
}

/// `∫_F c u v` over boundary faces, coupling each face with the other faces of its cell.
#[doc(hidden)]
pub struct BoundaryMassKernel<'a, F: ?Sized> {
    fem: &'a F,
    faces: Vec<usize>,
    coefficients: Vec<f64>,
}

impl<'a, F: Fem + ?Sized> BoundaryMassKernel<'a, F> {
    fn new(fem: &'a F, faces: Vec<usize>, coefficients: Vec<f64>) -> Self {
        Self {
            fem,
            faces,
            coefficients,
        }
    }

    fn cell(&self, element_index: usize) -> usize {
        self.fem.mesh().cells_of_face(self.faces[element_index]).0
    }
}

impl<'a, F: Fem + ?Sized> ElementConnectivityAssembler for BoundaryMassKernel<'a, F> {
    fn solution_dim(&self) -> usize {
        1
    }

    fn num_elements(&self) -> usize {
        self.faces.len()
    }

    fn num_nodes(&self) -> usize {
        self.fem.num_dofs()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        self.fem.num_local_dofs()
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(self.fem.cell_dofs(self.cell(element_index)));
    }
}

impl<'a, F: Fem + ?Sized> ElementMatrixAssembler for BoundaryMassKernel<'a, F> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) {
        let mesh = self.fem.mesh();
        let face = self.faces[element_index];
        let cell = self.cell(element_index);
        let local = mesh
            .local_face_index(cell, face)
            .expect("Boundary face belongs to its cell");
        let scale = self.coefficients[element_index] * mesh.face_area(face);
        let (diagonal, off_diagonal) = self.fem.boundary_coupling();
        let nloc = self.fem.num_local_dofs();
        output[(local, local)] = scale;
        for i in (0..nloc).filter(|&i| i != local) {
            for j in (0..nloc).filter(|&j| j != local) {
                output[(i, j)] = scale * if i == j { diagonal } else { off_diagonal };
            }
        }
    }
}

/// Interior-face coupling of the vertex-paired faces of two neighboring cells.
struct JumpKernel<'a, F: ?Sized> {
    fem: &'a F,
    face_velocity: &'a DVector<f64>,
    mode: JumpMode,
}

impl<'a, F: Fem + ?Sized> ElementConnectivityAssembler for JumpKernel<'a, F> {
    fn solution_dim(&self) -> usize {
        1
    }

    fn num_elements(&self) -> usize {
        self.fem.mesh().interior_faces().len()
    }

    fn num_nodes(&self) -> usize {
        self.fem.num_dofs()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        2 * self.fem.mesh().dim()
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        let (fi0, fi1) = self.fem.mesh().paired_faces(element_index);
        let d = fi0.len();
        output[..d].copy_from_slice(fi0);
        output[d..].copy_from_slice(fi1);
    }
}

impl<'a, F: Fem + ?Sized> ElementMatrixAssembler for JumpKernel<'a, F> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) {
        let mesh = self.fem.mesh();
        let face = mesh.interior_faces()[element_index];
        let bn = self.face_velocity[face];
        let (m, p) = (bn.min(0.0), bn.max(0.0));
        // Scales of the blocks (r0, c0), (r0, c1), (r1, c0), (r1, c1)
        let blocks = match self.mode {
            JumpMode::Primal => [-m, m, -p, p],
            JumpMode::Dual => [p, m, -p, -m],
            JumpMode::Centered => [bn, 0.0, 0.0, -bn],
        };
        let d = mesh.dim();
        let area = mesh.face_area(face);
        let (diagonal, off_diagonal) = self.fem.boundary_coupling();
        for (b, &scale) in blocks.iter().enumerate() {
            let (r, c) = (d * (b / 2), d * (b % 2));
            for i in 0..d {
                for j in 0..d {
                    let pattern = if i == j { diagonal } else { off_diagonal };
                    output[(r + i, c + j)] = scale * area * pattern;
                }
            }
        }
    }
}

/// Local projection stabilization `τ Σ_F |β·n| h_F² |F| [∇u]·[∇v]`.
struct LpsKernel<'a, F: ?Sized> {
    fem: &'a F,
    face_velocity: &'a DVector<f64>,
    tau: f64,
}

impl<'a, F: Fem + ?Sized> ElementConnectivityAssembler for LpsKernel<'a, F> {
    fn solution_dim(&self) -> usize {
        1
    }

    fn num_elements(&self) -> usize {
        self.fem.mesh().interior_faces().len()
    }

    fn num_nodes(&self) -> usize {
        self.fem.num_dofs()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        2 * self.fem.num_local_dofs()
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        let [c0, c1] = self.fem.mesh().interior_face_cells(element_index);
        let nloc = self.fem.num_local_dofs();
        output[..nloc].copy_from_slice(self.fem.cell_dofs(c0));
        output[nloc..].copy_from_slice(self.fem.cell_dofs(c1));
    }
}

impl<'a, F: Fem + ?Sized> ElementMatrixAssembler for LpsKernel<'a, F> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) {
        let mesh = self.fem.mesh();
        let face = mesh.interior_faces()[element_index];
        let [c0, c1] = mesh.interior_face_cells(element_index);
        let area = mesh.face_area(face);
        // Mean height of the two cells over the shared face
        let h = mesh.dim() as f64 * (mesh.cell_volume(c0) + mesh.cell_volume(c1)) / (2.0 * area);
        let delta = self.tau * self.face_velocity[face].abs() * h * h * area;
        let jumps: Vec<Vector3<f64>> = self
            .fem
            .cell_gradients(c0)
            .iter()
            .copied()
            .chain(self.fem.cell_gradients(c1).iter().map(|g| -g))
            .collect();
        for (k, j_k) in jumps.iter().enumerate() {
            for (l, j_l) in jumps.iter().enumerate() {
                output[(k, l)] = delta * j_k.dot(j_l);
            }
        }
    }
}
