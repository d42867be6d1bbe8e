//! Vector-valued CR1 discretizations.
//!
//! A system with `ncomp` components stores its degrees of freedom interleaved, component `c` of
//! face `f` at index `ncomp * f + c`.
use crate::assembly::global::{apply_element_matrices, assemble_csr, kron_identity, Stencil};
use crate::assembly::local::{ElementConnectivityAssembler, ElementMatrixAssembler};
use crate::boundary::{BoundaryConditions, BoundaryData, BoundaryType, DirichletMethod};
use crate::coefficient::CellCoefficient;
use crate::cr1::{Cr1, Cr1Parameters};
use crate::fem::Fem;
use crate::{check_dimension, Error, Result};
use crfem_mesh::{Color, SimplexMesh};
use log::debug;
use nalgebra::{DMatrixViewMut, DVector, Point3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Cr1Sys {
    scalar: Cr1,
    ncomp: usize,
    stencil: Stencil,
    boundary_data: Option<BoundaryData>,
}

/// Connectivity of cells and their faces, with `ncomp` degrees of freedom per face.
struct SystemCellFaces<'a> {
    mesh: &'a SimplexMesh,
    ncomp: usize,
}

impl<'a> ElementConnectivityAssembler for SystemCellFaces<'a> {
    fn solution_dim(&self) -> usize {
        self.ncomp
    }

    fn num_elements(&self) -> usize {
        self.mesh.num_cells()
    }

    fn num_nodes(&self) -> usize {
        self.mesh.num_faces()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        self.mesh.dim() + 1
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(self.mesh.faces_of_cell(element_index));
    }
}

impl Cr1Sys {
    pub fn new(mesh: Arc<SimplexMesh>, ncomp: usize) -> Result<Self> {
        if ncomp == 0 {
            return Err(Error::Configuration("a system needs at least one component".to_string()));
        }
        let stencil = Stencil::from_assembler(&SystemCellFaces { mesh: &mesh, ncomp });
        debug!("Bound CR1 system with {} components ({} dofs)", ncomp, stencil.num_rows());
        Ok(Self {
            scalar: Cr1::new(mesh),
            ncomp,
            stencil,
            boundary_data: None,
        })
    }

    pub fn with_parameters(mut self, parameters: Cr1Parameters) -> Self {
        self.scalar.set_parameters(parameters);
        self
    }

    pub fn parameters(&self) -> &Cr1Parameters {
        self.scalar.parameters()
    }

    /// Rebinds the system to a new mesh. Boundary data is discarded.
    pub fn set_mesh(&mut self, mesh: Arc<SimplexMesh>) {
        self.stencil = Stencil::from_assembler(&SystemCellFaces {
            mesh: &mesh,
            ncomp: self.ncomp,
        });
        self.scalar.set_mesh(mesh);
        self.boundary_data = None;
    }

    /// The scalar element acting on each component.
    pub fn scalar(&self) -> &Cr1 {
        &self.scalar
    }

    pub fn mesh(&self) -> &SimplexMesh {
        self.scalar.mesh()
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn num_dofs(&self) -> usize {
        self.ncomp * self.mesh().num_faces()
    }

    pub fn index(&self, face: usize, component: usize) -> usize {
        self.ncomp * face + component
    }

    /// Extracts one component of an interleaved vector.
    pub fn component(&self, u: &DVector<f64>, component: usize) -> DVector<f64> {
        let nfaces = u.len() / self.ncomp;
        DVector::from_iterator(nfaces, (0..nfaces).map(|face| u[self.ncomp * face + component]))
    }

    fn interleave(&self, components: &[DVector<f64>]) -> DVector<f64> {
        let nfaces = self.mesh().num_faces();
        DVector::from_fn(self.ncomp * nfaces, |i, _| components[i % self.ncomp][i / self.ncomp])
    }

    /// Applies a scalar operator to every component.
    fn apply_componentwise<F>(&self, du: &mut DVector<f64>, u: &DVector<f64>, mut apply: F) -> Result<()>
    where
        F: FnMut(&mut DVector<f64>, &DVector<f64>) -> Result<()>,
    {
        check_dimension("operator argument", self.num_dofs(), u.len())?;
        check_dimension("operator result", self.num_dofs(), du.len())?;
        for c in 0..self.ncomp {
            let mut du_c = DVector::zeros(self.mesh().num_faces());
            apply(&mut du_c, &self.component(u, c))?;
            for (face, value) in du_c.iter().enumerate() {
                du[self.ncomp * face + c] += value;
            }
        }
        Ok(())
    }

    /// Interpolates one function per component at the face barycenters.
    pub fn interpolate(&self, functions: &[&dyn Fn(&Point3<f64>) -> f64]) -> Result<DVector<f64>> {
        check_dimension("interpolated components", self.ncomp, functions.len())?;
        let components: Vec<_> = functions.iter().map(|f| self.scalar.interpolate(f)).collect();
        Ok(self.interleave(&components))
    }

    pub fn interpolate_boundary(
        &self,
        conditions: &BoundaryConditions,
        colors: &[Color],
        lumped: bool,
    ) -> Result<DVector<f64>> {
        let components = (0..self.ncomp)
            .map(|c| self.scalar.interpolate_boundary_component(conditions, colors, c, lumped))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.interleave(&components))
    }

    /// Dirichlet values of every component at the faces of the cells adjacent to a Dirichlet
    /// face.
    pub fn dirichlet_values(&self, conditions: &BoundaryConditions) -> Result<DVector<f64>> {
        let colors = conditions.colors_of_type(BoundaryType::Dirichlet);
        self.interpolate_boundary(conditions, &colors, false)
    }

    pub fn assemble_mass(&self, coefficient: CellCoefficient, lumped: bool) -> Result<CsrMatrix<f64>> {
        Ok(kron_identity(&self.scalar.assemble_mass(coefficient, lumped)?, self.ncomp))
    }

    pub fn apply_mass(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        coefficient: CellCoefficient,
        lumped: bool,
    ) -> Result<()> {
        self.apply_componentwise(du, u, |du, u| self.scalar.apply_mass(du, u, coefficient, lumped))
    }

    pub fn mass_dot(&self, b: &mut DVector<f64>, f: &DVector<f64>, coefficient: CellCoefficient) -> Result<()> {
        self.apply_mass(b, f, coefficient, false)
    }

    /// Assembles `∫ k ∇u : ∇v`, the scalar diffusion acting on each component.
    pub fn assemble_block_diffusion(&self, coefficient: CellCoefficient) -> Result<CsrMatrix<f64>> {
        Ok(kron_identity(&self.scalar.assemble_diffusion(coefficient)?, self.ncomp))
    }

    pub fn apply_block_diffusion(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        coefficient: CellCoefficient,
    ) -> Result<()> {
        self.apply_componentwise(du, u, |du, u| self.scalar.apply_diffusion(du, u, coefficient))
    }

    fn check_elasticity_components(&self) -> Result<()> {
        check_dimension("elasticity components", self.mesh().dim(), self.ncomp)
    }

    /// Assembles `∫ 2μ ε(u):ε(v) + λ div u div v` without stabilization.
    pub fn assemble_lame(&self, mu: CellCoefficient, lambda: CellCoefficient) -> Result<CsrMatrix<f64>> {
        self.check_elasticity_components()?;
        mu.validate(self.mesh())?;
        lambda.validate(self.mesh())?;
        self.stencil.assemble(&LameKernel { sys: self, mu, lambda })
    }

    /// Assembles the interior-face jump penalty that restores Korn's inequality for CR1, with
    /// weight `korn_factor · max(μ_0, μ_1) · |F| / (|K_0| + |K_1|)`.
    pub fn assemble_korn_stabilization(&self, mu: CellCoefficient) -> Result<CsrMatrix<f64>> {
        mu.validate(self.mesh())?;
        assemble_csr(&KornKernel { sys: self, mu })
    }

    /// Assembles the stabilized linear elasticity operator.
    pub fn assemble_elasticity(&self, mu: CellCoefficient, lambda: CellCoefficient) -> Result<CsrMatrix<f64>> {
        let lame = self.assemble_lame(mu, lambda)?;
        let korn = self.assemble_korn_stabilization(mu)?;
        Ok(&lame + &korn)
    }

    pub fn apply_elasticity(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        mu: CellCoefficient,
        lambda: CellCoefficient,
    ) -> Result<()> {
        self.check_elasticity_components()?;
        mu.validate(self.mesh())?;
        lambda.validate(self.mesh())?;
        apply_element_matrices(du, u, &LameKernel { sys: self, mu, lambda })?;
        apply_element_matrices(du, u, &KornKernel { sys: self, mu })
    }

    /// Assembles the divergence `B` with `(B v)_K = ∫_K div v`, of size `ncells x num_dofs`.
    pub fn assemble_divergence(&self) -> Result<CsrMatrix<f64>> {
        self.check_elasticity_components()?;
        let mesh = self.mesh();
        let mut coo = CooMatrix::new(mesh.num_cells(), self.num_dofs());
        for cell in 0..mesh.num_cells() {
            let volume = mesh.cell_volume(cell);
            for (&face, g) in mesh.faces_of_cell(cell).iter().zip(self.scalar.cell_gradients(cell)) {
                for c in 0..self.ncomp {
                    coo.push(cell, self.index(face, c), volume * g[c]);
                }
            }
        }
        Ok(CsrMatrix::from(&coo))
    }

    /// Accumulates `dv -= Bᵀ p` and `dp += B v` for the divergence `B`.
    pub fn apply_div_grad(
        &self,
        dv: &mut DVector<f64>,
        dp: &mut DVector<f64>,
        v: &DVector<f64>,
        p: &DVector<f64>,
    ) -> Result<()> {
        self.check_elasticity_components()?;
        let mesh = self.mesh();
        check_dimension("velocity argument", self.num_dofs(), v.len())?;
        check_dimension("velocity result", self.num_dofs(), dv.len())?;
        check_dimension("pressure argument", mesh.num_cells(), p.len())?;
        check_dimension("pressure result", mesh.num_cells(), dp.len())?;
        for cell in 0..mesh.num_cells() {
            let volume = mesh.cell_volume(cell);
            for (&face, g) in mesh.faces_of_cell(cell).iter().zip(self.scalar.cell_gradients(cell)) {
                for c in 0..self.ncomp {
                    let dof = self.index(face, c);
                    dv[dof] -= volume * p[cell] * g[c];
                    dp[cell] += volume * g[c] * v[dof];
                }
            }
        }
        Ok(())
    }

    /// Marks every component of the faces of `dirichlet_colors` as Dirichlet and prepares flux
    /// recovery on `flux_colors`.
    pub fn prepare_boundary(&mut self, dirichlet_colors: &[Color], flux_colors: &[Color]) -> Result<&BoundaryData> {
        let ncomp = self.ncomp;
        let mesh = self.scalar.mesh();
        let expand = |faces: &[usize]| -> Vec<usize> {
            faces
                .iter()
                .flat_map(|&face| (0..ncomp).map(move |c| ncomp * face + c))
                .collect()
        };
        let dirichlet_dofs = expand(&mesh.boundary_faces(dirichlet_colors)?);
        let flux = flux_colors
            .iter()
            .map(|&color| -> Result<_> {
                let faces = mesh.boundary_faces(&[color])?;
                let dofs = expand(&faces);
                Ok((color, (faces, dofs)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        let data = BoundaryData::new(self.num_dofs(), dirichlet_colors.to_vec(), dirichlet_dofs, flux);
        Ok(self.boundary_data.insert(data))
    }

    pub fn boundary_data(&self) -> Result<&BoundaryData> {
        self.boundary_data
            .as_ref()
            .ok_or_else(|| Error::Configuration("boundary data has not been prepared".to_string()))
    }

    fn boundary_data_mut(&mut self) -> Result<&mut BoundaryData> {
        self.boundary_data
            .as_mut()
            .ok_or_else(|| Error::Configuration("boundary data has not been prepared".to_string()))
    }

    /// Eliminates every component of the Dirichlet faces from an assembled operator.
    pub fn matrix_boundary(&mut self, matrix: &CsrMatrix<f64>, method: DirichletMethod) -> Result<CsrMatrix<f64>> {
        let diagonal = method.dirichlet_diagonal(self.parameters().dirichlet_penalty)?;
        self.boundary_data_mut()?.condense_matrix(matrix, diagonal)
    }

    pub fn vector_boundary(&mut self, b: &mut DVector<f64>, conditions: &BoundaryConditions) -> Result<()> {
        let dirichlet_values = self.dirichlet_values(conditions)?;
        self.boundary_data_mut()?.condense_rhs(b, &dirichlet_values)
    }

    pub fn apply_with_boundary<F>(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        method: DirichletMethod,
        apply: F,
    ) -> Result<()>
    where
        F: FnMut(&mut DVector<f64>, &DVector<f64>) -> Result<()>,
    {
        let diagonal = method.dirichlet_diagonal(self.parameters().dirichlet_penalty)?;
        self.boundary_data()?.apply_condensed(du, u, diagonal, apply)
    }

    /// Accumulates the Neumann and Robin data of every component.
    pub fn rhs_boundary(&self, b: &mut DVector<f64>, conditions: &BoundaryConditions) -> Result<()> {
        (0..self.ncomp).try_for_each(|c| {
            self.scalar
                .rhs_boundary_component(b, conditions, c, self.ncomp)
        })
    }

    pub fn assemble_nitsche(&self, coefficient: CellCoefficient, colors: &[Color]) -> Result<CsrMatrix<f64>> {
        Ok(kron_identity(&self.scalar.assemble_nitsche(coefficient, colors)?, self.ncomp))
    }

    pub fn apply_nitsche(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        coefficient: CellCoefficient,
        colors: &[Color],
    ) -> Result<()> {
        self.apply_componentwise(du, u, |du, u| self.scalar.apply_nitsche(du, u, coefficient, colors))
    }

    /// Accumulates the Nitsche right-hand side for interleaved Dirichlet values.
    pub fn rhs_nitsche(
        &self,
        b: &mut DVector<f64>,
        coefficient: CellCoefficient,
        colors: &[Color],
        dirichlet_values: &DVector<f64>,
    ) -> Result<()> {
        check_dimension("Dirichlet values", self.num_dofs(), dirichlet_values.len())?;
        self.apply_componentwise(b, dirichlet_values, |b, ud| {
            self.scalar.rhs_nitsche(b, coefficient, colors, ud)
        })
    }

    /// Normal flux of every component through each of the given colors, recovered from the
    /// residual saved during elimination.
    pub fn boundary_normal_flux(&self, u: &DVector<f64>, colors: &[Color]) -> Result<Vec<Vec<f64>>> {
        let data = self.boundary_data()?;
        colors
            .iter()
            .map(|&color| data.flux_components(color, u, self.ncomp))
            .collect()
    }

    /// Nodal values of every component.
    pub fn to_nodes(&self, u: &DVector<f64>) -> Result<DVector<f64>> {
        check_dimension("solution", self.num_dofs(), u.len())?;
        let components = (0..self.ncomp)
            .map(|c| crate::error::to_nodes(&self.scalar, &self.component(u, c)))
            .collect::<Result<Vec<_>>>()?;
        let npoints = self.mesh().num_points();
        Ok(DVector::from_fn(self.ncomp * npoints, |i, _| {
            components[i % self.ncomp][i / self.ncomp]
        }))
    }
}

/// `∫ 2μ ε(u):ε(v) + λ div u div v` on one cell.
struct LameKernel<'a> {
    sys: &'a Cr1Sys,
    mu: CellCoefficient<'a>,
    lambda: CellCoefficient<'a>,
}

impl<'a> ElementConnectivityAssembler for LameKernel<'a> {
    fn solution_dim(&self) -> usize {
        self.sys.ncomp
    }

    fn num_elements(&self) -> usize {
        self.sys.mesh().num_cells()
    }

    fn num_nodes(&self) -> usize {
        self.sys.mesh().num_faces()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        self.sys.scalar.num_local_dofs()
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(self.sys.mesh().faces_of_cell(element_index));
    }
}

impl<'a> ElementMatrixAssembler for LameKernel<'a> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) {
        let cell = element_index;
        let nc = self.sys.ncomp;
        let volume = self.sys.mesh().cell_volume(cell);
        let (mu, lambda) = (self.mu.value(cell), self.lambda.value(cell));
        let grads = self.sys.scalar.cell_gradients(cell);
        for (k, g_k) in grads.iter().enumerate() {
            for (l, g_l) in grads.iter().enumerate() {
                let laplace = volume * mu * g_k.dot(g_l);
                for i in 0..nc {
                    for j in 0..nc {
                        output[(nc * k + i, nc * l + j)] += volume * (lambda * g_k[i] * g_l[j] + mu * g_k[j] * g_l[i]);
                    }
                    output[(nc * k + i, nc * l + i)] += laplace;
                }
            }
        }
    }
}

/// Penalty on the jumps across interior faces, for each component.
struct KornKernel<'a> {
    sys: &'a Cr1Sys,
    mu: CellCoefficient<'a>,
}

impl<'a> ElementConnectivityAssembler for KornKernel<'a> {
    fn solution_dim(&self) -> usize {
        self.sys.ncomp
    }

    fn num_elements(&self) -> usize {
        self.sys.mesh().interior_faces().len()
    }

    fn num_nodes(&self) -> usize {
        self.sys.mesh().num_faces()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        2 * self.sys.mesh().dim()
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        let (fi0, fi1) = self.sys.mesh().paired_faces(element_index);
        let d = fi0.len();
        output[..d].copy_from_slice(fi0);
        output[d..].copy_from_slice(fi1);
    }
}

impl<'a> ElementMatrixAssembler for KornKernel<'a> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) {
        let mesh = self.sys.mesh();
        let face = mesh.interior_faces()[element_index];
        let [c0, c1] = mesh.interior_face_cells(element_index);
        let area = mesh.face_area(face);
        let scale = self.sys.parameters().korn_factor * self.mu.max_of(c0, c1) * area
            / (mesh.cell_volume(c0) + mesh.cell_volume(c1));
        let (diagonal, off_diagonal) = self.sys.scalar.boundary_coupling();
        let d = mesh.dim();
        let nc = self.sys.ncomp;
        for a in 0..2 * d {
            for b in 0..2 * d {
                let sign = if (a < d) == (b < d) { 1.0 } else { -1.0 };
                let pattern = if a % d == b % d { diagonal } else { off_diagonal };
                for c in 0..nc {
                    output[(nc * a + c, nc * b + c)] = sign * area * scale * pattern;
                }
            }
        }
    }
}
