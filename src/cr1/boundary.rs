use super::Cr1;
use crate::assembly::global::{apply_element_matrices, assemble_csr};
use crate::assembly::local::{ElementConnectivityAssembler, ElementMatrixAssembler};
use crate::boundary::{BoundaryConditions, BoundaryData, BoundaryType, DirichletMethod};
use crate::coefficient::{BoundaryCoefficient, CellCoefficient};
use crate::fem::Fem;
use crate::{check_dimension, Error, Result};
use crfem_mesh::Color;
use nalgebra::{DMatrixViewMut, DVector};
use nalgebra_sparse::CsrMatrix;
use std::collections::BTreeMap;

impl Cr1 {
    /// Partitions the faces into Dirichlet and inner faces and prepares flux recovery on
    /// `flux_colors`.
    pub fn prepare_boundary(&mut self, dirichlet_colors: &[Color], flux_colors: &[Color]) -> Result<&BoundaryData> {
        let dirichlet_faces = self.mesh.boundary_faces(dirichlet_colors)?;
        let flux = flux_colors
            .iter()
            .map(|&color| -> Result<_> {
                let faces = self.mesh.boundary_faces(&[color])?;
                Ok((color, (faces.clone(), faces)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        let data = BoundaryData::new(self.mesh.num_faces(), dirichlet_colors.to_vec(), dirichlet_faces, flux);
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

    /// Evaluates the boundary functions of the given colors.
    ///
    /// The lumped interpolation sets the boundary faces only. Otherwise every face of a cell
    /// adjacent to the boundary is set, using the unit normal of the boundary face.
    pub fn interpolate_boundary(
        &self,
        conditions: &BoundaryConditions,
        colors: &[Color],
        lumped: bool,
    ) -> Result<DVector<f64>> {
        self.interpolate_boundary_component(conditions, colors, 0, lumped)
    }

    pub(crate) fn interpolate_boundary_component(
        &self,
        conditions: &BoundaryConditions,
        colors: &[Color],
        component: usize,
        lumped: bool,
    ) -> Result<DVector<f64>> {
        let mut values = DVector::zeros(self.mesh.num_faces());
        let mut boundary_faces = Vec::new();
        for &color in colors {
            let condition = conditions.require(color)?;
            if condition.functions().is_empty() {
                continue;
            }
            let faces = self.mesh.boundary_faces(&[color])?;
            if !lumped {
                for &face in &faces {
                    let normal = self.mesh.unit_normal(face);
                    let (cell, _) = self.mesh.cells_of_face(face);
                    for &other in self.mesh.faces_of_cell(cell) {
                        values[other] = condition.evaluate(component, self.mesh.face_center(other), &normal);
                    }
                }
            }
            boundary_faces.extend(faces.into_iter().map(|face| (face, condition)));
        }
        // Boundary faces keep their own data when they are also a neighbor of another color
        for (face, condition) in boundary_faces {
            let normal = self.mesh.unit_normal(face);
            values[face] = condition.evaluate(component, self.mesh.face_center(face), &normal);
        }
        Ok(values)
    }

    /// Dirichlet data at every face of the cells adjacent to a Dirichlet face, zero elsewhere.
    ///
    /// Strong elimination reads the Dirichlet faces only. The Nitsche penalty sees the data on
    /// the other faces of the boundary cells as well.
    pub fn dirichlet_values(&self, conditions: &BoundaryConditions) -> Result<DVector<f64>> {
        let colors = conditions.colors_of_type(BoundaryType::Dirichlet);
        self.interpolate_boundary(conditions, &colors, false)
    }

    /// Eliminates the Dirichlet faces from an assembled operator.
    pub fn matrix_boundary(&mut self, matrix: &CsrMatrix<f64>, method: DirichletMethod) -> Result<CsrMatrix<f64>> {
        let diagonal = method.dirichlet_diagonal(self.parameters.dirichlet_penalty)?;
        self.boundary_data_mut()?.condense_matrix(matrix, diagonal)
    }

    /// Eliminates the Dirichlet values from a right-hand side assembled for the operator last
    /// passed to [`matrix_boundary`](Self::matrix_boundary).
    pub fn vector_boundary(&mut self, b: &mut DVector<f64>, conditions: &BoundaryConditions) -> Result<()> {
        let dirichlet_values = self.dirichlet_values(conditions)?;
        self.boundary_data_mut()?.condense_rhs(b, &dirichlet_values)
    }

    /// Matrix-free counterpart of [`matrix_boundary`](Self::matrix_boundary) for the operator
    /// whose product is accumulated by `apply`.
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
        let diagonal = method.dirichlet_diagonal(self.parameters.dirichlet_penalty)?;
        self.boundary_data()?.apply_condensed(du, u, diagonal, apply)
    }

    /// Assembles the symmetric Nitsche terms for the diffusion `∫ k ∇u·∇v` on the given colors.
    ///
    /// The consistency terms are `-∫_F k ∂u/∂n v - ∫_F k ∂v/∂n u`. The penalty is the boundary
    /// mass `∫_F c u v` with `c = γ |F| / |K|`.
    pub fn assemble_nitsche(&self, coefficient: CellCoefficient, colors: &[Color]) -> Result<CsrMatrix<f64>> {
        let faces = self.mesh.boundary_faces(colors)?;
        let consistency = assemble_csr(&self.nitsche_kernel(coefficient, &faces)?)?;
        let penalty_coefficients = self.nitsche_penalty_coefficients(&faces);
        let penalty = self.assemble_boundary_mass(&faces, BoundaryCoefficient::PerFace(&penalty_coefficients))?;
        Ok(&consistency + &penalty)
    }

    pub fn apply_nitsche(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        coefficient: CellCoefficient,
        colors: &[Color],
    ) -> Result<()> {
        let faces = self.mesh.boundary_faces(colors)?;
        apply_element_matrices(du, u, &self.nitsche_kernel(coefficient, &faces)?)?;
        let penalty_coefficients = self.nitsche_penalty_coefficients(&faces);
        self.apply_boundary_mass(du, u, &faces, BoundaryCoefficient::PerFace(&penalty_coefficients))
    }

    /// Accumulates the Nitsche right-hand side for the Dirichlet values `dirichlet_values`,
    /// given at every face as returned by [`dirichlet_values`](Self::dirichlet_values).
    pub fn rhs_nitsche(
        &self,
        b: &mut DVector<f64>,
        coefficient: CellCoefficient,
        colors: &[Color],
        dirichlet_values: &DVector<f64>,
    ) -> Result<()> {
        check_dimension("right-hand side", self.mesh.num_faces(), b.len())?;
        check_dimension("Dirichlet values", self.mesh.num_faces(), dirichlet_values.len())?;
        coefficient.validate(&self.mesh)?;
        let faces = self.mesh.boundary_faces(colors)?;
        for &face in &faces {
            let (cell, _) = self.mesh.cells_of_face(face);
            let flux = coefficient.value(cell) * dirichlet_values[face];
            let normal = self.mesh.face_normal(face);
            for (&dof, g) in self.cell_dofs(cell).iter().zip(self.cell_gradients(cell)) {
                b[dof] -= flux * normal.dot(g);
            }
        }
        let penalty_coefficients = self.nitsche_penalty_coefficients(&faces);
        self.apply_boundary_mass(b, dirichlet_values, &faces, BoundaryCoefficient::PerFace(&penalty_coefficients))
    }

    /// Penalty coefficients `γ |F| / |K|` at the given boundary faces, zero elsewhere.
    fn nitsche_penalty_coefficients(&self, faces: &[usize]) -> Vec<f64> {
        let mut coefficients = vec![0.0; self.mesh.num_faces()];
        for &face in faces {
            let (cell, _) = self.mesh.cells_of_face(face);
            coefficients[face] = self.parameters.nitsche_penalty * self.mesh.face_area(face) / self.mesh.cell_volume(cell);
        }
        coefficients
    }

    fn nitsche_kernel<'a>(&'a self, coefficient: CellCoefficient<'a>, faces: &[usize]) -> Result<NitscheKernel<'a>> {
        coefficient.validate(&self.mesh)?;
        Ok(NitscheKernel {
            cr1: self,
            faces: faces.to_vec(),
            coefficient,
        })
    }

    /// Accumulates the Neumann data `∫_F g v` and the Robin data `∫_F α g v`.
    pub fn rhs_boundary(&self, b: &mut DVector<f64>, conditions: &BoundaryConditions) -> Result<()> {
        self.rhs_boundary_component(b, conditions, 0, 1)
    }

    /// As [`rhs_boundary`](Self::rhs_boundary) for component `component` of an interleaved
    /// vector with `ncomp` components.
    pub(crate) fn rhs_boundary_component(
        &self,
        b: &mut DVector<f64>,
        conditions: &BoundaryConditions,
        component: usize,
        ncomp: usize,
    ) -> Result<()> {
        check_dimension("right-hand side", ncomp * self.mesh.num_faces(), b.len())?;
        for (color, condition) in conditions.iter() {
            let scale = match condition.kind() {
                BoundaryType::Dirichlet => continue,
                BoundaryType::Neumann => 1.0,
                BoundaryType::Robin => condition.coefficient().ok_or_else(|| {
                    Error::Configuration(format!("Robin condition on color {} has no coefficient", color))
                })?,
            };
            for face in self.mesh.boundary_faces(&[color])? {
                let normal = self.mesh.unit_normal(face);
                let value = condition.evaluate(component, self.mesh.face_center(face), &normal);
                b[ncomp * face + component] += scale * self.mesh.face_area(face) * value;
            }
        }
        Ok(())
    }

    /// Assembles the Robin term `∫_Γ α u v` over all Robin colors.
    pub fn assemble_robin(&self, conditions: &BoundaryConditions) -> Result<CsrMatrix<f64>> {
        let coefficients = conditions.robin_coefficients()?;
        let colors: Vec<Color> = coefficients.keys().copied().collect();
        let faces = self.mesh.boundary_faces(&colors)?;
        self.assemble_boundary_mass(&faces, BoundaryCoefficient::PerColor(&coefficients))
    }

    pub fn apply_robin(&self, du: &mut DVector<f64>, u: &DVector<f64>, conditions: &BoundaryConditions) -> Result<()> {
        let coefficients = conditions.robin_coefficients()?;
        let colors: Vec<Color> = coefficients.keys().copied().collect();
        let faces = self.mesh.boundary_faces(&colors)?;
        self.apply_boundary_mass(du, u, &faces, BoundaryCoefficient::PerColor(&coefficients))
    }

    /// Recovers the outward normal flux `∫ k ∂u/∂n` through each of the given colors.
    ///
    /// Dirichlet colors use the residual saved during elimination, or the Nitsche flux if
    /// `method` is [`DirichletMethod::Nitsche`]. Robin and Neumann colors use their data.
    pub fn boundary_normal_flux(
        &self,
        u: &DVector<f64>,
        colors: &[Color],
        conditions: &BoundaryConditions,
        coefficient: CellCoefficient,
        method: DirichletMethod,
    ) -> Result<Vec<f64>> {
        check_dimension("flux recovery argument", self.mesh.num_faces(), u.len())?;
        coefficient.validate(&self.mesh)?;
        colors
            .iter()
            .map(|&color| -> Result<f64> {
                let condition = conditions.require(color)?;
                let faces = self.mesh.boundary_faces(&[color])?;
                let data_integral = || -> f64 {
                    faces
                        .iter()
                        .map(|&face| {
                            let normal = self.mesh.unit_normal(face);
                            self.mesh.face_area(face) * condition.evaluate(0, self.mesh.face_center(face), &normal)
                        })
                        .sum()
                };
                match (condition.kind(), method) {
                    (BoundaryType::Dirichlet, DirichletMethod::Nitsche) => {
                        self.nitsche_flux(u, &faces, conditions, coefficient, color)
                    }
                    (BoundaryType::Dirichlet, _) => self.boundary_data()?.flux(color, u),
                    (BoundaryType::Neumann, _) => Ok(data_integral()),
                    (BoundaryType::Robin, _) => {
                        let alpha = condition.coefficient().ok_or_else(|| {
                            Error::Configuration(format!("Robin condition on color {} has no coefficient", color))
                        })?;
                        let trace: f64 = faces.iter().map(|&face| self.mesh.face_area(face) * u[face]).sum();
                        Ok(alpha * (data_integral() - trace))
                    }
                }
            })
            .collect()
    }

    fn nitsche_flux(
        &self,
        u: &DVector<f64>,
        faces: &[usize],
        conditions: &BoundaryConditions,
        coefficient: CellCoefficient,
        color: Color,
    ) -> Result<f64> {
        let deviation = u - self.interpolate_boundary(conditions, &[color], false)?;
        let consistency: f64 = faces
            .iter()
            .map(|&face| {
                let (cell, _) = self.mesh.cells_of_face(face);
                coefficient.value(cell) * self.cell_gradient(u, cell).dot(self.mesh.face_normal(face))
            })
            .sum();
        let mut penalty = DVector::zeros(self.mesh.num_faces());
        let penalty_coefficients = self.nitsche_penalty_coefficients(faces);
        self.apply_boundary_mass(&mut penalty, &deviation, faces, BoundaryCoefficient::PerFace(&penalty_coefficients))?;
        Ok(consistency - penalty.sum())
    }
}

/// Nitsche consistency terms of one boundary face, coupling it to the faces of its cell.
struct NitscheKernel<'a> {
    cr1: &'a Cr1,
    faces: Vec<usize>,
    coefficient: CellCoefficient<'a>,
}

impl<'a> NitscheKernel<'a> {
    fn cell(&self, element_index: usize) -> usize {
        self.cr1.mesh.cells_of_face(self.faces[element_index]).0
    }
}

impl<'a> ElementConnectivityAssembler for NitscheKernel<'a> {
    fn solution_dim(&self) -> usize {
        1
    }

    fn num_elements(&self) -> usize {
        self.faces.len()
    }

    fn num_nodes(&self) -> usize {
        self.cr1.num_dofs()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        self.cr1.num_local_dofs()
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(self.cr1.cell_dofs(self.cell(element_index)));
    }
}

impl<'a> ElementMatrixAssembler for NitscheKernel<'a> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) {
        let face = self.faces[element_index];
        let cell = self.cell(element_index);
        let mesh = &self.cr1.mesh;
        let local = mesh
            .local_face_index(cell, face)
            .expect("Boundary face belongs to its cell");
        let k = self.coefficient.value(cell);
        let normal = mesh.face_normal(face);
        for (j, g) in self.cr1.cell_gradients(cell).iter().enumerate() {
            let flux = k * normal.dot(g);
            output[(local, j)] -= flux;
            output[(j, local)] -= flux;
        }
    }
}
