use crate::assembly::local::{populate_element_dofs, ElementConnectivityAssembler, ElementMatrixAssembler};
use crate::{check_dimension, Error, Result};
use log::trace;
use nalgebra::{DMatrix, DMatrixViewMut, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::collections::BTreeSet;

/// Index arena mapping local element matrix entries to positions in a CSR matrix.
///
/// For every element, the stencil stores the global row and column index of each entry of the
/// (row-major) element matrix, together with the position of that entry in the compressed
/// sparsity pattern. It is computed once per mesh binding and reused by every assembly with
/// the same connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stencil {
    num_rows: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    block_offsets: Vec<usize>,
    offsets: Vec<usize>,
    column_indices: Vec<usize>,
    positions: Vec<usize>,
}

impl Stencil {
    pub fn from_assembler(element_assembler: &dyn ElementConnectivityAssembler) -> Self {
        let sdim = element_assembler.solution_dim();
        let num_rows = element_assembler.num_dofs();
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut block_offsets = Vec::with_capacity(element_assembler.num_elements() + 1);
        block_offsets.push(0);

        let mut element_nodes = Vec::new();
        let mut element_dofs = Vec::new();
        for i in 0..element_assembler.num_elements() {
            element_nodes.resize(element_assembler.element_node_count(i), 0);
            element_assembler.populate_element_nodes(&mut element_nodes, i);
            populate_element_dofs(&mut element_dofs, &element_nodes, sdim);
            for &row in &element_dofs {
                for &col in &element_dofs {
                    rows.push(row);
                    cols.push(col);
                }
            }
            block_offsets.push(rows.len());
        }

        // Each matrix entry is stored exactly once in the pattern, regardless of how many
        // elements contribute to it.
        let matrix_entries: BTreeSet<(usize, usize)> = rows.iter().copied().zip(cols.iter().copied()).collect();
        let mut offsets = Vec::with_capacity(num_rows + 1);
        let mut column_indices = Vec::with_capacity(matrix_entries.len());
        offsets.push(0);
        for (i, j) in matrix_entries {
            while i + 1 > offsets.len() {
                offsets.push(column_indices.len());
            }
            column_indices.push(j);
        }
        while offsets.len() < num_rows + 1 {
            offsets.push(column_indices.len());
        }

        let positions = rows
            .iter()
            .zip(&cols)
            .map(|(&i, &j)| {
                let row = &column_indices[offsets[i]..offsets[i + 1]];
                offsets[i]
                    + row
                        .binary_search(&j)
                        .expect("Every stencil entry is part of the pattern")
            })
            .collect();

        Self {
            num_rows,
            rows,
            cols,
            block_offsets,
            offsets,
            column_indices,
            positions,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_elements(&self) -> usize {
        self.block_offsets.len() - 1
    }

    /// Global row index of every local entry, element by element.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Global column index of every local entry, element by element.
    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    /// Number of structural non-zeros of assembled matrices.
    pub fn nnz(&self) -> usize {
        self.column_indices.len()
    }

    /// Assembles the element matrices of `element_assembler`, which must have the connectivity
    /// the stencil was built from.
    pub fn assemble(&self, element_assembler: &dyn ElementMatrixAssembler) -> Result<CsrMatrix<f64>> {
        check_dimension("stencil elements", self.num_elements(), element_assembler.num_elements())?;
        check_dimension("stencil rows", self.num_rows, element_assembler.num_dofs())?;
        let sdim = element_assembler.solution_dim();
        let mut values = vec![0.0; self.nnz()];
        let mut element_matrix = DMatrix::zeros(0, 0);
        for i in 0..self.num_elements() {
            let block = self.block_offsets[i]..self.block_offsets[i + 1];
            let n = sdim * element_assembler.element_node_count(i);
            check_dimension("stencil element block", block.len(), n * n)?;

            element_matrix.resize_mut(n, n, 0.0);
            element_matrix.fill(0.0);
            element_assembler.assemble_element_matrix_into(i, DMatrixViewMut::from(&mut element_matrix));
            for (k, &position) in self.positions[block].iter().enumerate() {
                values[position] += element_matrix[(k / n, k % n)];
            }
        }
        trace!("Assembled {0}x{0} matrix with {1} non-zeros", self.num_rows, self.nnz());
        let matrix = CsrMatrix::try_from_csr_data(
            self.num_rows,
            self.num_rows,
            self.offsets.clone(),
            self.column_indices.clone(),
            values,
        )
        .expect("Stencil always holds a valid CSR pattern");
        Ok(matrix)
    }
}

/// Assembles the element matrices into a CSR matrix with a pattern built on the fly.
pub fn assemble_csr(element_assembler: &dyn ElementMatrixAssembler) -> Result<CsrMatrix<f64>> {
    Stencil::from_assembler(element_assembler).assemble(element_assembler)
}

/// Accumulates `du += A u` where `A` is the sum of the element matrices, without forming `A`.
pub fn apply_element_matrices(
    du: &mut DVector<f64>,
    u: &DVector<f64>,
    element_assembler: &dyn ElementMatrixAssembler,
) -> Result<()> {
    let num_dofs = element_assembler.num_dofs();
    check_dimension("operator argument", num_dofs, u.len())?;
    check_dimension("operator result", num_dofs, du.len())?;
    let sdim = element_assembler.solution_dim();

    let mut element_nodes = Vec::new();
    let mut element_dofs = Vec::new();
    let mut element_matrix = DMatrix::zeros(0, 0);
    for i in 0..element_assembler.num_elements() {
        element_nodes.resize(element_assembler.element_node_count(i), 0);
        element_assembler.populate_element_nodes(&mut element_nodes, i);
        populate_element_dofs(&mut element_dofs, &element_nodes, sdim);
        let n = element_dofs.len();

        element_matrix.resize_mut(n, n, 0.0);
        element_matrix.fill(0.0);
        element_assembler.assemble_element_matrix_into(i, DMatrixViewMut::from(&mut element_matrix));

        let u_local = gather_global_to_local(u, &element_dofs);
        let du_local = &element_matrix * u_local;
        for (&dof, value) in element_dofs.iter().zip(du_local.iter()) {
            du[dof] += value;
        }
    }
    Ok(())
}

pub fn gather_global_to_local(global: &DVector<f64>, dofs: &[usize]) -> DVector<f64> {
    DVector::from_iterator(dofs.len(), dofs.iter().map(|&dof| global[dof]))
}

/// Sparse matrix-vector product.
pub fn spmv(matrix: &CsrMatrix<f64>, x: &DVector<f64>) -> Result<DVector<f64>> {
    check_dimension("matrix-vector product argument", matrix.ncols(), x.len())?;
    Ok(DVector::from_iterator(
        matrix.nrows(),
        matrix.row_iter().map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, v)| v * x[j])
                .sum::<f64>()
        }),
    ))
}

/// Computes `A ⊗ I` for the `ncomp x ncomp` identity `I`, i.e. the matrix acting on
/// interleaved vectors `u[ncomp * i + c]` by applying `A` to every component.
///
/// The block pattern is built directly from the pattern of `A`.
pub fn kron_identity(matrix: &CsrMatrix<f64>, ncomp: usize) -> CsrMatrix<f64> {
    let mut offsets = Vec::with_capacity(ncomp * matrix.nrows() + 1);
    let mut column_indices = Vec::with_capacity(ncomp * matrix.nnz());
    let mut values = Vec::with_capacity(ncomp * matrix.nnz());
    offsets.push(0);
    for row in matrix.row_iter() {
        for c in 0..ncomp {
            for (&j, &v) in row.col_indices().iter().zip(row.values()) {
                column_indices.push(ncomp * j + c);
                values.push(v);
            }
            offsets.push(column_indices.len());
        }
    }
    CsrMatrix::try_from_csr_data(
        ncomp * matrix.nrows(),
        ncomp * matrix.ncols(),
        offsets,
        column_indices,
        values,
    )
    .expect("Kronecker product of a valid CSR matrix is valid")
}

/// Extracts the given rows of a matrix, keeping all columns.
pub fn restrict_rows(matrix: &CsrMatrix<f64>, rows: &[usize]) -> CsrMatrix<f64> {
    let mut offsets = Vec::with_capacity(rows.len() + 1);
    let mut column_indices = Vec::new();
    let mut values = Vec::new();
    offsets.push(0);
    for &i in rows {
        let row = matrix.row(i);
        column_indices.extend_from_slice(row.col_indices());
        values.extend_from_slice(row.values());
        offsets.push(column_indices.len());
    }
    CsrMatrix::try_from_csr_data(rows.len(), matrix.ncols(), offsets, column_indices, values)
        .expect("Rows of a valid CSR matrix form a valid CSR matrix")
}

/// Treatment of the Dirichlet block when condensing a matrix.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DirichletDiagonal {
    /// The Dirichlet block is replaced by the identity.
    Identity,
    /// The Dirichlet block is kept and scaled by the given factor.
    ScaledBlock(f64),
}

/// Result of symmetrically eliminating Dirichlet degrees of freedom from a matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Condensation {
    /// Inner-inner block plus the treated Dirichlet block. Inner-Dirichlet couplings are zero.
    pub matrix: CsrMatrix<f64>,
    /// Entries `a_ij` with `i` inner and `j` Dirichlet, full size.
    pub inner_dirichlet: CsrMatrix<f64>,
    /// Entries `a_ij` with `i` and `j` Dirichlet, full size.
    pub dirichlet_dirichlet: CsrMatrix<f64>,
}

/// Eliminates the rows and columns of Dirichlet degrees of freedom.
pub fn condense_dirichlet(
    matrix: &CsrMatrix<f64>,
    is_dirichlet: &[bool],
    diagonal: DirichletDiagonal,
) -> Result<Condensation> {
    let n = matrix.nrows();
    check_dimension("condensed matrix columns", n, matrix.ncols())?;
    check_dimension("Dirichlet mask", n, is_dirichlet.len())?;

    let mut condensed = CooMatrix::new(n, n);
    let mut inner_dirichlet = CooMatrix::new(n, n);
    let mut dirichlet_dirichlet = CooMatrix::new(n, n);
    for (i, j, &v) in matrix.triplet_iter() {
        match (is_dirichlet[i], is_dirichlet[j]) {
            (false, false) => condensed.push(i, j, v),
            (false, true) => inner_dirichlet.push(i, j, v),
            (true, true) => {
                dirichlet_dirichlet.push(i, j, v);
                if let DirichletDiagonal::ScaledBlock(scale) = diagonal {
                    condensed.push(i, j, scale * v);
                }
            }
            (true, false) => {}
        }
    }
    if diagonal == DirichletDiagonal::Identity {
        for (i, _) in is_dirichlet.iter().enumerate().filter(|&(_, &d)| d) {
            condensed.push(i, i, 1.0);
        }
    }
    Ok(Condensation {
        matrix: CsrMatrix::from(&condensed),
        inner_dirichlet: CsrMatrix::from(&inner_dirichlet),
        dirichlet_dirichlet: CsrMatrix::from(&dirichlet_dirichlet),
    })
}

/// Checks that a matrix-free evaluation agrees with its assembled counterpart on `u`.
///
/// The deviation is measured in the maximum norm relative to `max(1, |A u|_max)`.
pub fn verify_operator_consistency<F>(
    context: &str,
    matrix: &CsrMatrix<f64>,
    u: &DVector<f64>,
    apply: F,
    tolerance: f64,
) -> Result<()>
where
    F: FnOnce(&mut DVector<f64>, &DVector<f64>) -> Result<()>,
{
    check_dimension("consistency check argument", matrix.ncols(), u.len())?;
    let expected = spmv(matrix, u)?;
    let mut actual = DVector::zeros(matrix.nrows());
    apply(&mut actual, u)?;
    let deviation = (&expected - &actual).amax() / expected.amax().max(1.0);
    if deviation > tolerance {
        Err(Error::Consistency {
            context: context.to_string(),
            deviation,
        })
    } else {
        Ok(())
    }
}
