use nalgebra::DMatrixViewMut;

/// Connectivity of a collection of elements.
///
/// An element is any set of nodes coupled by a dense local matrix: a cell, a boundary face
/// together with the faces of its cell, or the union of the faces of two neighboring cells.
/// Nodes carry `solution_dim` degrees of freedom each, numbered `solution_dim * node + s`.
pub trait ElementConnectivityAssembler {
    fn solution_dim(&self) -> usize;

    fn num_elements(&self) -> usize;

    fn num_nodes(&self) -> usize;

    fn element_node_count(&self, element_index: usize) -> usize;

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize);

    /// Total number of degrees of freedom.
    fn num_dofs(&self) -> usize {
        self.solution_dim() * self.num_nodes()
    }
}

pub trait ElementMatrixAssembler: ElementConnectivityAssembler {
    /// Writes the local matrix of the element into `output`, which is zeroed beforehand and has
    /// `solution_dim * element_node_count` rows and columns.
    fn assemble_element_matrix_into(&self, element_index: usize, output: DMatrixViewMut<f64>);
}

/// Expands node indices into interleaved degree of freedom indices.
pub fn populate_element_dofs(output: &mut Vec<usize>, nodes: &[usize], solution_dim: usize) {
    output.clear();
    output.extend(
        nodes
            .iter()
            .flat_map(|&node| (0..solution_dim).map(move |s| solution_dim * node + s)),
    );
}
