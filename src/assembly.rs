//! Generic assembly of sparse operators from local element contributions.
//!
//! Element kernels implement [`local::ElementMatrixAssembler`]. The same kernel is used to
//! assemble a CSR matrix through a [`global::Stencil`] and to evaluate the operator
//! matrix-free through [`global::apply_element_matrices`].
pub mod global;
pub mod local;
