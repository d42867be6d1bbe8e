//! Error estimation and postprocessing of CR1 solutions.
use crate::coefficient::CellCoefficient;
use crate::cr1::Cr1;
use crate::fem::Fem;
use crate::{check_dimension, Result};
use crfem_mesh::Color;
use nalgebra::{DVector, Point3, Vector3};

/// Discrete L2 error `sqrt(eᵀ M e)` of the face interpolation error `e`.
pub fn estimate_l2_error<S>(cr1: &Cr1, solution: S, u_h: &DVector<f64>) -> Result<f64>
where
    S: Fn(&Point3<f64>) -> f64,
{
    check_dimension("solution", cr1.num_dofs(), u_h.len())?;
    let error = cr1.interpolate(solution) - u_h;
    let mut mass_error = DVector::zeros(error.len());
    cr1.mass_dot(&mut mass_error, &error, 1.0.into())?;
    Ok(error.dot(&mass_error).max(0.0).sqrt())
}

/// L2 error of the cell means against the solution at the cell barycenters.
pub fn estimate_l2_error_cell<S>(cr1: &Cr1, solution: S, u_h: &DVector<f64>) -> Result<f64>
where
    S: Fn(&Point3<f64>) -> f64,
{
    check_dimension("solution", cr1.num_dofs(), u_h.len())?;
    let mesh = cr1.mesh();
    let sum: f64 = (0..mesh.num_cells())
        .map(|cell| {
            let error = solution(mesh.cell_center(cell)) - cr1.cell_mean(u_h, cell);
            mesh.cell_volume(cell) * error * error
        })
        .sum();
    Ok(sum.sqrt())
}

/// Error `sqrt(∫ k |∇u - ∇u_h|²)` of the broken gradient, with the exact gradient evaluated at
/// the cell barycenters.
pub fn estimate_flux_error<G>(cr1: &Cr1, gradient: G, u_h: &DVector<f64>, coefficient: CellCoefficient) -> Result<f64>
where
    G: Fn(&Point3<f64>) -> Vector3<f64>,
{
    check_dimension("solution", cr1.num_dofs(), u_h.len())?;
    coefficient.validate(cr1.mesh())?;
    let mesh = cr1.mesh();
    let sum: f64 = (0..mesh.num_cells())
        .map(|cell| {
            let error = gradient(mesh.cell_center(cell)) - cr1.cell_gradient(u_h, cell);
            coefficient.value(cell) * mesh.cell_volume(cell) * error.norm_squared()
        })
        .sum();
    Ok(sum.sqrt())
}

/// Mean value of a solution over each of the given colors.
pub fn boundary_mean(cr1: &Cr1, u_h: &DVector<f64>, colors: &[Color]) -> Result<Vec<f64>> {
    check_dimension("solution", cr1.num_dofs(), u_h.len())?;
    let mesh = cr1.mesh();
    colors
        .iter()
        .map(|&color| -> Result<f64> {
            let faces = mesh.boundary_faces(&[color])?;
            let (integral, measure) = faces.iter().fold((0.0, 0.0), |(integral, measure), &face| {
                let area = mesh.face_area(face);
                (integral + area * u_h[face], measure + area)
            });
            Ok(integral / measure)
        })
        .collect()
}

/// Values at the mesh vertices, averaged over the cells sharing a vertex.
///
/// On a cell the value at vertex `i` is `Σ_j u_j - d u_i`, with `u_i` the value at the face
/// opposite to the vertex.
pub fn to_nodes(cr1: &Cr1, u_h: &DVector<f64>) -> Result<DVector<f64>> {
    check_dimension("solution", cr1.num_dofs(), u_h.len())?;
    let mesh = cr1.mesh();
    let d = mesh.dim() as f64;
    let mut values = DVector::zeros(mesh.num_points());
    let mut counts = vec![0usize; mesh.num_points()];
    for cell in 0..mesh.num_cells() {
        let faces = mesh.faces_of_cell(cell);
        let sum: f64 = faces.iter().map(|&face| u_h[face]).sum();
        for (&vertex, &face) in mesh.simplex(cell).iter().zip(faces) {
            values[vertex] += sum - d * u_h[face];
            counts[vertex] += 1;
        }
    }
    for (value, &count) in values.iter_mut().zip(&counts) {
        if count > 0 {
            *value /= count as f64;
        }
    }
    Ok(values)
}
