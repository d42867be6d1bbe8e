//! Use the method of manufactured solutions on a 2D Poisson problem to verify convergence.
//!
//! The problem is
//!   - Delta u = f in the unit square, u = u_exact on the boundary,
//! with u_exact = sin(pi x) sin(pi y) + x.
use std::f64::consts::PI;
use std::sync::Arc;

use eyre::eyre;
use nalgebra::{DVector, Point3};

use crfem::boundary::{BoundaryCondition, BoundaryConditions, DirichletMethod};
use crfem::cr1::{Cr1, Cr1Parameters};
use crfem::error::estimate_l2_error;
use crfem::fem::Fem;
use crfem::mesh::procedural::create_unit_square_mesh;
use crfem::mesh::Color;
use util::{convergence_rates, solve_dense};

fn u_exact(x: &Point3<f64>) -> f64 {
    (PI * x.x).sin() * (PI * x.y).sin() + x.x
}

fn f(x: &Point3<f64>) -> f64 {
    2.0 * PI * PI * (PI * x.x).sin() * (PI * x.y).sin()
}

/// Solves on a uniform mesh, returning the discrete L2 error and the solution.
fn solve_poisson(cells_per_dim: usize, method: DirichletMethod, nitsche_penalty: f64) -> eyre::Result<(f64, DVector<f64>)> {
    let mesh = Arc::new(create_unit_square_mesh(cells_per_dim));
    let parameters = Cr1Parameters {
        nitsche_penalty,
        ..Default::default()
    };
    let mut cr1 = Cr1::new(mesh.clone()).with_parameters(parameters);
    let colors: Vec<Color> = mesh.colors().collect();
    let conditions = colors.iter().fold(BoundaryConditions::new(), |conditions, &color| {
        conditions.with(color, BoundaryCondition::dirichlet(|x, _| u_exact(x)))
    });

    let a = cr1.assemble_diffusion(1.0.into())?;
    let mut b = DVector::zeros(cr1.num_dofs());
    cr1.mass_dot(&mut b, &cr1.interpolate(f), 1.0.into())?;

    let u_h = match method {
        DirichletMethod::Nitsche => {
            let a = &a + &cr1.assemble_nitsche(1.0.into(), &colors)?;
            let ud = cr1.dirichlet_values(&conditions)?;
            cr1.rhs_nitsche(&mut b, 1.0.into(), &colors, &ud)?;
            solve_dense(&a, &b)
        }
        DirichletMethod::Strong | DirichletMethod::StrongPenalty => {
            cr1.prepare_boundary(&colors, &[])?;
            let a = cr1.matrix_boundary(&a, method)?;
            cr1.vector_boundary(&mut b, &conditions)?;
            solve_dense(&a, &b)
        }
    }
    .ok_or_else(|| eyre!("Failed to solve linear system"))?;

    let l2_error = estimate_l2_error(&cr1, u_exact, &u_h)?;
    Ok((l2_error, u_h))
}

fn check_second_order(method: DirichletMethod) -> eyre::Result<()> {
    let resolutions = [2, 4, 8, 16];
    let mut mesh_sizes = Vec::new();
    let mut errors = Vec::new();
    for &cells_per_dim in &resolutions {
        let (error, _) = solve_poisson(cells_per_dim, method, 10.0)?;
        println!("{} res {}: L2 error {:e}", method, cells_per_dim, error);
        mesh_sizes.push(1.0 / cells_per_dim as f64);
        errors.push(error);
    }

    let rates = convergence_rates(&mesh_sizes, &errors);
    println!("{} rates: {:?}", method, rates);
    let finest = rates[rates.len() - 1];
    assert!(finest > 1.7, "observed rate {} for {}", finest, method);
    Ok(())
}

#[test]
fn poisson_2d_strong() -> eyre::Result<()> {
    check_second_order(DirichletMethod::Strong)
}

#[test]
fn poisson_2d_strong_penalty() -> eyre::Result<()> {
    check_second_order(DirichletMethod::StrongPenalty)
}

#[test]
fn poisson_2d_nitsche() -> eyre::Result<()> {
    check_second_order(DirichletMethod::Nitsche)
}

#[test]
fn nitsche_approaches_strong_elimination_for_large_penalties() -> eyre::Result<()> {
    let mesh = create_unit_square_mesh(4);
    let boundary_faces: Vec<usize> = (0..mesh.num_faces())
        .filter(|&face| mesh.is_boundary_face(face))
        .collect();
    let (_, strong) = solve_poisson(4, DirichletMethod::Strong, 0.0)?;
    let gaps = [1e2, 1e3, 1e4, 1e5]
        .iter()
        .map(|&penalty| -> eyre::Result<f64> {
            let (_, nitsche) = solve_poisson(4, DirichletMethod::Nitsche, penalty)?;
            Ok(boundary_faces
                .iter()
                .map(|&face| (nitsche[face] - strong[face]).abs())
                .fold(0.0, f64::max))
        })
        .collect::<eyre::Result<Vec<_>>>()?;
    println!("gaps: {:?}", gaps);

    // A finite penalty does not impose the data exactly
    assert!(gaps[0] > 1e-8);
    assert!(gaps.windows(2).all(|w| w[1] < w[0]));
    assert!(gaps[3] < 0.05 * gaps[0]);
    Ok(())
}
