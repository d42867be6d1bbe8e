use crate::{cr1_on, linear, unit_meshes, wavy_vector};
use crfem::assembly::global::{spmv, verify_operator_consistency};
use crfem::boundary::{BoundaryCondition, BoundaryConditions, BoundaryType, DirichletMethod};
use crfem::coefficient::BoundaryCoefficient;
use crfem::cr1::{Cr1, Cr1Parameters};
use crfem::fem::Fem;
use crfem::mesh::procedural::{create_unit_interval_mesh, create_unit_square_mesh, X_MAX, X_MIN, Y_MAX, Y_MIN};
use crfem::mesh::{Color, MeshError, SimplexMesh};
use crfem::Error;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, Point3};
use std::sync::Arc;
use util::solve_dense;

fn dirichlet_everywhere(mesh: &SimplexMesh) -> BoundaryConditions {
    mesh.colors().fold(BoundaryConditions::new(), |conditions, color| {
        conditions.with(color, BoundaryCondition::dirichlet(|x, _| linear(x)))
    })
}

/// Outward normal flux of `k ∇linear` through a side of the unit domain.
fn side_flux_of_linear(color: Color, dim: usize, k: f64) -> f64 {
    let gradient = [2.0, -1.5, 0.75];
    let axis = (color - 1) as usize / 2;
    let sign = if (color - 1) % 2 == 0 { -1.0 } else { 1.0 };
    assert!(axis < dim);
    sign * k * gradient[axis]
}

fn nitsche_parameters() -> Cr1Parameters {
    Cr1Parameters {
        nitsche_penalty: 10.0,
        ..Default::default()
    }
}

#[test]
fn boundary_data_partitions_the_faces() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let mut cr1 = cr1_on(&mesh);
    let data = cr1.prepare_boundary(&[X_MIN, Y_MAX], &[X_MAX]).unwrap();
    let expected = mesh.boundary_faces(&[X_MIN, Y_MAX]).unwrap();
    assert_eq!(data.dirichlet_dofs(), expected.as_slice());
    assert_eq!(data.dirichlet_dofs().len() + data.inner_dofs().len(), mesh.num_faces());
    assert!(data.inner_dofs().windows(2).all(|w| w[0] < w[1]));
    assert!(data.inner_dofs().iter().all(|&dof| !data.is_dirichlet(dof)));
    assert_eq!(data.dirichlet_colors(), &[X_MIN, Y_MAX]);

    let record = data.flux_record(X_MAX).unwrap();
    assert_eq!(record.faces(), mesh.boundary_faces(&[X_MAX]).unwrap().as_slice());
    assert!(record.restriction().is_none());
    assert!(matches!(data.flux_record(Y_MIN), Err(Error::Configuration(_))));
}

#[test]
fn strong_elimination_reproduces_linear_solutions() {
    for mesh in unit_meshes(2) {
        for method in [DirichletMethod::Strong, DirichletMethod::StrongPenalty] {
            let parameters = Cr1Parameters {
                dirichlet_penalty: 3.0,
                ..Default::default()
            };
            let mut cr1 = cr1_on(&mesh).with_parameters(parameters);
            let conditions = dirichlet_everywhere(&mesh);
            let colors: Vec<Color> = mesh.colors().collect();
            cr1.prepare_boundary(&colors, &[]).unwrap();

            let a = cr1.assemble_diffusion(1.0.into()).unwrap();
            let a = cr1.matrix_boundary(&a, method).unwrap();
            let mut b = DVector::zeros(cr1.num_dofs());
            cr1.vector_boundary(&mut b, &conditions).unwrap();

            let u = solve_dense(&a, &b).expect("eliminated system is nonsingular");
            let error = (u - cr1.interpolate(linear)).amax();
            assert!(error < 1e-10, "dim {} method {}: error {:e}", mesh.dim(), method, error);
        }
    }
}

#[test]
fn one_dimensional_problem_has_the_linear_solution() {
    let mesh = Arc::new(create_unit_interval_mesh(5));
    let mut cr1 = cr1_on(&mesh);
    let conditions = BoundaryConditions::new()
        .with(X_MIN, BoundaryCondition::homogeneous(BoundaryType::Dirichlet))
        .with(X_MAX, BoundaryCondition::dirichlet(|_, _| 1.0));
    conditions.check(&mesh).unwrap();
    cr1.prepare_boundary(&[X_MIN, X_MAX], &[X_MIN, X_MAX]).unwrap();
    let a = cr1.assemble_diffusion(1.0.into()).unwrap();
    let a = cr1.matrix_boundary(&a, DirichletMethod::Strong).unwrap();
    let mut b = DVector::zeros(cr1.num_dofs());
    cr1.vector_boundary(&mut b, &conditions).unwrap();
    let u = solve_dense(&a, &b).unwrap();

    for face in 0..mesh.num_faces() {
        assert!((u[face] - mesh.face_center(face).x).abs() < 1e-12);
    }
    let flux = cr1
        .boundary_normal_flux(&u, &[X_MIN, X_MAX], &conditions, 1.0.into(), DirichletMethod::Strong)
        .unwrap();
    assert!((flux[0] + 1.0).abs() < 1e-12);
    assert!((flux[1] - 1.0).abs() < 1e-12);
}

#[test]
fn matrix_free_elimination_matches_the_eliminated_matrix() {
    for mesh in unit_meshes(2) {
        for method in [DirichletMethod::Strong, DirichletMethod::StrongPenalty] {
            let mut cr1 = cr1_on(&mesh);
            cr1.prepare_boundary(&[X_MIN, X_MAX], &[]).unwrap();
            let a = cr1.assemble_diffusion(2.0.into()).unwrap();
            let a = cr1.matrix_boundary(&a, method).unwrap();
            let u = wavy_vector(cr1.num_dofs());
            verify_operator_consistency(
                "eliminated diffusion",
                &a,
                &u,
                |du, u| cr1.apply_with_boundary(du, u, method, |du, u| cr1.apply_diffusion(du, u, 2.0.into())),
                1e-12,
            )
            .unwrap();
        }
    }
}

#[test]
fn eliminated_matrix_keeps_the_symmetry_of_the_operator() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let mut cr1 = cr1_on(&mesh);
    cr1.prepare_boundary(&[X_MIN, Y_MIN], &[]).unwrap();
    let a = cr1.assemble_diffusion(1.0.into()).unwrap();
    for method in [DirichletMethod::Strong, DirichletMethod::StrongPenalty] {
        let condensed = DMatrix::from(&cr1.matrix_boundary(&a, method).unwrap());
        assert_matrix_eq!(condensed, condensed.transpose(), comp = abs, tol = 1e-12);
    }
}

#[test]
fn strong_flux_recovery_is_exact_for_linear_solutions() {
    for mesh in unit_meshes(2) {
        let mut cr1 = cr1_on(&mesh);
        let conditions = dirichlet_everywhere(&mesh);
        let colors: Vec<Color> = mesh.colors().collect();
        cr1.prepare_boundary(&colors, &colors).unwrap();
        let a = cr1.assemble_diffusion(3.0.into()).unwrap();
        let a = cr1.matrix_boundary(&a, DirichletMethod::Strong).unwrap();
        let mut b = DVector::zeros(cr1.num_dofs());
        cr1.vector_boundary(&mut b, &conditions).unwrap();
        let u = solve_dense(&a, &b).unwrap();

        let flux = cr1
            .boundary_normal_flux(&u, &colors, &conditions, 3.0.into(), DirichletMethod::Strong)
            .unwrap();
        for (&color, &value) in colors.iter().zip(&flux) {
            let expected = side_flux_of_linear(color, mesh.dim(), 3.0);
            assert!((value - expected).abs() < 1e-9, "color {}: {} != {}", color, value, expected);
        }
        assert!(flux.iter().sum::<f64>().abs() < 1e-9);
    }
}

#[test]
fn nitsche_terms_are_symmetric() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let cr1 = cr1_on(&mesh).with_parameters(nitsche_parameters());
    let n = DMatrix::from(&cr1.assemble_nitsche(1.0.into(), &[X_MIN, Y_MAX]).unwrap());
    assert_matrix_eq!(n, n.transpose(), comp = abs, tol = 1e-12);
}

#[test]
fn nitsche_penalty_is_a_weighted_boundary_mass() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let colors = [X_MIN, Y_MAX];
    let with_penalty = cr1_on(&mesh).with_parameters(nitsche_parameters());
    let without_penalty = cr1_on(&mesh).with_parameters(Cr1Parameters {
        nitsche_penalty: 0.0,
        ..Default::default()
    });

    let faces = mesh.boundary_faces(&colors).unwrap();
    let mut weights = vec![0.0; mesh.num_faces()];
    for &face in &faces {
        let (cell, _) = mesh.cells_of_face(face);
        weights[face] = 10.0 * mesh.face_area(face) / mesh.cell_volume(cell);
    }
    let penalty = with_penalty
        .assemble_boundary_mass(&faces, BoundaryCoefficient::PerFace(&weights))
        .unwrap();

    let difference = &with_penalty.assemble_nitsche(1.0.into(), &colors).unwrap()
        - &without_penalty.assemble_nitsche(1.0.into(), &colors).unwrap();
    assert_matrix_eq!(DMatrix::from(&difference), DMatrix::from(&penalty), comp = abs, tol = 1e-12);

    // The penalty sees the variation of the trace along a face, not only its mean
    let ud = with_penalty.dirichlet_values(&dirichlet_everywhere(&mesh)).unwrap();
    let mut b = DVector::zeros(mesh.num_faces());
    let mut b_without = DVector::zeros(mesh.num_faces());
    with_penalty.rhs_nitsche(&mut b, 1.0.into(), &colors, &ud).unwrap();
    without_penalty.rhs_nitsche(&mut b_without, 1.0.into(), &colors, &ud).unwrap();
    assert!((b - b_without - spmv(&penalty, &ud).unwrap()).amax() < 1e-12);
    let interior_neighbors = faces
        .iter()
        .flat_map(|&face| mesh.faces_of_cell(mesh.cells_of_face(face).0).to_vec())
        .filter(|&other| !mesh.is_boundary_face(other));
    let coupled = interior_neighbors
        .map(|other| penalty.get_entry(other, other).map_or(0.0, |entry| entry.into_value()))
        .fold(0.0, f64::max);
    assert!(coupled > 0.0);
}

#[test]
fn nitsche_is_consistent_for_linear_solutions() {
    for mesh in unit_meshes(2) {
        let cr1 = cr1_on(&mesh).with_parameters(nitsche_parameters());
        let conditions = dirichlet_everywhere(&mesh);
        let colors: Vec<Color> = mesh.colors().collect();
        let k = 1.5;

        let a = &cr1.assemble_diffusion(k.into()).unwrap() + &cr1.assemble_nitsche(k.into(), &colors).unwrap();
        let ud = cr1.dirichlet_values(&conditions).unwrap();
        let mut b = DVector::zeros(cr1.num_dofs());
        cr1.rhs_nitsche(&mut b, k.into(), &colors, &ud).unwrap();

        let u_exact = cr1.interpolate(linear);
        assert!((spmv(&a, &u_exact).unwrap() - &b).amax() < 1e-10);

        let u = solve_dense(&a, &b).expect("Nitsche system is nonsingular");
        assert!((&u - &u_exact).amax() < 1e-9);

        let flux = cr1
            .boundary_normal_flux(&u, &colors, &conditions, k.into(), DirichletMethod::Nitsche)
            .unwrap();
        for (&color, &value) in colors.iter().zip(&flux) {
            assert!((value - side_flux_of_linear(color, mesh.dim(), k)).abs() < 1e-8);
        }
    }
}

#[test]
fn neumann_data_reproduces_linear_solutions() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let mut cr1 = cr1_on(&mesh);
    let conditions = BoundaryConditions::new()
        .with(X_MIN, BoundaryCondition::dirichlet(|x, _| linear(x)))
        .with(X_MAX, BoundaryCondition::neumann(|_, n| 2.0 * n.x))
        .with(Y_MIN, BoundaryCondition::dirichlet(|x, _| linear(x)))
        .with(Y_MAX, BoundaryCondition::dirichlet(|x, _| linear(x)));
    conditions.check(&mesh).unwrap();
    let dirichlet = conditions.colors_of_type(BoundaryType::Dirichlet);
    cr1.prepare_boundary(&dirichlet, &[]).unwrap();

    let a = cr1.assemble_diffusion(1.0.into()).unwrap();
    let a = cr1.matrix_boundary(&a, DirichletMethod::Strong).unwrap();
    let mut b = DVector::zeros(cr1.num_dofs());
    cr1.rhs_boundary(&mut b, &conditions).unwrap();
    cr1.vector_boundary(&mut b, &conditions).unwrap();
    let u = solve_dense(&a, &b).unwrap();
    assert!((&u - cr1.interpolate(linear)).amax() < 1e-10);

    let flux = cr1
        .boundary_normal_flux(&u, &[X_MAX], &conditions, 1.0.into(), DirichletMethod::Strong)
        .unwrap();
    assert!((flux[0] - 2.0).abs() < 1e-12);
}

#[test]
fn robin_data_reproduces_solutions_constant_on_the_robin_side() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let mut cr1 = cr1_on(&mesh);
    let alpha = 4.0;
    // u = 1 + 2x has k ∂u/∂n = 2 on X_MAX, so g = u + 2 / α there
    let solution = |x: &Point3<f64>| 1.0 + 2.0 * x.x;
    let conditions = BoundaryConditions::new()
        .with(X_MIN, BoundaryCondition::dirichlet(move |x, _| solution(x)))
        .with(X_MAX, BoundaryCondition::robin(alpha, move |x, _| solution(x) + 2.0 / alpha))
        .with(Y_MIN, BoundaryCondition::dirichlet(move |x, _| solution(x)))
        .with(Y_MAX, BoundaryCondition::dirichlet(move |x, _| solution(x)));
    let dirichlet = conditions.colors_of_type(BoundaryType::Dirichlet);
    cr1.prepare_boundary(&dirichlet, &[]).unwrap();

    let a = &cr1.assemble_diffusion(1.0.into()).unwrap() + &cr1.assemble_robin(&conditions).unwrap();
    verify_operator_consistency(
        "robin",
        &cr1.assemble_robin(&conditions).unwrap(),
        &wavy_vector(cr1.num_dofs()),
        |du, u| cr1.apply_robin(du, u, &conditions),
        1e-12,
    )
    .unwrap();
    let a = cr1.matrix_boundary(&a, DirichletMethod::Strong).unwrap();
    let mut b = DVector::zeros(cr1.num_dofs());
    cr1.rhs_boundary(&mut b, &conditions).unwrap();
    cr1.vector_boundary(&mut b, &conditions).unwrap();
    let u = solve_dense(&a, &b).unwrap();
    assert!((&u - cr1.interpolate(solution)).amax() < 1e-10);

    let flux = cr1
        .boundary_normal_flux(&u, &[X_MAX], &conditions, 1.0.into(), DirichletMethod::Strong)
        .unwrap();
    assert!((flux[0] - 2.0).abs() < 1e-10);
}

#[test]
fn full_boundary_interpolation_covers_boundary_cells() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let cr1 = cr1_on(&mesh);
    let conditions = dirichlet_everywhere(&mesh);
    let lumped = cr1.interpolate_boundary(&conditions, &[X_MIN], true).unwrap();
    let full = cr1.interpolate_boundary(&conditions, &[X_MIN], false).unwrap();
    let exact = cr1.interpolate(linear);

    for face in 0..mesh.num_faces() {
        if mesh.face_color(face) == Some(X_MIN) {
            assert_eq!(lumped[face], exact[face]);
        } else {
            assert_eq!(lumped[face], 0.0);
        }
    }
    for face in mesh.boundary_faces(&[X_MIN]).unwrap() {
        let (cell, _) = mesh.cells_of_face(face);
        for &other in mesh.faces_of_cell(cell) {
            assert_eq!(full[other], exact[other]);
        }
    }
}

#[test]
fn misuse_of_the_boundary_workflow_is_reported() {
    let mesh = Arc::new(create_unit_square_mesh(2));
    let mut cr1 = Cr1::new(mesh.clone());
    let a = cr1.assemble_diffusion(1.0.into()).unwrap();
    let conditions = dirichlet_everywhere(&mesh);
    let mut b = DVector::zeros(cr1.num_dofs());

    assert!(matches!(
        cr1.matrix_boundary(&a, DirichletMethod::Strong),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        cr1.prepare_boundary(&[42], &[]),
        Err(Error::Mesh(MeshError::UnknownColor(42)))
    ));

    cr1.prepare_boundary(&[X_MIN], &[]).unwrap();
    assert!(matches!(
        cr1.vector_boundary(&mut b, &conditions),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        cr1.matrix_boundary(&a, DirichletMethod::Nitsche),
        Err(Error::Configuration(_))
    ));
    let u = DVector::zeros(cr1.num_dofs());
    assert!(matches!(
        cr1.boundary_normal_flux(&u, &[X_MIN], &conditions, 1.0.into(), DirichletMethod::Strong),
        Err(Error::Configuration(_))
    ));

    let incomplete = BoundaryConditions::new().with(X_MIN, BoundaryCondition::dirichlet(|_, _| 0.0));
    assert!(matches!(incomplete.check(&mesh), Err(Error::Configuration(_))));

    let robin = BoundaryConditions::new().with(X_MAX, BoundaryCondition::homogeneous(BoundaryType::Robin));
    assert!(matches!(cr1.rhs_boundary(&mut b, &robin), Err(Error::Configuration(_))));
    assert!(matches!(cr1.assemble_robin(&robin), Err(Error::Configuration(_))));
}
