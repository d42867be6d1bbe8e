use crate::{cr1_on, wavy_vector};
use crfem::assembly::global::{spmv, verify_operator_consistency};
use crfem::boundary::{BoundaryCondition, BoundaryConditions, BoundaryType};
use crfem::coefficient::BoundaryCoefficient;
use crfem::convection::{CenteredDerivation, ConvectionData, ConvectionMethod, JumpMode};
use crfem::cr1::Cr1;
use crfem::fem::Fem;
use crfem::mesh::procedural::{
    create_rectangle_triangle_mesh, create_unit_cube_mesh, create_unit_square_mesh, X_MAX, X_MIN, Y_MAX, Y_MIN,
};
use crfem::mesh::SimplexMesh;
use crfem::Error;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, Point3, Vector3};
use std::sync::Arc;

fn constant_velocity(_: &Point3<f64>) -> Vector3<f64> {
    Vector3::new(1.0, 0.5, 0.25)
}

fn rotating_velocity(x: &Point3<f64>) -> Vector3<f64> {
    Vector3::new(0.5 - x.y, x.x - 0.5, 0.0)
}

/// A velocity with non-zero divergence.
fn compressing_velocity(x: &Point3<f64>) -> Vector3<f64> {
    Vector3::new(x.x * x.x, -x.y, 0.3)
}

fn meshes() -> Vec<Arc<SimplexMesh>> {
    vec![
        Arc::new(create_unit_square_mesh(3)),
        Arc::new(create_unit_cube_mesh(2)),
    ]
}

fn prepare(cr1: &Cr1, velocity: fn(&Point3<f64>) -> Vector3<f64>, method: ConvectionMethod) -> ConvectionData {
    cr1.prepare_convection_data(cr1.face_velocity(velocity), method, 0.1)
        .unwrap()
}

fn dense_convection(cr1: &Cr1, data: &ConvectionData) -> DMatrix<f64> {
    DMatrix::from(&cr1.assemble_convection(data).unwrap())
}

fn dense_centered(cr1: &Cr1, data: &ConvectionData, derivation: CenteredDerivation) -> DMatrix<f64> {
    DMatrix::from(&cr1.assemble_convection_centered(data, derivation).unwrap())
}

#[test]
fn jump_modes_are_related() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        let face_velocity = cr1.face_velocity(compressing_velocity);
        let jump = |mode| DMatrix::from(&cr1.assemble_jump(&face_velocity, mode).unwrap());
        let primal = jump(JumpMode::Primal);
        let dual = jump(JumpMode::Dual);
        let centered = jump(JumpMode::Centered);
        assert_matrix_eq!(dual - centered, primal, comp = abs, tol = 1e-13);
    }
}

#[test]
fn jumps_vanish_on_continuous_functions() {
    // Linear functions are continuous across faces
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        let face_velocity = cr1.face_velocity(compressing_velocity);
        let u = cr1.interpolate(|x| 1.0 + x.x - 2.0 * x.y + x.z);
        let jump = |mode| spmv(&cr1.assemble_jump(&face_velocity, mode).unwrap(), &u).unwrap();
        assert!(jump(JumpMode::Primal).amax() < 1e-12);

        // The dual mode carries the centered flux on top of the jump
        let centered = jump(JumpMode::Centered);
        assert!(centered.amax() > 1e-8);
        assert!((jump(JumpMode::Dual) - centered).amax() < 1e-12);
    }
}

#[test]
fn upwind_derivations_agree_for_divergence_free_velocities() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        for velocity in [constant_velocity as fn(&Point3<f64>) -> Vector3<f64>, rotating_velocity] {
            let upwind = dense_convection(&cr1, &prepare(&cr1, velocity, ConvectionMethod::Upwind));
            let upwind_alt = dense_convection(&cr1, &prepare(&cr1, velocity, ConvectionMethod::UpwindAlt));
            assert_matrix_eq!(upwind, upwind_alt, comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn centered_derivations_agree_for_divergence_free_velocities() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        for velocity in [constant_velocity as fn(&Point3<f64>) -> Vector3<f64>, rotating_velocity] {
            let data = prepare(&cr1, velocity, ConvectionMethod::Upwind);
            let cellwise = dense_centered(&cr1, &data, CenteredDerivation::CellWise);
            let face_jump = dense_centered(&cr1, &data, CenteredDerivation::FaceJump);
            assert_matrix_eq!(cellwise, face_jump, comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn upwinding_adds_the_primal_jump_to_the_centered_operator() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let cr1 = cr1_on(&mesh);
    let data = prepare(&cr1, rotating_velocity, ConvectionMethod::Upwind);
    let upwind = dense_convection(&cr1, &data);
    let centered = dense_centered(&cr1, &data, CenteredDerivation::CellWise);
    let jump = DMatrix::from(&cr1.assemble_jump(data.face_velocity(), JumpMode::Primal).unwrap());
    assert_matrix_eq!(upwind - centered, jump, comp = abs, tol = 1e-12);
}

#[test]
fn upwind_variants_evaluate_at_the_centroid() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        for method in [ConvectionMethod::Upwind, ConvectionMethod::UpwindAlt] {
            let data = prepare(&cr1, compressing_velocity, method);
            let moved = cr1.moved_point_weights(data.cell_velocity());
            let with_moved = data.clone().with_moved_point_weights(moved).unwrap();
            assert_matrix_eq!(
                dense_convection(&cr1, &with_moved),
                dense_convection(&cr1, &data),
                comp = abs,
                tol = 1e-14
            );
        }

        // Only SUPG moves the evaluation point
        let upwind = dense_convection(&cr1, &prepare(&cr1, compressing_velocity, ConvectionMethod::Upwind));
        let supg = dense_convection(&cr1, &prepare(&cr1, compressing_velocity, ConvectionMethod::Supg));
        assert!((upwind - supg).amax() > 1e-8);
    }
}

#[test]
fn upwinding_adds_the_primal_jump_for_compressible_velocities() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        let data = prepare(&cr1, compressing_velocity, ConvectionMethod::Upwind);
        let upwind = dense_convection(&cr1, &data);
        let jump = DMatrix::from(&cr1.assemble_jump(data.face_velocity(), JumpMode::Primal).unwrap());

        // Centroid weights with the face normal velocity as transport
        let mut expected = jump;
        let nloc = mesh.dim() + 1;
        for cell in 0..mesh.num_cells() {
            let faces = mesh.faces_of_cell(cell);
            let sigma = mesh.cell_orientation(cell);
            for i in 0..nloc {
                for j in 0..nloc {
                    let flux = sigma[j] * mesh.face_area(faces[j]) * data.face_velocity()[faces[j]];
                    expected[(faces[i], faces[j])] += flux / nloc as f64;
                }
            }
        }
        for face in (0..mesh.num_faces()).filter(|&f| mesh.is_boundary_face(f)) {
            let inflow = -data.face_velocity()[face].min(0.0);
            let boundary_mass = cr1
                .assemble_boundary_mass(&[face], BoundaryCoefficient::Uniform(inflow))
                .unwrap();
            expected += DMatrix::from(&boundary_mass);
        }
        assert_matrix_eq!(upwind, expected, comp = abs, tol = 1e-12);
    }
}

#[test]
fn centered_convection_is_exact_on_constants() {
    // ∫ β·∇1 v = 0, and the inflow term only sees the trace
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        let data = prepare(&cr1, rotating_velocity, ConvectionMethod::Upwind);
        let c = cr1
            .assemble_convection_centered(&data, CenteredDerivation::CellWise)
            .unwrap();
        let boundary: Vec<usize> = (0..mesh.num_faces())
            .filter(|&f| mesh.is_boundary_face(f))
            .collect();
        let ones = DVector::repeat(cr1.num_dofs(), 1.0);
        let mut expected = DVector::zeros(cr1.num_dofs());
        let coefficients: Vec<f64> = data.face_velocity().iter().map(|bn| -bn.min(0.0)).collect();
        cr1.apply_boundary_mass(
            &mut expected,
            &ones,
            &boundary,
            crfem::coefficient::BoundaryCoefficient::PerFace(&coefficients),
        )
        .unwrap();
        assert!((spmv(&c, &ones).unwrap() - expected).amax() < 1e-12);
    }
}

#[test]
fn supg_with_centroid_weights_reduces_to_upwind() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        let nloc = mesh.dim() + 1;
        let centroid = vec![1.0 / nloc as f64; nloc * mesh.num_cells()];
        let supg = prepare(&cr1, constant_velocity, ConvectionMethod::Supg)
            .with_moved_point_weights(centroid)
            .unwrap();
        let upwind = prepare(&cr1, constant_velocity, ConvectionMethod::Upwind);
        assert_matrix_eq!(
            dense_convection(&cr1, &supg),
            dense_convection(&cr1, &upwind),
            comp = abs,
            tol = 1e-12
        );
    }
}

#[test]
fn moved_points_lie_on_the_cell_boundary() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        let nloc = mesh.dim() + 1;
        for method in [ConvectionMethod::Supg, ConvectionMethod::SupgAlt] {
            let data = prepare(&cr1, rotating_velocity, method);
            let weights = data.moved_point_weights().unwrap();
            assert_eq!(weights.len(), nloc * mesh.num_cells());
            for cell_weights in weights.chunks(nloc) {
                assert!((cell_weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
                assert!(cell_weights.iter().all(|&w| (-1e-14..=1.0 + 1e-14).contains(&w)));
            }
        }

        let data = prepare(&cr1, constant_velocity, ConvectionMethod::Supg);
        for cell_weights in data.moved_point_weights().unwrap().chunks(nloc) {
            let smallest = cell_weights.iter().copied().fold(f64::INFINITY, f64::min);
            assert!(smallest.abs() < 1e-12);
        }
    }
}

#[test]
fn resting_fluid_keeps_the_centroid() {
    let mesh = Arc::new(create_unit_square_mesh(2));
    let cr1 = cr1_on(&mesh);
    let weights = cr1.moved_point_weights(&vec![Vector3::zeros(); mesh.num_cells()]);
    assert!(weights.iter().all(|&w| (w - 1.0 / 3.0).abs() < 1e-15));
}

#[test]
fn local_projection_without_penalty_is_centered() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        let face_velocity = cr1.face_velocity(rotating_velocity);
        let data = cr1
            .prepare_convection_data(face_velocity, ConvectionMethod::LocalProjection, 0.0)
            .unwrap();
        let centered = dense_centered(&cr1, &data, CenteredDerivation::CellWise);
        assert_matrix_eq!(dense_convection(&cr1, &data), centered, comp = abs, tol = 1e-14);

        let stabilized = data.with_lps_parameter(0.5);
        let difference = dense_convection(&cr1, &stabilized) - centered;
        assert_matrix_eq!(difference, difference.transpose(), comp = abs, tol = 1e-13);
        let u = wavy_vector(cr1.num_dofs());
        assert!(u.dot(&(&difference * &u)) >= -1e-12);
    }
}

#[test]
fn algebraic_upwinding_removes_positive_couplings() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        let data = prepare(&cr1, rotating_velocity, ConvectionMethod::UpwindAlgebraic);
        let stabilized = cr1.assemble_convection(&data).unwrap();
        for (i, j, &v) in stabilized.triplet_iter() {
            if i != j {
                assert!(v <= 1e-14, "entry ({}, {}) = {:e}", i, j, v);
            }
        }

        // The algebraic diffusion has zero row sums
        let centered = cr1
            .assemble_convection_centered(&data, CenteredDerivation::CellWise)
            .unwrap();
        let ones = DVector::repeat(cr1.num_dofs(), 1.0);
        assert!((spmv(&stabilized, &ones).unwrap() - spmv(&centered, &ones).unwrap()).amax() < 1e-12);
    }
}

#[test]
fn every_method_agrees_with_its_matrix_free_product() {
    for mesh in meshes() {
        let cr1 = cr1_on(&mesh);
        let u = wavy_vector(cr1.num_dofs());
        for method in ConvectionMethod::ALL {
            let data = prepare(&cr1, compressing_velocity, method);
            let a = cr1.assemble_convection(&data).unwrap();
            verify_operator_consistency(method.as_str(), &a, &u, |du, u| cr1.apply_convection(du, u, &data), 1e-12)
                .unwrap();
        }
        let data = prepare(&cr1, compressing_velocity, ConvectionMethod::Upwind);
        for derivation in [CenteredDerivation::CellWise, CenteredDerivation::FaceJump] {
            let a = cr1.assemble_convection_centered(&data, derivation).unwrap();
            verify_operator_consistency(
                "centered convection",
                &a,
                &u,
                |du, u| cr1.apply_convection_centered(du, u, &data, derivation),
                1e-12,
            )
            .unwrap();
        }
    }
}

#[test]
fn supg_source_correction_is_conservative() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let mut cr1 = cr1_on(&mesh);
    cr1.prepare_convection(constant_velocity, ConvectionMethod::Supg).unwrap();
    let f = cr1.interpolate(|x| 1.0 + x.x);
    let mut b = DVector::zeros(cr1.num_dofs());
    cr1.mass_dot_supg(&mut b, &f, 1.0.into()).unwrap();
    assert!(b.amax() > 1e-3);
    assert!(b.sum().abs() < 1e-12);

    cr1.prepare_convection(|_| Vector3::zeros(), ConvectionMethod::Supg).unwrap();
    let mut b = DVector::zeros(cr1.num_dofs());
    cr1.mass_dot_supg(&mut b, &f, 1.0.into()).unwrap();
    assert!(b.amax() < 1e-14);
}

#[test]
fn inflow_boundary_must_carry_dirichlet_conditions() {
    let mesh = Arc::new(create_unit_square_mesh(3));
    let mut cr1 = cr1_on(&mesh);
    assert!(matches!(cr1.find_inflow_colors(), Err(Error::Configuration(_))));

    cr1.prepare_convection(|_| Vector3::new(1.0, 0.0, 0.0), ConvectionMethod::Upwind)
        .unwrap();
    assert_eq!(cr1.find_inflow_colors().unwrap(), vec![X_MIN]);

    let conditions = |inflow: BoundaryType| {
        BoundaryConditions::new()
            .with(X_MIN, BoundaryCondition::homogeneous(inflow))
            .with(X_MAX, BoundaryCondition::homogeneous(BoundaryType::Neumann))
            .with(Y_MIN, BoundaryCondition::homogeneous(BoundaryType::Neumann))
            .with(Y_MAX, BoundaryCondition::homogeneous(BoundaryType::Neumann))
    };
    cr1.check_inflow_boundary(&conditions(BoundaryType::Dirichlet)).unwrap();
    assert!(matches!(
        cr1.check_inflow_boundary(&conditions(BoundaryType::Neumann)),
        Err(Error::Configuration(_))
    ));

    cr1.prepare_convection(rotating_velocity, ConvectionMethod::Upwind)
        .unwrap();
    assert_eq!(cr1.find_inflow_colors().unwrap(), vec![X_MIN, X_MAX, Y_MIN, Y_MAX]);
}

#[test]
fn missing_auxiliary_data_is_reported() {
    let mesh = Arc::new(create_unit_square_mesh(2));
    let cr1 = cr1_on(&mesh);
    let upwind = prepare(&cr1, constant_velocity, ConvectionMethod::Upwind);
    assert!(matches!(upwind.moved_point_weights(), Err(Error::Configuration(_))));
    assert!(matches!(upwind.algebraic_diffusion(), Err(Error::Configuration(_))));
    assert!(matches!(
        upwind.clone().with_moved_point_weights(vec![0.5; 3]),
        Err(Error::Dimension { .. })
    ));
    assert!(matches!(
        cr1.prepare_convection_data(DVector::zeros(4), ConvectionMethod::Upwind, 0.1),
        Err(Error::Dimension { .. })
    ));
}

#[test]
fn convection_data_from_another_mesh_is_rejected() {
    // Both meshes have 33 faces, but 16 and 18 cells
    let strip = Arc::new(create_rectangle_triangle_mesh([0.0, 1.0], [0.0, 1.0], 1, 8));
    let square = Arc::new(create_unit_square_mesh(3));
    assert_eq!(strip.num_faces(), square.num_faces());
    let (on_strip, on_square) = (cr1_on(&strip), cr1_on(&square));
    let u = DVector::zeros(on_square.num_dofs());
    for method in ConvectionMethod::ALL {
        let data = prepare(&on_strip, constant_velocity, method);
        let mismatch = |result: Result<(), Error>| {
            matches!(
                result,
                Err(Error::Dimension {
                    expected: 18,
                    actual: 16,
                    ..
                })
            )
        };
        assert!(mismatch(on_square.assemble_convection(&data).map(|_| ())), "{}", method.as_str());
        let mut du = DVector::zeros(on_square.num_dofs());
        assert!(mismatch(on_square.apply_convection(&mut du, &u, &data)), "{}", method.as_str());
        let centered = on_square.assemble_convection_centered(&data, CenteredDerivation::FaceJump);
        assert!(mismatch(centered.map(|_| ())));
    }
}

#[test]
fn cells_without_outflow_keep_the_centroid() {
    let mesh = Arc::new(create_unit_square_mesh(2));
    let cr1 = cr1_on(&mesh);
    let nloc = mesh.dim() + 1;
    // Everything flows into cell 0, which therefore has no downwind point
    let mut face_velocity = DVector::zeros(mesh.num_faces());
    for (&face, &sigma) in mesh.faces_of_cell(0).iter().zip(mesh.cell_orientation(0)) {
        face_velocity[face] = -sigma;
    }
    let data = cr1
        .prepare_convection_data(face_velocity, ConvectionMethod::SupgAlt, 0.1)
        .unwrap();
    let weights = data.moved_point_weights().unwrap();
    assert!(weights[..nloc].iter().all(|&w| (w - 1.0 / 3.0).abs() < 1e-15));

    // Its neighbors receive outflow through the shared faces and move away from them
    let neighbor = (1..mesh.num_cells())
        .find(|&cell| mesh.faces_of_cell(cell).iter().any(|f| mesh.faces_of_cell(0).contains(f)))
        .unwrap();
    let neighbor_weights = &weights[nloc * neighbor..nloc * (neighbor + 1)];
    assert!(neighbor_weights.iter().any(|&w| (w - 1.0 / 3.0).abs() > 1e-3));
}
