//! Basic procedural mesh generation routines.
//!
//! All generated meshes color their boundary by the axis-aligned side a face lies on:
//! [`X_MIN`], [`X_MAX`], [`Y_MIN`], [`Y_MAX`], [`Z_MIN`] and [`Z_MAX`].
use crate::{Color, SimplexMesh};
use nalgebra::{Point3, Vector3};

pub const X_MIN: Color = 1;
pub const X_MAX: Color = 2;
pub const Y_MIN: Color = 3;
pub const Y_MAX: Color = 4;
pub const Z_MIN: Color = 5;
pub const Z_MAX: Color = 6;

/// Colors a boundary face by the side of the box `[min, max]` it lies on.
fn side_classifier(
    dim: usize,
    min: [f64; 3],
    max: [f64; 3],
) -> impl Fn(&Point3<f64>, &Vector3<f64>) -> Option<Color> {
    move |center: &Point3<f64>, _normal: &Vector3<f64>| {
        (0..dim).find_map(|axis| {
            let tol = 1e-10 * (max[axis] - min[axis]);
            if (center[axis] - min[axis]).abs() <= tol {
                Some(2 * axis as Color + 1)
            } else if (center[axis] - max[axis]).abs() <= tol {
                Some(2 * axis as Color + 2)
            } else {
                None
            }
        })
    }
}

/// Uniform subdivision of `[a, b]` into `cells` segments.
pub fn create_interval_mesh(a: f64, b: f64, cells: usize) -> SimplexMesh {
    assert!(cells > 0, "Interval mesh needs at least one cell");
    assert!(a < b, "Interval must be non-empty");
    let h = (b - a) / cells as f64;
    let points = (0..=cells)
        .map(|i| Point3::new(a + h * i as f64, 0.0, 0.0))
        .collect();
    let simplices = (0..cells).flat_map(|i| [i, i + 1]).collect();
    SimplexMesh::try_with_boundary_classifier(1, points, simplices, side_classifier(1, [a, 0.0, 0.0], [b, 0.0, 0.0]))
        .expect("Procedural interval mesh is always valid")
}

pub fn create_unit_interval_mesh(cells: usize) -> SimplexMesh {
    create_interval_mesh(0.0, 1.0, cells)
}

/// Uniform `nx x ny` grid of rectangles on `[x0, x1] x [y0, y1]`, each split into two triangles
/// along its diagonal from the lower-left to the upper-right corner.
pub fn create_rectangle_triangle_mesh(x: [f64; 2], y: [f64; 2], nx: usize, ny: usize) -> SimplexMesh {
    assert!(nx > 0 && ny > 0, "Rectangle mesh needs at least one cell per direction");
    assert!(x[0] < x[1] && y[0] < y[1], "Rectangle must be non-empty");
    let (hx, hy) = ((x[1] - x[0]) / nx as f64, (y[1] - y[0]) / ny as f64);
    let mut points = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            points.push(Point3::new(x[0] + hx * i as f64, y[0] + hy * j as f64, 0.0));
        }
    }
    let index = |i: usize, j: usize| j * (nx + 1) + i;
    let mut simplices = Vec::with_capacity(6 * nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let (v00, v10, v01, v11) = (index(i, j), index(i + 1, j), index(i, j + 1), index(i + 1, j + 1));
            simplices.extend_from_slice(&[v00, v10, v11, v00, v11, v01]);
        }
    }
    let classifier = side_classifier(2, [x[0], y[0], 0.0], [x[1], y[1], 0.0]);
    SimplexMesh::try_with_boundary_classifier(2, points, simplices, classifier)
        .expect("Procedural rectangle mesh is always valid")
}

pub fn create_unit_square_mesh(cells_per_dim: usize) -> SimplexMesh {
    create_rectangle_triangle_mesh([0.0, 1.0], [0.0, 1.0], cells_per_dim, cells_per_dim)
}

/// Uniform grid of boxes on `[min, max]`, each split into six tetrahedra sharing the main
/// diagonal (Kuhn subdivision), which yields a conforming mesh.
pub fn create_box_tetrahedron_mesh(min: [f64; 3], max: [f64; 3], cells: [usize; 3]) -> SimplexMesh {
    assert!(cells.iter().all(|&n| n > 0), "Box mesh needs at least one cell per direction");
    assert!((0..3).all(|k| min[k] < max[k]), "Box must be non-empty");
    let [nx, ny, nz] = cells;
    let h: Vec<f64> = (0..3).map(|k| (max[k] - min[k]) / cells[k] as f64).collect();
    let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                points.push(Point3::new(
                    min[0] + h[0] * i as f64,
                    min[1] + h[1] * j as f64,
                    min[2] + h[2] * k as f64,
                ));
            }
        }
    }
    let index = |c: [usize; 3]| (c[2] * (ny + 1) + c[1]) * (nx + 1) + c[0];
    const AXIS_ORDERS: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    let mut simplices = Vec::with_capacity(24 * nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                for order in AXIS_ORDERS {
                    let mut corner = [i, j, k];
                    simplices.push(index(corner));
                    for axis in order {
                        corner[axis] += 1;
                        simplices.push(index(corner));
                    }
                }
            }
        }
    }
    SimplexMesh::try_with_boundary_classifier(3, points, simplices, side_classifier(3, min, max))
        .expect("Procedural box mesh is always valid")
}

pub fn create_unit_cube_mesh(cells_per_dim: usize) -> SimplexMesh {
    create_box_tetrahedron_mesh([0.0; 3], [1.0; 3], [cells_per_dim; 3])
}
