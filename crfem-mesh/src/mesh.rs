use crate::MeshError;
use itertools::Itertools;
use log::debug;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Label attached to boundary faces.
pub type Color = i32;

/// Conforming simplicial mesh of dimension 1, 2 or 3 with face topology.
///
/// Faces are numbered in order of first appearance when traversing cells in order and, within
/// a cell, in order of local face index. Local face `i` of a cell is the face opposite to
/// local vertex `i`.
///
/// The normal of a face points out of the first cell adjacent to the face and its magnitude
/// equals the face measure (1 for the point faces of a 1D mesh). The orientation of a face
/// relative to a cell is `+1` if the cell is the first adjacent cell and `-1` otherwise, so that
/// `orientation * normal` is always the outward normal of the cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplexMesh {
    dim: usize,
    points: Vec<Point3<f64>>,
    simplices: Vec<usize>,
    face_vertices: Vec<usize>,
    faces_of_cells: Vec<usize>,
    cells_of_faces: Vec<(usize, Option<usize>)>,
    orientations: Vec<f64>,
    normals: Vec<Vector3<f64>>,
    volumes: Vec<f64>,
    face_centers: Vec<Point3<f64>>,
    cell_centers: Vec<Point3<f64>>,
    face_colors: Vec<Option<Color>>,
    boundary_colors: BTreeMap<Color, Vec<usize>>,
    interior_faces: Vec<usize>,
    paired_faces: Vec<usize>,
}

impl SimplexMesh {
    /// Constructs a mesh from flat simplex connectivity and explicitly labeled boundary faces.
    ///
    /// Each label is given as the vertex indices of a boundary face (in any order) and its color.
    /// Every boundary face must receive exactly one color.
    pub fn try_from_labeled_faces(
        dim: usize,
        points: Vec<Point3<f64>>,
        simplices: Vec<usize>,
        labels: impl IntoIterator<Item = (Vec<usize>, Color)>,
    ) -> Result<Self, MeshError> {
        let (mut mesh, face_lookup) = Self::from_topology(dim, points, simplices)?;
        for (mut vertices, color) in labels {
            vertices.sort_unstable();
            match face_lookup.get(&vertices) {
                Some(&face) if mesh.is_boundary_face(face) => mesh.face_colors[face] = Some(color),
                _ => return Err(MeshError::NotABoundaryFace(vertices)),
            }
        }
        mesh.collect_boundary_colors()?;
        Ok(mesh)
    }

    /// Constructs a mesh whose boundary faces are colored by a classifier.
    ///
    /// The classifier receives the centroid and the unit outward normal of each boundary face.
    pub fn try_with_boundary_classifier(
        dim: usize,
        points: Vec<Point3<f64>>,
        simplices: Vec<usize>,
        classify: impl Fn(&Point3<f64>, &Vector3<f64>) -> Option<Color>,
    ) -> Result<Self, MeshError> {
        let (mut mesh, _) = Self::from_topology(dim, points, simplices)?;
        for face in 0..mesh.num_faces() {
            if mesh.is_boundary_face(face) {
                let color = classify(&mesh.face_centers[face], &mesh.unit_normal(face));
                mesh.face_colors[face] = color;
            }
        }
        mesh.collect_boundary_colors()?;
        Ok(mesh)
    }

    fn from_topology(
        dim: usize,
        points: Vec<Point3<f64>>,
        simplices: Vec<usize>,
    ) -> Result<(Self, BTreeMap<Vec<usize>, usize>), MeshError> {
        if !(1..=3).contains(&dim) {
            return Err(MeshError::UnsupportedDimension(dim));
        }
        let nloc = dim + 1;
        if simplices.len() % nloc != 0 {
            return Err(MeshError::MalformedConnectivity {
                len: simplices.len(),
                vertices_per_cell: nloc,
            });
        }
        let ncells = simplices.len() / nloc;
        for (cell, simplex) in simplices.chunks_exact(nloc).enumerate() {
            if let Some(&vertex) = simplex.iter().find(|&&v| v >= points.len()) {
                return Err(MeshError::VertexOutOfBounds { cell, vertex });
            }
        }

        // Sorted vertex tuples identify faces. BTreeMap keeps the numbering deterministic.
        let mut face_lookup: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
        let mut face_vertices = Vec::new();
        let mut cells_of_faces: Vec<(usize, Option<usize>)> = Vec::new();
        let mut faces_of_cells = Vec::with_capacity(simplices.len());
        for (cell, simplex) in simplices.chunks_exact(nloc).enumerate() {
            for local in 0..nloc {
                let key: Vec<usize> = simplex
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != local)
                    .map(|(_, &v)| v)
                    .sorted_unstable()
                    .collect();
                let face = match face_lookup.entry(key) {
                    Entry::Vacant(entry) => {
                        let face = cells_of_faces.len();
                        face_vertices.extend_from_slice(entry.key());
                        cells_of_faces.push((cell, None));
                        entry.insert(face);
                        face
                    }
                    Entry::Occupied(entry) => {
                        let face = *entry.get();
                        match &mut cells_of_faces[face] {
                            (_, second @ None) => *second = Some(cell),
                            _ => return Err(MeshError::NonManifoldFace(entry.key().clone())),
                        }
                        face
                    }
                };
                faces_of_cells.push(face);
            }
        }
        let nfaces = cells_of_faces.len();

        let vertex = |v: usize| &points[v];
        let cell_centers: Vec<Point3<f64>> = simplices
            .chunks_exact(nloc)
            .map(|simplex| centroid(simplex.iter().map(|&v| vertex(v))))
            .collect();
        let face_centers: Vec<Point3<f64>> = face_vertices
            .chunks_exact(dim)
            .map(|face| centroid(face.iter().map(|&v| vertex(v))))
            .collect();

        let mut volumes = Vec::with_capacity(ncells);
        for (cell, simplex) in simplices.chunks_exact(nloc).enumerate() {
            let volume = simplex_volume(dim, simplex.iter().map(|&v| vertex(v)));
            let diameter = simplex
                .iter()
                .tuple_combinations()
                .map(|(&a, &b)| (vertex(a) - vertex(b)).norm())
                .fold(0.0, f64::max);
            if !(volume > 1e-12 * diameter.powi(dim as i32)) {
                return Err(MeshError::DegenerateCell(cell));
            }
            volumes.push(volume);
        }

        let normals: Vec<Vector3<f64>> = face_vertices
            .chunks_exact(dim)
            .zip(&cells_of_faces)
            .zip(&face_centers)
            .map(|((face, &(cell, _)), center)| {
                let n = face_normal(dim, face.iter().map(|&v| vertex(v)));
                if n.dot(&(center - cell_centers[cell])) < 0.0 {
                    -n
                } else {
                    n
                }
            })
            .collect();

        let orientations = faces_of_cells
            .iter()
            .enumerate()
            .map(|(k, &face)| if cells_of_faces[face].0 == k / nloc { 1.0 } else { -1.0 })
            .collect();

        // For each interior face, the faces of both neighbors that lie opposite to the vertices
        // of the shared face, paired by vertex.
        let mut interior_faces = Vec::new();
        let mut paired_faces = Vec::new();
        for (face, &(c0, c1)) in cells_of_faces.iter().enumerate() {
            if let Some(c1) = c1 {
                interior_faces.push(face);
                for cell in [c0, c1] {
                    let simplex = &simplices[nloc * cell..nloc * (cell + 1)];
                    for v in &face_vertices[dim * face..dim * (face + 1)] {
                        let local = simplex
                            .iter()
                            .position(|w| w == v)
                            .expect("Face vertices always belong to the adjacent cells");
                        paired_faces.push(faces_of_cells[nloc * cell + local]);
                    }
                }
            }
        }

        debug!(
            "Built {}D simplex mesh with {} cells, {} faces ({} interior)",
            dim,
            ncells,
            nfaces,
            interior_faces.len()
        );

        let mesh = Self {
            dim,
            points,
            simplices,
            face_vertices,
            faces_of_cells,
            cells_of_faces,
            orientations,
            normals,
            volumes,
            face_centers,
            cell_centers,
            face_colors: vec![None; nfaces],
            boundary_colors: BTreeMap::new(),
            interior_faces,
            paired_faces,
        };
        Ok((mesh, face_lookup))
    }

    fn collect_boundary_colors(&mut self) -> Result<(), MeshError> {
        self.boundary_colors.clear();
        for face in 0..self.num_faces() {
            if self.is_boundary_face(face) {
                let color = self.face_colors[face].ok_or(MeshError::UnlabeledBoundaryFace(face))?;
                self.boundary_colors.entry(color).or_default().push(face);
            }
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_cells(&self) -> usize {
        self.volumes.len()
    }

    pub fn num_faces(&self) -> usize {
        self.cells_of_faces.len()
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Vertex indices of the given cell.
    pub fn simplex(&self, cell: usize) -> &[usize] {
        let nloc = self.dim + 1;
        &self.simplices[nloc * cell..nloc * (cell + 1)]
    }

    /// Sorted vertex indices of the given face.
    pub fn face_vertices(&self, face: usize) -> &[usize] {
        &self.face_vertices[self.dim * face..self.dim * (face + 1)]
    }

    /// Faces of the given cell, the `i`-th face being opposite to the `i`-th vertex.
    pub fn faces_of_cell(&self, cell: usize) -> &[usize] {
        let nloc = self.dim + 1;
        &self.faces_of_cells[nloc * cell..nloc * (cell + 1)]
    }

    /// Signs relating the stored face normals to the outward normals of the given cell.
    pub fn cell_orientation(&self, cell: usize) -> &[f64] {
        let nloc = self.dim + 1;
        &self.orientations[nloc * cell..nloc * (cell + 1)]
    }

    /// Face normal scaled by the face measure.
    pub fn face_normal(&self, face: usize) -> &Vector3<f64> {
        &self.normals[face]
    }

    pub fn unit_normal(&self, face: usize) -> Vector3<f64> {
        self.normals[face] / self.face_area(face)
    }

    pub fn face_area(&self, face: usize) -> f64 {
        self.normals[face].norm()
    }

    pub fn cell_volume(&self, cell: usize) -> f64 {
        self.volumes[cell]
    }

    pub fn cell_volumes(&self) -> &[f64] {
        &self.volumes
    }

    pub fn face_center(&self, face: usize) -> &Point3<f64> {
        &self.face_centers[face]
    }

    pub fn cell_center(&self, cell: usize) -> &Point3<f64> {
        &self.cell_centers[cell]
    }

    /// The first cell adjacent to the face and, for interior faces, the second one.
    pub fn cells_of_face(&self, face: usize) -> (usize, Option<usize>) {
        self.cells_of_faces[face]
    }

    pub fn is_boundary_face(&self, face: usize) -> bool {
        self.cells_of_faces[face].1.is_none()
    }

    pub fn face_color(&self, face: usize) -> Option<Color> {
        self.face_colors[face]
    }

    /// Boundary faces grouped by color, each list sorted.
    pub fn boundary_colors(&self) -> &BTreeMap<Color, Vec<usize>> {
        &self.boundary_colors
    }

    pub fn colors(&self) -> impl Iterator<Item = Color> + '_ {
        self.boundary_colors.keys().copied()
    }

    /// Sorted union of the boundary faces carrying any of the given colors.
    pub fn boundary_faces(&self, colors: &[Color]) -> Result<Vec<usize>, MeshError> {
        let mut faces = Vec::new();
        for color in colors {
            let colored = self
                .boundary_colors
                .get(color)
                .ok_or(MeshError::UnknownColor(*color))?;
            faces.extend_from_slice(colored);
        }
        faces.sort_unstable();
        faces.dedup();
        Ok(faces)
    }

    /// Interior faces in increasing order.
    pub fn interior_faces(&self) -> &[usize] {
        &self.interior_faces
    }

    /// The two cells sharing the `k`-th interior face.
    pub fn interior_face_cells(&self, k: usize) -> [usize; 2] {
        let face = self.interior_faces[k];
        match self.cells_of_faces[face] {
            (c0, Some(c1)) => [c0, c1],
            (_, None) => unreachable!("Interior faces always have two cells"),
        }
    }

    /// Faces of the two cells sharing the `k`-th interior face that lie opposite to the
    /// vertices of the shared face.
    ///
    /// Both slices have length `dim` and are paired: entry `i` of each is opposite to the `i`-th
    /// vertex of the shared face.
    pub fn paired_faces(&self, k: usize) -> (&[usize], &[usize]) {
        let d = self.dim;
        let pairs = &self.paired_faces[2 * d * k..2 * d * (k + 1)];
        pairs.split_at(d)
    }

    /// Local index of `face` within `cell`, if the face belongs to the cell.
    pub fn local_face_index(&self, cell: usize, face: usize) -> Option<usize> {
        self.faces_of_cell(cell).iter().position(|&f| f == face)
    }

    /// Largest edge length over all cells.
    pub fn max_edge_length(&self) -> f64 {
        (0..self.num_cells())
            .flat_map(|cell| self.simplex(cell).iter().tuple_combinations())
            .map(|(&a, &b)| (self.points[a] - self.points[b]).norm())
            .fold(0.0, f64::max)
    }
}

fn centroid<'a>(points: impl ExactSizeIterator<Item = &'a Point3<f64>>) -> Point3<f64> {
    let n = points.len() as f64;
    let sum = points.fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Point3::from(sum / n)
}

fn simplex_volume<'a>(dim: usize, mut points: impl Iterator<Item = &'a Point3<f64>>) -> f64 {
    let mut next = || points.next().expect("Simplex has dim + 1 vertices");
    let a = next();
    match dim {
        1 => (next() - a).norm(),
        2 => {
            let (e1, e2) = (next() - a, next() - a);
            0.5 * (e1.x * e2.y - e1.y * e2.x).abs()
        }
        _ => {
            let (e1, e2, e3) = (next() - a, next() - a, next() - a);
            e1.dot(&e2.cross(&e3)).abs() / 6.0
        }
    }
}

/// Unoriented face normal with magnitude equal to the face measure.
fn face_normal<'a>(dim: usize, mut points: impl Iterator<Item = &'a Point3<f64>>) -> Vector3<f64> {
    let mut next = || points.next().expect("Face has dim vertices");
    match dim {
        1 => Vector3::x(),
        2 => {
            let (a, b) = (next(), next());
            let e = b - a;
            Vector3::new(e.y, -e.x, 0.0)
        }
        _ => {
            let a = next();
            let (e1, e2) = (next() - a, next() - a);
            0.5 * e1.cross(&e2)
        }
    }
}
