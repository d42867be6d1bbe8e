//! Boundary conditions and the bookkeeping of their strong enforcement.
use crate::assembly::global::{
    condense_dirichlet, gather_global_to_local, restrict_rows, spmv, DirichletDiagonal,
};
use crate::{check_dimension, Error, Result};
use crfem_mesh::{Color, SimplexMesh};
use log::debug;
use nalgebra::{DVector, Point3, Vector3};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryType {
    Dirichlet,
    Neumann,
    Robin,
}

impl Display for BoundaryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dirichlet => "Dirichlet",
            Self::Neumann => "Neumann",
            Self::Robin => "Robin",
        };
        write!(f, "{}", name)
    }
}

/// Boundary data evaluated at a face midpoint with the outward unit normal of the face.
pub type BoundaryFunction = Box<dyn Fn(&Point3<f64>, &Vector3<f64>) -> f64 + Send + Sync>;

/// Condition on all faces of one boundary color.
///
/// For Dirichlet conditions the functions prescribe the solution, for Neumann conditions the
/// normal flux `k ∂u/∂n` and for Robin conditions the far-field value `g` in
/// `k ∂u/∂n = α (g - u)`, where `α` is the coefficient of the condition. A condition without
/// functions is homogeneous.
pub struct BoundaryCondition {
    kind: BoundaryType,
    functions: Vec<BoundaryFunction>,
    coefficient: Option<f64>,
}

impl BoundaryCondition {
    pub fn homogeneous(kind: BoundaryType) -> Self {
        Self {
            kind,
            functions: Vec::new(),
            coefficient: None,
        }
    }

    pub fn dirichlet<F>(function: F) -> Self
    where
        F: Fn(&Point3<f64>, &Vector3<f64>) -> f64 + Send + Sync + 'static,
    {
        Self::homogeneous(BoundaryType::Dirichlet).with_function(function)
    }

    pub fn neumann<F>(function: F) -> Self
    where
        F: Fn(&Point3<f64>, &Vector3<f64>) -> f64 + Send + Sync + 'static,
    {
        Self::homogeneous(BoundaryType::Neumann).with_function(function)
    }

    pub fn robin<F>(coefficient: f64, function: F) -> Self
    where
        F: Fn(&Point3<f64>, &Vector3<f64>) -> f64 + Send + Sync + 'static,
    {
        Self::homogeneous(BoundaryType::Robin)
            .with_function(function)
            .with_coefficient(coefficient)
    }

    /// Appends the function of the next solution component.
    pub fn with_function<F>(mut self, function: F) -> Self
    where
        F: Fn(&Point3<f64>, &Vector3<f64>) -> f64 + Send + Sync + 'static,
    {
        self.functions.push(Box::new(function));
        self
    }

    pub fn with_coefficient(mut self, coefficient: f64) -> Self {
        self.coefficient = Some(coefficient);
        self
    }

    pub fn kind(&self) -> BoundaryType {
        self.kind
    }

    pub fn functions(&self) -> &[BoundaryFunction] {
        &self.functions
    }

    pub fn coefficient(&self) -> Option<f64> {
        self.coefficient
    }

    /// Evaluates the function of the given component, zero if there is none.
    pub fn evaluate(&self, component: usize, x: &Point3<f64>, normal: &Vector3<f64>) -> f64 {
        self.functions
            .get(component)
            .map(|function| function(x, normal))
            .unwrap_or(0.0)
    }
}

impl Debug for BoundaryCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryCondition")
            .field("kind", &self.kind)
            .field("num_functions", &self.functions.len())
            .field("coefficient", &self.coefficient)
            .finish()
    }
}

/// Boundary conditions by color.
#[derive(Debug, Default)]
pub struct BoundaryConditions {
    conditions: BTreeMap<Color, BoundaryCondition>,
}

impl BoundaryConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, color: Color, condition: BoundaryCondition) -> Self {
        self.insert(color, condition);
        self
    }

    pub fn insert(&mut self, color: Color, condition: BoundaryCondition) -> Option<BoundaryCondition> {
        self.conditions.insert(color, condition)
    }

    pub fn get(&self, color: Color) -> Option<&BoundaryCondition> {
        self.conditions.get(&color)
    }

    pub(crate) fn require(&self, color: Color) -> Result<&BoundaryCondition> {
        self.get(color)
            .ok_or_else(|| Error::Configuration(format!("no boundary condition for color {}", color)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Color, &BoundaryCondition)> {
        self.conditions.iter().map(|(&color, condition)| (color, condition))
    }

    pub fn colors_of_type(&self, kind: BoundaryType) -> Vec<Color> {
        self.iter()
            .filter(|(_, condition)| condition.kind() == kind)
            .map(|(color, _)| color)
            .collect()
    }

    /// The coefficient `α` of every Robin condition.
    pub fn robin_coefficients(&self) -> Result<BTreeMap<Color, f64>> {
        self.iter()
            .filter(|(_, condition)| condition.kind() == BoundaryType::Robin)
            .map(|(color, condition)| {
                condition
                    .coefficient()
                    .map(|alpha| (color, alpha))
                    .ok_or_else(|| Error::Configuration(format!("Robin condition on color {} has no coefficient", color)))
            })
            .collect()
    }

    /// Checks that every boundary color of the mesh has a condition, that every condition
    /// refers to a boundary color and that Robin conditions carry a coefficient.
    pub fn check(&self, mesh: &SimplexMesh) -> Result<()> {
        if let Some(color) = mesh.colors().find(|color| !self.conditions.contains_key(color)) {
            return Err(Error::Configuration(format!("no boundary condition for color {}", color)));
        }
        for color in self.conditions.keys() {
            mesh.boundary_faces(&[*color])?;
        }
        self.robin_coefficients()?;
        Ok(())
    }
}

/// Enforcement of Dirichlet conditions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirichletMethod {
    /// Elimination with an identity block on the Dirichlet degrees of freedom.
    Strong,
    /// Elimination keeping the scaled Dirichlet block of the operator.
    StrongPenalty,
    /// Weak enforcement by Nitsche's method, without elimination.
    Nitsche,
}

impl DirichletMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::StrongPenalty => "strong-penalty",
            Self::Nitsche => "nitsche",
        }
    }

    /// Treatment of the Dirichlet block under elimination.
    pub(crate) fn dirichlet_diagonal(&self, penalty: f64) -> Result<DirichletDiagonal> {
        match self {
            Self::Strong => Ok(DirichletDiagonal::Identity),
            Self::StrongPenalty => Ok(DirichletDiagonal::ScaledBlock(penalty)),
            Self::Nitsche => Err(Error::Configuration(
                "Nitsche's method does not eliminate Dirichlet degrees of freedom".to_string(),
            )),
        }
    }
}

impl Display for DirichletMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DirichletMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "strong" => Ok(Self::Strong),
            "strong-penalty" | "penalty" | "new" => Ok(Self::StrongPenalty),
            "nitsche" => Ok(Self::Nitsche),
            _ => Err(Error::Configuration(format!("unknown Dirichlet method '{}'", s))),
        }
    }
}

/// Data saved during elimination for recovering the normal flux on one color.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxRecord {
    faces: Vec<usize>,
    dofs: Vec<usize>,
    restriction: Option<CsrMatrix<f64>>,
    saved_rhs: Option<DVector<f64>>,
}

impl FluxRecord {
    pub fn faces(&self) -> &[usize] {
        &self.faces
    }

    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    /// Rows of the operator before elimination, one per degree of freedom of the color.
    pub fn restriction(&self) -> Option<&CsrMatrix<f64>> {
        self.restriction.as_ref()
    }

    /// Right-hand side entries before elimination.
    pub fn saved_rhs(&self) -> Option<&DVector<f64>> {
        self.saved_rhs.as_ref()
    }

    /// Residual `A u - b` on the degrees of freedom of the color.
    pub fn residual(&self, u: &DVector<f64>) -> Result<DVector<f64>> {
        let (restriction, saved_rhs) = self.restriction.as_ref().zip(self.saved_rhs.as_ref()).ok_or_else(|| {
            Error::Configuration("flux recovery requires an eliminated matrix and right-hand side".to_string())
        })?;
        check_dimension("flux recovery argument", restriction.ncols(), u.len())?;
        Ok(spmv(restriction, u)? - saved_rhs)
    }
}

/// Partition of the degrees of freedom into Dirichlet and inner ones, together with the blocks
/// needed to eliminate the Dirichlet ones from right-hand sides.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryData {
    dirichlet_colors: Vec<Color>,
    dirichlet_dofs: Vec<usize>,
    inner_dofs: Vec<usize>,
    is_dirichlet: Vec<bool>,
    flux: BTreeMap<Color, FluxRecord>,
    diagonal: Option<DirichletDiagonal>,
    inner_dirichlet: Option<CsrMatrix<f64>>,
    dirichlet_dirichlet: Option<CsrMatrix<f64>>,
}

impl BoundaryData {
    /// Builds the partition for the given Dirichlet degrees of freedom.
    ///
    /// `flux` lists, for each color with flux recovery, its faces and their degrees of freedom.
    pub(crate) fn new(
        num_dofs: usize,
        dirichlet_colors: Vec<Color>,
        mut dirichlet_dofs: Vec<usize>,
        flux: BTreeMap<Color, (Vec<usize>, Vec<usize>)>,
    ) -> Self {
        dirichlet_dofs.sort_unstable();
        dirichlet_dofs.dedup();
        let mut is_dirichlet = vec![false; num_dofs];
        for &dof in &dirichlet_dofs {
            is_dirichlet[dof] = true;
        }
        let inner_dofs = (0..num_dofs).filter(|&dof| !is_dirichlet[dof]).collect();
        let flux = flux
            .into_iter()
            .map(|(color, (faces, dofs))| {
                let record = FluxRecord {
                    faces,
                    dofs,
                    restriction: None,
                    saved_rhs: None,
                };
                (color, record)
            })
            .collect();
        debug!(
            "Prepared boundary data with {} Dirichlet and {} inner dofs",
            dirichlet_dofs.len(),
            num_dofs - dirichlet_dofs.len()
        );
        Self {
            dirichlet_colors,
            dirichlet_dofs,
            inner_dofs,
            is_dirichlet,
            flux,
            diagonal: None,
            inner_dirichlet: None,
            dirichlet_dirichlet: None,
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.is_dirichlet.len()
    }

    pub fn dirichlet_colors(&self) -> &[Color] {
        &self.dirichlet_colors
    }

    /// Sorted Dirichlet degrees of freedom.
    pub fn dirichlet_dofs(&self) -> &[usize] {
        &self.dirichlet_dofs
    }

    /// Sorted complement of the Dirichlet degrees of freedom.
    pub fn inner_dofs(&self) -> &[usize] {
        &self.inner_dofs
    }

    pub fn is_dirichlet(&self, dof: usize) -> bool {
        self.is_dirichlet[dof]
    }

    pub fn flux_records(&self) -> &BTreeMap<Color, FluxRecord> {
        &self.flux
    }

    pub fn flux_record(&self, color: Color) -> Result<&FluxRecord> {
        self.flux
            .get(&color)
            .ok_or_else(|| Error::Configuration(format!("no flux recovery prepared for color {}", color)))
    }

    /// Eliminates the Dirichlet degrees of freedom from `matrix`, saving the blocks required by
    /// [`condense_rhs`](Self::condense_rhs) and the flux restrictions.
    pub fn condense_matrix(&mut self, matrix: &CsrMatrix<f64>, diagonal: DirichletDiagonal) -> Result<CsrMatrix<f64>> {
        check_dimension("eliminated matrix", self.num_dofs(), matrix.nrows())?;
        for record in self.flux.values_mut() {
            record.restriction = Some(restrict_rows(matrix, &record.dofs));
        }
        let condensation = condense_dirichlet(matrix, &self.is_dirichlet, diagonal)?;
        self.diagonal = Some(diagonal);
        self.inner_dirichlet = Some(condensation.inner_dirichlet);
        self.dirichlet_dirichlet = Some(condensation.dirichlet_dirichlet);
        Ok(condensation.matrix)
    }

    /// Eliminates the Dirichlet values from a right-hand side, consistently with the last
    /// condensed matrix. Only the Dirichlet entries of `dirichlet_values` are used.
    pub fn condense_rhs(&mut self, b: &mut DVector<f64>, dirichlet_values: &DVector<f64>) -> Result<()> {
        check_dimension("eliminated right-hand side", self.num_dofs(), b.len())?;
        check_dimension("Dirichlet values", self.num_dofs(), dirichlet_values.len())?;
        let (diagonal, inner_dirichlet, dirichlet_dirichlet) = match (
            self.diagonal,
            self.inner_dirichlet.as_ref(),
            self.dirichlet_dirichlet.as_ref(),
        ) {
            (Some(diagonal), Some(id), Some(dd)) => (diagonal, id, dd),
            _ => {
                return Err(Error::Configuration(
                    "right-hand side elimination requires an eliminated matrix".to_string(),
                ))
            }
        };
        for record in self.flux.values_mut() {
            record.saved_rhs = Some(gather_global_to_local(b, &record.dofs));
        }

        let mut ud = DVector::zeros(self.num_dofs());
        for &dof in &self.dirichlet_dofs {
            ud[dof] = dirichlet_values[dof];
        }
        *b -= spmv(inner_dirichlet, &ud)?;
        match diagonal {
            DirichletDiagonal::Identity => {
                for &dof in &self.dirichlet_dofs {
                    b[dof] = ud[dof];
                }
            }
            DirichletDiagonal::ScaledBlock(scale) => {
                let block = spmv(dirichlet_dirichlet, &ud)?;
                for &dof in &self.dirichlet_dofs {
                    b[dof] = scale * block[dof];
                }
            }
        }
        Ok(())
    }

    /// Matrix-free counterpart of the condensed matrix: accumulates `du += A_c u` where
    /// `apply` accumulates the product with the original operator.
    pub fn apply_condensed<F>(
        &self,
        du: &mut DVector<f64>,
        u: &DVector<f64>,
        diagonal: DirichletDiagonal,
        mut apply: F,
    ) -> Result<()>
    where
        F: FnMut(&mut DVector<f64>, &DVector<f64>) -> Result<()>,
    {
        check_dimension("operator argument", self.num_dofs(), u.len())?;
        check_dimension("operator result", self.num_dofs(), du.len())?;
        let mut u_inner = u.clone();
        for &dof in &self.dirichlet_dofs {
            u_inner[dof] = 0.0;
        }
        let mut du_inner = DVector::zeros(self.num_dofs());
        apply(&mut du_inner, &u_inner)?;
        for &dof in &self.inner_dofs {
            du[dof] += du_inner[dof];
        }
        match diagonal {
            DirichletDiagonal::Identity => {
                for &dof in &self.dirichlet_dofs {
                    du[dof] += u[dof];
                }
            }
            DirichletDiagonal::ScaledBlock(scale) => {
                let mut u_dirichlet = DVector::zeros(self.num_dofs());
                for &dof in &self.dirichlet_dofs {
                    u_dirichlet[dof] = u[dof];
                }
                let mut du_dirichlet = DVector::zeros(self.num_dofs());
                apply(&mut du_dirichlet, &u_dirichlet)?;
                for &dof in &self.dirichlet_dofs {
                    du[dof] += scale * du_dirichlet[dof];
                }
            }
        }
        Ok(())
    }

    /// Normal flux through a color, summed over all degrees of freedom of the color.
    pub fn flux(&self, color: Color, u: &DVector<f64>) -> Result<f64> {
        Ok(self.flux_record(color)?.residual(u)?.sum())
    }

    /// Normal flux through a color for each component of an interleaved system.
    pub fn flux_components(&self, color: Color, u: &DVector<f64>, ncomp: usize) -> Result<Vec<f64>> {
        let record = self.flux_record(color)?;
        let residual = record.residual(u)?;
        let mut flux = vec![0.0; ncomp];
        for (&dof, value) in record.dofs().iter().zip(residual.iter()) {
            flux[dof % ncomp] += value;
        }
        Ok(flux)
    }
}
