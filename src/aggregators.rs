use crate::phenotype::Family;
use crate::population::Population;
use anyhow::Result;
use organoid_common::SimParams;
use std::path::Path;

/// Cell-data key the height tracker writes and the cell-cycle machine reads.
pub const HEIGHT_KEY: &str = "height";

/// Writes each agent's coordinate along the height axis (the last spatial
/// coordinate) into its local scalar store. Runs once per step, before the
/// cell-cycle update. Idempotent for unchanged positions.
pub fn track_heights(pop: &mut Population) {
    for agent in pop.agents_mut() {
        let height = agent.position.height();
        agent.set_cell_data(HEIGHT_KEY, height);
    }
}

/// Per-step boundary/adjacency metrics report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundaryMetrics {
    pub heterotypic_length: f32,
    pub total_length: f32,
    pub heterotypic_pairs: u32,
    pub total_pairs: u32,
}

/// Approximates the shared contact-edge length of two overlapping agents via
/// Heron's formula on the triangle (r_a, r_b, d). Valid only while the agents
/// actually overlap (d < r_a + r_b); returns zero otherwise.
fn contact_edge_length(radius_a: f32, radius_b: f32, distance: f32) -> f32 {
    if distance <= 0.0 || distance >= radius_a + radius_b {
        return 0.0;
    }
    let s = 0.5 * (radius_a + radius_b + distance);
    let area_sq = s * (s - radius_a) * (s - radius_b) * (s - distance);
    if area_sq <= 0.0 {
        return 0.0;
    }
    // Twice the triangle height over the base d.
    2.0 * area_sq.sqrt() / (0.5 * distance)
}

/// Scans all cell-cell neighbor pairs and accumulates contact-length and
/// pair-count totals, classified homotypic/heterotypic by phenotype family.
/// ECM particles are not part of the tissue boundary and are skipped. Each
/// undirected pair is visited from both endpoints, so the sums are halved.
/// Purely observational: mutates no agent state.
pub fn measure_boundaries(pop: &Population, params: &SimParams) -> BoundaryMetrics {
    let agents = pop.agents();
    let mut heterotypic_length = 0.0f32;
    let mut total_length = 0.0f32;
    let mut heterotypic_pairs = 0u32;
    let mut total_pairs = 0u32;

    for idx in 0..agents.len() {
        let a = &agents[idx];
        if !a.phenotype.is_cell() {
            continue;
        }
        pop.for_each_neighbor(idx, params.interaction_radius_sq, params, |neighbor_idx| {
            let b = &agents[neighbor_idx as usize];
            if !b.phenotype.is_cell() {
                return true;
            }
            let distance = a.position.distance(b.position);
            let edge = contact_edge_length(a.radius, b.radius, distance);
            let heterotypic = a.phenotype.family() != b.phenotype.family();

            total_length += edge;
            total_pairs += 1;
            if heterotypic {
                heterotypic_length += edge;
                heterotypic_pairs += 1;
            }
            true
        });
    }

    BoundaryMetrics {
        heterotypic_length: 0.5 * heterotypic_length,
        total_length: 0.5 * total_length,
        heterotypic_pairs: heterotypic_pairs / 2,
        total_pairs: total_pairs / 2,
    }
}

/// Pairwise adjacency classification codes.
pub const ADJ_NOT_NEIGHBORS: u8 = 0;
pub const ADJ_HOMOTYPIC_UNLABELED: u8 = 1;
pub const ADJ_HOMOTYPIC_LABELED: u8 = 2;
pub const ADJ_HETEROTYPIC: u8 = 3;

fn classify_pair(family_a: Family, family_b: Family, labelled: bool) -> u8 {
    if family_a != family_b {
        ADJ_HETEROTYPIC
    } else if labelled {
        ADJ_HOMOTYPIC_LABELED
    } else {
        ADJ_HOMOTYPIC_UNLABELED
    }
}

/// Builds the full pairwise adjacency classification matrix, row-major over
/// biological cells sorted by id (ECM particles get no row or column).
/// Entry (i, j) is 0 when the cells are not geometric neighbors, otherwise
/// the homotypic/heterotypic classification.
pub fn adjacency_matrix(pop: &Population, params: &SimParams) -> Vec<u8> {
    let agents = pop.agents();

    // Map storage index -> row position in id order, cells only.
    let mut cell_indices: Vec<usize> = (0..agents.len())
        .filter(|&idx| agents[idx].phenotype.is_cell())
        .collect();
    cell_indices.sort_by_key(|&idx| agents[idx].id);
    let n = cell_indices.len();
    let mut row_of = vec![usize::MAX; agents.len()];
    for (row, &idx) in cell_indices.iter().enumerate() {
        row_of[idx] = row;
    }

    let mut matrix = vec![ADJ_NOT_NEIGHBORS; n * n];
    for &idx in &cell_indices {
        let a = &agents[idx];
        pop.for_each_neighbor(idx, params.interaction_radius_sq, params, |neighbor_idx| {
            let b = &agents[neighbor_idx as usize];
            if !b.phenotype.is_cell() {
                return true;
            }
            let labelled = a.phenotype.is_labelled() && b.phenotype.is_labelled();
            let code = classify_pair(a.phenotype.family(), b.phenotype.family(), labelled);
            let (row, col) = (row_of[idx], row_of[neighbor_idx as usize]);
            matrix[row * n + col] = code;
            matrix[col * n + row] = code;
            true
        });
    }
    matrix
}

/// Tab-separated per-step metric writers (one line per step).
pub struct MetricsWriter {
    boundary: Option<csv::Writer<std::fs::File>>,
    adjacency: Option<csv::Writer<std::fs::File>>,
}

impl MetricsWriter {
    /// Opens `<base>_boundary.tsv` and/or `<base>_adjacency.tsv` next to the
    /// other output files.
    pub fn open(base_filename: &str, boundary: bool, adjacency: bool) -> Result<Self> {
        let open_tsv = |path: String| -> Result<csv::Writer<std::fs::File>> {
            Ok(csv::WriterBuilder::new()
                .delimiter(b'\t')
                .flexible(true)
                .has_headers(false)
                .from_path(Path::new(&path))?)
        };
        Ok(MetricsWriter {
            boundary: if boundary {
                Some(open_tsv(format!("{}_boundary.tsv", base_filename))?)
            } else {
                None
            },
            adjacency: if adjacency {
                Some(open_tsv(format!("{}_adjacency.tsv", base_filename))?)
            } else {
                None
            },
        })
    }

    /// `heterotypic_length \t total_length \t heterotypic_pairs \t total_pairs`
    pub fn write_boundary(&mut self, metrics: &BoundaryMetrics) -> Result<()> {
        if let Some(writer) = &mut self.boundary {
            writer.write_record(&[
                format!("{:.6}", metrics.heterotypic_length),
                format!("{:.6}", metrics.total_length),
                metrics.heterotypic_pairs.to_string(),
                metrics.total_pairs.to_string(),
            ])?;
        }
        Ok(())
    }

    /// `num_cells \t` followed by `num_cells^2` classification codes row-major.
    pub fn write_adjacency(&mut self, num_cells: usize, matrix: &[u8]) -> Result<()> {
        if let Some(writer) = &mut self.adjacency {
            let mut record = Vec::with_capacity(1 + matrix.len());
            record.push(num_cells.to_string());
            record.extend(matrix.iter().map(|code| code.to_string()));
            writer.write_record(&record)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.boundary {
            writer.flush()?;
        }
        if let Some(writer) = &mut self.adjacency {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimulationContext;
    use crate::phenotype::{Phenotype, Variant};
    use crate::population::Population;
    use crate::test_support::test_params;
    use organoid_common::Vec3;

    fn populate(positions_variants: &[(Vec3, Variant)]) -> (Population, SimulationContext) {
        let params = test_params();
        let mut ctx = SimulationContext::new(11, 0.01);
        let mut pop = Population::new();
        for (pos, variant) in positions_variants {
            pop.spawn(*pos, Phenotype::new(*variant), &params, &mut ctx).unwrap();
        }
        pop.rebuild_grid(&params);
        (pop, ctx)
    }

    #[test]
    fn height_tracker_is_idempotent() {
        let (mut pop, _ctx) = populate(&[(Vec3::new(2.0, 2.0, 1.25), Variant::Luminal)]);
        track_heights(&mut pop);
        let first = pop.agents()[0].cell_data(HEIGHT_KEY);
        track_heights(&mut pop);
        let second = pop.agents()[0].cell_data(HEIGHT_KEY);
        assert_eq!(first, Some(1.25));
        assert_eq!(first, second);
    }

    #[test]
    fn contact_edge_length_requires_overlap() {
        // Two unit-diameter agents exactly touching or separated: no edge.
        assert_eq!(contact_edge_length(0.5, 0.5, 1.0), 0.0);
        assert_eq!(contact_edge_length(0.5, 0.5, 1.5), 0.0);
        // Overlapping agents share a chord of length 2*sqrt(r^2 - (d/2)^2).
        let edge = contact_edge_length(0.5, 0.5, 0.6);
        let expected = 2.0 * (0.25f32 - 0.09).sqrt();
        assert!((edge - expected).abs() < 1e-5);
    }

    #[test]
    fn boundary_metrics_halve_double_counted_pairs() {
        let params = test_params();
        // Three overlapping same-family cells in a row: 0-1 and 1-2 overlap.
        let (pop, _ctx) = populate(&[
            (Vec3::new(3.0, 3.0, 1.0), Variant::Luminal),
            (Vec3::new(3.8, 3.0, 1.0), Variant::Luminal),
            (Vec3::new(4.6, 3.0, 1.0), Variant::Myoepithelial),
        ]);
        let metrics = measure_boundaries(&pop, &params);
        assert_eq!(metrics.total_pairs, 2);
        assert_eq!(metrics.heterotypic_pairs, 1);
        assert!(metrics.total_length > 0.0);
        assert!(metrics.heterotypic_length > 0.0);
        assert!(metrics.heterotypic_length < metrics.total_length);
    }

    #[test]
    fn adjacency_matrix_classifies_pairs() {
        // Agent 0 (Luminal) neighbors agent 1 (Myoepithelial) and agent 2
        // (Luminal); agents 1 and 2 are not geometrically adjacent.
        let params = test_params();
        let (pop, _ctx) = populate(&[
            (Vec3::new(3.0, 3.0, 1.0), Variant::Luminal),
            (Vec3::new(4.2, 3.0, 1.0), Variant::Myoepithelial),
            (Vec3::new(3.0, 4.2, 1.0), Variant::Luminal),
        ]);
        let matrix = adjacency_matrix(&pop, &params);
        let n = 3;
        assert_eq!(matrix[0 * n + 1], ADJ_HETEROTYPIC);
        assert_eq!(matrix[1 * n + 0], ADJ_HETEROTYPIC);
        assert_eq!(matrix[0 * n + 2], ADJ_HOMOTYPIC_LABELED);
        assert_eq!(matrix[2 * n + 0], ADJ_HOMOTYPIC_LABELED);
        assert_eq!(matrix[1 * n + 2], ADJ_NOT_NEIGHBORS);
        assert_eq!(matrix[2 * n + 1], ADJ_NOT_NEIGHBORS);
        // Diagonal stays empty.
        for i in 0..n {
            assert_eq!(matrix[i * n + i], ADJ_NOT_NEIGHBORS);
        }
    }

    #[test]
    fn ecm_particles_are_excluded_from_boundary_and_adjacency() {
        let params = test_params();
        // Two overlapping cells plus an ECM particle overlapping both.
        let (pop, _ctx) = populate(&[
            (Vec3::new(3.0, 3.0, 1.0), Variant::Luminal),
            (Vec3::new(3.8, 3.0, 1.0), Variant::Myoepithelial),
            (Vec3::new(3.4, 3.4, 1.0), Variant::Ecm),
        ]);

        let metrics = measure_boundaries(&pop, &params);
        assert_eq!(metrics.total_pairs, 1);
        assert_eq!(metrics.heterotypic_pairs, 1);

        // The matrix has a row per cell, none for the ECM particle.
        let matrix = adjacency_matrix(&pop, &params);
        assert_eq!(matrix.len(), 4);
        assert_eq!(matrix[1], ADJ_HETEROTYPIC);
        assert_eq!(matrix[2], ADJ_HETEROTYPIC);
    }

    #[test]
    fn unlabeled_homotypic_pairs_use_code_one() {
        let params = test_params();
        let (pop, _ctx) = populate(&[
            (Vec3::new(3.0, 3.0, 1.0), Variant::Unlabeled),
            (Vec3::new(3.9, 3.0, 1.0), Variant::Unlabeled),
        ]);
        let matrix = adjacency_matrix(&pop, &params);
        assert_eq!(matrix[1], ADJ_HOMOTYPIC_UNLABELED);
    }
}
