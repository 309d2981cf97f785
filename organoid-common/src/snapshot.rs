use serde::{Serialize, Deserialize};

/// A snapshot of the simulation state and metrics at a specific time.
#[derive(Debug, Clone, Serialize, Deserialize)] // Derive traits for easy saving/loading
pub struct Snapshot {
    /// The simulation time (in hours) at which the snapshot was taken.
    pub time: f32,
    /// The total number of agents (cells plus ECM particles).
    pub total_agent_count: u32,
    /// The number of live epithelial cells (ECM particles excluded).
    pub cell_count: u32,
    /// Cells belonging to the luminal family (Luminal + LuminalStem).
    pub luminal_count: u32,
    /// Cells belonging to the myoepithelial family (Myoepithelial + MyoepithelialStem).
    pub myoepithelial_count: u32,
    /// Cells currently undergoing apoptosis.
    pub apoptotic_count: u32,
    /// Total shared contact-edge length between neighboring cells.
    pub total_boundary_length: f32,
    /// The portion of the boundary shared between cells of different families.
    pub heterotypic_boundary_length: f32,
    /// Total number of undirected neighbor pairs.
    pub total_neighbor_pairs: u32,
    /// Neighbor pairs whose members belong to different families.
    pub heterotypic_neighbor_pairs: u32,
    /// Mean height (z coordinate) over all live cells.
    pub mean_cell_height: f32,
    /// Optional: Raw [x, y, z] positions of all agents at the snapshot time.
    /// Included only if `config.output.save_positions_in_snapshot` is true.
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "positions": null
    pub positions: Option<Vec<(f32, f32, f32)>>,
}
