use organoid_common::{SimParams, Vec3}; // Use shared crate

// Calculates the 1D grid cell index for a given position
#[inline(always)]
pub fn get_grid_cell_idx(pos: Vec3, params: &SimParams) -> u32 {
    if params.grid_dim_x == 0 || params.grid_dim_y == 0 || params.grid_dim_z == 0 {
        return 0; // Avoid panic if grid is invalid
    }
    let grid_x = (pos.x * params.inv_grid_cell_size).floor().max(0.0) as u32;
    let grid_y = (pos.y * params.inv_grid_cell_size).floor().max(0.0) as u32;
    let grid_z = (pos.z * params.inv_grid_cell_size).floor().max(0.0) as u32;
    // Clamp to grid dimensions to handle edge cases
    let clamped_x = grid_x.min(params.grid_dim_x - 1);
    let clamped_y = grid_y.min(params.grid_dim_y - 1);
    let clamped_z = grid_z.min(params.grid_dim_z - 1);
    (clamped_z * params.grid_dim_y + clamped_y) * params.grid_dim_x + clamped_x
}

/// Uniform spatial grid over agent positions. Rebuilt from scratch each step;
/// neighbor queries scan the 3x3x3 block of cells around a position.
#[derive(Debug, Default)]
pub struct SpatialGrid {
    // Number of agents in each grid cell
    cell_counts: Vec<u32>,
    // Start index in cell_agent_indices for each grid cell (prefix sum)
    cell_starts: Vec<u32>,
    // Sorted list of agent indices based on grid cell
    cell_agent_indices: Vec<u32>,
    // Scratch write cursor per cell during the fill phase
    write_offsets: Vec<u32>,
}

impl SpatialGrid {
    pub fn new() -> Self {
        SpatialGrid::default()
    }

    /// Rebuilds the grid for the given positions: count agents per cell,
    /// prefix-sum the counts into start indices, then fill the sorted list.
    pub fn rebuild(&mut self, positions: &[Vec3], params: &SimParams) {
        let num_grid_cells = params.num_grid_cells as usize;
        let num_agents = positions.len();

        self.cell_counts.clear();
        self.cell_counts.resize(num_grid_cells, 0);
        self.cell_starts.clear();
        self.cell_starts.resize(num_grid_cells, 0);
        self.write_offsets.clear();
        self.write_offsets.resize(num_grid_cells, 0);
        self.cell_agent_indices.clear();
        self.cell_agent_indices.resize(num_agents, 0);

        // Phase 1: count agents per grid cell.
        for pos in positions {
            let grid_idx = get_grid_cell_idx(*pos, params) as usize;
            self.cell_counts[grid_idx] += 1;
        }

        // Phase 2: prefix sum for cell start indices.
        let mut total_sum = 0u32;
        for i in 0..num_grid_cells {
            self.cell_starts[i] = total_sum;
            total_sum += self.cell_counts[i];
        }
        debug_assert_eq!(total_sum as usize, num_agents);

        // Phase 3: fill the sorted index list.
        for (agent_idx, pos) in positions.iter().enumerate() {
            let grid_idx = get_grid_cell_idx(*pos, params) as usize;
            let write_idx = self.cell_starts[grid_idx] + self.write_offsets[grid_idx];
            self.cell_agent_indices[write_idx as usize] = agent_idx as u32;
            self.write_offsets[grid_idx] += 1;
        }
    }

    /// Helper to iterate over neighbors in the 3x3x3 grid region.
    /// Calls the provided closure `f` for each agent index found within
    /// `max_dist_sq` of `pos`, excluding `agent_idx` itself.
    /// F takes: (neighbor_agent_idx: u32) -> bool (return true to continue, false to stop early)
    pub fn for_each_neighbor<F>(
        &self,
        agent_idx: u32,
        pos: Vec3,
        max_dist_sq: f32,
        params: &SimParams,
        positions: &[Vec3],
        mut f: F,
    ) where
        F: FnMut(u32) -> bool,
    {
        if params.num_grid_cells == 0 {
            return; // Safety check
        }

        let center_x = (pos.x * params.inv_grid_cell_size).floor() as i32;
        let center_y = (pos.y * params.inv_grid_cell_size).floor() as i32;
        let center_z = (pos.z * params.inv_grid_cell_size).floor() as i32;

        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let check_x = center_x + dx;
                    let check_y = center_y + dy;
                    let check_z = center_z + dz;

                    // Check if grid cell is within bounds
                    if check_x < 0 || check_x >= params.grid_dim_x as i32
                        || check_y < 0 || check_y >= params.grid_dim_y as i32
                        || check_z < 0 || check_z >= params.grid_dim_z as i32
                    {
                        continue;
                    }

                    let grid_idx = ((check_z as u32 * params.grid_dim_y + check_y as u32)
                        * params.grid_dim_x
                        + check_x as u32) as usize;

                    if grid_idx >= self.cell_starts.len() || grid_idx >= self.cell_counts.len() {
                        log::error!("Grid index {} out of bounds for cell_starts/cell_counts.", grid_idx);
                        continue;
                    }

                    let start = self.cell_starts[grid_idx];
                    let count = self.cell_counts[grid_idx];
                    let end = start.saturating_add(count).min(self.cell_agent_indices.len() as u32);

                    // Iterate through agents in this grid cell
                    for i in start..end {
                        let neighbor_idx = self.cell_agent_indices[i as usize];

                        // Don't compare agent to itself
                        if neighbor_idx == agent_idx {
                            continue;
                        }

                        if (neighbor_idx as usize) < positions.len() {
                            let dist_sq = pos.distance_squared(positions[neighbor_idx as usize]);
                            if dist_sq < max_dist_sq {
                                if !f(neighbor_idx) {
                                    return; // Stop if closure returns false
                                }
                            }
                        } else {
                            // This indicates an indexing error somewhere upstream
                            log::error!(
                                "Neighbor index {} out of bounds during neighbor search for agent {}.",
                                neighbor_idx, agent_idx
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_params;

    #[test]
    fn finds_close_neighbors_and_skips_distant_ones() {
        let params = test_params();
        let positions = vec![
            Vec3::new(2.0, 2.0, 1.0),
            Vec3::new(2.8, 2.0, 1.0), // within range of agent 0
            Vec3::new(7.0, 7.0, 1.0), // far away
        ];
        let mut grid = SpatialGrid::new();
        grid.rebuild(&positions, &params);

        let mut found = Vec::new();
        grid.for_each_neighbor(0, positions[0], params.interaction_radius_sq, &params, &positions, |idx| {
            found.push(idx);
            true
        });
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn neighbor_scan_excludes_self() {
        let params = test_params();
        let positions = vec![Vec3::new(3.0, 3.0, 1.0)];
        let mut grid = SpatialGrid::new();
        grid.rebuild(&positions, &params);

        let mut count = 0;
        grid.for_each_neighbor(0, positions[0], params.interaction_radius_sq, &params, &positions, |_| {
            count += 1;
            true
        });
        assert_eq!(count, 0);
    }
}
