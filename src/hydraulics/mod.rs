pub mod manning;
pub mod solver;
pub mod state;

pub use manning::{normal_depth_m, travel_time_s};
pub use solver::{HydraulicSolver, OpeningSolution, Solved, SolverSettings};
pub use state::{BoundaryFlows, HydraulicState};
