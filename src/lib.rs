pub mod evolution;
pub mod fitness;
pub mod genome;
pub mod phenotype;
pub mod physics;
pub mod server;
pub mod terrain;

pub use evolution::{EvolutionConfig, SimulationState, TickEvent};
pub use genome::Genome;
pub use physics::{PhysicsWorld, RapierWorld};
pub use server::{build_router, start_sim_worker, SimController};
pub use terrain::Terrain;
