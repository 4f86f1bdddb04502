use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fitness::{score_sample, MIN_FITNESS};
use crate::genome::{crossover_genome, mutate_genome, random_genome, Genome, WHEEL_RADIUS};
use crate::phenotype::{build_car, destroy_car, CarPhenotype};
use crate::physics::PhysicsWorld;
use crate::terrain::Terrain;

pub const DEFAULT_POPULATION_SIZE: usize = 20;
pub const DEFAULT_ELITE_COUNT: usize = 2;
pub const DEFAULT_SURVIVOR_FRACTION: f32 = 0.5;
pub const DEFAULT_TOURNAMENT_SIZE: usize = 3;
pub const DEFAULT_MUTATION_RATE: f32 = 0.1;
pub const DEFAULT_STEPS_PER_INDIVIDUAL: u32 = 300;
pub const DEFAULT_WHEEL_DRIVE_SPEED: f32 = 6.0;
pub const SPAWN_POSITION: [f32; 2] = [100.0, 120.0];

/// Knobs of the generational loop, validated once before the first tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub elite_count: usize,
    /// Fraction of the ranked population eligible as parents.
    pub survivor_fraction: f32,
    pub tournament_size: usize,
    pub mutation_rate: f32,
    pub steps_per_individual: u32,
    pub wheel_drive_speed: f32,
    pub seed: u64,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: DEFAULT_POPULATION_SIZE,
            elite_count: DEFAULT_ELITE_COUNT,
            survivor_fraction: DEFAULT_SURVIVOR_FRACTION,
            tournament_size: DEFAULT_TOURNAMENT_SIZE,
            mutation_rate: DEFAULT_MUTATION_RATE,
            steps_per_individual: DEFAULT_STEPS_PER_INDIVIDUAL,
            wheel_drive_speed: DEFAULT_WHEEL_DRIVE_SPEED,
            seed: 0,
        }
    }
}

impl EvolutionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.population_size < 2 {
            return Err(format!(
                "population_size must be at least 2, got {}",
                self.population_size
            ));
        }
        if self.elite_count == 0 || self.elite_count > self.population_size {
            return Err(format!(
                "elite_count must be in 1..={}, got {}",
                self.population_size, self.elite_count
            ));
        }
        if !(0.0..=1.0).contains(&self.survivor_fraction) {
            return Err(format!(
                "survivor_fraction must be in 0..=1, got {}",
                self.survivor_fraction
            ));
        }
        if self.tournament_size == 0 {
            return Err("tournament_size must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(format!(
                "mutation_rate must be in 0..=1, got {}",
                self.mutation_rate
            ));
        }
        if self.steps_per_individual == 0 {
            return Err("steps_per_individual must be at least 1".to_string());
        }
        Ok(())
    }

    fn survivor_count(&self) -> usize {
        ((self.population_size as f32 * self.survivor_fraction).round() as usize)
            .clamp(2, self.population_size)
    }
}

/// What a single tick produced, surfaced so the host can react without
/// reaching into the loop's state.
#[derive(Clone, Debug, PartialEq)]
pub enum TickEvent {
    Stepped,
    IndividualScored {
        index: usize,
        fitness: f32,
    },
    /// Carries the score of the generation's final individual alongside the
    /// summary, so no evaluation goes unreported.
    GenerationAdvanced {
        index: usize,
        fitness: f32,
        summary: GenerationSummary,
    },
    Halted,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    pub generation: usize,
    pub best_fitness: f32,
    pub mean_fitness: f32,
    pub best_ever_fitness: f32,
    /// Highest continuous sample seen so far; reporting only, never used for
    /// selection.
    pub best_sample: f32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelPose {
    pub position: [f32; 2],
    pub radius: f32,
}

/// Per-tick state handed to an external renderer; the loop itself never
/// draws anything.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFrame {
    pub generation: usize,
    pub individual: usize,
    pub step: u32,
    pub chassis_polygon: Vec<[f32; 2]>,
    pub wheels: Vec<WheelPose>,
    pub current_score: f32,
    pub best_fitness: f32,
}

/// The whole mutable simulation: seeded generator, physics world, terrain,
/// population and evaluation cursor. Owned by whoever drives `tick`; there is
/// no global state.
pub struct SimulationState<P: PhysicsWorld> {
    config: EvolutionConfig,
    rng: SmallRng,
    world: P,
    terrain: Terrain,
    population: Vec<Genome>,
    fitnesses: Vec<f32>,
    generation: usize,
    current_index: usize,
    steps_elapsed: u32,
    current_car: Option<CarPhenotype>,
    current_polygon: Vec<[f32; 2]>,
    last_sample: f32,
    best_sample: f32,
    best_fitness: Option<f32>,
    best_genome: Option<Genome>,
    halted: bool,
}

impl<P: PhysicsWorld> SimulationState<P> {
    pub fn new(config: EvolutionConfig, mut world: P) -> Result<Self, String> {
        config.validate()?;
        let mut rng = SmallRng::seed_from_u64(config.seed);
        let terrain = Terrain::generate(&mut rng);
        terrain.install(&mut world)?;
        let population: Vec<Genome> = (0..config.population_size)
            .map(|_| random_genome(&mut rng))
            .collect();
        let fitnesses = vec![MIN_FITNESS; config.population_size];

        Ok(Self {
            config,
            rng,
            world,
            terrain,
            population,
            fitnesses,
            generation: 1,
            current_index: 0,
            steps_elapsed: 0,
            current_car: None,
            current_polygon: Vec::new(),
            last_sample: 0.0,
            best_sample: 0.0,
            best_fitness: None,
            best_genome: None,
            halted: false,
        })
    }

    /// Advances the simulation by one physics step and handles every state
    /// transition that falls on this tick: spawning the next phenotype,
    /// finishing the current evaluation window, or replacing the generation.
    pub fn tick(&mut self) -> TickEvent {
        if self.halted {
            return TickEvent::Halted;
        }
        if self.current_car.is_none() {
            if let Some(event) = self.spawn_current() {
                return event;
            }
        }

        if let Some(car) = &self.current_car {
            car.drive(&mut self.world, self.config.wheel_drive_speed);
        }
        self.world.step();
        self.steps_elapsed += 1;

        let state = self
            .current_car
            .as_ref()
            .and_then(|car| car.chassis_state(&self.world));
        let Some(state) = state else {
            warn!(
                "chassis body vanished mid-evaluation: generation={}, individual={}",
                self.generation, self.current_index
            );
            return self.finish_individual(MIN_FITNESS);
        };
        if !state.is_finite() {
            warn!(
                "physics produced a non-finite chassis state: generation={}, individual={}",
                self.generation, self.current_index
            );
            return self.finish_individual(MIN_FITNESS);
        }

        let sample = score_sample(&state, SPAWN_POSITION[0]);
        self.last_sample = sample;
        if sample > self.best_sample {
            self.best_sample = sample;
        }

        if self.steps_elapsed >= self.config.steps_per_individual {
            self.finish_individual(sample)
        } else {
            TickEvent::Stepped
        }
    }

    /// Stops the loop; every later tick reports `Halted` without touching the
    /// world.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn steps_elapsed(&self) -> u32 {
        self.steps_elapsed
    }

    pub fn population(&self) -> &[Genome] {
        &self.population
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn best_fitness(&self) -> Option<f32> {
        self.best_fitness
    }

    pub fn best_genome(&self) -> Option<&Genome> {
        self.best_genome.as_ref()
    }

    pub fn best_sample(&self) -> f32 {
        self.best_sample
    }

    pub fn render_frame(&self) -> RenderFrame {
        let mut chassis_polygon = Vec::new();
        let mut wheels = Vec::new();
        let mut current_score = 0.0;

        if let Some(car) = &self.current_car {
            for wheel in car.wheel_bodies() {
                if let Some(state) = self.world.body_state(*wheel) {
                    wheels.push(WheelPose {
                        position: state.position,
                        radius: WHEEL_RADIUS,
                    });
                }
            }
            if let Some(state) = car.chassis_state(&self.world) {
                let (sin, cos) = state.angle.sin_cos();
                chassis_polygon = self
                    .current_polygon
                    .iter()
                    .map(|p| {
                        [
                            state.position[0] + p[0] * cos - p[1] * sin,
                            state.position[1] + p[0] * sin + p[1] * cos,
                        ]
                    })
                    .collect();
                current_score = self.last_sample;
            }
        }

        RenderFrame {
            generation: self.generation,
            individual: self.current_index,
            step: self.steps_elapsed,
            chassis_polygon,
            wheels,
            current_score,
            best_fitness: self.best_sample,
        }
    }

    /// Builds the phenotype for the individual under the cursor. Returns an
    /// event when the build fails and the individual had to be scored out.
    fn spawn_current(&mut self) -> Option<TickEvent> {
        let genome = self.population[self.current_index].clone();
        match build_car(&mut self.world, &genome, SPAWN_POSITION) {
            Ok(car) => {
                self.current_polygon = genome.chassis_polygon();
                self.current_car = Some(car);
                self.steps_elapsed = 0;
                self.last_sample = 0.0;
                None
            }
            Err(err) => {
                warn!(
                    "skipping degenerate car: generation={}, individual={}, reason={err}",
                    self.generation, self.current_index
                );
                Some(self.finish_individual(MIN_FITNESS))
            }
        }
    }

    fn finish_individual(&mut self, fitness: f32) -> TickEvent {
        if let Some(mut car) = self.current_car.take() {
            destroy_car(&mut self.world, &mut car);
        }
        self.current_polygon.clear();
        self.fitnesses[self.current_index] = fitness;
        if self.best_fitness.is_none_or(|best| fitness > best) {
            self.best_fitness = Some(fitness);
            self.best_genome = Some(self.population[self.current_index].clone());
        }

        let index = self.current_index;
        self.current_index += 1;
        self.steps_elapsed = 0;
        if self.current_index >= self.config.population_size {
            let summary = self.advance_generation();
            TickEvent::GenerationAdvanced {
                index,
                fitness,
                summary,
            }
        } else {
            TickEvent::IndividualScored { index, fitness }
        }
    }

    /// Generational replacement: rank by recorded fitness, carry the elites
    /// over unchanged, then fill the rest with mutated tournament offspring
    /// drawn from the survivor pool.
    fn advance_generation(&mut self) -> GenerationSummary {
        let mut ranked: Vec<(Genome, f32)> = self
            .population
            .drain(..)
            .zip(self.fitnesses.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let best_fitness = ranked[0].1;
        let mean_fitness = ranked.iter().map(|r| r.1).sum::<f32>() / ranked.len() as f32;
        let survivors = &ranked[..self.config.survivor_count().min(ranked.len())];

        let mut next = Vec::with_capacity(self.config.population_size);
        for (genome, _) in ranked.iter().take(self.config.elite_count) {
            next.push(genome.clone());
        }
        while next.len() < self.config.population_size {
            let parent_a = tournament_select(survivors, self.config.tournament_size, &mut self.rng);
            let parent_b = tournament_select(survivors, self.config.tournament_size, &mut self.rng);
            let child = crossover_genome(parent_a, parent_b, &mut self.rng);
            next.push(mutate_genome(child, self.config.mutation_rate, &mut self.rng));
        }

        let summary = GenerationSummary {
            generation: self.generation,
            best_fitness,
            mean_fitness,
            best_ever_fitness: self.best_fitness.unwrap_or(MIN_FITNESS),
            best_sample: self.best_sample,
        };
        info!(
            "generation advanced: generation={}, best_fitness={:.3}, mean_fitness={:.3}, best_ever={:.3}",
            self.generation, best_fitness, mean_fitness, summary.best_ever_fitness
        );

        self.population = next;
        self.fitnesses = vec![MIN_FITNESS; self.config.population_size];
        self.generation += 1;
        self.current_index = 0;
        summary
    }
}

/// True tournament: sample `size` candidates from the pool and keep the
/// fittest.
fn tournament_select<'a>(
    ranked: &'a [(Genome, f32)],
    size: usize,
    rng: &mut SmallRng,
) -> &'a Genome {
    assert!(
        !ranked.is_empty(),
        "tournament_select requires non-empty input"
    );
    let len = ranked.len();
    let mut best = &ranked[rng.random_range(0..len)];
    for _ in 1..size.max(1) {
        let candidate = &ranked[rng.random_range(0..len)];
        if candidate.1 > best.1 {
            best = candidate;
        }
    }
    &best.0
}
