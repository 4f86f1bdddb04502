use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::evolution::{
    EvolutionConfig, GenerationSummary, RenderFrame, SimulationState, TickEvent,
};
use crate::genome::Genome;
use crate::physics::{RapierWorld, PHYSICS_DT};
use crate::terrain::Terrain;

const MIN_RUN_SPEED: f32 = 0.5;
const MAX_RUN_SPEED: f32 = 8.0;
const MIN_POPULATION_SIZE: usize = 2;
const MAX_POPULATION_SIZE: usize = 200;
const PAUSE_POLL_MS: u64 = 50;
const EVENT_CHANNEL_CAPACITY: usize = 256;
const MAX_FITNESS_HISTORY_POINTS: usize = 512;
/// Physics runs at 60 Hz; frames are streamed every other tick.
const FRAME_STRIDE: u64 = 2;

/// Everything a client needs to describe where the run currently stands.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub generation: usize,
    pub population_size: usize,
    pub current_individual: usize,
    pub current_step: u32,
    pub best_fitness: Option<f32>,
    pub best_sample: f32,
    pub paused: bool,
    pub run_speed: f32,
    pub halted: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { status: RunStatus },
    Terrain { terrain: Terrain },
    Frame { frame: RenderFrame },
    IndividualScored { index: usize, fitness: f32 },
    GenerationSummary { summary: GenerationSummary },
    Error { message: String },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunControlRequest {
    action: String,
    run_speed: Option<f32>,
    seed: Option<u64>,
    population_size: Option<usize>,
}

#[derive(Clone, Debug)]
struct CommandState {
    paused: bool,
    restart_requested: bool,
    restart_seed: Option<u64>,
    restart_population: Option<usize>,
    halt_requested: bool,
    run_speed: f32,
}

#[derive(Clone, Debug)]
struct SharedState {
    status: RunStatus,
    terrain: Option<Terrain>,
    fitness_history: Vec<GenerationSummary>,
    current_genome: Option<Genome>,
    best_genome: Option<Genome>,
}

/// Shared handle between the HTTP surface and the simulation worker thread.
/// Handlers read snapshots and queue commands; the worker owns the actual
/// simulation and publishes events through the broadcast channel.
pub struct SimController {
    commands: Mutex<CommandState>,
    shared: Mutex<SharedState>,
    events: broadcast::Sender<StreamEvent>,
}

impl SimController {
    pub fn new(config: &EvolutionConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            commands: Mutex::new(CommandState {
                paused: false,
                restart_requested: false,
                restart_seed: None,
                restart_population: None,
                halt_requested: false,
                run_speed: 1.0,
            }),
            shared: Mutex::new(SharedState {
                status: RunStatus {
                    generation: 1,
                    population_size: config.population_size,
                    current_individual: 0,
                    current_step: 0,
                    best_fitness: None,
                    best_sample: 0.0,
                    paused: false,
                    run_speed: 1.0,
                    halted: false,
                },
                terrain: None,
                fitness_history: Vec::new(),
                current_genome: None,
                best_genome: None,
            }),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub fn snapshot_status(&self) -> RunStatus {
        self.shared
            .lock()
            .expect("simulation shared mutex poisoned")
            .status
            .clone()
    }

    pub fn snapshot_terrain(&self) -> Option<Terrain> {
        self.shared
            .lock()
            .expect("simulation shared mutex poisoned")
            .terrain
            .clone()
    }

    pub fn fitness_history(&self) -> Vec<GenerationSummary> {
        self.shared
            .lock()
            .expect("simulation shared mutex poisoned")
            .fitness_history
            .clone()
    }

    pub fn current_genome(&self) -> Option<Genome> {
        self.shared
            .lock()
            .expect("simulation shared mutex poisoned")
            .current_genome
            .clone()
    }

    pub fn best_genome(&self) -> Option<Genome> {
        self.shared
            .lock()
            .expect("simulation shared mutex poisoned")
            .best_genome
            .clone()
    }

    pub fn apply_control(&self, request: RunControlRequest) -> Result<RunStatus, String> {
        {
            let mut commands = self
                .commands
                .lock()
                .expect("simulation command mutex poisoned");
            match request.action.as_str() {
                "pause" => commands.paused = true,
                "resume" => commands.paused = false,
                "toggle_pause" => commands.paused = !commands.paused,
                "restart" => {
                    if let Some(requested) = request.population_size {
                        if !(MIN_POPULATION_SIZE..=MAX_POPULATION_SIZE).contains(&requested) {
                            return Err(format!(
                                "populationSize must be in {MIN_POPULATION_SIZE}..={MAX_POPULATION_SIZE}, got {requested}"
                            ));
                        }
                        commands.restart_population = Some(requested);
                    }
                    commands.restart_requested = true;
                    commands.restart_seed = request.seed;
                    commands.paused = false;
                }
                "halt" => commands.halt_requested = true,
                "set_run_speed" => {
                    let Some(requested) = request.run_speed else {
                        return Err("runSpeed is required for set_run_speed".to_string());
                    };
                    if !requested.is_finite() {
                        return Err("runSpeed must be finite".to_string());
                    }
                    commands.run_speed = requested.clamp(MIN_RUN_SPEED, MAX_RUN_SPEED);
                }
                other => return Err(format!("unknown control action '{other}'")),
            }
        }
        let status = {
            let mut shared = self
                .shared
                .lock()
                .expect("simulation shared mutex poisoned");
            let commands = self
                .commands
                .lock()
                .expect("simulation command mutex poisoned");
            shared.status.paused = commands.paused;
            shared.status.run_speed = commands.run_speed;
            shared.status.clone()
        };
        self.broadcast_status(status.clone());
        Ok(status)
    }

    fn command_snapshot(&self) -> (bool, bool, Option<u64>, Option<usize>, bool, f32) {
        let mut commands = self
            .commands
            .lock()
            .expect("simulation command mutex poisoned");
        let restart = commands.restart_requested;
        commands.restart_requested = false;
        let restart_seed = commands.restart_seed.take();
        let restart_population = commands.restart_population.take();
        (
            commands.paused,
            restart,
            restart_seed,
            restart_population,
            commands.halt_requested,
            commands.run_speed,
        )
    }

    fn broadcast_status(&self, status: RunStatus) {
        let _ = self.events.send(StreamEvent::Status { status });
    }

    fn publish_terrain(&self, terrain: Terrain) {
        {
            let mut shared = self
                .shared
                .lock()
                .expect("simulation shared mutex poisoned");
            shared.terrain = Some(terrain.clone());
        }
        let _ = self.events.send(StreamEvent::Terrain { terrain });
    }

    fn publish_frame(&self, frame: RenderFrame) {
        let _ = self.events.send(StreamEvent::Frame { frame });
    }

    fn publish_error(&self, message: String) {
        error!("{message}");
        let _ = self.events.send(StreamEvent::Error { message });
    }

    fn update_status(&self, update: impl FnOnce(&mut RunStatus)) {
        let status = {
            let mut shared = self
                .shared
                .lock()
                .expect("simulation shared mutex poisoned");
            update(&mut shared.status);
            shared.status.clone()
        };
        self.broadcast_status(status);
    }

    fn record_individual(&self, index: usize, fitness: f32) {
        let _ = self.events.send(StreamEvent::IndividualScored { index, fitness });
    }

    fn set_best_genome(&self, best_genome: Option<Genome>) {
        if best_genome.is_none() {
            return;
        }
        let mut shared = self
            .shared
            .lock()
            .expect("simulation shared mutex poisoned");
        shared.best_genome = best_genome;
    }

    fn record_generation(&self, summary: GenerationSummary) {
        {
            let mut shared = self
                .shared
                .lock()
                .expect("simulation shared mutex poisoned");
            shared.fitness_history.push(summary.clone());
            if shared.fitness_history.len() > MAX_FITNESS_HISTORY_POINTS {
                let excess = shared.fitness_history.len() - MAX_FITNESS_HISTORY_POINTS;
                shared.fitness_history.drain(..excess);
            }
        }
        let _ = self.events.send(StreamEvent::GenerationSummary { summary });
    }

    fn set_current_genome(&self, genome: Option<Genome>) {
        let mut shared = self
            .shared
            .lock()
            .expect("simulation shared mutex poisoned");
        shared.current_genome = genome;
    }
}

/// Runs the evolutionary loop on a dedicated thread. The loop owns its rapier
/// world outright; the rest of the process only sees it through the
/// controller.
pub fn start_sim_worker(controller: Arc<SimController>, config: EvolutionConfig) {
    std::thread::spawn(move || {
        let mut config = config;
        let mut sim = match SimulationState::new(config.clone(), RapierWorld::new()) {
            Ok(sim) => sim,
            Err(err) => {
                controller.publish_error(format!("simulation failed to start: {err}"));
                return;
            }
        };
        controller.publish_terrain(sim.terrain().clone());
        sync_status(&controller, &sim, false, 1.0);
        let mut ticks: u64 = 0;

        loop {
            let (paused, restart, restart_seed, restart_population, halt, run_speed) =
                controller.command_snapshot();
            if halt {
                sim.halt();
                sync_status(&controller, &sim, paused, run_speed);
                info!("simulation halted on request");
                return;
            }
            if restart {
                config.seed = restart_seed.unwrap_or(config.seed.wrapping_add(1));
                if let Some(population_size) = restart_population {
                    config.population_size = population_size;
                    config.elite_count = config.elite_count.min(population_size);
                }
                sim = match SimulationState::new(config.clone(), RapierWorld::new()) {
                    Ok(sim) => sim,
                    Err(err) => {
                        controller.publish_error(format!("simulation failed to restart: {err}"));
                        return;
                    }
                };
                info!(
                    "simulation restarted: seed={}, population={}",
                    config.seed, config.population_size
                );
                controller.publish_terrain(sim.terrain().clone());
                controller.set_current_genome(None);
                sync_status(&controller, &sim, paused, run_speed);
            }
            if paused {
                std::thread::sleep(Duration::from_millis(PAUSE_POLL_MS));
                continue;
            }

            let tick_started = Instant::now();
            ticks += 1;
            match sim.tick() {
                TickEvent::Stepped => {
                    if ticks % FRAME_STRIDE == 0 {
                        controller.publish_frame(sim.render_frame());
                    }
                }
                TickEvent::IndividualScored { index, fitness } => {
                    controller.record_individual(index, fitness);
                    controller.set_best_genome(sim.best_genome().cloned());
                    let next = sim.population().get(sim.current_index()).cloned();
                    controller.set_current_genome(next);
                    sync_status(&controller, &sim, paused, run_speed);
                }
                TickEvent::GenerationAdvanced {
                    index,
                    fitness,
                    summary,
                } => {
                    controller.record_individual(index, fitness);
                    controller.set_best_genome(sim.best_genome().cloned());
                    controller.record_generation(summary);
                    controller.set_current_genome(sim.population().first().cloned());
                    sync_status(&controller, &sim, paused, run_speed);
                }
                TickEvent::Halted => {
                    sync_status(&controller, &sim, paused, run_speed);
                    return;
                }
            }

            let pacing = run_speed.clamp(MIN_RUN_SPEED, MAX_RUN_SPEED);
            let target = Duration::from_secs_f32(PHYSICS_DT / pacing);
            let elapsed = tick_started.elapsed();
            if elapsed < target {
                std::thread::sleep(target - elapsed);
            }
        }
    });
}

fn sync_status<P: crate::physics::PhysicsWorld>(
    controller: &SimController,
    sim: &SimulationState<P>,
    paused: bool,
    run_speed: f32,
) {
    let generation = sim.generation();
    let population_size = sim.config().population_size;
    let current_individual = sim.current_index();
    let current_step = sim.steps_elapsed();
    let best_fitness = sim.best_fitness();
    let best_sample = sim.best_sample();
    let halted = sim.is_halted();
    controller.update_status(move |status| {
        status.generation = generation;
        status.population_size = population_size;
        status.current_individual = current_individual;
        status.current_step = current_step;
        status.best_fitness = best_fitness;
        status.best_sample = best_sample;
        status.paused = paused;
        status.run_speed = run_speed;
        status.halted = halted;
    });
}

pub fn build_router(controller: Arc<SimController>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/run/state", get(run_state_handler))
        .route("/api/run/terrain", get(run_terrain_handler))
        .route("/api/run/history", get(run_history_handler))
        .route("/api/run/control", post(run_control_handler))
        .route("/api/run/genome/current", get(run_current_genome_handler))
        .route("/api/run/genome/best", get(run_best_genome_handler))
        .route("/api/run/ws", get(ws_run_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(controller)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn run_state_handler(State(controller): State<Arc<SimController>>) -> Json<RunStatus> {
    Json(controller.snapshot_status())
}

async fn run_terrain_handler(
    State(controller): State<Arc<SimController>>,
) -> Result<Json<Terrain>, (StatusCode, String)> {
    controller.snapshot_terrain().map(Json).ok_or((
        StatusCode::NOT_FOUND,
        "terrain is not generated yet".to_string(),
    ))
}

async fn run_history_handler(
    State(controller): State<Arc<SimController>>,
) -> Json<Vec<GenerationSummary>> {
    Json(controller.fitness_history())
}

async fn run_control_handler(
    State(controller): State<Arc<SimController>>,
    Json(request): Json<RunControlRequest>,
) -> Result<Json<RunStatus>, (StatusCode, String)> {
    let status = controller
        .apply_control(request)
        .map_err(|message| (StatusCode::BAD_REQUEST, message))?;
    Ok(Json(status))
}

async fn run_current_genome_handler(
    State(controller): State<Arc<SimController>>,
) -> Result<Json<Genome>, (StatusCode, String)> {
    controller.current_genome().map(Json).ok_or((
        StatusCode::NOT_FOUND,
        "no current genome available".to_string(),
    ))
}

async fn run_best_genome_handler(
    State(controller): State<Arc<SimController>>,
) -> Result<Json<Genome>, (StatusCode, String)> {
    controller.best_genome().map(Json).ok_or((
        StatusCode::NOT_FOUND,
        "no best genome available".to_string(),
    ))
}

async fn ws_run_handler(
    ws: WebSocketUpgrade,
    State(controller): State<Arc<SimController>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_run_socket(socket, controller))
}

async fn handle_run_socket(mut socket: WebSocket, controller: Arc<SimController>) {
    let status = controller.snapshot_status();
    if send_stream_event(&mut socket, StreamEvent::Status { status })
        .await
        .is_err()
    {
        return;
    }
    if let Some(terrain) = controller.snapshot_terrain() {
        if send_stream_event(&mut socket, StreamEvent::Terrain { terrain })
            .await
            .is_err()
        {
            return;
        }
    }

    let mut rx = controller.subscribe();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_stream_event(&mut socket, event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("run websocket lagged by {skipped} events");
                    let status = controller.snapshot_status();
                    if send_stream_event(&mut socket, StreamEvent::Status { status })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    info!("run websocket closed: {err}");
                    break;
                }
            },
        }
    }
}

async fn send_stream_event(socket: &mut WebSocket, event: StreamEvent) -> Result<(), ()> {
    let text = match serde_json::to_string(&event) {
        Ok(value) => value,
        Err(err) => {
            error!("failed to serialize stream event: {err}");
            return Err(());
        }
    };
    socket.send(Message::Text(text.into())).await.map_err(|err| {
        let msg = err.to_string();
        if msg.contains("connection closed") || msg.contains("Connection reset") {
            info!("run websocket disconnected while sending event");
        } else {
            warn!("failed to send run stream event: {err}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(action: &str) -> RunControlRequest {
        RunControlRequest {
            action: action.to_string(),
            run_speed: None,
            seed: None,
            population_size: None,
        }
    }

    #[test]
    fn pause_resume_and_toggle_round_trip() {
        let controller = SimController::new(&EvolutionConfig::default());
        let status = controller.apply_control(control("pause")).unwrap();
        assert!(status.paused);
        let status = controller.apply_control(control("toggle_pause")).unwrap();
        assert!(!status.paused);
        let status = controller.apply_control(control("resume")).unwrap();
        assert!(!status.paused);
    }

    #[test]
    fn run_speed_is_clamped_and_required() {
        let controller = SimController::new(&EvolutionConfig::default());
        assert!(controller.apply_control(control("set_run_speed")).is_err());
        let mut request = control("set_run_speed");
        request.run_speed = Some(100.0);
        let status = controller.apply_control(request).unwrap();
        assert_eq!(status.run_speed, MAX_RUN_SPEED);
        let mut request = control("set_run_speed");
        request.run_speed = Some(f32::NAN);
        assert!(controller.apply_control(request).is_err());
    }

    #[test]
    fn unknown_actions_are_rejected() {
        let controller = SimController::new(&EvolutionConfig::default());
        assert!(controller.apply_control(control("warp")).is_err());
    }

    #[test]
    fn restart_consumes_the_pending_seed_once() {
        let controller = SimController::new(&EvolutionConfig::default());
        let mut request = control("restart");
        request.seed = Some(42);
        request.population_size = Some(8);
        controller.apply_control(request).unwrap();
        let (_, restart, seed, population, _, _) = controller.command_snapshot();
        assert!(restart);
        assert_eq!(seed, Some(42));
        assert_eq!(population, Some(8));
        let (_, restart, seed, population, _, _) = controller.command_snapshot();
        assert!(!restart);
        assert_eq!(seed, None);
        assert_eq!(population, None);
    }

    #[test]
    fn restart_rejects_out_of_range_population_sizes() {
        let controller = SimController::new(&EvolutionConfig::default());
        let mut request = control("restart");
        request.population_size = Some(1);
        assert!(controller.apply_control(request).is_err());
        let mut request = control("restart");
        request.population_size = Some(MAX_POPULATION_SIZE + 1);
        assert!(controller.apply_control(request).is_err());
    }
}
