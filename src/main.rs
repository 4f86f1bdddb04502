use std::net::SocketAddr;

use tracing::{error, info, warn};

use genetic_cars::{build_router, start_sim_worker, EvolutionConfig, SimController};

const DEFAULT_BIND_HOST: &str = "0.0.0.0";
const DEFAULT_BIND_PORT: u16 = 8787;
const PORT_FALLBACK_ATTEMPTS: u16 = 16;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .compact()
        .init();

    let config = EvolutionConfig {
        seed: resolve_seed(),
        ..EvolutionConfig::default()
    };
    info!(
        "evolving cars: population={}, steps_per_individual={}, seed={}",
        config.population_size, config.steps_per_individual, config.seed
    );

    let controller = SimController::new(&config);
    start_sim_worker(controller.clone(), config);

    let app = build_router(controller);
    let bind_port = resolve_bind_port();
    let (listener, addr) = match bind_listener(DEFAULT_BIND_HOST, bind_port).await {
        Ok(bound) => bound,
        Err(message) => {
            error!("{message}");
            return;
        }
    };
    info!("genetic-cars listening on http://{addr}");
    if let Err(err) = axum::serve(listener, app).await {
        error!("server exited unexpectedly: {err}");
    }
}

fn resolve_seed() -> u64 {
    const ENV_VAR: &str = "SIM_SEED";
    if let Ok(raw_value) = std::env::var(ENV_VAR) {
        match raw_value.parse::<u64>() {
            Ok(parsed) => return parsed,
            Err(_) => warn!("{ENV_VAR} must be an unsigned integer; got '{raw_value}'. Using a random seed"),
        }
    }
    rand::random::<u64>()
}

fn resolve_bind_port() -> u16 {
    const ENV_VAR: &str = "SIM_PORT";
    if let Ok(raw_value) = std::env::var(ENV_VAR) {
        match raw_value.parse::<u16>() {
            Ok(parsed) if parsed > 0 => return parsed,
            _ => warn!(
                "{ENV_VAR} must be an integer in range 1-65535; got '{raw_value}'. Using default {DEFAULT_BIND_PORT}"
            ),
        }
    }
    DEFAULT_BIND_PORT
}

async fn bind_listener(
    host: &str,
    desired_port: u16,
) -> Result<(tokio::net::TcpListener, SocketAddr), String> {
    let prefer_default_port = desired_port == DEFAULT_BIND_PORT;
    match tokio::net::TcpListener::bind((host, desired_port)).await {
        Ok(listener) => {
            let addr = listener
                .local_addr()
                .map_err(|err| format!("bound listener but failed reading local address: {err}"))?;
            Ok((listener, addr))
        }
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse && prefer_default_port => {
            for offset in 1..=PORT_FALLBACK_ATTEMPTS {
                let Some(candidate_port) = desired_port.checked_add(offset) else {
                    break;
                };
                match tokio::net::TcpListener::bind((host, candidate_port)).await {
                    Ok(listener) => {
                        let addr = listener.local_addr().map_err(|bind_err| {
                            format!(
                                "bound listener on fallback port but failed reading local address: {bind_err}"
                            )
                        })?;
                        warn!(
                            "port {desired_port} is in use, falling back to http://{addr}; set SIM_PORT to choose a fixed port"
                        );
                        return Ok((listener, addr));
                    }
                    Err(bind_err) if bind_err.kind() == std::io::ErrorKind::AddrInUse => continue,
                    Err(bind_err) => {
                        return Err(format!(
                            "failed to bind {host}:{candidate_port}: {bind_err}"
                        ));
                    }
                }
            }
            Err(format!(
                "ports {desired_port}-{} are all in use; set SIM_PORT to a free port",
                desired_port.saturating_add(PORT_FALLBACK_ATTEMPTS)
            ))
        }
        Err(err) => Err(format!("failed to bind {host}:{desired_port}: {err}")),
    }
}
