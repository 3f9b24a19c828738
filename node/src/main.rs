mod config;
mod source;

use std::{
    env, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use compression::HandlerBuilder;
use log::{debug, info, warn};
use parameter_server::{ParameterServer, PeerTransport, TrainingSession, wired_handler};
use tokio::{net::TcpListener, signal, task, time};

use crate::{
    config::{NodeConfig, PeerConfig},
    source::Quadratic,
};

/// How long peers get to close their links once training is over.
const GRACE_PERIOD: Duration = Duration::from_secs(5);
const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_BACKOFF: Duration = Duration::from_millis(250);
const GRADIENT_NOISE: f32 = 0.01;
const LOG_EVERY: u64 = 100;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::var("NODE_CONFIG").map_err(io::Error::other)?;
    let config = NodeConfig::load(&path)?;
    let len = config.encoding.len.get();

    let server = ParameterServer::new(config.id, len, &config.server);
    for peer in &config.peers {
        server.register_peer(peer.id);
    }

    let list = TcpListener::bind(&config.listen).await?;
    info!("{} listening at {}", config.id, config.listen);
    let acceptor = tokio::spawn(accept(list, server.clone()));

    let transport = PeerTransport::for_server(&server, &config.server);
    for peer in &config.peers {
        connect(&transport, peer).await?;
    }

    let handler = wired_handler(&HandlerBuilder::new(), &config.encoding, &server, &transport)?;
    let source = Quadratic::new(len, GRADIENT_NOISE, config.seed);
    let mut session = TrainingSession::new(source, handler, server.clone())?;

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let mut training = task::spawn_blocking(move || train(&mut session, &config, &flag));

    let res = tokio::select! {
        res = &mut training => res,
        _ = signal::ctrl_c() => {
            info!("interrupted, wrapping up");
            stop.store(true, Ordering::Release);
            training.await
        }
    };

    let loss = res.map_err(io::Error::other)??;
    info!("training finished, loss={loss}");

    transport.shutdown().await;
    acceptor.abort();

    if time::timeout(GRACE_PERIOD, server.run()).await.is_err() {
        warn!("peers did not disconnect in time");
        server.shutdown();
    }

    info!("{:?}", server.diagnostics().snapshot());
    Ok(())
}

/// Accepts inbound links until aborted.
async fn accept(list: TcpListener, server: ParameterServer) -> io::Result<()> {
    loop {
        let (stream, addr) = list.accept().await?;
        stream.set_nodelay(true)?;

        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        server.spawn(rx, tx);
        debug!("accepted link from {addr}");
    }
}

/// Links to `peer`, retrying while it is still starting up.
async fn connect(transport: &PeerTransport, peer: &PeerConfig) -> io::Result<()> {
    let mut attempt = 1;

    loop {
        match transport.connect(peer.id, &peer.addr).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                debug!("{} not reachable yet: {e}", peer.id);
                attempt += 1;
                time::sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Runs the training loop on the current thread until every iteration ran or `stop` is set.
///
/// # Returns
/// The final loss.
fn train(
    session: &mut TrainingSession<Quadratic>,
    config: &NodeConfig,
    stop: &AtomicBool,
) -> io::Result<f32> {
    let mut params = vec![0.; session.handler().len()];
    let per_epoch = config.iterations_per_epoch.get();

    for iteration in 0..config.iterations.get() {
        if stop.load(Ordering::Acquire) {
            info!("stopped at iteration {iteration}");
            break;
        }

        let epoch = iteration / per_epoch;

        if let Some(merged) = session.step(&params, iteration, epoch)? {
            params
                .iter_mut()
                .zip(merged.iter())
                .for_each(|(p, g)| *p -= config.learning_rate * g);
        }

        if iteration % LOG_EVERY == 0 {
            info!(
                iteration = iteration, epoch = epoch;
                "loss={}",
                session.source().loss(&params)
            );
        }
    }

    Ok(session.source().loss(&params))
}

#[cfg(test)]
mod tests {
    use parameter_server::local_handler;

    use super::*;

    const CONFIG: &str = r#"{
        "id": 0,
        "listen": "127.0.0.1:0",
        "iterations": 1000000,
        "learning_rate": 0.1,
        "seed": 7,
        "encoding": { "len": 16, "boundary": 4, "threshold": { "fixed": { "threshold": 0.1 } } }
    }"#;

    fn session(config: &NodeConfig) -> TrainingSession<Quadratic> {
        let len = config.encoding.len.get();
        let server = ParameterServer::new(config.id, len, &config.server);
        let handler = local_handler(&HandlerBuilder::new(), &config.encoding, &server).unwrap();
        let source = Quadratic::new(len, GRADIENT_NOISE, config.seed);
        TrainingSession::new(source, handler, server).unwrap()
    }

    #[test]
    fn runs_every_iteration() {
        let config = NodeConfig::parse(&CONFIG.replace("1000000", "5")).unwrap();
        let mut session = session(&config);

        train(&mut session, &config, &AtomicBool::new(false)).unwrap();
        assert_eq!(session.handler().dispatched(), 5);
    }

    #[test]
    fn raised_stop_flag_ends_training() {
        let config = NodeConfig::parse(CONFIG).unwrap();
        let mut session = session(&config);

        train(&mut session, &config, &AtomicBool::new(true)).unwrap();
        assert_eq!(session.handler().dispatched(), 0);
    }
}
