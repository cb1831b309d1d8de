mod demo;
mod logger;

use flow_runtime::{
    DeploymentConfiguration, DevServerHandle, LoggingRpcHandler, Pusher, ServerRpcHandler, Session, StdioServer,
};
use std::io;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const CLOCK_INTERVAL: Duration = Duration::from_secs(1);

fn main() {
    if let Err(err) = run() {
        eprintln!("flow_host fatal error: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    logger::init();
    let config = DeploymentConfiguration::from_env()?;
    config.validate(demo::I18N_PROVIDERS)?;
    log::info!(
        "starting flow_host (production_mode={}, sync_id_check={})",
        config.production_mode,
        config.sync_id_check_enabled
    );

    let dev_server = config.dev_server.clone().map(|dev| Arc::new(DevServerHandle::new(dev)));
    if let Some(dev) = &dev_server {
        let dev = dev.clone();
        // Dev tooling failures never take the UI host down.
        thread::spawn(move || match dev.ensure_started() {
            Ok(port) => log::info!("dev server ready on port {port}"),
            Err(err) => log::error!("dev server unavailable: {err}"),
        });
    }

    let mut rpc = ServerRpcHandler::default();
    if std::env::var_os("FLOW_LOG_RPC").is_some() {
        rpc.wrap_all(LoggingRpcHandler::wrap);
    }

    let mut server = StdioServer::new(&config, rpc, demo::build);
    if let Some(dev) = &dev_server {
        server = server.with_dev_server(dev.clone());
    }
    let running = Arc::new(AtomicBool::new(true));
    let clock = spawn_clock(server.session().clone(), server.pusher(), running.clone());

    let stdin = io::stdin();
    let result = server.run(stdin.lock(), io::stdout());

    running.store(false, Ordering::Relaxed);
    if clock.is_finished() {
        if let Err(err) = clock.join() {
            log::error!("clock thread join failed: {err:?}");
        }
    }
    if let Some(dev) = dev_server {
        dev.shutdown();
    }

    result?;
    Ok(())
}

/// Pushes a server clock update to every open UI.
fn spawn_clock(session: Arc<Session>, pusher: Pusher, running: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::Relaxed) {
            thread::sleep(CLOCK_INTERVAL);
            let ui_ids = session.lock().ui_ids();
            for ui in ui_ids {
                session.access_ui(ui, demo::tick);
                if !pusher.push(ui) {
                    log::debug!("clock update for UI {} not delivered", ui.0);
                }
            }
        }
    })
}
