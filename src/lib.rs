pub mod bits; // Alarm/mode bit table and packed register fields
pub mod channels; // Inter-component communication channels
pub mod command; // Command requests and their register mapping
pub mod command_writer; // Writes commands and requests confirmation polls
pub mod config; // Configuration management
pub mod coordinator; // Poll cycle
pub mod counter_filter; // Water counter noise suppression
pub mod decoder; // Register words to snapshot
pub mod error;
pub mod modbus; // Modbus TCP codec and transport
pub mod options; // Command line options parsing
pub mod prelude;
pub mod register; // Register layout and read spans
pub mod scheduler; // Poll timer
pub mod snapshot;
pub mod state_store; // Last known snapshot and subscriptions

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::command_writer::CommandWriter;
use crate::coordinator::{Coordinator, PollStats};
use crate::modbus::Transport;
use crate::options::Options;
use crate::prelude::*;
use crate::scheduler::Scheduler;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A running bridge for one controller: poll loop, scheduler, command
/// writer and state store, wired together.
pub struct Components {
    pub config: ConfigWrapper,
    pub map: Arc<RegisterMap>,
    pub store: StateStore,
    pub writer: CommandWriter,
    pub channels: Channels,
    pub stats: Arc<Mutex<PollStats>>,
    handles: Vec<JoinHandle<()>>,
}

impl Components {
    /// Starts everything against the real controller.
    pub fn start(config: ConfigWrapper) -> Result<Self> {
        let io = Arc::new(Transport::new(config.controller()));
        Self::with_io(config, io)
    }

    /// Starts everything against any register backend. Must be called from
    /// within a tokio runtime.
    pub fn with_io(config: ConfigWrapper, io: Arc<dyn RegisterIo>) -> Result<Self> {
        let controller = config.controller();
        let map = Arc::new(RegisterMap::build(controller)?);
        info!(
            "register map: {} fields in {} spans ({} words)",
            map.fields().len(),
            map.spans().len(),
            map.words_required()
        );

        let channels = Channels::new();
        let store = StateStore::new(channels.clone(), &map, controller.scan_interval());

        // the coordinator subscribes on construction, so build it before
        // anything can send to it
        let coordinator = Coordinator::new(
            config.clone(),
            map.clone(),
            io.clone(),
            store.clone(),
            channels.clone(),
        );
        let stats = coordinator.stats();
        let writer = CommandWriter::new(&config, map.clone(), io, channels.clone(), stats.clone());
        let scheduler = Scheduler::new(config.clone(), channels.clone());

        let coordinator_handle = tokio::spawn(async move {
            if let Err(e) = coordinator.start().await {
                error!("Coordinator task failed: {}", e);
            }
        });
        let scheduler_handle = tokio::spawn(async move {
            if let Err(e) = scheduler.start().await {
                error!("Scheduler task failed: {}", e);
            }
        });

        Ok(Self {
            config,
            map,
            store,
            writer,
            channels,
            stats,
            handles: vec![scheduler_handle, coordinator_handle],
        })
    }

    pub fn snapshot(&self) -> Arc<ControllerSnapshot> {
        self.store.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<state_store::ChannelData> {
        self.store.subscribe()
    }

    pub fn subscribe_with<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(Arc<ControllerSnapshot>) + Send + 'static,
    {
        self.store.subscribe_with(callback)
    }

    pub async fn send_command(&self, command: Command) -> Result<(), CommandError> {
        self.writer.write(command).await
    }

    pub fn is_stale(&self) -> bool {
        self.store.is_stale()
    }

    /// Stops the scheduler, lets the coordinator drain its queue and close
    /// the transport, then notifies subscribers.
    pub async fn stop(self) -> PollStats {
        info!("Stopping all components...");

        let _ = self.channels.shutdown.send(());
        let _ = self
            .channels
            .to_coordinator
            .send(coordinator::ChannelData::Shutdown);

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Error waiting for task: {}", e);
            }
        }

        self.store.shutdown();
        info!("Shutdown complete");

        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

fn init_logging(loglevel: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(loglevel))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();
}

async fn wait_for_snapshot(
    components: &Components,
    mut receiver: broadcast::Receiver<state_store::ChannelData>,
) -> Result<Arc<ControllerSnapshot>> {
    let current = components.snapshot();
    if current.is_valid {
        return Ok(current);
    }

    loop {
        match receiver.recv().await {
            Ok(state_store::ChannelData::Snapshot(snapshot)) => return Ok(snapshot),
            Ok(state_store::ChannelData::Shutdown) => bail!("shut down before first snapshot"),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => bail!("state store closed"),
        }
    }
}

pub async fn app() -> Result<()> {
    let options = Options::new();

    let config = config::Config::new(options.config_file.clone())?;
    init_logging(&config.loglevel);
    info!("neptun-bridge {} starting, config file {}", CARGO_PKG_VERSION, options.config_file);

    let config = ConfigWrapper::from_config(config);
    config.log_summary();

    let commands = options
        .commands
        .iter()
        .map(|c| Command::from_str(c))
        .collect::<Result<Vec<_>>>()?;

    let components = Components::start(config.clone())?;
    let receiver = components.subscribe();

    for command in commands {
        if let Err(e) = components.send_command(command.clone()).await {
            error!("{:?}: {}", command, e);
        }
    }

    if options.once {
        // enough for every span to time out once, plus a retry cycle
        let limit = config.controller().timeout() * (components.map.spans().len() as u32 + 1)
            + config.controller().scan_interval();
        let result = tokio::time::timeout(limit, wait_for_snapshot(&components, receiver)).await;
        components.stop().await.print_summary();

        let snapshot = result.map_err(|_| anyhow!("no snapshot within {}s", limit.as_secs()))??;
        println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        return Ok(());
    }

    if options.json {
        components.subscribe_with(|snapshot| match serde_json::to_string(&*snapshot) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("failed to serialize snapshot: {}", e),
        });
    }

    let runtime = async {
        match options.runtime {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Failed to listen for ctrl+c: {}", e);
            }
            info!("ctrl+c received, shutting down");
        }
        _ = runtime => info!("runtime limit reached, shutting down"),
    }

    if components.is_stale() {
        warn!("last successful poll is older than two scan intervals");
    }

    components.stop().await.print_summary();

    Ok(())
}
