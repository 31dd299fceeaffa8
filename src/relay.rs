use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use core_affinity::CoreId;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::context::RunContext;
use crate::fanout::fanout_channel;
use crate::listener::{DatagramSource, Listener, bind_listener};
use crate::stats::RelayStats;
use crate::worker::{DatagramSink, RelayWorker, outbound_socket};

/// One listener thread feeding one relay worker per destination
pub struct Relay {
    config: RelayConfig,
    stats: Arc<RelayStats>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let stats = Arc::new(RelayStats::new(&config.destinations));
        Self { config, stats }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Relay from the configured UDP port until `ctx` is cancelled.
    ///
    /// Fails if the listening socket cannot be bound; the workers that were already
    /// started are then cancelled and joined before returning.
    pub fn run(&self, ctx: &RunContext) -> Result<()> {
        let listen_addr = self.config.listen_addr;
        self.run_with(ctx, || bind_listener(listen_addr), outbound_socket)
    }

    /// [`run`](Self::run) with the socket seams supplied by the caller.
    ///
    /// `open_source` is called once the workers are running. `open_sink` is called by
    /// each worker for its own destination, and again before a send whenever the
    /// previous open failed.
    pub fn run_with<S, K>(
        &self,
        ctx: &RunContext,
        open_source: impl FnOnce() -> Result<S>,
        open_sink: impl Fn(SocketAddr) -> io::Result<K> + Sync,
    ) -> Result<()>
    where
        S: DatagramSource,
        K: DatagramSink,
    {
        let (publisher, subscribers) =
            fanout_channel(self.config.capacity(), self.config.group_size());

        let core_ids = if self.config.pin_cores {
            let ids = core_affinity::get_core_ids();
            match &ids {
                Some(ids) => info!("Detected {} CPU cores for affinity", ids.len()),
                None => info!("CPU affinity not supported, continuing without core pinning"),
            }
            ids.filter(|ids| !ids.is_empty())
        } else {
            None
        };

        for addr in self.config.destinations.duplicates() {
            warn!(
                "Destination {} is listed more than once, it will receive each payload repeatedly",
                addr
            );
        }

        thread::scope(|s| -> Result<()> {
            let workers = subscribers.into_iter().zip(self.config.destinations.iter());
            for (subscriber, destination) in workers {
                let destination = *destination;
                let member = subscriber.member();
                let core = core_ids.as_ref().map(|cores| cores[member % cores.len()]);
                let stats = self.stats.clone();
                let open_sink = &open_sink;

                let spawned = thread::Builder::new()
                    .name(format!("relay-{}", member))
                    .spawn_scoped(s, move || {
                        pin_current_thread(core, "Worker", member);

                        info!("Relay to {} from worker {}", destination, member);
                        RelayWorker::new(subscriber, destination, open_sink, stats).run(ctx);
                    });

                if let Err(e) = spawned {
                    // Workers already running would wait forever for the missing member
                    ctx.cancel();
                    return Err(e)
                        .with_context(|| format!("Cannot spawn relay worker {}", member));
                }
            }

            info!("Started {} relay workers", self.config.group_size());

            let source = match open_source() {
                Ok(source) => source,
                Err(e) => {
                    error!("Listener failed to start: {:#}", e);
                    ctx.cancel();
                    return Err(e);
                }
            };

            let core = core_ids
                .as_ref()
                .map(|cores| cores[self.config.group_size() % cores.len()]);
            pin_current_thread(core, "Listener", 0);

            Listener::new(source, publisher, self.stats.clone()).run(ctx);
            Ok(())
        })
    }
}

fn pin_current_thread(core: Option<CoreId>, role: &str, index: usize) {
    let Some(core) = core else {
        return;
    };
    if core_affinity::set_for_current(core) {
        debug!("{} {} pinned to CPU core {}", role, index, core.id);
    } else {
        debug!("Failed to set CPU affinity for {} {}", role, index);
    }
}
