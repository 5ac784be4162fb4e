use canvas_collab::{BoxError, CanvasServer, ServerConfig};
use canvas_core::DiffPolicy;
use clap::Parser;
use log::info;

/// Shared drawing board server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "CANVAS_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Board width in cells
    #[arg(long, env = "CANVAS_WIDTH", default_value_t = 500)]
    width: usize,

    /// Board height in cells
    #[arg(long, env = "CANVAS_HEIGHT", default_value_t = 500)]
    height: usize,

    /// Reject a whole stroke when any diff is off the board
    #[arg(long, env = "CANVAS_REJECT_OUT_OF_RANGE")]
    reject_out_of_range: bool,

    /// Events a member may have queued before it is disconnected
    #[arg(long, env = "CANVAS_OUTBOX_CAPACITY", default_value_t = 256)]
    outbox_capacity: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            board_width: self.width,
            board_height: self.height,
            diff_policy: if self.reject_out_of_range {
                DiffPolicy::Reject
            } else {
                DiffPolicy::Skip
            },
            outbox_capacity: self.outbox_capacity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    info!(
        "Starting canvas server ({}x{} boards, {:?} out-of-range diffs, outbox {})",
        config.board_width, config.board_height, config.diff_policy, config.outbox_capacity
    );

    let server = CanvasServer::new(config)?;
    server.run().await
}
