use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use cardio_http::{router, AppState};
use cardio_serve::{
    ArtifactStore, BatchOptions, Model, ModelSlot, SavedModelOptions, TensorLayout,
    DEFAULT_ARTIFACTS_DIR, DEFAULT_MODEL_DIR,
};
use log::info;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "cardio-http",
    about = "HTTP service detecting cardiomegaly on chest X-rays"
)]
struct CmdArgs {
    #[structopt(long, env = "CARDIO_ADDR", default_value = "127.0.0.1:8000")]
    addr: SocketAddr,

    #[structopt(long, default_value = "/api", help = "Path prefix of every route")]
    prefix: String,

    #[structopt(
        long,
        env = "CARDIO_MODEL_DIR",
        default_value = DEFAULT_MODEL_DIR,
        help = "Export directory of the TensorFlow SavedModel"
    )]
    model_dir: PathBuf,

    #[structopt(long, default_value = "serving_default_input")]
    input_op: String,

    #[structopt(long, default_value = "StatefulPartitionedCall")]
    output_op: String,

    #[structopt(long, help = "Feed images as NHWC instead of NCHW")]
    channels_last: bool,

    #[structopt(
        long,
        env = "CARDIO_ARTIFACTS_DIR",
        default_value = DEFAULT_ARTIFACTS_DIR,
        help = "Where the plots of every batch run are written"
    )]
    artifacts_dir: PathBuf,

    #[structopt(
        long,
        env = "CARDIO_KEEP_RUNS",
        default_value = "10",
        help = "Completed batch runs kept on disk, older ones are deleted"
    )]
    keep_runs: usize,

    #[structopt(long, default_value = "6")]
    batch_size: usize,

    #[structopt(long, default_value = "2", help = "Inference jobs allowed to run at once")]
    max_jobs: usize,

    #[structopt(long, default_value = "104857600", help = "Largest accepted upload in bytes")]
    body_limit: usize,
}

impl CmdArgs {
    fn saved_model_options(&self) -> SavedModelOptions {
        SavedModelOptions {
            input_op: self.input_op.clone(),
            output_op: self.output_op.clone(),
            layout: if self.channels_last {
                TensorLayout::Nhwc
            } else {
                TensorLayout::Nchw
            },
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CmdArgs::from_args();

    let model: ModelSlot<dyn Model> = ModelSlot::new(&args.model_dir);
    model.load_once(&args.saved_model_options())?;

    let batch = BatchOptions {
        batch_size: args.batch_size,
        ..Default::default()
    };
    let state = Arc::new(AppState::new(
        model,
        ArtifactStore::new(&args.artifacts_dir).with_retention(args.keep_runs),
        batch,
        args.max_jobs,
    ));

    let app = router(state, &args.prefix, args.body_limit);

    info!("Listening on http://{}{}", args.addr, args.prefix);
    axum::Server::bind(&args.addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
