use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use cardio_serve::{
    evaluate_archive, evaluate_directory, ArtifactStore, BatchOptions, Classifier, Model,
    ModelSlot, SavedModelOptions, TensorLayout, DEFAULT_ARTIFACTS_DIR,
};
use log::info;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "cardio-classify",
    about = "CLI app to detect cardiomegaly on chest X-rays with TensorFlow"
)]
struct CmdArgs {
    #[structopt(help = "Export directory of TensorFlow SavedModel")]
    export_dir: PathBuf,

    #[structopt(
        help = "Image to classify, or a zip/folder of <class>/<image> entries to evaluate"
    )]
    input: PathBuf,

    #[structopt(long, default_value = "serving_default_input")]
    input_op: String,

    #[structopt(long, default_value = "StatefulPartitionedCall")]
    output_op: String,

    #[structopt(long, help = "Feed images as NHWC instead of NCHW")]
    channels_last: bool,

    #[structopt(long, default_value = "6")]
    batch_size: usize,

    #[structopt(long, default_value = DEFAULT_ARTIFACTS_DIR, help = "Where batch plots are written")]
    artifacts_dir: PathBuf,
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("zip"))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CmdArgs::from_args();

    let options = SavedModelOptions {
        input_op: args.input_op.clone(),
        output_op: args.output_op.clone(),
        layout: if args.channels_last {
            TensorLayout::Nhwc
        } else {
            TensorLayout::Nchw
        },
        ..Default::default()
    };
    let slot: ModelSlot<dyn Model> = ModelSlot::new(&args.export_dir);
    let model = slot.load_once(&options)?;

    let batch = BatchOptions {
        batch_size: args.batch_size,
        ..Default::default()
    };
    let store = ArtifactStore::new(&args.artifacts_dir);

    let output = if args.input.is_dir() {
        serde_json::to_string_pretty(&evaluate_directory(model, &args.input, &store, &batch)?)?
    } else if is_zip(&args.input) {
        let archive = fs::read(&args.input)?;
        serde_json::to_string_pretty(&evaluate_archive(model, &archive, &store, &batch)?)?
    } else {
        let data = fs::read(&args.input)?;
        let prediction = Classifier::new(model).classify_from_raw(&data)?;
        info!("Stage timings (msec): {:?}", prediction.timings);
        serde_json::to_string(&prediction)?
    };

    info!("Classified {}", args.input.display());
    println!("{}", output);

    Ok(())
}
