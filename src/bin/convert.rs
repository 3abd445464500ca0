use clap::Parser;
use ppg_vc::speaker::DvecStore;
use ppg_vc::waveglow::Precision;
use ppg_vc::*;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
pub struct Args {
    /// Directory with the mel generator graphs (encoder, decoder_iter, postnet)
    #[clap(short = 'c', long)]
    checkpoint_path: PathBuf,
    /// WaveGlow vocoder ONNX file
    #[clap(short, long)]
    waveglow: PathBuf,
    /// Posteriorgram extractor ONNX file
    #[clap(short, long)]
    model: PathBuf,
    /// Scale of the vocoder's latent noise
    #[clap(short, long, default_value_t = 0.8)]
    sigma: f32,
    /// Directory the converted audio is written to
    #[clap(short, long)]
    outputs: PathBuf,
    /// Sample rate of the written audio, this is the vocoder's native rate
    #[clap(long, default_value_t = 24000)]
    sampling_rate: u32,
    /// Run the models on the GPU
    #[clap(long)]
    cuda: bool,
    /// Run the vocoder in half precision, needs a half precision export
    #[clap(long)]
    fp16: bool,
    /// Speaker d-vector store
    #[clap(short = 'f', long, default_value = "VCC_features.npz")]
    feature_path: PathBuf,
    /// Directory containing one folder of utterances per source group
    #[clap(short = 'r', long, default_value = "testing")]
    source_root: PathBuf,
    /// Strength of the vocoder bias removal, 0 disables it
    #[clap(short, long, default_value_t = 0.08)]
    denoiser_strength: f32,
    /// Source groups to convert
    #[clap(long, value_delimiter = ',', default_value = "chinese,english")]
    sources: Vec<String>,
    /// Target speaker ids, defaults to every speaker in the store
    #[clap(long, value_delimiter = ',')]
    targets: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    ppg_vc::setup_logging();
    let args = Args::parse();

    info!("Loading resources");
    init_runtime(args.cuda)?;

    let paths = ModelPaths {
        ppg2mel: args.checkpoint_path,
        waveglow: args.waveglow,
        ppg: args.model,
    };
    let options = SynthesisOptions {
        sigma: args.sigma,
        denoiser_strength: args.denoiser_strength,
        precision: if args.fp16 {
            Precision::Half
        } else {
            Precision::Full
        },
    };
    let converter = VoiceConverter::load(&paths, options)?;
    let store = DvecStore::open(&args.feature_path)?;

    let plan = ConversionPlan {
        source_root: args.source_root,
        sources: args.sources,
        targets: args.targets,
        output_dir: args.outputs,
        output_sample_rate: args.sampling_rate,
    };

    let start = Instant::now();
    plan.run(&converter, &store)?;
    info!("Finished in {:?}", start.elapsed());
    Ok(())
}
