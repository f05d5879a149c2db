use anyhow::{Context, bail};
use std::ffi::OsString;
use std::path::PathBuf;

pub const HELP: &str = "\
Burn MNIST Nets

Trains and/or runs inference with a small image classifier on the MNIST handwritten digits.
Models, optimizers, configurations and training history are persisted in an artifacts directory.

USAGE:
    lenet [OPTIONS]
    can [OPTIONS]

When no --training or --inference flag is provided, the program exits after handling configuration logic.

BEHAVIOR OVERVIEW
- The program manages two configurations: training config and model config.
- If --training-config or --model-config is given, the corresponding config is loaded from the specified file and saved to the artifacts directory (overwriting any existing file).
- If no explicit config file is provided for a component, the program attempts to load it from the artifacts directory; if absent, a default configuration is created and saved.
- The artifacts directory (--artifacts-path) is used to read/write model weights, optimizer state, configurations and the per-epoch history. If not specified, a new temporary directory is created and its path is printed.
- With --remove-artifacts, any existing model and optimizer files in the artifacts directory are deleted before training (if --training is active).
- Model and optimizer weights are loaded from the artifacts directory if present; otherwise new ones are created and saved.
- If both --training and --inference are specified, training executes first, followed by inference using the trained model.
- Inference evaluates the accuracy over the whole test split and prints the predictions for the first test images.
- The MNIST files are downloaded once into ~/.cache/burn-dataset/mnist.
- Set RUST_LOG=debug to print every training batch.

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    -t, --training              Run training (creates or updates model / optimizer)
    -i, --inference             Run inference after training (if both flags are used) or immediately (if only inference is requested)
    -r, --remove-artifacts      Delete existing model and optimizer files from the artifacts directory before training
                                (has no effect if --training is not used)
    -c, --training-config <PATH>
                                Load training configuration from this file (overrides any config in artifacts directory)
    -m, --model-config <PATH>   Load model configuration from this file (overrides any config in artifacts directory)
    -a, --artifacts-path <PATH>
                                Directory where configurations, model weights, and optimizer state are saved and loaded.
                                If the directory does not exist, it will be created.
                                Defaults to a newly created temporary directory (path will be printed).
    -n, --num-samples <N>       Number of test images whose predictions are printed during inference [default: 10]
";

#[derive(Debug, Clone, PartialEq)]
pub struct AppArgs {
    pub help: bool,
    pub training: bool,
    pub inference: bool,
    pub remove_artifacts: bool,
    pub training_config: Option<PathBuf>,
    pub model_config: Option<PathBuf>,
    pub artifacts_path: PathBuf,
    pub num_samples: usize,
}

impl AppArgs {
    /// Parses the process arguments.
    ///
    /// `bin_name` is part of the default temporary artifacts directory name.
    pub fn parse(bin_name: &str) -> anyhow::Result<Self> {
        Self::parse_from(std::env::args_os().skip(1).collect(), bin_name)
    }

    pub fn parse_from(args: Vec<OsString>, bin_name: &str) -> anyhow::Result<Self> {
        let mut pargs = pico_args::Arguments::from_vec(args);

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            return Ok(AppArgs {
                help: true,
                training: false,
                inference: false,
                remove_artifacts: false,
                training_config: None,
                model_config: None,
                artifacts_path: PathBuf::new(),
                num_samples: 0,
            });
        }

        let training_config = pargs.opt_value_from_os_str(["-c", "--training-config"], parse_path)?;
        let model_config = pargs.opt_value_from_os_str(["-m", "--model-config"], parse_path)?;
        let artifacts_path = pargs.opt_value_from_os_str(["-a", "--artifacts-path"], parse_path)?;
        let num_samples = pargs
            .opt_value_from_str(["-n", "--num-samples"])?
            .unwrap_or(10);

        // must parse flags after values
        let training = pargs.contains(["-t", "--training"]);
        let inference = pargs.contains(["-i", "--inference"]);
        let remove_artifacts = pargs.contains(["-r", "--remove-artifacts"]);

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            bail!("unused arguments: {remaining:?}");
        }

        let artifacts_path = match artifacts_path {
            Some(path) => path,
            None => {
                // e.g. /tmp/burn-mnist-nets-lenet-abcd-0
                let prefix = format!("{}-{bin_name}-", std::env!("CARGO_PKG_NAME"));
                let tmp = temp_dir::TempDir::with_prefix(prefix)
                    .context("failed to create the temporary artifacts directory")?
                    .dont_delete_on_drop();
                let path = tmp.path().to_path_buf();
                println!("new artifacts directory: {path:?}");
                path
            }
        };

        Ok(AppArgs {
            help: false,
            training,
            inference,
            remove_artifacts,
            training_config,
            model_config,
            artifacts_path,
            num_samples,
        })
    }
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}
