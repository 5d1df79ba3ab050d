use anyhow::anyhow;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use lazy_static::lazy_static;
use std::path::PathBuf;
use tracing::{info, warn};

use songgen::config::*;
use songgen::storage::*;
use songgen::storage_ext::StorageExt;

#[derive(Parser)]
#[command(name = "songgen")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory where configs are stored.
    /// Defaults to the SongGen folder in the user's data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stores a config assembled from default sub-model configs.
    Init {
        /// Name under which the config is stored.
        #[arg(default_value = "songgen")]
        name: String,

        /// The model_type of the text encoder.
        #[arg(long, default_value = "t5")]
        text_encoder: String,

        /// Number of parallel codebooks the decoder predicts.
        #[arg(long)]
        num_codebooks: Option<usize>,

        /// Overwrite an already stored config.
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// Prints a stored config together with its derived properties.
    Show {
        /// Name of the stored config, or a hub repository id if it was fetched.
        name: String,

        /// Attention kernel to apply before printing (eager, sdpa or flash_attention_2).
        #[arg(long)]
        attn_implementation: Option<AttnImplementation>,
    },
    /// Downloads the config of a Hugging Face hub repository.
    Fetch {
        /// Repository id, e.g. `org/model`.
        repo_id: String,

        /// Download the config even if it was already downloaded.
        #[arg(long, default_value = "false")]
        force_download: bool,
    },
    /// Lists the stored configs.
    List,
}

lazy_static! {
    static ref PROJECT_DIRS: ProjectDirs =
        ProjectDirs::from("com", "songgen", "songgen").expect("Could not load project directory");
}

impl Args {
    fn validate(&self) -> anyhow::Result<()> {
        match &self.command {
            Command::Init {
                name,
                num_codebooks,
                ..
            } => {
                if name.trim_matches('/').is_empty() {
                    return Err(anyhow!("The config name must not be empty"));
                }
                if *num_codebooks == Some(0) {
                    return Err(anyhow!("--num-codebooks must > 0"));
                }
            }
            Command::Fetch { repo_id, .. } => {
                if repo_id.trim_matches('/').is_empty() {
                    return Err(anyhow!("A repository id must be provided"));
                }
            }
            Command::Show { .. } | Command::List => {}
        }
        Ok(())
    }

    fn storage(&self) -> AppFs {
        match &self.data_dir {
            Some(dir) => AppFs::new(dir),
            None => AppFs::new(PROJECT_DIRS.data_dir()),
        }
    }
}

pub async fn cli() -> anyhow::Result<()> {
    let args = Args::parse();
    args.validate()?;
    let storage = args.storage();

    match args.command {
        Command::Init {
            name,
            text_encoder,
            num_codebooks,
            force,
        } => {
            let config = default_config(&text_encoder, num_codebooks)?;
            if storage.exists(&format!("{name}/{CONFIG_NAME}")).await? && !force {
                return Err(anyhow!(
                    "A config named '{name}' already exists, use --force to overwrite it"
                ));
            }
            config.save_pretrained(&storage, &name).await?;
            println!("{}", describe(&config));
        }
        Command::Show {
            name,
            attn_implementation,
        } => {
            let mut config = SongGenConfig::from_pretrained(&storage, &name).await?;
            if let Some(attn_implementation) = attn_implementation {
                config.set_attn_implementation(attn_implementation);
            }
            println!("{}", describe(&config));
            print!("{}", config.to_json_string());
        }
        Command::Fetch {
            repo_id,
            force_download,
        } => {
            storage.download_config(&repo_id, force_download).await?;
            let config = SongGenConfig::from_pretrained(&storage, &repo_id).await?;
            info!("Config for {repo_id} stored in {:?}", storage.path_buf(&repo_id));
            println!("{}", describe(&config));
        }
        Command::List => {
            let configs = stored_configs(&storage).await?;
            if configs.is_empty() {
                warn!("No configs stored in {:?}", storage.root);
            }
            for name in configs {
                println!("{name}");
            }
        }
    }
    Ok(())
}

/// A config made of the default sub-configs for the given text encoder.
fn default_config(text_encoder: &str, num_codebooks: Option<usize>) -> anyhow::Result<SongGenConfig> {
    let text_encoder = TEXT_ENCODER_REGISTRY.resolve(text_encoder, Payload::new())?;
    let decoder = SongGenDecoderConfig::new(SongGenDecoderParams {
        num_codebooks: num_codebooks.unwrap_or(SongGenDecoderParams::default().num_codebooks),
        ..Default::default()
    });
    Ok(SongGenConfig::from_sub_models_config(
        &text_encoder,
        &decoder,
        Payload::new(),
    )?)
}

/// Stored configs live either at `{name}/config.json` or, when fetched from
/// the hub, at `{org}/{model}/config.json`.
async fn stored_configs<S: Storage>(storage: &S) -> anyhow::Result<Vec<String>> {
    let mut configs = vec![];
    for entry in storage.list("").await? {
        if storage.exists(&format!("{entry}/{CONFIG_NAME}")).await? {
            configs.push(entry);
            continue;
        }
        for nested in storage.list(&entry).await? {
            if storage.exists(&format!("{nested}/{CONFIG_NAME}")).await? {
                configs.push(nested);
            }
        }
    }
    Ok(configs)
}

fn describe(config: &SongGenConfig) -> String {
    let text_encoder = config.text_encoder();
    let decoder = config.decoder();
    format!(
        "model_type:           {}\n\
         sampling_rate:        {}\n\
         attn_implementation:  {}\n\
         text_encoder:         {} (hidden size {})\n\
         decoder:              {} layers, {} heads, {} kv heads, {} cross kv heads\n\
         codebooks:            {}\n\
         cross attention:      {}",
        config.model_type(),
        config.sampling_rate(),
        config.attn_implementation(),
        text_encoder.model_type(),
        text_encoder.hidden_size(),
        decoder.num_hidden_layers,
        decoder.num_attention_heads,
        decoder.num_key_value_heads,
        decoder.num_cross_attention_key_value_heads,
        decoder.num_codebooks,
        decoder.cross_attn_implementation(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};

    fn rand_string() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(7)
            .map(char::from)
            .collect()
    }

    #[test]
    fn validates_arguments() {
        let args = Args::parse_from(["songgen", "init", "--num-codebooks", "0"]);
        assert!(args.validate().is_err());
        let args = Args::parse_from(["songgen", "init", "/"]);
        assert!(args.validate().is_err());
        let args = Args::parse_from(["songgen", "init", "small", "--num-codebooks", "8"]);
        assert!(args.validate().is_ok());
        let args = Args::parse_from(["songgen", "fetch", "org/model"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn parses_attn_implementation() {
        let args = Args::parse_from(["songgen", "show", "small", "--attn-implementation", "sdpa"]);
        let Command::Show {
            attn_implementation,
            ..
        } = args.command
        else {
            panic!("expected the show command")
        };
        assert_eq!(attn_implementation, Some(AttnImplementation::Sdpa));
        assert!(Args::try_parse_from(["songgen", "show", "x", "--attn-implementation", "fast"]).is_err());
    }

    #[test]
    fn builds_default_configs() -> anyhow::Result<()> {
        let config = default_config("mt5", Some(8))?;
        assert_eq!(config.text_encoder().model_type(), "mt5");
        assert_eq!(config.decoder().num_codebooks, 8);
        assert!(default_config("gpt2", None).is_err());

        let summary = describe(&config);
        assert!(summary.contains("sampling_rate:        16000"));
        assert!(summary.contains("attn_implementation:  eager"));
        assert!(summary.contains("text_encoder:         mt5 (hidden size 512)"));
        assert_eq!(summary.lines().count(), 7);
        Ok(())
    }

    #[tokio::test]
    async fn lists_stored_configs() -> anyhow::Result<()> {
        let storage = AppFs::new(format!("/tmp/{}", rand_string()));
        let config = default_config("t5", None)?;
        config.save_pretrained(&storage, "small").await?;
        config.save_pretrained(&storage, "org/model").await?;
        storage.write("notes/readme.txt", "not a config").await?;

        assert_eq!(stored_configs(&storage).await?, vec!["org/model", "small"]);
        Ok(())
    }
}
