use log::{info, warn};

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::record::{take_object, take_tag, take_value, Payload, StructuredRecord};
use crate::config::songgen_decoder_config::{AttnImplementation, SongGenDecoderConfig};
use crate::config::text_encoder_config::{
    TextEncoderConfig, TextEncoderRegistry, TEXT_ENCODER_REGISTRY,
};
use crate::storage::Storage;

pub const MODEL_TYPE: &str = "songgen";
pub const CONFIG_NAME: &str = "config.json";
/// X-Codec operates at 16kHz.
pub const SAMPLING_RATE: u32 = 16000;

const DEFAULT_VOCAB_SIZE: usize = 1024;

/// Configuration of a full SongGen model: a text encoder that embeds the
/// description, and the decoder that cross-attends to it.
#[derive(Debug, Clone, PartialEq)]
pub struct SongGenConfig {
    /// Vocabulary size of the prompt token ids.
    pub vocab_size: usize,
    /// Whether the prompt is also used as cross-attention conditioning.
    pub prompt_cross_attention: bool,
    pub add_prenet: bool,
    /// Keys this record does not know about, kept so they survive a round trip.
    pub extra: Payload,
    text_encoder: TextEncoderConfig,
    decoder: SongGenDecoderConfig,
    attn_implementation: Option<AttnImplementation>,
}

impl SongGenConfig {
    /// Builds the config from a keyword bag that must carry both a
    /// `text_encoder` and a `decoder` payload. The text encoder payload is
    /// resolved through its `model_type` tag in the global registry.
    pub fn new(
        vocab_size: usize,
        prompt_cross_attention: bool,
        add_prenet: bool,
        kwargs: Payload,
    ) -> ConfigResult<Self> {
        Self::new_with_registry(
            &TEXT_ENCODER_REGISTRY,
            vocab_size,
            prompt_cross_attention,
            add_prenet,
            kwargs,
        )
    }

    /// Same as [`SongGenConfig::new`], resolving the text encoder in `registry`.
    pub fn new_with_registry(
        registry: &TextEncoderRegistry,
        vocab_size: usize,
        prompt_cross_attention: bool,
        add_prenet: bool,
        mut kwargs: Payload,
    ) -> ConfigResult<Self> {
        for key in ["text_encoder", "decoder"] {
            if !kwargs.contains_key(key) {
                return Err(ConfigError::MissingSubConfig(key));
            }
        }

        let mut text_encoder = take_object(&mut kwargs, "text_encoder")?
            .ok_or(ConfigError::MissingSubConfig("text_encoder"))?;
        let text_encoder_model_type = take_tag(&mut text_encoder, "model_type")?
            .ok_or(ConfigError::MissingModelType("text_encoder"))?;
        let text_encoder = registry.resolve(&text_encoder_model_type, text_encoder)?;

        let decoder =
            take_object(&mut kwargs, "decoder")?.ok_or(ConfigError::MissingSubConfig("decoder"))?;
        let decoder = SongGenDecoderConfig::from_payload(decoder)?;

        if kwargs.remove("audio_encoder").is_some() {
            warn!("audio_encoder configs are not supported yet, ignoring it");
        }
        // Derived values, recomputed on every load.
        kwargs.remove("model_type");
        kwargs.remove("is_encoder_decoder");

        Ok(Self {
            vocab_size,
            prompt_cross_attention,
            add_prenet,
            extra: kwargs,
            text_encoder,
            decoder,
            attn_implementation: None,
        })
    }

    /// Builds the config from already built sub-configs, `kwargs` holds the
    /// remaining top level fields.
    pub fn from_sub_models_config(
        text_encoder: &TextEncoderConfig,
        decoder: &SongGenDecoderConfig,
        mut kwargs: Payload,
    ) -> ConfigResult<Self> {
        kwargs.insert("text_encoder".to_string(), text_encoder.to_payload().into());
        kwargs.insert("decoder".to_string(), decoder.to_payload().into());
        Self::from_payload(kwargs)
    }

    /// Reads a config payload whose text encoder may be one of the custom
    /// schemas in `registry`.
    pub fn from_payload_with_registry(
        registry: &TextEncoderRegistry,
        mut payload: Payload,
    ) -> ConfigResult<Self> {
        let vocab_size = take_value(&mut payload, "vocab_size")?.unwrap_or(DEFAULT_VOCAB_SIZE);
        let prompt_cross_attention =
            take_value(&mut payload, "prompt_cross_attention")?.unwrap_or(true);
        let add_prenet = take_value(&mut payload, "add_prenet")?.unwrap_or(true);
        Self::new_with_registry(registry, vocab_size, prompt_cross_attention, add_prenet, payload)
    }

    pub fn text_encoder(&self) -> &TextEncoderConfig {
        &self.text_encoder
    }

    pub fn decoder(&self) -> &SongGenDecoderConfig {
        &self.decoder
    }

    pub fn model_type(&self) -> &'static str {
        MODEL_TYPE
    }

    pub fn is_encoder_decoder(&self) -> bool {
        true
    }

    /// Fixed until the audio encoder config is wired in, at which point it
    /// should come from there.
    pub fn sampling_rate(&self) -> u32 {
        SAMPLING_RATE
    }

    pub fn attn_implementation(&self) -> AttnImplementation {
        self.attn_implementation.unwrap_or_default()
    }

    /// Sets the attention kernel of the model, the decoder follows.
    pub fn set_attn_implementation(&mut self, value: AttnImplementation) {
        self.attn_implementation = Some(value);
        self.decoder.set_attn_implementation(value);
    }

    /// Writes the config as `{dir}/config.json` into `storage`.
    pub async fn save_pretrained<S: Storage>(&self, storage: &S, dir: &str) -> ConfigResult<()> {
        let path = config_path(dir);
        storage.write(&path, self.to_json_string()).await?;
        info!("Configuration saved in {path}");
        Ok(())
    }

    /// Reads a config previously stored with [`SongGenConfig::save_pretrained`].
    pub async fn from_pretrained<S: Storage>(storage: &S, dir: &str) -> ConfigResult<Self> {
        let path = config_path(dir);
        let Some(content) = storage.read(&path).await? else {
            return Err(ConfigError::NotFound(path));
        };
        info!("Loading configuration file {path}");
        Self::from_json_str(&String::from_utf8_lossy(&content))
    }
}

impl StructuredRecord for SongGenConfig {
    fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("model_type".to_string(), MODEL_TYPE.into());
        payload.insert("vocab_size".to_string(), self.vocab_size.into());
        payload.insert(
            "prompt_cross_attention".to_string(),
            self.prompt_cross_attention.into(),
        );
        payload.insert("add_prenet".to_string(), self.add_prenet.into());
        payload.insert("is_encoder_decoder".to_string(), true.into());
        payload.insert(
            "text_encoder".to_string(),
            self.text_encoder.to_payload().into(),
        );
        payload.insert("decoder".to_string(), self.decoder.to_payload().into());
        for (k, v) in &self.extra {
            payload.entry(k.clone()).or_insert_with(|| v.clone());
        }
        payload
    }

    fn from_payload(payload: Payload) -> ConfigResult<Self> {
        Self::from_payload_with_registry(&TEXT_ENCODER_REGISTRY, payload)
    }
}

fn config_path(dir: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        CONFIG_NAME.to_string()
    } else {
        format!("{dir}/{CONFIG_NAME}")
    }
}
