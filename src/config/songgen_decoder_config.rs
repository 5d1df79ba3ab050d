use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::config::record::Payload;

pub const DECODER_MODEL_TYPE: &str = "songgen_decoder";

/// Attention kernel used by the model's attention layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttnImplementation {
    #[default]
    #[serde(rename = "eager")]
    Eager,
    #[serde(rename = "sdpa")]
    Sdpa,
    #[serde(rename = "flash_attention_2")]
    FlashAttention2,
}

impl Display for AttnImplementation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AttnImplementation::Eager => write!(f, "eager"),
            AttnImplementation::Sdpa => write!(f, "sdpa"),
            AttnImplementation::FlashAttention2 => write!(f, "flash_attention_2"),
        }
    }
}

impl FromStr for AttnImplementation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eager" => Ok(AttnImplementation::Eager),
            "sdpa" => Ok(AttnImplementation::Sdpa),
            "flash_attention_2" => Ok(AttnImplementation::FlashAttention2),
            other => Err(format!(
                "unknown attention implementation '{other}', expected eager, sdpa or flash_attention_2"
            )),
        }
    }
}

/// Cross-attention strategy that pins the eager kernel.
pub const ALWAYS_EAGER: &str = "always_eager";
/// Cross-attention strategy that pins the sdpa kernel.
pub const ALWAYS_SDPA: &str = "always_sdpa";

/// Constructor arguments of a [`SongGenDecoderConfig`].
///
/// Every field has a default, so callers only spell out what they change:
///
/// ```ignore
/// let decoder = SongGenDecoderConfig::new(SongGenDecoderParams {
///     num_attention_heads: 8,
///     ..Default::default()
/// });
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongGenDecoderParams {
    /// 1024 codec entries plus 64 special tokens.
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    pub num_hidden_layers: usize,
    pub ffn_dim: usize,
    pub num_attention_heads: usize,
    /// Grouped query attention heads, defaults to `num_attention_heads`.
    pub num_key_value_heads: Option<usize>,
    /// Defaults to the resolved `num_key_value_heads`.
    pub num_cross_attention_key_value_heads: Option<usize>,
    pub layerdrop: f64,
    pub use_cache: bool,
    pub activation_function: String,
    pub hidden_size: usize,
    pub dropout: f64,
    pub attention_dropout: f64,
    pub activation_dropout: f64,
    pub initializer_factor: f64,
    /// Scale embeddings by sqrt(hidden_size).
    pub scale_embedding: bool,
    pub num_codebooks: usize,
    pub pad_token_id: Option<i64>,
    pub bos_token_id: Option<i64>,
    pub eos_token_id: Option<i64>,
    pub tie_word_embeddings: bool,
    /// Rotary instead of absolute position embeddings.
    pub rope_embeddings: bool,
    pub rope_theta: f64,
    /// `always_eager` or `always_sdpa` pin the cross-attention kernel, any
    /// other value follows the global one.
    pub cross_attention_implementation_strategy: Option<String>,
    /// Keys this record does not know about, kept so they survive a round trip.
    #[serde(flatten)]
    pub extra: Payload,
}

impl Default for SongGenDecoderParams {
    fn default() -> Self {
        Self {
            vocab_size: 1088,
            max_position_embeddings: 6000,
            num_hidden_layers: 24,
            ffn_dim: 4096,
            num_attention_heads: 16,
            num_key_value_heads: None,
            num_cross_attention_key_value_heads: None,
            layerdrop: 0.0,
            use_cache: true,
            activation_function: "gelu".to_string(),
            hidden_size: 1024,
            dropout: 0.1,
            attention_dropout: 0.0,
            activation_dropout: 0.0,
            initializer_factor: 0.02,
            scale_embedding: false,
            num_codebooks: 4,
            pad_token_id: Some(1024),
            bos_token_id: Some(1025),
            eos_token_id: Some(1024),
            tie_word_embeddings: false,
            rope_embeddings: false,
            rope_theta: 10_000.0,
            cross_attention_implementation_strategy: None,
            extra: Payload::new(),
        }
    }
}

/// Hyperparameters of the SongGen decoder, the autoregressive model that
/// predicts codec tokens for `num_codebooks` parallel codebooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SongGenDecoderParams", into = "SongGenDecoderParams")]
pub struct SongGenDecoderConfig {
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    pub num_hidden_layers: usize,
    pub ffn_dim: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub num_cross_attention_key_value_heads: usize,
    pub layerdrop: f64,
    pub use_cache: bool,
    pub activation_function: String,
    pub hidden_size: usize,
    pub dropout: f64,
    pub attention_dropout: f64,
    pub activation_dropout: f64,
    pub initializer_factor: f64,
    pub scale_embedding: bool,
    pub num_codebooks: usize,
    pub pad_token_id: Option<i64>,
    pub bos_token_id: Option<i64>,
    pub eos_token_id: Option<i64>,
    pub tie_word_embeddings: bool,
    pub rope_embeddings: bool,
    pub rope_theta: f64,
    pub cross_attention_implementation_strategy: Option<String>,
    pub extra: Payload,
    attn_implementation: Option<AttnImplementation>,
}

impl SongGenDecoderConfig {
    pub fn new(params: SongGenDecoderParams) -> Self {
        // The cross-attention default reads the already resolved kv heads.
        let num_key_value_heads = params
            .num_key_value_heads
            .unwrap_or(params.num_attention_heads);
        let num_cross_attention_key_value_heads = params
            .num_cross_attention_key_value_heads
            .unwrap_or(num_key_value_heads);

        let mut extra = params.extra;
        match extra.remove("model_type") {
            Some(serde_json::Value::String(tag)) if tag == DECODER_MODEL_TYPE => {}
            None | Some(serde_json::Value::Null) => {}
            Some(other) => warn!("Dropping model_type {other} from a {DECODER_MODEL_TYPE} config"),
        }

        Self {
            vocab_size: params.vocab_size,
            max_position_embeddings: params.max_position_embeddings,
            num_hidden_layers: params.num_hidden_layers,
            ffn_dim: params.ffn_dim,
            num_attention_heads: params.num_attention_heads,
            num_key_value_heads,
            num_cross_attention_key_value_heads,
            layerdrop: params.layerdrop,
            use_cache: params.use_cache,
            activation_function: params.activation_function,
            hidden_size: params.hidden_size,
            dropout: params.dropout,
            attention_dropout: params.attention_dropout,
            activation_dropout: params.activation_dropout,
            initializer_factor: params.initializer_factor,
            scale_embedding: params.scale_embedding,
            num_codebooks: params.num_codebooks,
            pad_token_id: params.pad_token_id,
            bos_token_id: params.bos_token_id,
            eos_token_id: params.eos_token_id,
            tie_word_embeddings: params.tie_word_embeddings,
            rope_embeddings: params.rope_embeddings,
            rope_theta: params.rope_theta,
            cross_attention_implementation_strategy: params.cross_attention_implementation_strategy,
            extra,
            attn_implementation: None,
        }
    }

    pub fn model_type(&self) -> &'static str {
        DECODER_MODEL_TYPE
    }

    pub fn attn_implementation(&self) -> AttnImplementation {
        self.attn_implementation.unwrap_or_default()
    }

    /// Only the owning [`crate::config::SongGenConfig`] changes this, so that
    /// the composite and its decoder never disagree.
    pub(crate) fn set_attn_implementation(&mut self, value: AttnImplementation) {
        self.attn_implementation = Some(value)
    }

    /// The kernel used by the cross-attention layers, which follows the
    /// global one unless a strategy pins it.
    pub fn cross_attn_implementation(&self) -> AttnImplementation {
        match self.cross_attention_implementation_strategy.as_deref() {
            Some(ALWAYS_EAGER) => AttnImplementation::Eager,
            Some(ALWAYS_SDPA) => AttnImplementation::Sdpa,
            _ => self.attn_implementation(),
        }
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads.max(1)
    }

    /// How many query heads share one key/value head in self-attention.
    pub fn num_key_value_groups(&self) -> usize {
        self.num_attention_heads / self.num_key_value_heads.max(1)
    }

    pub fn num_cross_attention_key_value_groups(&self) -> usize {
        self.num_attention_heads / self.num_cross_attention_key_value_heads.max(1)
    }
}

impl Default for SongGenDecoderConfig {
    fn default() -> Self {
        Self::new(SongGenDecoderParams::default())
    }
}

impl From<SongGenDecoderParams> for SongGenDecoderConfig {
    fn from(value: SongGenDecoderParams) -> Self {
        Self::new(value)
    }
}

impl From<SongGenDecoderConfig> for SongGenDecoderParams {
    fn from(value: SongGenDecoderConfig) -> Self {
        let mut extra = value.extra;
        extra.insert("model_type".to_string(), DECODER_MODEL_TYPE.into());
        Self {
            vocab_size: value.vocab_size,
            max_position_embeddings: value.max_position_embeddings,
            num_hidden_layers: value.num_hidden_layers,
            ffn_dim: value.ffn_dim,
            num_attention_heads: value.num_attention_heads,
            num_key_value_heads: Some(value.num_key_value_heads),
            num_cross_attention_key_value_heads: Some(value.num_cross_attention_key_value_heads),
            layerdrop: value.layerdrop,
            use_cache: value.use_cache,
            activation_function: value.activation_function,
            hidden_size: value.hidden_size,
            dropout: value.dropout,
            attention_dropout: value.attention_dropout,
            activation_dropout: value.activation_dropout,
            initializer_factor: value.initializer_factor,
            scale_embedding: value.scale_embedding,
            num_codebooks: value.num_codebooks,
            pad_token_id: value.pad_token_id,
            bos_token_id: value.bos_token_id,
            eos_token_id: value.eos_token_id,
            tie_word_embeddings: value.tie_word_embeddings,
            rope_embeddings: value.rope_embeddings,
            rope_theta: value.rope_theta,
            cross_attention_implementation_strategy: value.cross_attention_implementation_strategy,
            extra,
        }
    }
}
