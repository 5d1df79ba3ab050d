use lazy_static::lazy_static;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::record::{overlay, take_tag, Payload, StructuredRecord};

/// Configuration of a T5 family encoder (`t5`, `mt5`, `umt5`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T5Config {
    pub vocab_size: usize,
    pub d_model: usize,
    pub d_kv: usize,
    pub d_ff: usize,
    pub num_layers: usize,
    /// Defaults to `num_layers`.
    pub num_decoder_layers: Option<usize>,
    pub num_heads: usize,
    pub relative_attention_num_buckets: usize,
    pub relative_attention_max_distance: usize,
    pub dropout_rate: f64,
    pub layer_norm_epsilon: f64,
    pub initializer_factor: f64,
    /// Either `{act}` or `gated-{act}`.
    pub feed_forward_proj: String,
    pub is_encoder_decoder: bool,
    pub use_cache: bool,
    pub pad_token_id: Option<i64>,
    pub eos_token_id: Option<i64>,
    pub decoder_start_token_id: Option<i64>,
    pub tie_word_embeddings: bool,
    #[serde(flatten)]
    pub extra: Payload,
}

impl T5Config {
    pub fn t5() -> Self {
        Self {
            vocab_size: 32128,
            d_model: 512,
            d_kv: 64,
            d_ff: 2048,
            num_layers: 6,
            num_decoder_layers: None,
            num_heads: 8,
            relative_attention_num_buckets: 32,
            relative_attention_max_distance: 128,
            dropout_rate: 0.1,
            layer_norm_epsilon: 1e-6,
            initializer_factor: 1.0,
            feed_forward_proj: "relu".to_string(),
            is_encoder_decoder: true,
            use_cache: true,
            pad_token_id: Some(0),
            eos_token_id: Some(1),
            decoder_start_token_id: Some(0),
            tie_word_embeddings: true,
            extra: Payload::new(),
        }
    }

    /// Defaults shared by `mt5` and `umt5`.
    pub fn mt5() -> Self {
        Self {
            vocab_size: 250112,
            d_ff: 1024,
            num_layers: 8,
            num_heads: 6,
            feed_forward_proj: "gated-gelu".to_string(),
            tie_word_embeddings: false,
            ..Self::t5()
        }
    }

    /// Builds the config from `payload`, taking missing fields from `defaults`.
    fn from_payload_with_defaults(defaults: Self, payload: Payload) -> ConfigResult<Self> {
        let mut config = Self::from_payload(overlay(defaults.to_payload(), payload))?;
        if config.num_decoder_layers.is_none() {
            config.num_decoder_layers = Some(config.num_layers);
        }
        // Fail early on a projection the encoder would not understand.
        config.parse_feed_forward_proj()?;
        Ok(config)
    }

    fn parse_feed_forward_proj(&self) -> ConfigResult<(&str, bool)> {
        let parts = self.feed_forward_proj.split('-').collect::<Vec<_>>();
        match parts.as_slice() {
            [act] if !act.is_empty() => Ok((*act, false)),
            ["gated", act] if !act.is_empty() => Ok((*act, true)),
            _ => Err(ConfigError::InvalidValue {
                field: "feed_forward_proj",
                reason: format!(
                    "`{}` is not a valid activation, use `{{ACT_FN}}` or `gated-{{ACT_FN}}`, e.g. 'gated-gelu' or 'relu'",
                    self.feed_forward_proj
                ),
            }),
        }
    }

    /// Activation of the dense feed-forward layers.
    pub fn dense_act_fn(&self) -> &str {
        match self.parse_feed_forward_proj() {
            // Gated gelu T5 checkpoints were trained with gelu_new.
            Ok(("gelu", true)) => "gelu_new",
            Ok((act, _)) => act,
            Err(_) => "relu",
        }
    }

    pub fn is_gated_act(&self) -> bool {
        matches!(self.parse_feed_forward_proj(), Ok((_, true)))
    }
}

/// Configuration of a BERT encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BertConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: String,
    pub hidden_dropout_prob: f64,
    pub attention_probs_dropout_prob: f64,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub initializer_range: f64,
    pub layer_norm_eps: f64,
    pub pad_token_id: Option<i64>,
    pub position_embedding_type: String,
    pub use_cache: bool,
    #[serde(flatten)]
    pub extra: Payload,
}

impl Default for BertConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            hidden_act: "gelu".to_string(),
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            initializer_range: 0.02,
            layer_norm_eps: 1e-12,
            pad_token_id: Some(0),
            position_embedding_type: "absolute".to_string(),
            use_cache: true,
            extra: Payload::new(),
        }
    }
}

/// The concrete schema behind a text encoder `model_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum TextEncoderSchema {
    T5(T5Config),
    Bert(BertConfig),
}

impl TextEncoderSchema {
    fn to_payload(&self) -> Payload {
        match self {
            TextEncoderSchema::T5(c) => c.to_payload(),
            TextEncoderSchema::Bert(c) => c.to_payload(),
        }
    }
}

/// A text encoder configuration, resolved from its `model_type` tag. The tag
/// is kept as registered, so schemas shared by several tags (`mt5` and
/// `umt5`, or a custom registration) are written back under their own name.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEncoderConfig {
    model_type: String,
    schema: TextEncoderSchema,
}

impl TextEncoderConfig {
    pub fn new(model_type: impl Into<String>, schema: TextEncoderSchema) -> Self {
        Self {
            model_type: model_type.into(),
            schema,
        }
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub fn schema(&self) -> &TextEncoderSchema {
        &self.schema
    }

    /// Width of the hidden states the decoder cross-attends to.
    pub fn hidden_size(&self) -> usize {
        match &self.schema {
            TextEncoderSchema::T5(c) => c.d_model,
            TextEncoderSchema::Bert(c) => c.hidden_size,
        }
    }

    /// The payload of the concrete config, tagged with its `model_type`.
    pub fn to_payload(&self) -> Payload {
        let mut payload = self.schema.to_payload();
        payload.insert("model_type".to_string(), self.model_type.clone().into());
        payload
    }

    /// Resolves the schema named by the payload's own `model_type` in the
    /// global registry.
    pub fn from_payload(payload: Payload) -> ConfigResult<Self> {
        Self::from_payload_with_registry(&TEXT_ENCODER_REGISTRY, payload)
    }

    pub fn from_payload_with_registry(
        registry: &TextEncoderRegistry,
        mut payload: Payload,
    ) -> ConfigResult<Self> {
        let model_type =
            take_tag(&mut payload, "model_type")?.ok_or(ConfigError::MissingModelType("text_encoder"))?;
        registry.resolve(&model_type, payload)
    }
}

impl Default for TextEncoderConfig {
    fn default() -> Self {
        let t5 = T5Config {
            num_decoder_layers: Some(6),
            ..T5Config::t5()
        };
        Self::new("t5", TextEncoderSchema::T5(t5))
    }
}

pub type TextEncoderConstructor = fn(Payload) -> ConfigResult<TextEncoderSchema>;

/// Maps a `model_type` tag to the constructor of its config schema.
#[derive(Clone, Default)]
pub struct TextEncoderRegistry {
    constructors: BTreeMap<String, TextEncoderConstructor>,
}

impl TextEncoderRegistry {
    /// A registry with every text encoder schema this crate knows.
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register("t5", |p| {
            T5Config::from_payload_with_defaults(T5Config::t5(), p).map(TextEncoderSchema::T5)
        });
        registry.register("mt5", |p| {
            T5Config::from_payload_with_defaults(T5Config::mt5(), p).map(TextEncoderSchema::T5)
        });
        registry.register("umt5", |p| {
            T5Config::from_payload_with_defaults(T5Config::mt5(), p).map(TextEncoderSchema::T5)
        });
        registry.register("bert", |p| BertConfig::from_payload(p).map(TextEncoderSchema::Bert));
        registry
    }

    pub fn register(&mut self, model_type: impl Into<String>, constructor: TextEncoderConstructor) {
        self.constructors.insert(model_type.into(), constructor);
    }

    pub fn model_types(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn resolve(&self, model_type: &str, payload: Payload) -> ConfigResult<TextEncoderConfig> {
        let Some(constructor) = self.constructors.get(model_type) else {
            return Err(ConfigError::UnknownModelType {
                model_type: model_type.to_string(),
                known: self.model_types().collect::<Vec<_>>().join(", "),
            });
        };
        debug!("Resolving text encoder config for model_type '{model_type}'");
        Ok(TextEncoderConfig::new(model_type, constructor(payload)?))
    }
}

lazy_static! {
    pub static ref TEXT_ENCODER_REGISTRY: TextEncoderRegistry = TextEncoderRegistry::with_builtin();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(p) => p,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn resolves_t5_with_its_defaults() {
        let config = TEXT_ENCODER_REGISTRY
            .resolve("t5", payload(json!({"d_model": 1024, "num_layers": 24})))
            .unwrap();
        let TextEncoderSchema::T5(t5) = config.schema() else {
            panic!("expected a t5 config, got {config:?}")
        };
        assert_eq!(t5.d_model, 1024);
        assert_eq!(t5.num_decoder_layers, Some(24));
        assert_eq!(t5.vocab_size, 32128);
        assert_eq!(t5.dense_act_fn(), "relu");
        assert!(!t5.is_gated_act());
        assert_eq!(config.hidden_size(), 1024);
    }

    #[test]
    fn mt5_families_use_their_own_defaults() {
        for tag in ["mt5", "umt5"] {
            let config = TEXT_ENCODER_REGISTRY.resolve(tag, Payload::new()).unwrap();
            assert_eq!(config.model_type(), tag);
            let payload = config.to_payload();
            assert_eq!(payload.get("vocab_size"), Some(&json!(250112)));
            assert_eq!(payload.get("feed_forward_proj"), Some(&json!("gated-gelu")));
            assert_eq!(payload.get("tie_word_embeddings"), Some(&json!(false)));
        }
    }

    #[test]
    fn gated_gelu_maps_to_gelu_new() {
        let config = TEXT_ENCODER_REGISTRY
            .resolve("t5", payload(json!({"feed_forward_proj": "gated-gelu"})))
            .unwrap();
        let TextEncoderSchema::T5(t5) = config.schema() else {
            panic!("expected a t5 config")
        };
        assert!(t5.is_gated_act());
        assert_eq!(t5.dense_act_fn(), "gelu_new");
    }

    #[test]
    fn rejects_malformed_feed_forward_proj() {
        let err = TEXT_ENCODER_REGISTRY
            .resolve("t5", payload(json!({"feed_forward_proj": "gated-gelu-extra"})))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "feed_forward_proj",
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_model_types() {
        let err = TEXT_ENCODER_REGISTRY
            .resolve("gpt2", Payload::new())
            .unwrap_err();
        match err {
            ConfigError::UnknownModelType { model_type, known } => {
                assert_eq!(model_type, "gpt2");
                assert_eq!(known, "bert, mt5, t5, umt5");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn from_payload_reads_the_tag() {
        let config = TextEncoderConfig::from_payload(payload(json!({
            "model_type": "bert",
            "hidden_size": 512
        })))
        .unwrap();
        assert_eq!(config.model_type(), "bert");
        assert_eq!(config.hidden_size(), 512);

        let err = TextEncoderConfig::from_payload(payload(json!({"hidden_size": 512}))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingModelType("text_encoder")));
    }

    #[test]
    fn payload_carries_the_tag_and_survives_a_round_trip() {
        let config = TextEncoderConfig::default();
        let payload = config.to_payload();
        assert_eq!(payload.get("model_type"), Some(&json!("t5")));
        assert_eq!(TextEncoderConfig::from_payload(payload).unwrap(), config);
    }

    #[test]
    fn loads_null_token_ids() {
        let config = TEXT_ENCODER_REGISTRY
            .resolve(
                "t5",
                payload(json!({"pad_token_id": null, "decoder_start_token_id": null})),
            )
            .unwrap();
        let TextEncoderSchema::T5(t5) = config.schema() else {
            panic!("expected a t5 config")
        };
        assert_eq!(t5.pad_token_id, None);
        assert_eq!(t5.eos_token_id, Some(1));
        assert_eq!(t5.decoder_start_token_id, None);
        assert_eq!(TextEncoderConfig::from_payload(config.to_payload()).unwrap(), config);

        let config = TEXT_ENCODER_REGISTRY
            .resolve("bert", payload(json!({"pad_token_id": null})))
            .unwrap();
        let TextEncoderSchema::Bert(bert) = config.schema() else {
            panic!("expected a bert config")
        };
        assert_eq!(bert.pad_token_id, None);
        assert_eq!(BertConfig::default().pad_token_id, Some(0));
    }

    #[test]
    fn custom_schemas_can_be_registered() {
        let mut registry = TextEncoderRegistry::default();
        registry.register("tiny_bert", |p| {
            BertConfig::from_payload(p).map(TextEncoderSchema::Bert)
        });
        let config = registry
            .resolve("tiny_bert", payload(json!({"num_hidden_layers": 2})))
            .unwrap();
        let TextEncoderSchema::Bert(bert) = config.schema() else {
            panic!("expected a bert config")
        };
        assert_eq!(bert.num_hidden_layers, 2);
        assert_eq!(registry.model_types().collect::<Vec<_>>(), vec!["tiny_bert"]);
    }

    #[test]
    fn custom_tags_survive_a_round_trip() {
        let mut registry = TextEncoderRegistry::with_builtin();
        registry.register("tiny_bert", |p| {
            BertConfig::from_payload(p).map(TextEncoderSchema::Bert)
        });
        let config = registry
            .resolve("tiny_bert", payload(json!({"num_hidden_layers": 2})))
            .unwrap();

        let payload = config.to_payload();
        assert_eq!(payload.get("model_type"), Some(&json!("tiny_bert")));
        let reloaded = TextEncoderConfig::from_payload_with_registry(&registry, payload.clone()).unwrap();
        assert_eq!(reloaded, config);

        // The global registry does not know the custom tag.
        assert!(matches!(
            TextEncoderConfig::from_payload(payload),
            Err(ConfigError::UnknownModelType { .. })
        ));
    }
}
