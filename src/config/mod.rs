mod error;
mod record;
mod songgen_config;
mod songgen_decoder_config;
mod text_encoder_config;

pub use error::{ConfigError, ConfigResult};
pub use record::{overlay, take_object, take_tag, take_value, Payload, StructuredRecord};
pub use songgen_config::{SongGenConfig, CONFIG_NAME, MODEL_TYPE, SAMPLING_RATE};
pub use songgen_decoder_config::{
    AttnImplementation, SongGenDecoderConfig, SongGenDecoderParams, ALWAYS_EAGER, ALWAYS_SDPA,
    DECODER_MODEL_TYPE,
};
pub use text_encoder_config::{
    BertConfig, T5Config, TextEncoderConfig, TextEncoderConstructor, TextEncoderRegistry,
    TextEncoderSchema, TEXT_ENCODER_REGISTRY,
};
