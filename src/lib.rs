//! Configuration records of SongGen, a text-to-song model made of a text
//! encoder and a decoder that predicts audio codec tokens.

pub mod config;
pub mod storage;
pub mod storage_ext;
